//! Pixel operations for background substitution.

use image::imageops::{self, FilterType};
use image::{GrayImage, Rgba, RgbaImage};

/// Downscale factor applied before blurring; the result is scaled back up.
const BLUR_DOWNSCALE: u32 = 4;

/// Blur a frame for use as a background layer.
///
/// Blurs at a quarter of the resolution, which is visually identical for
/// large sigmas and much cheaper per frame.
#[must_use]
pub fn blur_background(frame: &RgbaImage, sigma: f32) -> RgbaImage {
    let (width, height) = frame.dimensions();
    if width < BLUR_DOWNSCALE || height < BLUR_DOWNSCALE {
        return imageops::blur(frame, sigma);
    }

    let small = imageops::resize(
        frame,
        width / BLUR_DOWNSCALE,
        height / BLUR_DOWNSCALE,
        FilterType::Triangle,
    );
    #[allow(clippy::cast_precision_loss)]
    let blurred = imageops::blur(&small, sigma / BLUR_DOWNSCALE as f32);
    imageops::resize(&blurred, width, height, FilterType::Triangle)
}

/// Scale `image` to fill `width x height`, cropping the overflow around the centre.
#[must_use]
pub fn fit_cover(image: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    let (src_w, src_h) = image.dimensions();
    if src_w == 0 || src_h == 0 || width == 0 || height == 0 {
        return RgbaImage::new(width, height);
    }
    if (src_w, src_h) == (width, height) {
        return image.clone();
    }

    let scale = f64::max(
        f64::from(width) / f64::from(src_w),
        f64::from(height) / f64::from(src_h),
    );
    let scaled_w = scaled_dimension(src_w, scale).max(width);
    let scaled_h = scaled_dimension(src_h, scale).max(height);

    let scaled = imageops::resize(image, scaled_w, scaled_h, FilterType::Triangle);
    let x = (scaled_w - width) / 2;
    let y = (scaled_h - height) / 2;
    imageops::crop_imm(&scaled, x, y, width, height).to_image()
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn scaled_dimension(value: u32, scale: f64) -> u32 {
    let scaled = (f64::from(value) * scale).ceil();
    if scaled >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        scaled as u32
    }
}

/// Map an output coordinate onto a source axis of a different length.
fn nearest(coord: u32, out_len: u32, src_len: u32) -> u32 {
    if out_len == 0 || src_len == 0 {
        return 0;
    }
    let mapped = u64::from(coord) * u64::from(src_len) / u64::from(out_len);
    u32::try_from(mapped).unwrap_or(src_len - 1).min(src_len - 1)
}

fn blend_channel(fg: u8, bg: u8, alpha: u16) -> u8 {
    let mixed = (u16::from(fg) * alpha + u16::from(bg) * (255 - alpha) + 127) / 255;
    u8::try_from(mixed).unwrap_or(u8::MAX)
}

/// Composite `foreground` over `background` using `mask` as per-pixel alpha.
///
/// `mask` is foreground confidence in `0..=255` and may have any resolution;
/// it is sampled nearest-neighbour. Missing background pixels fall back to the
/// foreground. The output is opaque and sized like `foreground`.
#[must_use]
pub fn composite(foreground: &RgbaImage, background: &RgbaImage, mask: &GrayImage) -> RgbaImage {
    let (width, height) = foreground.dimensions();
    let (mask_w, mask_h) = mask.dimensions();

    RgbaImage::from_fn(width, height, |x, y| {
        let Some(fg) = foreground.get_pixel_checked(x, y) else {
            return Rgba([0, 0, 0, u8::MAX]);
        };
        let bg = background.get_pixel_checked(x, y).unwrap_or(fg);
        let alpha = mask
            .get_pixel_checked(nearest(x, width, mask_w), nearest(y, height, mask_h))
            .map_or(u16::from(u8::MAX), |p| u16::from(p.0[0]));

        let [fr, fg_g, fb, _] = fg.0;
        let [br, bg_g, bb, _] = bg.0;
        Rgba([
            blend_channel(fr, br, alpha),
            blend_channel(fg_g, bg_g, alpha),
            blend_channel(fb, bb, alpha),
            u8::MAX,
        ])
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use image::Luma;

    fn solid(width: u32, height: u32, rgb: [u8; 3]) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([rgb[0], rgb[1], rgb[2], 255]))
    }

    #[test]
    fn test_full_mask_keeps_foreground() {
        let fg = solid(8, 6, [200, 10, 10]);
        let bg = solid(8, 6, [0, 0, 250]);
        let mask = GrayImage::from_pixel(8, 6, Luma([255]));
        assert_eq!(composite(&fg, &bg, &mask), fg);
    }

    #[test]
    fn test_empty_mask_shows_background() {
        let fg = solid(8, 6, [200, 10, 10]);
        let bg = solid(8, 6, [0, 0, 250]);
        let mask = GrayImage::new(8, 6);
        assert_eq!(composite(&fg, &bg, &mask), bg);
    }

    #[test]
    fn test_half_mask_blends() {
        let fg = solid(2, 2, [200, 0, 0]);
        let bg = solid(2, 2, [0, 0, 200]);
        let mask = GrayImage::from_pixel(2, 2, Luma([128]));
        let out = composite(&fg, &bg, &mask);
        let px = out.get_pixel(0, 0);
        assert!((99..=102).contains(&px.0[0]));
        assert!((98..=101).contains(&px.0[2]));
        assert_eq!(px.0[3], 255);
    }

    #[test]
    fn test_low_resolution_mask_is_resampled() {
        let fg = solid(8, 8, [255, 255, 255]);
        let bg = solid(8, 8, [0, 0, 0]);
        // Left half foreground, right half background.
        let mask = GrayImage::from_fn(2, 1, |x, _| if x == 0 { Luma([255]) } else { Luma([0]) });

        let out = composite(&fg, &bg, &mask);
        assert_eq!(out.get_pixel(0, 0).0, [255, 255, 255, 255]);
        assert_eq!(out.get_pixel(3, 7).0, [255, 255, 255, 255]);
        assert_eq!(out.get_pixel(4, 0).0, [0, 0, 0, 255]);
        assert_eq!(out.get_pixel(7, 7).0, [0, 0, 0, 255]);
    }

    #[test]
    fn test_fit_cover_fills_and_crops_centre() {
        // Wide source: left third red, middle third green, right third blue.
        let src = RgbaImage::from_fn(300, 100, |x, _| match x {
            0..=99 => Rgba([255, 0, 0, 255]),
            100..=199 => Rgba([0, 255, 0, 255]),
            _ => Rgba([0, 0, 255, 255]),
        });

        let out = fit_cover(&src, 40, 40);
        assert_eq!(out.dimensions(), (40, 40));
        let centre = out.get_pixel(20, 20).0;
        assert!(centre[1] > 200 && centre[0] < 50 && centre[2] < 50);
    }

    #[test]
    fn test_fit_cover_upscales_small_images() {
        let src = solid(4, 3, [9, 9, 9]);
        let out = fit_cover(&src, 64, 48);
        assert_eq!(out.dimensions(), (64, 48));
        assert_eq!(out.get_pixel(63, 47).0, [9, 9, 9, 255]);
    }

    #[test]
    fn test_blur_preserves_dimensions_and_flat_colour() {
        let frame = solid(256, 192, [50, 100, 150]);
        let out = blur_background(&frame, 2.0);
        assert_eq!(out.dimensions(), (256, 192));
        let px = out.get_pixel(128, 96).0;
        assert!((48..=52).contains(&px[0]));
        assert!((98..=102).contains(&px[1]));
    }
}
