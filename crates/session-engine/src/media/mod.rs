//! Local media: track handles and the platform device trait.

mod devices;
mod track;

pub use devices::{DeviceInfo, DeviceKind, MediaDevices, VideoConstraints, VideoQuality};
pub use track::{AudioChunk, LocalTrack, TrackKind, VideoFrame};
