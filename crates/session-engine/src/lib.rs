//! Classroom Session Engine Library
//!
//! Client-side engine for live mentor/student video sessions:
//!
//! - Session clock: pure phase evaluation over a scheduled window plus a
//!   1 Hz driver publishing readings
//! - Device probe: lobby preview with microphone level metering
//! - Background compositor: blur or image replacement behind the person in
//!   the camera feed
//! - Room session: join/leave lifecycle, remote tiles, screen-share
//!   arbitration and the in-band control channel
//!
//! # Architecture
//!
//! ```text
//! DeviceProbe (lobby)  --handoff-->  RoomSessionActor (one per participant)
//!                                    ├── owns the room connection
//!                                    ├── owns local media
//!                                    │   ├── microphone
//!                                    │   ├── camera -> Compositor (optional)
//!                                    │   └── screen share
//!                                    └── reduces room events into tiles
//!
//! clock driver  --watch-->  BannerView / LobbyView
//! ```
//!
//! Transport, devices, segmentation and the session record API are traits
//! implemented by the embedding application.
//!
//! # Modules
//!
//! - [`clock`] - Session phases and the tick driver
//! - [`probe`] - Pre-join device preview and level meter
//! - [`compositor`] - Background substitution
//! - [`room`] - Room session actor and its collaborators
//! - [`presentation`] - Banner and lobby view models
//! - [`config`] - Engine configuration from environment
//! - [`errors`] - Error types

pub mod clock;
pub mod compositor;
pub mod config;
pub mod errors;
pub mod media;
pub mod observability;
pub mod presentation;
pub mod probe;
pub mod room;
