//! # Session Test Utilities
//!
//! Shared test utilities for the classroom session engine.
//!
//! This crate provides in-memory implementations of every collaborator trait
//! the engine consumes, so the room session, the device probe and the
//! compositor can be driven end to end without a real SFU, camera or backend.
//!
//! ## Modules
//!
//! - `mock_transport` - Room transport that records publications, sinks and
//!   control traffic, and lets tests inject room events
//! - `mock_devices` - Capture devices backed by watch channels
//! - `mock_services` - Session API, room status probe, segmentation and
//!   background image loader
//! - `fixtures` - Identities, control packets, session windows and a ready
//!   wired room harness
//!
//! ## Usage
//!
//! ```rust,ignore
//! use session_test_utils::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_example() {
//!     let room = RoomHarness::spawn();
//!     room.handle.join(mentor_join("course-42")).await.unwrap();
//!
//!     let connection = room.transport.last_connection().unwrap();
//!     connection.inject(participant_joined(&student("Ana"), Role::Student)).await;
//!
//!     let snapshot = room.handle.current_snapshot().await.unwrap();
//!     assert_eq!(snapshot.tiles.len(), 1);
//! }
//! ```
//!
//! ## Test Patterns
//!
//! ### Overlapping joins
//!
//! ```rust,ignore
//! room.transport.script_connect(ConnectBehavior::Delay(Duration::from_secs(5)));
//! room.transport.script_connect(ConnectBehavior::Succeed);
//!
//! // The first join resolves Superseded, its connection is torn down
//! ```

pub mod fixtures;
pub mod mock_devices;
pub mod mock_services;
pub mod mock_transport;

// Re-export commonly used items
pub use fixtures::*;
pub use mock_devices::*;
pub use mock_services::*;
pub use mock_transport::*;
