//! Secret types for protecting sensitive values from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate. Join credentials
//! minted by the session record API are bearer tokens: anyone holding one can
//! enter the room as that participant, so they must never reach a log line.
//!
//! `SecretString` implements `Debug` with redaction, so any struct deriving
//! `Debug` that holds a credential gets safe logging behavior for free.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, JoinToken};
//!
//! #[derive(Debug)]
//! struct JoinRequest {
//!     room_name: String,
//!     token: JoinToken,
//! }
//!
//! let req = JoinRequest {
//!     room_name: "course-42".to_string(),
//!     token: JoinToken::from("eyJhbGciOi..."),
//! };
//!
//! // Safe: the token is redacted
//! println!("{:?}", req);
//!
//! // Handing the token to the transport requires an explicit call
//! let raw: &str = req.token.expose_secret();
//! assert!(raw.starts_with("eyJ"));
//! ```

// Re-export the main types from secrecy
pub use secrecy::{ExposeSecret, SecretBox, SecretString};

/// Room join credential returned by `getJoinCredential`.
pub type JoinToken = SecretString;
