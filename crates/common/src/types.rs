//! Common data types for classroom engine components.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Separator between the display name and the opaque suffix of an identity.
pub const IDENTITY_SEPARATOR: char = '|';

/// Maximum number of characters kept from a display name.
pub const MAX_DISPLAY_NAME_CHARS: usize = 64;

/// Display name used when an identity carries nothing presentable.
pub const FALLBACK_DISPLAY_NAME: &str = "Participant";

/// Unique identifier for a local or remote media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackId(pub Uuid);

impl TrackId {
    /// Create a new random track ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TrackId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Role of a participant in a classroom session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Hosts the session, may moderate others
    Mentor,
    /// Regular attendee
    #[default]
    Student,
}

impl Role {
    /// Whether this role may mute, unmute or remove other participants.
    #[must_use]
    pub const fn can_moderate(self) -> bool {
        matches!(self, Role::Mentor)
    }
}

/// Transport identity of a participant.
///
/// Identities are minted as `"<displayName>|<opaque-suffix>"`. The raw value
/// is used for routing and comparisons only; [`ParticipantIdentity::display_name`]
/// is the only value fit for presentation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantIdentity(String);

impl ParticipantIdentity {
    /// Wrap a raw identity string received from the transport.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Compose a fresh identity for a local participant.
    #[must_use]
    pub fn compose(display_name: &str) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        let short_suffix = suffix.get(..12).unwrap_or("000000000000");
        Self(format!(
            "{}{IDENTITY_SEPARATOR}{short_suffix}",
            sanitize_display_name(display_name)
        ))
    }

    /// The raw identity value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A stable display name parsed from the identity.
    ///
    /// Control characters are stripped, whitespace is collapsed and the
    /// result is capped at [`MAX_DISPLAY_NAME_CHARS`].
    #[must_use]
    pub fn display_name(&self) -> String {
        let name_part = self
            .0
            .split(IDENTITY_SEPARATOR)
            .next()
            .unwrap_or_default();
        sanitize_display_name(name_part)
    }
}

impl fmt::Display for ParticipantIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantIdentity {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Normalize an untrusted display name for presentation.
#[must_use]
pub fn sanitize_display_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .filter(|c| *c != IDENTITY_SEPARATOR)
        .collect();

    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let capped: String = collapsed.chars().take(MAX_DISPLAY_NAME_CHARS).collect();
    let capped = capped.trim_end().to_string();

    if capped.is_empty() {
        FALLBACK_DISPLAY_NAME.to_string()
    } else {
        capped
    }
}
