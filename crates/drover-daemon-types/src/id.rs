use std::fmt;

use serde::{Deserialize, Serialize};

/// Registry key for a managed process.
///
/// During a reload handoff the outgoing record is relabelled as the shadow of
/// its own identifier, so both the replacement (`Primary`) and the outgoing
/// instance (`Shadow`) stay addressable under the same number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "role", content = "id", rename_all = "snake_case")]
pub enum ProcessId {
    /// The live record for an identifier.
    Primary(u32),
    /// The outgoing record of an in-flight reload.
    Shadow(u32),
}

impl ProcessId {
    /// Numeric identifier regardless of role.
    #[must_use]
    pub const fn number(self) -> u32 {
        match self {
            Self::Primary(id) | Self::Shadow(id) => id,
        }
    }

    /// Whether this key names a shadow record.
    #[must_use]
    pub const fn is_shadow(self) -> bool {
        matches!(self, Self::Shadow(_))
    }

    /// The shadow key for the same identifier.
    #[must_use]
    pub const fn as_shadow(self) -> Self {
        Self::Shadow(self.number())
    }

    /// The primary key for the same identifier.
    #[must_use]
    pub const fn as_primary(self) -> Self {
        Self::Primary(self.number())
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary(id) => write!(formatter, "{id}"),
            Self::Shadow(id) => write!(formatter, "shadow:{id}"),
        }
    }
}
