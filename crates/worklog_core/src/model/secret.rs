//! Redacting wrapper for credential material held in memory.
//!
//! # Invariants
//! - `Debug`, `Display` and `Serialize` never reveal the wrapped value.
//! - Only connection builders and the profile store call `expose()`.

use serde::{Serialize, Serializer};
use std::fmt::{Debug, Display, Formatter};

/// Marker written in place of a secret in every non-store representation.
pub const REDACTED: &str = "********";

/// Sensitive string such as a database password.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the clear-text value.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Debug for Secret {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret({REDACTED})")
    }
}

impl Display for Secret {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(REDACTED)
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED)
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::{Secret, REDACTED};

    #[test]
    fn secret_is_masked_in_debug_display_and_json() {
        let secret = Secret::new("hunter2");

        assert!(!format!("{secret:?}").contains("hunter2"));
        assert_eq!(format!("{secret}"), REDACTED);
        let json = serde_json::to_string(&secret).expect("secret should serialize");
        assert_eq!(json, format!("\"{REDACTED}\""));
        assert_eq!(secret.expose(), "hunter2");
    }
}
