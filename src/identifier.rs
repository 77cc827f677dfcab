//! Media identifier parsing and validation
//!
//! External catalogs hand out opaque ids (`dQw4w9WgXcQ`). The id doubles as the
//! on-disk file stem of the downloaded asset, so it is validated once at the
//! boundary and carried around as a [`MediaId`] afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum accepted identifier length
pub const MAX_ID_LEN: usize = 128;

/// Validated external media identifier
///
/// Allowed characters are ASCII alphanumerics, `-` and `_`, plus `.` anywhere
/// except the first or last position. This keeps every id a single,
/// collision-free path component.
///
/// # Examples
///
/// ```
/// use media_ingest::identifier::MediaId;
///
/// let id = MediaId::parse("dQw4w9WgXcQ").unwrap();
/// assert_eq!(id.as_str(), "dQw4w9WgXcQ");
/// assert!(MediaId::parse("../etc/passwd").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MediaId(String);

impl MediaId {
    /// Parse and validate an identifier
    ///
    /// Surrounding whitespace is trimmed; case is preserved because catalog
    /// ids are case-sensitive.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is empty, too long, or contains characters
    /// that are unsafe in a file name.
    pub fn parse(s: &str) -> Result<Self, IdentifierError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(IdentifierError::Empty);
        }
        if trimmed.len() > MAX_ID_LEN {
            return Err(IdentifierError::TooLong {
                len: trimmed.len(),
                max: MAX_ID_LEN,
            });
        }
        if trimmed.starts_with('.') || trimmed.ends_with('.') {
            return Err(IdentifierError::InvalidCharacter {
                id: trimmed.to_string(),
                ch: '.',
            });
        }
        if let Some(ch) = trimmed
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(IdentifierError::InvalidCharacter {
                id: trimmed.to_string(),
                ch,
            });
        }

        Ok(Self(trimmed.to_string()))
    }

    /// Borrow the raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MediaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for MediaId {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<MediaId> for String {
    fn from(id: MediaId) -> Self {
        id.0
    }
}

impl std::str::FromStr for MediaId {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Errors that can occur during identifier parsing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentifierError {
    /// Empty identifier
    #[error("media id cannot be empty")]
    Empty,

    /// Identifier exceeds [`MAX_ID_LEN`]
    #[error("media id is {len} characters long (max {max})")]
    TooLong {
        /// Actual length
        len: usize,
        /// Maximum length
        max: usize,
    },

    /// Identifier contains a character that is unsafe in a file name
    #[error("media id '{id}' contains invalid character '{ch}'")]
    InvalidCharacter {
        /// Offending id
        id: String,
        /// First invalid character
        ch: char,
    },
}
