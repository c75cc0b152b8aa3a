use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Longest textual identity accepted (29 raw bytes + checksum, base32, dashed).
const MAX_IDENTITY_LEN: usize = 63;
const GROUP_LEN: usize = 5;

/// A filter identity (creator or source root) failed to parse.
///
/// Never surfaced to the user: the new-item detector falls back to the
/// unfiltered estimate and the upstream query receives the raw text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MalformedFilterError {
    #[error("Identity is empty")]
    Empty,
    #[error("Identity too long: {0} characters")]
    TooLong(usize),
    #[error("Invalid character {found:?} in identity {text:?}")]
    InvalidChar { text: String, found: char },
    #[error("Malformed group layout in identity {0:?}")]
    BadGrouping(String),
}

/// A validated textual principal, e.g. `rrkah-fqaaa-aaaaa-aaaaq-cai`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identity(Arc<str>);

impl Identity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse a dashed, lowercase base32 identity.
///
/// Every group is exactly five characters except the last, which holds one to
/// five. The alphabet is `a-z` and `2-7`. Surrounding whitespace is ignored.
pub fn parse_identity(text: &str) -> Result<Identity, MalformedFilterError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(MalformedFilterError::Empty);
    }
    if text.len() > MAX_IDENTITY_LEN {
        return Err(MalformedFilterError::TooLong(text.len()));
    }
    if let Some(found) = text
        .chars()
        .find(|c| !matches!(c, 'a'..='z' | '2'..='7' | '-'))
    {
        return Err(MalformedFilterError::InvalidChar {
            text: text.to_string(),
            found,
        });
    }

    let groups: Vec<&str> = text.split('-').collect();
    let (last, full) = groups
        .split_last()
        .ok_or_else(|| MalformedFilterError::BadGrouping(text.to_string()))?;
    let well_formed =
        full.iter().all(|g| g.len() == GROUP_LEN) && (1..=GROUP_LEN).contains(&last.len());
    if !well_formed {
        return Err(MalformedFilterError::BadGrouping(text.to_string()));
    }

    Ok(Identity(Arc::from(text)))
}
