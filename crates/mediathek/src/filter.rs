//! Selection filters for tables, media, and attachments.
//!
//! Loads can be restricted to a subset of artifacts: either an explicit
//! list of names or a regular expression matched against everything that
//! is available. An empty list selects nothing, which is how callers
//! load metadata-only slices.

use crate::error::{ErrorKind, Result};
use regex::Regex;

/// A subset selection.
#[derive(Debug, Clone, Default)]
pub enum Filter {
    /// Everything (the default).
    #[default]
    All,
    /// Exactly these names; each must exist.
    Names(Vec<String>),
    /// Every available name matching the regular expression; at least
    /// one must match.
    Pattern(String),
}

impl Filter {
    /// An explicit name list.
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Names(names.into_iter().map(Into::into).collect())
    }

    /// A regular expression filter.
    pub fn pattern(pattern: impl Into<String>) -> Self {
        Self::Pattern(pattern.into())
    }

    /// A filter that selects nothing.
    pub fn none() -> Self {
        Self::Names(Vec::new())
    }

    /// Whether this filter selects everything.
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// Apply the filter to the available names, preserving their order.
    ///
    /// # Errors
    /// [`ErrorKind::InvalidArgument`] when a listed name is unknown, a
    /// pattern matches nothing, or a pattern fails to compile. `what`
    /// names the object type in the message (`"table"`, `"media file"`,
    /// `"attachment"`).
    pub fn select(&self, available: &[String], what: &str) -> Result<Vec<String>> {
        match self {
            Self::All => Ok(available.to_vec()),
            Self::Names(names) => {
                for name in names {
                    if !available.contains(name) {
                        exn::bail!(ErrorKind::InvalidArgument(format!("could not find the {what} '{name}'")));
                    }
                }
                Ok(available.iter().filter(|a| names.contains(a)).cloned().collect())
            },
            Self::Pattern(pattern) => {
                let regex = Regex::new(pattern)
                    .map_err(|e| ErrorKind::InvalidArgument(format!("invalid {what} pattern '{pattern}': {e}")))?;
                let selected: Vec<String> = available.iter().filter(|a| regex.is_match(a)).cloned().collect();
                if selected.is_empty() {
                    exn::bail!(ErrorKind::InvalidArgument(format!(
                        "could not find a {what} matching '{pattern}'"
                    )));
                }
                Ok(selected)
            },
        }
    }
}
