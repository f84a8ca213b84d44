//! Request verbs the backend understands.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Verb of an outbound backend call. Serialized in upper case, which is
/// also how queued requests store it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// Reads.
    #[default]
    Get,
    /// Creates, and the auth calls.
    Post,
    /// Replaces.
    Put,
    /// Partial profile and booking edits.
    Patch,
    /// Cancels or removes.
    Delete,
}

impl HttpMethod {
    /// Every verb, in declaration order.
    pub const ALL: [Self; 5] = [Self::Get, Self::Post, Self::Put, Self::Patch, Self::Delete];

    /// Wire name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
