//! Strongly-typed identifiers used across the pipeline.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;
use crate::identity;

/// Length of a job identifier in hex characters.
pub const JOB_ID_LEN: usize = 32;

/// Identifier of a job.
///
/// Always 32 lowercase hex characters: a truncated digest of the canonical
/// bibliographic key (see [`identity::derive_job_id`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

/// Identity under whose exclusivity quota a job runs (e.g. an e-mail address).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OwnerId(String);

/// Identifier of a single orchestrator run, used to correlate logs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl JobId {
    /// Job identity of a document: its origin title and author.
    ///
    /// Two different texts sharing a title and author map to the same job.
    pub fn for_origin(origin_title: &str, origin_author: &str) -> Self {
        Self(identity::derive_job_id(&[origin_title, origin_author]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl OwnerId {
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_id("OwnerId: must not be empty"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl RunId {
    /// Uses UUIDv7 (time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for JobId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = s.len() == JOB_ID_LEN
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !valid {
            return Err(DomainError::invalid_id(format!(
                "JobId: expected {JOB_ID_LEN} lowercase hex characters, got {s:?}"
            )));
        }
        Ok(Self(s.to_string()))
    }
}

impl FromStr for OwnerId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

macro_rules! impl_string_newtype {
    ($t:ty) => {
        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<String> for $t {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }
    };
}

impl_string_newtype!(JobId);
impl_string_newtype!(OwnerId);

impl core::fmt::Display for RunId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_parses_only_lowercase_hex_of_fixed_length() {
        let id = JobId::for_origin("The Winepress", "Josef Essberger");
        assert_eq!(id.as_str().len(), JOB_ID_LEN);
        assert_eq!(id.as_str().parse::<JobId>().unwrap(), id);

        assert!("abc".parse::<JobId>().is_err());
        assert!("Z".repeat(JOB_ID_LEN).parse::<JobId>().is_err());
        assert!("A".repeat(JOB_ID_LEN).parse::<JobId>().is_err());
    }

    #[test]
    fn owner_id_rejects_blank_and_trims() {
        assert!(OwnerId::new("   ").is_err());
        assert_eq!(OwnerId::new(" reader@example.com ").unwrap().as_str(), "reader@example.com");
    }

    #[test]
    fn job_id_serializes_as_plain_string() {
        let id = JobId::for_origin("a", "b");
        let s: String = id.clone().into();
        assert_eq!(JobId::try_from(s).unwrap(), id);
    }
}
