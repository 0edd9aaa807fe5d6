//! Bibliographic metadata captured when a job is created.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::JobId;
use crate::identity::canonicalize;

/// Placeholder for a field the extractor could not resolve.
pub const NOT_AVAILABLE: &str = "NA";

pub const ORIGIN_TITLE: &str = "origin_title";
pub const ORIGIN_AUTHOR: &str = "origin_author";
pub const TRANSLATED_TITLE: &str = "trans_title";
pub const TRANSLATED_AUTHOR: &str = "trans_author";

/// Title and author of a document, in its original and processed form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookInfo {
    pub origin_title: String,
    pub origin_author: String,
    pub translated_title: String,
    pub translated_author: String,
}

impl Default for BookInfo {
    fn default() -> Self {
        Self {
            origin_title: NOT_AVAILABLE.to_string(),
            origin_author: NOT_AVAILABLE.to_string(),
            translated_title: NOT_AVAILABLE.to_string(),
            translated_author: NOT_AVAILABLE.to_string(),
        }
    }
}

impl BookInfo {
    pub fn new(
        origin_title: impl Into<String>,
        origin_author: impl Into<String>,
        translated_title: impl Into<String>,
        translated_author: impl Into<String>,
    ) -> Self {
        Self {
            origin_title: origin_title.into(),
            origin_author: origin_author.into(),
            translated_title: translated_title.into(),
            translated_author: translated_author.into(),
        }
    }

    /// Parse an extractor answer shaped like
    /// `[origin title, origin author, translated title, translated author]`.
    ///
    /// Missing or blank fields become `NA`. Fields are comma separated, so a
    /// title containing a comma is split; callers validate the result.
    pub fn parse_listing(answer: &str) -> Self {
        let inner = answer.trim().trim_start_matches('[').trim_end_matches(']');
        let mut fields = inner.split(',').map(|f| {
            let f = f.trim().trim_matches('"').trim();
            if f.is_empty() { NOT_AVAILABLE.to_string() } else { f.to_string() }
        });

        let mut next = || fields.next().unwrap_or_else(|| NOT_AVAILABLE.to_string());
        Self {
            origin_title: next(),
            origin_author: next(),
            translated_title: next(),
            translated_author: next(),
        }
    }

    /// Origin title and author must both be resolved to derive a job identity.
    pub fn validate(&self) -> DomainResult<()> {
        if !is_resolved(&self.origin_title) {
            return Err(DomainError::validation("origin title could not be resolved"));
        }
        if !is_resolved(&self.origin_author) {
            return Err(DomainError::validation("origin author could not be resolved"));
        }
        Ok(())
    }

    pub fn job_id(&self) -> JobId {
        JobId::for_origin(&self.origin_title, &self.origin_author)
    }

    pub fn to_metadata(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (ORIGIN_TITLE.to_string(), self.origin_title.clone()),
            (ORIGIN_AUTHOR.to_string(), self.origin_author.clone()),
            (TRANSLATED_TITLE.to_string(), self.translated_title.clone()),
            (TRANSLATED_AUTHOR.to_string(), self.translated_author.clone()),
        ])
    }

    pub fn from_metadata(metadata: &BTreeMap<String, String>) -> Self {
        let field = |key: &str| {
            metadata
                .get(key)
                .cloned()
                .unwrap_or_else(|| NOT_AVAILABLE.to_string())
        };
        Self {
            origin_title: field(ORIGIN_TITLE),
            origin_author: field(ORIGIN_AUTHOR),
            translated_title: field(TRANSLATED_TITLE),
            translated_author: field(TRANSLATED_AUTHOR),
        }
    }
}

fn is_resolved(field: &str) -> bool {
    let canonical = canonicalize(field);
    !canonical.is_empty() && canonical != canonicalize(NOT_AVAILABLE)
}
