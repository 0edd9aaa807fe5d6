//! Canonical job identity.
//!
//! A job is identified by its bibliographic key, not its content: fields are
//! canonicalised (alphanumerics only, lowercased), joined with `|`, hashed with
//! SHA-256 and truncated to [`JOB_ID_LEN`] hex characters.

use sha2::{Digest, Sha256};

use crate::id::JOB_ID_LEN;

/// Strip everything but alphanumeric characters and lowercase the rest.
pub fn canonicalize(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Derive a hex job identifier from one or more text fields.
pub fn derive_job_id(fields: &[&str]) -> String {
    let canonical = fields
        .iter()
        .map(|f| canonicalize(f))
        .collect::<Vec<_>>()
        .join("|");

    let digest = Sha256::digest(canonical.as_bytes());
    let mut hex = String::with_capacity(JOB_ID_LEN);
    for byte in digest.iter().take(JOB_ID_LEN / 2) {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}
