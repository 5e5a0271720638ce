//! Core identity types: subjects, scopes, and artifact keys.
//!
//! An artifact is identified by a stable key derived from the subject it
//! describes plus the scope parameters it was computed with. The subject is
//! carried inside the key so that rate limiting never has to parse key
//! strings back apart.

use blake3::Hasher;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Number of digest bytes kept in an artifact key (rendered as 16 hex chars).
const KEY_DIGEST_BYTES: usize = 8;

/// Normalized identifier of the entity an artifact describes.
///
/// Subjects are trimmed and lowercased on construction so differently-cased
/// requests for the same entity share cache entries and rate-limit slots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(raw: &str) -> Self {
        SubjectId(raw.trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubjectId {
    fn from(raw: &str) -> Self {
        SubjectId::new(raw)
    }
}

/// Scope parameters an artifact was computed with (reporting window, option
/// flags).
///
/// Parameters are kept in a `BTreeMap` so the canonical encoding is
/// independent of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    params: BTreeMap<String, String>,
}

impl Scope {
    pub fn new() -> Self {
        Scope {
            params: BTreeMap::new(),
        }
    }

    /// Builder-style insertion for test and call-site ergonomics.
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        self.params.insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Canonical byte encoding used for key derivation.
    ///
    /// `key=value` pairs joined by newlines, in map order.
    fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (key, value) in &self.params {
            out.extend_from_slice(key.as_bytes());
            out.push(b'=');
            out.extend_from_slice(value.as_bytes());
            out.push(b'\n');
        }
        out
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        f.write_str(&rendered.join(","))
    }
}

/// Stable identifier for a cached artifact.
///
/// ArtifactKey = subject + hex digest of blake3(subject || canonical scope).
/// Two requests with the same subject and scope always derive the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    subject: SubjectId,
    digest: String,
}

impl ArtifactKey {
    /// Derive the key for a subject + scope pair.
    pub fn derive(subject: &SubjectId, scope: &Scope) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(b"subject:");
        hasher.update(subject.as_str().as_bytes());
        hasher.update(b"scope:");
        hasher.update(&scope.canonical_bytes());
        let digest = hex::encode(&hasher.finalize().as_bytes()[..KEY_DIGEST_BYTES]);

        ArtifactKey {
            subject: subject.clone(),
            digest,
        }
    }

    pub fn subject(&self) -> &SubjectId {
        &self.subject
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Backing-store key for the cached artifact entry.
    pub fn artifact_storage_key(&self) -> String {
        format!("artifact:{}:{}", self.subject, self.digest)
    }

    /// Backing-store key for the in-flight task record.
    pub fn task_storage_key(&self) -> String {
        format!("task:{}:{}", self.subject, self.digest)
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.subject, self.digest)
    }
}

/// Backing-store key for a subject's active-task membership set.
pub fn subject_active_set_key(subject: &SubjectId) -> String {
    format!("subject:{}:active", subject)
}
