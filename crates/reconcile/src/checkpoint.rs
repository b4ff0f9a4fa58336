//! Checkpoint bundles.

use crate::types::{ExistingUser, InstalledPackage, PackageManagerKind, RunningService};
use chrono::{DateTime, SecondsFormat, SubsecRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Byte-for-byte copy of a remote file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackedUpFile {
    pub path: String,
    pub contents: Vec<u8>,
    /// blake3 hex digest of `contents`
    pub checksum: String,
}

impl BackedUpFile {
    pub fn new(path: impl Into<String>, contents: Vec<u8>) -> Self {
        let checksum = blake3::hash(&contents).to_hex().to_string();
        Self {
            path: path.into(),
            contents,
            checksum,
        }
    }

    /// Whether `contents` still matches `checksum`.
    pub fn verify(&self) -> bool {
        blake3::hash(&self.contents).to_hex().as_str() == self.checksum
    }
}

/// Snapshot of an instance taken before a mutating apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub instance_name: String,
    pub created_at: DateTime<Utc>,
    pub description: String,
    pub packages: Vec<InstalledPackage>,
    /// Managers whose listing succeeded; packages of other managers are
    /// left alone on rollback
    #[serde(default)]
    pub managers: Vec<PackageManagerKind>,
    pub services: Vec<RunningService>,
    pub users: Vec<ExistingUser>,
    pub files: Vec<BackedUpFile>,
    /// Critical files that did not exist at snapshot time
    #[serde(default)]
    pub absent_files: Vec<String>,
    /// Critical files that existed but could not be read
    #[serde(default)]
    pub unreadable_files: Vec<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

impl Checkpoint {
    /// Listing view of this checkpoint.
    pub fn summary(&self) -> CheckpointSummary {
        CheckpointSummary {
            id: self.id.clone(),
            instance_name: self.instance_name.clone(),
            created_at: self.created_at,
            description: self.description.clone(),
            package_count: self.packages.len(),
            service_count: self.services.len(),
            user_count: self.users.len(),
            file_count: self.files.len(),
        }
    }
}

/// Lightweight listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub id: String,
    pub instance_name: String,
    pub created_at: DateTime<Utc>,
    pub description: String,
    pub package_count: usize,
    pub service_count: usize,
    pub user_count: usize,
    pub file_count: usize,
}

/// Timestamp for a new checkpoint: now at microsecond precision, bumped
/// past `latest` when the clock has not advanced.
pub fn next_timestamp(now: DateTime<Utc>, latest: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = now.trunc_subsecs(6);
    match latest {
        Some(latest) if now <= latest => latest.trunc_subsecs(6) + TimeDelta::microseconds(1),
        _ => now,
    }
}

/// `<instance>-<yyyymmddTHHMMSS.ffffff>Z`
pub fn checkpoint_id(instance: &str, at: DateTime<Utc>) -> String {
    format!("{}-{}Z", instance, at.format("%Y%m%dT%H%M%S%.6f"))
}

/// Sortable text form of a timestamp, as stored.
pub(crate) fn timestamp_key(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}
