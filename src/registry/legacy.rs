// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! One-shot migration of the legacy per-child registry layout.
//!
//! Early versions stored one JSON file per child in a
//! `session-registry.d/` directory next to the canonical file. On first
//! load the directory is folded into the single document and renamed aside
//! so the migration never re-runs.

use std::fs;
use std::path::Path;

use tracing::{info, warn};

use super::record::{ChildRecord, ChildRegistration, RegistryDocument};

/// Suffix appended to the legacy directory once migrated.
const MIGRATED_SUFFIX: &str = ".migrated";

/// Fold every readable per-child file in `legacy_dir` into `doc`.
///
/// Records already present in the document win over legacy files. Returns
/// whether the document changed; the directory is renamed aside either way.
pub fn fold_legacy_dir(legacy_dir: &Path, doc: &mut RegistryDocument) -> bool {
    let entries = match fs::read_dir(legacy_dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!("legacy registry dir unreadable ({}), skipping migration", err);
            return false;
        }
    };

    let mut merged = 0usize;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match read_legacy_record(&path) {
            Some(record) => {
                let key = record.registration.child_session_id.clone();
                if key.trim().is_empty() || doc.sessions.contains_key(&key) {
                    continue;
                }
                doc.sessions.insert(key, record);
                merged += 1;
            }
            None => warn!("skipping unreadable legacy record {:?}", path),
        }
    }

    if merged > 0 {
        info!(
            "migrated {} legacy child record(s) from {:?}",
            merged, legacy_dir
        );
    }

    // Rename aside so the migration is one-shot; deletion stays in the
    // operator's hands.
    let aside = legacy_dir.with_file_name(format!(
        "{}{}",
        legacy_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        MIGRATED_SUFFIX
    ));
    if let Err(err) = fs::rename(legacy_dir, &aside) {
        warn!("failed to rename legacy registry dir aside: {}", err);
    }

    merged > 0
}

/// Parse a legacy file as a full record, falling back to a bare
/// registration wrapped in a fresh record.
fn read_legacy_record(path: &Path) -> Option<ChildRecord> {
    let text = fs::read_to_string(path).ok()?;
    if let Ok(record) = serde_json::from_str::<ChildRecord>(&text) {
        return Some(record);
    }
    serde_json::from_str::<ChildRegistration>(&text)
        .ok()
        .map(ChildRecord::new)
}
