use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use serde_json::Value;

use crate::model::{now_iso, record_id, Catalog, Platform, Template};

const LOCK_POLL: Duration = Duration::from_millis(200);
const LOCK_ATTEMPTS: u32 = 150;

// ── Merge ──

/// Collapse repeated ids: each id keeps the position of its first appearance
/// and the value of its last.
pub fn dedup_by_id(batch: Vec<Template>) -> Vec<Template> {
    let mut index: HashMap<String, usize> = HashMap::with_capacity(batch.len());
    let mut out: Vec<Template> = Vec::with_capacity(batch.len());

    for t in batch {
        match index.get(&t.id) {
            Some(&pos) => out[pos] = t,
            None => {
                index.insert(t.id.clone(), out.len());
                out.push(t);
            }
        }
    }
    out
}

/// Replace `platform`'s slice of `existing` with `fresh`. Every other record, including ones
/// without a string id, is kept verbatim and in order, ahead of the new slice.
pub fn merge(existing: Catalog, platform: Platform, fresh: Vec<Template>) -> Catalog {
    let mut batch = dedup_by_id(fresh);
    if platform.sorts_by_sales() {
        // stable: equal sales keep first-seen order
        batch.sort_by(|a, b| b.sales.cmp(&a.sales));
    }

    let before = existing.templates.len();
    let mut templates: Vec<Value> = existing
        .templates
        .into_iter()
        .filter(|r| !record_id(r).is_some_and(|id| platform.owns(id)))
        .collect();
    debug!(
        "Dropped {} stale {} records",
        before - templates.len(),
        platform
    );
    for t in batch {
        match serde_json::to_value(&t) {
            Ok(record) => templates.push(record),
            Err(e) => warn!("Could not serialize {}: {}", t.id, e),
        }
    }

    Catalog {
        last_updated: now_iso(),
        source: existing.source,
        templates,
        extra: existing.extra,
    }
}

// ── Persistence ──

/// Read the catalog. A missing or unparseable file is an empty catalog, not an error.
pub fn load(path: &Path) -> Catalog {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!("No catalog at {}, starting empty", path.display());
            return Catalog::default();
        }
        Err(e) => {
            warn!("Could not read {}: {}; starting empty", path.display(), e);
            return Catalog::default();
        }
    };

    let value: Value = match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(e) => {
            warn!("Catalog {} is malformed ({}); starting empty", path.display(), e);
            return Catalog::default();
        }
    };
    Catalog::from_value(value).unwrap_or_else(|| {
        warn!("{} is not a catalog document; starting empty", path.display());
        Catalog::default()
    })
}

/// Write the whole catalog via a sibling temp file + rename.
pub fn save(path: &Path, catalog: &Catalog) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let json = serde_json::to_string_pretty(catalog).context("Failed to serialize catalog")?;
    let tmp = sibling(path, "tmp");
    fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move {} into place", tmp.display()))?;
    Ok(())
}

fn sibling(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(ext);
    path.with_file_name(name)
}

/// Exclusive `<catalog>.lock` held across one load-merge-save cycle. Removed on drop.
pub struct CatalogLock {
    path: PathBuf,
}

impl CatalogLock {
    pub async fn acquire(catalog: &Path) -> Result<Self> {
        Self::acquire_with(catalog, LOCK_ATTEMPTS, LOCK_POLL).await
    }

    async fn acquire_with(catalog: &Path, attempts: u32, poll: Duration) -> Result<Self> {
        let path = sibling(catalog, "lock");
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        for attempt in 0..attempts {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(CatalogLock { path }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if attempt == 0 {
                        info!("Waiting for {}", path.display());
                    }
                    tokio::time::sleep(poll).await;
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to create {}", path.display()))
                }
            }
        }
        bail!(
            "Catalog is locked by another run ({}); remove it if stale",
            path.display()
        )
    }
}

impl Drop for CatalogLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to release {}: {}", self.path.display(), e);
        }
    }
}

// ── Tests ──
