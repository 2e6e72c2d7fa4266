#![allow(clippy::missing_errors_doc)]

//! Single-file JSON persistence for the lead [`Document`].
//!
//! The whole document is read and written at once. Writes go to a sibling
//! temp file that is renamed over the target, so readers only ever observe a
//! complete document. Mutations run through [`JsonDocumentStore::update`],
//! which serializes load → mutate → save behind one writer lock.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use fleet_leads_core::{now_utc, Document};
use serde_json::Value;

mod migration;

pub use migration::{migrate_value, MigrationReport};

pub struct JsonDocumentStore {
    path: PathBuf,
    writer: Mutex<()>,
}

impl JsonDocumentStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create data directory {}", parent.display())
            })?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Migrates the file in place and creates it when missing.
    pub fn migrate(&self) -> Result<MigrationReport> {
        let _guard = self.lock()?;
        let (document, report, existed) = self.read_migrated()?;
        if report.changed() || !existed {
            self.write_document(&document)?;
            tracing::info!(
                path = %self.path.display(),
                from_version = report.from_version,
                to_version = report.to_version,
                backfilled = report.records_backfilled,
                "document migrated"
            );
        }
        Ok(report)
    }

    /// Returns the full document. A migration that changed anything is
    /// persisted before returning; only then is the writer lock taken.
    pub fn load(&self) -> Result<Document> {
        let (document, report, _) = self.read_migrated()?;
        if !report.changed() {
            return Ok(document);
        }

        let _guard = self.lock()?;
        self.load_locked()
    }

    pub fn save(&self, document: &Document) -> Result<()> {
        let _guard = self.lock()?;
        self.write_document(document)
    }

    /// Loads, applies `mutate`, and saves, all under the writer lock. Nothing
    /// is written when `mutate` fails.
    pub fn update<T>(&self, mutate: impl FnOnce(&mut Document) -> Result<T>) -> Result<T> {
        let _guard = self.lock()?;
        let mut document = self.load_locked()?;
        let output = mutate(&mut document)?;
        self.write_document(&document)?;
        Ok(output)
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.writer
            .lock()
            .map_err(|_| anyhow!("document store writer lock poisoned"))
    }

    fn load_locked(&self) -> Result<Document> {
        let (document, report, _) = self.read_migrated()?;
        if report.changed() {
            self.write_document(&document)?;
            tracing::info!(
                path = %self.path.display(),
                backfilled = report.records_backfilled,
                "persisted migrated document"
            );
        }
        Ok(document)
    }

    fn read_migrated(&self) -> Result<(Document, MigrationReport, bool)> {
        let Some(raw) = self.read_raw()? else {
            let report = MigrationReport {
                from_version: fleet_leads_core::DOCUMENT_SCHEMA_VERSION,
                to_version: fleet_leads_core::DOCUMENT_SCHEMA_VERSION,
                ..MigrationReport::default()
            };
            return Ok((Document::empty(), report, false));
        };

        let (migrated, report) = migrate_value(raw, now_utc())?;
        let document: Document = serde_json::from_value(migrated).with_context(|| {
            format!("failed to decode migrated document {}", self.path.display())
        })?;
        Ok((document, report, true))
    }

    fn read_raw(&self) -> Result<Option<Value>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read document {}", self.path.display()))
            }
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        let raw = serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse document {}", self.path.display()))?;
        Ok(Some(raw))
    }

    fn write_document(&self, document: &Document) -> Result<()> {
        let encoded =
            serde_json::to_vec_pretty(document).context("failed to serialize document")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, encoded)
            .with_context(|| format!("failed to write temp document {}", tmp.display()))?;
        fs::rename(&tmp, &self.path).with_context(|| {
            format!(
                "failed to replace document {} with {}",
                self.path.display(),
                tmp.display()
            )
        })?;
        Ok(())
    }
}
