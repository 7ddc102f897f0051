//! One-time import of the old flat-file JSON layout.
//!
//! The legacy directory holds one `<collection>.json` array per collection.
//! Each file is read on its own; a missing or unreadable file contributes
//! nothing and is listed in the report instead of failing the import.
//! Recovered samples are merged into the store, the files are copied into a
//! timestamped `backup-*` subdirectory and completion is recorded in the
//! store so later launches skip the import. The legacy directory itself is
//! left in place.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::task::{self, JoinHandle};

use crate::domain::{
    ActivitySample, Collection, HeartRateSample, HrvSample, SampleBatch, SleepInterval,
    SpO2Sample, StressSample, TemperatureSample,
};
use crate::error::{StoreError, StoreResult};
use crate::store::{MergeOutcome, Record, StorageEngine};

/// Metadata key recording when the import completed.
pub const MIGRATION_MARKER: &str = "legacy_migration_completed_at";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationStatus {
    NoLegacyData,
    AlreadyMigrated,
    /// Legacy directory present but every file was missing, empty or unreadable.
    NothingRecovered,
    Migrated,
}

/// Why a legacy file contributed no samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Missing,
    Unreadable(String),
}

#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub status: MigrationStatus,
    pub skipped: Vec<(Collection, SkipReason)>,
    pub merged: Vec<(Collection, MergeOutcome)>,
    pub backup_dir: Option<PathBuf>,
}

impl MigrationReport {
    fn with_status(status: MigrationStatus) -> Self {
        Self {
            status,
            skipped: Vec::new(),
            merged: Vec::new(),
            backup_dir: None,
        }
    }

    pub fn records_imported(&self) -> usize {
        self.merged.iter().map(|(_, o)| o.changed()).sum()
    }
}

pub struct LegacyMigrator {
    dir: PathBuf,
    store: Arc<StorageEngine>,
}

impl LegacyMigrator {
    pub fn new(dir: impl Into<PathBuf>, store: Arc<StorageEngine>) -> Self {
        Self {
            dir: dir.into(),
            store,
        }
    }

    pub async fn run(&self) -> StoreResult<MigrationReport> {
        if !self.dir.is_dir() {
            debug!("No legacy data at {}", self.dir.display());
            return Ok(MigrationReport::with_status(MigrationStatus::NoLegacyData));
        }
        if let Some(at) = self.store.meta(MIGRATION_MARKER).await? {
            debug!("Legacy data already migrated at {}", at);
            return Ok(MigrationReport::with_status(MigrationStatus::AlreadyMigrated));
        }

        let dir = self.dir.clone();
        let (batches, skipped) = task::spawn_blocking(move || read_all(&dir))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?;

        let mut report = MigrationReport::with_status(MigrationStatus::NothingRecovered);
        report.skipped = skipped;
        if batches.is_empty() {
            info!("Legacy directory {} held no usable samples", self.dir.display());
            return Ok(report);
        }

        for batch in batches {
            let collection = batch.collection();
            let outcome = self.store.merge_batch(batch).await?;
            report.merged.push((collection, outcome));
        }

        let dir = self.dir.clone();
        let backup = task::spawn_blocking(move || back_up(&dir))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))??;
        self.store
            .set_meta(MIGRATION_MARKER, &Utc::now().to_rfc3339())
            .await?;

        info!(
            "Imported {} legacy records; originals copied to {}",
            report.records_imported(),
            backup.display()
        );
        report.backup_dir = Some(backup);
        report.status = MigrationStatus::Migrated;
        Ok(report)
    }
}

/// Run the migration in the background. Failures are logged, never returned.
pub fn spawn_migration(migrator: LegacyMigrator) -> JoinHandle<Option<MigrationReport>> {
    tokio::spawn(async move {
        match migrator.run().await {
            Ok(report) => Some(report),
            Err(e) => {
                error!("Legacy migration failed: {}", e);
                None
            }
        }
    })
}

fn read_all(dir: &Path) -> (Vec<SampleBatch>, Vec<(Collection, SkipReason)>) {
    let mut batches = Vec::new();
    let mut skipped = Vec::new();
    collect::<HeartRateSample>(dir, &mut batches, &mut skipped);
    collect::<StressSample>(dir, &mut batches, &mut skipped);
    collect::<SpO2Sample>(dir, &mut batches, &mut skipped);
    collect::<ActivitySample>(dir, &mut batches, &mut skipped);
    collect::<HrvSample>(dir, &mut batches, &mut skipped);
    collect::<TemperatureSample>(dir, &mut batches, &mut skipped);
    collect::<SleepInterval>(dir, &mut batches, &mut skipped);
    (batches, skipped)
}

fn collect<R: Record>(
    dir: &Path,
    batches: &mut Vec<SampleBatch>,
    skipped: &mut Vec<(Collection, SkipReason)>,
) {
    match read_legacy::<R>(dir) {
        Ok(records) if records.is_empty() => {}
        Ok(records) => {
            debug!("Recovered {} legacy {} records", records.len(), R::COLLECTION);
            batches.push(R::into_batch(records));
        }
        Err(reason) => {
            if let SkipReason::Unreadable(e) = &reason {
                warn!("Skipping legacy {}: {}", R::COLLECTION, e);
            }
            skipped.push((R::COLLECTION, reason));
        }
    }
}

fn read_legacy<R: Record>(dir: &Path) -> Result<Vec<R>, SkipReason> {
    let path = dir.join(R::COLLECTION.legacy_file_name());
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(SkipReason::Missing),
        Err(e) => return Err(SkipReason::Unreadable(e.to_string())),
    };
    serde_json::from_slice(&bytes).map_err(|e| SkipReason::Unreadable(e.to_string()))
}

/// Copy every legacy file that exists into a fresh backup directory.
fn back_up(dir: &Path) -> StoreResult<PathBuf> {
    let backup = dir.join(Utc::now().format("backup-%Y%m%d-%H%M%S").to_string());
    fs::create_dir_all(&backup)?;
    for collection in Collection::ALL {
        let name = collection.legacy_file_name();
        let source = dir.join(&name);
        if source.is_file() {
            fs::copy(&source, backup.join(&name))?;
        }
    }
    Ok(backup)
}
