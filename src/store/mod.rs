//! Durable storage for the seven sample collections.
//!
//! All writes (merges, bulk deletes, metadata) run on one writer thread in
//! submission order, so two writes never interleave. Reads use a separate
//! connection on tokio's blocking pool and only ever observe committed
//! transactions.

mod export;
mod record;
mod schema;
mod writer;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OpenFlags};
use tempfile::TempDir;
use tokio::task;

pub use export::ExportBundle;
pub use record::{millis, ReadCache, Record, KEY_COLUMN};
pub use schema::SCHEMA_VERSION;

use crate::config::{StoreConfig, StoreLocation};
use crate::domain::{
    ActivitySample, Collection, HeartRateSample, HrvSample, SampleBatch, SleepInterval,
    SpO2Sample, StressSample, TemperatureSample,
};
use crate::error::{StoreError, StoreResult};
use crate::sync::SampleSink;
use schema::{FILE_PRAGMAS, SCHEMA};
use writer::StoreWriter;

/// Result of merging one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl MergeOutcome {
    pub fn changed(&self) -> usize {
        self.inserted + self.updated
    }
}

pub struct StorageEngine {
    path: PathBuf,
    writer: StoreWriter,
    reader: Arc<Mutex<Connection>>,
    cache: Arc<Mutex<ReadCache>>,
    /// Backing directory of a scratch store. Declared last so it is removed
    /// after both connections have closed.
    _scratch: Option<TempDir>,
}

impl StorageEngine {
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        // Scratch stores get a private directory so both kinds share the
        // WAL reader/writer path.
        let (path, scratch) = match &config.location {
            StoreLocation::InMemory => {
                let dir = tempfile::Builder::new().prefix("ringsync-").tempdir()?;
                (dir.path().join("scratch.db"), Some(dir))
            }
            StoreLocation::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                (path.clone(), None)
            }
        };

        let writer_conn = Connection::open(&path)?;
        writer_conn.execute_batch(FILE_PRAGMAS)?;
        writer_conn.busy_timeout(config.busy_timeout)?;
        initialize(&writer_conn)?;
        let reader_conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        reader_conn.busy_timeout(config.busy_timeout)?;

        info!("Opened sample store ({:?})", config.location);
        Ok(Self {
            path,
            writer: StoreWriter::spawn(writer_conn)?,
            reader: Arc::new(Mutex::new(reader_conn)),
            cache: Arc::new(Mutex::new(ReadCache::default())),
            _scratch: scratch,
        })
    }

    /// Isolated store that disappears when dropped.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::open(StoreConfig::in_memory())
    }

    /// Upsert `samples` into their collection.
    ///
    /// Only stored records whose key falls inside the batch's own
    /// `[min, max]` key range are read. Matching keys are overwritten,
    /// new keys inserted, and the whole batch commits as one transaction.
    /// When a key appears twice in the batch the later sample wins. A batch
    /// holding an invalid sample is rejected whole.
    pub async fn merge<R: Record>(&self, samples: Vec<R>) -> StoreResult<MergeOutcome> {
        if samples.is_empty() {
            return Ok(MergeOutcome::default());
        }
        if let Some(reason) = samples.iter().find_map(|s| s.validate().err()) {
            return Err(StoreError::InvalidSample {
                collection: R::COLLECTION,
                reason,
            });
        }

        let cache = self.cache.clone();
        let outcome = self
            .writer
            .run(move |conn| {
                let outcome = merge_records(conn, &samples)?;
                if outcome.changed() > 0 {
                    lock(&cache).invalidate(R::COLLECTION);
                }
                Ok(outcome)
            })
            .await?;

        debug!(
            "Merged {}: {} inserted, {} updated, {} unchanged",
            R::COLLECTION,
            outcome.inserted,
            outcome.updated,
            outcome.unchanged
        );
        Ok(outcome)
    }

    pub async fn merge_batch(&self, batch: SampleBatch) -> StoreResult<MergeOutcome> {
        match batch {
            SampleBatch::HeartRate(v) => self.merge(v).await,
            SampleBatch::Stress(v) => self.merge(v).await,
            SampleBatch::SpO2(v) => self.merge(v).await,
            SampleBatch::Activity(v) => self.merge(v).await,
            SampleBatch::Hrv(v) => self.merge(v).await,
            SampleBatch::Temperature(v) => self.merge(v).await,
            SampleBatch::Sleep(v) => self.merge(v).await,
        }
    }

    /// Every record of a collection in ascending key order.
    pub async fn load<R: Record>(&self) -> StoreResult<Vec<R>> {
        let generation = {
            let mut cache = lock(&self.cache);
            if let Some(snapshot) = R::cache_slot(&mut cache) {
                return Ok(Vec::clone(snapshot));
            }
            cache.generation
        };

        let records = self.read(|conn| select_records::<R>(conn, None)).await?;
        let snapshot = Arc::new(records);
        {
            let mut cache = lock(&self.cache);
            if cache.generation == generation {
                *R::cache_slot(&mut cache) = Some(snapshot.clone());
            }
        }
        Ok(Vec::clone(&snapshot))
    }

    /// Records whose key lies in the closed range `[from, to]`.
    pub async fn load_range<R: Record>(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<R>> {
        let window = (millis(&from), millis(&to));
        self.read(move |conn| select_records::<R>(conn, Some(window)))
            .await
    }

    /// Remove every record from every collection. Returns the number of
    /// records removed.
    pub async fn delete_all(&self) -> StoreResult<usize> {
        let cache = self.cache.clone();
        let removed = self
            .writer
            .run(move |conn| {
                let tx = conn.transaction()?;
                let mut removed = 0;
                for collection in Collection::ALL {
                    removed += tx.execute(&format!("DELETE FROM {}", collection.name()), [])?;
                }
                tx.commit()?;
                lock(&cache).reset_empty();
                Ok(removed)
            })
            .await?;
        info!("Deleted {} records from all collections", removed);
        Ok(removed)
    }

    /// Load and serialize every collection concurrently.
    ///
    /// Never fails as a whole: a collection that cannot be loaded is
    /// exported as an empty array and reported in `degraded`.
    pub async fn export(&self) -> ExportBundle {
        let (hr, stress, spo2, activity, hrv, temperature, sleep) = tokio::join!(
            self.export_one::<HeartRateSample>(),
            self.export_one::<StressSample>(),
            self.export_one::<SpO2Sample>(),
            self.export_one::<ActivitySample>(),
            self.export_one::<HrvSample>(),
            self.export_one::<TemperatureSample>(),
            self.export_one::<SleepInterval>(),
        );

        let mut bundle = ExportBundle::default();
        for (collection, bytes, failure) in [hr, stress, spo2, activity, hrv, temperature, sleep] {
            bundle.files.insert(collection.name(), bytes);
            if let Some(reason) = failure {
                bundle.degraded.push((collection, reason));
            }
        }
        bundle
    }

    async fn export_one<R: Record>(&self) -> (Collection, Vec<u8>, Option<String>) {
        let serialized = match self.load::<R>().await {
            Ok(records) => serde_json::to_vec_pretty(&records).map_err(StoreError::from),
            Err(e) => Err(e),
        };
        match serialized {
            Ok(bytes) => (R::COLLECTION, bytes, None),
            Err(e) => {
                warn!("Exporting {} as empty: {}", R::COLLECTION, e);
                (R::COLLECTION, b"[]".to_vec(), Some(e.to_string()))
            }
        }
    }

    /// Bytes used by the database and its WAL files, or 0 if that cannot be
    /// determined.
    pub async fn size_on_disk(&self) -> u64 {
        let path = self.path.clone();
        let result = task::spawn_blocking(move || {
            database_files(&path).iter().map(|p| file_len(p)).sum::<u64>()
        })
        .await;
        result.unwrap_or_else(|e| {
            warn!("Could not determine store size: {}", e);
            0
        })
    }

    /// Number of collections holding at least one record, or 0 on failure.
    pub async fn populated_collection_count(&self) -> usize {
        let result = self
            .read(|conn| {
                let mut populated = 0;
                for collection in Collection::ALL {
                    let sql = format!("SELECT EXISTS(SELECT 1 FROM {})", collection.name());
                    let exists: bool = conn.query_row(&sql, [], |row| row.get(0))?;
                    if exists {
                        populated += 1;
                    }
                }
                Ok(populated)
            })
            .await;
        result.unwrap_or_else(|e| {
            warn!("Could not count populated collections: {}", e);
            0
        })
    }

    /// Record count per collection.
    pub async fn record_counts(&self) -> StoreResult<Vec<(Collection, u64)>> {
        self.read(|conn| {
            let mut counts = Vec::with_capacity(Collection::ALL.len());
            for collection in Collection::ALL {
                let sql = format!("SELECT COUNT(*) FROM {}", collection.name());
                let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
                counts.push((collection, u64::try_from(count).unwrap_or(0)));
            }
            Ok(counts)
        })
        .await
    }

    pub async fn meta(&self, key: &str) -> StoreResult<Option<String>> {
        let key = key.to_string();
        self.read(move |conn| {
            let mut stmt = conn.prepare_cached("SELECT value FROM meta WHERE key = ?1")?;
            let mut rows = stmt.query(params![key])?;
            match rows.next()? {
                Some(row) => Ok(Some(row.get(0)?)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn set_meta(&self, key: &str, value: &str) -> StoreResult<()> {
        let (key, value) = (key.to_string(), value.to_string());
        self.writer
            .run(move |conn| {
                conn.execute(
                    "INSERT INTO meta (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    params![key, value],
                )?;
                Ok(())
            })
            .await
    }

    async fn read<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let reader = self.reader.clone();
        task::spawn_blocking(move || {
            let conn = lock(&reader);
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

#[async_trait::async_trait]
impl SampleSink for StorageEngine {
    async fn store(&self, batch: SampleBatch) -> Result<MergeOutcome, StoreError> {
        self.merge_batch(batch).await
    }
}

fn lock<T>(mutex: &Arc<Mutex<T>>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn initialize(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(SCHEMA)?;
    let version: Option<u32> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    match version {
        None => {
            info!("Initializing sample store schema v{}", SCHEMA_VERSION);
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                params![SCHEMA_VERSION],
            )?;
            Ok(())
        }
        Some(v) if v == SCHEMA_VERSION => {
            debug!("Sample store schema up to date (v{})", v);
            Ok(())
        }
        Some(v) => Err(StoreError::SchemaVersionMismatch {
            expected: SCHEMA_VERSION,
            actual: v,
        }),
    }
}

fn select_sql<R: Record>() -> String {
    format!(
        "SELECT {}, {} FROM {}",
        KEY_COLUMN,
        R::FIELDS.join(", "),
        R::COLLECTION.name()
    )
}

fn select_records<R: Record>(conn: &Connection, window: Option<(i64, i64)>) -> StoreResult<Vec<R>> {
    let records = match window {
        Some((from, to)) => {
            let sql = format!("{} WHERE {} BETWEEN ?1 AND ?2 ORDER BY {}", select_sql::<R>(), KEY_COLUMN, KEY_COLUMN);
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt.query_map(params![from, to], R::from_row)?;
            rows.collect::<rusqlite::Result<Vec<R>>>()?
        }
        None => {
            let sql = format!("{} ORDER BY {}", select_sql::<R>(), KEY_COLUMN);
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt.query_map([], R::from_row)?;
            rows.collect::<rusqlite::Result<Vec<R>>>()?
        }
    };
    Ok(records)
}

fn merge_records<R: Record>(conn: &mut Connection, samples: &[R]) -> StoreResult<MergeOutcome> {
    let (min_key, max_key) = samples
        .iter()
        .map(R::key)
        .fold((i64::MAX, i64::MIN), |(lo, hi), k| (lo.min(k), hi.max(k)));

    let tx = conn.transaction()?;
    let mut existing: HashMap<i64, Vec<Value>> = select_records::<R>(&tx, Some((min_key, max_key)))?
        .into_iter()
        .map(|r| (r.key(), r.field_values()))
        .collect();

    let mut outcome = MergeOutcome::default();
    {
        let assignments = R::FIELDS
            .iter()
            .enumerate()
            .map(|(i, field)| format!("{} = ?{}", field, i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let update_sql = format!(
            "UPDATE {} SET {} WHERE {} = ?1",
            R::COLLECTION.name(),
            assignments,
            KEY_COLUMN
        );
        let placeholders = (1..=R::FIELDS.len() + 1)
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let insert_sql = format!(
            "INSERT INTO {} ({}, {}) VALUES ({})",
            R::COLLECTION.name(),
            KEY_COLUMN,
            R::FIELDS.join(", "),
            placeholders
        );
        let mut update = tx.prepare_cached(&update_sql)?;
        let mut insert = tx.prepare_cached(&insert_sql)?;

        for sample in samples {
            let key = sample.key();
            let values = sample.field_values();
            let mut row = Vec::with_capacity(values.len() + 1);
            row.push(Value::Integer(key));
            row.extend(values.iter().cloned());
            match existing.get(&key) {
                Some(current) if *current == values => outcome.unchanged += 1,
                Some(_) => {
                    update.execute(params_from_iter(row.iter()))?;
                    outcome.updated += 1;
                }
                None => {
                    insert.execute(params_from_iter(row.iter()))?;
                    outcome.inserted += 1;
                }
            }
            existing.insert(key, values);
        }
    }

    if outcome.changed() == 0 {
        // Nothing to commit; dropping the transaction rolls it back.
        return Ok(outcome);
    }
    tx.commit()?;
    Ok(outcome)
}

fn database_files(path: &Path) -> Vec<PathBuf> {
    let mut files = vec![path.to_path_buf()];
    for suffix in ["-wal", "-shm"] {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        files.push(PathBuf::from(name));
    }
    files
}

fn file_len(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
