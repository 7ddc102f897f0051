//! Per-collection row mapping.
//!
//! Every collection is a table whose first column, `ts`, is the record key
//! in Unix milliseconds. [`Record`] tells the generic merge and load code
//! how to extract that key, which value columns follow it, and how to build
//! a record back from a row.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::Row;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::domain::{
    ActivitySample, Collection, HeartRateSample, HrvSample, SampleBatch, SleepInterval,
    SleepStage, SpO2Sample, StressSample, TemperatureSample,
};

/// Name of the key column shared by every collection table.
pub const KEY_COLUMN: &str = "ts";

pub trait Record: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static {
    const COLLECTION: Collection;

    /// Value columns, in the order of [`Record::field_values`].
    const FIELDS: &'static [&'static str];

    /// Timestamp key in Unix milliseconds.
    fn key(&self) -> i64;

    fn field_values(&self) -> Vec<Value>;

    /// Reject values the table cannot hold.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    /// Build a record from a row laid out as `ts, FIELDS...`.
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;

    fn cache_slot(cache: &mut ReadCache) -> &mut Option<Arc<Vec<Self>>>;

    fn into_batch(records: Vec<Self>) -> SampleBatch;
}

pub fn millis(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

/// Snapshots handed out by `load`, one slot per collection.
///
/// `generation` moves on every invalidation so a load that raced a write
/// does not publish a stale snapshot.
#[derive(Debug, Default)]
pub struct ReadCache {
    pub(crate) generation: u64,
    heart_rate: Option<Arc<Vec<HeartRateSample>>>,
    stress: Option<Arc<Vec<StressSample>>>,
    spo2: Option<Arc<Vec<SpO2Sample>>>,
    activity: Option<Arc<Vec<ActivitySample>>>,
    hrv: Option<Arc<Vec<HrvSample>>>,
    temperature: Option<Arc<Vec<TemperatureSample>>>,
    sleep: Option<Arc<Vec<SleepInterval>>>,
}

impl ReadCache {
    pub(crate) fn invalidate(&mut self, collection: Collection) {
        self.generation += 1;
        match collection {
            Collection::HeartRate => self.heart_rate = None,
            Collection::Stress => self.stress = None,
            Collection::SpO2 => self.spo2 = None,
            Collection::Activity => self.activity = None,
            Collection::Hrv => self.hrv = None,
            Collection::Temperature => self.temperature = None,
            Collection::Sleep => self.sleep = None,
        }
    }

    /// Replace every slot with an empty snapshot after a bulk delete.
    pub(crate) fn reset_empty(&mut self) {
        self.generation += 1;
        self.heart_rate = Some(Arc::default());
        self.stress = Some(Arc::default());
        self.spo2 = Some(Arc::default());
        self.activity = Some(Arc::default());
        self.hrv = Some(Arc::default());
        self.temperature = Some(Arc::default());
        self.sleep = Some(Arc::default());
    }
}

impl Record for HeartRateSample {
    const COLLECTION: Collection = Collection::HeartRate;
    const FIELDS: &'static [&'static str] = &["bpm"];

    fn key(&self) -> i64 {
        millis(&self.timestamp)
    }

    fn field_values(&self) -> Vec<Value> {
        vec![Value::Integer(self.bpm.into())]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            timestamp: timestamp_at(row, 0)?,
            bpm: row.get(1)?,
        })
    }

    fn cache_slot(cache: &mut ReadCache) -> &mut Option<Arc<Vec<Self>>> {
        &mut cache.heart_rate
    }

    fn into_batch(records: Vec<Self>) -> SampleBatch {
        SampleBatch::HeartRate(records)
    }
}

impl Record for StressSample {
    const COLLECTION: Collection = Collection::Stress;
    const FIELDS: &'static [&'static str] = &["level"];

    fn key(&self) -> i64 {
        millis(&self.timestamp)
    }

    fn field_values(&self) -> Vec<Value> {
        vec![Value::Integer(self.level.into())]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            timestamp: timestamp_at(row, 0)?,
            level: row.get(1)?,
        })
    }

    fn cache_slot(cache: &mut ReadCache) -> &mut Option<Arc<Vec<Self>>> {
        &mut cache.stress
    }

    fn into_batch(records: Vec<Self>) -> SampleBatch {
        SampleBatch::Stress(records)
    }
}

impl Record for SpO2Sample {
    const COLLECTION: Collection = Collection::SpO2;
    const FIELDS: &'static [&'static str] = &["percent"];

    fn key(&self) -> i64 {
        millis(&self.timestamp)
    }

    fn field_values(&self) -> Vec<Value> {
        vec![Value::Integer(self.percent.into())]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            timestamp: timestamp_at(row, 0)?,
            percent: row.get(1)?,
        })
    }

    fn cache_slot(cache: &mut ReadCache) -> &mut Option<Arc<Vec<Self>>> {
        &mut cache.spo2
    }

    fn into_batch(records: Vec<Self>) -> SampleBatch {
        SampleBatch::SpO2(records)
    }
}

impl Record for ActivitySample {
    const COLLECTION: Collection = Collection::Activity;
    const FIELDS: &'static [&'static str] = &["steps", "calories", "distance_m"];

    fn key(&self) -> i64 {
        millis(&self.timestamp)
    }

    fn field_values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.steps.into()),
            Value::Integer(self.calories.into()),
            Value::Integer(self.distance_m.into()),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            timestamp: timestamp_at(row, 0)?,
            steps: row.get(1)?,
            calories: row.get(2)?,
            distance_m: row.get(3)?,
        })
    }

    fn cache_slot(cache: &mut ReadCache) -> &mut Option<Arc<Vec<Self>>> {
        &mut cache.activity
    }

    fn into_batch(records: Vec<Self>) -> SampleBatch {
        SampleBatch::Activity(records)
    }
}

impl Record for HrvSample {
    const COLLECTION: Collection = Collection::Hrv;
    const FIELDS: &'static [&'static str] = &["rmssd_ms"];

    fn key(&self) -> i64 {
        millis(&self.timestamp)
    }

    fn field_values(&self) -> Vec<Value> {
        vec![Value::Integer(self.rmssd_ms.into())]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            timestamp: timestamp_at(row, 0)?,
            rmssd_ms: row.get(1)?,
        })
    }

    fn cache_slot(cache: &mut ReadCache) -> &mut Option<Arc<Vec<Self>>> {
        &mut cache.hrv
    }

    fn into_batch(records: Vec<Self>) -> SampleBatch {
        SampleBatch::Hrv(records)
    }
}

impl Record for TemperatureSample {
    const COLLECTION: Collection = Collection::Temperature;
    const FIELDS: &'static [&'static str] = &["celsius"];

    fn key(&self) -> i64 {
        millis(&self.timestamp)
    }

    fn field_values(&self) -> Vec<Value> {
        vec![Value::Real(self.celsius)]
    }

    fn validate(&self) -> Result<(), String> {
        if self.celsius.is_finite() {
            Ok(())
        } else {
            Err(format!("non-finite temperature {} at {}", self.celsius, self.timestamp))
        }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            timestamp: timestamp_at(row, 0)?,
            celsius: row.get(1)?,
        })
    }

    fn cache_slot(cache: &mut ReadCache) -> &mut Option<Arc<Vec<Self>>> {
        &mut cache.temperature
    }

    fn into_batch(records: Vec<Self>) -> SampleBatch {
        SampleBatch::Temperature(records)
    }
}

impl Record for SleepInterval {
    const COLLECTION: Collection = Collection::Sleep;
    const FIELDS: &'static [&'static str] = &["end_ts", "stage"];

    fn key(&self) -> i64 {
        millis(&self.start)
    }

    fn field_values(&self) -> Vec<Value> {
        vec![
            Value::Integer(millis(&self.end)),
            Value::Text(self.stage.as_str().to_string()),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let stage: String = row.get(2)?;
        let stage = SleepStage::parse(&stage).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                Type::Text,
                format!("unknown sleep stage {:?}", stage).into(),
            )
        })?;
        Ok(Self {
            start: timestamp_at(row, 0)?,
            end: timestamp_at(row, 1)?,
            stage,
        })
    }

    fn cache_slot(cache: &mut ReadCache) -> &mut Option<Arc<Vec<Self>>> {
        &mut cache.sleep
    }

    fn into_batch(records: Vec<Self>) -> SampleBatch {
        SampleBatch::Sleep(records)
    }
}
