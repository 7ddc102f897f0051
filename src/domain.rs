//! Health samples reported by the ring.

use chrono::{DateTime, Utc};
use core::fmt;
use serde::{Deserialize, Serialize};

/// One of the seven independent sample collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    HeartRate,
    Stress,
    SpO2,
    Activity,
    Hrv,
    Temperature,
    Sleep,
}

impl Collection {
    pub const ALL: [Collection; 7] = [
        Collection::HeartRate,
        Collection::Stress,
        Collection::SpO2,
        Collection::Activity,
        Collection::Hrv,
        Collection::Temperature,
        Collection::Sleep,
    ];

    /// Logical name used for export keys and legacy file names.
    pub const fn name(self) -> &'static str {
        match self {
            Collection::HeartRate => "heartrate",
            Collection::Stress => "stress",
            Collection::SpO2 => "spo2",
            Collection::Activity => "activity",
            Collection::Hrv => "hrv",
            Collection::Temperature => "temperature",
            Collection::Sleep => "sleep",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    /// File name of this collection in the legacy flat-file layout.
    pub fn legacy_file_name(self) -> String {
        format!("{}.json", self.name())
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartRateSample {
    pub timestamp: DateTime<Utc>,
    pub bpm: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StressSample {
    pub timestamp: DateTime<Utc>,
    pub level: u8,
}

/// Blood oxygen saturation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpO2Sample {
    pub timestamp: DateTime<Utc>,
    pub percent: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivitySample {
    pub timestamp: DateTime<Utc>,
    pub steps: u32,
    pub calories: u32,
    pub distance_m: u32,
}

/// Heart rate variability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HrvSample {
    pub timestamp: DateTime<Utc>,
    pub rmssd_ms: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureSample {
    pub timestamp: DateTime<Utc>,
    pub celsius: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SleepStage {
    Awake,
    Light,
    Deep,
    Rem,
}

impl SleepStage {
    pub const fn as_str(self) -> &'static str {
        match self {
            SleepStage::Awake => "awake",
            SleepStage::Light => "light",
            SleepStage::Deep => "deep",
            SleepStage::Rem => "rem",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "awake" => Some(SleepStage::Awake),
            "light" => Some(SleepStage::Light),
            "deep" => Some(SleepStage::Deep),
            "rem" => Some(SleepStage::Rem),
            _ => None,
        }
    }
}

/// A sleep span, keyed by its start time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleepInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub stage: SleepStage,
}

/// A batch of samples for a single collection, as produced by one sync pass.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleBatch {
    HeartRate(Vec<HeartRateSample>),
    Stress(Vec<StressSample>),
    SpO2(Vec<SpO2Sample>),
    Activity(Vec<ActivitySample>),
    Hrv(Vec<HrvSample>),
    Temperature(Vec<TemperatureSample>),
    Sleep(Vec<SleepInterval>),
}

impl SampleBatch {
    pub fn collection(&self) -> Collection {
        match self {
            SampleBatch::HeartRate(_) => Collection::HeartRate,
            SampleBatch::Stress(_) => Collection::Stress,
            SampleBatch::SpO2(_) => Collection::SpO2,
            SampleBatch::Activity(_) => Collection::Activity,
            SampleBatch::Hrv(_) => Collection::Hrv,
            SampleBatch::Temperature(_) => Collection::Temperature,
            SampleBatch::Sleep(_) => Collection::Sleep,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SampleBatch::HeartRate(v) => v.len(),
            SampleBatch::Stress(v) => v.len(),
            SampleBatch::SpO2(v) => v.len(),
            SampleBatch::Activity(v) => v.len(),
            SampleBatch::Hrv(v) => v.len(),
            SampleBatch::Temperature(v) => v.len(),
            SampleBatch::Sleep(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
