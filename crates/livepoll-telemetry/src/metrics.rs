//! In-memory metrics, exported as a JSON snapshot.
//!
//! Series are created on first use. Each one is keyed by kind, name and
//! label set; label order at the call site does not matter.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Hash, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

/// One series as exported by [`MetricsRecorder::snapshot`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricSample {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    pub metric_type: MetricType,
    /// Counter/gauge value; median for histograms.
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<HistogramSummary>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    /// Sorted by name, then labels.
    pub metrics: Vec<MetricSample>,
}

impl MetricsSnapshot {
    pub fn find(&self, name: &str) -> Option<&MetricSample> {
        self.metrics.iter().find(|m| m.name == name)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

impl HistogramSummary {
    fn from_sorted(values: &[f64]) -> Self {
        let Some(last) = values.len().checked_sub(1) else {
            return Self::default();
        };
        let rank = |q: f64| values[((values.len() as f64 * q) as usize).min(last)];
        Self {
            count: values.len() as u64,
            sum: values.iter().sum(),
            p50: rank(0.5),
            p95: rank(0.95),
            p99: rank(0.99),
        }
    }
}

enum Series {
    Counter(AtomicU64),
    Gauge(Mutex<f64>),
    Histogram(Mutex<Vec<f64>>),
}

impl Series {
    fn empty(kind: MetricType) -> Self {
        match kind {
            MetricType::Counter => Self::Counter(AtomicU64::new(0)),
            MetricType::Gauge => Self::Gauge(Mutex::new(0.0)),
            MetricType::Histogram => Self::Histogram(Mutex::new(Vec::new())),
        }
    }

    fn summary(&self) -> HistogramSummary {
        match self {
            Self::Histogram(values) => {
                let mut values = values.lock().clone();
                values.sort_by(f64::total_cmp);
                HistogramSummary::from_sorted(&values)
            }
            _ => HistogramSummary::default(),
        }
    }

    fn value(&self) -> f64 {
        match self {
            Self::Counter(n) => n.load(Ordering::Relaxed) as f64,
            Self::Gauge(v) => *v.lock(),
            Self::Histogram(_) => self.summary().p50,
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct SeriesKey {
    kind: MetricType,
    name: String,
    labels: BTreeMap<String, String>,
}

impl SeriesKey {
    fn new(kind: MetricType, name: &str, labels: &[(&str, &str)]) -> Self {
        Self {
            kind,
            name: name.to_owned(),
            labels: labels
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
        }
    }
}

/// Thread-safe recorder shared by every component of the server.
#[derive(Default)]
pub struct MetricsRecorder {
    series: RwLock<HashMap<SeriesKey, Series>>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter_inc(&self, name: &str, labels: &[(&str, &str)], n: u64) {
        self.update(SeriesKey::new(MetricType::Counter, name, labels), |s| {
            if let Series::Counter(count) = s {
                let _ = count.fetch_add(n, Ordering::Relaxed);
            }
        });
    }

    pub fn gauge_set(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        self.update(SeriesKey::new(MetricType::Gauge, name, labels), |s| {
            if let Series::Gauge(v) = s {
                *v.lock() = value;
            }
        });
    }

    pub fn histogram_observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        self.update(SeriesKey::new(MetricType::Histogram, name, labels), |s| {
            if let Series::Histogram(values) = s {
                values.lock().push(value);
            }
        });
    }

    pub fn counter_get(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.read(SeriesKey::new(MetricType::Counter, name, labels))
            .map_or(0, |v| v as u64)
    }

    pub fn gauge_get(&self, name: &str, labels: &[(&str, &str)]) -> f64 {
        self.read(SeriesKey::new(MetricType::Gauge, name, labels))
            .unwrap_or(0.0)
    }

    pub fn histogram_summary(&self, name: &str, labels: &[(&str, &str)]) -> HistogramSummary {
        let key = SeriesKey::new(MetricType::Histogram, name, labels);
        self.series
            .read()
            .get(&key)
            .map(Series::summary)
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut metrics: Vec<MetricSample> = self
            .series
            .read()
            .iter()
            .map(|(key, series)| MetricSample {
                name: key.name.clone(),
                labels: key.labels.clone(),
                metric_type: key.kind,
                value: series.value(),
                summary: (key.kind == MetricType::Histogram).then(|| series.summary()),
            })
            .collect();
        metrics.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.labels.cmp(&b.labels)));
        MetricsSnapshot {
            timestamp: Utc::now().to_rfc3339(),
            metrics,
        }
    }

    fn update(&self, key: SeriesKey, apply: impl FnOnce(&Series)) {
        // Fast path under the read lock; the write lock is only taken the
        // first time a series is seen.
        if let Some(series) = self.series.read().get(&key) {
            apply(series);
            return;
        }
        let mut all = self.series.write();
        let kind = key.kind;
        apply(all.entry(key).or_insert_with(|| Series::empty(kind)));
    }

    fn read(&self, key: SeriesKey) -> Option<f64> {
        self.series.read().get(&key).map(Series::value)
    }
}
