//! Capturing metrics emitted by `brokerframe` with a debugging recorder.

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};

/// One recorded metric.
#[derive(Debug)]
pub struct Sample {
    /// Metric name.
    pub name: String,
    /// Label pairs attached to the metric.
    pub labels: Vec<(String, String)>,
    /// Recorded value.
    pub value: DebugValue,
}

impl Sample {
    /// Whether the sample carries `key = value`.
    #[must_use]
    pub fn has_label(&self, key: &str, value: &str) -> bool {
        self.labels.iter().any(|(k, v)| k == key && v == value)
    }
}

/// Thread-local metrics capture.
///
/// Metrics are only recorded for code run inside [`MetricsCapture::run`].
pub struct MetricsCapture {
    recorder: DebuggingRecorder,
    snapshotter: Snapshotter,
}

impl MetricsCapture {
    /// Create an empty capture.
    #[must_use]
    pub fn new() -> Self {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        Self {
            recorder,
            snapshotter,
        }
    }

    /// Run `f` with this capture installed as the local recorder.
    pub fn run<T>(&self, f: impl FnOnce() -> T) -> T { metrics::with_local_recorder(&self.recorder, f) }

    /// Everything recorded so far.
    #[must_use]
    pub fn samples(&self) -> Vec<Sample> {
        self.snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .map(|(key, _, _, value)| {
                let key = key.key();
                Sample {
                    name: key.name().to_owned(),
                    labels: key
                        .labels()
                        .map(|l| (l.key().to_owned(), l.value().to_owned()))
                        .collect(),
                    value,
                }
            })
            .collect()
    }
}

/// Sum of counters named `name` that carry `label`, if given.
///
/// Take the samples once per assertion block; the recorder may reset
/// counters when snapshotted.
#[must_use]
pub fn counter(samples: &[Sample], name: &str, label: Option<(&str, &str)>) -> u64 {
    samples
        .iter()
        .filter(|s| s.name == name && label.is_none_or(|(k, v)| s.has_label(k, v)))
        .map(|s| match s.value {
            DebugValue::Counter(c) => c,
            _ => 0,
        })
        .sum()
}

/// Value of the gauge named `name` carrying `label`, if recorded.
#[must_use]
pub fn gauge(samples: &[Sample], name: &str, label: (&str, &str)) -> Option<f64> {
    samples.iter().find_map(|s| match &s.value {
        DebugValue::Gauge(g) if s.name == name && s.has_label(label.0, label.1) => Some(g.0),
        _ => None,
    })
}

impl Default for MetricsCapture {
    fn default() -> Self { Self::new() }
}
