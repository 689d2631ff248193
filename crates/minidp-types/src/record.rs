//! Record model: the in-flight unit of a manifest.

use serde_json::Value;

/// A manifest record: one JSON object per manifest line. Values are arbitrary
/// JSON; no schema is enforced beyond validity.
pub type Record = serde_json::Map<String, Value>;

/// Metrics side channel attached to a [`DataEntry`].
pub type Metrics = serde_json::Map<String, Value>;

/// The unit a map processor emits for each input record.
///
/// `data == None` is the dropped sentinel: the entry produces no output
/// record, but its `metrics` survive and are still collected. Dropping with
/// metrics (`DataEntry::dropped_with_metrics`) is distinct from emitting no
/// entries at all — both increment the dropped counter, but only the former
/// leaves metrics behind.
#[derive(Debug, Clone, PartialEq)]
pub struct DataEntry {
    data: Option<Record>,
    metrics: Metrics,
}

impl DataEntry {
    /// An entry carrying an output record and no metrics.
    pub fn new(data: Record) -> Self {
        Self {
            data: Some(data),
            metrics: Metrics::new(),
        }
    }

    /// An entry carrying an output record with metrics.
    pub fn with_metrics(data: Record, metrics: Metrics) -> Self {
        Self {
            data: Some(data),
            metrics,
        }
    }

    /// The dropped sentinel: no output record, no metrics.
    pub fn dropped() -> Self {
        Self {
            data: None,
            metrics: Metrics::new(),
        }
    }

    /// Dropped sentinel that still reports metrics.
    pub fn dropped_with_metrics(metrics: Metrics) -> Self {
        Self {
            data: None,
            metrics,
        }
    }

    /// True when this entry must not be written to the output manifest.
    pub fn is_dropped(&self) -> bool {
        self.data.is_none()
    }

    pub fn data(&self) -> Option<&Record> {
        self.data.as_ref()
    }

    pub fn into_data(self) -> Option<Record> {
        self.data
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}
