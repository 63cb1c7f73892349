//! Execution records: one structured audit entry per delivery.
//!
//! Every delivery that reaches the dispatcher produces exactly one record,
//! whether it was processed, timed out, failed, or carried nothing to do.
//! Records serialize as a single JSON object so a collector can consume
//! them without parsing log text.

use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::{DeliveryId, EntityKey};

/// Terminal state of one delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed(String),
    TimedOut,
}

/// Audit entry for one processed delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub delivery_id: DeliveryId,
    pub event_type: String,
    pub entity: Option<EntityKey>,
    /// Time spent queued behind earlier deliveries for the same entity.
    #[serde(with = "duration_millis")]
    pub queued_for: Duration,
    #[serde(with = "duration_millis")]
    pub processed_in: Duration,
    /// API requests consumed while processing.
    pub token_spend: u32,
    /// Whether the handler did any work (vs. a recognized no-op).
    pub handled: bool,
    pub outcome: Outcome,
}

/// Durations as whole milliseconds on the wire; sub-millisecond precision
/// is noise at audit granularity.
mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Destination for execution records.
pub trait RecordSink: Send + Sync {
    fn record(&self, record: ExecutionRecord);
}

/// Serializes each record to one JSON object and emits it under the
/// `execution_record` target, so records can be filtered or shipped
/// independently of normal logs.
pub struct TracingSink;

impl RecordSink for TracingSink {
    fn record(&self, r: ExecutionRecord) {
        match serde_json::to_string(&r) {
            Ok(json) => info!(target: "execution_record", record = %json, "delivery complete"),
            Err(error) => warn!(
                target: "execution_record",
                %error,
                delivery = %r.delivery_id,
                "record failed to serialize"
            ),
        }
    }
}

/// Collects records in memory for tests.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<ExecutionRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ExecutionRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl RecordSink for MemorySink {
    fn record(&self, record: ExecutionRecord) {
        self.records.lock().unwrap().push(record);
    }
}
