//! Telemetry wire and in-memory types
//!
//! A heartbeat arrives over the wire as [`HeartbeatSample`] (embedded in
//! [`crate::api::HeartbeatRequest`]); the per-worker telemetry consumer turns
//! it into a [`TelemetryRecord`] and republishes it as a [`TelemetryUpdate`]
//! for external subscribers (see `master::telemetry`).

use serde::{Deserialize, Serialize};

/// A single heartbeat's usage sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatSample {
    pub cpu_usage: f64,
    pub mem_usage: f64,
    pub gpu_usage: f64,
    pub running_tasks: Vec<String>,
    /// Unix seconds at which the master accepted this heartbeat.
    pub received_at: f64,
}

/// The latest known telemetry state for one worker, as returned by
/// `GetWorkerTelemetry`. Always a deep copy; callers never observe a record
/// mid-update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub worker_id: String,
    pub latest_sample: Option<HeartbeatSample>,
    pub last_heartbeat: f64,
}

impl TelemetryRecord {
    pub fn empty(worker_id: impl Into<String>) -> Self {
        TelemetryRecord {
            worker_id: worker_id.into(),
            latest_sample: None,
            last_heartbeat: 0.0,
        }
    }
}

/// Broadcast to external subscribers after each heartbeat a per-worker
/// consumer processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryUpdate {
    pub worker_id: String,
    pub sample: HeartbeatSample,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_record_empty() {
        let record = TelemetryRecord::empty("w1");
        assert_eq!(record.worker_id, "w1");
        assert!(record.latest_sample.is_none());
        assert_eq!(record.last_heartbeat, 0.0);
    }
}
