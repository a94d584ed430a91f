//! The replicated operation record.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single edit record replicated between a device and the server.
///
/// Operations are immutable once created. The local queue owns them until
/// the server acknowledges them, at which point they are deleted locally.
///
/// # Fields
///
/// - `id`: Local queue identifier, unique per device and assigned in
///   insertion order
/// - `op_type`: Edit kind as understood by the editor (`"node.update"`, ...)
/// - `project_id`, `timeline_id`, `layer_id`: Where the edit applies
/// - `payload`: Opaque structured data, never inspected by the sync layer
/// - `timestamp`: Creation time in epoch milliseconds
/// - `device_id`: Originating device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Queue identifier.
    pub id: i64,
    /// Edit kind.
    #[serde(rename = "type")]
    pub op_type: String,
    /// Project the edit belongs to.
    pub project_id: String,
    /// Timeline within the project.
    pub timeline_id: String,
    /// Layer within the timeline.
    pub layer_id: String,
    /// Opaque edit payload.
    #[serde(default)]
    pub payload: Value,
    /// Creation time in epoch milliseconds.
    pub timestamp: i64,
    /// Originating device.
    pub device_id: String,
}

impl Operation {
    /// Creates a new operation with an unassigned id (`0`).
    ///
    /// Queues assign the real id on enqueue.
    pub fn new(
        op_type: impl Into<String>,
        project_id: impl Into<String>,
        timeline_id: impl Into<String>,
        layer_id: impl Into<String>,
        payload: Value,
        timestamp: i64,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            op_type: op_type.into(),
            project_id: project_id.into(),
            timeline_id: timeline_id.into(),
            layer_id: layer_id.into(),
            payload,
            timestamp,
            device_id: device_id.into(),
        }
    }

    /// Returns a copy carrying the given queue id.
    #[must_use]
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = id;
        self
    }

    /// Encodes to JSON bytes.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|source| ProtocolError::Encode {
            message: "Operation",
            source,
        })
    }

    /// Decodes from JSON bytes.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let op: Self = serde_json::from_slice(bytes).map_err(|source| ProtocolError::Decode {
            message: "Operation",
            source,
        })?;
        if op.project_id.is_empty() {
            return Err(ProtocolError::invalid("Operation", "empty projectId"));
        }
        Ok(op)
    }
}
