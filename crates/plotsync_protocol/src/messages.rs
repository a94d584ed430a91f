//! Protocol messages for sync.

use crate::error::{ProtocolError, ProtocolResult};
use crate::operation::Operation;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

fn encode_json<T: Serialize>(message: &'static str, value: &T) -> ProtocolResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|source| ProtocolError::Encode { message, source })
}

fn decode_json<T: DeserializeOwned>(message: &'static str, bytes: &[u8]) -> ProtocolResult<T> {
    serde_json::from_slice(bytes).map_err(|source| ProtocolError::Decode { message, source })
}

/// Push request from a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    /// Project the batch belongs to.
    pub project_id: String,
    /// Sending device.
    pub device_id: String,
    /// Sync version the device last observed.
    pub known_version: u64,
    /// Operations in local enqueue order.
    pub operations: Vec<Operation>,
}

impl PushRequest {
    /// Creates a new push request.
    pub fn new(
        project_id: impl Into<String>,
        device_id: impl Into<String>,
        known_version: u64,
        operations: Vec<Operation>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            device_id: device_id.into(),
            known_version,
            operations,
        }
    }

    /// Encodes to JSON.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode_json("PushRequest", self)
    }

    /// Decodes from JSON.
    ///
    /// Every operation must belong to the request's project.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let request: Self = decode_json("PushRequest", bytes)?;
        if let Some(stray) = request
            .operations
            .iter()
            .find(|op| op.project_id != request.project_id)
        {
            return Err(ProtocolError::invalid(
                "PushRequest",
                format!(
                    "operation {} belongs to project {}, not {}",
                    stray.id, stray.project_id, request.project_id
                ),
            ));
        }
        Ok(request)
    }
}

/// Catch-up request: everything the server accepted after `since_version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatchUpRequest {
    /// Project to fetch.
    pub project_id: String,
    /// Exclusive lower bound.
    pub since_version: u64,
}

impl CatchUpRequest {
    /// Creates a new catch-up request.
    pub fn new(project_id: impl Into<String>, since_version: u64) -> Self {
        Self {
            project_id: project_id.into(),
            since_version,
        }
    }

    /// Encodes to JSON.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode_json("CatchUpRequest", self)
    }

    /// Decodes from JSON.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode_json("CatchUpRequest", bytes)
    }
}

/// Server answer to a push or a catch-up fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    /// Whether the server accepted the request.
    pub success: bool,
    /// Ids of the pushed operations the server accepted.
    #[serde(default)]
    pub processed_operations: Vec<i64>,
    /// Server's authoritative version after handling the request.
    pub sync_version: u64,
    /// Error messages, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
    /// Operations the device is missing (catch-up responses only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_operations: Option<Vec<Operation>>,
}

impl BatchResult {
    /// Creates a successful push acknowledgment.
    pub fn success(processed_operations: Vec<i64>, sync_version: u64) -> Self {
        Self {
            success: true,
            processed_operations,
            sync_version,
            errors: None,
            server_operations: None,
        }
    }

    /// Creates a rejected result.
    pub fn failure(errors: Vec<String>, sync_version: u64) -> Self {
        Self {
            success: false,
            processed_operations: Vec::new(),
            sync_version,
            errors: Some(errors),
            server_operations: None,
        }
    }

    /// Creates a catch-up response.
    pub fn catch_up(server_operations: Vec<Operation>, sync_version: u64) -> Self {
        Self {
            success: true,
            processed_operations: Vec::new(),
            sync_version,
            errors: None,
            server_operations: Some(server_operations),
        }
    }

    /// Returns true when a rejected result reports a version newer than `local`.
    ///
    /// This is how a server that does not send an explicit conflict status
    /// signals that the device must catch up first.
    pub fn indicates_version_ahead(&self, local: u64) -> bool {
        !self.success && self.sync_version > local
    }

    /// Joins the reported errors into one message.
    pub fn error_message(&self) -> String {
        match self.errors.as_deref() {
            Some(errors) if !errors.is_empty() => errors.join("; "),
            _ => "server rejected the batch".to_string(),
        }
    }

    /// Encodes to JSON.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode_json("BatchResult", self)
    }

    /// Decodes from JSON.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode_json("BatchResult", bytes)
    }
}
