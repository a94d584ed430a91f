//! Property-based test generators using proptest.

use plotsync_protocol::{BatchResult, Operation};
use proptest::prelude::*;
use serde_json::{json, Value};

/// Strategy for opaque operation payloads.
pub fn payload_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<i64>().prop_map(Value::from),
        "[a-z ]{0,24}".prop_map(Value::from),
        ("[a-z]{1,8}", any::<i32>()).prop_map(|(key, n)| json!({ key: n })),
    ]
}

/// Strategy for operations belonging to `project_id`.
pub fn operation_strategy(project_id: &'static str) -> impl Strategy<Value = Operation> {
    (
        prop::sample::select(vec!["node.create", "node.update", "node.delete", "edge.link"]),
        "[a-z]{1,6}",
        payload_strategy(),
        0i64..2_000_000_000_000,
        "[a-z0-9-]{1,12}",
    )
        .prop_map(move |(op_type, layer, payload, timestamp, device)| {
            Operation::new(op_type, project_id, "main", layer, payload, timestamp, device)
        })
}

/// One scripted server answer to a push.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedReply {
    /// Acknowledge the whole batch at this version.
    Ack(u64),
    /// Reject without a version change.
    Reject,
    /// Report a newer version, forcing a catch-up to it.
    Ahead(u64),
}

impl ScriptedReply {
    /// Renders the reply for a batch with the given ids.
    pub fn to_result(&self, ids: &[i64]) -> BatchResult {
        match self {
            ScriptedReply::Ack(version) => BatchResult::success(ids.to_vec(), *version),
            ScriptedReply::Reject => BatchResult::failure(vec!["rejected".into()], 0),
            ScriptedReply::Ahead(version) => {
                BatchResult::failure(vec!["version mismatch".into()], *version)
            }
        }
    }
}

/// Strategy for a sequence of server replies with arbitrary, possibly
/// decreasing, versions.
pub fn reply_script_strategy() -> impl Strategy<Value = Vec<ScriptedReply>> {
    prop::collection::vec(
        prop_oneof![
            4 => (0u64..500).prop_map(ScriptedReply::Ack),
            1 => Just(ScriptedReply::Reject),
            2 => (0u64..500).prop_map(ScriptedReply::Ahead),
        ],
        1..20,
    )
}
