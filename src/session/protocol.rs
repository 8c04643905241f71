//! Client Protocol
//!
//! Messages a client sends to a session and the response it gets back.

use super::ComponentId;
use crate::communication::UpdateBatch;
use crate::grid::GridSortOrder;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A call from the client to one component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientCall {
    /// Rows the client shows; only the last one per component in a turn counts
    SetRequestedRange { start: usize, length: usize },
    Select { key: String },
    Deselect { key: String },
    SelectAll,
    DeselectAll,
    ToggleExpand { key: String },
    SortersChanged { sorters: Vec<GridSortOrder> },
    #[serde(rename_all = "camelCase")]
    ConfirmUpdate { update_id: u64 },
    /// The client lost batches after `last_applied` and needs them again
    #[serde(rename_all = "camelCase")]
    Resync { last_applied: u64 },
}

/// A client call addressed to a component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ClientMessage {
    pub component: ComponentId,
    #[serde(flatten)]
    pub call: ClientCall,
}

impl ClientMessage {
    pub fn new(component: ComponentId, call: ClientCall) -> Self {
        Self { component, call }
    }
}

/// One component's batch within a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ComponentUpdate {
    pub component: ComponentId,
    #[serde(flatten)]
    pub batch: UpdateBatch,
}

/// Everything produced by one session turn, in component handle order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ClientResponse {
    pub updates: Vec<ComponentUpdate>,
}

impl ClientResponse {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Batches for one component, in order
    pub fn for_component(&self, component: ComponentId) -> impl Iterator<Item = &UpdateBatch> {
        self.updates
            .iter()
            .filter(move |update| update.component == component)
            .map(|update| &update.batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_wire_format() {
        let json = r#"{"component":2,"type":"setRequestedRange","start":10,"length":5}"#;
        let message: ClientMessage = serde_json::from_str(json).expect("parse");
        assert_eq!(message.component, ComponentId::new(2));
        assert_eq!(
            message.call,
            ClientCall::SetRequestedRange {
                start: 10,
                length: 5
            }
        );
    }

    #[test]
    fn test_camel_case_fields() {
        let json = serde_json::to_value(ClientMessage::new(
            ComponentId::new(0),
            ClientCall::ConfirmUpdate { update_id: 7 },
        ))
        .expect("serialize");
        assert_eq!(json["type"], "confirmUpdate");
        assert_eq!(json["updateId"], 7);

        let resync: ClientMessage =
            serde_json::from_str(r#"{"component":0,"type":"resync","lastApplied":3}"#)
                .expect("parse");
        assert_eq!(resync.call, ClientCall::Resync { last_applied: 3 });
    }

    #[test]
    fn test_unit_calls_parse() {
        let message: ClientMessage =
            serde_json::from_str(r#"{"component":1,"type":"selectAll"}"#).expect("parse");
        assert_eq!(message.call, ClientCall::SelectAll);
    }
}
