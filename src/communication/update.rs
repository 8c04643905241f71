//! Client Update Protocol
//!
//! Ordered batch operations the client applies to its viewport cache. The
//! byte-level encoding is left to the transport; these types serialize with
//! serde.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field set produced by row decorators
pub type RowFields = Map<String, Value>;

/// Per-row metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RowMeta {
    /// Nesting depth, root rows are 0; absent for flat grids
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<usize>,
    /// Whether the row's children are shown; absent for flat grids
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expanded: Option<bool>,
    /// Whether the row can be expanded; absent for flat grids
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_children: Option<bool>,
    pub selected: bool,
}

/// One row as sent to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RowData {
    pub key: String,
    #[serde(flatten)]
    pub meta: RowMeta,
    pub fields: RowFields,
}

impl RowData {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            meta: RowMeta::default(),
            fields: RowFields::new(),
        }
    }
}

/// A single client instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum UpdateOp {
    /// Total row count changed
    Size { size: usize },
    /// Rows starting at `start` now hold `rows`
    Set { start: usize, rows: Vec<RowData> },
    /// Rows `start..start + length` are no longer cached
    Clear { start: usize, length: usize },
    /// End of batch; the client acknowledges with `confirmUpdate(update_id)`
    #[serde(rename_all = "camelCase")]
    Confirm { update_id: u64 },
}

/// Operations produced by one flush of one component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBatch {
    pub update_id: u64,
    pub ops: Vec<UpdateOp>,
}

impl UpdateBatch {
    /// Rows set by this batch, in order
    pub fn rows(&self) -> impl Iterator<Item = (usize, &RowData)> {
        self.ops.iter().flat_map(|op| match op {
            UpdateOp::Set { start, rows } => rows
                .iter()
                .enumerate()
                .map(|(i, row)| (start + i, row))
                .collect::<Vec<_>>(),
            _ => Vec::new(),
        })
    }

    /// Last size announced by this batch
    pub fn size(&self) -> Option<usize> {
        self.ops.iter().rev().find_map(|op| match op {
            UpdateOp::Size { size } => Some(*size),
            _ => None,
        })
    }

    /// Whether the batch carries anything besides its confirmation
    pub fn has_changes(&self) -> bool {
        self.ops
            .iter()
            .any(|op| !matches!(op, UpdateOp::Confirm { .. }))
    }
}
