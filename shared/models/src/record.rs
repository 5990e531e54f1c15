use serde::{Deserialize, Serialize};

/// One source row rendered as a document: the unit of transport between the
/// source and the targets. References are strings end-to-end.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub reference: String,
    pub data: serde_json::Map<String, serde_json::Value>,
}

/// An insert or update destined for one target index.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRow {
    pub index: String,
    pub reference: String,
    pub document: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRow {
    pub index: String,
    pub reference: String,
}
