//! Notification payload parsing. Unknown fields are ignored; a malformed
//! payload is an error the listener logs and drops.

use crate::sources::SourceError;
use pgsync_models::Event;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Payload {
    #[serde(rename = "type")]
    kind: String,
    index: String,
    #[serde(default)]
    relation: Option<String>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    reference: Option<RefValue>,
    #[serde(default)]
    soft_deleted: Option<bool>,
    #[serde(default)]
    old_soft_deleted: Option<bool>,
    #[serde(default)]
    local: Option<RefValue>,
    #[serde(default)]
    old_local: Option<RefValue>,
    #[serde(default)]
    related: Option<RefValue>,
    #[serde(default)]
    old_related: Option<RefValue>,
}

/// References are normalised to strings at the boundary; the source may
/// serialise them as JSON numbers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum RefValue {
    Text(String),
    Number(i64),
}

impl RefValue {
    fn into_string(self) -> String {
        match self {
            RefValue::Text(text) => text,
            RefValue::Number(number) => number.to_string(),
        }
    }
}

/// Parses one notification payload into its events. `relation_pivot`
/// payloads fan out to both sides when the pivot row moved.
pub fn parse_payload(payload: &str) -> Result<Vec<Event>, SourceError> {
    let payload: Payload = serde_json::from_str(payload)
        .map_err(|err| SourceError::MalformedPayload(err.to_string()))?;

    match payload.kind.as_str() {
        "table" => parse_table_event(payload).map(|event| vec![event]),
        "relation" => {
            let relation = payload
                .relation
                .ok_or_else(|| SourceError::MalformedPayload("relation payload without relation".into()))?;
            let reference = required(payload.reference, "reference")?;
            Ok(vec![Event::RelationUpdate {
                index: payload.index,
                relation,
                reference,
                pivot: false,
            }])
        }
        "relation_pivot" => {
            let relation = payload
                .relation
                .ok_or_else(|| SourceError::MalformedPayload("pivot payload without relation".into()))?;
            let local = required(payload.local, "local")?;
            let old_local = payload.old_local.map(RefValue::into_string);
            let related = payload.related.map(RefValue::into_string);
            let old_related = payload.old_related.map(RefValue::into_string);

            let mut events = vec![Event::RelationUpdate {
                index: payload.index.clone(),
                relation: relation.clone(),
                reference: local.clone(),
                pivot: true,
            }];
            // A moved pivot row changes the document on both sides.
            let moved = old_local.as_ref().is_some_and(|old| *old != local)
                || (old_related.is_some() && old_related != related);
            if let (true, Some(old_local)) = (moved, old_local) {
                events.push(Event::RelationUpdate {
                    index: payload.index,
                    relation,
                    reference: old_local,
                    pivot: true,
                });
            }
            Ok(events)
        }
        other => Err(SourceError::MalformedPayload(format!(
            "unknown payload type: {other}"
        ))),
    }
}

fn parse_table_event(payload: Payload) -> Result<Event, SourceError> {
    let reference = required(payload.reference, "reference")?;
    match payload.action.as_deref() {
        Some("insert") => Ok(Event::Insert {
            index: payload.index,
            reference,
        }),
        Some("update") => Ok(Event::Update {
            index: payload.index,
            reference,
            soft_deleted: payload.soft_deleted.unwrap_or(false),
            previously_soft_deleted: payload.old_soft_deleted.unwrap_or(false),
        }),
        Some("delete") => Ok(Event::Delete {
            index: payload.index,
            reference,
        }),
        other => Err(SourceError::MalformedPayload(format!(
            "unknown table action: {other:?}"
        ))),
    }
}

fn required(value: Option<RefValue>, name: &str) -> Result<String, SourceError> {
    value
        .map(RefValue::into_string)
        .ok_or_else(|| SourceError::MalformedPayload(format!("missing {name}")))
}
