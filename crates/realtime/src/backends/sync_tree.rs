// Streaming Sync Tree
//
// Local mirror of one store location, kept current from the `put`/`patch`
// events of a REST streaming (text/event-stream) listener.

use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};

/// One decoded server-sent event
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Replace the data at `path` (null deletes)
    Put { path: String, data: JsonValue },
    /// Replace each listed child under `path`
    Patch { path: String, data: JsonValue },
    KeepAlive,
    /// Security rules no longer allow reading the location
    Cancel,
    /// Credential expired; the stream is closed by the server
    AuthRevoked,
    Unknown(String),
}

#[derive(Deserialize)]
struct EventPayload {
    path: String,
    data: JsonValue,
}

impl StreamEvent {
    pub fn parse(event: &str, data: &str) -> Result<Self, serde_json::Error> {
        Ok(match event {
            "put" => {
                let payload: EventPayload = serde_json::from_str(data)?;
                Self::Put {
                    path: payload.path,
                    data: payload.data,
                }
            }
            "patch" => {
                let payload: EventPayload = serde_json::from_str(data)?;
                Self::Patch {
                    path: payload.path,
                    data: payload.data,
                }
            }
            "keep-alive" => Self::KeepAlive,
            "cancel" => Self::Cancel,
            "auth_revoked" => Self::AuthRevoked,
            other => Self::Unknown(other.to_string()),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncTree {
    root: JsonValue,
}

impl SyncTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> &JsonValue {
        &self.root
    }

    /// Apply a data event; returns whether it changed anything observable
    pub fn apply(&mut self, event: &StreamEvent) -> bool {
        match event {
            StreamEvent::Put { path, data } => {
                self.put(path, data.clone());
                true
            }
            StreamEvent::Patch { path, data } => {
                if let Some(children) = data.as_object() {
                    for (key, value) in children {
                        let child_path = format!("{}/{}", path.trim_end_matches('/'), key);
                        self.put(&child_path, value.clone());
                    }
                }
                true
            }
            _ => false,
        }
    }

    pub fn put(&mut self, path: &str, data: JsonValue) {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        set_at(&mut self.root, &segments, data);
    }
}

/// The store never holds empty objects, so empty parents collapse to null
fn set_at(node: &mut JsonValue, segments: &[&str], data: JsonValue) {
    let Some((head, rest)) = segments.split_first() else {
        *node = prune(data);
        return;
    };

    if !node.is_object() {
        if data.is_null() {
            return;
        }
        *node = JsonValue::Object(Map::new());
    }

    let now_empty = match node.as_object_mut() {
        Some(children) => {
            let remove_child = {
                let child = children
                    .entry(head.to_string())
                    .or_insert(JsonValue::Null);
                set_at(child, rest, data);
                child.is_null()
            };
            if remove_child {
                children.remove(*head);
            }
            children.is_empty()
        }
        None => false,
    };

    if now_empty {
        *node = JsonValue::Null;
    }
}

fn prune(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(children) => {
            let kept: Map<String, JsonValue> = children
                .into_iter()
                .map(|(k, v)| (k, prune(v)))
                .filter(|(_, v)| !v.is_null())
                .collect();
            if kept.is_empty() {
                JsonValue::Null
            } else {
                JsonValue::Object(kept)
            }
        }
        other => other,
    }
}
