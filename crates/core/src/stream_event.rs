use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A single event emitted by the provider event iterator during a stream.
///
/// Modeled as a tagged union with an open `extra` map so that fields the
/// provider adds later still round-trip rather than being dropped, per the
/// "dynamic JSON event shapes" design note: persist by stable JSON round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A tool invocation started.
    ToolStarted {
        tool: ToolRef,
        #[serde(flatten)]
        extra: HashMap<String, serde_json::Value>,
    },
    /// A tool invocation completed. `tool.parent_id.is_none()` marks a
    /// top-level completion — the only kind that is injection-safe.
    ToolCompleted {
        tool: ToolRef,
        #[serde(flatten)]
        extra: HashMap<String, serde_json::Value>,
    },
    /// An incremental chunk of assistant text.
    TextDelta {
        text: String,
        #[serde(flatten)]
        extra: HashMap<String, serde_json::Value>,
    },
    /// A provider-originated system/status event.
    System {
        #[serde(flatten)]
        extra: HashMap<String, serde_json::Value>,
    },
    /// The final result event of a stream.
    Result {
        #[serde(flatten)]
        extra: HashMap<String, serde_json::Value>,
    },
}

/// The tool identity carried on `tool_started`/`tool_completed` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRef {
    pub name: String,
    /// `Some` when this tool call is nested inside another in-flight tool
    /// call; `None` for a top-level call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl StreamEvent {
    /// Injection-safe iff this is a top-level `tool_completed` event (no
    /// parent tool call still in flight).
    #[must_use]
    pub fn is_injection_safe(&self) -> bool {
        matches!(
            self,
            StreamEvent::ToolCompleted {
                tool: ToolRef { parent_id: None, .. },
                ..
            }
        )
    }
}
