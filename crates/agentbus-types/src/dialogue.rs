use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Clarification dialogue stage (spec §3 "Dialogue state").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DialogueStage {
    GatheringCompetitors,
    GatheringTimeframe,
    GatheringPlatforms,
    Finalizing,
    Completed,
    Failed,
    Cancelled,
}

impl DialogueStage {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DialogueStage::Completed | DialogueStage::Failed | DialogueStage::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
    System,
    Tool,
}

/// A single declared tool invocation emitted by the language model (spec
/// §4.4 "LM interaction contract" and glossary "Tool call").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// The dispatch result of a [`ToolCall`], appended to history as a `tool`
/// turn (spec §4.4: "one tool-turn carrying the tool-results").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub content: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueTurn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResult>,
}

impl DialogueTurn {
    pub fn text(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
        }
    }

    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: String::new(),
            timestamp: Utc::now(),
            tool_calls,
            tool_results: Vec::new(),
        }
    }

    pub fn tool_results(tool_results: Vec<ToolResult>) -> Self {
        Self {
            role: TurnRole::Tool,
            content: String::new(),
            timestamp: Utc::now(),
            tool_calls: Vec::new(),
            tool_results,
        }
    }
}

/// Best-effort structured bag built up across turns by the
/// `update_dialogue_parameters` tool (spec §4.4, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refined_description: Option<String>,
    #[serde(default)]
    pub inputs: Value,
    #[serde(default)]
    pub outputs: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(default)]
    pub required_platforms: Vec<String>,
    #[serde(default)]
    pub competitors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<String>,
    #[serde(default)]
    pub key_features: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_audience: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_complex_hint: Option<bool>,
}

/// Ephemeral dialogue state (spec §3 "Dialogue state").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogueState {
    pub dialogue_id: String,
    pub requester_id: String,
    pub history: Vec<DialogueTurn>,
    pub stage: DialogueStage,
    pub extracted_params: ExtractedParams,
}

impl DialogueState {
    pub fn new(dialogue_id: impl Into<String>, requester_id: impl Into<String>) -> Self {
        Self {
            dialogue_id: dialogue_id.into(),
            requester_id: requester_id.into(),
            history: Vec::new(),
            stage: DialogueStage::GatheringCompetitors,
            extracted_params: ExtractedParams::default(),
        }
    }

    pub fn user_turn_count(&self) -> usize {
        self.history
            .iter()
            .filter(|t| t.role == TurnRole::User)
            .count()
    }
}
