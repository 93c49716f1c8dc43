use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ProcessorStatus {
    Active,
    Inactive,
    Busy,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingModel {
    Flat,
    PerUnit,
    PerToken,
    PerSecond,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pricing {
    pub model: PricingModel,
    pub price: f64,
    pub unit: String,
}

/// Catalog entry (spec §3 "Processor").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Processor {
    pub processor_id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub capability_tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    pub endpoint_url: String,
    pub status: ProcessorStatus,
    pub reputation_score: f64,
    pub completed_tasks: u64,
    pub success_rate: f64,
    pub average_execution_time_ms: f64,
    pub pricing: Pricing,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl Processor {
    /// Health endpoint derivation (spec §4.8.2): append `/health` unless the
    /// endpoint URL already ends with it.
    pub fn health_endpoint(&self) -> String {
        if self.endpoint_url.ends_with("/health") {
            self.endpoint_url.clone()
        } else {
            format!("{}/health", self.endpoint_url.trim_end_matches('/'))
        }
    }
}
