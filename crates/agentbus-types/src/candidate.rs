use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Six sub-scores plus the derived overall score (spec §3 "Candidate
/// score"). All fields are expected to lie in `[0, 1]` except the quote and
/// duration estimate, which are task-unit-dependent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateScore {
    pub semantic_relevance: f64,
    pub price_score: f64,
    pub reputation_score: f64,
    pub reliability_score: f64,
    pub speed_score: f64,
    pub schema_compatibility: f64,
    pub overall_score: f64,
    pub price_quote: f64,
    pub estimated_duration_ms: f64,
}

impl CandidateScore {
    /// Every sub-score and the overall score lie in `[0, 1]` (spec §8 "Score
    /// bounds").
    pub fn in_bounds(&self) -> bool {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        in_unit(self.semantic_relevance)
            && in_unit(self.price_score)
            && in_unit(self.reputation_score)
            && in_unit(self.reliability_score)
            && in_unit(self.speed_score)
            && in_unit(self.schema_compatibility)
            && in_unit(self.overall_score)
    }
}

/// `{processorId, rank, score, processorMetadata?, justification?}` (spec
/// §3 "Ranked candidate"). Dense ranks start at 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedCandidate {
    pub processor_id: String,
    pub rank: u32,
    pub score: CandidateScore,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processor_metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub justification: Option<String>,
}
