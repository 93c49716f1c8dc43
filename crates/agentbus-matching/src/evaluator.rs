//! Candidate evaluator (spec §4.8.3, C10): six bounded sub-scores, a
//! weighted overall score, and optional LM re-ranking.

use std::collections::{HashMap, HashSet};

use agentbus_ports::{cosine_similarity, ChatMessage, ChatRequest, ChatRole, LanguageModel};
use agentbus_types::{AgentBusError, CandidateScore, Processor, RankedCandidate, TaskSpecification};
use serde_json::{json, Value};

const WEIGHT_SEMANTIC: f64 = 0.35;
const WEIGHT_PRICE: f64 = 0.20;
const WEIGHT_REPUTATION: f64 = 0.15;
const WEIGHT_RELIABILITY: f64 = 0.10;
const WEIGHT_SPEED: f64 = 0.10;
const WEIGHT_SCHEMA: f64 = 0.10;

const LM_RERANK_POOL: usize = 10;

/// Scores and ranks `candidates` against `spec`, applying optional LM
/// re-ranking, and returns the top `max_candidates` entries (spec §4.8.3).
pub async fn evaluate_and_rank(
    spec: &TaskSpecification,
    candidates: Vec<Processor>,
    lm: &dyn LanguageModel,
    embedding_model: &str,
    reasoning_model: &str,
    max_candidates: usize,
) -> Result<Vec<RankedCandidate>, AgentBusError> {
    let semantic_scores = semantic_relevance_scores(spec, &candidates, lm, embedding_model).await;

    let mut scored: Vec<(Processor, CandidateScore)> = candidates
        .into_iter()
        .map(|processor| {
            let semantic = semantic_scores
                .get(&processor.processor_id)
                .copied()
                .unwrap_or(0.5);
            let score = score_processor(&processor, semantic);
            (processor, score)
        })
        .collect();

    scored.sort_by(|a, b| {
        b.1.overall_score
            .partial_cmp(&a.1.overall_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let processors_by_id: HashMap<String, Processor> = scored
        .iter()
        .map(|(p, _)| (p.processor_id.clone(), p.clone()))
        .collect();

    let mut ranked: Vec<RankedCandidate> = scored
        .into_iter()
        .enumerate()
        .map(|(idx, (processor, score))| RankedCandidate {
            processor_id: processor.processor_id.clone(),
            rank: (idx + 1) as u32,
            score,
            processor_metadata: Some(json!({ "name": processor.name })),
            justification: None,
        })
        .collect();

    if ranked.len() > 1 {
        if let Some(order) = lm_rerank(spec, &ranked, &processors_by_id, lm, reasoning_model).await {
            ranked = apply_rerank(ranked, order);
        }
    }

    ranked.truncate(max_candidates);
    Ok(ranked)
}

fn score_processor(processor: &Processor, semantic_relevance: f64) -> CandidateScore {
    let price_quote = processor.pricing.price;
    let price_score = 10.0 / (10.0 + price_quote.max(0.0));
    let reputation_score = (processor.reputation_score / 5.0).clamp(0.0, 1.0);
    let reliability_score = processor.success_rate.clamp(0.0, 1.0);
    let speed_score = 5000.0 / (5000.0 + processor.average_execution_time_ms.max(0.0));
    let schema_compatibility = schema_compatibility(&processor.input_schema, &processor.output_schema);

    let overall_score = WEIGHT_SEMANTIC * semantic_relevance
        + WEIGHT_PRICE * price_score
        + WEIGHT_REPUTATION * reputation_score
        + WEIGHT_RELIABILITY * reliability_score
        + WEIGHT_SPEED * speed_score
        + WEIGHT_SCHEMA * schema_compatibility;

    CandidateScore {
        semantic_relevance,
        price_score,
        reputation_score,
        reliability_score,
        speed_score,
        schema_compatibility,
        overall_score,
        price_quote,
        estimated_duration_ms: processor.average_execution_time_ms,
    }
}

/// 1.0 both present & structurally valid, 0.6 exactly one valid, 0.3 both
/// present but malformed, 0.2 otherwise (spec §4.8.3).
fn schema_compatibility(input: &Option<Value>, output: &Option<Value>) -> f64 {
    let is_valid = |v: &Option<Value>| v.as_ref().map(Value::is_object).unwrap_or(false);
    let is_present = |v: &Option<Value>| v.is_some();

    let valid_count = [is_valid(input), is_valid(output)].iter().filter(|v| **v).count();
    match valid_count {
        2 => 1.0,
        1 => 0.6,
        _ if is_present(input) && is_present(output) => 0.3,
        _ => 0.2,
    }
}

async fn semantic_relevance_scores(
    spec: &TaskSpecification,
    candidates: &[Processor],
    lm: &dyn LanguageModel,
    embedding_model: &str,
) -> HashMap<String, f64> {
    let task_embedding = match lm.embed(embedding_model, &spec.description).await {
        Ok(embedding) => embedding,
        Err(e) => {
            tracing::debug!(error = %e, "task embedding failed, defaulting semantic relevance to 0.5");
            return HashMap::new();
        }
    };

    let descriptions: Vec<String> = candidates.iter().map(|p| p.description.clone()).collect();
    let processor_embeddings = match lm.embed_batch(embedding_model, descriptions).await {
        Ok(embeddings) => embeddings,
        Err(e) => {
            tracing::debug!(error = %e, "processor embeddings failed, defaulting semantic relevance to 0.5");
            return HashMap::new();
        }
    };

    candidates
        .iter()
        .zip(processor_embeddings)
        .filter(|(_, embedding)| !embedding.is_empty())
        .map(|(processor, embedding)| {
            (
                processor.processor_id.clone(),
                cosine_similarity(&task_embedding, &embedding),
            )
        })
        .collect()
}

/// Sends the top [`LM_RERANK_POOL`] algorithmic candidates to the LM and
/// parses back `[{id, justification?}, …]`. Returns `None` on any
/// transport, parse, or content-validation failure so the caller keeps the
/// algorithmic ranking (spec §4.8.3 "On any LM/validation failure the
/// algorithmic ranking is kept").
async fn lm_rerank(
    spec: &TaskSpecification,
    ranked: &[RankedCandidate],
    processors_by_id: &HashMap<String, Processor>,
    lm: &dyn LanguageModel,
    model: &str,
) -> Option<Vec<(String, Option<String>)>> {
    let top: Vec<&RankedCandidate> = ranked.iter().take(LM_RERANK_POOL).collect();
    let valid_ids: HashSet<&str> = top.iter().map(|r| r.processor_id.as_str()).collect();

    let summaries: Vec<Value> = top
        .iter()
        .map(|r| {
            let processor = processors_by_id.get(&r.processor_id);
            json!({
                "id": r.processor_id,
                "name": processor.map(|p| p.name.clone()),
                "description": processor.map(|p| p.description.clone()),
                "overallScore": r.score.overall_score,
            })
        })
        .collect();

    let data = json!({
        "spec": spec,
        "candidates": summaries,
    });
    let prompt = agentbus_prompts::format_prompt("matching.rerank", &data);

    let request = ChatRequest {
        model: model.to_string(),
        messages: vec![ChatMessage::new(ChatRole::User, prompt)],
        tools: vec![],
        temperature: 0.0,
        max_tokens: 1024,
    };

    let response = match lm.chat(request).await {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!(error = %e, "LM re-ranking call failed, keeping algorithmic ranking");
            return None;
        }
    };
    let text = response.text?;
    let parsed: Value = serde_json::from_str(text.trim()).ok()?;
    let entries = parsed.as_array()?;

    let mut order = Vec::with_capacity(entries.len());
    for entry in entries {
        let id = entry.get("id")?.as_str()?.to_string();
        if !valid_ids.contains(id.as_str()) {
            tracing::debug!(id = %id, "LM re-ranking referenced an id outside the candidate pool, discarding");
            return None;
        }
        let justification = entry.get("justification").and_then(Value::as_str).map(str::to_string);
        order.push((id, justification));
    }
    Some(order)
}

/// Reorders `original` per the LM's `order`, attaching justifications, and
/// appends any candidates the LM omitted in their original order without a
/// justification (spec §4.8.3).
fn apply_rerank(original: Vec<RankedCandidate>, order: Vec<(String, Option<String>)>) -> Vec<RankedCandidate> {
    let original_order: Vec<String> = original.iter().map(|r| r.processor_id.clone()).collect();
    let mut by_id: HashMap<String, RankedCandidate> =
        original.into_iter().map(|r| (r.processor_id.clone(), r)).collect();

    let mut result = Vec::with_capacity(by_id.len());
    for (id, justification) in order {
        if let Some(mut candidate) = by_id.remove(&id) {
            candidate.justification = justification;
            result.push(candidate);
        }
    }
    for id in original_order {
        if let Some(candidate) = by_id.remove(&id) {
            result.push(candidate);
        }
    }
    for (idx, candidate) in result.iter_mut().enumerate() {
        candidate.rank = (idx + 1) as u32;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentbus_types::{Pricing, PricingModel, ProcessorStatus};
    use async_trait::async_trait;

    fn processor(id: &str, price: f64, reputation: f64) -> Processor {
        Processor {
            processor_id: id.into(),
            name: id.into(),
            description: format!("processor {id}"),
            capability_tags: Default::default(),
            input_schema: None,
            output_schema: None,
            endpoint_url: "https://example.com".into(),
            status: ProcessorStatus::Active,
            reputation_score: reputation,
            completed_tasks: 0,
            success_rate: 0.9,
            average_execution_time_ms: 1000.0,
            pricing: Pricing {
                model: PricingModel::Flat,
                price,
                unit: "task".into(),
            },
            last_checked_at: None,
        }
    }

    fn spec() -> TaskSpecification {
        TaskSpecification {
            description: "summarise a PDF".into(),
            inputs: Default::default(),
            outputs: Default::default(),
            constraints: None,
            tags: Default::default(),
            is_complex: false,
        }
    }

    struct NoEmbeddingLm;
    #[async_trait]
    impl LanguageModel for NoEmbeddingLm {
        async fn chat(&self, _request: ChatRequest) -> Result<agentbus_ports::ChatResponse, AgentBusError> {
            Ok(agentbus_ports::ChatResponse {
                text: None,
                tool_calls: vec![],
            })
        }
        async fn embed_batch(&self, _model: &str, _texts: Vec<String>) -> Result<Vec<Vec<f32>>, AgentBusError> {
            Err(AgentBusError::LanguageModel("no embeddings available".into()))
        }
    }

    #[test]
    fn all_sub_scores_stay_in_unit_interval() {
        let processor = processor("p1", 5.0, 4.0);
        let score = score_processor(&processor, 0.8);
        assert!(score.in_bounds());
    }

    #[test]
    fn cheaper_processor_scores_higher_on_price() {
        let cheap = score_processor(&processor("p1", 1.0, 4.0), 0.5);
        let expensive = score_processor(&processor("p2", 100.0, 4.0), 0.5);
        assert!(cheap.price_score > expensive.price_score);
    }

    #[test]
    fn schema_compatibility_levels() {
        assert_eq!(schema_compatibility(&Some(json!({})), &Some(json!({}))), 1.0);
        assert_eq!(schema_compatibility(&Some(json!({})), &None), 0.6);
        assert_eq!(schema_compatibility(&Some(json!("bad")), &Some(json!("bad"))), 0.3);
        assert_eq!(schema_compatibility(&None, &None), 0.2);
    }

    #[tokio::test]
    async fn ranking_falls_back_to_algorithmic_when_lm_unavailable() {
        let candidates = vec![processor("expensive", 50.0, 4.0), processor("cheap", 1.0, 4.0)];
        let ranked = evaluate_and_rank(&spec(), candidates, &NoEmbeddingLm, "embed-model", "reason-model", 5)
            .await
            .unwrap();
        assert_eq!(ranked[0].processor_id, "cheap");
        assert_eq!(ranked[0].rank, 1);
        assert!(ranked.iter().all(|r| r.score.in_bounds()));
    }

    #[tokio::test]
    async fn result_is_truncated_to_max_candidates() {
        let candidates: Vec<Processor> = (0..10).map(|i| processor(&format!("p{i}"), 1.0, 4.0)).collect();
        let ranked = evaluate_and_rank(&spec(), candidates, &NoEmbeddingLm, "embed-model", "reason-model", 3)
            .await
            .unwrap();
        assert_eq!(ranked.len(), 3);
    }

    #[test]
    fn apply_rerank_appends_missing_candidates_without_justification() {
        let original = vec![
            RankedCandidate {
                processor_id: "a".into(),
                rank: 1,
                score: score_processor(&processor("a", 1.0, 4.0), 0.5),
                processor_metadata: None,
                justification: None,
            },
            RankedCandidate {
                processor_id: "b".into(),
                rank: 2,
                score: score_processor(&processor("b", 1.0, 4.0), 0.5),
                processor_metadata: None,
                justification: None,
            },
        ];
        let reordered = apply_rerank(original, vec![("b".into(), Some("better fit".into()))]);
        assert_eq!(reordered[0].processor_id, "b");
        assert_eq!(reordered[0].justification.as_deref(), Some("better fit"));
        assert_eq!(reordered[1].processor_id, "a");
        assert!(reordered[1].justification.is_none());
        assert_eq!(reordered[1].rank, 2);
    }
}
