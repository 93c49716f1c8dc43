//! Candidate discovery (spec §4.8.1, C8): tag-intersection union semantic
//! query, deduplicated by `processorId`.

use std::collections::BTreeMap;

use agentbus_ports::{AppConfig, LanguageModel, ProcessorStore, VectorIndex};
use agentbus_types::{AgentBusError, Processor, TaskSpecification};
use serde_json::json;

/// Returns the union of the tag-intersection query and the semantic query,
/// deduplicated by `processorId`. The semantic branch is skipped silently
/// when no vector index/language model pair is supplied, and tolerated (not
/// fatal) on a transient embedding or index failure — discovery only fails
/// outright via the caller's empty-result check (spec §4.8 "candidates = ∅
/// ⇒ NoMatchFound").
pub async fn discover_candidates(
    spec: &TaskSpecification,
    processor_store: &dyn ProcessorStore,
    vector_index: Option<&dyn VectorIndex>,
    lm: Option<&dyn LanguageModel>,
    config: &AppConfig,
) -> Result<Vec<Processor>, AgentBusError> {
    if config.disable_processor_filtering {
        let limit = config.default_max_candidates * 3;
        return processor_store.list_active(limit).await;
    }

    let mut by_id: BTreeMap<String, Processor> = BTreeMap::new();
    for processor in processor_store.find_by_tags(&spec.tags).await? {
        by_id.insert(processor.processor_id.clone(), processor);
    }

    if let (Some(index), Some(lm)) = (vector_index, lm) {
        let top_k = config.default_max_candidates * 3;
        match lm.embed(&config.embedding_model, &spec.description).await {
            Ok(embedding) => {
                let filter = json!({ "status": "Active" });
                match index.query(&embedding, top_k, Some(&filter)).await {
                    Ok(hits) => {
                        let missing: Vec<String> = hits
                            .into_iter()
                            .map(|(id, _)| id)
                            .filter(|id| !by_id.contains_key(id))
                            .collect();
                        if !missing.is_empty() {
                            for processor in processor_store.find_by_ids(&missing).await? {
                                by_id.insert(processor.processor_id.clone(), processor);
                            }
                        }
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "semantic candidate discovery skipped: vector index query failed");
                    }
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "semantic candidate discovery skipped: embedding failed");
            }
        }
    }

    Ok(by_id.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentbus_ports::{MemoryProcessorStore, MemoryVectorIndex};
    use agentbus_types::{Pricing, PricingModel, ProcessorStatus};
    use std::collections::BTreeSet;

    fn processor(id: &str, tags: &[&str]) -> Processor {
        Processor {
            processor_id: id.into(),
            name: id.into(),
            description: format!("processor {id}"),
            capability_tags: tags.iter().map(|s| s.to_string()).collect(),
            input_schema: None,
            output_schema: None,
            endpoint_url: "https://example.com".into(),
            status: ProcessorStatus::Active,
            reputation_score: 4.0,
            completed_tasks: 0,
            success_rate: 0.9,
            average_execution_time_ms: 1000.0,
            pricing: Pricing {
                model: PricingModel::Flat,
                price: 1.0,
                unit: "task".into(),
            },
            last_checked_at: None,
        }
    }

    fn spec(tags: &[&str]) -> TaskSpecification {
        TaskSpecification {
            description: "summarise a PDF".into(),
            inputs: Default::default(),
            outputs: Default::default(),
            constraints: None,
            tags: tags.iter().map(|s| s.to_string()).collect(),
            is_complex: false,
        }
    }

    fn config() -> AppConfig {
        std::env::set_var("LLM_PROVIDER", "custom");
        std::env::set_var("CUSTOM_LLM_BASE_URL", "http://localhost:0");
        AppConfig::from_env().unwrap()
    }

    #[tokio::test]
    async fn tag_matches_are_returned_without_a_vector_index() {
        let store = MemoryProcessorStore::new();
        store.upsert(processor("p1", &["pdf"])).await;
        store.upsert(processor("p2", &["ocr"])).await;
        let found = discover_candidates(&spec(&["pdf"]), &store, None, None, &config())
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].processor_id, "p1");
    }

    #[tokio::test]
    async fn disable_processor_filtering_returns_active_page() {
        let store = MemoryProcessorStore::new();
        store.upsert(processor("p1", &["pdf"])).await;
        store.upsert(processor("p2", &["ocr"])).await;
        let mut cfg = config();
        cfg.disable_processor_filtering = true;
        let found = discover_candidates(&spec(&["nonexistent"]), &store, None, None, &cfg)
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn semantic_hits_are_unioned_with_tag_matches() {
        let store = MemoryProcessorStore::new();
        store.upsert(processor("p1", &["pdf"])).await;
        store.upsert(processor("p2", &["unrelated-tag"])).await;

        let index = MemoryVectorIndex::new();
        index
            .upsert("p2", vec![1.0, 0.0], json!({"status": "Active"}))
            .await
            .unwrap();

        struct FixedLm;
        #[async_trait::async_trait]
        impl LanguageModel for FixedLm {
            async fn chat(
                &self,
                _request: agentbus_ports::ChatRequest,
            ) -> Result<agentbus_ports::ChatResponse, AgentBusError> {
                unreachable!()
            }
            async fn embed_batch(
                &self,
                _model: &str,
                texts: Vec<String>,
            ) -> Result<Vec<Vec<f32>>, AgentBusError> {
                Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
            }
        }

        let found = discover_candidates(&spec(&["pdf"]), &store, Some(&index), Some(&FixedLm), &config())
            .await
            .unwrap();
        let mut ids: Vec<&str> = found.iter().map(|p| p.processor_id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["p1", "p2"]);
    }
}
