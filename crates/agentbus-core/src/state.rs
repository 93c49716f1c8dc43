//! Task state manager (spec §4.2, C3). Owns the cache key namespace and
//! the dialogue-id/task-id linking discipline (spec §4.2 "Linking", §9
//! "Dialogue/task id linkage").

use std::sync::Arc;
use std::time::Duration;

use agentbus_ports::Cache;
use agentbus_types::{AgentBusError, CachedStatus, DialogueState, DialogueStage, TaskStatus};

pub fn status_key(id: &str) -> String {
    format!("task:status:{id}")
}

pub fn dialogue_key(dialogue_id: &str) -> String {
    format!("task:dialogue:{dialogue_id}")
}

pub fn spec_key(id: &str) -> String {
    format!("task:spec:{id}")
}

/// Derives the cached status implied by a dialogue's current stage (spec
/// §4.2: "Writing dialogue state also updates the status entry derived
/// from the dialogue stage"). Pure and directly unit-tested.
pub fn status_for_stage(stage: DialogueStage) -> TaskStatus {
    match stage {
        DialogueStage::Completed => TaskStatus::Clarified,
        DialogueStage::Failed => TaskStatus::ClarificationFailed,
        DialogueStage::Cancelled => TaskStatus::Cancelled,
        DialogueStage::GatheringCompetitors
        | DialogueStage::GatheringTimeframe
        | DialogueStage::GatheringPlatforms
        | DialogueStage::Finalizing => TaskStatus::PendingClarification,
    }
}

#[derive(Clone)]
pub struct TaskStateManager {
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl TaskStateManager {
    pub fn new(cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    pub async fn get_dialogue(&self, dialogue_id: &str) -> Result<Option<DialogueState>, AgentBusError> {
        match self.cache.get(&dialogue_key(dialogue_id)).await? {
            Some(bytes) => {
                let state: DialogueState = serde_json::from_slice(&bytes).map_err(|e| {
                    AgentBusError::Storage(format!("corrupt cached dialogue state: {e}"))
                })?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    /// Persists `state` and refreshes the derived status entry for its
    /// `dialogueId` (spec §4.2).
    pub async fn save_dialogue(&self, state: &DialogueState) -> Result<(), AgentBusError> {
        let dialogue_bytes = serde_json::to_vec(state)
            .map_err(|e| AgentBusError::Storage(format!("failed to serialise dialogue: {e}")))?;
        let status = CachedStatus::new(status_for_stage(state.stage));
        let status_bytes = serde_json::to_vec(&status)
            .map_err(|e| AgentBusError::Storage(format!("failed to serialise status: {e}")))?;
        self.cache
            .multi_set(vec![
                (dialogue_key(&state.dialogue_id), dialogue_bytes, self.ttl),
                (status_key(&state.dialogue_id), status_bytes, self.ttl),
            ])
            .await
    }

    /// Reads the cached status for `id`, transparently following the
    /// `finalTaskId` pointer left behind by [`Self::link`] (spec §4.2,
    /// §9).
    pub async fn get_status(&self, id: &str) -> Result<Option<CachedStatus>, AgentBusError> {
        let Some(bytes) = self.cache.get(&status_key(id)).await? else {
            return Ok(None);
        };
        let status: CachedStatus = serde_json::from_slice(&bytes)
            .map_err(|e| AgentBusError::Storage(format!("corrupt cached status: {e}")))?;
        if let Some(final_id) = &status.final_task_id {
            if let Some(final_bytes) = self.cache.get(&status_key(final_id)).await? {
                let final_status: CachedStatus = serde_json::from_slice(&final_bytes)
                    .map_err(|e| AgentBusError::Storage(format!("corrupt cached status: {e}")))?;
                return Ok(Some(final_status));
            }
        }
        Ok(Some(status))
    }

    pub async fn set_status(&self, id: &str, status: CachedStatus) -> Result<(), AgentBusError> {
        let bytes = serde_json::to_vec(&status)
            .map_err(|e| AgentBusError::Storage(format!("failed to serialise status: {e}")))?;
        self.cache.set(&status_key(id), bytes, self.ttl).await
    }

    /// Atomically links `dialogue_id` to `final_task_id` (spec §4.2
    /// "Linking"): the dialogue-id entry becomes a pointer carrying
    /// `finalTaskId`, and the final-id entry carries the direct status.
    pub async fn link(
        &self,
        dialogue_id: &str,
        final_task_id: &str,
        status: TaskStatus,
    ) -> Result<(), AgentBusError> {
        let mut pointer = CachedStatus::new(status);
        pointer.final_task_id = Some(final_task_id.to_string());
        let direct = CachedStatus::new(status);

        let pointer_bytes = serde_json::to_vec(&pointer)
            .map_err(|e| AgentBusError::Storage(format!("failed to serialise status: {e}")))?;
        let direct_bytes = serde_json::to_vec(&direct)
            .map_err(|e| AgentBusError::Storage(format!("failed to serialise status: {e}")))?;

        self.cache
            .multi_set(vec![
                (status_key(dialogue_id), pointer_bytes, self.ttl),
                (status_key(final_task_id), direct_bytes, self.ttl),
            ])
            .await
    }

    pub async fn save_spec(&self, id: &str, spec_json: &serde_json::Value) -> Result<(), AgentBusError> {
        let bytes = serde_json::to_vec(spec_json)
            .map_err(|e| AgentBusError::Storage(format!("failed to serialise spec: {e}")))?;
        self.cache.set(&spec_key(id), bytes, self.ttl).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentbus_ports::MemoryCache;
    use agentbus_types::{DialogueState, ExtractedParams};

    fn manager() -> TaskStateManager {
        TaskStateManager::new(Arc::new(MemoryCache::new()), Duration::from_secs(60))
    }

    #[test]
    fn status_for_stage_mapping() {
        assert_eq!(status_for_stage(DialogueStage::Completed), TaskStatus::Clarified);
        assert_eq!(status_for_stage(DialogueStage::Failed), TaskStatus::ClarificationFailed);
        assert_eq!(status_for_stage(DialogueStage::Cancelled), TaskStatus::Cancelled);
        assert_eq!(
            status_for_stage(DialogueStage::GatheringCompetitors),
            TaskStatus::PendingClarification
        );
        assert_eq!(
            status_for_stage(DialogueStage::Finalizing),
            TaskStatus::PendingClarification
        );
    }

    #[tokio::test]
    async fn save_and_load_dialogue_round_trips() {
        let manager = manager();
        let state = DialogueState {
            dialogue_id: "d1".into(),
            requester_id: "u1".into(),
            history: vec![],
            stage: DialogueStage::GatheringCompetitors,
            extracted_params: ExtractedParams::default(),
        };
        manager.save_dialogue(&state).await.unwrap();
        let loaded = manager.get_dialogue("d1").await.unwrap().unwrap();
        assert_eq!(loaded.dialogue_id, "d1");
        assert_eq!(loaded.stage, DialogueStage::GatheringCompetitors);
    }

    #[tokio::test]
    async fn link_makes_dialogue_status_follow_final_task_id() {
        let manager = manager();
        manager
            .set_status("d1", CachedStatus::new(TaskStatus::Clarified))
            .await
            .unwrap();
        manager.link("d1", "t1", TaskStatus::PendingRegistration).await.unwrap();

        let via_dialogue = manager.get_status("d1").await.unwrap().unwrap();
        let via_final = manager.get_status("t1").await.unwrap().unwrap();
        assert_eq!(via_dialogue.status, TaskStatus::PendingRegistration);
        assert_eq!(via_final.status, TaskStatus::PendingRegistration);
        assert!(via_dialogue.final_task_id.is_none(), "caller sees resolved status, not the raw pointer");
    }

    #[tokio::test]
    async fn save_dialogue_writes_derived_status() {
        let manager = manager();
        let mut state = DialogueState {
            dialogue_id: "d2".into(),
            requester_id: "u1".into(),
            history: vec![],
            stage: DialogueStage::GatheringCompetitors,
            extracted_params: ExtractedParams::default(),
        };
        manager.save_dialogue(&state).await.unwrap();
        assert_eq!(
            manager.get_status("d2").await.unwrap().unwrap().status,
            TaskStatus::PendingClarification
        );

        state.stage = DialogueStage::Completed;
        manager.save_dialogue(&state).await.unwrap();
        assert_eq!(
            manager.get_status("d2").await.unwrap().unwrap().status,
            TaskStatus::Clarified
        );
    }
}
