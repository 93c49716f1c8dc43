pub mod candidate;
pub mod dialogue;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod processor;
pub mod spec;
pub mod task;
pub mod workflow;

pub use candidate::{CandidateScore, RankedCandidate};
pub use dialogue::{DialogueStage, DialogueState, DialogueTurn, ExtractedParams, ToolCall, ToolResult, TurnRole};
pub use error::{AgentBusError, AgentBusResult, HttpStatusHint};
pub use events::{BrokerQueueMessage, CandidateSubmission, ContentType, MessageTarget, SenderRole, TaskPendingMatchEvent};
pub use lifecycle::TaskStatus;
pub use processor::{PricingModel, Pricing, Processor, ProcessorStatus};
pub use spec::{normalize_tag_set, ShapeDescriptor, TaskConstraints, TaskSpecification};
pub use task::{CachedStatus, Task};
pub use workflow::{ExecutionMode, WorkflowPlan, WorkflowStep};
