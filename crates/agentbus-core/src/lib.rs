pub mod dialogue;
pub mod events;
pub mod spec_formatter;
pub mod state;

pub use dialogue::{DialogueEngine, InitialRequest};
pub use events::EventPublisher;
pub use spec_formatter::format_spec;
pub use state::{status_for_stage, TaskStateManager};
