pub mod backend;
pub mod config;
pub mod http_prober;
pub mod llm;
pub mod memory;
pub mod traits;

pub use backend::{BackendContract, HttpBackendContract, MockBackendContract};
pub use config::{AppConfig, LlmProvider};
pub use http_prober::ReqwestHttpProber;
pub use llm::{build_language_model, AnthropicLanguageModel, OpenAiCompatibleLanguageModel};
pub use memory::{
    FilesystemBlobStore, InMemoryQueue, InMemoryQueueReceiver, MemoryCache, MemoryProcessorStore,
    MemoryTaskStore, MemoryVectorIndex,
};
pub use traits::{
    cosine_similarity, BlobStore, Cache, ChatMessage, ChatRequest, ChatResponse, ChatRole,
    ChatToolCall, HttpProber, LanguageModel, ProcessorStore, Queue, TaskStore, ToolSchema,
    VectorIndex,
};
