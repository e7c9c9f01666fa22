pub mod settings;

pub use settings::{
    ConversationConfig, DocumentsConfig, IdentityConfig, LlmConfig, LlmProvider, ServerConfig,
    Settings, VisionConfig,
};
