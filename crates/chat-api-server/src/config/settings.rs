use anyhow::{bail, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Fallback variable for the LLM credential when `APP__LLM__API_KEY` is unset.
pub const LLM_API_KEY_ENV: &str = "OPENAI_API_KEY";
/// Fallback variable holding the identity provider service-account JSON.
pub const IDENTITY_CREDENTIALS_ENV: &str = "FIREBASE_CREDENTIALS";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub conversation: ConversationConfig,
    pub documents: DocumentsConfig,
    pub vision: VisionConfig,
    pub identity: IdentityConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub body_limit_mb: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Any OpenAI-compatible chat completions endpoint
    OpenAi,
    /// Canned rule-based replies, no network
    Offline,
}

#[derive(Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub stream_idle_timeout_secs: u64,
    /// When false a missing credential starts the server anyway; every
    /// completion then fails with `COMPLETION_NOT_CONFIGURED`
    pub required: bool,
}

// Hand-written so the API key never reaches the logs.
impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("stream_idle_timeout_secs", &self.stream_idle_timeout_secs)
            .field("required", &self.required)
            .finish()
    }
}

impl LlmConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs.max(1))
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ConversationConfig {
    /// Max turns kept per session after each assistant reply
    pub retention_bound: usize,
    pub default_session_id: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    pub max_sessions: usize,
    pub session_ttl_secs: u64,
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DocumentsConfig {
    pub upload_dir: String,
    pub export_dir: String,
    /// Extracted text is cut to this many characters before submission
    pub char_budget: usize,
    pub analyze_prompt: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VisionConfig {
    pub prompt: String,
}

#[derive(Deserialize, Serialize, Clone)]
pub struct IdentityConfig {
    #[serde(default)]
    pub credentials_json: Option<String>,
    pub required: bool,
    /// Require a verified bearer token on every non-public route
    pub protect_routes: bool,
    pub jwks_url: String,
    pub jwks_cache_secs: u64,
}

impl std::fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("credentials_json", &self.credentials_json.as_ref().map(|_| "<redacted>"))
            .field("required", &self.required)
            .field("protect_routes", &self.protect_routes)
            .field("jwks_url", &self.jwks_url)
            .field("jwks_cache_secs", &self.jwks_cache_secs)
            .finish()
    }
}

impl Settings {
    /// Defaults, then `config/settings.toml`, then `APP__*` environment
    /// variables, then the legacy credential variables as fallbacks.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::builder()?
            .add_source(File::with_name("config/settings").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut settings: Settings = config.try_deserialize()?;
        settings.apply_legacy_env(|key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        let builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8000)?
            .set_default("server.body_limit_mb", 25)?
            .set_default("llm.provider", "openai")?
            .set_default("llm.base_url", "https://api.openai.com/v1")?
            .set_default("llm.model", "gpt-4o-mini")?
            .set_default("llm.max_tokens", 1024)?
            .set_default("llm.temperature", 0.7)?
            .set_default("llm.connect_timeout_secs", 10)?
            .set_default("llm.request_timeout_secs", 60)?
            .set_default("llm.stream_idle_timeout_secs", 30)?
            .set_default("llm.required", true)?
            .set_default("conversation.retention_bound", 20)?
            .set_default("conversation.default_session_id", "default")?
            .set_default("conversation.max_sessions", 10_000)?
            .set_default("conversation.session_ttl_secs", 6 * 60 * 60)?
            .set_default("conversation.cleanup_interval_secs", 300)?
            .set_default("documents.upload_dir", "uploads")?
            .set_default("documents.export_dir", "exports")?
            .set_default("documents.char_budget", 12_000)?
            .set_default(
                "documents.analyze_prompt",
                "Analyze the following document and summarize its key points.",
            )?
            .set_default("vision.prompt", "Describe this image in detail.")?
            .set_default("identity.required", true)?
            .set_default("identity.protect_routes", false)?
            .set_default(
                "identity.jwks_url",
                "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com",
            )?
            .set_default("identity.jwks_cache_secs", 3600)?;
        Ok(builder)
    }

    fn apply_legacy_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.llm.api_key.as_deref().map_or(true, str::is_empty) {
            self.llm.api_key = lookup(LLM_API_KEY_ENV).filter(|v| !v.is_empty());
        }
        if self.identity.credentials_json.as_deref().map_or(true, str::is_empty) {
            self.identity.credentials_json =
                lookup(IDENTITY_CREDENTIALS_ENV).filter(|v| !v.is_empty());
        }
    }

    /// Missing required credentials are fatal at startup.
    pub fn validate(&self) -> Result<()> {
        if self.llm.provider == LlmProvider::OpenAi && self.llm.required && self.llm.api_key.is_none() {
            bail!(
                "LLM credential not set: provide APP__LLM__API_KEY or {} (or set llm.required = false)",
                LLM_API_KEY_ENV
            );
        }
        if self.identity.required && self.identity.credentials_json.is_none() {
            bail!(
                "{} not set: provide the service-account JSON (or set identity.required = false)",
                IDENTITY_CREDENTIALS_ENV
            );
        }
        if self.identity.protect_routes && self.identity.credentials_json.is_none() {
            bail!("identity.protect_routes requires identity credentials");
        }
        if self.conversation.retention_bound == 0 {
            bail!("conversation.retention_bound must be at least 1");
        }
        if self.conversation.default_session_id.trim().is_empty() {
            bail!("conversation.default_session_id must not be empty");
        }
        Ok(())
    }

    pub fn upload_dir(&self) -> PathBuf {
        PathBuf::from(&self.documents.upload_dir)
    }

    pub fn export_dir(&self) -> PathBuf {
        PathBuf::from(&self.documents.export_dir)
    }

    /// Defaults only, no file or environment. Used by tests.
    pub fn defaults() -> Result<Self> {
        let settings: Settings = Self::builder()?.build()?.try_deserialize()?;
        Ok(settings)
    }
}
