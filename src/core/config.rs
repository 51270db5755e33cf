use anyhow::{Result, bail};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_CONFIG_FILE: &str = "sensorsql.toml";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub athena: AthenaConfig,

    /// Inline table definition. When absent the table is read from Glue.
    #[serde(default)]
    pub schema: Option<SchemaConfig>,

    #[serde(default)]
    pub glue: GlueConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AthenaConfig {
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default)]
    pub catalog: Option<String>,
    #[serde(default)]
    pub work_group: Option<String>,
    #[serde(default)]
    pub output_location: Option<String>,
    /// Overrides `https://athena.{region}.amazonaws.com/`.
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchemaConfig {
    pub table: String,
    pub columns: Vec<ColumnConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColumnConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GlueConfig {
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProviderKind {
    Bedrock,
    #[serde(alias = "openai_compatible")]
    Openai,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: LlmProviderKind,
    #[serde(default = "default_model")]
    pub model: String,
    /// Chat completions URL for `openai`, endpoint override for `bedrock`.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_poll_base_ms")]
    pub poll_base_ms: u64,
    #[serde(default = "default_poll_max_ms")]
    pub poll_max_ms: u64,
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
    #[serde(default = "default_max_transient_retries")]
    pub max_transient_retries: u32,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_generation_timeout_secs")]
    pub generation_timeout_secs: u64,
    #[serde(default = "default_sample_rows")]
    pub sample_rows: usize,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_max_result_rows")]
    pub max_result_rows: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Oldest idle conversations are evicted beyond this many.
    #[serde(default = "default_max_conversations")]
    pub max_conversations: usize,
    /// Conversations idle longer than this are dropped.
    #[serde(default = "default_conversation_idle_secs")]
    pub conversation_idle_secs: u64,
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_database() -> String {
    "iot_database".to_string()
}
fn default_table() -> String {
    "devices".to_string()
}
fn default_llm_provider() -> LlmProviderKind {
    LlmProviderKind::Bedrock
}
fn default_model() -> String {
    "anthropic.claude-3-haiku-20240307-v1:0".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_poll_base_ms() -> u64 {
    1000
}
fn default_poll_max_ms() -> u64 {
    5000
}
fn default_max_wait_secs() -> u64 {
    60
}
fn default_max_transient_retries() -> u32 {
    3
}
fn default_call_timeout_secs() -> u64 {
    10
}
fn default_generation_timeout_secs() -> u64 {
    30
}
fn default_sample_rows() -> usize {
    50
}
fn default_page_size() -> u32 {
    1000
}
fn default_max_result_rows() -> usize {
    10_000
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8501
}
fn default_max_conversations() -> usize {
    1000
}
fn default_conversation_idle_secs() -> u64 {
    3600
}
fn default_max_history_turns() -> usize {
    50
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AthenaConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            database: default_database(),
            catalog: None,
            work_group: None,
            output_location: None,
            endpoint: None,
        }
    }
}

impl Default for GlueConfig {
    fn default() -> Self {
        Self {
            table: default_table(),
            endpoint: None,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_model(),
            base_url: None,
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_base_ms: default_poll_base_ms(),
            poll_max_ms: default_poll_max_ms(),
            max_wait_secs: default_max_wait_secs(),
            max_transient_retries: default_max_transient_retries(),
            call_timeout_secs: default_call_timeout_secs(),
            generation_timeout_secs: default_generation_timeout_secs(),
            sample_rows: default_sample_rows(),
            page_size: default_page_size(),
            max_result_rows: default_max_result_rows(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_conversations: default_max_conversations(),
            conversation_idle_secs: default_conversation_idle_secs(),
            max_history_turns: default_max_history_turns(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl PipelineConfig {
    pub fn poll_base(&self) -> Duration {
        Duration::from_millis(self.poll_base_ms)
    }

    pub fn poll_max(&self) -> Duration {
        Duration::from_millis(self.poll_max_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }
}

impl ServerConfig {
    pub fn conversation_idle(&self) -> Duration {
        Duration::from_secs(self.conversation_idle_secs)
    }
}

impl AppConfig {
    /// Reads `path` when it exists, falls back to defaults otherwise, then applies the
    /// process environment and validates.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let parsed: AppConfig = toml::from_str(&content)?;
            info!("Loaded configuration from {}", path.display());
            parsed
        } else {
            info!(
                "No config file at {}, using defaults and environment.",
                path.display()
            );
            AppConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Environment variables set by the container deployment win over the file.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(bucket) = non_empty("S3_BUCKET") {
            self.athena.output_location = Some(bucket);
        }
        if let Some(database) = non_empty("ATHENA_DATABASE_NAME") {
            self.athena.database = database;
        }
        if let Some(region) = non_empty("AWS_REGION").or_else(|| non_empty("AWS_DEFAULT_REGION")) {
            self.athena.region = region;
        }
        if let Some(level) = non_empty("SENSORSQL_LOG") {
            self.logging.level = level;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let p = &self.pipeline;
        if p.poll_base_ms == 0 || p.poll_max_ms == 0 {
            bail!("pipeline poll intervals must be greater than zero");
        }
        if p.poll_base_ms > p.poll_max_ms {
            bail!(
                "pipeline.poll_base_ms ({}) must not exceed pipeline.poll_max_ms ({})",
                p.poll_base_ms,
                p.poll_max_ms
            );
        }
        if p.max_wait_secs == 0 || p.call_timeout_secs == 0 || p.generation_timeout_secs == 0 {
            bail!("pipeline timeouts must be greater than zero");
        }
        if p.sample_rows == 0 {
            bail!("pipeline.sample_rows must be greater than zero");
        }
        if p.page_size == 0 || p.page_size > 1000 {
            bail!("pipeline.page_size must be between 1 and 1000");
        }
        let server = &self.server;
        if server.max_conversations == 0
            || server.conversation_idle_secs == 0
            || server.max_history_turns == 0
        {
            bail!("server conversation limits must be greater than zero");
        }
        match self.athena.output_location.as_deref() {
            Some(loc) if loc.starts_with("s3://") => {}
            Some(loc) => bail!("athena.output_location must be an s3:// URI, got '{}'", loc),
            None => bail!("athena.output_location is not set (config file or S3_BUCKET)"),
        }
        if let Some(schema) = &self.schema
            && schema.columns.is_empty()
        {
            bail!("schema.columns must list at least one column");
        }
        Ok(())
    }
}
