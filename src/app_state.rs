use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use crate::agent_loop::{DEFAULT_MAX_ROUNDS, LoopConfig};
use crate::engine::{EngineClient, ReasoningEngine};
use crate::mcp_client::ToolServer;
use crate::rate_limit::{AdmissionGate, GateConfig};

#[derive(Parser, Debug, Clone)]
#[command(name = "grid-llm-backend")]
#[command(about = "Power Grid LLM API backend")]
pub struct AppConfig {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    #[arg(long, env = "MCP_SERVER_URL", default_value = "http://mcp-server:8080/mcp")]
    pub mcp_server_url: String,

    #[arg(long, env = "MCP_CONNECT_TIMEOUT_SECS", default_value_t = 30)]
    pub mcp_connect_timeout_secs: u64,

    #[arg(long, env = "MCP_INVOKE_TIMEOUT_SECS", default_value_t = 30)]
    pub mcp_invoke_timeout_secs: u64,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    pub openai_base_url: String,

    #[arg(long, env = "OPENAI_MODEL", default_value = "gpt-4o")]
    pub model: String,

    #[arg(long, env = "ENGINE_TIMEOUT_SECS", default_value_t = 60)]
    pub engine_timeout_secs: u64,

    #[arg(long, env = "CHAT_DEADLINE_SECS", default_value_t = 120)]
    pub chat_deadline_secs: u64,

    #[arg(long, env = "MAX_TOOL_ROUNDS", default_value_t = DEFAULT_MAX_ROUNDS)]
    pub max_tool_rounds: usize,

    #[arg(long, env = "HEALTH_RATE_LIMIT", default_value_t = 60)]
    pub health_rate_limit: u32,

    #[arg(long, env = "CHAT_RATE_LIMIT", default_value_t = 10)]
    pub chat_rate_limit: u32,

    #[arg(long, env = "RATE_WINDOW_SECS", default_value_t = 60)]
    pub rate_window_secs: u64,

    /// Caller origins allowed by the fronting proxy; parsed here so the
    /// deployment has one source of truth for the value.
    #[arg(long, env = "ALLOWED_ORIGINS", default_value = "http://localhost:3001", value_delimiter = ',')]
    pub allowed_origins: Vec<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub tool_server: Arc<ToolServer>,
    pub engine: Option<Arc<dyn ReasoningEngine>>,
    pub gate: Arc<AdmissionGate>,
    pub loop_config: LoopConfig,
    pub chat_deadline: Duration,
}

impl AppState {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let engine: Option<Arc<dyn ReasoningEngine>> = match &config.openai_api_key {
            Some(api_key) => {
                let client = reqwest::Client::builder()
                    .timeout(Duration::from_secs(config.engine_timeout_secs))
                    .build()?;
                Some(Arc::new(EngineClient::new(
                    client,
                    config.openai_base_url.clone(),
                    api_key.clone(),
                    config.model.clone(),
                )))
            }
            None => None,
        };

        let gate = AdmissionGate::new(GateConfig {
            info_limit: config.health_rate_limit,
            chat_limit: config.chat_rate_limit,
            window: Duration::from_secs(config.rate_window_secs),
        });

        Ok(AppState {
            tool_server: Arc::new(ToolServer::new(Duration::from_secs(
                config.mcp_invoke_timeout_secs,
            ))),
            engine,
            gate: Arc::new(gate),
            loop_config: LoopConfig {
                max_rounds: config.max_tool_rounds,
            },
            chat_deadline: Duration::from_secs(config.chat_deadline_secs),
        })
    }
}
