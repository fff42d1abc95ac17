use std::fmt;

#[derive(Debug, Clone)]
pub enum McpError {
    NotConnected,
    ConnectionFailed(String),
    Timeout(String),
    InvalidArguments(String),
    ToolExecution(String),
}

impl fmt::Display for McpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            McpError::NotConnected => write!(f, "not connected to MCP server"),
            McpError::ConnectionFailed(msg) => write!(f, "connection failed: {}", msg),
            McpError::Timeout(msg) => write!(f, "timeout: {}", msg),
            McpError::InvalidArguments(msg) => write!(f, "invalid arguments: {}", msg),
            McpError::ToolExecution(msg) => write!(f, "tool execution error: {}", msg),
        }
    }
}

impl std::error::Error for McpError {}

pub type McpResult<T> = Result<T, McpError>;

#[derive(Debug, Clone)]
pub enum EngineError {
    Http(String),
    Upstream { status: u16, body: String },
    MalformedResponse(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Http(msg) => write!(f, "engine request failed: {}", msg),
            EngineError::Upstream { status, body } => {
                write!(f, "engine returned status {}: {}", status, body)
            }
            EngineError::MalformedResponse(msg) => write!(f, "malformed engine response: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {}

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Clone)]
pub enum AgentError {
    Engine(EngineError),
    RoundBudgetExhausted { rounds: usize },
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::Engine(e) => write!(f, "{}", e),
            AgentError::RoundBudgetExhausted { rounds } => write!(
                f,
                "no final answer after {} tool-call rounds",
                rounds
            ),
        }
    }
}

impl std::error::Error for AgentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AgentError::Engine(e) => Some(e),
            AgentError::RoundBudgetExhausted { .. } => None,
        }
    }
}

pub type AgentResult<T> = Result<T, AgentError>;
