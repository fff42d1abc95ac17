//! Supervised connection to the MCP tool server.
//!
//! One `ToolServer` exists per process. It is connected once at startup,
//! shared by every in-flight chat request for tool listing and invocation,
//! and drained exactly once at shutdown. The tool roster is discovered at
//! connect time and cached for the life of the connection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use rmcp::{
    RoleClient, ServiceExt,
    model::{CallToolRequestParam, Tool},
    service::RunningService,
    transport::StreamableHttpClientTransport,
};

use crate::agent_loop::ToolInvoker;
use crate::errors::{McpError, McpResult};

type McpClient = RunningService<RoleClient, ()>;

const DRAIN_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Draining,
}

struct Inner {
    state: ConnectionState,
    client: Option<Arc<McpClient>>,
    tools: Vec<Tool>,
}

pub struct ToolServer {
    inner: RwLock<Inner>,
    in_flight: AtomicUsize,
    invoke_timeout: Duration,
}

impl ToolServer {
    pub fn new(invoke_timeout: Duration) -> Self {
        ToolServer {
            inner: RwLock::new(Inner {
                state: ConnectionState::Disconnected,
                client: None,
                tools: Vec::new(),
            }),
            in_flight: AtomicUsize::new(0),
            invoke_timeout,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.read().unwrap().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Cached tool roster. Only valid while connected; the cache is
    /// invalidated by nothing short of a reconnect (process restart).
    pub fn list_tools(&self) -> McpResult<Vec<Tool>> {
        let inner = self.inner.read().unwrap();
        match inner.state {
            ConnectionState::Connected => Ok(inner.tools.clone()),
            _ => Err(McpError::NotConnected),
        }
    }

    /// Establish the session and run tool discovery under one deadline.
    /// A failed attempt falls back to `Disconnected`; retry is a process
    /// restart, not an in-process loop.
    pub async fn connect(&self, url: &str, timeout: Duration) -> McpResult<()> {
        {
            let mut inner = self.inner.write().unwrap();
            if inner.state != ConnectionState::Disconnected {
                return Err(McpError::ConnectionFailed(format!(
                    "connect attempted while {:?}",
                    inner.state
                )));
            }
            inner.state = ConnectionState::Connecting;
        }

        match tokio::time::timeout(timeout, Self::establish(url)).await {
            Ok(Ok((client, tools))) => {
                let names: Vec<&str> = tools.iter().map(|t| t.name.as_ref()).collect();
                log::info!("Available MCP tools: [{}]", names.join(", "));
                let mut inner = self.inner.write().unwrap();
                inner.client = Some(Arc::new(client));
                inner.tools = tools;
                inner.state = ConnectionState::Connected;
                Ok(())
            }
            Ok(Err(e)) => {
                self.inner.write().unwrap().state = ConnectionState::Disconnected;
                Err(e)
            }
            Err(_) => {
                self.inner.write().unwrap().state = ConnectionState::Disconnected;
                Err(McpError::Timeout(format!(
                    "connecting to {} took longer than {:?}",
                    url, timeout
                )))
            }
        }
    }

    async fn establish(url: &str) -> McpResult<(McpClient, Vec<Tool>)> {
        let transport = StreamableHttpClientTransport::from_uri(url.to_string());
        let client = ().serve(transport).await.map_err(|e| {
            McpError::ConnectionFailed(format!("initialize streamable client: {}", e))
        })?;
        let tools = client
            .peer()
            .list_all_tools()
            .await
            .map_err(|e| McpError::ConnectionFailed(format!("tool discovery: {}", e)))?;
        Ok((client, tools))
    }

    /// Forward one tool call to the remote server. Invocations are
    /// independent RPCs over the shared session; concurrent callers do not
    /// serialize behind one another.
    pub async fn invoke(&self, tool_name: &str, arguments_json: &str) -> McpResult<String> {
        let client = {
            let inner = self.inner.read().unwrap();
            match inner.state {
                ConnectionState::Connected => {
                    inner.client.clone().ok_or(McpError::NotConnected)?
                }
                _ => return Err(McpError::NotConnected),
            }
        };
        let arguments = parse_arguments(arguments_json)?;

        let _guard = InFlightGuard::enter(&self.in_flight);
        let request = CallToolRequestParam {
            name: tool_name.to_string().into(),
            arguments,
        };
        let result = tokio::time::timeout(self.invoke_timeout, client.call_tool(request))
            .await
            .map_err(|_| {
                McpError::Timeout(format!(
                    "tool '{}' did not return within {:?}",
                    tool_name, self.invoke_timeout
                ))
            })?
            .map_err(|e| McpError::ToolExecution(format!("tool '{}': {}", tool_name, e)))?;

        serde_json::to_string(&result)
            .map_err(|e| McpError::ToolExecution(format!("serialize result of '{}': {}", tool_name, e)))
    }

    /// Drain in-flight invocations, then close the session. Called once,
    /// at process shutdown.
    pub async fn disconnect(&self) {
        let client = {
            let mut inner = self.inner.write().unwrap();
            if inner.state != ConnectionState::Connected {
                inner.state = ConnectionState::Disconnected;
                return;
            }
            inner.state = ConnectionState::Draining;
            inner.tools.clear();
            inner.client.take()
        };

        let deadline = tokio::time::Instant::now() + DRAIN_WAIT;
        while self.in_flight.load(Ordering::Acquire) > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        if let Some(client) = client {
            match Arc::try_unwrap(client) {
                Ok(client) => {
                    if let Err(e) = client.cancel().await {
                        log::warn!("error closing MCP session: {}", e);
                    }
                }
                Err(_) => {
                    log::warn!("MCP session still in use after drain wait; dropping handle");
                }
            }
        }

        self.inner.write().unwrap().state = ConnectionState::Disconnected;
        log::info!("MCP server disconnected");
    }
}

#[async_trait]
impl ToolInvoker for ToolServer {
    async fn invoke(&self, tool_name: &str, arguments_json: &str) -> McpResult<String> {
        ToolServer::invoke(self, tool_name, arguments_json).await
    }
}

fn parse_arguments(
    arguments_json: &str,
) -> McpResult<Option<serde_json::Map<String, serde_json::Value>>> {
    let trimmed = arguments_json.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed).map(Some).map_err(|e| {
        McpError::InvalidArguments(format!("tool arguments are not a JSON object: {}", e))
    })
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl<'a> InFlightGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        InFlightGuard(counter)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}
