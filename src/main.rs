use std::time::Duration;

use clap::Parser;
use grid_llm_backend::app_state::{AppConfig, AppState};
use grid_llm_backend::server;

fn main() -> anyhow::Result<()> {
    let config = AppConfig::parse();
    server::init_logging();

    let app_state = AppState::new(&config)?;
    if config.openai_api_key.is_none() {
        log::warn!("OPENAI_API_KEY not set; chat requests will be rejected");
    }
    log::info!("Allowed origins: {}", config.allowed_origins.join(", "));

    actix_web::rt::System::new().block_on(async move {
        log::info!("Connecting to MCP server at {}", config.mcp_server_url);
        let connect_timeout = Duration::from_secs(config.mcp_connect_timeout_secs);
        match app_state
            .tool_server
            .connect(&config.mcp_server_url, connect_timeout)
            .await
        {
            Ok(()) => log::info!("MCP server connected successfully"),
            Err(e) => log::error!(
                "MCP server connection failed: {}; chat stays unavailable until restart",
                e
            ),
        }

        tokio::spawn(server::periodic_sweep(
            app_state.gate.clone(),
            config.rate_window_secs,
        ));

        let tool_server = app_state.tool_server.clone();
        tokio::select! {
            res = server::startup(config, app_state) => {
                res?;
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down");
                tool_server.disconnect().await;
            }
        }
        Ok(())
    })
}
