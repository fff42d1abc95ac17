use crate::agent_loop::run_agent_loop;
use crate::app_state::{AppConfig, AppState};
use crate::engine::tools_as_functions;
use crate::io_struct::{ChatRequest, ChatResponse};
use crate::rate_limit::{Admission, AdmissionGate, EndpointClass};
use crate::session;
use actix_web::{HttpRequest, HttpResponse, HttpServer, get, post, web};
use serde_json::json;
use std::io::Write;
use std::sync::Arc;

pub const SERVICE_NAME: &str = "power-grid-llm-backend";

#[get("/")]
pub async fn root(_req: HttpRequest, _: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "service": "Power Grid LLM API",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}

#[get("/api/health")]
pub async fn health(req: HttpRequest, app_state: web::Data<AppState>) -> HttpResponse {
    let identity = client_identity(&req);
    if let Admission::Denied { retry_after_secs } =
        app_state.gate.admit(&identity, EndpointClass::Info)
    {
        return too_many_requests(retry_after_secs);
    }
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "mcp_connected": app_state.tool_server.is_connected(),
    }))
}

#[get("/api/hello")]
pub async fn hello(_req: HttpRequest, _: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "message": "Hello from Power Grid LLM!",
        "hint": "When is the best time to do laundry?",
    }))
}

#[post("/api/chat")]
pub async fn chat(
    req: HttpRequest,
    body: web::Json<ChatRequest>,
    app_state: web::Data<AppState>,
) -> HttpResponse {
    let identity = client_identity(&req);
    if let Admission::Denied { retry_after_secs } =
        app_state.gate.admit(&identity, EndpointClass::Chat)
    {
        log::debug!("chat admission denied for {}", identity);
        return too_many_requests(retry_after_secs);
    }

    let Some(engine) = app_state.engine.as_ref() else {
        return HttpResponse::InternalServerError()
            .json(json!({"detail": "OPENAI_API_KEY not configured"}));
    };

    // Fast-fail precondition: no orchestration run is started against a
    // dead connection. The tool roster is fixed here for the whole run.
    let tool_specs = match app_state.tool_server.list_tools() {
        Ok(tools) => tools_as_functions(&tools),
        Err(_) => {
            return HttpResponse::ServiceUnavailable()
                .json(json!({"detail": "MCP server not connected"}));
        }
    };

    let request = body.into_inner();
    log::info!(
        "Processing chat request with {} history messages",
        request.history.len()
    );

    let transcript = session::build_transcript(&request.history, &request.message);
    let run = run_agent_loop(
        engine.as_ref(),
        app_state.tool_server.as_ref(),
        &tool_specs,
        &transcript,
        &app_state.loop_config,
    );

    let answer = match tokio::time::timeout(app_state.chat_deadline, run).await {
        Ok(Ok(answer)) => answer,
        Ok(Err(e)) => {
            log::error!("chat run failed: {}", e);
            return HttpResponse::InternalServerError()
                .json(json!({"detail": format!("Chat processing failed: {}", e)}));
        }
        Err(_) => {
            log::error!(
                "chat run exceeded the {}s request deadline",
                app_state.chat_deadline.as_secs()
            );
            return HttpResponse::GatewayTimeout().json(json!({"detail": "Chat request timed out"}));
        }
    };

    let history = session::merge_result(&request.history, &request.message, &answer);
    HttpResponse::Ok().json(ChatResponse {
        response: answer,
        history,
    })
}

fn client_identity(req: &HttpRequest) -> String {
    // Honors forwarding headers set by the fronting proxy.
    req.connection_info()
        .realip_remote_addr()
        .unwrap_or("unknown")
        .to_string()
}

fn too_many_requests(retry_after_secs: u64) -> HttpResponse {
    HttpResponse::TooManyRequests()
        .insert_header(("Retry-After", retry_after_secs.to_string()))
        .json(json!({"detail": "Rate limit exceeded"}))
}

pub async fn periodic_sweep(gate: Arc<AdmissionGate>, interval_secs: u64) {
    loop {
        tokio::time::sleep(std::time::Duration::from_secs(interval_secs)).await;
        gate.sweep();
        log::debug!(
            "admission gate sweep: {} live identity windows",
            gate.tracked_windows()
        );
    }
}

// default level is info
pub fn init_logging() {
    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} - {} - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, log::LevelFilter::Info)
        .init();
}

pub async fn startup(config: AppConfig, app_state: AppState) -> std::io::Result<()> {
    let app_state = web::Data::new(app_state);

    println!("Starting server at {}:{}", config.host, config.port);

    HttpServer::new(move || {
        actix_web::App::new()
            .wrap(actix_web::middleware::Logger::default())
            .app_data(app_state.clone())
            .service(root)
            .service(health)
            .service(hello)
            .service(chat)
    })
    .bind((config.host, config.port))?
    .run()
    .await?;

    std::io::Result::Ok(())
}
