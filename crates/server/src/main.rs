//! Tally Server
//!
//! Axum intake gateway for the Tally pipeline. Inbound webhooks are
//! acknowledged immediately - the reply is produced in the background and
//! sent out on the user's channel when it is ready.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use utoipa::{OpenApi, ToSchema};

use tally_core::agents::{
    DataRetrievalAgent, FormattingAgent, PlannerAgent, PromptSet, QualityValidationAgent,
};
use tally_core::audit::SqliteAuditLog;
use tally_core::config::PipelineConfig;
use tally_core::delivery::{DeliveryOutcome, DeliveryUnit};
use tally_core::llm::{CompletionClient, HttpCompletionClient};
use tally_core::models::{Channel, ConversationRequest};
use tally_core::pipeline::{Dispatcher, Orchestrator};
use tally_core::registry::CapabilityRegistry;

mod stubs;

/// Application state
struct AppState {
    dispatcher: Dispatcher,
    audit: Arc<SqliteAuditLog>,
}

type SharedState = Arc<AppState>;

// === API Types ===

#[derive(Deserialize, ToSchema)]
struct InboundMessageRequest {
    request_id: String,
    /// "sms", "chat", or "email"
    channel: String,
    sender_id: String,
    message_text: String,
    #[serde(default)]
    user_context: HashMap<String, String>,
}

#[derive(Serialize, ToSchema)]
struct InboundAck {
    accepted: bool,
    /// True when this request_id was already seen; nothing was started.
    duplicate: bool,
    request_id: String,
}

#[derive(Serialize, ToSchema)]
struct ApiError {
    error: String,
}

#[derive(Serialize, ToSchema)]
struct RequestStatusResponse {
    request_id: String,
    /// "running", "done", "failed" - absent when the id is unknown.
    status: Option<String>,
}

#[derive(Serialize, ToSchema)]
struct AuditEntryResponse {
    agent_name: String,
    input_summary: String,
    output_summary: String,
    duration_ms: u64,
    outcome: String,
}

#[derive(Serialize, ToSchema)]
struct AuditResponse {
    request_id: String,
    entries: Vec<AuditEntryResponse>,
}

fn parse_channel(raw: &str) -> Option<Channel> {
    match raw {
        "sms" => Some(Channel::Sms),
        "chat" => Some(Channel::Chat),
        "email" => Some(Channel::Email),
        _ => None,
    }
}

// === Handlers ===

/// Accept one inbound message and start the pipeline in the background.
///
/// Always answers within milliseconds: the pipeline takes many seconds,
/// and upstream webhook gateways time out long before it finishes. The
/// real reply arrives as a separate outbound message.
#[utoipa::path(
    post,
    path = "/api/v1/messages",
    request_body = InboundMessageRequest,
    responses(
        (status = 202, description = "Message accepted for processing", body = InboundAck),
        (status = 400, description = "Unknown channel", body = ApiError)
    )
)]
async fn receive_message(
    State(state): State<SharedState>,
    Json(req): Json<InboundMessageRequest>,
) -> impl IntoResponse {
    let Some(channel) = parse_channel(&req.channel) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiError {
                error: format!("unknown channel '{}'", req.channel),
            }),
        )
            .into_response();
    };

    let request = ConversationRequest {
        request_id: req.request_id.clone(),
        channel,
        sender_id: req.sender_id,
        message_text: req.message_text,
        received_at: chrono::Utc::now(),
        user_context: req.user_context,
    };

    let started = state.dispatcher.dispatch(request);
    (
        StatusCode::ACCEPTED,
        Json(InboundAck {
            accepted: true,
            duplicate: !started,
            request_id: req.request_id,
        }),
    )
        .into_response()
}

/// Last known pipeline phase for a request.
#[utoipa::path(
    get,
    path = "/api/v1/requests/{id}",
    params(("id" = String, Path, description = "Request id")),
    responses((status = 200, body = RequestStatusResponse))
)]
async fn get_request_status(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Json<RequestStatusResponse> {
    let status = state.dispatcher.status(&id).map(|s| {
        match s {
            tally_core::pipeline::RunStatus::Running => "running",
            tally_core::pipeline::RunStatus::Done => "done",
            tally_core::pipeline::RunStatus::Failed => "failed",
        }
        .to_string()
    });
    Json(RequestStatusResponse {
        request_id: id,
        status,
    })
}

/// Interaction log for a request, oldest entry first.
#[utoipa::path(
    get,
    path = "/api/v1/requests/{id}/audit",
    params(("id" = String, Path, description = "Request id")),
    responses((status = 200, body = AuditResponse))
)]
async fn get_request_audit(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.audit.entries_for_request(&id) {
        Ok(entries) => Json(AuditResponse {
            request_id: id,
            entries: entries
                .into_iter()
                .map(|e| AuditEntryResponse {
                    agent_name: e.agent_name,
                    input_summary: e.input_summary,
                    output_summary: e.output_summary,
                    duration_ms: e.duration_ms,
                    outcome: format!("{:?}", e.outcome).to_lowercase(),
                })
                .collect(),
        })
        .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}

async fn serve_openapi() -> Json<serde_json::Value> {
    Json(serde_json::to_value(ApiDoc::openapi()).unwrap_or_default())
}

// === OpenAPI Definition ===

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Tally API",
        version = "1.0.0",
        description = "Intake gateway for the Tally timesheet assistant"
    ),
    paths(receive_message, get_request_status, get_request_audit),
    components(schemas(
        InboundMessageRequest,
        InboundAck,
        ApiError,
        RequestStatusResponse,
        AuditEntryResponse,
        AuditResponse
    ))
)]
struct ApiDoc;

// === CLI ===

#[derive(Parser, Clone)]
#[command(author, version, about = "Tally - Timesheet assistant over SMS, chat, and email")]
struct Args {
    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the intake gateway (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Audit log location
        #[arg(long, default_value = ".tally/audit.db")]
        audit_db: String,
        /// Optional pipeline config file (JSON)
        #[arg(long)]
        config: Option<String>,
    },
    /// Run one message through the pipeline without the server
    Run {
        /// "sms", "chat", or "email"
        channel: String,
        /// Sender id (phone number, user handle, address)
        sender: String,
        /// The message text
        message: String,
    },
}

fn load_config(path: Option<&str>) -> anyhow::Result<PipelineConfig> {
    match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&content)?)
        }
        None => Ok(PipelineConfig::default()),
    }
}

fn build_orchestrator(
    config: PipelineConfig,
    audit: Arc<SqliteAuditLog>,
) -> anyhow::Result<Arc<Orchestrator>> {
    let client: Arc<dyn CompletionClient> = Arc::new(HttpCompletionClient::from_env()?);
    let prompts = PromptSet::default();

    let planner = PlannerAgent::new(
        client.clone(),
        prompts.clone(),
        config.apology_template.clone(),
    );
    let retrieval = DataRetrievalAgent::new(
        client.clone(),
        Arc::new(CapabilityRegistry::standard()),
        Arc::new(stubs::StubTimesheetClient::new()),
        prompts.clone(),
    );
    let formatter = FormattingAgent::new(client.clone(), prompts.clone(), config.channel_rules.clone());
    let validator = QualityValidationAgent::new(client, prompts);
    let delivery = DeliveryUnit::new(
        Arc::new(stubs::LoggingChannelSender::new()),
        config.delivery_policy.clone(),
    );

    Ok(Arc::new(Orchestrator::new(
        config, planner, retrieval, formatter, validator, delivery, audit,
    )))
}

async fn serve(port: u16, audit_db: &str, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let audit = Arc::new(SqliteAuditLog::open_at(audit_db)?);
    let orchestrator = build_orchestrator(config, audit.clone())?;

    let state: SharedState = Arc::new(AppState {
        dispatcher: Dispatcher::new(orchestrator),
        audit,
    });

    let request_routes = Router::new()
        .route("/:id", get(get_request_status))
        .route("/:id/audit", get(get_request_audit));

    let app = Router::new()
        .route("/api/v1/messages", post(receive_message))
        .nest("/api/v1/requests", request_routes)
        .route("/api/v1/openapi.json", get(serve_openapi))
        .with_state(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    println!("Tally gateway running at http://{}", addr);
    println!("   Messages:  POST /api/v1/messages");
    println!("   Status:    GET  /api/v1/requests/:id");
    println!("   Audit:     GET  /api/v1/requests/:id/audit");
    println!("   OpenAPI:   GET  /api/v1/openapi.json");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn run_once(channel: &str, sender: &str, message: &str) -> anyhow::Result<()> {
    let Some(channel) = parse_channel(channel) else {
        anyhow::bail!("unknown channel '{channel}' (expected sms, chat, or email)");
    };

    let config = PipelineConfig::default();
    let audit = Arc::new(SqliteAuditLog::in_memory()?);
    let orchestrator = build_orchestrator(config, audit.clone())?;

    let request_id = format!("cli-{}", chrono::Utc::now().timestamp_millis());
    let request = ConversationRequest {
        request_id: request_id.clone(),
        channel,
        sender_id: sender.to_string(),
        message_text: message.to_string(),
        received_at: chrono::Utc::now(),
        user_context: HashMap::new(),
    };

    println!("Running pipeline for {request_id}...");
    let outcome = orchestrator.run(request).await;
    match outcome {
        DeliveryOutcome::Done { receipts } => {
            println!("Delivered {} message(s)", receipts.len());
        }
        DeliveryOutcome::Failed { reason } => {
            println!("Delivery failed: {reason}");
        }
    }

    println!("\nInteraction log:");
    for entry in audit.entries_for_request(&request_id)? {
        println!(
            "  {:<28} {:>6}ms  {:?}  {}",
            entry.agent_name, entry.duration_ms, entry.outcome, entry.output_summary
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    match args.command {
        Some(CliCommand::Run {
            channel,
            sender,
            message,
        }) => run_once(&channel, &sender, &message).await,
        Some(CliCommand::Serve {
            port,
            audit_db,
            config,
        }) => serve(port, &audit_db, config.as_deref()).await,
        None => serve(8080, ".tally/audit.db", None).await,
    }
}
