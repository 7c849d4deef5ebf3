//! Relay Server - pub/sub broker process
//!
//! Runs a broker with a file-backed undelivered log, attaches the example
//! subscribers and serves an HTTP admin API on top of it.

mod subscribers;

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use relay_core::Broker;
use relay_types::{BrokerConfig, Error, Payload, Priority, TopicInfo, TopicStats, DEFAULT_PRIORITY};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

// ==================== Config ====================

/// Process configuration, from flags or the environment
#[derive(Debug, Clone, Parser)]
#[command(author, version, about = "Relay pub/sub broker")]
struct ServerConfig {
    /// Listen address
    #[arg(long, env = "RELAY_ADDR", default_value = "127.0.0.1:3000")]
    addr: String,
    /// Undelivered log directory
    #[arg(long, env = "RELAY_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,
    /// Topics created at startup
    #[arg(long, env = "RELAY_TOPICS", value_delimiter = ',', default_value = "news,sports")]
    topics: Vec<String>,
}

impl ServerConfig {
    /// Startup topics with blanks from stray commas dropped
    fn topic_names(&self) -> Vec<&str> {
        self.topics
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .collect()
    }

    fn broker_config(&self) -> BrokerConfig {
        BrokerConfig::default().with_undelivered_dir(&self.data_dir)
    }
}

// ==================== App State ====================

/// Shared application state
#[derive(Clone)]
struct AppState {
    broker: Arc<Broker>,
}

// ==================== Request/Response Types ====================

/// Create topic request
#[derive(Debug, Deserialize, ToSchema)]
struct CreateTopicRequest {
    /// Name of the topic to create
    name: String,
}

/// Publish message request
#[derive(Debug, Deserialize, ToSchema)]
struct PublishRequest {
    /// Message payload (any JSON value)
    #[schema(value_type = Object)]
    payload: Payload,
    /// Message priority (lower = more urgent, default 1)
    #[serde(default)]
    priority: Option<Priority>,
}

/// Publish response
#[derive(Debug, Serialize, ToSchema)]
struct PublishResponse {
    /// Sequence number assigned within the topic
    sequence: u64,
}

/// Replay response
#[derive(Debug, Serialize, ToSchema)]
struct ReplayResponse {
    /// Number of messages re-published
    replayed: usize,
}

/// API Error response
#[derive(Debug, Serialize, ToSchema)]
struct ApiErrorBody {
    /// Error message
    error: String,
    /// Error code
    code: String,
}

/// Health check response
#[derive(Debug, Serialize, ToSchema)]
struct HealthResponse {
    /// Health status
    status: String,
    /// Server version
    version: String,
}

// ==================== Error Handling ====================

/// Wrapper for Relay errors to implement IntoResponse
struct AppError(Error);

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = match &self.0 {
            Error::UnknownTopic(_) => (StatusCode::NOT_FOUND, "UNKNOWN_TOPIC"),
            Error::Persistence { .. } => (StatusCode::SERVICE_UNAVAILABLE, "PERSISTENCE_FAILURE"),
            Error::Serialization(_) => (StatusCode::BAD_REQUEST, "INVALID_PAYLOAD"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = Json(ApiErrorBody {
            error: self.0.to_string(),
            code: code.to_string(),
        });

        (status, body).into_response()
    }
}

// ==================== OpenAPI Documentation ====================

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Relay API",
        version = "0.1.0",
        description = "Relay - in-process pub/sub broker admin API",
        license(name = "MIT OR Apache-2.0")
    ),
    servers(
        (url = "http://localhost:3000", description = "Local development server")
    ),
    paths(
        health,
        list_topics,
        create_topic,
        get_topic,
        get_topic_stats,
        publish_message,
        replay_topic,
    ),
    components(
        schemas(
            HealthResponse,
            TopicInfo,
            TopicStats,
            CreateTopicRequest,
            PublishRequest,
            PublishResponse,
            ReplayResponse,
            ApiErrorBody,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "topics", description = "Topic management endpoints"),
        (name = "messages", description = "Publish and replay endpoints")
    )
)]
struct ApiDoc;

// ==================== Handlers ====================

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Server is healthy", body = HealthResponse)
    )
)]
async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// List all topics
#[utoipa::path(
    get,
    path = "/api/v1/topics",
    tag = "topics",
    responses(
        (status = 200, description = "List of all topics", body = Vec<TopicInfo>)
    )
)]
async fn list_topics(State(state): State<AppState>) -> Json<Vec<TopicInfo>> {
    Json(state.broker.list_topics())
}

/// Create a topic (idempotent)
#[utoipa::path(
    post,
    path = "/api/v1/topics",
    tag = "topics",
    request_body = CreateTopicRequest,
    responses(
        (status = 201, description = "Topic created", body = TopicInfo),
        (status = 200, description = "Topic already existed", body = TopicInfo)
    )
)]
async fn create_topic(
    State(state): State<AppState>,
    Json(req): Json<CreateTopicRequest>,
) -> Result<(StatusCode, Json<TopicInfo>), AppError> {
    let subscriber = subscribers::logging(&req.name);
    let (topic, created) = state.broker.create_topic_with(req.name, [subscriber]);

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(topic)))
}

/// Get topic details
#[utoipa::path(
    get,
    path = "/api/v1/topics/{name}",
    tag = "topics",
    params(
        ("name" = String, Path, description = "Topic name")
    ),
    responses(
        (status = 200, description = "Topic details", body = TopicInfo),
        (status = 404, description = "Topic not found", body = ApiErrorBody)
    )
)]
async fn get_topic(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<TopicInfo>, AppError> {
    let topic = state
        .broker
        .get_topic(&name)
        .ok_or(Error::UnknownTopic(name))?;

    Ok(Json(topic))
}

/// Get topic statistics
#[utoipa::path(
    get,
    path = "/api/v1/topics/{name}/stats",
    tag = "topics",
    params(
        ("name" = String, Path, description = "Topic name")
    ),
    responses(
        (status = 200, description = "Topic statistics", body = TopicStats),
        (status = 404, description = "Topic not found", body = ApiErrorBody)
    )
)]
async fn get_topic_stats(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<TopicStats>, AppError> {
    let stats = state.broker.topic_stats(&name).await?;
    Ok(Json(stats))
}

/// Publish a message to a topic
#[utoipa::path(
    post,
    path = "/api/v1/topics/{name}/messages",
    tag = "messages",
    params(
        ("name" = String, Path, description = "Topic name")
    ),
    request_body = PublishRequest,
    responses(
        (status = 202, description = "Message accepted for delivery", body = PublishResponse),
        (status = 404, description = "Topic not found", body = ApiErrorBody)
    )
)]
async fn publish_message(
    State(state): State<AppState>,
    Path(topic_name): Path<String>,
    Json(req): Json<PublishRequest>,
) -> Result<(StatusCode, Json<PublishResponse>), AppError> {
    let priority = req.priority.unwrap_or(DEFAULT_PRIORITY);
    let sequence = state
        .broker
        .publish(&topic_name, req.payload, priority)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(PublishResponse { sequence })))
}

/// Replay undelivered messages of a topic
#[utoipa::path(
    post,
    path = "/api/v1/topics/{name}/replay",
    tag = "messages",
    params(
        ("name" = String, Path, description = "Topic name")
    ),
    responses(
        (status = 200, description = "Undelivered messages re-published", body = ReplayResponse),
        (status = 404, description = "Topic not found", body = ApiErrorBody),
        (status = 503, description = "Undelivered log unavailable", body = ApiErrorBody)
    )
)]
async fn replay_topic(
    State(state): State<AppState>,
    Path(topic_name): Path<String>,
) -> Result<Json<ReplayResponse>, AppError> {
    let replayed = state.broker.replay(&topic_name).await?;
    Ok(Json(ReplayResponse { replayed }))
}

// ==================== Router ====================

fn create_router(state: AppState) -> Router {
    Router::new()
        // Swagger UI
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Health
        .route("/health", get(health))
        // Topics
        .route("/api/v1/topics", get(list_topics).post(create_topic))
        .route("/api/v1/topics/:name", get(get_topic))
        .route("/api/v1/topics/:name/stats", get(get_topic_stats))
        // Messages
        .route("/api/v1/topics/:name/messages", post(publish_message))
        .route("/api/v1/topics/:name/replay", post(replay_topic))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ==================== Main ====================

/// Replay each topic's undelivered log, logging the topics that fail
///
/// Returns the number of messages re-published.
async fn replay_pending(broker: &Broker, topics: &[&str]) -> usize {
    let mut replayed = 0;
    for topic in topics {
        match broker.replay(topic).await {
            Ok(count) => replayed += count,
            Err(e) => error!(topic = %topic, error = %e, "Startup replay failed"),
        }
    }
    replayed
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::parse();

    // Create broker with a file-backed undelivered log
    let broker = Arc::new(Broker::from_config(&config.broker_config()).await?);

    for topic in config.topic_names() {
        broker.create_topic(topic);
    }
    subscribers::attach_examples(&broker)?;

    // Pick up whatever failed before the last shutdown
    replay_pending(&broker, &config.topic_names()).await;

    // Create app state
    let state = AppState { broker };

    // Create router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.addr).await?;

    info!("Relay server listening on {}", config.addr);
    info!("Swagger UI: http://{}/swagger-ui/", config.addr);
    info!("Health check: http://{}/health", config.addr);

    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_storage::{FileLog, UndeliveredLog};
    use serde_json::json;

    #[test]
    fn test_config_defaults() {
        let config = ServerConfig::try_parse_from(["relay"]).unwrap();

        assert_eq!(config.addr, "127.0.0.1:3000");
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.topic_names(), vec!["news", "sports"]);
    }

    #[test]
    fn test_config_from_flags() {
        let config = ServerConfig::try_parse_from([
            "relay",
            "--topics",
            "alerts, ,metrics",
            "--data-dir",
            "/tmp/relay",
            "--addr",
            "0.0.0.0:8080",
        ])
        .unwrap();

        assert_eq!(config.addr, "0.0.0.0:8080");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/relay"));
        assert_eq!(config.topic_names(), vec!["alerts", "metrics"]);
    }

    #[tokio::test]
    async fn test_replay_pending_skips_failing_topic() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileLog::open(dir.path()).await.unwrap();

        // a directory where the news log should be makes every read fail
        std::fs::create_dir(log.path_for("news")).unwrap();
        log.append("sports", &json!("Match postponed")).await.unwrap();

        let log = Arc::new(log);
        let broker = Broker::with_log(log.clone());
        broker.create_topic("news");
        broker.create_topic("sports");

        let replayed = replay_pending(&broker, &["news", "sports"]).await;

        assert_eq!(replayed, 1);
        assert!(!log.has_pending("sports").await.unwrap());
    }
}
