use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the race room lobby.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sse::session_stream,
        crate::routes::lobby::create_session,
        crate::routes::lobby::join_session,
        crate::routes::lobby::start_session,
        crate::routes::lobby::finish_session,
        crate::routes::lobby::adjust_score,
        crate::routes::lobby::leave_session,
        crate::routes::lobby::current_session,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::health::HealthStatus,
            crate::dto::lobby::CreateSessionRequest,
            crate::dto::lobby::CreateSessionResponse,
            crate::dto::lobby::AdjustScoreRequest,
            crate::dto::lobby::AdjustScoreResponse,
            crate::dto::lobby::SessionViewResponse,
            crate::dto::lobby::PlayerSummary,
            crate::dto::lobby::SessionStatusDto,
            crate::dto::sse::Handshake,
            crate::dto::sse::SystemStatus,
            crate::dto::sse::SessionClosedEvent,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sse", description = "Server-sent events streams"),
        (name = "lobby", description = "Session intents of the local participant"),
    )
)]
/// OpenAPI document of the service.
pub struct ApiDoc;
