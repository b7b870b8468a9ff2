//! API routing.

use std::sync::Arc;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use e84_core::ControllerFacade;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use super::{handlers, middleware, ws};

#[derive(OpenApi)]
#[openapi(
    paths(handlers::health, handlers::reset, handlers::set_mode, handlers::stop),
    components(schemas(
        handlers::ErrorResponse,
        handlers::HealthResponse,
        handlers::SuccessResponse,
        handlers::SetModeRequest,
    )),
    tags((name = "e84ctl", description = "SEMI E84 load-port handshake controller"))
)]
struct ApiDoc;

pub fn create_router(facade: Arc<ControllerFacade>) -> Router {
    let api_v1 = Router::new()
        .route("/status", get(handlers::status))
        .route("/reset", post(handlers::reset))
        .route("/mode", post(handlers::set_mode))
        .route("/stop", post(handlers::stop))
        .route("/events", get(ws::events_handler));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/v1", api_v1)
        .with_state(facade)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(axum_middleware::from_fn(middleware::request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
