//! postflow-api - HTTP surface for the Postflow pipeline
//!
//! Drafts are created or generated, reviewed, scheduled and (re-)dispatched
//! through JSON endpoints. Every response is wrapped in
//! `{ "success": bool, "data" | "error" }`.
//!
//! | Method | Path                          | Action                          |
//! |--------|-------------------------------|---------------------------------|
//! | POST   | `/api/posts`                  | create a draft                  |
//! | POST   | `/api/posts/generate`         | generate a draft                |
//! | GET    | `/api/posts?state=&limit=`    | list posts, newest first        |
//! | GET    | `/api/posts/:id`              | one post with platform results  |
//! | GET    | `/api/posts/:id/history`      | audit trail                     |
//! | POST   | `/api/posts/:id/submit`       | draft -> pending_review         |
//! | POST   | `/api/posts/:id/approve`      | approve, optionally schedule    |
//! | POST   | `/api/posts/:id/reject`       | reject with optional reason     |
//! | POST   | `/api/posts/:id/schedule`     | set or change the schedule      |
//! | POST   | `/api/posts/:id/redispatch`   | retry failed platforms          |
//! | GET    | `/api/settings`               | redacted credentials            |
//! | POST   | `/api/settings`               | replace credentials             |

mod error;
mod handlers;

use axum::routing::{get, post};
use axum::Router;
use libpostflow::scheduler::DispatchHandoff;
use libpostflow::service::PostflowService;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use error::{ApiError, ApiResult, Envelope};

#[derive(Clone)]
pub struct AppState {
    pub service: PostflowService,
    /// Running scheduler that takes over re-dispatches. Without one they
    /// run inside the request.
    pub dispatches: Option<DispatchHandoff>,
}

/// Build the application router around a service
pub fn router(service: PostflowService) -> Router {
    build_router(AppState {
        service,
        dispatches: None,
    })
}

/// Build the router, handing re-dispatches to a scheduler loop started with
/// [`libpostflow::scheduler::Scheduler::run_with_handoff`]
pub fn router_with_handoff(service: PostflowService, dispatches: DispatchHandoff) -> Router {
    build_router(AppState {
        service,
        dispatches: Some(dispatches),
    })
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/api/posts",
            get(handlers::list_posts).post(handlers::create_post),
        )
        .route("/api/posts/generate", post(handlers::generate_post))
        .route("/api/generate-content", post(handlers::generate_post))
        .route("/api/posts/:id", get(handlers::get_post))
        .route("/api/posts/:id/history", get(handlers::post_history))
        .route("/api/posts/:id/submit", post(handlers::submit))
        .route("/api/posts/:id/approve", post(handlers::approve))
        .route("/api/posts/:id/reject", post(handlers::reject))
        .route("/api/posts/:id/schedule", post(handlers::schedule))
        .route("/api/posts/:id/redispatch", post(handlers::redispatch))
        .route(
            "/api/settings",
            get(handlers::get_settings).post(handlers::update_settings),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
