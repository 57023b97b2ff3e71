//! HTTP surface: a thin axum layer over the registry.
//!
//! The core is synchronous; handlers run mutations on the blocking pool
//! and hold no state of their own. Authentication is an API key per
//! request; owner-gated routes check ownership against the projection.

mod auth;
mod error;
mod handlers;

pub use auth::{AuthUser, UserStore};
pub use error::ApiError;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post, put};
use axum::Router;

use crate::registry::Registry;

/// Single-PUT payload ceiling: base64 inflates by 4/3, so this bounds
/// blobs at roughly 96 MiB.
const MAX_BODY_BYTES: usize = 128 * 1024 * 1024;

/// Shared application state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub users: Arc<UserStore>,
}

pub struct Server {
    router: Router,
}

impl Server {
    pub fn new(registry: Arc<Registry>, users: Arc<UserStore>) -> Self {
        let state = AppState { registry, users };
        Self {
            router: build_router(state),
        }
    }

    /// The inner router, for in-process testing with `tower::ServiceExt`.
    pub fn into_router(self) -> Router {
        self.router
    }

    pub async fn serve(self, addr: &str) -> Result<(), std::io::Error> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(addr, "corral listening");
        axum::serve(listener, self.router).await
    }
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/datasets",
            post(handlers::create_dataset).get(handlers::list_datasets),
        )
        .route(
            "/datasets/{dataset}/schemas",
            post(handlers::create_schema).get(handlers::list_schemas),
        )
        .route(
            "/datasets/{dataset}/schemas/{name}",
            get(handlers::get_schema).patch(handlers::update_schema),
        )
        .route(
            "/datasets/{dataset}/schemas/{name}/{version}",
            get(handlers::schema_detail).delete(handlers::deprecate_schema),
        )
        .route("/datasets/{dataset}/owners", get(handlers::list_owners))
        .route(
            "/datasets/{dataset}/owners/{user}",
            put(handlers::add_owner).delete(handlers::remove_owner),
        )
        .route(
            "/datasets/{dataset}/objects",
            post(handlers::create_object).get(handlers::list_objects),
        )
        .route(
            "/datasets/{dataset}/objects/{key}",
            get(handlers::get_object).patch(handlers::update_object),
        )
        .route(
            "/datasets/{dataset}/objects/{uuid}/{version}",
            get(handlers::object_detail).delete(handlers::delete_object),
        )
        .route("/datasets/{dataset}/events", get(handlers::list_events))
        .route(
            "/datasets/{dataset}/events/{event}/accept",
            put(handlers::accept_event),
        )
        .route(
            "/datasets/{dataset}/events/{event}/reject",
            put(handlers::reject_event),
        )
        .route(
            "/datasets/{dataset}/annotations",
            post(handlers::create_annotation).get(handlers::list_annotations),
        )
        .route(
            "/datasets/{dataset}/annotations/{key}",
            get(handlers::get_annotation).patch(handlers::update_annotation),
        )
        .route(
            "/datasets/{dataset}/annotations/{uuid}/{version}",
            get(handlers::annotation_detail).delete(handlers::delete_annotation),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}
