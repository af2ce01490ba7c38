//! API Server - HTTP server for the REST API
//!
//! Role policy is enforced here, not in any client: viewers may read,
//! admins may mutate, and only super admins reach the account-management
//! routes.

use axum::{
    extract::{FromRequestParts, State},
    http::{header::AUTHORIZATION, request::Parts, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post, put},
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::auth::Claims;
use crate::api::handlers::{self, ApiError, AppState};
use crate::api::{admin, backup, domains, emails, exports, users};
use crate::security::Role;

pub struct ApiServer {
    state: Arc<AppState>,
    addr: String,
}

impl ApiServer {
    pub fn new(state: Arc<AppState>, addr: String) -> Self {
        Self { state, addr }
    }

    /// Build the router with all routes
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        // Public routes (no auth required)
        let public_routes = Router::new()
            .route("/health", get(handlers::health))
            .route("/auth/login", post(handlers::login))
            .route("/auth/setup", post(handlers::setup));

        // Session routes (any authenticated role)
        let session_routes = Router::new()
            .route("/auth/logout", post(handlers::logout))
            .route("/auth/me", get(handlers::me))
            .route("/auth/change-password", post(handlers::change_password))
            .route_layer(middleware::from_fn_with_state(
                self.state.clone(),
                auth_middleware,
            ));

        // Account management (super admin only). The role guard is added
        // before the auth layer so the auth layer runs first.
        let admin_routes = Router::new()
            .route("/auth/admin-list", get(admin::list_admins))
            .route("/auth/admin-create", post(admin::create_admin))
            .route("/auth/admin-reset-password", post(admin::reset_password))
            .route("/auth/admin-update-role", put(admin::update_role))
            .route("/auth/admin-delete", post(admin::delete_admin))
            .route_layer(middleware::from_fn(require_super_admin))
            .route_layer(middleware::from_fn_with_state(
                self.state.clone(),
                auth_middleware,
            ));

        // Resource routes: viewers read, admins mutate
        let resource_routes = Router::new()
            .route("/domains", get(domains::list_domains))
            .route("/domains", post(domains::create_domain))
            .route("/domains/:id", get(domains::get_domain))
            .route("/domains/:id", put(domains::update_domain))
            .route("/domains/:id", delete(domains::delete_domain))
            .route("/domains/:id/discover-users", post(domains::discover_users))
            .route("/users", get(users::list_users))
            .route("/users/:id", get(users::get_user))
            .route("/users/:id", delete(users::delete_user))
            .route("/users/:id/status", patch(users::update_status))
            .route("/users/:id/connect", post(users::connect))
            .route("/users/:id/disconnect", post(users::disconnect))
            .route("/users/:id/backup", post(users::backup_now))
            .route("/users/:id/imap-status", get(users::imap_status))
            .route("/users/:id/stats", get(users::user_stats))
            .route("/emails/search", get(emails::search))
            .route("/emails/bulk", delete(emails::delete_bulk))
            .route("/emails/:id", get(emails::get_email))
            .route("/emails/:id", delete(emails::delete_email))
            .route(
                "/emails/:id/attachments/:index",
                get(emails::get_attachment),
            )
            .route("/exports", post(exports::create_export))
            .route("/exports", get(exports::list_exports))
            .route("/exports/stats/overview", get(exports::stats_overview))
            .route("/exports/:id", get(exports::get_export))
            .route("/exports/:id", delete(exports::delete_export))
            .route("/exports/:id/download", get(exports::download_export))
            .route("/exports/:id/retry", post(exports::retry_export))
            .route("/backup/config", get(backup::get_config))
            .route("/backup/config", put(backup::update_config))
            .route("/backup/manual", post(backup::manual_run))
            .route_layer(middleware::from_fn(require_admin_for_writes))
            .route_layer(middleware::from_fn_with_state(
                self.state.clone(),
                auth_middleware,
            ));

        Router::new()
            .nest(
                "/api",
                public_routes
                    .merge(session_routes)
                    .merge(admin_routes)
                    .merge(resource_routes),
            )
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .with_state(self.state.clone())
    }

    /// Start the API server
    pub async fn run(&self) -> std::io::Result<()> {
        let router = self.router();

        info!("Starting API server on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}

/// Authentication middleware - validates the bearer token
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let auth_header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let token = match auth_header {
        Some(h) if h.starts_with("Bearer ") => &h[7..],
        _ => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ApiError::new("Missing or invalid Authorization header")),
            )
                .into_response();
        }
    };

    match state.jwt_config.validate_token(token) {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            next.run(req).await
        }
        Err(e) => {
            warn!("Invalid JWT token: {}", e);
            (
                StatusCode::UNAUTHORIZED,
                Json(ApiError::new("Invalid or expired token")),
            )
                .into_response()
        }
    }
}

/// Viewers may only read; every mutating method needs the admin role.
async fn require_admin_for_writes(
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let is_read = matches!(*req.method(), Method::GET | Method::HEAD);

    if !is_read {
        let role = req
            .extensions()
            .get::<Claims>()
            .map(Claims::role)
            .unwrap_or(Role::Viewer);
        if role < Role::Admin {
            return (
                StatusCode::FORBIDDEN,
                Json(ApiError::new("Admin role required")),
            )
                .into_response();
        }
    }

    next.run(req).await
}

async fn require_super_admin(
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let role = req
        .extensions()
        .get::<Claims>()
        .map(Claims::role)
        .unwrap_or(Role::Viewer);

    if role < Role::SuperAdmin {
        return (
            StatusCode::FORBIDDEN,
            Json(ApiError::new("Super admin role required")),
        )
            .into_response();
    }

    next.run(req).await
}

/// Extract Claims from request extensions (for handlers)
#[axum::async_trait]
impl<S> FromRequestParts<S> for Claims
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ApiError>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<Claims>().cloned().ok_or((
            StatusCode::UNAUTHORIZED,
            Json(ApiError::new("Not authenticated")),
        ))
    }
}
