//! API router: route table, middleware stack and shared state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    middleware,
    routing::{any, get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{admin_users, audit as audit_handlers, auth, control, health, record, rooms};
use super::request_id::request_id_middleware;
use crate::audit::middleware::{audit_middleware, AuditLayerState};
use crate::audit::sink::{AuditSink, RotationLimits};
use crate::auth::middleware::{admin_middleware, auth_middleware};
use crate::auth::{AuthState, JwtConfig};
use crate::device::DevicePool;
use crate::record::ops::PollConfig;
use crate::record::RecordRegistry;
use crate::rooms::RoomsResolver;
use crate::users::UserStore;

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub users: Arc<UserStore>,
    pub rooms: Arc<RoomsResolver>,
    pub pool: Arc<DevicePool>,
    pub records: Arc<RecordRegistry>,
    pub jwt_config: JwtConfig,
    pub poll: PollConfig,
    pub audit_dir: PathBuf,
    pub audit_limits: RotationLimits,
    pub started_at: Arc<Instant>,
}

/// Build the full router. `sink` feeds the audit middleware; everything
/// else rides in `state`.
pub fn create_router(state: AppState, sink: Arc<AuditSink>) -> Router {
    let auth_state = AuthState {
        jwt_config: state.jwt_config.clone(),
    };
    let audit_state = AuditLayerState { sink };

    // Dynamic device-control namespace. Scope is enforced inside each
    // handler (before any pool access), including the unknown-subpath
    // fallback.
    let device_routes = Router::new()
        .route("/rooms/{site}/{room}/status", get(control::status))
        .route("/rooms/{site}/{room}/stream/start", post(control::stream_start))
        .route("/rooms/{site}/{room}/stream/stop", post(control::stream_stop))
        .route("/rooms/{site}/{room}/inputs", get(control::inputs))
        .route(
            "/rooms/{site}/{room}/audio/mute/toggle",
            post(control::audio_mute_toggle),
        )
        .route(
            "/rooms/{site}/{room}/audio/volume/set",
            post(control::audio_volume_set),
        )
        .route("/rooms/{site}/{room}/record/start", post(record::start))
        .route("/rooms/{site}/{room}/record/stop", post(record::stop))
        .route("/rooms/{site}/{room}/record/pause", post(record::pause))
        .route("/rooms/{site}/{room}/record/resume", post(record::resume))
        .route("/rooms/{site}/{room}/record/status", get(record::status))
        .route("/rooms/{site}/{room}/scenes", get(control::scenes))
        .route("/rooms/{site}/{room}/scene/set", post(control::scene_set))
        .route("/rooms/{site}/{room}/state", get(control::state))
        .route("/rooms/{site}/{room}/summary", get(control::summary))
        .route(
            "/rooms/{site}/{room}/{*rest}",
            any(control::not_implemented),
        );

    let admin_routes = Router::new()
        .route(
            "/admin/users",
            get(admin_users::list).post(admin_users::create),
        )
        .route(
            "/admin/users/{username}",
            put(admin_users::update).delete(admin_users::delete),
        )
        .route("/admin/audit", get(audit_handlers::query))
        .route("/admin/rooms/reload", post(rooms::reload))
        .layer(middleware::from_fn(admin_middleware));

    let protected_routes = Router::new()
        .route("/session", get(auth::session))
        .route("/me", get(auth::me))
        .route("/rooms", get(rooms::list))
        .route("/rooms/full", get(rooms::list_full))
        .merge(device_routes)
        .merge(admin_routes)
        // Audit capture runs inside auth, so the journal sees the caller.
        .layer(middleware::from_fn_with_state(
            audit_state,
            audit_middleware,
        ))
        .layer(middleware::from_fn_with_state(auth_state, auth_middleware));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/login", post(auth::login))
        .merge(protected_routes)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
}
