//!
//! Roomcast control backend: HTTP API over per-room switcher devices.
//! Reads configuration from TOML file (~/.config/roomcast/config.toml).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use roomcast::api::router::AppState;
use roomcast::audit::sink::{AuditSink, RotationLimits};
use roomcast::auth::JwtConfig;
use roomcast::config::AppConfig;
use roomcast::device::DevicePool;
use roomcast::record::ops::PollConfig;
use roomcast::record::RecordRegistry;
use roomcast::rooms::RoomsResolver;
use roomcast::shared::ShutdownSignal;
use roomcast::users::{NewUser, UserStore};
use roomcast::{create_router, default_config_path};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Load configuration ─────────────────────────────────────
    let config_path = std::env::var("ROOMCAST_CONFIG")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| default_config_path());
    let cfg = match AppConfig::load(&config_path) {
        Ok(cfg) => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.logging.level)),
                )
                .init();
            info!("Configuration loaded from {}", config_path.display());
            cfg
        }
        Err(e) => {
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new("info"))
                .init();
            error!("Failed to load config: {}. Using defaults.", e);
            AppConfig::default()
        }
    };

    // Refuse to run with a weak or missing token secret: every session
    // depends on it.
    if cfg.security.jwt_secret.len() < 32 {
        error!(
            "security.jwt_secret missing or shorter than 32 characters; \
             refusing to start"
        );
        return Err("jwt_secret too short".into());
    }
    info!(
        "Session secret loaded ({} characters), tokens expire after {}h",
        cfg.security.jwt_secret.len(),
        cfg.security.jwt_expiration_hours
    );

    info!("Starting Roomcast control backend...");

    let shutdown = ShutdownSignal::new();
    shutdown.listen_for_os_signals();

    // ── Stores and services ────────────────────────────────────
    let users = Arc::new(UserStore::new(
        cfg.paths.users_file.clone(),
        cfg.security.bcrypt_cost,
    ));
    create_default_admin(&users, &cfg).await;

    let rooms = Arc::new(RoomsResolver::new(
        cfg.paths.rooms_file.clone(),
        cfg.paths.rooms_secrets_file.clone(),
        std::time::Duration::from_secs(cfg.rooms.cache_ttl_secs),
    ));
    match rooms.snapshot().await {
        Ok(snapshot) => info!(
            sites = snapshot.counts.total_sites,
            rooms = snapshot.counts.total_rooms,
            warnings = snapshot.warnings.len(),
            "Rooms configuration loaded"
        ),
        Err(e) => warn!("Rooms configuration not loadable yet: {e}"),
    }

    let pool = Arc::new(DevicePool::new(
        cfg.device.connect_timeout(),
        cfg.device.call_timeout(),
        cfg.device.idle_ttl(),
        cfg.device.sweep_interval(),
    ));
    pool.start_sweeper(shutdown.clone());

    let records = Arc::new(RecordRegistry::new(Some(
        cfg.paths.record_state_file.clone(),
    )));
    records.load().await;

    let audit_limits = RotationLimits {
        max_file_bytes: cfg.audit.max_file_bytes,
        max_continuations: cfg.audit.max_continuations,
    };
    let sink = AuditSink::start(
        cfg.paths.audit_dir.clone(),
        audit_limits.clone(),
        shutdown.clone(),
    );

    let jwt_config = JwtConfig::new(
        cfg.security.jwt_secret.clone(),
        cfg.security.jwt_expiration_hours,
    );

    let state = AppState {
        users,
        rooms,
        pool,
        records,
        jwt_config,
        poll: PollConfig::from(&cfg.device),
        audit_dir: cfg.paths.audit_dir.clone(),
        audit_limits,
        started_at: Arc::new(Instant::now()),
    };

    let router = create_router(state, sink);

    // ── HTTP server ────────────────────────────────────────────
    let address = cfg.server.address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!("API server listening on http://{}", address);

    let server_shutdown = shutdown.clone();
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        server_shutdown.wait().await;
        info!("API server received shutdown signal");
    })
    .await?;

    info!("Roomcast control backend shutdown complete");
    Ok(())
}

/// Create a bootstrap admin when the store has no users at all, so a fresh
/// deployment is reachable.
async fn create_default_admin(users: &Arc<UserStore>, cfg: &AppConfig) {
    match users.is_empty().await {
        Ok(true) => {
            info!("User store empty; creating bootstrap admin");
            let request = NewUser {
                username: cfg.security.admin_username.clone(),
                password: cfg.security.admin_password.clone(),
                role: roomcast::domain::Role::Admin,
                note: Some("bootstrap admin".to_string()),
                scope: None,
            };
            match users.create(request).await {
                Ok(user) => {
                    info!("Bootstrap admin created: {}", user.username);
                    warn!("Change the bootstrap admin password immediately");
                }
                Err(e) => error!("Failed to create bootstrap admin: {e}"),
            }
        }
        Ok(false) => {}
        Err(e) => warn!("Cannot inspect user store at startup: {e}"),
    }
}
