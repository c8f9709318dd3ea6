//! # Roomcast Control Backend
//!
//! Control backend for multi-room production switchers: authenticates
//! operators, multiplexes persistent WebSocket connections to per-room
//! switcher devices, exposes idempotent stream/record operations over them,
//! and journals sensitive actions for audit.
//!
//! ## Architecture
//!
//! - **domain**: core types (users, roles, scopes) and the error taxonomy
//! - **auth**: session tokens, password hashing, request middleware
//! - **users**: file-backed credential store with legacy-hash upgrade
//! - **rooms**: public/secrets config merge, projections and caching
//! - **device**: switcher wire protocol, client and connection pool
//! - **record**: per-room idempotent record operation state machine
//! - **audit**: redacted, rotating append-only journal
//! - **api**: HTTP routing, DTOs and error mapping

pub mod api;
pub mod audit;
pub mod auth;
pub mod config;
pub mod device;
pub mod domain;
pub mod record;
pub mod rooms;
pub mod shared;
pub mod users;

pub use api::{create_router, AppState};
pub use config::{default_config_path, AppConfig};
