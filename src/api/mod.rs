//! HTTP API: router, error mapping, DTOs and handlers.

pub mod dto;
pub mod error;
pub mod handlers;
pub mod request_id;
pub mod router;

pub use error::{ApiError, ApiResult};
pub use router::{create_router, AppState};
