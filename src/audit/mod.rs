//! Audit journal: structured, redacted, append-only event records with
//! daily files, size-based continuations and a tolerant read path.

pub mod middleware;
pub mod reader;
pub mod redact;
pub mod sink;

pub use middleware::{audit_middleware, AuditLayerState, AuditMeta};
pub use reader::{list_dates, query, QueryFilters};
pub use redact::redact_value;
pub use sink::{AuditEvent, AuditSink};
