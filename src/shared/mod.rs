//! Cross-cutting helpers.

pub mod shutdown;

pub use shutdown::ShutdownSignal;
