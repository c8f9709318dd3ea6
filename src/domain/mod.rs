//! Core domain types: users, roles, scopes and the error taxonomy.

pub mod error;
pub mod scope;
pub mod user;

pub use error::ErrorKind;
pub use scope::Scope;
pub use user::{Role, User, UserSource};
