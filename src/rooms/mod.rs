//! Room configuration: deep merge of the public and secrets trees, public
//! projections, and the cached snapshot used on every device request.

pub mod merge;
pub mod snapshot;

pub use merge::{deep_merge, is_secret_key, strip_secret_keys};
pub use snapshot::{Counts, RoomEntry, RoomsResolver, Snapshot, Warning};
