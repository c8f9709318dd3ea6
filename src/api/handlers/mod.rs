//! HTTP handlers.

pub mod admin_users;
pub mod audit;
pub mod auth;
pub mod control;
pub mod health;
pub mod record;
pub mod rooms;

use crate::api::router::AppState;
use crate::auth::AuthenticatedUser;
use crate::device::DeviceTarget;
use crate::domain::scope::scope_allows;
use crate::domain::ErrorKind;

/// Resolve scope for the caller against a (site, room) target.
///
/// Every device-targeting request goes through here, and a denial
/// short-circuits before the connection pool is touched: a denied request
/// must have no device-side effects, not even a connect attempt. Scope is
/// read from the user store on each request (the token only carries the
/// role), so scope edits take effect without re-login.
pub(crate) async fn check_scope(
    state: &AppState,
    user: &AuthenticatedUser,
    site: &str,
    room: &str,
) -> Result<(), ErrorKind> {
    let scope = state.users.get(&user.username).await?.and_then(|u| u.scope);
    if !scope_allows(scope.as_ref(), site, room) {
        return Err(ErrorKind::ScopeDenied {
            site: site.to_string(),
            room: room.to_string(),
        });
    }
    Ok(())
}

/// Scope check plus device target resolution, in that order.
pub(crate) async fn open_room(
    state: &AppState,
    user: &AuthenticatedUser,
    site: &str,
    room: &str,
) -> Result<DeviceTarget, ErrorKind> {
    check_scope(state, user, site, room).await?;
    let snapshot = state.rooms.snapshot().await?;
    snapshot.device_target(site, room)
}
