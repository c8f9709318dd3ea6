use thiserror::Error;

/// Error taxonomy for every operation in the service.
///
/// Device-protocol failures are caught at the operation boundary and mapped
/// into one of these; a raw transport error never reaches a client. The API
/// layer maps each variant to an HTTP status and a stable wire code.
#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("Access denied")]
    AuthDenied,

    #[error("No access to {site}/{room}")]
    ScopeDenied { site: String, room: String },

    #[error("Admin role required")]
    AdminOnly,

    #[error("Rooms configuration failed to load: {0}")]
    ConfigLoadFailed(String),

    #[error("Room {site}/{room} is not configured")]
    RoomNotConfigured { site: String, room: String },

    #[error("Route not implemented")]
    RouteNotImplemented,

    #[error("Device did not converge: {0}")]
    DeviceTimeout(String),

    #[error("Device error: {0}")]
    DeviceError(String),

    #[error("Validation: {0}")]
    Validation(String),

    #[error("User already exists: {0}")]
    DuplicateUser(String),

    #[error("User {0} is managed externally and cannot be modified")]
    ExternalUserImmutable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ErrorKind {
    /// Stable wire code carried in every error response.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthDenied => "AUTH_DENIED",
            Self::ScopeDenied { .. } => "SCOPE_DENIED",
            Self::AdminOnly => "ADMIN_ONLY",
            Self::ConfigLoadFailed(_) => "CONFIG_LOAD_FAILED",
            Self::RoomNotConfigured { .. } => "ROOM_NOT_CONFIGURED",
            Self::RouteNotImplemented => "ROUTE_NOT_IMPLEMENTED",
            Self::DeviceTimeout(_) => "DEVICE_TIMEOUT",
            Self::DeviceError(_) => "DEVICE_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::DuplicateUser(_) => "DUPLICATE_USER",
            Self::ExternalUserImmutable(_) => "EXTERNAL_USER_IMMUTABLE",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ErrorKind::AuthDenied.code(), "AUTH_DENIED");
        assert_eq!(
            ErrorKind::ScopeDenied {
                site: "a".into(),
                room: "b".into()
            }
            .code(),
            "SCOPE_DENIED"
        );
        assert_eq!(
            ErrorKind::DeviceTimeout("poll".into()).code(),
            "DEVICE_TIMEOUT"
        );
    }
}
