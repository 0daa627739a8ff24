/// Close code sent when a scoped room is joined without a resolvable session
pub const CLOSE_AUTHENTICATION_REQUIRED: u16 = 4001;
/// Close code sent when the session's user has no role on the project
pub const CLOSE_ACCESS_DENIED: u16 = 4003;
/// Close code sent to a connection dropped for not keeping up with its room
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

/// Reasons a connection is refused before it joins a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    #[error("authentication required")]
    AuthenticationRequired,
    #[error("access denied")]
    AccessDenied,
}

impl AdmissionError {
    pub fn close_code(&self) -> u16 {
        match self {
            AdmissionError::AuthenticationRequired => CLOSE_AUTHENTICATION_REQUIRED,
            AdmissionError::AccessDenied => CLOSE_ACCESS_DENIED,
        }
    }
}

/// Errors isolated to a single frame or connection inside a room
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("connection {0} is not a member of the room")]
    UnknownConnection(uuid::Uuid),
    #[error("awareness error: {0}")]
    Awareness(String),
}

impl From<yrs::encoding::read::Error> for RelayError {
    fn from(e: yrs::encoding::read::Error) -> Self {
        RelayError::MalformedMessage(e.to_string())
    }
}
