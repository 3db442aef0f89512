use problems_protocol::ErrorCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProblemsError>;

#[derive(Error, Debug)]
pub enum ProblemsError {
    #[error("Requested Entry does not exist")]
    BadAddress,

    #[error("You are not authorized to access the problem")]
    AccessDeniedRead,

    #[error("You are not authorized to delete the problem")]
    AccessDeniedDelete,

    #[error("You are not authorized to modify the problem")]
    AccessDeniedWrite,

    #[error("{0}")]
    AuthFailure(String),

    #[error("{0}")]
    LimitsExceeded(String),

    #[error("{0}")]
    InvalidElement(String),

    #[error("{0}")]
    TaskFailed(String),

    #[error("Requested object no longer exists")]
    ObjectGone,

    #[error("Too many open sessions")]
    CapacityExceeded,

    #[error("{0}")]
    InvalidRequest(String),

    #[error("storage error: {0}")]
    Store(String),
}

impl ProblemsError {
    /// Convert to protocol error code and sanitized message.
    pub fn to_error_code(&self) -> (ErrorCode, String) {
        match self {
            ProblemsError::BadAddress => (ErrorCode::BadAddress, self.to_string()),
            ProblemsError::AccessDeniedRead => (ErrorCode::AccessDeniedRead, self.to_string()),
            ProblemsError::AccessDeniedDelete => (ErrorCode::AccessDeniedDelete, self.to_string()),
            ProblemsError::AccessDeniedWrite => (ErrorCode::AccessDeniedWrite, self.to_string()),
            ProblemsError::AuthFailure(_) => (ErrorCode::AuthFailure, self.to_string()),
            ProblemsError::LimitsExceeded(_) => (ErrorCode::LimitsExceeded, self.to_string()),
            ProblemsError::InvalidElement(_) => (ErrorCode::InvalidElement, self.to_string()),
            ProblemsError::TaskFailed(_) => (ErrorCode::TaskFailed, self.to_string()),
            ProblemsError::ObjectGone => (ErrorCode::ObjectGone, self.to_string()),
            ProblemsError::CapacityExceeded => (ErrorCode::CapacityExceeded, self.to_string()),
            ProblemsError::InvalidRequest(_) => (ErrorCode::InvalidRequest, self.to_string()),
            ProblemsError::Store(_) => (ErrorCode::ServerError, "internal storage error".to_string()),
        }
    }
}
