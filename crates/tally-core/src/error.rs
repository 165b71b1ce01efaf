use derive_more::From;
use orion_error::{ErrorCode, StructError, UvsReason};

#[derive(Debug, Clone, PartialEq, thiserror::Error, From)]
pub enum CoreReason {
    #[error("invalid metric configuration")]
    Config,
    #[error("output sink rejected record")]
    Sink,
    #[error("{0}")]
    Uvs(UvsReason),
}

impl ErrorCode for CoreReason {
    fn error_code(&self) -> i32 {
        match self {
            Self::Config => 1001,
            Self::Sink => 1002,
            Self::Uvs(u) => u.error_code(),
        }
    }
}

pub type CoreError = StructError<CoreReason>;
pub type CoreResult<T> = Result<T, CoreError>;

/// Fatal configuration error with a human-readable detail.
pub(crate) fn config_error(detail: impl Into<String>) -> CoreError {
    StructError::from(CoreReason::Config).with_detail(detail.into())
}
