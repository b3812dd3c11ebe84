use thiserror::Error;

use crate::api::ApiError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("a turn is already streaming for this session")]
    Busy,

    #[error("no session is loaded")]
    NoSession,

    #[error("no approval is pending")]
    NoPendingApproval,

    #[error("no question is pending")]
    NoPendingQuestion,

    #[error(transparent)]
    Api(#[from] ApiError),
}
