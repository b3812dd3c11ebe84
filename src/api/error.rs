use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("failed to parse backend response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read attachment: {0}")]
    Attachment(#[from] std::io::Error),
}
