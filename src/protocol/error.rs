#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("response is missing the header/body separator")]
    MissingHeaderSeparator,
    #[error("malformed status line: {0}")]
    MalformedStatusLine(String),
    #[error("request failed with status {code} - {title}: {detail}")]
    Status {
        code: u16,
        title: String,
        detail: String,
    },
    #[error("event stream exceeded {cap} bytes without completing an event")]
    StreamOverflow { cap: usize },
    #[error("event stream ended in the middle of an event")]
    TruncatedStream,
    #[error("failed to decode event payload: {0}")]
    EventDecode(#[source] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
