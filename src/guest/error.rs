#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid guest uuid: {0}")]
    InvalidGuestUuid(String),
    #[error("invalid guest ref: {0}")]
    InvalidGuestRef(String),
}
pub type Result<T> = std::result::Result<T, Error>;
