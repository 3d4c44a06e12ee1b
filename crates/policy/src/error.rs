use thiserror::Error;

pub type Result<T> = std::result::Result<T, PolicyError>;

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("uninitialized field")]
    Builder(#[from] derive_builder::UninitializedFieldError),
    #[error("line has no `=` delimiter")]
    MissingDelimiter,
    #[error("unknown key `{0}`")]
    UnknownKey(String),
    #[error("invalid boolean `{0}`")]
    InvalidBool(String),
    #[error("invalid log level `{0}`")]
    InvalidLogLevel(String),
    #[error("invalid number `{0}`")]
    InvalidNumber(String),
}
