use thiserror::Error;

pub type HogQLResult<T> = Result<T, HogQLError>;

#[derive(Debug, Error, PartialEq)]
pub enum HogQLError {
    #[error("Unsupported filter value for {field}: {reason}")]
    UnsupportedValue { field: String, reason: String }
}
