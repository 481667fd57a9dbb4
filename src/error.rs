use thiserror::Error;

/// Fatal errors that abort an analysis run before any statistic is computed.
#[derive(Debug, Error, PartialEq)]
pub enum EngineError {
    #[error("unknown factor '{0}': not a column of the deal table")]
    UnknownFactor(String),

    #[error("no factors requested")]
    EmptyFactorList,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
