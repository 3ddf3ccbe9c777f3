use thiserror::Error;

/// Errors produced while parsing coin amounts such as `"1000uumee,5uatom"`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoinError {
    #[error("invalid coin expression: {0:?}")]
    InvalidCoin(String),

    #[error("invalid denom: {0:?}")]
    InvalidDenom(String),

    #[error("duplicate denomination {0}")]
    DuplicateDenom(String),

    #[error("amount overflow for denom {0}")]
    Overflow(String),
}

/// Errors produced while parsing duration strings such as `"12h"` or `"1h30m"`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DurationError {
    #[error("invalid duration {0:?}")]
    Invalid(String),

    #[error("missing unit in duration {0:?}")]
    MissingUnit(String),

    #[error("unknown unit {unit:?} in duration {input:?}")]
    UnknownUnit { unit: String, input: String },

    #[error("negative duration {0:?} not allowed")]
    Negative(String),

    #[error("duration {0:?} out of range")]
    Overflow(String),
}

/// Logging setup errors
#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("failed to install subscriber: {0}")]
    Init(String),
}
