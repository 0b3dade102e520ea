use thiserror::Error;

/// Errors raised while building or evaluating cron expressions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronError {
    /// A positional edit named a field outside 1..=5.
    #[error("Invalid field position {position}: cron expressions have fields 1-5")]
    InvalidPosition { position: u8 },

    /// The expression string or one of its fields cannot be parsed.
    #[error("Invalid cron expression: {0}")]
    InvalidExpression(String),

    /// The next-run search exhausted its horizon without finding a match.
    #[error("No upcoming match for {expression:?} within the search horizon")]
    NoUpcomingMatch { expression: String },
}

pub type Result<T> = std::result::Result<T, CronError>;
