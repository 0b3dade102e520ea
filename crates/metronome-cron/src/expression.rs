use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CronError, Result};

/// Number of whitespace-separated fields in an expression.
pub const FIELD_COUNT: usize = 5;

/// A five-field cron expression: minute, hour, day-of-month, month, day-of-week.
///
/// This is a value type. Positional edits go through [`CronExpression::with_field`],
/// which returns a new expression instead of mutating in place, so a stored
/// expression can never be changed behind a holder's back.
///
/// Field positions are 1-indexed:
///
/// | Position | Field        | Allowed values            |
/// |----------|--------------|---------------------------|
/// | 1        | minute       | 0-59                      |
/// | 2        | hour         | 0-23                      |
/// | 3        | day of month | 1-31                      |
/// | 4        | month        | 1-12                      |
/// | 5        | day of week  | 0-7 (0 and 7 are Sunday)  |
///
/// Serialises as the plain cron string (fields joined by single spaces).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CronExpression {
    fields: [String; FIELD_COUNT],
}

impl CronExpression {
    /// Field position constants for readable [`with_field`](Self::with_field) calls.
    pub const MINUTE: u8 = 1;
    pub const HOUR: u8 = 2;
    pub const DAY_OF_MONTH: u8 = 3;
    pub const MONTH: u8 = 4;
    pub const DAY_OF_WEEK: u8 = 5;

    /// The every-minute expression, `* * * * *`.
    pub fn every_minute() -> Self {
        Self {
            fields: std::array::from_fn(|_| "*".to_string()),
        }
    }

    /// Parse a raw five-field expression.
    ///
    /// Only the shape is enforced here (exactly five non-empty fields); field
    /// syntax and value bounds are checked when the expression is compiled
    /// for evaluation.
    pub fn parse(input: &str) -> Result<Self> {
        let parts: Vec<&str> = input.split_whitespace().collect();
        if parts.len() != FIELD_COUNT {
            return Err(CronError::InvalidExpression(format!(
                "expected {FIELD_COUNT} fields, got {} in {input:?}",
                parts.len()
            )));
        }
        let mut fields = std::array::from_fn(|_| String::new());
        for (slot, part) in fields.iter_mut().zip(parts) {
            *slot = part.to_string();
        }
        Ok(Self { fields })
    }

    /// Return a copy with field `position` (1-indexed) replaced by `value`.
    ///
    /// All other fields keep their current value, so edits to disjoint
    /// positions commute and a later edit to the same position wins.
    pub fn with_field(&self, position: u8, value: impl Into<String>) -> Result<Self> {
        if !(1..=FIELD_COUNT as u8).contains(&position) {
            return Err(CronError::InvalidPosition { position });
        }
        let value = value.into();
        if value.is_empty() || value.contains(char::is_whitespace) {
            return Err(CronError::InvalidExpression(format!(
                "field value {value:?} must be non-empty and contain no whitespace"
            )));
        }
        let mut next = self.clone();
        next.fields[position as usize - 1] = value;
        Ok(next)
    }

    /// Read field `position` (1-indexed).
    pub fn field(&self, position: u8) -> Result<&str> {
        if !(1..=FIELD_COUNT as u8).contains(&position) {
            return Err(CronError::InvalidPosition { position });
        }
        Ok(&self.fields[position as usize - 1])
    }

    pub(crate) fn raw_fields(&self) -> &[String; FIELD_COUNT] {
        &self.fields
    }
}

impl Default for CronExpression {
    fn default() -> Self {
        Self::every_minute()
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fields.join(" "))
    }
}

impl FromStr for CronExpression {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CronExpression {
    type Error = CronError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<CronExpression> for String {
    fn from(expr: CronExpression) -> Self {
        expr.to_string()
    }
}
