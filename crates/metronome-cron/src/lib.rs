//! `metronome-cron` — five-field cron expressions: construction, positional
//! edits, field expansion, and due/next-run evaluation.
//!
//! # Overview
//!
//! [`CronExpression`] is a plain value type holding the five fields
//! (minute, hour, day-of-month, month, day-of-week). Evaluation goes through
//! [`CronExpression::compile`], which expands every field into its matching
//! value set and hands back a [`CompiledExpression`] for repeated
//! [`matches`](CompiledExpression::matches) /
//! [`next_after`](CompiledExpression::next_after) calls.
//!
//! # Field syntax
//!
//! | Form    | Meaning                                  |
//! |---------|------------------------------------------|
//! | `*`     | every value                              |
//! | `5`     | exactly 5                                |
//! | `1,4,7` | any listed value (atoms may be ranges)   |
//! | `9-17`  | the inclusive range                      |
//! | `*/15`  | every 15th value from the field minimum  |
//! | `1-30/10` | every 10th value within the range      |
//!
//! Day-of-week runs Sunday=0 through Saturday=6; `7` is accepted as another
//! spelling of Sunday. When both day fields are restricted a date matches if
//! either side does, the standard cron rule.

pub mod error;
pub mod evaluator;
pub mod expression;
pub mod field;

pub use error::{CronError, Result};
pub use evaluator::{CompiledExpression, SEARCH_HORIZON_DAYS};
pub use expression::CronExpression;
