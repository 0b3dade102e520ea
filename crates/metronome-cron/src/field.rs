use std::collections::BTreeSet;

use crate::error::{CronError, Result};

/// Inclusive value bounds and calendar name for one cron field position.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FieldBounds {
    pub name: &'static str,
    pub min: u8,
    pub max: u8,
}

pub(crate) const MINUTE: FieldBounds = FieldBounds {
    name: "minute",
    min: 0,
    max: 59,
};
pub(crate) const HOUR: FieldBounds = FieldBounds {
    name: "hour",
    min: 0,
    max: 23,
};
pub(crate) const DAY_OF_MONTH: FieldBounds = FieldBounds {
    name: "day-of-month",
    min: 1,
    max: 31,
};
pub(crate) const MONTH: FieldBounds = FieldBounds {
    name: "month",
    min: 1,
    max: 12,
};
// 7 is accepted as a synonym for Sunday and normalised to 0 on expansion.
pub(crate) const DAY_OF_WEEK: FieldBounds = FieldBounds {
    name: "day-of-week",
    min: 0,
    max: 7,
};

/// One cron field expanded into the set of calendar values it matches.
///
/// `*` expands to every value in the field's bounds but is remembered as
/// unrestricted: the day-of-month/day-of-week disjunction rule needs to know
/// which of the two day fields were left wide open.
#[derive(Debug, Clone)]
pub struct FieldSet {
    restricted: bool,
    values: BTreeSet<u8>,
}

impl FieldSet {
    /// Expand one raw field. A field is a comma list of atoms, each atom being
    /// `*`, a literal, a range `a-b`, or a step `*/n`, `a-b/n` or `a/n`
    /// (the last meaning "from a to the field maximum, every n").
    pub(crate) fn parse(raw: &str, bounds: FieldBounds) -> Result<Self> {
        if raw == "*" {
            return Ok(Self {
                restricted: false,
                values: full_range(bounds),
            });
        }

        let mut values = BTreeSet::new();
        for atom in raw.split(',') {
            expand_atom(atom, raw, bounds, &mut values)?;
        }
        if values.is_empty() {
            return Err(invalid(bounds, raw, "expands to no values"));
        }
        Ok(Self {
            restricted: true,
            values,
        })
    }

    /// True when the raw field was anything other than `*`.
    pub fn is_restricted(&self) -> bool {
        self.restricted
    }

    /// Membership test for an expanded value.
    pub fn matches(&self, value: u8) -> bool {
        self.values.contains(&value)
    }

    /// Smallest member greater than or equal to `value`, if any.
    pub fn next_at_or_after(&self, value: u8) -> Option<u8> {
        self.values.range(value..).next().copied()
    }
}

fn full_range(bounds: FieldBounds) -> BTreeSet<u8> {
    // Day-of-week stores canonical 0-6; 7 exists only as input spelling.
    let max = if bounds.max == 7 { 6 } else { bounds.max };
    (bounds.min..=max).collect()
}

fn expand_atom(atom: &str, raw: &str, bounds: FieldBounds, into: &mut BTreeSet<u8>) -> Result<()> {
    let (base, step) = match atom.split_once('/') {
        Some((base, step)) => {
            let step: u8 = step
                .parse()
                .map_err(|_| invalid(bounds, raw, &format!("bad step {step:?}")))?;
            if step == 0 {
                return Err(invalid(bounds, raw, "step must be at least 1"));
            }
            (base, step)
        }
        None => (atom, 1),
    };

    let (start, end) = if base == "*" {
        (bounds.min, bounds.max)
    } else if let Some((a, b)) = base.split_once('-') {
        (parse_value(a, raw, bounds)?, parse_value(b, raw, bounds)?)
    } else {
        let v = parse_value(base, raw, bounds)?;
        // A bare value with a step means "from v to the maximum".
        if atom.contains('/') {
            (v, bounds.max)
        } else {
            (v, v)
        }
    };

    if start > end {
        return Err(invalid(
            bounds,
            raw,
            &format!("range {start}-{end} runs backwards"),
        ));
    }

    for v in (start..=end).step_by(step as usize) {
        into.insert(normalise(v, bounds));
    }
    Ok(())
}

fn parse_value(text: &str, raw: &str, bounds: FieldBounds) -> Result<u8> {
    let v: u8 = text
        .parse()
        .map_err(|_| invalid(bounds, raw, &format!("{text:?} is not an integer")))?;
    if v < bounds.min || v > bounds.max {
        return Err(invalid(
            bounds,
            raw,
            &format!("value {v} outside {}-{}", bounds.min, bounds.max),
        ));
    }
    Ok(v)
}

fn normalise(value: u8, bounds: FieldBounds) -> u8 {
    // Sunday may be written as 7; canonical form is 0.
    if bounds.max == 7 && value == 7 {
        0
    } else {
        value
    }
}

fn invalid(bounds: FieldBounds, raw: &str, reason: &str) -> CronError {
    CronError::InvalidExpression(format!("{} field {raw:?}: {reason}", bounds.name))
}
