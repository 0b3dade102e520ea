use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::debug;

use crate::error::RunnerError;

/// Everything a predicate may consult, captured once per evaluation.
///
/// Predicates stay synchronous: anything that needs awaiting (the mutex
/// existence probe) is resolved by the runner before the chain is walked and
/// handed over here as plain data.
#[derive(Debug, Clone)]
pub struct FilterContext {
    /// The evaluation instant.
    pub now: DateTime<Utc>,
    /// The same instant as wall-clock time in the schedule's timezone.
    pub local_now: NaiveDateTime,
    /// Result of the mutex existence probe. Always false when the schedule
    /// did not request overlap prevention, so no probe ran.
    pub lease_held: bool,
}

type Predicate = Arc<dyn Fn(&FilterContext) -> anyhow::Result<bool> + Send + Sync>;

struct NamedPredicate {
    /// Used for log correlation and error context only.
    label: String,
    test: Predicate,
}

/// Ordered predicate lists gating whether a due task actually executes.
///
/// Must-pass predicates are walked first, then reject predicates, each in
/// insertion order; the first decisive answer stops the walk. A predicate
/// error is not an answer — it propagates as a filter-evaluation failure so
/// a broken filter can never be mistaken for "skip this run".
#[derive(Default)]
pub struct FilterChain {
    filters: Vec<NamedPredicate>,
    rejects: Vec<NamedPredicate>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a must-pass predicate: the run is skipped unless it holds.
    pub fn when<F>(&mut self, predicate: F)
    where
        F: Fn(&FilterContext) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        let label = format!("when#{}", self.filters.len());
        self.when_named(label, predicate);
    }

    /// Append a reject predicate: the run is skipped whenever it holds.
    pub fn skip<F>(&mut self, predicate: F)
    where
        F: Fn(&FilterContext) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        let label = format!("skip#{}", self.rejects.len());
        self.skip_named(label, predicate);
    }

    pub(crate) fn when_named<F>(&mut self, label: impl Into<String>, predicate: F)
    where
        F: Fn(&FilterContext) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.filters.push(NamedPredicate {
            label: label.into(),
            test: Arc::new(predicate),
        });
    }

    pub(crate) fn skip_named<F>(&mut self, label: impl Into<String>, predicate: F)
    where
        F: Fn(&FilterContext) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.rejects.push(NamedPredicate {
            label: label.into(),
            test: Arc::new(predicate),
        });
    }

    /// True iff every must-pass predicate holds and no reject predicate does.
    pub fn passes(&self, ctx: &FilterContext) -> Result<bool, RunnerError> {
        for predicate in &self.filters {
            if !Self::evaluate(predicate, ctx)? {
                debug!(filter = %predicate.label, "must-pass filter declined the run");
                return Ok(false);
            }
        }
        for predicate in &self.rejects {
            if Self::evaluate(predicate, ctx)? {
                debug!(filter = %predicate.label, "reject filter declined the run");
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty() && self.rejects.is_empty()
    }

    fn evaluate(predicate: &NamedPredicate, ctx: &FilterContext) -> Result<bool, RunnerError> {
        (predicate.test)(ctx).map_err(|e| {
            RunnerError::Filter(e.context(format!("predicate {:?}", predicate.label)))
        })
    }
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterChain")
            .field("filters", &self.filters.len())
            .field("rejects", &self.rejects.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ctx() -> FilterContext {
        let now = Utc::now();
        FilterContext {
            now,
            local_now: now.naive_utc(),
            lease_held: false,
        }
    }

    #[test]
    fn empty_chain_passes() {
        assert!(FilterChain::new().passes(&ctx()).unwrap());
    }

    #[test]
    fn failing_must_pass_declines() {
        let mut chain = FilterChain::new();
        chain.when(|_| Ok(false));
        assert!(!chain.passes(&ctx()).unwrap());
    }

    #[test]
    fn firing_reject_declines() {
        let mut chain = FilterChain::new();
        chain.when(|_| Ok(true));
        chain.skip(|_| Ok(true));
        assert!(!chain.passes(&ctx()).unwrap());
    }

    #[test]
    fn quiet_rejects_let_the_run_through() {
        let mut chain = FilterChain::new();
        chain.when(|_| Ok(true));
        chain.skip(|_| Ok(false));
        assert!(chain.passes(&ctx()).unwrap());
    }

    #[test]
    fn walk_stops_at_the_first_decisive_answer() {
        let mut chain = FilterChain::new();
        let later = Arc::new(AtomicUsize::new(0));

        chain.when(|_| Ok(false));
        let counter = Arc::clone(&later);
        chain.when(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        });
        let counter = Arc::clone(&later);
        chain.skip(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        });

        assert!(!chain.passes(&ctx()).unwrap());
        assert_eq!(later.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn must_pass_predicates_run_in_insertion_order() {
        let mut chain = FilterChain::new();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            chain.when(move |_| {
                seen.lock().unwrap().push(tag);
                Ok(true)
            });
        }
        assert!(chain.passes(&ctx()).unwrap());
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn predicate_errors_propagate_rather_than_skip() {
        let mut chain = FilterChain::new();
        chain.when(|_| Err(anyhow::anyhow!("flaky lookup")));
        let err = chain.passes(&ctx()).unwrap_err();
        assert!(matches!(err, RunnerError::Filter(_)));
        assert!(err.to_string().contains("flaky lookup"));
    }

    #[test]
    fn predicates_see_the_context() {
        let mut chain = FilterChain::new();
        chain.skip(|ctx| Ok(ctx.lease_held));

        let mut context = ctx();
        assert!(chain.passes(&context).unwrap());
        context.lease_held = true;
        assert!(!chain.passes(&context).unwrap());
    }
}
