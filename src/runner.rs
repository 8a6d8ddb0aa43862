//! Runner
//!
//! Evaluates checks, classifies utilization against the warning and error
//! thresholds, and decides the exit status of a run.

use crate::check::{Check, CheckError, Expansion};
use crate::report::{error_chain, Reporter};
use crate::session::Session;
use futures::stream::{self, StreamExt};
use std::io::Write;

/// Default number of checks evaluated concurrently
pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ThresholdError {
    #[error("thresholds must lie within [0, 1], got warning {warning} and error {error}")]
    OutOfRange { warning: f64, error: f64 },

    #[error("warning threshold {warning} must not exceed error threshold {error}")]
    Inverted { warning: f64, error: f64 },
}

/// Utilization ratios at which a check becomes a warning or an error
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    warning: f64,
    error: f64,
}

impl Thresholds {
    pub fn new(warning: f64, error: f64) -> Result<Self, ThresholdError> {
        let in_range = |t: f64| (0.0..=1.0).contains(&t);
        if !in_range(warning) || !in_range(error) {
            return Err(ThresholdError::OutOfRange { warning, error });
        }
        if warning > error {
            return Err(ThresholdError::Inverted { warning, error });
        }

        Ok(Self { warning, error })
    }

    pub fn warning(&self) -> f64 {
        self.warning
    }

    pub fn error(&self) -> f64 {
        self.error
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            warning: 0.8,
            error: 0.9,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    Warning,
    Error,
}

/// Fraction of the maximum in use; a zero maximum counts as unused
pub fn ratio(current: u64, maximum: u64) -> f64 {
    if maximum == 0 {
        0.0
    } else {
        current as f64 / maximum as f64
    }
}

pub fn classify(ratio: f64, thresholds: &Thresholds) -> Status {
    if ratio <= thresholds.warning {
        Status::Success
    } else if ratio <= thresholds.error {
        Status::Warning
    } else {
        Status::Error
    }
}

#[derive(Debug)]
pub enum Outcome {
    Measured {
        current: u64,
        maximum: u64,
        status: Status,
    },
    /// The check cannot be measured by this tool
    Skipped {
        maximum: Option<u64>,
        reason: CheckError,
    },
    /// At least one of the two values could not be computed
    Failed {
        current: Option<u64>,
        maximum: Option<u64>,
        error: CheckError,
    },
}

/// Result of evaluating one check
#[derive(Debug)]
pub struct Evaluation {
    pub check: Check,
    pub label: String,
    pub outcome: Outcome,
}

/// Compute current usage and maximum of a check and classify the ratio
pub async fn evaluate(session: &Session, check: Check, thresholds: &Thresholds) -> Evaluation {
    let (current, maximum) = futures::join!(check.current(session), check.maximum(session));
    let label = check.label(session);

    let outcome = match (current, maximum) {
        (Ok(current), Ok(maximum)) => Outcome::Measured {
            current,
            maximum,
            status: classify(ratio(current, maximum), thresholds),
        },
        (Err(reason @ CheckError::MeasurementUnavailable { .. }), maximum) => Outcome::Skipped {
            maximum: maximum.ok(),
            reason,
        },
        (_, Err(reason @ CheckError::MeasurementUnavailable { .. })) => Outcome::Skipped {
            maximum: None,
            reason,
        },
        (Err(error), maximum) => Outcome::Failed {
            current: None,
            maximum: maximum.ok(),
            error,
        },
        (Ok(current), Err(error)) => Outcome::Failed {
            current: Some(current),
            maximum: None,
            error,
        },
    };

    if let Outcome::Failed { error, .. } = &outcome {
        tracing::warn!("Check {} [{}] failed: {}", check.key(), label, error_chain(error));
    }

    Evaluation {
        check,
        label,
        outcome,
    }
}

/// Counts of a finished run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub success: usize,
    pub warning: usize,
    pub error: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Instance variants whose instances could not be listed
    pub unenumerated: usize,
}

impl RunSummary {
    pub fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Measured { status, .. } => match status {
                Status::Success => self.success += 1,
                Status::Warning => self.warning += 1,
                Status::Error => self.error += 1,
            },
            Outcome::Skipped { .. } => self.skipped += 1,
            Outcome::Failed { .. } => self.failed += 1,
        }
    }

    pub fn record_enumeration_failures(&mut self, count: usize) {
        self.unenumerated += count;
    }

    pub fn total(&self) -> usize {
        self.success + self.warning + self.error + self.failed + self.skipped
    }

    /// Whether the run should exit non-zero; failed checks alone never do
    pub fn is_failure(&self, fail_on_warning: bool) -> bool {
        self.error > 0 || (fail_on_warning && self.warning > 0)
    }
}

pub struct Runner {
    session: Session,
    thresholds: Thresholds,
    concurrency: usize,
}

impl Runner {
    pub fn new(session: Session, thresholds: Thresholds) -> Self {
        Self {
            session,
            thresholds,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Evaluate `checks` and report each result in the order given
    /// Report every enumeration failure of `expansion`, then run its checks
    pub async fn run_expansion<W: Write>(
        &self,
        expansion: Expansion,
        reporter: &mut Reporter<W>,
    ) -> anyhow::Result<RunSummary> {
        for failure in &expansion.failures {
            reporter.enumeration_failure(failure)?;
        }

        let mut summary = self.run(expansion.checks, reporter).await?;
        summary.record_enumeration_failures(expansion.failures.len());
        Ok(summary)
    }

    pub async fn run<W: Write>(&self, checks: Vec<Check>, reporter: &mut Reporter<W>) -> anyhow::Result<RunSummary> {
        tracing::info!(
            "Running {} checks with concurrency {}",
            checks.len(),
            self.concurrency
        );

        let session = &self.session;
        let thresholds = &self.thresholds;
        let mut results = stream::iter(checks)
            .map(|check| evaluate(session, check, thresholds))
            .buffered(self.concurrency);

        let mut summary = RunSummary::default();
        while let Some(evaluation) = results.next().await {
            reporter.evaluation(&evaluation)?;
            summary.record(&evaluation.outcome);
        }

        tracing::info!(
            "Run finished: {} ok, {} warnings, {} errors, {} failed, {} skipped",
            summary.success,
            summary.warning,
            summary.error,
            summary.failed,
            summary.skipped
        );

        Ok(summary)
    }
}
