//! Report output
//!
//! One line per check: `description [label]: current/maximum symbol`.

use crate::check::{CheckError, EnumerationFailure, QuotaCheck};
use crate::gcp::http::{api_error, format_gcp_error};
use crate::runner::{Evaluation, Outcome, RunSummary, Status};
use chrono::Local;
use crossterm::style::{StyledContent, Stylize};
use std::fmt::Display;
use std::io::{self, Write};

const CHECKMARK: &str = "\u{2713}";

/// A maximum of `u64::MAX` means the quota is unlimited
pub fn format_value(value: u64) -> String {
    if value == u64::MAX {
        "unlimited".to_string()
    } else {
        value.to_string()
    }
}

fn format_optional(value: Option<u64>) -> String {
    value.map_or_else(|| "?".to_string(), format_value)
}

/// An error and its sources, outermost first
pub fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = vec![error.to_string()];
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if parts.last() != Some(&text) {
            parts.push(text);
        }
        source = cause.source();
    }
    parts.join(": ")
}

/// The error chain, followed by a hint when an API call failed
fn describe_failure(error: &CheckError) -> String {
    match error {
        CheckError::Fetch(inner) => describe_fetch(inner),
        other => error_chain(other),
    }
}

fn describe_fetch(error: &anyhow::Error) -> String {
    let chain = error_chain(&**error);
    if api_error(error).is_some() {
        format!("{} ({})", chain, format_gcp_error(error))
    } else {
        chain
    }
}

pub struct Reporter<W: Write> {
    out: W,
    color: bool,
}

impl Reporter<io::Stdout> {
    pub fn stdout(color: bool) -> Self {
        Self::new(io::stdout(), color)
    }
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W, color: bool) -> Self {
        Self { out, color }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn paint<D: Display>(&self, content: D, style: fn(D) -> StyledContent<D>) -> String {
        if self.color {
            style(content).to_string()
        } else {
            content.to_string()
        }
    }

    pub fn header(&mut self, project: &str, region: &str, keys: &[&str]) -> io::Result<()> {
        writeln!(
            self.out,
            "GCP project: {} | GCP region: {} | Active checks: {} | {}",
            project,
            region,
            keys.join(","),
            Local::now().format("%Y-%m-%d %H:%M:%S")
        )
    }

    pub fn evaluation(&mut self, evaluation: &Evaluation) -> io::Result<()> {
        let prefix = format!("{} [{}]", evaluation.check.description(), evaluation.label);

        let line = match &evaluation.outcome {
            Outcome::Measured {
                current,
                maximum,
                status,
            } => {
                let symbol = match status {
                    Status::Success => self.paint(CHECKMARK, |s| s.green().bold()),
                    Status::Warning => self.paint("!", |s| s.yellow().bold()),
                    Status::Error => self.paint("X", |s| s.red().bold()),
                };
                format!(
                    "{}: {}/{} {}",
                    prefix,
                    format_value(*current),
                    format_value(*maximum),
                    symbol
                )
            },
            Outcome::Skipped { maximum, reason } => format!(
                "{}: -/{} {} ({})",
                prefix,
                format_optional(*maximum),
                self.paint("-", |s| s.dark_grey().bold()),
                reason
            ),
            Outcome::Failed {
                current,
                maximum,
                error,
            } => format!(
                "{}: {}/{} {} {}",
                prefix,
                format_optional(*current),
                format_optional(*maximum),
                self.paint("?", |s| s.magenta().bold()),
                describe_failure(error)
            ),
        };

        writeln!(self.out, "{}", line)
    }

    pub fn enumeration_failure(&mut self, failure: &EnumerationFailure) -> io::Result<()> {
        let symbol = self.paint("?", |s| s.magenta().bold());
        writeln!(
            self.out,
            "{} [{}]: could not enumerate instances {} {}",
            failure.description,
            failure.key,
            symbol,
            describe_fetch(&failure.error)
        )
    }

    pub fn summary(&mut self, summary: &RunSummary) -> io::Result<()> {
        write!(
            self.out,
            "{} checks: {} ok, {} warning, {} error, {} failed, {} skipped",
            summary.total(),
            summary.success,
            summary.warning,
            summary.error,
            summary.failed,
            summary.skipped
        )?;
        if summary.unenumerated > 0 {
            write!(self.out, ", {} not enumerated", summary.unenumerated)?;
        }
        writeln!(self.out)
    }

    /// Table of available checks: key, scope, instance id, description
    pub fn list_checks(&mut self, checks: &[&'static dyn QuotaCheck]) -> io::Result<()> {
        let rows: Vec<[&str; 4]> = checks
            .iter()
            .map(|c| {
                [
                    c.key(),
                    c.scope().as_str(),
                    c.instance_label().unwrap_or("N/A"),
                    c.description(),
                ]
            })
            .collect();

        let headers = ["Key", "Scope", "Instance ID", "Description"];
        let mut widths = headers.map(str::len);
        for row in &rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let header = format_row(&headers, &widths);
        let header = self.paint(header.as_str(), |s| s.bold());
        writeln!(self.out, "{}", header)?;
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        writeln!(self.out, "{}", rule.join("  "))?;
        for row in &rows {
            writeln!(self.out, "{}", format_row(row, &widths))?;
        }

        Ok(())
    }
}

fn format_row(cells: &[&str; 4], widths: &[usize; 4]) -> String {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", cell, width = width))
        .collect();
    padded.join("  ").trim_end().to_string()
}
