//! Sinks for run progress.
//!
//! The orchestrator publishes every metric update and status change through
//! [`Presenter`]. Implementations must not block: they are called between
//! probes, on the measuring task.

use crate::metric::Metric;
use crate::scoring::{Gauge, QualityTier};
use colored::{ColoredString, Colorize};
use log::info;
use serde::Serialize;
use std::fmt;

/// Lifecycle state of a run as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Idle,
    Running,
    Success,
    Partial,
    Error,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunStatus::Idle => "idle",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Error => "error",
        };
        f.write_str(label)
    }
}

pub trait Presenter: Send + Sync {
    /// A metric was reset (`value` is `None`) or measured.
    fn on_metric_update(
        &self,
        metric: Metric,
        value: Option<f64>,
        tier: QualityTier,
        gauge: Gauge,
    );

    fn on_run_status(&self, status: RunStatus, message: &str);
}

/// Presenter that only writes to the log. Used with `--json`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPresenter;

impl Presenter for LogPresenter {
    fn on_metric_update(
        &self,
        metric: Metric,
        value: Option<f64>,
        tier: QualityTier,
        _gauge: Gauge,
    ) {
        if let Some(value) = value {
            info!("{}: {:.2} {} ({})", metric, value, metric.unit(), tier);
        }
    }

    fn on_run_status(&self, status: RunStatus, message: &str) {
        info!("Run {}: {}", status, message);
    }
}

/// Width of the textual gauge bar, in cells.
const BAR_WIDTH: usize = 20;

/// Colored line-per-update output for an interactive terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsolePresenter;

impl ConsolePresenter {
    fn bar(gauge: Gauge) -> String {
        let filled = (gauge.ratio * BAR_WIDTH as f64).round() as usize;
        let filled = filled.min(BAR_WIDTH);
        format!("[{}{}]", "#".repeat(filled), ".".repeat(BAR_WIDTH - filled))
    }

    fn paint_tier(tier: QualityTier) -> ColoredString {
        let label = tier.description();
        match tier {
            QualityTier::Excellent | QualityTier::VeryGood => label.bright_green(),
            QualityTier::Good => label.green(),
            QualityTier::Fair => label.yellow(),
            QualityTier::Poor => label.red(),
            QualityTier::Unmeasured => label.dimmed(),
        }
    }
}

impl Presenter for ConsolePresenter {
    fn on_metric_update(
        &self,
        metric: Metric,
        value: Option<f64>,
        tier: QualityTier,
        gauge: Gauge,
    ) {
        // Resets are only interesting in an interactive gauge UI.
        let Some(value) = value else { return };

        let digits = if metric.lower_is_better() { 0 } else { 1 };
        println!(
            "{} {} {} {}",
            format!("{}:", metric).bold().white(),
            format!("{:.*} {}", digits, value, metric.unit()).bright_cyan(),
            Self::bar(gauge),
            Self::paint_tier(tier)
        );
    }

    fn on_run_status(&self, status: RunStatus, message: &str) {
        let line = match status {
            RunStatus::Idle => message.dimmed(),
            RunStatus::Running => message.bright_blue(),
            RunStatus::Success => message.bright_green(),
            RunStatus::Partial => message.yellow(),
            RunStatus::Error => message.bright_red(),
        };
        println!("{}", line);
    }
}
