//! The three quantities a speed test run measures.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A measurable property of the connection.
///
/// Ping is reported in milliseconds and lower values are better. Download
/// and upload are reported in decimal megabits per second and higher values
/// are better.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Ping,
    Download,
    Upload,
}

impl Metric {
    /// Every metric in the default run order.
    pub const ALL: [Metric; 3] = [Metric::Ping, Metric::Download, Metric::Upload];

    /// Unit label for values of this metric.
    pub fn unit(&self) -> &'static str {
        match self {
            Metric::Ping => "ms",
            Metric::Download | Metric::Upload => "Mbps",
        }
    }

    /// Whether smaller values indicate a better connection.
    pub fn lower_is_better(&self) -> bool {
        matches!(self, Metric::Ping)
    }

    /// Whether probes for this metric transfer a payload.
    pub fn is_throughput(&self) -> bool {
        !self.lower_is_better()
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Ping => write!(f, "Ping"),
            Metric::Download => write!(f, "Download"),
            Metric::Upload => write!(f, "Upload"),
        }
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ping" | "latency" => Ok(Metric::Ping),
            "download" | "down" => Ok(Metric::Download),
            "upload" | "up" => Ok(Metric::Upload),
            other => Err(format!(
                "unknown metric '{}', expected ping, download or upload",
                other
            )),
        }
    }
}
