use clap::Parser;
use clap_verbosity_flag::Verbosity;
use colored::Colorize;
use log::debug;
use speed_gauge::config::SpeedConfig;
use speed_gauge::errors::{exit_codes, format_error_for_display, SpeedTestError};
use speed_gauge::http::Client;
use speed_gauge::metric::Metric;
use speed_gauge::orchestrator::Orchestrator;
use speed_gauge::presenter::{ConsolePresenter, LogPresenter, Presenter};
use speed_gauge::results::RunReport;
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (rev ",
    env!("SPEEDGAUGE_BUILD_GIT_HASH"),
    ")"
);

#[derive(Parser)]
#[command(author, version = VERSION, about, long_about = None)]
struct Cli {
    /// JSON config file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Ping endpoint; repeat to rotate between several
    #[arg(long = "ping-url")]
    ping_urls: Vec<Url>,

    /// Download endpoint; repeat to rotate between several
    #[arg(long = "download-url")]
    download_urls: Vec<Url>,

    /// Upload endpoint; repeat to rotate between several
    #[arg(long = "upload-url")]
    upload_urls: Vec<Url>,

    #[arg(long)]
    ping_samples: Option<usize>,

    #[arg(long)]
    download_samples: Option<usize>,

    #[arg(long)]
    upload_samples: Option<usize>,

    /// Gauge maximum for ping, in ms
    #[arg(long)]
    ping_max: Option<f64>,

    /// Gauge maximum for download, in Mbps
    #[arg(long)]
    download_max: Option<f64>,

    /// Gauge maximum for upload, in Mbps
    #[arg(long)]
    upload_max: Option<f64>,

    /// Four increasing tier boundaries for ping, e.g. 20,40,70,120
    #[arg(long, value_delimiter = ',')]
    ping_thresholds: Option<Vec<f64>>,

    /// Four increasing tier boundaries for download, e.g. 20,50,100,200
    #[arg(long, value_delimiter = ',')]
    download_thresholds: Option<Vec<f64>>,

    /// Four increasing tier boundaries for upload, e.g. 10,25,50,100
    #[arg(long, value_delimiter = ',')]
    upload_thresholds: Option<Vec<f64>>,

    /// Metrics to measure, in order, e.g. download,upload
    #[arg(long, value_delimiter = ',')]
    order: Option<Vec<Metric>>,

    /// Per-request timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Upload payload size in bytes
    #[arg(long)]
    upload_bytes: Option<usize>,

    /// Concurrent download/upload probes per round
    #[arg(long)]
    parallel: Option<usize>,

    /// Wall-clock limit per metric in milliseconds
    #[arg(long)]
    duration_ms: Option<u64>,

    /// Also measure ping while the link is saturated
    #[arg(long)]
    loaded_latency: bool,

    /// Background streams used for the loaded latency measurement
    #[arg(long)]
    load_streams: Option<usize>,

    /// Print the report as JSON instead of colored text
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    verbose: Verbosity,
}

impl Cli {
    /// Assemble the effective configuration: defaults, then the config file,
    /// then flags.
    fn build_config(&self) -> Result<SpeedConfig, SpeedTestError> {
        let mut config = match &self.config {
            Some(path) => SpeedConfig::from_file(path)?,
            None => SpeedConfig::default(),
        };

        let per_metric = [
            (
                Metric::Ping,
                &self.ping_urls,
                self.ping_samples,
                self.ping_max,
                &self.ping_thresholds,
            ),
            (
                Metric::Download,
                &self.download_urls,
                self.download_samples,
                self.download_max,
                &self.download_thresholds,
            ),
            (
                Metric::Upload,
                &self.upload_urls,
                self.upload_samples,
                self.upload_max,
                &self.upload_thresholds,
            ),
        ];

        for (metric, urls, samples, max, thresholds) in per_metric {
            let target = config.metric_mut(metric);

            if !urls.is_empty() {
                target.endpoints = urls.clone();
            }
            if let Some(samples) = samples {
                target.samples = samples;
            }
            if let Some(max) = max {
                target.expected_max = max;
            }
            if let Some(thresholds) = thresholds {
                target.thresholds =
                    <[f64; 4]>::try_from(thresholds.as_slice()).map_err(|_| {
                        SpeedTestError::config(format!(
                            "{} thresholds need exactly four values, got {}",
                            metric,
                            thresholds.len()
                        ))
                    })?;
            }
        }

        if let Some(order) = &self.order {
            config.order = order.clone();
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.timeout_ms = timeout_ms;
        }
        if let Some(upload_bytes) = self.upload_bytes {
            config.upload_bytes = upload_bytes;
        }
        if let Some(parallel) = self.parallel {
            config.parallel_streams = parallel;
        }
        if let Some(duration_ms) = self.duration_ms {
            config.duration_budget_ms = Some(duration_ms);
        }
        if self.loaded_latency {
            config.loaded_latency.enabled = true;
        }
        if let Some(streams) = self.load_streams {
            config.loaded_latency.streams = streams;
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.verbose.log_level_filter())
        .init();

    let orchestrator = match setup(&cli) {
        Ok(orchestrator) => Arc::new(orchestrator),
        Err(error) => {
            eprintln!("{}", format_error_for_display(&error).bright_red());
            std::process::exit(error.exit_code());
        }
    };

    let on_interrupt = Arc::clone(&orchestrator);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let Some(report) = orchestrator.start().await else {
        std::process::exit(exit_codes::UNKNOWN_ERROR);
    };

    if cli.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Failed to serialize report: {}", e);
                std::process::exit(exit_codes::UNKNOWN_ERROR);
            }
        }
    } else {
        print_summary(&report);
    }

    std::process::exit(report.exit_code());
}

fn setup(cli: &Cli) -> Result<Orchestrator, SpeedTestError> {
    let config = cli.build_config()?;
    debug!("Effective configuration: {:?}", config);

    let presenter: Arc<dyn Presenter> = if cli.json {
        Arc::new(LogPresenter)
    } else {
        Arc::new(ConsolePresenter)
    };

    Orchestrator::new(config, Client::new()?, presenter)
}

fn print_summary(report: &RunReport) {
    if let Some(jitter) = report
        .result(Metric::Ping)
        .and_then(|result| result.jitter)
    {
        println!("{} {:.0} ms", "Jitter:".bold().white(), jitter);
    }

    for failure in &report.failures {
        println!(
            "{} {} {}",
            format!("{}:", failure.metric).bold().white(),
            "unmeasured".dimmed(),
            format!("({})", failure.message).dimmed()
        );
        if let Some(suggestion) = &failure.suggestion {
            println!("  {} {}", "Suggestion:".yellow(), suggestion);
        }
    }

    if let Some(loaded) = &report.loaded_latency {
        match &loaded.ping {
            Some(ping) => {
                let added = loaded
                    .added_latency_ms
                    .map(|ms| format!(" ({:+.0} ms)", ms))
                    .unwrap_or_default();
                println!(
                    "{} {}{} {}",
                    "Loaded ping:".bold().white(),
                    format!("{:.0} ms", ping.value).bright_cyan(),
                    added,
                    ping.tier.description()
                );
            }
            None => println!(
                "{} {}",
                "Loaded ping:".bold().white(),
                "unmeasured".dimmed()
            ),
        }

        if loaded.ping.is_some() && !loaded.load_covered_sampling {
            println!(
                "  {} background load went idle during sampling",
                "Note:".yellow()
            );
        }
    }

    if let Some(error) = &report.error {
        eprintln!("{}", error.bright_red());
    }
}
