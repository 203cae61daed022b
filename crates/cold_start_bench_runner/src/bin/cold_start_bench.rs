use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use cold_start_bench_core::config::{generate_run_id, Config};
use cold_start_bench_core::storage_keys::run_date;
use cold_start_bench_runner::adapters::auth::{TokenProvider, TokenSettings};
use cold_start_bench_runner::adapters::cloud_run::CloudRunPlatform;
use cold_start_bench_runner::adapters::Platform;
use cold_start_bench_runner::handlers::adhoc::{run_adhoc, AdhocTargets};
use cold_start_bench_runner::handlers::batch::run_batch;
use cold_start_bench_runner::handlers::commands::{run_cleanup, run_deploy, run_report};
use cold_start_bench_runner::handlers::distributed::{run_finalize, run_measure};
use cold_start_bench_runner::handlers::sequential::run_sequential;
use cold_start_bench_runner::handlers::{cleanup_workloads, BenchContext, ReportSink};
use cold_start_bench_runner::logging::{init_tracing, LogFormat};
use cold_start_bench_runner::persistence::BucketLocation;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Delay applied by scheduled commands before touching the platform API.
const STARTUP_JITTER: Duration = Duration::from_millis(37_300);

#[derive(Parser)]
#[command(
    name = "cold-start-bench",
    about = "Cold-start and warm-latency benchmarks for scale-to-zero services",
    long_about = "Deploys each enabled service, waits for it to scale to zero, measures the \
                  first request against a cold instance, load-tests the warm instance, and \
                  writes JSON and Markdown reports locally and to a results bucket."
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    /// Defaults to `adhoc` when omitted.
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct GlobalArgs {
    /// Benchmark configuration file
    #[arg(long, global = true, default_value = "config.yaml")]
    config: PathBuf,

    /// Directory for local reports
    #[arg(long, global = true, default_value = "results")]
    output: PathBuf,

    /// Comma-separated subset of the enabled services
    #[arg(long, global = true)]
    services: Option<String>,

    /// Results bucket (`name`, `gs://name` or `file:///path`)
    #[arg(long, global = true, env = "GCS_RESULTS_BUCKET")]
    gcs_bucket: Option<String>,

    /// Skip the startup jitter of scheduled commands
    #[arg(long, global = true)]
    no_jitter: bool,

    /// Target workloads deployed under this run ID
    #[arg(long, global = true, env = "BENCH_RUN_ID")]
    run_id: Option<String>,

    /// UTC date (YYYY-MM-DD) for distributed readings; defaults to today
    #[arg(long, global = true)]
    run_date: Option<String>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy all enabled services and leave them running
    Deploy,
    /// Full benchmark: deploy, cold-start iterations, warm test, report, cleanup
    Run {
        /// Phased execution: every phase runs across all services before the next
        #[arg(long)]
        batch: bool,
    },
    /// Single pass: one scale-to-zero wait, one cold probe, warm test, report
    Adhoc {
        /// Measure workloads deployed earlier instead of deploying fresh ones
        #[arg(long)]
        existing: bool,
    },
    /// Take one cold-start reading and persist it to the results bucket
    Measure {
        #[arg(long)]
        iteration: u32,
    },
    /// Consolidate the day's readings, warm-test and publish the report
    Finalize,
    /// Delete every workload belonging to `--run-id`
    Cleanup,
    /// Regenerate Markdown from a saved results.json
    Report {
        /// Path to results.json
        results: PathBuf,
        /// Earlier results.json to compare against
        #[arg(long)]
        baseline: Option<PathBuf>,
    },
}

impl Commands {
    fn jittered(&self) -> bool {
        matches!(self, Self::Adhoc { .. } | Self::Measure { .. } | Self::Finalize)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.global.log_format, cli.global.verbose);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            on_signal.cancel();
        }
    });

    match run(cli, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(error = %format!("{error:#}"), "fatal");
            ExitCode::FAILURE
        }
    }
}

/// What every platform-facing command needs once configuration has loaded.
struct Session {
    config: Config,
    platform: Platform,
    http: reqwest::Client,
    sink: ReportSink,
    run_date: String,
}

impl Session {
    async fn open(global: &GlobalArgs) -> Result<Self> {
        let config = load_config(&global.config, global.services.as_deref())?;
        let run_date = match &global.run_date {
            Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .with_context(|| format!("--run-date {raw:?} is not YYYY-MM-DD"))?
                .format("%Y-%m-%d")
                .to_string(),
            None => run_date(Utc::now()),
        };
        let bucket = match global.gcs_bucket.as_deref() {
            Some(raw) => match BucketLocation::parse(raw) {
                Some(location) => Some(location.open(config.benchmark.api_timeout).await),
                None => bail!("--gcs-bucket {raw:?} names no bucket"),
            },
            None => None,
        };

        let http = reqwest::Client::builder()
            .timeout(config.benchmark.api_timeout)
            .build()
            .context("building HTTP client")?;
        let tokens = TokenProvider::new(http.clone(), TokenSettings::from_env());
        let platform = Platform::from_cloud_run(Arc::new(CloudRunPlatform::new(
            http.clone(),
            tokens,
            config.platform.project_id.clone(),
            config.platform.region.clone(),
        )));

        info!(
            project = %config.platform.project_id,
            region = %config.platform.region,
            services = ?config.services.enabled,
            bucket = global.gcs_bucket.as_deref().unwrap_or("none"),
            "configuration loaded"
        );
        Ok(Self {
            config,
            platform,
            http,
            sink: ReportSink::new(&global.output, bucket),
            run_date,
        })
    }

    fn context(self, run_id: String, cancel: CancellationToken) -> (BenchContext, ReportSink, String) {
        let ctx = BenchContext::new(self.config, run_id, &self.platform, self.http, cancel);
        (ctx, self.sink, self.run_date)
    }
}

async fn jitter(cancel: &CancellationToken) -> Result<()> {
    info!(seconds = STARTUP_JITTER.as_secs_f64(), "startup jitter");
    tokio::select! {
        _ = cancel.cancelled() => bail!("interrupted during startup jitter"),
        _ = tokio::time::sleep(STARTUP_JITTER) => Ok(()),
    }
}

async fn run(cli: Cli, cancel: CancellationToken) -> Result<()> {
    let global = cli.global;
    let command = cli.command.unwrap_or(Commands::Adhoc { existing: false });

    if let Commands::Report { results, baseline } = command {
        let written = run_report(&results, baseline.as_deref())
            .await
            .context("regenerating reports")?;
        for path in written {
            info!(path = %path.display(), "written");
        }
        return Ok(());
    }

    if command.jittered() && !global.no_jitter {
        jitter(&cancel).await?;
    }
    let session = Session::open(&global).await?;
    let by_run_id = global.run_id.is_some();
    let fresh_run_id = || global.run_id.clone().unwrap_or_else(generate_run_id);

    match command {
        Commands::Deploy => {
            let (ctx, _, _) = session.context(fresh_run_id(), cancel);
            let services = run_deploy(&ctx).await;
            for (service, result) in &services {
                match (&result.service_url, &result.deploy_error) {
                    (Some(url), _) => info!(service = %service, url = %url, "deployed"),
                    (None, Some(error)) => warn!(service = %service, error = %error, "not deployed"),
                    (None, None) => warn!(service = %service, "not deployed"),
                }
            }
            println!("run id: {}", ctx.run_id());
        }
        Commands::Run { batch } => {
            let (ctx, sink, _) = session.context(fresh_run_id(), cancel);
            let result = if batch {
                run_batch(&ctx).await
            } else {
                run_sequential(&ctx).await
            };
            let published = sink.publish(&result, ctx.run_id()).await;
            cleanup_workloads(&ctx).await;
            published.context("writing reports")?;
        }
        Commands::Adhoc { existing } => {
            let targets_from = match (existing, by_run_id) {
                (false, _) => AdhocTargets::Deploy,
                (true, true) => AdhocTargets::ExistingForRun,
                (true, false) => AdhocTargets::ExistingShared,
            };
            let (ctx, sink, _) = session.context(fresh_run_id(), cancel);
            run_adhoc(&ctx, &sink, targets_from)
                .await
                .context("adhoc benchmark")?;
        }
        Commands::Measure { iteration } => {
            let run_id = global.run_id.clone().unwrap_or_else(|| session.run_date.clone());
            let (ctx, sink, run_date) = session.context(run_id, cancel);
            let Some(store) = sink.bucket() else {
                bail!("measure needs a results bucket (--gcs-bucket or GCS_RESULTS_BUCKET)");
            };
            run_measure(&ctx, store, &run_date, iteration, by_run_id)
                .await
                .with_context(|| format!("measuring iteration {iteration}"))?;
        }
        Commands::Finalize => {
            let run_id = global.run_id.clone().unwrap_or_else(|| session.run_date.clone());
            let (ctx, sink, run_date) = session.context(run_id, cancel);
            run_finalize(&ctx, &sink, &run_date, by_run_id)
                .await
                .with_context(|| format!("finalizing {run_date}"))?;
        }
        Commands::Cleanup => {
            let Some(run_id) = global.run_id.clone() else {
                bail!("cleanup needs --run-id (or BENCH_RUN_ID)");
            };
            let (ctx, _, _) = session.context(run_id, cancel);
            match run_cleanup(&ctx).await {
                Ok(report) => info!(
                    deleted = report.deleted.len(),
                    failed = report.failed.len(),
                    "cleanup finished"
                ),
                Err(error) => warn!(error = %error, "cleanup failed"),
            }
        }
        Commands::Report { .. } => {}
    }
    Ok(())
}

fn load_config(path: &Path, services: Option<&str>) -> Result<Config> {
    let mut config = Config::load(path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    if let Some(selection) = services {
        config
            .restrict_services(selection)
            .context("applying --services")?;
        config.validate().context("validating configuration")?;
    }
    Ok(config)
}
