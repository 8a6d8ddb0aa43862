use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use gcp_quota::check::{self, registry, Check, Expansion, InstanceId, Scope};
use gcp_quota::config::Config;
use gcp_quota::gcp::auth;
use gcp_quota::gcp::client::{GcpClient, RetryPolicy};
use gcp_quota::report::Reporter;
use gcp_quota::runner::{Runner, Thresholds};
use gcp_quota::session::Session;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Audit GCP project resource usage against quotas and limits
#[derive(Parser, Debug)]
#[command(name = "gcp-quota", version = gcp_quota::VERSION, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level for debugging
    #[arg(long, global = true, value_enum, default_value = "off")]
    log_level: LogLevel,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run checks identified by KEYS
    ///
    /// e.g. `check network_count,firewall_count`. Prefix a key with ! to
    /// exclude it, e.g. `check all,!cpu_count`. Pass all to run every check;
    /// instance checks run once per instance found.
    Check {
        keys: String,

        #[command(flatten)]
        options: CheckOptions,
    },

    /// Run a single instance check for a single instance
    ///
    /// e.g. `check-instance peerings_per_network default` or
    /// `check-instance node_pools_per_cluster location=us-central1,cluster=prod`
    CheckInstance {
        key: String,
        instance_id: String,

        #[command(flatten)]
        options: CheckOptions,
    },

    /// List available quota checks
    ListChecks,
}

#[derive(ClapArgs, Debug)]
struct CheckOptions {
    /// GCP project to audit, defaults to the config file or gcloud
    #[arg(short, long)]
    project: Option<String>,

    /// Region for region scoped quotas, defaults to the config file or gcloud
    #[arg(short, long)]
    region: Option<String>,

    /// Utilization ratio above which a check warns [default: 0.8]
    #[arg(long)]
    warning_threshold: Option<f64>,

    /// Utilization ratio above which a check errors [default: 0.9]
    #[arg(long)]
    error_threshold: Option<f64>,

    /// Exit with a non-zero code on quota warnings
    #[arg(long)]
    fail_on_warning: bool,

    /// Number of checks evaluated concurrently [default: 4]
    #[arg(long)]
    concurrency: Option<usize>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let tracing_level = level.to_tracing_level()?;

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file {:?}: {}", log_path, e);
            return None;
        },
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("gcp-quota started with log level: {:?}", level);
    tracing::info!("Log file: {:?}", log_path);

    Some(guard)
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = Config::config_dir() {
        return config_dir.join("gcp-quota.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".gcp-quota").join("gcp-quota.log");
    }
    PathBuf::from("gcp-quota.log")
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level);

    match args.command {
        Command::ListChecks => {
            let color = std::io::stdout().is_terminal();
            Reporter::stdout(color).list_checks(registry().all())?;
            Ok(ExitCode::SUCCESS)
        },
        Command::Check { keys, options } => {
            let variants = registry().select(&keys)?;
            let settings = Settings::resolve(&options)?;
            let session = settings.session().await?;

            let mut reporter = Reporter::stdout(settings.color);
            let keys: Vec<&str> = variants.iter().map(|v| v.key()).collect();
            reporter.header(session.project_id(), session.region(), &keys)?;

            let expansion = check::expand(&session, &variants).await;
            settings.run(session, expansion, &mut reporter).await
        },
        Command::CheckInstance {
            key,
            instance_id,
            options,
        } => {
            let variant = registry()
                .get(&key)
                .filter(|v| v.scope() == Scope::Instance)
                .with_context(|| {
                    let available: Vec<&str> = registry().instance_scoped().map(|v| v.key()).collect();
                    format!("{} is not an instance check, expected one of: {}", key, available.join(", "))
                })?;
            let instance_id: InstanceId = instance_id.parse()?;
            let check = Check::for_instance(variant, instance_id.clone())?;

            let settings = Settings::resolve(&options)?;
            let session = settings.session().await?;

            let mut reporter = Reporter::stdout(settings.color);
            let active = format!("{} ({})", variant.key(), instance_id);
            reporter.header(session.project_id(), session.region(), &[active.as_str()])?;

            let expansion = Expansion {
                checks: vec![check],
                ..Default::default()
            };
            settings.run(session, expansion, &mut reporter).await
        },
    }
}

/// Run settings after merging flags, the config file and gcloud defaults
struct Settings {
    project: String,
    region: String,
    thresholds: Thresholds,
    fail_on_warning: bool,
    concurrency: usize,
    retry: RetryPolicy,
    endpoint: Option<String>,
    color: bool,
}

impl Settings {
    fn resolve(options: &CheckOptions) -> Result<Self> {
        let config = Config::load();

        let project = config
            .effective_project(options.project.as_deref())
            .context("No project configured: pass --project or run `gcloud config set project`")?;
        if !auth::validate_project_id(&project) {
            anyhow::bail!("Invalid project ID: {}", project);
        }
        let region = config.effective_region(options.region.as_deref());

        let thresholds = Thresholds::new(
            options.warning_threshold.unwrap_or(config.warning_threshold),
            options.error_threshold.unwrap_or(config.error_threshold),
        )?;

        if let Some(endpoint) = &config.endpoint {
            url::Url::parse(endpoint).with_context(|| format!("Invalid endpoint in config: {}", endpoint))?;
        }

        let color = !options.no_color
            && std::env::var_os("NO_COLOR").is_none()
            && std::io::stdout().is_terminal();

        Ok(Self {
            project,
            region,
            thresholds,
            fail_on_warning: options.fail_on_warning || config.fail_on_warning,
            concurrency: options.concurrency.unwrap_or(config.concurrency),
            retry: RetryPolicy {
                max_attempts: config.retry_attempts.max(1),
                ..RetryPolicy::default()
            },
            endpoint: config.endpoint,
            color,
        })
    }

    async fn session(&self) -> Result<Session> {
        tracing::info!("Auditing project {} in region {}", self.project, self.region);

        let mut client = GcpClient::new(&self.project, &self.region)
            .await?
            .with_retry(self.retry);
        if let Some(endpoint) = &self.endpoint {
            client = client.with_endpoint(endpoint);
        }

        Ok(Session::new(client))
    }

    async fn run(
        &self,
        session: Session,
        expansion: Expansion,
        reporter: &mut Reporter<std::io::Stdout>,
    ) -> Result<ExitCode> {
        let runner = Runner::new(session, self.thresholds).with_concurrency(self.concurrency);
        let summary = runner.run_expansion(expansion, reporter).await?;
        reporter.summary(&summary)?;

        if summary.is_failure(self.fail_on_warning) {
            Ok(ExitCode::FAILURE)
        } else {
            Ok(ExitCode::SUCCESS)
        }
    }
}
