use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use ledger::Separator;
use reqwest::Url;
use std::{net::SocketAddr, time::Duration};

/// Output format of the console log layer.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, human readable.
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Runtime configuration for the `ledger-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a
/// `.env` file is loaded first when present).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "ledger-server",
    version,
    about = "An HTTP service that stores generated tokens and streams per-token results"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:8080"))]
    pub server_addr: String,

    /// Maximum number of inserts running at once within one batch. `0` lifts
    /// the limit.
    ///
    /// Environment variable: `CONCURRENCY`
    #[arg(long, env = "CONCURRENCY", default_value_t = num_cpus::get())]
    pub concurrency: usize,

    /// Largest `size` a client may request in one call.
    ///
    /// Environment variable: `MAX_BATCH_SIZE`
    #[arg(long, env = "MAX_BATCH_SIZE", default_value_t = 1_000_000)]
    pub max_batch_size: u64,

    /// URL of the remote token generator.
    ///
    /// Environment variable: `SOURCE_URL`
    #[arg(long, env = "SOURCE_URL", default_value_t = String::from("http://127.0.0.1:9000/"))]
    pub source_url: String,

    /// How many times a failed connection to the generator is retried.
    ///
    /// Environment variable: `SOURCE_RETRY`
    #[arg(long, env = "SOURCE_RETRY", default_value_t = 5)]
    pub source_retry: u32,

    /// Per-request timeout against the generator, in seconds.
    ///
    /// Environment variable: `SOURCE_TIMEOUT_SECS`
    #[arg(long, env = "SOURCE_TIMEOUT_SECS", default_value_t = 20)]
    pub source_timeout_secs: u64,

    /// Deadline for one token request, in seconds. Storage inserts still
    /// running when it passes report a failure line. `0` disables it.
    ///
    /// Environment variable: `REQUEST_TIMEOUT_SECS`
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 20)]
    pub request_timeout_secs: u64,

    /// Text placed between nested errors when they are rendered.
    ///
    /// Environment variable: `ERROR_SEPARATOR`
    #[arg(long, env = "ERROR_SEPARATOR", default_value_t = String::from(":: "))]
    pub error_separator: String,

    /// Console log format.
    ///
    /// Environment variable: `LOG_FORMAT`
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// How long in-flight requests may keep draining after a shutdown signal,
    /// in seconds.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECS`
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value_t = 30)]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: SocketAddr,
    pub concurrency: usize,
    pub max_batch_size: u64,
    pub source_url: Url,
    pub source_retry: u32,
    pub source_timeout: Duration,
    pub request_timeout: Option<Duration>,
    pub separator: Separator,
    pub log_format: LogFormat,
    pub shutdown_timeout: Duration,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let server_addr: SocketAddr = args
            .server_addr
            .parse()
            .with_context(|| format!("SERVER_ADDR ({}) is not a socket address", args.server_addr))?;

        let source_url = Url::parse(&args.source_url)
            .with_context(|| format!("SOURCE_URL ({}) is not a valid URL", args.source_url))?;

        if !matches!(source_url.scheme(), "http" | "https") {
            bail!(
                "SOURCE_URL must use http or https, got {}",
                source_url.scheme()
            );
        }

        if args.source_timeout_secs == 0 {
            bail!("SOURCE_TIMEOUT_SECS must be greater than 0");
        }

        if args.max_batch_size > i64::MAX as u64 {
            bail!(
                "MAX_BATCH_SIZE ({}) exceeds the largest representable batch ({})",
                args.max_batch_size,
                i64::MAX
            );
        }

        Ok(Self {
            server_addr,
            concurrency: args.concurrency,
            max_batch_size: args.max_batch_size,
            source_url,
            source_retry: args.source_retry,
            source_timeout: Duration::from_secs(args.source_timeout_secs),
            request_timeout: (args.request_timeout_secs > 0)
                .then(|| Duration::from_secs(args.request_timeout_secs)),
            separator: Separator::new(args.error_separator),
            log_format: args.log_format,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout_secs),
        })
    }
}
