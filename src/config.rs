use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CRAWL_INTERVAL_SECS: u64 = 3600;
const DEFAULT_CRAWL_TTL_SECS: u64 = 86_400;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_FETCH_ATTEMPTS: u32 = 4;
const DEFAULT_MAX_PAGES: usize = 100;
const DEFAULT_LANGUAGE: &str = "en";
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;
const DEFAULT_USER_AGENT: &str = concat!("dataset-register/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct RegisterConfig {
    /// On-disk graph store; in memory when unset.
    pub store_dir: Option<PathBuf>,
    pub http_bind_address: SocketAddr,
    pub crawl_interval: Duration,
    /// Registrations read longer ago than this are re-crawled.
    pub crawl_ttl: Duration,
    pub fetch_timeout: Duration,
    pub fetch_attempts: u32,
    pub user_agent: String,
    pub max_pages: usize,
    pub default_language: String,
    /// Shapes to validate against instead of the bundled ones.
    pub shapes_file: Option<PathBuf>,
    /// Seeded into the allow-list at startup.
    pub allowed_domains: Vec<String>,
    pub graceful_shutdown_timeout_secs: u64,
}

impl Default for RegisterConfig {
    fn default() -> Self {
        Self::resolve(SettingsArgs::default(), PartialConfig::default())
    }
}

impl RegisterConfig {
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let file_config = if let Some(path) = args.config.as_ref() {
            load_config_file(path)?
        } else {
            PartialConfig::default()
        };
        Ok(Self::resolve(args.settings.clone(), file_config))
    }

    /// Command line and environment win over the file, the file over defaults.
    fn resolve(cli: SettingsArgs, file: PartialConfig) -> Self {
        let SettingsArgs {
            store_dir: cli_store_dir,
            http_bind: cli_http_bind,
            crawl_interval_secs: cli_crawl_interval,
            crawl_ttl_secs: cli_crawl_ttl,
            fetch_timeout_secs: cli_fetch_timeout,
            fetch_attempts: cli_fetch_attempts,
            user_agent: cli_user_agent,
            max_pages: cli_max_pages,
            default_language: cli_default_language,
            shapes: cli_shapes,
            allowed_domains: cli_allowed_domains,
            shutdown_timeout_secs: cli_shutdown_timeout,
        } = cli;

        let PartialConfig {
            store_dir: file_store_dir,
            http_bind: file_http_bind,
            crawl_interval_secs: file_crawl_interval,
            crawl_ttl_secs: file_crawl_ttl,
            fetch_timeout_secs: file_fetch_timeout,
            fetch_attempts: file_fetch_attempts,
            user_agent: file_user_agent,
            max_pages: file_max_pages,
            default_language: file_default_language,
            shapes: file_shapes,
            allowed_domains: file_allowed_domains,
            shutdown_timeout_secs: file_shutdown_timeout,
        } = file;

        let http_bind_address = cli_http_bind
            .or(file_http_bind)
            .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8079)));

        let mut allowed_domains = cli_allowed_domains
            .or(file_allowed_domains)
            .unwrap_or_default()
            .into_iter()
            .map(|domain| domain.trim().trim_end_matches('.').to_ascii_lowercase())
            .filter(|domain| !domain.is_empty())
            .collect::<Vec<_>>();
        allowed_domains.sort();
        allowed_domains.dedup();

        Self {
            store_dir: cli_store_dir.or(file_store_dir),
            http_bind_address,
            crawl_interval: Duration::from_secs(
                cli_crawl_interval
                    .or(file_crawl_interval)
                    .unwrap_or(DEFAULT_CRAWL_INTERVAL_SECS),
            ),
            crawl_ttl: Duration::from_secs(
                cli_crawl_ttl.or(file_crawl_ttl).unwrap_or(DEFAULT_CRAWL_TTL_SECS),
            ),
            fetch_timeout: Duration::from_secs(
                cli_fetch_timeout
                    .or(file_fetch_timeout)
                    .unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS),
            ),
            fetch_attempts: cli_fetch_attempts
                .or(file_fetch_attempts)
                .unwrap_or(DEFAULT_FETCH_ATTEMPTS),
            user_agent: cli_user_agent
                .or(file_user_agent)
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_owned()),
            max_pages: cli_max_pages.or(file_max_pages).unwrap_or(DEFAULT_MAX_PAGES),
            default_language: cli_default_language
                .or(file_default_language)
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_owned())
                .trim()
                .to_ascii_lowercase(),
            shapes_file: cli_shapes.or(file_shapes),
            allowed_domains,
            graceful_shutdown_timeout_secs: cli_shutdown_timeout
                .or(file_shutdown_timeout)
                .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        }
    }

    /// Fail fast on settings the register cannot run with.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.crawl_interval.is_zero(),
            "crawl interval must be greater than zero"
        );
        anyhow::ensure!(!self.crawl_ttl.is_zero(), "crawl ttl must be greater than zero");
        anyhow::ensure!(
            self.crawl_ttl <= Duration::from_secs(10 * 365 * 86_400),
            "crawl ttl of {:?} is unreasonably long",
            self.crawl_ttl
        );
        anyhow::ensure!(
            !self.fetch_timeout.is_zero(),
            "fetch timeout must be greater than zero"
        );
        anyhow::ensure!(self.fetch_attempts >= 1, "at least one fetch attempt is required");
        anyhow::ensure!(self.max_pages >= 1, "max pages must be at least 1");
        anyhow::ensure!(!self.user_agent.trim().is_empty(), "user agent must not be empty");
        anyhow::ensure!(
            !self.default_language.is_empty()
                && self
                    .default_language
                    .split('-')
                    .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric())),
            "default language {:?} is not a language tag",
            self.default_language
        );
        if let Some(shapes) = self.shapes_file.as_ref() {
            anyhow::ensure!(shapes.is_file(), "shapes file {:?} does not exist", shapes);
        }
        if let Some(dir) = self.store_dir.as_ref() {
            anyhow::ensure!(
                !dir.exists() || dir.is_dir(),
                "store directory {:?} is not a directory",
                dir
            );
        }
        for domain in &self.allowed_domains {
            anyhow::ensure!(
                crate::allow_list::is_registrable(domain),
                "allowed domain {domain:?} is not a registrable domain"
            );
        }
        Ok(())
    }
}

#[derive(Parser, Debug, Default, Clone)]
#[command(
    name = "dataset-register",
    about = "Register, validate and crawl dataset descriptions",
    version
)]
pub struct CliArgs {
    #[arg(
        long,
        value_name = "FILE",
        help = "Path to a configuration file (YAML or JSON)",
        global = true
    )]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub settings: SettingsArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the crawl scheduler and the ops endpoints (default)
    Serve,
    /// Register a URL, or refresh its registration
    Ingest { url: String },
    /// Validate a URL or a local file without registering it
    Validate {
        /// URL or path to a file
        source: String,
        /// Media type of a local file; guessed from its extension otherwise
        #[arg(long)]
        media_type: Option<String>,
    },
    /// Run one crawl pass now
    Crawl,
    /// Print registry statistics
    Stats,
    /// Add a domain to the allow-list
    Allow { domain: String },
}

#[derive(Args, Debug, Default, Clone)]
pub struct SettingsArgs {
    #[arg(
        long,
        env = "DATASET_REGISTER_STORE_DIR",
        value_name = "DIR",
        help = "Directory of the on-disk graph store (in memory when omitted)",
        global = true
    )]
    pub store_dir: Option<PathBuf>,

    #[arg(
        long,
        env = "DATASET_REGISTER_HTTP_BIND",
        value_name = "ADDR",
        help = "Bind address of the health and metrics endpoints",
        global = true
    )]
    pub http_bind: Option<SocketAddr>,

    #[arg(
        long,
        env = "DATASET_REGISTER_CRAWL_INTERVAL_SECS",
        value_name = "SECS",
        help = "Seconds between crawl passes",
        global = true
    )]
    pub crawl_interval_secs: Option<u64>,

    #[arg(
        long,
        env = "DATASET_REGISTER_CRAWL_TTL_SECS",
        value_name = "SECS",
        help = "Re-crawl registrations read longer ago than this",
        global = true
    )]
    pub crawl_ttl_secs: Option<u64>,

    #[arg(
        long,
        env = "DATASET_REGISTER_FETCH_TIMEOUT_SECS",
        value_name = "SECS",
        help = "Timeout of one HTTP request",
        global = true
    )]
    pub fetch_timeout_secs: Option<u64>,

    #[arg(
        long,
        env = "DATASET_REGISTER_FETCH_ATTEMPTS",
        value_name = "N",
        help = "Attempts per page on transient failures",
        global = true
    )]
    pub fetch_attempts: Option<u32>,

    #[arg(
        long,
        env = "DATASET_REGISTER_USER_AGENT",
        value_name = "AGENT",
        help = "User-Agent header sent when fetching",
        global = true
    )]
    pub user_agent: Option<String>,

    #[arg(
        long,
        env = "DATASET_REGISTER_MAX_PAGES",
        value_name = "N",
        help = "Maximum pages read per crawl of one URL",
        global = true
    )]
    pub max_pages: Option<usize>,

    #[arg(
        long,
        env = "DATASET_REGISTER_DEFAULT_LANGUAGE",
        value_name = "TAG",
        help = "Language tag for titles and descriptions without one",
        global = true
    )]
    pub default_language: Option<String>,

    #[arg(
        long,
        env = "DATASET_REGISTER_SHAPES",
        value_name = "FILE",
        help = "SHACL shapes replacing the bundled ones",
        global = true
    )]
    pub shapes: Option<PathBuf>,

    #[arg(
        long,
        env = "DATASET_REGISTER_ALLOWED_DOMAINS",
        value_name = "DOMAIN",
        value_delimiter = ',',
        help = "Comma-separated domains to seed the allow-list with",
        global = true
    )]
    pub allowed_domains: Option<Vec<String>>,

    #[arg(
        long,
        env = "DATASET_REGISTER_SHUTDOWN_TIMEOUT_SECS",
        value_name = "SECS",
        help = "Grace period for shutdown",
        global = true
    )]
    pub shutdown_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PartialConfig {
    store_dir: Option<PathBuf>,
    http_bind: Option<SocketAddr>,
    crawl_interval_secs: Option<u64>,
    crawl_ttl_secs: Option<u64>,
    fetch_timeout_secs: Option<u64>,
    fetch_attempts: Option<u32>,
    user_agent: Option<String>,
    max_pages: Option<usize>,
    default_language: Option<String>,
    shapes: Option<PathBuf>,
    allowed_domains: Option<Vec<String>>,
    shutdown_timeout_secs: Option<u64>,
}

fn load_config_file(path: &Path) -> Result<PartialConfig> {
    if !path.exists() {
        anyhow::bail!("config file {:?} does not exist", path);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {:?}", path))?;
    let ext = path
        .extension()
        .and_then(|os| os.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let parsed = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML config {:?}", path))?,
        "json" => serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse JSON config {:?}", path))?,
        other => anyhow::bail!("unsupported config extension: {other}"),
    };
    Ok(parsed)
}
