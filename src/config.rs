use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use reqwest::Url;

/// Shortlink - command-line client for the shorten-link service
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Backend base URL
    #[arg(
        short = 'u',
        long,
        env = "SHORTLINK_API_URL",
        default_value = "http://127.0.0.1:8000"
    )]
    pub api_url: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    pub log_level: String,

    /// HTTP connect timeout in seconds
    #[arg(long, env = "HTTP_CONNECT_TIMEOUT", default_value = "10")]
    pub connect_timeout: u64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub timeout: u64,

    /// Persisted refresh token used to restore a session at start-up
    #[arg(long, env = "SHORTLINK_REFRESH_TOKEN", hide_env_values = true)]
    pub refresh_token: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// One line typed into the interactive shell
#[derive(Parser, Debug)]
#[command(no_binary_name = true, disable_version_flag = true)]
pub struct ShellLine {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Log in with username and password
    Login(Credentials),
    /// Create an account and log in with it
    Register(Credentials),
    /// Shorten a URL
    Shorten {
        /// URL to shorten
        url: String,
        /// Custom short code
        #[arg(short, long)]
        code: Option<String>,
    },
    /// List your links
    Links,
    /// Log out
    Logout,
    /// Show the current session
    Status,
    /// Interactive session
    Shell,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct Credentials {
    #[arg(short = 'n', long)]
    pub username: String,

    /// Prompted for when omitted
    #[arg(short, long)]
    pub password: Option<String>,

    /// Keep the session for 30 days instead of 1 hour
    #[arg(long)]
    pub persistent: bool,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Backend
    pub api_url: Url,

    // Session restore
    pub refresh_token: Option<String>,

    // HTTP client
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    // Logging
    pub log_level: String,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    ///
    /// Returns the parsed command alongside the configuration.
    pub fn load() -> Result<(Self, Command)> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();
        let command = args.command.clone();
        let config = Self::from_args(args)?;
        Ok((config, command))
    }

    /// Build configuration from already-parsed arguments
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let api_url = Url::parse(args.api_url.trim())
            .with_context(|| format!("SHORTLINK_API_URL is not a valid URL: {}", args.api_url))?;

        Ok(Config {
            api_url,
            refresh_token: args
                .refresh_token
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            http_connect_timeout: args.connect_timeout,
            http_request_timeout: args.timeout,
            log_level: args.log_level,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        match self.api_url.scheme() {
            "http" | "https" => {}
            other => anyhow::bail!("SHORTLINK_API_URL must use http or https, got: {}", other),
        }

        if self.api_url.host_str().is_none() {
            anyhow::bail!("SHORTLINK_API_URL has no host: {}", self.api_url);
        }

        if self.http_connect_timeout == 0 || self.http_request_timeout == 0 {
            anyhow::bail!("HTTP timeouts must be greater than zero");
        }

        Ok(())
    }

    /// Cookie line seeding the jar with the persisted refresh token
    pub fn refresh_cookie(&self) -> Option<String> {
        self.refresh_token
            .as_ref()
            .map(|token| format!("refresh_token={}; Path=/", token))
    }
}
