// src/config.rs
use clap::Parser;
use tracing::warn;

pub const DEFAULT_PORT: u16 = 8081;
pub const DEFAULT_WEB_ROOT: &str = "./www";

#[derive(Parser, Debug)]
#[command(name = "etude")]
#[command(about = "Small event-driven HTTP/1.x static file server")]
#[command(version)]
struct Cli {
    /// Port to listen on; out-of-range values fall back to the default
    #[arg(short = 'p', long = "port", default_value_t = DEFAULT_PORT as i64)]
    port: i64,

    /// Directory to serve files from
    #[arg(short = 'r', long = "root", default_value = DEFAULT_WEB_ROOT)]
    web_root: String,
}

/// Runtime configuration, shared read-only with every connection.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub web_root: String,
}

impl Config {
    /// Parse the process arguments. Unknown options make clap print usage
    /// to stderr and exit non-zero.
    pub fn from_args() -> Self {
        Self::from_cli(Cli::parse())
    }

    fn from_cli(cli: Cli) -> Self {
        let port = if cli.port <= 0 || cli.port > 65535 {
            warn!(
                given = cli.port,
                fallback = DEFAULT_PORT,
                "port out of range, using default"
            );
            DEFAULT_PORT
        } else {
            cli.port as u16
        };

        Config {
            port,
            web_root: cli.web_root,
        }
    }
}
