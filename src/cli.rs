//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Identity-aware mTLS reverse proxy for tenant-partitioned backends
#[derive(Parser, Debug)]
#[command(name = "svid-proxy")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "SVID_PROXY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "SVID_PROXY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "SVID_PROXY_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "SVID_PROXY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "SVID_PROXY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Run without TLS (identity extraction always fails; every request is
    /// rejected as unauthenticated). For wiring/debug deployments only.
    #[arg(long)]
    pub insecure: bool,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the proxy server (default)
    Serve,

    /// Certificate tooling for dev/test deployments
    #[command(subcommand)]
    Tls(TlsCommand),
}

/// TLS certificate tooling subcommands
#[derive(Subcommand, Debug)]
pub enum TlsCommand {
    /// Generate a self-signed development CA
    InitCa {
        /// Common Name for the CA
        #[arg(long, default_value = "svid-proxy Dev CA")]
        cn: String,

        /// Validity period in days
        #[arg(long, default_value_t = 365)]
        days: u32,

        /// Output directory for ca.crt / ca.key
        #[arg(short, long, default_value = "tls")]
        out: PathBuf,
    },

    /// Issue a leaf certificate signed by a previously generated CA
    Issue {
        /// Common Name for the leaf certificate
        #[arg(long)]
        cn: String,

        /// SPIFFE URI SAN (e.g. "spiffe://trust.domain/workload")
        #[arg(long)]
        spiffe_id: Option<String>,

        /// DNS SAN entries (repeatable)
        #[arg(long)]
        dns: Vec<String>,

        /// Validity period in days
        #[arg(long, default_value_t = 90)]
        days: u32,

        /// Directory containing ca.crt / ca.key
        #[arg(long, default_value = "tls")]
        ca_dir: PathBuf,

        /// Output file stem (writes <stem>.crt / <stem>.key)
        #[arg(short, long, default_value = "client")]
        stem: String,

        /// Output directory
        #[arg(short, long, default_value = "tls")]
        out: PathBuf,
    },
}
