//! svid-proxy - Identity-aware mTLS reverse proxy
//!
//! Extracts a SPIFFE identity from the client certificate, resolves it to a
//! workspace, and forwards the rewritten request to a fixed upstream.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use svid_proxy::{
    bindings::SqlBindingStore,
    cli::{Cli, Command, TlsCommand},
    config::Config,
    mtls::{CaParams, CertGenerator, LeafCertParams},
    proxy::Gateway,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    // Handle subcommands
    match cli.command {
        Some(Command::Tls(tls_cmd)) => run_tls_command(tls_cmd),
        Some(Command::Serve) | None => run_server(cli).await,
    }
}

/// Run certificate tooling commands
fn run_tls_command(cmd: TlsCommand) -> ExitCode {
    match cmd {
        TlsCommand::InitCa { cn, days, out } => {
            let ca = match CertGenerator::init_ca(&CaParams {
                cn: &cn,
                validity_days: days,
            }) {
                Ok(ca) => ca,
                Err(e) => {
                    eprintln!("CA generation failed: {e}");
                    return ExitCode::FAILURE;
                }
            };

            if let Err(e) = CertGenerator::write_to_dir(&ca, &out, "ca") {
                eprintln!("Failed to write CA files: {e}");
                return ExitCode::FAILURE;
            }

            println!("CA written to {}/ca.crt and {}/ca.key", out.display(), out.display());
            ExitCode::SUCCESS
        }

        TlsCommand::Issue {
            cn,
            spiffe_id,
            dns,
            days,
            ca_dir,
            stem,
            out,
        } => {
            let ca_cert_pem = match std::fs::read_to_string(ca_dir.join("ca.crt")) {
                Ok(pem) => pem,
                Err(e) => {
                    eprintln!("Cannot read {}/ca.crt: {e}", ca_dir.display());
                    return ExitCode::FAILURE;
                }
            };
            let ca_key_pem = match std::fs::read_to_string(ca_dir.join("ca.key")) {
                Ok(pem) => pem,
                Err(e) => {
                    eprintln!("Cannot read {}/ca.key: {e}", ca_dir.display());
                    return ExitCode::FAILURE;
                }
            };

            let params = LeafCertParams {
                cn: &cn,
                san_dns: dns,
                san_uris: spiffe_id.into_iter().collect(),
                validity_days: days,
            };

            let leaf = match CertGenerator::issue_leaf(&params, &ca_cert_pem, &ca_key_pem) {
                Ok(leaf) => leaf,
                Err(e) => {
                    eprintln!("Certificate issuance failed: {e}");
                    return ExitCode::FAILURE;
                }
            };

            if let Err(e) = CertGenerator::write_to_dir(&leaf, &out, &stem) {
                eprintln!("Failed to write certificate files: {e}");
                return ExitCode::FAILURE;
            }

            println!(
                "Certificate written to {}/{stem}.crt and {}/{stem}.key",
                out.display(),
                out.display()
            );
            ExitCode::SUCCESS
        }
    }
}

/// Run the proxy server
async fn run_server(cli: Cli) -> ExitCode {
    // Load configuration
    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            // Apply CLI overrides
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            if cli.insecure {
                config.tls.enabled = false;
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = config.validate_for_serving() {
        error!("Invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        tls = config.tls.enabled,
        upstream = %config.upstream.bare_authority(),
        "Starting svid-proxy"
    );

    // Connect the binding store before accepting traffic
    let store = match SqlBindingStore::connect(&config.bindings.resolve_database_url()).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to connect binding store: {e}");
            return ExitCode::FAILURE;
        }
    };

    let gateway = match Gateway::new(config, store) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Run with graceful shutdown
    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Proxy shutdown complete");
    ExitCode::SUCCESS
}
