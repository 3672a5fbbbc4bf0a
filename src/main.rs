//! MCP Auth Gateway - authenticated Model Context Protocol gateway
//!
//! One endpoint in front of a fleet of downstream MCP servers, gated
//! through an OIDC identity provider with RFC 8693 token exchange.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use mcp_auth_gateway::{
    catalog::ServerCatalog,
    cli::{Cli, Command},
    config::Config,
    gateway::Gateway,
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

    match cli.command {
        Some(Command::Check) => run_check(&cli),
        Some(Command::Serve) | None => run_server(cli).await,
    }
}

/// Apply CLI overrides to a loaded configuration.
fn apply_cli_overrides(config: &mut Config, cli: &Cli) {
    if let Some(port) = cli.port {
        config.server.listen_port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host.clone_from(host);
    }
}

/// Validate the catalog referenced by the configuration and print it
fn run_check(cli: &Cli) -> ExitCode {
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match ServerCatalog::load(&config.catalog_path) {
        Ok(catalog) => {
            println!(
                "✅ {} - {} server(s)",
                config.catalog_path.display(),
                catalog.len()
            );
            for server in catalog.iter() {
                println!("  {} - {}", server.name, server.description);
                println!("    URL: {}", server.url);
                println!(
                    "    Audience: {} (role: {})",
                    server.audience, server.required_role
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Catalog validation failed: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Run the gateway server
async fn run_server(cli: Cli) -> ExitCode {
    // Load configuration
    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            apply_cli_overrides(&mut config, &cli);
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.listen_port,
        catalog = %config.catalog_path.display(),
        "Starting MCP Auth Gateway"
    );

    // Create and run gateway
    let gateway = match Gateway::new(config) {
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

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}
