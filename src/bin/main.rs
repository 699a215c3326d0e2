use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

use identity_gateway::{
    AssertionValidator, GatewayConfig, KeyCache, create_gateway, server,
};

#[derive(Parser)]
#[command(name = "identity-gateway")]
#[command(about = "Header-based authentication gateway with just-in-time provisioning")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway HTTP server
    Serve {
        /// Bind address
        #[arg(long, env = "GATEWAY_BIND", default_value = "0.0.0.0:8080")]
        bind: String,
    },
    /// Initialize backend schemas and exit
    Init,
    /// Validate a raw assertion against the configured issuer/audience and
    /// print its claims
    CheckAssertion {
        /// The raw signed assertion
        assertion: String,
    },
    /// Print the effective configuration (secrets omitted) and exit
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("identity_gateway=info".parse()?),
        )
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();
    let config = GatewayConfig::from_env();

    match cli.command {
        Commands::Serve { bind } => {
            let gateway = create_gateway(config).await?;
            server::serve(gateway, &bind).await?;
        }
        Commands::Init => {
            // Connecting runs the schema statements on every configured store.
            create_gateway(config).await?;
            info!("backend schemas initialized");
        }
        Commands::CheckAssertion { assertion } => {
            let keys = std::sync::Arc::new(KeyCache::new(
                config.assertion.jwks_url.clone(),
                config.assertion.key_cache_ttl_secs,
                config.assertion.allow_stale_keys,
            ));
            let validator = AssertionValidator::new(config.assertion.clone(), keys);

            match validator.validate(&assertion).await {
                Ok(claims) => {
                    println!(
                        "{}",
                        serde_json::json!({
                            "email": claims.email,
                            "subject": claims.subject,
                            "expires_at": claims.expires_at,
                        })
                    );
                }
                Err(e) => {
                    eprintln!("rejected: {e}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Config => {
            let mut shown = config;
            shown.catalog.password = None;
            shown.document.password = None;
            shown.graph.password = None;
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
    }

    Ok(())
}
