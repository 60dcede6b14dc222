//! keygate - encrypted credential vault with an OpenAI-compatible gateway
//!
//! Stores provider API keys encrypted at rest and forwards chat completion
//! calls to the provider the caller names, logging every completed call.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keygate::config::{Config, KeySource};
use keygate::registry::ProviderRegistry;
use keygate::storage::memory::MemoryProviderRepository;

#[derive(Parser)]
#[command(name = "keygate")]
#[command(about = "Encrypted credential vault with an OpenAI-compatible gateway")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration file
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },

    /// Show the provider registry that would be seeded
    Providers {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
}

/// Install the tracing subscriber. `RUST_LOG` wins over the config level.
fn init_tracing(level: Option<&str>) {
    let fallback = match level {
        Some(level) => format!("keygate={},tower_http={}", level, level),
        None => "keygate=info,tower_http=info".to_string(),
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn log_key_sources(sources: &[(String, KeySource)]) {
    for (field, source) in sources {
        tracing::info!(field = %field, source = %source, "Secret resolved");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => {
            let (mut cfg, sources) = match Config::from_file_with_env(&config) {
                Ok(loaded) => loaded,
                Err(e) => {
                    init_tracing(None);
                    tracing::error!(config = %config, error = %e, "Failed to load configuration");
                    return Err(e.into());
                }
            };
            init_tracing(Some(&cfg.logging.level));
            tracing::info!(config = %config, "Configuration loaded");
            log_key_sources(&sources);

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                cfg.server.listen = addr;
            }

            keygate::proxy::run_server(cfg).await
        }

        Commands::Check { config } => {
            init_tracing(None);
            tracing::info!(config = %config, "Checking configuration");
            let (cfg, sources) = Config::from_file_with_env(&config)?;
            log_key_sources(&sources);
            println!("Configuration OK");
            println!("  listen:           {}", cfg.server.listen);
            println!("  database:         {}", cfg.database().path);
            println!("  default provider: {}", cfg.gateway.default_provider);
            println!(
                "  legacy envelopes: {}",
                if cfg.security.legacy_key.is_some() {
                    "enabled"
                } else {
                    "disabled"
                }
            );
            Ok(())
        }

        Commands::Providers { config } => {
            init_tracing(Some("warn"));
            let cfg = Config::from_file(&config)?;
            let repo = MemoryProviderRepository::new();
            let registry = ProviderRegistry::seed(
                &repo,
                &cfg.providers,
                &cfg.gateway.default_provider,
            )
            .await?;

            println!("{:<16} BASE URL", "NAME");
            for provider in registry.providers() {
                let marker = if provider.name == cfg.gateway.default_provider {
                    " (default)"
                } else {
                    ""
                };
                println!("{:<16} {}{}", provider.name, provider.base_url, marker);
            }
            Ok(())
        }
    }
}
