//! Membank MCP Server
//!
//! Run with: membank-server

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use membank::config::{
    BankConfig, CoreConfig, EmbeddingConfig, StorageConfig, StorageMode, VectorIndexConfig,
};
use membank::mcp::{BankHandler, McpServer};
use membank::MemoryBank;

#[derive(Parser, Debug)]
#[command(name = "membank-server")]
#[command(about = "Membank MCP server for development memory")]
struct Args {
    /// Database path
    #[arg(
        long,
        env = "MEMBANK_DB_PATH",
        default_value = "~/.local/share/membank/membank.db"
    )]
    db_path: String,

    /// Storage mode (local or cloud-safe)
    #[arg(long, env = "MEMBANK_STORAGE_MODE", default_value = "local")]
    storage_mode: String,

    /// Embedding provider (tfidf, openai, ollama)
    #[arg(long, env = "MEMBANK_EMBEDDING_PROVIDER", default_value = "tfidf")]
    embedding_provider: String,

    /// Embedding model override
    #[arg(long, env = "MEMBANK_EMBEDDING_MODEL")]
    embedding_model: Option<String>,

    /// Embedding endpoint base URL
    #[arg(long, env = "MEMBANK_EMBEDDING_URL")]
    embedding_url: Option<String>,

    /// Embedding dimensions
    #[arg(long, env = "MEMBANK_EMBEDDING_DIMENSIONS", default_value = "384")]
    embedding_dimensions: usize,

    /// OpenAI API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_key: Option<String>,

    /// Vector index collection
    #[arg(long, env = "MEMBANK_VECTOR_COLLECTION", default_value = "memories")]
    collection: String,

    /// Vector index tenant
    #[arg(long, env = "MEMBANK_VECTOR_TENANT", default_value = "default_tenant")]
    tenant: String,

    /// Vector index database
    #[arg(long, env = "MEMBANK_VECTOR_DATABASE", default_value = "default_database")]
    database: String,

    /// Per-probe health check timeout in milliseconds
    #[arg(long, env = "MEMBANK_HEALTH_TIMEOUT_MS", default_value = "5000")]
    health_timeout_ms: u64,

    /// Per-request deadline in milliseconds (0 = none)
    #[arg(long, env = "MEMBANK_REQUEST_TIMEOUT_MS", default_value = "0")]
    request_timeout_ms: u64,

    /// Emit logs as JSON
    #[arg(long, env = "MEMBANK_LOG_JSON")]
    log_json: bool,
}

fn init_logging(json: bool) {
    // stdout is reserved for the protocol
    let filter = tracing_subscriber::EnvFilter::from_default_env();
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .init();
    }
}

impl Args {
    fn bank_config(&self) -> BankConfig {
        let storage_mode = match self.storage_mode.as_str() {
            "cloud-safe" => StorageMode::CloudSafe,
            _ => StorageMode::Local,
        };

        BankConfig {
            storage: StorageConfig {
                db_path: shellexpand::tilde(&self.db_path).to_string(),
                storage_mode,
            },
            embedding: EmbeddingConfig {
                provider: self.embedding_provider.clone(),
                api_key: self.openai_key.clone(),
                base_url: self.embedding_url.clone(),
                model: self.embedding_model.clone(),
                dimensions: self.embedding_dimensions,
            },
            vector_index: VectorIndexConfig {
                collection: self.collection.clone(),
                tenant: self.tenant.clone(),
                database: self.database.clone(),
            },
            core: CoreConfig {
                health_probe_timeout: Duration::from_millis(self.health_timeout_ms),
                ..Default::default()
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_json);

    let bank = MemoryBank::open(args.bank_config()).context("failed to open memory bank")?;

    let mut handler = BankHandler::new(bank);
    if args.request_timeout_ms > 0 {
        handler = handler.with_request_timeout(Duration::from_millis(args.request_timeout_ms));
    }
    let server = McpServer::new(handler);

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, cancelling in-flight requests");
            shutdown.cancel();
        }
    });

    tracing::info!("Membank MCP server starting...");
    server.run().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["membank-server", "--db-path", "/tmp/m.db"]);
        let config = args.bank_config();
        assert_eq!(config.storage.db_path, "/tmp/m.db");
        assert_eq!(config.storage.storage_mode, StorageMode::Local);
        assert_eq!(config.embedding.provider, "tfidf");
        assert_eq!(config.vector_index.collection, "memories");
        assert_eq!(config.core.health_probe_timeout, Duration::from_secs(5));
    }
}
