//! CLI interface for the conversation orchestrator.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::adapters::llm::{HttpLlmAdapter, LlmAdapter};
use crate::adapters::stt::MockSttAdapter;
use crate::config::Config;
use crate::persistence::LoggingPersistenceSink;

#[derive(Parser)]
#[command(name = "convo-orchestrator")]
#[command(about = "Real-time full-duplex conversation orchestrator", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the WebSocket server
    Serve {
        /// Override the bind address from config (e.g. 0.0.0.0:8787)
        #[arg(long)]
        bind: Option<String>,
        /// Base URL of the OpenAI-compatible chat-completions provider
        #[arg(long, env = "LLM_BASE_URL", default_value = "https://api.openai.com/v1")]
        llm_base_url: String,
        /// API key for the LLM provider
        #[arg(long, env = "LLM_API_KEY", default_value = "")]
        llm_api_key: String,
        /// Model id to use for generation
        #[arg(long, env = "LLM_MODEL", default_value = "gpt-4o-mini")]
        llm_model: String,
    },
    /// Configuration management
    Config {
        /// Print the current configuration
        #[arg(long)]
        show: bool,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve {
            bind,
            llm_base_url,
            llm_api_key,
            llm_model,
        }) => {
            let mut config = Config::load()?;
            if let Some(bind) = bind {
                config.server.bind_addr = bind;
            }

            let llm_adapter: Arc<dyn LlmAdapter> =
                Arc::new(HttpLlmAdapter::new(llm_base_url, llm_api_key, llm_model));
            let stt_adapter = Arc::new(MockSttAdapter::new());
            let persistence = Arc::new(LoggingPersistenceSink);

            crate::server::start(config, stt_adapter, llm_adapter, persistence).await
        }
        Some(Commands::Config { show }) => {
            let config = Config::load()?;
            if show {
                println!("{}", toml::to_string_pretty(&config)?);
            }
            Ok(())
        }
        None => {
            println!("Run `convo-orchestrator serve` to start the server, or --help for options.");
            Ok(())
        }
    }
}
