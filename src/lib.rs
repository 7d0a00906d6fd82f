//! Conversation Orchestrator
//!
//! A real-time, full-duplex conversational orchestrator: ingests a live
//! PCM audio stream, produces streaming transcripts, classifies
//! conversational pauses and interruptions, assembles a rolling dialogue
//! context, invokes a streaming language model, and streams the reply back
//! — guaranteeing at most one in-flight reply per session and that a new
//! utterance always preempts one.
//!
//! ```ignore
//! use convo_orchestrator::config::Config;
//! use convo_orchestrator::server;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     // wire up adapters and call server::start(..)
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod audio;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod persistence;
pub mod server;
pub mod session;
pub mod transcript;
pub mod vad;

pub use config::Config;
pub use orchestrator::{OrchestratorState, SessionOrchestrator};
pub use server::{start as start_server, ServerState};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
