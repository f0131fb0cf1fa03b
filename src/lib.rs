//! Chatloom - a conversational LLM orchestration engine
//!
//! Chatloom turns inbound user messages into tool-augmented model
//! conversations: it routes each turn to a configured model, advertises a
//! registry of host-defined tools, dispatches the tool calls the model
//! makes, and persists every exchanged message per user session.
//!
//! # Example
//!
//! ```no_run
//! use chatloom::config::Config;
//! use chatloom::orchestrator::{Orchestrator, UserIdentity};
//! use chatloom::tools::ToolRegistry;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> chatloom::error::Result<()> {
//!     let config = Config::load("chatloom.yaml")?;
//!     let tools = Arc::new(ToolRegistry::new());
//!     let engine = Orchestrator::with_defaults(config, tools)?;
//!
//!     let identity = UserIdentity::new("u-1", "alice");
//!     let answer = engine.run_turn("What's the weather?", &identity, None, false).await?;
//!     println!("{}", answer);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dedup;
pub mod error;
pub mod orchestrator;
pub mod providers;
pub mod router;
pub mod store;
pub mod tools;

pub use config::Config;
pub use error::{ChatloomError, Result};
pub use orchestrator::{Gateway, Orchestrator, UserIdentity};
pub use router::{ModelRouter, PreferenceStore};
pub use store::SessionStore;
pub use tools::ToolRegistry;
