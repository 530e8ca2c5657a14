pub mod agent;
pub mod approval;
pub mod config;
pub mod context;
pub mod error;
pub mod files;
pub mod llm;
pub mod metrics;
pub mod protocol;
pub mod search;
pub mod terminal;

// Re-exports for convenience
pub use agent::{Agent, AgentEvent, ChatOutcome};
pub use config::Config;
pub use context::EnvironmentContext;
pub use error::CoreError;
