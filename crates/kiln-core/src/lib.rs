//! Kiln Core - configuration-driven agents and small stage pipelines.
//!
//! This crate provides:
//! - An artifact store over a versioned hub repository with a local snapshot
//! - A Rhai loader for tool and record-type scripts
//! - Result type and tool resolution for declarative agent configs
//! - The agent factory that assembles runnable agents
//! - A sequential pipeline engine and the Feedly news filter built on it
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use kiln_core::agents::{AgentConfig, AgentFactory, ProviderCredentials};
//! use kiln_core::config::Config;
//!
//! async fn build(runtime: Arc<dyn kiln_abstraction::AgentRuntime>) -> kiln_core::Result<()> {
//!     let config = Config::load()?;
//!     let factory = AgentFactory::from_config(&config, runtime)?;
//!     let agent_config = AgentConfig::from_hub(factory.store(), "FeedlyPrompt").await?;
//!     let agent = factory.create_agent(&agent_config, &ProviderCredentials::new("sk-...")).await?;
//!     let result = agent.run("Hello").await?;
//!     println!("{}", result.output);
//!     Ok(())
//! }
//! ```

pub mod agents;
pub mod config;
pub mod error;
pub mod hub;
pub mod pipeline;
pub mod plugins;
pub mod sources;
pub mod tools;

pub use agents::{
    AgentConfig, AgentConfigError, AgentFactory, FactoryError, ProviderCredentials, ResolvedAgent, ResultType,
    ResultTypeError, ResultTypeResolver, StructuredType,
};
pub use config::{Config, ConfigError};
pub use error::{KilnError, Result};
pub use hub::{ArtifactKind, ArtifactStore, HubClient, HubError};
pub use pipeline::{FeedlyDeps, FeedlyNode, FeedlyResult, FeedlyState, Node, Pipeline, PipelineError, Transition};
pub use plugins::{PluginError, PluginLoader, PluginModule};
pub use sources::{FeedItem, FeedlyClient, ItemSource, SourceError};
pub use tools::{ToolResolutionError, ToolResolver};
