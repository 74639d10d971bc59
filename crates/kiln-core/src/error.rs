//! Error types for Kiln Core.

use kiln_abstraction::RuntimeError;
use thiserror::Error;

use crate::agents::{AgentConfigError, FactoryError, ResultTypeError};
use crate::config::ConfigError;
use crate::hub::HubError;
use crate::pipeline::PipelineError;
use crate::plugins::PluginError;
use crate::sources::SourceError;
use crate::tools::{ExternalToolError, ToolResolutionError};

/// Core error type for Kiln operations.
#[derive(Error, Debug)]
pub enum KilnError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Artifact hub errors
    #[error("Hub error: {0}")]
    Hub(#[from] HubError),

    /// Script loading errors
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// Result type resolution errors
    #[error("Result type error: {0}")]
    ResultType(#[from] ResultTypeError),

    /// Agent config errors
    #[error("Agent config error: {0}")]
    AgentConfig(#[from] AgentConfigError),

    /// Tool resolution errors
    #[error("Tool error: {0}")]
    Tool(#[from] ToolResolutionError),

    /// External tool errors
    #[error("External tool error: {0}")]
    ExternalTool(#[from] ExternalToolError),

    /// Agent construction errors
    #[error("Factory error: {0}")]
    Factory(#[from] FactoryError),

    /// Item source errors
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Pipeline errors
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Agent runtime errors
    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}

/// Result type alias for Kiln operations.
pub type Result<T> = std::result::Result<T, KilnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kiln_error_hub_conversion() {
        let hub_err = HubError::ArtifactNotFound("tools/add.rhai".to_string());
        let kiln_err: KilnError = hub_err.into();
        match kiln_err {
            KilnError::Hub(HubError::ArtifactNotFound(path)) => {
                assert_eq!(path, "tools/add.rhai");
            }
            _ => panic!("Expected Hub error variant"),
        }
    }

    #[test]
    fn test_kiln_error_config() {
        let err: KilnError = ConfigError::Invalid("repo_id cannot be empty".to_string()).into();
        let msg = format!("{err}");
        assert!(msg.contains("Configuration error"));
        assert!(msg.contains("repo_id cannot be empty"));
    }

    #[test]
    fn test_kiln_error_plugin() {
        let err: KilnError =
            PluginError::MissingEntryPoint { module: "helper".to_string(), name: "helper".to_string() }.into();
        assert!(matches!(err, KilnError::Plugin(PluginError::MissingEntryPoint { .. })));
        assert!(err.to_string().starts_with("Plugin error"));
    }

    #[test]
    fn test_kiln_error_pipeline() {
        let err: KilnError = PipelineError::MismatchedBatchResult { batch: 0, expected: 2, actual: 1 }.into();
        match err {
            KilnError::Pipeline(PipelineError::MismatchedBatchResult { expected, actual, .. }) => {
                assert_eq!((expected, actual), (2, 1));
            }
            _ => panic!("Expected Pipeline error variant"),
        }
    }

    #[test]
    fn test_kiln_error_runtime() {
        let err: KilnError = RuntimeError::UnsupportedModelProvider("acme".to_string()).into();
        assert!(matches!(err, KilnError::Runtime(RuntimeError::UnsupportedModelProvider(_))));
    }

    #[test]
    fn test_kiln_error_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: KilnError = HubError::from(json_err).into();
        assert!(matches!(err, KilnError::Hub(HubError::Json(_))));
    }

    #[test]
    fn test_kiln_error_debug() {
        let err: KilnError = SourceError::InvalidResponse("no items".to_string()).into();
        let debug_str = format!("{err:?}");
        assert!(debug_str.contains("Source"));
    }
}
