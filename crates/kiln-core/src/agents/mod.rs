//! Agent configuration and construction.

pub mod config;
pub mod factory;
pub mod result_type;

pub use config::{AgentConfig, AgentConfigError, McpServerEntry};
pub use factory::{AgentFactory, FactoryError, ProviderCredentials, ResolvedAgent};
pub use result_type::{FieldSpec, PrimitiveType, ResultType, ResultTypeError, ResultTypeResolver, StructuredType};
