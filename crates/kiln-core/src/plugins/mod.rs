//! Dynamically loaded scripts.
//!
//! Tool and result-type artifacts are Rhai scripts. The loader compiles and
//! runs them in isolation and exposes what they define.

pub mod loader;

pub use loader::{PluginError, PluginLoader, PluginModule, Result, Symbol, SymbolTable};
