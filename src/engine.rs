//! The script engine, as seen by the loader.
//!
//! The engine itself lives outside this crate. The loader only hands it
//! verified module bytes in dependency order and reports what it rejects.

/// An engine's rejection of a module.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ScriptError {
    pub message: String,
}

impl ScriptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A script engine instance.
///
/// Engines are not assumed to be thread-safe. The loader holds the only
/// `&mut` for the duration of a load and evaluates one module at a time.
pub trait Engine: Send {
    /// Evaluate compiled module bytes under `module_name`.
    fn evaluate(&mut self, bytecode: &[u8], module_name: &str) -> Result<(), ScriptError>;

    /// Compile source text into the bytecode form `evaluate` accepts.
    fn compile(&mut self, source: &str, file_name: &str) -> Result<Vec<u8>, ScriptError>;
}
