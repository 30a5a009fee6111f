use std::env;

/// Read a single environment variable.
///
/// No `Send + Sync` bound; add it at the call site when the reader crosses
/// task boundaries.
pub trait ReadEnv {
    fn var(&self, key: &str) -> Result<String, env::VarError>;

    /// Like [`ReadEnv::var`], but treats an empty value as absent.
    fn non_empty_var(&self, key: &str) -> Option<String> {
        self.var(key).ok().filter(|value| !value.trim().is_empty())
    }
}
