//! Version information.

/// Package version from Cargo.toml.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// `User-Agent` header sent with every manifest, module and patch request.
pub fn user_agent() -> String {
    format!("hotbundle/{PKG_VERSION}")
}
