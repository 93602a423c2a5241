//! Scope enforcement configuration

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Enforcement posture
///
/// Every field has a default, so an empty TOML document is a valid (strict)
/// configuration:
///
/// ```toml
/// strict_mode = true
/// verify_unit_integrity = true
/// filter_returned_rows = true
/// public_paths = ["/health", "/public/benefits"]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScopeConfig {
    /// Global operations require an explicit opt-out
    pub strict_mode: bool,

    /// Check UNIT contexts against the identity store
    pub verify_unit_integrity: bool,

    /// Drop (and report) rows outside the scope returned by storage
    pub filter_returned_rows: bool,

    /// HTTP paths that accept anonymous requests
    pub public_paths: Vec<String>,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            strict_mode: true,
            verify_unit_integrity: false,
            filter_returned_rows: true,
            public_paths: vec!["/health".to_string()],
        }
    }
}

impl ScopeConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .context("Failed to read scope configuration file")?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: ScopeConfig =
            toml::from_str(contents).context("Failed to parse scope configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        for path in &self.public_paths {
            if !path.starts_with('/') {
                anyhow::bail!("Public path '{}' must start with '/'", path);
            }
            if path.contains('*') {
                anyhow::bail!("Public path '{}' must not contain wildcards", path);
            }
        }

        Ok(())
    }

    /// Whether `path` accepts anonymous requests
    pub fn is_public_path(&self, path: &str) -> bool {
        self.public_paths.iter().any(|p| p == path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_strict() {
        let config = ScopeConfig::default();
        assert!(config.strict_mode);
        assert!(config.filter_returned_rows);
        assert!(!config.verify_unit_integrity);
        assert!(config.is_public_path("/health"));
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = ScopeConfig::from_toml_str("").unwrap();
        assert_eq!(config, ScopeConfig::default());
    }

    #[test]
    fn test_partial_document() {
        let config = ScopeConfig::from_toml_str(
            r#"
            verify_unit_integrity = true
            public_paths = ["/health", "/public/benefits"]
            "#,
        )
        .unwrap();

        assert!(config.strict_mode);
        assert!(config.verify_unit_integrity);
        assert!(config.is_public_path("/public/benefits"));
        assert!(!config.is_public_path("/citizens"));
    }

    #[test]
    fn test_invalid_public_path() {
        assert!(ScopeConfig::from_toml_str(r#"public_paths = ["health"]"#).is_err());
        assert!(ScopeConfig::from_toml_str(r#"public_paths = ["/public/*"]"#).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "strict_mode = false").unwrap();

        let config = ScopeConfig::load(file.path()).unwrap();
        assert!(!config.strict_mode);
    }
}
