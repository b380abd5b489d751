//! Loader configuration
//!
//! Environment-driven with CLI overrides. The label-prefix rule targets one
//! known collection's naming convention; it is configuration, not code, so
//! deployments covering other corpora can replace or disable it.

use crate::db::DbConfig;
use crate::error::{LoaderError, Result};
use crate::rows::LabelRule;
use regex::Regex;

/// Default label prefix stripped before storage, from the corpus this
/// loader was first built for. Override with `IIIF_LABEL_STRIP_PREFIX` or
/// `--label-strip-prefix`; set to an empty string to disable stripping.
pub const DEFAULT_LABEL_STRIP_PREFIX: &str =
    r"^Edward Ruscha photographs of ((Los Angeles streets|Sunset Boulevard): )?";

/// Full loader configuration
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub database: DbConfig,
    pub label_strip_prefix: Option<String>,
}

impl LoaderConfig {
    /// Build configuration from the environment
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(None, None)
    }

    /// Build configuration from the environment, with explicit overrides
    /// taking precedence over environment variables.
    pub fn from_env_with(
        database_url: Option<String>,
        label_strip_prefix: Option<String>,
    ) -> Result<Self> {
        let database = DbConfig::from_env_with(database_url)
            .map_err(|e| LoaderError::config(e.to_string()))?;

        let prefix = label_strip_prefix
            .or_else(|| std::env::var("IIIF_LABEL_STRIP_PREFIX").ok())
            .unwrap_or_else(|| DEFAULT_LABEL_STRIP_PREFIX.to_string());
        let label_strip_prefix = if prefix.is_empty() { None } else { Some(prefix) };

        Ok(Self {
            database,
            label_strip_prefix,
        })
    }

    /// Compile the configured label rule
    pub fn label_rule(&self) -> Result<LabelRule> {
        match &self.label_strip_prefix {
            Some(pattern) => {
                let regex = Regex::new(pattern).map_err(|e| {
                    LoaderError::config(format!(
                        "invalid label prefix pattern '{}': {}",
                        pattern, e
                    ))
                })?;
                Ok(LabelRule::new(Some(regex)))
            }
            None => Ok(LabelRule::new(None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_prefix_compiles() {
        let config = LoaderConfig {
            database: DbConfig::default(),
            label_strip_prefix: Some(DEFAULT_LABEL_STRIP_PREFIX.to_string()),
        };
        let rule = config.label_rule().unwrap();
        assert_eq!(
            rule.apply("Edward Ruscha photographs of Los Angeles streets: Roll 7"),
            "Roll 7"
        );
        assert_eq!(rule.apply("Edward Ruscha photographs of Hollywood"), "Hollywood");
        assert_eq!(rule.apply("Unrelated label"), "Unrelated label");
    }

    #[test]
    fn test_empty_prefix_disables_rule() {
        let config = LoaderConfig::from_env_with(
            Some("postgresql://localhost/test".to_string()),
            Some(String::new()),
        )
        .unwrap();
        assert!(config.label_strip_prefix.is_none());
        let rule = config.label_rule().unwrap();
        assert_eq!(rule.apply("Edward Ruscha photographs of X"), "Edward Ruscha photographs of X");
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let config = LoaderConfig {
            database: DbConfig::default(),
            label_strip_prefix: Some("(unclosed".to_string()),
        };
        assert!(matches!(
            config.label_rule(),
            Err(LoaderError::Config(_))
        ));
    }

    #[test]
    fn test_cli_override_wins() {
        let config = LoaderConfig::from_env_with(
            Some("postgresql://localhost/test".to_string()),
            Some("^Archive: ".to_string()),
        )
        .unwrap();
        assert_eq!(config.label_strip_prefix.as_deref(), Some("^Archive: "));
    }
}
