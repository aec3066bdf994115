//! Configuration types for the feedback runtime.

use serde::{Deserialize, Serialize};

use prometheus::Registry;

/// Configuration for a [`FeedbackRuntime`](crate::FeedbackRuntime).
///
/// This struct can be deserialized from TOML, YAML, JSON, or environment variables
/// using figment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedbackConfig {
    /// Thread name prefix (default: "feedback")
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Number of tokio worker threads (default: 1)
    #[serde(default)]
    pub tokio_threads: Option<usize>,

    /// Number of rayon threads (default: remaining CPUs after tokio threads, at least 1)
    #[serde(default)]
    pub rayon_threads: Option<usize>,

    /// Prefix of the runtime's metric names (default: "feedback")
    #[serde(default = "default_prefix")]
    pub metrics_prefix: String,

    /// Prometheus registry for metrics exposition.
    /// If provided, metrics will be registered for scraping.
    /// Not serializable - must be set programmatically.
    #[serde(skip)]
    pub prometheus_registry: Option<Registry>,
}

fn default_prefix() -> String {
    "feedback".to_string()
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            tokio_threads: None,
            rayon_threads: None,
            metrics_prefix: default_prefix(),
            prometheus_registry: None,
        }
    }
}

impl FeedbackConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the effective number of tokio threads.
    ///
    /// Returns the configured value or 1 as the default.
    pub fn effective_tokio_threads(&self) -> usize {
        self.tokio_threads.unwrap_or(1)
    }

    /// Get the effective number of rayon threads.
    ///
    /// Returns the configured value or the CPUs left over by the tokio
    /// threads, never less than one.
    pub fn effective_rayon_threads(&self, available_cpus: usize) -> usize {
        self.rayon_threads.unwrap_or_else(|| {
            available_cpus
                .saturating_sub(self.effective_tokio_threads())
                .max(1)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FeedbackConfig::default();
        assert_eq!(config.prefix, "feedback");
        assert_eq!(config.metrics_prefix, "feedback");
        assert!(config.tokio_threads.is_none());
        assert!(config.rayon_threads.is_none());
        assert!(config.prometheus_registry.is_none());
    }

    #[test]
    fn test_effective_tokio_threads() {
        let mut config = FeedbackConfig::default();
        assert_eq!(config.effective_tokio_threads(), 1);

        config.tokio_threads = Some(4);
        assert_eq!(config.effective_tokio_threads(), 4);
    }

    #[test]
    fn test_effective_rayon_threads() {
        let mut config = FeedbackConfig::default();
        assert_eq!(config.effective_rayon_threads(8), 7);

        config.tokio_threads = Some(2);
        assert_eq!(config.effective_rayon_threads(8), 6);

        // A single CPU still gets one rayon thread.
        assert_eq!(config.effective_rayon_threads(1), 1);

        config.rayon_threads = Some(4);
        assert_eq!(config.effective_rayon_threads(8), 4);
    }

    #[test]
    fn test_deserialize_config() {
        let toml = r#"
            prefix = "myapp"
            tokio_threads = 2
            rayon_threads = 6
            metrics_prefix = "myapp_loops"
        "#;

        let config: FeedbackConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.prefix, "myapp");
        assert_eq!(config.tokio_threads, Some(2));
        assert_eq!(config.rayon_threads, Some(6));
        assert_eq!(config.metrics_prefix, "myapp_loops");
    }
}
