//! Builder pattern for constructing feedback runtimes.
//!
//! The builder supports multiple configuration sources using figment:
//! - Default values
//! - Config files (TOML, YAML, JSON)
//! - Environment variables
//! - Programmatic overrides
//! - CLI arguments via clap

use crate::config::FeedbackConfig;
use crate::error::Result;
use crate::runtime::FeedbackRuntime;

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use prometheus::Registry;
use std::path::Path;

/// Builder for constructing a [`FeedbackRuntime`].
///
/// Configuration sources are merged in the order the builder methods are
/// called; later sources override earlier ones. Defaults always come first.
///
/// # Examples
///
/// ```ignore
/// use feedback_rs::FeedbackBuilder;
///
/// let runtime = FeedbackBuilder::new()
///     .file("feedback.toml")
///     .env_prefix("FEEDBACK")
///     .prefix("myapp")
///     .tokio_threads(2)
///     .build()?;
/// ```
pub struct FeedbackBuilder {
    figment: Figment,
    prometheus_registry: Option<Registry>,
}

impl Default for FeedbackBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FeedbackBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedbackBuilder")
            .field("figment", &self.figment)
            .field(
                "prometheus_registry",
                &self.prometheus_registry.as_ref().map(|_| "<Registry>"),
            )
            .finish()
    }
}

impl FeedbackBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            figment: Figment::from(Serialized::defaults(FeedbackConfig::default())),
            prometheus_registry: None,
        }
    }

    /// Add a configuration file.
    ///
    /// Supports TOML, YAML, and JSON formats (detected by extension, TOML
    /// otherwise). Files are merged in the order they are added.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref();
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        self.figment = match extension.to_lowercase().as_str() {
            "yaml" | "yml" => self.figment.merge(Yaml::file(path)),
            "json" => self.figment.merge(Json::file(path)),
            _ => self.figment.merge(Toml::file(path)),
        };
        self
    }

    /// Add environment variables with a prefix.
    ///
    /// Variables are read as `{PREFIX}_{KEY}`, e.g. `FEEDBACK_TOKIO_THREADS`.
    ///
    /// ```ignore
    /// // Will read MYAPP_PREFIX, MYAPP_TOKIO_THREADS, etc.
    /// let builder = FeedbackBuilder::new().env_prefix("MYAPP");
    /// ```
    pub fn env_prefix(mut self, prefix: &str) -> Self {
        self.figment = self
            .figment
            .merge(Env::prefixed(&format!("{}_", prefix)));
        self
    }

    /// Set the thread name prefix.
    ///
    /// Thread names will be formatted as `{prefix}-tokio-{NNNN}` and
    /// `{prefix}-rayon-{NNNN}`.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("prefix", prefix.into()));
        self
    }

    /// Set the number of tokio worker threads.
    ///
    /// Default is 1 thread.
    pub fn tokio_threads(mut self, n: usize) -> Self {
        self.figment = self.figment.merge(Serialized::default("tokio_threads", n));
        self
    }

    /// Set the number of rayon threads.
    ///
    /// Default is the remaining CPUs after tokio threads are allocated.
    pub fn rayon_threads(mut self, n: usize) -> Self {
        self.figment = self.figment.merge(Serialized::default("rayon_threads", n));
        self
    }

    /// Set the prefix of the runtime's metric names.
    pub fn metrics_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("metrics_prefix", prefix.into()));
        self
    }

    /// Provide an external Prometheus registry for metrics exposition.
    ///
    /// ```ignore
    /// use prometheus::Registry;
    ///
    /// let registry = Registry::new();
    /// let runtime = FeedbackBuilder::new()
    ///     .prometheus_registry(registry.clone())
    ///     .build()?;
    ///
    /// let metric_families = registry.gather();
    /// ```
    pub fn prometheus_registry(mut self, registry: Registry) -> Self {
        self.prometheus_registry = Some(registry);
        self
    }

    /// Apply CLI argument overrides.
    ///
    /// Only the arguments that were given override earlier sources.
    pub fn with_cli_args(mut self, args: &FeedbackArgs) -> Self {
        if let Some(ref prefix) = args.feedback_prefix {
            self.figment = self
                .figment
                .merge(Serialized::default("prefix", prefix.clone()));
        }
        if let Some(threads) = args.feedback_tokio_threads {
            self.figment = self
                .figment
                .merge(Serialized::default("tokio_threads", threads));
        }
        if let Some(threads) = args.feedback_rayon_threads {
            self.figment = self
                .figment
                .merge(Serialized::default("rayon_threads", threads));
        }
        self
    }

    /// Resolve the configuration without building a runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration extraction fails.
    pub fn config(&self) -> Result<FeedbackConfig> {
        let mut config: FeedbackConfig = self.figment.extract().map_err(Box::new)?;
        config.prometheus_registry = self.prometheus_registry.clone();
        Ok(config)
    }

    /// Build the runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration extraction fails
    /// - A thread count is zero
    /// - Runtime construction fails
    pub fn build(self) -> Result<FeedbackRuntime> {
        FeedbackRuntime::from_config(self.config()?)
    }
}

/// CLI arguments for feedback runtime configuration.
///
/// Flatten into a clap `Parser` and apply with
/// [`FeedbackBuilder::with_cli_args`].
///
/// ```ignore
/// use clap::Parser;
/// use feedback_rs::{FeedbackArgs, FeedbackBuilder};
///
/// #[derive(Parser)]
/// struct MyArgs {
///     #[command(flatten)]
///     feedback: FeedbackArgs,
/// }
///
/// let args = MyArgs::parse();
/// let runtime = FeedbackBuilder::new()
///     .with_cli_args(&args.feedback)
///     .build()?;
/// ```
#[derive(Debug, Default, Clone, clap::Args)]
pub struct FeedbackArgs {
    /// Thread name prefix
    #[arg(long)]
    pub feedback_prefix: Option<String>,

    /// Number of tokio worker threads
    #[arg(long)]
    pub feedback_tokio_threads: Option<usize>,

    /// Number of rayon threads
    #[arg(long)]
    pub feedback_rayon_threads: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = FeedbackBuilder::new().config().unwrap();
        assert_eq!(config.prefix, "feedback");
        assert_eq!(config.metrics_prefix, "feedback");
        assert!(config.tokio_threads.is_none());
        assert!(config.rayon_threads.is_none());
    }

    #[test]
    fn test_builder_programmatic_override() {
        let config = FeedbackBuilder::new()
            .prefix("myapp")
            .tokio_threads(2)
            .rayon_threads(6)
            .metrics_prefix("myapp_loops")
            .config()
            .unwrap();

        assert_eq!(config.prefix, "myapp");
        assert_eq!(config.tokio_threads, Some(2));
        assert_eq!(config.rayon_threads, Some(6));
        assert_eq!(config.metrics_prefix, "myapp_loops");
    }

    #[test]
    fn test_builder_cli_args() {
        let args = FeedbackArgs {
            feedback_prefix: Some("cliapp".to_string()),
            feedback_tokio_threads: Some(1),
            feedback_rayon_threads: Some(3),
        };

        let config = FeedbackBuilder::new()
            .prefix("original")
            .with_cli_args(&args)
            .config()
            .unwrap();

        // CLI args should override programmatic values
        assert_eq!(config.prefix, "cliapp");
        assert_eq!(config.tokio_threads, Some(1));
        assert_eq!(config.rayon_threads, Some(3));
    }

    #[test]
    fn test_builder_partial_cli_args() {
        let args = FeedbackArgs {
            feedback_prefix: Some("cliapp".to_string()),
            ..FeedbackArgs::default()
        };

        let config = FeedbackBuilder::new()
            .prefix("original")
            .tokio_threads(3)
            .with_cli_args(&args)
            .config()
            .unwrap();

        assert_eq!(config.prefix, "cliapp");
        assert_eq!(config.tokio_threads, Some(3));
    }

    #[test]
    fn test_builder_file_and_env() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "feedback.toml",
                r#"
                    prefix = "fromfile"
                    tokio_threads = 2
                "#,
            )?;
            jail.set_env("FBTEST_TOKIO_THREADS", "4");

            let config = FeedbackBuilder::new()
                .file("feedback.toml")
                .env_prefix("FBTEST")
                .config()
                .map_err(|e| e.to_string())?;

            assert_eq!(config.prefix, "fromfile");
            assert_eq!(config.tokio_threads, Some(4));
            Ok(())
        });
    }

    #[test]
    fn test_builder_keeps_registry() {
        let registry = Registry::new();
        let config = FeedbackBuilder::new()
            .prometheus_registry(registry)
            .config()
            .unwrap();
        assert!(config.prometheus_registry.is_some());
    }
}
