//! Configuration loading from file, environment variables and CLI arguments

use crate::{
    cli::Cli,
    config::env::EnvManager,
    config::validation::{validate_config, ValidationWarning},
    error::{AppError, Result},
    models::Config,
};
use ::config::{Environment, File, FileFormat};
use std::path::Path;

/// A loaded configuration together with where it came from
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub warnings: Vec<ValidationWarning>,
    pub sources: Vec<String>,
}

/// Configuration parser that layers file, environment and CLI arguments
pub struct ConfigParser {
    cli: Cli,
}

impl ConfigParser {
    /// Create a new configuration parser with CLI arguments
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Parse and build the complete configuration
    pub fn parse(&self) -> Result<LoadedConfig> {
        let mut sources = vec!["defaults".to_string()];

        // .env feeds the environment layer below
        if EnvManager::load_env_file()? {
            sources.push(".env".to_string());
        }

        let mut config = self.load_layers(&mut sources)?;

        if self.apply_cli_overrides(&mut config) {
            sources.push("command line".to_string());
        }

        let warnings = validate_config(&config)?;

        Ok(LoadedConfig {
            config,
            warnings,
            sources,
        })
    }

    /// Merge the configuration file and `PROBER_*` variables over the defaults
    fn load_layers(&self, sources: &mut Vec<String>) -> Result<Config> {
        let path = &self.cli.config_path;
        if !path.is_file() {
            return Err(AppError::config(format!(
                "Configuration file {} not found",
                path.display()
            )));
        }

        EnvManager::validate_overrides()?;
        let overrides = EnvManager::overrides();

        let layered = ::config::Config::builder()
            .add_source(File::from(path.as_path()).format(file_format(path)?).required(true))
            .add_source(
                Environment::with_prefix("PROBER")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("histogram_buckets")
                    .try_parsing(true),
            )
            .build()?;

        sources.push(path.display().to_string());
        if !overrides.is_empty() {
            sources.push(format!("environment ({})", overrides.join(", ")));
        }

        layered
            .try_deserialize::<Config>()
            .map_err(|e| AppError::config(format!("Invalid configuration in {}: {}", path.display(), e)))
    }

    /// Apply CLI argument overrides. Returns whether anything was overridden.
    fn apply_cli_overrides(&self, config: &mut Config) -> bool {
        let mut applied = false;

        if let Some(port) = self.cli.port {
            config.port = port;
            applied = true;
        }

        if let Some(ref address) = self.cli.listen_address {
            config.listen_address = address.clone();
            applied = true;
        }

        if let Some(interval) = self.cli.interval {
            config.interval_seconds = interval;
            applied = true;
        }

        if let Some(timeout) = self.cli.timeout {
            config.timeout_seconds = timeout;
            applied = true;
        }

        if let Some(format) = self.cli.log_format {
            config.log_format = format;
            applied = true;
        }

        if let Some(color) = self.cli.color_override() {
            config.enable_color = color;
            applied = true;
        }

        // Flags can only switch these on
        if self.cli.verbose {
            config.verbose = true;
            applied = true;
        }
        if self.cli.debug {
            config.debug = true;
            applied = true;
        }

        applied
    }
}

/// Pick the file format from the extension
fn file_format(path: &Path) -> Result<FileFormat> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("yml") | Some("yaml") => Ok(FileFormat::Yaml),
        Some("toml") => Ok(FileFormat::Toml),
        Some("json") => Ok(FileFormat::Json),
        _ => Err(AppError::config(format!(
            "Cannot infer configuration format of {}; use .yml, .yaml, .toml or .json",
            path.display()
        ))),
    }
}

/// Convenience function to load complete configuration from CLI arguments
pub fn load_config(cli: Cli) -> Result<LoadedConfig> {
    let parser = ConfigParser::new(cli);
    parser.parse()
}

/// Display configuration summary for debug purposes
pub fn display_config_summary(config: &Config) -> String {
    let mut summary = Vec::new();

    summary.push(format!("Probes: {}", config.probes.len()));
    summary.push(format!("Interval: {}s", config.interval_seconds));
    summary.push(format!("Timeout: {}s", config.timeout_seconds));
    summary.push(format!("Metrics: http://{}:{}/metrics", config.listen_address, config.port));
    summary.push(format!(
        "Public IP: {}",
        if config.public_ip {
            format!("every {}s", config.public_ip_interval_seconds)
        } else {
            "disabled".to_string()
        }
    ));
    summary.push(format!("Log Format: {}", config.log_format));
    summary.push(format!("Color Output: {}", config.enable_color));
    summary.push(format!("Verbose: {}", config.verbose));
    summary.push(format!("Debug: {}", config.debug));

    summary.join("\n")
}
