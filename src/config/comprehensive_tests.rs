//! Additional comprehensive tests for configuration loading and validation

use super::{ConfigParser, ENV_LOCK};
use crate::{
    cli::Cli,
    logging::LogFormat,
    models::ProbeVariant,
};
use clap::Parser;
use std::env;
use std::io::Write;
use std::sync::MutexGuard;
use tempfile::{Builder, NamedTempFile};

const YAML_CONFIG: &str = r#"
probes:
  - host: 1.1.1.1
    type: tcp-handshake
    port: 53
  - host: 9.9.9.9
    name: quad9
    types: [icmp-echo, udp-dns-query, tcp-dns-query]
interval_seconds: 20
timeout_seconds: 4
port: 9100
ip: true
"#;

/// Holds the env lock with every `PROBER_*` variable cleared
struct CleanEnv {
    _guard: MutexGuard<'static, ()>,
}

impl CleanEnv {
    fn new() -> Self {
        let guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        for (key, _) in env::vars() {
            if key.starts_with("PROBER_") {
                env::remove_var(key);
            }
        }
        Self { _guard: guard }
    }
}

impl Drop for CleanEnv {
    fn drop(&mut self) {
        for (key, _) in env::vars() {
            if key.starts_with("PROBER_") {
                env::remove_var(key);
            }
        }
    }
}

fn write_config(suffix: &str, content: &str) -> NamedTempFile {
    let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

fn parser_for(file: &NamedTempFile, extra: &[&str]) -> ConfigParser {
    let mut args = vec!["nprober", "--config-path", file.path().to_str().unwrap()];
    args.extend_from_slice(extra);
    ConfigParser::new(Cli::parse_from(args))
}

/// Loading a file end to end
mod file_loading {
    use super::*;

    #[test]
    fn test_yaml_config() {
        let _env = CleanEnv::new();
        let file = write_config(".yml", YAML_CONFIG);

        let loaded = parser_for(&file, &[]).parse().unwrap();
        let config = loaded.config;

        assert_eq!(config.interval_seconds, 20);
        assert_eq!(config.timeout_seconds, 4);
        assert_eq!(config.port, 9100);
        assert!(config.public_ip);
        assert_eq!(config.public_ip_interval_seconds, 60);

        let specs = config.probe_specs().unwrap();
        assert_eq!(specs.len(), 4);
        assert_eq!(specs[0].variant, ProbeVariant::TcpHandshake);
        assert!(specs[1..].iter().all(|spec| spec.label() == "quad9"));
        assert!(loaded.sources.iter().any(|source| source.ends_with(".yml")));
    }

    #[test]
    fn test_toml_config() {
        let _env = CleanEnv::new();
        let file = write_config(
            ".toml",
            r#"
interval_seconds = 30
log_format = "json"

[[probes]]
host = "dns.google"
type = "tcp-dns-query"
"#,
        );

        let config = parser_for(&file, &[]).parse().unwrap().config;
        assert_eq!(config.interval_seconds, 30);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.probe_specs().unwrap()[0].port, Some(53));
    }

    #[test]
    fn test_unknown_variant_rejected() {
        let _env = CleanEnv::new();
        let file = write_config(".yml", "probes:\n  - host: 1.1.1.1\n    type: http-get\n");

        let error = parser_for(&file, &[]).parse().unwrap_err();
        assert_eq!(error.category(), "CONFIG");
    }

    #[test]
    fn test_empty_config_rejected() {
        let _env = CleanEnv::new();
        let file = write_config(".yml", "interval_seconds: 10\n");

        let error = parser_for(&file, &[]).parse().unwrap_err();
        assert!(error.to_string().contains("No probes configured"));
    }

    #[test]
    fn test_timeout_not_shorter_than_interval_rejected() {
        let _env = CleanEnv::new();
        let file = write_config(
            ".yml",
            "probes:\n  - host: 1.1.1.1\n    type: icmp-echo\ninterval_seconds: 5\ntimeout_seconds: 5\n",
        );

        assert!(parser_for(&file, &[]).parse().is_err());
    }
}

/// Precedence between file, environment and CLI
mod precedence {
    use super::*;

    #[test]
    fn test_env_overrides_file() {
        let _env = CleanEnv::new();
        env::set_var("PROBER_INTERVAL_SECONDS", "45");
        env::set_var("PROBER_HISTOGRAM_BUCKETS", "0.1,0.5,1");
        let file = write_config(".yml", YAML_CONFIG);

        let loaded = parser_for(&file, &[]).parse().unwrap();
        assert_eq!(loaded.config.interval_seconds, 45);
        assert_eq!(loaded.config.histogram_buckets, vec![0.1, 0.5, 1.0]);
        assert!(loaded
            .sources
            .iter()
            .any(|source| source.contains("PROBER_INTERVAL_SECONDS")));
    }

    #[test]
    fn test_cli_overrides_env() {
        let _env = CleanEnv::new();
        env::set_var("PROBER_PORT", "9200");
        let file = write_config(".yml", YAML_CONFIG);

        let loaded = parser_for(&file, &["--port", "9300"]).parse().unwrap();
        assert_eq!(loaded.config.port, 9300);
        assert_eq!(loaded.sources.last().map(String::as_str), Some("command line"));
    }

    #[test]
    fn test_invalid_env_value_rejected() {
        let _env = CleanEnv::new();
        env::set_var("PROBER_TIMEOUT_SECONDS", "soon");
        let file = write_config(".yml", YAML_CONFIG);

        let error = parser_for(&file, &[]).parse().unwrap_err();
        assert!(error.to_string().contains("PROBER_TIMEOUT_SECONDS"));
    }
}

/// Non-fatal warnings surfaced by a full load
mod warnings {
    use super::*;

    #[test]
    fn test_warnings_reported_with_config() {
        let _env = CleanEnv::new();
        let file = write_config(
            ".yml",
            "probes:\n  - host: 127.0.0.1\n    type: tcp-handshake\n    port: 0\ninterval_seconds: 2\ntimeout_seconds: 1\n",
        );

        let loaded = parser_for(&file, &[]).parse().unwrap();
        let messages: Vec<_> = loaded.warnings.iter().map(|w| w.message.as_str()).collect();

        assert!(messages.iter().any(|m| m.contains("port 0")));
        assert!(messages.iter().any(|m| m.contains("private or loopback")));
        assert!(messages.iter().any(|m| m.contains("shorter than the recommended")));
    }
}
