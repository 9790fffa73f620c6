use serde::Deserialize;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use tracing_subscriber::filter::LevelFilter;

use super::diagnostics::{Diagnostic, Diagnostics, LoadError};
use super::partial::{FieldSources, PartialApiConfig, PartialConfig, PartialElviaConfig};

/// Default Elvia grid tariff API base URL
pub const DEFAULT_ELVIA_API_URL: &str = "https://elvia.azure-api.net/grid-tariff";

/// Default minutes between Elvia refreshes
pub const DEFAULT_UPDATE_INTERVAL_MINUTES: u64 = 5;

/// Longest accepted refresh interval, one day
pub const MAX_UPDATE_INTERVAL_MINUTES: u64 = 24 * 60;

const DEFAULT_API_LISTEN: &str = "127.0.0.1";
const DEFAULT_API_PORT: u16 = 8565;

#[derive(Debug, Default)]
pub struct Config {
    pub logging: LoggingConfig,

    /// HTTP API; disabled when the `[api]` section is absent
    pub api: Option<ApiConfig>,

    pub integrations: IntegrationsConfig,
}

// LogLevel needs Deserialize because it's used in PartialLoggingConfig with toml::Spanned
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: LogLevel,

    /// Per-target levels, e.g. `"tariffd::integrations::elvia" = "debug"`
    pub overrides: HashMap<String, LogLevel>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    pub listen: IpAddr,
    pub port: u16,
}

#[derive(Debug, Default)]
pub struct IntegrationsConfig {
    pub elvia: Option<ElviaConfig>,
}

/// Configuration for the Elvia grid tariff integration
#[derive(Clone, PartialEq)]
pub struct ElviaConfig {
    /// Subscription key for the Elvia API portal
    pub api_key: String,

    /// Metering point (målepunkt) to fetch tariffs for
    pub metering_point_id: String,

    /// Time between refreshes
    ///
    /// Between refreshes the sensors are re-derived from the cached tariff
    /// whenever a price period starts or ends, so a long interval does not
    /// hold an expired price.
    pub update_interval: Duration,

    pub api_url: String,
}

impl std::fmt::Debug for ElviaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElviaConfig")
            .field("api_key", &"<redacted>")
            .field("metering_point_id", &self.metering_point_id)
            .field("update_interval", &self.update_interval)
            .field("api_url", &self.api_url)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("{0}")]
    Invalid(Diagnostics),
}

impl Config {
    /// Load configuration from multiple TOML files with import resolution
    ///
    /// Supports:
    /// - Multiple config files (e.g., base + secrets)
    /// - Import statements within config files
    /// - Conflict detection across all sources
    /// - Validation with all errors and warnings reported together
    ///
    /// Returns Ok((Config, diagnostics)) where diagnostics contains only warnings.
    pub fn from_files(paths: &[PathBuf]) -> Result<(Self, Diagnostics), ConfigError> {
        let configs = PartialConfig::load_with_imports(paths)?;
        let (partial, diagnostics) = PartialConfig::merge(configs);
        Self::from_partial(partial, diagnostics)
    }

    /// Convert a PartialConfig to a Config, validating all fields
    ///
    /// Takes diagnostics from the merge step and adds validation diagnostics.
    pub fn from_partial(
        partial: PartialConfig,
        mut diagnostics: Vec<Diagnostic>,
    ) -> Result<(Self, Diagnostics), ConfigError> {
        let logging = match partial.logging {
            Some(partial_logging) => LoggingConfig {
                level: partial_logging
                    .level
                    .map(|s| *s.get_ref())
                    .unwrap_or_default(),
                overrides: partial_logging
                    .overrides
                    .map(|hm| hm.into_iter().map(|(k, v)| (k, *v.get_ref())).collect())
                    .unwrap_or_default(),
            },
            None => LoggingConfig::default(),
        };

        let api = partial
            .api
            .map(|api| Self::validate_api(api, &partial.field_sources, &mut diagnostics));

        let elvia = partial
            .integrations
            .and_then(|integrations| integrations.elvia)
            .map(|elvia| Self::validate_elvia(elvia, &partial.field_sources, &mut diagnostics));

        let config = Config {
            logging,
            api,
            integrations: IntegrationsConfig { elvia },
        };

        let diagnostics = Diagnostics(diagnostics);
        if diagnostics.has_errors() {
            Err(ConfigError::Invalid(diagnostics))
        } else {
            Ok((config, diagnostics))
        }
    }

    fn validate_api(
        partial: PartialApiConfig,
        sources: &FieldSources,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> ApiConfig {
        let listen = match partial.listen {
            Some(listen) => match listen.get_ref().parse::<IpAddr>() {
                Ok(addr) => addr,
                Err(_) => {
                    diagnostics.push(Diagnostic::validation(
                        "api.listen",
                        format!("'{}' is not an IP address", listen.get_ref()),
                        Some((listen.span(), sources.get("api.listen"))),
                    ));
                    IpAddr::from([127, 0, 0, 1]) // Default for error recovery
                }
            },
            None => DEFAULT_API_LISTEN
                .parse()
                .unwrap_or(IpAddr::from([127, 0, 0, 1])),
        };

        ApiConfig {
            listen,
            port: partial
                .port
                .map(|p| p.into_inner())
                .unwrap_or(DEFAULT_API_PORT),
        }
    }

    fn validate_elvia(
        partial: PartialElviaConfig,
        sources: &FieldSources,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> ElviaConfig {
        let mut required = |field: &str, value: Option<toml::Spanned<String>>| match value {
            Some(v) if !v.get_ref().trim().is_empty() => v.into_inner(),
            Some(v) => {
                let field_path = format!("integrations.elvia.{}", field);
                let source = sources.get(&field_path);
                diagnostics.push(Diagnostic::validation(
                    field_path,
                    format!("{} must not be empty", field),
                    Some((v.span(), source)),
                ));
                String::new()
            }
            None => {
                diagnostics.push(Diagnostic::validation(
                    format!("integrations.elvia.{}", field),
                    format!("{} is required", field),
                    None,
                ));
                String::new() // Default for error recovery
            }
        };

        let api_key = required("api_key", partial.api_key);
        let metering_point_id = required("metering_point_id", partial.metering_point_id);

        let update_interval = match partial.update_interval {
            Some(interval) => {
                let located = Some((
                    interval.span(),
                    sources.get("integrations.elvia.update_interval"),
                ));
                match u64::try_from(*interval.get_ref()) {
                    Ok(minutes @ 1..=MAX_UPDATE_INTERVAL_MINUTES) => minutes,
                    Ok(0) | Err(_) => {
                        diagnostics.push(Diagnostic::validation(
                            "integrations.elvia.update_interval",
                            "update_interval must be at least 1 minute",
                            located,
                        ));
                        DEFAULT_UPDATE_INTERVAL_MINUTES
                    }
                    Ok(_) => {
                        diagnostics.push(Diagnostic::validation(
                            "integrations.elvia.update_interval",
                            format!(
                                "update_interval must be at most {} minutes",
                                MAX_UPDATE_INTERVAL_MINUTES
                            ),
                            located,
                        ));
                        DEFAULT_UPDATE_INTERVAL_MINUTES
                    }
                }
            }
            None => DEFAULT_UPDATE_INTERVAL_MINUTES,
        };

        let api_url = match partial.api_url {
            Some(url)
                if url.get_ref().starts_with("https://") || url.get_ref().starts_with("http://") =>
            {
                url.into_inner().trim_end_matches('/').to_string()
            }
            Some(url) => {
                diagnostics.push(Diagnostic::validation(
                    "integrations.elvia.api_url",
                    "api_url must be an http:// or https:// URL",
                    Some((url.span(), sources.get("integrations.elvia.api_url"))),
                ));
                DEFAULT_ELVIA_API_URL.to_string()
            }
            None => DEFAULT_ELVIA_API_URL.to_string(),
        };

        ElviaConfig {
            api_key,
            metering_point_id,
            update_interval: Duration::from_secs(update_interval * 60),
            api_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::diagnostics::Error;
    use std::fs;

    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_full_config() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "tariffd.toml",
            r#"
[logging]
level = "debug"

[logging.overrides]
"tariffd::api" = "warn"

[api]
listen = "0.0.0.0"
port = 9000

[integrations.elvia]
api_key = "key"
metering_point_id = "707057500012345678"
update_interval = 60
"#,
        );

        let (config, diagnostics) = Config::from_files(&[path]).unwrap();
        assert!(diagnostics.0.is_empty());
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.overrides["tariffd::api"], LogLevel::Warn);

        let api = config.api.unwrap();
        assert_eq!(api.listen, "0.0.0.0".parse::<IpAddr>().unwrap());
        assert_eq!(api.port, 9000);

        let elvia = config.integrations.elvia.unwrap();
        assert_eq!(elvia.api_key, "key");
        assert_eq!(elvia.metering_point_id, "707057500012345678");
        assert_eq!(elvia.update_interval, Duration::from_secs(3600));
        assert_eq!(elvia.api_url, DEFAULT_ELVIA_API_URL);
    }

    #[test]
    fn test_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "tariffd.toml",
            "[api]\n\n[integrations.elvia]\napi_key = \"k\"\nmetering_point_id = \"1\"\n",
        );

        let (config, _) = Config::from_files(&[path]).unwrap();
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(
            config.api,
            Some(ApiConfig {
                listen: IpAddr::from([127, 0, 0, 1]),
                port: 8565,
            })
        );
        assert_eq!(
            config.integrations.elvia.unwrap().update_interval,
            Duration::from_secs(DEFAULT_UPDATE_INTERVAL_MINUTES * 60)
        );
    }

    #[test]
    fn test_no_sections_disables_everything() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "tariffd.toml", "[logging]\nlevel = \"warn\"\n");

        let (config, _) = Config::from_files(&[path]).unwrap();
        assert!(config.api.is_none());
        assert!(config.integrations.elvia.is_none());
    }

    #[test]
    fn test_secrets_import() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "private/secrets.toml",
            "[integrations.elvia]\napi_key = \"from-secrets\"\n",
        );
        let main = write(
            &dir,
            "tariffd.toml",
            r#"
imports = ["private/secrets.toml"]

[integrations.elvia]
metering_point_id = "707057500012345678"
"#,
        );

        let (config, _) = Config::from_files(&[main]).unwrap();
        assert_eq!(config.integrations.elvia.unwrap().api_key, "from-secrets");
    }

    #[test]
    fn test_import_cycle_detection() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.toml", "imports = [\"b.toml\"]\n");
        write(&dir, "b.toml", "imports = [\"a.toml\"]\n");

        let err = Config::from_files(&[dir.path().join("a.toml")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Load(LoadError::ImportCycle { .. })
        ));
        assert!(err.to_string().contains("Import cycle"));
    }

    #[test]
    fn test_missing_required_fields_reported_together() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "tariffd.toml", "[integrations.elvia]\nupdate_interval = 0\n");

        let err = Config::from_files(&[path]).unwrap_err();
        let ConfigError::Invalid(diagnostics) = &err else {
            panic!("Expected validation errors, got {:?}", err);
        };

        let fields: Vec<&str> = diagnostics
            .0
            .iter()
            .filter_map(|d| match d {
                Diagnostic::Error(Error::Validation(v)) => Some(v.field_path.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(
            fields,
            vec![
                "integrations.elvia.api_key",
                "integrations.elvia.metering_point_id",
                "integrations.elvia.update_interval",
            ]
        );
    }

    #[test]
    fn test_invalid_api_listen_and_url() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "tariffd.toml",
            r#"
[api]
listen = "localhost"

[integrations.elvia]
api_key = "k"
metering_point_id = "1"
api_url = "ftp://example.com"
"#,
        );

        let err = Config::from_files(&[path]).unwrap_err().to_string();
        assert!(err.contains("api.listen"));
        assert!(err.contains("integrations.elvia.api_url"));
    }

    #[test]
    fn test_conflict_between_files() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "a.toml", "[integrations.elvia]\napi_key = \"one\"\n");
        let b = write(&dir, "b.toml", "[integrations.elvia]\napi_key = \"two\"\n");

        let err = Config::from_files(&[a, b]).unwrap_err().to_string();
        assert!(err.contains("Merge conflict"));
        assert!(err.contains("integrations.elvia.api_key"));
    }

    #[test]
    fn test_missing_file_error() {
        let missing_path = PathBuf::from("/nonexistent/tariffd.toml");

        let err = Config::from_files(&[missing_path]).unwrap_err().to_string();
        assert!(err.contains("Failed to read"));
        assert!(err.contains("/nonexistent/tariffd.toml"));
    }

    #[test]
    fn test_api_key_not_in_debug_output() {
        let config = ElviaConfig {
            api_key: "super-secret".to_string(),
            metering_point_id: "1".to_string(),
            update_interval: Duration::from_secs(300),
            api_url: DEFAULT_ELVIA_API_URL.to_string(),
        };
        assert!(!format!("{:?}", config).contains("super-secret"));
    }

    #[test]
    fn test_update_interval_upper_bound() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "tariffd.toml",
            "[integrations.elvia]\napi_key = \"k\"\nmetering_point_id = \"1\"\nupdate_interval = 9223372036854775807\n",
        );

        let err = Config::from_files(&[path]).unwrap_err();
        let ConfigError::Invalid(diagnostics) = &err else {
            panic!("Expected validation errors, got {:?}", err);
        };
        assert!(matches!(
            &diagnostics.0[..],
            [Diagnostic::Error(Error::Validation(v))]
                if v.field_path == "integrations.elvia.update_interval"
        ));
        assert!(err.to_string().contains("must be at most 1440 minutes"));
    }

    #[test]
    fn test_update_interval_of_one_day_accepted() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "tariffd.toml",
            "[integrations.elvia]\napi_key = \"k\"\nmetering_point_id = \"1\"\nupdate_interval = 1440\n",
        );

        let (config, _) = Config::from_files(&[path]).unwrap();
        assert_eq!(
            config.integrations.elvia.unwrap().update_interval,
            Duration::from_secs(24 * 60 * 60)
        );
    }

    #[test]
    fn test_validation_error_points_into_defining_file() {
        let dir = TempDir::new().unwrap();
        // The import is longer than the main file, so a span from one
        // rendered against the other would land on the wrong text
        write(
            &dir,
            "secrets.toml",
            "# Credentials for the Elvia grid tariff API portal\n\
             # Keep this file out of version control\n\
             [integrations.elvia]\n\
             api_key = \"from-secrets\"\n",
        );
        let main = write(
            &dir,
            "tariffd.toml",
            "imports = [\"secrets.toml\"]\n[integrations.elvia]\nmetering_point_id = \"1\"\nupdate_interval = 0\n",
        );

        let err = Config::from_files(&[main]).unwrap_err();
        let ConfigError::Invalid(diagnostics) = &err else {
            panic!("Expected validation errors, got {:?}", err);
        };
        let [Diagnostic::Error(Error::Validation(v))] = &diagnostics.0[..] else {
            panic!("Expected one validation error, got {:?}", diagnostics);
        };
        let source = v.source.as_ref().unwrap();
        assert!(source.file_path.ends_with("tariffd.toml"));
        assert_eq!(&source.content[v.span.clone().unwrap()], "0");

        let rendered = err.to_string();
        assert!(rendered.contains("must be at least 1 minute"));
        assert!(rendered.contains("tariffd.toml"));
        assert!(!rendered.contains("Keep this file out of version control"));
    }
}
