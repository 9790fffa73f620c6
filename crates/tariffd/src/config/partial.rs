use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use super::diagnostics::{
    Diagnostic, Error, LoadError, MergeConflictLocation, MergeError, SourceInfo, Warning,
};
use super::LogLevel;

type Spanned<T> = toml::Spanned<T>;

/// Defining file of each merged field, keyed by dotted field path
pub type FieldSources = HashMap<String, SourceInfo>;

/// A configuration file as written, before merging and validation.
///
/// Every leaf is optional and keeps its span so merge conflicts and validation
/// errors can point into the file that set it.
#[derive(Debug, Default, Deserialize)]
pub struct PartialConfig {
    #[serde(default)]
    pub imports: Vec<String>,

    pub logging: Option<PartialLoggingConfig>,
    pub api: Option<PartialApiConfig>,
    pub integrations: Option<PartialIntegrationsConfig>,

    /// Source information for error reporting (not serialized)
    #[serde(skip)]
    pub source: Option<SourceInfo>,

    /// File each merged field came from, keyed by field path
    #[serde(skip)]
    pub field_sources: FieldSources,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialLoggingConfig {
    pub level: Option<Spanned<LogLevel>>,
    pub overrides: Option<HashMap<String, Spanned<LogLevel>>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialApiConfig {
    pub listen: Option<Spanned<String>>,
    pub port: Option<Spanned<u16>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialIntegrationsConfig {
    pub elvia: Option<PartialElviaConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialElviaConfig {
    pub api_key: Option<Spanned<String>>,
    pub metering_point_id: Option<Spanned<String>>,
    /// Minutes between refreshes. Signed so that negative values reach validation.
    pub update_interval: Option<Spanned<i64>>,
    pub api_url: Option<Spanned<String>>,
}

/// First-wins merge bookkeeping: where each field was first set, plus the
/// conflicts found so far.
#[derive(Default)]
struct Merger {
    first_seen: HashMap<String, MergeConflictLocation>,
    sources: FieldSources,
    diagnostics: Vec<Diagnostic>,
}

impl Merger {
    fn field<T>(
        &mut self,
        field_path: String,
        slot: &mut Option<Spanned<T>>,
        incoming: Option<Spanned<T>>,
        source: &SourceInfo,
    ) {
        let Some(value) = incoming else {
            return;
        };

        let location = MergeConflictLocation {
            file_path: source.file_path.clone(),
            span: value.span(),
            content: source.content.clone(),
        };

        if let Some(prev) = self.first_seen.get(&field_path) {
            // Conflict: keep first value, record error
            self.diagnostics.push(Diagnostic::Error(Error::Merge(MergeError {
                message: format!("'{}' defined in multiple config files", field_path),
                field_path,
                conflicts: vec![prev.clone(), location],
            })));
        } else {
            *slot = Some(value);
            self.sources.insert(field_path.clone(), source.clone());
            self.first_seen.insert(field_path, location);
        }
    }
}

impl PartialConfig {
    /// Load a single config file without processing imports
    pub fn from_file(path: &Path) -> Result<Self, LoadError> {
        let content = std::fs::read_to_string(path).map_err(|e| LoadError::Io {
            path: path.to_path_buf(),
            error: e,
        })?;

        let mut config: PartialConfig = toml::from_str(&content).map_err(|e| LoadError::Parse {
            path: path.to_path_buf(),
            error: e,
        })?;

        config.source = Some(SourceInfo {
            file_path: path.to_path_buf(),
            content,
        });

        Ok(config)
    }

    /// Load config files with import resolution
    ///
    /// Each config file is loaded, then its imports are recursively processed.
    /// Returns all loaded configs in order (imports first, then parent).
    pub fn load_with_imports(paths: &[PathBuf]) -> Result<Vec<Self>, LoadError> {
        let mut visited = HashSet::new();
        let mut all_configs = Vec::new();

        for path in paths {
            Self::load_recursive(path, &mut visited, &mut all_configs)?;
        }

        Ok(all_configs)
    }

    fn load_recursive(
        path: &Path,
        visited: &mut HashSet<PathBuf>,
        configs: &mut Vec<Self>,
    ) -> Result<(), LoadError> {
        let canonical_path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

        if visited.contains(&canonical_path) {
            return Err(LoadError::ImportCycle {
                path: canonical_path,
                cycle: visited.iter().cloned().collect(),
            });
        }

        visited.insert(canonical_path.clone());

        let config = Self::from_file(path)?;

        for import in &config.imports {
            let import_path = PathBuf::from(import);

            // Relative imports resolve against the importing file's directory
            let resolved_path = if import_path.is_absolute() {
                import_path
            } else {
                path.parent()
                    .unwrap_or_else(|| Path::new("."))
                    .join(import_path)
            };

            Self::load_recursive(&resolved_path, visited, configs)?;
        }

        configs.push(config);

        // Siblings may import the same file; only ancestors form a cycle
        visited.remove(&canonical_path);

        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.imports.is_empty()
            && self.logging.is_none()
            && self.api.is_none()
            && self.integrations.is_none()
    }

    /// Merge multiple partial configs together
    ///
    /// Uses first-wins semantics: the first occurrence of a field is kept.
    /// Conflicts (same field defined in multiple configs) are collected as errors
    /// but merging continues so that all conflicts are reported at once.
    pub fn merge<I>(configs: I) -> (Self, Vec<Diagnostic>)
    where
        I: IntoIterator<Item = Self>,
    {
        let mut result = PartialConfig::default();
        let mut merger = Merger::default();

        for config in configs {
            let source = config.source.clone().unwrap_or_else(|| SourceInfo {
                file_path: PathBuf::from("<unknown>"),
                content: String::new(),
            });

            if config.is_empty() {
                merger
                    .diagnostics
                    .push(Diagnostic::Warning(Warning::EmptyConfig {
                        file_path: source.file_path.clone(),
                    }));
            }

            result.imports.extend(config.imports);

            if let Some(logging) = config.logging {
                let into = result.logging.get_or_insert_with(Default::default);
                merger.field("logging.level".to_string(), &mut into.level, logging.level, &source);

                // Overrides merge per key
                for (target, level) in logging.overrides.unwrap_or_default() {
                    let overrides = into.overrides.get_or_insert_with(HashMap::new);
                    let mut slot = overrides.remove(&target);
                    merger.field(
                        format!("logging.overrides.{}", target),
                        &mut slot,
                        Some(level),
                        &source,
                    );
                    if let Some(level) = slot {
                        overrides.insert(target, level);
                    }
                }
            }

            if let Some(api) = config.api {
                let into = result.api.get_or_insert_with(Default::default);
                merger.field("api.listen".to_string(), &mut into.listen, api.listen, &source);
                merger.field("api.port".to_string(), &mut into.port, api.port, &source);
            }

            if let Some(integrations) = config.integrations {
                let into = result.integrations.get_or_insert_with(Default::default);

                if let Some(elvia) = integrations.elvia {
                    let into = into.elvia.get_or_insert_with(Default::default);
                    let prefix = "integrations.elvia";
                    merger.field(format!("{prefix}.api_key"), &mut into.api_key, elvia.api_key, &source);
                    merger.field(
                        format!("{prefix}.metering_point_id"),
                        &mut into.metering_point_id,
                        elvia.metering_point_id,
                        &source,
                    );
                    merger.field(
                        format!("{prefix}.update_interval"),
                        &mut into.update_interval,
                        elvia.update_interval,
                        &source,
                    );
                    merger.field(format!("{prefix}.api_url"), &mut into.api_url, elvia.api_url, &source);
                }
            }
        }

        result.field_sources = merger.sources;
        (result, merger.diagnostics)
    }
}
