use std::ops::Range;
use std::path::PathBuf;

/// Source information for where a diagnostic came from
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub file_path: PathBuf,
    pub content: String,
}

/// A diagnostic message that can be either a warning or an error
#[derive(Debug, Clone)]
pub enum Diagnostic {
    Warning(Warning),
    Error(Error),
}

/// Warning messages that don't prevent config loading
#[derive(Debug, Clone)]
pub enum Warning {
    EmptyConfig { file_path: PathBuf },
}

/// Error messages that indicate problems with the config
#[derive(Debug, Clone)]
pub enum Error {
    Merge(MergeError),
    Validation(ValidationError),
}

/// Error type for merge conflicts
#[derive(Debug, Clone)]
pub struct MergeError {
    pub field_path: String,
    pub message: String,
    pub conflicts: Vec<MergeConflictLocation>,
}

#[derive(Debug, Clone)]
pub struct MergeConflictLocation {
    pub file_path: PathBuf,
    pub span: Range<usize>,
    pub content: String,
}

/// Error type for validation failures
///
/// `span` and `source` are set when the offending value exists in a file; missing
/// required fields carry neither.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field_path: String,
    pub message: String,
    pub span: Option<Range<usize>>,
    pub source: Option<SourceInfo>,
}

/// Error type for config loading failures (parse errors, IO errors, etc.)
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Failed to read '{}': {error}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },

    #[error("Failed to parse '{}': {error}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        error: toml::de::Error,
    },

    #[error("Import cycle detected at '{}': involves {} file(s)", path.display(), cycle.len())]
    ImportCycle { path: PathBuf, cycle: Vec<PathBuf> },
}

impl Diagnostic {
    /// Returns true if this diagnostic is an error
    pub fn is_error(&self) -> bool {
        matches!(self, Diagnostic::Error(_))
    }

    /// Returns true if this diagnostic is a warning
    pub fn is_warning(&self) -> bool {
        matches!(self, Diagnostic::Warning(_))
    }

    pub(super) fn validation(
        field_path: impl Into<String>,
        message: impl Into<String>,
        located: Option<(Range<usize>, Option<&SourceInfo>)>,
    ) -> Self {
        let (span, source) = match located {
            Some((span, source)) => (Some(span), source.cloned()),
            None => (None, None),
        };
        Diagnostic::Error(Error::Validation(ValidationError {
            field_path: field_path.into(),
            message: message.into(),
            span,
            source,
        }))
    }
}

/// Collection of diagnostics produced while loading a configuration.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics(pub Vec<Diagnostic>);

impl Diagnostics {
    pub fn has_errors(&self) -> bool {
        self.0.iter().any(Diagnostic::is_error)
    }
}

impl std::fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&format_diagnostics(&self.0))
    }
}

/// Format all diagnostics for display using Ariadne
pub fn format_diagnostics(diagnostics: &[Diagnostic]) -> String {
    use ariadne::{Color, Label, Report, ReportKind};

    let mut output = Vec::new();

    for diagnostic in diagnostics {
        match diagnostic {
            Diagnostic::Warning(Warning::EmptyConfig { file_path }) => {
                let warning_msg = format!(
                    "Warning: Config file '{}' is empty and has no effect\n",
                    file_path.display()
                );
                output.extend_from_slice(warning_msg.as_bytes());
            }
            Diagnostic::Error(Error::Merge(merge_error)) => {
                let Some(first_conflict) = merge_error.conflicts.first() else {
                    let msg = format!(
                        "Merge conflict in field '{}': {}\n",
                        merge_error.field_path, merge_error.message
                    );
                    output.extend_from_slice(msg.as_bytes());
                    continue;
                };

                let mut report = Report::build(
                    ReportKind::Error,
                    (
                        first_conflict.file_path.to_string_lossy().to_string(),
                        first_conflict.span.clone(),
                    ),
                )
                .with_message(format!("Merge conflict in field '{}'", merge_error.field_path))
                .with_note(&merge_error.message);

                for (idx, conflict) in merge_error.conflicts.iter().enumerate() {
                    let label_msg = if idx == 0 {
                        "first definition here"
                    } else {
                        "conflicts with this definition"
                    };

                    report = report.with_label(
                        Label::new((
                            conflict.file_path.to_string_lossy().to_string(),
                            conflict.span.clone(),
                        ))
                        .with_message(label_msg)
                        .with_color(if idx == 0 { Color::Red } else { Color::Yellow }),
                    );
                }

                // One cache holding every file involved in the conflict
                let sources = merge_error.conflicts.iter().map(|conflict| {
                    (
                        conflict.file_path.to_string_lossy().to_string(),
                        conflict.content.clone(),
                    )
                });
                report
                    .finish()
                    .write(ariadne::sources(sources), &mut output)
                    .ok();
            }
            Diagnostic::Error(Error::Validation(validation_error)) => {
                let plain = format!(
                    "Validation error in '{}': {}\n",
                    validation_error.field_path, validation_error.message
                );
                match (&validation_error.span, &validation_error.source) {
                    // A span that does not fit the file is reported without it
                    (Some(span), Some(source)) if span.end <= source.content.len() => {
                        let file_id = source.file_path.to_string_lossy().to_string();
                        let written = Report::build(ReportKind::Error, (file_id.clone(), span.clone()))
                            .with_message(format!(
                                "Invalid value for '{}'",
                                validation_error.field_path
                            ))
                            .with_label(
                                Label::new((file_id.clone(), span.clone()))
                                    .with_message(&validation_error.message)
                                    .with_color(Color::Red),
                            )
                            .finish()
                            .write(
                                ariadne::sources([(file_id, source.content.clone())]),
                                &mut output,
                            );
                        if written.is_err() {
                            output.extend_from_slice(plain.as_bytes());
                        }
                    }
                    _ => output.extend_from_slice(plain.as_bytes()),
                }
            }
        }
    }

    String::from_utf8_lossy(&output).to_string()
}
