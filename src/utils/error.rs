use thiserror::Error;

/// Failure of a single provisioning step.
#[derive(Error, Debug)]
pub enum StepError {
    #[error("Package installation failed (exit status {status:?}) for [{packages}]: {output}")]
    PackageError {
        packages: String,
        /// Names the package manager reported as unresolvable.
        missing: Vec<String>,
        status: Option<i32>,
        output: String,
    },

    #[error("Network error fetching {url}: {message}")]
    NetworkError { url: String, message: String },

    #[error("Invalid key material from {url}: {reason}")]
    KeyError { url: String, reason: String },

    #[error("Repository '{name}' index refresh failed (exit status {status:?}): {output}")]
    RepoError {
        name: String,
        status: Option<i32>,
        output: String,
    },

    #[error("File not found: {path}")]
    FileNotFoundError { path: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Build failed at step {index} ({step}): {source}")]
    BuildError {
        index: usize,
        step: String,
        #[source]
        source: StepError,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Archive error: {0}")]
    ArchiveError(#[from] zip::result::ZipError),

    #[error("Layer journal error: {message}")]
    JournalError { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Network,
    Package,
    Filesystem,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl StepError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            StepError::PackageError { .. } | StepError::RepoError { .. } => ErrorCategory::Package,
            StepError::NetworkError { .. } => ErrorCategory::Network,
            StepError::KeyError { .. } => ErrorCategory::Package,
            StepError::FileNotFoundError { .. } | StepError::IoError(_) => {
                ErrorCategory::Filesystem
            }
        }
    }

    /// Raw output of the failing command, when the step ran one.
    pub fn command_output(&self) -> Option<&str> {
        match self {
            StepError::PackageError { output, .. } | StepError::RepoError { output, .. } => {
                Some(output)
            }
            _ => None,
        }
    }

    pub(crate) fn not_found(path: impl Into<String>) -> Self {
        StepError::FileNotFoundError { path: path.into() }
    }
}

impl ProvisionError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ProvisionError::BuildError { source, .. } => source.category(),
            ProvisionError::IoError(_) | ProvisionError::JournalError { .. } => {
                ErrorCategory::Filesystem
            }
            ProvisionError::SerializationError(_) | ProvisionError::ArchiveError(_) => {
                ErrorCategory::System
            }
            ProvisionError::ConfigError { .. }
            | ProvisionError::ConfigValidationError { .. }
            | ProvisionError::InvalidConfigValueError { .. }
            | ProvisionError::MissingConfigError { .. } => ErrorCategory::Configuration,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Network => ErrorSeverity::Medium,
            ErrorCategory::Package | ErrorCategory::Filesystem => ErrorSeverity::High,
            ErrorCategory::Configuration | ErrorCategory::System => ErrorSeverity::Critical,
        }
    }

    /// The step failure underneath a build error, if any.
    pub fn step_error(&self) -> Option<&StepError> {
        match self {
            ProvisionError::BuildError { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            ProvisionError::BuildError { source, .. } => match source {
                StepError::PackageError { missing, .. } if !missing.is_empty() => format!(
                    "Check the package names ({}) and that the repositories providing them are registered before this step",
                    missing.join(", ")
                ),
                StepError::PackageError { .. } => {
                    "Inspect the package manager output above; the index may be stale or the mirror unreachable".to_string()
                }
                StepError::NetworkError { .. } => {
                    "Check network connectivity and the key URL, then run the build again".to_string()
                }
                StepError::KeyError { .. } => {
                    "Make sure the URL serves an OpenPGP public key (armored or binary)".to_string()
                }
                StepError::RepoError { .. } => {
                    "Verify the repository source line and that its signing key was imported first".to_string()
                }
                StepError::FileNotFoundError { path } => {
                    format!("Make sure '{}' exists in the build context or was copied by an earlier step", path)
                }
                StepError::IoError(_) => {
                    "Check permissions and free space on the root filesystem directory".to_string()
                }
            },
            ProvisionError::JournalError { .. } => {
                "Remove the layer journal or run with --no-cache to rebuild every layer".to_string()
            }
            ProvisionError::IoError(_) => {
                "Check that the paths exist and are writable".to_string()
            }
            ProvisionError::SerializationError(_) | ProvisionError::ArchiveError(_) => {
                "Check the output directory and retry the export".to_string()
            }
            ProvisionError::ConfigError { .. }
            | ProvisionError::ConfigValidationError { .. }
            | ProvisionError::InvalidConfigValueError { .. }
            | ProvisionError::MissingConfigError { .. } => {
                "Fix the provisioning file and run again".to_string()
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            ProvisionError::BuildError { index, step, source } => {
                format!("Step {} ({}) failed: {}", index + 1, step, source)
            }
            other => other.to_string(),
        }
    }
}

pub type StepResult<T> = std::result::Result<T, StepError>;
pub type Result<T> = std::result::Result<T, ProvisionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_error_reports_step_identity() {
        let err = ProvisionError::BuildError {
            index: 2,
            step: "file_copy requirements.txt -> /app/requirements.txt".to_string(),
            source: StepError::not_found("requirements.txt"),
        };

        assert_eq!(err.category(), ErrorCategory::Filesystem);
        assert_eq!(err.severity(), ErrorSeverity::High);
        assert!(err.user_friendly_message().starts_with("Step 3 (file_copy"));
        assert!(err.recovery_suggestion().contains("requirements.txt"));
    }

    #[test]
    fn test_network_errors_are_medium_severity() {
        let err = ProvisionError::BuildError {
            index: 0,
            step: "key_import".to_string(),
            source: StepError::NetworkError {
                url: "https://example.com/key".to_string(),
                message: "connection refused".to_string(),
            },
        };

        assert_eq!(err.severity(), ErrorSeverity::Medium);
    }

    #[test]
    fn test_missing_packages_named_in_suggestion() {
        let err = ProvisionError::BuildError {
            index: 0,
            step: "package_install".to_string(),
            source: StepError::PackageError {
                packages: "curl nosuchpkg".to_string(),
                missing: vec!["nosuchpkg".to_string()],
                status: Some(100),
                output: "E: Unable to locate package nosuchpkg".to_string(),
            },
        };

        assert!(err.recovery_suggestion().contains("nosuchpkg"));
        assert_eq!(
            err.step_error().and_then(|e| e.command_output()),
            Some("E: Unable to locate package nosuchpkg")
        );
    }
}
