use crate::domain::model::{ImageDefinition, Step};
use crate::utils::error::{ProvisionError, Result};
use crate::utils::validation::{self, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

pub const DEFAULT_CONTEXT: &str = ".";
/// Without `chroot`, package managers act on the host, so the host root is the image root.
pub const HOST_ROOT: &str = "/";
pub const DEFAULT_OUTPUT: &str = "./out";
pub const DEFAULT_ARCHIVE_NAME: &str = "image.zip";

/// The provisioning file: image, build settings and the ordered step list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionFile {
    pub image: ImageSection,
    pub build: Option<BuildSection>,
    pub monitoring: Option<MonitoringConfig>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSection {
    pub name: Option<String>,
    pub base: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildSection {
    pub context: Option<String>,
    pub rootfs: Option<String>,
    pub output: Option<String>,
    pub archive_name: Option<String>,
    pub chroot: Option<bool>,
    pub layer_cache: Option<bool>,
    pub http_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub log_json: Option<bool>,
}

impl ProvisionFile {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ProvisionError::MissingConfigError {
                field: path.as_ref().display().to_string(),
            },
            _ => ProvisionError::IoError(e),
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| ProvisionError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Replace `${VAR}` with the variable's value; unknown variables stay as written.
    fn substitute_env_vars(content: &str) -> String {
        static VAR: OnceLock<Regex> = OnceLock::new();
        let re = VAR.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid"));

        re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        })
        .into_owned()
    }

    pub fn definition(&self) -> ImageDefinition {
        ImageDefinition {
            base: self.image.base.clone(),
            steps: self.steps.clone(),
        }
    }

    pub fn image_name(&self) -> Option<&str> {
        self.image.name.as_deref()
    }

    fn build_section(&self) -> BuildSection {
        self.build.clone().unwrap_or_default()
    }

    pub fn context_dir(&self) -> String {
        self.build_section()
            .context
            .unwrap_or_else(|| DEFAULT_CONTEXT.to_string())
    }

    pub fn rootfs_dir(&self) -> String {
        self.build_section()
            .rootfs
            .unwrap_or_else(|| HOST_ROOT.to_string())
    }

    pub fn output_dir(&self) -> String {
        self.build_section()
            .output
            .unwrap_or_else(|| DEFAULT_OUTPUT.to_string())
    }

    pub fn archive_name(&self) -> String {
        self.build_section()
            .archive_name
            .unwrap_or_else(|| DEFAULT_ARCHIVE_NAME.to_string())
    }

    pub fn chroot_enabled(&self) -> bool {
        self.build.as_ref().and_then(|b| b.chroot).unwrap_or(false)
    }

    pub fn layer_cache_enabled(&self) -> bool {
        self.build.as_ref().and_then(|b| b.layer_cache).unwrap_or(true)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(
            self.build
                .as_ref()
                .and_then(|b| b.http_timeout_seconds)
                .unwrap_or(crate::adapters::http::DEFAULT_TIMEOUT_SECONDS),
        )
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring.as_ref().map(|m| m.enabled).unwrap_or(false)
    }

    pub fn log_json(&self) -> bool {
        self.monitoring
            .as_ref()
            .and_then(|m| m.log_json)
            .unwrap_or(false)
    }

    /// Mutable access for command-line overrides.
    pub fn build_mut(&mut self) -> &mut BuildSection {
        self.build.get_or_insert_with(BuildSection::default)
    }

    pub fn validate_config(&self) -> Result<()> {
        if let Some(name) = &self.image.name {
            validation::validate_non_empty_string("image.name", name)?;
        }

        validation::validate_path("build.context", &self.context_dir())?;
        validation::validate_path("build.rootfs", &self.rootfs_dir())?;
        self.validate_root_mode()?;
        validation::validate_path("build.output", &self.output_dir())?;
        validation::validate_file_stem("build.archive_name", &self.archive_name())?;

        if let Some(timeout) = self.build.as_ref().and_then(|b| b.http_timeout_seconds) {
            validation::validate_range("build.http_timeout_seconds", timeout, 1, 600)?;
        }

        self.definition().validate()
    }

    /// Files and package managers must see the same root: the host `/`, or a
    /// separate rootfs entered through `chroot`.
    fn validate_root_mode(&self) -> Result<()> {
        let build = self.build_section();
        if self.chroot_enabled() {
            validation::validate_required_field("build.rootfs", &build.rootfs)?;
            return Ok(());
        }

        let rootfs = self.rootfs_dir();
        if Path::new(&rootfs) != Path::new(HOST_ROOT) {
            return Err(ProvisionError::ConfigError {
                message: format!(
                    "rootfs '{}' needs chroot = true; without chroot, apt and pip act on '{}'",
                    rootfs, HOST_ROOT
                ),
            });
        }
        Ok(())
    }
}

impl Validate for ProvisionFile {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

impl Validate for ImageDefinition {
    fn validate(&self) -> Result<()> {
        validation::validate_image_reference("image.base", &self.base)?;

        if self.steps.is_empty() {
            return Err(ProvisionError::ConfigValidationError {
                field: "steps".to_string(),
                message: "At least one step is required".to_string(),
            });
        }

        for (index, step) in self.steps.iter().enumerate() {
            validate_step(index, step)?;
        }
        Ok(())
    }
}

fn validate_step(index: usize, step: &Step) -> Result<()> {
    let field = |name: &str| format!("steps[{}].{}", index, name);

    match step {
        Step::PackageInstall { packages } => {
            if packages.is_empty() {
                return Err(ProvisionError::ConfigValidationError {
                    field: field("packages"),
                    message: "Package list cannot be empty".to_string(),
                });
            }
            for package in packages {
                validation::validate_package_name(&field("packages"), package)?;
            }
        }
        Step::RequirementsInstall { path } => {
            validation::validate_image_path(&field("path"), path)?;
        }
        Step::KeyImport { name, url } => {
            validation::validate_file_stem(&field("name"), name)?;
            validation::validate_url(&field("url"), url)?;
        }
        Step::RepoRegister { name, source } => {
            validation::validate_file_stem(&field("name"), name)?;
            validate_single_line(&field("source"), source)?;
            let trimmed = source.trim_start();
            if !(trimmed.starts_with("deb ") || trimmed.starts_with("deb-src ")) {
                return Err(ProvisionError::InvalidConfigValueError {
                    field: field("source"),
                    value: source.clone(),
                    reason: "Source lines start with 'deb' or 'deb-src'".to_string(),
                });
            }
        }
        Step::FileCopy {
            source,
            destination,
        } => {
            validation::validate_context_path(&field("source"), source)?;
            validation::validate_image_path(&field("destination"), destination)?;
        }
        Step::EnvExport { env_file, profile } => {
            validation::validate_image_path(&field("env_file"), env_file)?;
            validation::validate_image_path(&field("profile"), profile)?;
            validate_single_line(&field("env_file"), env_file)?;
        }
        Step::PortDeclaration { port } => {
            validation::validate_port(&field("port"), *port)?;
        }
        Step::EntryPoint { command } => match command.first() {
            Some(program) => validation::validate_non_empty_string(&field("command"), program)?,
            None => {
                return Err(ProvisionError::ConfigValidationError {
                    field: field("command"),
                    message: "Entry point command cannot be empty".to_string(),
                })
            }
        },
        Step::Env { key, value } => {
            static KEY: OnceLock<Regex> = OnceLock::new();
            let re = KEY.get_or_init(|| {
                Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("env key pattern is valid")
            });
            if !re.is_match(key) {
                return Err(ProvisionError::InvalidConfigValueError {
                    field: field("key"),
                    value: key.clone(),
                    reason: "Not a valid environment variable name".to_string(),
                });
            }
            validate_single_line(&field("value"), value)?;
        }
    }
    Ok(())
}

fn validate_single_line(field_name: &str, value: &str) -> Result<()> {
    validation::validate_non_empty_string(field_name, value)?;
    if value.contains('\n') || value.contains('\r') {
        return Err(ProvisionError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: "Value must be a single line".to_string(),
        });
    }
    Ok(())
}
