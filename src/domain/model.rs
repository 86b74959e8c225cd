use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub const DEFAULT_PROFILE: &str = "/root/.bashrc";

fn default_profile() -> String {
    DEFAULT_PROFILE.to_string()
}

/// One declarative action of an image build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    PackageInstall {
        packages: Vec<String>,
    },
    RequirementsInstall {
        path: String,
    },
    KeyImport {
        name: String,
        url: String,
    },
    RepoRegister {
        name: String,
        source: String,
    },
    FileCopy {
        source: String,
        destination: String,
    },
    EnvExport {
        env_file: String,
        #[serde(default = "default_profile")]
        profile: String,
    },
    PortDeclaration {
        port: u16,
    },
    EntryPoint {
        command: Vec<String>,
    },
    Env {
        key: String,
        value: String,
    },
}

impl Step {
    pub fn kind(&self) -> &'static str {
        match self {
            Step::PackageInstall { .. } => "package_install",
            Step::RequirementsInstall { .. } => "requirements_install",
            Step::KeyImport { .. } => "key_import",
            Step::RepoRegister { .. } => "repo_register",
            Step::FileCopy { .. } => "file_copy",
            Step::EnvExport { .. } => "env_export",
            Step::PortDeclaration { .. } => "port_declaration",
            Step::EntryPoint { .. } => "entry_point",
            Step::Env { .. } => "env",
        }
    }

    /// Steps that only touch image metadata, never the filesystem.
    pub fn is_metadata_only(&self) -> bool {
        matches!(
            self,
            Step::PortDeclaration { .. } | Step::EntryPoint { .. } | Step::Env { .. }
        )
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::PackageInstall { packages } => {
                write!(f, "package_install {}", packages.join(" "))
            }
            Step::RequirementsInstall { path } => write!(f, "requirements_install {}", path),
            Step::KeyImport { name, url } => write!(f, "key_import {} <- {}", name, url),
            Step::RepoRegister { name, source } => {
                write!(f, "repo_register {} '{}'", name, source)
            }
            Step::FileCopy {
                source,
                destination,
            } => write!(f, "file_copy {} -> {}", source, destination),
            Step::EnvExport { env_file, profile } => {
                write!(f, "env_export {} >> {}", env_file, profile)
            }
            Step::PortDeclaration { port } => write!(f, "port_declaration {}", port),
            Step::EntryPoint { command } => write!(f, "entry_point {}", command.join(" ")),
            Step::Env { key, value } => write!(f, "env {}={}", key, value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDefinition {
    pub base: String,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    pub exposed_ports: BTreeSet<u16>,
    pub entrypoint: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl ImageConfig {
    /// Fold a step's metadata into the config. Filesystem steps leave it unchanged.
    pub fn apply(&mut self, step: &Step) {
        match step {
            Step::PortDeclaration { port } => {
                self.exposed_ports.insert(*port);
            }
            Step::EntryPoint { command } => {
                self.entrypoint = command.clone();
            }
            Step::Env { key, value } => {
                self.env.insert(key.clone(), value.clone());
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    pub index: usize,
    pub step: Step,
    pub digest: String,
    /// Reused from the layer journal instead of executed.
    pub cached: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    pub base: String,
    pub base_digest: String,
    pub layers: Vec<Layer>,
    pub config: ImageConfig,
    pub created: DateTime<Utc>,
}

impl Image {
    pub fn digest(&self) -> &str {
        self.layers
            .last()
            .map(|layer| layer.digest.as_str())
            .unwrap_or(&self.base_digest)
    }

    pub fn cached_layers(&self) -> usize {
        self.layers.iter().filter(|layer| layer.cached).count()
    }
}

/// Captured result of a package-manager invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// stdout and stderr joined for error reports.
    pub fn combined(&self) -> String {
        match (self.stdout.trim(), self.stderr.trim()) {
            ("", err) => err.to_string(),
            (out, "") => out.to_string(),
            (out, err) => format!("{}\n{}", out, err),
        }
    }
}
