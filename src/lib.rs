pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use crate::config::CliConfig;
pub use crate::config::ProvisionFile;

pub use crate::adapters::{HostRunner, HttpKeyFetcher, LocalStorage};
pub use crate::core::provisioner::Provisioner;
pub use crate::domain::model::{Image, ImageConfig, ImageDefinition, Layer, Step};
pub use crate::utils::error::{ProvisionError, Result, StepError};
