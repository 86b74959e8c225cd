pub mod archive;
pub mod keyring;
pub mod layer;
pub mod profile;
pub mod provisioner;
pub mod steps;

pub use crate::domain::model::{Image, ImageConfig, ImageDefinition, Layer, Step};
pub use crate::domain::ports::{CommandRunner, KeyFetcher, Storage};
pub use crate::utils::error::Result;
