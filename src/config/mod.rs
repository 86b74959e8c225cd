#[cfg(feature = "cli")]
pub mod cli;
pub mod definition;

#[cfg(feature = "cli")]
pub use cli::CliConfig;
pub use definition::ProvisionFile;
