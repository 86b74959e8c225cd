use crate::config::definition::ProvisionFile;
use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "envprov")]
#[command(about = "Provision a root filesystem from a declarative step list")]
pub struct CliConfig {
    /// Path to the TOML provisioning file
    #[arg(short, long, default_value = "provision.toml")]
    pub file: String,

    /// Build context directory holding files for file_copy steps
    #[arg(long)]
    pub context: Option<String>,

    /// Root filesystem directory to provision
    #[arg(long)]
    pub rootfs: Option<String>,

    /// Directory receiving the image archive
    #[arg(long)]
    pub output: Option<String>,

    /// Run package managers under `chroot <rootfs>`
    #[arg(long)]
    pub chroot: bool,

    /// Ignore the layer journal and execute every step
    #[arg(long)]
    pub no_cache: bool,

    /// Validate and print the plan without executing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Log CPU and memory usage after each step
    #[arg(long)]
    pub monitor: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,
}

impl CliConfig {
    /// Command-line flags win over the file's `[build]` section.
    pub fn apply_overrides(&self, file: &mut ProvisionFile) {
        let build = file.build_mut();
        if let Some(context) = &self.context {
            build.context = Some(context.clone());
        }
        if let Some(rootfs) = &self.rootfs {
            build.rootfs = Some(rootfs.clone());
        }
        if let Some(output) = &self.output {
            build.output = Some(output.clone());
        }
        if self.chroot {
            build.chroot = Some(true);
        }
        if self.no_cache {
            build.layer_cache = Some(false);
        }
    }

    pub fn monitor_enabled(&self, file: &ProvisionFile) -> bool {
        self.monitor || file.monitoring_enabled()
    }
}
