use crate::core::keyring;
use crate::core::profile;
use crate::domain::model::{CommandOutput, Step};
use crate::domain::ports::{CommandRunner, Invocation, KeyFetcher, Storage};
use crate::utils::error::{StepError, StepResult};
use regex::Regex;
use std::sync::OnceLock;

pub const SOURCES_DIR: &str = "/etc/apt/sources.list.d";
pub const TRUSTED_KEYS_DIR: &str = "/etc/apt/trusted.gpg.d";

pub fn apt_install(packages: &[String]) -> Invocation {
    Invocation::new("apt-get")
        .args(["install", "-y", "--no-install-recommends"])
        .args(packages.iter().cloned())
        .env("DEBIAN_FRONTEND", "noninteractive")
}

pub fn apt_update() -> Invocation {
    Invocation::new("apt-get")
        .arg("update")
        .env("DEBIAN_FRONTEND", "noninteractive")
}

pub fn pip_install(requirements: &str) -> Invocation {
    Invocation::new("python3")
        .args(["-m", "pip", "install", "--no-cache-dir", "-r"])
        .arg(requirements)
}

/// Package names apt or pip reported as unresolvable in `output`.
pub fn unresolved_packages(output: &str) -> Vec<String> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            r"Unable to locate package (\S+)",
            r"Package '([^']+)' has no installation candidate",
            r"No matching distribution found for (\S+)",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("unresolved package pattern is valid"))
        .collect()
    });

    let mut names: Vec<String> = Vec::new();
    for re in patterns {
        for caps in re.captures_iter(output) {
            let name = caps[1].to_string();
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}

fn package_error(packages: &[String], output: &CommandOutput) -> StepError {
    let combined = output.combined();
    StepError::PackageError {
        packages: packages.join(" "),
        missing: unresolved_packages(&combined),
        status: output.status,
        output: combined,
    }
}

/// Executes the side effects of one step against the image root.
pub struct StepExecutor<'a, S: Storage, R: CommandRunner, K: KeyFetcher> {
    rootfs: &'a S,
    context: &'a S,
    runner: &'a R,
    fetcher: &'a K,
}

impl<'a, S: Storage, R: CommandRunner, K: KeyFetcher> StepExecutor<'a, S, R, K> {
    pub fn new(rootfs: &'a S, context: &'a S, runner: &'a R, fetcher: &'a K) -> Self {
        Self {
            rootfs,
            context,
            runner,
            fetcher,
        }
    }

    pub async fn execute(&self, step: &Step) -> StepResult<()> {
        match step {
            Step::PackageInstall { packages } => self.install_packages(packages).await,
            Step::RequirementsInstall { path } => self.install_requirements(path).await,
            Step::KeyImport { name, url } => self.import_key(name, url).await,
            Step::RepoRegister { name, source } => self.register_repo(name, source).await,
            Step::FileCopy {
                source,
                destination,
            } => self.copy_file(source, destination).await,
            Step::EnvExport { env_file, profile } => self.export_env(env_file, profile).await,
            Step::PortDeclaration { .. } | Step::EntryPoint { .. } | Step::Env { .. } => Ok(()),
        }
    }

    async fn install_packages(&self, packages: &[String]) -> StepResult<()> {
        if packages.is_empty() {
            tracing::debug!("No packages to install");
            return Ok(());
        }

        let output = self.runner.run(&apt_install(packages)).await?;
        if !output.success() {
            return Err(package_error(packages, &output));
        }

        tracing::debug!("Installed {} packages", packages.len());
        Ok(())
    }

    async fn install_requirements(&self, path: &str) -> StepResult<()> {
        if !self.rootfs.exists(path).await {
            return Err(StepError::not_found(path));
        }

        let output = self.runner.run(&pip_install(path)).await?;
        if !output.success() {
            return Err(package_error(&[format!("-r {}", path)], &output));
        }

        Ok(())
    }

    async fn import_key(&self, name: &str, url: &str) -> StepResult<()> {
        let data = self.fetcher.fetch(url).await?;

        let format = keyring::inspect_key(&data).map_err(|reason| StepError::KeyError {
            url: url.to_string(),
            reason,
        })?;

        let target = format!("{}/{}.{}", TRUSTED_KEYS_DIR, name, format.extension());
        self.rootfs.write_file(&target, &data).await?;
        tracing::debug!("Trusted key '{}' written to {}", name, target);
        Ok(())
    }

    async fn register_repo(&self, name: &str, source: &str) -> StepResult<()> {
        let list = format!("{}/{}.list", SOURCES_DIR, name);
        let existing = self.read_text_or_empty(&list).await?;

        match profile::merge_line(&existing, source) {
            Some(merged) => self.rootfs.write_file(&list, merged.as_bytes()).await?,
            None => tracing::debug!("Source already present in {}", list),
        }

        let output = self.runner.run(&apt_update()).await?;
        if !output.success() {
            return Err(StepError::RepoError {
                name: name.to_string(),
                status: output.status,
                output: output.combined(),
            });
        }

        Ok(())
    }

    async fn copy_file(&self, source: &str, destination: &str) -> StepResult<()> {
        if !self.context.exists(source).await {
            return Err(StepError::not_found(source));
        }

        let data = self.context.read_file(source).await?;
        self.rootfs.write_file(destination, &data).await?;
        tracing::debug!("Copied {} ({} bytes) to {}", source, data.len(), destination);
        Ok(())
    }

    async fn export_env(&self, env_file: &str, profile_path: &str) -> StepResult<()> {
        if !self.rootfs.exists(env_file).await {
            return Err(StepError::not_found(env_file));
        }

        let existing = self.read_text_or_empty(profile_path).await?;
        match profile::merge_line(&existing, &profile::source_directive(env_file)) {
            Some(merged) => {
                self.rootfs
                    .write_file(profile_path, merged.as_bytes())
                    .await?
            }
            None => tracing::debug!("{} already sources {}", profile_path, env_file),
        }

        Ok(())
    }

    async fn read_text_or_empty(&self, path: &str) -> StepResult<String> {
        if !self.rootfs.exists(path).await {
            return Ok(String::new());
        }

        let data = self.rootfs.read_file(path).await?;
        String::from_utf8(data).map_err(|e| {
            StepError::IoError(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("{} is not UTF-8: {}", path, e),
            ))
        })
    }
}
