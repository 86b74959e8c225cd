//! Process execution for package-manager steps.

use crate::domain::model::CommandOutput;
use crate::domain::ports::{CommandRunner, Invocation};
use crate::utils::error::StepResult;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

const CHROOT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Runs commands on the host, or inside the image root through `chroot`.
#[derive(Debug, Clone, Default)]
pub struct HostRunner {
    chroot: Option<PathBuf>,
}

impl HostRunner {
    /// Commands act on the host directly, e.g. when provisioning from inside a container.
    pub fn host() -> Self {
        Self { chroot: None }
    }

    pub fn chroot(root: impl Into<PathBuf>) -> Self {
        Self {
            chroot: Some(root.into()),
        }
    }

    /// Program and arguments actually spawned: `chroot <root> <program> <args..>`
    /// under chroot, the invocation itself on the host.
    fn argv(&self, invocation: &Invocation) -> Vec<OsString> {
        let mut argv = Vec::with_capacity(invocation.args.len() + 3);
        if let Some(root) = &self.chroot {
            argv.push(OsString::from("chroot"));
            argv.push(root.clone().into_os_string());
        }
        argv.push(OsString::from(&invocation.program));
        argv.extend(invocation.args.iter().map(OsString::from));
        argv
    }

    /// Under chroot the host `PATH` may not exist in the image, so a standard one is set.
    fn environment<'a>(&self, invocation: &'a Invocation) -> Vec<(&'a str, &'a str)> {
        let mut env = Vec::with_capacity(invocation.env.len() + 1);
        if self.chroot.is_some() {
            env.push(("PATH", CHROOT_PATH));
        }
        env.extend(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        env
    }

    fn command(&self, invocation: &Invocation) -> Command {
        let argv = self.argv(invocation);
        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .envs(self.environment(invocation))
            .stdin(Stdio::null());
        command
    }
}

#[async_trait]
impl CommandRunner for HostRunner {
    async fn run(&self, invocation: &Invocation) -> StepResult<CommandOutput> {
        tracing::debug!(
            chroot = ?self.chroot,
            "Running: {}",
            invocation.command_line()
        );

        let output = self.command(invocation).output().await?;
        let result = CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !result.success() {
            tracing::debug!("{} exited with {:?}", invocation.program, result.status);
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pip_install() -> Invocation {
        Invocation::new("python3")
            .arg("-m")
            .arg("pip")
            .arg("install")
            .arg("-r")
            .arg("/app/requirements.txt")
            .env("PIP_ROOT_USER_ACTION", "ignore")
    }

    fn strings(argv: Vec<OsString>) -> Vec<String> {
        argv.into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_host_argv_is_the_invocation() {
        let runner = HostRunner::host();
        let invocation = pip_install();

        assert_eq!(
            strings(runner.argv(&invocation)),
            vec!["python3", "-m", "pip", "install", "-r", "/app/requirements.txt"]
        );
        assert_eq!(
            runner.environment(&invocation),
            vec![("PIP_ROOT_USER_ACTION", "ignore")]
        );
    }

    #[test]
    fn test_chroot_argv_enters_root_first() {
        let runner = HostRunner::chroot("/srv/rootfs");
        let invocation = pip_install();

        assert_eq!(
            strings(runner.argv(&invocation)),
            vec![
                "chroot",
                "/srv/rootfs",
                "python3",
                "-m",
                "pip",
                "install",
                "-r",
                "/app/requirements.txt"
            ]
        );

        let env = runner.environment(&invocation);
        assert_eq!(env[0], ("PATH", CHROOT_PATH));
        assert!(env.contains(&("PIP_ROOT_USER_ACTION", "ignore")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdin_is_closed() {
        let runner = HostRunner::host();
        let invocation = Invocation::new("cat");

        let output = runner.run(&invocation).await.unwrap();

        assert!(output.success());
        assert!(output.stdout.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_exit_status_and_output() {
        let runner = HostRunner::host();
        let invocation = Invocation::new("sh")
            .arg("-c")
            .arg("echo \"$GREETING\"; echo oops >&2; exit 3")
            .env("GREETING", "hello");

        let output = runner.run(&invocation).await.unwrap();

        assert_eq!(output.status, Some(3));
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.stderr.trim(), "oops");
        assert!(!output.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_program_is_an_error() {
        let runner = HostRunner::host();
        let invocation = Invocation::new("definitely-not-a-real-binary-envprov");

        assert!(runner.run(&invocation).await.is_err());
    }
}
