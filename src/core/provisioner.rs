use crate::core::layer::{self, LayerJournal};
use crate::core::steps::StepExecutor;
use crate::domain::model::{Image, ImageConfig, ImageDefinition, Layer, Step};
use crate::domain::ports::{CommandRunner, KeyFetcher, Storage};
use crate::utils::error::{ProvisionError, Result, StepError};
use crate::utils::monitor::BuildMonitor;
use chrono::Utc;
use std::time::Instant;

/// Applies an ordered step list to a root filesystem, one layer at a time.
///
/// Each step's changes and its journal entry are committed before the next
/// step starts. The first failing step aborts the build; layers committed
/// before it are kept.
pub struct Provisioner<S: Storage, R: CommandRunner, K: KeyFetcher> {
    rootfs: S,
    context: S,
    runner: R,
    fetcher: K,
    layer_cache: bool,
    monitor: BuildMonitor,
}

impl<S: Storage, R: CommandRunner, K: KeyFetcher> Provisioner<S, R, K> {
    pub fn new(rootfs: S, context: S, runner: R, fetcher: K) -> Self {
        Self {
            rootfs,
            context,
            runner,
            fetcher,
            layer_cache: true,
            monitor: BuildMonitor::default(),
        }
    }

    /// Reuse layers recorded in the root's journal when their digests match.
    pub fn with_layer_cache(mut self, enabled: bool) -> Self {
        self.layer_cache = enabled;
        self
    }

    pub fn with_monitoring(mut self, enabled: bool) -> Self {
        self.monitor = BuildMonitor::new(enabled);
        self
    }

    pub fn rootfs(&self) -> &S {
        &self.rootfs
    }

    pub async fn build_definition(&self, definition: &ImageDefinition) -> Result<Image> {
        self.build(&definition.base, &definition.steps).await
    }

    pub async fn build(&self, base: &str, steps: &[Step]) -> Result<Image> {
        let executor = StepExecutor::new(&self.rootfs, &self.context, &self.runner, &self.fetcher);
        let base_digest = layer::base_digest(base);
        let mut journal = if self.layer_cache {
            LayerJournal::load(&self.rootfs, base).await?
        } else {
            LayerJournal::new(base)
        };

        tracing::info!("🚀 Building from {} ({} steps)", base, steps.len());
        self.monitor.log_stats("Build started");

        let total = steps.len();
        let mut parent = base_digest.clone();
        let mut reusing = self.layer_cache;
        let mut config = ImageConfig::default();
        let mut layers = Vec::with_capacity(total);

        for (index, step) in steps.iter().enumerate() {
            let digest = self.layer_digest(&parent, index, step).await?;
            let cached = reusing && journal.is_committed(index, &digest);

            if cached {
                tracing::info!("⏭️ [{}/{}] {} (cached)", index + 1, total, step);
            } else {
                reusing = false;
                tracing::info!("▶️ [{}/{}] {}", index + 1, total, step);
                let started = Instant::now();

                if let Err(source) = executor.execute(step).await {
                    tracing::error!("❌ [{}/{}] {} failed: {}", index + 1, total, step, source);
                    if let Some(output) = source.command_output() {
                        tracing::error!("Command output:\n{}", output);
                    }
                    // the root now holds layers 0..index only
                    journal.layers.truncate(index);
                    if let Err(e) = journal.save(&self.rootfs).await {
                        tracing::warn!("Could not record halted journal: {}", e);
                    }
                    return Err(build_error(index, step, source));
                }

                journal.commit(index, step, &digest);
                journal.save(&self.rootfs).await?;
                tracing::debug!("Layer {} committed in {:?}", digest, started.elapsed());
                self.monitor.log_stats(&format!("Step {}", index + 1));
            }

            config.apply(step);
            layers.push(Layer {
                index,
                step: step.clone(),
                digest: digest.clone(),
                cached,
            });
            parent = digest;
        }

        if journal.layers.len() > total {
            journal.layers.truncate(total);
            journal.save(&self.rootfs).await?;
        }

        let image = Image {
            base: base.to_string(),
            base_digest,
            layers,
            config,
            created: Utc::now(),
        };

        tracing::info!(
            "✅ Image {} built ({} layers, {} cached)",
            image.digest(),
            image.layers.len(),
            image.cached_layers()
        );
        self.monitor.log_final_stats();

        Ok(image)
    }

    /// Digests for every step without executing anything. `cached` marks the
    /// layers a build over the current root would reuse.
    pub async fn plan(&self, base: &str, steps: &[Step]) -> Result<Vec<Layer>> {
        let journal = LayerJournal::load(&self.rootfs, base).await?;
        let mut parent = layer::base_digest(base);
        let mut reusing = self.layer_cache;
        let mut planned = Vec::with_capacity(steps.len());

        for (index, step) in steps.iter().enumerate() {
            let digest = self.layer_digest(&parent, index, step).await?;
            let cached = reusing && journal.is_committed(index, &digest);
            reusing = cached;

            planned.push(Layer {
                index,
                step: step.clone(),
                digest: digest.clone(),
                cached,
            });
            parent = digest;
        }

        Ok(planned)
    }

    async fn layer_digest(&self, parent: &str, index: usize, step: &Step) -> Result<String> {
        match step {
            Step::FileCopy { source, .. } => {
                if !self.context.exists(source).await {
                    return Err(build_error(index, step, StepError::not_found(source.as_str())));
                }
                let content = self
                    .context
                    .read_file(source)
                    .await
                    .map_err(|e| build_error(index, step, e))?;
                layer::chain_digest(parent, step, Some(&content))
            }
            _ => layer::chain_digest(parent, step, None),
        }
    }
}

fn build_error(index: usize, step: &Step, source: StepError) -> ProvisionError {
    ProvisionError::BuildError {
        index,
        step: step.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::CommandOutput;
    use crate::domain::ports::Invocation;
    use crate::utils::error::StepResult;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct MockStorage {
        files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    }

    impl MockStorage {
        fn with_file(self, path: &str, data: &[u8]) -> Self {
            self.files
                .lock()
                .unwrap()
                .insert(path.trim_start_matches('/').to_string(), data.to_vec());
            self
        }
    }

    impl Storage for MockStorage {
        async fn read_file(&self, path: &str) -> StepResult<Vec<u8>> {
            self.files
                .lock()
                .unwrap()
                .get(path.trim_start_matches('/'))
                .cloned()
                .ok_or_else(|| StepError::not_found(path))
        }

        async fn write_file(&self, path: &str, data: &[u8]) -> StepResult<()> {
            self.files
                .lock()
                .unwrap()
                .insert(path.trim_start_matches('/').to_string(), data.to_vec());
            Ok(())
        }

        async fn exists(&self, path: &str) -> bool {
            self.files
                .lock()
                .unwrap()
                .contains_key(path.trim_start_matches('/'))
        }
    }

    /// Succeeds for everything except `apt-get install` of `missing`.
    #[derive(Clone, Default)]
    struct MockRunner {
        calls: Arc<Mutex<Vec<String>>>,
        missing: Option<String>,
    }

    impl MockRunner {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for MockRunner {
        async fn run(&self, invocation: &Invocation) -> StepResult<CommandOutput> {
            self.calls.lock().unwrap().push(invocation.command_line());
            if let Some(missing) = &self.missing {
                if invocation.args.contains(missing) {
                    return Ok(CommandOutput {
                        status: Some(100),
                        stdout: String::new(),
                        stderr: format!("E: Unable to locate package {}", missing),
                    });
                }
            }
            Ok(CommandOutput {
                status: Some(0),
                ..Default::default()
            })
        }
    }

    struct NoNetwork;

    #[async_trait]
    impl KeyFetcher for NoNetwork {
        async fn fetch(&self, url: &str) -> StepResult<Vec<u8>> {
            Err(StepError::NetworkError {
                url: url.to_string(),
                message: "offline".to_string(),
            })
        }
    }

    fn packages(names: &[&str]) -> Step {
        Step::PackageInstall {
            packages: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    fn provisioner(
        rootfs: MockStorage,
        context: MockStorage,
        runner: MockRunner,
    ) -> Provisioner<MockStorage, MockRunner, NoNetwork> {
        Provisioner::new(rootfs, context, runner, NoNetwork)
    }

    #[tokio::test]
    async fn test_build_applies_steps_in_order() {
        let runner = MockRunner::default();
        let context = MockStorage::default().with_file("requirements.txt", b"numpy\n");
        let p = provisioner(MockStorage::default(), context, runner.clone());

        let image = p
            .build(
                "ubuntu:22.04",
                &[
                    packages(&["curl", "wget"]),
                    Step::FileCopy {
                        source: "requirements.txt".to_string(),
                        destination: "/app/requirements.txt".to_string(),
                    },
                    Step::RequirementsInstall {
                        path: "/app/requirements.txt".to_string(),
                    },
                ],
            )
            .await
            .unwrap();

        assert_eq!(image.layers.len(), 3);
        assert_eq!(
            runner.calls(),
            vec![
                "apt-get install -y --no-install-recommends curl wget",
                "python3 -m pip install --no-cache-dir -r /app/requirements.txt",
            ]
        );
        assert_eq!(image.digest(), image.layers[2].digest);
    }

    #[tokio::test]
    async fn test_build_halts_on_first_failure() {
        let runner = MockRunner {
            missing: Some("nosuchpkg".to_string()),
            ..Default::default()
        };
        let p = provisioner(MockStorage::default(), MockStorage::default(), runner.clone());

        let err = p
            .build(
                "ubuntu:22.04",
                &[
                    packages(&["curl"]),
                    packages(&["nosuchpkg"]),
                    packages(&["wget"]),
                ],
            )
            .await
            .unwrap_err();

        match err {
            ProvisionError::BuildError { index, source, .. } => {
                assert_eq!(index, 1);
                assert!(matches!(source, StepError::PackageError { .. }));
            }
            other => panic!("expected BuildError, got {:?}", other),
        }
        assert_eq!(runner.calls().len(), 2);

        // the first layer stays committed
        let journal = LayerJournal::load(p.rootfs(), "ubuntu:22.04").await.unwrap();
        assert_eq!(journal.layers.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_rebuild_drops_stale_journal_entries() {
        let steps = [packages(&["curl"]), packages(&["wget"]), packages(&["git"])];
        let rootfs = MockStorage::default();
        provisioner(rootfs.clone(), MockStorage::default(), MockRunner::default())
            .build("ubuntu:22.04", &steps)
            .await
            .unwrap();

        let failing = MockRunner {
            missing: Some("nosuchpkg".to_string()),
            ..Default::default()
        };
        let p = provisioner(rootfs, MockStorage::default(), failing);
        let err = p
            .build(
                "ubuntu:22.04",
                &[packages(&["curl"]), packages(&["nosuchpkg"]), packages(&["git"])],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::BuildError { index: 1, .. }));

        let journal = LayerJournal::load(p.rootfs(), "ubuntu:22.04").await.unwrap();
        let indices: Vec<usize> = journal.layers.iter().map(|l| l.index).collect();
        assert_eq!(indices, vec![0]);
    }

    #[tokio::test]
    async fn test_rebuild_reuses_committed_layers() {
        let runner = MockRunner::default();
        let p = provisioner(MockStorage::default(), MockStorage::default(), runner.clone());
        let steps = [
            packages(&["curl"]),
            Step::PortDeclaration { port: 8085 },
            packages(&["wget"]),
        ];

        let first = p.build("ubuntu:22.04", &steps).await.unwrap();
        let second = p.build("ubuntu:22.04", &steps).await.unwrap();

        assert_eq!(first.cached_layers(), 0);
        assert_eq!(second.cached_layers(), 3);
        assert_eq!(first.digest(), second.digest());
        assert_eq!(second.config.exposed_ports.len(), 1);
        assert_eq!(runner.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_changed_step_invalidates_following_layers() {
        let runner = MockRunner::default();
        let p = provisioner(MockStorage::default(), MockStorage::default(), runner.clone());

        p.build("ubuntu:22.04", &[packages(&["curl"]), packages(&["wget"])])
            .await
            .unwrap();
        let image = p
            .build("ubuntu:22.04", &[packages(&["curl"]), packages(&["git"]), packages(&["wget"])])
            .await
            .unwrap();

        let cached: Vec<bool> = image.layers.iter().map(|l| l.cached).collect();
        assert_eq!(cached, vec![true, false, false]);
    }

    #[tokio::test]
    async fn test_cache_disabled_runs_everything() {
        let runner = MockRunner::default();
        let p = provisioner(MockStorage::default(), MockStorage::default(), runner.clone())
            .with_layer_cache(false);
        let steps = [packages(&["curl"])];

        p.build("ubuntu:22.04", &steps).await.unwrap();
        let image = p.build("ubuntu:22.04", &steps).await.unwrap();

        assert_eq!(image.cached_layers(), 0);
        assert_eq!(runner.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_copy_source_fails_with_step_identity() {
        let runner = MockRunner::default();
        let p = provisioner(MockStorage::default(), MockStorage::default(), runner.clone());

        let err = p
            .build(
                "ubuntu:22.04",
                &[
                    Step::FileCopy {
                        source: "requirements.txt".to_string(),
                        destination: "/app/requirements.txt".to_string(),
                    },
                    Step::RequirementsInstall {
                        path: "/app/requirements.txt".to_string(),
                    },
                ],
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err.step_error(),
            Some(StepError::FileNotFoundError { .. })
        ));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_plan_does_not_execute() {
        let runner = MockRunner::default();
        let p = provisioner(MockStorage::default(), MockStorage::default(), runner.clone());
        let steps = [packages(&["curl"]), Step::EntryPoint {
            command: vec!["/bin/bash".to_string()],
        }];

        let planned = p.plan("ubuntu:22.04", &steps).await.unwrap();
        assert_eq!(planned.len(), 2);
        assert!(planned.iter().all(|l| !l.cached));
        assert!(runner.calls().is_empty());

        let image = p.build("ubuntu:22.04", &steps).await.unwrap();
        let replanned = p.plan("ubuntu:22.04", &steps).await.unwrap();
        assert_eq!(replanned.last().unwrap().digest, image.digest());
        assert!(replanned.iter().all(|l| l.cached));
    }
}
