use clap::Parser;
use envprov::core::archive;
use envprov::utils::error::ErrorSeverity;
use envprov::utils::{logger, validation::Validate};
use envprov::{CliConfig, HostRunner, HttpKeyFetcher, LocalStorage, ProvisionFile, Provisioner};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    let mut file = match ProvisionFile::from_file(&cli.file) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("❌ Failed to load provisioning file '{}': {}", cli.file, e);
            eprintln!("💡 Make sure the file exists and is valid TOML");
            std::process::exit(3);
        }
    };
    cli.apply_overrides(&mut file);

    if cli.log_json || file.log_json() {
        logger::init_json_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    tracing::info!("📁 Loaded provisioning file: {}", cli.file);
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    if let Err(e) = file.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(3);
    }

    display_build_summary(&file);

    let rootfs_dir = file.rootfs_dir();
    let runner = if file.chroot_enabled() {
        HostRunner::chroot(&rootfs_dir)
    } else {
        HostRunner::host()
    };
    let fetcher = match HttpKeyFetcher::new(file.http_timeout()) {
        Ok(fetcher) => fetcher,
        Err(e) => exit_with(e),
    };
    let provisioner = Provisioner::new(
        LocalStorage::new(&rootfs_dir),
        LocalStorage::new(file.context_dir()),
        runner,
        fetcher,
    )
    .with_layer_cache(file.layer_cache_enabled())
    .with_monitoring(cli.monitor_enabled(&file));

    let definition = file.definition();

    if cli.dry_run {
        tracing::info!("🔍 DRY RUN MODE - nothing will be executed");
        let planned = provisioner.plan(&definition.base, &definition.steps).await;
        return match planned {
            Ok(layers) => {
                for layer in layers {
                    let marker = if layer.cached { "cached" } else { "run" };
                    println!("{:>3}. [{}] {} {}", layer.index + 1, marker, layer.step, layer.digest);
                }
                Ok(())
            }
            Err(e) => exit_with(e),
        };
    }

    match provisioner.build_definition(&definition).await {
        Ok(image) => {
            let output = LocalStorage::new(file.output_dir());
            let archive_name = archive::export_image(&image, &output, &file.archive_name()).await?;
            let archive_path = output.base_path().join(archive_name);

            tracing::info!("📦 Image archive written to: {}", archive_path.display());
            println!("✅ Image {} built", image.digest());
            println!("📦 Archive: {}", archive_path.display());
            Ok(())
        }
        Err(e) => exit_with(e),
    }
}

fn display_build_summary(file: &ProvisionFile) {
    tracing::info!(
        "🧱 Image: {} (base {})",
        file.image_name().unwrap_or("<unnamed>"),
        file.image.base
    );
    tracing::info!("📂 Context: {}", file.context_dir());
    tracing::info!("🌱 Root filesystem: {}", file.rootfs_dir());
    tracing::info!(
        "⚙️ Steps: {}, layer cache: {}, chroot: {}",
        file.steps.len(),
        file.layer_cache_enabled(),
        file.chroot_enabled()
    );
}

fn exit_with(e: envprov::ProvisionError) -> ! {
    tracing::error!(
        "❌ Build failed: {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    eprintln!("❌ {}", e.user_friendly_message());
    if let Some(output) = e.step_error().and_then(|s| s.command_output()) {
        eprintln!("{}", output);
    }
    eprintln!("💡 Suggestion: {}", e.recovery_suggestion());

    let exit_code = match e.severity() {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    };
    std::process::exit(exit_code);
}
