//! `apply` and `validate` command handlers

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use super::output::{print_apply_report, print_manifest_summary, ManifestSummary, OutputFormat};
use crate::config::AppConfig;
use crate::dispatcher::Dispatcher;
use crate::errors::Error;
use crate::manifest;
use crate::secrets::{MemoryBackend, SecretsBackend, VaultBackend};

async fn select_backend(
    config: &AppConfig,
    dry_run: bool,
) -> crate::Result<Arc<dyn SecretsBackend>> {
    if dry_run {
        info!("Dry run: reconciling against an in-memory backend");
        return Ok(Arc::new(MemoryBackend::permissive()));
    }

    let backend = VaultBackend::connect(&config.vault).await.map_err(|e| {
        Error::config(format!("Cannot use Vault at '{}': {}", config.vault.address, e))
    })?;
    Ok(Arc::new(backend))
}

pub async fn handle_apply_command(
    config: &AppConfig,
    files: &[PathBuf],
    recursive: bool,
    dry_run: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let resources = manifest::load(files, recursive)?;
    let backend = select_backend(config, dry_run).await?;
    let (dispatcher, _processors) = Dispatcher::for_backend(backend, &config.dispatch);

    match dispatcher.dispatch(resources).await {
        Ok(report) => print_apply_report(&report, format),
        Err(err) => {
            print_apply_report(&dispatcher.report().await, format)?;
            for failure in err.failures() {
                eprintln!("  - {}", failure);
            }
            Err(err.into())
        }
    }
}

pub fn handle_validate_command(
    files: &[PathBuf],
    recursive: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let resources = manifest::load(files, recursive)?;

    let mut summary = ManifestSummary::default();
    for resource in &resources {
        summary.add(resource.kind());
    }
    print_manifest_summary(&summary, format)
}
