//! # Manifests
//!
//! Resolves manifest inputs (files, directories or stdin) and parses them into
//! resources. Directories contribute their `.yaml` and `.yml` files, descending into
//! subdirectories only when recursion is requested.

pub mod parser;

use std::io::Read;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::domain::Resource;
use crate::errors::{Error, Result};

pub use parser::parse_documents;

const STDIN_NAME: &str = "<stdin>";

/// Where manifests are read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestSource {
    File(PathBuf),
    Stdin,
}

impl ManifestSource {
    pub fn name(&self) -> PathBuf {
        match self {
            ManifestSource::File(path) => path.clone(),
            ManifestSource::Stdin => PathBuf::from(STDIN_NAME),
        }
    }
}

fn is_manifest(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()).is_some_and(|ext| ext == "yaml" || ext == "yml")
}

/// Expand `paths` into the manifest sources to read, in a stable order.
///
/// No paths, or a single `-`, means stdin.
pub fn resolve_sources(paths: &[PathBuf], recursive: bool) -> Result<Vec<ManifestSource>> {
    if paths.is_empty() {
        return Ok(vec![ManifestSource::Stdin]);
    }

    let mut sources = Vec::new();
    for path in paths {
        if path.as_os_str() == "-" {
            sources.push(ManifestSource::Stdin);
            continue;
        }
        if !path.exists() {
            return Err(Error::manifest(path, "path does not exist"));
        }
        if path.is_file() {
            sources.push(ManifestSource::File(path.clone()));
            continue;
        }

        let depth = if recursive { usize::MAX } else { 1 };
        let before = sources.len();
        let walker = WalkDir::new(path).max_depth(depth).sort_by_file_name();
        for entry in walker.into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_file() && is_manifest(entry.path()) {
                sources.push(ManifestSource::File(entry.into_path()));
            }
        }

        if sources.len() == before {
            return Err(Error::manifest(path, "no .yaml or .yml manifests found"));
        }
    }
    Ok(sources)
}

/// Read and parse one source
pub fn read_source(source: &ManifestSource) -> Result<Vec<Resource>> {
    let content = match source {
        ManifestSource::File(path) => std::fs::read_to_string(path)
            .map_err(|e| Error::manifest(path, format!("failed to read file: {}", e)))?,
        ManifestSource::Stdin => {
            let mut content = String::new();
            std::io::stdin()
                .read_to_string(&mut content)
                .map_err(|e| Error::manifest(STDIN_NAME, format!("failed to read stdin: {}", e)))?;
            content
        }
    };
    parse_documents(&source.name(), &content)
}

/// Resolve `paths` and parse every resource they declare.
pub fn load(paths: &[PathBuf], recursive: bool) -> Result<Vec<Resource>> {
    let mut resources = Vec::new();
    for source in resolve_sources(paths, recursive)? {
        resources.extend(read_source(&source)?);
    }
    tracing::info!(resources = resources.len(), "Loaded manifests");
    Ok(resources)
}
