//! Output formatting for CLI commands
//!
//! Reports render as a table by default, or as JSON or YAML for scripting.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::dispatcher::ApplyReport;
use crate::domain::ResourceKind;
use crate::observability::Outcome;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Yaml,
    Table,
}

impl OutputFormat {
    /// Parse output format from string
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "yaml" => Ok(OutputFormat::Yaml),
            "table" => Ok(OutputFormat::Table),
            _ => anyhow::bail!(
                "Unsupported output format: '{}'. Use 'json', 'yaml', or 'table'.",
                s
            ),
        }
    }
}

/// Print data as JSON
pub fn print_json<T: Serialize>(data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data).context("Failed to serialize to JSON")?;
    println!("{}", json);
    Ok(())
}

/// Print data as YAML
pub fn print_yaml<T: Serialize>(data: &T) -> Result<()> {
    let yaml = serde_yaml::to_string(data).context("Failed to serialize to YAML")?;
    println!("{}", yaml);
    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

fn print_table_header(columns: &[(&str, usize)]) {
    println!();
    let mut header = String::new();
    for (name, width) in columns {
        header.push_str(&format!("{:<width$} ", name, width = width));
    }
    println!("{}", header.trim());

    let total_width: usize = columns.iter().map(|(_, w)| w + 1).sum();
    println!("{}", "-".repeat(total_width.saturating_sub(1)));
}

/// Per-kind resource counts of a parsed manifest set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManifestSummary {
    pub issuers: usize,
    pub password_policies: usize,
    pub passwords: usize,
    pub secrets_engines: usize,
    pub pki_roles: usize,
}

impl ManifestSummary {
    pub fn add(&mut self, kind: ResourceKind) {
        match kind {
            ResourceKind::Issuer => self.issuers += 1,
            ResourceKind::PasswordPolicy => self.password_policies += 1,
            ResourceKind::Password => self.passwords += 1,
            ResourceKind::SecretsEngine => self.secrets_engines += 1,
            ResourceKind::PkiRole => self.pki_roles += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.issuers
            + self.password_policies
            + self.passwords
            + self.secrets_engines
            + self.pki_roles
    }
}

pub fn print_manifest_summary(summary: &ManifestSummary, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(summary),
        OutputFormat::Yaml => print_yaml(summary),
        OutputFormat::Table => {
            println!("{} resources valid", summary.total());
            println!("  SecretsEngine:  {}", summary.secrets_engines);
            println!("  Issuer:         {}", summary.issuers);
            println!("  PKIRole:        {}", summary.pki_roles);
            println!("  PasswordPolicy: {}", summary.password_policies);
            println!("  Password:       {}", summary.passwords);
            Ok(())
        }
    }
}

const KIND_WIDTH: usize = 16;
const PATH_WIDTH: usize = 48;
const OUTCOME_WIDTH: usize = 10;

pub fn print_apply_report(report: &ApplyReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Yaml => print_yaml(report),
        OutputFormat::Table => {
            if report.is_empty() {
                println!("No resources were reconciled");
                return Ok(());
            }

            print_table_header(&[
                ("KIND", KIND_WIDTH),
                ("PATH", PATH_WIDTH),
                ("OUTCOME", OUTCOME_WIDTH),
            ]);
            for entry in report.entries() {
                println!(
                    "{:<kind_w$} {:<path_w$} {}",
                    entry.kind.as_str(),
                    truncate(&entry.path, PATH_WIDTH),
                    entry.outcome.as_str(),
                    kind_w = KIND_WIDTH,
                    path_w = PATH_WIDTH,
                );
            }
            println!();
            println!(
                "{} created, {} updated, {} unchanged",
                report.count(Outcome::Created),
                report.count(Outcome::Updated),
                report.count(Outcome::Unchanged)
            );
            Ok(())
        }
    }
}
