//! One analysis run: load, parse, classify.
//!
//! The [`Image`] lives only inside a run. Whatever the outcome, it is dropped
//! before the run returns, and the resulting [`Analysis`] owns copies of
//! everything generation needs.

use std::fmt::Write as _;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::classify::{classify_all, ExportKind, ExportTable};
use crate::codegen::{generate, GeneratedSource, GeneratorOptions};
use crate::config::ProxyConfig;
use crate::error::Result;
use crate::formats::pe::Architecture;
use crate::loader::redirection::{RedirectionControl, SystemRedirection};
use crate::loader::Image;
use crate::span_trace;

/// Classified exports of one DLL, detached from its image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    /// File name the proxy will be built for
    pub file_name: String,
    pub architecture: Architecture,
    pub table: ExportTable,
}

/// One row of the machine-readable report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub ordinal: u32,
    pub rva: u32,
    pub name: Option<String>,
    pub section: String,
    #[serde(flatten)]
    pub kind: ExportKind,
}

impl Analysis {
    /// Render the proxy sources for this DLL.
    pub fn generate(&self, options: &GeneratorOptions) -> GeneratedSource {
        generate(&self.table, self.architecture, &self.file_name, options)
    }

    pub fn summary(&self) -> Vec<ExportSummary> {
        self.table
            .entries
            .iter()
            .map(|entry| ExportSummary {
                ordinal: entry.ordinal,
                rva: entry.rva,
                name: entry.name.clone(),
                section: entry.section.name(),
                kind: entry.kind.clone(),
            })
            .collect()
    }

    /// The same analysis narrowed to the export `query` names, by name or
    /// `#<ordinal>`.
    pub fn only(&self, query: &str) -> Option<Analysis> {
        let entry = self.table.lookup(query)?;
        Some(Analysis {
            file_name: self.file_name.clone(),
            architecture: self.architecture,
            table: ExportTable {
                module_name: self.table.module_name.clone(),
                ordinal_base: self.table.ordinal_base,
                entries: vec![entry.clone()],
            },
        })
    }

    /// Human-readable export listing.
    pub fn report(&self) -> String {
        let (functions, forwarders, data) = self.table.kind_counts();
        let name_width = self
            .table
            .entries
            .iter()
            .map(|e| e.name.as_deref().map_or(9, str::len))
            .max()
            .unwrap_or(0);

        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} ({}), export name {:?}, ordinal base {}",
            self.file_name, self.architecture, self.table.module_name, self.table.ordinal_base
        );
        let _ = writeln!(
            out,
            "{} exports: {} functions, {} forwarders, {} data",
            self.table.len(),
            functions,
            forwarders,
            data
        );

        for entry in &self.table.entries {
            let ordinal = format!("#{}", entry.ordinal);
            let name = entry.name.as_deref().unwrap_or("<unnamed>");
            let mut line = format!(
                "{:>6}  {:<width$}  {:<9}  {:<8}",
                ordinal,
                name,
                entry.kind.to_string(),
                entry.section.name(),
                width = name_width
            );
            match &entry.kind {
                ExportKind::Forwarder { target } => {
                    let _ = write!(line, "  -> {}", target);
                }
                ExportKind::Data { slots } => {
                    let _ = write!(line, "  x{}", slots);
                }
                ExportKind::Function => {}
            }
            let _ = writeln!(out, "{}", line.trim_end());
        }
        out
    }
}

/// Analyze the DLL at `path`.
pub fn analyze<P: AsRef<Path>>(path: P, config: &ProxyConfig) -> Result<Analysis> {
    analyze_with(path, config, &SystemRedirection)
}

/// Like [`analyze`], toggling filesystem redirection through `control`.
pub fn analyze_with<P: AsRef<Path>>(
    path: P,
    config: &ProxyConfig,
    control: &dyn RedirectionControl,
) -> Result<Analysis> {
    let path = path.as_ref();
    let span = span_trace!("analyze", path = %path.display());
    let _enter = span.enter();

    let image = Image::load_with(path, &config.loader, control)?;
    run(image, config)
}

/// Analyze an in-memory copy of a DLL file named `file_name`.
pub fn analyze_bytes(data: &[u8], file_name: &str, config: &ProxyConfig) -> Result<Analysis> {
    let span = span_trace!("analyze_bytes", file = file_name, size = data.len());
    let _enter = span.enter();

    let image = Image::parse(data, file_name, &config.loader)?;
    run(image, config)
}

fn run(image: Image, config: &ProxyConfig) -> Result<Analysis> {
    let parsed = image.exports(&config.parser)?;
    let table = classify_all(&image, &parsed, &config.classifier)?;

    info!(
        file = image.file_name(),
        exports = table.len(),
        skipped = (parsed.number_of_functions as usize).saturating_sub(parsed.records.len()),
        "Analysis complete"
    );

    Ok(Analysis {
        file_name: image.file_name().to_string(),
        architecture: image.architecture(),
        table,
    })
}
