//! Proxy source generation.
//!
//! Renders a classified [`ExportTable`] into a C++ proxy module and, for x64
//! targets, a MASM file with the jump stubs MSVC cannot inline there.
//!
//! Per export, in table order:
//! - a `/EXPORT` linker directive (forwarders alias straight to their target);
//! - for data, a zeroed `PVOID` array sized to the probed slot count;
//! - for everything but forwarders, a `PVOID` slot filled at `DLL_PROCESS_ATTACH`;
//! - for functions, a jump through that slot (naked function on x86, asm stub on x64).

pub mod names;
mod templates;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classify::ExportTable;
use crate::formats::pe::Architecture;

use names::{assign_symbols, module_stem, sanitize_identifier};
use templates::{AsmFile, ProxyExport, ProxyPlan, SourceFile};

/// Where the generated proxy finds the original DLL at run time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum OriginLoadMode {
    /// Next to the proxy, under `file_name` (default `<stem>Org.dll`)
    SameDir {
        #[serde(default)]
        file_name: Option<String>,
    },
    /// System directory, under the target's own file name
    SystemDir,
    /// Fixed path, used verbatim
    CustomPath { path: String },
}

impl Default for OriginLoadMode {
    fn default() -> Self {
        Self::SameDir { file_name: None }
    }
}

impl OriginLoadMode {
    /// File name the proxy appends to its search directory.
    pub fn original_file_name(&self, target_file_name: &str) -> String {
        match self {
            Self::SameDir {
                file_name: Some(name),
            } => name.clone(),
            Self::SameDir { file_name: None } => {
                format!("{}Org.dll", module_stem(target_file_name))
            }
            Self::SystemDir => target_file_name.to_string(),
            Self::CustomPath { path } => path.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorOptions {
    /// Prepended to every generated stub, array and slot name
    pub symbol_prefix: String,
    pub origin: OriginLoadMode,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            symbol_prefix: "AheadLib_".to_string(),
            origin: OriginLoadMode::default(),
        }
    }
}

/// Rendered proxy text
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedSource {
    /// C++ module
    pub source: String,
    /// MASM jump stubs; empty for x86
    pub asm: String,
}

impl GeneratedSource {
    pub fn has_asm(&self) -> bool {
        !self.asm.is_empty()
    }
}

/// Render the proxy for `table`.
///
/// Output depends only on the arguments, so equal inputs give byte-identical text.
pub fn generate(
    table: &ExportTable,
    architecture: Architecture,
    target_file_name: &str,
    options: &GeneratorOptions,
) -> GeneratedSource {
    let symbols = assign_symbols(&table.entries);
    let prefix = if options.symbol_prefix.is_empty() {
        String::new()
    } else {
        sanitize_identifier(&options.symbol_prefix)
    };

    let plan = ProxyPlan {
        target_file_name,
        architecture,
        prefix: &prefix,
        origin: &options.origin,
        table,
        exports: table
            .entries
            .iter()
            .zip(&symbols)
            .map(|(entry, symbols)| ProxyExport { entry, symbols })
            .collect(),
    };

    let source = SourceFile(&plan).to_string();
    let asm = match architecture {
        Architecture::X86 => String::new(),
        Architecture::X64 => AsmFile(&plan).to_string(),
    };

    debug!(
        target_file = target_file_name,
        %architecture,
        exports = table.len(),
        source_bytes = source.len(),
        asm_bytes = asm.len(),
        "Generated proxy source"
    );

    GeneratedSource { source, asm }
}
