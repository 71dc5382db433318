//! Export classification.
//!
//! Every export record is assigned exactly one kind by looking at the first
//! section (in table order) containing its RVA:
//!
//! 1. executable section: [`ExportKind::Function`], whatever else is set;
//! 2. readable, not writable: a forwarder string, which must contain a `.`;
//! 3. readable and writable: [`ExportKind::Data`], sized by probing
//!    consecutive non-zero pointer-sized words;
//! 4. anything else: [`ClassifyError::UnrecognizedExportKind`].
//!
//! Anything the rules cannot interpret is returned as a [`ClassifyError`]
//! naming the export, never guessed.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::formats::pe::directories::ParsedExports;
use crate::formats::pe::sections::SectionTable;
use crate::formats::pe::utils::ReadExt;
use crate::formats::pe::{Architecture, ExportRecord, SectionHeader};
use crate::loader::Image;

/// Category of a classified export and its payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExportKind {
    /// Code; reached through a jump stub
    Function,
    /// `Module.Export` string resolved by the OS loader
    Forwarder { target: String },
    /// Exported variable spanning `slots` pointer-sized words (at least 1)
    Data { slots: u32 },
}

impl fmt::Display for ExportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function => write!(f, "function"),
            Self::Forwarder { .. } => write!(f, "forwarder"),
            Self::Data { .. } => write!(f, "data"),
        }
    }
}

/// A classified export, independent of the image it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportEntry {
    pub index: u32,
    pub ordinal: u32,
    pub rva: u32,
    pub name: Option<String>,
    pub name_rva: u32,
    /// Copy of the owning section header
    pub section: SectionHeader,
    pub kind: ExportKind,
}

impl ExportEntry {
    pub fn is_forwarder(&self) -> bool {
        matches!(self.kind, ExportKind::Forwarder { .. })
    }

    pub fn is_function(&self) -> bool {
        matches!(self.kind, ExportKind::Function)
    }

    /// Number of pointer-sized words for data exports
    pub fn data_slots(&self) -> Option<u32> {
        match self.kind {
            ExportKind::Data { slots } => Some(slots),
            _ => None,
        }
    }

    pub fn forwarder_target(&self) -> Option<&str> {
        match &self.kind {
            ExportKind::Forwarder { target } => Some(target),
            _ => None,
        }
    }
}

/// Classified exports of one DLL, ascending by index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportTable {
    pub module_name: String,
    pub ordinal_base: u32,
    pub entries: Vec<ExportEntry>,
}

impl ExportTable {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get_by_ordinal(&self, ordinal: u32) -> Option<&ExportEntry> {
        self.entries.iter().find(|e| e.ordinal == ordinal)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&ExportEntry> {
        self.entries
            .iter()
            .find(|e| e.name.as_deref() == Some(name))
    }

    /// Find an export by name, or by ordinal written as `#<ordinal>`.
    pub fn lookup(&self, query: &str) -> Option<&ExportEntry> {
        match query.strip_prefix('#').map(str::parse::<u32>) {
            Some(Ok(ordinal)) => self.get_by_ordinal(ordinal),
            _ => self.get_by_name(query),
        }
    }

    /// (functions, forwarders, data)
    pub fn kind_counts(&self) -> (usize, usize, usize) {
        self.entries
            .iter()
            .fold((0, 0, 0), |(f, fw, d), e| match e.kind {
                ExportKind::Function => (f + 1, fw, d),
                ExportKind::Forwarder { .. } => (f, fw + 1, d),
                ExportKind::Data { .. } => (f, fw, d + 1),
            })
    }
}

/// Which export an anomaly refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportLocation {
    pub ordinal: u32,
    pub rva: u32,
    pub name: Option<String>,
}

impl From<&ExportRecord> for ExportLocation {
    fn from(record: &ExportRecord) -> Self {
        Self {
            ordinal: record.ordinal,
            rva: record.function_rva,
            name: record.name.clone(),
        }
    }
}

impl fmt::Display for ExportLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ordinal {}", self.ordinal)?;
        if let Some(name) = &self.name {
            write!(f, " ({})", name)?;
        }
        write!(f, " at RVA 0x{:08x}", self.rva)
    }
}

/// Export entries the classifier refuses to interpret
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifyError {
    #[error("Unreadable forwarder string for export {export}")]
    UnreadableForwarderPointer { export: ExportLocation },

    #[error("Unreadable data word at RVA 0x{address:08x} for export {export}")]
    UnreadableDataPointer { export: ExportLocation, address: u64 },

    #[error("Read-only export {export} is not a forwarder: {text:?}")]
    UnknownReadOnlyExport { export: ExportLocation, text: String },

    #[error(
        "Unrecognized export kind for {export} ({})",
        .section.as_deref().unwrap_or("outside every section")
    )]
    UnrecognizedExportKind {
        export: ExportLocation,
        /// Section name and permissions, when one contained the RVA
        section: Option<String>,
    },
}

impl ClassifyError {
    pub fn export(&self) -> &ExportLocation {
        match self {
            Self::UnreadableForwarderPointer { export }
            | Self::UnreadableDataPointer { export, .. }
            | Self::UnknownReadOnlyExport { export, .. }
            | Self::UnrecognizedExportKind { export, .. } => export,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClassifyError>;

/// Probing limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Longest forwarder string accepted, terminator excluded
    pub max_forwarder_len: usize,
    /// Data probing stops after this many non-zero words
    pub max_data_slots: u32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_forwarder_len: 1024,
            max_data_slots: 65536,
        }
    }
}

/// Classifies records against one image's sections and memory
pub struct Classifier<'a> {
    sections: &'a SectionTable,
    memory: &'a [u8],
    architecture: Architecture,
    config: &'a ClassifierConfig,
}

impl<'a> Classifier<'a> {
    /// `memory` is the virtually laid out image, indexed by RVA.
    pub fn new(
        sections: &'a SectionTable,
        memory: &'a [u8],
        architecture: Architecture,
        config: &'a ClassifierConfig,
    ) -> Self {
        Self {
            sections,
            memory,
            architecture,
            config,
        }
    }

    pub fn for_image(image: &'a Image, config: &'a ClassifierConfig) -> Self {
        Self::new(image.sections(), image.memory(), image.architecture(), config)
    }

    pub fn classify(&self, record: &ExportRecord) -> Result<ExportEntry> {
        let rva = record.function_rva;
        let Some(section) = self.sections.section_containing_rva(rva) else {
            return Err(ClassifyError::UnrecognizedExportKind {
                export: record.into(),
                section: None,
            });
        };

        let kind = if section.is_executable() {
            ExportKind::Function
        } else if section.is_readable() && !section.is_writable() {
            self.forwarder(record)?
        } else if section.is_readable() && section.is_writable() {
            ExportKind::Data {
                slots: self.data_slots(record)?,
            }
        } else {
            return Err(ClassifyError::UnrecognizedExportKind {
                export: record.into(),
                section: Some(format!("{} {}", section.name(), section.permissions())),
            });
        };

        debug!(
            ordinal = record.ordinal,
            rva,
            section = %section.name(),
            %kind,
            "Classified export"
        );

        Ok(ExportEntry {
            index: record.index,
            ordinal: record.ordinal,
            rva,
            name: record.name.clone(),
            name_rva: record.name_rva,
            section: section.clone(),
            kind,
        })
    }

    /// Classify every record, keeping their order.
    pub fn classify_records(&self, parsed: &ParsedExports) -> Result<ExportTable> {
        let entries = parsed
            .records
            .iter()
            .map(|record| self.classify(record))
            .collect::<Result<Vec<_>>>()?;

        Ok(ExportTable {
            module_name: parsed.module_name.clone(),
            ordinal_base: parsed.ordinal_base,
            entries,
        })
    }

    fn forwarder(&self, record: &ExportRecord) -> Result<ExportKind> {
        let bytes = self
            .memory
            .read_cstr_at(record.function_rva as usize, self.config.max_forwarder_len + 1)
            .ok_or_else(|| ClassifyError::UnreadableForwarderPointer {
                export: record.into(),
            })?;
        let text = String::from_utf8_lossy(bytes).into_owned();

        if text.contains('.') {
            Ok(ExportKind::Forwarder { target: text })
        } else {
            Err(ClassifyError::UnknownReadOnlyExport {
                export: record.into(),
                text,
            })
        }
    }

    fn data_slots(&self, record: &ExportRecord) -> Result<u32> {
        let width = self.architecture.pointer_size();
        let mut address = u64::from(record.function_rva);
        let mut slots = 0u32;

        loop {
            let word = usize::try_from(address)
                .ok()
                .and_then(|offset| self.memory.read_word_at(offset, width))
                .ok_or_else(|| ClassifyError::UnreadableDataPointer {
                    export: record.into(),
                    address,
                })?;
            if word == 0 {
                break;
            }
            slots += 1;
            if slots >= self.config.max_data_slots {
                warn!(
                    ordinal = record.ordinal,
                    slots,
                    "Data export probe hit the slot limit"
                );
                break;
            }
            address += width as u64;
        }

        Ok(slots.max(1))
    }
}

/// Classify all parsed exports of `image`.
pub fn classify_all(
    image: &Image,
    parsed: &ParsedExports,
    config: &ClassifierConfig,
) -> Result<ExportTable> {
    let table = Classifier::for_image(image, config).classify_records(parsed)?;
    let (functions, forwarders, data) = table.kind_counts();
    info!(
        module = %table.module_name,
        functions,
        forwarders,
        data,
        "Classified exports"
    );
    Ok(table)
}
