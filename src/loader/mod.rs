//! Image loading: validate a DLL on disk and lay it out at its virtual addresses.
//!
//! The loaded [`Image`] is a private copy of the file arranged the way the OS
//! loader would map it as a resource: headers at RVA 0, each section's raw
//! data at its `VirtualAddress`, zeros elsewhere. No code runs and no imports
//! are resolved. Every RVA is then a plain offset into an owned buffer, and
//! every read through [`ReadExt`] is bounds-checked.

pub mod redirection;

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::formats::pe::directories::{parse_exports, ParsedExports};
use crate::formats::pe::headers::{parse_dos_header, parse_nt_headers};
use crate::formats::pe::sections::{parse_section_headers, SectionTable};
use crate::formats::pe::utils::ReadExt;
use crate::formats::pe::{Architecture, DataDirectory, ParseOptions, PeError, PeHeaders};

use redirection::{RedirectionControl, RedirectionGuard, SystemRedirection};

/// Reasons a file cannot be analyzed
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File size of {found} bytes exceeds the maximum allowed size of {limit} bytes")]
    FileTooLarge { limit: u64, found: u64 },

    #[error("Not a PE image: {0}")]
    NotAnImage(PeError),

    #[error("Bad NT header: {0}")]
    BadNtHeader(PeError),

    #[error("Not a DLL (file characteristics 0x{characteristics:04x})")]
    NotADll { characteristics: u16 },

    #[error("Image has no export table")]
    NoExportTable,

    #[error("Image size of {found} bytes exceeds the maximum allowed size of {limit} bytes")]
    ImageTooLarge { limit: u64, found: u64 },

    #[error("Malformed export table: {0}")]
    MalformedExportTable(PeError),
}

pub type Result<T> = std::result::Result<T, LoadError>;

/// Resource limits applied while loading
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Largest file that will be opened
    pub max_file_size: u64,
    /// Largest virtual image that will be laid out in memory
    pub max_image_size: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_file_size: 256 * 1024 * 1024,  // 256MB
            max_image_size: 512 * 1024 * 1024, // 512MB
        }
    }
}

/// A validated DLL laid out at its virtual addresses
#[derive(Debug)]
pub struct Image {
    file_name: String,
    architecture: Architecture,
    headers: PeHeaders,
    memory: Vec<u8>,
}

impl Image {
    /// Load and validate the DLL at `path`.
    pub fn load<P: AsRef<Path>>(path: P, config: &LoaderConfig) -> Result<Self> {
        Self::load_with(path, config, &SystemRedirection)
    }

    /// Like [`Image::load`], toggling filesystem redirection through `control`.
    ///
    /// Redirection is disabled only around opening and mapping the file, and
    /// restored before any validation runs, on success and failure alike.
    pub fn load_with<P: AsRef<Path>>(
        path: P,
        config: &LoaderConfig,
        control: &dyn RedirectionControl,
    ) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading image");

        let mapped = {
            let _redirection = RedirectionGuard::engage(control);
            map_file(path, config)
        };
        let mmap = mapped?;

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        // The file mapping is released when `mmap` drops at the end of this call.
        Self::parse(&mmap, &file_name, config)
    }

    /// Validate and lay out an in-memory copy of a DLL file.
    ///
    /// Checks run in a fixed order: DOS signature, NT headers, machine type,
    /// DLL characteristic, export directory presence.
    pub fn parse(data: &[u8], file_name: &str, config: &LoaderConfig) -> Result<Self> {
        let dos_header = parse_dos_header(data).map_err(LoadError::NotAnImage)?;
        let nt_headers =
            parse_nt_headers(data, dos_header.e_lfanew as usize).map_err(LoadError::BadNtHeader)?;

        let machine = nt_headers.file_header.machine;
        let architecture = machine
            .architecture()
            .ok_or(LoadError::BadNtHeader(PeError::InvalidMachine(machine.raw())))?;
        let magic = nt_headers.optional_header.magic;
        if magic != architecture.optional_header_magic() {
            return Err(LoadError::BadNtHeader(PeError::MagicMismatch {
                magic,
                machine,
            }));
        }

        if !nt_headers.file_header.is_dll() {
            return Err(LoadError::NotADll {
                characteristics: nt_headers.file_header.characteristics,
            });
        }

        let section_headers = parse_section_headers(
            data,
            nt_headers.section_table_offset,
            nt_headers.file_header.number_of_sections,
        )
        .map_err(LoadError::BadNtHeader)?;

        let headers = PeHeaders {
            dos_header,
            nt_headers,
            sections: SectionTable::new(section_headers),
        };
        if !headers.export_directory().is_present() {
            return Err(LoadError::NoExportTable);
        }

        for (a, b) in headers.sections.overlapping_pairs() {
            let sections = headers.sections.sections();
            warn!(
                first = %sections[a].name(),
                second = %sections[b].name(),
                "Section ranges overlap; the earlier section wins lookups"
            );
        }

        let memory = lay_out(data, &headers, config)?;
        info!(
            file = %file_name,
            %architecture,
            sections = headers.sections.len(),
            image_size = memory.len(),
            "Image loaded"
        );

        Ok(Self {
            file_name: file_name.to_string(),
            architecture,
            headers,
            memory,
        })
    }

    /// File name (no directory) the image was loaded from
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    pub fn headers(&self) -> &PeHeaders {
        &self.headers
    }

    pub fn sections(&self) -> &SectionTable {
        &self.headers.sections
    }

    pub fn export_directory(&self) -> DataDirectory {
        self.headers.export_directory()
    }

    /// The laid out image; index with RVAs.
    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    /// Walk the export directory of this image.
    pub fn exports(&self, options: &ParseOptions) -> Result<ParsedExports> {
        parse_exports(&self.memory, &self.export_directory(), options)
            .map_err(LoadError::MalformedExportTable)
    }
}

fn map_file(path: &Path, config: &LoaderConfig) -> Result<Mmap> {
    let io_error = |source: std::io::Error| LoadError::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(io_error)?;
    let size = file.metadata().map_err(io_error)?.len();
    if size > config.max_file_size {
        warn!(
            path = %path.display(),
            size,
            limit = config.max_file_size,
            "File is too large"
        );
        return Err(LoadError::FileTooLarge {
            limit: config.max_file_size,
            found: size,
        });
    }
    if size == 0 {
        // Empty files cannot be mapped and cannot hold a DOS header anyway
        return Err(LoadError::NotAnImage(PeError::TruncatedHeader {
            expected: 64,
            actual: 0,
        }));
    }

    // Safety: read-only map of a regular file; the bytes are copied out before it is dropped.
    unsafe { Mmap::map(&file) }.map_err(io_error)
}

/// Copy headers and section raw data to their virtual addresses.
fn lay_out(file: &[u8], headers: &PeHeaders, config: &LoaderConfig) -> Result<Vec<u8>> {
    let optional = &headers.nt_headers.optional_header;
    let image_size = u64::from(optional.size_of_image).max(headers.sections.virtual_extent());
    if image_size > config.max_image_size {
        return Err(LoadError::ImageTooLarge {
            limit: config.max_image_size,
            found: image_size,
        });
    }

    let mut memory = vec![0u8; image_size as usize];

    let declared_headers = if optional.size_of_headers == 0 {
        headers.nt_headers.section_table_offset
    } else {
        optional.size_of_headers as usize
    };
    let header_len = declared_headers.min(file.len()).min(memory.len());
    memory[..header_len].copy_from_slice(&file[..header_len]);

    for section in headers.sections.sections() {
        let mut len = section.size_of_raw_data as usize;
        if section.virtual_size != 0 {
            len = len.min(section.virtual_size as usize);
        }
        let start = section.pointer_to_raw_data as usize;
        let dest = section.virtual_address as usize;
        if len == 0 {
            continue;
        }

        // Clip to both the file and the image
        let available = file.len().saturating_sub(start);
        let room = memory.len().saturating_sub(dest);
        let len = len.min(available).min(room);
        if len == 0 {
            warn!(
                section = %section.name(),
                raw_offset = start,
                "Section raw data lies outside the file or image"
            );
            continue;
        }

        if let Some(raw) = file.read_slice_at(start, len) {
            memory[dest..dest + len].copy_from_slice(raw);
        }
    }

    debug!(size = memory.len(), "Laid out virtual image");
    Ok(memory)
}
