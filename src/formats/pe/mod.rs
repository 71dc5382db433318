//! PE header, section and export directory parsing

pub mod directories;
pub mod headers;
pub mod sections;
pub mod types;
pub mod utils;

use sections::SectionTable;
pub use types::*;

/// Validated headers of a PE file, read from its on-disk bytes
#[derive(Debug, Clone)]
pub struct PeHeaders {
    pub dos_header: DosHeader,
    pub nt_headers: NtHeaders,
    pub sections: SectionTable,
}

impl PeHeaders {
    pub fn machine(&self) -> Machine {
        self.nt_headers.file_header.machine
    }

    pub fn is_dll(&self) -> bool {
        self.nt_headers.file_header.is_dll()
    }

    pub fn export_directory(&self) -> DataDirectory {
        self.nt_headers
            .data_directory(IMAGE_DIRECTORY_ENTRY_EXPORT)
    }
}
