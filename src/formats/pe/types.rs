//! Core PE data types and structures

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::formats::pe::utils::section_name_to_string;

// PE constants
pub const DOS_SIGNATURE: u16 = 0x5A4D; // MZ
pub const DOS_HEADER_SIZE: usize = 64;
pub const PE_SIGNATURE: [u8; 4] = *b"PE\0\0";
pub const PE32_MAGIC: u16 = 0x10B;
pub const PE32PLUS_MAGIC: u16 = 0x20B;
pub const COFF_HEADER_SIZE: usize = 20;
pub const SECTION_HEADER_SIZE: usize = 40;
pub const EXPORT_DIRECTORY_SIZE: usize = 40;
pub const MAX_DATA_DIRECTORIES: u32 = 16;

// Data directory indices
pub const IMAGE_DIRECTORY_ENTRY_EXPORT: usize = 0;

// File characteristics
pub const IMAGE_FILE_EXECUTABLE_IMAGE: u16 = 0x0002;
pub const IMAGE_FILE_32BIT_MACHINE: u16 = 0x0100;
pub const IMAGE_FILE_DLL: u16 = 0x2000;

/// PE parsing error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeError {
    #[error("Invalid DOS signature")]
    InvalidDosSignature,
    #[error("Invalid PE signature")]
    InvalidPeSignature,
    #[error("Unsupported machine type: 0x{0:04x}")]
    InvalidMachine(u16),
    #[error("Invalid optional header magic: 0x{0:04x}")]
    InvalidMagic(u16),
    #[error("Optional header magic 0x{magic:04x} does not match machine {machine}")]
    MagicMismatch { magic: u16, machine: Machine },
    #[error("Truncated header: expected {expected} bytes, got {actual}")]
    TruncatedHeader { expected: usize, actual: usize },
    #[error("Invalid RVA: 0x{rva:08x}")]
    InvalidRva { rva: u32 },
    #[error("Invalid string at RVA 0x{rva:08x}")]
    InvalidString { rva: u32 },
    #[error("Ordinal out of range 1..=65535: base {base} + index {index}")]
    OrdinalOverflow { base: u32, index: u32 },
    #[error("Limit exceeded: {what} ({found} > {limit})")]
    LimitExceeded {
        what: &'static str,
        found: u64,
        limit: u64,
    },
}

pub type Result<T> = std::result::Result<T, PeError>;

/// Machine types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Machine {
    Unknown,
    I386,   // 0x014c
    X86_64, // 0x8664
    Arm,    // 0x01c0
    Arm64,  // 0xaa64
    ArmNT,  // 0x01c4
    IA64,   // 0x0200
    Other(u16),
}

impl From<u16> for Machine {
    fn from(value: u16) -> Self {
        match value {
            0x014c => Self::I386,
            0x8664 => Self::X86_64,
            0x01c0 => Self::Arm,
            0xaa64 => Self::Arm64,
            0x01c4 => Self::ArmNT,
            0x0200 => Self::IA64,
            0 => Self::Unknown,
            other => Self::Other(other),
        }
    }
}

impl Machine {
    pub fn raw(&self) -> u16 {
        match self {
            Self::Unknown => 0,
            Self::I386 => 0x014c,
            Self::X86_64 => 0x8664,
            Self::Arm => 0x01c0,
            Self::Arm64 => 0xaa64,
            Self::ArmNT => 0x01c4,
            Self::IA64 => 0x0200,
            Self::Other(raw) => *raw,
        }
    }

    /// Architecture family the proxy generator targets for this machine.
    ///
    /// Only the Intel families are recognized; everything else has no
    /// trampoline flavor and is rejected by the loader.
    pub fn architecture(&self) -> Option<Architecture> {
        match self {
            Self::I386 => Some(Architecture::X86),
            Self::X86_64 | Self::IA64 => Some(Architecture::X64),
            _ => None,
        }
    }
}

impl fmt::Display for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::I386 => write!(f, "i386"),
            Self::X86_64 => write!(f, "amd64"),
            Self::Arm => write!(f, "arm"),
            Self::Arm64 => write!(f, "arm64"),
            Self::ArmNT => write!(f, "armnt"),
            Self::IA64 => write!(f, "ia64"),
            Self::Other(raw) => write!(f, "0x{:04x}", raw),
        }
    }
}

/// Bitness of the analyzed image, which is also the code generation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    X86,
    X64,
}

impl Architecture {
    /// Size of a pointer-sized word on this architecture.
    pub fn pointer_size(&self) -> usize {
        match self {
            Self::X86 => 4,
            Self::X64 => 8,
        }
    }

    pub fn optional_header_magic(&self) -> u16 {
        match self {
            Self::X86 => PE32_MAGIC,
            Self::X64 => PE32PLUS_MAGIC,
        }
    }

    pub fn is_64bit(&self) -> bool {
        matches!(self, Self::X64)
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::X86 => write!(f, "x86"),
            Self::X64 => write!(f, "x64"),
        }
    }
}

/// DOS header fields the loader relies on
#[derive(Debug, Clone, Copy)]
pub struct DosHeader {
    pub e_magic: u16,  // Magic number (MZ)
    pub e_lfanew: u32, // File address of PE header
}

/// COFF header (20 bytes)
#[derive(Debug, Clone, Copy)]
pub struct CoffHeader {
    pub machine: Machine,
    pub number_of_sections: u16,
    pub time_date_stamp: u32,
    pub size_of_optional_header: u16,
    pub characteristics: u16,
}

impl CoffHeader {
    pub fn is_dll(&self) -> bool {
        (self.characteristics & IMAGE_FILE_DLL) != 0
    }
}

/// Data directory entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataDirectory {
    pub virtual_address: u32,
    pub size: u32,
}

impl DataDirectory {
    pub fn is_present(&self) -> bool {
        self.virtual_address != 0 && self.size != 0
    }
}

/// Optional header fields shared by PE32 and PE32+, widened where they differ.
#[derive(Debug, Clone)]
pub struct OptionalHeader {
    pub magic: u16,
    pub address_of_entry_point: u32,
    pub image_base: u64,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub dll_characteristics: u16,
    pub number_of_rva_and_sizes: u32,
}

impl OptionalHeader {
    pub fn is_64bit(&self) -> bool {
        self.magic == PE32PLUS_MAGIC
    }
}

/// NT headers (PE signature + COFF + Optional)
#[derive(Debug, Clone)]
pub struct NtHeaders {
    pub offset: usize,
    pub file_header: CoffHeader,
    pub optional_header: OptionalHeader,
    pub data_directories: Vec<DataDirectory>,
    /// File offset of the first section header.
    pub section_table_offset: usize,
}

impl NtHeaders {
    pub fn data_directory(&self, index: usize) -> DataDirectory {
        self.data_directories
            .get(index)
            .copied()
            .unwrap_or_default()
    }
}

bitflags! {
    /// Section characteristics relevant to export classification.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SectionFlags: u32 {
        const CNT_CODE = 0x0000_0020;
        const CNT_INITIALIZED_DATA = 0x0000_0040;
        const CNT_UNINITIALIZED_DATA = 0x0000_0080;
        const MEM_EXECUTE = 0x2000_0000;
        const MEM_READ = 0x4000_0000;
        const MEM_WRITE = 0x8000_0000;
    }
}

/// Section header, copied out of the image so it can outlive it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionHeader {
    pub name: [u8; 8],
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub size_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
    pub characteristics: SectionFlags,
}

impl SectionHeader {
    pub fn name(&self) -> String {
        section_name_to_string(&self.name)
    }

    /// Inclusive on both ends: `[VirtualAddress, VirtualAddress + VirtualSize]`.
    pub fn contains_rva(&self, rva: u32) -> bool {
        let start = u64::from(self.virtual_address);
        let end = start + u64::from(self.virtual_size);
        (start..=end).contains(&u64::from(rva))
    }

    pub fn is_executable(&self) -> bool {
        self.characteristics.contains(SectionFlags::MEM_EXECUTE)
    }

    pub fn is_readable(&self) -> bool {
        self.characteristics.contains(SectionFlags::MEM_READ)
    }

    pub fn is_writable(&self) -> bool {
        self.characteristics.contains(SectionFlags::MEM_WRITE)
    }

    /// Compact `rwx` rendering used in reports.
    pub fn permissions(&self) -> String {
        let mut perms = String::with_capacity(3);
        perms.push(if self.is_readable() { 'r' } else { '-' });
        perms.push(if self.is_writable() { 'w' } else { '-' });
        perms.push(if self.is_executable() { 'x' } else { '-' });
        perms
    }
}

/// One non-empty slot of the export address table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRecord {
    /// Position in the export address table.
    pub index: u32,
    pub ordinal: u32,
    pub function_rva: u32,
    pub name: Option<String>,
    /// Zero when the record is ordinal-only.
    pub name_rva: u32,
}

/// Parsing options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseOptions {
    /// Largest `NumberOfFunctions`/`NumberOfNames` accepted before the table is rejected
    pub max_exports: usize,
    /// Longest export or module name read before giving up on the terminator
    pub max_name_len: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            max_exports: 65536,
            max_name_len: 4096,
        }
    }
}
