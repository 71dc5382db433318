//! Common test utilities and helpers.
//!
//! [`DllBuilder`] assembles small but well-formed PE32/PE32+ DLLs so the
//! integration tests do not depend on binaries checked into the repository.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use proxyforge::Architecture;

pub const ALIGNMENT: u32 = 0x1000;

pub const CODE: u32 = 0x6000_0020; // CNT_CODE | MEM_EXECUTE | MEM_READ
pub const RDATA: u32 = 0x4000_0040; // CNT_INITIALIZED_DATA | MEM_READ
pub const DATA: u32 = 0xC000_0040; // CNT_INITIALIZED_DATA | MEM_READ | MEM_WRITE
pub const WRITE_ONLY: u32 = 0x8000_0040; // CNT_INITIALIZED_DATA | MEM_WRITE

const E_LFANEW: usize = 0x80;
const COFF: usize = E_LFANEW + 4;
const OPTIONAL: usize = COFF + 20;

struct Section {
    name: String,
    characteristics: u32,
    data: Vec<u8>,
}

struct Export {
    ordinal: u32,
    name: Option<String>,
    rva: u32,
}

/// Builder for synthetic DLLs.
///
/// Sections are placed at `0x1000 * (n + 1)` with file offset equal to their
/// RVA; the export directory gets its own trailing read-only section.
pub struct DllBuilder {
    architecture: Architecture,
    machine: Option<u16>,
    dll: bool,
    module_name: String,
    ordinal_base: Option<u32>,
    sections: Vec<Section>,
    exports: Vec<Export>,
    with_export_directory: bool,
}

impl DllBuilder {
    pub fn new(architecture: Architecture) -> Self {
        Self {
            architecture,
            machine: None,
            dll: true,
            module_name: "test.dll".to_string(),
            ordinal_base: None,
            sections: Vec::new(),
            exports: Vec::new(),
            with_export_directory: true,
        }
    }

    /// Add a section and return its RVA.
    pub fn section(&mut self, name: &str, characteristics: u32, data: Vec<u8>) -> u32 {
        let rva = ALIGNMENT * (self.sections.len() as u32 + 1);
        self.sections.push(Section {
            name: name.to_string(),
            characteristics,
            data,
        });
        rva
    }

    /// Export `rva` under `ordinal`, optionally by name.
    pub fn export(&mut self, ordinal: u32, name: Option<&str>, rva: u32) -> &mut Self {
        self.exports.push(Export {
            ordinal,
            name: name.map(str::to_string),
            rva,
        });
        self
    }

    pub fn module_name(&mut self, name: &str) -> &mut Self {
        self.module_name = name.to_string();
        self
    }

    pub fn ordinal_base(&mut self, base: u32) -> &mut Self {
        self.ordinal_base = Some(base);
        self
    }

    pub fn machine(&mut self, machine: u16) -> &mut Self {
        self.machine = Some(machine);
        self
    }

    pub fn not_dll(&mut self) -> &mut Self {
        self.dll = false;
        self
    }

    pub fn without_export_directory(&mut self) -> &mut Self {
        self.with_export_directory = false;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut sections: Vec<(String, u32, Vec<u8>)> = self
            .sections
            .iter()
            .map(|s| (s.name.clone(), s.characteristics, s.data.clone()))
            .collect();

        let mut export_dir = (0u32, 0u32);
        if self.with_export_directory {
            let rva = ALIGNMENT * (sections.len() as u32 + 1);
            let edata = self.export_section(rva);
            export_dir = (rva, edata.len() as u32);
            sections.push((".edata".to_string(), RDATA, edata));
        }

        let is_64 = self.architecture == Architecture::X64;
        let optional_size: usize = if is_64 { 0xF0 } else { 0xE0 };
        let section_table = OPTIONAL + optional_size;
        let size_of_image = ALIGNMENT * (sections.len() as u32 + 1);

        let mut file = vec![0u8; size_of_image as usize];

        // DOS header
        file[0..2].copy_from_slice(b"MZ");
        put_u32(&mut file, 0x3C, E_LFANEW as u32);
        file[E_LFANEW..E_LFANEW + 4].copy_from_slice(b"PE\0\0");

        // COFF header
        let machine = self
            .machine
            .unwrap_or(if is_64 { 0x8664 } else { 0x014C });
        let mut characteristics: u16 = 0x0002;
        if self.dll {
            characteristics |= 0x2000;
        }
        if !is_64 {
            characteristics |= 0x0100;
        }
        put_u16(&mut file, COFF, machine);
        put_u16(&mut file, COFF + 2, sections.len() as u16);
        put_u16(&mut file, COFF + 16, optional_size as u16);
        put_u16(&mut file, COFF + 18, characteristics);

        // Optional header
        let (magic, directories) = if is_64 { (0x020B, 112) } else { (0x010B, 96) };
        put_u16(&mut file, OPTIONAL, magic);
        if is_64 {
            put_u64(&mut file, OPTIONAL + 24, 0x1_8000_0000);
        } else {
            put_u32(&mut file, OPTIONAL + 28, 0x1000_0000);
        }
        put_u32(&mut file, OPTIONAL + 32, ALIGNMENT);
        put_u32(&mut file, OPTIONAL + 36, ALIGNMENT);
        put_u32(&mut file, OPTIONAL + 56, size_of_image);
        put_u32(&mut file, OPTIONAL + 60, ALIGNMENT);
        put_u16(&mut file, OPTIONAL + 68, 2); // GUI subsystem
        put_u32(&mut file, OPTIONAL + directories - 4, 16);
        put_u32(&mut file, OPTIONAL + directories, export_dir.0);
        put_u32(&mut file, OPTIONAL + directories + 4, export_dir.1);

        // Section table and raw data
        for (i, (name, flags, data)) in sections.iter().enumerate() {
            let header = section_table + i * 40;
            let rva = ALIGNMENT * (i as u32 + 1);
            let name_len = name.len().min(8);
            file[header..header + name_len].copy_from_slice(&name.as_bytes()[..name_len]);
            put_u32(&mut file, header + 8, data.len().max(1) as u32);
            put_u32(&mut file, header + 12, rva);
            put_u32(&mut file, header + 16, ALIGNMENT);
            put_u32(&mut file, header + 20, rva);
            put_u32(&mut file, header + 36, *flags);

            let start = rva as usize;
            let len = data.len().min(ALIGNMENT as usize);
            file[start..start + len].copy_from_slice(&data[..len]);
        }

        file
    }

    /// Build and write to `dir/file_name`.
    pub fn write_to(&self, dir: &Path, file_name: &str) -> PathBuf {
        let path = dir.join(file_name);
        fs::write(&path, self.build()).expect("write synthetic DLL");
        path
    }

    /// Export directory, tables and strings laid out from `rva`.
    fn export_section(&self, rva: u32) -> Vec<u8> {
        let base = self
            .ordinal_base
            .or_else(|| self.exports.iter().map(|e| e.ordinal).min())
            .unwrap_or(1);
        let count = self
            .exports
            .iter()
            .map(|e| e.ordinal - base + 1)
            .max()
            .unwrap_or(0);

        let mut named: Vec<&Export> = self.exports.iter().filter(|e| e.name.is_some()).collect();
        named.sort_by(|a, b| a.name.cmp(&b.name));

        let module_at = 40;
        let functions_at = align4(module_at + self.module_name.len() + 1);
        let names_at = functions_at + count as usize * 4;
        let ordinals_at = names_at + named.len() * 4;
        let strings_at = align4(ordinals_at + named.len() * 2);

        let mut out = vec![0u8; strings_at];
        put_u32(&mut out, 12, rva + module_at as u32);
        put_u32(&mut out, 16, base);
        put_u32(&mut out, 20, count);
        put_u32(&mut out, 24, named.len() as u32);
        put_u32(&mut out, 28, rva + functions_at as u32);
        put_u32(&mut out, 32, rva + names_at as u32);
        put_u32(&mut out, 36, rva + ordinals_at as u32);
        out[module_at..module_at + self.module_name.len()]
            .copy_from_slice(self.module_name.as_bytes());

        for export in &self.exports {
            let index = (export.ordinal - base) as usize;
            put_u32(&mut out, functions_at + index * 4, export.rva);
        }

        for (i, export) in named.iter().enumerate() {
            let name = export.name.as_deref().unwrap_or_default();
            let name_rva = rva + out.len() as u32;
            put_u32(&mut out, names_at + i * 4, name_rva);
            put_u16(&mut out, ordinals_at + i * 2, (export.ordinal - base) as u16);
            out.extend_from_slice(name.as_bytes());
            out.push(0);
        }

        out
    }
}

/// Little-endian pointer-sized words for `architecture`.
pub fn words(architecture: Architecture, values: &[u64]) -> Vec<u8> {
    values
        .iter()
        .flat_map(|v| match architecture {
            Architecture::X86 => (*v as u32).to_le_bytes().to_vec(),
            Architecture::X64 => v.to_le_bytes().to_vec(),
        })
        .collect()
}

/// Three exports: function `Foo` (1), data `Bar` with two words (2), and
/// ordinal 3 unnamed, forwarded to `NTDLL.RtlZeroMemory`.
pub fn three_export_dll(architecture: Architecture) -> DllBuilder {
    let mut dll = DllBuilder::new(architecture);
    let text = dll.section(".text", CODE, vec![0xC3; 0x10]);
    let data = dll.section(".data", DATA, words(architecture, &[0x1111, 0x2222, 0, 0x3333]));
    let rdata = dll.section(".rdata", RDATA, b"NTDLL.RtlZeroMemory\0".to_vec());
    dll.export(1, Some("Foo"), text)
        .export(2, Some("Bar"), data)
        .export(3, None, rdata);
    dll
}

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

fn put_u16(buf: &mut [u8], at: usize, value: u16) {
    buf[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_u64(buf: &mut [u8], at: usize, value: u64) {
    buf[at..at + 8].copy_from_slice(&value.to_le_bytes());
}
