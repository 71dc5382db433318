//! Export table parsing
//!
//! Operates on a virtually laid out image, so every RVA is a direct offset
//! into the buffer and every read is bounds-checked against it.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::formats::pe::types::*;
use crate::formats::pe::utils::{read_cstring, ReadExt};

/// Placeholder for the module name when the directory's name pointer is bad.
pub const MODULE_NAME_SENTINEL: &str = "ERROR!";

/// Ordinals a linker will accept in an `/EXPORT` directive
pub const MIN_ORDINAL: u32 = 1;
pub const MAX_ORDINAL: u32 = 0xFFFF;

/// Raw IMAGE_EXPORT_DIRECTORY fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportDirectory {
    pub name_rva: u32,
    pub base: u32,
    pub number_of_functions: u32,
    pub number_of_names: u32,
    pub address_of_functions: u32,
    pub address_of_names: u32,
    pub address_of_name_ordinals: u32,
}

impl ExportDirectory {
    pub fn parse(image: &[u8], rva: u32) -> Result<Self> {
        let at = rva as usize;
        let raw = image
            .read_slice_at(at, EXPORT_DIRECTORY_SIZE)
            .ok_or(PeError::InvalidRva { rva })?;
        let field = |offset: usize| raw.read_u32_le_at(offset).unwrap_or_default();

        Ok(Self {
            name_rva: field(12),
            base: field(16),
            number_of_functions: field(20),
            number_of_names: field(24),
            address_of_functions: field(28),
            address_of_names: field(32),
            address_of_name_ordinals: field(36),
        })
    }
}

/// Export records of one image, in ascending index order
#[derive(Debug, Clone)]
pub struct ParsedExports {
    /// Name the DLL gives itself, or [`MODULE_NAME_SENTINEL`]
    pub module_name: String,
    pub ordinal_base: u32,
    pub number_of_functions: u32,
    /// How many records received a name
    pub named_count: usize,
    pub records: Vec<ExportRecord>,
}

/// Parse the export directory of a virtually laid out image.
///
/// Zero slots of the address table are skipped. Each remaining slot gets the
/// name at the first name-ordinal position that refers to it, if any.
pub fn parse_exports(
    image: &[u8],
    export_dir: &DataDirectory,
    options: &ParseOptions,
) -> Result<ParsedExports> {
    let directory = ExportDirectory::parse(image, export_dir.virtual_address)?;
    debug!(
        base = directory.base,
        functions = directory.number_of_functions,
        names = directory.number_of_names,
        "Parsed export directory"
    );

    for (what, found) in [
        ("export functions", directory.number_of_functions),
        ("export names", directory.number_of_names),
    ] {
        if found as usize > options.max_exports {
            return Err(PeError::LimitExceeded {
                what,
                found: u64::from(found),
                limit: options.max_exports as u64,
            });
        }
    }

    let module_name = match read_cstring(image, directory.name_rva, options.max_name_len) {
        Ok(name) => name.to_string(),
        Err(err) => {
            warn!(
                name_rva = directory.name_rva,
                error = %err,
                "Export directory name is unreadable"
            );
            MODULE_NAME_SENTINEL.to_string()
        }
    };

    let first_name_position = name_positions_by_index(image, &directory)?;

    let mut records = Vec::new();
    let mut named_count = 0;
    for index in 0..directory.number_of_functions {
        let slot_rva = table_entry_rva(directory.address_of_functions, index, 4)?;
        let function_rva = image
            .read_u32_le_at(slot_rva as usize)
            .ok_or(PeError::InvalidRva { rva: slot_rva })?;
        if function_rva == 0 {
            continue;
        }

        let ordinal = directory
            .base
            .checked_add(index)
            .filter(|ordinal| (MIN_ORDINAL..=MAX_ORDINAL).contains(ordinal))
            .ok_or(PeError::OrdinalOverflow {
                base: directory.base,
                index,
            })?;

        let (name, name_rva) = match first_name_position.get(&index) {
            Some(&position) => {
                let pointer_rva = table_entry_rva(directory.address_of_names, position, 4)?;
                let name_rva = image
                    .read_u32_le_at(pointer_rva as usize)
                    .ok_or(PeError::InvalidRva { rva: pointer_rva })?;
                let name = read_cstring(image, name_rva, options.max_name_len)?;
                named_count += 1;
                (Some(name.to_string()), name_rva)
            }
            None => (None, 0),
        };

        records.push(ExportRecord {
            index,
            ordinal,
            function_rva,
            name,
            name_rva,
        });
    }

    debug!(
        module = %module_name,
        records = records.len(),
        named = named_count,
        "Walked export address table"
    );

    Ok(ParsedExports {
        module_name,
        ordinal_base: directory.base,
        number_of_functions: directory.number_of_functions,
        named_count,
        records,
    })
}

/// Map each function index to the first name position whose ordinal names it.
fn name_positions_by_index(image: &[u8], directory: &ExportDirectory) -> Result<HashMap<u32, u32>> {
    let mut positions = HashMap::with_capacity(directory.number_of_names as usize);
    for position in 0..directory.number_of_names {
        let rva = table_entry_rva(directory.address_of_name_ordinals, position, 2)?;
        let index = image
            .read_u16_le_at(rva as usize)
            .ok_or(PeError::InvalidRva { rva })?;
        positions.entry(u32::from(index)).or_insert(position);
    }
    Ok(positions)
}

fn table_entry_rva(table_rva: u32, position: u32, width: u32) -> Result<u32> {
    position
        .checked_mul(width)
        .and_then(|delta| table_rva.checked_add(delta))
        .ok_or(PeError::InvalidRva { rva: table_rva })
}
