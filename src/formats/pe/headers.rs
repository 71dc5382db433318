//! PE header parsing

use crate::formats::pe::types::*;
use crate::formats::pe::utils::ReadExt;

// Offset of the data directory array inside each optional header flavor.
const PE32_DATA_DIRECTORY_OFFSET: usize = 96;
const PE32PLUS_DATA_DIRECTORY_OFFSET: usize = 112;

fn truncated(data: &[u8], expected: usize) -> PeError {
    PeError::TruncatedHeader {
        expected,
        actual: data.len(),
    }
}

fn u16_field(data: &[u8], offset: usize) -> Result<u16> {
    data.read_u16_le_at(offset)
        .ok_or_else(|| truncated(data, offset.saturating_add(2)))
}

fn u32_field(data: &[u8], offset: usize) -> Result<u32> {
    data.read_u32_le_at(offset)
        .ok_or_else(|| truncated(data, offset.saturating_add(4)))
}

fn u64_field(data: &[u8], offset: usize) -> Result<u64> {
    data.read_u64_le_at(offset)
        .ok_or_else(|| truncated(data, offset.saturating_add(8)))
}

/// Parse DOS header from data
pub fn parse_dos_header(data: &[u8]) -> Result<DosHeader> {
    if data.len() < DOS_HEADER_SIZE {
        return Err(truncated(data, DOS_HEADER_SIZE));
    }

    let e_magic = u16_field(data, 0)?;
    if e_magic != DOS_SIGNATURE {
        return Err(PeError::InvalidDosSignature);
    }

    Ok(DosHeader {
        e_magic,
        e_lfanew: u32_field(data, 0x3C)?,
    })
}

/// Parse COFF header from data at offset
pub fn parse_coff_header(data: &[u8], offset: usize) -> Result<CoffHeader> {
    if data.read_slice_at(offset, COFF_HEADER_SIZE).is_none() {
        return Err(truncated(data, offset.saturating_add(COFF_HEADER_SIZE)));
    }

    Ok(CoffHeader {
        machine: Machine::from(u16_field(data, offset)?),
        number_of_sections: u16_field(data, offset + 2)?,
        time_date_stamp: u32_field(data, offset + 4)?,
        size_of_optional_header: u16_field(data, offset + 16)?,
        characteristics: u16_field(data, offset + 18)?,
    })
}

/// Parse the optional header at offset; `size` is the COFF-declared size.
///
/// Returns the header and the offset of its data directory array.
pub fn parse_optional_header(
    data: &[u8],
    offset: usize,
    size: u16,
) -> Result<(OptionalHeader, usize)> {
    let magic = u16_field(data, offset)?;
    let fixed_size = match magic {
        PE32_MAGIC => PE32_DATA_DIRECTORY_OFFSET,
        PE32PLUS_MAGIC => PE32PLUS_DATA_DIRECTORY_OFFSET,
        _ => return Err(PeError::InvalidMagic(magic)),
    };

    if (size as usize) < fixed_size {
        return Err(PeError::TruncatedHeader {
            expected: fixed_size,
            actual: size as usize,
        });
    }
    if data.read_slice_at(offset, size as usize).is_none() {
        return Err(truncated(data, offset.saturating_add(size as usize)));
    }

    // Everything past the image base sits at the same offset in both flavors;
    // only the image base width and the tail layout differ.
    let (image_base, rva_count_offset) = if magic == PE32_MAGIC {
        (u64::from(u32_field(data, offset + 28)?), 92)
    } else {
        (u64_field(data, offset + 24)?, 108)
    };

    let header = OptionalHeader {
        magic,
        address_of_entry_point: u32_field(data, offset + 16)?,
        image_base,
        section_alignment: u32_field(data, offset + 32)?,
        file_alignment: u32_field(data, offset + 36)?,
        size_of_image: u32_field(data, offset + 56)?,
        size_of_headers: u32_field(data, offset + 60)?,
        dll_characteristics: u16_field(data, offset + 70)?,
        number_of_rva_and_sizes: u32_field(data, offset + rva_count_offset)?,
    };

    Ok((header, offset + fixed_size))
}

/// Parse data directories from data at offset.
///
/// Directories that the optional header declares but does not have room for
/// are treated as absent; the result is always padded to 16 entries.
pub fn parse_data_directories(data: &[u8], offset: usize, count: u32) -> Vec<DataDirectory> {
    let count = count.min(MAX_DATA_DIRECTORIES) as usize;
    let mut directories: Vec<DataDirectory> = (0..count)
        .map_while(|i| {
            let dir_offset = offset + i * 8;
            Some(DataDirectory {
                virtual_address: data.read_u32_le_at(dir_offset)?,
                size: data.read_u32_le_at(dir_offset + 4)?,
            })
        })
        .collect();

    directories.resize(MAX_DATA_DIRECTORIES as usize, DataDirectory::default());
    directories
}

/// Parse NT headers (PE signature + COFF + Optional) at `offset`
pub fn parse_nt_headers(data: &[u8], offset: usize) -> Result<NtHeaders> {
    let signature = data
        .read_slice_at(offset, PE_SIGNATURE.len())
        .ok_or_else(|| truncated(data, offset.saturating_add(PE_SIGNATURE.len())))?;
    if signature != PE_SIGNATURE {
        return Err(PeError::InvalidPeSignature);
    }

    let file_header = parse_coff_header(data, offset + 4)?;

    let opt_offset = offset + 4 + COFF_HEADER_SIZE;
    let opt_size = file_header.size_of_optional_header;
    let (optional_header, dir_offset) = parse_optional_header(data, opt_offset, opt_size)?;

    // Never read directories past the declared end of the optional header.
    let room = (opt_offset + opt_size as usize - dir_offset) / 8;
    let count = optional_header
        .number_of_rva_and_sizes
        .min(room as u32);
    let data_directories = parse_data_directories(data, dir_offset, count);

    Ok(NtHeaders {
        offset,
        file_header,
        optional_header,
        data_directories,
        section_table_offset: opt_offset + opt_size as usize,
    })
}
