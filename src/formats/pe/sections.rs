//! Section management for PE files

use crate::formats::pe::types::*;
use crate::formats::pe::utils::ReadExt;

/// Section table in on-disk order.
///
/// Order is authoritative: range lookups return the first section whose
/// inclusive `[VirtualAddress, VirtualAddress + VirtualSize]` range contains
/// the RVA, even when later sections overlap it.
#[derive(Debug, Clone, Default)]
pub struct SectionTable {
    sections: Vec<SectionHeader>,
}

impl SectionTable {
    /// Create a new section table, keeping the given order
    pub fn new(sections: Vec<SectionHeader>) -> Self {
        Self { sections }
    }

    /// Get all sections
    pub fn sections(&self) -> &[SectionHeader] {
        &self.sections
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// First section (in table order) containing the RVA
    pub fn section_containing_rva(&self, rva: u32) -> Option<&SectionHeader> {
        self.sections.iter().find(|s| s.contains_rva(rva))
    }

    /// Pairs of table indices whose virtual ranges intersect.
    ///
    /// Lookups stay deterministic for such images, but which section wins
    /// depends on table order, so callers surface these.
    pub fn overlapping_pairs(&self) -> Vec<(usize, usize)> {
        let mut pairs = Vec::new();
        for (i, a) in self.sections.iter().enumerate() {
            let a_start = u64::from(a.virtual_address);
            let a_end = a_start + u64::from(a.virtual_size);
            for (j, b) in self.sections.iter().enumerate().skip(i + 1) {
                let b_start = u64::from(b.virtual_address);
                let b_end = b_start + u64::from(b.virtual_size);
                // Zero-sized sections never own anything beyond their start
                if a.virtual_size == 0 || b.virtual_size == 0 {
                    continue;
                }
                if a_start < b_end && b_start < a_end {
                    pairs.push((i, j));
                }
            }
        }
        pairs
    }

    /// Highest virtual end address of any section
    pub fn virtual_extent(&self) -> u64 {
        self.sections
            .iter()
            .map(|s| {
                let size = s.virtual_size.max(s.size_of_raw_data);
                u64::from(s.virtual_address) + u64::from(size)
            })
            .max()
            .unwrap_or(0)
    }
}

/// Parse section headers starting at `offset`
pub fn parse_section_headers(data: &[u8], offset: usize, count: u16) -> Result<Vec<SectionHeader>> {
    let mut headers = Vec::with_capacity(count as usize);

    for i in 0..count as usize {
        let base = offset + i * SECTION_HEADER_SIZE;
        let raw = data
            .read_slice_at(base, SECTION_HEADER_SIZE)
            .ok_or(PeError::TruncatedHeader {
                expected: base + SECTION_HEADER_SIZE,
                actual: data.len(),
            })?;

        let mut name = [0u8; 8];
        name.copy_from_slice(&raw[..8]);

        // The slice is exactly one header long, so the field reads cannot fail.
        let field = |at: usize| raw.read_u32_le_at(at).unwrap_or_default();
        headers.push(SectionHeader {
            name,
            virtual_size: field(8),
            virtual_address: field(12),
            size_of_raw_data: field(16),
            pointer_to_raw_data: field(20),
            characteristics: SectionFlags::from_bits_retain(field(36)),
        });
    }

    Ok(headers)
}
