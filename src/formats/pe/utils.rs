//! Utility functions for PE parsing

use crate::formats::pe::types::{PeError, Result};

/// Extension trait for reading primitive types from byte slices.
///
/// Every accessor validates the full extent of the read against the slice and
/// returns `None` instead of panicking when it does not fit.
pub trait ReadExt {
    fn read_u16_le_at(&self, offset: usize) -> Option<u16>;
    fn read_u32_le_at(&self, offset: usize) -> Option<u32>;
    fn read_u64_le_at(&self, offset: usize) -> Option<u64>;
    fn read_slice_at(&self, offset: usize, len: usize) -> Option<&[u8]>;
    /// Bytes of a NUL-terminated string, without the terminator. `None` when
    /// no terminator is found within `max_len` bytes or before the end.
    fn read_cstr_at(&self, offset: usize, max_len: usize) -> Option<&[u8]>;
    /// Pointer-sized little-endian word (4 or 8 bytes), widened to u64.
    fn read_word_at(&self, offset: usize, width: usize) -> Option<u64>;
}

impl ReadExt for [u8] {
    #[inline(always)]
    fn read_u16_le_at(&self, offset: usize) -> Option<u16> {
        self.get(offset..offset.checked_add(2)?)
            .and_then(|b| b.try_into().ok())
            .map(u16::from_le_bytes)
    }

    #[inline(always)]
    fn read_u32_le_at(&self, offset: usize) -> Option<u32> {
        self.get(offset..offset.checked_add(4)?)
            .and_then(|b| b.try_into().ok())
            .map(u32::from_le_bytes)
    }

    #[inline(always)]
    fn read_u64_le_at(&self, offset: usize) -> Option<u64> {
        self.get(offset..offset.checked_add(8)?)
            .and_then(|b| b.try_into().ok())
            .map(u64::from_le_bytes)
    }

    #[inline(always)]
    fn read_slice_at(&self, offset: usize, len: usize) -> Option<&[u8]> {
        self.get(offset..offset.checked_add(len)?)
    }

    fn read_cstr_at(&self, offset: usize, max_len: usize) -> Option<&[u8]> {
        let end = offset.saturating_add(max_len).min(self.len());
        let window = self.get(offset..end)?;
        let len = window.iter().position(|&b| b == 0)?;
        Some(&window[..len])
    }

    #[inline(always)]
    fn read_word_at(&self, offset: usize, width: usize) -> Option<u64> {
        match width {
            4 => self.read_u32_le_at(offset).map(u64::from),
            8 => self.read_u64_le_at(offset),
            _ => None,
        }
    }
}

/// Read a NUL-terminated ASCII/UTF-8 string at an RVA of a virtually laid out image.
pub fn read_cstring(image: &[u8], rva: u32, max_len: usize) -> Result<&str> {
    image
        .read_cstr_at(rva as usize, max_len)
        .and_then(|bytes| std::str::from_utf8(bytes).ok())
        .ok_or(PeError::InvalidString { rva })
}

/// Convert a section name array to a string
pub fn section_name_to_string(name: &[u8; 8]) -> String {
    let end = name.iter().position(|&b| b == 0).unwrap_or(8);
    String::from_utf8_lossy(&name[..end]).to_string()
}
