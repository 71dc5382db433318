//! Symbol naming for generated proxies.

use std::collections::HashSet;

use crate::classify::ExportEntry;

/// Names the generator uses for one export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSymbols {
    /// Public export name: the real name, or `Unnamed<ordinal>` for ordinal-only exports
    pub label: String,
    /// Identifier suffix for the slot, array and stub; `None` for forwarders
    pub stub: Option<String>,
    /// Ordinal-only exports are re-exported with `NONAME`
    pub noname: bool,
}

/// Replace every character outside `[A-Za-z0-9_]` with `_`.
pub fn sanitize_identifier(raw: &str) -> String {
    let out: String = raw
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '_' { ch } else { '_' })
        .collect();
    if out.is_empty() {
        "_".to_string()
    } else {
        out
    }
}

/// Assign labels and unique stub identifiers, one per entry, in entry order.
///
/// An empty name counts as ordinal-only. A synthesized `Unnamed<ordinal>`
/// label that clashes with a real export name, and a stub that collides
/// after sanitizing, both get `_<ordinal>` appended.
pub fn assign_symbols(entries: &[ExportEntry]) -> Vec<ExportSymbols> {
    let mut labels: HashSet<String> = entries
        .iter()
        .filter_map(|e| e.name.clone())
        .filter(|name| !name.is_empty())
        .collect();
    let mut stubs = HashSet::new();

    entries
        .iter()
        .map(|entry| {
            let name = entry.name.as_deref().filter(|name| !name.is_empty());
            let noname = name.is_none();
            let label = match name {
                Some(name) => name.to_string(),
                None => {
                    let synthesized = format!("Unnamed{}", entry.ordinal);
                    let label = unique(synthesized, entry.ordinal, &labels);
                    labels.insert(label.clone());
                    label
                }
            };

            let stub = (!entry.is_forwarder()).then(|| {
                let stub = unique(sanitize_identifier(&label), entry.ordinal, &stubs);
                stubs.insert(stub.clone());
                stub
            });

            ExportSymbols { label, stub, noname }
        })
        .collect()
}

/// `base`, or `base_<ordinal>[_<n>]` if `base` is taken.
fn unique(base: String, ordinal: u32, used: &HashSet<String>) -> String {
    let mut candidate = base.clone();
    let mut attempt = 0u32;
    while used.contains(&candidate) {
        attempt += 1;
        candidate = if attempt == 1 {
            format!("{}_{}", base, ordinal)
        } else {
            format!("{}_{}_{}", base, ordinal, attempt)
        };
    }
    candidate
}

/// Quote `raw` as a C string literal.
///
/// Non-printable bytes use three-digit octal escapes, which cannot swallow
/// following characters the way `\x` escapes do.
pub fn c_string_literal(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    out.push('"');
    for byte in raw.bytes() {
        match byte {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'?' => out.push_str("\\?"), // no trigraphs
            0x20..=0x7e => out.push(byte as char),
            _ => out.push_str(&format!("\\{:03o}", byte)),
        }
    }
    out.push('"');
    out
}

/// Quote `raw` as a literal for `TEXT(...)`, which may widen it to `L"..."`.
///
/// Non-ASCII characters become universal character names so each one stays
/// a single character in either build.
pub fn text_literal(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    out.push('"');
    for ch in raw.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '?' => out.push_str("\\?"),
            ' '..='~' => out.push(ch),
            _ if ch.is_ascii() => out.push_str(&format!("\\{:03o}", ch as u32)),
            _ if (ch as u32) <= 0xFFFF => out.push_str(&format!("\\u{:04X}", ch as u32)),
            _ => out.push_str(&format!("\\U{:08X}", ch as u32)),
        }
    }
    out.push('"');
    out
}

/// File name without its last extension: `foo.dll` becomes `foo`.
pub fn module_stem(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(0) | None => file_name,
        Some(dot) => &file_name[..dot],
    }
}
