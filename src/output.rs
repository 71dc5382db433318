//! Persisting generated proxy sources.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::codegen::names::module_stem;
use crate::codegen::GeneratedSource;
use crate::pipeline::Analysis;

/// Base name for the output files of `file_name`, safe to join onto a directory.
pub fn output_stem(file_name: &str) -> String {
    let stem: String = module_stem(file_name)
        .chars()
        .map(|ch| if matches!(ch, '/' | '\\' | ':') { '_' } else { ch })
        .collect();
    if stem.is_empty() || stem == "." || stem == ".." {
        "proxy".to_string()
    } else {
        stem
    }
}

/// Write `<stem>.cpp` and, when there is one, `<stem>_jump.asm` into `dir`.
///
/// Creates `dir` if needed and returns the written paths in that order.
pub fn write_sources<P: AsRef<Path>>(
    dir: P,
    analysis: &Analysis,
    generated: &GeneratedSource,
) -> io::Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;

    let stem = output_stem(&analysis.file_name);
    let mut written = Vec::with_capacity(2);

    let source_path = dir.join(format!("{}.cpp", stem));
    fs::write(&source_path, &generated.source)?;
    info!(path = %source_path.display(), bytes = generated.source.len(), "Wrote proxy source");
    written.push(source_path);

    if generated.has_asm() {
        let asm_path = dir.join(format!("{}_jump.asm", stem));
        fs::write(&asm_path, &generated.asm)?;
        info!(path = %asm_path.display(), bytes = generated.asm.len(), "Wrote jump stubs");
        written.push(asm_path);
    }

    Ok(written)
}
