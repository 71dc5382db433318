use std::fs;

use proxyforge::formats::pe::directories::MODULE_NAME_SENTINEL;
use proxyforge::formats::pe::PeError;
use proxyforge::pipeline::{analyze, analyze_bytes};
use proxyforge::{Architecture, LoadError, ProxyConfig, ProxyError};

use crate::common::{three_export_dll, words, DllBuilder, CODE, DATA};

fn load_error(data: &[u8]) -> LoadError {
    match analyze_bytes(data, "test.dll", &ProxyConfig::default()) {
        Err(ProxyError::Load(err)) => err,
        other => panic!("expected a load error, got {:?}", other),
    }
}

#[test]
fn rejects_files_that_are_not_images() {
    assert!(matches!(load_error(b""), LoadError::NotAnImage(_)));
    assert!(matches!(
        load_error(&[0x7F, b'E', b'L', b'F'].repeat(32)),
        LoadError::NotAnImage(PeError::InvalidDosSignature)
    ));
}

#[test]
fn rejects_bad_nt_headers() {
    let mut data = three_export_dll(Architecture::X86).build();
    data[0x80] = b'N';
    assert!(matches!(
        load_error(&data),
        LoadError::BadNtHeader(PeError::InvalidPeSignature)
    ));

    let data = three_export_dll(Architecture::X86).machine(0x01C4).build(); // ARMNT
    assert!(matches!(
        load_error(&data),
        LoadError::BadNtHeader(PeError::InvalidMachine(0x01C4))
    ));

    // PE32 optional header with an AMD64 machine field
    let data = three_export_dll(Architecture::X86).machine(0x8664).build();
    assert!(matches!(
        load_error(&data),
        LoadError::BadNtHeader(PeError::MagicMismatch { .. })
    ));
}

#[test]
fn rejects_executables() {
    let data = three_export_dll(Architecture::X64).not_dll().build();
    assert!(matches!(load_error(&data), LoadError::NotADll { .. }));
}

#[test]
fn rejects_dlls_without_exports() {
    let mut dll = DllBuilder::new(Architecture::X86);
    dll.section(".text", CODE, vec![0xC3]);
    dll.without_export_directory();
    assert!(matches!(load_error(&dll.build()), LoadError::NoExportTable));
}

#[test]
fn reports_missing_files_with_their_path() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.dll");
    let err = analyze(&missing, &ProxyConfig::default()).unwrap_err();
    match err {
        ProxyError::Load(LoadError::Io { path, .. }) => assert_eq!(path, missing),
        other => panic!("expected an I/O error, got {:?}", other),
    }
}

#[test]
fn enforces_file_size_limit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("big.dll");
    fs::write(&path, three_export_dll(Architecture::X86).build()).unwrap();

    let mut config = ProxyConfig::default();
    config.loader.max_file_size = 0x100;
    assert!(matches!(
        analyze(&path, &config),
        Err(ProxyError::Load(LoadError::FileTooLarge { limit: 0x100, .. }))
    ));
}

#[test]
fn enforces_export_count_limit() {
    let data = three_export_dll(Architecture::X86).build();
    let mut config = ProxyConfig::default();
    config.parser.max_exports = 2;
    assert!(matches!(
        analyze_bytes(&data, "test.dll", &config),
        Err(ProxyError::Load(LoadError::MalformedExportTable(
            PeError::LimitExceeded { .. }
        )))
    ));
}

#[test]
fn skips_empty_ordinal_slots() {
    let mut dll = DllBuilder::new(Architecture::X64);
    let text = dll.section(".text", CODE, vec![0xC3; 0x20]);
    let data = dll.section(".data", DATA, words(Architecture::X64, &[0]));
    dll.ordinal_base(5)
        .export(5, Some("First"), text)
        .export(9, None, text + 0x10)
        .export(12, Some("Last"), data);

    let analysis = analyze_bytes(&dll.build(), "holes.dll", &ProxyConfig::default()).unwrap();
    let ordinals: Vec<u32> = analysis.table.entries.iter().map(|e| e.ordinal).collect();
    assert_eq!(ordinals, vec![5, 9, 12]);
    assert_eq!(analysis.table.ordinal_base, 5);
    assert!(analysis.table.entries.iter().all(|e| e.rva != 0));
    assert_eq!(analysis.table.get_by_ordinal(9).unwrap().name, None);
    assert_eq!(analysis.table.get_by_name("Last").unwrap().data_slots(), Some(1));
}

#[test]
fn bad_module_name_becomes_sentinel() {
    let mut data = three_export_dll(Architecture::X86).build();
    // Export directory lives in the fourth section; point its Name field far outside the image
    let name_field = 0x4000 + 12;
    data[name_field..name_field + 4].copy_from_slice(&0x7FFF_0000u32.to_le_bytes());

    let analysis = analyze_bytes(&data, "test.dll", &ProxyConfig::default()).unwrap();
    assert_eq!(analysis.table.module_name, MODULE_NAME_SENTINEL);
    assert_eq!(analysis.table.len(), 3);
}

#[test]
fn bad_export_name_pointer_is_an_error() {
    let mut data = three_export_dll(Architecture::X86).build();
    let names_rva = u32::from_le_bytes(data[0x4000 + 32..0x4000 + 36].try_into().unwrap()) as usize;
    data[names_rva..names_rva + 4].copy_from_slice(&0x7FFF_0000u32.to_le_bytes());

    assert!(matches!(
        analyze_bytes(&data, "test.dll", &ProxyConfig::default()),
        Err(ProxyError::Load(LoadError::MalformedExportTable(
            PeError::InvalidString { rva: 0x7FFF_0000 }
        )))
    ));
}

#[test]
fn rejects_ordinals_a_linker_cannot_export() {
    let mut dll = DllBuilder::new(Architecture::X86);
    let text = dll.section(".text", CODE, vec![0xC3; 0x10]);
    dll.export(70000, Some("Big"), text);

    assert!(matches!(
        analyze_bytes(&dll.build(), "big.dll", &ProxyConfig::default()),
        Err(ProxyError::Load(LoadError::MalformedExportTable(
            PeError::OrdinalOverflow { base: 70000, index: 0 }
        )))
    ));
}
