use std::cell::Cell;
use std::fs;
use std::io;

use proxyforge::loader::redirection::{RedirectionControl, RedirectionToken};
use proxyforge::output::write_sources;
use proxyforge::pipeline::{analyze, analyze_with};
use proxyforge::{Architecture, ExportKind, GeneratorOptions, ProxyConfig};

use crate::common::three_export_dll;

fn export_lines(source: &str) -> Vec<&str> {
    source
        .lines()
        .filter(|line| line.starts_with("#pragma comment(linker, \"/EXPORT:"))
        .collect()
}

#[test]
fn x86_three_export_proxy() {
    let dir = tempfile::tempdir().unwrap();
    let path = three_export_dll(Architecture::X86).write_to(dir.path(), "test.dll");

    let analysis = analyze(&path, &ProxyConfig::default()).unwrap();
    assert_eq!(analysis.file_name, "test.dll");
    assert_eq!(analysis.architecture, Architecture::X86);
    assert_eq!(analysis.table.module_name, "test.dll");
    assert_eq!(analysis.table.len(), 3);
    assert_eq!(analysis.table.entries[0].kind, ExportKind::Function);
    assert_eq!(analysis.table.entries[1].kind, ExportKind::Data { slots: 2 });
    assert_eq!(
        analysis.table.entries[2].kind,
        ExportKind::Forwarder {
            target: "NTDLL.RtlZeroMemory".to_string()
        }
    );

    let generated = analysis.generate(&GeneratorOptions::default());
    let source = &generated.source;

    let exports = export_lines(source);
    assert_eq!(exports.len(), 3);
    assert!(exports[2].contains("Unnamed3=NTDLL.RtlZeroMemory,@3,NONAME"));
    assert!(source.contains("EXTERN_C PVOID AheadLib_Bar[2] = { 0 };"));
    assert_eq!(source.matches("PVOID pfnAheadLib_").count(), 2);
    assert_eq!(source.matches("__declspec(naked)").count(), 1);
    assert!(source.contains("void __cdecl AheadLib_Foo(void)"));
    assert!(generated.asm.is_empty());
}

#[test]
fn x64_three_export_proxy() {
    let dir = tempfile::tempdir().unwrap();
    let path = three_export_dll(Architecture::X64).write_to(dir.path(), "test64.dll");

    let analysis = analyze(&path, &ProxyConfig::default()).unwrap();
    assert_eq!(analysis.architecture, Architecture::X64);
    assert_eq!(analysis.table.entries[1].data_slots(), Some(2));

    let generated = analysis.generate(&GeneratorOptions::default());
    assert_eq!(export_lines(&generated.source).len(), 3);
    assert!(!generated.source.contains("__declspec(naked)"));
    assert!(generated.source.contains("PathAppend(tzPath, TEXT(\"test64Org.dll\"));"));
    assert!(generated.asm.contains("EXTERN pfnAheadLib_Foo:QWORD"));
    assert!(generated.asm.contains("jmp pfnAheadLib_Foo"));
    assert_eq!(generated.asm.matches(" PROC").count(), 1);
}

#[test]
fn generation_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let config = ProxyConfig::default();
    for arch in [Architecture::X86, Architecture::X64] {
        let path = three_export_dll(arch).write_to(dir.path(), "same.dll");
        let first = analyze(&path, &config).unwrap().generate(&config.generator);
        let second = analyze(&path, &config).unwrap().generate(&config.generator);
        assert_eq!(first.source, second.source);
        assert_eq!(first.asm, second.asm);
    }
}

#[test]
fn writes_sources_next_to_each_other() {
    let dir = tempfile::tempdir().unwrap();
    let path = three_export_dll(Architecture::X64).write_to(dir.path(), "winmm.dll");
    let analysis = analyze(&path, &ProxyConfig::default()).unwrap();
    let generated = analysis.generate(&GeneratorOptions::default());

    let out = dir.path().join("proxy");
    let written = write_sources(&out, &analysis, &generated).unwrap();
    assert_eq!(written, vec![out.join("winmm.cpp"), out.join("winmm_jump.asm")]);
    assert_eq!(fs::read_to_string(&written[0]).unwrap(), generated.source);
    assert_eq!(fs::read_to_string(&written[1]).unwrap(), generated.asm);
}

#[derive(Default)]
struct Recorder {
    disabled: Cell<usize>,
    reverted: Cell<usize>,
}

impl RedirectionControl for Recorder {
    fn disable(&self) -> io::Result<Option<RedirectionToken>> {
        self.disabled.set(self.disabled.get() + 1);
        Ok(Some(RedirectionToken(7)))
    }

    fn revert(&self, _token: RedirectionToken) -> io::Result<()> {
        self.reverted.set(self.reverted.get() + 1);
        Ok(())
    }
}

#[test]
fn redirection_is_restored_on_every_path() {
    let dir = tempfile::tempdir().unwrap();
    let config = ProxyConfig::default();
    let recorder = Recorder::default();

    let path = three_export_dll(Architecture::X86).write_to(dir.path(), "ok.dll");
    analyze_with(&path, &config, &recorder).unwrap();
    assert_eq!((recorder.disabled.get(), recorder.reverted.get()), (1, 1));

    let missing = dir.path().join("missing.dll");
    assert!(analyze_with(&missing, &config, &recorder).is_err());
    assert_eq!((recorder.disabled.get(), recorder.reverted.get()), (2, 2));

    fs::write(dir.path().join("junk.dll"), b"MZ junk").unwrap();
    assert!(analyze_with(dir.path().join("junk.dll"), &config, &recorder).is_err());
    assert_eq!((recorder.disabled.get(), recorder.reverted.get()), (3, 3));
}
