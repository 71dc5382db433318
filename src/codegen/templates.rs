//! Text templates for the proxy source and the x64 jump stubs.
//!
//! Both files render through `fmt::Display`, so a template is only ever
//! written into a `String` or straight into a file.

use std::fmt::{self, Write as _};

use crate::classify::{ExportEntry, ExportKind, ExportTable};
use crate::formats::pe::Architecture;

use super::names::{c_string_literal, module_stem, text_literal, ExportSymbols};
use super::OriginLoadMode;

/// One export with the names the templates refer to it by
pub(crate) struct ProxyExport<'a> {
    pub entry: &'a ExportEntry,
    pub symbols: &'a ExportSymbols,
}

impl ProxyExport<'_> {
    fn stub(&self, prefix: &str) -> Option<String> {
        self.symbols
            .stub
            .as_ref()
            .map(|stub| format!("{}{}", prefix, stub))
    }

    fn slot(&self, prefix: &str) -> Option<String> {
        self.stub(prefix).map(|stub| format!("pfn{}", stub))
    }
}

/// Everything both templates need, resolved once
pub(crate) struct ProxyPlan<'a> {
    pub target_file_name: &'a str,
    pub architecture: Architecture,
    pub prefix: &'a str,
    pub origin: &'a OriginLoadMode,
    pub table: &'a ExportTable,
    pub exports: Vec<ProxyExport<'a>>,
}

impl<'a> ProxyPlan<'a> {
    fn functions(&self) -> impl Iterator<Item = &ProxyExport<'a>> + '_ {
        self.exports.iter().filter(|e| e.entry.is_function())
    }

    fn non_forwarders(&self) -> impl Iterator<Item = &ProxyExport<'a>> + '_ {
        self.exports.iter().filter(|e| !e.entry.is_forwarder())
    }

    /// `/EXPORT` argument for one entry, without the surrounding quotes.
    fn export_directive(&self, export: &ProxyExport<'_>) -> String {
        let target = match (&export.entry.kind, export.stub(self.prefix)) {
            (ExportKind::Forwarder { target }, _) => target.clone(),
            (_, Some(stub)) => match self.architecture {
                Architecture::X86 => format!("_{}", stub),
                Architecture::X64 => stub,
            },
            // Non-forwarders always carry a stub
            (_, None) => export.symbols.label.clone(),
        };

        let mut directive = format!(
            "{}={},@{}",
            export.symbols.label, target, export.entry.ordinal
        );
        if export.symbols.noname {
            directive.push_str(",NONAME");
        }
        if matches!(export.entry.kind, ExportKind::Data { .. }) {
            directive.push_str(",DATA");
        }
        directive
    }

    fn title(&self) -> String {
        text_literal(self.target_file_name)
    }
}

/// Strip anything that would end a `//` or `;` comment line.
fn comment_text(raw: &str) -> String {
    raw.chars()
        .map(|ch| if ch.is_control() { '?' } else { ch })
        .collect()
}

/// The C++ proxy module
pub(crate) struct SourceFile<'a, 'p>(pub &'p ProxyPlan<'a>);

impl fmt::Display for SourceFile<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plan = self.0;
        let prefix = plan.prefix;
        let (functions, forwarders, data) = plan.table.kind_counts();

        writeln!(
            f,
            "// Proxy for {} ({})",
            comment_text(plan.target_file_name),
            plan.architecture
        )?;
        writeln!(
            f,
            "// Export directory name: {}",
            comment_text(&plan.table.module_name)
        )?;
        writeln!(
            f,
            "// Exports: {} functions, {} forwarders, {} data",
            functions, forwarders, data
        )?;
        writeln!(f)?;
        writeln!(f, "#include <windows.h>")?;
        writeln!(f, "#include <shlwapi.h>")?;
        writeln!(f)?;
        writeln!(f, "#pragma comment(lib, \"shlwapi.lib\")")?;
        writeln!(f)?;

        for export in &plan.exports {
            let directive = format!("/EXPORT:\"{}\"", plan.export_directive(export));
            writeln!(f, "#pragma comment(linker, {})", c_string_literal(&directive))?;
        }
        writeln!(f)?;

        let mut arrays = 0;
        for export in plan.non_forwarders() {
            if let (Some(slots), Some(stub)) = (export.entry.data_slots(), export.stub(prefix)) {
                writeln!(f, "EXTERN_C PVOID {}[{}] = {{ 0 }};", stub, slots)?;
                arrays += 1;
            }
        }
        if arrays > 0 {
            writeln!(f)?;
        }

        writeln!(f, "extern \"C\"")?;
        writeln!(f, "{{")?;
        for slot in plan.non_forwarders().filter_map(|e| e.slot(prefix)) {
            writeln!(f, "PVOID {};", slot)?;
        }
        writeln!(f, "}}")?;
        writeln!(f)?;

        writeln!(f, "static HMODULE g_hOriginal = NULL;")?;
        writeln!(f)?;
        write_load_original(f, plan)?;
        writeln!(f)?;
        write_resolve(f, plan)?;
        writeln!(f)?;
        write_init_exports(f, plan)?;
        writeln!(f)?;

        if plan.architecture == Architecture::X86 {
            for export in plan.functions() {
                let (Some(stub), Some(slot)) = (export.stub(prefix), export.slot(prefix)) else {
                    continue;
                };
                writeln!(
                    f,
                    "// {} @{}",
                    comment_text(&export.symbols.label),
                    export.entry.ordinal
                )?;
                writeln!(f, "EXTERN_C __declspec(naked) void __cdecl {}(void)", stub)?;
                writeln!(f, "{{")?;
                writeln!(f, "    __asm jmp {}", slot)?;
                writeln!(f, "}}")?;
                writeln!(f)?;
            }
        }

        write_dll_main(f)
    }
}

fn write_load_original(f: &mut fmt::Formatter<'_>, plan: &ProxyPlan<'_>) -> fmt::Result {
    writeln!(f, "static BOOL LoadOriginal(HMODULE hModule)")?;
    writeln!(f, "{{")?;
    writeln!(f, "    TCHAR tzPath[MAX_PATH];")?;
    writeln!(f)?;

    match plan.origin {
        OriginLoadMode::SameDir { .. } => {
            let file_name = plan.origin.original_file_name(plan.target_file_name);
            writeln!(f, "    if (GetModuleFileName(hModule, tzPath, MAX_PATH) == 0)")?;
            writeln!(f, "        return FALSE;")?;
            writeln!(f, "    PathRemoveFileSpec(tzPath);")?;
            writeln!(f, "    PathAppend(tzPath, TEXT({}));", text_literal(&file_name))?;
        }
        OriginLoadMode::SystemDir => {
            let file_name = plan.origin.original_file_name(plan.target_file_name);
            writeln!(f, "    UNREFERENCED_PARAMETER(hModule);")?;
            writeln!(f, "    if (GetSystemDirectory(tzPath, MAX_PATH) == 0)")?;
            writeln!(f, "        return FALSE;")?;
            writeln!(f, "    PathAppend(tzPath, TEXT({}));", text_literal(&file_name))?;
        }
        OriginLoadMode::CustomPath { path } => {
            writeln!(f, "    UNREFERENCED_PARAMETER(hModule);")?;
            writeln!(
                f,
                "    lstrcpyn(tzPath, TEXT({}), MAX_PATH);",
                text_literal(path)
            )?;
        }
    }

    writeln!(f)?;
    writeln!(f, "    g_hOriginal = LoadLibrary(tzPath);")?;
    writeln!(f, "    if (g_hOriginal == NULL)")?;
    writeln!(f, "    {{")?;
    writeln!(
        f,
        "        MessageBox(NULL, TEXT(\"Cannot load the original module\"), TEXT({}), MB_ICONSTOP);",
        plan.title()
    )?;
    writeln!(f, "        return FALSE;")?;
    writeln!(f, "    }}")?;
    writeln!(f, "    return TRUE;")?;
    writeln!(f, "}}")
}

fn write_resolve(f: &mut fmt::Formatter<'_>, plan: &ProxyPlan<'_>) -> fmt::Result {
    writeln!(f, "static BOOL Resolve(PVOID *ppvSlot, PCSTR pszProcName)")?;
    writeln!(f, "{{")?;
    writeln!(f, "    *ppvSlot = (PVOID)GetProcAddress(g_hOriginal, pszProcName);")?;
    writeln!(f, "    if (*ppvSlot == NULL)")?;
    writeln!(f, "    {{")?;
    writeln!(
        f,
        "        MessageBox(NULL, TEXT(\"Cannot resolve an export of the original module\"), TEXT({}), MB_ICONSTOP);",
        plan.title()
    )?;
    writeln!(f, "        return FALSE;")?;
    writeln!(f, "    }}")?;
    writeln!(f, "    return TRUE;")?;
    writeln!(f, "}}")
}

fn write_init_exports(f: &mut fmt::Formatter<'_>, plan: &ProxyPlan<'_>) -> fmt::Result {
    let prefix = plan.prefix;

    writeln!(f, "static BOOL InitOriginalExports()")?;
    writeln!(f, "{{")?;
    for export in plan.non_forwarders() {
        let Some(slot) = export.slot(prefix) else {
            continue;
        };
        let lookup = match &export.entry.name {
            Some(name) if !export.symbols.noname => c_string_literal(name),
            _ => format!("MAKEINTRESOURCEA({})", export.entry.ordinal),
        };
        writeln!(f, "    if (!Resolve(&{}, {}))", slot, lookup)?;
        writeln!(f, "        return FALSE;")?;
    }

    let mut copies = String::new();
    for export in plan.non_forwarders() {
        if let (Some(slots), Some(stub), Some(slot)) = (
            export.entry.data_slots(),
            export.stub(prefix),
            export.slot(prefix),
        ) {
            writeln!(
                copies,
                "    memcpy({}, {}, sizeof(PVOID) * {});",
                stub, slot, slots
            )?;
        }
    }
    if !copies.is_empty() {
        writeln!(f)?;
        f.write_str(&copies)?;
    }

    writeln!(f, "    return TRUE;")?;
    writeln!(f, "}}")
}

fn write_dll_main(f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "BOOL WINAPI DllMain(HMODULE hModule, DWORD dwReason, PVOID pvReserved)")?;
    writeln!(f, "{{")?;
    writeln!(f, "    UNREFERENCED_PARAMETER(pvReserved);")?;
    writeln!(f)?;
    writeln!(f, "    if (dwReason == DLL_PROCESS_ATTACH)")?;
    writeln!(f, "    {{")?;
    writeln!(f, "        DisableThreadLibraryCalls(hModule);")?;
    writeln!(f, "        return LoadOriginal(hModule) && InitOriginalExports();")?;
    writeln!(f, "    }}")?;
    writeln!(f, "    else if (dwReason == DLL_PROCESS_DETACH)")?;
    writeln!(f, "    {{")?;
    writeln!(f, "        if (g_hOriginal != NULL)")?;
    writeln!(f, "        {{")?;
    writeln!(f, "            FreeLibrary(g_hOriginal);")?;
    writeln!(f, "            g_hOriginal = NULL;")?;
    writeln!(f, "        }}")?;
    writeln!(f, "    }}")?;
    writeln!(f)?;
    writeln!(f, "    return TRUE;")?;
    writeln!(f, "}}")
}

/// MASM jump stubs for x64 function exports
pub(crate) struct AsmFile<'a, 'p>(pub &'p ProxyPlan<'a>);

impl fmt::Display for AsmFile<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plan = self.0;
        let prefix = plan.prefix;

        writeln!(
            f,
            "; Jump stubs for {} ({})",
            comment_text(plan.target_file_name),
            plan.architecture
        )?;
        writeln!(f, "; Companion of {}.cpp", comment_text(module_stem(plan.target_file_name)))?;
        writeln!(f)?;

        writeln!(f, ".DATA")?;
        for slot in plan.functions().filter_map(|e| e.slot(prefix)) {
            writeln!(f, "EXTERN {}:QWORD", slot)?;
        }
        writeln!(f)?;

        writeln!(f, ".CODE")?;
        for export in plan.functions() {
            let (Some(stub), Some(slot)) = (export.stub(prefix), export.slot(prefix)) else {
                continue;
            };
            writeln!(
                f,
                "; {} @{}",
                comment_text(&export.symbols.label),
                export.entry.ordinal
            )?;
            writeln!(f, "{} PROC", stub)?;
            writeln!(f, "    jmp {}", slot)?;
            writeln!(f, "{} ENDP", stub)?;
            writeln!(f)?;
        }

        writeln!(f, "END")
    }
}
