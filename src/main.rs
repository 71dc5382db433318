use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};

use proxyforge::config::ProxyConfig;
use proxyforge::logging::{init_tracing, init_tracing_json};
use proxyforge::output::write_sources;
use proxyforge::pipeline::analyze;
use proxyforge::{log_error, OriginLoadMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Origin {
    /// Next to the proxy, renamed
    SameDir,
    /// Windows system directory
    SystemDir,
    /// A fixed path given by --origin-path
    CustomPath,
}

/// Generate a proxy DLL source for an existing DLL
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the DLL to proxy
    dll: PathBuf,

    /// Output directory for the generated sources
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Where the proxy loads the original DLL from
    #[arg(long, value_enum)]
    origin: Option<Origin>,

    /// File name of the renamed original, for --origin same-dir
    #[arg(long)]
    origin_name: Option<String>,

    /// Full path of the original, for --origin custom-path
    #[arg(long)]
    origin_path: Option<String>,

    /// Prefix for generated symbol names
    #[arg(long)]
    prefix: Option<String>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the export report without writing sources
    #[arg(long)]
    report_only: bool,

    /// Report only this export, by name or #ordinal; implies --report-only
    #[arg(long, value_name = "NAME|#ORDINAL")]
    export: Option<String>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

fn apply_overrides(args: &Args, config: &mut ProxyConfig) -> anyhow::Result<()> {
    if let Some(prefix) = &args.prefix {
        config.generator.symbol_prefix = prefix.clone();
    }

    match (args.origin, &args.origin_name, &args.origin_path) {
        (Some(Origin::CustomPath), _, Some(path)) => {
            config.generator.origin = OriginLoadMode::CustomPath { path: path.clone() };
        }
        (Some(Origin::CustomPath), _, None) => bail!("--origin custom-path requires --origin-path"),
        (Some(Origin::SystemDir), _, _) => config.generator.origin = OriginLoadMode::SystemDir,
        (Some(Origin::SameDir), name, _) => {
            config.generator.origin = OriginLoadMode::SameDir {
                file_name: name.clone(),
            };
        }
        (None, Some(name), _) => {
            config.generator.origin = OriginLoadMode::SameDir {
                file_name: Some(name.clone()),
            };
        }
        (None, None, Some(path)) => {
            config.generator.origin = OriginLoadMode::CustomPath { path: path.clone() };
        }
        (None, None, None) => {}
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.log_json {
        init_tracing_json();
    } else {
        init_tracing();
    }

    let mut config = match &args.config {
        Some(path) => ProxyConfig::from_json_file(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => ProxyConfig::default(),
    };
    apply_overrides(&args, &mut config)?;

    let analysis = analyze(&args.dll, &config)
        .map_err(|e| log_error!(e, "analysis failed"))
        .with_context(|| format!("analyzing {}", args.dll.display()))?;

    let narrowed;
    let shown = match &args.export {
        Some(query) => match analysis.only(query) {
            Some(one) => {
                narrowed = one;
                &narrowed
            }
            None => bail!("{} has no export {:?}", args.dll.display(), query),
        },
        None => &analysis,
    };

    if args.json {
        let report = serde_json::json!({
            "file_name": shown.file_name,
            "architecture": shown.architecture,
            "module_name": shown.table.module_name,
            "ordinal_base": shown.table.ordinal_base,
            "exports": shown.summary(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", shown.report());
    }

    if args.report_only || args.export.is_some() {
        return Ok(());
    }

    let generated = analysis.generate(&config.generator);
    let written = write_sources(&args.output, &analysis, &generated)
        .map_err(|e| log_error!(e, "writing sources failed"))
        .with_context(|| format!("writing sources to {}", args.output.display()))?;
    for path in written {
        eprintln!("wrote {}", path.display());
    }
    Ok(())
}
