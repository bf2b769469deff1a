use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use serde::Serialize;

use vsre_script::{NativeOnlyHost, ScriptModel};

#[derive(ClapParser, Debug)]
#[command(version, about = "Reconstruct the structure of a compiled VesperScript container")]
struct Args {
    #[arg(short, long)]
    input: PathBuf,

    /// Pin a container revision instead of auto-detecting (0 = auto).
    #[arg(short, long, default_value_t = 0)]
    revision: u32,

    /// Emit the report as JSON instead of text.
    #[arg(long)]
    json: bool,

    /// Dump recovered source text instead of the structure report.
    #[arg(long)]
    source: bool,

    /// Decode nested subclasses as well.
    #[arg(long)]
    recursive: bool,
}

#[derive(Debug, Serialize)]
struct UnitReport {
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    revision: Option<u32>,
    global_name: String,
    local_name: String,
    base_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    instance_base_type: Option<String>,
    tool: bool,
    can_instantiate: bool,
    has_recovered_source: bool,
    members: Vec<String>,
    statics: Vec<String>,
    subclass_names: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    subclasses: Vec<UnitReport>,
}

fn build_report(model: &ScriptModel, recursive: bool) -> UnitReport {
    let mut subclasses = Vec::new();
    if recursive {
        for name in model.subclass_names() {
            match model.subclass(name, &NativeOnlyHost) {
                Ok(child) => subclasses.push(build_report(&child, recursive)),
                Err(e) => log::warn!("skipping subclass {:?}: {}", name, e),
            }
        }
    }

    UnitReport {
        valid: model.is_valid(),
        error: (!model.error_message().is_empty()).then(|| model.error_message().to_string()),
        revision: model.revision(),
        global_name: model.global_name().to_string(),
        local_name: model.local_name().to_string(),
        base_type: model.base_type_name().to_string(),
        instance_base_type: model.instance_base_type().map(str::to_string),
        tool: model.is_tool(),
        can_instantiate: model.can_instantiate(),
        has_recovered_source: model.has_source_code(),
        members: model.members().to_vec(),
        statics: model
            .static_variables()
            .iter()
            .map(|v| v.to_string())
            .collect(),
        subclass_names: model
            .subclass_names()
            .into_iter()
            .map(str::to_string)
            .collect(),
        subclasses,
    }
}

fn print_report(report: &UnitReport, depth: usize) {
    let pad = "  ".repeat(depth);
    let name = if !report.global_name.is_empty() {
        report.global_name.as_str()
    } else if !report.local_name.is_empty() {
        report.local_name.as_str()
    } else {
        "<anonymous>"
    };

    println!("{}class {}", pad, name);
    if let Some(rev) = report.revision {
        println!("{}  revision: {}", pad, rev);
    }
    if !report.base_type.is_empty() {
        println!("{}  extends: {}", pad, report.base_type);
    }
    if let Some(native) = &report.instance_base_type {
        println!("{}  native base: {}", pad, native);
    }
    println!(
        "{}  valid: {}  tool: {}  instantiable: {}",
        pad, report.valid, report.tool, report.can_instantiate
    );
    if let Some(err) = &report.error {
        println!("{}  error: {}", pad, err);
    }
    for m in &report.members {
        println!("{}  var {}", pad, m);
    }
    for (i, v) in report.statics.iter().enumerate() {
        println!("{}  static[{}] = {}", pad, i, v);
    }
    if report.subclasses.is_empty() {
        for s in &report.subclass_names {
            println!("{}  class {} (not decoded)", pad, s);
        }
    } else {
        for sub in &report.subclasses {
            print_report(sub, depth + 1);
        }
    }
}

fn run(args: &Args) -> Result<UnitReport> {
    let bytes = fs::read(&args.input)
        .with_context(|| format!("read {}", args.input.display()))?;

    let mut model = ScriptModel::new();
    model.set_path(args.input.display().to_string());
    model.set_tooling_enabled(true);
    if args.revision != 0 {
        model.set_override_revision(args.revision);
    }
    model.set_binary(bytes.into());

    if let Err(e) = model.reload(&NativeOnlyHost) {
        log::error!("{}: {}", args.input.display(), e);
    }

    if args.source {
        let src = model
            .source_code()
            .context("container carries no recoverable source text")?;
        println!("{}", src);
    } else {
        let report = build_report(&model, args.recursive);
        if args.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_report(&report, 0);
        }
        return Ok(report);
    }

    Ok(build_report(&model, false))
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(&args) {
        Ok(report) if report.valid => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
