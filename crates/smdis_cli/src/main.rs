use std::path::Path;
use std::process::Command;

use clap::{CommandFactory, Parser};
use tracing::{info, warn};
use tracing_subscriber::filter::EnvFilter;

use smdis_lib::{callgraph, cfg, detect_version, disasm, dot, opcode_table, xdr};
use smdis_lib::{Diagnostic, Mode, Options, Version};

use crate::cli::{BackendCli, Cli, ModeCli};

mod cli;
mod decompile;

fn print_diag(d: &Diagnostic) {
    if d.func.is_empty() {
        eprintln!("diag [{}] @{:#x}: {}", d.kind, d.offset, d.msg);
    } else {
        eprintln!("diag [{}] {} @{:#x}: {}", d.kind, d.func, d.offset, d.msg);
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("info".parse().expect("directive")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Some(shell) = cli.completions {
        let mut cmd = Cli::command();
        let bin_name = cmd.get_name().to_string();
        clap_complete::generate(shell, &mut cmd, bin_name, &mut std::io::stdout());
        return;
    }

    let path = cli.path.as_deref().expect("clap enforces the path argument");

    let opt = Options {
        mode: match cli.mode {
            ModeCli::Strict => Mode::Strict,
            ModeCli::Besteffort => Mode::BestEffort,
        },
        max_read_bytes: cli.max_read_bytes,
        ..Options::default()
    };

    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("error: failed to read {}: {e}", path.display());
            std::process::exit(1);
        }
    };

    // Detect the dialect from the magic; unknown magics fall back to the
    // SM33 table so best-effort decodes still get a catalog.
    let ver = if data.len() >= 4 {
        detect_version(u32::from_le_bytes([data[0], data[1], data[2], data[3]]))
    } else {
        Version::Unknown
    };
    let ops = match opcode_table(ver) {
        Some(ops) => {
            info!("version: SM{}", if ver == Version::V28 { 28 } else { 33 });
            ops
        }
        None => {
            if data.len() >= 4 {
                warn!(
                    "unknown magic {:#010x}, falling back to SM33",
                    u32::from_le_bytes([data[0], data[1], data[2], data[3]])
                );
            } else {
                warn!("file too short for magic, falling back to SM33");
            }
            opcode_table(Version::V33).expect("SM33 table")
        }
    };

    let res = match xdr::decode(&data, &opt) {
        Ok(res) => res,
        Err(e) => {
            for d in &e.diags {
                print_diag(d);
            }
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };
    for d in &res.diags {
        print_diag(d);
    }
    let script = res.value;

    let base = path.with_extension("");
    let title = if script.filename.is_empty() {
        path.file_name().map(|f| f.to_string_lossy().into_owned()).unwrap_or_default()
    } else {
        Path::new(&script.filename)
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| script.filename.clone())
    };

    if cli.callgraph {
        let g = callgraph::build(&script, ops);
        let dot_text = dot::render_callgraph(&g, &title);
        emit_graph(&base, "", &dot_text);
        return;
    }

    if cli.cfg {
        let g = cfg::build_cfg(&script, ops);
        let dot_text = dot::render_cfg(&g, &title);
        emit_graph(&base, "cfg.", &dot_text);
        return;
    }

    let dis = match disasm::disasm_tree(&script, &opt, ops) {
        Ok(res) => res,
        Err(e) => {
            for d in &e.diags {
                print_diag(d);
            }
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };
    for d in &dis.diags {
        print_diag(d);
    }

    print!("{}", dis.value);

    let dis_path = base.with_extension("dis");
    match std::fs::write(&dis_path, &dis.value) {
        Ok(()) => info!("wrote {}", dis_path.display()),
        Err(e) => warn!("could not write {}: {e}", dis_path.display()),
    }

    if cli.decompile {
        let cfg = decompile::Config {
            backend: match cli.backend {
                BackendCli::ClaudeCode => decompile::BACKEND_CLAUDE.to_string(),
                BackendCli::Codex => decompile::BACKEND_CODEX.to_string(),
            },
            model: cli.model.clone().unwrap_or_default(),
            ..decompile::Config::default()
        };

        let func_name = base
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| "main".to_string());

        match decompile::decompile(&cfg, &dis.value, &func_name) {
            Ok(js) => {
                println!("{js}");
                let suffix = cfg.backend.replace('-', "");
                let js_path = base.with_file_name(format!("{func_name}-{suffix}.js"));
                match std::fs::write(&js_path, format!("{js}\n")) {
                    Ok(()) => info!("wrote {}", js_path.display()),
                    Err(e) => warn!("could not write {}: {e}", js_path.display()),
                }
            }
            Err(e) => {
                eprintln!("decompile error: {e}");
                std::process::exit(1);
            }
        }
    }
}

/// Writes `<base>.<infix>dot` and, when graphviz is installed, renders
/// `.svg` and `.png` next to it.
fn emit_graph(base: &Path, infix: &str, dot_text: &str) {
    let dot_file = base.with_extension(format!("{infix}dot"));
    match std::fs::write(&dot_file, dot_text) {
        Ok(()) => info!("wrote {}", dot_file.display()),
        Err(e) => {
            eprintln!("error: could not write {}: {e}", dot_file.display());
            std::process::exit(1);
        }
    }

    for ext in ["svg", "png"] {
        let out_file = base.with_extension(format!("{infix}{ext}"));
        let mut cmd = Command::new("dot");
        cmd.arg(format!("-T{ext}"));
        if ext == "png" {
            cmd.arg("-Gdpi=200");
        }
        cmd.arg("-o").arg(&out_file).arg(&dot_file);
        match cmd.status() {
            Ok(status) if status.success() => info!("wrote {}", out_file.display()),
            Ok(status) => {
                eprintln!("error: dot -T{ext} failed: {status}");
                std::process::exit(1);
            }
            Err(e) => {
                warn!("graphviz not found ({e}); kept {}", dot_file.display());
                return;
            }
        }
    }
}
