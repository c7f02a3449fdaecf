use std::path::PathBuf;

use clap::{
    builder::{
        styling::{AnsiColor, Effects},
        Styles,
    },
    crate_description, crate_version, Parser, ValueEnum,
};
use clap_complete::Shell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeCli {
    Strict,
    Besteffort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendCli {
    ClaudeCode,
    Codex,
}

#[derive(Parser)]
#[command(name = "smdis",
    version = crate_version!(),
    about = crate_description!(),
    styles = Styles::styled()
        .header(AnsiColor::BrightGreen.on_default() | Effects::BOLD | Effects::UNDERLINE)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::BrightCyan.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Cyan.on_default()))]
pub struct Cli {
    /// Path to the .jsc bytecode archive
    #[arg(required_unless_present = "completions")]
    pub path: Option<PathBuf>,

    /// Decode mode
    #[arg(long, value_enum, default_value_t = ModeCli::Strict)]
    pub mode: ModeCli,

    /// Max bytes for a single XDR bytes() field (0 uses the default cap)
    #[arg(long, default_value_t = 0)]
    pub max_read_bytes: usize,

    /// Generate a callgraph (.dot, plus .svg/.png when graphviz is present)
    #[arg(long)]
    pub callgraph: bool,

    /// Generate a control flow graph (.cfg.dot, plus .svg/.png)
    #[arg(long)]
    pub cfg: bool,

    /// Decompile bytecode via an LLM backend
    #[arg(long)]
    pub decompile: bool,

    /// LLM backend for --decompile
    #[arg(long, value_enum, default_value_t = BackendCli::ClaudeCode)]
    pub backend: BackendCli,

    /// Model name (backend-specific)
    #[arg(long)]
    pub model: Option<String>,

    /// Print shell completions and exit
    #[arg(long, value_enum)]
    pub completions: Option<Shell>,
}
