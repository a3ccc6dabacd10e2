//! MRC CLI - MIPS recompiler

use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mrc")]
#[command(about = "MIPS recompiler - translates IRIX MIPS ELF executables to C")]
#[command(version)]
struct Cli {
    /// Input ELF file
    #[arg(value_name = "ELF")]
    input: PathBuf,

    /// Output file (defaults to stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Declare callee-saved registers at module scope so they survive
    /// longjmp-style returns
    #[arg(long)]
    conservative: bool,
}

fn main() {
    // Initialize tracing with env filter (RUST_LOG=debug for debug output)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("mrc=info".parse().unwrap()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let data = match std::fs::read(&cli.input) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("Error reading {}: {}", cli.input.display(), e);
            std::process::exit(1);
        }
    };

    info!(input = %cli.input.display(), "translating");

    let options = mrc::Options {
        conservative: cli.conservative,
        ..mrc::Options::default()
    };
    let output = match mrc::translate_elf(&data, options) {
        Ok(output) => output,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let result = match &cli.output {
        Some(path) => std::fs::write(path, output),
        None => std::io::stdout().write_all(output.as_bytes()),
    };
    if let Err(e) = result {
        eprintln!("Error writing output: {}", e);
        std::process::exit(1);
    }
}
