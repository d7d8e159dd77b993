//! LIR Generator CLI

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use lirgen::{MirGraph, Target, TargetConfig};

#[derive(Parser)]
#[command(name = "lirgen", version, about = "Lower MIR graphs to LIR")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Lower a MIR graph and print the LIR
    Lower {
        /// MIR graph in JSON form
        file: PathBuf,

        /// Target architecture (x86, x64)
        #[arg(long, default_value = "x64")]
        target: String,

        /// Calling convention tables (TOML), replacing the target preset
        #[arg(long)]
        convention: Option<PathBuf>,

        /// Virtual register ceiling
        #[arg(long)]
        max_vregs: Option<u32>,

        /// Print the LIR as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate a MIR graph and print it (debug)
    Mir {
        /// MIR graph in JSON form
        file: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let result = match cli.command {
        Command::Lower {
            file,
            target,
            convention,
            max_vregs,
            json,
        } => lower_file(&file, &target, convention.as_ref(), max_vregs, json),
        Command::Mir { file } => mir_file(&file),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn setup_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn lower_file(
    path: &PathBuf,
    target: &str,
    convention: Option<&PathBuf>,
    max_vregs: Option<u32>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let target = Target::from_str(target).ok_or_else(|| format!("unknown target: {target}"))?;
    let mut config = match convention {
        Some(file) => TargetConfig::from_toml_file(target, file)?,
        None => TargetConfig::for_target(target)?,
    };
    if let Some(limit) = max_vregs {
        config = config.with_max_virtual_registers(limit);
    }

    let source = std::fs::read_to_string(path)?;
    let mut graph = MirGraph::from_json(&source)?;
    let lir = lirgen::lower_graph(&mut graph, &config)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&lir)?);
    } else {
        print!("{}", lirgen::format_lir(&lir));
    }
    Ok(())
}

fn mir_file(path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let source = std::fs::read_to_string(path)?;
    let graph = MirGraph::from_json(&source)?;
    print!("{}", lirgen::format_mir(&graph));
    Ok(())
}
