//! Cflat Lowering CLI
//!
//! Reads a JSON-serialized Cflat AST, lowers it to LIR, and prints the
//! result on standard output.

use clap::Parser;
use std::path::PathBuf;

use cflatc::error::LowerError;

#[derive(Parser)]
#[command(name = "cflatc", version, about = "Lower a Cflat AST to LIR")]
struct Cli {
    /// JSON-serialized AST file to lower
    file: PathBuf,

    /// Pretty-print the parsed AST as JSON instead of lowering (debug)
    #[arg(long)]
    dump_ast: bool,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(&cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> cflatc::Result<()> {
    let source = std::fs::read_to_string(&cli.file).map_err(|e| {
        LowerError::invalid_input(format!("could not read {}: {e}", cli.file.display()))
    })?;

    let ast = cflatc::ast::parse_program(&source)?;

    if cli.dump_ast {
        let json = serde_json::to_string_pretty(&ast)
            .map_err(|e| LowerError::invalid_input(e.to_string()))?;
        println!("{json}");
        return Ok(());
    }

    // Lowering finishes before the first byte reaches stdout; a failure
    // never leaves partial output behind.
    let lir = cflatc::lir::lower_program(&ast)?;
    print!("{lir}");
    Ok(())
}
