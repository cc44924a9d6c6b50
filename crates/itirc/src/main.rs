//! The iterator IR compiler driver.
//!
//! Provides the `itirc` command with the following subcommands:
//!
//! - `itirc transform <program.json>` - Run the pass pipeline and print the result
//! - `itirc infer <program.json>` - Type-check a program and print its type
//!
//! Programs and offset providers are read as JSON. Pipeline options come from
//! an optional TOML file (`--options`), with command-line flags applied on top.
//! `RUST_LOG` controls log output on stderr.

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use itir_common::dimension::OffsetProvider;
use itir_ir::ir::Program;
use itir_transforms::{apply_common_transforms, PipelineOptions};

#[derive(Parser)]
#[command(name = "itirc", version, about = "Iterator IR optimizer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the rewrite pipeline on a program
    Transform {
        /// Path to the program (JSON)
        program: PathBuf,

        /// Path to the offset provider (JSON); empty when omitted
        #[arg(long = "offset-provider")]
        offset_provider: Option<PathBuf>,

        /// Pipeline options file (TOML)
        #[arg(long)]
        options: Option<PathBuf>,

        /// Materialize repeatedly read lifts into temporaries
        #[arg(long = "extract-temporaries")]
        extract_temporaries: bool,

        /// Unroll reductions over fixed-size neighbor lists
        #[arg(long = "unroll-reduce")]
        unroll_reduce: bool,

        /// Disable common subexpression elimination
        #[arg(long = "no-cse")]
        no_cse: bool,

        /// Inline every lambda argument in the final inlining pass
        #[arg(long = "force-inline-lambda-args")]
        force_inline_lambda_args: bool,

        /// Collapse `make_tuple(tuple_get(0, t), ...)` without knowing the size of `t`
        #[arg(long = "unconditionally-collapse-tuples")]
        unconditionally_collapse_tuples: bool,

        /// Iteration bound of each fixpoint loop
        #[arg(long = "max-fixpoint-iterations")]
        max_fixpoint_iterations: Option<usize>,

        /// Print the result as JSON instead of the readable form
        #[arg(long)]
        json: bool,
    },
    /// Infer the types of a program
    Infer {
        /// Path to the program (JSON)
        program: PathBuf,

        /// Path to the offset provider (JSON); empty when omitted
        #[arg(long = "offset-provider")]
        offset_provider: Option<PathBuf>,

        /// Print the annotated program as JSON instead of its type
        #[arg(long)]
        json: bool,
    },
}

/// Flags that override values loaded from the options file.
struct Overrides {
    extract_temporaries: bool,
    unroll_reduce: bool,
    no_cse: bool,
    force_inline_lambda_args: bool,
    unconditionally_collapse_tuples: bool,
    max_fixpoint_iterations: Option<usize>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Transform {
            program,
            offset_provider,
            options,
            extract_temporaries,
            unroll_reduce,
            no_cse,
            force_inline_lambda_args,
            unconditionally_collapse_tuples,
            max_fixpoint_iterations,
            json,
        } => {
            let overrides = Overrides {
                extract_temporaries,
                unroll_reduce,
                no_cse,
                force_inline_lambda_args,
                unconditionally_collapse_tuples,
                max_fixpoint_iterations,
            };
            transform(&program, offset_provider.as_deref(), options.as_deref(), &overrides, json)
        }
        Commands::Infer {
            program,
            offset_provider,
            json,
        } => infer(&program, offset_provider.as_deref(), json),
    };
    if let Err(e) = result {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

fn transform(
    program_path: &Path,
    offset_provider_path: Option<&Path>,
    options_path: Option<&Path>,
    overrides: &Overrides,
    json: bool,
) -> Result<(), String> {
    let program = read_program(program_path)?;
    let offset_provider = read_offset_provider(offset_provider_path)?;
    let options = load_options(options_path, overrides)?;
    info!(program = %program.id, closures = program.closures.len(), "running pipeline");

    let result = apply_common_transforms(program, &offset_provider, &options).map_err(|e| e.to_string())?;
    if json {
        let out = serde_json::to_string_pretty(&result).map_err(|e| format!("Failed to serialize program: {}", e))?;
        println!("{}", out);
    } else {
        println!("{}", result);
    }
    Ok(())
}

fn infer(program_path: &Path, offset_provider_path: Option<&Path>, json: bool) -> Result<(), String> {
    let program = read_program(program_path)?;
    let offset_provider = read_offset_provider(offset_provider_path)?;
    let typed = itir_typeck::infer(&program, &offset_provider, false).map_err(|e| e.to_string())?;
    if json {
        let out = serde_json::to_string_pretty(&typed).map_err(|e| format!("Failed to serialize program: {}", e))?;
        println!("{}", out);
    } else {
        match &typed.ty {
            Some(ty) => println!("{}", ty),
            None => println!("{}", typed),
        }
    }
    Ok(())
}

fn read_program(path: &Path) -> Result<Program, String> {
    let source =
        std::fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
    serde_json::from_str(&source).map_err(|e| format!("Invalid program '{}': {}", path.display(), e))
}

fn read_offset_provider(path: Option<&Path>) -> Result<OffsetProvider, String> {
    let Some(path) = path else {
        return Ok(OffsetProvider::new());
    };
    let source =
        std::fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
    serde_json::from_str(&source).map_err(|e| format!("Invalid offset provider '{}': {}", path.display(), e))
}

/// Load pipeline options from `path` (defaults when absent), then apply
/// the command-line overrides.
fn load_options(path: Option<&Path>, overrides: &Overrides) -> Result<PipelineOptions, String> {
    let mut options = match path {
        Some(path) => {
            let source = std::fs::read_to_string(path)
                .map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
            toml::from_str(&source).map_err(|e| format!("Invalid options '{}': {}", path.display(), e))?
        }
        None => PipelineOptions::default(),
    };
    options.extract_temporaries |= overrides.extract_temporaries;
    options.unroll_reduce |= overrides.unroll_reduce;
    options.force_inline_lambda_args |= overrides.force_inline_lambda_args;
    options.unconditionally_collapse_tuples |= overrides.unconditionally_collapse_tuples;
    if overrides.no_cse {
        options.common_subexpression_elimination = false;
    }
    if let Some(max) = overrides.max_fixpoint_iterations {
        options.max_fixpoint_iterations = max;
    }
    Ok(options)
}
