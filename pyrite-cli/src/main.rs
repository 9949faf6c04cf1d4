use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use pyrite_compiler::driver::{self, DriverOptions};
use pyrite_compiler::TargetAbi;

#[derive(Parser)]
#[command(name = "pyrite")]
#[command(version = "0.2.0")]
#[command(about = "Pyrite: AOT compiler for a statically-typed Python-syntax dialect", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a source file to an executable
    Build {
        /// Input .pyr file
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output executable path
        #[arg(short, long, value_name = "OUTPUT")]
        output: Option<PathBuf>,

        /// Optimization level (0-3); PYRITE_OPT_LEVEL supplies the default
        #[arg(short = 'O', long)]
        opt_level: Option<u8>,

        /// Build directory for intermediate artifacts
        #[arg(long, default_value = "build")]
        build_dir: PathBuf,
    },

    /// Compile and run a source file
    Run {
        /// Input .pyr file
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Arguments to pass to the program
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Check a source file without emitting objects
    Check {
        /// Input .pyr file
        #[arg(value_name = "INPUT")]
        input: PathBuf,
    },

    /// Compile and print the textual LLVM IR
    EmitIr {
        /// Input .pyr file
        #[arg(value_name = "INPUT")]
        input: PathBuf,
    },
}

fn main() -> ExitCode {
    env_logger::init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Build {
            input,
            output,
            opt_level,
            build_dir,
        } => {
            let options = DriverOptions {
                opt_level: opt_level.unwrap_or_else(driver::opt_level_from_env).min(3),
                build_dir,
                output,
                target: TargetAbi::host(),
            };
            match driver::compile_to_executable(&input, &options) {
                Ok(exe) => {
                    log::info!("built {}", exe.display());
                    Ok(ExitCode::SUCCESS)
                }
                Err(diag) => Ok(report(&input, diag)),
            }
        }

        Commands::Run { input, args } => {
            let options = DriverOptions::default();
            match driver::compile_to_executable(&input, &options) {
                Ok(exe) => {
                    let status = std::process::Command::new(&exe).args(&args).status()?;
                    Ok(ExitCode::from(status.code().unwrap_or(1) as u8))
                }
                Err(diag) => Ok(report(&input, diag)),
            }
        }

        Commands::Check { input } => match front_half(&input) {
            Ok(_) => {
                println!("ok");
                Ok(ExitCode::SUCCESS)
            }
            Err(diag) => Ok(report(&input, diag)),
        },

        Commands::EmitIr { input } => match front_half(&input) {
            Ok(unit) => {
                print!("{}", unit.builder.module.render());
                Ok(ExitCode::SUCCESS)
            }
            Err(diag) => Ok(report(&input, diag)),
        },
    }
}

fn front_half(input: &PathBuf) -> Result<pyrite_compiler::Unit, pyrite_diagnostics::Diagnostic> {
    let source = std::fs::read_to_string(input).map_err(|e| {
        pyrite_diagnostics::Diagnostic::error(
            pyrite_diagnostics::Category::External,
            pyrite_diagnostics::codes::CIMPORT_NOT_FOUND,
            format!("cannot read {}: {}", input.display(), e),
            pyrite_diagnostics::Span::from_path(input),
        )
    })?;
    let source_dir = input
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    let mut loader = driver::sibling_loader(source_dir);
    driver::compile_source(
        &input.display().to_string(),
        &source,
        TargetAbi::host(),
        &mut loader,
    )
}

/// Print the formatted diagnostic (source snippet included) and exit
/// non-zero. Only the diagnostic is shown, never an internal backtrace.
fn report(input: &PathBuf, diag: pyrite_diagnostics::Diagnostic) -> ExitCode {
    let source = std::fs::read_to_string(input).unwrap_or_default();
    eprintln!("{}", diag.format(&source));
    ExitCode::FAILURE
}
