use clap::{Parser, ValueEnum};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use bloch::{build_timestamp, compile_path, git_commit_hash, run_program, RunOutcome, VERSION};

const REPO_OWNER: &str = "bloch-labs";
const REPO_NAME: &str = "bloch";

#[derive(Parser)]
#[command(name = "bloch")]
#[command(author = "Bloch Labs")]
#[command(about = "The Bloch hybrid classical/quantum language interpreter", long_about = None)]
#[command(disable_version_flag = true)]
struct Cli {
    /// Bloch source file to run
    input: Option<PathBuf>,

    /// Print version information and exit
    #[arg(long)]
    version: bool,

    /// Update bloch to the latest release
    #[arg(long)]
    update: bool,

    /// Duplicate the OpenQASM log to standard output
    #[arg(long)]
    emit_qasm: bool,

    /// Shot count (deprecated: prefer '@shots(N)' on main)
    #[arg(long, value_name = "N")]
    shots: Option<u64>,

    /// Echo behaviour: auto suppresses echoes during multi-shot runs
    #[arg(long, value_enum, default_value = "auto")]
    echo: EchoArg,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
enum EchoArg {
    Auto,
    All,
    None,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.version {
        println!("bloch {} ({})", VERSION, build_timestamp());
        println!("Commit:  {}", git_commit_hash());
        return ExitCode::SUCCESS;
    }

    if cli.update {
        return match run_update() {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("{} Update failed: {}", "[ERR]".red().bold(), e);
                ExitCode::FAILURE
            }
        };
    }

    let Some(input) = cli.input else {
        eprintln!("{} No input file; usage: bloch <file.bloch>", "[ERR]".red().bold());
        return ExitCode::from(2);
    };

    match run_file(&input, cli.shots, cli.echo, cli.emit_qasm) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", "[ERROR]: Stopping program execution...".red().bold());
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_file(
    input: &PathBuf,
    flag_shots: Option<u64>,
    echo: EchoArg,
    emit_qasm: bool,
) -> Result<(), bloch::error::BlochError> {
    let compiled = compile_path(input)?;

    let shots = match (compiled.annotated_shots(), flag_shots) {
        (Some(annotated), Some(_)) => {
            eprintln!(
                "{} '--shots' is overridden by the '@shots' annotation on 'main'",
                "[WARN]".yellow().bold()
            );
            annotated
        }
        (Some(annotated), None) => annotated,
        (None, Some(flag)) => {
            eprintln!(
                "{} '--shots' is deprecated; prefer '@shots(N)' on 'main'",
                "[WARN]".yellow().bold()
            );
            flag.max(1)
        }
        (None, None) => 1,
    };

    let echo_live = match echo {
        EchoArg::All => true,
        EchoArg::None => false,
        EchoArg::Auto => shots <= 1,
    };

    let progress = if shots > 1 {
        let bar = ProgressBar::new(shots);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} shots")
                .unwrap()
                .progress_chars("█▓▒░"),
        );
        Some(bar)
    } else {
        None
    };

    let outcome = run_program(&compiled, shots, echo_live, |done| {
        if let Some(bar) = &progress {
            bar.set_position(done);
        }
    });
    if let Some(bar) = &progress {
        bar.finish_and_clear();
    }
    let outcome = outcome?;

    write_qasm(input, &outcome);
    if emit_qasm {
        print!("{}", outcome.qasm);
    }
    if outcome.shots > 1 {
        print!("{}", outcome.tracked.render(outcome.shots, outcome.elapsed));
    }
    Ok(())
}

/// The QASM log lands next to the source on every run, even when the
/// program performed no quantum operations.
fn write_qasm(input: &PathBuf, outcome: &RunOutcome) {
    let path = input.with_extension("qasm");
    if let Err(e) = fs::write(&path, &outcome.qasm) {
        eprintln!("{} Cannot write '{}': {}", "[WARN]".yellow().bold(), path.display(), e);
    }
}

// ---------------- Update Logic ----------------

fn run_update() -> Result<(), Box<dyn std::error::Error>> {
    println!("{} Checking for the latest release...", "[INFO]".blue().bold());
    let status = self_update::backends::github::Update::configure()
        .repo_owner(REPO_OWNER)
        .repo_name(REPO_NAME)
        .bin_name("bloch")
        .show_download_progress(true)
        .current_version(VERSION)
        .build()?
        .update()?;

    if status.updated() {
        println!("{} Updated to {}", "[OK]".green().bold(), status.version());
    } else {
        println!("{} Already on the latest version ({})", "[OK]".green().bold(), status.version());
    }
    Ok(())
}
