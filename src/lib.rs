pub mod ast;
pub mod error;
pub mod lexer;
pub mod loader;
pub mod parser;
pub mod runtime;
pub mod semantics;
pub mod simulator;
pub mod token;

use std::path::Path;
use std::rc::Rc;
use std::time::{Duration, Instant};

use ast::Program;
use error::Result;
use runtime::{Evaluator, OutcomeTracker};
use semantics::Analysis;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn build_timestamp() -> String {
    let now = std::time::SystemTime::now();
    let dt = chrono::DateTime::<chrono::Utc>::from(now);
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

// Fetched from build.rs
pub fn git_commit_hash() -> String {
    env!("GIT_HASH").to_string()
}

/// A merged, validated program ready to run.
pub struct CompiledProgram {
    pub program: Program,
    pub analysis: Rc<Analysis>,
}

impl CompiledProgram {
    /// Shot count requested by `@shots(N)` on `main`, if any.
    pub fn annotated_shots(&self) -> Option<u64> {
        self.analysis.shots
    }
}

/// Lex → parse → resolve imports → analyse, for a source file on disk.
pub fn compile_path(path: &Path) -> Result<CompiledProgram> {
    let program = loader::ModuleLoader::new().load(path)?;
    let analysis = Rc::new(semantics::analyze(&program)?);
    Ok(CompiledProgram { program, analysis })
}

/// Same pipeline for an in-memory source with no imports.
pub fn compile_source(source: &str) -> Result<CompiledProgram> {
    let program = loader::ModuleLoader::load_source(source)?;
    let analysis = Rc::new(semantics::analyze(&program)?);
    Ok(CompiledProgram { program, analysis })
}

/// Everything a run produced: the echo transcript across shots, the QASM
/// log of the last shot, and the aggregated tracked outcomes.
pub struct RunOutcome {
    pub echoes: Vec<String>,
    pub qasm: String,
    pub tracked: OutcomeTracker,
    pub shots: u64,
    pub elapsed: Duration,
    /// Objects still alive after the last shot's shutdown; zero unless
    /// something leaked.
    pub leaked_objects: usize,
}

/// Runs the program for `shots` shots. Each shot gets a fresh evaluator and
/// simulator; tracked outcomes are summed across shots. On error the
/// partial tracker is discarded with the run, per the fail-fast policy.
pub fn run_program(
    compiled: &CompiledProgram,
    shots: u64,
    echo_live: bool,
    mut on_shot: impl FnMut(u64),
) -> Result<RunOutcome> {
    let start = Instant::now();
    let mut tracker = OutcomeTracker::new();
    let mut echoes = Vec::new();
    let mut qasm = String::new();
    let mut leaked_objects = 0;

    for shot in 0..shots.max(1) {
        let evaluator = Evaluator::new(&compiled.program, compiled.analysis.clone(), echo_live);
        let (result, shot_tracker) = evaluator.run();
        tracker.merge(shot_tracker);
        let outcome = result?;
        echoes.extend(outcome.echoes);
        qasm = outcome.qasm;
        leaked_objects = leaked_objects.max(outcome.leaked_objects);
        on_shot(shot + 1);
    }

    Ok(RunOutcome {
        echoes,
        qasm,
        tracked: tracker,
        shots: shots.max(1),
        elapsed: start.elapsed(),
        leaked_objects,
    })
}

/// Compile-and-run convenience for tests and embedders: shot count comes
/// from the `@shots` annotation, echoes are captured rather than printed.
pub fn run_source(source: &str) -> Result<RunOutcome> {
    let compiled = compile_source(source)?;
    let shots = compiled.annotated_shots().unwrap_or(1);
    run_program(&compiled, shots, false, |_| {})
}
