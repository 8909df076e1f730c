use std::fs;
use std::path::PathBuf;
use std::process::Command;

fn bloch() -> Command {
    Command::new(env!("CARGO_BIN_EXE_bloch"))
}

fn temp_file(name: &str, source: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("bloch-cli-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, source).unwrap();
    path
}

#[test]
fn version_flag_prints_and_exits_zero() {
    let output = bloch().arg("--version").output().expect("failed to run bloch");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("bloch"));
}

#[test]
fn help_flag_prints_usage() {
    let output = bloch().arg("--help").output().expect("failed to run bloch");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--emit-qasm"));
    assert!(stdout.contains("--shots"));
    assert!(stdout.contains("--echo"));
}

#[test]
fn missing_input_exits_nonzero() {
    let output = bloch().output().expect("failed to run bloch");
    assert!(!output.status.success());
}

#[test]
fn running_a_program_prints_echoes_and_writes_qasm() {
    let path = temp_file("ok.bloch", "function main() -> void { qubit q; x(q); echo(\"done\"); }");

    let output = bloch().arg(&path).output().expect("failed to run bloch");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("done"));

    let qasm_path = path.with_extension("qasm");
    let qasm = fs::read_to_string(&qasm_path).expect("qasm file written next to the source");
    assert!(qasm.contains("OPENQASM 2.0;"));
    assert!(qasm.contains("x q[0];"));
    let _ = fs::remove_file(qasm_path);
}

#[test]
fn emit_qasm_duplicates_the_log_to_stdout() {
    let path = temp_file("emit.bloch", "function main() -> void { qubit q; h(q); }");

    let output = bloch().arg(&path).arg("--emit-qasm").output().expect("failed to run bloch");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("OPENQASM 2.0;"));
    assert!(stdout.contains("h q[0];"));
    let _ = fs::remove_file(path.with_extension("qasm"));
}

#[test]
fn failures_print_the_two_line_banner() {
    let path = temp_file("bad.bloch", "function main() -> void { int x = ; }");

    let output = bloch().arg(&path).output().expect("failed to run bloch");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    let mut lines = stderr.lines();
    assert_eq!(lines.next(), Some("[ERROR]: Stopping program execution..."));
    let second = lines.next().unwrap_or_default();
    assert!(second.starts_with("Parse error at "), "got: {}", second);
}

#[test]
fn runtime_failures_use_the_runtime_category() {
    let path = temp_file(
        "measured.bloch",
        "function main() -> void {\n    qubit q;\n    measure q;\n    h(q);\n}\n",
    );

    let output = bloch().arg(&path).output().expect("failed to run bloch");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Runtime error at 4:5:"), "got: {}", stderr);
    let _ = fs::remove_file(path.with_extension("qasm"));
}

#[test]
fn multi_shot_runs_print_the_aggregate_table() {
    let path = temp_file(
        "shots.bloch",
        "@shots(3) function main() -> void { @tracked qubit q; x(q); }",
    );

    let output = bloch().arg(&path).output().expect("failed to run bloch");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Shots: 3"));
    assert!(stdout.contains("Backend: Bloch Ideal Simulator"));
    assert!(stdout.contains("qubit q"));
    assert!(stdout.contains("? | 3 | 1.000"));
    let _ = fs::remove_file(path.with_extension("qasm"));
}

#[test]
fn deprecated_shots_flag_warns_but_works() {
    let path = temp_file(
        "flagshots.bloch",
        "function main() -> void { @tracked qubit q; x(q); }",
    );

    let output = bloch().arg(&path).arg("--shots=2").output().expect("failed to run bloch");
    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("deprecated"));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Shots: 2"));
    let _ = fs::remove_file(path.with_extension("qasm"));
}

#[test]
fn echo_none_suppresses_output() {
    let path = temp_file("quiet.bloch", "function main() -> void { echo(\"loud\"); }");

    let output = bloch().arg(&path).arg("--echo=none").output().expect("failed to run bloch");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!stdout.contains("loud"));
    let _ = fs::remove_file(path.with_extension("qasm"));
}
