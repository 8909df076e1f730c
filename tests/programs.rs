use bloch::error::BlochError;
use bloch::{run_source, RunOutcome};

fn run_ok(source: &str) -> RunOutcome {
    match run_source(source) {
        Ok(outcome) => outcome,
        Err(e) => panic!("program failed: {}\nsource:\n{}", e, source),
    }
}

fn run_err(source: &str) -> BlochError {
    match run_source(source) {
        Ok(_) => panic!("expected a failure for:\n{}", source),
        Err(e) => e,
    }
}

// ---- the end-to-end scenarios ----

#[test]
fn classical_integer_arithmetic() {
    let outcome = run_ok("function main() -> void { int a = 2 + 3; echo(a); }");
    assert_eq!(outcome.echoes, ["5"]);
}

#[test]
fn coin_flip_counting_with_x_gate() {
    let outcome = run_ok(
        "@quantum function flip() -> bit { qubit q; x(q); bit r = measure q; return r; } \
         function main() -> void { \
             int heads = 0; \
             for (int i = 0; i < 10; i = i + 1) { \
                 bit b = flip(); \
                 if (b == 1) { heads = heads + 1; } \
             } \
             echo(heads); \
         }",
    );
    assert_eq!(outcome.echoes, ["10"]);
}

#[test]
fn echo_concatenation() {
    let outcome = run_ok(
        "function main() -> void { bit b = 1b; echo(\"Measured: \" + b); echo(5 + 5); }",
    );
    assert_eq!(outcome.echoes, ["Measured: 1", "10"]);
}

#[test]
fn tracked_shots_aggregate() {
    let outcome = run_ok("@shots(3) function main() -> void { @tracked qubit q; x(q); }");
    assert_eq!(outcome.shots, 3);
    let report = outcome.tracked.render(outcome.shots, outcome.elapsed);
    assert!(report.contains("Shots: 3"));
    assert!(report.contains("qubit q"));
    assert!(report.contains("? | 3 | 1.000"));
}

#[test]
fn gate_after_measure_fails_at_the_gate() {
    let err = run_err("function main() -> void {\n    qubit q;\n    measure q;\n    h(q);\n}");
    assert_eq!(err.category(), "Runtime");
    assert_eq!(err.line(), 4);
    assert_eq!(err.col(), 5);
}

#[test]
fn generic_instantiation() {
    let outcome = run_ok(
        "class Box<T> { \
             public T v; \
             public constructor(T v) -> Box<T> { this.v = v; return this; } \
             public function get() -> T { return this.v; } \
         } \
         function main() -> void { Box<int> b = new Box<int>(1); echo(b.get()); }",
    );
    assert_eq!(outcome.echoes, ["1"]);
}

// ---- property laws ----

#[test]
fn classical_programs_are_deterministic() {
    let source = "function main() -> void { \
        int total = 0; \
        for (int i = 0; i < 5; i = i + 1) { total = total + i * i; } \
        echo(\"total: \" + total); \
    }";
    let first = run_ok(source);
    let second = run_ok(source);
    assert_eq!(first.echoes, second.echoes);
    assert_eq!(first.qasm, second.qasm);
}

#[test]
fn qasm_log_is_complete_and_ordered() {
    let outcome = run_ok(
        "function main() -> void { \
             qubit a, b; \
             h(a); \
             cx(a, b); \
             x(b); \
             measure b; \
             reset a; \
         }",
    );
    let expected = "OPENQASM 2.0;\n\
                    include \"qelib1.inc\";\n\
                    qreg q[2];\n\
                    creg c[2];\n\
                    h q[0];\n\
                    cx q[0], q[1];\n\
                    x q[1];\n\
                    measure q[1] -> c[1];\n\
                    reset q[0];\n";
    assert_eq!(outcome.qasm, expected);
}

#[test]
fn qasm_is_written_even_without_quantum_operations() {
    let outcome = run_ok("function main() -> void { echo(1); }");
    assert_eq!(outcome.qasm, "OPENQASM 2.0;\ninclude \"qelib1.inc\";\n");
}

#[test]
fn measurement_flag_persists_without_reset() {
    let err = run_err(
        "function main() -> void { qubit q; bit a = measure q; bit b = measure q; }",
    );
    assert_eq!(err.category(), "Runtime");

    // A reset in between makes the second measurement legal
    run_ok("function main() -> void { qubit q; bit a = measure q; reset q; bit b = measure q; }");
}

#[test]
fn acyclic_objects_all_release() {
    let outcome = run_ok(
        "class Node { public Node next; } \
         function main() -> void { \
             Node a = new Node(); \
             Node b = new Node(); \
             a.next = b; \
         }",
    );
    assert_eq!(outcome.leaked_objects, 0);
}

#[test]
fn reference_cycles_are_reclaimed_by_shutdown() {
    let outcome = run_ok(
        "class Node { public Node next; } \
         function main() -> void { \
             Node a = new Node(); \
             Node b = new Node(); \
             a.next = b; \
             b.next = a; \
         }",
    );
    assert_eq!(outcome.leaked_objects, 0);
}

#[test]
fn destructors_run_in_derived_before_base_order() {
    let outcome = run_ok(
        "class Base { \
             public destructor() -> void { echo(\"base gone\"); } \
         } \
         class Derived extends Base { \
             public destructor() -> void { echo(\"derived gone\"); } \
         } \
         function main() -> void { Base d = new Derived(); }",
    );
    assert_eq!(outcome.echoes, ["derived gone", "base gone"]);
}

#[test]
fn override_binds_to_the_runtime_class() {
    let outcome = run_ok(
        "class Animal { \
             public virtual function speak() -> string { return \"...\"; } \
         } \
         class Dog extends Animal { \
             public override function speak() -> string { return \"woof\"; } \
         } \
         function main() -> void { \
             Animal pet = new Dog(); \
             echo(pet.speak()); \
         }",
    );
    assert_eq!(outcome.echoes, ["woof"]);
}

#[test]
fn tracked_bindings_record_once_per_shot() {
    let outcome = run_ok(
        "@shots(4) function main() -> void { @tracked qubit q; x(q); bit r = measure q; }",
    );
    let counts = outcome.tracked.counts("qubit q").expect("tracked rows");
    assert_eq!(counts.get("1"), Some(&4));
    assert_eq!(counts.values().sum::<u64>(), 4);
}

// ---- language behaviour ----

#[test]
fn division_always_produces_float() {
    let outcome = run_ok("function main() -> void { echo(10 / 4); echo(8 / 2); }");
    assert_eq!(outcome.echoes, ["2.5", "4.0"]);
}

#[test]
fn float_echo_always_shows_a_fraction() {
    let outcome = run_ok("function main() -> void { float x = 3f; echo(x); echo(3.25f); }");
    assert_eq!(outcome.echoes, ["3.0", "3.25"]);
}

#[test]
fn boolean_and_bit_echo_formats() {
    let outcome = run_ok(
        "function main() -> void { boolean t = true; bit b = 0b; echo(t); echo(b); }",
    );
    assert_eq!(outcome.echoes, ["true", "0"]);
}

#[test]
fn arrays_echo_with_braces() {
    let outcome = run_ok(
        "function main() -> void { int[] xs = {1, 2, 3}; echo(xs); echo(xs[1]); }",
    );
    assert_eq!(outcome.echoes, ["{1, 2, 3}", "2"]);
}

#[test]
fn fixed_size_arrays_use_const_sizes() {
    let outcome = run_ok(
        "function main() -> void { \
             final int n = 3; \
             bit[n] flags; \
             flags[2] = 1b; \
             echo(flags); \
         }",
    );
    assert_eq!(outcome.echoes, ["{0, 0, 1}"]);
}

#[test]
fn computed_negative_index_fails_at_runtime() {
    let err = run_err(
        "function main() -> void { int[] xs = {1, 2}; int i = 0 - 1; echo(xs[i]); }",
    );
    assert_eq!(err.category(), "Runtime");
    assert!(err.to_string().contains("negative"));
}

#[test]
fn out_of_bounds_index_fails() {
    let err = run_err("function main() -> void { int[] xs = {1, 2}; echo(xs[5]); }");
    assert_eq!(err.category(), "Runtime");
    assert!(err.to_string().contains("out of bounds"));
}

#[test]
fn division_by_zero_fails() {
    let err = run_err("function main() -> void { int z = 0; echo(1 / z); }");
    assert_eq!(err.category(), "Runtime");
}

#[test]
fn modulo_by_zero_fails() {
    let err = run_err("function main() -> void { int z = 0; echo(1 % z); }");
    assert_eq!(err.category(), "Runtime");
}

#[test]
fn null_member_access_fails() {
    let err = run_err(
        "class A { public int x; } \
         function main() -> void { A a = null; echo(a.x); }",
    );
    assert_eq!(err.category(), "Runtime");
    assert!(err.to_string().contains("null"));
}

#[test]
fn destroy_null_is_a_no_op_but_double_destroy_fails() {
    run_ok(
        "class A { } \
         function main() -> void { A a = null; destroy a; }",
    );
    let err = run_err(
        "class A { } \
         function main() -> void { A a = new A(); destroy a; destroy a; }",
    );
    assert_eq!(err.category(), "Runtime");
    assert!(err.to_string().contains("destroyed"));
}

#[test]
fn destroy_runs_the_destructor_immediately() {
    let outcome = run_ok(
        "class A { public destructor() -> void { echo(\"gone\"); } } \
         function main() -> void { A a = new A(); destroy a; echo(\"after\"); }",
    );
    assert_eq!(outcome.echoes, ["gone", "after"]);
}

#[test]
fn super_chains_constructors() {
    let outcome = run_ok(
        "class Base { \
             public int x; \
             public constructor(int x) -> Base { this.x = x; return this; } \
         } \
         class Derived extends Base { \
             public constructor() -> Derived { super(41); return this; } \
             public function value() -> int { return this.x + 1; } \
         } \
         function main() -> void { Derived d = new Derived(); echo(d.value()); }",
    );
    assert_eq!(outcome.echoes, ["42"]);
}

#[test]
fn default_constructor_assigns_matching_fields() {
    let outcome = run_ok(
        "class Point { \
             public int x; \
             public int y; \
             public constructor(int x, int y) -> Point = default; \
         } \
         function main() -> void { Point p = new Point(3, 4); echo(p.x + p.y); }",
    );
    assert_eq!(outcome.echoes, ["7"]);
}

#[test]
fn static_members_are_shared_through_the_class() {
    let outcome = run_ok(
        "static class Counter { \
             public static int count = 0; \
             public static function bump() -> void { Counter.count = Counter.count + 1; } \
         } \
         function main() -> void { \
             Counter.bump(); \
             Counter.bump(); \
             echo(Counter.count); \
         }",
    );
    assert_eq!(outcome.echoes, ["2"]);
}

#[test]
fn ternary_statement_picks_a_branch() {
    let outcome = run_ok(
        "function main() -> void { int a = 0; int b = 1; b == 1 ? a = 10 : a = 20; echo(a); }",
    );
    assert_eq!(outcome.echoes, ["10"]);
}

#[test]
fn casts_convert_between_numeric_kinds() {
    let outcome = run_ok(
        "function main() -> void { \
             float f = 3.9f; \
             int i = (int) f; \
             long l = (long) i; \
             bit b = (bit) 1; \
             echo(i); echo(l); echo(b); \
         }",
    );
    assert_eq!(outcome.echoes, ["3", "3", "1"]);
}

#[test]
fn postfix_increment_returns_the_old_value() {
    let outcome = run_ok(
        "function main() -> void { int i = 5; echo(i++); echo(i); i--; echo(i); }",
    );
    assert_eq!(outcome.echoes, ["5", "6", "5"]);
}

#[test]
fn measured_qubit_array_tracks_bit_string() {
    let outcome = run_ok(
        "@shots(2) function main() -> void { \
             @tracked qubit[2] qs; \
             x(qs[1]); \
             measure qs; \
         }",
    );
    let counts = outcome.tracked.counts("qubit[2] qs").expect("tracked rows");
    assert_eq!(counts.get("01"), Some(&2));
}

#[test]
fn free_statements_run_before_main() {
    let outcome = run_ok(
        "int seed = 41; \
         function main() -> void { echo(seed + 1); }",
    );
    assert_eq!(outcome.echoes, ["42"]);
}

#[test]
fn bitwise_operators_work_elementwise() {
    let outcome = run_ok(
        "function main() -> void { \
             bit a = 1b; bit b = 0b; \
             echo(a & b); echo(a | b); echo(a ^ a); echo(~b); \
             bit[] xs = {1b, 0b}; bit[] ys = {1b, 1b}; \
             echo(xs & ys); \
         }",
    );
    assert_eq!(outcome.echoes, ["0", "1", "0", "1", "{1, 0}"]);
}

#[test]
fn shots_annotation_wins_and_each_shot_is_fresh() {
    // The qubit index restarts at q[0] every shot: the evaluator and the
    // simulator are rebuilt per shot
    let outcome = run_ok("@shots(3) function main() -> void { qubit q; x(q); }");
    assert_eq!(outcome.shots, 3);
    assert!(outcome.qasm.contains("qreg q[1];"));
}
