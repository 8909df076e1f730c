use bloch::compile_source;
use bloch::error::BlochError;

fn reject(source: &str) -> BlochError {
    match compile_source(source) {
        Ok(_) => panic!("expected a semantic rejection for:\n{}", source),
        Err(e) => e,
    }
}

fn accept(source: &str) {
    if let Err(e) = compile_source(source) {
        panic!("expected acceptance, got {} for:\n{}", e, source);
    }
}

fn assert_semantic(source: &str, needle: &str) {
    let err = reject(source);
    assert_eq!(err.category(), "Semantic", "wrong category for: {}", err);
    assert!(
        err.to_string().contains(needle),
        "expected '{}' in '{}'",
        needle,
        err
    );
}

// ---- annotation rules ----

#[test]
fn quantum_may_not_decorate_main() {
    assert_semantic("@quantum function main() -> void { }", "'main'");
}

#[test]
fn quantum_requires_bit_or_void_return() {
    assert_semantic(
        "@quantum function f() -> int { return 1; } function main() -> void { }",
        "'@quantum'",
    );
    accept("@quantum function f() -> bit { return 0b; } function main() -> void { }");
    accept("@quantum function f() -> void { } function main() -> void { }");
}

#[test]
fn shots_only_on_main_and_positive() {
    assert_semantic(
        "@shots(5) function f() -> void { } function main() -> void { }",
        "'@shots'",
    );
    assert_semantic("@shots(0) function main() -> void { }", "greater than zero");
}

#[test]
fn tracked_only_on_qubits() {
    assert_semantic(
        "function main() -> void { @tracked int x = 1; }",
        "'@tracked'",
    );
    accept("function main() -> void { @tracked qubit q; }");
    accept("function main() -> void { @tracked qubit[2] qs; }");
}

// ---- types ----

#[test]
fn implicit_primitive_conversions_are_rejected() {
    assert_semantic("function main() -> void { int x = 1L; }", "cannot assign");
    assert_semantic("function main() -> void { float f = 1; }", "cannot assign");
    assert_semantic("function main() -> void { bit b = 1; }", "cannot assign");
}

#[test]
fn cast_whitelist_names_source_and_target() {
    assert_semantic(
        "function main() -> void { string s = \"x\"; int i = (int) s; }",
        "cannot cast from 'string' to 'int'",
    );
    assert_semantic(
        "function main() -> void { int i = 1; string s = (string) i; }",
        "cannot cast from 'int' to 'string'",
    );
}

#[test]
fn modulo_requires_integers() {
    assert_semantic("function main() -> void { echo(1.5f % 2f); }", "'%'");
}

#[test]
fn null_only_compares_against_references() {
    assert_semantic(
        "function main() -> void { int x = 1; boolean b = x == null; }",
        "'null'",
    );
    accept(
        "class A { } function main() -> void { A a = null; boolean b = a == null; echo(b); }",
    );
}

#[test]
fn measure_requires_qubits() {
    assert_semantic("function main() -> void { int x = 1; bit b = measure x; }", "'measure'");
}

#[test]
fn destroy_requires_a_reference() {
    assert_semantic("function main() -> void { int x = 1; destroy x; }", "'destroy'");
}

#[test]
fn qubit_arrays_may_not_take_literal_initialisers() {
    assert_semantic(
        "function main() -> void { qubit[] qs = {1b}; }",
        "initialiser",
    );
}

#[test]
fn array_sizes_must_be_compile_time_constants() {
    assert_semantic(
        "function main() -> void { int n = 3; bit[n] xs; }",
        "compile-time constant",
    );
    accept("function main() -> void { final int n = 3; bit[n] xs; echo(xs); }");
}

// ---- scopes ----

#[test]
fn inner_scopes_may_not_shadow() {
    assert_semantic(
        "function main() -> void { int x = 1; { int x = 2; } }",
        "already declared",
    );
}

#[test]
fn function_locals_may_shadow_globals() {
    accept("int x = 1; function main() -> void { int x = 2; echo(x); }");
}

#[test]
fn unknown_variables_are_rejected() {
    assert_semantic("function main() -> void { echo(missing); }", "unknown variable");
}

// ---- classes ----

#[test]
fn override_requires_a_matching_virtual() {
    assert_semantic(
        "class A { public function f() -> int { return 1; } } \
         class B extends A { public override function f() -> int { return 2; } } \
         function main() -> void { }",
        "virtual",
    );
}

#[test]
fn override_must_keep_the_return_type() {
    assert_semantic(
        "class A { public virtual function f() -> int { return 1; } } \
         class B extends A { public override function f() -> long { return 2L; } } \
         function main() -> void { }",
        "return type",
    );
}

#[test]
fn static_methods_cannot_be_virtual() {
    assert_semantic(
        "class A { public static virtual function f() -> void { } } \
         function main() -> void { }",
        "virtual",
    );
}

#[test]
fn abstract_classes_cannot_be_instantiated() {
    assert_semantic(
        "class A { public virtual function f() -> void; } \
         function main() -> void { A a = new A(); }",
        "abstract",
    );
    accept(
        "class A { public virtual function f() -> void; } \
         class B extends A { public override function f() -> void { } } \
         function main() -> void { A a = new B(); a.f(); }",
    );
}

#[test]
fn static_classes_cannot_be_instantiated() {
    assert_semantic(
        "static class M { public static int x = 1; } \
         function main() -> void { M m = new M(); }",
        "static",
    );
}

#[test]
fn static_classes_reject_instance_members() {
    assert_semantic(
        "static class M { public int x; } function main() -> void { }",
        "instance field",
    );
}

#[test]
fn inheritance_cycles_are_rejected() {
    assert_semantic(
        "class A extends B { } class B extends A { } function main() -> void { }",
        "cycle",
    );
}

#[test]
fn duplicate_destructors_are_rejected() {
    assert_semantic(
        "class A { \
             public destructor() -> void { } \
             public destructor() -> void { } \
         } \
         function main() -> void { }",
        "destructor",
    );
}

#[test]
fn private_members_are_invisible_outside_their_class() {
    assert_semantic(
        "class A { int secret; } \
         function main() -> void { A a = new A(); echo(a.secret); }",
        "private",
    );
}

#[test]
fn protected_members_are_visible_to_subclasses() {
    accept(
        "class A { protected int x; } \
         class B extends A { public function get() -> int { return this.x; } } \
         function main() -> void { B b = new B(); echo(b.get()); }",
    );
    assert_semantic(
        "class A { protected int x; } \
         function main() -> void { A a = new A(); echo(a.x); }",
        "protected",
    );
}

#[test]
fn overloads_resolve_most_specific_and_reject_missing() {
    accept(
        "class A { \
             public function f(int x) -> int { return 1; } \
             public function f(float x) -> int { return 2; } \
         } \
         function main() -> void { A a = new A(); echo(a.f(1)); }",
    );
    assert_semantic(
        "class A { public function f(int x) -> int { return 1; } } \
         function main() -> void { A a = new A(); echo(a.f(\"text\")); }",
        "no overload",
    );
}

#[test]
fn duplicate_method_signatures_are_rejected() {
    assert_semantic(
        "class A { \
             public function f(int x) -> void { } \
             public function f(int y) -> void { } \
         } \
         function main() -> void { }",
        "duplicate method",
    );
}

// ---- final fields ----

#[test]
fn final_static_fields_need_declaration_initialisers() {
    assert_semantic(
        "class A { public static final int X; } function main() -> void { }",
        "final static",
    );
}

#[test]
fn final_instance_fields_are_single_assignment() {
    accept(
        "class A { \
             public final int x; \
             public constructor() -> A { this.x = 1; return this; } \
         } \
         function main() -> void { A a = new A(); echo(a.x); }",
    );
    // assigned on only one branch
    assert_semantic(
        "class A { \
             public final int x; \
             public constructor(boolean flag) -> A { \
                 if (flag) { this.x = 1; } \
                 return this; \
             } \
         } \
         function main() -> void { }",
        "exactly once",
    );
    // initialised at declaration and assigned again
    assert_semantic(
        "class A { \
             public final int x = 1; \
             public constructor() -> A { this.x = 2; return this; } \
         } \
         function main() -> void { }",
        "final",
    );
}

#[test]
fn derived_constructors_may_not_assign_inherited_finals() {
    assert_semantic(
        "class A { \
             public final int x; \
             public constructor() -> A { this.x = 1; return this; } \
         } \
         class B extends A { \
             public constructor() -> B { super(); this.x = 2; return this; } \
         } \
         function main() -> void { }",
        "final",
    );
}

#[test]
fn final_locals_cannot_be_reassigned() {
    assert_semantic(
        "function main() -> void { final int x = 1; x = 2; }",
        "final",
    );
}

// ---- generics ----

#[test]
fn generic_bounds_are_enforced() {
    assert_semantic(
        "class Base { } \
         class Box<T extends Base> { public T v; } \
         class Other { } \
         function main() -> void { Box<Other> b = new Box<Other>(); }",
        "bound",
    );
    accept(
        "class Base { } \
         class Sub extends Base { } \
         class Box<T extends Base> { public T v; } \
         function main() -> void { Box<Sub> b = new Box<Sub>(); destroy b; }",
    );
}

#[test]
fn generic_arity_is_checked() {
    assert_semantic(
        "class Box<T> { public T v; } \
         function main() -> void { Box<int, int> b = null; }",
        "type argument",
    );
}

// ---- functions ----

#[test]
fn gate_names_are_reserved() {
    assert_semantic(
        "function h(int x) -> void { } function main() -> void { }",
        "built-in gate",
    );
}

#[test]
fn function_calls_match_by_arity() {
    assert_semantic(
        "function f(int x) -> void { } function main() -> void { f(1, 2); }",
        "argument",
    );
}

#[test]
fn constructors_can_only_return_this() {
    assert_semantic(
        "class A { public constructor() -> A { return null; } } \
         function main() -> void { }",
        "return this",
    );
}
