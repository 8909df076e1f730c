use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use crate::ast::*;
use crate::error::{BlochError, Result};
use crate::runtime::collector::{find_victims, CycleCollector};
use crate::runtime::env::{EnvStack, Slot};
use crate::runtime::heap::{DecOutcome, Heap};
use crate::runtime::tracker::OutcomeTracker;
use crate::runtime::value::{ObjId, Value};
use crate::semantics::analyzer::{is_gate_name, Analysis, CallTarget};
use crate::semantics::registry::{ClassInfo, CtorInfo, MethodInfo};
use crate::semantics::types::TypeDesc;
use crate::simulator::Simulator;

const MAX_CALL_DEPTH: usize = 2048;

/// What one shot produced.
pub struct ShotOutcome {
    pub echoes: Vec<String>,
    pub qasm: String,
    /// Objects still alive after shutdown; zero unless something leaked.
    pub leaked_objects: usize,
}

enum Flow {
    Normal,
    Return(Value),
}

/// Tree-walking interpreter for one shot. Owns the environment stack, the
/// heap, the simulator and the tracked-outcome registry; the cycle sweep
/// thread is started lazily on the first class instantiation and joined
/// deterministically at shutdown.
pub struct Evaluator {
    analysis: Rc<Analysis>,
    functions: HashMap<String, Rc<FunctionDecl>>,
    free_statements: Vec<Stmt>,
    class_decls: Vec<String>,
    env: EnvStack,
    heap: Arc<Heap>,
    sim: Simulator,
    tracker: OutcomeTracker,
    collector: Option<CycleCollector>,
    statics: HashMap<(String, String), Value>,
    static_order: Vec<(String, String)>,
    class_stack: Vec<Rc<ClassInfo>>,
    echoes: Vec<String>,
    echo_live: bool,
    depth: usize,
}

impl Evaluator {
    pub fn new(program: &Program, analysis: Rc<Analysis>, echo_live: bool) -> Self {
        let functions = program
            .functions
            .iter()
            .map(|f| (f.name.clone(), Rc::new(f.clone())))
            .collect();
        Self {
            analysis,
            functions,
            free_statements: program.statements.clone(),
            class_decls: program.classes.iter().map(|c| c.name.clone()).collect(),
            env: EnvStack::new(),
            heap: Arc::new(Heap::new()),
            sim: Simulator::new(),
            tracker: OutcomeTracker::new(),
            collector: None,
            statics: HashMap::new(),
            static_order: Vec::new(),
            class_stack: Vec::new(),
            echoes: Vec::new(),
            echo_live,
            depth: 0,
        }
    }

    pub fn set_gate_logging(&mut self, enabled: bool) {
        self.sim.set_logging(enabled);
    }

    pub fn heap_object_count(&self) -> usize {
        self.heap.live_object_count()
    }

    /// Runs one shot to completion. Shutdown (scope unwinding, collector
    /// join, final sweep) happens on both the success and the error path, so
    /// destructors and tracked recordings always fire.
    pub fn run(mut self) -> (Result<ShotOutcome>, OutcomeTracker) {
        let executed = self.execute();
        let cleaned = self.shutdown();
        let result = executed.and(cleaned).map(|_| ShotOutcome {
            echoes: std::mem::take(&mut self.echoes),
            qasm: self.sim.qasm(),
            leaked_objects: self.heap.live_object_count(),
        });
        (result, std::mem::take(&mut self.tracker))
    }

    fn execute(&mut self) -> Result<()> {
        self.init_statics()?;

        let free_statements = std::mem::take(&mut self.free_statements);
        for stmt in &free_statements {
            if let Flow::Return(value) = self.exec_stmt(stmt)? {
                self.release_value(value)?;
            }
            self.maybe_collect()?;
        }
        self.free_statements = free_statements;

        let main = self.functions.get("main").cloned().ok_or_else(|| {
            BlochError::runtime(Span::default(), "no 'main' function to run")
        })?;
        let result = self.call_user_function(&main, Vec::new())?;
        self.release_value(result)?;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        let mut first_error: Option<BlochError> = None;
        let mut note = |r: Result<()>, first: &mut Option<BlochError>| {
            if let Err(e) = r {
                first.get_or_insert(e);
            }
        };

        let globals = self.env.pop_globals();
        note(self.release_slots(globals), &mut first_error);

        for key in std::mem::take(&mut self.static_order).into_iter().rev() {
            if let Some(value) = self.statics.remove(&key) {
                note(self.release_value(value), &mut first_error);
            }
        }

        // Join the sweep before aggregating tracked outcomes so
        // reclamation-time recordings are included
        if let Some(collector) = self.collector.take() {
            let victims = collector.shutdown();
            note(self.destroy_victims(victims), &mut first_error);
        }
        let victims = find_victims(&self.heap.snapshot());
        note(self.destroy_victims(victims), &mut first_error);

        // Anything still live is released at program termination
        let mut fuel = self.heap.live_object_count().saturating_mul(2) + 8;
        while self.heap.live_object_count() > 0 && fuel > 0 {
            for id in self.heap.live_objects() {
                note(self.destroy_object(id), &mut first_error);
            }
            fuel -= 1;
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn init_statics(&mut self) -> Result<()> {
        for class_name in self.class_decls.clone() {
            let info = self.analysis.registry.template_info(&class_name, Span::default())?;
            for field in info.statics.clone() {
                let key = (info.decl_name.clone(), field.name.clone());
                let zero = self.zero_value(&field.ty)?;
                self.statics.insert(key.clone(), zero);
                self.static_order.push(key.clone());
                if let Some(init) = &field.init {
                    self.class_stack.push(info.clone());
                    let value = self.eval(init);
                    self.class_stack.pop();
                    let value = value?;
                    if let Some(old) = self.statics.insert(key, value) {
                        self.release_value(old)?;
                    }
                }
            }
        }
        Ok(())
    }

    // ---- statements ----

    fn exec_block(&mut self, stmts: &[Stmt]) -> Result<Flow> {
        self.env.push_scope();
        let mut outcome: Result<Flow> = Ok(Flow::Normal);
        for stmt in stmts {
            match self.exec_stmt(stmt) {
                Ok(Flow::Normal) => {}
                Ok(flow) => {
                    outcome = Ok(flow);
                    break;
                }
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
            if let Err(e) = self.maybe_collect() {
                outcome = Err(e);
                break;
            }
        }
        let slots = self.env.pop_scope();
        let released = self.release_slots(slots);
        match (outcome, released) {
            (Ok(flow), Ok(())) => Ok(flow),
            (Err(e), _) => Err(e),
            (_, Err(e)) => Err(e),
        }
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Flow> {
        match &stmt.kind {
            StmtKind::VarDecl { tracked, ty, name, init, .. } => {
                let desc = self.runtime_type(ty)?;
                let value = match init {
                    Some(expr) => self.eval(expr)?,
                    None => self.zero_value(&desc)?,
                };
                let heading = tracked.then(|| format!("{} {}", ty.display(), name));
                self.env.declare(name, value, heading);
                Ok(Flow::Normal)
            }
            StmtKind::Block(stmts) => self.exec_block(stmts),
            StmtKind::Expr(expr) => {
                let value = self.eval(expr)?;
                self.release_value(value)?;
                Ok(Flow::Normal)
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Void,
                };
                Ok(Flow::Return(value))
            }
            StmtKind::If { cond, then_branch, else_branch } => {
                let test = self.eval(cond)?;
                let truthy = test.truthy();
                self.release_value(test)?;
                if truthy {
                    self.exec_scoped(then_branch)
                } else if let Some(branch) = else_branch {
                    self.exec_scoped(branch)
                } else {
                    Ok(Flow::Normal)
                }
            }
            StmtKind::While { cond, body } => {
                loop {
                    let test = self.eval(cond)?;
                    let truthy = test.truthy();
                    self.release_value(test)?;
                    if !truthy {
                        break;
                    }
                    if let Flow::Return(v) = self.exec_scoped(body)? {
                        return Ok(Flow::Return(v));
                    }
                    self.maybe_collect()?;
                }
                Ok(Flow::Normal)
            }
            StmtKind::For { init, cond, step, body } => {
                self.env.push_scope();
                let outcome = self.exec_for(init, cond, step, body);
                let slots = self.env.pop_scope();
                let released = self.release_slots(slots);
                match (outcome, released) {
                    (Ok(flow), Ok(())) => Ok(flow),
                    (Err(e), _) => Err(e),
                    (_, Err(e)) => Err(e),
                }
            }
            StmtKind::Echo(expr) => {
                let value = self.eval(expr)?;
                let text = self.format_value(&value);
                self.release_value(value)?;
                if self.echo_live {
                    println!("{}", text);
                }
                self.echoes.push(text);
                Ok(Flow::Normal)
            }
            StmtKind::Reset(expr) => {
                let value = self.eval(expr)?;
                match &value {
                    Value::Qubit(q) => self.sim.reset(*q),
                    Value::Array(id) => {
                        for item in self.heap.array_items(*id) {
                            if let Value::Qubit(q) = item {
                                self.sim.reset(q);
                            }
                        }
                    }
                    _ => {}
                }
                self.release_value(value)?;
                Ok(Flow::Normal)
            }
            StmtKind::MeasureStmt(expr) => {
                let value = self.eval(expr)?;
                let result = self.do_measure(&value, stmt.span);
                self.release_value(value)?;
                self.release_value(result?)?;
                Ok(Flow::Normal)
            }
            StmtKind::Destroy(expr) => {
                let value = self.eval(expr)?;
                let target = match &value {
                    Value::Object(id) => Some(*id),
                    _ => None,
                };
                if let Some(id) = target {
                    if self.heap.is_destroyed(id) {
                        self.release_value(value)?;
                        return Err(BlochError::runtime(
                            stmt.span,
                            "object has already been destroyed",
                        ));
                    }
                    self.destroy_object(id)?;
                }
                self.release_value(value)?;
                Ok(Flow::Normal)
            }
            StmtKind::Ternary { cond, then_branch, else_branch } => {
                let test = self.eval(cond)?;
                let truthy = test.truthy();
                self.release_value(test)?;
                if truthy {
                    self.exec_scoped(then_branch)
                } else {
                    self.exec_scoped(else_branch)
                }
            }
        }
    }

    /// Non-block branch bodies still get their own scope.
    fn exec_scoped(&mut self, stmt: &Stmt) -> Result<Flow> {
        match &stmt.kind {
            StmtKind::Block(stmts) => self.exec_block(stmts),
            _ => self.exec_block(std::slice::from_ref(stmt)),
        }
    }

    fn exec_for(
        &mut self,
        init: &Option<Box<Stmt>>,
        cond: &Option<Expr>,
        step: &Option<Box<Stmt>>,
        body: &Stmt,
    ) -> Result<Flow> {
        if let Some(stmt) = init {
            if let Flow::Return(v) = self.exec_stmt(stmt)? {
                return Ok(Flow::Return(v));
            }
        }
        loop {
            if let Some(cond) = cond {
                let test = self.eval(cond)?;
                let truthy = test.truthy();
                self.release_value(test)?;
                if !truthy {
                    break;
                }
            }
            if let Flow::Return(v) = self.exec_scoped(body)? {
                return Ok(Flow::Return(v));
            }
            if let Some(stmt) = step {
                if let Flow::Return(v) = self.exec_stmt(stmt)? {
                    return Ok(Flow::Return(v));
                }
            }
            self.maybe_collect()?;
        }
        Ok(Flow::Normal)
    }

    // ---- expressions ----

    fn eval(&mut self, expr: &Expr) -> Result<Value> {
        match &expr.kind {
            ExprKind::Literal(lit) => Ok(match lit {
                Literal::Int(n) => Value::Int(*n),
                Literal::Long(n) => Value::Long(*n),
                Literal::Float(f) => Value::Float(*f),
                Literal::Bit(b) => Value::Bit(*b),
                Literal::Boolean(b) => Value::Boolean(*b),
                Literal::Char(c) => Value::Char(*c),
                Literal::Str(s) => Value::Str(s.clone()),
            }),
            ExprKind::Null => Ok(Value::Null),
            ExprKind::This => {
                let value = self.env.get("this").ok_or_else(|| {
                    BlochError::runtime(expr.span, "'this' is not bound here")
                })?;
                self.heap.retain(&value);
                Ok(value)
            }
            ExprKind::Variable(name) => self.eval_variable(expr.span, name),
            ExprKind::Binary { op, lhs, rhs } => self.eval_binary(expr.span, *op, lhs, rhs),
            ExprKind::Unary { op, operand } => {
                let value = self.eval(operand)?;
                self.eval_unary(expr.span, *op, value)
            }
            ExprKind::Postfix { op, target } => {
                let old = self.eval(target)?;
                let new = match (&old, op) {
                    (Value::Int(n), PostfixOp::Increment) => Value::Int(n + 1),
                    (Value::Int(n), PostfixOp::Decrement) => Value::Int(n - 1),
                    (Value::Long(n), PostfixOp::Increment) => Value::Long(n + 1),
                    (Value::Long(n), PostfixOp::Decrement) => Value::Long(n - 1),
                    _ => {
                        return Err(BlochError::runtime(
                            expr.span,
                            format!("'++'/'--' need an integer target, got '{}'", old.kind_name()),
                        ));
                    }
                };
                let stored = self.store_into(target, new)?;
                self.release_value(stored)?;
                Ok(old)
            }
            ExprKind::Cast { target, operand } => {
                let value = self.eval(operand)?;
                self.eval_cast(expr.span, *target, value)
            }
            ExprKind::Call { name, args } => self.eval_call(expr, name, args),
            ExprKind::MethodCall { recv, name, args } => self.eval_method_call(expr, recv, name, args),
            ExprKind::SuperCall { method, args } => self.eval_super_call(expr, method.as_deref(), args),
            ExprKind::Index { target, index } => {
                let array = self.eval(target)?;
                let index_value = self.eval(index)?;
                let result = self.index_read(expr.span, &array, &index_value);
                self.release_value(array)?;
                result
            }
            ExprKind::Member { target, name } => self.eval_member(expr, target, name),
            ExprKind::Assign { target, value } => {
                let new = self.eval(value)?;
                self.heap.retain(&new); // assignment is also an expression
                let result = new.clone();
                let stored = self.store_into(target, new)?;
                self.release_value(stored)?;
                Ok(result)
            }
            ExprKind::ArrayLiteral(elements) => {
                let mut items = Vec::with_capacity(elements.len());
                for element in elements {
                    items.push(self.eval(element)?);
                }
                Ok(Value::Array(self.heap.alloc_array(items)))
            }
            ExprKind::Measure(operand) => {
                let value = self.eval(operand)?;
                let result = self.do_measure(&value, expr.span);
                self.release_value(value)?;
                result
            }
            ExprKind::New { class, type_args, args } => self.eval_new(expr, class, type_args, args),
        }
    }

    fn eval_variable(&mut self, span: Span, name: &str) -> Result<Value> {
        if let Some(value) = self.env.get(name) {
            self.heap.retain(&value);
            return Ok(value);
        }
        // Bare member access inside a class body
        if let Some(Value::Object(id)) = self.env.get("this") {
            let info = self.obj_info(span, id)?;
            if let Some((declaring, field)) = self.analysis.registry.find_field(&info, name) {
                if field.is_static {
                    return self.static_read(span, &declaring.decl_name, name);
                }
                let value = self.heap.get_field(id, field.slot).ok_or_else(|| {
                    BlochError::runtime(span, "member access on a destroyed object")
                })?;
                self.heap.retain(&value);
                return Ok(value);
            }
        }
        if let Some(class) = self.class_stack.last().cloned() {
            if let Some((declaring, field)) = self.analysis.registry.find_field(&class, name) {
                if field.is_static {
                    return self.static_read(span, &declaring.decl_name, name);
                }
            }
        }
        Err(BlochError::runtime(span, format!("unknown variable '{}'", name)))
    }

    fn static_read(&mut self, span: Span, class: &str, field: &str) -> Result<Value> {
        let value = self
            .statics
            .get(&(class.to_string(), field.to_string()))
            .cloned()
            .ok_or_else(|| {
                BlochError::runtime(span, format!("static field '{}.{}' is not initialised", class, field))
            })?;
        self.heap.retain(&value);
        Ok(value)
    }

    fn eval_binary(&mut self, span: Span, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<Value> {
        // Logical operators short-circuit
        if matches!(op, BinaryOp::And | BinaryOp::Or) {
            let left = self.eval(lhs)?;
            let left_true = left.truthy();
            self.release_value(left)?;
            let skip = match op {
                BinaryOp::And => !left_true,
                _ => left_true,
            };
            if skip {
                return Ok(Value::Boolean(left_true));
            }
            let right = self.eval(rhs)?;
            let right_true = right.truthy();
            self.release_value(right)?;
            return Ok(Value::Boolean(right_true));
        }

        let left = self.eval(lhs)?;
        let right = self.eval(rhs)?;
        let result = self.binary_values(span, op, &left, &right);
        self.release_value(left)?;
        self.release_value(right)?;
        result
    }

    fn binary_values(&mut self, span: Span, op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
        use BinaryOp::*;

        if op == Add && (matches!(left, Value::Str(_)) || matches!(right, Value::Str(_))) {
            let mut text = self.format_value(left);
            text.push_str(&self.format_value(right));
            return Ok(Value::Str(text));
        }

        match op {
            Add | Sub | Mul => {
                if let (Some(a), Some(b)) = (as_f64(left), as_f64(right)) {
                    if matches!(left, Value::Float(_)) || matches!(right, Value::Float(_)) {
                        let value = match op {
                            Add => a + b,
                            Sub => a - b,
                            _ => a * b,
                        };
                        return Ok(Value::Float(value));
                    }
                    let (a, b) = (a as i64, b as i64);
                    let value = match op {
                        Add => a.wrapping_add(b),
                        Sub => a.wrapping_sub(b),
                        _ => a.wrapping_mul(b),
                    };
                    return Ok(if matches!(left, Value::Long(_)) || matches!(right, Value::Long(_)) {
                        Value::Long(value)
                    } else {
                        Value::Int(value)
                    });
                }
                Err(BlochError::runtime(
                    span,
                    format!("operator '{}' cannot combine '{}' and '{}'", op.symbol(), left.kind_name(), right.kind_name()),
                ))
            }
            Div => {
                let (Some(a), Some(b)) = (as_f64(left), as_f64(right)) else {
                    return Err(BlochError::runtime(span, "operator '/' requires numeric operands"));
                };
                if b == 0.0 {
                    return Err(BlochError::runtime(span, "division by zero"));
                }
                Ok(Value::Float(a / b))
            }
            Mod => {
                let (Some(a), Some(b)) = (as_i64(left), as_i64(right)) else {
                    return Err(BlochError::runtime(span, "operator '%' requires integer operands"));
                };
                if b == 0 {
                    return Err(BlochError::runtime(span, "modulo by zero"));
                }
                let value = a % b;
                Ok(if matches!(left, Value::Long(_)) || matches!(right, Value::Long(_)) {
                    Value::Long(value)
                } else {
                    Value::Int(value)
                })
            }
            Eq | NotEq => {
                let equal = values_equal(left, right);
                Ok(Value::Boolean(if op == Eq { equal } else { !equal }))
            }
            Less | LessEq | Greater | GreaterEq => {
                let (Some(a), Some(b)) = (as_f64(left), as_f64(right)) else {
                    return Err(BlochError::runtime(span, "comparison requires numeric operands"));
                };
                Ok(Value::Boolean(match op {
                    Less => a < b,
                    LessEq => a <= b,
                    Greater => a > b,
                    _ => a >= b,
                }))
            }
            BitAnd | BitOr | BitXor => self.bitwise(span, op, left, right),
            And | Or => unreachable!("short-circuit operators are handled by eval_binary"),
        }
    }

    fn bitwise(&mut self, span: Span, op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
        let apply = |a: u8, b: u8| match op {
            BinaryOp::BitAnd => a & b,
            BinaryOp::BitOr => a | b,
            _ => a ^ b,
        };
        match (left, right) {
            (Value::Bit(a), Value::Bit(b)) => Ok(Value::Bit(apply(*a, *b))),
            (Value::Array(l), Value::Array(r)) => {
                let lhs = self.heap.array_items(*l);
                let rhs = self.heap.array_items(*r);
                if lhs.len() != rhs.len() {
                    return Err(BlochError::runtime(
                        span,
                        format!("bit arrays of different lengths ({} and {})", lhs.len(), rhs.len()),
                    ));
                }
                let mut items = Vec::with_capacity(lhs.len());
                for (a, b) in lhs.iter().zip(rhs.iter()) {
                    match (a, b) {
                        (Value::Bit(a), Value::Bit(b)) => items.push(Value::Bit(apply(*a, *b))),
                        _ => {
                            return Err(BlochError::runtime(
                                span,
                                format!("operator '{}' requires bit arrays", op.symbol()),
                            ));
                        }
                    }
                }
                Ok(Value::Array(self.heap.alloc_array(items)))
            }
            _ => Err(BlochError::runtime(
                span,
                format!("operator '{}' requires bit or bit[] operands", op.symbol()),
            )),
        }
    }

    fn eval_unary(&mut self, span: Span, op: UnaryOp, value: Value) -> Result<Value> {
        enum Plan {
            Done(Value),
            FlipArray(usize),
            Invalid(String),
        }
        let plan = match (op, &value) {
            (UnaryOp::Neg, Value::Int(n)) => Plan::Done(Value::Int(-n)),
            (UnaryOp::Neg, Value::Long(n)) => Plan::Done(Value::Long(-n)),
            (UnaryOp::Neg, Value::Float(f)) => Plan::Done(Value::Float(-f)),
            (UnaryOp::Not, Value::Boolean(b)) => Plan::Done(Value::Boolean(!b)),
            (UnaryOp::BitNot, Value::Bit(b)) => Plan::Done(Value::Bit(1 - b)),
            (UnaryOp::BitNot, Value::Array(id)) => Plan::FlipArray(*id),
            _ => Plan::Invalid(value.kind_name().to_string()),
        };
        match plan {
            Plan::Done(result) => Ok(result),
            Plan::FlipArray(id) => {
                let mut items = Vec::new();
                for item in self.heap.array_items(id) {
                    match item {
                        Value::Bit(b) => items.push(Value::Bit(1 - b)),
                        _ => {
                            self.release_value(value)?;
                            return Err(BlochError::runtime(span, "'~' requires a bit array"));
                        }
                    }
                }
                let result = Value::Array(self.heap.alloc_array(items));
                self.release_value(value)?;
                Ok(result)
            }
            Plan::Invalid(kind) => {
                self.release_value(value)?;
                Err(BlochError::runtime(
                    span,
                    format!("invalid operand '{}' for unary operator", kind),
                ))
            }
        }
    }

    fn eval_cast(&mut self, span: Span, target: Primitive, value: Value) -> Result<Value> {
        let result = match target {
            Primitive::Int => as_i64(&value).map(Value::Int),
            Primitive::Long => as_i64(&value).map(Value::Long),
            Primitive::Float => as_f64(&value).map(Value::Float),
            Primitive::Bit => as_i64(&value).map(|n| Value::Bit(u8::from(n != 0))),
            _ => None,
        };
        match result {
            Some(v) => Ok(v),
            None => {
                let message = format!(
                    "cannot cast from '{}' to '{}'",
                    value.kind_name(),
                    target.name()
                );
                self.release_value(value)?;
                Err(BlochError::runtime(span, message))
            }
        }
    }

    fn eval_call(&mut self, expr: &Expr, name: &str, args: &[Expr]) -> Result<Value> {
        // Bare method calls inside a class body were resolved statically
        if let Some(target) = self.analysis.call_targets.get(&expr.id).cloned() {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(self.eval(arg)?);
            }
            if target.is_static {
                return self.call_static_method(expr.span, name, &target, values);
            }
            let recv = self.env.get("this").ok_or_else(|| {
                BlochError::runtime(expr.span, "'this' is not bound here")
            })?;
            self.heap.retain(&recv);
            return self.invoke_on(expr.span, recv, name, &target, values);
        }

        if is_gate_name(name) {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(self.eval(arg)?);
            }
            return self.apply_gate(expr.span, name, &values);
        }

        let function = self.functions.get(name).cloned().ok_or_else(|| {
            BlochError::runtime(expr.span, format!("unknown function '{}'", name))
        })?;
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg)?);
        }
        self.call_user_function(&function, values)
    }

    /// The one rule the simulator does not enforce: no gate may touch a
    /// qubit whose measured flag is set without an intervening reset.
    fn apply_gate(&mut self, span: Span, name: &str, args: &[Value]) -> Result<Value> {
        let qubit = |v: &Value| match v {
            Value::Qubit(q) => Some(*q),
            _ => None,
        };
        let check = |sim: &Simulator, q: usize| -> Result<()> {
            if sim.is_measured(q) {
                return Err(BlochError::runtime(
                    span,
                    format!("gate '{}' applied to a measured qubit; 'reset' it first", name),
                ));
            }
            Ok(())
        };

        match name {
            "h" | "x" | "y" | "z" => {
                let q = qubit(&args[0]).ok_or_else(|| {
                    BlochError::runtime(span, format!("gate '{}' expects a qubit", name))
                })?;
                check(&self.sim, q)?;
                match name {
                    "h" => self.sim.h(q),
                    "x" => self.sim.x(q),
                    "y" => self.sim.y(q),
                    _ => self.sim.z(q),
                }
            }
            "rx" | "ry" | "rz" => {
                let q = qubit(&args[0]).ok_or_else(|| {
                    BlochError::runtime(span, format!("gate '{}' expects a qubit", name))
                })?;
                let theta = match args.get(1) {
                    Some(Value::Float(f)) => *f,
                    _ => {
                        return Err(BlochError::runtime(
                            span,
                            format!("gate '{}' expects a float angle", name),
                        ));
                    }
                };
                check(&self.sim, q)?;
                match name {
                    "rx" => self.sim.rx(q, theta),
                    "ry" => self.sim.ry(q, theta),
                    _ => self.sim.rz(q, theta),
                }
            }
            "cx" => {
                let control = qubit(&args[0]).ok_or_else(|| {
                    BlochError::runtime(span, "gate 'cx' expects qubit operands")
                })?;
                let target = qubit(&args[1]).ok_or_else(|| {
                    BlochError::runtime(span, "gate 'cx' expects qubit operands")
                })?;
                check(&self.sim, control)?;
                check(&self.sim, target)?;
                self.sim.cx(control, target);
            }
            _ => return Err(BlochError::runtime(span, format!("unknown gate '{}'", name))),
        }
        Ok(Value::Void)
    }

    fn do_measure(&mut self, value: &Value, span: Span) -> Result<Value> {
        match value {
            Value::Qubit(q) => {
                if self.sim.is_measured(*q) {
                    return Err(BlochError::runtime(
                        span,
                        "qubit has already been measured; 'reset' it before measuring again",
                    ));
                }
                Ok(Value::Bit(self.sim.measure(*q)))
            }
            Value::Array(id) => {
                let items = self.heap.array_items(*id);
                let mut bits = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Qubit(q) => {
                            if self.sim.is_measured(q) {
                                return Err(BlochError::runtime(
                                    span,
                                    "qubit has already been measured; 'reset' it before measuring again",
                                ));
                            }
                            bits.push(Value::Bit(self.sim.measure(q)));
                        }
                        _ => {
                            return Err(BlochError::runtime(span, "'measure' requires qubits"));
                        }
                    }
                }
                Ok(Value::Array(self.heap.alloc_array(bits)))
            }
            other => Err(BlochError::runtime(
                span,
                format!("'measure' requires a qubit or qubit array, not '{}'", other.kind_name()),
            )),
        }
    }

    fn call_user_function(&mut self, function: &Rc<FunctionDecl>, args: Vec<Value>) -> Result<Value> {
        self.enter_call(function.span)?;
        self.env.push_frame();
        for (param, value) in function.params.iter().zip(args) {
            self.env.declare(&param.name, value, None);
        }

        let mut flow = Flow::Normal;
        let mut error = None;
        for stmt in &function.body {
            match self.exec_stmt(stmt) {
                Ok(Flow::Normal) => {}
                Ok(f) => {
                    flow = f;
                    break;
                }
                Err(e) => {
                    error = Some(e);
                    break;
                }
            }
            if let Err(e) = self.maybe_collect() {
                error = Some(e);
                break;
            }
        }

        let slots = self.env.pop_frame();
        let released = self.release_slots(slots);
        self.depth -= 1;
        if let Some(e) = error {
            return Err(e);
        }
        released?;
        match flow {
            Flow::Return(value) => Ok(value),
            Flow::Normal => {
                let ret = self.analysis.registry.resolve_type(&function.return_type, &HashMap::new())?;
                if ret == TypeDesc::Void {
                    Ok(Value::Void)
                } else {
                    self.zero_value(&ret)
                }
            }
        }
    }

    fn eval_method_call(
        &mut self,
        expr: &Expr,
        recv: &Expr,
        name: &str,
        args: &[Expr],
    ) -> Result<Value> {
        let target = self.analysis.call_targets.get(&expr.id).cloned().ok_or_else(|| {
            BlochError::runtime(expr.span, format!("unresolved method call '{}'", name))
        })?;

        if self.analysis.static_receivers.contains_key(&expr.id) {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(self.eval(arg)?);
            }
            return self.call_static_method(expr.span, name, &target, values);
        }

        let receiver = self.eval(recv)?;
        if matches!(receiver, Value::Null) {
            return Err(BlochError::runtime(
                recv.span,
                format!("cannot call method '{}' on null", name),
            ));
        }
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg)?);
        }
        self.invoke_on(expr.span, receiver, name, &target, values)
    }

    /// Dispatch: a virtual target starts at the receiver's runtime class
    /// and walks up to the statically resolved declarer; a non-virtual
    /// target binds exactly where the analyser resolved it.
    fn invoke_on(
        &mut self,
        span: Span,
        receiver: Value,
        name: &str,
        target: &CallTarget,
        args: Vec<Value>,
    ) -> Result<Value> {
        let id = match &receiver {
            Value::Object(id) => *id,
            other => {
                let message =
                    format!("cannot call method '{}' on '{}'", name, other.kind_name());
                self.release_value(receiver)?;
                return Err(BlochError::runtime(span, message));
            }
        };
        let runtime_info = self.obj_info(span, id)?;
        let subst = self.current_subst();
        let sig: Vec<TypeDesc> = target.sig.iter().map(|t| t.substitute(&subst).erased()).collect();

        let resolved = if target.is_virtual {
            let mut found = None;
            let mut current = Some(runtime_info.clone());
            while let Some(class) = current {
                if let Some(method) = class
                    .methods
                    .iter()
                    .find(|m| !m.is_static && m.name == name && m.params == sig && m.body.is_some())
                {
                    found = Some((class.clone(), method.clone()));
                    break;
                }
                let stop = class.decl_name == target.decl_class;
                current = if stop { None } else { self.analysis.registry.base_of(&class) };
            }
            found
        } else {
            let mut found = None;
            let mut current = Some(runtime_info.clone());
            while let Some(class) = current {
                if class.decl_name == target.decl_class {
                    found = class
                        .methods
                        .iter()
                        .find(|m| !m.is_static && m.name == name && m.params == sig)
                        .map(|m| (class.clone(), m.clone()));
                    break;
                }
                current = self.analysis.registry.base_of(&class);
            }
            found
        };

        let Some((declaring, method)) = resolved else {
            return Err(BlochError::runtime(
                span,
                format!("class '{}' has no callable method '{}'", runtime_info.key, name),
            ));
        };
        self.run_method(span, &declaring, &method, Some(Value::Object(id)), args)
    }

    fn call_static_method(
        &mut self,
        span: Span,
        name: &str,
        target: &CallTarget,
        args: Vec<Value>,
    ) -> Result<Value> {
        let info = self.analysis.registry.template_info(&target.decl_class, span)?;
        let subst = self.current_subst();
        let sig: Vec<TypeDesc> = target.sig.iter().map(|t| t.substitute(&subst).erased()).collect();
        let method = info
            .methods
            .iter()
            .find(|m| m.is_static && m.name == name && m.params == sig)
            .cloned()
            .ok_or_else(|| {
                BlochError::runtime(
                    span,
                    format!("class '{}' has no static method '{}'", target.decl_class, name),
                )
            })?;
        self.run_method(span, &info, &method, None, args)
    }

    fn run_method(
        &mut self,
        span: Span,
        declaring: &Rc<ClassInfo>,
        method: &Rc<MethodInfo>,
        this: Option<Value>,
        args: Vec<Value>,
    ) -> Result<Value> {
        let body = method.body.clone().ok_or_else(|| {
            BlochError::runtime(span, format!("abstract method '{}' has no body", method.name))
        })?;
        self.enter_call(span)?;
        self.env.push_frame();
        if let Some(this_value) = this {
            self.env.declare("this", this_value, None);
        }
        for (name, value) in method.param_names.iter().zip(args) {
            self.env.declare(name, value, None);
        }
        self.class_stack.push(declaring.clone());

        let mut flow = Flow::Normal;
        let mut error = None;
        for stmt in body.iter() {
            match self.exec_stmt(stmt) {
                Ok(Flow::Normal) => {}
                Ok(f) => {
                    flow = f;
                    break;
                }
                Err(e) => {
                    error = Some(e);
                    break;
                }
            }
            if let Err(e) = self.maybe_collect() {
                error = Some(e);
                break;
            }
        }

        let ret = method.ret.substitute(&declaring.subst);
        self.class_stack.pop();
        let slots = self.env.pop_frame();
        let released = self.release_slots(slots);
        self.depth -= 1;
        if let Some(e) = error {
            return Err(e);
        }
        released?;
        match flow {
            Flow::Return(value) => Ok(value),
            Flow::Normal if ret == TypeDesc::Void => Ok(Value::Void),
            Flow::Normal => self.zero_value(&ret),
        }
    }

    fn eval_super_call(&mut self, expr: &Expr, method: Option<&str>, args: &[Expr]) -> Result<Value> {
        let current = self.class_stack.last().cloned().ok_or_else(|| {
            BlochError::runtime(expr.span, "'super' outside of a class")
        })?;
        let base = self.analysis.registry.base_of(&current).ok_or_else(|| {
            BlochError::runtime(expr.span, format!("class '{}' has no base class", current.key))
        })?;
        let this = self.env.get("this").ok_or_else(|| {
            BlochError::runtime(expr.span, "'super' requires 'this'")
        })?;

        match method {
            Some(name) => {
                // Statically bound: first match walking up from the base
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                let target = self.analysis.call_targets.get(&expr.id).cloned().ok_or_else(|| {
                    BlochError::runtime(expr.span, format!("unresolved 'super.{}' call", name))
                })?;
                let subst = self.current_subst();
                let sig: Vec<TypeDesc> =
                    target.sig.iter().map(|t| t.substitute(&subst).erased()).collect();
                let mut found = None;
                let mut cursor = Some(base);
                while let Some(class) = cursor {
                    if let Some(m) = class
                        .methods
                        .iter()
                        .find(|m| !m.is_static && m.name == name && m.params == sig && m.body.is_some())
                    {
                        found = Some((class.clone(), m.clone()));
                        break;
                    }
                    cursor = self.analysis.registry.base_of(&class);
                }
                let Some((declaring, m)) = found else {
                    return Err(BlochError::runtime(
                        expr.span,
                        format!("no base method '{}' to call", name),
                    ));
                };
                self.heap.retain(&this);
                self.run_method(expr.span, &declaring, &m, Some(this), values)
            }
            None => {
                let Value::Object(id) = this else {
                    return Err(BlochError::runtime(expr.span, "'super(...)' requires 'this'"));
                };
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                let sig = self.analysis.ctor_targets.get(&expr.id).cloned().ok_or_else(|| {
                    BlochError::runtime(expr.span, "unresolved 'super(...)' call")
                })?;
                let subst = self.current_subst();
                let sig: Vec<TypeDesc> = sig.iter().map(|t| t.substitute(&subst).erased()).collect();
                let ctor = base
                    .constructors
                    .iter()
                    .find(|c| c.params == sig)
                    .cloned()
                    .ok_or_else(|| {
                        BlochError::runtime(
                            expr.span,
                            format!("no matching constructor of '{}'", base.key),
                        )
                    })?;
                self.run_ctor(expr.span, &base, &ctor, id, values)?;
                Ok(Value::Void)
            }
        }
    }

    fn eval_member(&mut self, expr: &Expr, target: &Expr, name: &str) -> Result<Value> {
        if let Some(class) = self.analysis.static_receivers.get(&expr.id).cloned() {
            return self.static_read(expr.span, &class, name);
        }
        let receiver = self.eval(target)?;
        let result = match &receiver {
            Value::Null => Err(BlochError::runtime(
                expr.span,
                format!("cannot access member '{}' of null", name),
            )),
            Value::Object(id) => {
                if self.heap.is_fully_destroyed(*id) {
                    Err(BlochError::runtime(
                        expr.span,
                        format!("cannot access member '{}' of a destroyed object", name),
                    ))
                } else {
                    let info = self.obj_info(expr.span, *id)?;
                    let (declaring, field) =
                        self.analysis.registry.find_field(&info, name).ok_or_else(|| {
                            BlochError::runtime(
                                expr.span,
                                format!("class '{}' has no field '{}'", info.key, name),
                            )
                        })?;
                    if field.is_static {
                        self.static_read(expr.span, &declaring.decl_name, name)
                    } else {
                        let value = self.heap.get_field(*id, field.slot).ok_or_else(|| {
                            BlochError::runtime(expr.span, "member access on a destroyed object")
                        })?;
                        self.heap.retain(&value);
                        Ok(value)
                    }
                }
            }
            other => Err(BlochError::runtime(
                expr.span,
                format!("cannot access member '{}' of '{}'", name, other.kind_name()),
            )),
        };
        self.release_value(receiver)?;
        result
    }

    fn index_read(&mut self, span: Span, array: &Value, index: &Value) -> Result<Value> {
        let idx = index.as_index().ok_or_else(|| {
            BlochError::runtime(span, format!("array index must be numeric, not '{}'", index.kind_name()))
        })?;
        if idx < 0 {
            return Err(BlochError::runtime(span, "negative array index"));
        }
        let Value::Array(id) = array else {
            return Err(BlochError::runtime(
                span,
                format!("cannot index into '{}'", array.kind_name()),
            ));
        };
        let len = self.heap.array_len(*id);
        if idx as usize >= len {
            return Err(BlochError::runtime(
                span,
                format!("array index {} out of bounds for length {}", idx, len),
            ));
        }
        let value = self.heap.array_get(*id, idx as usize).unwrap_or(Value::Null);
        self.heap.retain(&value);
        Ok(value)
    }

    /// Stores `value` into an assignable place, returning the displaced
    /// occupant for release. Ownership of `value` transfers to the place.
    fn store_into(&mut self, target: &Expr, value: Value) -> Result<Value> {
        match &target.kind {
            ExprKind::Variable(name) => {
                if self.env.contains(name) {
                    return Ok(self.env.set(name, value).unwrap_or(Value::Void));
                }
                // Bare field writes inside a class body
                if let Some(Value::Object(id)) = self.env.get("this") {
                    let info = self.obj_info(target.span, id)?;
                    if let Some((declaring, field)) = self.analysis.registry.find_field(&info, name) {
                        if field.is_static {
                            let key = (declaring.decl_name.clone(), name.to_string());
                            return Ok(self.statics.insert(key, value).unwrap_or(Value::Void));
                        }
                        return self.heap.set_field(id, field.slot, value).ok_or_else(|| {
                            BlochError::runtime(target.span, "assignment to a destroyed object")
                        });
                    }
                }
                if let Some(class) = self.class_stack.last().cloned() {
                    if let Some((declaring, field)) = self.analysis.registry.find_field(&class, name) {
                        if field.is_static {
                            let key = (declaring.decl_name.clone(), name.to_string());
                            return Ok(self.statics.insert(key, value).unwrap_or(Value::Void));
                        }
                    }
                }
                Err(BlochError::runtime(target.span, format!("unknown variable '{}'", name)))
            }
            ExprKind::Member { target: recv, name } => {
                if let Some(class) = self.analysis.static_receivers.get(&target.id).cloned() {
                    let info = self.analysis.registry.template_info(&class, recv.span)?;
                    let (declaring, _) =
                        self.analysis.registry.find_field(&info, name).ok_or_else(|| {
                            BlochError::runtime(
                                target.span,
                                format!("class '{}' has no field '{}'", class, name),
                            )
                        })?;
                    let key = (declaring.decl_name.clone(), name.to_string());
                    return Ok(self.statics.insert(key, value).unwrap_or(Value::Void));
                }
                let receiver = self.eval(recv)?;
                let result = match &receiver {
                    Value::Null => {
                        self.release_value(value)?;
                        Err(BlochError::runtime(
                            target.span,
                            format!("cannot assign to member '{}' of null", name),
                        ))
                    }
                    Value::Object(id) => {
                        if self.heap.is_fully_destroyed(*id) {
                            self.release_value(value)?;
                            Err(BlochError::runtime(
                                target.span,
                                format!("cannot assign to member '{}' of a destroyed object", name),
                            ))
                        } else {
                            let info = self.obj_info(target.span, *id)?;
                            match self.analysis.registry.find_field(&info, name) {
                                Some((_, field)) if !field.is_static => self
                                    .heap
                                    .set_field(*id, field.slot, value)
                                    .ok_or_else(|| {
                                        BlochError::runtime(
                                            target.span,
                                            "assignment to a destroyed object",
                                        )
                                    }),
                                Some((declaring, _)) => {
                                    let key = (declaring.decl_name.clone(), name.to_string());
                                    Ok(self.statics.insert(key, value).unwrap_or(Value::Void))
                                }
                                None => {
                                    let message =
                                        format!("class '{}' has no field '{}'", info.key, name);
                                    self.release_value(value)?;
                                    Err(BlochError::runtime(target.span, message))
                                }
                            }
                        }
                    }
                    other => {
                        let message =
                            format!("cannot assign to member of '{}'", other.kind_name());
                        self.release_value(value)?;
                        Err(BlochError::runtime(target.span, message))
                    }
                };
                self.release_value(receiver)?;
                result
            }
            ExprKind::Index { target: array_expr, index } => {
                let array = self.eval(array_expr)?;
                let index_value = self.eval(index)?;
                let result = (|| {
                    let idx = index_value.as_index().ok_or_else(|| {
                        BlochError::runtime(index.span, "array index must be an integer")
                    })?;
                    if idx < 0 {
                        return Err(BlochError::runtime(index.span, "negative array index"));
                    }
                    let Value::Array(id) = &array else {
                        return Err(BlochError::runtime(
                            target.span,
                            format!("cannot index into '{}'", array.kind_name()),
                        ));
                    };
                    let len = self.heap.array_len(*id);
                    if idx as usize >= len {
                        return Err(BlochError::runtime(
                            index.span,
                            format!("array index {} out of bounds for length {}", idx, len),
                        ));
                    }
                    Ok((*id, idx as usize))
                })();
                match result {
                    Ok((id, idx)) => {
                        let old = self.heap.array_set(id, idx, value).unwrap_or(Value::Void);
                        self.release_value(array)?;
                        Ok(old)
                    }
                    Err(e) => {
                        self.release_value(array)?;
                        self.release_value(value)?;
                        Err(e)
                    }
                }
            }
            _ => Err(BlochError::runtime(target.span, "invalid assignment target")),
        }
    }

    // ---- instantiation & destruction ----

    fn eval_new(
        &mut self,
        expr: &Expr,
        class: &str,
        type_args: &[Type],
        args: &[Expr],
    ) -> Result<Value> {
        let subst = self.current_subst();
        let mut resolved_args = Vec::with_capacity(type_args.len());
        for arg in type_args {
            resolved_args.push(self.analysis.registry.resolve_type(arg, &subst)?);
        }
        let info = if resolved_args.is_empty() {
            self.analysis.registry.template_info(class, expr.span)?
        } else {
            self.analysis.registry.instantiate(class, &resolved_args, expr.span)?
        };

        let ctor_sig = self.analysis.ctor_targets.get(&expr.id).cloned().ok_or_else(|| {
            BlochError::runtime(expr.span, format!("unresolved constructor for '{}'", class))
        })?;
        let ctor_sig: Vec<TypeDesc> =
            ctor_sig.iter().map(|t| t.substitute(&subst).erased()).collect();
        let ctor = info
            .constructors
            .iter()
            .find(|c| {
                c.params.iter().map(|p| p.substitute(&info.subst).erased()).collect::<Vec<_>>()
                    == ctor_sig
            })
            .or_else(|| if info.constructors.len() == 1 { info.constructors.first() } else { None })
            .cloned()
            .ok_or_else(|| {
                BlochError::runtime(expr.span, format!("no matching constructor of '{}'", info.key))
            })?;

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg)?);
        }

        let id = self.allocate_object(&info)?;
        self.run_ctor(expr.span, &info, &ctor, id, values)?;
        Ok(Value::Object(id))
    }

    fn allocate_object(&mut self, info: &Rc<ClassInfo>) -> Result<ObjId> {
        let mut fields = Vec::with_capacity(info.all_fields.len());
        for field in &info.all_fields {
            fields.push(self.zero_value(&field.ty)?);
        }
        let id = self.heap.alloc_object(info.key.clone(), fields, info.has_tracked_field);
        if self.collector.is_none() {
            self.collector = Some(CycleCollector::start(self.heap.clone()));
        }
        Ok(id)
    }

    /// Runs a constructor with `this` bound to `id`. The caller keeps
    /// whatever strong references it already holds; none are added here.
    fn run_ctor(
        &mut self,
        span: Span,
        info: &Rc<ClassInfo>,
        ctor: &Rc<CtorInfo>,
        id: ObjId,
        args: Vec<Value>,
    ) -> Result<()> {
        self.enter_call(span)?;
        self.env.push_frame();
        let this = Value::Object(id);
        self.heap.retain(&this);
        self.env.declare("this", this, None);
        for (name, value) in ctor.param_names.iter().zip(args) {
            self.env.declare(name, value, None);
        }
        self.class_stack.push(info.clone());

        let outcome = self.run_ctor_body(span, info, ctor, id);

        self.class_stack.pop();
        let slots = self.env.pop_frame();
        let released = self.release_slots(slots);
        self.depth -= 1;
        outcome?;
        released
    }

    fn run_ctor_body(
        &mut self,
        span: Span,
        info: &Rc<ClassInfo>,
        ctor: &Rc<CtorInfo>,
        id: ObjId,
    ) -> Result<()> {
        match (&ctor.body, ctor.is_default) {
            // `= default`: base chain, field initialisers, then one
            // assignment per parameter matching a field
            (None, true) => {
                self.run_implicit_base(span, info, id)?;
                self.run_field_inits(info, id)?;
                for name in &ctor.param_names {
                    let value = self.env.get(name).unwrap_or(Value::Null);
                    self.heap.retain(&value);
                    if let Some((_, field)) = self.analysis.registry.find_field(info, name) {
                        if let Some(old) = self.heap.set_field(id, field.slot, value) {
                            self.release_value(old)?;
                        }
                    }
                }
                Ok(())
            }
            // Implicit zero-argument constructor
            (None, false) => {
                self.run_implicit_base(span, info, id)?;
                self.run_field_inits(info, id)
            }
            (Some(body), _) => {
                let explicit_super = matches!(
                    body.first().map(|s| &s.kind),
                    Some(StmtKind::Expr(e)) if matches!(e.kind, ExprKind::SuperCall { method: None, .. })
                );
                let mut rest: &[Stmt] = body;
                if explicit_super {
                    let first = &body[0];
                    if let Flow::Return(v) = self.exec_stmt(first)? {
                        self.release_value(v)?;
                    }
                    rest = &body[1..];
                } else {
                    self.run_implicit_base(span, info, id)?;
                }
                self.run_field_inits(info, id)?;
                for stmt in rest {
                    match self.exec_stmt(stmt)? {
                        Flow::Normal => {}
                        Flow::Return(value) => {
                            self.release_value(value)?;
                            break;
                        }
                    }
                    self.maybe_collect()?;
                }
                Ok(())
            }
        }
    }

    fn run_implicit_base(&mut self, span: Span, info: &Rc<ClassInfo>, id: ObjId) -> Result<()> {
        let Some(base) = self.analysis.registry.base_of(info) else { return Ok(()) };
        let ctor = base
            .constructors
            .iter()
            .find(|c| c.params.is_empty())
            .cloned()
            .ok_or_else(|| {
                BlochError::runtime(
                    span,
                    format!("base class '{}' has no zero-argument constructor", base.key),
                )
            })?;
        self.run_ctor(span, &base, &ctor, id, Vec::new())
    }

    fn run_field_inits(&mut self, info: &Rc<ClassInfo>, id: ObjId) -> Result<()> {
        for field in info.fields.clone() {
            let Some(init) = &field.init else { continue };
            let value = self.eval(init)?;
            if let Some(old) = self.heap.set_field(id, field.slot, value) {
                self.release_value(old)?;
            }
        }
        Ok(())
    }

    /// Destructor cascade: derived destructor first, then base, then the
    /// recursive release of owned references. Tracked qubit fields record
    /// their outcome just before the fields are torn down.
    fn destroy_object(&mut self, id: ObjId) -> Result<()> {
        if !self.heap.begin_destroy(id) {
            return Ok(());
        }
        let info = self.obj_info(Span::default(), id)?;

        let mut error = None;
        let mut chain = Some(info.clone());
        while let Some(class) = chain {
            if let Some(dtor) = &class.destructor {
                if let Some(body) = dtor.body.clone() {
                    self.env.push_frame();
                    let this = Value::Object(id);
                    self.heap.retain(&this);
                    self.env.declare("this", this, None);
                    self.class_stack.push(class.clone());
                    for stmt in &body {
                        match self.exec_stmt(stmt) {
                            Ok(Flow::Normal) => {}
                            Ok(Flow::Return(v)) => {
                                if let Err(e) = self.release_value(v) {
                                    error.get_or_insert(e);
                                }
                                break;
                            }
                            Err(e) => {
                                error.get_or_insert(e);
                                break;
                            }
                        }
                    }
                    self.class_stack.pop();
                    let slots = self.env.pop_frame();
                    if let Err(e) = self.release_slots(slots) {
                        error.get_or_insert(e);
                    }
                }
            }
            chain = self.analysis.registry.base_of(&class);
        }

        // Tracked fields contribute one outcome at object destruction
        for field in &info.all_fields {
            if field.tracked {
                if let Some(value) = self.heap.get_field(id, field.slot) {
                    let heading = format!("{} {}", field.ty, field.name);
                    self.record_tracked(&heading, &value);
                }
            }
        }

        let fields = self.heap.finish_destroy(id);
        for value in fields {
            if let Err(e) = self.release_value(value) {
                error.get_or_insert(e);
            }
        }
        match error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // ---- reference management ----

    fn release_slots(&mut self, slots: Vec<Slot>) -> Result<()> {
        let mut first_error = None;
        for slot in slots {
            if let Some(heading) = &slot.tracked {
                self.record_tracked(heading, &slot.value);
            }
            if let Err(e) = self.release_value(slot.value) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn release_value(&mut self, value: Value) -> Result<()> {
        match value {
            Value::Object(id) => {
                if self.heap.dec_object(id) == DecOutcome::NeedsDestroy {
                    self.destroy_object(id)?;
                }
                Ok(())
            }
            Value::Array(id) => {
                if let Some(items) = self.heap.dec_array(id) {
                    for item in items {
                        self.release_value(item)?;
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn record_tracked(&mut self, heading: &str, value: &Value) {
        let outcome = match value {
            Value::Qubit(q) => Some(self.qubit_outcome(*q).to_string()),
            Value::Array(id) => {
                let mut text = String::new();
                for item in self.heap.array_items(*id) {
                    if let Value::Qubit(q) = item {
                        text.push(self.qubit_outcome(q));
                    }
                }
                if text.is_empty() {
                    None
                } else {
                    Some(text)
                }
            }
            _ => None,
        };
        if let Some(outcome) = outcome {
            self.tracker.record(heading, outcome);
        }
    }

    fn qubit_outcome(&self, qubit: usize) -> char {
        match self.sim.last_outcome(qubit) {
            Some(1) => '1',
            Some(_) => '0',
            None => '?',
        }
    }

    fn maybe_collect(&mut self) -> Result<()> {
        let victims = match &self.collector {
            Some(collector) if collector.has_victims() => collector.take_victims(),
            _ => return Ok(()),
        };
        self.destroy_victims(victims)
    }

    /// Victims are re-validated against the live heap before destruction:
    /// the version must be unchanged since the sweep observed the object.
    fn destroy_victims(&mut self, victims: Vec<(ObjId, u64)>) -> Result<()> {
        let mut first_error = None;
        for (id, version) in victims {
            if self.heap.is_destroyed(id) {
                continue;
            }
            if self.heap.object_version(id) != Some(version) {
                continue;
            }
            if let Err(e) = self.destroy_object(id) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // ---- helpers ----

    fn enter_call(&mut self, span: Span) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_CALL_DEPTH {
            self.depth -= 1;
            return Err(BlochError::runtime(span, "maximum call depth exceeded"));
        }
        Ok(())
    }

    fn current_subst(&self) -> HashMap<String, TypeDesc> {
        self.class_stack.last().map(|c| c.subst.clone()).unwrap_or_default()
    }

    fn runtime_type(&mut self, ty: &Type) -> Result<TypeDesc> {
        let subst = self.current_subst();
        self.analysis.registry.resolve_type(ty, &subst)
    }

    fn obj_info(&self, span: Span, id: ObjId) -> Result<Rc<ClassInfo>> {
        let key = self.heap.class_of(id).ok_or_else(|| {
            BlochError::runtime(span, "reference to a freed object")
        })?;
        self.analysis.registry.info(&key).ok_or_else(|| {
            BlochError::runtime(span, format!("unknown class descriptor '{}'", key))
        })
    }

    /// The declared type's zero value: 0 for numerics, false, empty string,
    /// null for references, |0⟩ for qubits, zero-filled arrays.
    fn zero_value(&mut self, desc: &TypeDesc) -> Result<Value> {
        Ok(match desc {
            TypeDesc::Int => Value::Int(0),
            TypeDesc::Long => Value::Long(0),
            TypeDesc::Float => Value::Float(0.0),
            TypeDesc::Bit => Value::Bit(0),
            TypeDesc::Boolean => Value::Boolean(false),
            TypeDesc::Char => Value::Char('\0'),
            TypeDesc::Str => Value::Str(String::new()),
            TypeDesc::Qubit => Value::Qubit(self.sim.allocate_qubit()),
            TypeDesc::Class { .. } | TypeDesc::Null => Value::Null,
            TypeDesc::Void => Value::Void,
            TypeDesc::Array { elem, size } => {
                let n = size.unwrap_or(0);
                let mut items = Vec::with_capacity(n);
                for _ in 0..n {
                    items.push(self.zero_value(elem)?);
                }
                Value::Array(self.heap.alloc_array(items))
            }
        })
    }

    /// Echo formatting: floats always show a fractional digit, booleans are
    /// words, bits are digits, arrays render as `{a, b}`.
    fn format_value(&self, value: &Value) -> String {
        match value {
            Value::Int(n) | Value::Long(n) => n.to_string(),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.is_finite() {
                    format!("{:.1}", f)
                } else {
                    format!("{}", f)
                }
            }
            Value::Boolean(b) => b.to_string(),
            Value::Bit(b) => b.to_string(),
            Value::Char(c) => c.to_string(),
            Value::Str(s) => s.clone(),
            Value::Qubit(q) => format!("q[{}]", q),
            Value::Array(id) => {
                let rendered: Vec<String> =
                    self.heap.array_items(*id).iter().map(|v| self.format_value(v)).collect();
                format!("{{{}}}", rendered.join(", "))
            }
            Value::Object(id) => match self.heap.class_of(*id) {
                Some(class) => format!("{}@{}", class, id),
                None => "null".to_string(),
            },
            Value::Null => "null".to_string(),
            Value::Void => "void".to_string(),
        }
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Int(n) | Value::Long(n) => Some(*n as f64),
        Value::Float(f) => Some(*f),
        Value::Bit(b) => Some(f64::from(*b)),
        _ => None,
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Int(n) | Value::Long(n) => Some(*n),
        Value::Float(f) => Some(*f as i64),
        Value::Bit(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Null, Value::Object(_)) | (Value::Object(_), Value::Null) => false,
        (Value::Object(a), Value::Object(b)) => a == b,
        (Value::Float(_), _) | (_, Value::Float(_)) => match (as_f64(left), as_f64(right)) {
            (Some(a), Some(b)) => a == b,
            _ => left == right,
        },
        (Value::Int(_) | Value::Long(_) | Value::Bit(_), Value::Int(_) | Value::Long(_) | Value::Bit(_)) => {
            as_i64(left) == as_i64(right)
        }
        _ => left == right,
    }
}
