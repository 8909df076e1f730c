use std::cell::Cell;

/// 1-based source location, carried by every node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub line: usize,
    pub col: usize,
}

impl Span {
    pub fn new(line: usize, col: usize) -> Self {
        Self { line, col }
    }
}

/// Expression node ids let the analyser hand resolved call targets to the
/// evaluator without mutating the tree.
pub type NodeId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Int,
    Long,
    Float,
    Bit,
    Boolean,
    Char,
    String,
    Qubit,
    Void,
}

impl Primitive {
    pub fn name(self) -> &'static str {
        match self {
            Primitive::Int => "int",
            Primitive::Long => "long",
            Primitive::Float => "float",
            Primitive::Bit => "bit",
            Primitive::Boolean => "boolean",
            Primitive::Char => "char",
            Primitive::String => "string",
            Primitive::Qubit => "qubit",
            Primitive::Void => "void",
        }
    }
}

#[derive(Debug, Clone)]
pub enum TypeKind {
    Primitive(Primitive),
    Named { name: String, args: Vec<Type> },
    Array {
        elem: Box<Type>,
        size: Option<Box<Expr>>,
        /// Filled in by the analyser once the size expression is
        /// const-evaluated; the only post-parse write into the tree.
        resolved_size: Cell<Option<usize>>,
    },
}

#[derive(Debug, Clone)]
pub struct Type {
    pub kind: TypeKind,
    pub span: Span,
}

impl Type {
    pub fn primitive(p: Primitive, span: Span) -> Self {
        Self { kind: TypeKind::Primitive(p), span }
    }

    pub fn is_void(&self) -> bool {
        matches!(self.kind, TypeKind::Primitive(Primitive::Void))
    }

    pub fn is_qubit(&self) -> bool {
        matches!(self.kind, TypeKind::Primitive(Primitive::Qubit))
    }

    pub fn is_qubit_array(&self) -> bool {
        match &self.kind {
            TypeKind::Array { elem, .. } => elem.is_qubit(),
            _ => false,
        }
    }

    /// Source-level rendering, used for tracked-outcome headings and
    /// diagnostics.
    pub fn display(&self) -> String {
        match &self.kind {
            TypeKind::Primitive(p) => p.name().to_string(),
            TypeKind::Named { name, args } => {
                if args.is_empty() {
                    name.clone()
                } else {
                    let args: Vec<String> = args.iter().map(Type::display).collect();
                    format!("{}<{}>", name, args.join(", "))
                }
            }
            TypeKind::Array { elem, resolved_size, .. } => match resolved_size.get() {
                Some(n) => format!("{}[{}]", elem.display(), n),
                None => format!("{}[]", elem.display()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Long(i64),
    Float(f64),
    Bit(u8),
    Boolean(bool),
    Char(char),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEq => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEq => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostfixOp {
    Increment,
    Decrement,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Literal(Literal),
    Null,
    Variable(String),
    This,
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Postfix { op: PostfixOp, target: Box<Expr> },
    Cast { target: Primitive, operand: Box<Expr> },
    /// Free function or built-in gate call.
    Call { name: String, args: Vec<Expr> },
    MethodCall { recv: Box<Expr>, name: String, args: Vec<Expr> },
    /// `super(args)` constructor chain or `super.m(args)`.
    SuperCall { method: Option<String>, args: Vec<Expr> },
    Index { target: Box<Expr>, index: Box<Expr> },
    Member { target: Box<Expr>, name: String },
    Assign { target: Box<Expr>, value: Box<Expr> },
    ArrayLiteral(Vec<Expr>),
    Measure(Box<Expr>),
    New { class: String, type_args: Vec<Type>, args: Vec<Expr> },
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub id: NodeId,
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    VarDecl {
        is_final: bool,
        tracked: bool,
        ty: Type,
        name: String,
        init: Option<Expr>,
    },
    Block(Vec<Stmt>),
    Expr(Expr),
    Return(Option<Expr>),
    If { cond: Expr, then_branch: Box<Stmt>, else_branch: Option<Box<Stmt>> },
    While { cond: Expr, body: Box<Stmt> },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Box<Stmt>>,
        body: Box<Stmt>,
    },
    Echo(Expr),
    Reset(Expr),
    MeasureStmt(Expr),
    Destroy(Expr),
    Ternary { cond: Expr, then_branch: Box<Stmt>, else_branch: Box<Stmt> },
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
    Protected,
}

impl Visibility {
    pub fn name(self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
            Visibility::Protected => "protected",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Param {
    pub ty: Type,
    pub name: String,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Field {
    pub vis: Visibility,
    pub is_static: bool,
    pub is_final: bool,
    pub tracked: bool,
    pub ty: Type,
    pub name: String,
    pub init: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Method {
    pub vis: Visibility,
    pub is_static: bool,
    pub is_virtual: bool,
    pub is_override: bool,
    pub quantum: bool,
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: Type,
    pub body: Option<Vec<Stmt>>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct ConstructorDecl {
    pub vis: Visibility,
    pub params: Vec<Param>,
    pub body: Option<Vec<Stmt>>,
    pub is_default: bool,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct DestructorDecl {
    pub vis: Visibility,
    pub body: Option<Vec<Stmt>>,
    pub is_default: bool,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct TypeParam {
    pub name: String,
    pub bound: Option<Type>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct ClassDecl {
    pub name: String,
    pub is_abstract: bool,
    pub is_static: bool,
    pub type_params: Vec<TypeParam>,
    pub base: Option<Type>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    pub constructors: Vec<ConstructorDecl>,
    pub destructors: Vec<DestructorDecl>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub quantum: bool,
    pub shots: Option<u64>,
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: Type,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Import {
    pub path: Vec<String>,
    pub wildcard: bool,
    pub span: Span,
}

/// A parsed module, or after loading, the whole merged program.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub package: Option<Vec<String>>,
    pub imports: Vec<Import>,
    pub functions: Vec<FunctionDecl>,
    pub classes: Vec<ClassDecl>,
    /// Free top-level statements, executed before `main`.
    pub statements: Vec<Stmt>,
    /// Set by the loader when `bloch/lang/Object.bloch` was found on the
    /// search path and merged in.
    pub has_root_object: bool,
}
