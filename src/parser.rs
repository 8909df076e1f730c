use std::cell::Cell;
use std::collections::VecDeque;

use crate::ast::*;
use crate::error::{BlochError, Result};
use crate::token::{Token, TokenKind};

/// Recursive-descent parser over the token stream. Halts at the first error;
/// there is no recovery into multi-error diagnostics.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    next_id: NodeId,
    /// Overflow queue for `qubit a, b, c;` — the first declaration is
    /// returned, the rest are staged here and flushed by the caller after
    /// every statement, preserving source order.
    pending: VecDeque<Stmt>,
}

#[derive(Debug, Clone)]
struct Annotation {
    name: String,
    value: Option<i64>,
    span: Span,
}

pub fn parse(tokens: Vec<Token>) -> Result<Program> {
    Parser::new(tokens).parse_program()
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0, next_id: 0, pending: VecDeque::new() }
    }

    // ---- token stream helpers ----

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn kind_at(&self, index: usize) -> TokenKind {
        self.tokens.get(index).map_or(TokenKind::Eof, |t| t.kind)
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error_here(format!("expected {}, found '{}'", what, self.describe_current())))
        }
    }

    fn describe_current(&self) -> String {
        let t = self.peek();
        if t.kind == TokenKind::Eof {
            "end of input".to_string()
        } else {
            t.lexeme.clone()
        }
    }

    fn span_here(&self) -> Span {
        let t = self.peek();
        Span::new(t.line, t.col)
    }

    fn error_here(&self, message: impl Into<String>) -> BlochError {
        BlochError::parse(self.span_here(), message)
    }

    fn fresh_id(&mut self) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn expr(&mut self, kind: ExprKind, span: Span) -> Expr {
        Expr { id: self.fresh_id(), kind, span }
    }

    // ---- program ----

    pub fn parse_program(&mut self) -> Result<Program> {
        let mut program = Program::default();
        let mut first = true;

        while !self.check(TokenKind::Eof) {
            match self.peek().kind {
                TokenKind::Package => {
                    let span = self.span_here();
                    if !first {
                        return Err(BlochError::parse(
                            span,
                            "a package declaration must be the first construct in a file",
                        ));
                    }
                    self.advance();
                    let path = self.parse_dotted_path()?;
                    self.expect(TokenKind::Semicolon, "';' after package declaration")?;
                    program.package = Some(path);
                }
                TokenKind::Import => {
                    program.imports.push(self.parse_import()?);
                }
                TokenKind::At => {
                    let annotations = self.parse_annotations()?;
                    match self.peek().kind {
                        TokenKind::Function => {
                            program.functions.push(self.parse_function(annotations)?);
                        }
                        _ => {
                            let stmt = self.parse_var_decl_with(annotations)?;
                            program.statements.push(stmt);
                            self.flush_pending(&mut program.statements);
                        }
                    }
                }
                TokenKind::Abstract | TokenKind::Static | TokenKind::Class => {
                    program.classes.push(self.parse_class()?);
                }
                TokenKind::Function => {
                    program.functions.push(self.parse_function(Vec::new())?);
                }
                _ => {
                    let stmt = self.parse_statement()?;
                    program.statements.push(stmt);
                    self.flush_pending(&mut program.statements);
                }
            }
            first = false;
        }
        Ok(program)
    }

    fn parse_dotted_path(&mut self) -> Result<Vec<String>> {
        let mut path = vec![self.expect(TokenKind::Identifier, "identifier")?.lexeme];
        while self.matches(TokenKind::Dot) {
            if self.check(TokenKind::Star) {
                // handled by parse_import; a bare package path may not end in *
                return Err(self.error_here("'*' is only valid at the end of an import path"));
            }
            path.push(self.expect(TokenKind::Identifier, "identifier after '.'")?.lexeme);
        }
        Ok(path)
    }

    fn parse_import(&mut self) -> Result<Import> {
        let span = self.span_here();
        self.expect(TokenKind::Import, "'import'")?;
        let mut path = vec![self.expect(TokenKind::Identifier, "import path")?.lexeme];
        let mut wildcard = false;
        while self.matches(TokenKind::Dot) {
            if self.matches(TokenKind::Star) {
                wildcard = true;
                break;
            }
            path.push(self.expect(TokenKind::Identifier, "identifier after '.'")?.lexeme);
        }
        self.expect(TokenKind::Semicolon, "';' after import")?;
        Ok(Import { path, wildcard, span })
    }

    // ---- annotations ----

    fn parse_annotations(&mut self) -> Result<Vec<Annotation>> {
        let mut annotations = Vec::new();
        while self.check(TokenKind::At) {
            let span = self.span_here();
            self.advance();
            let name = self.expect(TokenKind::Identifier, "annotation name after '@'")?.lexeme;
            let value = match name.as_str() {
                "shots" => {
                    self.expect(TokenKind::LParen, "'(' after '@shots'")?;
                    let lit = self.expect(TokenKind::IntLiteral, "integer literal in '@shots'")?;
                    let n = lit.lexeme.parse::<i64>().map_err(|_| {
                        BlochError::parse(Span::new(lit.line, lit.col), "integer literal out of range")
                    })?;
                    self.expect(TokenKind::RParen, "')' after '@shots' count")?;
                    Some(n)
                }
                "tracked" | "quantum" => None,
                other => {
                    return Err(BlochError::parse(span, format!("unknown annotation '@{}'", other)));
                }
            };
            annotations.push(Annotation { name, value, span });
        }
        Ok(annotations)
    }

    fn reject_annotations(annotations: &[Annotation], context: &str, allowed: &[&str]) -> Result<()> {
        for a in annotations {
            if !allowed.contains(&a.name.as_str()) {
                return Err(BlochError::parse(
                    a.span,
                    format!("annotation '@{}' is not valid on {}", a.name, context),
                ));
            }
        }
        Ok(())
    }

    // ---- functions ----

    fn parse_function(&mut self, annotations: Vec<Annotation>) -> Result<FunctionDecl> {
        Self::reject_annotations(&annotations, "a function", &["quantum", "shots"])?;
        let span = self.span_here();
        self.expect(TokenKind::Function, "'function'")?;
        let name = self.expect(TokenKind::Identifier, "function name")?.lexeme;
        self.expect(TokenKind::LParen, "'(' after function name")?;
        let params = self.parse_params()?;
        self.expect(TokenKind::RParen, "')' after parameters")?;
        self.expect(TokenKind::Arrow, "'->' before return type")?;
        let return_type = self.parse_type()?;
        self.expect(TokenKind::LBrace, "'{' to open function body")?;
        let body = self.parse_block_statements()?;

        let quantum = annotations.iter().any(|a| a.name == "quantum");
        let shots = annotations.iter().find(|a| a.name == "shots").map(|a| {
            a.value.unwrap_or(0).max(0) as u64
        });
        Ok(FunctionDecl { quantum, shots, name, params, return_type, body, span })
    }

    fn parse_params(&mut self) -> Result<Vec<Param>> {
        let mut params = Vec::new();
        if self.check(TokenKind::RParen) {
            return Ok(params);
        }
        loop {
            let span = self.span_here();
            let ty = self.parse_type()?;
            let name = self.expect(TokenKind::Identifier, "parameter name")?.lexeme;
            params.push(Param { ty, name, span });
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        Ok(params)
    }

    // ---- classes ----

    fn parse_class(&mut self) -> Result<ClassDecl> {
        let span = self.span_here();
        let is_abstract = self.matches(TokenKind::Abstract);
        let is_static = if is_abstract { false } else { self.matches(TokenKind::Static) };
        self.expect(TokenKind::Class, "'class'")?;
        let name = self.expect(TokenKind::Identifier, "class name")?.lexeme;

        let mut type_params = Vec::new();
        if self.matches(TokenKind::Less) {
            loop {
                let p_span = self.span_here();
                let p_name = self.expect(TokenKind::Identifier, "type parameter name")?.lexeme;
                let bound = if self.matches(TokenKind::Extends) {
                    Some(self.parse_type()?)
                } else {
                    None
                };
                type_params.push(TypeParam { name: p_name, bound, span: p_span });
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::Greater, "'>' after type parameters")?;
        }

        let base = if self.matches(TokenKind::Extends) { Some(self.parse_type()?) } else { None };

        self.expect(TokenKind::LBrace, "'{' to open class body")?;
        let mut class = ClassDecl {
            name,
            is_abstract,
            is_static,
            type_params,
            base,
            fields: Vec::new(),
            methods: Vec::new(),
            constructors: Vec::new(),
            destructors: Vec::new(),
            span,
        };
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            self.parse_member(&mut class)?;
        }
        self.expect(TokenKind::RBrace, "'}' to close class body")?;
        Ok(class)
    }

    fn parse_member(&mut self, class: &mut ClassDecl) -> Result<()> {
        let mut annotations = self.parse_annotations()?;

        let default_vis =
            if class.is_static { Visibility::Public } else { Visibility::Private };
        let vis = match self.peek().kind {
            TokenKind::Public => {
                self.advance();
                Visibility::Public
            }
            TokenKind::Private => {
                self.advance();
                Visibility::Private
            }
            TokenKind::Protected => {
                self.advance();
                Visibility::Protected
            }
            _ => default_vis,
        };

        let mut is_static = false;
        let mut is_virtual = false;
        let mut is_override = false;
        let mut is_final = false;
        loop {
            let span = self.span_here();
            let (flag, name): (&mut bool, &str) = match self.peek().kind {
                TokenKind::Static => (&mut is_static, "static"),
                TokenKind::Virtual => (&mut is_virtual, "virtual"),
                TokenKind::Override => (&mut is_override, "override"),
                TokenKind::Final => (&mut is_final, "final"),
                _ => break,
            };
            if *flag {
                return Err(BlochError::parse(span, format!("duplicate modifier '{}'", name)));
            }
            *flag = true;
            self.advance();
        }

        // Trailing annotations are accepted after the modifier run
        annotations.extend(self.parse_annotations()?);

        match self.peek().kind {
            TokenKind::Constructor => {
                Self::reject_annotations(&annotations, "a constructor", &[])?;
                if is_static || is_virtual || is_override || is_final {
                    return Err(self.error_here("constructors accept no modifiers"));
                }
                let ctor = self.parse_constructor(&class.name, vis)?;
                class.constructors.push(ctor);
            }
            TokenKind::Destructor => {
                Self::reject_annotations(&annotations, "a destructor", &[])?;
                if is_static || is_virtual || is_override || is_final {
                    return Err(self.error_here("destructors accept no modifiers"));
                }
                let dtor = self.parse_destructor(vis)?;
                class.destructors.push(dtor);
            }
            TokenKind::Function => {
                Self::reject_annotations(&annotations, "a method", &["quantum"])?;
                if is_final {
                    return Err(self.error_here("'final' is only valid on fields"));
                }
                let quantum = annotations.iter().any(|a| a.name == "quantum");
                let method = self.parse_method(vis, is_static, is_virtual, is_override, quantum)?;
                class.methods.push(method);
            }
            _ => {
                Self::reject_annotations(&annotations, "a field", &["tracked"])?;
                if is_virtual || is_override {
                    return Err(self.error_here("'virtual' and 'override' are only valid on methods"));
                }
                let tracked = annotations.iter().any(|a| a.name == "tracked");
                let field = self.parse_field(vis, is_static, is_final, tracked)?;
                class.fields.push(field);
            }
        }
        Ok(())
    }

    fn parse_constructor(&mut self, class_name: &str, vis: Visibility) -> Result<ConstructorDecl> {
        let span = self.span_here();
        self.expect(TokenKind::Constructor, "'constructor'")?;
        self.expect(TokenKind::LParen, "'(' after 'constructor'")?;
        let params = self.parse_params()?;
        self.expect(TokenKind::RParen, "')' after constructor parameters")?;
        self.expect(TokenKind::Arrow, "'->' after constructor parameters")?;
        let ret_span = self.span_here();
        let return_type = self.parse_type()?;
        let ok = matches!(&return_type.kind, TypeKind::Named { name, .. } if name == class_name);
        if !ok {
            return Err(BlochError::parse(
                ret_span,
                format!("constructor must return the enclosing class '{}'", class_name),
            ));
        }

        if self.matches(TokenKind::Assign) {
            self.expect(TokenKind::Default, "'default' after '='")?;
            self.expect(TokenKind::Semicolon, "';' after '= default'")?;
            return Ok(ConstructorDecl { vis, params, body: None, is_default: true, span });
        }
        self.expect(TokenKind::LBrace, "'{' to open constructor body")?;
        let body = self.parse_block_statements()?;
        Ok(ConstructorDecl { vis, params, body: Some(body), is_default: false, span })
    }

    fn parse_destructor(&mut self, vis: Visibility) -> Result<DestructorDecl> {
        let span = self.span_here();
        self.expect(TokenKind::Destructor, "'destructor'")?;
        self.expect(TokenKind::LParen, "'(' after 'destructor'")?;
        self.expect(TokenKind::RParen, "destructors take no parameters")?;
        self.expect(TokenKind::Arrow, "'->' after 'destructor()'")?;
        let ret_span = self.span_here();
        let return_type = self.parse_type()?;
        if !return_type.is_void() {
            return Err(BlochError::parse(ret_span, "destructor must return 'void'"));
        }

        if self.matches(TokenKind::Assign) {
            self.expect(TokenKind::Default, "'default' after '='")?;
            self.expect(TokenKind::Semicolon, "';' after '= default'")?;
            return Ok(DestructorDecl { vis, body: None, is_default: true, span });
        }
        self.expect(TokenKind::LBrace, "'{' to open destructor body")?;
        let body = self.parse_block_statements()?;
        Ok(DestructorDecl { vis, body: Some(body), is_default: false, span })
    }

    fn parse_method(
        &mut self,
        vis: Visibility,
        is_static: bool,
        is_virtual: bool,
        is_override: bool,
        quantum: bool,
    ) -> Result<Method> {
        let span = self.span_here();
        self.expect(TokenKind::Function, "'function'")?;
        let name = self.expect(TokenKind::Identifier, "method name")?.lexeme;
        self.expect(TokenKind::LParen, "'(' after method name")?;
        let params = self.parse_params()?;
        self.expect(TokenKind::RParen, "')' after parameters")?;
        self.expect(TokenKind::Arrow, "'->' before return type")?;
        let return_type = self.parse_type()?;

        let body = if self.matches(TokenKind::Semicolon) {
            None
        } else {
            self.expect(TokenKind::LBrace, "'{' or ';' after method signature")?;
            Some(self.parse_block_statements()?)
        };
        Ok(Method { vis, is_static, is_virtual, is_override, quantum, name, params, return_type, body, span })
    }

    fn parse_field(
        &mut self,
        vis: Visibility,
        is_static: bool,
        is_final: bool,
        tracked: bool,
    ) -> Result<Field> {
        let span = self.span_here();
        let ty = self.parse_type()?;
        let name = self.expect(TokenKind::Identifier, "field name")?.lexeme;
        let init = if self.matches(TokenKind::Assign) { Some(self.parse_expression()?) } else { None };
        self.expect(TokenKind::Semicolon, "';' after field declaration")?;
        Ok(Field { vis, is_static, is_final, tracked, ty, name, init, span })
    }

    // ---- types ----

    fn parse_type(&mut self) -> Result<Type> {
        let span = self.span_here();
        let mut ty = if self.peek().kind.is_primitive_type() {
            let prim = match self.advance().kind {
                TokenKind::Int => Primitive::Int,
                TokenKind::Long => Primitive::Long,
                TokenKind::Float => Primitive::Float,
                TokenKind::Bit => Primitive::Bit,
                TokenKind::Boolean => Primitive::Boolean,
                TokenKind::Char => Primitive::Char,
                TokenKind::String => Primitive::String,
                TokenKind::Qubit => Primitive::Qubit,
                TokenKind::Void => Primitive::Void,
                _ => unreachable!(),
            };
            Type::primitive(prim, span)
        } else {
            let mut name = self.expect(TokenKind::Identifier, "type name")?.lexeme;
            while self.check(TokenKind::Dot) && self.kind_at(self.pos + 1) == TokenKind::Identifier {
                self.advance();
                name.push('.');
                name.push_str(&self.advance().lexeme);
            }
            let mut args = Vec::new();
            if self.matches(TokenKind::Less) {
                loop {
                    args.push(self.parse_type()?);
                    if !self.matches(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::Greater, "'>' after type arguments")?;
            }
            Type { kind: TypeKind::Named { name, args }, span }
        };

        while self.check(TokenKind::LBracket) {
            self.advance();
            let size = if self.check(TokenKind::RBracket) {
                None
            } else {
                Some(Box::new(self.parse_expression()?))
            };
            self.expect(TokenKind::RBracket, "']' after array size")?;
            ty = Type {
                kind: TypeKind::Array { elem: Box::new(ty), size, resolved_size: Cell::new(None) },
                span,
            };
        }
        Ok(ty)
    }

    // ---- declaration lookahead ----

    /// After an optional `final`, a statement is a variable declaration iff a
    /// type grammar followed by an identifier appears. Bounded lookahead
    /// only; nothing is consumed.
    fn looks_like_decl(&self) -> bool {
        let mut i = self.pos;
        if self.kind_at(i) == TokenKind::Final {
            i += 1;
        }
        if !self.scan_type(&mut i) {
            return false;
        }
        self.kind_at(i) == TokenKind::Identifier
    }

    fn scan_type(&self, i: &mut usize) -> bool {
        match self.kind_at(*i) {
            k if k.is_primitive_type() => {
                *i += 1;
            }
            TokenKind::Identifier => {
                *i += 1;
                while self.kind_at(*i) == TokenKind::Dot
                    && self.kind_at(*i + 1) == TokenKind::Identifier
                {
                    *i += 2;
                }
                if self.kind_at(*i) == TokenKind::Less {
                    let mut j = *i + 1;
                    if self.scan_type_args(&mut j) {
                        *i = j;
                    }
                }
            }
            _ => return false,
        }
        while self.kind_at(*i) == TokenKind::LBracket {
            let mut depth = 1usize;
            let mut j = *i + 1;
            loop {
                match self.kind_at(j) {
                    TokenKind::LBracket => depth += 1,
                    TokenKind::RBracket => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                    TokenKind::Eof | TokenKind::Semicolon | TokenKind::LBrace => return false,
                    _ => {}
                }
                j += 1;
            }
            *i = j + 1;
        }
        true
    }

    fn scan_type_args(&self, i: &mut usize) -> bool {
        loop {
            if !self.scan_type(i) {
                return false;
            }
            match self.kind_at(*i) {
                TokenKind::Comma => *i += 1,
                TokenKind::Greater => {
                    *i += 1;
                    return true;
                }
                _ => return false,
            }
        }
    }

    // ---- statements ----

    fn flush_pending(&mut self, out: &mut Vec<Stmt>) {
        while let Some(stmt) = self.pending.pop_front() {
            out.push(stmt);
        }
    }

    fn parse_block_statements(&mut self) -> Result<Vec<Stmt>> {
        let mut stmts = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            let stmt = self.parse_statement()?;
            stmts.push(stmt);
            self.flush_pending(&mut stmts);
        }
        self.expect(TokenKind::RBrace, "'}' to close block")?;
        Ok(stmts)
    }

    fn parse_statement(&mut self) -> Result<Stmt> {
        let span = self.span_here();
        match self.peek().kind {
            TokenKind::At => {
                let annotations = self.parse_annotations()?;
                self.parse_var_decl_with(annotations)
            }
            TokenKind::LBrace => {
                self.advance();
                let stmts = self.parse_block_statements()?;
                Ok(Stmt { kind: StmtKind::Block(stmts), span })
            }
            TokenKind::Return => {
                self.advance();
                let value = if self.check(TokenKind::Semicolon) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.expect(TokenKind::Semicolon, "';' after return")?;
                Ok(Stmt { kind: StmtKind::Return(value), span })
            }
            TokenKind::If => self.parse_if(),
            TokenKind::While => {
                self.advance();
                self.expect(TokenKind::LParen, "'(' after 'while'")?;
                let cond = self.parse_expression()?;
                self.expect(TokenKind::RParen, "')' after condition")?;
                let body = Box::new(self.parse_statement()?);
                Ok(Stmt { kind: StmtKind::While { cond, body }, span })
            }
            TokenKind::For => self.parse_for(),
            TokenKind::Echo => {
                self.advance();
                self.expect(TokenKind::LParen, "'(' after 'echo'")?;
                let value = self.parse_expression()?;
                self.expect(TokenKind::RParen, "')' after echo argument")?;
                self.expect(TokenKind::Semicolon, "';' after echo")?;
                Ok(Stmt { kind: StmtKind::Echo(value), span })
            }
            TokenKind::Reset => {
                self.advance();
                let target = self.parse_expression()?;
                self.expect(TokenKind::Semicolon, "';' after reset")?;
                Ok(Stmt { kind: StmtKind::Reset(target), span })
            }
            TokenKind::Measure => {
                self.advance();
                let target = self.parse_unary()?;
                self.expect(TokenKind::Semicolon, "';' after measure")?;
                Ok(Stmt { kind: StmtKind::MeasureStmt(target), span })
            }
            TokenKind::Destroy => {
                self.advance();
                let target = self.parse_expression()?;
                self.expect(TokenKind::Semicolon, "';' after destroy")?;
                Ok(Stmt { kind: StmtKind::Destroy(target), span })
            }
            TokenKind::Final => self.parse_var_decl_with(Vec::new()),
            _ if self.looks_like_decl() => self.parse_var_decl_with(Vec::new()),
            _ => self.parse_expr_or_ternary_statement(),
        }
    }

    fn parse_if(&mut self) -> Result<Stmt> {
        let span = self.span_here();
        self.expect(TokenKind::If, "'if'")?;
        self.expect(TokenKind::LParen, "'(' after 'if'")?;
        let cond = self.parse_expression()?;
        self.expect(TokenKind::RParen, "')' after condition")?;
        let then_branch = Box::new(self.parse_statement()?);
        let else_branch = if self.matches(TokenKind::Else) {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(Stmt { kind: StmtKind::If { cond, then_branch, else_branch }, span })
    }

    fn parse_for(&mut self) -> Result<Stmt> {
        let span = self.span_here();
        self.expect(TokenKind::For, "'for'")?;
        self.expect(TokenKind::LParen, "'(' after 'for'")?;

        let init = if self.matches(TokenKind::Semicolon) {
            None
        } else if self.check(TokenKind::Final) || self.looks_like_decl() {
            Some(Box::new(self.parse_var_decl_with(Vec::new())?))
        } else {
            let e = self.parse_expression()?;
            let e_span = e.span;
            self.expect(TokenKind::Semicolon, "';' after for initialiser")?;
            Some(Box::new(Stmt { kind: StmtKind::Expr(e), span: e_span }))
        };

        let cond = if self.check(TokenKind::Semicolon) { None } else { Some(self.parse_expression()?) };
        self.expect(TokenKind::Semicolon, "';' after for condition")?;

        let step = if self.check(TokenKind::RParen) {
            None
        } else {
            let e = self.parse_expression()?;
            let e_span = e.span;
            Some(Box::new(Stmt { kind: StmtKind::Expr(e), span: e_span }))
        };
        self.expect(TokenKind::RParen, "')' after for clauses")?;
        let body = Box::new(self.parse_statement()?);
        Ok(Stmt { kind: StmtKind::For { init, cond, step, body }, span })
    }

    fn parse_var_decl_with(&mut self, annotations: Vec<Annotation>) -> Result<Stmt> {
        Self::reject_annotations(&annotations, "a variable declaration", &["tracked"])?;
        let tracked = annotations.iter().any(|a| a.name == "tracked");
        let span = self.span_here();
        let is_final = self.matches(TokenKind::Final);
        let ty = self.parse_type()?;
        let name = self.expect(TokenKind::Identifier, "variable name")?.lexeme;
        let init = if self.matches(TokenKind::Assign) { Some(self.parse_expression()?) } else { None };

        // Multi-declaration is reserved for qubits: `qubit a, b, c;`
        while self.check(TokenKind::Comma) {
            let comma_span = self.span_here();
            if !ty.is_qubit() || init.is_some() {
                return Err(BlochError::parse(
                    comma_span,
                    "multi-variable declarations are only allowed for qubits",
                ));
            }
            self.advance();
            let extra_span = self.span_here();
            let extra_name = self.expect(TokenKind::Identifier, "variable name after ','")?.lexeme;
            self.pending.push_back(Stmt {
                kind: StmtKind::VarDecl {
                    is_final,
                    tracked,
                    ty: ty.clone(),
                    name: extra_name,
                    init: None,
                },
                span: extra_span,
            });
        }

        self.expect(TokenKind::Semicolon, "';' after variable declaration")?;
        Ok(Stmt { kind: StmtKind::VarDecl { is_final, tracked, ty, name, init }, span })
    }

    fn parse_expr_or_ternary_statement(&mut self) -> Result<Stmt> {
        let span = self.span_here();
        let expr = self.parse_expression()?;

        if self.matches(TokenKind::Question) {
            let then_branch = Box::new(self.parse_ternary_arm()?);
            self.expect(TokenKind::Colon, "':' between ternary arms")?;
            let else_branch = Box::new(self.parse_ternary_arm()?);
            self.expect(TokenKind::Semicolon, "';' after ternary statement")?;
            return Ok(Stmt { kind: StmtKind::Ternary { cond: expr, then_branch, else_branch }, span });
        }

        self.expect(TokenKind::Semicolon, "';' after expression")?;
        Ok(Stmt { kind: StmtKind::Expr(expr), span })
    }

    /// A ternary arm is an assignment or a call, without its own semicolon.
    fn parse_ternary_arm(&mut self) -> Result<Stmt> {
        let span = self.span_here();
        let expr = self.parse_expression()?;
        match expr.kind {
            ExprKind::Assign { .. }
            | ExprKind::Call { .. }
            | ExprKind::MethodCall { .. }
            | ExprKind::SuperCall { .. }
            | ExprKind::Postfix { .. } => Ok(Stmt { kind: StmtKind::Expr(expr), span }),
            _ => Err(BlochError::parse(span, "ternary statement arm must be an assignment or a call")),
        }
    }

    // ---- expressions ----

    pub fn parse_expression(&mut self) -> Result<Expr> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr> {
        let expr = self.parse_logical_or()?;
        if self.check(TokenKind::Assign) {
            let span = self.span_here();
            match expr.kind {
                ExprKind::Variable(_) | ExprKind::Member { .. } | ExprKind::Index { .. } => {}
                _ => return Err(BlochError::parse(expr.span, "invalid assignment target")),
            }
            self.advance();
            let value = self.parse_assignment()?;
            return Ok(self.expr(
                ExprKind::Assign { target: Box::new(expr), value: Box::new(value) },
                span,
            ));
        }
        Ok(expr)
    }

    fn parse_binary_level<F>(
        &mut self,
        ops: &[(TokenKind, BinaryOp)],
        mut next: F,
    ) -> Result<Expr>
    where
        F: FnMut(&mut Self) -> Result<Expr>,
    {
        let mut lhs = next(self)?;
        'outer: loop {
            for (kind, op) in ops {
                if self.check(*kind) {
                    let span = self.span_here();
                    self.advance();
                    let rhs = next(self)?;
                    lhs = self.expr(
                        ExprKind::Binary { op: *op, lhs: Box::new(lhs), rhs: Box::new(rhs) },
                        span,
                    );
                    continue 'outer;
                }
            }
            break;
        }
        Ok(lhs)
    }

    fn parse_logical_or(&mut self) -> Result<Expr> {
        self.parse_binary_level(&[(TokenKind::PipePipe, BinaryOp::Or)], Self::parse_logical_and)
    }

    fn parse_logical_and(&mut self) -> Result<Expr> {
        self.parse_binary_level(&[(TokenKind::AmpAmp, BinaryOp::And)], Self::parse_bit_or)
    }

    fn parse_bit_or(&mut self) -> Result<Expr> {
        self.parse_binary_level(&[(TokenKind::Pipe, BinaryOp::BitOr)], Self::parse_bit_xor)
    }

    fn parse_bit_xor(&mut self) -> Result<Expr> {
        self.parse_binary_level(&[(TokenKind::Caret, BinaryOp::BitXor)], Self::parse_bit_and)
    }

    fn parse_bit_and(&mut self) -> Result<Expr> {
        self.parse_binary_level(&[(TokenKind::Amp, BinaryOp::BitAnd)], Self::parse_equality)
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        self.parse_binary_level(
            &[(TokenKind::EqEq, BinaryOp::Eq), (TokenKind::NotEq, BinaryOp::NotEq)],
            Self::parse_comparison,
        )
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        self.parse_binary_level(
            &[
                (TokenKind::Less, BinaryOp::Less),
                (TokenKind::LessEq, BinaryOp::LessEq),
                (TokenKind::Greater, BinaryOp::Greater),
                (TokenKind::GreaterEq, BinaryOp::GreaterEq),
            ],
            Self::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        self.parse_binary_level(
            &[(TokenKind::Plus, BinaryOp::Add), (TokenKind::Minus, BinaryOp::Sub)],
            Self::parse_multiplicative,
        )
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        self.parse_binary_level(
            &[
                (TokenKind::Star, BinaryOp::Mul),
                (TokenKind::Slash, BinaryOp::Div),
                (TokenKind::Percent, BinaryOp::Mod),
            ],
            Self::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let span = self.span_here();
        let op = match self.peek().kind {
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Bang => Some(UnaryOp::Not),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(self.expr(ExprKind::Unary { op, operand: Box::new(operand) }, span));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek().kind {
                TokenKind::LParen => {
                    let span = expr.span;
                    self.advance();
                    let args = self.parse_args()?;
                    expr = match expr.kind {
                        ExprKind::Variable(name) => self.expr(ExprKind::Call { name, args }, span),
                        ExprKind::Member { target, name } => {
                            self.expr(ExprKind::MethodCall { recv: target, name, args }, span)
                        }
                        _ => {
                            return Err(BlochError::parse(span, "expression is not callable"));
                        }
                    };
                }
                TokenKind::Dot => {
                    let span = self.span_here();
                    self.advance();
                    let name = self.expect(TokenKind::Identifier, "member name after '.'")?.lexeme;
                    expr = self.expr(ExprKind::Member { target: Box::new(expr), name }, span);
                }
                TokenKind::LBracket => {
                    let span = self.span_here();
                    self.advance();
                    let index = self.parse_expression()?;
                    // a[-1] with a literal operand never makes sense
                    if let ExprKind::Unary { op: UnaryOp::Neg, operand } = &index.kind {
                        if matches!(operand.kind, ExprKind::Literal(Literal::Int(_) | Literal::Long(_))) {
                            return Err(BlochError::parse(index.span, "array index may not be negative"));
                        }
                    }
                    self.expect(TokenKind::RBracket, "']' after index")?;
                    expr = self.expr(
                        ExprKind::Index { target: Box::new(expr), index: Box::new(index) },
                        span,
                    );
                }
                TokenKind::PlusPlus | TokenKind::MinusMinus => {
                    let span = self.span_here();
                    let op = if self.advance().kind == TokenKind::PlusPlus {
                        PostfixOp::Increment
                    } else {
                        PostfixOp::Decrement
                    };
                    match expr.kind {
                        ExprKind::Variable(_) | ExprKind::Member { .. } | ExprKind::Index { .. } => {}
                        _ => return Err(BlochError::parse(span, "'++'/'--' need a variable, field or element")),
                    }
                    expr = self.expr(ExprKind::Postfix { op, target: Box::new(expr) }, span);
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.check(TokenKind::RParen) {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.parse_expression()?);
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen, "')' after arguments")?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let span = self.span_here();
        let token = self.peek().clone();
        match token.kind {
            TokenKind::IntLiteral => {
                self.advance();
                let value = token.lexeme.parse::<i64>().map_err(|_| {
                    BlochError::parse(span, format!("integer literal '{}' out of range", token.lexeme))
                })?;
                Ok(self.expr(ExprKind::Literal(Literal::Int(value)), span))
            }
            TokenKind::LongLiteral => {
                self.advance();
                let digits = token.lexeme.trim_end_matches('L');
                let value = digits.parse::<i64>().map_err(|_| {
                    BlochError::parse(span, format!("long literal '{}' out of range", token.lexeme))
                })?;
                Ok(self.expr(ExprKind::Literal(Literal::Long(value)), span))
            }
            TokenKind::FloatLiteral => {
                self.advance();
                let digits = token.lexeme.trim_end_matches('f');
                let value = digits.parse::<f64>().map_err(|_| {
                    BlochError::parse(span, format!("malformed float literal '{}'", token.lexeme))
                })?;
                Ok(self.expr(ExprKind::Literal(Literal::Float(value)), span))
            }
            TokenKind::BitLiteral => {
                self.advance();
                let value = if token.lexeme.starts_with('1') { 1 } else { 0 };
                Ok(self.expr(ExprKind::Literal(Literal::Bit(value)), span))
            }
            TokenKind::True | TokenKind::False => {
                self.advance();
                Ok(self.expr(ExprKind::Literal(Literal::Boolean(token.kind == TokenKind::True)), span))
            }
            TokenKind::CharLiteral => {
                self.advance();
                let c = token.lexeme.chars().nth(1).unwrap_or('\0');
                Ok(self.expr(ExprKind::Literal(Literal::Char(c)), span))
            }
            TokenKind::StringLiteral => {
                self.advance();
                let text = token.lexeme[1..token.lexeme.len() - 1].to_string();
                Ok(self.expr(ExprKind::Literal(Literal::Str(text)), span))
            }
            TokenKind::Null => {
                self.advance();
                Ok(self.expr(ExprKind::Null, span))
            }
            TokenKind::This => {
                self.advance();
                Ok(self.expr(ExprKind::This, span))
            }
            TokenKind::Super => {
                self.advance();
                if self.matches(TokenKind::Dot) {
                    let name = self.expect(TokenKind::Identifier, "method name after 'super.'")?.lexeme;
                    self.expect(TokenKind::LParen, "'(' after 'super.' method")?;
                    let args = self.parse_args()?;
                    Ok(self.expr(ExprKind::SuperCall { method: Some(name), args }, span))
                } else {
                    self.expect(TokenKind::LParen, "'(' after 'super'")?;
                    let args = self.parse_args()?;
                    Ok(self.expr(ExprKind::SuperCall { method: None, args }, span))
                }
            }
            TokenKind::Measure => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(self.expr(ExprKind::Measure(Box::new(operand)), span))
            }
            TokenKind::New => {
                self.advance();
                let class = self.expect(TokenKind::Identifier, "class name after 'new'")?.lexeme;
                let mut type_args = Vec::new();
                if self.matches(TokenKind::Less) {
                    loop {
                        type_args.push(self.parse_type()?);
                        if !self.matches(TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(TokenKind::Greater, "'>' after type arguments")?;
                }
                self.expect(TokenKind::LParen, "'(' after class name")?;
                let args = self.parse_args()?;
                Ok(self.expr(ExprKind::New { class, type_args, args }, span))
            }
            TokenKind::Identifier => {
                self.advance();
                Ok(self.expr(ExprKind::Variable(token.lexeme), span))
            }
            TokenKind::LParen => {
                // `(int) e` and friends are casts; anything else is grouping
                if self.kind_at(self.pos + 1).is_primitive_type()
                    && self.kind_at(self.pos + 2) == TokenKind::RParen
                {
                    self.advance();
                    let target = match self.advance().kind {
                        TokenKind::Int => Primitive::Int,
                        TokenKind::Long => Primitive::Long,
                        TokenKind::Float => Primitive::Float,
                        TokenKind::Bit => Primitive::Bit,
                        TokenKind::Boolean => Primitive::Boolean,
                        TokenKind::Char => Primitive::Char,
                        TokenKind::String => Primitive::String,
                        TokenKind::Qubit => Primitive::Qubit,
                        TokenKind::Void => Primitive::Void,
                        _ => unreachable!(),
                    };
                    self.advance(); // ')'
                    let operand = self.parse_unary()?;
                    return Ok(self.expr(ExprKind::Cast { target, operand: Box::new(operand) }, span));
                }
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(TokenKind::RParen, "')' after expression")?;
                Ok(inner)
            }
            TokenKind::LBrace => {
                self.advance();
                let mut elements = Vec::new();
                if !self.check(TokenKind::RBrace) {
                    loop {
                        elements.push(self.parse_expression()?);
                        if !self.matches(TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::RBrace, "'}' after array literal")?;
                Ok(self.expr(ExprKind::ArrayLiteral(elements), span))
            }
            _ => Err(self.error_here(format!("expected expression, found '{}'", self.describe_current()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse_ok(source: &str) -> Program {
        parse(tokenize(source).unwrap()).unwrap()
    }

    fn parse_err(source: &str) -> BlochError {
        match tokenize(source).and_then(parse) {
            Ok(_) => panic!("expected a parse failure for: {}", source),
            Err(e) => e,
        }
    }

    #[test]
    fn parses_main_with_declaration() {
        let program = parse_ok("function main() -> void { int a = 2 + 3; echo(a); }");
        assert_eq!(program.functions.len(), 1);
        assert_eq!(program.functions[0].name, "main");
        assert_eq!(program.functions[0].body.len(), 2);
    }

    #[test]
    fn qubit_multi_declaration_expands_in_order() {
        let program = parse_ok("function main() -> void { qubit a, b, c; h(a); }");
        let body = &program.functions[0].body;
        assert_eq!(body.len(), 4);
        let names: Vec<_> = body[..3]
            .iter()
            .map(|s| match &s.kind {
                StmtKind::VarDecl { name, .. } => name.clone(),
                _ => panic!("expected declarations"),
            })
            .collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn non_qubit_multi_declaration_fails() {
        let err = parse_err("function main() -> void { int a, b; }");
        assert_eq!(err.category(), "Parse");
    }

    #[test]
    fn literal_negative_index_fails() {
        let err = parse_err("function main() -> void { int[] a; echo(a[-1]); }");
        assert_eq!(err.category(), "Parse");
    }

    #[test]
    fn cast_is_distinguished_from_grouping() {
        let program = parse_ok("function main() -> void { float x = (float) 3; int y = (3); }");
        let body = &program.functions[0].body;
        match &body[0].kind {
            StmtKind::VarDecl { init: Some(e), .. } => {
                assert!(matches!(e.kind, ExprKind::Cast { target: Primitive::Float, .. }));
            }
            _ => panic!("expected declaration with cast"),
        }
        match &body[1].kind {
            StmtKind::VarDecl { init: Some(e), .. } => {
                assert!(matches!(e.kind, ExprKind::Literal(Literal::Int(3))));
            }
            _ => panic!("expected declaration"),
        }
    }

    #[test]
    fn generic_class_with_bound_parses() {
        let program = parse_ok(
            "class Box<T extends Base> extends Root { public T v; \
             public constructor(T v) -> Box<T> { this.v = v; return this; } }",
        );
        let class = &program.classes[0];
        assert_eq!(class.type_params.len(), 1);
        assert!(class.type_params[0].bound.is_some());
        assert!(class.base.is_some());
        assert_eq!(class.constructors.len(), 1);
    }

    #[test]
    fn constructor_must_return_its_class() {
        let err = parse_err("class A { public constructor() -> B { return this; } }");
        assert_eq!(err.category(), "Parse");
    }

    #[test]
    fn default_visibility_follows_class_kind() {
        let program = parse_ok("static class M { int x; } class C { int y; }");
        assert_eq!(program.classes[0].fields[0].vis, Visibility::Public);
        assert_eq!(program.classes[1].fields[0].vis, Visibility::Private);
    }

    #[test]
    fn annotations_attach_where_allowed() {
        let program = parse_ok(
            "@quantum function flip() -> bit { qubit q; return measure q; } \
             @shots(3) function main() -> void { @tracked qubit q; }",
        );
        assert!(program.functions[0].quantum);
        assert_eq!(program.functions[1].shots, Some(3));
        match &program.functions[1].body[0].kind {
            StmtKind::VarDecl { tracked, .. } => assert!(tracked),
            _ => panic!("expected declaration"),
        }
    }

    #[test]
    fn tracked_on_function_is_a_parse_error() {
        let err = parse_err("@tracked function main() -> void { }");
        assert_eq!(err.category(), "Parse");
    }

    #[test]
    fn ternary_statement_parses() {
        let program = parse_ok("function main() -> void { int a = 0; a == 0 ? a = 1 : a = 2; }");
        assert!(matches!(program.functions[0].body[1].kind, StmtKind::Ternary { .. }));
    }

    #[test]
    fn measure_expression_and_statement() {
        let program = parse_ok("function main() -> void { qubit q; measure q; bit b = measure q; }");
        let body = &program.functions[0].body;
        assert!(matches!(body[1].kind, StmtKind::MeasureStmt(_)));
        match &body[2].kind {
            StmtKind::VarDecl { init: Some(e), .. } => {
                assert!(matches!(e.kind, ExprKind::Measure(_)));
            }
            _ => panic!("expected declaration"),
        }
    }

    #[test]
    fn comparison_is_not_mistaken_for_generic() {
        let program = parse_ok("function main() -> void { int x = 1; int y = 2; boolean b = x < y; }");
        assert_eq!(program.functions[0].body.len(), 3);
    }

    #[test]
    fn parse_error_carries_position() {
        let err = parse_err("function main() -> void {\n  int a = ;\n}");
        assert_eq!(err.line(), 2);
    }
}
