use std::collections::HashMap;

use lazy_static::lazy_static;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Declaration keywords
    Import,
    Package,
    Class,
    Abstract,
    Static,
    Final,
    Virtual,
    Override,
    Constructor,
    Destructor,
    Default,
    Extends,
    Function,
    Public,
    Private,
    Protected,

    // Statement keywords
    Return,
    If,
    Else,
    While,
    For,
    Echo,
    Reset,
    Measure,
    Destroy,
    New,

    // Expression keywords
    Null,
    This,
    Super,
    True,
    False,

    // Type keywords
    Int,
    Long,
    Float,
    Bit,
    Boolean,
    Char,
    String,
    Qubit,
    Void,

    // Literals (lexeme keeps the raw text, suffix and quotes included)
    IntLiteral,
    LongLiteral,
    FloatLiteral,
    BitLiteral,
    CharLiteral,
    StringLiteral,

    Identifier,

    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Dot,
    Colon,
    Question,
    At,

    // Operators
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Less,
    Greater,
    Bang,
    Tilde,
    Amp,
    Pipe,
    Caret,
    Arrow,
    EqEq,
    NotEq,
    LessEq,
    GreaterEq,
    AmpAmp,
    PipePipe,
    PlusPlus,
    MinusMinus,

    Eof,
}

/// One lexed token. Line and column are 1-based; the lexeme preserves the
/// original source text, which matters for numeric suffixes and quotes.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub line: usize,
    pub col: usize,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, line: usize, col: usize) -> Self {
        Self { kind, lexeme: lexeme.into(), line, col }
    }
}

lazy_static! {
    /// Reserved-word table. Identifiers that merely begin with one of these
    /// stay identifiers; only exact matches become keywords.
    pub static ref KEYWORDS: HashMap<&'static str, TokenKind> = {
        let mut m = HashMap::new();
        m.insert("import", TokenKind::Import);
        m.insert("package", TokenKind::Package);
        m.insert("class", TokenKind::Class);
        m.insert("abstract", TokenKind::Abstract);
        m.insert("static", TokenKind::Static);
        m.insert("final", TokenKind::Final);
        m.insert("virtual", TokenKind::Virtual);
        m.insert("override", TokenKind::Override);
        m.insert("constructor", TokenKind::Constructor);
        m.insert("destructor", TokenKind::Destructor);
        m.insert("default", TokenKind::Default);
        m.insert("extends", TokenKind::Extends);
        m.insert("function", TokenKind::Function);
        m.insert("public", TokenKind::Public);
        m.insert("private", TokenKind::Private);
        m.insert("protected", TokenKind::Protected);
        m.insert("return", TokenKind::Return);
        m.insert("if", TokenKind::If);
        m.insert("else", TokenKind::Else);
        m.insert("while", TokenKind::While);
        m.insert("for", TokenKind::For);
        m.insert("echo", TokenKind::Echo);
        m.insert("reset", TokenKind::Reset);
        m.insert("measure", TokenKind::Measure);
        m.insert("destroy", TokenKind::Destroy);
        m.insert("new", TokenKind::New);
        m.insert("null", TokenKind::Null);
        m.insert("this", TokenKind::This);
        m.insert("super", TokenKind::Super);
        m.insert("true", TokenKind::True);
        m.insert("false", TokenKind::False);
        m.insert("int", TokenKind::Int);
        m.insert("long", TokenKind::Long);
        m.insert("float", TokenKind::Float);
        m.insert("bit", TokenKind::Bit);
        m.insert("boolean", TokenKind::Boolean);
        m.insert("char", TokenKind::Char);
        m.insert("string", TokenKind::String);
        m.insert("qubit", TokenKind::Qubit);
        m.insert("void", TokenKind::Void);
        m
    };
}

impl TokenKind {
    pub fn is_primitive_type(self) -> bool {
        matches!(
            self,
            TokenKind::Int
                | TokenKind::Long
                | TokenKind::Float
                | TokenKind::Bit
                | TokenKind::Boolean
                | TokenKind::Char
                | TokenKind::String
                | TokenKind::Qubit
                | TokenKind::Void
        )
    }

    pub fn describe(self) -> &'static str {
        match self {
            TokenKind::Identifier => "identifier",
            TokenKind::IntLiteral => "int literal",
            TokenKind::LongLiteral => "long literal",
            TokenKind::FloatLiteral => "float literal",
            TokenKind::BitLiteral => "bit literal",
            TokenKind::CharLiteral => "char literal",
            TokenKind::StringLiteral => "string literal",
            TokenKind::LParen => "'('",
            TokenKind::RParen => "')'",
            TokenKind::LBrace => "'{'",
            TokenKind::RBrace => "'}'",
            TokenKind::LBracket => "'['",
            TokenKind::RBracket => "']'",
            TokenKind::Comma => "','",
            TokenKind::Semicolon => "';'",
            TokenKind::Dot => "'.'",
            TokenKind::Colon => "':'",
            TokenKind::Question => "'?'",
            TokenKind::At => "'@'",
            TokenKind::Assign => "'='",
            TokenKind::Arrow => "'->'",
            TokenKind::Eof => "end of input",
            _ => "token",
        }
    }
}
