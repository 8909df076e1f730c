use thiserror::Error;

use crate::ast::Span;

/// Every phase of the pipeline fails fast with one of these. The message is
/// what lands on the second line of the driver's failure banner.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BlochError {
    #[error("Lexical error at {line}:{col}: {message}")]
    Lexical { line: usize, col: usize, message: String },

    #[error("Parse error at {line}:{col}: {message}")]
    Parse { line: usize, col: usize, message: String },

    #[error("Semantic error at {line}:{col}: {message}")]
    Semantic { line: usize, col: usize, message: String },

    #[error("Runtime error at {line}:{col}: {message}")]
    Runtime { line: usize, col: usize, message: String },
}

impl BlochError {
    pub fn lexical(line: usize, col: usize, message: impl Into<String>) -> Self {
        Self::Lexical { line, col, message: message.into() }
    }

    pub fn parse(span: Span, message: impl Into<String>) -> Self {
        Self::Parse { line: span.line, col: span.col, message: message.into() }
    }

    pub fn semantic(span: Span, message: impl Into<String>) -> Self {
        Self::Semantic { line: span.line, col: span.col, message: message.into() }
    }

    pub fn runtime(span: Span, message: impl Into<String>) -> Self {
        Self::Runtime { line: span.line, col: span.col, message: message.into() }
    }

    pub fn category(&self) -> &'static str {
        match self {
            Self::Lexical { .. } => "Lexical",
            Self::Parse { .. } => "Parse",
            Self::Semantic { .. } => "Semantic",
            Self::Runtime { .. } => "Runtime",
        }
    }

    pub fn line(&self) -> usize {
        match self {
            Self::Lexical { line, .. }
            | Self::Parse { line, .. }
            | Self::Semantic { line, .. }
            | Self::Runtime { line, .. } => *line,
        }
    }

    pub fn col(&self) -> usize {
        match self {
            Self::Lexical { col, .. }
            | Self::Parse { col, .. }
            | Self::Semantic { col, .. }
            | Self::Runtime { col, .. } => *col,
        }
    }
}

pub type Result<T> = std::result::Result<T, BlochError>;
