use crate::error::{BlochError, Result};
use crate::token::{Token, TokenKind, KEYWORDS};

/// Hand-written scanner over the raw source text. Produces a token stream
/// terminated by a single EOF token, or the first lexical error.
pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
}

pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    Lexer::new(source).run()
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self { chars: source.chars().collect(), pos: 0, line: 1, col: 1 }
    }

    fn run(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia();
            if self.at_end() {
                tokens.push(Token::new(TokenKind::Eof, "", self.line, self.col));
                return Ok(tokens);
            }
            tokens.push(self.next_token()?);
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> char {
        let c = self.chars[self.pos];
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        c
    }

    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else if c == '/' && self.peek_at(1) == Some('/') {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.bump();
                }
            } else {
                break;
            }
        }
    }

    fn next_token(&mut self) -> Result<Token> {
        let line = self.line;
        let col = self.col;
        let c = self.peek().unwrap();

        if c.is_ascii_alphabetic() || c == '_' {
            return Ok(self.identifier_or_keyword(line, col));
        }
        if c.is_ascii_digit() {
            return self.number(line, col);
        }
        if c == '\'' {
            return self.char_literal(line, col);
        }
        if c == '"' {
            return self.string_literal(line, col);
        }
        self.operator(line, col)
    }

    fn identifier_or_keyword(&mut self, line: usize, col: usize) -> Token {
        let mut lexeme = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                lexeme.push(self.bump());
            } else {
                break;
            }
        }
        let kind = KEYWORDS.get(lexeme.as_str()).copied().unwrap_or(TokenKind::Identifier);
        Token::new(kind, lexeme, line, col)
    }

    /// Numeric literals carry a mandatory disambiguating suffix: bare digits
    /// are int, `L` is long, `f` is float (required whenever a fractional
    /// part is present), and a single `0`/`1` before `b` is a bit.
    fn number(&mut self, line: usize, col: usize) -> Result<Token> {
        let mut lexeme = String::new();
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            lexeme.push(self.bump());
        }

        let mut fractional = false;
        if self.peek() == Some('.') && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) {
            fractional = true;
            lexeme.push(self.bump());
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                lexeme.push(self.bump());
            }
        } else if self.peek() == Some('.') && !matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) {
            // A trailing '.' with no digits is never valid in a number
            lexeme.push(self.bump());
            return Err(BlochError::lexical(
                line,
                col,
                format!("malformed numeric literal '{}'", lexeme),
            ));
        }

        let kind = match self.peek() {
            Some('f') => {
                lexeme.push(self.bump());
                TokenKind::FloatLiteral
            }
            Some('L') if !fractional => {
                lexeme.push(self.bump());
                TokenKind::LongLiteral
            }
            Some('b') if !fractional => {
                lexeme.push(self.bump());
                if lexeme != "0b" && lexeme != "1b" {
                    return Err(BlochError::lexical(
                        line,
                        col,
                        format!("malformed bit literal '{}': expected '0b' or '1b'", lexeme),
                    ));
                }
                TokenKind::BitLiteral
            }
            _ if fractional => {
                return Err(BlochError::lexical(
                    line,
                    col,
                    format!("malformed numeric literal '{}': float literals require an 'f' suffix", lexeme),
                ));
            }
            _ => TokenKind::IntLiteral,
        };

        // `3fx`, `12Lq` and friends are one malformed literal, not two tokens
        if matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
                lexeme.push(self.bump());
            }
            return Err(BlochError::lexical(
                line,
                col,
                format!("malformed numeric literal '{}'", lexeme),
            ));
        }

        Ok(Token::new(kind, lexeme, line, col))
    }

    fn char_literal(&mut self, line: usize, col: usize) -> Result<Token> {
        let mut lexeme = String::new();
        lexeme.push(self.bump()); // opening quote
        match self.peek() {
            None | Some('\n') | Some('\'') => {
                return Err(BlochError::lexical(line, col, "unterminated character literal"));
            }
            Some(_) => lexeme.push(self.bump()),
        }
        if self.peek() != Some('\'') {
            return Err(BlochError::lexical(line, col, "unterminated character literal"));
        }
        lexeme.push(self.bump());
        Ok(Token::new(TokenKind::CharLiteral, lexeme, line, col))
    }

    /// Strings may span lines; there are no escape sequences.
    fn string_literal(&mut self, line: usize, col: usize) -> Result<Token> {
        let mut lexeme = String::new();
        lexeme.push(self.bump());
        loop {
            match self.peek() {
                None => {
                    return Err(BlochError::lexical(line, col, "unterminated string literal"));
                }
                Some('"') => {
                    lexeme.push(self.bump());
                    return Ok(Token::new(TokenKind::StringLiteral, lexeme, line, col));
                }
                Some(_) => lexeme.push(self.bump()),
            }
        }
    }

    fn operator(&mut self, line: usize, col: usize) -> Result<Token> {
        let c = self.bump();
        let two = |lexer: &mut Self, kind, lexeme: &str| {
            lexer.bump();
            Ok(Token::new(kind, lexeme, line, col))
        };

        match (c, self.peek()) {
            ('-', Some('>')) => return two(self, TokenKind::Arrow, "->"),
            ('=', Some('=')) => return two(self, TokenKind::EqEq, "=="),
            ('!', Some('=')) => return two(self, TokenKind::NotEq, "!="),
            ('<', Some('=')) => return two(self, TokenKind::LessEq, "<="),
            ('>', Some('=')) => return two(self, TokenKind::GreaterEq, ">="),
            ('&', Some('&')) => return two(self, TokenKind::AmpAmp, "&&"),
            ('|', Some('|')) => return two(self, TokenKind::PipePipe, "||"),
            ('+', Some('+')) => return two(self, TokenKind::PlusPlus, "++"),
            ('-', Some('-')) => return two(self, TokenKind::MinusMinus, "--"),
            _ => {}
        }

        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            '.' => TokenKind::Dot,
            ':' => TokenKind::Colon,
            '?' => TokenKind::Question,
            '@' => TokenKind::At,
            '=' => TokenKind::Assign,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '<' => TokenKind::Less,
            '>' => TokenKind::Greater,
            '!' => TokenKind::Bang,
            '~' => TokenKind::Tilde,
            '&' => TokenKind::Amp,
            '|' => TokenKind::Pipe,
            '^' => TokenKind::Caret,
            _ => {
                return Err(BlochError::lexical(line, col, format!("unknown character '{}'", c)));
            }
        };
        Ok(Token::new(kind, c.to_string(), line, col))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn suffixes_pick_literal_kinds() {
        assert_eq!(
            kinds("12 12L 3f 3.14f 0b 1b"),
            vec![
                TokenKind::IntLiteral,
                TokenKind::LongLiteral,
                TokenKind::FloatLiteral,
                TokenKind::FloatLiteral,
                TokenKind::BitLiteral,
                TokenKind::BitLiteral,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn float_without_suffix_is_lexical_error() {
        let err = tokenize("float x = 3.14;").unwrap_err();
        assert_eq!(err.category(), "Lexical");
        assert_eq!(err.line(), 1);
        assert_eq!(err.col(), 11);
    }

    #[test]
    fn keyword_lookalikes_stay_identifiers() {
        let tokens = tokenize("classic ifx qubits").unwrap();
        assert!(tokens[..3].iter().all(|t| t.kind == TokenKind::Identifier));
    }

    #[test]
    fn two_char_operators_are_single_tokens() {
        assert_eq!(
            kinds("-> == != <= >= && || ++ --"),
            vec![
                TokenKind::Arrow,
                TokenKind::EqEq,
                TokenKind::NotEq,
                TokenKind::LessEq,
                TokenKind::GreaterEq,
                TokenKind::AmpAmp,
                TokenKind::PipePipe,
                TokenKind::PlusPlus,
                TokenKind::MinusMinus,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn strings_span_lines_and_keep_quotes() {
        let tokens = tokenize("\"a\nb\"").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::StringLiteral);
        assert_eq!(tokens[0].lexeme, "\"a\nb\"");
    }

    #[test]
    fn unterminated_string_fails() {
        assert_eq!(tokenize("\"oops").unwrap_err().category(), "Lexical");
    }

    #[test]
    fn bad_bit_literal_fails() {
        assert_eq!(tokenize("2b").unwrap_err().category(), "Lexical");
    }

    #[test]
    fn positions_are_one_based() {
        let tokens = tokenize("int a;\nint b;").unwrap();
        assert_eq!((tokens[0].line, tokens[0].col), (1, 1));
        assert_eq!((tokens[3].line, tokens[3].col), (2, 1));
        assert_eq!((tokens[4].line, tokens[4].col), (2, 5));
    }
}
