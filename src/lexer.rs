use thiserror::Error;

use crate::lexicon;
use crate::token::{Span, Token, TokenKind};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LexError {
    #[error("Unexpected character '{character}' at line {line}, column {column}")]
    UnexpectedCharacter {
        character: char,
        line: usize,
        column: usize,
    },
    #[error("Unterminated string literal at line {line}, column {column}")]
    UnterminatedString { line: usize, column: usize },
    #[error("Invalid number literal '{literal}' at line {line}, column {column}")]
    InvalidNumberLiteral {
        literal: String,
        line: usize,
        column: usize,
    },
}

pub type LexResult<T> = Result<T, LexError>;

pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    pub fn next_token(&mut self) -> LexResult<Token> {
        self.skip_trivia();

        let start = self.pos;
        let line = self.line;
        let column = self.column;

        let Some(ch) = self.peek_char() else {
            return Ok(Token::new(TokenKind::Eof, self.span_from(start, line, column)));
        };

        if let Some(kind) = self.try_consume_operator() {
            return Ok(Token::new(kind, self.span_from(start, line, column)));
        }

        match ch {
            '\'' | '"' => self.read_string(start, line, column),
            c if c.is_alphabetic() || c == '_' => Ok(self.read_identifier(start, line, column)),
            c if c.is_ascii_digit() => self.read_number(start, line, column),
            _ => {
                self.consume_char();
                Err(LexError::UnexpectedCharacter {
                    character: ch,
                    line,
                    column,
                })
            }
        }
    }

    /// Consumes whitespace and comments; neither produces a token.
    fn skip_trivia(&mut self) {
        loop {
            self.consume_while(|c| c.is_whitespace());
            if self.starts_with("//") {
                self.consume_while(|c| c != '\n');
                continue;
            }
            if self.starts_with("/*") {
                self.consume_char();
                self.consume_char();
                while !self.starts_with("*/") && self.peek_char().is_some() {
                    self.consume_char();
                }
                if self.starts_with("*/") {
                    self.consume_char();
                    self.consume_char();
                }
                continue;
            }
            break;
        }
    }

    /// Multi-character operators are matched longest first.
    fn try_consume_operator(&mut self) -> Option<TokenKind> {
        const MULTI: [(&str, TokenKind); 7] = [
            ("...", TokenKind::Ellipsis),
            ("||", TokenKind::OrOr),
            ("&&", TokenKind::AndAnd),
            ("==", TokenKind::EqualEqual),
            ("!=", TokenKind::NotEqual),
            ("<=", TokenKind::LessEqual),
            (">=", TokenKind::GreaterEqual),
        ];
        for (glyph, kind) in MULTI {
            if self.starts_with(glyph) {
                for _ in 0..glyph.chars().count() {
                    self.consume_char();
                }
                return Some(kind);
            }
        }

        let kind = match self.peek_char()? {
            '=' => TokenKind::Assign,
            '!' => TokenKind::Not,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '<' => TokenKind::Less,
            '>' => TokenKind::Greater,
            '.' => TokenKind::Dot,
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            ';' => TokenKind::Semicolon,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            _ => return None,
        };
        self.consume_char();
        Some(kind)
    }

    fn read_identifier(&mut self, start: usize, line: usize, column: usize) -> Token {
        self.consume_while(|c| c.is_alphanumeric() || c == '_');
        let ident = &self.input[start..self.pos];
        let kind = lexicon::keyword(ident)
            .unwrap_or_else(|| TokenKind::Identifier(ident.to_string()));
        Token::new(kind, self.span_from(start, line, column))
    }

    fn read_number(&mut self, start: usize, line: usize, column: usize) -> LexResult<Token> {
        if self.starts_with("0x") || self.starts_with("0X") {
            self.consume_char();
            self.consume_char();
            let digits_start = self.pos;
            self.consume_while(|c| c.is_ascii_hexdigit());
            let digits = &self.input[digits_start..self.pos];
            let value = i64::from_str_radix(digits, 16).map_err(|_| {
                LexError::InvalidNumberLiteral {
                    literal: self.input[start..self.pos].to_string(),
                    line,
                    column,
                }
            })?;
            return Ok(Token::new(
                TokenKind::Number(value as f64),
                self.span_from(start, line, column),
            ));
        }

        self.consume_while(|c| c.is_ascii_digit());
        // A dot only belongs to the number when a digit follows; `1.length`
        // must lex as number, dot, identifier.
        if self.peek_char() == Some('.')
            && self
                .char_at(self.pos + 1)
                .is_some_and(|c| c.is_ascii_digit())
        {
            self.consume_char();
            self.consume_while(|c| c.is_ascii_digit());
        }

        let literal = &self.input[start..self.pos];
        let value = literal
            .parse::<f64>()
            .map_err(|_| LexError::InvalidNumberLiteral {
                literal: literal.to_string(),
                line,
                column,
            })?;
        Ok(Token::new(
            TokenKind::Number(value),
            self.span_from(start, line, column),
        ))
    }

    fn read_string(&mut self, start: usize, line: usize, column: usize) -> LexResult<Token> {
        let quote = self.consume_char().expect("caller checked quote");
        let mut content = String::new();
        loop {
            match self.consume_char() {
                None => return Err(LexError::UnterminatedString { line, column }),
                Some(c) if c == quote => break,
                Some('\\') => {
                    let Some(escaped) = self.consume_char() else {
                        return Err(LexError::UnterminatedString { line, column });
                    };
                    content.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        other => other,
                    });
                }
                Some(c) => content.push(c),
            }
        }
        Ok(Token::new(
            TokenKind::Str(content),
            self.span_from(start, line, column),
        ))
    }

    fn consume_while<P>(&mut self, keep_predicate: P) -> usize
    where
        P: Fn(char) -> bool,
    {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if !keep_predicate(c) {
                break;
            }
            self.consume_char();
        }
        self.pos - start
    }

    fn starts_with(&self, prefix: &str) -> bool {
        self.input[self.pos..].starts_with(prefix)
    }

    fn char_at(&self, index: usize) -> Option<char> {
        if index >= self.input.len() {
            None
        } else {
            self.input[index..].chars().next()
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.char_at(self.pos)
    }

    fn consume_char(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn span_from(&self, start: usize, line: usize, column: usize) -> Span {
        Span::new(start, self.pos, line, column)
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = LexResult<Token>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_token() {
            Ok(token) => Some(Ok(token)),
            Err(e) => Some(Err(e)),
        }
    }
}

pub fn tokenize(input: &str) -> LexResult<Vec<Token>> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let is_eof = matches!(token.kind, TokenKind::Eof);
        tokens.push(token);
        if is_eof {
            break;
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input)
            .expect("tokenize should succeed")
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn lexes_declaration_and_call() {
        let input = indoc! {"
            var year = 2020
            proc main {
              print(year + 21)
            }
        "};
        let expected = vec![
            TokenKind::Var,
            TokenKind::Identifier("year".to_string()),
            TokenKind::Assign,
            TokenKind::Number(2020.0),
            TokenKind::Proc,
            TokenKind::Identifier("main".to_string()),
            TokenKind::LBrace,
            TokenKind::Identifier("print".to_string()),
            TokenKind::LParen,
            TokenKind::Identifier("year".to_string()),
            TokenKind::Plus,
            TokenKind::Number(21.0),
            TokenKind::RParen,
            TokenKind::RBrace,
            TokenKind::Eof,
        ];
        assert_eq!(kinds(input), expected);
    }

    #[test]
    fn lexes_multi_character_operators_longest_first() {
        let expected = vec![
            TokenKind::Ellipsis,
            TokenKind::OrOr,
            TokenKind::AndAnd,
            TokenKind::EqualEqual,
            TokenKind::NotEqual,
            TokenKind::LessEqual,
            TokenKind::GreaterEqual,
            TokenKind::Less,
            TokenKind::Assign,
            TokenKind::Not,
            TokenKind::Eof,
        ];
        assert_eq!(kinds("... || && == != <= >= < = !"), expected);
    }

    #[test]
    fn lexes_number_literals() {
        assert_eq!(
            kinds("3 3.75 0x1f"),
            vec![
                TokenKind::Number(3.0),
                TokenKind::Number(3.75),
                TokenKind::Number(31.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn dot_after_number_is_member_access() {
        assert_eq!(
            kinds("1.floor"),
            vec![
                TokenKind::Number(1.0),
                TokenKind::Dot,
                TokenKind::Identifier("floor".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_string_literals_with_escapes() {
        assert_eq!(
            kinds(r#"'hello' "wor\nld" '\''"#),
            vec![
                TokenKind::Str("hello".to_string()),
                TokenKind::Str("wor\nld".to_string()),
                TokenKind::Str("'".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn discards_line_and_block_comments() {
        let input = indoc! {"
            // leading comment
            var x = 1 /* inline */ + 2
        "};
        assert_eq!(
            kinds(input),
            vec![
                TokenKind::Var,
                TokenKind::Identifier("x".to_string()),
                TokenKind::Assign,
                TokenKind::Number(1.0),
                TokenKind::Plus,
                TokenKind::Number(2.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn keywords_and_booleans_are_distinguished_from_identifiers() {
        assert_eq!(
            kinds("class truely true external"),
            vec![
                TokenKind::Class,
                TokenKind::Identifier("truely".to_string()),
                TokenKind::Boolean(true),
                TokenKind::External,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn tracks_line_and_column() {
        let tokens = tokenize("var x\n  x = 1").expect("tokenize should succeed");
        let spans: Vec<(usize, usize)> = tokens
            .iter()
            .map(|token| (token.span.line, token.span.column))
            .collect();
        assert_eq!(
            spans,
            vec![(1, 1), (1, 5), (2, 3), (2, 5), (2, 7), (2, 8)]
        );
    }

    #[test]
    fn errors_on_unexpected_character() {
        let err = tokenize("var @x").expect_err("expected lexing failure");
        assert_eq!(
            err,
            LexError::UnexpectedCharacter {
                character: '@',
                line: 1,
                column: 5
            }
        );
    }

    #[test]
    fn errors_on_unterminated_string() {
        let err = tokenize("var s = 'abc").expect_err("expected unterminated string");
        assert_eq!(
            err,
            LexError::UnterminatedString { line: 1, column: 9 }
        );
    }

    #[test]
    fn lexes_unicode_identifiers() {
        assert_eq!(
            kinds("var héllo"),
            vec![
                TokenKind::Var,
                TokenKind::Identifier("héllo".to_string()),
                TokenKind::Eof,
            ]
        );
    }
}
