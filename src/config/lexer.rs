use std::iter::Peekable;
use std::str::Chars;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Loc {
    pub line: usize,
    pub col: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    LBrace,
    RBrace,
    Semicolon,
    Word(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfToken {
    pub kind: TokenKind,
    pub loc: Loc,
}

pub struct Lexer<'a> {
    input: Peekable<Chars<'a>>,
    line: usize,
    col: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input: input.chars().peekable(),
            line: 1,
            col: 1,
        }
    }

    fn advance(&mut self) {
        if let Some(c) = self.input.next() {
            if c == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
    }

    fn peek(&mut self) -> Option<&char> {
        self.input.peek()
    }

    fn current_loc(&self) -> Loc {
        Loc {
            line: self.line,
            col: self.col,
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<ConfToken>, String> {
        let mut tokens = Vec::new();

        while let Some(&c) = self.peek() {
            let loc = self.current_loc();

            if c == '#' {
                self.skip_comment();
                continue;
            }

            match c {
                '{' => {
                    tokens.push(ConfToken { kind: TokenKind::LBrace, loc });
                    self.advance();
                }
                '}' => {
                    tokens.push(ConfToken { kind: TokenKind::RBrace, loc });
                    self.advance();
                }
                ';' => {
                    tokens.push(ConfToken { kind: TokenKind::Semicolon, loc });
                    self.advance();
                }
                q if q == '"' || q == '\'' => self.handle_quoted_word(&mut tokens, loc, q)?,
                c if c.is_whitespace() => self.advance(),
                _ => self.handle_word(&mut tokens, loc),
            }
        }

        Ok(tokens)
    }

    fn skip_comment(&mut self) {
        while let Some(&c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.advance();
        }
    }

    fn handle_quoted_word(
        &mut self,
        tokens: &mut Vec<ConfToken>,
        loc: Loc,
        quote_char: char,
    ) -> Result<(), String> {
        self.advance(); // Consume opening quote
        let mut val = String::new();
        let mut closed = false;

        while let Some(&c) = self.peek() {
            if c == quote_char {
                self.advance();
                closed = true;
                break;
            }
            val.push(c);
            self.advance();
        }

        if !closed {
            return Err(format!(
                "Unterminated quoted string at line {}, col {}",
                loc.line, loc.col
            ));
        }

        tokens.push(ConfToken {
            kind: TokenKind::Word(val),
            loc,
        });
        Ok(())
    }

    fn handle_word(&mut self, tokens: &mut Vec<ConfToken>, loc: Loc) {
        let mut val = String::new();

        while let Some(&c) = self.peek() {
            if c.is_whitespace() || "{};#\"'".contains(c) {
                break;
            }
            val.push(c);
            self.advance();
        }

        tokens.push(ConfToken {
            kind: TokenKind::Word(val),
            loc,
        });
    }
}
