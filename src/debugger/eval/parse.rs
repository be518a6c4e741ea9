//! Expression IR.
//!
//! An expression is a dotted access chain: `this.server.getCount()`. Each
//! segment is a field access or a call; arguments are literals or nested
//! chains. Lowering marks exactly the final segment of the top-level chain
//! terminal: its result is decoded to a host value, every other segment must
//! yield an object reference to keep walking.

use super::EvalError;
use std::iter::Peekable;
use std::str::Chars;

#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
    Char(char),
    /// A nested access chain, evaluated to an object reference.
    Chain(Vec<Access>),
}

/// One segment of an access chain. `args` is `Some` for a call (possibly
/// empty) and `None` for a field access.
#[derive(Debug, Clone, PartialEq)]
pub struct Access {
    pub name: String,
    pub args: Option<Vec<Arg>>,
    pub terminal: bool,
}

pub fn parse(expression: &str) -> Result<Vec<Access>, EvalError> {
    let tokens = lex(expression)?;
    let mut cursor = Cursor {
        tokens,
        position: 0,
    };
    let mut chain = cursor.chain()?;
    if cursor.position != cursor.tokens.len() {
        return Err(EvalError::Parse(format!(
            "unexpected trailing input in `{expression}`"
        )));
    }
    if let Some(last) = chain.last_mut() {
        last.terminal = true;
    }
    Ok(chain)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(String),
    Str(String),
    Char(char),
    Dot,
    Comma,
    LParen,
    RParen,
}

fn lex(expression: &str) -> Result<Vec<Token>, EvalError> {
    let mut tokens = Vec::new();
    let mut chars = expression.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '"' => tokens.push(Token::Str(quoted(&mut chars, '"')?)),
            '\'' => {
                let body = quoted(&mut chars, '\'')?;
                let mut body = body.chars();
                match (body.next(), body.next()) {
                    (Some(c), None) => tokens.push(Token::Char(c)),
                    _ => return Err(EvalError::Parse("character literal".to_string())),
                }
            }
            c if c.is_ascii_digit() || c == '-' => {
                chars.next();
                let mut text = c.to_string();
                while let Some(&n) = chars.peek() {
                    if n.is_ascii_digit() || n == '.' {
                        // a digit after the dot means a fraction, not an access
                        if n == '.' && text.contains('.') {
                            break;
                        }
                        text.push(n);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Number(text));
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let mut text = String::new();
                while let Some(&n) = chars.peek() {
                    if n.is_alphanumeric() || n == '_' || n == '$' {
                        text.push(n);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(text));
            }
            other => {
                return Err(EvalError::Parse(format!("unexpected character `{other}`")));
            }
        }
    }
    Ok(tokens)
}

fn quoted(chars: &mut Peekable<Chars<'_>>, delimiter: char) -> Result<String, EvalError> {
    chars.next(); // opening delimiter
    let mut text = String::new();
    for c in chars.by_ref() {
        if c == delimiter {
            return Ok(text);
        }
        text.push(c);
    }
    Err(EvalError::Parse("unterminated literal".to_string()))
}

struct Cursor {
    tokens: Vec<Token>,
    position: usize,
}

impl Cursor {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn chain(&mut self) -> Result<Vec<Access>, EvalError> {
        let mut chain = vec![self.segment()?];
        while self.peek() == Some(&Token::Dot) {
            self.next();
            chain.push(self.segment()?);
        }
        Ok(chain)
    }

    fn segment(&mut self) -> Result<Access, EvalError> {
        let name = match self.next() {
            Some(Token::Ident(name)) => name,
            other => {
                return Err(EvalError::Parse(format!("expected a name, got {other:?}")));
            }
        };
        let args = if self.peek() == Some(&Token::LParen) {
            self.next();
            let mut args = Vec::new();
            if self.peek() != Some(&Token::RParen) {
                loop {
                    args.push(self.argument()?);
                    match self.next() {
                        Some(Token::Comma) => continue,
                        Some(Token::RParen) => break,
                        other => {
                            return Err(EvalError::Parse(format!(
                                "expected `,` or `)`, got {other:?}"
                            )));
                        }
                    }
                }
            } else {
                self.next();
            }
            Some(args)
        } else {
            None
        };
        Ok(Access {
            name,
            args,
            terminal: false,
        })
    }

    fn argument(&mut self) -> Result<Arg, EvalError> {
        match self.peek() {
            Some(Token::Str(_)) => {
                let Some(Token::Str(s)) = self.next() else {
                    unreachable!()
                };
                Ok(Arg::Str(s))
            }
            Some(Token::Char(_)) => {
                let Some(Token::Char(c)) = self.next() else {
                    unreachable!()
                };
                Ok(Arg::Char(c))
            }
            Some(Token::Number(_)) => {
                let Some(Token::Number(text)) = self.next() else {
                    unreachable!()
                };
                if text.contains('.') {
                    text.parse()
                        .map(Arg::Double)
                        .map_err(|_| EvalError::Parse(format!("bad number `{text}`")))
                } else {
                    text.parse()
                        .map(Arg::Int)
                        .map_err(|_| EvalError::Parse(format!("bad number `{text}`")))
                }
            }
            Some(Token::Ident(name)) if name == "true" => {
                self.next();
                Ok(Arg::Bool(true))
            }
            Some(Token::Ident(name)) if name == "false" => {
                self.next();
                Ok(Arg::Bool(false))
            }
            Some(Token::Ident(_)) => Ok(Arg::Chain(self.chain()?)),
            other => Err(EvalError::Parse(format!(
                "expected an argument, got {other:?}"
            ))),
        }
    }
}
