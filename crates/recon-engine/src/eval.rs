//! Safe arithmetic evaluation of fully-substituted expressions.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum EvalError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("empty expression")]
    Empty,
    #[error("malformed expression: {0}")]
    Syntax(String),
    #[error("expression contains invalid characters after substitution: {0}")]
    InvalidCharacters(String),
    #[error("unresolved references after substitution: {}", .0.join(", "))]
    UnresolvedReferences(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Number(f64),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn tokenize(expr: &str) -> Result<Vec<Token>, EvalError> {
    let mut tokens = Vec::new();
    let mut chars = expr.char_indices().peekable();

    while let Some(&(start, ch)) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            c if c.is_ascii_digit() || c == '.' => {
                let mut end = start;
                while let Some(&(i, c)) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        end = i + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let text = &expr[start..end];
                let number = text
                    .parse::<f64>()
                    .map_err(|_| EvalError::Syntax(format!("bad numeric literal `{text}`")))?;
                tokens.push(Token::Number(number));
            }
            other => return Err(EvalError::Syntax(format!("unexpected character `{other}`"))),
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.peek();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<f64, EvalError> {
        let mut value = self.term()?;
        while let Some(op) = self.peek() {
            match op {
                Token::Plus => {
                    self.next();
                    value += self.term()?;
                }
                Token::Minus => {
                    self.next();
                    value -= self.term()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    // term := factor (('*' | '/') factor)*
    fn term(&mut self) -> Result<f64, EvalError> {
        let mut value = self.factor()?;
        while let Some(op) = self.peek() {
            match op {
                Token::Star => {
                    self.next();
                    value *= self.factor()?;
                }
                Token::Slash => {
                    self.next();
                    let divisor = self.factor()?;
                    if divisor == 0.0 {
                        return Err(EvalError::DivisionByZero);
                    }
                    value /= divisor;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    // factor := ('+' | '-')* (number | '(' expr ')')
    fn factor(&mut self) -> Result<f64, EvalError> {
        match self.next() {
            Some(Token::Plus) => self.factor(),
            Some(Token::Minus) => Ok(-self.factor()?),
            Some(Token::Number(n)) => Ok(n),
            Some(Token::LParen) => {
                let value = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(value),
                    _ => Err(EvalError::Syntax("unbalanced parenthesis".to_string())),
                }
            }
            Some(other) => Err(EvalError::Syntax(format!("unexpected token {other:?}"))),
            None => Err(EvalError::Syntax("unexpected end of expression".to_string())),
        }
    }
}

/// Evaluate a substituted arithmetic expression (numbers, `+ - * / ( )`,
/// whitespace) with standard precedence.
pub fn eval_arithmetic(expr: &str) -> Result<f64, EvalError> {
    let tokens = tokenize(expr)?;
    if tokens.is_empty() {
        return Err(EvalError::Empty);
    }
    let mut parser = Parser { tokens: &tokens, pos: 0 };
    let value = parser.expr()?;
    if parser.pos != tokens.len() {
        return Err(EvalError::Syntax("trailing tokens after expression".to_string()));
    }
    Ok(value)
}
