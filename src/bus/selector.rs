//! Message selectors.
//!
//! A small subset of JMS selector syntax, enough to filter on string
//! properties:
//!
//! ```text
//! team = 'qe'
//! team = 'qe' AND kind <> 'noise' OR priority = 3
//! ```
//!
//! Comparisons are `ident = literal` and `ident <> literal`, literals are
//! single-quoted strings (`''` escapes a quote) or numbers, and comparisons
//! combine with `AND`/`OR` where `AND` binds tighter. Keywords are
//! case-insensitive. A comparison against a missing property is false.

use std::str::FromStr;

use super::BrokerMessage;
use crate::error::ConnectionFault;

/// A parsed selector expression.
#[derive(Clone, Debug, PartialEq)]
pub struct Selector {
    source: String,
    expr: Expr,
}

#[derive(Clone, Debug, PartialEq)]
enum Expr {
    Or(Vec<Expr>),
    And(Vec<Expr>),
    Compare {
        ident: String,
        negated: bool,
        literal: Literal,
    },
}

#[derive(Clone, Debug, PartialEq)]
enum Literal {
    Str(String),
    Num(f64),
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Eq,
    Ne,
    And,
    Or,
}

impl Selector {
    /// Parse a selector expression.
    pub fn parse(source: &str) -> Result<Self, ConnectionFault> {
        let invalid = |reason: String| ConnectionFault::InvalidSelector {
            selector: source.to_string(),
            reason,
        };

        let tokens = tokenize(source).map_err(invalid)?;
        if tokens.is_empty() {
            return Err(invalid("empty expression".into()));
        }
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or().map_err(invalid)?;
        if parser.pos != parser.tokens.len() {
            return Err(invalid(format!(
                "unexpected token {:?}",
                parser.tokens[parser.pos]
            )));
        }

        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    /// The selector text as given.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the message's properties satisfy the selector.
    pub fn matches(&self, message: &BrokerMessage) -> bool {
        self.expr.eval(message)
    }
}

impl FromStr for Selector {
    type Err = ConnectionFault;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Expr {
    fn eval(&self, message: &BrokerMessage) -> bool {
        match self {
            Expr::Or(terms) => terms.iter().any(|t| t.eval(message)),
            Expr::And(terms) => terms.iter().all(|t| t.eval(message)),
            Expr::Compare {
                ident,
                negated,
                literal,
            } => {
                let Some(value) = message.property(ident) else {
                    return false;
                };
                let equal = match literal {
                    Literal::Str(s) => value == s,
                    Literal::Num(n) => value.trim().parse::<f64>().is_ok_and(|v| v == *n),
                };
                equal != *negated
            }
        }
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn peek_is(&self, token: &Token) -> bool {
        self.tokens.get(self.pos) == Some(token)
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut terms = vec![self.parse_and()?];
        while self.peek_is(&Token::Or) {
            self.pos += 1;
            terms.push(self.parse_and()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::Or(terms)
        })
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut terms = vec![self.parse_compare()?];
        while self.peek_is(&Token::And) {
            self.pos += 1;
            terms.push(self.parse_compare()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::And(terms)
        })
    }

    fn parse_compare(&mut self) -> Result<Expr, String> {
        let ident = match self.next() {
            Some(Token::Ident(name)) => name,
            other => return Err(format!("expected identifier, found {:?}", other)),
        };
        let negated = match self.next() {
            Some(Token::Eq) => false,
            Some(Token::Ne) => true,
            other => return Err(format!("expected '=' or '<>', found {:?}", other)),
        };
        let literal = match self.next() {
            Some(Token::Str(s)) => Literal::Str(s),
            Some(Token::Num(n)) => Literal::Num(n),
            other => return Err(format!("expected literal, found {:?}", other)),
        };
        Ok(Expr::Compare {
            ident,
            negated,
            literal,
        })
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '=' => {
                tokens.push(Token::Eq);
                i += 1;
            }
            '<' if chars.get(i + 1) == Some(&'>') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '\'' => {
                let mut literal = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated string literal".into()),
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            literal.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            literal.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(literal));
            }
            c if c.is_ascii_digit() || c == '-' || c == '.' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{}'", text))?;
                tokens.push(Token::Num(n));
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '$' | '.'))
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.to_ascii_uppercase().as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }

    Ok(tokens)
}
