//! Reader for equations written in Einstein notation, e.g.
//!
//! ```text
//! Eq(Der(rhou_i, t), -Conservative(rhou_i*u_j + KD(_i,_j)*p, x_j))
//! ```
//!
//! Identifiers are split on underscores into a base name and index letters.
//! The coordinate base and time symbol of the [`Notation`] become coordinate
//! nodes, and names listed as constants become constant terms. A bare
//! coordinate (`x`) is direction 0.

use core::ops::Range;
use std::collections::BTreeSet;
use logos::Logos;
use serde::{Deserialize, Serialize};
use crate::error::{Error, Result};
use crate::expr::{Axis, DerivativeKind, Equation, Expr, Index, Intrinsic, Node};
use crate::rational::Rational;




/**
 * Naming conventions used to interpret identifiers.
 */
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notation {
    pub coordinate: String,
    pub time: String,
    pub constants: BTreeSet<String>,
}

impl Default for Notation {
    fn default() -> Self {
        Self {
            coordinate: "x".to_string(),
            time: "t".to_string(),
            constants: BTreeSet::new(),
        }
    }
}

impl Notation {
    pub fn with_constants<I, S>(mut self, constants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.constants.extend(constants.into_iter().map(Into::into));
        self
    }
}




#[derive(Logos, Debug, Clone, Copy, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
enum Token<'src> {
    #[regex(r"[0-9]+(\.[0-9]*)?([eE][+-]?[0-9]+)?", |lex| lex.slice())]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice())]
    Number(&'src str),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice())]
    Ident(&'src str),

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("**")]
    #[token("^")]
    Power,
}




/**
 * Parse a single expression.
 */
pub fn parse_expr(input: &str, notation: &Notation) -> Result<Expr> {
    let mut parser = Parser::new(input, notation)?;
    let expr = parser.expr()?;
    parser.finish()?;
    Ok(expr)
}




/**
 * Parse an equation of the form `Eq(lhs, rhs)`.
 */
pub fn parse_equation(input: &str, notation: &Notation) -> Result<Equation> {
    let mut parser = Parser::new(input, notation)?;
    match parser.next() {
        Some(Token::Ident("Eq")) => {}
        _ => return Err(parser.error_at(0, "expected an equation of the form Eq(lhs, rhs)")),
    }
    parser.expect(Token::LParen, "'('")?;
    let lhs = parser.expr()?;
    parser.expect(Token::Comma, "','")?;
    let rhs = parser.expr()?;
    parser.expect(Token::RParen, "')'")?;
    parser.finish()?;
    Ok(Equation::new(lhs, rhs))
}




/**
 * Deepest nesting of parentheses, calls and unary signs accepted.
 */
const MAX_DEPTH: usize = 256;

/**
 * Largest magnitude of an integer exponent.
 */
const MAX_EXPONENT: u32 = 64;




// ============================================================================
struct Parser<'a> {
    input: &'a str,
    tokens: Vec<(Token<'a>, Range<usize>)>,
    pos: usize,
    depth: usize,
    notation: &'a Notation,
}

impl<'a> Parser<'a> {

    fn new(input: &'a str, notation: &'a Notation) -> Result<Self> {
        let mut tokens = Vec::new();
        for (token, span) in Token::lexer(input).spanned() {
            match token {
                Ok(token) => tokens.push((token, span)),
                Err(()) => {
                    return Err(Error::Parse {
                        input: input.to_string(),
                        position: span.start,
                        message: format!("unexpected character '{}'", &input[span]),
                    })
                }
            }
        }
        Ok(Self { input, tokens, pos: 0, depth: 0, notation })
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.input.len(), |(_, span)| span.start)
    }

    fn error_at(&self, position: usize, message: &str) -> Error {
        Error::Parse {
            input: self.input.to_string(),
            position,
            message: message.to_string(),
        }
    }

    fn error(&self, message: &str) -> Error {
        self.error_at(self.position(), message)
    }

    fn peek(&self) -> Option<Token<'a>> {
        self.tokens.get(self.pos).map(|(t, _)| *t)
    }

    fn next(&mut self) -> Option<Token<'a>> {
        let token = self.peek();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, token: Token<'a>, what: &str) -> Result<()> {
        if self.peek() == Some(token) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected {}", what)))
        }
    }

    fn finish(&self) -> Result<()> {
        match self.peek() {
            None => Ok(()),
            Some(_) => Err(self.error("unexpected trailing input")),
        }
    }

    fn expr(&mut self) -> Result<Expr> {
        let mut terms = vec![self.term()?];
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.pos += 1;
                    terms.push(self.term()?);
                }
                Some(Token::Minus) => {
                    self.pos += 1;
                    terms.push(-self.term()?);
                }
                _ => break,
            }
        }
        Ok(Expr::add(terms))
    }

    fn term(&mut self) -> Result<Expr> {
        let mut factors = vec![self.unary()?];
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.pos += 1;
                    factors.push(self.unary()?);
                }
                Some(Token::Slash) => {
                    self.pos += 1;
                    factors.push(Expr::pow(self.unary()?, -1));
                }
                _ => break,
            }
        }
        Ok(Expr::mul(factors))
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error("expression is nested too deeply"));
        }
        self.depth += 1;
        let result = if self.peek() == Some(Token::Minus) {
            self.pos += 1;
            self.unary().map(|e| -e)
        } else {
            self.power()
        };
        self.depth -= 1;
        result
    }

    fn power(&mut self) -> Result<Expr> {
        let base = self.primary()?;
        if self.peek() != Some(Token::Power) {
            return Ok(base);
        }
        self.pos += 1;
        let exponent = self.exponent()?;
        let half = Rational::new(1, 2);

        if exponent.is_integer() {
            let n = i32::try_from(exponent.numer())
                .ok()
                .filter(|n| n.unsigned_abs() <= MAX_EXPONENT)
                .ok_or_else(|| self.error(&format!("exponent {} is out of range", exponent)))?;
            Ok(Expr::pow(base, n))
        } else if exponent == half {
            Ok(Expr::call(Intrinsic::Sqrt, base))
        } else if exponent == -half {
            Ok(Expr::pow(Expr::call(Intrinsic::Sqrt, base), -1))
        } else {
            Err(self.error("only integer and half-integer exponents are supported"))
        }
    }

    fn exponent(&mut self) -> Result<Rational> {
        let parenthesised = self.peek() == Some(Token::LParen);
        if parenthesised {
            self.pos += 1;
        }
        let negative = self.peek() == Some(Token::Minus);
        if negative {
            self.pos += 1;
        }
        let value = match self.next() {
            Some(Token::Number(text)) => {
                Rational::parse_decimal(text).ok_or_else(|| self.error("number is malformed or out of range"))?
            }
            _ => return Err(self.error("expected a numeric exponent")),
        };
        if parenthesised {
            self.expect(Token::RParen, "')'")?;
        }
        Ok(if negative { -value } else { value })
    }

    fn primary(&mut self) -> Result<Expr> {
        let start = self.position();
        match self.next() {
            Some(Token::Number(text)) => Rational::parse_decimal(text)
                .map(Expr::number)
                .ok_or_else(|| self.error_at(start, "number is malformed or out of range")),
            Some(Token::LParen) => {
                let e = self.expr()?;
                self.expect(Token::RParen, "')'")?;
                Ok(e)
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(Token::LParen) {
                    self.pos += 1;
                    self.call(name, start)
                } else {
                    self.identifier(name, start)
                }
            }
            _ => Err(self.error_at(start, "expected an expression")),
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>> {
        let mut args = vec![self.expr()?];
        while self.peek() == Some(Token::Comma) {
            self.pos += 1;
            args.push(self.expr()?);
        }
        self.expect(Token::RParen, "')'")?;
        Ok(args)
    }

    fn bare_indices(&mut self, start: usize) -> Result<Vec<Index>> {
        let mut indices = Vec::new();
        loop {
            match self.next() {
                Some(Token::Ident(name)) if name.starts_with('_') && name.len() > 1 => {
                    indices.push(parse_index(&name[1..]))
                }
                _ => return Err(self.error_at(start, "expected bare indices such as _i")),
            }
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(indices),
                _ => return Err(self.error("expected ',' or ')'")),
            }
        }
    }

    fn call(&mut self, name: &str, start: usize) -> Result<Expr> {
        let kind = match name {
            "Der" => Some(DerivativeKind::Plain),
            "Conservative" => Some(DerivativeKind::Conservative),
            "Skew" => Some(DerivativeKind::Skew),
            _ => None,
        };
        if let Some(kind) = kind {
            let mut args = self.arguments()?;
            if args.len() < 2 {
                return Err(self.error_at(start, "a derivative needs a function and at least one direction"));
            }
            let arg = args.remove(0);
            let wrt = args
                .into_iter()
                .map(|a| match a.node() {
                    Node::Coordinate(axis) => Ok(axis.clone()),
                    _ => Err(self.error_at(start, &format!("'{}' is not a coordinate", a))),
                })
                .collect::<Result<Vec<Axis>>>()?;
            return Ok(Expr::der(kind, arg, wrt));
        }
        match name {
            "KD" => {
                let indices = self.bare_indices(start)?;
                if indices.len() != 2 {
                    return Err(self.error_at(start, "KD takes exactly two indices"));
                }
                Ok(Expr::delta(indices[0].clone(), indices[1].clone()))
            }
            "LC" => {
                let indices = self.bare_indices(start)?;
                if indices.len() != 3 {
                    return Err(self.error_at(start, "LC takes exactly three indices"));
                }
                Ok(Expr::levi_civita(indices))
            }
            _ => match Intrinsic::from_name(name) {
                Some(function) => {
                    let mut args = self.arguments()?;
                    if args.len() != 1 {
                        return Err(self.error_at(start, &format!("{} takes one argument", name)));
                    }
                    Ok(Expr::call(function, args.remove(0)))
                }
                None => Err(self.error_at(start, &format!("unknown function '{}'", name))),
            },
        }
    }

    fn identifier(&self, name: &str, start: usize) -> Result<Expr> {
        let notation = self.notation;
        if name == notation.time {
            return Ok(Expr::coordinate(Axis::Time));
        }
        let mut parts = name.split('_');
        let base = parts.next().unwrap_or_default();
        let indices: Vec<Index> = parts.map(parse_index).collect();

        if base.is_empty() {
            return Err(self.error_at(start, "bare indices are only allowed inside KD and LC"));
        }
        if indices.iter().any(|i| i.as_letter() == Some("")) {
            return Err(self.error_at(start, "empty index name"));
        }
        if base == notation.coordinate {
            return match indices.as_slice() {
                [] => Ok(Expr::coordinate(Axis::Space(Index::Value(0)))),
                [index] => Ok(Expr::coordinate(Axis::Space(index.clone()))),
                _ => Err(self.error_at(start, "a coordinate takes exactly one index")),
            };
        }
        if let Some(d) = base.strip_prefix(notation.coordinate.as_str()) {
            if indices.is_empty() && !d.is_empty() && d.chars().all(|c| c.is_ascii_digit()) {
                if let Ok(d) = d.parse() {
                    return Ok(Expr::coordinate(Axis::Space(Index::Value(d))));
                }
            }
        }
        if notation.constants.contains(base) {
            if indices.is_empty() {
                Ok(Expr::symbol(base))
            } else {
                Ok(Expr::constant_tensor(base, indices))
            }
        } else {
            Ok(Expr::tensor(base, indices))
        }
    }
}

fn parse_index(text: &str) -> Index {
    match text.parse::<usize>() {
        Ok(v) => Index::Value(v),
        Err(_) => Index::Letter(text.to_string()),
    }
}
