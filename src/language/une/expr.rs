//! Une expressions: lexer, parser and evaluator.
//!
//! Free identifiers are device names. Their values are supplied by the
//! caller at evaluation time; the parser only records which ones occur.

use chrono::Utc;
use std::collections::HashMap;
use std::fmt;

use crate::types::Value;

/// Syntax or evaluation error with a byte offset into the expression text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExprError {
    pub message: String,
    pub offset: usize,
}

impl ExprError {
    fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }

    /// 1-based line and column of the error inside `source`.
    pub fn position(&self, source: &str) -> (usize, usize) {
        let upto = &source[..self.offset.min(source.len())];
        let line = upto.matches('\n').count() + 1;
        let column = upto.rfind('\n').map_or(upto.chars().count(), |nl| {
            upto[nl + 1..].chars().count()
        }) + 1;
        (line, column)
    }
}

impl fmt::Display for ExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (offset {})", self.message, self.offset)
    }
}

impl std::error::Error for ExprError {}

// =============================================================================
// Lexer
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Eof,
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    offset: usize,
}

fn tokenize(src: &str) -> Result<Vec<Spanned>, ExprError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;

        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        let token = match c {
            b'0'..=b'9' => {
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                let mut is_float = false;
                if i + 1 < bytes.len() && bytes[i] == b'.' && bytes[i + 1].is_ascii_digit() {
                    is_float = true;
                    i += 1;
                    while i < bytes.len() && bytes[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let text = &src[start..i];
                if is_float {
                    Token::Float(
                        text.parse()
                            .map_err(|_| ExprError::new("invalid number", start))?,
                    )
                } else {
                    match text.parse::<i64>() {
                        Ok(n) => Token::Int(n),
                        Err(_) => Token::Float(
                            text.parse()
                                .map_err(|_| ExprError::new("invalid number", start))?,
                        ),
                    }
                }
            }
            b'"' | b'\'' => {
                let quote = c;
                i += 1;
                let mut text = String::new();
                loop {
                    match bytes.get(i) {
                        None => return Err(ExprError::new("unterminated string", start)),
                        Some(&b) if b == quote => {
                            i += 1;
                            break;
                        }
                        Some(b'\\') => {
                            let escaped = match bytes.get(i + 1) {
                                Some(b'n') => '\n',
                                Some(b't') => '\t',
                                Some(b'\\') => '\\',
                                Some(b'"') => '"',
                                Some(b'\'') => '\'',
                                _ => return Err(ExprError::new("invalid escape", i)),
                            };
                            text.push(escaped);
                            i += 2;
                        }
                        Some(_) => {
                            // Copy one UTF-8 character.
                            let ch = src[i..].chars().next().unwrap_or('\u{fffd}');
                            text.push(ch);
                            i += ch.len_utf8();
                        }
                    }
                }
                Token::Str(text)
            }
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                let word = &src[start..i];
                match word.to_ascii_lowercase().as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "and" => Token::AndAnd,
                    "or" => Token::OrOr,
                    "not" => Token::Bang,
                    _ => Token::Ident(word.to_string()),
                }
            }
            _ => {
                let next = bytes.get(i + 1).copied();
                let (token, width) = match (c, next) {
                    (b'=', Some(b'=')) => (Token::EqEq, 2),
                    (b'!', Some(b'=')) => (Token::NotEq, 2),
                    (b'<', Some(b'=')) => (Token::Le, 2),
                    (b'>', Some(b'=')) => (Token::Ge, 2),
                    (b'&', Some(b'&')) => (Token::AndAnd, 2),
                    (b'|', Some(b'|')) => (Token::OrOr, 2),
                    (b'+', _) => (Token::Plus, 1),
                    (b'-', _) => (Token::Minus, 1),
                    (b'*', _) => (Token::Star, 1),
                    (b'/', _) => (Token::Slash, 1),
                    (b'%', _) => (Token::Percent, 1),
                    (b'<', _) => (Token::Lt, 1),
                    (b'>', _) => (Token::Gt, 1),
                    (b'!', _) => (Token::Bang, 1),
                    (b'(', _) => (Token::LParen, 1),
                    (b')', _) => (Token::RParen, 1),
                    (b'[', _) => (Token::LBracket, 1),
                    (b']', _) => (Token::RBracket, 1),
                    (b',', _) => (Token::Comma, 1),
                    _ => {
                        let ch = src[i..].chars().next().unwrap_or('?');
                        return Err(ExprError::new(format!("unexpected character '{}'", ch), start));
                    }
                };
                i += width;
                token
            }
        };

        tokens.push(Spanned {
            token,
            offset: start,
        });
    }

    tokens.push(Spanned {
        token: Token::Eof,
        offset: src.len(),
    });
    Ok(tokens)
}

// =============================================================================
// AST
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(Value),
    Var(String),
    List(Vec<Expr>),
    Unary(UnOp, Box<Expr>, usize),
    Binary(Box<Expr>, BinOp, Box<Expr>, usize),
    Call(String, Vec<Expr>, usize),
}

// =============================================================================
// Parser (precedence climbing)
// =============================================================================

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Spanned {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Spanned {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), ExprError> {
        let tok = self.advance();
        if tok.token == expected {
            Ok(())
        } else {
            Err(ExprError::new(format!("expected {}", what), tok.offset))
        }
    }

    fn binary_op(token: &Token) -> Option<(BinOp, u8)> {
        Some(match token {
            Token::OrOr => (BinOp::Or, 1),
            Token::AndAnd => (BinOp::And, 2),
            Token::EqEq => (BinOp::Eq, 3),
            Token::NotEq => (BinOp::Ne, 3),
            Token::Lt => (BinOp::Lt, 4),
            Token::Le => (BinOp::Le, 4),
            Token::Gt => (BinOp::Gt, 4),
            Token::Ge => (BinOp::Ge, 4),
            Token::Plus => (BinOp::Add, 5),
            Token::Minus => (BinOp::Sub, 5),
            Token::Star => (BinOp::Mul, 6),
            Token::Slash => (BinOp::Div, 6),
            Token::Percent => (BinOp::Rem, 6),
            _ => return None,
        })
    }

    fn expression(&mut self, min_prec: u8) -> Result<Expr, ExprError> {
        let mut lhs = self.unary()?;
        while let Some((op, prec)) = Self::binary_op(&self.peek().token) {
            if prec < min_prec {
                break;
            }
            let offset = self.advance().offset;
            let rhs = self.expression(prec + 1)?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs), offset);
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        let offset = self.peek().offset;
        match self.peek().token {
            Token::Minus => {
                self.advance();
                Ok(Expr::Unary(UnOp::Neg, Box::new(self.unary()?), offset))
            }
            Token::Bang => {
                self.advance();
                Ok(Expr::Unary(UnOp::Not, Box::new(self.unary()?), offset))
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        let tok = self.advance();
        match tok.token {
            Token::Int(n) => Ok(Expr::Const(Value::Int(n))),
            Token::Float(x) => Ok(Expr::Const(Value::Float(x))),
            Token::Str(s) => Ok(Expr::Const(Value::String(s))),
            Token::True => Ok(Expr::Const(Value::Bool(true))),
            Token::False => Ok(Expr::Const(Value::Bool(false))),
            Token::LParen => {
                let inner = self.expression(0)?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::LBracket => {
                let items = self.arguments(Token::RBracket, "']'")?;
                Ok(Expr::List(items))
            }
            Token::Ident(name) => {
                if self.peek().token == Token::LParen {
                    self.advance();
                    let args = self.arguments(Token::RParen, "')'")?;
                    Ok(Expr::Call(name.to_ascii_lowercase(), args, tok.offset))
                } else {
                    Ok(Expr::Var(name))
                }
            }
            Token::Eof => Err(ExprError::new("unexpected end of expression", tok.offset)),
            other => Err(ExprError::new(
                format!("unexpected token {:?}", other),
                tok.offset,
            )),
        }
    }

    fn arguments(&mut self, close: Token, what: &str) -> Result<Vec<Expr>, ExprError> {
        let mut items = Vec::new();
        if self.peek().token == close {
            self.advance();
            return Ok(items);
        }
        loop {
            items.push(self.expression(0)?);
            if self.peek().token == Token::Comma {
                self.advance();
                continue;
            }
            self.expect(close.clone(), what)?;
            return Ok(items);
        }
    }
}

// =============================================================================
// Expression
// =============================================================================

/// A parsed expression and the device names it reads.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    ast: Expr,
    variables: Vec<String>,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        if source.trim().is_empty() {
            return Err(ExprError::new("empty expression", 0));
        }
        let mut parser = Parser {
            tokens: tokenize(source)?,
            pos: 0,
        };
        let ast = parser.expression(0)?;
        let trailing = parser.peek();
        if trailing.token != Token::Eof {
            return Err(ExprError::new(
                format!("unexpected token {:?}", trailing.token),
                trailing.offset,
            ));
        }

        let mut variables = Vec::new();
        collect_vars(&ast, &mut variables);
        Ok(Self {
            source: source.to_string(),
            ast,
            variables,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Free identifiers in first-seen order.
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn references(&self, name: &str) -> bool {
        self.variables.iter().any(|v| v == name)
    }

    pub fn eval(&self, vars: &HashMap<String, Value>) -> Result<Value, ExprError> {
        eval(&self.ast, vars)
    }
}

fn collect_vars(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::Const(_) => {}
        Expr::Var(name) => {
            if !out.contains(name) {
                out.push(name.clone());
            }
        }
        Expr::List(items) | Expr::Call(_, items, _) => {
            items.iter().for_each(|e| collect_vars(e, out));
        }
        Expr::Unary(_, inner, _) => collect_vars(inner, out),
        Expr::Binary(lhs, _, rhs, _) => {
            collect_vars(lhs, out);
            collect_vars(rhs, out);
        }
    }
}

// =============================================================================
// Evaluation
// =============================================================================

fn eval(expr: &Expr, vars: &HashMap<String, Value>) -> Result<Value, ExprError> {
    match expr {
        Expr::Const(v) => Ok(v.clone()),
        Expr::Var(name) => vars
            .get(name)
            .cloned()
            .ok_or_else(|| ExprError::new(format!("no value for '{}'", name), 0)),
        Expr::List(items) => Ok(Value::List(
            items
                .iter()
                .map(|e| eval(e, vars))
                .collect::<Result<_, _>>()?,
        )),
        Expr::Unary(op, inner, offset) => {
            let value = eval(inner, vars)?;
            match (op, value) {
                (UnOp::Not, v) => Ok(Value::Bool(!v.is_truthy())),
                (UnOp::Neg, Value::Int(i)) => Ok(i
                    .checked_neg()
                    .map_or_else(|| Value::Float(-(i as f64)), Value::Int)),
                (UnOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
                (UnOp::Neg, v) => Err(ExprError::new(
                    format!("cannot negate {}", v.type_name()),
                    *offset,
                )),
            }
        }
        Expr::Binary(lhs, BinOp::And, rhs, _) => {
            let l = eval(lhs, vars)?;
            Ok(Value::Bool(l.is_truthy() && eval(rhs, vars)?.is_truthy()))
        }
        Expr::Binary(lhs, BinOp::Or, rhs, _) => {
            let l = eval(lhs, vars)?;
            Ok(Value::Bool(l.is_truthy() || eval(rhs, vars)?.is_truthy()))
        }
        Expr::Binary(lhs, op, rhs, offset) => {
            let l = eval(lhs, vars)?;
            let r = eval(rhs, vars)?;
            binary(l, *op, r).map_err(|msg| ExprError::new(msg, *offset))
        }
        Expr::Call(name, args, offset) => {
            let values: Vec<Value> = args
                .iter()
                .map(|e| eval(e, vars))
                .collect::<Result<_, _>>()?;
            call(name, values).map_err(|msg| ExprError::new(msg, *offset))
        }
    }
}

fn arithmetic(l: &Value, r: &Value, op: BinOp) -> Result<Value, String> {
    let invalid = || {
        format!(
            "invalid operands for {}: {} and {}",
            op.symbol(),
            l.type_name(),
            r.type_name()
        )
    };

    if let (Value::Int(a), Value::Int(b)) = (l, r) {
        let (a, b) = (*a, *b);
        let result = match op {
            BinOp::Add => a.checked_add(b),
            BinOp::Sub => a.checked_sub(b),
            BinOp::Mul => a.checked_mul(b),
            BinOp::Div => {
                if b == 0 {
                    return Err("division by zero".to_string());
                }
                if a.checked_rem(b).is_some_and(|rem| rem != 0) {
                    return Ok(Value::Float(a as f64 / b as f64));
                }
                a.checked_div(b)
            }
            BinOp::Rem => {
                if b == 0 {
                    return Err("modulo by zero".to_string());
                }
                a.checked_rem(b)
            }
            _ => return Err(invalid()),
        };
        return Ok(result.map_or_else(|| Value::Float(float_op(a as f64, b as f64, op)), Value::Int));
    }

    let (a, b) = (l.as_f64().ok_or_else(invalid)?, r.as_f64().ok_or_else(invalid)?);
    if matches!(op, BinOp::Div | BinOp::Rem) && b == 0.0 {
        return Err("division by zero".to_string());
    }
    Ok(Value::Float(float_op(a, b, op)))
}

fn float_op(a: f64, b: f64, op: BinOp) -> f64 {
    match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => a / b,
        _ => a % b,
    }
}

fn binary(l: Value, op: BinOp, r: Value) -> Result<Value, String> {
    match op {
        BinOp::Add => match (&l, &r) {
            (Value::String(a), b) => Ok(Value::String(format!("{}{}", a, b))),
            (a, Value::String(b)) => Ok(Value::String(format!("{}{}", a, b))),
            (Value::List(a), Value::List(b)) => {
                Ok(Value::List(a.iter().chain(b.iter()).cloned().collect()))
            }
            _ => arithmetic(&l, &r, op),
        },
        BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => arithmetic(&l, &r, op),
        BinOp::Eq => Ok(Value::Bool(l.same_as(&r))),
        BinOp::Ne => Ok(Value::Bool(!l.same_as(&r))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = match (&l, &r) {
                (Value::String(a), Value::String(b)) => a.partial_cmp(b),
                (Value::Date(a), Value::Date(b)) => a.partial_cmp(b),
                _ => match (l.as_f64(), r.as_f64()) {
                    (Some(a), Some(b)) => a.partial_cmp(&b),
                    _ => None,
                },
            }
            .ok_or_else(|| {
                format!(
                    "cannot compare {} with {}",
                    l.type_name(),
                    r.type_name()
                )
            })?;
            Ok(Value::Bool(match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Le => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinOp::And | BinOp::Or => Ok(Value::Bool(match op {
            BinOp::And => l.is_truthy() && r.is_truthy(),
            _ => l.is_truthy() || r.is_truthy(),
        })),
    }
}

fn numeric(name: &str, value: &Value) -> Result<f64, String> {
    value
        .as_f64()
        .ok_or_else(|| format!("{}() requires a number, got {}", name, value.type_name()))
}

fn call(name: &str, args: Vec<Value>) -> Result<Value, String> {
    let arity = |n: usize| {
        if args.len() == n {
            Ok(())
        } else {
            Err(format!("{}() takes {} argument(s), got {}", name, n, args.len()))
        }
    };

    match name {
        "now" => {
            arity(0)?;
            Ok(Value::Date(Utc::now()))
        }
        "abs" => {
            arity(1)?;
            match &args[0] {
                Value::Int(i) => Ok(Value::Int(i.saturating_abs())),
                other => Ok(Value::Float(numeric(name, other)?.abs())),
            }
        }
        "round" | "floor" | "ceil" => {
            arity(1)?;
            let x = numeric(name, &args[0])?;
            let y = match name {
                "round" => x.round(),
                "floor" => x.floor(),
                _ => x.ceil(),
            };
            if y.is_finite() && y.abs() < i64::MAX as f64 {
                Ok(Value::Int(y as i64))
            } else {
                Ok(Value::Float(y))
            }
        }
        "min" | "max" => {
            let items: Vec<Value> = match args.as_slice() {
                [Value::List(items)] => items.clone(),
                _ => args.clone(),
            };
            if items.is_empty() {
                return Err(format!("{}() needs at least one value", name));
            }
            let mut best = items[0].clone();
            for item in &items[1..] {
                let (b, c) = (numeric(name, &best)?, numeric(name, item)?);
                let better = if name == "min" { c < b } else { c > b };
                if better {
                    best = item.clone();
                }
            }
            numeric(name, &best)?;
            Ok(best)
        }
        "len" => {
            arity(1)?;
            match &args[0] {
                Value::String(s) => Ok(Value::Int(s.chars().count() as i64)),
                Value::List(items) => Ok(Value::Int(items.len() as i64)),
                other => Err(format!("len() requires string or list, got {}", other.type_name())),
            }
        }
        _ => Err(format!("unknown function '{}'", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn eval_with(src: &str, vars: &[(&str, Value)]) -> Result<Value, ExprError> {
        let vars: HashMap<String, Value> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        Expression::parse(src)?.eval(&vars)
    }

    fn eval_const(src: &str) -> Value {
        eval_with(src, &[]).unwrap()
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval_const("1 + 2 * 3"), Value::Int(7));
        assert_eq!(eval_const("(1 + 2) * 3"), Value::Int(9));
        assert_eq!(eval_const("-2 * 3 + 10 % 4"), Value::Int(-4));
        assert_eq!(eval_const("1 + 1 == 2 && !false"), Value::Bool(true));
    }

    #[test]
    fn test_division_keeps_integers_when_exact() {
        assert_eq!(eval_const("10 / 2"), Value::Int(5));
        assert_eq!(eval_const("7 / 2"), Value::Float(3.5));
        assert!(eval_with("1 / 0", &[]).is_err());
    }

    #[test]
    fn test_variables_are_collected_in_order() {
        let expr = Expression::parse("max(Temp, Temp2) > Threshold + Temp").unwrap();
        assert_eq!(expr.variables(), &["Temp", "Temp2", "Threshold"]);
        assert!(expr.references("Temp2"));
        assert!(!expr.references("max"));
    }

    #[test]
    fn test_variables_resolve_from_map() {
        let result = eval_with(
            "Temp > 20 and Window == 'open'",
            &[("Temp", Value::Float(21.5)), ("Window", Value::from("open"))],
        )
        .unwrap();
        assert_eq!(result, Value::Bool(true));
    }

    #[test]
    fn test_strings_and_lists() {
        assert_eq!(eval_const("\"t=\" + 21"), Value::from("t=21"));
        assert_eq!(eval_const("len([1, 2] + [3])"), Value::Int(3));
        assert_eq!(eval_const("'abc' < 'abd'"), Value::Bool(true));
    }

    #[test]
    fn test_builtins() {
        assert_eq!(eval_const("abs(-3)"), Value::Int(3));
        assert_eq!(eval_const("round(2.6)"), Value::Int(3));
        assert_eq!(eval_const("floor(2.6)"), Value::Int(2));
        assert_eq!(eval_const("min(4, 2.5, 9)"), Value::Float(2.5));
        assert_eq!(eval_const("MAX([1, 7, 3])"), Value::Int(7));
        assert!(matches!(eval_const("now()"), Value::Date(_)));
        assert!(eval_with("nope(1)", &[]).is_err());
    }

    #[test]
    fn test_numeric_equality_across_representations() {
        assert_eq!(eval_const("2 == 2.0"), Value::Bool(true));
        assert_eq!(eval_const("1 != 1"), Value::Bool(false));
    }

    #[test]
    fn test_syntax_errors_have_positions() {
        let src = "Temp +\n  * 2";
        let err = Expression::parse(src).unwrap_err();
        assert_eq!(err.position(src), (2, 3));

        let err = Expression::parse("(1 + 2").unwrap_err();
        assert!(err.message.contains("')'"));

        let err = Expression::parse("1 2").unwrap_err();
        assert_eq!(err.offset, 2);

        assert!(Expression::parse("   ").is_err());
        assert!(Expression::parse("'open").is_err());
        assert!(Expression::parse("a # b").is_err());
    }

    #[test]
    fn test_type_errors() {
        let err = eval_with("-'x'", &[]).unwrap_err();
        assert!(err.message.contains("cannot negate"));
        let err = eval_with("true < 1", &[]).unwrap_err();
        assert!(err.message.contains("cannot compare"));
    }

    #[test]
    fn test_integer_overflow_widens_to_float() {
        let value = eval_const("9223372036854775807 + 1");
        assert!(matches!(value, Value::Float(_)));
    }

    #[test]
    fn test_min_int_division_and_negation_widen_to_float() {
        let min = [("Low", Value::Int(i64::MIN))];
        assert_eq!(
            eval_with("Low / -1", &min).unwrap(),
            Value::Float(-(i64::MIN as f64))
        );
        assert_eq!(eval_with("-Low", &min).unwrap(), Value::Float(-(i64::MIN as f64)));
        assert_eq!(
            eval_const("(-9223372036854775807 - 1) / -1"),
            Value::Float(9223372036854775808.0)
        );
        assert!(matches!(eval_with("Low % -1", &min).unwrap(), Value::Float(_)));
        assert_eq!(eval_with("Low / 2", &min).unwrap(), Value::Int(i64::MIN / 2));
    }
}
