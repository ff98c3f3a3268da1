//! Expression evaluation.
//!
//! The engine treats guard conditions and data model expressions as opaque
//! strings handed to an [`Evaluator`]. Hosts with their own expression
//! language implement the trait; [`DataEvaluator`] is the default.
//!
//! The default language supports:
//!
//! - literals: numbers, `"strings"`, `true`, `false`, `null`
//! - `name` / `name.nested.field` - data model variable access
//! - `a == b`, `a != b` - equality (strings, numbers, booleans, null)
//! - `a > b`, `a >= b`, `a < b`, `a <= b` - numeric comparison
//! - `a + b`, `a - b` - numeric arithmetic (`+` also joins strings)
//! - `!expr`, `expr && expr`, `expr || expr` - logic (AND binds tighter)
//! - `(expr)` - grouping
//!
//! Examples:
//! - `attempts < 3 && !_event.data.fatal`
//! - `caller.vip || queue.length > 10`
//! - `count + 1`

use crate::datamodel::DataModel;
use crate::error::ExpressionError;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// The host-supplied expression contract.
pub trait Evaluator: Send + Sync {
    /// Evaluates an expression to a value.
    fn evaluate(&self, expr: &str, data: &DataModel) -> Result<Value, ExpressionError>;

    /// Evaluates a guard condition.
    fn evaluate_cond(&self, expr: &str, data: &DataModel) -> Result<bool, ExpressionError> {
        self.evaluate(expr, data).map(|v| is_truthy(&v))
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

/// Arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
}

/// A parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal value.
    Literal(Value),
    /// Data model variable path.
    Var(String),
    /// Logical NOT.
    Not(Box<Expr>),
    /// Logical AND.
    And(Box<Expr>, Box<Expr>),
    /// Logical OR.
    Or(Box<Expr>, Box<Expr>),
    /// Comparison.
    Compare(CompareOp, Box<Expr>, Box<Expr>),
    /// Arithmetic.
    Arith(ArithOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Parses an expression from a string.
    pub fn parse(s: &str) -> Result<Self, ExpressionError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(parse_error(s, "empty expression"));
        }

        let mut parser = Parser::new(trimmed);
        let expr = parser.parse_expr()?;
        parser.skip_whitespace();
        if parser.pos < parser.input.len() {
            return Err(parse_error(
                s,
                format!("unexpected input at offset {}", parser.pos),
            ));
        }
        Ok(expr)
    }

    /// Evaluates the expression against a data model.
    pub fn evaluate(&self, data: &DataModel) -> Result<Value, ExpressionError> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Var(path) => data.lookup(path),
            Expr::Not(inner) => Ok(Value::Bool(!is_truthy(&inner.evaluate(data)?))),
            Expr::And(left, right) => {
                if !is_truthy(&left.evaluate(data)?) {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(is_truthy(&right.evaluate(data)?)))
            }
            Expr::Or(left, right) => {
                if is_truthy(&left.evaluate(data)?) {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(is_truthy(&right.evaluate(data)?)))
            }
            Expr::Compare(op, left, right) => {
                let l = left.evaluate(data)?;
                let r = right.evaluate(data)?;
                Ok(Value::Bool(compare(*op, &l, &r)))
            }
            Expr::Arith(op, left, right) => {
                let l = left.evaluate(data)?;
                let r = right.evaluate(data)?;
                arith(*op, &l, &r)
            }
        }
    }
}

/// Returns whether a value counts as true in a condition.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .zip(b.as_f64())
            .map(|(a, b)| (a - b).abs() < f64::EPSILON)
            .unwrap_or(false),
        _ => a == b,
    }
}

fn compare(op: CompareOp, l: &Value, r: &Value) -> bool {
    let ordered = |f: fn(f64, f64) -> bool| match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => f(a, b),
        _ => false,
    };

    match op {
        CompareOp::Eq => values_equal(l, r),
        CompareOp::Ne => !values_equal(l, r),
        CompareOp::Gt => ordered(|a, b| a > b),
        CompareOp::Ge => ordered(|a, b| a >= b),
        CompareOp::Lt => ordered(|a, b| a < b),
        CompareOp::Le => ordered(|a, b| a <= b),
    }
}

fn arith(op: ArithOp, l: &Value, r: &Value) -> Result<Value, ExpressionError> {
    let symbol = match op {
        ArithOp::Add => "+",
        ArithOp::Sub => "-",
    };

    if let (ArithOp::Add, Value::String(a), Value::String(b)) = (op, l, r) {
        return Ok(Value::String(format!("{}{}", a, b)));
    }

    if let (Some(a), Some(b)) = (l.as_i64(), r.as_i64()) {
        let result = match op {
            ArithOp::Add => a.checked_add(b),
            ArithOp::Sub => a.checked_sub(b),
        };
        if let Some(n) = result {
            return Ok(Value::from(n));
        }
    }

    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => {
            let n = match op {
                ArithOp::Add => a + b,
                ArithOp::Sub => a - b,
            };
            serde_json::Number::from_f64(n)
                .map(Value::Number)
                .ok_or_else(|| ExpressionError::Type {
                    expr: format!("{} {} {}", l, symbol, r),
                    reason: "result is not a finite number".to_string(),
                })
        }
        _ => Err(ExpressionError::Type {
            expr: format!("{} {} {}", l, symbol, r),
            reason: "operands must both be numbers".to_string(),
        }),
    }
}

fn parse_error(expr: &str, reason: impl Into<String>) -> ExpressionError {
    ExpressionError::Parse {
        expr: expr.to_string(),
        reason: reason.into(),
    }
}

/// Simple recursive descent parser.
struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn error(&self, reason: impl Into<String>) -> ExpressionError {
        parse_error(self.input, reason)
    }

    fn parse_expr(&mut self) -> Result<Expr, ExpressionError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_and()?;
        self.skip_whitespace();

        while self.peek_str("||") {
            self.pos += 2;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
            self.skip_whitespace();
        }

        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_unary()?;
        self.skip_whitespace();

        while self.peek_str("&&") {
            self.pos += 2;
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
            self.skip_whitespace();
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        self.skip_whitespace();

        if self.peek_char() == Some('!') && !self.peek_str("!=") {
            self.pos += 1;
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }

        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExpressionError> {
        let left = self.parse_additive()?;
        self.skip_whitespace();

        let op = if self.peek_str("==") {
            Some((CompareOp::Eq, 2))
        } else if self.peek_str("!=") {
            Some((CompareOp::Ne, 2))
        } else if self.peek_str(">=") {
            Some((CompareOp::Ge, 2))
        } else if self.peek_str("<=") {
            Some((CompareOp::Le, 2))
        } else if self.peek_char() == Some('>') {
            Some((CompareOp::Gt, 1))
        } else if self.peek_char() == Some('<') {
            Some((CompareOp::Lt, 1))
        } else {
            None
        };

        match op {
            Some((op, len)) => {
                self.pos += len;
                let right = self.parse_additive()?;
                Ok(Expr::Compare(op, Box::new(left), Box::new(right)))
            }
            None => Ok(left),
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_primary()?;
        self.skip_whitespace();

        loop {
            let op = match self.peek_char() {
                Some('+') => ArithOp::Add,
                Some('-') => ArithOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_primary()?;
            left = Expr::Arith(op, Box::new(left), Box::new(right));
            self.skip_whitespace();
        }

        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        self.skip_whitespace();

        match self.peek_char() {
            Some('(') => {
                self.pos += 1;
                let expr = self.parse_expr()?;
                self.skip_whitespace();
                if self.peek_char() != Some(')') {
                    return Err(self.error("expected ')'"));
                }
                self.pos += 1;
                Ok(expr)
            }
            Some('"') | Some('\'') => self.parse_string(),
            Some(c) if c.is_ascii_digit() || c == '-' => self.parse_number(),
            Some(c) if c.is_alphabetic() || c == '_' => self.parse_word(),
            Some(c) => Err(self.error(format!("unexpected character '{}'", c))),
            None => Err(self.error("unexpected end of expression")),
        }
    }

    fn parse_word(&mut self) -> Result<Expr, ExpressionError> {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' || c == '.' {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }

        let word = &self.input[start..self.pos];
        match word {
            "true" => Ok(Expr::Literal(Value::Bool(true))),
            "false" => Ok(Expr::Literal(Value::Bool(false))),
            "null" => Ok(Expr::Literal(Value::Null)),
            _ if word.ends_with('.') || word.contains("..") => {
                Err(self.error(format!("invalid variable path '{}'", word)))
            }
            _ => Ok(Expr::Var(word.to_string())),
        }
    }

    fn parse_string(&mut self) -> Result<Expr, ExpressionError> {
        let quote = self.peek_char().unwrap_or('"');
        self.pos += 1;

        let mut out = String::new();
        while let Some(c) = self.peek_char() {
            self.pos += c.len_utf8();
            if c == quote {
                return Ok(Expr::Literal(Value::String(out)));
            }
            if c == '\\' {
                if let Some(escaped) = self.peek_char() {
                    self.pos += escaped.len_utf8();
                    out.push(escaped);
                }
            } else {
                out.push(c);
            }
        }

        Err(self.error("unterminated string"))
    }

    fn parse_number(&mut self) -> Result<Expr, ExpressionError> {
        let start = self.pos;

        if self.peek_char() == Some('-') {
            self.pos += 1;
        }

        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                self.pos += 1;
            } else {
                break;
            }
        }

        let mut is_float = false;
        if self.peek_char() == Some('.') {
            is_float = true;
            self.pos += 1;
            while let Some(c) = self.peek_char() {
                if c.is_ascii_digit() {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }

        let num_str = &self.input[start..self.pos];
        if !is_float {
            if let Ok(n) = num_str.parse::<i64>() {
                return Ok(Expr::Literal(Value::from(n)));
            }
        }

        num_str
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(|n| Expr::Literal(Value::Number(n)))
            .ok_or_else(|| self.error(format!("invalid number: '{}'", num_str)))
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_str(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s)
    }
}

/// The default evaluator, with a cache of parsed expressions.
#[derive(Debug, Default)]
pub struct DataEvaluator {
    cache: RwLock<HashMap<String, Arc<Expr>>>,
}

impl DataEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    fn parsed(&self, expr: &str) -> Result<Arc<Expr>, ExpressionError> {
        if let Some(parsed) = self.cache.read().get(expr) {
            return Ok(parsed.clone());
        }

        let parsed = Arc::new(Expr::parse(expr)?);
        self.cache
            .write()
            .insert(expr.to_string(), parsed.clone());
        Ok(parsed)
    }

    /// Number of distinct expressions parsed so far.
    pub fn cached(&self) -> usize {
        self.cache.read().len()
    }
}

impl Evaluator for DataEvaluator {
    fn evaluate(&self, expr: &str, data: &DataModel) -> Result<Value, ExpressionError> {
        self.parsed(expr)?.evaluate(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: Value) -> DataModel {
        match value {
            Value::Object(map) => DataModel::from_map(map),
            _ => panic!("expected object"),
        }
    }

    fn eval(expr: &str, ctx: Value) -> Value {
        Expr::parse(expr).unwrap().evaluate(&data(ctx)).unwrap()
    }

    fn cond(expr: &str, ctx: Value) -> bool {
        is_truthy(&eval(expr, ctx))
    }

    #[test]
    fn test_truthy_check() {
        assert!(cond("enabled", json!({"enabled": true})));
        assert!(!cond("enabled", json!({"enabled": false})));
        assert!(!cond("enabled", json!({"enabled": null})));
    }

    #[test]
    fn test_literals() {
        assert_eq!(eval("42", json!({})), json!(42));
        assert_eq!(eval("-7", json!({})), json!(-7));
        assert_eq!(eval("0.5", json!({})), json!(0.5));
        assert_eq!(eval("'hi'", json!({})), json!("hi"));
        assert_eq!(eval("\"say \\\"hi\\\"\"", json!({})), json!("say \"hi\""));
        assert_eq!(eval("null", json!({})), Value::Null);
    }

    #[test]
    fn test_equality() {
        assert!(cond("status == \"active\"", json!({"status": "active"})));
        assert!(!cond("status == \"active\"", json!({"status": "inactive"})));
        assert!(cond("status != \"inactive\"", json!({"status": "active"})));
        assert!(cond("count == 42", json!({"count": 42.0})));
        assert!(cond("value == null", json!({"value": null})));
    }

    #[test]
    fn test_numeric_comparison() {
        assert!(cond("amount > 100", json!({"amount": 150})));
        assert!(!cond("amount > 100", json!({"amount": 100})));
        assert!(cond("amount >= 100", json!({"amount": 100})));
        assert!(cond("temp > -10", json!({"temp": 0})));
        assert!(cond("rate <= 0.5", json!({"rate": 0.5})));
        assert!(!cond("value > 10", json!({"value": "not a number"})));
    }

    #[test]
    fn test_variable_on_both_sides() {
        assert!(cond("used < limit", json!({"used": 2, "limit": 3})));
        assert!(!cond("used < limit", json!({"used": 3, "limit": 3})));
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval("count + 1", json!({"count": 1})), json!(2));
        assert_eq!(eval("count - 3", json!({"count": 1})), json!(-2));
        assert_eq!(eval("a + b", json!({"a": 0.5, "b": 1})), json!(1.5));
        assert_eq!(
            eval("first + ' ' + last", json!({"first": "Ada", "last": "L"})),
            json!("Ada L")
        );
        assert!(cond("count + 1 > 1", json!({"count": 1})));
    }

    #[test]
    fn test_arithmetic_type_error() {
        let expr = Expr::parse("name + 1").unwrap();
        let result = expr.evaluate(&data(json!({"name": "x"})));
        assert!(matches!(result, Err(ExpressionError::Type { .. })));
    }

    #[test]
    fn test_logic_and_precedence() {
        assert!(cond("a && b || c", json!({"a": false, "b": false, "c": true})));
        assert!(!cond("a && (b || c)", json!({"a": false, "b": true, "c": true})));
        assert!(cond("!(a && b)", json!({"a": true, "b": false})));
        assert!(cond("!!a", json!({"a": 1})));
        assert!(cond("!disabled", json!({"disabled": false})));
    }

    #[test]
    fn test_short_circuit_skips_undefined() {
        assert!(cond("ok || missing", json!({"ok": true})));
        assert!(!cond("flag && missing", json!({"flag": false})));
    }

    #[test]
    fn test_nested_field() {
        let ctx = json!({"order": {"customer": {"verified": true}}});
        assert!(cond("order.customer.verified", ctx));
        assert!(!cond("order.customer.verified", json!({"order": {}})));
    }

    #[test]
    fn test_undefined_variable() {
        let expr = Expr::parse("missing > 1").unwrap();
        assert_eq!(
            expr.evaluate(&data(json!({}))),
            Err(ExpressionError::UndefinedVariable {
                name: "missing".to_string()
            })
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(Expr::parse("").is_err());
        assert!(Expr::parse("   ").is_err());
        assert!(Expr::parse("(a && b").is_err());
        assert!(Expr::parse("name == \"unclosed").is_err());
        assert!(Expr::parse("a >").is_err());
        assert!(Expr::parse("a b").is_err());
        assert!(Expr::parse("order.").is_err());
        assert!(Expr::parse("#").is_err());
    }

    #[test]
    fn test_evaluator_cache() {
        let evaluator = DataEvaluator::new();
        let model = data(json!({"n": 2}));

        assert!(evaluator.evaluate_cond("n > 1", &model).unwrap());
        assert!(evaluator.evaluate_cond("n > 1", &model).unwrap());
        assert_eq!(evaluator.evaluate("n + 1", &model).unwrap(), json!(3));
        assert_eq!(evaluator.cached(), 2);

        assert!(evaluator.evaluate("n >", &model).is_err());
        assert_eq!(evaluator.cached(), 2);
    }
}
