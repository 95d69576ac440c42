//! A small expression IR for design value nodes.
//!
//! Designs may compute values from textual expressions. Instead of
//! embedding a scripting engine, expressions compile at design load into a
//! tiny IR: literals, named sub-values, field access on the `node` and
//! `grant` proxies, arithmetic (`+ - * / % ^`, `^` is power and
//! right-associative), comparisons, and calls into a whitelisted math
//! library. Evaluation is pure: an expression can read interops and its
//! scope but cannot mutate anything.
//!
//! Grammar (precedence climbing):
//!
//! ```text
//! comparison := sum (('<' | '<=' | '==' | '!=' | '>=' | '>') sum)?
//! sum        := product (('+' | '-') product)*
//! product    := power (('*' | '/' | '%') power)*
//! power      := unary ('^' power)?
//! unary      := '-' unary | postfix
//! postfix    := primary ('.' ident)*
//! primary    := number | string | ident | ident '(' args ')' | '(' comparison ')'
//! ```

use std::fmt;

use core_value::Value;

use crate::geometry::Size2f;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExprError {
    #[error("parse error at offset {at}: {message}")]
    Parse { at: usize, message: String },
    #[error("unknown identifier \"{0}\"")]
    UnknownIdentifier(String),
    #[error("unknown function \"{0}\"")]
    UnknownFunction(String),
    #[error("function \"{name}\" expects {expected} arguments, got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("\"{0}\" has no field \"{1}\"")]
    UnknownField(String, String),
    #[error("type error: {0}")]
    Type(String),
    #[error("no interop named \"{0}\" in scope")]
    UnknownInterop(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Number(f64),
    String(String),
    Var(String),
    Field(Box<Node>, String),
    Neg(Box<Node>),
    Binary(BinOp, Box<Node>, Box<Node>),
    Call(String, Vec<Node>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Lt,
    Le,
    Eq,
    Ne,
    Ge,
    Gt,
}

/// A compiled expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    source: String,
    root: Node,
}

/// What an expression sees while evaluating.
pub struct EvalScope<'a> {
    /// Named sub-values from the design.
    pub vars: &'a dyn Fn(&str) -> Option<Value>,
    /// Interop lookup for the `node` proxy.
    pub interop: &'a dyn Fn(&str) -> Option<Value>,
    /// Layout dimensions for the `grant` proxy.
    pub grant: Size2f,
}

/// Intermediate operand: proxies only exist until a field access resolves
/// them.
enum Operand {
    Value(Value),
    NodeProxy,
    GrantProxy,
}

impl Expr {
    pub fn compile(source: &str) -> Result<Expr, ExprError> {
        let mut parser = Parser {
            bytes: source.as_bytes(),
            at: 0,
        };
        parser.skip_ws();
        let root = parser.comparison()?;
        parser.skip_ws();
        if parser.at < parser.bytes.len() {
            return Err(ExprError::Parse {
                at: parser.at,
                message: "trailing input".to_string(),
            });
        }
        Ok(Expr {
            source: source.to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn evaluate(&self, scope: &EvalScope<'_>) -> Result<Value, ExprError> {
        match eval(&self.root, scope)? {
            Operand::Value(value) => Ok(value),
            Operand::NodeProxy | Operand::GrantProxy => Err(ExprError::Type(
                "a proxy is not a value; access a field on it".to_string(),
            )),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

fn eval(node: &Node, scope: &EvalScope<'_>) -> Result<Operand, ExprError> {
    match node {
        Node::Number(number) => Ok(Operand::Value(Value::from(*number))),
        Node::String(string) => Ok(Operand::Value(Value::from(string.as_str()))),
        Node::Var(name) => match name.as_str() {
            "node" => Ok(Operand::NodeProxy),
            "grant" => Ok(Operand::GrantProxy),
            _ => (scope.vars)(name)
                .map(Operand::Value)
                .ok_or_else(|| ExprError::UnknownIdentifier(name.clone())),
        },
        Node::Field(base, field) => match eval(base, scope)? {
            Operand::NodeProxy => (scope.interop)(field)
                .map(Operand::Value)
                .ok_or_else(|| ExprError::UnknownInterop(field.clone())),
            Operand::GrantProxy => match field.as_str() {
                "width" => Ok(Operand::Value(Value::from(scope.grant.width))),
                "height" => Ok(Operand::Value(Value::from(scope.grant.height))),
                _ => Err(ExprError::UnknownField("grant".to_string(), field.clone())),
            },
            Operand::Value(value) => value
                .index(field.as_str())
                .map(Operand::Value)
                .map_err(|_| ExprError::UnknownField(format!("{value:?}"), field.clone())),
        },
        Node::Neg(inner) => {
            let number = number_of(eval(inner, scope)?)?;
            Ok(Operand::Value(Value::from(-number)))
        }
        Node::Binary(op, lhs, rhs) => {
            let lhs = eval(lhs, scope)?;
            let rhs = eval(rhs, scope)?;
            binary(*op, lhs, rhs)
        }
        Node::Call(name, args) => {
            let mut numbers = Vec::with_capacity(args.len());
            for arg in args {
                numbers.push(number_of(eval(arg, scope)?)?);
            }
            call(name, &numbers).map(|number| Operand::Value(Value::from(number)))
        }
    }
}

fn number_of(operand: Operand) -> Result<f64, ExprError> {
    match operand {
        Operand::Value(value) => value
            .as_f64()
            .map_err(|_| ExprError::Type(format!("expected a number, got {value:?}"))),
        _ => Err(ExprError::Type("expected a number, got a proxy".to_string())),
    }
}

fn binary(op: BinOp, lhs: Operand, rhs: Operand) -> Result<Operand, ExprError> {
    // string equality and concatenation are the only non-numeric cases
    if let (Operand::Value(left), Operand::Value(right)) = (&lhs, &rhs)
        && left.is_string()
        && right.is_string()
    {
        let (left, right) = (
            left.as_str().expect("checked string"),
            right.as_str().expect("checked string"),
        );
        return match op {
            BinOp::Add => Ok(Operand::Value(Value::from(format!("{left}{right}")))),
            BinOp::Eq => Ok(Operand::Value(Value::from(f64::from(left == right)))),
            BinOp::Ne => Ok(Operand::Value(Value::from(f64::from(left != right)))),
            _ => Err(ExprError::Type("strings support only + and (in)equality".to_string())),
        };
    }

    let left = number_of(lhs)?;
    let right = number_of(rhs)?;
    let result = match op {
        BinOp::Add => left + right,
        BinOp::Sub => left - right,
        BinOp::Mul => left * right,
        BinOp::Div => left / right,
        // floored remainder, sign of the divisor
        BinOp::Rem => left - right * (left / right).floor(),
        BinOp::Pow => left.powf(right),
        BinOp::Lt => f64::from(left < right),
        BinOp::Le => f64::from(left <= right),
        BinOp::Eq => f64::from(left == right),
        BinOp::Ne => f64::from(left != right),
        BinOp::Ge => f64::from(left >= right),
        BinOp::Gt => f64::from(left > right),
    };
    Ok(Operand::Value(Value::from(result)))
}

/// The whitelisted call library. Everything takes and returns numbers.
fn call(name: &str, args: &[f64]) -> Result<f64, ExprError> {
    let arity = |expected: usize| -> Result<(), ExprError> {
        if args.len() == expected {
            Ok(())
        } else {
            Err(ExprError::Arity {
                name: name.to_string(),
                expected,
                got: args.len(),
            })
        }
    };
    match name {
        "sin" => arity(1).map(|_| args[0].sin()),
        "cos" => arity(1).map(|_| args[0].cos()),
        "tan" => arity(1).map(|_| args[0].tan()),
        "sqrt" => arity(1).map(|_| args[0].sqrt()),
        "abs" => arity(1).map(|_| args[0].abs()),
        "floor" => arity(1).map(|_| args[0].floor()),
        "ceil" => arity(1).map(|_| args[0].ceil()),
        "round" => arity(1).map(|_| args[0].round()),
        "min" => arity(2).map(|_| args[0].min(args[1])),
        "max" => arity(2).map(|_| args[0].max(args[1])),
        "pow" => arity(2).map(|_| args[0].powf(args[1])),
        "clamp" => arity(3).map(|_| args[0].clamp(args[1], args[2])),
        _ => Err(ExprError::UnknownFunction(name.to_string())),
    }
}

// -------------------------------------------------------------------------
// Parser
// -------------------------------------------------------------------------

struct Parser<'a> {
    bytes: &'a [u8],
    at: usize,
}

impl Parser<'_> {
    fn skip_ws(&mut self) {
        while self.at < self.bytes.len() && self.bytes[self.at].is_ascii_whitespace() {
            self.at += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.at).copied()
    }

    fn eat(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.at += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> ExprError {
        ExprError::Parse {
            at: self.at,
            message: message.into(),
        }
    }

    fn comparison(&mut self) -> Result<Node, ExprError> {
        let lhs = self.sum()?;
        self.skip_ws();
        let op = match (self.peek(), self.bytes.get(self.at + 1).copied()) {
            (Some(b'<'), Some(b'=')) => Some((BinOp::Le, 2)),
            (Some(b'>'), Some(b'=')) => Some((BinOp::Ge, 2)),
            (Some(b'='), Some(b'=')) => Some((BinOp::Eq, 2)),
            (Some(b'!'), Some(b'=')) => Some((BinOp::Ne, 2)),
            (Some(b'<'), _) => Some((BinOp::Lt, 1)),
            (Some(b'>'), _) => Some((BinOp::Gt, 1)),
            _ => None,
        };
        match op {
            Some((op, len)) => {
                self.at += len;
                self.skip_ws();
                let rhs = self.sum()?;
                Ok(Node::Binary(op, Box::new(lhs), Box::new(rhs)))
            }
            None => Ok(lhs),
        }
    }

    fn sum(&mut self) -> Result<Node, ExprError> {
        let mut lhs = self.product()?;
        loop {
            self.skip_ws();
            let op = match self.peek() {
                Some(b'+') => BinOp::Add,
                Some(b'-') => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.at += 1;
            self.skip_ws();
            let rhs = self.product()?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn product(&mut self) -> Result<Node, ExprError> {
        let mut lhs = self.power()?;
        loop {
            self.skip_ws();
            let op = match self.peek() {
                Some(b'*') => BinOp::Mul,
                Some(b'/') => BinOp::Div,
                Some(b'%') => BinOp::Rem,
                _ => return Ok(lhs),
            };
            self.at += 1;
            self.skip_ws();
            let rhs = self.power()?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn power(&mut self) -> Result<Node, ExprError> {
        let base = self.unary()?;
        self.skip_ws();
        if self.eat(b'^') {
            self.skip_ws();
            // right-associative
            let exponent = self.power()?;
            return Ok(Node::Binary(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn unary(&mut self) -> Result<Node, ExprError> {
        self.skip_ws();
        if self.eat(b'-') {
            let inner = self.unary()?;
            return Ok(Node::Neg(Box::new(inner)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Node, ExprError> {
        let mut node = self.primary()?;
        loop {
            self.skip_ws();
            if self.eat(b'.') {
                let field = self.identifier()?;
                node = Node::Field(Box::new(node), field);
            } else {
                return Ok(node);
            }
        }
    }

    fn primary(&mut self) -> Result<Node, ExprError> {
        self.skip_ws();
        match self.peek() {
            Some(b'(') => {
                self.at += 1;
                let inner = self.comparison()?;
                self.skip_ws();
                if !self.eat(b')') {
                    return Err(self.error("expected ')'"));
                }
                Ok(inner)
            }
            Some(b'"') => self.string(),
            Some(byte) if byte.is_ascii_digit() => self.number(),
            Some(byte) if byte.is_ascii_alphabetic() || byte == b'_' => {
                let name = self.identifier()?;
                self.skip_ws();
                if self.eat(b'(') {
                    let mut args = Vec::new();
                    self.skip_ws();
                    if !self.eat(b')') {
                        loop {
                            args.push(self.comparison()?);
                            self.skip_ws();
                            if self.eat(b',') {
                                continue;
                            }
                            if self.eat(b')') {
                                break;
                            }
                            return Err(self.error("expected ',' or ')'"));
                        }
                    }
                    Ok(Node::Call(name, args))
                } else {
                    Ok(Node::Var(name))
                }
            }
            _ => Err(self.error("expected an expression")),
        }
    }

    fn identifier(&mut self) -> Result<String, ExprError> {
        let start = self.at;
        while self
            .peek()
            .is_some_and(|byte| byte.is_ascii_alphanumeric() || byte == b'_')
        {
            self.at += 1;
        }
        if start == self.at {
            return Err(self.error("expected an identifier"));
        }
        Ok(String::from_utf8_lossy(&self.bytes[start..self.at]).into_owned())
    }

    fn number(&mut self) -> Result<Node, ExprError> {
        let start = self.at;
        while self
            .peek()
            .is_some_and(|byte| byte.is_ascii_digit() || byte == b'.')
        {
            self.at += 1;
        }
        let text = std::str::from_utf8(&self.bytes[start..self.at])
            .map_err(|_| self.error("invalid number"))?;
        text.parse::<f64>()
            .map(Node::Number)
            .map_err(|_| self.error(format!("invalid number \"{text}\"")))
    }

    fn string(&mut self) -> Result<Node, ExprError> {
        debug_assert_eq!(self.peek(), Some(b'"'));
        self.at += 1;
        let start = self.at;
        while let Some(byte) = self.peek() {
            if byte == b'"' {
                let text = String::from_utf8_lossy(&self.bytes[start..self.at]).into_owned();
                self.at += 1;
                return Ok(Node::String(text));
            }
            self.at += 1;
        }
        Err(self.error("unterminated string"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn eval_with(source: &str, vars: &[(&str, f64)], interops: &[(&str, f64)]) -> Value {
        let vars: HashMap<String, Value> = vars
            .iter()
            .map(|(name, number)| (name.to_string(), Value::from(*number)))
            .collect();
        let interops: HashMap<String, Value> = interops
            .iter()
            .map(|(name, number)| (name.to_string(), Value::from(*number)))
            .collect();
        let var_lookup = |name: &str| vars.get(name).cloned();
        let interop_lookup = |name: &str| interops.get(name).cloned();
        let scope = EvalScope {
            vars: &var_lookup,
            interop: &interop_lookup,
            grant: Size2f::new(200.0, 100.0),
        };
        Expr::compile(source).unwrap().evaluate(&scope).unwrap()
    }

    fn eval_number(source: &str) -> f64 {
        eval_with(source, &[], &[]).as_f64().unwrap()
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(eval_number("1 + 2 * 3"), 7.0);
        assert_eq!(eval_number("(1 + 2) * 3"), 9.0);
        assert_eq!(eval_number("2 ^ 3 ^ 2"), 512.0); // right-associative
        assert_eq!(eval_number("-2 ^ 2"), 4.0); // unary binds tighter
        assert_eq!(eval_number("7 % 3"), 1.0);
        assert_eq!(eval_number("-7 % 3"), 2.0); // floored remainder
    }

    #[test]
    fn comparisons_yield_zero_or_one() {
        assert_eq!(eval_number("1 < 2"), 1.0);
        assert_eq!(eval_number("2 <= 1"), 0.0);
        assert_eq!(eval_number("3 == 3"), 1.0);
        assert_eq!(eval_number("3 != 3"), 0.0);
    }

    #[test]
    fn variables_and_proxies() {
        assert_eq!(
            eval_with("base * 2", &[("base", 21.0)], &[]).as_f64().unwrap(),
            42.0
        );
        assert_eq!(
            eval_with("node.opacity + 1", &[], &[("opacity", 0.5)])
                .as_f64()
                .unwrap(),
            1.5
        );
        assert_eq!(eval_number("grant.width / 2"), 100.0);
        assert_eq!(eval_number("grant.height"), 100.0);
    }

    #[test]
    fn calls() {
        assert_eq!(eval_number("min(3, 4)"), 3.0);
        assert_eq!(eval_number("clamp(15, 0, 10)"), 10.0);
        assert_eq!(eval_number("abs(-3)"), 3.0);
        assert!((eval_number("sin(0)") - 0.0).abs() < 1e-12);
    }

    #[test]
    fn strings_concatenate_and_compare() {
        let vars = |_: &str| None;
        let interop = |_: &str| None;
        let scope = EvalScope {
            vars: &vars,
            interop: &interop,
            grant: Size2f::default(),
        };
        let concat = Expr::compile(r#""a" + "b""#).unwrap().evaluate(&scope).unwrap();
        assert_eq!(concat, "ab");
        let eq = Expr::compile(r#""a" == "a""#).unwrap().evaluate(&scope).unwrap();
        assert_eq!(eq, 1.0);
    }

    #[test]
    fn errors() {
        assert!(matches!(
            Expr::compile("1 +"),
            Err(ExprError::Parse { .. })
        ));
        assert!(matches!(
            Expr::compile("1 2"),
            Err(ExprError::Parse { .. })
        ));
        let vars = |_: &str| None;
        let interop = |_: &str| None;
        let scope = EvalScope {
            vars: &vars,
            interop: &interop,
            grant: Size2f::default(),
        };
        assert!(matches!(
            Expr::compile("nope").unwrap().evaluate(&scope),
            Err(ExprError::UnknownIdentifier(_))
        ));
        assert!(matches!(
            Expr::compile("mystery(1)").unwrap().evaluate(&scope),
            Err(ExprError::UnknownFunction(_))
        ));
        assert!(matches!(
            Expr::compile("min(1)").unwrap().evaluate(&scope),
            Err(ExprError::Arity { .. })
        ));
        assert!(matches!(
            Expr::compile("node").unwrap().evaluate(&scope),
            Err(ExprError::Type(_))
        ));
        assert!(matches!(
            Expr::compile("grant.depth").unwrap().evaluate(&scope),
            Err(ExprError::UnknownField(..))
        ));
    }
}
