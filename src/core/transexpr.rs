//! Band-math expression transpiler.
//!
//! Valid-pixel expressions in SNAP products are written in SNAP's band-maths
//! vocabulary (`^`, `nan(x)`, `&&`, `? :`, ...). Mask evaluation uses a
//! numpy-like vocabulary (`**`, `isnan(x)`, `and`, `where(c, a, b)`, ...).
//! Both are lexed by the same tokenizer and parsed by a precedence-climbing
//! parser configured per [`Dialect`] into a dialect-neutral [`Expr`]. Output
//! is printed from the AST with the target dialect's precedence rules, so
//! grouping that differs between the two vocabularies is made explicit.

use crate::types::{GenError, GenResult};
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

/// Expression vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// SNAP band maths: `^`, `nan()`, `&&`, `||`, `!`, `AND/OR/NOT`, `c ? a : b`
    Snap,
    /// Evaluation vocabulary: `**`, `isnan()`, `and`, `or`, `not`, `where(c, a, b)`
    Target,
}

/// Lexical token class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    Number,
    Op,
    Paren,
    Comma,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// Byte offset in the source expression
    pub position: usize,
}

fn token_regex() -> &'static Regex {
    static TOKEN_RE: OnceLock<Regex> = OnceLock::new();
    TOKEN_RE.get_or_init(|| {
        Regex::new(concat!(
            r"^(?:",
            r"(?P<num>(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?)",
            r"|(?P<id>[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)",
            r"|(?P<op>\*\*|&&|\|\||<=|>=|==|!=|[-+*/^<>!&|?:])",
            r"|(?P<par>[()])",
            r"|(?P<comma>,)",
            r")"
        ))
        .expect("token pattern is valid")
    })
}

/// Split an expression into tokens
pub fn tokenize(expr: &str) -> GenResult<Vec<Token>> {
    let re = token_regex();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < expr.len() {
        let rest = &expr[pos..];
        let trimmed = rest.trim_start();
        pos += rest.len() - trimmed.len();
        if trimmed.is_empty() {
            break;
        }

        let caps = re.captures(trimmed).ok_or_else(|| GenError::UnsupportedExpression {
            token: trimmed.chars().next().map(String::from).unwrap_or_default(),
            position: pos,
        })?;
        let (kind, m) = if let Some(m) = caps.name("num") {
            (TokenKind::Number, m)
        } else if let Some(m) = caps.name("id") {
            (TokenKind::Ident, m)
        } else if let Some(m) = caps.name("op") {
            (TokenKind::Op, m)
        } else if let Some(m) = caps.name("par") {
            (TokenKind::Paren, m)
        } else if let Some(m) = caps.name("comma") {
            (TokenKind::Comma, m)
        } else {
            unreachable!("token pattern has no other alternatives")
        };

        tokens.push(Token {
            kind,
            text: m.as_str().to_string(),
            position: pos,
        });
        pos += m.end();
    }

    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    And,
    Or,
    BitAnd,
    BitOr,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge | BinaryOp::Eq | BinaryOp::Ne
        )
    }

    fn target_symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "**",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
        }
    }
}

/// Whitelisted functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Abs,
    Sqrt,
    Exp,
    Log,
    Log10,
    Sin,
    Cos,
    Tan,
    Floor,
    Ceil,
    Min,
    Max,
    IsNan,
}

impl Function {
    fn lookup(name: &str, dialect: Dialect) -> Option<Self> {
        let f = match name {
            "abs" => Function::Abs,
            "sqrt" => Function::Sqrt,
            "exp" => Function::Exp,
            "log" => Function::Log,
            "log10" => Function::Log10,
            "sin" => Function::Sin,
            "cos" => Function::Cos,
            "tan" => Function::Tan,
            "floor" => Function::Floor,
            "ceil" => Function::Ceil,
            "min" => Function::Min,
            "max" => Function::Max,
            "nan" if dialect == Dialect::Snap => Function::IsNan,
            "isnan" if dialect == Dialect::Target => Function::IsNan,
            _ => return None,
        };
        Some(f)
    }

    pub fn arity(self) -> usize {
        match self {
            Function::Min | Function::Max => 2,
            _ => 1,
        }
    }

    fn target_name(self) -> &'static str {
        match self {
            Function::Abs => "abs",
            Function::Sqrt => "sqrt",
            Function::Exp => "exp",
            Function::Log => "log",
            Function::Log10 => "log10",
            Function::Sin => "sin",
            Function::Cos => "cos",
            Function::Tan => "tan",
            Function::Floor => "floor",
            Function::Ceil => "ceil",
            Function::Min => "min",
            Function::Max => "max",
            Function::IsNan => "isnan",
        }
    }
}

/// Dialect-neutral expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Numeric literal, keeping its source spelling
    Number { text: String, value: f64 },
    Bool(bool),
    NaN,
    Ident(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(Function, Vec<Expr>),
    /// `cond ? then : otherwise`
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    /// Parentheses written in the source
    Group(Box<Expr>),
}

impl Expr {
    /// Band identifiers referenced by the expression
    pub fn identifiers(&self) -> BTreeSet<&str> {
        let mut names = BTreeSet::new();
        self.collect_identifiers(&mut names);
        names
    }

    fn collect_identifiers<'a>(&'a self, names: &mut BTreeSet<&'a str>) {
        match self {
            Expr::Ident(name) => {
                names.insert(name.as_str());
            }
            Expr::Unary(_, e) | Expr::Group(e) => e.collect_identifiers(names),
            Expr::Binary(_, l, r) => {
                l.collect_identifiers(names);
                r.collect_identifiers(names);
            }
            Expr::Call(_, args) => args.iter().for_each(|a| a.collect_identifiers(names)),
            Expr::Conditional(c, a, b) => {
                c.collect_identifiers(names);
                a.collect_identifiers(names);
                b.collect_identifiers(names);
            }
            Expr::Number { .. } | Expr::Bool(_) | Expr::NaN => {}
        }
    }

    /// Binding strength in the target vocabulary (higher binds tighter)
    fn target_precedence(&self) -> u8 {
        match self {
            Expr::Binary(BinaryOp::Or, ..) => 2,
            Expr::Binary(BinaryOp::And, ..) => 3,
            Expr::Unary(UnaryOp::Not, _) => 4,
            Expr::Binary(op, ..) if op.is_comparison() => 5,
            Expr::Binary(BinaryOp::BitOr, ..) => 6,
            Expr::Binary(BinaryOp::BitAnd, ..) => 7,
            Expr::Binary(BinaryOp::Add | BinaryOp::Sub, ..) => 8,
            Expr::Binary(BinaryOp::Mul | BinaryOp::Div, ..) => 9,
            Expr::Unary(UnaryOp::Neg | UnaryOp::Pos, _) => 10,
            Expr::Binary(BinaryOp::Pow, ..) => 11,
            _ => 12,
        }
    }

    /// Render in the target vocabulary
    pub fn to_target(&self) -> String {
        let mut out = String::new();
        self.write_target(&mut out);
        out
    }

    fn write_target(&self, out: &mut String) {
        match self {
            Expr::Number { text, .. } => out.push_str(text),
            Expr::Bool(true) => out.push_str("True"),
            Expr::Bool(false) => out.push_str("False"),
            Expr::NaN => out.push_str("nan"),
            Expr::Ident(name) => out.push_str(name),
            Expr::Group(inner) => {
                out.push('(');
                inner.write_target(out);
                out.push(')');
            }
            Expr::Unary(op, operand) => {
                out.push_str(match op {
                    UnaryOp::Neg => "-",
                    UnaryOp::Pos => "+",
                    UnaryOp::Not => "not ",
                });
                let wrap = operand.target_precedence() < self.target_precedence();
                write_wrapped(operand, wrap, out);
            }
            Expr::Binary(op, lhs, rhs) => {
                let p = self.target_precedence();
                let (wrap_l, wrap_r) = if op.is_comparison() {
                    // never let comparisons chain
                    (lhs.target_precedence() <= p, rhs.target_precedence() <= p)
                } else if *op == BinaryOp::Pow {
                    (lhs.target_precedence() <= p, rhs.target_precedence() < p)
                } else {
                    (lhs.target_precedence() < p, rhs.target_precedence() <= p)
                };
                write_wrapped(lhs, wrap_l, out);
                if *op == BinaryOp::Pow {
                    out.push_str("**");
                } else {
                    out.push(' ');
                    out.push_str(op.target_symbol());
                    out.push(' ');
                }
                write_wrapped(rhs, wrap_r, out);
            }
            Expr::Call(f, args) => {
                out.push_str(f.target_name());
                write_args(args.iter(), out);
            }
            Expr::Conditional(c, a, b) => {
                out.push_str("where");
                write_args([c.as_ref(), a.as_ref(), b.as_ref()].into_iter(), out);
            }
        }
    }
}

fn write_wrapped(expr: &Expr, wrap: bool, out: &mut String) {
    if wrap {
        out.push('(');
        expr.write_target(out);
        out.push(')');
    } else {
        expr.write_target(out);
    }
}

fn write_args<'a>(args: impl Iterator<Item = &'a Expr>, out: &mut String) {
    out.push('(');
    for (i, arg) in args.enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        arg.write_target(out);
    }
    out.push(')');
}

/// Precedence levels shared by both dialects' binary tables
const PREC_CONDITIONAL: u8 = 1;
const PREC_POW: u8 = 11;
const PREC_UNARY: u8 = 10;
const PREC_NOT_TARGET: u8 = 4;

/// Recursive-descent (precedence climbing) parser over a token stream
struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    dialect: Dialect,
    source_len: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn peek_text(&self) -> Option<&'a str> {
        self.peek().map(|t| t.text.as_str())
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn unsupported(&self, token: Option<&Token>) -> GenError {
        match token {
            Some(t) => GenError::UnsupportedExpression {
                token: t.text.clone(),
                position: t.position,
            },
            None => GenError::UnsupportedExpression {
                token: "<end of expression>".to_string(),
                position: self.source_len,
            },
        }
    }

    fn expect(&mut self, text: &str) -> GenResult<()> {
        match self.advance() {
            Some(t) if t.text == text => Ok(()),
            other => Err(self.unsupported(other)),
        }
    }

    /// Binary operator at the cursor: (op, precedence, right-associative)
    fn binary_op(&self) -> Option<(BinaryOp, u8, bool)> {
        let token = self.peek()?;
        let text = token.text.as_str();
        let keyword = if token.kind == TokenKind::Ident {
            Some(text)
        } else {
            None
        };
        match self.dialect {
            Dialect::Snap => {
                let kw = keyword.map(str::to_ascii_lowercase);
                let op = match (text, kw.as_deref()) {
                    ("||", _) | (_, Some("or")) => (BinaryOp::Or, 2, false),
                    ("&&", _) | (_, Some("and")) => (BinaryOp::And, 3, false),
                    ("|", _) => (BinaryOp::BitOr, 4, false),
                    ("&", _) => (BinaryOp::BitAnd, 5, false),
                    ("==", _) => (BinaryOp::Eq, 6, false),
                    ("!=", _) => (BinaryOp::Ne, 6, false),
                    ("<", _) => (BinaryOp::Lt, 7, false),
                    (">", _) => (BinaryOp::Gt, 7, false),
                    ("<=", _) => (BinaryOp::Le, 7, false),
                    (">=", _) => (BinaryOp::Ge, 7, false),
                    ("+", _) => (BinaryOp::Add, 8, false),
                    ("-", _) => (BinaryOp::Sub, 8, false),
                    ("*", _) => (BinaryOp::Mul, 9, false),
                    ("/", _) => (BinaryOp::Div, 9, false),
                    ("^", _) => (BinaryOp::Pow, PREC_POW, true),
                    _ => return None,
                };
                Some(op)
            }
            Dialect::Target => {
                let op = match (text, keyword) {
                    (_, Some("or")) => (BinaryOp::Or, 2, false),
                    (_, Some("and")) => (BinaryOp::And, 3, false),
                    ("==", _) => (BinaryOp::Eq, 5, false),
                    ("!=", _) => (BinaryOp::Ne, 5, false),
                    ("<", _) => (BinaryOp::Lt, 5, false),
                    (">", _) => (BinaryOp::Gt, 5, false),
                    ("<=", _) => (BinaryOp::Le, 5, false),
                    (">=", _) => (BinaryOp::Ge, 5, false),
                    ("|", _) => (BinaryOp::BitOr, 6, false),
                    ("&", _) => (BinaryOp::BitAnd, 7, false),
                    ("+", _) => (BinaryOp::Add, 8, false),
                    ("-", _) => (BinaryOp::Sub, 8, false),
                    ("*", _) => (BinaryOp::Mul, 9, false),
                    ("/", _) => (BinaryOp::Div, 9, false),
                    ("**", _) => (BinaryOp::Pow, PREC_POW, true),
                    _ => return None,
                };
                Some(op)
            }
        }
    }

    /// Prefix operator at the cursor: (op, precedence of its operand)
    fn unary_op(&self) -> Option<(UnaryOp, u8)> {
        let token = self.peek()?;
        let text = token.text.as_str();
        let is_ident = token.kind == TokenKind::Ident;
        match (self.dialect, text) {
            (_, "-") if !is_ident => Some((UnaryOp::Neg, PREC_UNARY)),
            (_, "+") if !is_ident => Some((UnaryOp::Pos, PREC_UNARY)),
            (Dialect::Snap, "!") => Some((UnaryOp::Not, PREC_UNARY)),
            (Dialect::Snap, t) if is_ident && t.eq_ignore_ascii_case("not") => {
                Some((UnaryOp::Not, PREC_UNARY))
            }
            (Dialect::Target, "not") if is_ident => Some((UnaryOp::Not, PREC_NOT_TARGET)),
            _ => None,
        }
    }

    fn parse_expr(&mut self, min_prec: u8) -> GenResult<Expr> {
        let mut lhs = self.parse_prefix()?;
        let mut chained_comparison = false;

        loop {
            if self.dialect == Dialect::Snap
                && self.peek_text() == Some("?")
                && PREC_CONDITIONAL >= min_prec
            {
                self.advance();
                let then_branch = self.parse_expr(0)?;
                self.expect(":")?;
                let else_branch = self.parse_expr(PREC_CONDITIONAL)?;
                lhs = Expr::Conditional(Box::new(lhs), Box::new(then_branch), Box::new(else_branch));
                continue;
            }

            let Some((op, prec, right_assoc)) = self.binary_op() else {
                break;
            };
            if prec < min_prec {
                break;
            }
            self.advance();
            let next_min = if right_assoc { prec } else { prec + 1 };
            let rhs = self.parse_expr(next_min)?;

            // Target comparisons chain: a < b < c == (a < b) and (b < c)
            let chaining =
                self.dialect == Dialect::Target && chained_comparison && op.is_comparison();
            let chain_middle = match &lhs {
                Expr::Binary(prev, _, middle) if chaining && prev.is_comparison() => {
                    Some(middle.as_ref().clone())
                }
                // a < b < c < d: continue from the last link of the chain
                Expr::Binary(BinaryOp::And, _, last) if chaining => match last.as_ref() {
                    Expr::Binary(prev, _, middle) if prev.is_comparison() => {
                        Some(middle.as_ref().clone())
                    }
                    _ => None,
                },
                _ => None,
            };
            lhs = match chain_middle {
                Some(middle) => Expr::Binary(
                    BinaryOp::And,
                    Box::new(lhs),
                    Box::new(Expr::Binary(op, Box::new(middle), Box::new(rhs))),
                ),
                None => Expr::Binary(op, Box::new(lhs), Box::new(rhs)),
            };
            chained_comparison = op.is_comparison();
        }

        Ok(lhs)
    }

    fn parse_prefix(&mut self) -> GenResult<Expr> {
        if let Some((op, prec)) = self.unary_op() {
            self.advance();
            let operand = self.parse_expr(prec)?;
            return Ok(Expr::Unary(op, Box::new(operand)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> GenResult<Expr> {
        let token = self.advance();
        let Some(token) = token else {
            return Err(self.unsupported(None));
        };

        match token.kind {
            TokenKind::Number => {
                let value = token
                    .text
                    .parse::<f64>()
                    .map_err(|_| self.unsupported(Some(token)))?;
                Ok(Expr::Number {
                    text: token.text.clone(),
                    value,
                })
            }
            TokenKind::Paren if token.text == "(" => {
                let inner = self.parse_expr(0)?;
                self.expect(")")?;
                Ok(Expr::Group(Box::new(inner)))
            }
            TokenKind::Ident => self.parse_identifier(token),
            _ => Err(self.unsupported(Some(token))),
        }
    }

    fn parse_identifier(&mut self, token: &'a Token) -> GenResult<Expr> {
        let name = token.text.as_str();

        if self.peek_text() == Some("(") {
            if self.dialect == Dialect::Target && name == "where" {
                let mut args = self.parse_call_args()?;
                if args.len() != 3 {
                    return Err(self.unsupported(Some(token)));
                }
                let otherwise = args.pop();
                let then = args.pop();
                let cond = args.pop();
                return match (cond, then, otherwise) {
                    (Some(c), Some(a), Some(b)) => {
                        Ok(Expr::Conditional(Box::new(c), Box::new(a), Box::new(b)))
                    }
                    _ => Err(self.unsupported(Some(token))),
                };
            }
            let function =
                Function::lookup(name, self.dialect).ok_or_else(|| self.unsupported(Some(token)))?;
            let args = self.parse_call_args()?;
            if args.len() != function.arity() {
                return Err(self.unsupported(Some(token)));
            }
            return Ok(Expr::Call(function, args));
        }

        let literal = match self.dialect {
            Dialect::Snap => match name.to_ascii_lowercase().as_str() {
                "true" => Some(Expr::Bool(true)),
                "false" => Some(Expr::Bool(false)),
                _ if name == "NaN" => Some(Expr::NaN),
                // bare `nan` reads back as the NaN literal in the target vocabulary
                _ if name == "nan" => return Err(self.unsupported(Some(token))),
                "and" | "or" | "not" => return Err(self.unsupported(Some(token))),
                _ => None,
            },
            Dialect::Target => match name {
                "True" => Some(Expr::Bool(true)),
                "False" => Some(Expr::Bool(false)),
                "nan" => Some(Expr::NaN),
                "and" | "or" | "not" => return Err(self.unsupported(Some(token))),
                _ => None,
            },
        };

        Ok(literal.unwrap_or_else(|| Expr::Ident(name.to_string())))
    }

    fn parse_call_args(&mut self) -> GenResult<Vec<Expr>> {
        self.expect("(")?;
        let mut args = Vec::new();
        if self.peek_text() == Some(")") {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr(0)?);
            match self.advance() {
                Some(t) if t.kind == TokenKind::Comma => continue,
                Some(t) if t.text == ")" => break,
                other => return Err(self.unsupported(other)),
            }
        }
        Ok(args)
    }
}

/// Parse an expression written in `dialect`
pub fn parse(expr: &str, dialect: Dialect) -> GenResult<Expr> {
    let tokens = tokenize(expr)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        dialect,
        source_len: expr.len(),
    };
    let ast = parser.parse_expr(0)?;
    if let Some(extra) = parser.peek() {
        return Err(parser.unsupported(Some(extra)));
    }
    Ok(ast)
}

/// An expression in the evaluation vocabulary, ready for mask evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct TranspiledExpression {
    text: String,
    ast: Expr,
}

impl TranspiledExpression {
    /// Parse an expression already written in the evaluation vocabulary
    pub fn parse(expr: &str) -> GenResult<Self> {
        let ast = parse(expr, Dialect::Target)?;
        Ok(Self {
            text: expr.trim().to_string(),
            ast,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn ast(&self) -> &Expr {
        &self.ast
    }
}

impl fmt::Display for TranspiledExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Transpile a SNAP band-maths expression into the evaluation vocabulary
pub fn transpile(snap_expr: &str) -> GenResult<TranspiledExpression> {
    let ast = parse(snap_expr, Dialect::Snap)?;
    let text = ast.to_target();
    log::debug!("Transpiled '{}' -> '{}'", snap_expr, text);
    Ok(TranspiledExpression { text, ast })
}

/// Convenience wrapper returning only the transpiled text
pub fn translate_snap_expr(snap_expr: &str) -> GenResult<String> {
    transpile(snap_expr).map(|t| t.text)
}
