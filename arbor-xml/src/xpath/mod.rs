//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

//! XPath 1.0 subset.
//!
//! This is the expression language used by YANG `when`/`must` statements,
//! `leafref` path expressions, and changelog selectors. It is not a
//! conforming XPath implementation; the supported surface is:
//!
//! - Location paths, absolute and relative, with the abbreviated axes
//!   `child` (default), `//` (descendant-or-self), `.` and `..`.
//! - Name tests `name`, `prefix:name`, `*` and `prefix:*`.
//! - Predicates, including positional ones.
//! - The operators `or`, `and`, `=`, `!=`, `<`, `<=`, `>`, `>=`,
//!   `+`, `-`, `*`, `div`, `mod`, unary `-` and node-set union `|`.
//! - The functions `current()`, `not()`, `true()`, `false()`, `count()`,
//!   `name()`, `string()`, `boolean()`, `number()`, `position()`, `last()`,
//!   `contains()`, `starts-with()`, `derived-from()` and
//!   `derived-from-or-self()`.
//!
//! Everything else (full axis syntax, `id()`, variable references) is a
//! syntax error. Prefixes inside expressions resolve against the namespace
//! context of the defining statement, never against the evaluation point.

pub mod eval;

pub use eval::{Context, Value, eval, eval_boolean, eval_nodeset, eval_string};

use crate::error::Error;

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    Arith(ArithOp, Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Union(Box<Expr>, Box<Expr>),
    Path(Path),
    Literal(String),
    Number(f64),
    Call(String, Vec<Expr>),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Path {
    pub absolute: bool,
    pub steps: Vec<Step>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Step {
    pub axis: Axis,
    pub test: NodeTest,
    pub preds: Vec<Expr>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Axis {
    Child,
    DescendantOrSelf,
    Current,
    Parent,
}

#[derive(Clone, Debug, PartialEq)]
pub enum NodeTest {
    Name(Option<String>, String),
    Wildcard(Option<String>),
    AnyNode,
}

/// Parses an XPath expression.
pub fn parse(expr: &str) -> Result<Expr, Error> {
    let mut parser = Parser::new(expr);
    let parsed = parser.parse_or()?;
    parser.skip_whitespace();
    if !parser.at_end() {
        return Err(parser.syntax("trailing tokens"));
    }
    Ok(parsed)
}

struct Parser<'a> {
    expr: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(expr: &'a str) -> Parser<'a> {
        Parser { expr, pos: 0 }
    }

    fn syntax(&self, reason: &str) -> Error {
        Error::XpathSyntax(self.expr.to_owned(), reason.to_owned())
    }

    fn at_end(&self) -> bool {
        self.pos >= self.expr.len()
    }

    fn rest(&self) -> &str {
        &self.expr[self.pos..]
    }

    fn peek(&self) -> Option<u8> {
        self.expr.as_bytes().get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n')) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_whitespace();
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    // Word operators must not swallow name prefixes ("order" is a name, not
    // "or" + "der").
    fn eat_word(&mut self, word: &str) -> bool {
        self.skip_whitespace();
        if self.rest().starts_with(word) {
            let after = self.rest().as_bytes().get(word.len()).copied();
            if !matches!(after, Some(byte) if is_name_byte(byte)) {
                self.pos += word.len();
                return true;
            }
        }
        false
    }

    fn parse_or(&mut self) -> Result<Expr, Error> {
        let mut left = self.parse_and()?;
        while self.eat_word("or") {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, Error> {
        let mut left = self.parse_equality()?;
        while self.eat_word("and") {
            let right = self.parse_equality()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, Error> {
        let mut left = self.parse_relational()?;
        loop {
            let op = if self.eat("!=") {
                CmpOp::Ne
            } else if self.eat("=") {
                CmpOp::Eq
            } else {
                break;
            };
            let right = self.parse_relational()?;
            left = Expr::Compare(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Expr, Error> {
        let mut left = self.parse_additive()?;
        loop {
            let op = if self.eat("<=") {
                CmpOp::Le
            } else if self.eat(">=") {
                CmpOp::Ge
            } else if self.eat("<") {
                CmpOp::Lt
            } else if self.eat(">") {
                CmpOp::Gt
            } else {
                break;
            };
            let right = self.parse_additive()?;
            left = Expr::Compare(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, Error> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = if self.eat("+") {
                ArithOp::Add
            } else if self.eat("-") {
                ArithOp::Sub
            } else {
                break;
            };
            let right = self.parse_multiplicative()?;
            left = Expr::Arith(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, Error> {
        let mut left = self.parse_unary()?;
        loop {
            let op = if self.eat("*") {
                ArithOp::Mul
            } else if self.eat_word("div") {
                ArithOp::Div
            } else if self.eat_word("mod") {
                ArithOp::Mod
            } else {
                break;
            };
            let right = self.parse_unary()?;
            left = Expr::Arith(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, Error> {
        if self.eat("-") {
            let operand = self.parse_unary()?;
            return Ok(Expr::Neg(Box::new(operand)));
        }
        self.parse_union()
    }

    fn parse_union(&mut self) -> Result<Expr, Error> {
        let mut left = self.parse_path_expr()?;
        while self.eat("|") {
            let right = self.parse_path_expr()?;
            left = Expr::Union(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_path_expr(&mut self) -> Result<Expr, Error> {
        self.skip_whitespace();
        match self.peek() {
            Some(b'(') => {
                self.eat("(");
                let inner = self.parse_or()?;
                if !self.eat(")") {
                    return Err(self.syntax("expected \")\""));
                }
                Ok(inner)
            }
            Some(b'"') | Some(b'\'') => self.parse_literal(),
            Some(byte) if byte.is_ascii_digit() => self.parse_number(),
            Some(b'/') | Some(b'.') => self.parse_location_path(),
            Some(byte) if is_name_byte(byte) || byte == b'*' => {
                // Function call or relative location path.
                if let Some(call) = self.try_parse_call()? {
                    return Ok(call);
                }
                self.parse_location_path()
            }
            _ => Err(self.syntax("expected an expression")),
        }
    }

    fn parse_literal(&mut self) -> Result<Expr, Error> {
        let quote = self.peek().unwrap();
        self.pos += 1;
        let start = self.pos;
        while let Some(byte) = self.peek() {
            if byte == quote {
                let literal = self.expr[start..self.pos].to_owned();
                self.pos += 1;
                return Ok(Expr::Literal(literal));
            }
            self.pos += 1;
        }
        Err(self.syntax("unterminated string literal"))
    }

    fn parse_number(&mut self) -> Result<Expr, Error> {
        let start = self.pos;
        while matches!(self.peek(), Some(byte) if byte.is_ascii_digit() || byte == b'.')
        {
            self.pos += 1;
        }
        self.expr[start..self.pos]
            .parse::<f64>()
            .map(Expr::Number)
            .map_err(|_| self.syntax("bad number"))
    }

    fn try_parse_call(&mut self) -> Result<Option<Expr>, Error> {
        let save = self.pos;
        let Some(name) = self.parse_name() else {
            return Ok(None);
        };
        self.skip_whitespace();
        if self.peek() != Some(b'(') {
            self.pos = save;
            return Ok(None);
        }
        self.eat("(");
        let mut args = Vec::new();
        self.skip_whitespace();
        if self.peek() != Some(b')') {
            loop {
                args.push(self.parse_or()?);
                if !self.eat(",") {
                    break;
                }
            }
        }
        if !self.eat(")") {
            return Err(self.syntax("expected \")\" after arguments"));
        }
        Ok(Some(Expr::Call(name, args)))
    }

    fn parse_location_path(&mut self) -> Result<Expr, Error> {
        let mut steps = Vec::new();
        let absolute;
        if self.eat("//") {
            absolute = true;
            steps.push(Step {
                axis: Axis::DescendantOrSelf,
                test: NodeTest::AnyNode,
                preds: Vec::new(),
            });
        } else {
            absolute = self.eat("/");
        }
        self.skip_whitespace();
        if absolute && (self.at_end() || !self.at_step_start()) {
            // Bare "/" selects the root.
            return Ok(Expr::Path(Path {
                absolute,
                steps,
            }));
        }
        steps.push(self.parse_step()?);
        loop {
            if self.eat("//") {
                steps.push(Step {
                    axis: Axis::DescendantOrSelf,
                    test: NodeTest::AnyNode,
                    preds: Vec::new(),
                });
                steps.push(self.parse_step()?);
            } else if self.eat("/") {
                steps.push(self.parse_step()?);
            } else {
                break;
            }
        }
        Ok(Expr::Path(Path { absolute, steps }))
    }

    fn at_step_start(&self) -> bool {
        matches!(self.peek(), Some(byte) if is_name_byte(byte)
            || byte == b'*' || byte == b'.')
    }

    fn parse_step(&mut self) -> Result<Step, Error> {
        self.skip_whitespace();
        if self.eat("..") {
            return Ok(Step {
                axis: Axis::Parent,
                test: NodeTest::AnyNode,
                preds: Vec::new(),
            });
        }
        if self.eat(".") {
            return Ok(Step {
                axis: Axis::Current,
                test: NodeTest::AnyNode,
                preds: Vec::new(),
            });
        }
        let test = if self.eat("*") {
            NodeTest::Wildcard(None)
        } else {
            let Some(first) = self.parse_name() else {
                return Err(self.syntax("expected a step"));
            };
            if self.peek() == Some(b':') {
                self.pos += 1;
                if self.eat("*") {
                    NodeTest::Wildcard(Some(first))
                } else {
                    let Some(second) = self.parse_name() else {
                        return Err(self.syntax("expected a name after \":\""));
                    };
                    NodeTest::Name(Some(first), second)
                }
            } else {
                NodeTest::Name(None, first)
            }
        };
        let mut preds = Vec::new();
        while self.eat("[") {
            preds.push(self.parse_or()?);
            if !self.eat("]") {
                return Err(self.syntax("expected \"]\""));
            }
        }
        Ok(Step {
            axis: Axis::Child,
            test,
            preds,
        })
    }

    fn parse_name(&mut self) -> Option<String> {
        self.skip_whitespace();
        let start = self.pos;
        while let Some(byte) = self.peek() {
            if is_name_byte(byte) {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            None
        } else {
            Some(self.expr[start..self.pos].to_owned())
        }
    }
}

fn is_name_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-' | b'.')
}
