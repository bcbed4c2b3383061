//! XPath subset
//!
//! Absolute location paths built from `/` and `//` steps with name tests,
//! `*`, `.` and `..`, and predicates over positions, attributes and text:
//! `[2]`, `[last()]`, `[@id]`, `[@type='submit']`, `[text()='Go']`,
//! `[contains(text(), 'Go')]`, `[starts-with(@href, '/a')]`,
//! `[normalize-space(.)='Go']`, `not(...)`, `and`, `or`, `!=`.

use std::collections::HashMap;

use crate::core::{PilotError, Result};
use crate::dom::document::{collapse_whitespace, Document, NodeId};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Slash,
    DoubleSlash,
    LBracket,
    RBracket,
    LParen,
    RParen,
    At,
    Comma,
    Eq,
    NotEq,
    Star,
    Dot,
    DotDot,
    Name(String),
    Str(String),
    Num(usize),
}

fn tokenize(input: &str) -> std::result::Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '/' if chars.get(i + 1) == Some(&'/') => {
                tokens.push(Token::DoubleSlash);
                i += 2;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '@' => {
                tokens.push(Token::At);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Eq);
                i += 1;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::NotEq);
                i += 2;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '.' if chars.get(i + 1) == Some(&'.') => {
                tokens.push(Token::DotDot);
                i += 2;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '"' | '\'' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|x| *x == c)
                    .ok_or("unterminated string literal")?;
                tokens.push(Token::Str(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let raw: String = chars[start..i].iter().collect();
                tokens.push(Token::Num(raw.parse().map_err(|_| "bad number")?));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '-' | '_' | ':'))
                {
                    i += 1;
                }
                tokens.push(Token::Name(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Attr(String),
    Text,
    Context,
    NormalizeSpace(Box<Operand>),
    Literal(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Position(usize),
    Last,
    Exists(Operand),
    Compare {
        left: Operand,
        right: Operand,
        negate: bool,
    },
    Contains(Operand, Operand),
    StartsWith(Operand, Operand),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum NodeTest {
    Any,
    Name(String),
    SelfNode,
    Parent,
}

#[derive(Debug, Clone, PartialEq)]
struct Step {
    descendant: bool,
    test: NodeTest,
    predicates: Vec<Expr>,
}

/// A parsed XPath expression
#[derive(Debug, Clone, PartialEq)]
pub struct XPath {
    steps: Vec<Step>,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> std::result::Result<(), String> {
        match self.next() {
            Some(t) if t == expected => Ok(()),
            Some(t) => Err(format!("expected {:?}, found {:?}", expected, t)),
            None => Err(format!("expected {:?}, found end of input", expected)),
        }
    }

    fn peek_name(&self, name: &str) -> bool {
        matches!(self.peek(), Some(Token::Name(n)) if n == name)
    }

    fn path(&mut self) -> std::result::Result<Vec<Step>, String> {
        let mut steps = Vec::new();
        while let Some(token) = self.peek() {
            let descendant = match token {
                Token::Slash => false,
                Token::DoubleSlash => true,
                other => return Err(format!("expected '/' or '//', found {:?}", other)),
            };
            self.pos += 1;
            steps.push(self.step(descendant)?);
        }
        if steps.is_empty() {
            return Err("empty path".to_string());
        }
        Ok(steps)
    }

    fn step(&mut self, descendant: bool) -> std::result::Result<Step, String> {
        let test = match self.next() {
            Some(Token::Star) => NodeTest::Any,
            Some(Token::Dot) => NodeTest::SelfNode,
            Some(Token::DotDot) => NodeTest::Parent,
            Some(Token::Name(name)) => NodeTest::Name(name.to_ascii_lowercase()),
            Some(other) => return Err(format!("expected node test, found {:?}", other)),
            None => return Err("expected node test, found end of input".to_string()),
        };
        let mut predicates = Vec::new();
        while self.peek() == Some(&Token::LBracket) {
            self.pos += 1;
            predicates.push(self.or_expr()?);
            self.expect(Token::RBracket)?;
        }
        Ok(Step {
            descendant,
            test,
            predicates,
        })
    }

    fn or_expr(&mut self) -> std::result::Result<Expr, String> {
        let mut left = self.and_expr()?;
        while self.peek_name("or") {
            self.pos += 1;
            left = Expr::Or(Box::new(left), Box::new(self.and_expr()?));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> std::result::Result<Expr, String> {
        let mut left = self.unary()?;
        while self.peek_name("and") {
            self.pos += 1;
            left = Expr::And(Box::new(left), Box::new(self.unary()?));
        }
        Ok(left)
    }

    fn unary(&mut self) -> std::result::Result<Expr, String> {
        match self.peek().cloned() {
            Some(Token::Num(n)) => {
                self.pos += 1;
                Ok(Expr::Position(n))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.or_expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Name(name))
                if self.tokens.get(self.pos + 1) == Some(&Token::LParen)
                    && matches!(name.as_str(), "not" | "contains" | "starts-with" | "last") =>
            {
                self.pos += 2;
                let expr = match name.as_str() {
                    "not" => Expr::Not(Box::new(self.or_expr()?)),
                    "last" => Expr::Last,
                    _ => {
                        let haystack = self.operand()?;
                        self.expect(Token::Comma)?;
                        let needle = self.operand()?;
                        if name == "contains" {
                            Expr::Contains(haystack, needle)
                        } else {
                            Expr::StartsWith(haystack, needle)
                        }
                    }
                };
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            _ => {
                let left = self.operand()?;
                let negate = match self.peek() {
                    Some(Token::Eq) => false,
                    Some(Token::NotEq) => true,
                    _ => return Ok(Expr::Exists(left)),
                };
                self.pos += 1;
                let right = self.operand()?;
                Ok(Expr::Compare {
                    left,
                    right,
                    negate,
                })
            }
        }
    }

    fn operand(&mut self) -> std::result::Result<Operand, String> {
        match self.next() {
            Some(Token::At) => match self.next() {
                Some(Token::Name(name)) => Ok(Operand::Attr(name.to_ascii_lowercase())),
                other => Err(format!("expected attribute name, found {:?}", other)),
            },
            Some(Token::Dot) => Ok(Operand::Context),
            Some(Token::Str(s)) => Ok(Operand::Literal(s)),
            Some(Token::Num(n)) => Ok(Operand::Literal(n.to_string())),
            Some(Token::Name(name)) if name == "text" => {
                self.expect(Token::LParen)?;
                self.expect(Token::RParen)?;
                Ok(Operand::Text)
            }
            Some(Token::Name(name)) if name == "normalize-space" => {
                self.expect(Token::LParen)?;
                let inner = if self.peek() == Some(&Token::RParen) {
                    Operand::Context
                } else {
                    self.operand()?
                };
                self.expect(Token::RParen)?;
                Ok(Operand::NormalizeSpace(Box::new(inner)))
            }
            other => Err(format!("unsupported operand {:?}", other)),
        }
    }
}

impl XPath {
    pub fn parse(expression: &str) -> Result<Self> {
        let fail = |reason: String| PilotError::xpath(expression, reason);
        let tokens = tokenize(expression).map_err(fail)?;
        let mut parser = Parser { tokens, pos: 0 };
        let steps = parser.path().map_err(fail)?;
        if parser.pos < parser.tokens.len() {
            return Err(PilotError::xpath(expression, "trailing tokens"));
        }
        Ok(Self { steps })
    }

    /// Matching elements in document order
    pub fn evaluate(&self, doc: &Document) -> Result<Vec<NodeId>> {
        let order: HashMap<NodeId, usize> = doc
            .elements()
            .into_iter()
            .enumerate()
            .map(|(i, n)| (n, i))
            .collect();
        let mut context = vec![doc.root()];
        for step in &self.steps {
            let mut next = Vec::new();
            for node in &context {
                // Each group shares a parent so positional predicates apply
                // per parent.
                for group in step_groups(doc, *node, step) {
                    next.extend(apply_predicates(doc, group, &step.predicates));
                }
            }
            next.sort_by_key(|n| order.get(n).copied().unwrap_or(usize::MAX));
            next.dedup();
            context = next;
        }
        Ok(context.into_iter().filter(|n| doc.is_element(*n)).collect())
    }

    /// First match in document order
    pub fn first(&self, doc: &Document) -> Result<Option<NodeId>> {
        Ok(self.evaluate(doc)?.into_iter().next())
    }
}

fn step_groups(doc: &Document, context: NodeId, step: &Step) -> Vec<Vec<NodeId>> {
    let bases: Vec<NodeId> = if step.descendant {
        std::iter::once(context)
            .chain(doc.descendant_elements(context))
            .collect()
    } else {
        vec![context]
    };
    bases
        .into_iter()
        .map(|base| match &step.test {
            NodeTest::SelfNode => vec![base],
            NodeTest::Parent => doc.parent(base).into_iter().collect(),
            NodeTest::Any => doc.element_children(base),
            NodeTest::Name(name) => doc
                .element_children(base)
                .into_iter()
                .filter(|c| doc.tag_name(*c) == Some(name.as_str()))
                .collect(),
        })
        .filter(|group: &Vec<NodeId>| !group.is_empty())
        .collect()
}

fn apply_predicates(doc: &Document, mut nodes: Vec<NodeId>, predicates: &[Expr]) -> Vec<NodeId> {
    for predicate in predicates {
        let size = nodes.len();
        nodes = nodes
            .into_iter()
            .enumerate()
            .filter(|(i, n)| eval(doc, *n, predicate, i + 1, size))
            .map(|(_, n)| n)
            .collect();
    }
    nodes
}

fn eval(doc: &Document, node: NodeId, expr: &Expr, position: usize, size: usize) -> bool {
    match expr {
        Expr::Position(n) => position == *n,
        Expr::Last => position == size,
        Expr::Exists(operand) => !values(doc, node, operand).is_empty(),
        Expr::Compare {
            left,
            right,
            negate,
        } => {
            let left = values(doc, node, left);
            let right = values(doc, node, right);
            let any_equal = left.iter().any(|l| right.iter().any(|r| l == r));
            if *negate {
                left.iter().any(|l| right.iter().any(|r| l != r))
            } else {
                any_equal
            }
        }
        Expr::Contains(haystack, needle) => {
            let needles = values(doc, node, needle);
            values(doc, node, haystack)
                .iter()
                .any(|h| needles.iter().any(|n| h.contains(n.as_str())))
        }
        Expr::StartsWith(haystack, prefix) => {
            let prefixes = values(doc, node, prefix);
            values(doc, node, haystack)
                .iter()
                .any(|h| prefixes.iter().any(|p| h.starts_with(p.as_str())))
        }
        Expr::Not(inner) => !eval(doc, node, inner, position, size),
        Expr::And(a, b) => {
            eval(doc, node, a, position, size) && eval(doc, node, b, position, size)
        }
        Expr::Or(a, b) => eval(doc, node, a, position, size) || eval(doc, node, b, position, size),
    }
}

fn values(doc: &Document, node: NodeId, operand: &Operand) -> Vec<String> {
    match operand {
        Operand::Attr(name) => doc.attr(node, name).map(str::to_string).into_iter().collect(),
        Operand::Text => doc
            .own_text_nodes(node)
            .into_iter()
            .map(str::to_string)
            .collect(),
        Operand::Context => vec![doc.text_content(node)],
        Operand::Literal(s) => vec![s.clone()],
        Operand::NormalizeSpace(inner) => {
            let inner = values(doc, node, inner);
            if inner.is_empty() {
                vec![String::new()]
            } else {
                inner.iter().map(|v| collapse_whitespace(v)).collect()
            }
        }
    }
}

/// Quote `text` as an XPath string literal, or `None` when it contains both
/// quote characters
pub fn literal(text: &str) -> Option<String> {
    if !text.contains('"') {
        Some(format!("\"{}\"", text))
    } else if !text.contains('\'') {
        Some(format!("'{}'", text))
    } else {
        None
    }
}
