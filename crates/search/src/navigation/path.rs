//! A small path expression engine.
//!
//! Covers the subset of FHIRPath used by search parameter definitions:
//! member navigation (with a leading type name acting as a filter), indexers,
//! `where`, `exists`, `empty`, `not`, `ofType`, `as`, `is`, `resolve`,
//! `first`, `last`, `count`, `extension`, `type().name`, equality, `and`,
//! `or`, unions and parentheses.
//!
//! Evaluation is generic over [`ElementNode`], so any tree implementation
//! can reuse it.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;

use super::{ElementNode, EvaluationContext, JsonElement, Node, Primitive};
use crate::error::EvaluationError;

/// Parsed path expression.
#[derive(Debug, Clone, PartialEq)]
pub enum PathExpr {
    /// `$this`
    This,
    /// String, number or boolean literal.
    Literal(Primitive),
    /// Child navigation (or a type filter when the name is a type).
    Member(String),
    /// Function call applied to the current focus.
    Function {
        /// Function name.
        name: String,
        /// Unevaluated arguments.
        args: Vec<PathExpr>,
    },
    /// `target.step`
    Invocation {
        /// Expression producing the input.
        target: Box<PathExpr>,
        /// Member or function applied to the input.
        step: Box<PathExpr>,
    },
    /// `target[index]`
    Index {
        /// Expression producing the collection.
        target: Box<PathExpr>,
        /// Expression producing the integer index.
        index: Box<PathExpr>,
    },
    /// `left | right`
    Union(Box<PathExpr>, Box<PathExpr>),
    /// `left = right` or `left != right`
    Equality {
        /// Left operand.
        left: Box<PathExpr>,
        /// Right operand.
        right: Box<PathExpr>,
        /// True for `!=`.
        negated: bool,
    },
    /// `left and right`
    And(Box<PathExpr>, Box<PathExpr>),
    /// `left or right`
    Or(Box<PathExpr>, Box<PathExpr>),
    /// `target is Type`
    Is {
        /// Tested expression.
        target: Box<PathExpr>,
        /// Type name, possibly namespaced.
        type_name: String,
    },
    /// `target as Type`
    As {
        /// Filtered expression.
        target: Box<PathExpr>,
        /// Type name, possibly namespaced.
        type_name: String,
    },
}

/// Parses and evaluates an expression against a single root element.
pub fn evaluate(
    root: Node,
    expression: &str,
    ctx: &EvaluationContext<'_>,
) -> Result<Vec<Node>, EvaluationError> {
    let parsed = parse(expression)?;
    Evaluator { expression, ctx }.eval(&parsed, &[root])
}

/// Parses an expression.
pub fn parse(expression: &str) -> Result<PathExpr, EvaluationError> {
    let tokens = tokenize(expression)?;
    let mut parser = Parser {
        expression,
        tokens,
        pos: 0,
    };
    let parsed = parser.parse_or()?;
    if let Some((token, position)) = parser.tokens.get(parser.pos) {
        return Err(syntax(
            expression,
            *position,
            format!("unexpected token {:?}", token),
        ));
    }
    Ok(parsed)
}

fn syntax(expression: &str, position: usize, message: impl Into<String>) -> EvaluationError {
    EvaluationError::Syntax {
        expression: expression.to_string(),
        position,
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token<'input> {
    Identifier(&'input str),
    String(String),
    Number(&'input str),
    Dot,
    Comma,
    Pipe,
    Equal,
    NotEqual,
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
}

fn tokenize(input: &str) -> Result<Vec<(Token<'_>, usize)>, EvaluationError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let start = pos;
        let token = match bytes[pos] {
            b' ' | b'\t' | b'\r' | b'\n' => {
                pos += 1;
                continue;
            }
            b'.' => {
                pos += 1;
                Token::Dot
            }
            b',' => {
                pos += 1;
                Token::Comma
            }
            b'|' => {
                pos += 1;
                Token::Pipe
            }
            b'=' => {
                pos += 1;
                Token::Equal
            }
            b'(' => {
                pos += 1;
                Token::LeftParen
            }
            b')' => {
                pos += 1;
                Token::RightParen
            }
            b'[' => {
                pos += 1;
                Token::LeftBracket
            }
            b']' => {
                pos += 1;
                Token::RightBracket
            }
            b'!' if bytes.get(pos + 1) == Some(&b'=') => {
                pos += 2;
                Token::NotEqual
            }
            b'\'' => {
                let (text, end) = read_string(input, pos)?;
                pos = end;
                Token::String(text)
            }
            b'`' => {
                let close = input[pos + 1..]
                    .find('`')
                    .ok_or_else(|| syntax(input, pos, "unterminated identifier"))?;
                let name = &input[pos + 1..pos + 1 + close];
                pos += close + 2;
                Token::Identifier(name)
            }
            b'0'..=b'9' => {
                while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                    pos += 1;
                }
                if bytes.get(pos) == Some(&b'.')
                    && bytes.get(pos + 1).is_some_and(|b| b.is_ascii_digit())
                {
                    pos += 1;
                    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                        pos += 1;
                    }
                }
                Token::Number(&input[start..pos])
            }
            b if b.is_ascii_alphabetic() || b == b'_' || b == b'$' || b == b'%' => {
                pos += 1;
                while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_')
                {
                    pos += 1;
                }
                Token::Identifier(&input[start..pos])
            }
            _ => return Err(syntax(input, pos, "unexpected character")),
        };
        tokens.push((token, start));
    }

    Ok(tokens)
}

fn read_string(input: &str, start: usize) -> Result<(String, usize), EvaluationError> {
    let mut text = String::new();
    let mut chars = input[start + 1..].char_indices();
    while let Some((offset, c)) = chars.next() {
        match c {
            '\'' => return Ok((text, start + 1 + offset + 1)),
            '\\' => match chars.next() {
                Some((_, 'n')) => text.push('\n'),
                Some((_, 't')) => text.push('\t'),
                Some((_, 'r')) => text.push('\r'),
                Some((_, escaped)) => text.push(escaped),
                None => break,
            },
            other => text.push(other),
        }
    }
    Err(syntax(input, start, "unterminated string"))
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'input> {
    expression: &'input str,
    tokens: Vec<(Token<'input>, usize)>,
    pos: usize,
}

impl<'input> Parser<'input> {
    fn peek(&self) -> Option<&Token<'input>> {
        self.tokens.get(self.pos).map(|(token, _)| token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token<'input>> {
        self.tokens.get(self.pos + offset).map(|(token, _)| token)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(_, position)| *position)
            .unwrap_or(self.expression.len())
    }

    fn error(&self, message: impl Into<String>) -> EvaluationError {
        syntax(self.expression, self.position(), message)
    }

    fn expect(&mut self, expected: Token<'input>) -> Result<(), EvaluationError> {
        if self.peek() == Some(&expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected {:?}", expected)))
        }
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Identifier(name)) if *name == keyword)
    }

    fn parse_or(&mut self) -> Result<PathExpr, EvaluationError> {
        let mut left = self.parse_and()?;
        while self.at_keyword("or") {
            self.pos += 1;
            let right = self.parse_and()?;
            left = PathExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<PathExpr, EvaluationError> {
        let mut left = self.parse_equality()?;
        while self.at_keyword("and") {
            self.pos += 1;
            let right = self.parse_equality()?;
            left = PathExpr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<PathExpr, EvaluationError> {
        let left = self.parse_union()?;
        let negated = match self.peek() {
            Some(Token::Equal) => false,
            Some(Token::NotEqual) => true,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.parse_union()?;
        Ok(PathExpr::Equality {
            left: Box::new(left),
            right: Box::new(right),
            negated,
        })
    }

    fn parse_union(&mut self) -> Result<PathExpr, EvaluationError> {
        let mut left = self.parse_type_operator()?;
        while self.peek() == Some(&Token::Pipe) {
            self.pos += 1;
            let right = self.parse_type_operator()?;
            left = PathExpr::Union(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_type_operator(&mut self) -> Result<PathExpr, EvaluationError> {
        let mut target = self.parse_postfix()?;
        loop {
            let is_operator = (self.at_keyword("is") || self.at_keyword("as"))
                && self.peek_at(1) != Some(&Token::LeftParen);
            if !is_operator {
                return Ok(target);
            }
            let is_test = self.at_keyword("is");
            self.pos += 1;
            let type_name = self.parse_type_name()?;
            target = if is_test {
                PathExpr::Is {
                    target: Box::new(target),
                    type_name,
                }
            } else {
                PathExpr::As {
                    target: Box::new(target),
                    type_name,
                }
            };
        }
    }

    fn parse_type_name(&mut self) -> Result<String, EvaluationError> {
        let mut parts = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Identifier(name)) => {
                    parts.push(name.to_string());
                    self.pos += 1;
                }
                _ => return Err(self.error("expected a type name")),
            }
            if self.peek() == Some(&Token::Dot)
                && matches!(self.peek_at(1), Some(Token::Identifier(_)))
            {
                self.pos += 1;
            } else {
                return Ok(parts.join("."));
            }
        }
    }

    fn parse_postfix(&mut self) -> Result<PathExpr, EvaluationError> {
        let mut expr = self.parse_term()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    let step = self.parse_invocation()?;
                    expr = PathExpr::Invocation {
                        target: Box::new(expr),
                        step: Box::new(step),
                    };
                }
                Some(Token::LeftBracket) => {
                    self.pos += 1;
                    let index = self.parse_or()?;
                    self.expect(Token::RightBracket)?;
                    expr = PathExpr::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_term(&mut self) -> Result<PathExpr, EvaluationError> {
        match self.peek().cloned() {
            Some(Token::Identifier("true")) => {
                self.pos += 1;
                Ok(PathExpr::Literal(Primitive::Boolean(true)))
            }
            Some(Token::Identifier("false")) => {
                self.pos += 1;
                Ok(PathExpr::Literal(Primitive::Boolean(false)))
            }
            Some(Token::Identifier("$this")) => {
                self.pos += 1;
                Ok(PathExpr::This)
            }
            Some(Token::Identifier(_)) => self.parse_invocation(),
            Some(Token::String(text)) => {
                self.pos += 1;
                Ok(PathExpr::Literal(Primitive::String(text)))
            }
            Some(Token::Number(text)) => {
                let literal = if text.contains('.') {
                    text.parse().map(Primitive::Decimal).ok()
                } else {
                    text.parse().map(Primitive::Integer).ok()
                };
                let literal = literal.ok_or_else(|| self.error("invalid number"))?;
                self.pos += 1;
                Ok(PathExpr::Literal(literal))
            }
            Some(Token::LeftParen) => {
                self.pos += 1;
                let inner = self.parse_or()?;
                self.expect(Token::RightParen)?;
                Ok(inner)
            }
            _ => Err(self.error("expected an expression")),
        }
    }

    fn parse_invocation(&mut self) -> Result<PathExpr, EvaluationError> {
        let name = match self.peek() {
            Some(Token::Identifier(name)) => name.to_string(),
            _ => return Err(self.error("expected an identifier")),
        };
        self.pos += 1;

        if self.peek() != Some(&Token::LeftParen) {
            return Ok(PathExpr::Member(name));
        }
        self.pos += 1;

        let mut args = Vec::new();
        if self.peek() != Some(&Token::RightParen) {
            loop {
                args.push(self.parse_or()?);
                if self.peek() == Some(&Token::Comma) {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }
        self.expect(Token::RightParen)?;
        Ok(PathExpr::Function { name, args })
    }
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

/// A literal or computed value produced during evaluation.
#[derive(Debug, Clone)]
struct LiteralNode {
    value: Primitive,
}

impl LiteralNode {
    fn node(value: Primitive) -> Node {
        Arc::new(LiteralNode { value })
    }
}

impl ElementNode for LiteralNode {
    fn instance_type(&self) -> &str {
        match self.value {
            Primitive::Boolean(_) => "boolean",
            Primitive::Integer(_) => "integer",
            Primitive::Decimal(_) => "decimal",
            Primitive::String(_) => "string",
        }
    }

    fn location(&self) -> &str {
        ""
    }

    fn value(&self) -> Option<Primitive> {
        Some(self.value.clone())
    }

    fn children(&self, _name: &str) -> Vec<Node> {
        Vec::new()
    }

    fn select(
        &self,
        expression: &str,
        ctx: &EvaluationContext<'_>,
    ) -> Result<Vec<Node>, EvaluationError> {
        evaluate(LiteralNode::node(self.value.clone()), expression, ctx)
    }
}

struct Evaluator<'e, 'c, 'r> {
    expression: &'e str,
    ctx: &'c EvaluationContext<'r>,
}

impl Evaluator<'_, '_, '_> {
    fn eval(&self, expr: &PathExpr, focus: &[Node]) -> Result<Vec<Node>, EvaluationError> {
        match expr {
            PathExpr::This => Ok(focus.to_vec()),
            PathExpr::Literal(value) => Ok(vec![LiteralNode::node(value.clone())]),
            PathExpr::Member(name) => Ok(focus.iter().flat_map(|item| member(item, name)).collect()),
            PathExpr::Function { name, args } => self.function(name, args, focus),
            PathExpr::Invocation { target, step } => {
                let input = self.eval(target, focus)?;
                self.eval(step, &input)
            }
            PathExpr::Index { target, index } => {
                let items = self.eval(target, focus)?;
                let index = self.eval(index, focus)?;
                let position = match index.as_slice() {
                    [single] => single.value().and_then(|v| match v {
                        Primitive::Integer(i) => usize::try_from(i).ok(),
                        _ => None,
                    }),
                    _ => None,
                };
                Ok(position
                    .and_then(|i| items.get(i).cloned())
                    .into_iter()
                    .collect())
            }
            PathExpr::Union(left, right) => {
                let mut items = self.eval(left, focus)?;
                items.extend(self.eval(right, focus)?);
                Ok(distinct(items))
            }
            PathExpr::Equality {
                left,
                right,
                negated,
            } => {
                let left = self.eval(left, focus)?;
                let right = self.eval(right, focus)?;
                if left.is_empty() || right.is_empty() {
                    return Ok(Vec::new());
                }
                let equal = left.len() == right.len()
                    && left.iter().zip(right.iter()).all(|(a, b)| nodes_equal(a, b));
                Ok(vec![boolean(equal != *negated)])
            }
            PathExpr::And(left, right) => {
                let left = truthiness(&self.eval(left, focus)?);
                let right = truthiness(&self.eval(right, focus)?);
                Ok(match (left, right) {
                    (Some(false), _) | (_, Some(false)) => vec![boolean(false)],
                    (Some(true), Some(true)) => vec![boolean(true)],
                    _ => Vec::new(),
                })
            }
            PathExpr::Or(left, right) => {
                let left = truthiness(&self.eval(left, focus)?);
                let right = truthiness(&self.eval(right, focus)?);
                Ok(match (left, right) {
                    (Some(true), _) | (_, Some(true)) => vec![boolean(true)],
                    (Some(false), Some(false)) => vec![boolean(false)],
                    _ => Vec::new(),
                })
            }
            PathExpr::Is { target, type_name } => {
                let items = self.eval(target, focus)?;
                self.type_test(&items, type_name)
            }
            PathExpr::As { target, type_name } => {
                let items = self.eval(target, focus)?;
                Ok(filter_type(items, type_name))
            }
        }
    }

    fn function(
        &self,
        name: &str,
        args: &[PathExpr],
        focus: &[Node],
    ) -> Result<Vec<Node>, EvaluationError> {
        match (name, args) {
            ("where", [criteria]) => self.filter(criteria, focus),
            ("exists", []) => Ok(vec![boolean(!focus.is_empty())]),
            ("exists", [criteria]) => Ok(vec![boolean(!self.filter(criteria, focus)?.is_empty())]),
            ("empty", []) => Ok(vec![boolean(focus.is_empty())]),
            ("not", []) => Ok(truthiness(focus)
                .map(|value| boolean(!value))
                .into_iter()
                .collect()),
            ("first", []) => Ok(focus.first().cloned().into_iter().collect()),
            ("last", []) => Ok(focus.last().cloned().into_iter().collect()),
            ("count", []) => Ok(vec![LiteralNode::node(Primitive::Integer(
                i64::try_from(focus.len()).unwrap_or(i64::MAX),
            ))]),
            ("hasValue", []) => Ok(vec![boolean(
                matches!(focus, [single] if single.value().is_some()),
            )]),
            ("ofType" | "as", [type_arg]) => {
                let type_name = self.type_argument(type_arg)?;
                Ok(filter_type(focus.to_vec(), &type_name))
            }
            ("is", [type_arg]) => {
                let type_name = self.type_argument(type_arg)?;
                self.type_test(focus, &type_name)
            }
            ("resolve", []) => Ok(self.resolve(focus)),
            ("type", []) => Ok(focus.iter().map(type_info).collect()),
            ("extension", [url]) => {
                let url = self.eval(url, focus)?;
                let url = match url.as_slice() {
                    [single] => single.value().map(|v| v.to_string()),
                    _ => None,
                };
                Ok(focus
                    .iter()
                    .flat_map(|item| item.children("extension"))
                    .filter(|ext| url.is_some() && ext.child_string("url") == url)
                    .collect())
            }
            (
                "where" | "exists" | "empty" | "not" | "first" | "last" | "count" | "hasValue"
                | "ofType" | "as" | "is" | "resolve" | "type" | "extension",
                _,
            ) => Err(syntax(
                self.expression,
                0,
                format!("wrong number of arguments for '{}'", name),
            )),
            _ => Err(EvaluationError::UnsupportedFunction {
                name: name.to_string(),
            }),
        }
    }

    fn filter(&self, criteria: &PathExpr, focus: &[Node]) -> Result<Vec<Node>, EvaluationError> {
        let mut kept = Vec::new();
        for item in focus {
            let result = self.eval(criteria, std::slice::from_ref(item))?;
            if truthiness(&result) == Some(true) {
                kept.push(item.clone());
            }
        }
        Ok(kept)
    }

    fn type_test(&self, items: &[Node], type_name: &str) -> Result<Vec<Node>, EvaluationError> {
        match items {
            [] => Ok(Vec::new()),
            [single] => Ok(vec![boolean(type_matches(single.as_ref(), type_name))]),
            many => Err(EvaluationError::NotSingleton {
                expression: self.expression.to_string(),
                count: many.len(),
            }),
        }
    }

    fn type_argument(&self, arg: &PathExpr) -> Result<String, EvaluationError> {
        match arg {
            PathExpr::Member(name) => Ok(name.clone()),
            PathExpr::Invocation { target, step } => match (target.as_ref(), step.as_ref()) {
                (PathExpr::Member(namespace), PathExpr::Member(name)) => {
                    Ok(format!("{}.{}", namespace, name))
                }
                _ => Err(syntax(self.expression, 0, "expected a type name")),
            },
            _ => Err(syntax(self.expression, 0, "expected a type name")),
        }
    }

    fn resolve(&self, focus: &[Node]) -> Vec<Node> {
        let Some(resolver) = self.ctx.resolver() else {
            return Vec::new();
        };
        focus
            .iter()
            .filter_map(|item| {
                let reference = if item.instance_type() == "Reference" {
                    item.child_string("reference")
                } else {
                    item.value().and_then(|v| v.as_str().map(str::to_string))
                };
                reference.and_then(|text| resolver.resolve(&text))
            })
            .collect()
    }
}

fn boolean(value: bool) -> Node {
    LiteralNode::node(Primitive::Boolean(value))
}

fn truthiness(items: &[Node]) -> Option<bool> {
    match items {
        [] => None,
        [single] => Some(single.value().and_then(|v| v.as_bool()).unwrap_or(true)),
        _ => Some(true),
    }
}

fn nodes_equal(a: &Node, b: &Node) -> bool {
    match (a.value(), b.value()) {
        (Some(a), Some(b)) => a.equivalent(&b),
        _ => false,
    }
}

fn distinct(items: Vec<Node>) -> Vec<Node> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| item.location().is_empty() || seen.insert(item.location().to_string()))
        .collect()
}

fn member(item: &Node, name: &str) -> Vec<Node> {
    if name.starts_with(|c: char| c.is_ascii_uppercase()) && type_matches(item.as_ref(), name) {
        return vec![item.clone()];
    }
    item.children(name)
}

fn filter_type(items: Vec<Node>, type_name: &str) -> Vec<Node> {
    items
        .into_iter()
        .filter(|item| type_matches(item.as_ref(), type_name))
        .collect()
}

fn is_resource(item: &dyn ElementNode) -> bool {
    item.instance_type().starts_with(|c: char| c.is_ascii_uppercase())
        && (!item.children("resourceType").is_empty() || !item.location().contains('.'))
}

/// Returns true if the element is of the named type (or a specialization).
pub fn type_matches(item: &dyn ElementNode, type_name: &str) -> bool {
    let type_name = type_name
        .strip_prefix("FHIR.")
        .or_else(|| type_name.strip_prefix("System."))
        .unwrap_or(type_name);
    let actual = item.instance_type();

    if actual == type_name {
        return true;
    }
    match type_name {
        "Resource" | "DomainResource" => is_resource(item),
        "Quantity" => matches!(
            actual,
            "Age" | "Count" | "Distance" | "Duration" | "SimpleQuantity" | "MoneyQuantity"
        ),
        "String" | "Boolean" | "Integer" | "Decimal" | "DateTime" | "Date" => {
            actual.eq_ignore_ascii_case(type_name)
        }
        _ => false,
    }
}

fn type_info(item: &Node) -> Node {
    let namespace = if item.instance_type().starts_with(|c: char| c.is_ascii_lowercase()) {
        "System"
    } else {
        "FHIR"
    };
    JsonElement::with_type(
        json!({ "namespace": namespace, "name": item.instance_type() }),
        "TypeInfo",
        "",
    )
    .into_node()
}
