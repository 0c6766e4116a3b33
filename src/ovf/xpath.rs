//! Path expressions over a [`Document`]
//!
//! Supports the location-path subset OVF descriptors need:
//!
//! ```text
//! /ovf:Envelope/ovf:VirtualSystem/ovf:Item[rasd:ResourceType/text()=17]/rasd:HostResource/text()
//! /ovf:Envelope/ovf:DiskSection/ovf:Disk[@ovf:diskId="vmdisk1"]/@ovf:capacity
//! ```
//!
//! Absolute paths of child steps; element name tests (`prefix:local` or `*`),
//! `text()`, `@attribute`; predicates testing existence or comparing against
//! a number or quoted string. Prefixes resolve through namespaces registered
//! on the [`XPathContext`].

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_while, take_while1},
    character::complete::{char, digit1, multispace0},
    combinator::{all_consuming, map, map_res, opt, recognize, value},
    multi::{many0, many1, separated_list1},
    sequence::{delimited, pair, preceded},
    IResult, Parser,
};
use std::collections::HashMap;
use thiserror::Error;

use super::document::{Child, Document, Node};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum XPathError {
    #[error("invalid expression '{expr}' near offset {offset}")]
    Syntax { expr: String, offset: usize },

    #[error("namespace prefix '{0}' is not registered")]
    UnboundPrefix(String),

    #[error("cannot register namespace '{prefix}': {reason}")]
    Registration { prefix: String, reason: &'static str },
}

#[derive(Debug, Clone, PartialEq)]
pub struct QName {
    pub prefix: Option<String>,
    pub local: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NameTest {
    Any,
    Name(QName),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub path: Vec<Step>,
    pub equals: Option<Literal>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Element {
        test: NameTest,
        predicates: Vec<Predicate>,
    },
    Text,
    Attribute(QName),
}

/// A compiled absolute location path
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub steps: Vec<Step>,
}

impl Expression {
    pub fn parse(expr: &str) -> Result<Self, XPathError> {
        match all_consuming(absolute_path).parse(expr) {
            Ok((_, steps)) => Ok(Self { steps }),
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(XPathError::Syntax {
                expr: expr.to_string(),
                offset: expr.len() - e.input.len(),
            }),
            Err(nom::Err::Incomplete(_)) => Err(XPathError::Syntax {
                expr: expr.to_string(),
                offset: expr.len(),
            }),
        }
    }
}

// =========================================================================
// Grammar
// =========================================================================

fn ncname(i: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_alphabetic() || c == '_'),
        take_while(|c: char| c.is_alphanumeric() || matches!(c, '_' | '-' | '.')),
    ))
    .parse(i)
}

fn qname(i: &str) -> IResult<&str, QName> {
    map(pair(ncname, opt(preceded(char(':'), ncname))), |(first, second)| {
        match second {
            Some(local) => QName {
                prefix: Some(first.to_string()),
                local: local.to_string(),
            },
            None => QName {
                prefix: None,
                local: first.to_string(),
            },
        }
    })
    .parse(i)
}

fn literal(i: &str) -> IResult<&str, Literal> {
    alt((
        map(delimited(char('"'), take_till(|c: char| c == '"'), char('"')), |s: &str| {
            Literal::Text(s.to_string())
        }),
        map(delimited(char('\''), take_till(|c: char| c == '\''), char('\'')), |s: &str| {
            Literal::Text(s.to_string())
        }),
        map_res(recognize(pair(digit1, opt(pair(char('.'), digit1)))), |s: &str| {
            s.parse::<f64>().map(Literal::Number)
        }),
    ))
    .parse(i)
}

fn predicate(i: &str) -> IResult<&str, Predicate> {
    map(
        delimited(
            pair(char('['), multispace0),
            pair(
                relative_path,
                opt(preceded(delimited(multispace0, char('='), multispace0), literal)),
            ),
            pair(multispace0, char(']')),
        ),
        |(path, equals)| Predicate { path, equals },
    )
    .parse(i)
}

fn step(i: &str) -> IResult<&str, Step> {
    alt((
        value(Step::Text, tag("text()")),
        map(preceded(char('@'), qname), Step::Attribute),
        map(
            pair(
                alt((value(NameTest::Any, char('*')), map(qname, NameTest::Name))),
                many0(predicate),
            ),
            |(test, predicates)| Step::Element { test, predicates },
        ),
    ))
    .parse(i)
}

fn relative_path(i: &str) -> IResult<&str, Vec<Step>> {
    separated_list1(char('/'), step).parse(i)
}

fn absolute_path(i: &str) -> IResult<&str, Vec<Step>> {
    many1(preceded(char('/'), step)).parse(i)
}

// =========================================================================
// Evaluation
// =========================================================================

/// Evaluation context: a document plus its registered namespace prefixes
pub struct XPathContext<'d> {
    doc: &'d Document,
    namespaces: HashMap<String, String>,
}

impl<'d> XPathContext<'d> {
    pub fn new(doc: &'d Document) -> Self {
        Self {
            doc,
            namespaces: HashMap::new(),
        }
    }

    pub fn document(&self) -> &'d Document {
        self.doc
    }

    /// Bind a prefix to a namespace URI. Rebinding a prefix to a different
    /// URI is refused.
    pub fn register_namespace(&mut self, prefix: &str, uri: &str) -> Result<(), XPathError> {
        if prefix.is_empty() || ncname(prefix).map(|(rest, _)| !rest.is_empty()).unwrap_or(true) {
            return Err(XPathError::Registration {
                prefix: prefix.to_string(),
                reason: "not a valid prefix",
            });
        }
        if uri.is_empty() {
            return Err(XPathError::Registration {
                prefix: prefix.to_string(),
                reason: "empty namespace URI",
            });
        }
        match self.namespaces.get(prefix) {
            Some(existing) if existing != uri => Err(XPathError::Registration {
                prefix: prefix.to_string(),
                reason: "prefix already bound to another URI",
            }),
            _ => {
                self.namespaces.insert(prefix.to_string(), uri.to_string());
                Ok(())
            }
        }
    }

    /// Evaluate an absolute expression, returning matches in document order
    pub fn evaluate(&self, expr: &str) -> Result<Vec<Node>, XPathError> {
        let compiled = Expression::parse(expr)?;
        self.evaluate_steps(&[self.doc.document_node()], &compiled.steps)
    }

    fn evaluate_steps(&self, context: &[Node], steps: &[Step]) -> Result<Vec<Node>, XPathError> {
        let mut current = context.to_vec();
        for step in steps {
            let mut next = Vec::new();
            for node in &current {
                self.apply_step(*node, step, &mut next)?;
            }
            current = next;
        }
        Ok(current)
    }

    fn apply_step(&self, node: Node, step: &Step, out: &mut Vec<Node>) -> Result<(), XPathError> {
        let Node::Element(id) = node else {
            // Text and attribute nodes have no children
            return Ok(());
        };
        let element = self.doc.element(id);

        match step {
            Step::Text => {
                for (child, c) in element.children.iter().enumerate() {
                    if matches!(c, Child::Text(_)) {
                        out.push(Node::Text { element: id, child });
                    }
                }
            }
            Step::Attribute(name) => {
                let (ns, local) = self.resolve(name)?;
                for (index, attr) in element.attributes.iter().enumerate() {
                    if attr.name == local && attr.namespace.as_deref() == ns {
                        out.push(Node::Attribute { element: id, index });
                    }
                }
            }
            Step::Element { test, predicates } => {
                let wanted = match test {
                    NameTest::Any => None,
                    NameTest::Name(name) => Some(self.resolve(name)?),
                };
                for c in &element.children {
                    let Child::Element(child_id) = c else {
                        continue;
                    };
                    let child = self.doc.element(*child_id);
                    if let Some((ns, local)) = wanted {
                        if child.name != local || child.namespace.as_deref() != ns {
                            continue;
                        }
                    }
                    if self.predicates_hold(Node::Element(*child_id), predicates)? {
                        out.push(Node::Element(*child_id));
                    }
                }
            }
        }

        Ok(())
    }

    fn predicates_hold(&self, node: Node, predicates: &[Predicate]) -> Result<bool, XPathError> {
        for predicate in predicates {
            let matches = self.evaluate_steps(&[node], &predicate.path)?;
            let holds = match &predicate.equals {
                None => !matches.is_empty(),
                Some(Literal::Number(n)) => matches.iter().any(|m| {
                    self.doc
                        .string_value(*m)
                        .trim()
                        .parse::<f64>()
                        .map(|v| v == *n)
                        .unwrap_or(false)
                }),
                Some(Literal::Text(s)) => matches.iter().any(|m| self.doc.string_value(*m) == *s),
            };
            if !holds {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn resolve<'a>(&'a self, name: &'a QName) -> Result<(Option<&'a str>, &'a str), XPathError> {
        match &name.prefix {
            None => Ok((None, name.local.as_str())),
            Some(prefix) => self
                .namespaces
                .get(prefix)
                .map(|uri| (Some(uri.as_str()), name.local.as_str()))
                .ok_or_else(|| XPathError::UnboundPrefix(prefix.clone())),
        }
    }
}
