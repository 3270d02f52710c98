//! XPath 1.0 subset over `roxmltree` documents.
//!
//! Expressions are compiled once with [`compile`] and evaluated many times
//! against an [`EvalContext`]. Attributes are not nodes in `roxmltree`, so
//! [`XNode`] wraps them as `(owner, index)` pairs.

mod ast;
mod eval;
mod lexer;
mod parser;

pub use ast::{ArithOp, Axis, CompareOp, Expr, Function, LocationPath, NodeTest, Step};
pub use eval::{format_number, parse_number};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum XPathError {
    #[error("invalid expression '{expr}': {message}")]
    Syntax { expr: String, message: String },
    #[error("unknown function '{0}()'")]
    UnknownFunction(String),
    #[error("function '{function}()' does not accept {given} argument(s)")]
    Arity { function: String, given: usize },
    #[error("undefined variable '${0}'")]
    UndefinedVariable(String),
    #[error("expected a node-set, found {0}")]
    NotANodeSet(&'static str),
}

/// Compile an XPath expression.
pub fn compile(source: &str) -> Result<Expr, XPathError> {
    parser::parse(source)
}

/// A node as XPath sees it.
#[derive(Debug, Clone, Copy)]
pub enum XNode<'a, 'i> {
    Node(roxmltree::Node<'a, 'i>),
    Attribute {
        owner: roxmltree::Node<'a, 'i>,
        index: usize,
    },
}

impl<'a, 'i> XNode<'a, 'i> {
    pub fn root(doc: &'a roxmltree::Document<'i>) -> Self {
        XNode::Node(doc.root())
    }

    /// Sort key placing nodes in document order; attributes follow their owner.
    /// Node ids are assigned in document order.
    pub fn order_key(&self) -> (u32, usize) {
        match self {
            XNode::Node(node) => (node.id().get(), 0),
            XNode::Attribute { owner, index } => (owner.id().get(), index + 1),
        }
    }

    pub fn same(&self, other: &XNode<'a, 'i>) -> bool {
        self.order_key() == other.order_key()
    }

    pub fn as_node(&self) -> Option<roxmltree::Node<'a, 'i>> {
        match self {
            XNode::Node(node) => Some(*node),
            XNode::Attribute { .. } => None,
        }
    }

    pub fn attribute(&self) -> Option<roxmltree::Attribute<'a, 'i>> {
        match self {
            XNode::Node(_) => None,
            XNode::Attribute { owner, index } => owner.attributes().nth(*index),
        }
    }

    pub fn is_element(&self) -> bool {
        self.as_node().is_some_and(|node| node.is_element())
    }

    pub fn is_text(&self) -> bool {
        self.as_node().is_some_and(|node| node.is_text())
    }

    pub fn is_root(&self) -> bool {
        self.as_node().is_some_and(|node| node.is_root())
    }

    /// Local name for elements and attributes; empty otherwise.
    pub fn local_name(&self) -> String {
        match self {
            XNode::Node(node) if node.is_element() => node.tag_name().name().to_string(),
            XNode::Node(_) => String::new(),
            XNode::Attribute { .. } => self
                .attribute()
                .map(|attr| attr.name().to_string())
                .unwrap_or_default(),
        }
    }

    pub fn string_value(&self) -> String {
        match self {
            XNode::Node(node) => match node.node_type() {
                roxmltree::NodeType::Root | roxmltree::NodeType::Element => node
                    .descendants()
                    .filter(|n| n.is_text())
                    .filter_map(|n| n.text())
                    .collect(),
                roxmltree::NodeType::Text | roxmltree::NodeType::Comment => {
                    node.text().unwrap_or_default().to_string()
                }
                roxmltree::NodeType::PI => node
                    .pi()
                    .and_then(|pi| pi.value)
                    .unwrap_or_default()
                    .to_string(),
            },
            XNode::Attribute { .. } => self
                .attribute()
                .map(|attr| attr.value().to_string())
                .unwrap_or_default(),
        }
    }
}

/// Result of evaluating an expression.
#[derive(Debug, Clone)]
pub enum Value<'a, 'i> {
    Nodes(Vec<XNode<'a, 'i>>),
    Str(String),
    Num(f64),
    Bool(bool),
}

impl<'a, 'i> Value<'a, 'i> {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nodes(_) => "node-set",
            Value::Str(_) => "string",
            Value::Num(_) => "number",
            Value::Bool(_) => "boolean",
        }
    }

    pub fn to_bool(&self) -> bool {
        match self {
            Value::Nodes(nodes) => !nodes.is_empty(),
            Value::Str(s) => !s.is_empty(),
            Value::Num(n) => *n != 0.0 && !n.is_nan(),
            Value::Bool(b) => *b,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Nodes(_) => parse_number(&self.to_string_value()),
            Value::Str(s) => parse_number(s),
            Value::Num(n) => *n,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// String value; for a node-set, the first node in document order.
    pub fn to_string_value(&self) -> String {
        match self {
            Value::Nodes(nodes) => nodes.first().map(XNode::string_value).unwrap_or_default(),
            Value::Str(s) => s.clone(),
            Value::Num(n) => format_number(*n),
            Value::Bool(b) => b.to_string(),
        }
    }

    pub fn into_nodes(self) -> Result<Vec<XNode<'a, 'i>>, XPathError> {
        match self {
            Value::Nodes(nodes) => Ok(nodes),
            other => Err(XPathError::NotANodeSet(other.type_name())),
        }
    }
}

/// Variable bindings visible to an expression: stylesheet globals plus the
/// current template's locals, innermost last.
#[derive(Debug, Clone, Default)]
pub struct Bindings<'a, 'i> {
    globals: Vec<(String, Value<'a, 'i>)>,
    locals: Vec<(String, Value<'a, 'i>)>,
}

impl<'a, 'i> Bindings<'a, 'i> {
    pub fn new() -> Self {
        Self {
            globals: Vec::new(),
            locals: Vec::new(),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&Value<'a, 'i>> {
        self.locals
            .iter()
            .rev()
            .chain(self.globals.iter().rev())
            .find(|(bound, _)| bound == name)
            .map(|(_, value)| value)
    }

    pub fn bind_global(&mut self, name: impl Into<String>, value: Value<'a, 'i>) {
        self.globals.push((name.into(), value));
    }

    pub fn bind_local(&mut self, name: impl Into<String>, value: Value<'a, 'i>) {
        self.locals.push((name.into(), value));
    }

    /// Current depth of the local scope, for [`Bindings::truncate_locals`].
    pub fn local_depth(&self) -> usize {
        self.locals.len()
    }

    pub fn truncate_locals(&mut self, depth: usize) {
        self.locals.truncate(depth);
    }

    /// Start a fresh local scope (template invocation); returns the caller's.
    pub fn enter_template(&mut self) -> Vec<(String, Value<'a, 'i>)> {
        std::mem::take(&mut self.locals)
    }

    pub fn leave_template(&mut self, saved: Vec<(String, Value<'a, 'i>)>) {
        self.locals = saved;
    }
}

/// Dynamic context for one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'b, 'a, 'i> {
    pub node: XNode<'a, 'i>,
    pub position: usize,
    pub size: usize,
    /// XSLT current node, returned by `current()`.
    pub current: XNode<'a, 'i>,
    pub bindings: &'b Bindings<'a, 'i>,
}

impl<'b, 'a, 'i> EvalContext<'b, 'a, 'i> {
    pub fn new(node: XNode<'a, 'i>, bindings: &'b Bindings<'a, 'i>) -> Self {
        Self {
            node,
            position: 1,
            size: 1,
            current: node,
            bindings,
        }
    }

    pub fn with_position(self, node: XNode<'a, 'i>, position: usize, size: usize) -> Self {
        Self {
            node,
            position,
            size,
            ..self
        }
    }
}

impl Expr {
    pub fn evaluate<'a, 'i>(
        &self,
        ctx: &EvalContext<'_, 'a, 'i>,
    ) -> Result<Value<'a, 'i>, XPathError> {
        eval::evaluate(self, ctx)
    }

    pub fn evaluate_string(&self, ctx: &EvalContext<'_, '_, '_>) -> Result<String, XPathError> {
        Ok(self.evaluate(ctx)?.to_string_value())
    }

    pub fn evaluate_bool(&self, ctx: &EvalContext<'_, '_, '_>) -> Result<bool, XPathError> {
        Ok(self.evaluate(ctx)?.to_bool())
    }

    pub fn evaluate_nodes<'a, 'i>(
        &self,
        ctx: &EvalContext<'_, 'a, 'i>,
    ) -> Result<Vec<XNode<'a, 'i>>, XPathError> {
        self.evaluate(ctx)?.into_nodes()
    }
}

impl LocationPath {
    /// Match `node` against this path used as an XSLT pattern.
    pub fn matches<'a, 'i>(
        &self,
        node: XNode<'a, 'i>,
        ctx: &EvalContext<'_, 'a, 'i>,
    ) -> Result<bool, XPathError> {
        eval::matches_pattern(node, self, ctx)
    }
}
