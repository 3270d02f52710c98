//! Apply a compiled stylesheet to a source document.

use std::cmp::Ordering;
use std::{panic, thread};

use tracing::{debug, info};

use super::RenderError;
use super::compile::{
    Avt, AvtPart, Binding, BindingValue, Compiled, Instruction, SortKey, Template,
};
use super::serialize::{Sink, TextCapture};
use crate::core::xpath::{Bindings, EvalContext, Expr, Value, XNode, XPathError};

const MAX_DEPTH: usize = 256;

/// Stack for the render thread; `MAX_DEPTH` nested templates must fit.
const RENDER_STACK_BYTES: usize = 64 * 1024 * 1024;

type Args<'a, 'i> = Vec<(String, Value<'a, 'i>)>;

/// Render on a dedicated thread so the recursion limit holds regardless of
/// the caller's stack size.
pub(super) fn render(
    sheet: &Compiled,
    doc: &roxmltree::Document<'_>,
    sink: &mut (dyn Sink + Send),
) -> Result<(), RenderError> {
    thread::scope(|scope| {
        let worker = thread::Builder::new()
            .name("xslt-render".to_string())
            .stack_size(RENDER_STACK_BYTES)
            .spawn_scoped(scope, || render_document(sheet, doc, sink))?;
        match worker.join() {
            Ok(result) => result,
            Err(payload) => panic::resume_unwind(payload),
        }
    })
}

fn render_document<'a, 'i>(
    sheet: &Compiled,
    doc: &'a roxmltree::Document<'i>,
    sink: &mut dyn Sink,
) -> Result<(), RenderError> {
    let root = XNode::root(doc);
    let focus = Focus {
        node: root,
        position: 1,
        size: 1,
    };
    let mut renderer = Renderer {
        sheet,
        bindings: Bindings::new(),
        depth: 0,
    };
    renderer.bind_globals(focus)?;
    renderer.apply(&[root], None, &[], sink)
}

/// Context node, position and size.
#[derive(Debug, Clone, Copy)]
struct Focus<'a, 'i> {
    node: XNode<'a, 'i>,
    position: usize,
    size: usize,
}

struct Renderer<'s, 'a, 'i> {
    sheet: &'s Compiled,
    bindings: Bindings<'a, 'i>,
    depth: usize,
}

impl<'s, 'a, 'i> Renderer<'s, 'a, 'i> {
    fn eval(&self, expr: &Expr, focus: Focus<'a, 'i>) -> Result<Value<'a, 'i>, XPathError> {
        let ctx = EvalContext::new(focus.node, &self.bindings).with_position(
            focus.node,
            focus.position,
            focus.size,
        );
        expr.evaluate(&ctx)
    }

    fn bind_globals(&mut self, focus: Focus<'a, 'i>) -> Result<(), RenderError> {
        let sheet = self.sheet;
        for global in &sheet.globals {
            let value = self.binding_value(&global.value, focus)?;
            self.bindings.bind_global(global.name.clone(), value);
        }
        Ok(())
    }

    fn apply(
        &mut self,
        nodes: &[XNode<'a, 'i>],
        mode: Option<&str>,
        args: &[(String, Value<'a, 'i>)],
        sink: &mut dyn Sink,
    ) -> Result<(), RenderError> {
        let size = nodes.len();
        for (idx, node) in nodes.iter().enumerate() {
            let focus = Focus {
                node: *node,
                position: idx + 1,
                size,
            };
            match self.find_rule(focus, mode)? {
                Some(template) => self.invoke(template, focus, args.to_vec(), sink)?,
                None => self.builtin(focus, mode, sink)?,
            }
        }
        Ok(())
    }

    /// Highest-priority matching rule in `mode`; the last one wins a tie.
    fn find_rule(
        &self,
        focus: Focus<'a, 'i>,
        mode: Option<&str>,
    ) -> Result<Option<usize>, XPathError> {
        let ctx = EvalContext::new(focus.node, &self.bindings);
        let mut best: Option<(usize, f64)> = None;
        for rule in &self.sheet.rules {
            if rule.mode.as_deref() != mode {
                continue;
            }
            if best.is_some_and(|(_, priority)| priority > rule.priority) {
                continue;
            }
            if rule.pattern.matches(focus.node, &ctx)? {
                best = Some((rule.template, rule.priority));
            }
        }
        Ok(best.map(|(template, _)| template))
    }

    fn builtin(
        &mut self,
        focus: Focus<'a, 'i>,
        mode: Option<&str>,
        sink: &mut dyn Sink,
    ) -> Result<(), RenderError> {
        if focus.node.is_root() || focus.node.is_element() {
            let children = self.default_children(focus.node);
            return self.apply(&children, mode, &[], sink);
        }
        if focus.node.is_text() || focus.node.attribute().is_some() {
            sink.text(&focus.node.string_value(), true)?;
        }
        Ok(())
    }

    fn default_children(&self, node: XNode<'a, 'i>) -> Vec<XNode<'a, 'i>> {
        let Some(node) = node.as_node() else {
            return Vec::new();
        };
        let strip = node.is_element() && self.sheet.space.strips(node.tag_name().name());
        node.children()
            .filter(|child| !(strip && is_whitespace_text(*child)))
            .map(XNode::Node)
            .collect()
    }

    fn invoke(
        &mut self,
        template: usize,
        focus: Focus<'a, 'i>,
        args: Args<'a, 'i>,
        sink: &mut dyn Sink,
    ) -> Result<(), RenderError> {
        if self.depth >= MAX_DEPTH {
            return Err(RenderError::RecursionLimit(MAX_DEPTH));
        }
        let sheet = self.sheet;
        let template = &sheet.templates[template];
        self.depth += 1;
        let saved = self.bindings.enter_template();
        let result = self.run_template(template, focus, args, sink);
        self.bindings.leave_template(saved);
        self.depth -= 1;
        result
    }

    fn run_template(
        &mut self,
        template: &Template,
        focus: Focus<'a, 'i>,
        mut args: Args<'a, 'i>,
        sink: &mut dyn Sink,
    ) -> Result<(), RenderError> {
        for param in &template.params {
            let value = match args.iter().position(|(name, _)| *name == param.name) {
                Some(pos) => args.swap_remove(pos).1,
                None => self.binding_value(&param.value, focus)?,
            };
            self.bindings.bind_local(param.name.clone(), value);
        }
        if !args.is_empty() {
            debug!(
                template = template.name.as_deref().unwrap_or("<match>"),
                unused = args.len(),
                "ignoring parameters the template does not declare"
            );
        }
        self.execute(&template.body, focus, sink)
    }

    /// Run `body`; variables it declares go out of scope afterwards.
    fn execute(
        &mut self,
        body: &[Instruction],
        focus: Focus<'a, 'i>,
        sink: &mut dyn Sink,
    ) -> Result<(), RenderError> {
        let depth = self.bindings.local_depth();
        let result = body
            .iter()
            .try_for_each(|instruction| self.instruction(instruction, focus, sink));
        self.bindings.truncate_locals(depth);
        result
    }

    fn instruction(
        &mut self,
        instruction: &Instruction,
        focus: Focus<'a, 'i>,
        sink: &mut dyn Sink,
    ) -> Result<(), RenderError> {
        match instruction {
            Instruction::Text { text, escape } => sink.text(text, *escape),
            Instruction::LiteralElement {
                name,
                attributes,
                body,
            } => {
                sink.start_element(name)?;
                for (attribute, value) in attributes {
                    let value = self.avt(value, focus)?;
                    sink.attribute(attribute, &value)?;
                }
                self.execute(body, focus, sink)?;
                sink.end_element()
            }
            Instruction::ValueOf { select, escape } => {
                let text = self.eval(select, focus)?.to_string_value();
                sink.text(&text, *escape)
            }
            Instruction::ApplyTemplates {
                select,
                mode,
                sorts,
                params,
            } => {
                let nodes = match select {
                    Some(select) => self.eval(select, focus)?.into_nodes()?,
                    None => self.default_children(focus.node),
                };
                let nodes = self.sort(nodes, sorts)?;
                let args = self.evaluate_params(params, focus)?;
                self.apply(&nodes, mode.as_deref(), &args, sink)
            }
            Instruction::CallTemplate { template, params } => {
                let args = self.evaluate_params(params, focus)?;
                self.invoke(*template, focus, args, sink)
            }
            Instruction::ForEach { select, sorts, body } => {
                let nodes = self.eval(select, focus)?.into_nodes()?;
                let nodes = self.sort(nodes, sorts)?;
                let size = nodes.len();
                for (idx, node) in nodes.into_iter().enumerate() {
                    let inner = Focus {
                        node,
                        position: idx + 1,
                        size,
                    };
                    self.execute(body, inner, sink)?;
                }
                Ok(())
            }
            Instruction::If { test, body } => {
                if self.eval(test, focus)?.to_bool() {
                    self.execute(body, focus, sink)?;
                }
                Ok(())
            }
            Instruction::Choose {
                branches,
                otherwise,
            } => {
                for (test, body) in branches {
                    if self.eval(test, focus)?.to_bool() {
                        return self.execute(body, focus, sink);
                    }
                }
                self.execute(otherwise, focus, sink)
            }
            Instruction::Variable(binding) => {
                let value = self.binding_value(&binding.value, focus)?;
                self.bindings.bind_local(binding.name.clone(), value);
                Ok(())
            }
            Instruction::Element { name, body } => {
                let name = self.avt(name, focus)?;
                if !is_valid_name(&name) {
                    return Err(RenderError::InvalidName(name));
                }
                sink.start_element(&name)?;
                self.execute(body, focus, sink)?;
                sink.end_element()
            }
            Instruction::Attribute { name, body } => {
                let name = self.avt(name, focus)?;
                if !is_valid_name(&name) {
                    return Err(RenderError::InvalidName(name));
                }
                let value = self.capture(body, focus)?;
                sink.attribute(&name, &value)
            }
            Instruction::Comment { body } => {
                let text = self.capture(body, focus)?;
                sink.comment(&text)
            }
            Instruction::Copy { body } => self.shallow_copy(focus, body, sink),
            Instruction::CopyOf { select } => match self.eval(select, focus)? {
                Value::Nodes(nodes) => nodes
                    .into_iter()
                    .try_for_each(|node| self.deep_copy(node, sink)),
                other => sink.text(&other.to_string_value(), true),
            },
            Instruction::Message { body, terminate } => {
                let text = self.capture(body, focus)?;
                if *terminate {
                    return Err(RenderError::Terminated(text));
                }
                info!(text = %text, "stylesheet message");
                Ok(())
            }
        }
    }

    fn capture(
        &mut self,
        body: &[Instruction],
        focus: Focus<'a, 'i>,
    ) -> Result<String, RenderError> {
        let mut capture = TextCapture::default();
        self.execute(body, focus, &mut capture)?;
        Ok(capture.into_string())
    }

    /// Variables holding content become their text value.
    fn binding_value(
        &mut self,
        value: &BindingValue,
        focus: Focus<'a, 'i>,
    ) -> Result<Value<'a, 'i>, RenderError> {
        Ok(match value {
            BindingValue::Select(expr) => self.eval(expr, focus)?,
            BindingValue::Content(body) => Value::Str(self.capture(body, focus)?),
            BindingValue::Empty => Value::Str(String::new()),
        })
    }

    fn evaluate_params(
        &mut self,
        params: &[Binding],
        focus: Focus<'a, 'i>,
    ) -> Result<Args<'a, 'i>, RenderError> {
        let mut args = Vec::with_capacity(params.len());
        for param in params {
            let value = self.binding_value(&param.value, focus)?;
            args.push((param.name.clone(), value));
        }
        Ok(args)
    }

    fn avt(&self, avt: &Avt, focus: Focus<'a, 'i>) -> Result<String, RenderError> {
        let mut out = String::new();
        for part in &avt.parts {
            match part {
                AvtPart::Literal(text) => out.push_str(text),
                AvtPart::Expr(expr) => out.push_str(&self.eval(expr, focus)?.to_string_value()),
            }
        }
        Ok(out)
    }

    /// Stable sort by the `xsl:sort` keys, each evaluated with the node as
    /// context. NaN sorts before every number.
    fn sort(
        &self,
        nodes: Vec<XNode<'a, 'i>>,
        keys: &[SortKey],
    ) -> Result<Vec<XNode<'a, 'i>>, RenderError> {
        if keys.is_empty() {
            return Ok(nodes);
        }
        let size = nodes.len();
        let mut keyed = Vec::with_capacity(size);
        for (idx, node) in nodes.into_iter().enumerate() {
            let focus = Focus {
                node,
                position: idx + 1,
                size,
            };
            let mut values = Vec::with_capacity(keys.len());
            for key in keys {
                let value = self.eval(&key.select, focus)?;
                values.push(if key.numeric {
                    SortValue::Number(value.to_number())
                } else {
                    SortValue::Text(value.to_string_value())
                });
            }
            keyed.push((values, node));
        }
        keyed.sort_by(|(lhs, _), (rhs, _)| compare_keys(keys, lhs, rhs));
        Ok(keyed.into_iter().map(|(_, node)| node).collect())
    }

    fn shallow_copy(
        &mut self,
        focus: Focus<'a, 'i>,
        body: &[Instruction],
        sink: &mut dyn Sink,
    ) -> Result<(), RenderError> {
        let node = focus.node;
        if let Some(attribute) = node.attribute() {
            return sink.attribute(attribute.name(), attribute.value());
        }
        let Some(inner) = node.as_node() else {
            return Ok(());
        };
        match inner.node_type() {
            roxmltree::NodeType::Root => self.execute(body, focus, sink),
            roxmltree::NodeType::Element => {
                sink.start_element(inner.tag_name().name())?;
                self.execute(body, focus, sink)?;
                sink.end_element()
            }
            roxmltree::NodeType::Text => sink.text(inner.text().unwrap_or_default(), true),
            roxmltree::NodeType::Comment => sink.comment(inner.text().unwrap_or_default()),
            roxmltree::NodeType::PI => Ok(()),
        }
    }

    fn deep_copy(&self, node: XNode<'a, 'i>, sink: &mut dyn Sink) -> Result<(), RenderError> {
        if let Some(attribute) = node.attribute() {
            return sink.attribute(attribute.name(), attribute.value());
        }
        let Some(inner) = node.as_node() else {
            return Ok(());
        };
        match inner.node_type() {
            roxmltree::NodeType::Root => self
                .default_children(node)
                .into_iter()
                .try_for_each(|child| self.deep_copy(child, sink)),
            roxmltree::NodeType::Element => {
                sink.start_element(inner.tag_name().name())?;
                for attribute in inner.attributes() {
                    sink.attribute(attribute.name(), attribute.value())?;
                }
                for child in self.default_children(node) {
                    self.deep_copy(child, sink)?;
                }
                sink.end_element()
            }
            roxmltree::NodeType::Text => sink.text(inner.text().unwrap_or_default(), true),
            roxmltree::NodeType::Comment => sink.comment(inner.text().unwrap_or_default()),
            roxmltree::NodeType::PI => Ok(()),
        }
    }
}

enum SortValue {
    Number(f64),
    Text(String),
}

fn compare_keys(keys: &[SortKey], lhs: &[SortValue], rhs: &[SortValue]) -> Ordering {
    for ((key, a), b) in keys.iter().zip(lhs).zip(rhs) {
        let ordering = match (a, b) {
            (SortValue::Number(a), SortValue::Number(b)) => compare_numbers(*a, *b),
            (SortValue::Text(a), SortValue::Text(b)) => a.cmp(b),
            _ => Ordering::Equal,
        };
        let ordering = if key.descending {
            ordering.reverse()
        } else {
            ordering
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn compare_numbers(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

fn is_whitespace_text(node: roxmltree::Node<'_, '_>) -> bool {
    node.is_text() && node.text().is_some_and(|text| text.trim().is_empty())
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first.is_alphabetic() || first == '_')
        && chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
}
