//! Expression evaluation.

use std::iter::successors;

use super::ast::{ArithOp, Axis, CompareOp, Expr, Function, LocationPath, NodeTest, Step};
use super::{EvalContext, Value, XNode, XPathError};

pub(super) fn evaluate<'a, 'i>(
    expr: &Expr,
    ctx: &EvalContext<'_, 'a, 'i>,
) -> Result<Value<'a, 'i>, XPathError> {
    match expr {
        Expr::Or(lhs, rhs) => Ok(Value::Bool(
            evaluate(lhs, ctx)?.to_bool() || evaluate(rhs, ctx)?.to_bool(),
        )),
        Expr::And(lhs, rhs) => Ok(Value::Bool(
            evaluate(lhs, ctx)?.to_bool() && evaluate(rhs, ctx)?.to_bool(),
        )),
        Expr::Compare(op, lhs, rhs) => {
            let lhs = evaluate(lhs, ctx)?;
            let rhs = evaluate(rhs, ctx)?;
            Ok(Value::Bool(compare(*op, &lhs, &rhs)))
        }
        Expr::Arith(op, lhs, rhs) => {
            let a = evaluate(lhs, ctx)?.to_number();
            let b = evaluate(rhs, ctx)?.to_number();
            Ok(Value::Num(match op {
                ArithOp::Add => a + b,
                ArithOp::Sub => a - b,
                ArithOp::Mul => a * b,
                ArithOp::Div => a / b,
                ArithOp::Mod => a % b,
            }))
        }
        Expr::Negate(operand) => Ok(Value::Num(-evaluate(operand, ctx)?.to_number())),
        Expr::Union(lhs, rhs) => {
            let mut nodes = evaluate(lhs, ctx)?.into_nodes()?;
            nodes.extend(evaluate(rhs, ctx)?.into_nodes()?);
            sort_document_order(&mut nodes);
            Ok(Value::Nodes(nodes))
        }
        Expr::Path(path) => {
            let start = if path.absolute {
                document_root(&ctx.node)
            } else {
                ctx.node
            };
            Ok(Value::Nodes(apply_steps(vec![start], &path.steps, ctx)?))
        }
        Expr::Filter {
            primary,
            predicates,
            steps,
        } => {
            let mut nodes = evaluate(primary, ctx)?.into_nodes()?;
            for predicate in predicates {
                nodes = filter_by_predicate(nodes, predicate, ctx)?;
            }
            Ok(Value::Nodes(apply_steps(nodes, steps, ctx)?))
        }
        Expr::Literal(text) => Ok(Value::Str(text.clone())),
        Expr::Number(n) => Ok(Value::Num(*n)),
        Expr::Variable(name) => ctx
            .bindings
            .lookup(name)
            .cloned()
            .ok_or_else(|| XPathError::UndefinedVariable(name.clone())),
        Expr::Call(function, args) => call(*function, args, ctx),
    }
}

fn document_root<'a, 'i>(node: &XNode<'a, 'i>) -> XNode<'a, 'i> {
    let anchor = match node {
        XNode::Node(n) => *n,
        XNode::Attribute { owner, .. } => *owner,
    };
    XNode::Node(anchor.document().root())
}

fn sort_document_order(nodes: &mut Vec<XNode<'_, '_>>) {
    nodes.sort_by_key(XNode::order_key);
    nodes.dedup_by_key(|node| node.order_key());
}

fn apply_steps<'a, 'i>(
    mut nodes: Vec<XNode<'a, 'i>>,
    steps: &[Step],
    ctx: &EvalContext<'_, 'a, 'i>,
) -> Result<Vec<XNode<'a, 'i>>, XPathError> {
    for step in steps {
        let mut next = Vec::new();
        for node in &nodes {
            let mut candidates: Vec<XNode<'a, 'i>> = axis_nodes(node, step.axis)
                .into_iter()
                .filter(|candidate| matches_test(candidate, step.axis, &step.test))
                .collect();
            for predicate in &step.predicates {
                candidates = filter_by_predicate(candidates, predicate, ctx)?;
            }
            next.extend(candidates);
        }
        sort_document_order(&mut next);
        nodes = next;
    }
    Ok(nodes)
}

/// Nodes on `axis` from `node`, in axis order (nearest first on reverse axes).
fn axis_nodes<'a, 'i>(node: &XNode<'a, 'i>, axis: Axis) -> Vec<XNode<'a, 'i>> {
    match (node, axis) {
        (_, Axis::SelfAxis) => vec![*node],
        (XNode::Node(n), Axis::Child) => n.children().map(XNode::Node).collect(),
        (XNode::Node(n), Axis::Descendant) => n.descendants().skip(1).map(XNode::Node).collect(),
        (XNode::Node(n), Axis::DescendantOrSelf) => n.descendants().map(XNode::Node).collect(),
        (XNode::Node(n), Axis::Parent) => n.parent().map(XNode::Node).into_iter().collect(),
        (XNode::Node(n), Axis::Ancestor) => n.ancestors().skip(1).map(XNode::Node).collect(),
        (XNode::Node(n), Axis::AncestorOrSelf) => n.ancestors().map(XNode::Node).collect(),
        (XNode::Node(n), Axis::FollowingSibling) => successors(n.next_sibling(), |s| s.next_sibling())
            .map(XNode::Node)
            .collect(),
        (XNode::Node(n), Axis::PrecedingSibling) => successors(n.prev_sibling(), |s| s.prev_sibling())
            .map(XNode::Node)
            .collect(),
        (XNode::Node(n), Axis::Attribute) => {
            if n.is_element() {
                (0..n.attributes().count())
                    .map(|index| XNode::Attribute { owner: *n, index })
                    .collect()
            } else {
                Vec::new()
            }
        }
        (XNode::Attribute { .. }, Axis::DescendantOrSelf) => vec![*node],
        (XNode::Attribute { owner, .. }, Axis::Parent) => vec![XNode::Node(*owner)],
        (XNode::Attribute { owner, .. }, Axis::Ancestor) => {
            owner.ancestors().map(XNode::Node).collect()
        }
        (XNode::Attribute { owner, .. }, Axis::AncestorOrSelf) => std::iter::once(*node)
            .chain(owner.ancestors().map(XNode::Node))
            .collect(),
        (
            XNode::Attribute { .. },
            Axis::Child
            | Axis::Descendant
            | Axis::FollowingSibling
            | Axis::PrecedingSibling
            | Axis::Attribute,
        ) => Vec::new(),
    }
}

fn matches_test(node: &XNode<'_, '_>, axis: Axis, test: &NodeTest) -> bool {
    let principal_is_attribute = axis == Axis::Attribute;
    match test {
        NodeTest::Node => true,
        NodeTest::Text => node.is_text(),
        NodeTest::Comment => node
            .as_node()
            .is_some_and(|n| n.node_type() == roxmltree::NodeType::Comment),
        NodeTest::Any => {
            if principal_is_attribute {
                matches!(node, XNode::Attribute { .. })
            } else {
                node.is_element()
            }
        }
        NodeTest::Name(name) => {
            let kind_matches = if principal_is_attribute {
                matches!(node, XNode::Attribute { .. })
            } else {
                node.is_element()
            };
            kind_matches && node.local_name() == *name
        }
    }
}

fn filter_by_predicate<'a, 'i>(
    nodes: Vec<XNode<'a, 'i>>,
    predicate: &Expr,
    ctx: &EvalContext<'_, 'a, 'i>,
) -> Result<Vec<XNode<'a, 'i>>, XPathError> {
    let size = nodes.len();
    let mut kept = Vec::with_capacity(size);
    for (idx, node) in nodes.into_iter().enumerate() {
        let position = idx + 1;
        let inner = ctx.with_position(node, position, size);
        let keep = match evaluate(predicate, &inner)? {
            Value::Num(n) => n == position as f64,
            other => other.to_bool(),
        };
        if keep {
            kept.push(node);
        }
    }
    Ok(kept)
}

/// Whether `node` matches `pattern`, evaluated right to left.
///
/// Steps use the child or attribute axis; a `descendant-or-self::node()`
/// step (from `//`) matches any chain of ancestors.
pub(super) fn matches_pattern<'a, 'i>(
    node: XNode<'a, 'i>,
    pattern: &LocationPath,
    ctx: &EvalContext<'_, 'a, 'i>,
) -> Result<bool, XPathError> {
    match_steps(node, &pattern.steps, pattern.absolute, ctx)
}

fn match_steps<'a, 'i>(
    node: XNode<'a, 'i>,
    steps: &[Step],
    absolute: bool,
    ctx: &EvalContext<'_, 'a, 'i>,
) -> Result<bool, XPathError> {
    let Some((last, rest)) = steps.split_last() else {
        return Ok(!absolute || node.is_root());
    };

    if *last == Step::descendant_or_self() {
        let mut candidate = Some(node);
        while let Some(ancestor) = candidate {
            if match_steps(ancestor, rest, absolute, ctx)? {
                return Ok(true);
            }
            candidate = parent_of(&ancestor);
        }
        return Ok(false);
    }

    let kind_matches = match last.axis {
        Axis::Attribute => matches!(node, XNode::Attribute { .. }),
        _ => matches!(node, XNode::Node(_)),
    };
    if !kind_matches || !matches_test(&node, last.axis, &last.test) {
        return Ok(false);
    }
    let Some(parent) = parent_of(&node) else {
        return Ok(false);
    };
    if !last.predicates.is_empty() {
        let mut siblings: Vec<XNode<'a, 'i>> = axis_nodes(&parent, last.axis)
            .into_iter()
            .filter(|candidate| matches_test(candidate, last.axis, &last.test))
            .collect();
        for predicate in &last.predicates {
            siblings = filter_by_predicate(siblings, predicate, ctx)?;
        }
        if !siblings.iter().any(|sibling| sibling.same(&node)) {
            return Ok(false);
        }
    }
    match_steps(parent, rest, absolute, ctx)
}

fn parent_of<'a, 'i>(node: &XNode<'a, 'i>) -> Option<XNode<'a, 'i>> {
    match node {
        XNode::Node(n) => n.parent().map(XNode::Node),
        XNode::Attribute { owner, .. } => Some(XNode::Node(*owner)),
    }
}

fn compare(op: CompareOp, lhs: &Value<'_, '_>, rhs: &Value<'_, '_>) -> bool {
    match (lhs, rhs) {
        (Value::Nodes(left), Value::Nodes(right)) => {
            let right: Vec<String> = right.iter().map(XNode::string_value).collect();
            left.iter().any(|l| {
                let l = l.string_value();
                right
                    .iter()
                    .any(|r| compare_atoms(op, &Value::Str(l.clone()), &Value::Str(r.clone())))
            })
        }
        (Value::Nodes(left), Value::Bool(_)) => {
            compare_atoms(op, &Value::Bool(!left.is_empty()), rhs)
        }
        (Value::Bool(_), Value::Nodes(right)) => {
            compare_atoms(op, lhs, &Value::Bool(!right.is_empty()))
        }
        (Value::Nodes(left), _) => left
            .iter()
            .any(|l| compare_atoms(op, &node_atom(l, rhs), rhs)),
        (_, Value::Nodes(right)) => right
            .iter()
            .any(|r| compare_atoms(op, lhs, &node_atom(r, lhs))),
        _ => compare_atoms(op, lhs, rhs),
    }
}

/// Convert a node to the atomic type it is compared against.
fn node_atom<'a, 'i>(node: &XNode<'a, 'i>, other: &Value<'_, '_>) -> Value<'a, 'i> {
    match other {
        Value::Num(_) => Value::Num(parse_number(&node.string_value())),
        _ => Value::Str(node.string_value()),
    }
}

fn compare_atoms(op: CompareOp, lhs: &Value<'_, '_>, rhs: &Value<'_, '_>) -> bool {
    match op {
        CompareOp::Eq | CompareOp::Neq => {
            let equal = match (lhs, rhs) {
                (Value::Bool(_), _) | (_, Value::Bool(_)) => lhs.to_bool() == rhs.to_bool(),
                (Value::Num(_), _) | (_, Value::Num(_)) => lhs.to_number() == rhs.to_number(),
                _ => lhs.to_string_value() == rhs.to_string_value(),
            };
            if op == CompareOp::Eq { equal } else { !equal }
        }
        CompareOp::Lt => lhs.to_number() < rhs.to_number(),
        CompareOp::Le => lhs.to_number() <= rhs.to_number(),
        CompareOp::Gt => lhs.to_number() > rhs.to_number(),
        CompareOp::Ge => lhs.to_number() >= rhs.to_number(),
    }
}

fn call<'a, 'i>(
    function: Function,
    args: &[Expr],
    ctx: &EvalContext<'_, 'a, 'i>,
) -> Result<Value<'a, 'i>, XPathError> {
    let string_arg = |idx: usize| -> Result<String, XPathError> {
        match args.get(idx) {
            Some(arg) => Ok(evaluate(arg, ctx)?.to_string_value()),
            None => Ok(ctx.node.string_value()),
        }
    };
    let number_arg = |idx: usize| -> Result<f64, XPathError> {
        match args.get(idx) {
            Some(arg) => Ok(evaluate(arg, ctx)?.to_number()),
            None => Ok(parse_number(&ctx.node.string_value())),
        }
    };
    let nodes_arg = |idx: usize| -> Result<Vec<XNode<'a, 'i>>, XPathError> {
        match args.get(idx) {
            Some(arg) => evaluate(arg, ctx)?.into_nodes(),
            None => Ok(vec![ctx.node]),
        }
    };

    let value = match function {
        Function::Last => Value::Num(ctx.size as f64),
        Function::Position => Value::Num(ctx.position as f64),
        Function::Count => Value::Num(nodes_arg(0)?.len() as f64),
        Function::Name | Function::LocalName => Value::Str(
            nodes_arg(0)?
                .first()
                .map(XNode::local_name)
                .unwrap_or_default(),
        ),
        Function::String => Value::Str(string_arg(0)?),
        Function::Concat => {
            let mut out = String::new();
            for idx in 0..args.len() {
                out.push_str(&string_arg(idx)?);
            }
            Value::Str(out)
        }
        Function::StartsWith => Value::Bool(string_arg(0)?.starts_with(&string_arg(1)?)),
        Function::Contains => Value::Bool(string_arg(0)?.contains(&string_arg(1)?)),
        Function::SubstringBefore => {
            let haystack = string_arg(0)?;
            let needle = string_arg(1)?;
            Value::Str(
                haystack
                    .find(&needle)
                    .map(|at| haystack[..at].to_string())
                    .unwrap_or_default(),
            )
        }
        Function::SubstringAfter => {
            let haystack = string_arg(0)?;
            let needle = string_arg(1)?;
            Value::Str(
                haystack
                    .find(&needle)
                    .map(|at| haystack[at + needle.len()..].to_string())
                    .unwrap_or_default(),
            )
        }
        Function::Substring => {
            let text = string_arg(0)?;
            let start = xpath_round(number_arg(1)?);
            let end = if args.len() > 2 {
                start + xpath_round(number_arg(2)?)
            } else {
                f64::INFINITY
            };
            Value::Str(
                text.chars()
                    .enumerate()
                    .filter(|(idx, _)| {
                        let pos = (*idx + 1) as f64;
                        pos >= start && pos < end
                    })
                    .map(|(_, c)| c)
                    .collect(),
            )
        }
        Function::StringLength => Value::Num(string_arg(0)?.chars().count() as f64),
        Function::NormalizeSpace => Value::Str(
            string_arg(0)?
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" "),
        ),
        Function::Translate => {
            let text = string_arg(0)?;
            let from: Vec<char> = string_arg(1)?.chars().collect();
            let to: Vec<char> = string_arg(2)?.chars().collect();
            Value::Str(
                text.chars()
                    .filter_map(|c| match from.iter().position(|&f| f == c) {
                        Some(idx) => to.get(idx).copied(),
                        None => Some(c),
                    })
                    .collect(),
            )
        }
        Function::Boolean => Value::Bool(evaluate(&args[0], ctx)?.to_bool()),
        Function::Not => Value::Bool(!evaluate(&args[0], ctx)?.to_bool()),
        Function::True => Value::Bool(true),
        Function::False => Value::Bool(false),
        Function::Number => Value::Num(number_arg(0)?),
        Function::Sum => Value::Num(
            nodes_arg(0)?
                .iter()
                .map(|node| parse_number(&node.string_value()))
                .sum(),
        ),
        Function::Floor => Value::Num(number_arg(0)?.floor()),
        Function::Ceiling => Value::Num(number_arg(0)?.ceil()),
        Function::Round => Value::Num(xpath_round(number_arg(0)?)),
        Function::Current => Value::Nodes(vec![ctx.current]),
    };
    Ok(value)
}

fn xpath_round(n: f64) -> f64 {
    if n.is_finite() { (n + 0.5).floor() } else { n }
}

/// XPath string conversion of a number.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        }
    } else if n == 0.0 {
        "0".to_string()
    } else {
        format!("{n}")
    }
}

/// XPath number conversion of a string: optional `-`, digits, optional
/// fraction. Anything else is NaN.
pub fn parse_number(text: &str) -> f64 {
    let trimmed = text.trim_matches(|c: char| matches!(c, ' ' | '\t' | '\r' | '\n'));
    let digits = trimmed.strip_prefix('-').unwrap_or(trimmed);
    let mut seen_dot = false;
    let mut seen_digit = false;
    for c in digits.chars() {
        match c {
            '0'..='9' => seen_digit = true,
            '.' if !seen_dot => seen_dot = true,
            _ => return f64::NAN,
        }
    }
    if !seen_digit {
        return f64::NAN;
    }
    trimmed.parse().unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::xpath::{Bindings, compile};

    const REPORT: &str = r#"<DuplicatesReport ToolsVersion="2020.1">
  <Statistics><CodebaseCost>400</CodebaseCost><TotalDuplicatesCost>120</TotalDuplicatesCost></Statistics>
  <Duplicates>
    <Duplicate Cost="80">
      <Fragment><FileName>src\a.cs</FileName><LineRange Start="10" End="20"/></Fragment>
      <Fragment><FileName>src\b.cs</FileName><LineRange Start="5" End="15"/></Fragment>
    </Duplicate>
    <Duplicate Cost="40">
      <Fragment><FileName>src\c.cs</FileName><LineRange Start="1" End="4"/></Fragment>
      <Fragment><FileName>src\d.cs</FileName><LineRange Start="7" End="10"/></Fragment>
    </Duplicate>
  </Duplicates>
</DuplicatesReport>"#;

    fn eval_at_root(doc: &roxmltree::Document<'_>, expr: &str) -> String {
        let bindings = Bindings::new();
        let ctx = EvalContext::new(XNode::root(doc), &bindings);
        compile(expr)
            .expect("compile")
            .evaluate_string(&ctx)
            .expect("evaluate")
    }

    #[test]
    fn counts_and_sums_across_paths() {
        let doc = roxmltree::Document::parse(REPORT).expect("parse");
        assert_eq!(eval_at_root(&doc, "count(//Fragment)"), "4");
        assert_eq!(eval_at_root(&doc, "sum(//Duplicate/@Cost)"), "120");
        assert_eq!(
            eval_at_root(&doc, "/DuplicatesReport/Statistics/CodebaseCost div 8"),
            "50"
        );
    }

    #[test]
    fn positional_and_boolean_predicates() {
        let doc = roxmltree::Document::parse(REPORT).expect("parse");
        assert_eq!(
            eval_at_root(&doc, "//Duplicate[2]/Fragment[last()]/FileName"),
            r"src\d.cs"
        );
        assert_eq!(
            eval_at_root(&doc, "//Duplicate[@Cost > 50]/Fragment[1]/FileName"),
            r"src\a.cs"
        );
        assert_eq!(
            eval_at_root(&doc, "count(//Fragment[LineRange/@Start < 8])"),
            "3"
        );
    }

    #[test]
    fn reverse_axes_number_from_context() {
        let doc = roxmltree::Document::parse(REPORT).expect("parse");
        assert_eq!(
            eval_at_root(
                &doc,
                "//Fragment[FileName = 'src\\d.cs']/preceding-sibling::Fragment[1]/FileName"
            ),
            r"src\c.cs"
        );
        assert_eq!(
            eval_at_root(&doc, "name(//LineRange[1]/ancestor::*[2])"),
            "Duplicate"
        );
    }

    #[test]
    fn node_set_comparisons_are_existential() {
        let doc = roxmltree::Document::parse(REPORT).expect("parse");
        assert_eq!(eval_at_root(&doc, "//Duplicate/@Cost = 40"), "true");
        assert_eq!(eval_at_root(&doc, "//Duplicate/@Cost != 40"), "true");
        assert_eq!(eval_at_root(&doc, "//Duplicate/@Cost = 41"), "false");
        assert_eq!(eval_at_root(&doc, "//Missing = ''"), "false");
    }

    #[test]
    fn string_functions() {
        let doc = roxmltree::Document::parse(REPORT).expect("parse");
        assert_eq!(
            eval_at_root(&doc, "substring-after(//Fragment[1]/FileName, '\\')"),
            "a.cs"
        );
        assert_eq!(eval_at_root(&doc, "substring('12345', 1.5, 2.6)"), "234");
        assert_eq!(eval_at_root(&doc, "normalize-space('  a \n b  ')"), "a b");
        assert_eq!(eval_at_root(&doc, "translate('bar', 'abc', 'ABC')"), "BAr");
        assert_eq!(eval_at_root(&doc, "concat('a', 1, true())"), "a1true");
        assert_eq!(eval_at_root(&doc, "string-length('héllo')"), "5");
    }

    #[test]
    fn number_formatting_follows_xpath() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
        assert!(parse_number("1e3").is_nan());
        assert!(parse_number("+1").is_nan());
        assert_eq!(parse_number(" -2.5 "), -2.5);
    }

    #[test]
    fn variables_resolve_through_bindings() {
        let doc = roxmltree::Document::parse(REPORT).expect("parse");
        let mut bindings = Bindings::new();
        bindings.bind_global("threshold", Value::Num(50.0));
        let ctx = EvalContext::new(XNode::root(&doc), &bindings);
        let expr = compile("count(//Duplicate[@Cost >= $threshold])").expect("compile");
        assert_eq!(expr.evaluate_string(&ctx).expect("eval"), "1");

        let missing = compile("$nope").expect("compile");
        assert_eq!(
            missing.evaluate(&ctx).unwrap_err(),
            XPathError::UndefinedVariable("nope".to_string())
        );
    }

    #[test]
    fn union_is_in_document_order_without_duplicates() {
        let doc = roxmltree::Document::parse(REPORT).expect("parse");
        let bindings = Bindings::new();
        let ctx = EvalContext::new(XNode::root(&doc), &bindings);
        let nodes = compile("//CodebaseCost | //Statistics/* | //TotalDuplicatesCost")
            .expect("compile")
            .evaluate_nodes(&ctx)
            .expect("eval");
        let names: Vec<String> = nodes.iter().map(XNode::local_name).collect();
        assert_eq!(names, vec!["CodebaseCost", "TotalDuplicatesCost"]);
    }

    #[test]
    fn attributes_sort_between_owner_and_children() {
        let doc = roxmltree::Document::parse(REPORT).expect("parse");
        let bindings = Bindings::new();
        let ctx = EvalContext::new(XNode::root(&doc), &bindings);
        let nodes = compile("//Duplicate[2]/Fragment[1] | //Duplicate/@Cost | //Duplicate[1]")
            .expect("compile")
            .evaluate_nodes(&ctx)
            .expect("eval");
        let names: Vec<String> = nodes.iter().map(XNode::local_name).collect();
        assert_eq!(names, vec!["Duplicate", "Cost", "Cost", "Fragment"]);
    }

    fn pattern(source: &str) -> LocationPath {
        match compile(source).expect("compile") {
            Expr::Path(path) => path,
            other => panic!("not a path: {other:?}"),
        }
    }

    #[test]
    fn patterns_match_right_to_left() {
        let doc = roxmltree::Document::parse(REPORT).expect("parse");
        let bindings = Bindings::new();
        let root = XNode::root(&doc);
        let ctx = EvalContext::new(root, &bindings);
        let second_fragment = compile("//Duplicate[2]/Fragment[1]")
            .expect("compile")
            .evaluate_nodes(&ctx)
            .expect("eval")[0];

        assert!(pattern("Fragment").matches(second_fragment, &ctx).expect("match"));
        assert!(pattern("Duplicate/Fragment").matches(second_fragment, &ctx).expect("match"));
        assert!(pattern("/DuplicatesReport//Fragment").matches(second_fragment, &ctx).expect("match"));
        assert!(pattern("Fragment[1]").matches(second_fragment, &ctx).expect("match"));
        assert!(!pattern("Fragment[2]").matches(second_fragment, &ctx).expect("match"));
        assert!(!pattern("Duplicates/Fragment").matches(second_fragment, &ctx).expect("match"));
        assert!(pattern("/").matches(root, &ctx).expect("match"));
        assert!(!pattern("/").matches(second_fragment, &ctx).expect("match"));

        let cost = compile("//Duplicate[1]/@Cost")
            .expect("compile")
            .evaluate_nodes(&ctx)
            .expect("eval")[0];
        assert!(pattern("@Cost").matches(cost, &ctx).expect("match"));
        assert!(pattern("Duplicate/@*").matches(cost, &ctx).expect("match"));
        assert!(!pattern("Cost").matches(cost, &ctx).expect("match"));
    }
}
