//! Compile an XSLT document into an owned instruction tree.

use std::collections::HashMap;

use roxmltree::Node;

use super::{OutputMethod, OutputSettings, StylesheetError, XSLT_NS};
use crate::core::xpath::{self, Axis, Expr, LocationPath, NodeTest, Step};

const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

#[derive(Debug, Clone)]
pub(crate) enum Instruction {
    Text {
        text: String,
        escape: bool,
    },
    LiteralElement {
        name: String,
        attributes: Vec<(String, Avt)>,
        body: Vec<Instruction>,
    },
    ValueOf {
        select: Expr,
        escape: bool,
    },
    ApplyTemplates {
        select: Option<Expr>,
        mode: Option<String>,
        sorts: Vec<SortKey>,
        params: Vec<Binding>,
    },
    CallTemplate {
        template: usize,
        params: Vec<Binding>,
    },
    ForEach {
        select: Expr,
        sorts: Vec<SortKey>,
        body: Vec<Instruction>,
    },
    If {
        test: Expr,
        body: Vec<Instruction>,
    },
    Choose {
        branches: Vec<(Expr, Vec<Instruction>)>,
        otherwise: Vec<Instruction>,
    },
    Variable(Binding),
    Element {
        name: Avt,
        body: Vec<Instruction>,
    },
    Attribute {
        name: Avt,
        body: Vec<Instruction>,
    },
    Comment {
        body: Vec<Instruction>,
    },
    Copy {
        body: Vec<Instruction>,
    },
    CopyOf {
        select: Expr,
    },
    Message {
        body: Vec<Instruction>,
        terminate: bool,
    },
}

/// A named value: `xsl:variable`, `xsl:param`, or `xsl:with-param`.
#[derive(Debug, Clone)]
pub(crate) struct Binding {
    pub name: String,
    pub value: BindingValue,
}

#[derive(Debug, Clone)]
pub(crate) enum BindingValue {
    Select(Expr),
    Content(Vec<Instruction>),
    Empty,
}

#[derive(Debug, Clone)]
pub(crate) struct SortKey {
    pub select: Expr,
    pub descending: bool,
    pub numeric: bool,
}

/// Attribute value template: literal text with `{expr}` holes.
#[derive(Debug, Clone)]
pub(crate) struct Avt {
    pub parts: Vec<AvtPart>,
}

#[derive(Debug, Clone)]
pub(crate) enum AvtPart {
    Literal(String),
    Expr(Expr),
}

#[derive(Debug, Clone)]
pub(crate) struct Template {
    pub name: Option<String>,
    pub params: Vec<Binding>,
    pub body: Vec<Instruction>,
}

/// One alternative of a template's match pattern.
#[derive(Debug, Clone)]
pub(crate) struct Rule {
    pub template: usize,
    pub pattern: LocationPath,
    pub mode: Option<String>,
    pub priority: f64,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct SpaceRules {
    pub strip: Vec<NodeTest>,
    pub preserve: Vec<NodeTest>,
}

impl SpaceRules {
    pub fn strips(&self, element_name: &str) -> bool {
        let matches = |test: &NodeTest| match test {
            NodeTest::Any => true,
            NodeTest::Name(name) => name == element_name,
            _ => false,
        };
        self.strip.iter().any(matches) && !self.preserve.iter().any(matches)
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Compiled {
    pub output: OutputSettings,
    pub templates: Vec<Template>,
    pub rules: Vec<Rule>,
    pub globals: Vec<Binding>,
    pub space: SpaceRules,
}

pub(crate) fn compile_document(doc: &roxmltree::Document<'_>) -> Result<Compiled, StylesheetError> {
    let root = doc.root_element();
    if !is_xsl(root, "stylesheet") && !is_xsl(root, "transform") {
        return Err(StylesheetError::NotAStylesheet(
            root.tag_name().name().to_string(),
        ));
    }

    let template_nodes: Vec<Node<'_, '_>> = root
        .children()
        .filter(|child| is_xsl(*child, "template"))
        .collect();
    let mut names = HashMap::new();
    for (idx, node) in template_nodes.iter().enumerate() {
        if let Some(name) = node.attribute("name") {
            names.insert(name.to_string(), idx);
        }
    }

    let compiler = Compiler { names };
    let mut compiled = Compiled::default();

    for child in root.children().filter(Node::is_element) {
        if child.tag_name().namespace() != Some(XSLT_NS) {
            // Top-level elements in foreign namespaces are user data.
            continue;
        }
        match child.tag_name().name() {
            "template" => {}
            "output" => compiled.output = compile_output(child)?,
            "variable" | "param" => compiled.globals.push(compiler.binding(child)?),
            "strip-space" => compiled.space.strip.extend(name_tests(child)?),
            "preserve-space" => compiled.space.preserve.extend(name_tests(child)?),
            other => return Err(StylesheetError::Unsupported(other.to_string())),
        }
    }

    for (idx, node) in template_nodes.into_iter().enumerate() {
        let (template, rules) = compiler.template(node, idx)?;
        compiled.templates.push(template);
        compiled.rules.extend(rules);
    }

    Ok(compiled)
}

fn is_xsl(node: Node<'_, '_>, name: &str) -> bool {
    node.is_element()
        && node.tag_name().namespace() == Some(XSLT_NS)
        && node.tag_name().name() == name
}

fn required<'n>(node: Node<'n, '_>, attribute: &'static str) -> Result<&'n str, StylesheetError> {
    node.attribute(attribute)
        .ok_or_else(|| StylesheetError::MissingAttribute {
            element: node.tag_name().name().to_string(),
            attribute,
        })
}

fn expr(source: &str, context: &str) -> Result<Expr, StylesheetError> {
    xpath::compile(source).map_err(|source| StylesheetError::XPath {
        context: context.to_string(),
        source,
    })
}

fn compile_output(node: Node<'_, '_>) -> Result<OutputSettings, StylesheetError> {
    let method = match node.attribute("method") {
        None => None,
        Some("xml") => Some(OutputMethod::Xml),
        Some("html") => Some(OutputMethod::Html),
        Some("text") => Some(OutputMethod::Text),
        Some(other) => {
            return Err(StylesheetError::Invalid(format!(
                "unsupported output method '{other}'"
            )));
        }
    };
    Ok(OutputSettings {
        method,
        omit_xml_declaration: node.attribute("omit-xml-declaration") == Some("yes"),
        doctype_public: node.attribute("doctype-public").map(str::to_string),
        doctype_system: node.attribute("doctype-system").map(str::to_string),
    })
}

fn name_tests(node: Node<'_, '_>) -> Result<Vec<NodeTest>, StylesheetError> {
    Ok(required(node, "elements")?
        .split_whitespace()
        .map(|name| {
            let local = name.rsplit(':').next().unwrap_or(name);
            if local == "*" {
                NodeTest::Any
            } else {
                NodeTest::Name(local.to_string())
            }
        })
        .collect())
}

struct Compiler {
    names: HashMap<String, usize>,
}

impl Compiler {
    fn template(
        &self,
        node: Node<'_, '_>,
        idx: usize,
    ) -> Result<(Template, Vec<Rule>), StylesheetError> {
        let name = node.attribute("name").map(str::to_string);
        let mode = node.attribute("mode").map(str::to_string);
        let explicit_priority = node
            .attribute("priority")
            .map(|raw| {
                raw.trim().parse::<f64>().map_err(|_| {
                    StylesheetError::Invalid(format!("template priority '{raw}' is not a number"))
                })
            })
            .transpose()?;

        let mut rules = Vec::new();
        if let Some(pattern) = node.attribute("match") {
            for alternative in compile_pattern(pattern)? {
                let priority = explicit_priority.unwrap_or_else(|| default_priority(&alternative));
                rules.push(Rule {
                    template: idx,
                    pattern: alternative,
                    mode: mode.clone(),
                    priority,
                });
            }
        } else if name.is_none() {
            return Err(StylesheetError::Invalid(
                "xsl:template needs a match or name attribute".to_string(),
            ));
        }

        let mut params = Vec::new();
        let mut body_nodes = Vec::new();
        for child in node.children() {
            if is_xsl(child, "param") {
                params.push(self.binding(child)?);
            } else {
                body_nodes.push(child);
            }
        }
        let body = self.sequence(body_nodes.into_iter())?;
        Ok((Template { name, params, body }, rules))
    }

    fn body(&self, node: Node<'_, '_>) -> Result<Vec<Instruction>, StylesheetError> {
        self.sequence(node.children())
    }

    fn sequence<'a, 'i: 'a>(
        &self,
        nodes: impl Iterator<Item = Node<'a, 'i>>,
    ) -> Result<Vec<Instruction>, StylesheetError> {
        let mut out = Vec::new();
        for node in nodes {
            if node.is_text() {
                let text = node.text().unwrap_or_default();
                if !text.trim().is_empty() {
                    out.push(Instruction::Text {
                        text: text.to_string(),
                        escape: true,
                    });
                }
            } else if node.is_element() {
                out.push(self.instruction(node)?);
            }
        }
        Ok(out)
    }

    fn instruction(&self, node: Node<'_, '_>) -> Result<Instruction, StylesheetError> {
        if node.tag_name().namespace() != Some(XSLT_NS) {
            return self.literal_element(node);
        }
        let name = node.tag_name().name();
        let instruction = match name {
            "text" => Instruction::Text {
                text: node
                    .children()
                    .filter(|child| child.is_text())
                    .filter_map(|child| child.text())
                    .collect(),
                escape: node.attribute("disable-output-escaping") != Some("yes"),
            },
            "value-of" => Instruction::ValueOf {
                select: expr(required(node, "select")?, "xsl:value-of select")?,
                escape: node.attribute("disable-output-escaping") != Some("yes"),
            },
            "apply-templates" => Instruction::ApplyTemplates {
                select: node
                    .attribute("select")
                    .map(|select| expr(select, "xsl:apply-templates select"))
                    .transpose()?,
                mode: node.attribute("mode").map(str::to_string),
                sorts: self.sort_keys(node)?,
                params: self.with_params(node)?,
            },
            "call-template" => {
                let target = required(node, "name")?;
                let template = *self
                    .names
                    .get(target)
                    .ok_or_else(|| StylesheetError::UnknownTemplate(target.to_string()))?;
                Instruction::CallTemplate {
                    template,
                    params: self.with_params(node)?,
                }
            }
            "for-each" => Instruction::ForEach {
                select: expr(required(node, "select")?, "xsl:for-each select")?,
                sorts: self.sort_keys(node)?,
                body: self.sequence(node.children().filter(|child| !is_xsl(*child, "sort")))?,
            },
            "if" => Instruction::If {
                test: expr(required(node, "test")?, "xsl:if test")?,
                body: self.body(node)?,
            },
            "choose" => self.choose(node)?,
            "variable" | "param" => Instruction::Variable(self.binding(node)?),
            "element" => Instruction::Element {
                name: parse_avt(required(node, "name")?)?,
                body: self.body(node)?,
            },
            "attribute" => Instruction::Attribute {
                name: parse_avt(required(node, "name")?)?,
                body: self.body(node)?,
            },
            "comment" => Instruction::Comment {
                body: self.body(node)?,
            },
            "copy" => Instruction::Copy {
                body: self.body(node)?,
            },
            "copy-of" => Instruction::CopyOf {
                select: expr(required(node, "select")?, "xsl:copy-of select")?,
            },
            "message" => Instruction::Message {
                body: self.body(node)?,
                terminate: node.attribute("terminate") == Some("yes"),
            },
            other => return Err(StylesheetError::Unsupported(other.to_string())),
        };
        Ok(instruction)
    }

    fn literal_element(&self, node: Node<'_, '_>) -> Result<Instruction, StylesheetError> {
        let mut attributes = Vec::new();
        for attr in node.attributes() {
            match attr.namespace() {
                Some(XSLT_NS) => continue,
                Some(XML_NS) => {
                    attributes.push((format!("xml:{}", attr.name()), parse_avt(attr.value())?));
                }
                _ => attributes.push((attr.name().to_string(), parse_avt(attr.value())?)),
            }
        }
        Ok(Instruction::LiteralElement {
            name: node.tag_name().name().to_string(),
            attributes,
            body: self.body(node)?,
        })
    }

    fn choose(&self, node: Node<'_, '_>) -> Result<Instruction, StylesheetError> {
        let mut branches = Vec::new();
        let mut otherwise = Vec::new();
        for child in node.children().filter(Node::is_element) {
            if is_xsl(child, "when") {
                let test = expr(required(child, "test")?, "xsl:when test")?;
                branches.push((test, self.body(child)?));
            } else if is_xsl(child, "otherwise") {
                otherwise = self.body(child)?;
            } else {
                return Err(StylesheetError::Invalid(format!(
                    "unexpected <{}> inside xsl:choose",
                    child.tag_name().name()
                )));
            }
        }
        if branches.is_empty() {
            return Err(StylesheetError::Invalid(
                "xsl:choose needs at least one xsl:when".to_string(),
            ));
        }
        Ok(Instruction::Choose {
            branches,
            otherwise,
        })
    }

    fn binding(&self, node: Node<'_, '_>) -> Result<Binding, StylesheetError> {
        let name = required(node, "name")?.to_string();
        let value = match node.attribute("select") {
            Some(select) => BindingValue::Select(expr(select, &format!("${name} select"))?),
            None if node.has_children() => BindingValue::Content(self.body(node)?),
            None => BindingValue::Empty,
        };
        Ok(Binding { name, value })
    }

    fn with_params(&self, node: Node<'_, '_>) -> Result<Vec<Binding>, StylesheetError> {
        node.children()
            .filter(|child| is_xsl(*child, "with-param"))
            .map(|child| self.binding(child))
            .collect()
    }

    fn sort_keys(&self, node: Node<'_, '_>) -> Result<Vec<SortKey>, StylesheetError> {
        node.children()
            .filter(|child| is_xsl(*child, "sort"))
            .map(|child| {
                Ok(SortKey {
                    select: expr(child.attribute("select").unwrap_or("."), "xsl:sort select")?,
                    descending: child.attribute("order") == Some("descending"),
                    numeric: child.attribute("data-type") == Some("number"),
                })
            })
            .collect()
    }
}

/// Split a match pattern into its `|` alternatives, rejecting anything that
/// is not a child/attribute location path.
pub(crate) fn compile_pattern(source: &str) -> Result<Vec<LocationPath>, StylesheetError> {
    let parsed = expr(source, "match pattern")?;
    let mut alternatives = Vec::new();
    flatten_union(parsed, &mut alternatives, source)?;
    Ok(alternatives)
}

fn flatten_union(
    expr: Expr,
    out: &mut Vec<LocationPath>,
    source: &str,
) -> Result<(), StylesheetError> {
    match expr {
        Expr::Union(lhs, rhs) => {
            flatten_union(*lhs, out, source)?;
            flatten_union(*rhs, out, source)
        }
        Expr::Path(path) if path.steps.iter().all(is_pattern_step) => {
            out.push(path);
            Ok(())
        }
        _ => Err(StylesheetError::Invalid(format!(
            "'{source}' is not a valid match pattern"
        ))),
    }
}

fn is_pattern_step(step: &Step) -> bool {
    matches!(step.axis, Axis::Child | Axis::Attribute) || *step == Step::descendant_or_self()
}

fn default_priority(pattern: &LocationPath) -> f64 {
    match pattern.steps.as_slice() {
        [step] if !pattern.absolute && step.predicates.is_empty() => match step.test {
            NodeTest::Name(_) => 0.0,
            NodeTest::Any | NodeTest::Text | NodeTest::Comment | NodeTest::Node => -0.5,
        },
        _ => 0.5,
    }
}

pub(crate) fn parse_avt(source: &str) -> Result<Avt, StylesheetError> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut inner = String::new();
                let mut quote: Option<char> = None;
                let mut closed = false;
                for c in chars.by_ref() {
                    match (quote, c) {
                        (None, '}') => {
                            closed = true;
                            break;
                        }
                        (None, '\'' | '"') => quote = Some(c),
                        (Some(q), c) if c == q => quote = None,
                        _ => {}
                    }
                    inner.push(c);
                }
                if !closed {
                    return Err(StylesheetError::Invalid(format!(
                        "unterminated '{{' in attribute value '{source}'"
                    )));
                }
                if !literal.is_empty() {
                    parts.push(AvtPart::Literal(std::mem::take(&mut literal)));
                }
                parts.push(AvtPart::Expr(expr(&inner, "attribute value template")?));
            }
            '}' => {
                return Err(StylesheetError::Invalid(format!(
                    "unescaped '}}' in attribute value '{source}'"
                )));
            }
            c => literal.push(c),
        }
    }
    if !literal.is_empty() {
        parts.push(AvtPart::Literal(literal));
    }
    Ok(Avt { parts })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avt_splits_literals_and_expressions() {
        let avt = parse_avt("row-{position()}{{x}}").expect("avt");
        assert_eq!(avt.parts.len(), 3);
        assert!(matches!(&avt.parts[0], AvtPart::Literal(text) if text == "row-"));
        assert!(matches!(&avt.parts[1], AvtPart::Expr(_)));
        assert!(matches!(&avt.parts[2], AvtPart::Literal(text) if text == "{x}"));
    }

    #[test]
    fn avt_braces_inside_literals_do_not_close() {
        let avt = parse_avt("{concat('}', @id)}").expect("avt");
        assert_eq!(avt.parts.len(), 1);
    }

    #[test]
    fn avt_rejects_stray_close_brace() {
        assert!(parse_avt("a}b").is_err());
        assert!(parse_avt("{@id").is_err());
    }

    #[test]
    fn default_priorities() {
        let priority = |pattern: &str| {
            let alternatives = compile_pattern(pattern).expect("pattern");
            default_priority(&alternatives[0])
        };
        assert_eq!(priority("Duplicate"), 0.0);
        assert_eq!(priority("@Cost"), 0.0);
        assert_eq!(priority("*"), -0.5);
        assert_eq!(priority("text()"), -0.5);
        assert_eq!(priority("Duplicate/Fragment"), 0.5);
        assert_eq!(priority("Fragment[1]"), 0.5);
        assert_eq!(priority("/"), 0.5);
    }

    #[test]
    fn union_patterns_split_into_alternatives() {
        let alternatives = compile_pattern("Duplicate | Fragment | //FileName").expect("pattern");
        assert_eq!(alternatives.len(), 3);
    }

    #[test]
    fn non_path_patterns_are_rejected() {
        assert!(compile_pattern("count(Duplicate)").is_err());
        assert!(compile_pattern("ancestor::Duplicate").is_err());
    }

    #[test]
    fn strip_space_honours_preserve_list() {
        let rules = SpaceRules {
            strip: vec![NodeTest::Any],
            preserve: vec![NodeTest::Name("Text".to_string())],
        };
        assert!(rules.strips("Fragment"));
        assert!(!rules.strips("Text"));
    }
}
