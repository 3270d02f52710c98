//! Result-tree sinks: the streaming serializer and a text-only capture used
//! for variables, attributes, comments and messages.

use std::io::Write;

use tracing::debug;

use super::{OutputMethod, OutputSettings, RenderError};

pub(crate) trait Sink {
    fn start_element(&mut self, name: &str) -> Result<(), RenderError>;
    fn attribute(&mut self, name: &str, value: &str) -> Result<(), RenderError>;
    fn end_element(&mut self) -> Result<(), RenderError>;
    fn text(&mut self, text: &str, escape: bool) -> Result<(), RenderError>;
    fn comment(&mut self, text: &str) -> Result<(), RenderError>;
}

/// Collects only text content.
#[derive(Debug, Default)]
pub(crate) struct TextCapture {
    buf: String,
}

impl TextCapture {
    pub fn into_string(self) -> String {
        self.buf
    }
}

impl Sink for TextCapture {
    fn start_element(&mut self, _name: &str) -> Result<(), RenderError> {
        Ok(())
    }

    fn attribute(&mut self, _name: &str, _value: &str) -> Result<(), RenderError> {
        Ok(())
    }

    fn end_element(&mut self) -> Result<(), RenderError> {
        Ok(())
    }

    fn text(&mut self, text: &str, _escape: bool) -> Result<(), RenderError> {
        self.buf.push_str(text);
        Ok(())
    }

    fn comment(&mut self, _text: &str) -> Result<(), RenderError> {
        Ok(())
    }
}

const HTML_VOID_ELEMENTS: &[&str] = &[
    "area", "base", "basefont", "br", "col", "embed", "frame", "hr", "img", "input", "isindex",
    "link", "meta", "param", "source", "track", "wbr",
];

fn is_void(name: &str) -> bool {
    HTML_VOID_ELEMENTS
        .iter()
        .any(|void| void.eq_ignore_ascii_case(name))
}

fn is_raw_text_element(name: &str) -> bool {
    name.eq_ignore_ascii_case("script") || name.eq_ignore_ascii_case("style")
}

#[derive(Debug)]
struct StartTag {
    name: String,
    attributes: Vec<(String, String)>,
}

/// Streams the result tree to a writer.
///
/// Start tags are held back until their first child so attributes can still
/// be added. With no explicit method, the method is chosen on the first
/// element: `html` for an `<html>` root, `xml` otherwise.
pub(crate) struct Serializer<W: Write> {
    out: W,
    settings: OutputSettings,
    method: Option<OutputMethod>,
    started: bool,
    leading_text: String,
    pending: Option<StartTag>,
    open: Vec<String>,
}

impl<W: Write> Serializer<W> {
    pub fn new(out: W, settings: &OutputSettings) -> Self {
        Self {
            out,
            settings: settings.clone(),
            method: settings.method,
            started: false,
            leading_text: String::new(),
            pending: None,
            open: Vec::new(),
        }
    }

    /// Flush remaining output and return the writer.
    pub fn finish(mut self) -> Result<W, RenderError> {
        self.flush_pending()?;
        if !self.started {
            self.begin(None)?;
        }
        while let Some(name) = self.open.pop() {
            write!(self.out, "</{name}>")?;
        }
        self.out.flush()?;
        Ok(self.out)
    }

    fn begin(&mut self, first_element: Option<&str>) -> Result<(), RenderError> {
        let method = match self.method {
            Some(method) => method,
            None if first_element.is_some_and(|name| name.eq_ignore_ascii_case("html"))
                && self.leading_text.trim().is_empty() =>
            {
                OutputMethod::Html
            }
            None => OutputMethod::Xml,
        };
        self.method = Some(method);
        self.started = true;

        if method == OutputMethod::Xml && !self.settings.omit_xml_declaration {
            write!(self.out, "<?xml version=\"1.0\" encoding=\"utf-8\"?>")?;
        }
        if let Some(root) = first_element
            && method != OutputMethod::Text
        {
            match (&self.settings.doctype_public, &self.settings.doctype_system) {
                (Some(public), Some(system)) => {
                    write!(self.out, "<!DOCTYPE {root} PUBLIC \"{public}\" \"{system}\">")?;
                }
                (Some(public), None) if method == OutputMethod::Html => {
                    write!(self.out, "<!DOCTYPE {root} PUBLIC \"{public}\">")?;
                }
                (None, Some(system)) => write!(self.out, "<!DOCTYPE {root} SYSTEM \"{system}\">")?,
                _ => {}
            }
        }
        let leading = std::mem::take(&mut self.leading_text);
        if !leading.is_empty() {
            self.write_text(&leading, true)?;
        }
        Ok(())
    }

    fn current_method(&self) -> OutputMethod {
        self.method.unwrap_or(OutputMethod::Xml)
    }

    fn flush_pending(&mut self) -> Result<(), RenderError> {
        if let Some(tag) = self.pending.take() {
            self.write_start_tag(&tag)?;
            write!(self.out, ">")?;
            self.open.push(tag.name);
        }
        Ok(())
    }

    fn write_start_tag(&mut self, tag: &StartTag) -> Result<(), RenderError> {
        write!(self.out, "<{}", tag.name)?;
        let html = self.current_method() == OutputMethod::Html;
        for (name, value) in &tag.attributes {
            write!(self.out, " {name}=\"{}\"", escape_attribute(value, html))?;
        }
        Ok(())
    }

    fn write_text(&mut self, text: &str, escape: bool) -> Result<(), RenderError> {
        let method = self.current_method();
        let raw = !escape
            || method == OutputMethod::Text
            || (method == OutputMethod::Html
                && self.open.last().is_some_and(|name| is_raw_text_element(name)));
        if raw {
            self.out.write_all(text.as_bytes())?;
        } else {
            self.out.write_all(escape_text(text).as_bytes())?;
        }
        Ok(())
    }
}

impl<W: Write> Sink for Serializer<W> {
    fn start_element(&mut self, name: &str) -> Result<(), RenderError> {
        if self.current_method() == OutputMethod::Text && self.started {
            return Ok(());
        }
        self.flush_pending()?;
        if !self.started {
            self.begin(Some(name))?;
            if self.current_method() == OutputMethod::Text {
                return Ok(());
            }
        }
        self.pending = Some(StartTag {
            name: name.to_string(),
            attributes: Vec::new(),
        });
        Ok(())
    }

    fn attribute(&mut self, name: &str, value: &str) -> Result<(), RenderError> {
        match self.pending.as_mut() {
            Some(tag) => {
                match tag.attributes.iter_mut().find(|(existing, _)| existing == name) {
                    Some(slot) => slot.1 = value.to_string(),
                    None => tag.attributes.push((name.to_string(), value.to_string())),
                }
            }
            None => debug!(attribute = name, "attribute after element content ignored"),
        }
        Ok(())
    }

    fn end_element(&mut self) -> Result<(), RenderError> {
        if self.current_method() == OutputMethod::Text {
            return Ok(());
        }
        if let Some(tag) = self.pending.take() {
            self.write_start_tag(&tag)?;
            match self.current_method() {
                OutputMethod::Html if is_void(&tag.name) => write!(self.out, ">")?,
                OutputMethod::Html => write!(self.out, "></{}>", tag.name)?,
                _ => write!(self.out, "/>")?,
            }
            return Ok(());
        }
        if let Some(name) = self.open.pop()
            && !(self.current_method() == OutputMethod::Html && is_void(&name))
        {
            write!(self.out, "</{name}>")?;
        }
        Ok(())
    }

    fn text(&mut self, text: &str, escape: bool) -> Result<(), RenderError> {
        if text.is_empty() {
            return Ok(());
        }
        self.flush_pending()?;
        if !self.started && self.method.is_none() {
            self.leading_text.push_str(text);
            return Ok(());
        }
        if !self.started {
            self.begin(None)?;
        }
        self.write_text(text, escape)
    }

    fn comment(&mut self, text: &str) -> Result<(), RenderError> {
        if self.current_method() == OutputMethod::Text {
            return Ok(());
        }
        self.flush_pending()?;
        if !self.started {
            self.begin(None)?;
        }
        write!(self.out, "<!--{}-->", text.replace("--", "- -"))?;
        Ok(())
    }
}

fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out
}

fn escape_attribute(value: &str, html: bool) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' if !html => out.push_str("&lt;"),
            '\n' if !html => out.push_str("&#10;"),
            '\t' if !html => out.push_str("&#9;"),
            c => out.push(c),
        }
    }
    out
}
