//! XSLT 1.0 subset used to render analyzer reports.
//!
//! A [`Stylesheet`] is compiled once from its XML source and can transform
//! any number of documents. Supported: template rules with modes and
//! priorities, named templates with parameters, `for-each`/`sort`,
//! conditionals, variables, literal result elements with attribute value
//! templates, `element`/`attribute`/`comment`/`copy`/`copy-of`, `message`,
//! `strip-space`, and `output` with xml, html and text methods.

mod compile;
mod render;
mod serialize;

use std::io::{self, Read, Write};

use thiserror::Error;

use crate::core::xpath::XPathError;

pub const XSLT_NS: &str = "http://www.w3.org/1999/XSL/Transform";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMethod {
    Xml,
    Html,
    Text,
}

/// `xsl:output` settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputSettings {
    /// `None` picks html for an `<html>` result root and xml otherwise.
    pub method: Option<OutputMethod>,
    pub omit_xml_declaration: bool,
    pub doctype_public: Option<String>,
    pub doctype_system: Option<String>,
}

/// Failure to load or compile a stylesheet.
#[derive(Debug, Error)]
pub enum StylesheetError {
    #[error("failed to read stylesheet")]
    Io(#[from] io::Error),
    #[error("stylesheet is not well-formed XML")]
    Xml(#[from] roxmltree::Error),
    #[error("root element <{0}> is not xsl:stylesheet or xsl:transform")]
    NotAStylesheet(String),
    #[error("<xsl:{element}> is missing required attribute '{attribute}'")]
    MissingAttribute {
        element: String,
        attribute: &'static str,
    },
    #[error("<xsl:{0}> is not supported")]
    Unsupported(String),
    #[error("invalid XPath in {context}")]
    XPath {
        context: String,
        source: XPathError,
    },
    #[error("call to undefined template '{0}'")]
    UnknownTemplate(String),
    #[error("{0}")]
    Invalid(String),
    #[error("stylesheet failed while rendering")]
    Render(#[source] RenderError),
}

/// Failure while applying a compiled stylesheet.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to write transform output")]
    Io(#[from] io::Error),
    #[error(transparent)]
    XPath(#[from] XPathError),
    #[error("stylesheet terminated: {0}")]
    Terminated(String),
    #[error("template recursion exceeded {0} levels")]
    RecursionLimit(usize),
    #[error("'{0}' is not a valid element or attribute name")]
    InvalidName(String),
}

/// A compiled stylesheet.
#[derive(Debug, Clone)]
pub struct Stylesheet {
    compiled: compile::Compiled,
}

impl Stylesheet {
    pub fn parse(source: &str) -> Result<Self, StylesheetError> {
        let doc = roxmltree::Document::parse(source)?;
        let compiled = compile::compile_document(&doc)?;
        Ok(Self { compiled })
    }

    pub fn from_reader(mut reader: impl Read) -> Result<Self, StylesheetError> {
        let mut source = String::new();
        reader.read_to_string(&mut source)?;
        Self::parse(&source)
    }

    pub fn output(&self) -> &OutputSettings {
        &self.compiled.output
    }

    /// Transform `doc`, streaming the result into `out`. Returns the writer
    /// after flushing it.
    ///
    /// Templates run on a separate thread with its own large stack, so a
    /// runaway stylesheet ends in [`RenderError::RecursionLimit`] on any
    /// calling thread.
    pub fn transform<W: Write + Send>(
        &self,
        doc: &roxmltree::Document<'_>,
        out: W,
    ) -> Result<W, RenderError> {
        let mut serializer = serialize::Serializer::new(out, &self.compiled.output);
        render::render(&self.compiled, doc, &mut serializer)?;
        serializer.finish()
    }

    pub fn transform_to_string(&self, doc: &roxmltree::Document<'_>) -> Result<String, RenderError> {
        let bytes = self.transform(doc, Vec::new())?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(xslt: &str, xml: &str) -> String {
        let sheet = Stylesheet::parse(xslt).expect("stylesheet");
        let doc = roxmltree::Document::parse(xml).expect("source");
        sheet.transform_to_string(&doc).expect("transform")
    }

    #[test]
    fn rejects_non_stylesheet_roots() {
        let err = Stylesheet::parse("<html/>").unwrap_err();
        assert!(matches!(err, StylesheetError::NotAStylesheet(name) if name == "html"));
    }

    #[test]
    fn rejects_malformed_xml() {
        let err = Stylesheet::parse("<xsl:stylesheet").unwrap_err();
        assert!(matches!(err, StylesheetError::Xml(_)));
    }

    #[test]
    fn rejects_unknown_instructions() {
        let err = Stylesheet::parse(
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
                 <xsl:template match="/"><xsl:number/></xsl:template>
               </xsl:stylesheet>"#,
        )
        .unwrap_err();
        assert!(matches!(err, StylesheetError::Unsupported(name) if name == "number"));
    }

    #[test]
    fn rejects_calls_to_missing_templates() {
        let err = Stylesheet::parse(
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
                 <xsl:template match="/"><xsl:call-template name="nope"/></xsl:template>
               </xsl:stylesheet>"#,
        )
        .unwrap_err();
        assert!(matches!(err, StylesheetError::UnknownTemplate(name) if name == "nope"));
    }

    #[test]
    fn reports_bad_xpath_with_context() {
        let err = Stylesheet::parse(
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
                 <xsl:template match="/"><xsl:value-of select="count("/></xsl:template>
               </xsl:stylesheet>"#,
        )
        .unwrap_err();
        assert!(
            matches!(&err, StylesheetError::XPath { context, .. } if context == "xsl:value-of select")
        );
    }

    #[test]
    fn builtin_rules_copy_text_through() {
        let out = run(
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
                 <xsl:output method="text"/>
               </xsl:stylesheet>"#,
            "<a>one<b>two</b><c x='ignored'>three</c></a>",
        );
        assert_eq!(out, "onetwothree");
    }

    #[test]
    fn html_output_from_report() {
        let out = run(
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
                 <xsl:output method="html"/>
                 <xsl:template match="/">
                   <html><body>
                     <h1>Duplicates: <xsl:value-of select="count(//Duplicate)"/></h1>
                     <xsl:apply-templates select="//Duplicate"/>
                   </body></html>
                 </xsl:template>
                 <xsl:template match="Duplicate">
                   <p class="cost-{@Cost}"><xsl:value-of select="Fragment/FileName"/></p>
                 </xsl:template>
               </xsl:stylesheet>"#,
            r#"<DuplicatesReport><Duplicates>
                 <Duplicate Cost="80"><Fragment><FileName>a.cs</FileName></Fragment></Duplicate>
                 <Duplicate Cost="40"><Fragment><FileName>b &amp; c.cs</FileName></Fragment></Duplicate>
               </Duplicates></DuplicatesReport>"#,
        );
        assert_eq!(
            out,
            "<html><body><h1>Duplicates: 2</h1><p class=\"cost-80\">a.cs</p><p class=\"cost-40\">b &amp; c.cs</p></body></html>"
        );
    }
}
