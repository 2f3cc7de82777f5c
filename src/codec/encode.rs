//! XML body construction for RPC requests.
//!
//! [`BodyBuilder`] is a thin layer over `quick_xml::Writer` with the two
//! special-case encodings the protocol needs beyond structural mapping:
//!
//! - **Presence booleans** ([`BodyBuilder::presence`]): true is an empty
//!   element, false is nothing at all. The element's existence is the value.
//! - **Identifier-as-tag-name** ([`BodyBuilder::tag_name_selector`]): a
//!   selector like a datastore name becomes an empty element *named after*
//!   the identifier (`<source><running/></source>`), not text content.
//!
//! These are deliberate custom routines rather than rules bolted onto a
//! generic mapper; see the operation builders in [`crate::ops`] for usage.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::error::{NetconfError, Result};

/// Escape text for use in XML content or as a tag name.
pub fn escape_text(input: &str) -> String {
    quick_xml::escape::escape(input).into_owned()
}

/// Incremental writer for an operation's XML body.
pub struct BodyBuilder {
    writer: Writer<Vec<u8>>,
}

impl BodyBuilder {
    pub fn new() -> Self {
        Self {
            writer: Writer::new(Vec::new()),
        }
    }

    /// Open `<name>`.
    pub fn start(&mut self, name: &str) -> Result<()> {
        self.writer
            .write_event(Event::Start(BytesStart::new(name)))?;
        Ok(())
    }

    /// Open `<name attr="value" ...>`.
    pub fn start_with_attrs(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
        let mut elem = BytesStart::new(name);
        for (key, value) in attrs {
            elem.push_attribute((*key, *value));
        }
        self.writer.write_event(Event::Start(elem))?;
        Ok(())
    }

    /// Close `</name>`.
    pub fn end(&mut self, name: &str) -> Result<()> {
        self.writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    /// Write `<name/>`.
    pub fn empty(&mut self, name: &str) -> Result<()> {
        self.writer
            .write_event(Event::Empty(BytesStart::new(name)))?;
        Ok(())
    }

    /// Write `<name>text</name>` with the text escaped.
    pub fn text_element(&mut self, name: &str, text: &str) -> Result<()> {
        self.start(name)?;
        self.writer.write_event(Event::Text(BytesText::new(text)))?;
        self.end(name)
    }

    /// Splice a pre-formed XML fragment in verbatim.
    pub fn raw(&mut self, xml: &str) -> Result<()> {
        self.writer
            .write_event(Event::Text(BytesText::from_escaped(xml)))?;
        Ok(())
    }

    /// Presence boolean: `<name/>` when true, nothing when false.
    pub fn presence(&mut self, name: &str, present: bool) -> Result<()> {
        if present {
            self.empty(name)?;
        }
        Ok(())
    }

    /// Identifier-as-tag-name selector: `<wrapper><identifier/></wrapper>`.
    ///
    /// Empty identifiers are invalid and rejected before anything is written;
    /// non-empty identifiers are escaped before use as a tag name.
    pub fn tag_name_selector(&mut self, wrapper: &str, identifier: &str) -> Result<()> {
        if identifier.is_empty() {
            return Err(NetconfError::Validation(format!(
                "{} selector cannot be empty",
                wrapper
            )));
        }
        let escaped = escape_text(identifier);
        self.start(wrapper)?;
        self.writer
            .write_event(Event::Empty(BytesStart::new(escaped.as_str())))?;
        self.end(wrapper)
    }

    /// Finish building and return the body string.
    pub fn finish(self) -> String {
        String::from_utf8_lossy(&self.writer.into_inner()).into_owned()
    }
}

impl Default for BodyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_elements() {
        let mut b = BodyBuilder::new();
        b.start("get-config").unwrap();
        b.text_element("source", "running").unwrap();
        b.end("get-config").unwrap();
        assert_eq!(
            b.finish(),
            "<get-config><source>running</source></get-config>"
        );
    }

    #[test]
    fn test_text_is_escaped() {
        let mut b = BodyBuilder::new();
        b.text_element("persist", "a<b&c").unwrap();
        assert_eq!(b.finish(), "<persist>a&lt;b&amp;c</persist>");
    }

    #[test]
    fn test_raw_is_not_escaped() {
        let mut b = BodyBuilder::new();
        b.start("config").unwrap();
        b.raw("<interfaces><interface/></interfaces>").unwrap();
        b.end("config").unwrap();
        assert_eq!(
            b.finish(),
            "<config><interfaces><interface/></interfaces></config>"
        );
    }

    #[test]
    fn test_presence_true_is_empty_element() {
        let mut b = BodyBuilder::new();
        b.presence("confirmed", true).unwrap();
        assert_eq!(b.finish(), "<confirmed/>");
    }

    #[test]
    fn test_presence_false_is_absent() {
        let mut b = BodyBuilder::new();
        b.presence("confirmed", false).unwrap();
        assert_eq!(b.finish(), "");
    }

    #[test]
    fn test_tag_name_selector() {
        let mut b = BodyBuilder::new();
        b.tag_name_selector("source", "running").unwrap();
        assert_eq!(b.finish(), "<source><running/></source>");
    }

    #[test]
    fn test_tag_name_selector_rejects_empty() {
        let mut b = BodyBuilder::new();
        let result = b.tag_name_selector("target", "");
        assert!(matches!(result, Err(NetconfError::Validation(_))));
    }

    #[test]
    fn test_tag_name_selector_escapes_identifier() {
        let mut b = BodyBuilder::new();
        b.tag_name_selector("source", "run<ning").unwrap();
        assert_eq!(b.finish(), "<source><run&lt;ning/></source>");
    }

    #[test]
    fn test_attributes() {
        let mut b = BodyBuilder::new();
        b.start_with_attrs("filter", &[("type", "subtree")]).unwrap();
        b.end("filter").unwrap();
        assert_eq!(b.finish(), "<filter type=\"subtree\"></filter>");
    }
}
