//! XML parsing utilities for the OOXML parts of a workbook.
//! Provides the reader wrapper and helper traits for attribute and text processing.

use crate::error::ExtractError;
use quick_xml::escape::resolve_xml_entity;
use quick_xml::events::attributes::Attribute;
use quick_xml::events::BytesCData;
use quick_xml::events::BytesRef;
use quick_xml::events::BytesStart;
use quick_xml::events::BytesText;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::borrow::Cow;
use std::io::BufRead;
use std::str::FromStr;
use thiserror::Error;

/// Errors specific to XML parsing operations
#[derive(Error, Debug)]
pub enum XmlError {
    #[error("Parse entity '{0}' failed")]
    ParseEntity(String),

    #[error("Parse attribute value '{0}' failed")]
    ParseAttributeValue(String),
}

/// XML reader wrapper configured for spreadsheet parts
pub(crate) struct XmlReader<R: BufRead> {
    reader: Reader<R>,
    buffer: Vec<u8>,
}

impl<R: BufRead> XmlReader<R> {
    pub(crate) fn new(buf_reader: R) -> XmlReader<R> {
        let mut reader = Reader::from_reader(buf_reader);
        let config = reader.config_mut();
        config.check_comments = false;
        config.check_end_names = false;
        config.expand_empty_elements = true;
        config.trim_text(false);

        let buffer = Vec::with_capacity(1024);
        XmlReader { reader, buffer }
    }

    /// Reads the next XML event, `None` at end of input
    pub(crate) fn next(&'_ mut self) -> Result<Option<Event<'_>>, ExtractError> {
        self.buffer.clear();
        match self.reader.read_event_into(&mut self.buffer) {
            Ok(Event::Eof) => Ok(None),
            Ok(event) => Ok(Some(event)),
            Err(error) => Err(ExtractError::Xml(error)),
        }
    }

    /// Walks the whole document, decoding every text node and attribute value.
    /// Used to prove a part is well-formed UTF-8 without keeping its content.
    pub(crate) fn validate(&mut self) -> Result<(), ExtractError> {
        while let Some(event) = self.next()? {
            match event {
                Event::Start(node) | Event::Empty(node) => {
                    for attribute in node.attributes() {
                        attribute?.get_value()?;
                    }
                }
                Event::Text(text) => {
                    text.xml_content()?;
                }
                Event::CData(data) => {
                    std::str::from_utf8(&data)?;
                }
                _ => (),
            }
        }
        Ok(())
    }
}

/// Helper trait for XML attributes providing convenient value extraction and parsing
pub(crate) trait XmlAttributeHelper<'a> {
    fn get_value(&self) -> Result<Cow<'a, str>, ExtractError>;

    fn parse_value<T: FromStr>(&self) -> Result<T, ExtractError>;
}

impl<'a> XmlAttributeHelper<'a> for Attribute<'a> {
    fn get_value(&self) -> Result<Cow<'a, str>, ExtractError> {
        Ok(self.unescape_value()?)
    }

    fn parse_value<T: FromStr>(&self) -> Result<T, ExtractError> {
        self.get_value()?
            .parse()
            .map_err(|_| match std::str::from_utf8(&self.value) {
                Ok(value) => ExtractError::XmlHelper(XmlError::ParseAttributeValue(value.to_string())),
                Err(error) => ExtractError::StringEncoding(error),
            })
    }
}

/// Helper trait for XML nodes providing attribute access methods
pub(crate) trait XmlNodeHelper<'a> {
    fn get_attribute_value(&'a self, name: &str) -> Result<Option<Cow<'a, str>>, ExtractError>;

    fn parse_attribute_value<T: FromStr>(&self, name: &str) -> Result<Option<T>, ExtractError>;

    /// Looks an attribute up by local name, ignoring any namespace prefix.
    fn get_local_attribute_value(&'a self, name: &[u8]) -> Result<Option<Cow<'a, str>>, ExtractError>;
}

impl<'a> XmlNodeHelper<'a> for BytesStart<'a> {
    fn get_attribute_value(&'a self, name: &str) -> Result<Option<Cow<'a, str>>, ExtractError> {
        self.try_get_attribute(name)?
            .map(|attribute| attribute.get_value())
            .transpose()
    }

    fn parse_attribute_value<T: FromStr>(&self, name: &str) -> Result<Option<T>, ExtractError> {
        self.try_get_attribute(name)?
            .map(|attribute| attribute.parse_value())
            .transpose()
    }

    fn get_local_attribute_value(&'a self, name: &[u8]) -> Result<Option<Cow<'a, str>>, ExtractError> {
        for result in self.attributes() {
            let attribute = result?;
            if attribute.key.local_name().as_ref() == name {
                return attribute.get_value().map(Some);
            }
        }
        Ok(None)
    }
}

/// Helper trait for building text content from XML events.
///
/// With `lossy` set, invalid UTF-8 is replaced instead of failing the part.
pub(crate) trait XmlTextContextHelper {
    fn push_bytes_text(&mut self, text: &BytesText, lossy: bool) -> Result<(), ExtractError>;

    fn push_bytes_cdata(&mut self, data: &BytesCData, lossy: bool) -> Result<(), ExtractError>;

    /// Appends an entity or character reference
    fn push_bytes_ref(&mut self, bytes: &BytesRef) -> Result<(), ExtractError>;
}

impl XmlTextContextHelper for String {
    fn push_bytes_text(&mut self, text: &BytesText, lossy: bool) -> Result<(), ExtractError> {
        if lossy {
            self.push_str(&String::from_utf8_lossy(text.as_ref()));
        } else {
            self.push_str(&text.xml_content()?);
        }
        Ok(())
    }

    fn push_bytes_cdata(&mut self, data: &BytesCData, lossy: bool) -> Result<(), ExtractError> {
        if lossy {
            self.push_str(&String::from_utf8_lossy(data.as_ref()));
        } else {
            self.push_str(std::str::from_utf8(data.as_ref())?);
        }
        Ok(())
    }

    fn push_bytes_ref(&mut self, bytes: &BytesRef) -> Result<(), ExtractError> {
        let raw = bytes.xml_content()?;
        if let Some(number) = raw.strip_prefix('#') {
            let code = if let Some(hex) = number.strip_prefix('x') {
                u32::from_str_radix(hex, 16)?
            } else {
                number.parse::<u32>()?
            };
            if let Some(character) = char::from_u32(code) {
                self.push(character);
            }
        } else if let Some(entity) = resolve_xml_entity(&raw) {
            self.push_str(entity);
        } else {
            Err(XmlError::ParseEntity(raw.to_string()))?;
        }

        Ok(())
    }
}

#[macro_export]
macro_rules! match_xml_events {
    ($reader:expr => { $($arms:tt)* }) => {
        while let Some(result) = $reader.next()? {
            match result {
                Event::Eof => break,
                $($arms)*
                _ => (),
            }
        }
    };
}
