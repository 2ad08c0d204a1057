// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Streaming, namespace-aware XML serialization.
//!
//! A [`StreamWriter`] consumes node-construction events (open element, add
//! attribute, add text, close element, ...) one at a time and pushes markup
//! chunks to a [`Sink`] as soon as they are decided. The document tree is
//! never materialized; the writer only keeps the open-tag stack and the
//! namespace prefix bindings in scope.
//!
//! ```
//! use xml_stream::{StreamWriter, WriterOptions};
//!
//! let mut out = String::new();
//! let mut w = StreamWriter::new(&mut out, WriterOptions::default());
//! w.open_element(Some("urn:x"), "root")?
//!     .attribute("a", "1")?
//!     .text("a < b")?
//!     .close_element()?
//!     .end_document()?;
//! drop(w);
//! assert_eq!(out, r#"<root xmlns="urn:x" a="1">a &lt; b</root>"#);
//! # Ok::<(), xml_stream::Error>(())
//! ```

pub mod name;
pub mod node;
pub mod ser;

pub use node::{
    AttributeDescriptor, Declaration, DocumentType, ElementDescriptor, ProcessingInstruction,
};
pub use ser::{Chunk, ChunkSink, Error, ErrorKind, Flow, IoSink, Sink, StreamWriter, WriterOptions};

/// The namespace permanently bound to the `xml` prefix.
pub const XML_NS: &str = xml::namespace::NS_XML_URI;

/// The namespace of namespace declaration attributes (`xmlns`, `xmlns:*`).
pub const XMLNS_NS: &str = xml::namespace::NS_XMLNS_URI;

/// The HTML namespace; elements in it get void-element treatment.
pub const HTML_NS: &str = "http://www.w3.org/1999/xhtml";

const XML_PREFIX: &str = xml::namespace::NS_XML_PREFIX;
const XMLNS_PREFIX: &str = xml::namespace::NS_XMLNS_PREFIX;

/// A reference to an "expanded name": namespace and local name.
///
/// See [Namespaces in XML 1.1 (Second Edition) section 2.1: Basic
/// Concepts](https://www.w3.org/TR/2006/REC-xml-names11-20060816/#concepts).
///
/// Unlike a qualified name, the prefix plays no part: two attributes with
/// different prefixes bound to the same namespace share an expanded name.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ExpandedNameRef<'a> {
    /// `None` for the null namespace.
    pub namespace: Option<&'a str>,
    pub local_name: &'a str,
}

impl<'a> std::fmt::Display for ExpandedNameRef<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.namespace {
            None => write!(f, "{}", self.local_name),
            Some(ns) => write!(f, "{{{}}}{}", ns, self.local_name),
        }
    }
}

/// An owned version of an "expanded name": namespace and local name.
///
/// The borrowed version is called [`ExpandedNameRef`].
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ExpandedName {
    pub namespace: Option<String>,
    pub local_name: String,
}

impl ExpandedName {
    pub fn as_ref(&self) -> ExpandedNameRef {
        ExpandedNameRef {
            namespace: self.namespace.as_deref(),
            local_name: &self.local_name,
        }
    }
}

impl<'a> From<ExpandedNameRef<'a>> for ExpandedName {
    fn from(name: ExpandedNameRef<'a>) -> Self {
        ExpandedName {
            namespace: name.namespace.map(str::to_owned),
            local_name: name.local_name.to_owned(),
        }
    }
}

impl std::fmt::Display for ExpandedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.as_ref().fmt(f)
    }
}
