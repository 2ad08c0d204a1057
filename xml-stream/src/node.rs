// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Node descriptors: validated, read-only views of a single node, built from
//! loosely-typed event arguments.
//!
//! These perform the name checks any DOM would perform when creating the
//! node (`Name`/`QName` grammar, prefix/namespace consistency), independent
//! of the writer's `well_formed` option. Checks that depend on serialization
//! context live in [`crate::ser`].

use crate::name::{is_legal_char, is_name, is_qname};
use crate::ser::Error;
use crate::{XMLNS_NS, XMLNS_PREFIX, XML_NS, XML_PREFIX};

/// A name split into its parts, after the DOM "validate and extract" steps.
#[derive(Clone, Debug, Eq, PartialEq)]
struct Extracted {
    namespace: Option<String>,
    prefix: Option<String>,
    local_name: String,
}

fn validate_and_extract(namespace: Option<&str>, qualified_name: &str) -> Result<Extracted, Error> {
    let namespace = namespace.filter(|ns| !ns.is_empty());
    if !is_name(qualified_name) {
        return Err(Error::invalid_name(qualified_name));
    }
    if !is_qname(qualified_name) {
        return Err(Error::invalid_qname(qualified_name));
    }
    let (prefix, local_name) = match qualified_name.split_once(':') {
        Some((p, l)) => (Some(p), l),
        None => (None, qualified_name),
    };
    let is_xmlns = qualified_name == XMLNS_PREFIX || prefix == Some(XMLNS_PREFIX);
    if let Some(p) = prefix {
        if namespace.is_none() {
            return Err(Error::namespace(format!(
                "prefix {:?} of {:?} requires a namespace",
                p, qualified_name
            )));
        }
    }
    if prefix == Some(XML_PREFIX) && namespace != Some(XML_NS) {
        return Err(Error::namespace(format!(
            "the xml prefix is bound to {}, not {:?}",
            XML_NS, namespace
        )));
    }
    if is_xmlns && namespace != Some(XMLNS_NS) {
        return Err(Error::namespace(format!(
            "{:?} must be in the {} namespace",
            qualified_name, XMLNS_NS
        )));
    }
    if namespace == Some(XMLNS_NS) && !is_xmlns {
        return Err(Error::namespace(format!(
            "only xmlns names may use the {} namespace, not {:?}",
            XMLNS_NS, qualified_name
        )));
    }
    Ok(Extracted {
        namespace: namespace.map(str::to_owned),
        prefix: prefix.map(str::to_owned),
        local_name: local_name.to_owned(),
    })
}

/// An attribute of an [`ElementDescriptor`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttributeDescriptor {
    pub namespace: Option<String>,
    pub prefix: Option<String>,
    pub local_name: String,
    pub value: String,
}

impl AttributeDescriptor {
    /// Creates an attribute from a name with no explicit namespace.
    ///
    /// `xmlns` and `xmlns:*` are namespace declarations and `xml:*` names are
    /// in the XML namespace. Any other name is un-namespaced and is taken
    /// whole as the local name, colons included.
    pub fn new(name: &str, value: impl Into<String>) -> Result<Self, Error> {
        if name == XMLNS_PREFIX || name.starts_with("xmlns:") {
            return Self::new_ns(Some(XMLNS_NS), name, value);
        }
        if name.starts_with("xml:") {
            return Self::new_ns(Some(XML_NS), name, value);
        }
        if !is_name(name) {
            return Err(Error::invalid_name(name));
        }
        Ok(AttributeDescriptor {
            namespace: None,
            prefix: None,
            local_name: name.to_owned(),
            value: value.into(),
        })
    }

    /// Creates an attribute in `namespace`; `qualified_name` may carry a prefix.
    pub fn new_ns(
        namespace: Option<&str>,
        qualified_name: &str,
        value: impl Into<String>,
    ) -> Result<Self, Error> {
        let e = validate_and_extract(namespace, qualified_name)?;
        Ok(AttributeDescriptor {
            namespace: e.namespace,
            prefix: e.prefix,
            local_name: e.local_name,
            value: value.into(),
        })
    }

    /// True for `xmlns` and `xmlns:*` declarations.
    pub fn is_namespace_declaration(&self) -> bool {
        self.namespace.as_deref() == Some(XMLNS_NS)
    }
}

/// An element, as handed to the writer when its open tag is committed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ElementDescriptor {
    pub namespace: Option<String>,
    pub prefix: Option<String>,
    pub local_name: String,
    pub attributes: Vec<AttributeDescriptor>,
}

impl ElementDescriptor {
    /// Creates an element with no attributes. An empty `namespace` is the
    /// null namespace.
    pub fn new(namespace: Option<&str>, qualified_name: &str) -> Result<Self, Error> {
        let e = validate_and_extract(namespace, qualified_name)?;
        Ok(ElementDescriptor {
            namespace: e.namespace,
            prefix: e.prefix,
            local_name: e.local_name,
            attributes: Vec::new(),
        })
    }

    /// Creates an element along with its initial attributes.
    ///
    /// When `namespace` is `None`, a declaration among `attributes` matching
    /// the name's prefix (`xmlns` for an unprefixed name, `xmlns:p` for
    /// `p:name`) supplies the element's namespace.
    pub fn with_attributes<'a, I>(
        namespace: Option<&str>,
        qualified_name: &str,
        attributes: I,
    ) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let attributes = attributes
            .into_iter()
            .map(|(name, value)| AttributeDescriptor::new(name, value))
            .collect::<Result<Vec<_>, _>>()?;
        let declared = match namespace {
            Some(_) => None,
            None => {
                let wanted = match qualified_name.split_once(':') {
                    Some((prefix, _)) => Some(prefix),
                    None => None,
                };
                attributes
                    .iter()
                    .filter(|a| a.is_namespace_declaration())
                    .find(|a| match wanted {
                        None => a.prefix.is_none(),
                        Some(p) => a.prefix.is_some() && a.local_name == p,
                    })
                    .map(|a| a.value.clone())
            }
        };
        let mut element = Self::new(namespace.or(declared.as_deref()), qualified_name)?;
        element.attributes = attributes;
        Ok(element)
    }

    pub fn push_attribute(&mut self, attribute: AttributeDescriptor) {
        self.attributes.push(attribute);
    }
}

/// Contents of the `<?xml ...?>` declaration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Declaration {
    pub version: String,
    pub encoding: Option<String>,
    pub standalone: Option<bool>,
}

impl Default for Declaration {
    fn default() -> Self {
        Declaration {
            version: "1.0".to_owned(),
            encoding: None,
            standalone: None,
        }
    }
}

impl Declaration {
    #[inline]
    pub fn encoding(self, encoding: impl Into<String>) -> Self {
        Self {
            encoding: Some(encoding.into()),
            ..self
        }
    }

    #[inline]
    pub fn standalone(self, standalone: bool) -> Self {
        Self {
            standalone: Some(standalone),
            ..self
        }
    }

    pub(crate) fn markup(&self) -> String {
        let mut out = format!("<?xml version=\"{}\"", self.version);
        if let Some(encoding) = &self.encoding {
            out.push_str(&format!(" encoding=\"{}\"", encoding));
        }
        if let Some(standalone) = self.standalone {
            out.push_str(if standalone {
                " standalone=\"yes\""
            } else {
                " standalone=\"no\""
            });
        }
        out.push_str("?>");
        out
    }
}

/// A document type declaration; empty identifiers are treated as absent.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DocumentType {
    pub name: String,
    pub public_id: String,
    pub system_id: String,
}

impl DocumentType {
    /// Validates `qualified_name` against the `Name` and `QName` productions.
    pub fn new(
        qualified_name: &str,
        public_id: Option<&str>,
        system_id: Option<&str>,
    ) -> Result<Self, Error> {
        if !is_name(qualified_name) {
            return Err(Error::invalid_name(qualified_name));
        }
        if !is_qname(qualified_name) {
            return Err(Error::invalid_qname(qualified_name));
        }
        Ok(DocumentType {
            name: qualified_name.to_owned(),
            public_id: public_id.unwrap_or_default().to_owned(),
            system_id: system_id.unwrap_or_default().to_owned(),
        })
    }

    pub(crate) fn markup(&self) -> String {
        match (self.public_id.is_empty(), self.system_id.is_empty()) {
            (false, false) => format!(
                "<!DOCTYPE {} PUBLIC \"{}\" \"{}\">",
                self.name, self.public_id, self.system_id
            ),
            (false, true) => format!("<!DOCTYPE {} PUBLIC \"{}\">", self.name, self.public_id),
            (true, false) => format!("<!DOCTYPE {} SYSTEM \"{}\">", self.name, self.system_id),
            (true, true) => format!("<!DOCTYPE {}>", self.name),
        }
    }
}

/// A processing instruction. The target must be a `Name`, and the data may
/// not close the instruction early.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcessingInstruction {
    pub target: String,
    pub data: String,
}

impl ProcessingInstruction {
    pub fn new(target: &str, data: &str) -> Result<Self, Error> {
        if !is_name(target) {
            return Err(Error::invalid_name(target));
        }
        if data.contains("?>") {
            return Err(Error::invalid_character(format!(
                "processing instruction data {:?} contains \"?>\"",
                data
            )));
        }
        Ok(ProcessingInstruction {
            target: target.to_owned(),
            data: data.to_owned(),
        })
    }
}

/// Rejects CDATA content that would terminate the section early.
pub(crate) fn check_cdata(content: &str) -> Result<(), Error> {
    if content.contains("]]>") {
        return Err(Error::invalid_character(format!(
            "CDATA section content {:?} contains \"]]>\"",
            content
        )));
    }
    Ok(())
}

/// Under `well_formed`, doctype identifiers must also be representable.
pub(crate) fn check_doctype_ids(doctype: &DocumentType) -> Result<(), Error> {
    if !crate::name::is_pubid_char(&doctype.public_id) {
        return Err(Error::conformance(
            "DocType public identifier does not match the PubidChar production",
        ));
    }
    if !is_legal_char(&doctype.system_id)
        || (doctype.system_id.contains('"') && doctype.system_id.contains('\''))
    {
        return Err(Error::conformance(
            "DocType system identifier contains invalid characters",
        ));
    }
    Ok(())
}
