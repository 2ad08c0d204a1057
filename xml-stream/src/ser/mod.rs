// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Serialization from node-construction events to XML markup.
//!
//! The namespace handling follows the [DOM Parsing and Serialization XML
//! serialization algorithm](https://w3c.github.io/DOM-Parsing/#xml-serialization),
//! restated for a stream: an element's open tag is committed lazily (when a
//! child arrives, when it is closed, or at the end of the document) so
//! attributes can still be added after [`StreamWriter::open_element`], and
//! each committed open tag saves just enough state to restore its parent's
//! namespace context when it closes.

mod markup;
mod namespaces;
mod sink;

use std::collections::{HashMap, VecDeque};

use log::{debug, trace};

pub use self::markup::{escape_attribute_value, escape_text};
pub use self::namespaces::{LocalNameSet, NamespacePrefixMap, PrefixIndex};
pub use self::sink::{Chunk, ChunkSink, Flow, IoSink, Sink};

use self::markup::Layout;
use crate::name::{is_legal_char, is_name};
use crate::node::{
    check_cdata, check_doctype_ids, AttributeDescriptor, Declaration, DocumentType,
    ElementDescriptor, ProcessingInstruction,
};
use crate::{ExpandedNameRef, HTML_NS, XMLNS_NS, XMLNS_PREFIX, XML_NS, XML_PREFIX};

/// HTML elements which never have content, and so never get an end tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "basefont", "bgsound", "br", "col", "embed", "frame", "hr", "img", "input",
    "keygen", "link", "menuitem", "meta", "param", "source", "track", "wbr",
];

/// The broad class of an [`Error`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// The events don't describe a document: a second document element,
    /// text outside any element, a repeated declaration, and so on.
    Structural,

    /// The output wouldn't be well-formed. Only raised when
    /// [`WriterOptions::well_formed`] is set.
    Conformance,

    /// A name doesn't match the XML `Name` production, or a node's content
    /// can't be represented at all.
    InvalidCharacter,

    /// A name doesn't match `QName`, or its prefix and namespace disagree.
    Namespace,

    /// The [`Sink`] failed.
    Sink,
}

/// An error while serializing. All errors are fatal to the [`StreamWriter`].
///
/// Cloning an `Error` is cheap enough; the writer hands out a clone on every
/// call after the first failure.
#[derive(Clone, Debug)]
pub struct Error {
    kind: ErrorKind,
    msg: String,
}

impl Error {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Error {
            kind,
            msg: msg.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.msg
    }

    pub(crate) fn structural(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Structural, msg)
    }

    pub(crate) fn conformance(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conformance, format!("{} (well-formed required)", msg.into()))
    }

    pub(crate) fn invalid_character(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidCharacter, msg)
    }

    pub(crate) fn invalid_name(name: &str) -> Self {
        Self::invalid_character(format!("invalid XML name: {:?}", name))
    }

    pub(crate) fn invalid_qname(name: &str) -> Self {
        Self::namespace(format!("invalid XML qualified name: {:?}", name))
    }

    pub(crate) fn namespace(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Namespace, msg)
    }

    pub(crate) fn sink(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Sink, msg)
    }

    pub fn multiple_document_elements() -> Self {
        Self::structural("document cannot have multiple document element nodes")
    }

    pub fn no_current_element(what: &str) -> Self {
        Self::structural(format!("cannot insert {} as child of a document node", what))
    }

    pub fn duplicate_attribute(name: &ExpandedNameRef) -> Self {
        Self::conformance(format!("element contains duplicate attribute {}", name))
    }
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        self.msg.fmt(f)
    }
}

/// Configuration for a [`StreamWriter`].
#[derive(Clone, Debug)]
pub struct WriterOptions {
    /// Reject anything that wouldn't produce a well-formed document.
    pub well_formed: bool,

    /// Put each node on its own line, indented by nesting level.
    pub pretty_print: bool,

    /// One level of indentation.
    pub indent: String,

    pub newline: String,

    /// Indentation levels added to every line.
    pub offset: usize,

    /// Wrap attributes which would extend a line past this many characters;
    /// 0 is unlimited. Only applies when pretty-printing.
    pub width: usize,

    /// Write childless elements as `<a></a>` rather than `<a/>`.
    pub allow_empty_tags: bool,

    /// Write childless elements as `<a />` rather than `<a/>`.
    pub space_before_slash: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        WriterOptions {
            well_formed: false,
            pretty_print: false,
            indent: "  ".to_owned(),
            newline: "\n".to_owned(),
            offset: 0,
            width: 0,
            allow_empty_tags: false,
            space_before_slash: false,
        }
    }
}

impl WriterOptions {
    #[inline]
    pub fn well_formed(self, well_formed: bool) -> Self {
        Self {
            well_formed,
            ..self
        }
    }

    #[inline]
    pub fn pretty_print(self, pretty_print: bool) -> Self {
        Self {
            pretty_print,
            ..self
        }
    }

    #[inline]
    pub fn indent(self, indent: impl Into<String>) -> Self {
        Self {
            indent: indent.into(),
            ..self
        }
    }

    #[inline]
    pub fn newline(self, newline: impl Into<String>) -> Self {
        Self {
            newline: newline.into(),
            ..self
        }
    }

    #[inline]
    pub fn offset(self, offset: usize) -> Self {
        Self { offset, ..self }
    }

    #[inline]
    pub fn width(self, width: usize) -> Self {
        Self { width, ..self }
    }

    #[inline]
    pub fn allow_empty_tags(self, allow_empty_tags: bool) -> Self {
        Self {
            allow_empty_tags,
            ..self
        }
    }

    #[inline]
    pub fn space_before_slash(self, space_before_slash: bool) -> Self {
        Self {
            space_before_slash,
            ..self
        }
    }
}

/// Saved state for one committed, not yet closed element.
#[derive(Debug)]
struct OpenTag {
    /// Reused verbatim for the end tag.
    qualified_name: String,

    /// The inherited namespace before this element opened.
    saved_namespace: Option<String>,

    /// The prefix map before this element opened, iff this element changed it.
    saved_map: Option<NamespacePrefixMap>,

    /// False iff the open tag was already written in self-closing form.
    has_children: bool,
}

/// Writes one XML document to a [`Sink`], one event at a time.
///
/// Each event method returns `&mut Self` so calls chain with `?`. The first
/// error poisons the writer: it and every later call fail with the same
/// error, and no markup for the failing event reaches the sink.
#[derive(Debug)]
pub struct StreamWriter<S: Sink> {
    sink: S,
    options: WriterOptions,

    /// Chunks produced while the sink is paused.
    backlog: VecDeque<Chunk>,
    paused: bool,

    /// When `Some`, all future events should fail with this error.
    poison: Option<Error>,
    ended: bool,

    has_data: bool,
    has_declaration: bool,
    doctype_name: Option<String>,
    has_document_element: bool,

    /// The most recently opened element, until its open tag is committed.
    pending: Option<ElementDescriptor>,

    /// Committed elements; the length is the nesting level.
    open_tags: Vec<OpenTag>,

    namespace: Option<String>,
    prefix_map: NamespacePrefixMap,
    prefix_index: PrefixIndex,
}

impl<S: Sink> StreamWriter<S> {
    pub fn new(sink: S, options: WriterOptions) -> Self {
        StreamWriter {
            sink,
            options,
            backlog: VecDeque::new(),
            paused: false,
            poison: None,
            ended: false,
            has_data: false,
            has_declaration: false,
            doctype_name: None,
            has_document_element: false,
            pending: None,
            open_tags: Vec::new(),
            namespace: None,
            prefix_map: NamespacePrefixMap::new(),
            prefix_index: PrefixIndex::default(),
        }
    }

    pub fn options(&self) -> &WriterOptions {
        &self.options
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// The number of committed elements not yet closed.
    pub fn level(&self) -> usize {
        self.open_tags.len()
    }

    /// True iff the sink asked for a pause and [`StreamWriter::resume`]
    /// hasn't yet emptied the backlog.
    ///
    /// Events are still accepted while paused, but their chunks are held in
    /// memory without limit. Callers should stop sending events until the
    /// sink drains and `resume` returns with `is_paused()` false.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// The number of chunks held back since the sink paused.
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Replays chunks held back while the sink was paused, until the sink
    /// pauses again or the backlog is empty.
    pub fn resume(&mut self) -> Result<(), Error> {
        if let Some(ref poison) = self.poison {
            return Err(poison.clone());
        }
        debug!("resuming with {} chunk(s) held back", self.backlog.len());
        self.paused = false;
        while let Some(chunk) = self.backlog.pop_front() {
            match self.sink.push(chunk) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Pause) => {
                    debug!("sink paused with {} chunk(s) held back", self.backlog.len());
                    self.paused = true;
                    break;
                }
                Err(e) => {
                    self.poison = Some(e.clone());
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Writes the `<?xml ...?>` declaration.
    pub fn declaration(&mut self, declaration: &Declaration) -> Result<&mut Self, Error> {
        self.event(|w| {
            if w.has_declaration {
                return Err(Error::structural("XML declaration is already inserted"));
            }
            w.commit_open_tag(true)?;
            let markup = w.begin_line() + &declaration.markup();
            w.add_data(markup)?;
            w.has_declaration = true;
            Ok(())
        })
    }

    /// Writes a `<!DOCTYPE ...>` declaration; empty or absent identifiers
    /// are omitted.
    pub fn doctype(
        &mut self,
        name: &str,
        public_id: Option<&str>,
        system_id: Option<&str>,
    ) -> Result<&mut Self, Error> {
        self.event(|w| {
            let doctype = DocumentType::new(name, public_id, system_id)?;
            w.write_doctype(&doctype)
        })
    }

    /// Starts a document: the optional doctype, then the document element
    /// unless `qualified_name` is empty.
    pub fn begin_document(
        &mut self,
        namespace: Option<&str>,
        qualified_name: &str,
        doctype: Option<&DocumentType>,
    ) -> Result<&mut Self, Error> {
        self.event(|w| {
            if let Some(doctype) = doctype {
                w.write_doctype(doctype)?;
            }
            if !qualified_name.is_empty() {
                let element = ElementDescriptor::new(namespace, qualified_name)?;
                w.start_element(element)?;
            }
            Ok(())
        })
    }

    /// Opens an element. An empty `namespace` is the null namespace.
    pub fn open_element(
        &mut self,
        namespace: Option<&str>,
        qualified_name: &str,
    ) -> Result<&mut Self, Error> {
        self.open_element_with(namespace, qualified_name, std::iter::empty())
    }

    /// Opens an element with initial attributes, as by
    /// [`StreamWriter::attribute`]. If `namespace` is `None`, a matching
    /// `xmlns` or `xmlns:prefix` attribute supplies it.
    pub fn open_element_with<'a, I>(
        &mut self,
        namespace: Option<&str>,
        qualified_name: &str,
        attributes: I,
    ) -> Result<&mut Self, Error>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        self.event(move |w| {
            let element =
                ElementDescriptor::with_attributes(namespace, qualified_name, attributes)?;
            w.start_element(element)
        })
    }

    /// Adds an attribute to the element just opened.
    ///
    /// `xmlns`/`xmlns:*` names declare namespaces and `xml:*` names are in the
    /// XML namespace; any other name is un-namespaced.
    pub fn attribute(&mut self, name: &str, value: &str) -> Result<&mut Self, Error> {
        self.event(|w| {
            let attribute = AttributeDescriptor::new(name, value)?;
            w.add_attribute(attribute)
        })
    }

    /// Adds several attributes to the element just opened, in order.
    pub fn attributes<'a, I>(&mut self, attributes: I) -> Result<&mut Self, Error>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        self.event(move |w| {
            for (name, value) in attributes {
                let attribute = AttributeDescriptor::new(name, value)?;
                w.add_attribute(attribute)?;
            }
            Ok(())
        })
    }

    /// Adds an attribute in `namespace` to the element just opened.
    pub fn attribute_ns(
        &mut self,
        namespace: Option<&str>,
        qualified_name: &str,
        value: &str,
    ) -> Result<&mut Self, Error> {
        self.event(|w| {
            let attribute = AttributeDescriptor::new_ns(namespace, qualified_name, value)?;
            w.add_attribute(attribute)
        })
    }

    pub fn text(&mut self, content: &str) -> Result<&mut Self, Error> {
        self.event(|w| {
            if w.pending.is_none() && w.open_tags.is_empty() {
                return Err(Error::no_current_element("a text node"));
            }
            if w.options.well_formed && !is_legal_char(content) {
                return Err(Error::conformance("text data contains invalid characters"));
            }
            w.commit_open_tag(true)?;
            let markup = w.begin_line() + &escape_text(content);
            trace!("text at level {}", w.level());
            w.add_data(markup)
        })
    }

    pub fn comment(&mut self, content: &str) -> Result<&mut Self, Error> {
        self.event(|w| {
            if w.options.well_formed
                && (!is_legal_char(content) || content.contains("--") || content.ends_with('-'))
            {
                return Err(Error::conformance("comment data contains invalid characters"));
            }
            w.commit_open_tag(true)?;
            let markup = format!("{}<!--{}-->", w.begin_line(), content);
            trace!("comment at level {}", w.level());
            w.add_data(markup)
        })
    }

    pub fn processing_instruction(&mut self, target: &str, data: &str) -> Result<&mut Self, Error> {
        self.event(|w| {
            let pi = ProcessingInstruction::new(target, data)?;
            if w.options.well_formed
                && (pi.target.contains(':') || pi.target.eq_ignore_ascii_case(XML_PREFIX))
            {
                return Err(Error::conformance(
                    "processing instruction target contains invalid characters",
                ));
            }
            if w.options.well_formed && !is_legal_char(&pi.data) {
                return Err(Error::conformance(
                    "processing instruction data contains invalid characters",
                ));
            }
            w.commit_open_tag(true)?;
            let markup = format!("{}<?{} {}?>", w.begin_line(), pi.target, pi.data);
            trace!("processing instruction {} at level {}", pi.target, w.level());
            w.add_data(markup)
        })
    }

    pub fn cdata(&mut self, content: &str) -> Result<&mut Self, Error> {
        self.event(|w| {
            check_cdata(content)?;
            w.commit_open_tag(true)?;
            let markup = format!("{}<![CDATA[{}]]>", w.begin_line(), content);
            trace!("CDATA section at level {}", w.level());
            w.add_data(markup)
        })
    }

    /// Closes the innermost open element.
    pub fn close_element(&mut self) -> Result<&mut Self, Error> {
        self.event(|w| {
            w.commit_open_tag(false)?;
            w.close_tag()
        })
    }

    /// Closes all open elements and signals the end of the document.
    pub fn end_document(&mut self) -> Result<&mut Self, Error> {
        self.event(|w| {
            w.commit_open_tag(false)?;
            while !w.open_tags.is_empty() {
                w.close_tag()?;
            }
            w.push(Chunk::End)?;
            w.ended = true;
            Ok(())
        })
    }

    /// Runs one event, poisoning the writer on failure.
    fn event<F>(&mut self, f: F) -> Result<&mut Self, Error>
    where
        F: FnOnce(&mut Self) -> Result<(), Error>,
    {
        if let Some(ref poison) = self.poison {
            return Err(poison.clone());
        }
        if self.ended {
            return Err(Error::structural("document has already ended"));
        }
        if let Err(e) = f(self) {
            debug!("poisoning writer: {}", e);
            self.poison = Some(e.clone());
            return Err(e);
        }
        Ok(self)
    }

    fn write_doctype(&mut self, doctype: &DocumentType) -> Result<(), Error> {
        if self.doctype_name.is_some() {
            return Err(Error::structural("DocType declaration is already inserted"));
        }
        if self.has_document_element {
            return Err(Error::structural(
                "cannot insert DocType declaration after document element",
            ));
        }
        if self.options.well_formed {
            check_doctype_ids(doctype)?;
        }
        let markup = self.begin_line() + &doctype.markup();
        trace!("doctype {}", doctype.name);
        self.add_data(markup)?;
        self.doctype_name = Some(doctype.name.clone());
        Ok(())
    }

    fn start_element(&mut self, element: ElementDescriptor) -> Result<(), Error> {
        if self.has_document_element && self.pending.is_none() && self.open_tags.is_empty() {
            return Err(Error::multiple_document_elements());
        }
        self.commit_open_tag(true)?;
        self.pending = Some(element);
        self.has_document_element = true;
        Ok(())
    }

    fn add_attribute(&mut self, attribute: AttributeDescriptor) -> Result<(), Error> {
        match self.pending.as_mut() {
            Some(element) => {
                element.push_attribute(attribute);
                Ok(())
            }
            None => Err(Error::no_current_element("an attribute node")),
        }
    }

    fn begin_line(&self) -> String {
        Layout(&self.options).begin_line(self.has_data, self.open_tags.len())
    }

    fn add_data(&mut self, markup: String) -> Result<(), Error> {
        if markup.is_empty() {
            return Ok(());
        }
        self.has_data = true;
        self.push(Chunk::Markup(markup))
    }

    fn push(&mut self, chunk: Chunk) -> Result<(), Error> {
        if self.paused {
            self.backlog.push_back(chunk);
            return Ok(());
        }
        if self.sink.push(chunk)? == Flow::Pause {
            debug!("sink paused");
            self.paused = true;
        }
        Ok(())
    }

    /// Appends ` name="value"`, or wraps it onto its own line if it would
    /// overflow the configured width.
    fn write_attribute(
        &self,
        out: &mut String,
        name: &str,
        value: Option<&str>,
    ) -> Result<(), Error> {
        let value = value.unwrap_or_default();
        if self.options.well_formed && !is_legal_char(value) {
            return Err(Error::conformance("invalid characters in attribute value"));
        }
        let attribute = format!("{}=\"{}\"", name, escape_attribute_value(value));
        let layout = Layout(&self.options);
        if layout.wraps(out, &attribute) {
            out.push_str(&self.options.newline);
            out.push_str(&layout.indent(self.options.offset + self.open_tags.len() + 1));
        } else {
            out.push(' ');
        }
        out.push_str(&attribute);
        Ok(())
    }

    /// Writes the pending element's open tag, if there is one.
    fn commit_open_tag(&mut self, has_children: bool) -> Result<(), Error> {
        let node = match self.pending.take() {
            None => return Ok(()),
            Some(n) => n,
        };
        let well_formed = self.options.well_formed;
        if well_formed && (node.local_name.contains(':') || !is_name(&node.local_name)) {
            return Err(Error::conformance(format!(
                "element local name {:?} contains invalid characters",
                node.local_name
            )));
        }

        let mut markup = self.begin_line();
        markup.push('<');
        let mut map = self.prefix_map.clone();
        let mut local_prefixes = HashMap::new();
        let local_default_namespace =
            record_namespace_information(&node, well_formed, &mut map, &mut local_prefixes)?;
        let mut inherited_ns = self.namespace.clone();
        let ns = node.namespace.as_deref();
        let mut ignore_namespace_definition_attribute = false;
        let qualified_name;

        if inherited_ns.as_deref() == ns {
            if local_default_namespace.is_some() {
                ignore_namespace_definition_attribute = true;
            }
            qualified_name = if ns == Some(XML_NS) {
                format!("{}:{}", XML_PREFIX, node.local_name)
            } else {
                node.local_name.clone()
            };
            markup.push_str(&qualified_name);
        } else {
            let mut candidate = map.get(node.prefix.as_deref(), ns).map(str::to_owned);
            if node.prefix.as_deref() == Some(XMLNS_PREFIX) {
                if well_formed {
                    return Err(Error::conformance("an element cannot have the xmlns prefix"));
                }
                candidate = node.prefix.clone();
            }

            if let Some(candidate) = candidate {
                qualified_name = format!("{}:{}", candidate, node.local_name);
                if let Some(d) = local_default_namespace.as_deref() {
                    if d != XML_NS {
                        inherited_ns = non_empty(d);
                    }
                }
                markup.push_str(&qualified_name);
            } else if let Some(prefix) = node.prefix.as_deref() {
                let prefix = if local_prefixes.contains_key(prefix) {
                    self.prefix_index.generate(ns, &mut map)
                } else {
                    prefix.to_owned()
                };
                map.set(&prefix, ns);
                qualified_name = format!("{}:{}", prefix, node.local_name);
                markup.push_str(&qualified_name);
                self.write_attribute(&mut markup, &format!("xmlns:{}", prefix), ns)?;
                if let Some(d) = local_default_namespace.as_deref() {
                    inherited_ns = non_empty(d);
                }
            } else if local_default_namespace.is_none()
                || local_default_namespace.as_deref() != ns
            {
                ignore_namespace_definition_attribute = true;
                qualified_name = node.local_name.clone();
                inherited_ns = ns.map(str::to_owned);
                markup.push_str(&qualified_name);
                self.write_attribute(&mut markup, XMLNS_PREFIX, ns)?;
            } else {
                qualified_name = node.local_name.clone();
                inherited_ns = ns.map(str::to_owned);
                markup.push_str(&qualified_name);
            }
        }

        self.write_attributes(
            &node,
            &mut markup,
            &mut map,
            &local_prefixes,
            ignore_namespace_definition_attribute,
        )?;

        if !has_children {
            let is_html = ns == Some(HTML_NS);
            if is_html && VOID_ELEMENTS.contains(&node.local_name.as_str()) {
                markup.push_str(" /");
            } else if is_html || self.options.allow_empty_tags {
                markup.push_str("></");
                markup.push_str(&qualified_name);
            } else if self.options.space_before_slash {
                markup.push_str(" /");
            } else {
                markup.push('/');
            }
        }
        markup.push('>');
        trace!(
            "open tag <{}> at level {}, has_children={}",
            qualified_name,
            self.level(),
            has_children
        );
        self.add_data(markup)?;

        let saved_map = if map != self.prefix_map {
            Some(std::mem::replace(&mut self.prefix_map, map))
        } else {
            None
        };
        let saved_namespace = std::mem::replace(&mut self.namespace, inherited_ns);
        self.open_tags.push(OpenTag {
            qualified_name,
            saved_namespace,
            saved_map,
            has_children,
        });
        Ok(())
    }

    fn write_attributes(
        &mut self,
        node: &ElementDescriptor,
        out: &mut String,
        map: &mut NamespacePrefixMap,
        local_prefixes: &HashMap<String, String>,
        ignore_namespace_definition_attribute: bool,
    ) -> Result<(), Error> {
        let well_formed = self.options.well_formed;
        let mut local_names = LocalNameSet::default();
        for attr in &node.attributes {
            if !well_formed && attr.namespace.is_none() {
                self.write_attribute(out, &attr.local_name, Some(&attr.value))?;
                continue;
            }
            if well_formed {
                let name = ExpandedNameRef {
                    namespace: attr.namespace.as_deref(),
                    local_name: &attr.local_name,
                };
                if !local_names.insert(name) {
                    return Err(Error::duplicate_attribute(&name));
                }
            }

            let mut candidate = None;
            if let Some(attr_ns) = attr.namespace.as_deref() {
                candidate = map.get(attr.prefix.as_deref(), Some(attr_ns)).map(str::to_owned);
                if attr_ns == XMLNS_NS {
                    let redundant = attr.value == XML_NS
                        || rebinds_reserved_prefix(attr)
                        || (attr.prefix.is_none() && ignore_namespace_definition_attribute)
                        || (attr.prefix.is_some()
                            && local_prefixes.get(&attr.local_name) != Some(&attr.value)
                            && map.has(&attr.local_name, Some(attr.value.as_str())));
                    if redundant {
                        continue;
                    }
                    if well_formed && attr.value == XMLNS_NS {
                        return Err(Error::conformance("the XMLNS namespace is reserved"));
                    }
                    if well_formed && attr.value.is_empty() {
                        return Err(Error::conformance(
                            "namespace prefix declarations cannot be used to undeclare a namespace",
                        ));
                    }
                    if attr.prefix.as_deref() == Some(XMLNS_PREFIX) {
                        candidate = Some(XMLNS_PREFIX.to_owned());
                    }
                } else if candidate.is_none() {
                    // A declaration is synthesized whenever no prefix is in
                    // scope; the attribute's own prefix is kept if it's free.
                    let own = attr
                        .prefix
                        .as_deref()
                        .filter(|p| !map.has_prefix(p) || map.has(p, Some(attr_ns)));
                    let prefix = match own {
                        Some(p) => {
                            map.set(p, Some(attr_ns));
                            p.to_owned()
                        }
                        None => self.prefix_index.generate(Some(attr_ns), map),
                    };
                    self.write_attribute(out, &format!("xmlns:{}", prefix), Some(attr_ns))?;
                    candidate = Some(prefix);
                }
            }

            if well_formed
                && (attr.local_name.contains(':')
                    || !is_name(&attr.local_name)
                    || (attr.local_name == XMLNS_PREFIX && attr.namespace.is_none()))
            {
                return Err(Error::conformance(format!(
                    "attribute local name {:?} contains invalid characters",
                    attr.local_name
                )));
            }
            let name = match candidate {
                Some(c) => format!("{}:{}", c, attr.local_name),
                None => attr.local_name.clone(),
            };
            self.write_attribute(out, &name, Some(&attr.value))?;
        }
        Ok(())
    }

    fn close_tag(&mut self) -> Result<(), Error> {
        let tag = self
            .open_tags
            .pop()
            .ok_or_else(|| Error::structural("there is no open element to close"))?;
        self.namespace = tag.saved_namespace;
        if let Some(map) = tag.saved_map {
            self.prefix_map = map;
        }
        if !tag.has_children {
            return Ok(());
        }
        trace!("close tag </{}> at level {}", tag.qualified_name, self.level());
        let markup = format!("{}</{}>", self.begin_line(), tag.qualified_name);
        self.add_data(markup)
    }
}

/// True for `xmlns:xml` bound to anything but the XML namespace, and for any
/// `xmlns:xmlns`. Neither prefix can be redeclared.
fn rebinds_reserved_prefix(attr: &AttributeDescriptor) -> bool {
    attr.prefix.is_some()
        && ((attr.local_name == XML_PREFIX && attr.value != XML_NS)
            || attr.local_name == XMLNS_PREFIX)
}

/// Folds the element's own `xmlns:*` declarations into `map`, returning the
/// value of its `xmlns` attribute, if any.
///
/// Declarations rebinding `xml` or `xmlns` are dropped, or rejected under
/// `well_formed`.
fn record_namespace_information(
    node: &ElementDescriptor,
    well_formed: bool,
    map: &mut NamespacePrefixMap,
    local_prefixes: &mut HashMap<String, String>,
) -> Result<Option<String>, Error> {
    let mut default_namespace = None;
    for attr in node.attributes.iter().filter(|a| a.is_namespace_declaration()) {
        if attr.prefix.is_none() {
            default_namespace = Some(attr.value.clone());
            continue;
        }
        if rebinds_reserved_prefix(attr) {
            if well_formed {
                return Err(Error::conformance(format!(
                    "the {} prefix cannot be rebound to {:?}",
                    attr.local_name, attr.value
                )));
            }
            debug!("dropping declaration of reserved prefix {}", attr.local_name);
            continue;
        }
        if attr.value == XML_NS {
            continue;
        }
        let namespace = non_empty(&attr.value);
        if map.has(&attr.local_name, namespace.as_deref()) {
            continue;
        }
        map.set(&attr.local_name, namespace.as_deref());
        local_prefixes.insert(attr.local_name.clone(), attr.value.clone());
    }
    Ok(default_namespace)
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn write<F>(options: WriterOptions, f: F) -> Result<String, Error>
    where
        F: FnOnce(&mut StreamWriter<&mut String>) -> Result<(), Error>,
    {
        let mut out = String::new();
        let mut w = StreamWriter::new(&mut out, options);
        f(&mut w)?;
        drop(w);
        Ok(out)
    }

    #[test]
    fn attribute_on_root() {
        let _ = env_logger::Builder::new().is_test(true).try_init();
        let out = write(WriterOptions::default(), |w| {
            w.open_element(None, "root")?
                .attribute("a", "1")?
                .close_element()?
                .end_document()?;
            Ok(())
        })
        .unwrap();
        assert_eq!(out, r#"<root a="1"/>"#);
    }

    #[test]
    fn default_namespace_declared() {
        let _ = env_logger::Builder::new().is_test(true).try_init();
        let out = write(WriterOptions::default(), |w| {
            w.open_element(Some("urn:x"), "root")?
                .close_element()?
                .end_document()?;
            Ok(())
        })
        .unwrap();
        assert_eq!(out, r#"<root xmlns="urn:x"/>"#);
    }

    #[test]
    fn pretty_nested() {
        let _ = env_logger::Builder::new().is_test(true).try_init();
        let out = write(WriterOptions::default().pretty_print(true), |w| {
            w.open_element(None, "a")?
                .open_element(None, "b")?
                .close_element()?
                .close_element()?
                .end_document()?;
            Ok(())
        })
        .unwrap();
        assert_eq!(out, "<a>\n  <b/>\n</a>");
    }

    #[test]
    fn prefixed_element_declares_once() {
        let _ = env_logger::Builder::new().is_test(true).try_init();
        let out = write(WriterOptions::default(), |w| {
            w.open_element(Some("urn:p"), "p:root")?
                .open_element(Some("urn:p"), "p:child")?
                .end_document()?;
            Ok(())
        })
        .unwrap();
        assert_eq!(out, r#"<p:root xmlns:p="urn:p"><p:child/></p:root>"#);
    }

    #[test]
    fn siblings_dont_leak_bindings() {
        let _ = env_logger::Builder::new().is_test(true).try_init();
        let out = write(WriterOptions::default(), |w| {
            w.open_element(None, "root")?
                .open_element(Some("urn:a"), "a:x")?
                .close_element()?
                .open_element(Some("urn:b"), "a:y")?
                .close_element()?
                .end_document()?;
            Ok(())
        })
        .unwrap();
        assert_eq!(out, r#"<root><a:x xmlns:a="urn:a"/><a:y xmlns:a="urn:b"/></root>"#);
    }

    #[test]
    fn null_namespace_child_undeclares_default() {
        let _ = env_logger::Builder::new().is_test(true).try_init();
        let out = write(WriterOptions::default(), |w| {
            w.open_element(Some("urn:x"), "root")?
                .open_element(None, "child")?
                .end_document()?;
            Ok(())
        })
        .unwrap();
        assert_eq!(out, r#"<root xmlns="urn:x"><child xmlns=""/></root>"#);
    }

    #[test]
    fn explicit_default_declaration_not_repeated() {
        let _ = env_logger::Builder::new().is_test(true).try_init();
        let out = write(WriterOptions::default(), |w| {
            w.open_element_with(None, "root", [("xmlns", "urn:x")])?
                .open_element_with(Some("urn:x"), "child", [("xmlns", "urn:x")])?
                .end_document()?;
            Ok(())
        })
        .unwrap();
        assert_eq!(out, r#"<root xmlns="urn:x"><child/></root>"#);
    }

    #[test]
    fn attribute_namespace_gets_generated_prefix() {
        let _ = env_logger::Builder::new().is_test(true).try_init();
        let out = write(WriterOptions::default(), |w| {
            w.open_element(None, "root")?
                .attribute_ns(Some("urn:x"), "a", "1")?
                .attribute_ns(Some("urn:y"), "b", "2")?
                .open_element(None, "child")?
                .attribute_ns(Some("urn:x"), "c", "3")?
                .end_document()?;
            Ok(())
        })
        .unwrap();
        assert_eq!(
            out,
            concat!(
                r#"<root xmlns:ns1="urn:x" ns1:a="1" xmlns:ns2="urn:y" ns2:b="2">"#,
                r#"<child ns1:c="3"/></root>"#
            )
        );
    }

    #[test]
    fn attribute_prefix_declared_once() {
        let _ = env_logger::Builder::new().is_test(true).try_init();
        let out = write(WriterOptions::default(), |w| {
            w.open_element(None, "root")?
                .attribute_ns(Some("urn:p"), "p:a", "1")?
                .attribute_ns(Some("urn:p"), "p:b", "2")?
                .end_document()?;
            Ok(())
        })
        .unwrap();
        assert_eq!(out, r#"<root xmlns:p="urn:p" p:a="1" p:b="2"/>"#);
    }

    #[test]
    fn locally_claimed_prefix_is_renamed() {
        let _ = env_logger::Builder::new().is_test(true).try_init();
        let out = write(WriterOptions::default(), |w| {
            w.open_element_with(Some("urn:p"), "p:root", [("xmlns:p", "urn:other")])?
                .end_document()?;
            Ok(())
        })
        .unwrap();
        assert_eq!(out, r#"<ns1:root xmlns:ns1="urn:p" xmlns:p="urn:other"/>"#);
    }

    #[test]
    fn xml_namespace_attribute() {
        let _ = env_logger::Builder::new().is_test(true).try_init();
        let out = write(WriterOptions::default(), |w| {
            w.open_element(None, "root")?
                .attribute("xml:lang", "en")?
                .end_document()?;
            Ok(())
        })
        .unwrap();
        assert_eq!(out, r#"<root xml:lang="en"/>"#);
    }

    #[test]
    fn empty_tag_forms() {
        let _ = env_logger::Builder::new().is_test(true).try_init();
        fn doc(w: &mut StreamWriter<&mut String>) -> Result<(), Error> {
            w.open_element(None, "root")?.end_document()?;
            Ok(())
        }
        assert_eq!(write(WriterOptions::default(), doc).unwrap(), "<root/>");
        assert_eq!(
            write(WriterOptions::default().space_before_slash(true), doc).unwrap(),
            "<root />"
        );
        assert_eq!(
            write(WriterOptions::default().allow_empty_tags(true), doc).unwrap(),
            "<root></root>"
        );
    }

    #[test]
    fn html_void_elements() {
        let _ = env_logger::Builder::new().is_test(true).try_init();
        let out = write(WriterOptions::default(), |w| {
            w.open_element(Some(HTML_NS), "div")?
                .open_element(Some(HTML_NS), "br")?
                .close_element()?
                .open_element(Some(HTML_NS), "span")?
                .end_document()?;
            Ok(())
        })
        .unwrap();
        assert_eq!(out, r#"<div xmlns="http://www.w3.org/1999/xhtml"><br /><span></span></div>"#);
    }

    #[test]
    fn leaf_nodes() {
        let _ = env_logger::Builder::new().is_test(true).try_init();
        let out = write(WriterOptions::default(), |w| {
            w.declaration(&Declaration::default().encoding("UTF-8"))?
                .doctype("root", None, Some("root.dtd"))?
                .comment("top")?
                .open_element(None, "root")?
                .text("a & b <c>")?
                .cdata("<raw & stuff>")?
                .processing_instruction("pi", "data")?
                .end_document()?;
            Ok(())
        })
        .unwrap();
        assert_eq!(
            out,
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8"?><!DOCTYPE root SYSTEM "root.dtd">"#,
                "<!--top--><root>a &amp; b &lt;c&gt;<![CDATA[<raw & stuff>]]><?pi data?></root>"
            )
        );
    }

    #[test]
    fn width_wraps_attributes() {
        let _ = env_logger::Builder::new().is_test(true).try_init();
        let options = WriterOptions::default().pretty_print(true).width(20);
        let out = write(options, |w| {
            w.open_element(None, "root")?
                .attribute("first", "1")?
                .attribute("second", "2")?
                .attribute("t", "3")?
                .end_document()?;
            Ok(())
        })
        .unwrap();
        assert_eq!(out, "<root first=\"1\"\n  second=\"2\" t=\"3\"/>");
    }

    #[test]
    fn duplicate_declaration() {
        let _ = env_logger::Builder::new().is_test(true).try_init();
        let e = write(WriterOptions::default(), |w| {
            w.declaration(&Declaration::default())?
                .declaration(&Declaration::default())?;
            Ok(())
        })
        .unwrap_err();
        assert_matches!(e.kind(), ErrorKind::Structural);
    }

    #[test]
    fn bad_comment_emits_nothing_and_poisons() {
        let _ = env_logger::Builder::new().is_test(true).try_init();
        let mut out = String::new();
        let mut w = StreamWriter::new(&mut out, WriterOptions::default().well_formed(true));
        let e = w.comment("--bad--").unwrap_err();
        assert_matches!(e.kind(), ErrorKind::Conformance);
        let again = w.open_element(None, "root").unwrap_err();
        assert_eq!(again.message(), e.message());
        drop(w);
        assert_eq!(out, "");
    }

    #[test]
    fn multiple_document_elements() {
        let _ = env_logger::Builder::new().is_test(true).try_init();
        let mut out = String::new();
        let mut w = StreamWriter::new(&mut out, WriterOptions::default());
        w.open_element(None, "a").unwrap().close_element().unwrap();
        let e = w.open_element(None, "b").unwrap_err();
        assert_matches!(e.kind(), ErrorKind::Structural);
        drop(w);
        assert_eq!(out, "<a/>");
    }

    #[test]
    fn events_outside_elements() {
        let _ = env_logger::Builder::new().is_test(true).try_init();
        let mut out = String::new();
        let mut w = StreamWriter::new(&mut out, WriterOptions::default());
        assert_matches!(w.text("x").unwrap_err().kind(), ErrorKind::Structural);

        let mut w = StreamWriter::new(String::new(), WriterOptions::default());
        assert_matches!(w.attribute("a", "1").unwrap_err().kind(), ErrorKind::Structural);

        let mut w = StreamWriter::new(String::new(), WriterOptions::default());
        assert_matches!(w.close_element().unwrap_err().kind(), ErrorKind::Structural);

        let mut w = StreamWriter::new(String::new(), WriterOptions::default());
        w.open_element(None, "a").unwrap().text("x").unwrap();
        assert_matches!(w.attribute("b", "1").unwrap_err().kind(), ErrorKind::Structural);
    }

    #[test]
    fn events_after_end() {
        let _ = env_logger::Builder::new().is_test(true).try_init();
        let mut w = StreamWriter::new(ChunkSink::new(), WriterOptions::default());
        w.open_element(None, "a").unwrap().end_document().unwrap();
        assert!(w.sink().is_ended());
        assert_matches!(w.end_document().unwrap_err().kind(), ErrorKind::Structural);
        assert_eq!(w.sink().concat(), "<a/>");
    }

    #[test]
    fn doctype_rules() {
        let _ = env_logger::Builder::new().is_test(true).try_init();
        let mut w = StreamWriter::new(String::new(), WriterOptions::default());
        w.doctype("html", None, None).unwrap();
        assert_matches!(w.doctype("html", None, None).unwrap_err().kind(), ErrorKind::Structural);

        let mut w = StreamWriter::new(String::new(), WriterOptions::default());
        w.open_element(None, "html").unwrap();
        assert_matches!(w.doctype("html", None, None).unwrap_err().kind(), ErrorKind::Structural);

        let mut w = StreamWriter::new(String::new(), WriterOptions::default().well_formed(true));
        assert_matches!(
            w.doctype("html", Some("bad\"id"), None).unwrap_err().kind(),
            ErrorKind::Conformance
        );

        let mut w = StreamWriter::new(String::new(), WriterOptions::default().well_formed(true));
        assert_matches!(
            w.doctype("html", None, Some("it's \"quoted\"")).unwrap_err().kind(),
            ErrorKind::Conformance
        );
    }

    #[test]
    fn begin_document() {
        let _ = env_logger::Builder::new().is_test(true).try_init();
        let doctype = DocumentType::new("svg", None, None).unwrap();
        let out = write(WriterOptions::default(), |w| {
            w.begin_document(Some("http://www.w3.org/2000/svg"), "svg", Some(&doctype))?
                .end_document()?;
            Ok(())
        })
        .unwrap();
        assert_eq!(out, r#"<!DOCTYPE svg><svg xmlns="http://www.w3.org/2000/svg"/>"#);
    }

    #[test]
    fn well_formed_element_checks() {
        let _ = env_logger::Builder::new().is_test(true).try_init();
        let options = WriterOptions::default().well_formed(true);

        let e = write(options.clone(), |w| {
            w.open_element(Some(XMLNS_NS), "xmlns:foo")?.end_document()?;
            Ok(())
        })
        .unwrap_err();
        assert_matches!(e.kind(), ErrorKind::Conformance);

        let e = write(options.clone(), |w| {
            w.open_element(None, "root")?
                .attribute_ns(Some("urn:x"), "p:a", "1")?
                .attribute_ns(Some("urn:x"), "q:a", "2")?
                .end_document()?;
            Ok(())
        })
        .unwrap_err();
        assert_matches!(e.kind(), ErrorKind::Conformance);

        let e = write(options.clone(), |w| {
            w.open_element(None, "root")?
                .attribute("a", "bell\u{7}")?
                .end_document()?;
            Ok(())
        })
        .unwrap_err();
        assert_matches!(e.kind(), ErrorKind::Conformance);

        let e = write(options.clone(), |w| {
            w.open_element(None, "root")?
                .attribute("xmlns:p", "")?
                .end_document()?;
            Ok(())
        })
        .unwrap_err();
        assert_matches!(e.kind(), ErrorKind::Conformance);

        let e = write(options, |w| {
            w.open_element(None, "root")?
                .attribute("xmlns:p", XMLNS_NS)?
                .end_document()?;
            Ok(())
        })
        .unwrap_err();
        assert_matches!(e.kind(), ErrorKind::Conformance);
    }

    #[test]
    fn lenient_mode_keeps_going() {
        let _ = env_logger::Builder::new().is_test(true).try_init();
        let out = write(WriterOptions::default(), |w| {
            w.open_element(Some(XMLNS_NS), "xmlns:foo")?
                .comment("--")?
                .end_document()?;
            Ok(())
        })
        .unwrap();
        assert_eq!(out, "<xmlns:foo><!------></xmlns:foo>");
    }

    #[test]
    fn processing_instruction_checks() {
        let _ = env_logger::Builder::new().is_test(true).try_init();
        let options = WriterOptions::default().well_formed(true);
        let mut w = StreamWriter::new(String::new(), options.clone());
        assert_matches!(
            w.processing_instruction("XmL", "").unwrap_err().kind(),
            ErrorKind::Conformance
        );
        let mut w = StreamWriter::new(String::new(), options);
        w.processing_instruction("xml-stylesheet", "href=\"a.css\"")
            .unwrap();
        assert_eq!(w.sink(), "<?xml-stylesheet href=\"a.css\"?>");
    }

    #[test]
    fn backpressure_preserves_order() {
        let _ = env_logger::Builder::new().is_test(true).try_init();
        let mut w = StreamWriter::new(ChunkSink::with_high_water(1), WriterOptions::default());
        w.open_element(None, "root")
            .unwrap()
            .text("a")
            .unwrap()
            .text("b")
            .unwrap()
            .end_document()
            .unwrap();
        assert!(w.is_paused());
        assert_eq!(w.sink().chunks(), &["<root>".to_owned()]);
        assert_eq!(w.backlog_len(), 4);

        let mut seen = Vec::new();
        while w.is_paused() {
            seen.extend(w.sink_mut().drain());
            w.resume().unwrap();
        }
        seen.extend(w.sink_mut().drain());
        assert_eq!(w.backlog_len(), 0);
        assert_eq!(seen, vec!["<root>", "a", "b", "</root>"]);
        assert!(w.sink().is_ended());
    }

    #[test]
    fn reserved_prefix_declarations_dropped() {
        let _ = env_logger::Builder::new().is_test(true).try_init();
        for prefix in ["xml", "xmlns"] {
            let declaration = format!("xmlns:{}", prefix);
            let out = write(WriterOptions::default(), |w| {
                w.open_element(None, "root")?
                    .attribute(&declaration, "urn:other")?
                    .open_element(Some("urn:other"), "child")?
                    .end_document()?;
                Ok(())
            })
            .unwrap();
            assert_eq!(out, r#"<root><child xmlns="urn:other"/></root>"#);
        }
    }

    #[test]
    fn reserved_prefix_declarations_rejected() {
        let _ = env_logger::Builder::new().is_test(true).try_init();
        for prefix in ["xml", "xmlns"] {
            let declaration = format!("xmlns:{}", prefix);
            let mut out = String::new();
            let mut w = StreamWriter::new(&mut out, WriterOptions::default().well_formed(true));
            let e = w
                .open_element(None, "root")
                .and_then(|w| w.attribute(&declaration, "urn:other"))
                .and_then(|w| w.open_element(Some("urn:other"), "child"))
                .unwrap_err();
            assert_matches!(e.kind(), ErrorKind::Conformance);
            drop(w);
            assert_eq!(out, "");
        }

        // Redeclaring xml with its own namespace is allowed and redundant.
        let out = write(WriterOptions::default().well_formed(true), |w| {
            w.open_element(None, "root")?
                .attribute("xmlns:xml", XML_NS)?
                .end_document()?;
            Ok(())
        })
        .unwrap();
        assert_eq!(out, "<root/>");
    }

    /// Runs `f` against a well-formed writer, expecting a conformance error
    /// and no output.
    fn assert_nonconforming<F>(f: F)
    where
        F: FnOnce(&mut StreamWriter<&mut String>) -> Result<(), Error>,
    {
        let mut out = String::new();
        let mut w = StreamWriter::new(&mut out, WriterOptions::default().well_formed(true));
        let e = f(&mut w).unwrap_err();
        assert_matches!(e.kind(), ErrorKind::Conformance);
        drop(w);
        assert_eq!(out, "");
    }

    #[test]
    fn well_formed_leaf_checks() {
        let _ = env_logger::Builder::new().is_test(true).try_init();
        assert_nonconforming(|w| {
            w.comment("trailing-")?;
            Ok(())
        });
        assert_nonconforming(|w| {
            w.open_element(None, "root")?.text("bell\u{7}")?;
            Ok(())
        });
        assert_nonconforming(|w| {
            w.processing_instruction("a:b", "data")?;
            Ok(())
        });
        assert_nonconforming(|w| {
            w.open_element(None, "root")?
                .attribute("p:q", "1")?
                .end_document()?;
            Ok(())
        });
    }

    #[test]
    fn well_formed_element_local_name() {
        let _ = env_logger::Builder::new().is_test(true).try_init();
        assert_nonconforming(|w| {
            w.pending = Some(ElementDescriptor {
                namespace: None,
                prefix: None,
                local_name: "a:b".to_owned(),
                attributes: Vec::new(),
            });
            w.end_document()?;
            Ok(())
        });
    }
}
