// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Namespace bookkeeping for the writer: prefix bindings in scope, duplicate
//! attribute detection, and generated prefixes.

use std::collections::{BTreeMap, HashSet};

use log::debug;

use crate::{ExpandedName, ExpandedNameRef, XMLNS_PREFIX, XML_NS, XML_PREFIX};

/// Namespace to prefix bindings in scope.
///
/// Each namespace (and the null namespace) maps to the prefixes bound to it,
/// oldest first. Bindings are only ever appended; a scope is left by
/// restoring an earlier clone. Clones share nothing.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NamespacePrefixMap {
    by_namespace: BTreeMap<String, Vec<String>>,
    null_namespace: Vec<String>,
}

impl NamespacePrefixMap {
    /// Returns a map with only the built-in `xml` binding.
    pub fn new() -> Self {
        let mut map = Self::default();
        map.set(XML_PREFIX, Some(XML_NS));
        map
    }

    /// Finds a prefix bound to `namespace`.
    ///
    /// `preferred` wins if it's among the candidates; otherwise the most
    /// recently bound prefix is returned.
    pub fn get(&self, preferred: Option<&str>, namespace: Option<&str>) -> Option<&str> {
        let candidates = self.candidates(namespace)?;
        if let Some(p) = preferred {
            if let Some(found) = candidates.iter().find(|c| *c == p) {
                return Some(found.as_str());
            }
        }
        candidates.last().map(String::as_str)
    }

    /// Binds `prefix` to `namespace`, keeping any existing bindings.
    ///
    /// `xml` stays bound to the XML namespace only, and `xmlns` is never bound.
    pub fn set(&mut self, prefix: &str, namespace: Option<&str>) {
        if (prefix == XML_PREFIX && namespace != Some(XML_NS)) || prefix == XMLNS_PREFIX {
            debug!("refusing to bind reserved prefix {} to {:?}", prefix, namespace);
            return;
        }
        let candidates = match namespace {
            None => &mut self.null_namespace,
            Some(ns) => self.by_namespace.entry(ns.to_owned()).or_default(),
        };
        if !candidates.iter().any(|c| c == prefix) {
            candidates.push(prefix.to_owned());
        }
    }

    /// Returns true iff `prefix` is bound to `namespace`.
    pub fn has(&self, prefix: &str, namespace: Option<&str>) -> bool {
        self.candidates(namespace)
            .map(|c| c.iter().any(|p| p == prefix))
            .unwrap_or(false)
    }

    /// Returns true iff `prefix` is bound to any namespace.
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.null_namespace.iter().any(|p| p == prefix)
            || self
                .by_namespace
                .values()
                .any(|c| c.iter().any(|p| p == prefix))
    }

    fn candidates(&self, namespace: Option<&str>) -> Option<&Vec<String>> {
        match namespace {
            None if self.null_namespace.is_empty() => None,
            None => Some(&self.null_namespace),
            Some(ns) => self.by_namespace.get(ns),
        }
    }
}

/// The expanded names of the attributes already written on one open tag.
#[derive(Debug, Default)]
pub struct LocalNameSet(HashSet<ExpandedName>);

impl LocalNameSet {
    /// Records `name`, returning false if it was already present.
    pub fn insert(&mut self, name: ExpandedNameRef) -> bool {
        self.0.insert(name.into())
    }
}

/// Mints `ns1`, `ns2`, ... for one serialization session; never reused.
#[derive(Debug)]
pub struct PrefixIndex(u32);

impl Default for PrefixIndex {
    fn default() -> Self {
        PrefixIndex(1)
    }
}

impl PrefixIndex {
    /// Generates a fresh prefix and binds it to `namespace` in `map`.
    pub fn generate(&mut self, namespace: Option<&str>, map: &mut NamespacePrefixMap) -> String {
        let prefix = format!("ns{}", self.0);
        self.0 += 1;
        debug!("generated prefix {} for {:?}", prefix, namespace);
        map.set(&prefix, namespace);
        prefix
    }
}
