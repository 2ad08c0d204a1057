// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Character escaping and pretty-print layout.

use std::borrow::Cow;

use super::WriterOptions;

/// Escapes character data: `&`, `<` and `>`.
pub fn escape_text(s: &str) -> Cow<str> {
    xml::escape::escape_str_pcdata(s)
}

/// Escapes a double-quoted attribute value: `&`, `<`, `>` and `"`.
///
/// Unlike `xml::escape::escape_str_attribute`, apostrophes and line breaks
/// are left alone.
pub fn escape_attribute_value(s: &str) -> Cow<str> {
    let needs = |c: char| matches!(c, '&' | '<' | '>' | '"');
    let first = match s.find(needs) {
        None => return Cow::Borrowed(s),
        Some(i) => i,
    };
    let mut out = String::with_capacity(s.len() + 8);
    out.push_str(&s[..first]);
    for c in s[first..].chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Line breaks and indentation as configured by [`WriterOptions`].
pub(crate) struct Layout<'a>(pub(crate) &'a WriterOptions);

impl<'a> Layout<'a> {
    /// What goes before a chunk at nesting `level`.
    ///
    /// Empty unless pretty-printing. The newline is omitted before the first
    /// chunk of the document.
    pub(crate) fn begin_line(&self, has_data: bool, level: usize) -> String {
        if !self.0.pretty_print {
            return String::new();
        }
        let mut out = String::new();
        if has_data {
            out.push_str(&self.0.newline);
        }
        out.push_str(&self.indent(self.0.offset + level));
        out
    }

    pub(crate) fn indent(&self, level: usize) -> String {
        self.0.indent.repeat(level)
    }

    /// Whether `attribute` (without its leading separator) would overflow the
    /// configured width if appended to `line`.
    pub(crate) fn wraps(&self, line: &str, attribute: &str) -> bool {
        if !self.0.pretty_print || self.0.width == 0 {
            return false;
        }
        let current = match line.rfind(self.0.newline.as_str()) {
            Some(i) if !self.0.newline.is_empty() => &line[i + self.0.newline.len()..],
            _ => line,
        };
        current.chars().count() + 1 + attribute.chars().count() > self.0.width
    }
}
