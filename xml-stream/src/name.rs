// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Predicates over the XML 1.0 `Name`, `QName`, `Char` and `PubidChar`
//! productions.
//!
//! See [Extensible Markup Language (XML) 1.0 (Fifth
//! Edition)](https://www.w3.org/TR/xml/) and [Namespaces in XML 1.0 (Third
//! Edition)](https://www.w3.org/TR/xml-names/#NT-QName).

use xml::common::{is_name_char, is_name_start_char};

/// Returns true iff `s` matches the `Name` production.
pub fn is_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if is_name_start_char(c) => chars.all(is_name_char),
        _ => false,
    }
}

/// Returns true iff `s` matches the `NCName` production: a `Name` without colons.
pub fn is_ncname(s: &str) -> bool {
    !s.contains(':') && is_name(s)
}

/// Returns true iff `s` matches the `QName` production: `NCName` or
/// `NCName ':' NCName`.
pub fn is_qname(s: &str) -> bool {
    match s.split_once(':') {
        None => is_ncname(s),
        Some((prefix, local)) => is_ncname(prefix) && is_ncname(local),
    }
}

/// Returns true iff every character of `s` matches the `Char` production.
///
/// Rust strings can't hold surrogates, so only the control characters and
/// the two noncharacters `U+FFFE`/`U+FFFF` need excluding.
pub fn is_legal_char(s: &str) -> bool {
    s.chars().all(|c| {
        matches!(c,
            '\u{9}' | '\u{A}' | '\u{D}'
            | '\u{20}'..='\u{D7FF}'
            | '\u{E000}'..='\u{FFFD}'
            | '\u{10000}'..='\u{10FFFF}')
    })
}

/// Returns true iff every character of `s` matches the `PubidChar` production.
pub fn is_pubid_char(s: &str) -> bool {
    s.chars().all(|c| {
        matches!(c,
            ' ' | '\r' | '\n'
            | 'a'..='z' | 'A'..='Z' | '0'..='9'
            | '-' | '\'' | '(' | ')' | '+' | ',' | '.' | '/' | ':'
            | '=' | '?' | ';' | '!' | '*' | '#' | '@' | '$' | '_' | '%')
    })
}
