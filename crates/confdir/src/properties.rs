//! Parser for the line-oriented `.properties` key/value format.
//!
//! Supported syntax:
//! - `#` and `!` comment lines, blank lines
//! - `key=value`, `key: value` and `key value` (first unescaped `=`, `:` or
//!   whitespace terminates the key)
//! - backslash line continuation; leading whitespace of the continued line is dropped
//! - escapes `\t`, `\n`, `\r`, `\f`, `\uXXXX`; any other `\c` stands for `c`
//!
//! Keys and values are trimmed. When a key occurs more than once in the same
//! file, the last occurrence wins.

use std::fs;
use std::path::Path;

use indexmap::IndexMap;

use crate::error::{ConfigError, ConfigResult};

/// Key/value pairs loaded from one `.properties` file, in file order.
pub type Properties = IndexMap<String, String>;

/// Parse `.properties` text.
///
/// # Example
///
/// ```
/// use confdir::properties::parse_properties;
///
/// let props = parse_properties("# mail\nmail.host = imap.example.com\n").unwrap();
/// assert_eq!(props.get("mail.host").map(String::as_str), Some("imap.example.com"));
/// ```
pub fn parse_properties(text: &str) -> ConfigResult<Properties> {
    let mut properties = Properties::new();
    let mut lines = text.lines().enumerate().peekable();

    while let Some((index, first)) = lines.next() {
        let trimmed = first.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
            continue;
        }

        // Join continuation lines into one logical line.
        let mut logical = String::from(trimmed);
        while ends_with_continuation(&logical) {
            logical.pop();
            match lines.next() {
                Some((_, next)) => logical.push_str(next.trim_start()),
                None => break,
            }
        }

        let line_no = index + 1;
        let (raw_key, raw_value) = split_key_value(&logical);
        let key = unescape(raw_key, line_no)?;
        let value = unescape(raw_value, line_no)?;
        properties.insert(key.trim().to_string(), value.trim().to_string());
    }

    Ok(properties)
}

/// Read and parse a `.properties` file.
///
/// The file is decoded as UTF-8; if that fails it is decoded as ISO-8859-1.
pub fn load_properties_file(path: &Path) -> ConfigResult<Properties> {
    let bytes = fs::read(path).map_err(|e| ConfigError::read_error(path, e))?;
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => err.into_bytes().iter().map(|&b| char::from(b)).collect(),
    };
    parse_properties(&text)
}

/// Read a single property from a file.
///
/// Returns `Ok(None)` when the file parses but does not define `name`.
pub fn read_property(path: &Path, name: &str) -> ConfigResult<Option<String>> {
    let mut properties = load_properties_file(path)?;
    Ok(properties.swap_remove(name))
}

// An odd number of trailing backslashes continues the line.
fn ends_with_continuation(line: &str) -> bool {
    line.chars().rev().take_while(|&c| c == '\\').count() % 2 == 1
}

fn split_key_value(line: &str) -> (&str, &str) {
    let mut escaped = false;
    let mut key_end = line.len();
    let mut separator = None;

    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' | ':' => {
                key_end = i;
                separator = Some(i + c.len_utf8());
                break;
            }
            c if c.is_whitespace() => {
                key_end = i;
                separator = Some(i);
                break;
            }
            _ => {}
        }
    }

    let Some(mut value_start) = separator else {
        return (line, "");
    };

    // `key  =  value`: skip whitespace then at most one separator.
    let rest = &line[value_start..];
    let skipped = rest.len() - rest.trim_start().len();
    value_start += skipped;
    let rest = &line[value_start..];
    if line[key_end..].starts_with(char::is_whitespace)
        && (rest.starts_with('=') || rest.starts_with(':'))
    {
        value_start += 1;
    }

    (&line[..key_end], line[value_start..].trim_start())
}

fn unescape(raw: &str, line: usize) -> ConfigResult<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\u{000C}'),
            Some('u') => {
                let code = read_hex4(&mut chars, line)?;
                if (0xD800..0xDC00).contains(&code) {
                    // A high surrogate pairs with a following `\uDC00`..`\uDFFF`.
                    let mut lookahead = chars.clone();
                    if lookahead.next() == Some('\\') && lookahead.next() == Some('u') {
                        let low = read_hex4(&mut lookahead, line)?;
                        if (0xDC00..0xE000).contains(&low) {
                            chars = lookahead;
                            let combined = 0x10000 + ((code - 0xD800) << 10) + (low - 0xDC00);
                            out.push(
                                char::from_u32(combined).unwrap_or(char::REPLACEMENT_CHARACTER),
                            );
                            continue;
                        }
                    }
                }
                // Unpaired surrogates have no scalar value.
                out.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
            }
            Some(other) => out.push(other),
            None => {}
        }
    }

    Ok(out)
}

fn read_hex4(chars: &mut std::str::Chars<'_>, line: usize) -> ConfigResult<u32> {
    let hex: String = chars.by_ref().take(4).collect();
    if hex.len() != 4 {
        return Err(ConfigError::MalformedEscape { line });
    }
    u32::from_str_radix(&hex, 16).map_err(|_| ConfigError::MalformedEscape { line })
}
