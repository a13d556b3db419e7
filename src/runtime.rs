//! HTML helpers shared by the code generator and the evaluator.

use std::collections::BTreeMap;

use crate::value::{Function, Value};

/// Escapes text content: `& < > " '`.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escapes a double-quoted attribute value. Single quotes are left alone.
pub fn escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            _ => out.push(c),
        }
    }
    out
}

/// Class names contributed by one `class=` value.
pub fn class_list(value: &Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items
            .iter()
            .filter(|v| !matches!(v, Value::Null))
            .map(Value::to_string)
            .filter(|s| !s.is_empty())
            .collect(),
        Value::Map(map) => map
            .iter()
            .filter(|(_, v)| v.is_truthy())
            .map(|(k, _)| k.clone())
            .collect(),
        other => {
            let s = other.to_string();
            if s.is_empty() {
                Vec::new()
            } else {
                vec![s]
            }
        }
    }
}

/// `style` given a map renders `key:value` pairs, keys ascending.
pub fn style_string(value: &Value) -> String {
    match value {
        Value::Map(map) => map
            .iter()
            .map(|(k, v)| format!("{k}:{v}"))
            .collect::<Vec<_>>()
            .join(";"),
        other => other.to_string(),
    }
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "keygen", "link", "meta", "param",
    "source", "track", "wbr",
];

const INLINE_ELEMENTS: &[&str] = &[
    "a", "abbr", "acronym", "b", "br", "code", "em", "font", "i", "img", "ins", "kbd", "map",
    "samp", "small", "span", "strong", "sub", "sup",
];

pub fn is_void(name: &str) -> bool {
    VOID_ELEMENTS.contains(&name)
}

/// Inline elements are never broken onto their own line when pretty printing.
pub fn is_inline(name: &str) -> bool {
    INLINE_ELEMENTS.contains(&name)
}

/// Full declaration for a `doctype` value.
pub fn doctype(value: &str) -> String {
    let decl = match value {
        "html" | "5" => "<!DOCTYPE html>",
        "xml" => r#"<?xml version="1.0" encoding="utf-8" ?>"#,
        "transitional" => {
            r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Transitional//EN" "http://www.w3.org/TR/xhtml1/DTD/xhtml1-transitional.dtd">"#
        }
        "strict" => {
            r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Strict//EN" "http://www.w3.org/TR/xhtml1/DTD/xhtml1-strict.dtd">"#
        }
        "frameset" => {
            r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Frameset//EN" "http://www.w3.org/TR/xhtml1/DTD/xhtml1-frameset.dtd">"#
        }
        "1.1" => {
            r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.1//EN" "http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd">"#
        }
        "basic" => {
            r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML Basic 1.1//EN" "http://www.w3.org/TR/xhtml-basic/xhtml-basic11.dtd">"#
        }
        "mobile" => {
            r#"<!DOCTYPE html PUBLIC "-//WAPFORUM//DTD XHTML Mobile 1.2//EN" "http://www.openmobilealliance.org/tech/DTD/xhtml-mobile12.dtd">"#
        }
        "plist" => {
            r#"<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">"#
        }
        other => return format!("<!DOCTYPE {other}>"),
    };
    decl.to_string()
}

/// Functions every template can call.
pub fn builtins() -> BTreeMap<String, Function> {
    let funcs = [
        Function::new("len", |args| match args {
            [Value::String(s)] => Ok(Value::from(s.chars().count())),
            [Value::Array(items)] => Ok(Value::from(items.len())),
            [Value::Map(map)] => Ok(Value::from(map.len())),
            [Value::Null] => Ok(Value::Int(0)),
            [other] => Err(format!("cannot take the length of {}", other.kind())),
            _ => Err(format!("expected 1 argument, got {}", args.len())),
        }),
        Function::new("json", |args| match args {
            [value] => serde_json::to_string(&value.to_json())
                .map(Value::String)
                .map_err(|err| err.to_string()),
            _ => Err(format!("expected 1 argument, got {}", args.len())),
        }),
        Function::new("html", |args| match args {
            [value] => Ok(Value::String(escape_html(&value.to_string()))),
            _ => Err(format!("expected 1 argument, got {}", args.len())),
        }),
        Function::new("print", |args| {
            Ok(Value::String(
                args.iter().map(Value::to_string).collect::<String>(),
            ))
        }),
    ];
    funcs
        .into_iter()
        .map(|f| (f.name().to_string(), f))
        .collect()
}
