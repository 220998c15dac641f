//! Response parsing against format strings.
//!
//! A format string describes the parameters expected in a response, e.g.
//! `"aa####bb&&cc***"`: two letter parameter names followed by a type
//! block. `#` matches a signed decimal digit, `*` a hex digit, `&` any
//! character. A trailing `(n)` marks a whitespace-separated list of
//! repetitions of the preceding block.
//!
//! Matching is order independent: each parameter is located anywhere in
//! the response body with its own regex, so firmware revisions that
//! reorder fields keep parsing.

use std::collections::HashMap;

use regex::Regex;

use crate::StarWireError;

/// A decoded response field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int(i64),
    Str(String),
    IntList(Vec<i64>),
    StrList(Vec<String>),
}

impl FieldValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_int_list(&self) -> Option<&[i64]> {
        match self {
            Self::IntList(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum FieldKind {
    Decimal,
    Hex,
    Char,
}

impl FieldKind {
    fn class(self) -> &'static str {
        match self {
            Self::Decimal => "[-+0-9 ]",
            Self::Hex => "[0-9a-fA-F ]",
            Self::Char => ".",
        }
    }
}

#[derive(Debug)]
struct ParamSpec {
    name: String,
    kind: FieldKind,
    len: usize,
    list: bool,
}

fn tokenize(fmt: &str) -> Result<Vec<ParamSpec>, StarWireError> {
    let mut specs = Vec::new();
    let chars: Vec<char> = fmt.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == ' ' {
            i += 1;
            continue;
        }
        // Parameter name: two lowercase letters.
        if i + 1 >= chars.len()
            || !chars[i].is_ascii_lowercase()
            || !chars[i + 1].is_ascii_lowercase()
        {
            return Err(StarWireError::BadFormat(format!(
                "expected parameter name at offset {i} in '{fmt}'"
            )));
        }
        let name: String = chars[i..i + 2].iter().collect();
        i += 2;

        let kind = match chars.get(i) {
            Some('#') => FieldKind::Decimal,
            Some('*') => FieldKind::Hex,
            Some('&') => FieldKind::Char,
            _ => {
                return Err(StarWireError::BadFormat(format!(
                    "parameter '{name}' has no type block in '{fmt}'"
                )))
            }
        };
        let type_char = chars[i];
        let mut len = 0;
        while chars.get(i) == Some(&type_char) {
            len += 1;
            i += 1;
        }

        // Optional list marker, possibly preceded by a space: "(n)".
        let mut list = false;
        let mut lookahead = i;
        if chars.get(lookahead) == Some(&' ') {
            lookahead += 1;
        }
        if chars.get(lookahead) == Some(&'(') {
            let close = chars[lookahead..]
                .iter()
                .position(|&c| c == ')')
                .map(|p| lookahead + p)
                .ok_or_else(|| {
                    StarWireError::BadFormat(format!("unclosed list marker in '{fmt}'"))
                })?;
            list = true;
            i = close + 1;
        }

        specs.push(ParamSpec {
            name,
            kind,
            len,
            list,
        });
    }
    Ok(specs)
}

fn decode_scalar(spec: &ParamSpec, raw: &str) -> Result<FieldValue, StarWireError> {
    let trimmed = raw.trim();
    match spec.kind {
        FieldKind::Decimal => trimmed
            .parse::<i64>()
            .map(FieldValue::Int)
            .map_err(|e| StarWireError::BadValue {
                name: spec.name.clone(),
                reason: e.to_string(),
            }),
        FieldKind::Hex => i64::from_str_radix(trimmed, 16)
            .map(FieldValue::Int)
            .map_err(|e| StarWireError::BadValue {
                name: spec.name.clone(),
                reason: e.to_string(),
            }),
        FieldKind::Char => Ok(FieldValue::Str(raw.to_string())),
    }
}

fn find_param(body: &str, spec: &ParamSpec) -> Result<Option<FieldValue>, StarWireError> {
    let class = spec.kind.class();
    let len = spec.len;
    let pattern = if spec.list {
        format!("{}((?:{class}{{{len}}} ?)+)", spec.name)
    } else {
        format!("{}({class}{{{len}}})", spec.name)
    };
    let re = Regex::new(&pattern).map_err(|e| StarWireError::BadFormat(e.to_string()))?;
    let Some(captures) = re.captures(body) else {
        return Ok(None);
    };
    let raw = &captures[1];

    if spec.list {
        match spec.kind {
            FieldKind::Char => Ok(Some(FieldValue::StrList(
                raw.split_whitespace().map(str::to_string).collect(),
            ))),
            _ => {
                let mut values = Vec::new();
                for part in raw.split_whitespace() {
                    match decode_scalar(spec, part)? {
                        FieldValue::Int(v) => values.push(v),
                        _ => unreachable!("decimal and hex decode to ints"),
                    }
                }
                Ok(Some(FieldValue::IntList(values)))
            }
        }
    } else {
        Ok(Some(decode_scalar(spec, raw)?))
    }
}

/// Parse a firmware response against a format string.
///
/// The first four bytes (module and command echo) are skipped. Every
/// parameter in the format string must be present; the echoed `id` is
/// parsed implicitly when the format does not mention it.
pub fn parse_response(
    resp: &str,
    fmt: &str,
) -> Result<HashMap<String, FieldValue>, StarWireError> {
    if resp.len() < 4 {
        return Err(StarWireError::TooShort(resp.to_string()));
    }
    let body = &resp[4..];

    let specs = tokenize(fmt)?;

    let mut out = HashMap::new();
    for spec in &specs {
        match find_param(body, spec)? {
            Some(value) => {
                out.insert(spec.name.clone(), value);
            }
            None => return Err(StarWireError::MissingParameter(spec.name.clone())),
        }
    }

    // The echoed id is picked up implicitly. Only a format string that
    // names `id` makes it mandatory.
    if !out.contains_key("id") {
        let id_spec = ParamSpec {
            name: "id".to_string(),
            kind: FieldKind::Decimal,
            len: 4,
            list: false,
        };
        if let Some(value) = find_param(body, &id_spec)? {
            out.insert("id".to_string(), value);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_field_kinds() {
        let parsed = parse_response("xxxxaa1111bbrwccB0Bid0001", "aa####bb&&cc***").unwrap();
        assert_eq!(parsed["aa"], FieldValue::Int(1111));
        assert_eq!(parsed["bb"], FieldValue::Str("rw".into()));
        assert_eq!(parsed["cc"], FieldValue::Int(0xB0B));
        assert_eq!(parsed["id"], FieldValue::Int(1));
    }

    #[test]
    fn format_order_does_not_matter() {
        let parsed = parse_response("xxxxaa1111bbrwccB0Bid0001", "cc***aa####bb&&").unwrap();
        assert_eq!(parsed["aa"], FieldValue::Int(1111));
        assert_eq!(parsed["cc"], FieldValue::Int(2827));
    }

    #[test]
    fn whitespace_separated_lists() {
        let parsed = parse_response("C0RTid0023ry0100 0200 0300", "ry#### (n)").unwrap();
        assert_eq!(parsed["ry"], FieldValue::IntList(vec![100, 200, 300]));
    }

    #[test]
    fn negative_numbers_parse() {
        let parsed = parse_response("C0RZid0001zp-042", "zp####").unwrap();
        assert_eq!(parsed["zp"], FieldValue::Int(-42));
    }

    #[test]
    fn missing_parameter_is_an_error() {
        let err = parse_response("C0QWid0001aa11", "aa##bb##").unwrap_err();
        assert!(matches!(err, StarWireError::MissingParameter(ref p) if p == "bb"));
    }

    #[test]
    fn id_is_optional_when_not_in_the_format() {
        let parsed = parse_response("xxxxaa1111bbrwccB0B", "aa####bb&&cc***").unwrap();
        assert_eq!(parsed["aa"], FieldValue::Int(1111));
        assert!(!parsed.contains_key("id"));
    }

    #[test]
    fn explicit_id_in_format_is_required() {
        let err = parse_response("C0QWaa11", "id####aa##").unwrap_err();
        assert!(matches!(err, StarWireError::MissingParameter(ref p) if p == "id"));
    }
}
