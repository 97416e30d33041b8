//! Built-in routines compiled code can call. Each has a stable import path so
//! standalone modules can name it without holding a live reference.
use chrono::{DateTime, NaiveDate};
use ordered_float::OrderedFloat;
use serde_json::{Value, json};

use crate::codegen::{ValueCode, ValueDescriptor};

use super::LiveValue;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Helper {
    /// Deep JSON equality; `1` equals `1.0`, member order is ignored.
    Equal,
    /// String length in code points.
    Ucs2Length,
    /// Escape one JSON-pointer reference token.
    EscapePointer,
    ParseString,
    ParseNumber,
    ParseValue,
    SkipWhitespace,
    Quote,
    ToJson,
    IsTimestamp,
    IsDate,
    IsTime,
}

impl Helper {
    pub const ALL: [Helper; 12] = [
        Helper::Equal,
        Helper::Ucs2Length,
        Helper::EscapePointer,
        Helper::ParseString,
        Helper::ParseNumber,
        Helper::ParseValue,
        Helper::SkipWhitespace,
        Helper::Quote,
        Helper::ToJson,
        Helper::IsTimestamp,
        Helper::IsDate,
        Helper::IsTime,
    ];

    pub fn import_path(self) -> &'static str {
        match self {
            Helper::Equal => "runtime/equal",
            Helper::Ucs2Length => "runtime/ucs2length",
            Helper::EscapePointer => "runtime/escapePointer",
            Helper::ParseString => "runtime/parseString",
            Helper::ParseNumber => "runtime/parseNumber",
            Helper::ParseValue => "runtime/parseValue",
            Helper::SkipWhitespace => "runtime/skipWhitespace",
            Helper::Quote => "runtime/quote",
            Helper::ToJson => "runtime/toJson",
            Helper::IsTimestamp => "runtime/isTimestamp",
            Helper::IsDate => "runtime/isDate",
            Helper::IsTime => "runtime/isTime",
        }
    }

    pub fn from_import(path: &str) -> Option<Helper> {
        Helper::ALL.into_iter().find(|h| h.import_path() == path)
    }

    /// Scope descriptor: keyed by import path, usable in both modes.
    pub fn descriptor(self) -> ValueDescriptor {
        ValueDescriptor {
            key: Some(self.import_path().to_string()),
            live: Some(LiveValue::Helper(self)),
            code: Some(ValueCode::Import(self.import_path().to_string())),
        }
    }

    /// Run the helper. `Err` carries a thrown value.
    pub fn call(self, args: &[Value]) -> Result<Value, Value> {
        let arg = |i: usize| args.get(i).unwrap_or(&Value::Null);
        match self {
            Helper::Equal => Ok(Value::Bool(equal(arg(0), arg(1)))),
            Helper::Ucs2Length => match arg(0) {
                Value::String(s) => Ok(Value::from(s.chars().count())),
                other => Err(type_error("ucs2length", other)),
            },
            Helper::EscapePointer => {
                let token = match arg(0) {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Ok(Value::String(escape_pointer(&token)))
            }
            Helper::ParseString => {
                let (json, pos) = text_at(args)?;
                match json.as_bytes().get(pos) {
                    Some(b'"') => parse_value_at(json, pos),
                    _ => Err(parse_error("expected string", pos)),
                }
            }
            Helper::ParseNumber => {
                let (json, pos) = text_at(args)?;
                match json.as_bytes().get(pos) {
                    Some(b'-' | b'0'..=b'9') => parse_value_at(json, pos),
                    _ => Err(parse_error("expected number", pos)),
                }
            }
            Helper::ParseValue => {
                let (json, pos) = text_at(args)?;
                parse_value_at(json, pos)
            }
            Helper::SkipWhitespace => {
                let (json, pos) = text_at(args)?;
                let skipped = json.as_bytes()[pos.min(json.len())..]
                    .iter()
                    .take_while(|b| matches!(b, b' ' | b'\t' | b'\n' | b'\r'))
                    .count();
                Ok(Value::from(pos + skipped))
            }
            Helper::Quote => match arg(0) {
                Value::String(s) => Ok(Value::String(Value::String(s.clone()).to_string())),
                other => Err(type_error("quote", other)),
            },
            Helper::ToJson => Ok(Value::String(arg(0).to_string())),
            Helper::IsTimestamp => Ok(Value::Bool(arg(0).as_str().is_some_and(is_timestamp))),
            Helper::IsDate => Ok(Value::Bool(arg(0).as_str().is_some_and(is_date))),
            Helper::IsTime => Ok(Value::Bool(arg(0).as_str().is_some_and(is_time))),
        }
    }
}

// ------------------------------- Equality -------------------------------- //

pub fn equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(i), Some(j)) => i == j,
            _ => match (x.as_f64(), y.as_f64()) {
                (Some(f), Some(g)) => OrderedFloat(f) == OrderedFloat(g),
                _ => false,
            },
        },
        (Value::Array(xs), Value::Array(ys)) => xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| equal(x, y)),
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len() && xs.iter().all(|(k, x)| ys.get(k).is_some_and(|y| equal(x, y)))
        }
        _ => a == b,
    }
}

// ------------------------------- Pointers -------------------------------- //

pub fn escape_pointer(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

// -------------------------------- Parsing -------------------------------- //

fn text_at(args: &[Value]) -> Result<(&str, usize), Value> {
    match (args.first(), args.get(1).and_then(Value::as_u64)) {
        (Some(Value::String(s)), Some(pos)) => Ok((s.as_str(), pos as usize)),
        _ => Err(json!({"message": "parser helper called without (text, position)", "position": 0})),
    }
}

pub(crate) fn parse_error(message: &str, position: usize) -> Value {
    json!({"message": message, "position": position})
}

/// Parse exactly one JSON value starting at byte `pos`; returns `[value, end]`.
fn parse_value_at(json: &str, pos: usize) -> Result<Value, Value> {
    let rest = json.get(pos..).unwrap_or("");
    let mut stream = serde_json::Deserializer::from_str(rest).into_iter::<Value>();
    match stream.next() {
        Some(Ok(v)) => Ok(json!([v, pos + stream.byte_offset()])),
        Some(Err(e)) if e.is_eof() => Err(parse_error("unexpected end of input", json.len())),
        Some(Err(e)) => {
            let offset = offset_of(rest, e.line(), e.column());
            Err(parse_error(&format!("invalid JSON: {e}"), pos + offset))
        }
        None => Err(parse_error("unexpected end of input", json.len())),
    }
}

fn offset_of(text: &str, line: usize, column: usize) -> usize {
    let line_start: usize = text.split_inclusive('\n').take(line.saturating_sub(1)).map(str::len).sum();
    (line_start + column.saturating_sub(1)).min(text.len())
}

fn type_error(helper: &str, got: &Value) -> Value {
    json!({"message": format!("{helper}: unexpected argument {got}"), "position": 0})
}

// -------------------------------- Formats -------------------------------- //

pub fn is_timestamp(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok()
}

pub fn is_date(s: &str) -> bool {
    s.len() == 10 && NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

pub fn is_time(s: &str) -> bool {
    is_timestamp(&format!("1970-01-01T{s}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_structural() {
        assert!(equal(&json!({"a": [1, 2.0]}), &json!({"a": [1.0, 2]})));
        assert!(!equal(&json!([1, 2]), &json!([2, 1])));
        assert!(!equal(&json!("1"), &json!(1)));
    }

    #[test]
    fn parses_values_with_positions() {
        let r = Helper::ParseString.call(&[json!(r#"{"a":"x\"y"}"#), json!(5)]).unwrap();
        assert_eq!(r, json!(["x\"y", 11]));
        let r = Helper::ParseNumber.call(&[json!("[12.5,3]"), json!(1)]).unwrap();
        assert_eq!(r, json!([12.5, 5]));
        let err = Helper::ParseString.call(&[json!("[1]"), json!(1)]).unwrap_err();
        assert_eq!(err["position"], json!(1));
    }

    #[test]
    fn skips_whitespace() {
        assert_eq!(Helper::SkipWhitespace.call(&[json!("  \n x"), json!(0)]).unwrap(), json!(4));
    }

    #[test]
    fn formats() {
        assert!(is_timestamp("1985-04-12T23:20:50.52Z"));
        assert!(!is_timestamp("1985-04-12"));
        assert!(is_date("2020-02-29"));
        assert!(!is_date("2021-02-29"));
        assert!(is_time("10:00:00+02:00"));
    }

    #[test]
    fn import_paths_round_trip() {
        for h in Helper::ALL {
            assert_eq!(Helper::from_import(h.import_path()), Some(h));
        }
        assert_eq!(escape_pointer("a/b~c"), "a~1b~0c");
    }
}
