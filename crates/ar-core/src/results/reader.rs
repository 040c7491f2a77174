//! Outer structure of the results stream.
//!
//! The analysis process writes either one JSON array of objects or a bare
//! sequence of objects. The reader yields one top-level object at a time
//! without buffering the rest of the stream. Field order is preserved so the
//! decoder can classify an object by its first field.

use std::io::BufRead;

use ar_common::{Error, Result};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Start,
    Array,
    Bare,
    Done,
}

/// Pull reader over a results stream.
pub struct ResultsReader<R> {
    input: R,
    mode: Mode,
    buf: Vec<u8>,
    unterminated: bool,
}

impl<R: BufRead> ResultsReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            mode: Mode::Start,
            buf: Vec::new(),
            unterminated: false,
        }
    }

    /// True once input ended inside the outer array, before its `]`.
    pub fn unterminated(&self) -> bool {
        self.unterminated
    }

    /// The next top-level object, or None at end of stream.
    pub fn next_object(&mut self) -> Result<Option<Map<String, Value>>> {
        loop {
            match self.mode {
                Mode::Done => return Ok(None),
                Mode::Start => match self.skip_whitespace()? {
                    None => self.mode = Mode::Done,
                    Some(b'[') => {
                        self.input.consume(1);
                        self.mode = Mode::Array;
                    }
                    Some(b'{') => self.mode = Mode::Bare,
                    Some(other) => return Err(unexpected(other)),
                },
                Mode::Array => match self.skip_whitespace()? {
                    None => {
                        self.unterminated = true;
                        self.mode = Mode::Done;
                    }
                    Some(b']') => {
                        self.input.consume(1);
                        self.mode = Mode::Done;
                    }
                    Some(b',') => self.input.consume(1),
                    Some(b'{') => return self.read_object().map(Some),
                    Some(other) => return Err(unexpected(other)),
                },
                Mode::Bare => match self.skip_whitespace()? {
                    None => self.mode = Mode::Done,
                    Some(b',') => self.input.consume(1),
                    Some(b'{') => return self.read_object().map(Some),
                    Some(other) => return Err(unexpected(other)),
                },
            }
        }
    }

    /// Peek the next non-whitespace byte without consuming it.
    fn skip_whitespace(&mut self) -> Result<Option<u8>> {
        loop {
            let chunk = self.input.fill_buf()?;
            if chunk.is_empty() {
                return Ok(None);
            }
            match chunk.iter().position(|b| !b.is_ascii_whitespace()) {
                Some(pos) => {
                    let byte = chunk[pos];
                    self.input.consume(pos);
                    return Ok(Some(byte));
                }
                None => {
                    let len = chunk.len();
                    self.input.consume(len);
                }
            }
        }
    }

    /// Read one balanced `{...}` and parse it.
    fn read_object(&mut self) -> Result<Map<String, Value>> {
        self.buf.clear();
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;

        loop {
            let chunk = self.input.fill_buf()?;
            if chunk.is_empty() {
                return Err(Error::Truncated(format!(
                    "input ended after {} bytes of an object",
                    self.buf.len()
                )));
            }

            let mut used = 0;
            let mut complete = false;
            for &byte in chunk {
                used += 1;
                if in_string {
                    if escaped {
                        escaped = false;
                    } else if byte == b'\\' {
                        escaped = true;
                    } else if byte == b'"' {
                        in_string = false;
                    }
                    continue;
                }
                match byte {
                    b'"' => in_string = true,
                    b'{' | b'[' => depth += 1,
                    b'}' | b']' => {
                        depth = depth.saturating_sub(1);
                        if depth == 0 {
                            complete = true;
                            break;
                        }
                    }
                    _ => {}
                }
            }
            self.buf.extend_from_slice(&chunk[..used]);
            self.input.consume(used);
            if complete {
                break;
            }
        }

        match serde_json::from_slice::<Value>(&self.buf)? {
            Value::Object(map) => Ok(map),
            other => Err(Error::StreamStructure {
                found: describe_value(&other).to_string(),
            }),
        }
    }
}

fn unexpected(byte: u8) -> Error {
    let found = match byte {
        b'[' => "array".to_string(),
        b'"' => "string".to_string(),
        b'-' | b'0'..=b'9' => "number".to_string(),
        b't' | b'f' => "boolean".to_string(),
        b'n' => "null".to_string(),
        other => format!("unexpected character '{}'", other.escape_ascii()),
    };
    Error::StreamStructure { found }
}

fn describe_value(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(input: &str) -> Result<(Vec<Map<String, Value>>, bool)> {
        let mut reader = ResultsReader::new(input.as_bytes());
        let mut out = Vec::new();
        while let Some(obj) = reader.next_object()? {
            out.push(obj);
        }
        Ok((out, reader.unterminated()))
    }

    fn first_keys(objects: &[Map<String, Value>]) -> Vec<String> {
        objects
            .iter()
            .map(|o| o.keys().next().cloned().unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_reads_outer_array() {
        let (objs, unterminated) =
            read_all(r#" [ {"timestamp": 1, "x": [1, {"y": "}"}]}, {"flush": "f1"} ] "#).unwrap();
        assert_eq!(first_keys(&objs), vec!["timestamp", "flush"]);
        assert!(!unterminated);
    }

    #[test]
    fn test_reads_bare_object_sequence() {
        let (objs, _) = read_all("{\"flush\":\"a\"}\n{\"flush\":\"b\"}{\"flush\":\"c\"}").unwrap();
        assert_eq!(objs.len(), 3);
    }

    #[test]
    fn test_empty_inputs_yield_nothing() {
        assert!(read_all("").unwrap().0.is_empty());
        assert!(read_all("  \n ").unwrap().0.is_empty());
        let (objs, unterminated) = read_all("[]").unwrap();
        assert!(objs.is_empty());
        assert!(!unterminated);
    }

    #[test]
    fn test_preserves_field_order() {
        let (objs, _) = read_all(r#"[{"quantileState":"s","timestamp":5}]"#).unwrap();
        assert_eq!(objs[0].keys().next().unwrap(), "quantileState");
    }

    #[test]
    fn test_nested_array_is_a_structure_error() {
        let err = read_all("[[]]").unwrap_err();
        assert!(matches!(err, Error::StreamStructure { ref found } if found == "array"));
    }

    #[test]
    fn test_leading_scalar_is_a_structure_error() {
        for input in ["42", "\"text\"", "[1]", "null"] {
            let err = read_all(input).unwrap_err();
            assert_eq!(err.code(), 10, "input {input}");
        }
    }

    #[test]
    fn test_eof_between_objects_is_soft() {
        let (objs, unterminated) = read_all(r#"[{"flush":"a"},"#).unwrap();
        assert_eq!(objs.len(), 1);
        assert!(unterminated);
    }

    #[test]
    fn test_eof_inside_object_is_fatal() {
        let err = read_all(r#"[{"flush":"a"}, {"timestamp": 12"#).unwrap_err();
        assert!(matches!(err, Error::Truncated(_)));
    }

    #[test]
    fn test_escaped_quotes_and_surrogate_pairs() {
        let (objs, _) =
            read_all(r#"[{"debugFeature":"say \"hi\" \ud83d\ude00 {"}]"#).unwrap();
        assert_eq!(objs[0]["debugFeature"], "say \"hi\" \u{1F600} {");
    }

    #[test]
    fn test_malformed_object_is_a_json_error() {
        let err = read_all(r#"[{"flush" "a"}]"#).unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }
}
