//! Low-level byte-scanning primitives the depth-aware parser is built
//! from. No general JSON grammar lives here — just the handful of
//! operations a fixed-schema scanner needs: skip whitespace, extract a
//! quoted string, extract a balanced `{...}`/`[...]` span, extract a bare
//! numeric literal.

use hull_core::HullError;

pub fn skip_ws(input: &[u8], mut i: usize) -> usize {
    while i < input.len() && matches!(input[i], b' ' | b'\t' | b'\n' | b'\r') {
        i += 1;
    }
    i
}

/// Extract a `"..."` string starting at `input[i] == b'"'`, honoring `\"`
/// and `\\` escapes (the document format never needs more than that).
/// Returns the unescaped string and the index just past the closing quote.
pub fn extract_string(input: &[u8], i: usize) -> Result<(String, usize), HullError> {
    if input.get(i) != Some(&b'"') {
        return Err(HullError::invalid_argument("expected '\"' at start of string"));
    }
    let mut j = i + 1;
    let mut out = String::new();
    while j < input.len() {
        match input[j] {
            b'"' => return Ok((out, j + 1)),
            b'\\' if j + 1 < input.len() => {
                match input[j + 1] {
                    b'"' => out.push('"'),
                    b'\\' => out.push('\\'),
                    b'/' => out.push('/'),
                    b'n' => out.push('\n'),
                    b't' => out.push('\t'),
                    b'r' => out.push('\r'),
                    other => out.push(other as char),
                }
                j += 2;
            }
            b => {
                out.push(b as char);
                j += 1;
            }
        }
    }
    Err(HullError::invalid_argument("unterminated string"))
}

/// Extract a balanced `{...}` or `[...]` span starting at `input[i]` being
/// the opening bracket. Returns the raw substring (brackets included) and
/// the index just past the closing bracket. Tracks string/escape state so
/// brackets inside string literals don't confuse depth counting.
pub fn extract_balanced(input: &[u8], i: usize) -> Result<(&str, usize), HullError> {
    let (open, close) = match input.get(i) {
        Some(b'{') => (b'{', b'}'),
        Some(b'[') => (b'[', b']'),
        _ => return Err(HullError::invalid_argument("expected '{' or '[' ")),
    };
    let mut depth = 0i32;
    let mut j = i;
    let mut in_string = false;
    while j < input.len() {
        let b = input[j];
        if in_string {
            if b == b'\\' {
                j += 2;
                continue;
            }
            if b == b'"' {
                in_string = false;
            }
            j += 1;
            continue;
        }
        match b {
            b'"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    let end = j + 1;
                    let span = std::str::from_utf8(&input[i..end])
                        .map_err(|_| HullError::invalid_argument("non-utf8 in document"))?;
                    return Ok((span, end));
                }
            }
            _ => {}
        }
        j += 1;
    }
    Err(HullError::invalid_argument("unbalanced bracket in document"))
}

/// Extract a bare numeric/boolean/null literal (anything not starting
/// with `"`, `{` or `[`) up to the next structural delimiter.
pub fn extract_literal(input: &[u8], i: usize) -> (&str, usize) {
    let mut j = i;
    while j < input.len() && !matches!(input[j], b',' | b'}' | b']' | b' ' | b'\t' | b'\n' | b'\r') {
        j += 1;
    }
    (std::str::from_utf8(&input[i..j]).unwrap_or(""), j)
}

/// Scan a top-level-once JSON object (`{ "k": v, ... }`) at `input[i]`,
/// calling `on_entry(key, value_start_index)` for each key seen at this
/// exact depth. The caller is responsible for consuming the value (string,
/// balanced span, or literal) starting at the index handed to it, and
/// must return the index just past the consumed value.
pub fn for_each_top_level_entry<'a>(
    input: &'a [u8],
    start: usize,
    mut on_entry: impl FnMut(&str, &'a [u8], usize) -> Result<usize, HullError>,
) -> Result<usize, HullError> {
    let mut i = skip_ws(input, start);
    if input.get(i) != Some(&b'{') {
        return Err(HullError::invalid_argument("expected object"));
    }
    i += 1;
    i = skip_ws(input, i);
    if input.get(i) == Some(&b'}') {
        return Ok(i + 1);
    }
    loop {
        i = skip_ws(input, i);
        let (key, after_key) = extract_string(input, i)?;
        i = skip_ws(input, after_key);
        if input.get(i) != Some(&b':') {
            return Err(HullError::invalid_argument("expected ':' after key"));
        }
        i = skip_ws(input, i + 1);
        i = on_entry(&key, input, i)?;
        i = skip_ws(input, i);
        match input.get(i) {
            Some(b',') => {
                i += 1;
                continue;
            }
            Some(b'}') => return Ok(i + 1),
            _ => return Err(HullError::invalid_argument("expected ',' or '}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_string_handles_escapes() {
        let input = br#""hello \"world\"""#;
        let (s, end) = extract_string(input, 0).unwrap();
        assert_eq!(s, "hello \"world\"");
        assert_eq!(end, input.len());
    }

    #[test]
    fn extract_balanced_skips_nested_braces_and_strings() {
        let input = br#"{"a": {"b": 1}, "c": "}"}"#;
        let (span, end) = extract_balanced(input, 0).unwrap();
        assert_eq!(span, r#"{"a": {"b": 1}, "c": "}"}"#);
        assert_eq!(end, input.len());
    }

    #[test]
    fn for_each_top_level_entry_visits_keys_at_depth_one_only() {
        let input = br#"{"a": {"nested_a": 1}, "b": 2}"#;
        let mut seen = Vec::new();
        for_each_top_level_entry(input, 0, |key, bytes, idx| {
            seen.push(key.to_string());
            match bytes.get(idx) {
                Some(b'{') => {
                    let (_, end) = extract_balanced(bytes, idx)?;
                    Ok(end)
                }
                _ => {
                    let (_, end) = extract_literal(bytes, idx);
                    Ok(end)
                }
            }
        })
        .unwrap();
        assert_eq!(seen, vec!["a".to_string(), "b".to_string()]);
    }
}
