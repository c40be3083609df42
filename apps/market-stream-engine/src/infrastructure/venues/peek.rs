//! Shallow JSON Peeks
//!
//! Byte-pattern lookups used by classifiers. Every lookup reads a fixed
//! window at the start of the payload, so classification cost does not
//! grow with message size. Venue envelopes put their discriminating keys
//! (`topic`, `op`, `e`, `type`, `stream`) near the front.

/// Bytes of a payload inspected by the lookups.
pub const PEEK_WINDOW: usize = 256;

/// The inspected prefix of `buf`.
#[must_use]
pub fn window(buf: &[u8]) -> &[u8] {
    &buf[..buf.len().min(PEEK_WINDOW)]
}

/// Position just after the first occurrence of `pattern` at or past `start`.
#[must_use]
pub fn find_after(buf: &[u8], start: usize, pattern: &[u8]) -> Option<usize> {
    let first = *pattern.first()?;
    let len = pattern.len();
    let mut i = start;
    while i + len <= buf.len() {
        if buf[i] == first && buf[i..i + len] == *pattern {
            return Some(i + len);
        }
        i += 1;
    }
    None
}

fn skip_ws(buf: &[u8], mut pos: usize) -> usize {
    while let Some(b' ' | b'\t' | b'\n' | b'\r') = buf.get(pos) {
        pos += 1;
    }
    pos
}

/// Position of the value of `"key":` inside the window.
fn value_start(buf: &[u8], key: &str) -> Option<usize> {
    let buf = window(buf);
    let key = key.as_bytes();

    let mut from = 0;
    loop {
        let after = find_after(buf, from, key)?;
        let begin = after - key.len();
        from = after;
        let quoted = begin > 0 && buf[begin - 1] == b'"' && buf.get(after) == Some(&b'"');
        if !quoted {
            continue;
        }
        let colon = skip_ws(buf, after + 1);
        if buf.get(colon) == Some(&b':') {
            return Some(skip_ws(buf, colon + 1));
        }
    }
}

/// Whether `"key":` appears in the window.
#[must_use]
pub fn has_key(buf: &[u8], key: &str) -> bool {
    value_start(buf, key).is_some()
}

/// The raw bytes of a string value `"key":"..."` in the window.
///
/// Escapes are skipped over, not decoded. A value cut off by the window
/// end is not returned.
#[must_use]
pub fn str_field<'a>(buf: &'a [u8], key: &str) -> Option<&'a [u8]> {
    let start = value_start(buf, key)?;
    let buf = window(buf);
    if buf.get(start) != Some(&b'"') {
        return None;
    }
    let mut pos = start + 1;
    while pos < buf.len() {
        match buf[pos] {
            b'"' => return Some(&buf[start + 1..pos]),
            b'\\' => pos += 2,
            _ => pos += 1,
        }
    }
    None
}

/// A boolean value `"key":true|false` in the window.
#[must_use]
pub fn bool_field(buf: &[u8], key: &str) -> Option<bool> {
    let start = value_start(buf, key)?;
    let rest = &window(buf)[start..];
    if rest.starts_with(b"true") {
        Some(true)
    } else if rest.starts_with(b"false") {
        Some(false)
    } else {
        None
    }
}

/// First non-whitespace byte, used as the magic byte of JSON payloads.
#[must_use]
pub fn first_byte(buf: &[u8]) -> Option<u8> {
    buf.get(skip_ws(buf, 0)).copied()
}

/// Whether the payload looks like a JSON object or array.
#[must_use]
pub fn is_json(buf: &[u8]) -> bool {
    matches!(first_byte(buf), Some(b'{' | b'['))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_fields() {
        let msg = br#"{"op": "auth", "success":true,"ret_msg":""}"#;
        assert_eq!(str_field(msg, "op"), Some(&b"auth"[..]));
        assert_eq!(str_field(msg, "ret_msg"), Some(&b""[..]));
        assert_eq!(str_field(msg, "missing"), None);
        assert_eq!(bool_field(msg, "success"), Some(true));
    }

    #[test]
    fn key_must_be_followed_by_colon() {
        let msg = br#"{"args":["op"],"op":"pong"}"#;
        assert_eq!(str_field(msg, "op"), Some(&b"pong"[..]));
    }

    #[test]
    fn escaped_quotes_do_not_end_value() {
        let msg = br#"{"msg":"a \"quoted\" word","code":1}"#;
        assert_eq!(str_field(msg, "msg"), Some(&br#"a \"quoted\" word"#[..]));
    }

    #[test]
    fn lookups_stop_at_window() {
        let mut msg = br#"{"pad":""#.to_vec();
        msg.extend(std::iter::repeat_n(b'x', PEEK_WINDOW));
        msg.extend_from_slice(br#"","topic":"trade"}"#);
        assert!(!has_key(&msg, "topic"));
    }

    #[test]
    fn magic_byte() {
        assert!(is_json(b"  {\"a\":1}"));
        assert!(is_json(b"[1]"));
        assert!(!is_json(b"PING"));
        assert!(!is_json(b""));
    }
}
