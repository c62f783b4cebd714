//! Output text assembly
//!
//! Token pieces coming out of the detokenizer may split multi-byte UTF-8
//! characters, so raw bytes are parked in a pending buffer until they form a
//! complete valid string. The accumulated output is also scanned for a first
//! balanced top-level JSON object, which the generation loop treats as an
//! early-stop signal.

/// Accumulates detokenized bytes into valid UTF-8 output.
///
/// The output string only ever receives complete code points. Bytes that do
/// not yet form valid UTF-8 wait in `pending` across loop iterations; they
/// never survive past the generate call — `into_text` drops them.
#[derive(Debug, Default)]
pub struct Utf8Assembler {
    output: String,
    pending: Vec<u8>,
}

impl Utf8Assembler {
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            output: String::with_capacity(bytes),
            pending: Vec::new(),
        }
    }

    /// Appends a detokenized fragment.
    ///
    /// Returns `true` when the pending buffer became valid UTF-8 and was
    /// flushed into the output, which is the signal to re-scan the output
    /// for stop conditions.
    pub fn push(&mut self, fragment: &[u8]) -> bool {
        self.pending.extend_from_slice(fragment);
        match std::str::from_utf8(&self.pending) {
            Ok(s) => {
                self.output.push_str(s);
                self.pending.clear();
                true
            }
            Err(_) => false,
        }
    }

    /// The complete text flushed so far.
    pub fn text(&self) -> &str {
        &self.output
    }

    /// Finishes assembly, discarding any trailing partial sequence.
    pub fn into_text(self) -> String {
        self.output
    }
}

/// Reports whether `text` contains a complete top-level JSON object.
///
/// Linear scan tracking brace depth and quoted-string state, honoring
/// backslash escapes. A `{` at depth 0 starts a candidate; the `}` that
/// returns the depth to 0 completes it. Only brace/string balance is
/// checked — this is a stop heuristic, not a JSON validator — and only the
/// first balanced pair matters. A stray `}` at depth 0 is ignored.
pub fn has_complete_json_object(text: &str) -> bool {
    let mut depth = 0usize;
    let mut started = false;
    let mut in_string = false;
    let mut escaping = false;

    for ch in text.bytes() {
        if in_string {
            if escaping {
                escaping = false;
            } else if ch == b'\\' {
                escaping = true;
            } else if ch == b'"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            b'"' => in_string = true,
            b'{' => {
                if depth == 0 {
                    started = true;
                }
                depth += 1;
            }
            b'}' if depth > 0 => {
                depth -= 1;
                if depth == 0 && started {
                    return true;
                }
            }
            _ => {}
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_flushes_immediately() {
        let mut asm = Utf8Assembler::default();
        assert!(asm.push(b"hello"));
        assert_eq!(asm.text(), "hello");
    }

    #[test]
    fn test_split_two_byte_char_is_held_then_flushed() {
        // "é" = 0xC3 0xA9
        let mut asm = Utf8Assembler::default();
        assert!(!asm.push(&[0xC3]));
        assert_eq!(asm.text(), "");
        assert!(asm.push(&[0xA9]));
        assert_eq!(asm.text(), "é");
    }

    #[test]
    fn test_split_four_byte_char_across_three_pushes() {
        // "😀" = F0 9F 98 80
        let mut asm = Utf8Assembler::default();
        assert!(!asm.push(&[0xF0]));
        assert!(!asm.push(&[0x9F, 0x98]));
        assert!(asm.push(&[0x80]));
        assert_eq!(asm.text(), "😀");
    }

    #[test]
    fn test_trailing_partial_sequence_is_discarded() {
        let mut asm = Utf8Assembler::default();
        asm.push(b"ok");
        asm.push(&[0xE2, 0x82]); // first two bytes of "€"
        assert_eq!(asm.into_text(), "ok");
    }

    #[test]
    fn test_pending_bytes_join_earlier_fragment() {
        let mut asm = Utf8Assembler::default();
        assert!(!asm.push(&[0xE2, 0x82]));
        assert!(asm.push(&[0xAC, b'!']));
        assert_eq!(asm.text(), "€!");
    }

    #[test]
    fn test_scanner_finds_simple_object() {
        assert!(has_complete_json_object(r#"{"greeting":"hi"}"#));
    }

    #[test]
    fn test_scanner_waits_for_closing_brace() {
        assert!(!has_complete_json_object(r#"{"greeting":"hi""#));
        assert!(!has_complete_json_object("{"));
        assert!(!has_complete_json_object(""));
    }

    #[test]
    fn test_scanner_tracks_nested_objects() {
        assert!(!has_complete_json_object(r#"{"a":{"b":1}"#));
        assert!(has_complete_json_object(r#"{"a":{"b":1}}"#));
    }

    #[test]
    fn test_scanner_ignores_braces_inside_strings() {
        assert!(!has_complete_json_object(r#"{"a":"}""#));
        assert!(has_complete_json_object(r#"{"a":"{not a brace}"}"#));
    }

    #[test]
    fn test_scanner_honors_escaped_quotes() {
        // The \" does not close the string, so the } is still inside it.
        assert!(!has_complete_json_object(r#"{"a":"say \"}"#));
        assert!(has_complete_json_object(r#"{"a":"say \"hi\""}"#));
    }

    #[test]
    fn test_scanner_allows_prose_before_object() {
        assert!(has_complete_json_object(r#"Sure, here you go: {"x":1} trailing"#));
    }

    #[test]
    fn test_scanner_ignores_stray_closing_brace() {
        assert!(!has_complete_json_object("} not json"));
        assert!(has_complete_json_object(r#"} {"x":1}"#));
    }

    #[test]
    fn test_scanner_stops_at_first_balanced_object() {
        // Both prefixes that end a first object must already report true;
        // what follows is irrelevant to the heuristic.
        let text = r#"{"a":1}{"b":2}"#;
        assert!(has_complete_json_object(&text[..7]));
        assert!(has_complete_json_object(text));
    }

    #[test]
    fn test_scanner_agrees_with_real_parser_on_detected_prefix() {
        let text = r#"{"greeting":"hi","n":[1,2,{"k":"v\""}]}"#;
        assert!(has_complete_json_object(text));
        let parsed: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(parsed["greeting"], "hi");
    }
}
