//! A minimal incremental (push-style) XML scanner.
//!
//! `xml-rs`, the teacher crate's XML dependency, is a pull parser: it
//! drives itself by calling `Read::read` on its source, which means the
//! only way to feed it bytes as they arrive off a fetch stream is to
//! park a real thread on a blocking reader. That is incompatible with
//! the single-threaded, non-blocking contract in spec §5 (see
//! `SPEC_FULL.md` §4.2), so this module takes over the dependency's job
//! with a small scanner of our own: `feed` is handed whatever bytes were
//! just read off the stream and calls back into an [`ElementSink`]
//! (`start`/`end`/`text`) for every complete token it can make out of
//! what has accumulated so far, buffering the rest for the next call.
//!
//! The attribute-handling API (`Attributes::take_req`/`take_opt`/
//! `exhausted`) mirrors the calling convention `rrdpit::rrdp` already
//! uses against its own (not included in this pack) `XmlReader`.

use std::collections::VecDeque;

/// One open/close/text callback, invoked synchronously from `feed` or
/// `finish` as soon as a complete token is available.
pub trait ElementSink {
    fn start(&mut self, name: &str, attrs: &mut Attributes) -> Result<(), XmlError>;
    fn end(&mut self, name: &str) -> Result<(), XmlError>;
    fn text(&mut self, chunk: &[u8]) -> Result<(), XmlError>;
}

/// The attributes of one start tag, consumed by name as the caller
/// validates the element against its schema. Any attribute left over
/// when `exhausted` is called is a schema violation.
#[derive(Debug, Default)]
pub struct Attributes {
    items: Vec<(String, String)>,
}

impl Attributes {
    fn new(items: Vec<(String, String)>) -> Self {
        Attributes { items }
    }

    /// Removes and returns a required attribute, or a [`XmlError`] if
    /// absent.
    pub fn take_req(&mut self, name: &str) -> Result<String, XmlError> {
        self.take_opt(name)
            .ok_or_else(|| XmlError::MissingAttribute(name.to_string()))
    }

    /// Removes and returns an optional attribute.
    pub fn take_opt(&mut self, name: &str) -> Option<String> {
        let idx = self.items.iter().position(|(k, _)| k == name)?;
        Some(self.items.remove(idx).1)
    }

    /// Fails if any attribute was never consumed by `take_req`/`take_opt`.
    pub fn exhausted(&self) -> Result<(), XmlError> {
        match self.items.first() {
            Some((k, _)) => Err(XmlError::UnexpectedAttribute(k.clone())),
            None => Ok(()),
        }
    }
}

/// A parse failure: malformed markup or a schema violation surfaced by
/// an [`ElementSink`] callback.
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum XmlError {
    #[display("unterminated tag")]
    UnterminatedTag,

    #[display("malformed start or end tag")]
    MalformedTag,

    #[display("mismatched end tag: expected {expected}, found {found}")]
    MismatchedEnd { expected: String, found: String },

    #[display("unexpected end of input")]
    UnexpectedEof,

    #[display("invalid entity reference")]
    InvalidEntity,

    #[display("missing required attribute {_0}")]
    MissingAttribute(String),

    #[display("unexpected attribute {_0}")]
    UnexpectedAttribute(String),

    #[display("unexpected element {_0}")]
    UnexpectedElement(String),

    #[display("unexpected end of element {_0}")]
    UnexpectedEnd(String),

    #[display("unexpected character data")]
    UnexpectedText,

    #[display("invalid attribute value for {name}: {value:?}")]
    InvalidAttributeValue { name: String, value: String },

    #[display("duplicate delta serial {_0}")]
    DuplicateDelta(u64),
}

impl std::error::Error for XmlError {}

/// The incremental scanner. One `Lexer` per open document/stream.
pub struct Lexer {
    buf: VecDeque<u8>,
    /// Open element names, used to check that end tags match.
    stack: Vec<String>,
}

impl Lexer {
    pub fn new() -> Self {
        Lexer {
            buf: VecDeque::new(),
            stack: Vec::new(),
        }
    }

    /// Feeds more bytes, dispatching every complete token they complete
    /// to `sink`. Bytes that don't yet form a complete token are kept
    /// for the next call.
    pub fn feed(&mut self, bytes: &[u8], sink: &mut dyn ElementSink) -> Result<(), XmlError> {
        self.buf.extend(bytes);
        self.drain(sink)
    }

    /// Signals end of input. Fails if a tag or entity was left
    /// incomplete, or if any element is still open.
    pub fn finish(&mut self, sink: &mut dyn ElementSink) -> Result<(), XmlError> {
        self.drain(sink)?;
        if !self.buf.is_empty() {
            // Trailing bytes that are not a complete tag are only
            // tolerable if they're pure whitespace (trailing newline).
            if self.buf.iter().any(|b| !b.is_ascii_whitespace()) {
                return Err(XmlError::UnexpectedEof);
            }
        }
        if !self.stack.is_empty() {
            return Err(XmlError::UnexpectedEof);
        }
        Ok(())
    }

    fn drain(&mut self, sink: &mut dyn ElementSink) -> Result<(), XmlError> {
        loop {
            let slice = self.buf.make_contiguous();
            if slice.is_empty() {
                return Ok(());
            }
            if slice[0] == b'<' {
                match find_tag_end(slice) {
                    None => return Ok(()), // need more bytes
                    Some(end) => {
                        let tag = &slice[..end];
                        self.dispatch_tag(tag, sink)?;
                        self.buf.drain(..end);
                    }
                }
            } else {
                let text_end = slice.iter().position(|&b| b == b'<').unwrap_or(slice.len());
                let at_eof_boundary = text_end == slice.len();
                let safe_end = if at_eof_boundary {
                    pending_entity_boundary(&slice[..text_end])
                } else {
                    text_end
                };
                if safe_end > 0 {
                    let decoded = decode_entities(&slice[..safe_end])?;
                    dispatch_text(&decoded, sink)?;
                    self.buf.drain(..safe_end);
                }
                if at_eof_boundary {
                    return Ok(()); // wait for more data (end of tag or entity unresolved)
                }
                if safe_end == 0 {
                    // A '<' follows immediately; loop back to tag branch.
                    continue;
                }
            }
        }
    }

    fn dispatch_tag(&mut self, tag: &[u8], sink: &mut dyn ElementSink) -> Result<(), XmlError> {
        debug_assert!(tag.first() == Some(&b'<') && tag.last() == Some(&b'>'));
        let inner = &tag[1..tag.len() - 1];

        if inner.starts_with(b"?") || inner.starts_with(b"!--") {
            return Ok(()); // processing instruction / comment, ignored
        }

        if let Some(rest) = inner.strip_prefix(b"/") {
            let name = std::str::from_utf8(rest)
                .map_err(|_| XmlError::MalformedTag)?
                .trim();
            return self.dispatch_end(name, sink);
        }

        let (self_closing, body) = match inner.strip_suffix(b"/") {
            Some(b) => (true, b),
            None => (false, inner),
        };

        let (name, attrs) = parse_open_tag(body)?;
        self.stack.push(name.clone());
        sink.start(&name, &mut Attributes::new(attrs))?;
        if self_closing {
            self.dispatch_end(&name, sink)?;
        }
        Ok(())
    }

    fn dispatch_end(&mut self, name: &str, sink: &mut dyn ElementSink) -> Result<(), XmlError> {
        match self.stack.pop() {
            Some(open) if open == name => sink.end(name),
            Some(open) => Err(XmlError::MismatchedEnd {
                expected: open,
                found: name.to_string(),
            }),
            None => Err(XmlError::MismatchedEnd {
                expected: String::new(),
                found: name.to_string(),
            }),
        }
    }
}

impl Default for Lexer {
    fn default() -> Self {
        Self::new()
    }
}

fn dispatch_text(bytes: &[u8], sink: &mut dyn ElementSink) -> Result<(), XmlError> {
    // Ignore a sole newline chunk, per spec §4.2 ("parsing optimization").
    if bytes == b"\n" {
        return Ok(());
    }
    sink.text(bytes)
}

/// Finds the end (index one past `>`) of the tag starting at `slice[0]`
/// (`slice[0] == '<'`), respecting quoted attribute values. Returns
/// `None` if the tag is not yet fully buffered.
fn find_tag_end(slice: &[u8]) -> Option<usize> {
    let mut i = 1;
    let mut quote: Option<u8> = None;
    while i < slice.len() {
        let b = slice[i];
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'"' | b'\'' => quote = Some(b),
                b'>' => return Some(i + 1),
                _ => {}
            },
        }
        i += 1;
    }
    None
}

/// If `text` ends with an unterminated `&...` entity reference, returns
/// the index right before the `&` (the safe boundary to flush up to).
/// Otherwise returns `text.len()`.
fn pending_entity_boundary(text: &[u8]) -> usize {
    if let Some(amp) = text.iter().rposition(|&b| b == b'&') {
        if !text[amp..].contains(&b';') {
            return amp;
        }
    }
    text.len()
}

fn parse_open_tag(body: &[u8]) -> Result<(String, Vec<(String, String)>), XmlError> {
    let body = std::str::from_utf8(body).map_err(|_| XmlError::MalformedTag)?;
    let name_end = body.find(char::is_whitespace).unwrap_or(body.len());
    let name = body[..name_end].to_string();
    if name.is_empty() {
        return Err(XmlError::MalformedTag);
    }

    let mut attrs = Vec::new();
    let rest = body[name_end..].trim_start();
    let mut remainder = rest;
    while !remainder.is_empty() {
        let eq = remainder.find('=').ok_or(XmlError::MalformedTag)?;
        let attr_name = remainder[..eq].trim().to_string();
        if attr_name.is_empty() {
            return Err(XmlError::MalformedTag);
        }
        let after_eq = remainder[eq + 1..].trim_start();
        let quote = after_eq.chars().next().ok_or(XmlError::MalformedTag)?;
        if quote != '"' && quote != '\'' {
            return Err(XmlError::MalformedTag);
        }
        let value_src = &after_eq[1..];
        let close = value_src.find(quote).ok_or(XmlError::MalformedTag)?;
        let raw_value = &value_src[..close];
        let value = decode_entities(raw_value.as_bytes())?;
        let value = String::from_utf8(value).map_err(|_| XmlError::MalformedTag)?;
        attrs.push((attr_name, value));
        remainder = value_src[close + 1..].trim_start();
    }

    Ok((name, attrs))
}

fn decode_entities(bytes: &[u8]) -> Result<Vec<u8>, XmlError> {
    if !bytes.contains(&b'&') {
        return Ok(bytes.to_vec());
    }
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'&' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        let end = bytes[i..]
            .iter()
            .position(|&b| b == b';')
            .map(|p| i + p)
            .ok_or(XmlError::InvalidEntity)?;
        let entity = &bytes[i + 1..end];
        match entity {
            b"amp" => out.push(b'&'),
            b"lt" => out.push(b'<'),
            b"gt" => out.push(b'>'),
            b"apos" => out.push(b'\''),
            b"quot" => out.push(b'"'),
            _ if entity.starts_with(b"#x") || entity.starts_with(b"#X") => {
                let code = std::str::from_utf8(&entity[2..])
                    .ok()
                    .and_then(|s| u32::from_str_radix(s, 16).ok())
                    .ok_or(XmlError::InvalidEntity)?;
                push_codepoint(&mut out, code)?;
            }
            _ if entity.starts_with(b"#") => {
                let code = std::str::from_utf8(&entity[1..])
                    .ok()
                    .and_then(|s| s.parse::<u32>().ok())
                    .ok_or(XmlError::InvalidEntity)?;
                push_codepoint(&mut out, code)?;
            }
            _ => return Err(XmlError::InvalidEntity),
        }
        i = end + 1;
    }
    Ok(out)
}

fn push_codepoint(out: &mut Vec<u8>, code: u32) -> Result<(), XmlError> {
    let c = char::from_u32(code).ok_or(XmlError::InvalidEntity)?;
    let mut tmp = [0u8; 4];
    out.extend_from_slice(c.encode_utf8(&mut tmp).as_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl ElementSink for Recorder {
        fn start(&mut self, name: &str, attrs: &mut Attributes) -> Result<(), XmlError> {
            let mut kv: Vec<String> = attrs
                .items
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            kv.sort();
            self.events.push(format!("start {name} [{}]", kv.join(",")));
            attrs.items.clear();
            Ok(())
        }
        fn end(&mut self, name: &str) -> Result<(), XmlError> {
            self.events.push(format!("end {name}"));
            Ok(())
        }
        fn text(&mut self, chunk: &[u8]) -> Result<(), XmlError> {
            self.events
                .push(format!("text {}", String::from_utf8_lossy(chunk)));
            Ok(())
        }
    }

    #[test]
    fn parses_whole_document_in_one_feed() {
        let doc = br#"<a x="1"><b>hi</b></a>"#;
        let mut lexer = Lexer::new();
        let mut rec = Recorder::default();
        lexer.feed(doc, &mut rec).unwrap();
        lexer.finish(&mut rec).unwrap();
        assert_eq!(
            rec.events,
            vec!["start a [x=1]", "start b []", "text hi", "end b", "end a"]
        );
    }

    #[test]
    fn self_closing_tag_emits_start_and_end() {
        let doc = br#"<snapshot uri="x" hash="y"/>"#;
        let mut lexer = Lexer::new();
        let mut rec = Recorder::default();
        lexer.feed(doc, &mut rec).unwrap();
        lexer.finish(&mut rec).unwrap();
        assert_eq!(
            rec.events,
            vec!["start snapshot [hash=y,uri=x]", "end snapshot"]
        );
    }

    #[test]
    fn feeds_byte_at_a_time() {
        let doc = br#"<a><b>hello world</b></a>"#;
        let mut lexer = Lexer::new();
        let mut rec = Recorder::default();
        for byte in doc {
            lexer.feed(&[*byte], &mut rec).unwrap();
        }
        lexer.finish(&mut rec).unwrap();
        assert!(rec.events.contains(&"end a".to_string()));
        let text: String = rec
            .events
            .iter()
            .filter_map(|e| e.strip_prefix("text "))
            .collect();
        assert_eq!(text, "hello world");
    }

    #[test]
    fn gt_inside_quoted_attribute_is_not_a_tag_end() {
        let doc = br#"<a x="1>2"></a>"#;
        let mut lexer = Lexer::new();
        let mut rec = Recorder::default();
        lexer.feed(doc, &mut rec).unwrap();
        lexer.finish(&mut rec).unwrap();
        assert_eq!(rec.events, vec!["start a [x=1>2]", "end a"]);
    }

    #[test]
    fn entity_decoding() {
        let doc = b"<a>&lt;tag&gt; &amp; &#65;</a>";
        let mut lexer = Lexer::new();
        let mut rec = Recorder::default();
        lexer.feed(doc, &mut rec).unwrap();
        lexer.finish(&mut rec).unwrap();
        assert_eq!(rec.events, vec!["start a []", "text <tag> & A", "end a"]);
    }

    #[test]
    fn entity_split_across_feed_calls() {
        let doc = b"<a>x&am" as &[u8];
        let rest = b"p;y</a>" as &[u8];
        let mut lexer = Lexer::new();
        let mut rec = Recorder::default();
        lexer.feed(doc, &mut rec).unwrap();
        lexer.feed(rest, &mut rec).unwrap();
        lexer.finish(&mut rec).unwrap();
        let text: String = rec
            .events
            .iter()
            .filter_map(|e| e.strip_prefix("text "))
            .collect();
        assert_eq!(text, "x&y");
    }

    #[test]
    fn mismatched_end_tag_is_an_error() {
        let doc = b"<a><b></a></b>";
        let mut lexer = Lexer::new();
        let mut rec = Recorder::default();
        assert!(lexer.feed(doc, &mut rec).is_err());
    }

    #[test]
    fn unclosed_element_at_finish_is_an_error() {
        let doc = b"<a><b></b>";
        let mut lexer = Lexer::new();
        let mut rec = Recorder::default();
        lexer.feed(doc, &mut rec).unwrap();
        assert!(lexer.finish(&mut rec).is_err());
    }

    #[test]
    fn lone_newline_text_chunk_is_ignored() {
        let doc = b"<a>\n</a>";
        let mut lexer = Lexer::new();
        let mut rec = Recorder::default();
        lexer.feed(doc, &mut rec).unwrap();
        lexer.finish(&mut rec).unwrap();
        assert_eq!(rec.events, vec!["start a []", "end a"]);
    }

    #[test]
    fn sink_error_propagates() {
        struct Rejecting;
        impl ElementSink for Rejecting {
            fn start(&mut self, name: &str, _attrs: &mut Attributes) -> Result<(), XmlError> {
                Err(XmlError::UnexpectedElement(name.to_string()))
            }
            fn end(&mut self, _name: &str) -> Result<(), XmlError> {
                Ok(())
            }
            fn text(&mut self, _chunk: &[u8]) -> Result<(), XmlError> {
                Ok(())
            }
        }
        let mut lexer = Lexer::new();
        let mut sink = Rejecting;
        assert!(lexer.feed(b"<a></a>", &mut sink).is_err());
    }
}
