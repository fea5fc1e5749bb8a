//! Inline markup tool-call parsing.
//!
//! Markup tool calls are XML-like blocks embedded in model prose
//! (`<tag attr="v">body</tag>`). The parser works incrementally over a
//! growing buffer: complete blocks are drained and consumed exactly once,
//! an unterminated block leaves the buffer untouched until more input
//! arrives, and a stray closing tag is plain prose.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Where in a block a parameter is read from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MappingKind {
    /// Named attribute on the opening tag.
    Attribute,
    /// Content of a named nested element.
    Element,
    /// Body of the outer tag (path ".").
    Content,
}

/// Maps one markup location to one tool parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkupMapping {
    pub param_name: String,
    pub kind: MappingKind,
    pub path: String,
    pub required: bool,
}

/// The markup form of a tool method: tag name plus parameter mappings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkupSchema {
    pub tag_name: String,
    pub mappings: Vec<MarkupMapping>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum MarkupError {
    #[error("block has no recognizable tag")]
    NoTag,
    #[error("missing required parameters: {0:?}")]
    MissingRequired(Vec<String>),
}

// ── Entity escaping ──────────────────────────────────────────────

/// Decode the five XML entities. `&amp;` is decoded last so that
/// `&amp;lt;` yields the literal `&lt;`.
pub fn decode_entities(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Encode the five XML entities. `&` is encoded first.
pub fn encode_entities(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

// ── Block extraction ─────────────────────────────────────────────

/// Find an opening delimiter `<tag` at or after `from`, requiring a tag
/// boundary (whitespace, `>` or `/`) so that tag `x` does not match `<xy>`.
fn find_open(haystack: &str, tag: &str, from: usize) -> Option<usize> {
    let needle = format!("<{tag}");
    let mut pos = from;
    while let Some(rel) = haystack[pos..].find(&needle) {
        let start = pos + rel;
        let after = start + needle.len();
        match haystack[after..].chars().next() {
            Some(c) if c.is_whitespace() || c == '>' || c == '/' => return Some(start),
            None => return None, // buffer ends mid-tag; wait for more input
            _ => pos = start + 1,
        }
    }
    None
}

/// Locate the end of one complete block starting at `start` (which points at
/// an opening `<tag`). Returns the exclusive end offset, or None if the
/// block is not yet complete in the buffer.
fn find_block_end(buffer: &str, tag: &str, start: usize) -> Option<usize> {
    let open_end = buffer[start..].find('>').map(|i| start + i)?;

    // Self-closing form: `<tag .../>` is a complete block with empty body.
    if buffer[..open_end].ends_with('/') {
        return Some(open_end + 1);
    }

    let close = format!("</{tag}>");
    let mut depth = 1usize;
    let mut pos = open_end + 1;
    loop {
        let next_close = buffer[pos..].find(&close).map(|i| pos + i)?;
        let next_open = find_open(buffer, tag, pos);
        match next_open {
            Some(o) if o < next_close => {
                // Nested same-named opening tag (unless self-closing).
                let inner_end = buffer[o..].find('>').map(|i| o + i)?;
                if !buffer[..inner_end].ends_with('/') {
                    depth += 1;
                }
                pos = inner_end + 1;
            }
            _ => {
                depth -= 1;
                if depth == 0 {
                    return Some(next_close + close.len());
                }
                pos = next_close + close.len();
            }
        }
    }
}

/// Drain every complete block for any of the known tags from the buffer.
///
/// Blocks are removed from the buffer (consumed exactly once) in document
/// order; anything before, between, or after them stays. An opening tag
/// with no closing tag yet leaves the buffer untouched from that point on.
pub fn drain_blocks(buffer: &mut String, tags: &[String]) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut scan = 0usize;

    loop {
        // Earliest occurrence of any known tag's opening delimiter.
        let mut earliest: Option<(usize, &str)> = None;
        for tag in tags {
            if let Some(pos) = find_open(buffer, tag, scan) {
                if earliest.map_or(true, |(p, _)| pos < p) {
                    earliest = Some((pos, tag));
                }
            }
        }
        let Some((start, tag)) = earliest else { break };

        match find_block_end(buffer, tag, start) {
            Some(end) => {
                blocks.push(buffer[start..end].to_string());
                buffer.replace_range(start..end, "");
                scan = start;
            }
            None => break, // incomplete block: await more input
        }
    }

    if !blocks.is_empty() {
        debug!(count = blocks.len(), "drained markup blocks");
    }
    blocks
}

// ── Block parsing ────────────────────────────────────────────────

/// The tag name of a block: characters after `<` up to whitespace, `>` or `/`.
pub fn block_tag(block: &str) -> Option<&str> {
    let rest = block.strip_prefix('<')?;
    let end = rest.find(|c: char| c.is_whitespace() || c == '>' || c == '/')?;
    if end == 0 {
        return None;
    }
    Some(&rest[..end])
}

/// Extract a named attribute from an opening tag. Handles double-quoted,
/// single-quoted, and bare values, decoding XML entities.
fn extract_attribute(opening_tag: &str, name: &str) -> Option<String> {
    let mut pos = 0;
    let needle = format!("{name}=");
    while let Some(rel) = opening_tag[pos..].find(&needle) {
        let at = pos + rel;
        // Attribute names start after whitespace, not mid-word.
        let boundary = at == 0
            || opening_tag[..at]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_whitespace());
        if !boundary {
            pos = at + 1;
            continue;
        }
        let value_start = at + needle.len();
        let rest = &opening_tag[value_start..];
        let raw = match rest.chars().next() {
            Some('"') => rest[1..].find('"').map(|end| &rest[1..1 + end]),
            Some('\'') => rest[1..].find('\'').map(|end| &rest[1..1 + end]),
            Some(_) => {
                let end = rest
                    .find(|c: char| c.is_whitespace() || c == '/' || c == '>')
                    .unwrap_or(rest.len());
                Some(&rest[..end])
            }
            None => None,
        };
        return raw.map(decode_entities);
    }
    None
}

/// Extract the body of the first `tag` element in `chunk`, accounting for
/// same-named nesting. Returns `(body, rest_after_closing_tag)`.
fn extract_tag_content<'a>(chunk: &'a str, tag: &str) -> Option<(&'a str, &'a str)> {
    let start = find_open(chunk, tag, 0)?;
    let open_end = chunk[start..].find('>').map(|i| start + i)?;
    if chunk[..open_end].ends_with('/') {
        return Some(("", &chunk[open_end + 1..]));
    }

    let close = format!("</{tag}>");
    let content_start = open_end + 1;
    let mut depth = 1usize;
    let mut pos = content_start;
    loop {
        let next_close = chunk[pos..].find(&close).map(|i| pos + i)?;
        match find_open(chunk, tag, pos) {
            Some(o) if o < next_close => {
                let inner_end = chunk[o..].find('>').map(|i| o + i)?;
                if !chunk[..inner_end].ends_with('/') {
                    depth += 1;
                }
                pos = inner_end + 1;
            }
            _ => {
                depth -= 1;
                if depth == 0 {
                    return Some((&chunk[content_start..next_close], &chunk[next_close + close.len()..]));
                }
                pos = next_close + close.len();
            }
        }
    }
}

impl MarkupSchema {
    /// Parse a complete block against this schema into an argument map.
    ///
    /// Optional parameters default to absent; missing required parameters
    /// fail the whole block.
    pub fn parse_arguments(&self, block: &str) -> Result<Map<String, Value>, MarkupError> {
        let mut params = Map::new();
        let opening_end = block.find('>').unwrap_or(block.len());
        let opening_tag = &block[..opening_end];
        let mut remaining = block;

        for mapping in &self.mappings {
            match mapping.kind {
                MappingKind::Attribute => {
                    if let Some(value) = extract_attribute(opening_tag, &mapping.path) {
                        params.insert(mapping.param_name.clone(), Value::String(value));
                    }
                }
                MappingKind::Element => {
                    if let Some((content, rest)) = extract_tag_content(remaining, &mapping.path) {
                        params.insert(
                            mapping.param_name.clone(),
                            Value::String(content.trim().to_string()),
                        );
                        remaining = rest;
                    }
                }
                MappingKind::Content => {
                    if mapping.path == "." {
                        if let Some((content, _)) = extract_tag_content(block, &self.tag_name) {
                            params.insert(
                                mapping.param_name.clone(),
                                Value::String(content.trim().to_string()),
                            );
                        }
                    }
                }
            }
        }

        let missing: Vec<String> = self
            .mappings
            .iter()
            .filter(|m| m.required && !params.contains_key(&m.param_name))
            .map(|m| m.param_name.clone())
            .collect();
        if !missing.is_empty() {
            warn!(tag = %self.tag_name, ?missing, "markup block missing required parameters");
            return Err(MarkupError::MissingRequired(missing));
        }

        Ok(params)
    }

    /// Serialize an argument map back into a markup block. Inverse of
    /// [`parse_arguments`](Self::parse_arguments) for string-valued params.
    pub fn render(&self, args: &Map<String, Value>) -> String {
        let as_text = |v: &Value| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        let mut attrs = String::new();
        let mut elements = String::new();
        let mut body = String::new();

        for mapping in &self.mappings {
            let Some(value) = args.get(&mapping.param_name) else { continue };
            match mapping.kind {
                MappingKind::Attribute => {
                    attrs.push_str(&format!(" {}=\"{}\"", mapping.path, encode_entities(&as_text(value))));
                }
                MappingKind::Element => {
                    elements.push_str(&format!("<{0}>{1}</{0}>", mapping.path, as_text(value)));
                }
                MappingKind::Content => {
                    body = as_text(value);
                }
            }
        }

        format!("<{0}{1}>{2}{3}</{0}>", self.tag_name, attrs, elements, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn content_schema(tag: &str, param: &str) -> MarkupSchema {
        MarkupSchema {
            tag_name: tag.to_string(),
            mappings: vec![MarkupMapping {
                param_name: param.to_string(),
                kind: MappingKind::Content,
                path: ".".to_string(),
                required: true,
            }],
            example: None,
        }
    }

    #[test]
    fn drains_single_complete_block() {
        let mut buf = "Okay <greet name=\"Ada\">Hi</greet> done".to_string();
        let blocks = drain_blocks(&mut buf, &tags(&["greet"]));
        assert_eq!(blocks, vec!["<greet name=\"Ada\">Hi</greet>"]);
        assert_eq!(buf, "Okay  done");
    }

    #[test]
    fn leaves_incomplete_block_in_buffer() {
        let mut buf = "Working on <greet name=\"Ada\">partial".to_string();
        let blocks = drain_blocks(&mut buf, &tags(&["greet"]));
        assert!(blocks.is_empty());
        assert_eq!(buf, "Working on <greet name=\"Ada\">partial");
    }

    #[test]
    fn handles_nested_same_tag() {
        let mut buf = "<wrap>outer <wrap>inner</wrap> tail</wrap>".to_string();
        let blocks = drain_blocks(&mut buf, &tags(&["wrap"]));
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0], "<wrap>outer <wrap>inner</wrap> tail</wrap>");
    }

    #[test]
    fn drains_multiple_blocks_in_order() {
        let mut buf = "<x/> mid <x/> and <x/> end <x/>".to_string();
        let blocks = drain_blocks(&mut buf, &tags(&["x"]));
        assert_eq!(blocks.len(), 4);
        assert!(blocks.iter().all(|b| b == "<x/>"));
        assert_eq!(buf, " mid  and  end ");
    }

    #[test]
    fn stray_closing_tag_is_ignored() {
        let mut buf = "text </greet> more <greet>hi</greet>".to_string();
        let blocks = drain_blocks(&mut buf, &tags(&["greet"]));
        assert_eq!(blocks, vec!["<greet>hi</greet>"]);
    }

    #[test]
    fn tag_name_is_not_a_prefix_match() {
        let mut buf = "<xy>not ours</xy> <x>ours</x>".to_string();
        let blocks = drain_blocks(&mut buf, &tags(&["x"]));
        assert_eq!(blocks, vec!["<x>ours</x>"]);
    }

    #[test]
    fn block_tag_extraction() {
        assert_eq!(block_tag("<greet name=\"a\">x</greet>"), Some("greet"));
        assert_eq!(block_tag("<idle></idle>"), Some("idle"));
        assert_eq!(block_tag("<x/>"), Some("x"));
        assert_eq!(block_tag("no tag"), None);
    }

    #[test]
    fn parses_attribute_forms() {
        let schema = MarkupSchema {
            tag_name: "f".to_string(),
            mappings: vec![
                MarkupMapping {
                    param_name: "a".into(),
                    kind: MappingKind::Attribute,
                    path: "a".into(),
                    required: true,
                },
                MarkupMapping {
                    param_name: "b".into(),
                    kind: MappingKind::Attribute,
                    path: "b".into(),
                    required: true,
                },
                MarkupMapping {
                    param_name: "c".into(),
                    kind: MappingKind::Attribute,
                    path: "c".into(),
                    required: true,
                },
            ],
            example: None,
        };
        let args = schema
            .parse_arguments("<f a=\"one\" b='two' c=three>body</f>")
            .unwrap();
        assert_eq!(args["a"], "one");
        assert_eq!(args["b"], "two");
        assert_eq!(args["c"], "three");
    }

    #[test]
    fn decodes_entities_in_attributes() {
        let schema = MarkupSchema {
            tag_name: "f".to_string(),
            mappings: vec![MarkupMapping {
                param_name: "v".into(),
                kind: MappingKind::Attribute,
                path: "v".into(),
                required: true,
            }],
            example: None,
        };
        let args = schema
            .parse_arguments("<f v=\"a &amp; b &lt;c&gt; &quot;q&quot; &apos;s&apos;\"></f>")
            .unwrap();
        assert_eq!(args["v"], "a & b <c> \"q\" 's'");
    }

    #[test]
    fn parses_element_and_content_mappings() {
        let schema = MarkupSchema {
            tag_name: "write".to_string(),
            mappings: vec![
                MarkupMapping {
                    param_name: "path".into(),
                    kind: MappingKind::Element,
                    path: "path".into(),
                    required: true,
                },
                MarkupMapping {
                    param_name: "body".into(),
                    kind: MappingKind::Content,
                    path: ".".into(),
                    required: false,
                },
            ],
            example: None,
        };
        let args = schema
            .parse_arguments("<write><path>/tmp/x</path> the rest </write>")
            .unwrap();
        assert_eq!(args["path"], "/tmp/x");
        // Content mapping takes the full trimmed body of the outer tag.
        assert_eq!(args["body"], "<path>/tmp/x</path> the rest");
    }

    #[test]
    fn missing_required_parameter_fails_block() {
        let schema = MarkupSchema {
            tag_name: "f".to_string(),
            mappings: vec![MarkupMapping {
                param_name: "needed".into(),
                kind: MappingKind::Attribute,
                path: "needed".into(),
                required: true,
            }],
            example: None,
        };
        let err = schema.parse_arguments("<f>body</f>").unwrap_err();
        assert!(matches!(err, MarkupError::MissingRequired(p) if p == vec!["needed".to_string()]));
    }

    #[test]
    fn optional_parameter_defaults_to_absent() {
        let schema = MarkupSchema {
            tag_name: "f".to_string(),
            mappings: vec![MarkupMapping {
                param_name: "opt".into(),
                kind: MappingKind::Attribute,
                path: "opt".into(),
                required: false,
            }],
            example: None,
        };
        let args = schema.parse_arguments("<f>x</f>").unwrap();
        assert!(!args.contains_key("opt"));
    }

    #[test]
    fn self_closing_block_has_empty_body() {
        let schema = content_schema("idle", "text");
        let mut relaxed = schema.clone();
        relaxed.mappings[0].required = false;
        let args = relaxed.parse_arguments("<idle/>").unwrap();
        assert!(!args.contains_key("text") || args["text"] == "");
    }

    #[test]
    fn render_parse_roundtrip() {
        let schema = MarkupSchema {
            tag_name: "notify".to_string(),
            mappings: vec![
                MarkupMapping {
                    param_name: "attachments".into(),
                    kind: MappingKind::Attribute,
                    path: "attachments".into(),
                    required: false,
                },
                MarkupMapping {
                    param_name: "text".into(),
                    kind: MappingKind::Content,
                    path: ".".into(),
                    required: true,
                },
            ],
            example: None,
        };

        let mut args = Map::new();
        args.insert("attachments".into(), Value::String("a.txt,b&c.pdf".into()));
        args.insert("text".into(), Value::String("All done".into()));

        let block = schema.render(&args);
        let parsed = schema.parse_arguments(&block).unwrap();
        assert_eq!(parsed, args);
    }

    #[test]
    fn entity_encode_decode_are_inverse() {
        let raw = "a & b < c > \"d\" 'e'";
        assert_eq!(decode_entities(&encode_entities(raw)), raw);
    }
}
