//! Response parser: turns raw model output into a final answer or a tool call.
//!
//! Two formats are accepted. The tagged format:
//!
//! ```text
//! <thought>I need the invoice first.</thought>
//! <action>get_invoice</action>
//! <action_input>{"id": "INV-7"}</action_input>
//! ```
//!
//! or `<final_answer>...</final_answer>`. The line-oriented format uses the
//! classic `Thought:` / `Action:` / `Action Input:` / `Final Answer:` markers
//! (case-insensitive). Output matching neither is taken as a final answer.
//!
//! Parsing never fails. Malformed action input goes through a fixed repair
//! sequence and degrades to empty parameters if nothing decodes.

use regex_lite::Regex;
use serde::Serialize;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};
use toolwright_core::ToolParams;
use tracing::{debug, warn};

/// Which format a response was recognised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    Tagged,
    LineOriented,
    /// No markers at all; the whole text is the answer.
    Raw,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedToolCall {
    pub tool_name: String,
    pub parameters: ToolParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    /// The model output the call was parsed from.
    pub raw: String,
    pub format: ResponseFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParsedResponse {
    FinalAnswer {
        content: String,
        format: ResponseFormat,
    },
    ToolCall(ParsedToolCall),
}

impl ParsedResponse {
    pub fn is_final(&self) -> bool {
        matches!(self, Self::FinalAnswer { .. })
    }

    pub fn final_answer(&self) -> Option<&str> {
        match self {
            Self::FinalAnswer { content, .. } => Some(content),
            Self::ToolCall(_) => None,
        }
    }

    pub fn tool_call(&self) -> Option<&ParsedToolCall> {
        match self {
            Self::ToolCall(call) => Some(call),
            Self::FinalAnswer { .. } => None,
        }
    }

    pub fn format(&self) -> ResponseFormat {
        match self {
            Self::FinalAnswer { format, .. } => *format,
            Self::ToolCall(call) => call.format,
        }
    }
}

/// Parse counters. Informational only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParserStats {
    pub total_parses: u64,
    /// Action inputs that could not be decoded even after repair.
    pub parse_errors: u64,
    pub tagged: u64,
    pub line_oriented: u64,
    pub raw: u64,
}

struct Patterns {
    final_answer_tag: Regex,
    action_tag: Regex,
    action_input_tag: Regex,
    thought_tag: Regex,
    final_answer_line: Regex,
    action_line: Regex,
    action_input_line: Regex,
    thought_line: Regex,
    unquoted_key: Regex,
    trailing_comma: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, regex_lite::Error> {
        Ok(Self {
            final_answer_tag: tag("final_answer")?,
            action_tag: tag("action")?,
            action_input_tag: tag("action_input")?,
            thought_tag: tag("thought")?,
            final_answer_line: Regex::new(r"(?ims)^\s*final\s+answer\s*:\s*(.*)")?,
            action_line: Regex::new(r"(?im)^\s*action\s*:\s*(.+?)\s*$")?,
            action_input_line: Regex::new(
                r"(?is)action\s+input\s*:\s*(.*?)\s*(?:\n\s*observation\s*:|\z)",
            )?,
            thought_line: Regex::new(
                r"(?is)thought\s*:\s*(.*?)\s*(?:\n\s*action\s*:|\n\s*final\s+answer\s*:|\z)",
            )?,
            unquoted_key: Regex::new(r"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)(\s*:)")?,
            trailing_comma: Regex::new(r",(\s*[}\]])")?,
        })
    }
}

/// `<name>...</name>`; an unclosed tag runs to the end of the text.
fn tag(name: &str) -> Result<Regex, regex_lite::Error> {
    Regex::new(&format!(r"(?is)<{name}>(.*?)(?:</{name}>|\z)"))
}

static PATTERNS: LazyLock<Option<Patterns>> = LazyLock::new(|| match Patterns::compile() {
    Ok(patterns) => Some(patterns),
    Err(e) => {
        warn!(error = %e, "Response patterns failed to compile; all output is treated as final");
        None
    }
});

fn capture<'t>(re: &Regex, text: &'t str) -> Option<&'t str> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}

/// Stateless parser with informational counters.
#[derive(Debug, Default)]
pub struct ResponseParser {
    total: AtomicU64,
    errors: AtomicU64,
    tagged: AtomicU64,
    line_oriented: AtomicU64,
    raw: AtomicU64,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(&self, text: &str) -> ParsedResponse {
        self.total.fetch_add(1, Ordering::Relaxed);

        let parsed = PATTERNS.as_ref().and_then(|p| {
            self.parse_tagged(p, text)
                .or_else(|| self.parse_line_oriented(p, text))
        });

        match parsed {
            Some(parsed) => {
                let counter = match parsed.format() {
                    ResponseFormat::Tagged => &self.tagged,
                    ResponseFormat::LineOriented => &self.line_oriented,
                    ResponseFormat::Raw => &self.raw,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                parsed
            }
            None => {
                self.raw.fetch_add(1, Ordering::Relaxed);
                debug!("No reasoning markers found, treating output as final answer");
                ParsedResponse::FinalAnswer {
                    content: text.trim().to_string(),
                    format: ResponseFormat::Raw,
                }
            }
        }
    }

    pub fn stats(&self) -> ParserStats {
        ParserStats {
            total_parses: self.total.load(Ordering::Relaxed),
            parse_errors: self.errors.load(Ordering::Relaxed),
            tagged: self.tagged.load(Ordering::Relaxed),
            line_oriented: self.line_oriented.load(Ordering::Relaxed),
            raw: self.raw.load(Ordering::Relaxed),
        }
    }

    fn parse_tagged(&self, p: &Patterns, text: &str) -> Option<ParsedResponse> {
        if let Some(answer) = capture(&p.final_answer_tag, text) {
            return Some(ParsedResponse::FinalAnswer {
                content: answer.to_string(),
                format: ResponseFormat::Tagged,
            });
        }

        let tool_name = clean_tool_name(capture(&p.action_tag, text)?)?;
        let input = capture(&p.action_input_tag, text).unwrap_or("");
        Some(ParsedResponse::ToolCall(ParsedToolCall {
            parameters: self.parameters_for(&tool_name, input),
            tool_name,
            thought: capture(&p.thought_tag, text)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
            raw: text.to_string(),
            format: ResponseFormat::Tagged,
        }))
    }

    fn parse_line_oriented(&self, p: &Patterns, text: &str) -> Option<ParsedResponse> {
        if let Some(answer) = capture(&p.final_answer_line, text) {
            return Some(ParsedResponse::FinalAnswer {
                content: answer.to_string(),
                format: ResponseFormat::LineOriented,
            });
        }

        let tool_name = clean_tool_name(capture(&p.action_line, text)?)?;
        let input = capture(&p.action_input_line, text).unwrap_or("");
        Some(ParsedResponse::ToolCall(ParsedToolCall {
            parameters: self.parameters_for(&tool_name, input),
            tool_name,
            thought: capture(&p.thought_line, text)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
            raw: text.to_string(),
            format: ResponseFormat::LineOriented,
        }))
    }

    fn parameters_for(&self, tool_name: &str, input: &str) -> ToolParams {
        match decode_parameters(input) {
            Some(params) => params,
            None => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!(tool = %tool_name, input = %input, "Unrecoverable action input, using no parameters");
                ToolParams::new()
            }
        }
    }
}

/// Strip quoting and call syntax the model sometimes wraps a name in.
fn clean_tool_name(raw: &str) -> Option<String> {
    let name = raw
        .trim()
        .trim_matches(|c| matches!(c, '`' | '"' | '\'' | '*'))
        .split(|c: char| c.is_whitespace() || c == '(' || c == '[')
        .next()
        .unwrap_or("")
        .trim_end_matches(|c| matches!(c, '`' | '"' | '\'' | '*' | ':' | '.'));
    (!name.is_empty()).then(|| name.to_string())
}

/// Decode an action input into parameters.
///
/// Tries the text as-is, then cumulatively: single→double quotes, quoting
/// bare keys, dropping trailing commas. Empty input means no parameters.
/// `None` if no stage yields a JSON object.
pub fn decode_parameters(input: &str) -> Option<ToolParams> {
    let candidate = json_candidate(input);
    if candidate.is_empty() {
        return Some(ToolParams::new());
    }

    let mut text = candidate.to_string();
    if let Some(params) = decode_object(&text) {
        return Some(params);
    }

    let patterns = PATTERNS.as_ref()?;
    let quote_keys = |s: &str| {
        patterns
            .unquoted_key
            .replace_all(s, "${1}\"${2}\"${3}")
            .into_owned()
    };
    let drop_trailing_commas =
        |s: &str| patterns.trailing_comma.replace_all(s, "${1}").into_owned();
    let repairs: [&dyn Fn(&str) -> String; 3] =
        [&normalize_quotes, &quote_keys, &drop_trailing_commas];
    for repair in repairs {
        text = repair(&text);
        if let Some(params) = decode_object(&text) {
            debug!(repaired = %text, "Action input decoded after repair");
            return Some(params);
        }
    }
    None
}

fn decode_object(text: &str) -> Option<ToolParams> {
    match serde_json::from_str(text) {
        Ok(serde_json::Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Trim code fences and surrounding prose down to the outermost braces.
fn json_candidate(input: &str) -> &str {
    let mut text = input.trim();
    if let Some(rest) = text.strip_prefix("```") {
        let body = rest.trim_end().trim_end_matches("```");
        // an info string such as `json` only stands alone on the opening line
        text = match body.split_once('\n') {
            Some((info, code)) if !info.contains('{') => code,
            _ => body,
        }
        .trim();
    }
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}

/// Rewrite single-quoted strings as double-quoted ones.
fn normalize_quotes(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    let mut in_double = false;
    let mut in_single = false;

    while let Some(c) = chars.next() {
        match c {
            '\\' if in_double || in_single => match chars.next() {
                Some('\'') if in_single => out.push('\''),
                Some(next) => {
                    out.push('\\');
                    out.push(next);
                }
                None => out.push('\\'),
            },
            '"' if in_single => out.push_str("\\\""),
            '"' => {
                in_double = !in_double;
                out.push('"');
            }
            '\'' if in_double => out.push('\''),
            '\'' => {
                in_single = !in_single;
                out.push('"');
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: serde_json::Value) -> ToolParams {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn tagged_tool_call() {
        let parser = ResponseParser::new();
        let parsed = parser.parse(
            "<thought>Need the count.</thought>\n<action>get_count</action>\n\
             <action_input>{\"folder\": \"inbox\", \"limit\": 5}</action_input>",
        );
        let call = parsed.tool_call().unwrap();
        assert_eq!(call.tool_name, "get_count");
        assert_eq!(call.parameters, obj(json!({"folder": "inbox", "limit": 5})));
        assert_eq!(call.thought.as_deref(), Some("Need the count."));
        assert_eq!(call.format, ResponseFormat::Tagged);
        assert_eq!(parser.stats().tagged, 1);
    }

    #[test]
    fn tagged_final_answer_wins_over_action() {
        let parser = ResponseParser::new();
        let parsed = parser.parse(
            "<action>get_count</action><action_input>{}</action_input>\
             <final_answer>\n  You have 42 items.\n</final_answer>",
        );
        assert_eq!(parsed.final_answer(), Some("You have 42 items."));
        assert_eq!(parsed.format(), ResponseFormat::Tagged);
    }

    #[test]
    fn tags_are_case_insensitive_and_may_be_unclosed() {
        let parser = ResponseParser::new();
        let parsed = parser.parse("<FINAL_ANSWER>Done");
        assert_eq!(parsed.final_answer(), Some("Done"));
    }

    #[test]
    fn action_without_input_has_no_parameters() {
        let parser = ResponseParser::new();
        let parsed = parser.parse("<action>list_clients</action>");
        let call = parsed.tool_call().unwrap();
        assert!(call.parameters.is_empty());
        assert_eq!(parser.stats().parse_errors, 0);
    }

    #[test]
    fn line_oriented_tool_call() {
        let parser = ResponseParser::new();
        let parsed = parser.parse(
            "Thought: I should look it up.\nAction: get_invoice\nAction Input: {\"id\": \"INV-7\"}\n",
        );
        let call = parsed.tool_call().unwrap();
        assert_eq!(call.tool_name, "get_invoice");
        assert_eq!(call.parameters, obj(json!({"id": "INV-7"})));
        assert_eq!(call.thought.as_deref(), Some("I should look it up."));
        assert_eq!(call.format, ResponseFormat::LineOriented);
        assert_eq!(parser.stats().line_oriented, 1);
    }

    #[test]
    fn line_oriented_markers_ignore_case_and_trailing_observation() {
        let parser = ResponseParser::new();
        let parsed = parser.parse(
            "THOUGHT: checking\nACTION: `search`\nACTION INPUT: {\"q\": \"late\"}\nObservation: (pending)",
        );
        let call = parsed.tool_call().unwrap();
        assert_eq!(call.tool_name, "search");
        assert_eq!(call.parameters, obj(json!({"q": "late"})));
    }

    #[test]
    fn line_oriented_final_answer() {
        let parser = ResponseParser::new();
        let parsed = parser.parse("Thought: I know this.\nFinal Answer: Paris");
        assert_eq!(parsed.final_answer(), Some("Paris"));
        assert_eq!(parsed.format(), ResponseFormat::LineOriented);
    }

    #[test]
    fn final_answer_marker_must_start_a_line() {
        let parser = ResponseParser::new();
        let parsed = parser.parse(
            "Thought: before I give a final answer: I need the count\nAction: get_count\nAction Input: {}",
        );
        let call = parsed.tool_call().unwrap();
        assert_eq!(call.tool_name, "get_count");
        assert!(call.parameters.is_empty());
        assert_eq!(
            call.thought.as_deref(),
            Some("before I give a final answer: I need the count")
        );

        let indented = parser.parse("Thought: done\n   final answer: 12 items");
        assert_eq!(indented.final_answer(), Some("12 items"));
    }

    #[test]
    fn plain_text_is_final_answer() {
        let parser = ResponseParser::new();
        let parsed = parser.parse("  Hello there!  ");
        assert_eq!(parsed.final_answer(), Some("Hello there!"));
        assert_eq!(parsed.format(), ResponseFormat::Raw);
        assert_eq!(parser.stats().raw, 1);
        assert_eq!(parser.stats().total_parses, 1);
    }

    #[test]
    fn repairs_single_quotes_and_trailing_comma() {
        assert_eq!(decode_parameters("{'a': 1,}"), Some(obj(json!({"a": 1}))));
    }

    #[test]
    fn repairs_unquoted_keys() {
        assert_eq!(
            decode_parameters("{id: 'INV-7', limit: 3}"),
            Some(obj(json!({"id": "INV-7", "limit": 3})))
        );
    }

    #[test]
    fn single_quote_repair_keeps_inner_double_quotes() {
        assert_eq!(
            decode_parameters(r#"{'note': 'say "hi"'}"#),
            Some(obj(json!({"note": "say \"hi\""})))
        );
    }

    #[test]
    fn strips_code_fences_and_prose() {
        assert_eq!(
            decode_parameters("```json\n{\"a\": [1, 2]}\n```"),
            Some(obj(json!({"a": [1, 2]})))
        );
        assert_eq!(
            decode_parameters("here you go: {\"a\": true} thanks"),
            Some(obj(json!({"a": true})))
        );
        assert_eq!(decode_parameters("```json\n```"), Some(ToolParams::new()));
    }

    #[test]
    fn one_line_code_fence_keeps_its_object() {
        let parser = ResponseParser::new();
        let parsed = parser.parse(
            "<action>get_invoice</action><action_input>```{\"id\": \"INV-7\"}```</action_input>",
        );
        assert_eq!(parsed.tool_call().unwrap().parameters, obj(json!({"id": "INV-7"})));
        assert_eq!(parser.stats().parse_errors, 0);
        assert_eq!(
            decode_parameters("```json {\"limit\": 3}```"),
            Some(obj(json!({"limit": 3})))
        );
    }

    #[test]
    fn hopeless_input_becomes_empty_parameters() {
        let parser = ResponseParser::new();
        let parsed = parser.parse("<action>search</action><action_input>{{{not json</action_input>");
        assert!(parsed.tool_call().unwrap().parameters.is_empty());
        assert_eq!(parser.stats().parse_errors, 1);
        assert_eq!(decode_parameters("[1, 2]"), None);
    }

    #[test]
    fn parsed_response_serializes_with_kind() {
        let parser = ResponseParser::new();
        let json = serde_json::to_value(parser.parse("<final_answer>ok</final_answer>")).unwrap();
        assert_eq!(json["kind"], "final_answer");
        assert_eq!(json["format"], "tagged");
    }
}
