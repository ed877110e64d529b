//! 结构化响应解析：从补全服务的原始文本中取出 JSON 对象
//!
//! 容忍三类常见缺陷：
//! - 被 ```json ... ``` 或 ``` ... ``` 围栏包裹
//! - 前后夹带解释性文字
//! - 字符串值内部出现未转义的换行 / 制表符
//!
//! 顺序：剥围栏 → 直接解析 → 仅在引号内转义控制字符后重试 → 取最长的平衡 `{...}` 片段。
//! 全部失败时返回带原文的 ParseError，调用方不得猜测部分结构。

use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Structured response could not be parsed: {reason}")]
pub struct ParseError {
    /// 原始响应文本，便于诊断
    pub raw: String,
    pub reason: String,
}

impl ParseError {
    fn new(raw: &str, reason: impl Into<String>) -> Self {
        Self {
            raw: raw.to_string(),
            reason: reason.into(),
        }
    }
}

fn fence_open() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^```[A-Za-z0-9_-]*[ \t]*\r?\n?").expect("valid regex"))
}

fn fence_close() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\r?\n?```\s*$").expect("valid regex"))
}

/// 剥掉首尾围栏（只处理位于文本两端的围栏）
pub fn strip_fences(text: &str) -> &str {
    let mut s = text.trim();
    if let Some(m) = fence_open().find(s) {
        s = &s[m.end()..];
        if let Some(m) = fence_close().find(s) {
            s = &s[..m.start()];
        }
    }
    s.trim()
}

/// 仅在双引号字符串内部把原始 CR/LF 转成 `\n`、Tab 转成 `\t`，其它控制字符转成 `\u00XX`；
/// 引号外的内容原样保留
pub fn escape_control_in_strings(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let mut in_string = false;
    let mut escaped = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if !in_string {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
            continue;
        }
        if escaped {
            escaped = false;
            out.push(c);
            continue;
        }
        match c {
            '\\' => {
                escaped = true;
                out.push(c);
            }
            '"' => {
                in_string = false;
                out.push(c);
            }
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push_str("\\n");
            }
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

/// 最长的平衡 `{...}` 片段；字符串内的花括号不计数。
/// 某个 `{` 到结尾都没闭合时，从它之后的下一个 `{` 重新扫描
pub fn largest_object_span(text: &str) -> Option<&str> {
    let mut best: Option<(usize, usize)> = None;
    let mut from = 0usize;
    while let Some(offset) = text[from..].find('{') {
        let start = from + offset;
        match balanced_len(&text[start..]) {
            Some(len) => {
                let end = start + len;
                if best.map_or(true, |(s, e)| end - start > e - s) {
                    best = Some((start, end));
                }
                from = end;
            }
            None => from = start + 1,
        }
    }
    best.map(|(s, e)| &text[s..e])
}

/// text 以 `{` 开头，返回到配对 `}`（含）为止的字节长度
fn balanced_len(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_object(text: &str) -> Result<Map<String, Value>, String> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object, got {}", type_name(&other))),
        Err(e) => Err(e.to_string()),
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// 解析结构化响应为 JSON 对象
pub fn parse_structured(raw: &str) -> Result<Map<String, Value>, ParseError> {
    let stripped = strip_fences(raw);

    let first_err = match parse_object(stripped) {
        Ok(map) => return Ok(map),
        Err(e) => e,
    };

    let escaped = escape_control_in_strings(stripped);
    if let Ok(map) = parse_object(&escaped) {
        tracing::debug!("structured response parsed after escaping control characters");
        return Ok(map);
    }

    if let Some(span) = largest_object_span(stripped) {
        match parse_object(&escape_control_in_strings(span)) {
            Ok(map) => {
                tracing::debug!(len = span.len(), "structured response parsed from embedded object");
                return Ok(map);
            }
            Err(e) => return Err(ParseError::new(raw, e)),
        }
    }

    Err(ParseError::new(raw, first_err))
}

/// 解析并反序列化为具体类型
pub fn parse_structured_as<T: DeserializeOwned>(raw: &str) -> Result<T, ParseError> {
    let map = parse_structured(raw)?;
    serde_json::from_value(Value::Object(map))
        .map_err(|e| ParseError::new(raw, format!("unexpected shape: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn test_fenced_with_raw_newline_in_string() {
        let raw = "```json\n{\"a\":1,\n\"b\":\"x\ny\"}\n```";
        let map = parse_structured(raw).unwrap();
        assert_eq!(Value::Object(map), json!({"a": 1, "b": "x\ny"}));
    }

    #[test]
    fn test_not_json_is_error_with_raw() {
        let err = parse_structured("not json at all").unwrap_err();
        assert_eq!(err.raw, "not json at all");
    }

    #[test]
    fn test_plain_fence_and_prose() {
        let raw = "Here you go:\n```\n{\"type\": \"single\"}\n```\nHope that helps!";
        let map = parse_structured(raw).unwrap();
        assert_eq!(map["type"], "single");
    }

    #[test]
    fn test_prose_around_object_picks_largest_span() {
        let raw = "Sure {not this} the answer is {\"tasks\": [\"a\", \"b\"], \"note\": \"uses } inside\"} done";
        let map = parse_structured(raw).unwrap();
        assert_eq!(map["tasks"], json!(["a", "b"]));
        assert_eq!(map["note"], "uses } inside");
    }

    #[test]
    fn test_tabs_and_crlf_escaped_inside_strings_only() {
        let raw = "{\r\n\t\"text\": \"col1\tcol2\r\nnext\"\r\n}";
        let map = parse_structured(raw).unwrap();
        assert_eq!(map["text"], "col1\tcol2\nnext");
    }

    #[test]
    fn test_escape_leaves_outside_untouched() {
        let s = "{\n\"k\": \"a\nb\"\n}";
        assert_eq!(escape_control_in_strings(s), "{\n\"k\": \"a\\nb\"\n}");
        let already = r#"{"k": "a\"\n"}"#;
        assert_eq!(escape_control_in_strings(already), already);
    }

    #[test]
    fn test_unclosed_brace_in_prose_does_not_hide_object() {
        let map = parse_structured("use {x then {\"a\":1}").unwrap();
        assert_eq!(map["a"], 1);
        assert_eq!(largest_object_span("a { b {\"k\": 2} c"), Some("{\"k\": 2}"));
    }

    #[test]
    fn test_array_is_rejected() {
        assert!(parse_structured("[1, 2, 3]").is_err());
    }

    #[test]
    fn test_unbalanced_is_error() {
        let err = parse_structured("{\"a\": 1").unwrap_err();
        assert!(!err.reason.is_empty());
    }

    #[test]
    fn test_typed_parse() {
        #[derive(Debug, Deserialize)]
        struct Shape {
            rule: String,
            elements: Vec<String>,
        }
        let s: Shape = parse_structured_as("```json\n{\"rule\": \"R\", \"elements\": [\"e1\"]}\n```").unwrap();
        assert_eq!(s.rule, "R");
        assert_eq!(s.elements, vec!["e1"]);

        let err = parse_structured_as::<Shape>("{\"rule\": 3}").unwrap_err();
        assert!(err.reason.contains("unexpected shape"));
    }

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_fences("```json\n{}\n```"), "{}");
        assert_eq!(strip_fences("```\n{}```"), "{}");
        assert_eq!(strip_fences("  {}  "), "{}");
    }
}
