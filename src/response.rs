//! Parsing and cleanup of model replies.
//!
//! A reply is read with a two-layout grammar plus a fallback:
//!
//! * **HeaderBody**: a header block holding a labeled title line, a `---`
//!   separator line, then the narration.
//! * **LabeledLines**: lines scanned for `Title:` and `Script:` style labels;
//!   the script label's value plus every following line forms the body.
//! * **RawFallback**: everything but the first line, or the whole reply when
//!   it is a single line.

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use regex::Regex;

const SEPARATOR: &str = "---";

/// Longest label first so `ชื่อคลิป` wins over `ชื่อ`.
const TITLE_LABELS: &[&str] = &["ชื่อคลิป", "ชื่อ", "Title"];
const BODY_LABELS: &[&str] = &["บทพากย์", "บท", "Script", "Narration"];

/// Rapport-building stock phrases the narration must not contain.
const DENY_LIST: &[&str] = &[
    "สวัสดีครับ",
    "สวัสดีค่ะ",
    "คลิปนี้",
    "วิดีโอนี้",
    "ท่านผู้ชม",
    "เพื่อนๆ",
    "ไปดูกันเลย",
    "มาดูกัน",
    "hello everyone",
    "hi everyone",
    "in this video",
    "in this clip",
    "this video",
    "this clip",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedResponse {
    HeaderBody { title: Option<String>, body: String },
    LabeledLines { title: Option<String>, body: String },
    RawFallback { title: Option<String>, body: String },
}

impl ParsedResponse {
    pub fn title(&self) -> Option<&str> {
        match self {
            ParsedResponse::HeaderBody { title, .. }
            | ParsedResponse::LabeledLines { title, .. }
            | ParsedResponse::RawFallback { title, .. } => title.as_deref(),
        }
    }

    pub fn body(&self) -> &str {
        match self {
            ParsedResponse::HeaderBody { body, .. }
            | ParsedResponse::LabeledLines { body, .. }
            | ParsedResponse::RawFallback { body, .. } => body,
        }
    }

    /// `(title, body)`, using `default_title` when the reply named none.
    pub fn into_parts(self, default_title: &str) -> (String, String) {
        let (title, body) = match self {
            ParsedResponse::HeaderBody { title, body }
            | ParsedResponse::LabeledLines { title, body }
            | ParsedResponse::RawFallback { title, body } => (title, body),
        };
        (title.unwrap_or_else(|| default_title.to_string()), body)
    }
}

pub fn parse_response(text: &str) -> ParsedResponse {
    let text = text.trim();

    if let Some((header, body)) = split_on_separator(text) {
        let body = body.trim();
        if !body.is_empty() {
            let title = header
                .lines()
                .find_map(|line| labeled_value(line, TITLE_LABELS, false));
            return ParsedResponse::HeaderBody {
                title,
                body: body.to_string(),
            };
        }
    }

    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();

    let mut title = None;
    for (idx, line) in lines.iter().enumerate() {
        if title.is_none() {
            if let Some(value) = labeled_value(line, TITLE_LABELS, true) {
                title = Some(value);
                continue;
            }
        }
        if let Some(value) = labeled_value(line, BODY_LABELS, true) {
            let mut parts = vec![value];
            parts.extend(lines[idx + 1..].iter().map(|l| l.to_string()));
            let body = parts.join(" ").trim().to_string();
            if !body.is_empty() {
                return ParsedResponse::LabeledLines { title, body };
            }
            break;
        }
    }

    let body = if lines.len() > 1 {
        lines[1..].join(" ")
    } else {
        text.to_string()
    };
    ParsedResponse::RawFallback { title, body }
}

/// Splits at the first line consisting of `---` (extra dashes allowed).
fn split_on_separator(text: &str) -> Option<(&str, &str)> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim();
        if trimmed.len() >= SEPARATOR.len() && trimmed.chars().all(|c| c == '-') {
            return Some((&text[..offset], &text[offset + line.len()..]));
        }
        offset += line.len();
    }
    None
}

/// Value after a leading label such as `Title:`; markdown decoration around the
/// label is ignored.
fn labeled_value(line: &str, labels: &[&str], require_colon: bool) -> Option<String> {
    let line = line.trim().trim_start_matches(['*', '#', ' ']);
    for label in labels {
        let Some(head) = line.get(..label.len()) else {
            continue;
        };
        if !head.eq_ignore_ascii_case(label) {
            continue;
        }
        let rest = line[label.len()..].trim_start_matches(['*', ' ']);
        let rest = match rest.strip_prefix(':').or_else(|| rest.strip_prefix('：')) {
            Some(after) => after,
            None if require_colon => return None,
            None => rest,
        };
        let value = rest
            .trim()
            .trim_matches(|c: char| matches!(c, '*' | '"' | '[' | ']') || c.is_whitespace());
        return if value.is_empty() { None } else { Some(value.to_string()) };
    }
    None
}

fn emphasis_regex() -> Result<&'static Regex> {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_try_init(|| Regex::new(r"\*+|__+|~~+").context("failed to compile emphasis regex"))
}

fn bracket_regex() -> Result<&'static Regex> {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_try_init(|| {
        Regex::new(r"\[[^\[\]]*\]|\([^()]*\)").context("failed to compile stage direction regex")
    })
}

fn deny_regex() -> Result<&'static Regex> {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_try_init(|| {
        let alternation = DENY_LIST
            .iter()
            .map(|p| regex::escape(p))
            .collect::<Vec<_>>()
            .join("|");
        Regex::new(&format!("(?i)(?:{alternation})")).context("failed to compile deny-list regex")
    })
}

fn whitespace_regex() -> Result<&'static Regex> {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_try_init(|| Regex::new(r"\s+").context("failed to compile whitespace regex"))
}

fn normalize_pass(text: &str) -> Result<String> {
    let text = emphasis_regex()?.replace_all(text, "");
    let text = bracket_regex()?.replace_all(&text, "");
    let text = deny_regex()?.replace_all(&text, "");
    let text = whitespace_regex()?.replace_all(&text, " ");
    Ok(text.trim().to_string())
}

/// Strips emphasis markers, bracketed stage directions and deny-listed stock
/// phrases, then collapses whitespace. Runs to a fixed point, so applying it
/// twice changes nothing.
pub fn normalize_script(text: &str) -> Result<String> {
    let mut current = normalize_pass(text)?;
    loop {
        let next = normalize_pass(&current)?;
        if next == current {
            return Ok(current);
        }
        current = next;
    }
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_body_layout() {
        let reply = "ชื่อ: แมวกระโดด\n---\nแมวตัวหนึ่ง กระโดด ขึ้นโต๊ะ";
        let parsed = parse_response(reply);
        assert_eq!(
            parsed,
            ParsedResponse::HeaderBody {
                title: Some("แมวกระโดด".to_string()),
                body: "แมวตัวหนึ่ง กระโดด ขึ้นโต๊ะ".to_string(),
            }
        );
    }

    #[test]
    fn header_body_with_markdown_title() {
        let parsed = parse_response("**Title:** Night Drive\n---\nThe car rolls out.");
        assert_eq!(parsed.title(), Some("Night Drive"));
        assert_eq!(parsed.body(), "The car rolls out.");
    }

    #[test]
    fn labeled_lines_layout_joins_following_lines() {
        let reply = "Title: Storm\nScript: Clouds gather.\nRain falls hard.";
        let parsed = parse_response(reply);
        assert_eq!(
            parsed,
            ParsedResponse::LabeledLines {
                title: Some("Storm".to_string()),
                body: "Clouds gather. Rain falls hard.".to_string(),
            }
        );
    }

    #[test]
    fn thai_labels_are_recognized() {
        let parsed = parse_response("ชื่อคลิป: ฝนตก\nบท: เมฆดำ ลอยมา");
        assert!(matches!(parsed, ParsedResponse::LabeledLines { .. }));
        assert_eq!(parsed.title(), Some("ฝนตก"));
        assert_eq!(parsed.body(), "เมฆดำ ลอยมา");
    }

    #[test]
    fn fallback_drops_first_line() {
        let parsed = parse_response("Some heading\nfirst part\nsecond part");
        assert_eq!(
            parsed,
            ParsedResponse::RawFallback {
                title: None,
                body: "first part second part".to_string(),
            }
        );
    }

    #[test]
    fn fallback_single_line_keeps_everything() {
        let parsed = parse_response("  just one line of narration ");
        assert_eq!(parsed.body(), "just one line of narration");
        assert_eq!(parsed.into_parts("Default").0, "Default");
    }

    #[test]
    fn empty_body_after_separator_falls_through() {
        let parsed = parse_response("Title: X\n---\n   ");
        assert!(matches!(parsed, ParsedResponse::RawFallback { .. }));
        assert_eq!(parsed.title(), Some("X"));
    }

    #[test]
    fn normalize_strips_markup_and_stock_phrases() {
        let raw = "**สวัสดีครับ** [music] คลิปนี้  แมว   กระโดด (laughs)\n\nสูงมาก";
        assert_eq!(normalize_script(raw).unwrap(), "แมว กระโดด สูงมาก");
        assert_eq!(
            normalize_script("Hello everyone, in this video a dog runs.").unwrap(),
            ", a dog runs."
        );
    }

    #[test]
    fn normalize_is_idempotent() {
        let samples = [
            "คลิปคลิปนี้นี้ ต่อไป",
            "*[*]* text",
            "[[nested]] words",
            "this vithis videodeo ends",
            "  plain   text\twith\ntabs ",
            "__under__ ~~strike~~ **bold**",
            "",
        ];
        for sample in samples {
            let once = normalize_script(sample).unwrap();
            let twice = normalize_script(&once).unwrap();
            assert_eq!(once, twice, "not idempotent for {sample:?}");
        }
    }

    #[test]
    fn word_count_uses_whitespace_tokens() {
        assert_eq!(word_count("a b  c\nd"), 4);
        assert_eq!(word_count(""), 0);
    }
}
