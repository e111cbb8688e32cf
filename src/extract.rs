//! Extraction helpers for messy model output.
//!
//! The judge and triage subprotocols ask models for JSON and get prose,
//! code fences, and thinking tags around it. Everything here is defensive
//! preprocessing: carve out think-tags, fences, and balanced-delimiter
//! regions before handing text to serde.

/// Split `<think>`/`<thinking>` blocks out of text.
///
/// Returns `(reasoning, rest)` where `reasoning` is the concatenated think
/// content (None when no tags are present) and `rest` is the text with the
/// blocks removed. Handles incomplete blocks (no closing tag) by treating
/// everything after the open tag as reasoning.
pub fn split_think_tags(text: &str) -> (Option<String>, String) {
    let mut reasoning = String::new();
    let mut rest = text.to_string();

    for (open, close) in [("<think>", "</think>"), ("<thinking>", "</thinking>")] {
        while let Some(start) = rest.find(open) {
            if let Some(end_offset) = rest[start..].find(close) {
                let inner_start = start + open.len();
                let inner_end = start + end_offset;
                reasoning.push_str(&rest[inner_start..inner_end]);
                let end = start + end_offset + close.len();
                rest = format!("{}{}", &rest[..start], &rest[end..]);
            } else {
                reasoning.push_str(&rest[start + open.len()..]);
                rest = rest[..start].to_string();
                break;
            }
        }
    }

    let reasoning = {
        let trimmed = reasoning.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    };
    (reasoning, rest.trim().to_string())
}

/// Extract content from the first matching markdown code block.
///
/// Searches for `` ```lang `` and bare `` ``` `` fences.
/// Returns `(language_hint, content)` where hint is `None` for bare fences.
pub fn extract_code_block(text: &str) -> Option<(Option<&str>, &str)> {
    let mut search_from = 0;
    while let Some(fence_start) = text[search_from..].find("```") {
        let abs_fence = search_from + fence_start;
        let after_backticks = abs_fence + 3;

        let line_end = text[after_backticks..].find('\n')?;
        let lang_str = text[after_backticks..after_backticks + line_end].trim();
        let lang = if lang_str.is_empty() {
            None
        } else {
            Some(lang_str)
        };

        let content_start = after_backticks + line_end + 1;

        if let Some(close_offset) = text[content_start..].find("```") {
            let content = text[content_start..content_start + close_offset].trim();
            return Some((lang, content));
        }

        search_from = after_backticks;
    }
    None
}

/// Find the **first** balanced bracketed substring.
///
/// Nesting-aware and string-aware: delimiters inside JSON string literals
/// (including escaped quotes) do not count. The judge and triage contracts
/// take the first balanced region of a response, so unlike an
/// answer-extraction heuristic this does not prefer later matches.
///
/// - `find_bracketed(text, '{', '}')` — finds JSON objects
/// - `find_bracketed(text, '[', ']')` — finds JSON arrays
pub fn find_bracketed(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let mut depth = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        if ch == '\\' && in_string {
            escape_next = true;
            continue;
        }
        if ch == '"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        if ch == open {
            depth += 1;
        } else if ch == close {
            depth -= 1;
            if depth == 0 {
                return Some(&text[start..start + i + ch.len_utf8()]);
            }
        }
    }
    None
}

/// Pull the first JSON object out of model output, trying a `json` code
/// fence first, then the first balanced-braces region of the raw text.
pub fn extract_json_object(text: &str) -> Option<&str> {
    if let Some((lang, content)) = extract_code_block(text) {
        if lang.is_none_or(|l| l.eq_ignore_ascii_case("json")) {
            if let Some(obj) = find_bracketed(content, '{', '}') {
                return Some(obj);
            }
        }
    }
    find_bracketed(text, '{', '}')
}
