//! Body text truncation applied before issues and comments leave the client.

use std::sync::LazyLock;

use regex::Regex;

const TRUNCATION_MARKER: &str = "\n\n[Content truncated due to size limit...]";
const CODE_BLOCK_MARKER: &str = "\n// [...truncated...]\n";

static CODE_BLOCK_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[a-z]*\n.*?\n\s*```").unwrap());

/// Truncate `text` so its UTF-8 encoding fits within `max_bytes`, appending a
/// truncation marker when anything was cut. The marker counts against the
/// ceiling, so the output never exceeds `max_bytes` and re-truncating with
/// the same ceiling is a no-op.
///
/// Uses a binary search over char-prefix lengths rather than a byte slice, so
/// multi-byte code points are never split.
pub fn truncate_to_byte_size(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }

    let budget = max_bytes.saturating_sub(TRUNCATION_MARKER.len());
    let chars: Vec<char> = text.chars().collect();
    let mut left = 0usize;
    let mut right = chars.len();

    // Longest char prefix whose encoding fits the remaining budget.
    while left < right {
        let mid = (left + right + 1) / 2;
        let byte_len: usize = chars[..mid].iter().map(|c| c.len_utf8()).sum();
        if byte_len <= budget {
            left = mid;
        } else {
            right = mid - 1;
        }
    }

    let mut truncated: String = chars[..left].iter().collect();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}

/// Collapse fenced code blocks longer than `2 * preview_lines` to a head/tail
/// preview separated by a truncation marker, keeping the opening fence (and
/// its language tag) and the closing fence intact.
pub fn truncate_code_blocks(text: &str, preview_lines: usize) -> String {
    CODE_BLOCK_REGEX
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let block = &caps[0];
            let lines: Vec<&str> = block.split('\n').collect();
            if lines.len() <= preview_lines * 2 {
                return block.to_string();
            }

            let first_line = lines[0];
            let last_line = lines[lines.len() - 1];
            let head = &lines[1..=preview_lines];
            let tail = &lines[lines.len() - 1 - preview_lines..lines.len() - 1];

            let mut out = Vec::with_capacity(preview_lines * 2 + 3);
            out.push(first_line);
            out.extend_from_slice(head);
            out.push(CODE_BLOCK_MARKER);
            out.extend_from_slice(tail);
            out.push(last_line);
            out.join("\n")
        })
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_unchanged() {
        assert_eq!(truncate_to_byte_size("hello", 100), "hello");
        assert_eq!(truncate_to_byte_size("", 0), "");
    }

    #[test]
    fn truncated_text_never_exceeds_ceiling() {
        let text = "a".repeat(10_000);
        let result = truncate_to_byte_size(&text, 500);
        assert!(result.len() <= 500);
        assert!(result.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn truncation_respects_multibyte_boundaries() {
        // Each of these is 3 bytes in UTF-8.
        let text = "日本語".repeat(1000);
        let result = truncate_to_byte_size(&text, 100);
        assert!(result.len() <= 100);
        let content = result.strip_suffix(TRUNCATION_MARKER).unwrap();
        // Would have produced a broken char boundary with naive slicing.
        assert!(content.chars().all(|c| c == '日' || c == '本' || c == '語'));
    }

    #[test]
    fn truncation_is_idempotent() {
        let text = "x".repeat(10_000);
        let once = truncate_to_byte_size(&text, 1024);
        let twice = truncate_to_byte_size(&once, 1024);
        assert_eq!(once, twice);
    }

    #[test]
    fn short_code_blocks_are_unchanged() {
        let text = "intro\n```rust\nlet x = 1;\n```\noutro";
        assert_eq!(truncate_code_blocks(text, 6), text);
    }

    #[test]
    fn long_code_blocks_collapse_to_preview() {
        let body: Vec<String> = (0..40).map(|i| format!("line {i}")).collect();
        let text = format!("```python\n{}\n```", body.join("\n"));
        let result = truncate_code_blocks(&text, 3);

        assert!(result.starts_with("```python"));
        assert!(result.contains("line 0"));
        assert!(result.contains("line 2"));
        assert!(result.contains(CODE_BLOCK_MARKER.trim()));
        assert!(result.contains("line 39"));
        assert!(!result.contains("line 20"));
        assert!(result.trim_end().ends_with("```"));
    }

    #[test]
    fn text_outside_code_blocks_is_untouched() {
        let body: Vec<String> = (0..40).map(|i| format!("line {i}")).collect();
        let text = format!("before\n```\n{}\n```\nafter", body.join("\n"));
        let result = truncate_code_blocks(&text, 2);
        assert!(result.starts_with("before\n"));
        assert!(result.ends_with("\nafter"));
    }
}
