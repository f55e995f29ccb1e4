//! Post-processing: deterministic cleanup of model-generated summaries.
//!
//! ## Why is post-processing necessary?
//!
//! The summary is shown as plain text, narrated aloud and rendered into a
//! PDF. Models like to answer in Markdown anyway: `**bold**` runs, `* `
//! bullets, an outer ```` ``` ```` fence, Windows line endings, zero-width
//! characters copied out of the source document. None of that survives
//! text-to-speech or a Helvetica text run gracefully.
//!
//! The rules are cheap string and regex passes that fix formatting without
//! touching wording. Keeping them here keeps the prompt about content.
//!
//! ## Rule Order
//!
//! Fences are stripped before anything else so the fence regex sees the raw
//! reply. Line endings are normalised before per-line trimming, and blank
//! line collapsing runs after trimming so whitespace-only lines count as
//! blank.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules to a raw model summary.
///
/// Rules (applied in order):
/// 1. Strip an outer code fence
/// 2. Normalise line endings (CRLF / CR → LF)
/// 3. Remove every `*`
/// 4. Trim trailing whitespace per line
/// 5. Collapse 3+ consecutive newlines to one blank line
/// 6. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 7. Trim the whole text
pub fn clean_summary(input: &str) -> String {
    let s = strip_outer_fence(input);
    let s = normalise_line_endings(&s);
    let s = remove_asterisks(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = remove_invisible_chars(&s);
    s.trim().to_string()
}

// ── Rule 1: Strip outer code fence ───────────────────────────────────────────

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\r?\n(.*?)\r?\n```\s*$").unwrap());

fn strip_outer_fence(input: &str) -> String {
    match RE_OUTER_FENCE.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Remove asterisks ─────────────────────────────────────────────────

fn remove_asterisks(input: &str) -> String {
    input.replace('*', "")
}

// ── Rule 4: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 5: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").into_owned()
}

// ── Rule 6: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_every_asterisk() {
        assert_eq!(
            clean_summary("**Revenue** grew *strongly*.\n* point one\n* point two"),
            "Revenue grew strongly.\n point one\n point two"
        );
    }

    #[test]
    fn trims_surrounding_whitespace() {
        assert_eq!(clean_summary("\n\n  Summary text.  \n\n"), "Summary text.");
    }

    #[test]
    fn strips_fence() {
        assert_eq!(strip_outer_fence("```markdown\nHello\n```"), "Hello");
        assert_eq!(strip_outer_fence("```\nHello\nWorld\n```"), "Hello\nWorld");
        assert_eq!(strip_outer_fence("Hello"), "Hello");
    }

    #[test]
    fn normalises_line_endings() {
        assert_eq!(normalise_line_endings("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn collapses_blank_runs() {
        assert_eq!(clean_summary("a\n\n\n\n\nb"), "a\n\nb");
        assert_eq!(clean_summary("a\n   \n  \n\nb"), "a\n\nb");
        assert_eq!(clean_summary("a\n\nb"), "a\n\nb");
    }

    #[test]
    fn strips_invisible_characters() {
        assert_eq!(
            clean_summary("\u{FEFF}hello\u{200B}world\u{00AD}"),
            "helloworld"
        );
    }

    #[test]
    fn only_asterisks_yields_empty() {
        assert_eq!(clean_summary("***"), "");
    }

    #[test]
    fn full_pipeline() {
        let raw = "```\r\n**Overview**\r\nThe company grew.   \r\n\r\n\r\n\r\n* Key: margins\r\n```";
        assert_eq!(clean_summary(raw), "Overview\nThe company grew.\n\n Key: margins");
    }
}
