//! Turn assistant replies into speakable text

use std::sync::LazyLock;

use regex::Regex;

static FENCED_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```.*?(```|$)").expect("valid regex"));

static INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`\n]*)`").expect("valid regex"));

static IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").expect("valid regex"));

static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]*\)").expect("valid regex"));

static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://\S+|www\.\S+").expect("valid regex"));

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?[A-Za-z][^>]*>").expect("valid regex"));

/// Unix, home-relative and Windows paths, plus bare `dir/file.ext` tokens
static FILE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:^|\s)(?:~?/[\w.\-]+(?:/[\w.\-]+)+/?|[A-Za-z]:\\[^\s]+|[\w.\-]+/[\w.\-/]*\.[A-Za-z0-9]{1,5})",
    )
    .expect("valid regex")
});

static LINE_MARKUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:#{1,6}\s+|>\s?|[-*+]\s+|\|)").expect("valid regex"));

static EMPHASIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*{1,3}|_{2,3}|~~").expect("valid regex"));

static HORIZONTAL_RULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:-{3,}|\*{3,}|_{3,})\s*$").expect("valid regex"));

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Strip code, paths, links and markdown so the text reads aloud cleanly
#[must_use]
pub fn sanitize_for_speech(text: &str) -> String {
    let text = FENCED_CODE.replace_all(text, " ");
    let text = IMAGE.replace_all(&text, " ");
    let text = LINK.replace_all(&text, "$1");
    let text = URL.replace_all(&text, " ");
    let text = HTML_TAG.replace_all(&text, " ");
    let text = INLINE_CODE.replace_all(&text, "$1");
    let text = FILE_PATH.replace_all(&text, " ");
    let text = HORIZONTAL_RULE.replace_all(&text, " ");
    let text = LINE_MARKUP.replace_all(&text, "");
    let text = EMPHASIS.replace_all(&text, "");
    let text = text.replace('|', " ");

    let collapsed = WHITESPACE.replace_all(&text, " ");
    tidy_punctuation(collapsed.trim())
}

/// Remove spaces left before punctuation by earlier removals
fn tidy_punctuation(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '.' | ',' | '!' | '?' | ':' | ';') && out.ends_with(' ') {
            out.pop();
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_code_blocks() {
        let reply = "Here is how:\n```rust\nfn main() {}\n```\nThat's it.";
        assert_eq!(sanitize_for_speech(reply), "Here is how: That's it.");
    }

    #[test]
    fn unterminated_code_block_is_dropped() {
        assert_eq!(sanitize_for_speech("Try this ```let x = 1;"), "Try this");
    }

    #[test]
    fn strips_paths_and_urls() {
        let reply = "Saved to /home/me/exports/report.csv and see https://bank.example/help for more.";
        assert_eq!(sanitize_for_speech(reply), "Saved to and see for more.");

        let reply = "Check src/budget/rules.rs now";
        assert_eq!(sanitize_for_speech(reply), "Check now");
    }

    #[test]
    fn keeps_link_text_and_inline_code_words() {
        let reply = "Open [your budget](https://x.example/b) or run `refresh`.";
        assert_eq!(sanitize_for_speech(reply), "Open your budget or run refresh.");
    }

    #[test]
    fn strips_markdown_markup() {
        let reply = "## Summary\n- **Groceries**: $120\n- *Rent*: $900\n\n---\n> Note";
        assert_eq!(
            sanitize_for_speech(reply),
            "Summary Groceries: $120 Rent: $900 Note"
        );
    }

    #[test]
    fn plain_text_is_untouched() {
        let reply = "You spent $42.50 on coffee this month.";
        assert_eq!(sanitize_for_speech(reply), reply);
    }
}
