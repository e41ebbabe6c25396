use std::borrow::Cow;

/// Ellipsis string used for truncation
const ELLIPSIS: &str = "...";
/// Character count of the ellipsis
const ELLIPSIS_LEN: usize = 3;

/// Truncates a string to at most `max_chars` characters.
///
/// If truncation is necessary, the tail is replaced with "..." so that the
/// result (ellipsis included) still fits within `max_chars`. Chat platforms
/// count message limits in characters, not bytes or display columns, so this
/// never splits a multi-byte character.
///
/// # Returns
///
/// - If the string fits, `Cow::Borrowed(s)` (no allocation)
/// - If `max_chars <= 3`, the first `max_chars` characters without ellipsis
/// - Otherwise the first `max_chars - 3` characters followed by "..."
///
/// # Examples
///
/// ```
/// use feedrelay::util::truncate_chars;
///
/// assert_eq!(truncate_chars("Short", 10), "Short");
/// assert_eq!(truncate_chars("Hello World", 8), "Hello...");
/// assert_eq!(truncate_chars("안녕하세요 세계", 6), "안녕하...");
/// assert_eq!(truncate_chars("Test", 2), "Te");
/// ```
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    if max_chars == 0 {
        return Cow::Borrowed("");
    }

    // Fast path: byte length bounds the char count from above
    if s.len() <= max_chars || s.chars().count() <= max_chars {
        return Cow::Borrowed(s);
    }

    if max_chars <= ELLIPSIS_LEN {
        return Cow::Owned(s.chars().take(max_chars).collect());
    }

    let keep = max_chars - ELLIPSIS_LEN;
    let cut = s
        .char_indices()
        .nth(keep)
        .map(|(idx, _)| idx)
        .unwrap_or(s.len());
    Cow::Owned(format!("{}{}", s[..cut].trim_end(), ELLIPSIS))
}

/// Collapses runs of blank lines so that paragraphs are separated by at most
/// one empty line. Trailing whitespace on each line is removed, and leading
/// and trailing blank lines are dropped.
///
/// Board posts frequently arrive with the editor's spacing preserved, which
/// turns a three-line post into a screenful of whitespace in a preview.
pub fn collapse_blank_lines(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_blank = false;

    for line in s.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            pending_blank = !out.is_empty();
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
            if pending_blank {
                out.push('\n');
            }
        }
        pending_blank = false;
        out.push_str(line);
    }

    out
}

/// Keeps at most `max_lines` lines of `s`, trimming trailing whitespace from
/// the result.
pub fn truncate_lines(s: &str, max_lines: usize) -> Cow<'_, str> {
    match s.match_indices('\n').nth(max_lines.saturating_sub(1)) {
        Some((idx, _)) if max_lines > 0 => Cow::Owned(s[..idx].trim_end().to_string()),
        Some(_) => Cow::Borrowed(""),
        None if max_lines == 0 => Cow::Borrowed(""),
        None => Cow::Borrowed(s),
    }
}

/// Zero-width space inserted after `@` to defuse mass mentions.
const ZERO_WIDTH_SPACE: char = '\u{200B}';

/// Neutralizes mass mentions (`@everyone`, `@here`) in externally sourced
/// text so a relayed post can never ping a whole channel.
///
/// Returns `Cow::Borrowed` when nothing needs replacing.
pub fn neutralize_mentions(s: &str) -> Cow<'_, str> {
    if !s.contains("@everyone") && !s.contains("@here") {
        return Cow::Borrowed(s);
    }

    Cow::Owned(
        s.replace("@everyone", &format!("@{ZERO_WIDTH_SPACE}everyone"))
            .replace("@here", &format!("@{ZERO_WIDTH_SPACE}here")),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_truncate_fits() {
        assert_eq!(truncate_chars("Short", 10), "Short");
        assert_eq!(truncate_chars("12345", 5), "12345");
        assert!(matches!(truncate_chars("Short", 10), Cow::Borrowed(_)));
    }

    #[test]
    fn test_truncate_ascii() {
        // max 8 -> keep 5 chars + "..."
        assert_eq!(truncate_chars("Hello World", 8), "Hello...");
    }

    #[test]
    fn test_truncate_counts_chars_not_bytes() {
        // Each Hangul syllable is 3 bytes but one char
        let input = "가나다라마바사";
        assert_eq!(truncate_chars(input, 7), input);
        assert_eq!(truncate_chars(input, 5), "가나...");
    }

    #[test]
    fn test_truncate_trims_before_ellipsis() {
        assert_eq!(truncate_chars("Hello big world", 9), "Hello...");
    }

    #[test]
    fn test_truncate_narrow_widths() {
        assert_eq!(truncate_chars("Test", 0), "");
        assert_eq!(truncate_chars("Testing", 1), "T");
        assert_eq!(truncate_chars("Testing", 3), "Tes");
        assert_eq!(truncate_chars("Testing", 4), "T...");
    }

    #[test]
    fn test_collapse_blank_lines() {
        let input = "\n\nFirst line  \n\n\n\nSecond line\nThird line\n\n";
        assert_eq!(
            collapse_blank_lines(input),
            "First line\n\nSecond line\nThird line"
        );
    }

    #[test]
    fn test_collapse_whitespace_only_lines() {
        let input = "a\n   \n \t \nb";
        assert_eq!(collapse_blank_lines(input), "a\n\nb");
    }

    #[test]
    fn test_collapse_empty() {
        assert_eq!(collapse_blank_lines(""), "");
        assert_eq!(collapse_blank_lines("\n\n  \n"), "");
    }

    #[test]
    fn test_truncate_lines() {
        let input = "1\n2\n3\n4";
        assert_eq!(truncate_lines(input, 2), "1\n2");
        assert_eq!(truncate_lines(input, 4), input);
        assert_eq!(truncate_lines(input, 10), input);
        assert_eq!(truncate_lines(input, 0), "");
    }

    #[test]
    fn test_truncate_lines_trims_tail() {
        assert_eq!(truncate_lines("a  \nb\nc", 1), "a");
    }

    #[test]
    fn test_neutralize_mentions() {
        let clean = "hello @someone";
        assert!(matches!(neutralize_mentions(clean), Cow::Borrowed(_)));

        let result = neutralize_mentions("hi @everyone and @here");
        assert!(!result.contains("@everyone"));
        assert!(!result.contains("@here"));
        assert!(result.contains("everyone"));
    }
}
