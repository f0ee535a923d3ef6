//! Output budget primitives. Every tool bounds its payload with these
//! before anything reaches the model or the user.

/// Trim a string to at most `max_bytes` bytes, backing up to the nearest
/// character boundary. A limit of 0 disables truncation.
pub fn truncate_bytes(input: &str, max_bytes: usize) -> (String, bool) {
    if max_bytes == 0 || input.len() <= max_bytes {
        return (input.to_string(), false);
    }
    let mut end = max_bytes;
    while end > 0 && !input.is_char_boundary(end) {
        end -= 1;
    }
    (input[..end].to_string(), true)
}

/// Consume lines in order until either the line count or the cumulative
/// byte budget (one separator byte per joined line) is hit. Either limit
/// can be disabled with 0. Returns the kept lines, whether anything was
/// cut, and the byte count of the kept output.
pub fn truncate_lines_and_bytes(
    lines: &[String],
    max_lines: usize,
    max_bytes: usize,
) -> (Vec<String>, bool, usize) {
    if max_lines == 0 && max_bytes == 0 {
        let byte_count = lines.iter().map(|l| l.len()).sum::<usize>()
            + lines.len().saturating_sub(1);
        return (lines.to_vec(), false, byte_count);
    }

    let mut out = Vec::new();
    let mut truncated = false;
    let mut byte_count = 0usize;
    for line in lines {
        if max_lines > 0 && out.len() >= max_lines {
            truncated = true;
            break;
        }
        let sep = usize::from(!out.is_empty());
        if max_bytes > 0 && byte_count + sep + line.len() > max_bytes {
            truncated = true;
            break;
        }
        byte_count += sep + line.len();
        out.push(line.clone());
    }
    (out, truncated, byte_count)
}

/// Short display preview of text. Never used for model payloads.
pub fn preview(text: &str, max_lines: usize, max_bytes: usize) -> String {
    if text.is_empty() {
        return String::new();
    }
    let lines: Vec<String> = text.split('\n').map(str::to_string).collect();
    let (kept, _, _) = truncate_lines_and_bytes(&lines, max_lines, max_bytes);
    kept.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn truncate_bytes_respects_limit() {
        let (out, cut) = truncate_bytes("hello world", 5);
        assert_eq!(out, "hello");
        assert!(cut);
    }

    #[test]
    fn truncate_bytes_zero_disables() {
        let (out, cut) = truncate_bytes("hello", 0);
        assert_eq!(out, "hello");
        assert!(!cut);
    }

    #[test]
    fn truncate_bytes_is_unicode_safe() {
        let (out, cut) = truncate_bytes("ééé", 3);
        assert_eq!(out, "é");
        assert!(cut);
    }

    #[test]
    fn lines_limit_applies() {
        let (out, cut, _) = truncate_lines_and_bytes(&lines(&["a", "b", "c"]), 2, 0);
        assert_eq!(out, lines(&["a", "b"]));
        assert!(cut);
    }

    #[test]
    fn byte_limit_counts_separators() {
        // "aa" + sep + "bb" = 5 bytes; a 4-byte budget only fits "aa"
        let (out, cut, bytes) = truncate_lines_and_bytes(&lines(&["aa", "bb"]), 0, 4);
        assert_eq!(out, lines(&["aa"]));
        assert!(cut);
        assert_eq!(bytes, 2);
    }

    #[test]
    fn both_limits_disabled_returns_input() {
        let input = lines(&["a", "bb", "ccc"]);
        let (out, cut, bytes) = truncate_lines_and_bytes(&input, 0, 0);
        assert_eq!(out, input);
        assert!(!cut);
        assert_eq!(bytes, "a\nbb\nccc".len());
    }

    #[test]
    fn never_exceeds_either_limit() {
        let input = lines(&["aaaa", "bbbb", "cccc", "dddd"]);
        let (out, _, bytes) = truncate_lines_and_bytes(&input, 3, 9);
        assert!(out.len() <= 3);
        assert!(bytes <= 9);
    }

    #[test]
    fn preview_limits_lines() {
        let text = "1\n2\n3\n4\n5";
        assert_eq!(preview(text, 2, 1000), "1\n2");
        assert_eq!(preview("", 2, 1000), "");
    }
}
