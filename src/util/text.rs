use std::borrow::Cow;

/// Strip control characters and ANSI escape sequences from upstream text.
///
/// Forum bodies and auction descriptions are user-controlled, so anything that
/// could steer a terminal or break a renderer is removed before it reaches a
/// [`FeedItem`](crate::feed::FeedItem). Tab, newline and carriage return survive.
///
/// Returns `Cow::Borrowed` when nothing needs stripping.
pub fn sanitize(s: &str) -> Cow<'_, str> {
    let needs_strip = s
        .bytes()
        .any(|b| b == 0x1b || b == 0x7f || (b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r')));
    if !needs_strip {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            // CSI: ESC [ params... final byte in 0x40..=0x7e
            if chars.peek() == Some(&'[') {
                chars.next();
                for next in chars.by_ref() {
                    if ('\x40'..='\x7e').contains(&next) {
                        break;
                    }
                }
            }
            continue;
        }
        if c == '\x7f' || (c.is_ascii_control() && !matches!(c, '\t' | '\n' | '\r')) {
            continue;
        }
        out.push(c);
    }
    Cow::Owned(out)
}

/// First non-empty line of `body`, cut to at most `max_chars` characters.
///
/// Used as a fallback title for forum items that arrive without one.
pub fn excerpt(body: &str, max_chars: usize) -> String {
    let line = body
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default();

    match line.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", line[..cut].trim_end()),
        None => line.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_clean_text_is_borrowed() {
        let input = "plain text\twith\ttabs\nand lines";
        assert!(matches!(sanitize(input), Cow::Borrowed(_)));
    }

    #[test]
    fn test_sanitize_strips_controls_and_del() {
        assert_eq!(sanitize("he\x00ll\x07o\x7f!"), "hello!");
    }

    #[test]
    fn test_sanitize_strips_csi_sequences() {
        assert_eq!(sanitize("\x1b[31mred\x1b[0m text"), "red text");
    }

    #[test]
    fn test_sanitize_drops_bare_escape() {
        assert_eq!(sanitize("a\x1bb"), "ab");
    }

    #[test]
    fn test_excerpt_takes_first_non_empty_line() {
        assert_eq!(excerpt("\n\n  Hello there  \nsecond", 40), "Hello there");
    }

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        assert_eq!(excerpt("héllo wörld", 5), "héllo...");
    }

    #[test]
    fn test_excerpt_empty_body() {
        assert_eq!(excerpt("", 10), "");
    }
}
