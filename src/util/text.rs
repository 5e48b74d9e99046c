use std::borrow::Cow;

use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

const ELLIPSIS: &str = "...";
const ELLIPSIS_WIDTH: usize = 3;

/// Display width of `s` in terminal columns (CJK and emoji count as two).
pub fn display_width(s: &str) -> usize {
    UnicodeWidthStr::width(s)
}

/// Truncate `s` to at most `max_width` columns, ending in "..." when cut.
///
/// Widths of three or less are filled with as many characters as fit and no
/// ellipsis.
///
/// ```
/// use feedmill::util::truncate_to_width;
///
/// assert_eq!(truncate_to_width("Short", 10), "Short");
/// assert_eq!(truncate_to_width("Hello World", 8), "Hello...");
/// assert_eq!(truncate_to_width("Test", 2), "Te");
/// ```
pub fn truncate_to_width(s: &str, max_width: usize) -> Cow<'_, str> {
    if display_width(s) <= max_width {
        return Cow::Borrowed(s);
    }

    let (budget, ellipsis) = if max_width <= ELLIPSIS_WIDTH {
        (max_width, "")
    } else {
        (max_width - ELLIPSIS_WIDTH, ELLIPSIS)
    };

    let mut used = 0;
    let mut end = 0;
    for (idx, c) in s.char_indices() {
        let w = UnicodeWidthChar::width(c).unwrap_or(0);
        if used + w > budget {
            break;
        }
        used += w;
        end = idx + c.len_utf8();
    }
    Cow::Owned(format!("{}{}", &s[..end], ellipsis))
}

/// Make feed-supplied text safe for a single terminal line.
///
/// ANSI escape sequences and control characters are removed; line breaks and
/// tabs become spaces. Borrows when nothing needs changing.
pub fn clean_for_terminal(s: &str) -> Cow<'_, str> {
    if !s.chars().any(|c| c.is_control()) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\u{1b}' => match chars.peek() {
                // CSI: parameters until a final byte in @..~
                Some('[') => {
                    chars.next();
                    for c in chars.by_ref() {
                        if ('\u{40}'..='\u{7e}').contains(&c) {
                            break;
                        }
                    }
                }
                // OSC: until BEL or ST
                Some(']') => {
                    chars.next();
                    while let Some(c) = chars.next() {
                        if c == '\u{07}' {
                            break;
                        }
                        if c == '\u{1b}' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                _ => {}
            },
            '\n' | '\r' | '\t' => out.push(' '),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}
