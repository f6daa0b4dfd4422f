//! Splitting terminal input into complete fragments.

/// How many brackets `code` leaves open. Brackets inside string, char and
/// raw string literals and comments are ignored; a negative result means
/// there are more closing than opening brackets.
pub fn open_brackets(code: &str) -> i64 {
    let mut depth = 0i64;
    let mut chars = code.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            '"' | '\'' => {
                while let Some(next) = chars.next() {
                    match next {
                        '\\' => {
                            chars.next();
                        }
                        '\n' => break,
                        _ if next == c => break,
                        _ => {}
                    }
                }
            }
            '`' => {
                for next in chars.by_ref() {
                    if next == '`' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'/') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut previous = ' ';
                for next in chars.by_ref() {
                    if previous == '*' && next == '/' {
                        break;
                    }
                    previous = next;
                }
            }
            _ => {}
        }
    }
    depth
}

/// Accumulates input lines until they form a fragment with balanced
/// brackets.
#[derive(Debug, Default)]
pub struct FragmentBuffer {
    pending: String,
}

impl FragmentBuffer {
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Adds a line and returns the fragment once it is complete.
    pub fn push_line(&mut self, line: &str) -> Option<String> {
        if !self.pending.is_empty() {
            self.pending.push('\n');
        }
        self.pending.push_str(line.trim_end_matches(['\r', '\n']));
        if open_brackets(&self.pending) > 0 {
            return None;
        }
        Some(std::mem::take(&mut self.pending))
    }

    /// Returns whatever is buffered, complete or not.
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brackets_in_literals_do_not_count() {
        assert_eq!(open_brackets(r#"f("(", '[', `{`) // ("#), 0);
        assert_eq!(open_brackets("m := {a: [1, /* ( */ 2"), 2);
        assert_eq!(open_brackets(r#""\"(""#), 0);
    }

    #[test]
    fn buffer_waits_for_closing_brackets() {
        let mut buffer = FragmentBuffer::default();
        assert_eq!(buffer.push_line("f := func(x) {"), None);
        assert_eq!(buffer.push_line("  return x * 2"), None);
        assert!(!buffer.is_empty());
        assert_eq!(
            buffer.push_line("}").as_deref(),
            Some("f := func(x) {\n  return x * 2\n}")
        );
        assert!(buffer.is_empty());
        assert_eq!(buffer.push_line("1 + 1)").as_deref(), Some("1 + 1)"));
    }
}
