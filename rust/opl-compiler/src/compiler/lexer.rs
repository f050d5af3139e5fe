//! Line/token splitter for OPL source text.
//!
//! Tokens are separated by single spaces and lines by newlines. Quoted
//! strings keep their spaces and newlines; the quote characters themselves
//! are dropped. A `//` comment swallows the rest of its line into the current
//! token so the compiler can recognise and skip it.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Normal,
    Quoted { quote: char, escape: bool },
    Comment,
}

pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    mode: Mode,
    token: String,
    line: Vec<String>,
    lines: Vec<Vec<String>>,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.chars().collect(),
            pos: 0,
            mode: Mode::Normal,
            token: String::new(),
            line: Vec::new(),
            lines: Vec::new(),
        }
    }

    fn current(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current()?;
        self.pos += 1;
        Some(ch)
    }

    fn end_token(&mut self) {
        self.line.push(std::mem::take(&mut self.token));
    }

    fn end_line(&mut self) {
        self.end_token();
        self.lines.push(std::mem::take(&mut self.line));
    }

    /// Split into lines of tokens. Tokens may be empty (double spaces,
    /// trailing spaces); the final token and line are always emitted.
    pub fn tokenize(mut self) -> Vec<Vec<String>> {
        while let Some(ch) = self.current() {
            match self.mode {
                Mode::Comment => {
                    if ch == '\n' {
                        self.mode = Mode::Normal;
                        self.end_line();
                    } else {
                        self.token.push(ch);
                    }
                }
                Mode::Quoted { quote, escape: true } => {
                    self.token.push(ch);
                    self.mode = Mode::Quoted {
                        quote,
                        escape: false,
                    };
                }
                Mode::Quoted { quote, escape: false } => {
                    if ch == quote {
                        self.mode = Mode::Normal;
                    } else if ch == '\\' {
                        self.mode = Mode::Quoted { quote, escape: true };
                    } else {
                        self.token.push(ch);
                    }
                }
                Mode::Normal => match ch {
                    '"' | '\'' => {
                        self.mode = Mode::Quoted {
                            quote: ch,
                            escape: false,
                        }
                    }
                    ' ' => self.end_token(),
                    '\n' => self.end_line(),
                    '/' if self.peek() == Some('/') => {
                        self.token.push_str("//");
                        self.advance();
                        self.mode = Mode::Comment;
                    }
                    _ => self.token.push(ch),
                },
            }
            self.advance();
        }
        self.end_line();
        self.lines
    }
}

/// Convenience wrapper around [`Lexer::tokenize`].
pub fn split_lines(source: &str) -> Vec<Vec<String>> {
    Lexer::new(source).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Vec<String>> {
        split_lines(src)
    }

    fn line(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn splits_on_spaces_and_newlines() {
        assert_eq!(
            toks("2 i1 i2\n1"),
            vec![line(&["2", "i1", "i2"]), line(&["1"])]
        );
    }

    #[test]
    fn empty_tokens_are_kept() {
        assert_eq!(toks("1  i2 "), vec![line(&["1", "", "i2", ""])]);
        assert_eq!(toks(""), vec![line(&[""])]);
    }

    #[test]
    fn quotes_are_dropped_and_protect_whitespace() {
        assert_eq!(toks("2 s'a b\nc' i0"), vec![line(&["2", "sa b\nc", "i0"])]);
    }

    #[test]
    fn other_quote_is_literal_inside_string() {
        assert_eq!(toks(r#"2 s"it's""#), vec![line(&["2", "sit's"])]);
        assert_eq!(toks(r#"2 s'say "hi"'"#), vec![line(&["2", r#"ssay "hi""#])]);
    }

    #[test]
    fn backslash_escapes_inside_strings_only() {
        assert_eq!(toks(r"2 s'a\'b\\c'"), vec![line(&["2", r"sa'b\c"])]);
        assert_eq!(toks(r"2 s'\n'"), vec![line(&["2", "sn"])]);
        assert_eq!(toks(r"a\b"), vec![line(&[r"a\b"])]);
    }

    #[test]
    fn comments_absorb_the_rest_of_the_line() {
        assert_eq!(
            toks("// it's \"a\" comment\n1"),
            vec![line(&["// it's \"a\" comment"]), line(&["1"])]
        );
        assert_eq!(toks("1 //x y"), vec![line(&["1", "//x y"])]);
    }

    #[test]
    fn slash_inside_string_is_not_a_comment() {
        assert_eq!(toks("2 s'a//b'"), vec![line(&["2", "sa//b"])]);
    }

    #[test]
    fn trailing_slash_does_not_read_past_end() {
        assert_eq!(toks("1 /"), vec![line(&["1", "/"])]);
    }
}
