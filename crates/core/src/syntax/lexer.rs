//! Tokenizer for generated fragments.
//!
//! Comments are dropped, string and char literals are kept as single tokens
//! so that brace matching and identifier scans never look inside them. Each
//! token carries its byte span so the parser can slice bodies out of the
//! original source verbatim.

use super::parser::ParseError;

/// Token payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenKind {
    Ident(String),
    Punct(char),
    Str(String),
    Char(String),
    Number(String),
}

/// A token with its 1-based source line and byte span.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    /// Byte offset of the first character.
    pub start: usize,
    /// Byte offset one past the last character.
    pub end: usize,
}

impl Token {
    /// Identifier text, if this token is one.
    pub fn ident(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Ident(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this token is the given punctuation character.
    pub fn is_punct(&self, c: char) -> bool {
        matches!(&self.kind, TokenKind::Punct(p) if *p == c)
    }

    /// Whether this token is the given identifier.
    pub fn is_ident(&self, s: &str) -> bool {
        matches!(&self.kind, TokenKind::Ident(t) if t == s)
    }
}

struct Cursor<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    len: usize,
    line: usize,
}

impl<'a> Cursor<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.char_indices().peekable(),
            len: source.len(),
            line: 1,
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    /// Byte offset of the next character (or end of input).
    fn offset(&mut self) -> usize {
        self.chars.peek().map_or(self.len, |&(i, _)| i)
    }

    fn bump(&mut self) -> Option<char> {
        let (_, c) = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }
}

/// Tokenize a fragment. Fails only on unterminated literals or comments.
pub fn lex(source: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut cur = Cursor::new(source);

    while let Some(c) = cur.peek() {
        let start = cur.offset();
        let line = cur.line;
        match c {
            c if c.is_whitespace() => {
                cur.bump();
            }
            '/' => {
                cur.bump();
                match cur.peek() {
                    Some('/') => {
                        while let Some(c) = cur.bump() {
                            if c == '\n' {
                                break;
                            }
                        }
                    }
                    Some('*') => {
                        cur.bump();
                        let mut closed = false;
                        let mut prev = '\0';
                        while let Some(c) = cur.bump() {
                            if prev == '*' && c == '/' {
                                closed = true;
                                break;
                            }
                            prev = c;
                        }
                        if !closed {
                            return Err(ParseError::UnterminatedComment { line });
                        }
                    }
                    _ => tokens.push(Token {
                        kind: TokenKind::Punct('/'),
                        line,
                        start,
                        end: cur.offset(),
                    }),
                }
            }
            '@' => {
                cur.bump();
                if cur.peek() == Some('"') {
                    cur.bump();
                    let mut text = String::new();
                    let mut closed = false;
                    while let Some(c) = cur.bump() {
                        if c == '"' {
                            // A doubled quote escapes inside verbatim strings.
                            if cur.peek() == Some('"') {
                                cur.bump();
                                text.push('"');
                            } else {
                                closed = true;
                                break;
                            }
                        } else {
                            text.push(c);
                        }
                    }
                    if !closed {
                        return Err(ParseError::UnterminatedString { line });
                    }
                    tokens.push(Token {
                        kind: TokenKind::Str(text),
                        line,
                        start,
                        end: cur.offset(),
                    });
                } else {
                    // `@identifier` escapes a keyword; the prefix stays out
                    // of the identifier text.
                    let ident = take_ident(&mut cur);
                    tokens.push(Token {
                        kind: TokenKind::Ident(ident),
                        line,
                        start,
                        end: cur.offset(),
                    });
                }
            }
            '"' => {
                cur.bump();
                let mut text = String::new();
                let mut closed = false;
                while let Some(c) = cur.bump() {
                    match c {
                        '\\' => {
                            text.push('\\');
                            if let Some(escaped) = cur.bump() {
                                text.push(escaped);
                            }
                        }
                        '"' => {
                            closed = true;
                            break;
                        }
                        _ => text.push(c),
                    }
                }
                if !closed {
                    return Err(ParseError::UnterminatedString { line });
                }
                tokens.push(Token {
                    kind: TokenKind::Str(text),
                    line,
                    start,
                    end: cur.offset(),
                });
            }
            '\'' => {
                cur.bump();
                let mut text = String::new();
                let mut closed = false;
                while let Some(c) = cur.bump() {
                    match c {
                        '\\' => {
                            text.push('\\');
                            if let Some(escaped) = cur.bump() {
                                text.push(escaped);
                            }
                        }
                        '\'' => {
                            closed = true;
                            break;
                        }
                        _ => text.push(c),
                    }
                }
                if !closed {
                    return Err(ParseError::UnterminatedString { line });
                }
                tokens.push(Token {
                    kind: TokenKind::Char(text),
                    line,
                    start,
                    end: cur.offset(),
                });
            }
            c if c.is_ascii_digit() => {
                let mut text = String::new();
                while let Some(c) = cur.peek() {
                    if c.is_ascii_alphanumeric() || c == '.' || c == '_' {
                        text.push(c);
                        cur.bump();
                    } else {
                        break;
                    }
                }
                tokens.push(Token {
                    kind: TokenKind::Number(text),
                    line,
                    start,
                    end: cur.offset(),
                });
            }
            c if c.is_alphabetic() || c == '_' => {
                let ident = take_ident(&mut cur);
                tokens.push(Token {
                    kind: TokenKind::Ident(ident),
                    line,
                    start,
                    end: cur.offset(),
                });
            }
            c => {
                cur.bump();
                tokens.push(Token {
                    kind: TokenKind::Punct(c),
                    line,
                    start,
                    end: cur.offset(),
                });
            }
        }
    }

    Ok(tokens)
}

fn take_ident(cur: &mut Cursor<'_>) -> String {
    let mut ident = String::new();
    while let Some(c) = cur.peek() {
        if c.is_alphanumeric() || c == '_' {
            ident.push(c);
            cur.bump();
        } else {
            break;
        }
    }
    ident
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idents(source: &str) -> Vec<String> {
        lex(source)
            .expect("lex")
            .into_iter()
            .filter_map(|t| t.ident().map(str::to_string))
            .collect()
    }

    #[test]
    fn lexes_identifiers_and_puncts() {
        let tokens = lex("public class Foo { }").expect("lex");
        assert_eq!(tokens.len(), 5);
        assert!(tokens[0].is_ident("public"));
        assert!(tokens[1].is_ident("class"));
        assert!(tokens[2].is_ident("Foo"));
        assert!(tokens[3].is_punct('{'));
        assert!(tokens[4].is_punct('}'));
    }

    #[test]
    fn comments_are_dropped() {
        assert_eq!(
            idents("foo // bar\nbaz /* qux\nquux */ zot"),
            vec!["foo", "baz", "zot"]
        );
    }

    #[test]
    fn strings_hide_braces() {
        let tokens = lex(r#"var s = "{ not a brace }";"#).expect("lex");
        assert!(!tokens.iter().any(|t| t.is_punct('{')));
    }

    #[test]
    fn verbatim_strings_with_doubled_quotes() {
        let tokens = lex(r#"var s = @"say ""hi""";"#).expect("lex");
        let s = tokens
            .iter()
            .find_map(|t| match &t.kind {
                TokenKind::Str(s) => Some(s.clone()),
                _ => None,
            })
            .expect("string token");
        assert_eq!(s, "say \"hi\"");
    }

    #[test]
    fn tracks_lines() {
        let tokens = lex("a\nb\n\nc").expect("lex");
        let lines: Vec<usize> = tokens.iter().map(|t| t.line).collect();
        assert_eq!(lines, vec![1, 2, 4]);
    }

    #[test]
    fn spans_slice_the_source() {
        let src = "class Foo";
        let tokens = lex(src).expect("lex");
        assert_eq!(&src[tokens[1].start..tokens[1].end], "Foo");
    }

    #[test]
    fn unterminated_string_errors() {
        let err = lex("var s = \"oops").expect_err("should fail");
        assert!(matches!(err, ParseError::UnterminatedString { line: 1 }));
    }
}
