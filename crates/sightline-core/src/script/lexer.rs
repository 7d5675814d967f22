//! Splitting one script line into tokens.

use crate::vars::is_valid_name;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    Word(String),
    Quoted(String),
    /// `key=value` or `key="value"`.
    Named {
        key: String,
        value: String,
    },
    Open,
    Close,
}

/// Tokenize a line. A `#` at the start of a token begins a comment.
pub(crate) fn tokenize(line: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '#' => break,
            '{' => {
                chars.next();
                tokens.push(Token::Open);
            }
            '}' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '"' => {
                chars.next();
                tokens.push(Token::Quoted(read_quoted(&mut chars)?));
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || c == '{' || c == '}' {
                        break;
                    }
                    if c == '$' {
                        chars.next();
                        word.push('$');
                        if chars.peek() == Some(&'{') {
                            read_placeholder(&mut chars, &mut word)?;
                        }
                        continue;
                    }
                    if c == '"' {
                        // Only `key="..."` may glue a quote onto a word.
                        let Some(key) = word.strip_suffix('=').filter(|k| is_valid_name(k)) else {
                            return Err(format!("unexpected '\"' after '{word}'"));
                        };
                        chars.next();
                        let key = key.to_string();
                        let value = read_quoted(&mut chars)?;
                        tokens.push(Token::Named { key, value });
                        word.clear();
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                if !word.is_empty() {
                    tokens.push(classify(word));
                }
            }
        }
    }
    Ok(tokens)
}

fn classify(word: String) -> Token {
    if let Some((key, value)) = word.split_once('=') {
        if is_valid_name(key) && !value.is_empty() {
            return Token::Named {
                key: key.to_string(),
                value: value.to_string(),
            };
        }
    }
    Token::Word(word)
}

fn read_placeholder(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    word: &mut String,
) -> Result<(), String> {
    for c in chars.by_ref() {
        word.push(c);
        if c == '}' {
            return Ok(());
        }
    }
    Err(format!("unterminated '${{' in '{word}'"))
}

fn read_quoted(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Result<String, String> {
    let mut out = String::new();
    while let Some(c) = chars.next() {
        match c {
            '"' => return Ok(out),
            '\\' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => break,
            },
            c => out.push(c),
        }
    }
    Err("unterminated string".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(s: &str) -> Token {
        Token::Word(s.into())
    }

    #[test]
    fn test_simple_command() {
        assert_eq!(
            tokenize("click login_button").unwrap(),
            vec![word("click"), word("login_button")]
        );
    }

    #[test]
    fn test_named_arguments() {
        assert_eq!(
            tokenize("click ok timeout=5s best_effort=true").unwrap(),
            vec![
                word("click"),
                word("ok"),
                Token::Named {
                    key: "timeout".into(),
                    value: "5s".into()
                },
                Token::Named {
                    key: "best_effort".into(),
                    value: "true".into()
                },
            ]
        );
    }

    #[test]
    fn test_quoted_named_argument() {
        assert_eq!(
            tokenize(r#"log msg="a b""#).unwrap(),
            vec![
                word("log"),
                Token::Named {
                    key: "msg".into(),
                    value: "a b".into()
                }
            ]
        );
    }

    #[test]
    fn test_braces_and_placeholders() {
        assert_eq!(
            tokenize("repeat ${n}{").unwrap(),
            vec![word("repeat"), word("${n}"), Token::Open]
        );
        assert_eq!(
            tokenize("} else {").unwrap(),
            vec![Token::Close, word("else"), Token::Open]
        );
    }

    #[test]
    fn test_quoted_escapes_and_comments() {
        assert_eq!(
            tokenize(r#"type "say \"hi\"\n" # trailing"#).unwrap(),
            vec![word("type"), Token::Quoted("say \"hi\"\n".into())]
        );
        assert_eq!(
            tokenize("press shift+#").unwrap(),
            vec![word("press"), word("shift+#")]
        );
    }

    #[test]
    fn test_errors() {
        assert!(tokenize(r#"type "open"#).is_err());
        assert!(tokenize("click ${oops").is_err());
        assert!(tokenize(r#"click a"b""#).is_err());
    }
}
