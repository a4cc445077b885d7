//! Tokenizer for filter expressions.

use super::FilterError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    LParen,
    RParen,
    And,
    Or,
    Not,
    Equal,
    NotEqual,
    Contains,
    NotContains,
    /// A property name or a value, with escapes resolved and surrounding whitespace trimmed.
    Value(String),
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the token in the expression.
    pub position: usize,
}

/// Characters that end a value unless escaped with `\`.
const SPECIAL: &[char] = &['(', ')', '&', '|', '=', '!', '~'];

pub fn tokenize(source: &str) -> Result<Vec<Token>, FilterError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(position, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '&' => TokenKind::And,
            '|' => TokenKind::Or,
            '=' => TokenKind::Equal,
            '~' => TokenKind::Contains,
            '!' => {
                chars.next();
                let kind = match chars.peek() {
                    Some((_, '=')) => TokenKind::NotEqual,
                    Some((_, '~')) => TokenKind::NotContains,
                    _ => {
                        tokens.push(Token {
                            kind: TokenKind::Not,
                            position,
                        });
                        continue;
                    }
                };
                chars.next();
                tokens.push(Token { kind, position });
                continue;
            }
            _ => {
                let mut value = String::new();
                while let Some(&(offset, c)) = chars.peek() {
                    if SPECIAL.contains(&c) {
                        break;
                    }
                    chars.next();
                    if c == '\\' {
                        match chars.next() {
                            Some((_, escaped)) => value.push(escaped),
                            None => return Err(FilterError::DanglingEscape { position: offset }),
                        }
                    } else {
                        value.push(c);
                    }
                }
                tokens.push(Token {
                    kind: TokenKind::Value(value.trim().to_string()),
                    position,
                });
                continue;
            }
        };
        chars.next();
        tokens.push(Token { kind, position });
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        position: source.len(),
    });
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("!(A!=b)&c!~d|e~f"),
            vec![
                TokenKind::Not,
                TokenKind::LParen,
                TokenKind::Value("A".into()),
                TokenKind::NotEqual,
                TokenKind::Value("b".into()),
                TokenKind::RParen,
                TokenKind::And,
                TokenKind::Value("c".into()),
                TokenKind::NotContains,
                TokenKind::Value("d".into()),
                TokenKind::Or,
                TokenKind::Value("e".into()),
                TokenKind::Contains,
                TokenKind::Value("f".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_values_keep_inner_spaces_and_escapes() {
        assert_eq!(
            kinds(r"Name = Adds \(1,2\) "),
            vec![
                TokenKind::Value("Name".into()),
                TokenKind::Equal,
                TokenKind::Value("Adds (1,2)".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_dangling_escape() {
        assert_eq!(tokenize(r"a\").unwrap_err(), FilterError::DanglingEscape { position: 1 });
    }
}
