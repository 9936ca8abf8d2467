//! Tokenizer for the modification-request language. Tokens are separated by
//! whitespace, `#` starts a comment, string literals use double quotes with
//! `\\` and `\"` escapes, and a trailing backslash continues the statement
//! on the next line.

use super::DslError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    /// Quoted tokens are literals and never match keywords.
    pub quoted: bool,
}

impl Token {
    /// The token as a keyword candidate: unquoted, lowercased.
    pub fn keyword(&self) -> Option<String> {
        (!self.quoted).then(|| self.text.to_ascii_lowercase())
    }

    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.keyword().as_deref() == Some(keyword)
    }
}

/// One statement: a logical line after comment stripping and continuation
/// joining. `line` is the first physical line number.
#[derive(Debug, Clone)]
pub struct StatementTokens {
    pub tokens: Vec<Token>,
    pub line: usize,
}

pub fn tokenize(file: &str, content: &str) -> Result<Vec<StatementTokens>, DslError> {
    let mut statements = Vec::new();
    let mut pending: Vec<Token> = Vec::new();
    let mut pending_start = 0usize;

    for (i, line) in content.lines().enumerate() {
        let line_no = i + 1;
        let (mut tokens, continued) = tokenize_line(file, line, line_no)?;

        if pending.is_empty() {
            pending_start = line_no;
        }
        pending.append(&mut tokens);

        if continued {
            continue;
        }
        if !pending.is_empty() {
            statements.push(StatementTokens {
                tokens: std::mem::take(&mut pending),
                line: pending_start,
            });
        }
    }

    if !pending.is_empty() {
        // A trailing continuation at EOF still yields its statement.
        statements.push(StatementTokens {
            tokens: pending,
            line: pending_start,
        });
    }
    Ok(statements)
}

fn tokenize_line(file: &str, line: &str, line_no: usize) -> Result<(Vec<Token>, bool), DslError> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();
    let mut current = String::new();
    let mut continued = false;

    let flush = |current: &mut String, tokens: &mut Vec<Token>| {
        if !current.is_empty() {
            tokens.push(Token {
                text: std::mem::take(current),
                quoted: false,
            });
        }
    };

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => flush(&mut current, &mut tokens),
            '#' => {
                flush(&mut current, &mut tokens);
                break;
            }
            '\\' if chars.peek().is_none() => {
                flush(&mut current, &mut tokens);
                continued = true;
            }
            '"' => {
                flush(&mut current, &mut tokens);
                let mut literal = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('\\' | '"')) => literal.push(c),
                            _ => {
                                return Err(DslError::Parse {
                                    file: file.to_string(),
                                    line: line_no,
                                    message: "invalid escape in string literal".into(),
                                })
                            }
                        },
                        Some(c) => literal.push(c),
                        None => {
                            return Err(DslError::Parse {
                                file: file.to_string(),
                                line: line_no,
                                message: "unterminated string literal".into(),
                            })
                        }
                    }
                }
                tokens.push(Token {
                    text: literal,
                    quoted: true,
                });
            }
            c => current.push(c),
        }
    }
    flush(&mut current, &mut tokens);
    Ok((tokens, continued))
}
