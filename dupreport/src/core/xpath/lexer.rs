//! XPath 1.0 tokenizer.
//!
//! Operator names (`and`, `or`, `div`, `mod`) and the multiply `*` are
//! disambiguated from names and the `*` name test by looking at the
//! preceding token, as XPath 1.0 section 3.7 prescribes.

use super::XPathError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Slash,
    DoubleSlash,
    Pipe,
    Plus,
    Minus,
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Div,
    Mod,
    Multiply,
    Star,
    At,
    ColonColon,
    Comma,
    Dot,
    DotDot,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Literal(String),
    Number(f64),
    Name(String),
    Variable(String),
}

impl Token {
    fn is_operator(&self) -> bool {
        matches!(
            self,
            Token::Slash
                | Token::DoubleSlash
                | Token::Pipe
                | Token::Plus
                | Token::Minus
                | Token::Eq
                | Token::Neq
                | Token::Lt
                | Token::Le
                | Token::Gt
                | Token::Ge
                | Token::And
                | Token::Or
                | Token::Div
                | Token::Mod
                | Token::Multiply
        )
    }
}

/// True when the next `*` or NCName must be read as an operator.
fn operator_expected(prev: Option<&Token>) -> bool {
    match prev {
        None => false,
        Some(tok) => {
            !(tok.is_operator()
                || matches!(
                    tok,
                    Token::At | Token::ColonColon | Token::LParen | Token::LBracket | Token::Comma
                ))
        }
    }
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

pub(crate) fn tokenize(input: &str) -> Result<Vec<Token>, XPathError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens: Vec<Token> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let next = chars.get(i + 1).copied();
        let token = match c {
            '/' if next == Some('/') => {
                i += 2;
                Token::DoubleSlash
            }
            '/' => {
                i += 1;
                Token::Slash
            }
            '|' => {
                i += 1;
                Token::Pipe
            }
            '+' => {
                i += 1;
                Token::Plus
            }
            '-' => {
                i += 1;
                Token::Minus
            }
            '=' => {
                i += 1;
                Token::Eq
            }
            '!' if next == Some('=') => {
                i += 2;
                Token::Neq
            }
            '<' if next == Some('=') => {
                i += 2;
                Token::Le
            }
            '<' => {
                i += 1;
                Token::Lt
            }
            '>' if next == Some('=') => {
                i += 2;
                Token::Ge
            }
            '>' => {
                i += 1;
                Token::Gt
            }
            '*' => {
                i += 1;
                if operator_expected(tokens.last()) {
                    Token::Multiply
                } else {
                    Token::Star
                }
            }
            '@' => {
                i += 1;
                Token::At
            }
            ':' if next == Some(':') => {
                i += 2;
                Token::ColonColon
            }
            ',' => {
                i += 1;
                Token::Comma
            }
            '(' => {
                i += 1;
                Token::LParen
            }
            ')' => {
                i += 1;
                Token::RParen
            }
            '[' => {
                i += 1;
                Token::LBracket
            }
            ']' => {
                i += 1;
                Token::RBracket
            }
            '.' if next == Some('.') => {
                i += 2;
                Token::DotDot
            }
            '.' if next.is_some_and(|n| n.is_ascii_digit()) => {
                let (number, end) = read_number(&chars, i);
                i = end;
                Token::Number(number)
            }
            '.' => {
                i += 1;
                Token::Dot
            }
            '"' | '\'' => {
                let close = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == c)
                    .ok_or_else(|| XPathError::Syntax {
                        expr: input.to_string(),
                        message: "unterminated string literal".to_string(),
                    })?;
                let literal: String = chars[i + 1..i + 1 + close].iter().collect();
                i += close + 2;
                Token::Literal(literal)
            }
            '$' => {
                let (name, end) = read_qname(&chars, i + 1);
                if name.is_empty() {
                    return Err(XPathError::Syntax {
                        expr: input.to_string(),
                        message: "expected variable name after '$'".to_string(),
                    });
                }
                i = end;
                Token::Variable(name)
            }
            c if c.is_ascii_digit() => {
                let (number, end) = read_number(&chars, i);
                i = end;
                Token::Number(number)
            }
            c if is_name_start(c) => {
                let (name, end) = read_qname(&chars, i);
                i = end;
                if operator_expected(tokens.last()) {
                    match name.as_str() {
                        "and" => Token::And,
                        "or" => Token::Or,
                        "div" => Token::Div,
                        "mod" => Token::Mod,
                        _ => {
                            return Err(XPathError::Syntax {
                                expr: input.to_string(),
                                message: format!("expected an operator, found '{name}'"),
                            });
                        }
                    }
                } else {
                    Token::Name(name)
                }
            }
            other => {
                return Err(XPathError::Syntax {
                    expr: input.to_string(),
                    message: format!("unexpected character '{other}'"),
                });
            }
        };
        tokens.push(token);
    }

    Ok(tokens)
}

/// Read a QName (`prefix:local` or `local`) starting at `start`.
///
/// A single `:` joins prefix and local part; `::` ends the name.
fn read_qname(chars: &[char], start: usize) -> (String, usize) {
    let mut end = start;
    if end < chars.len() && is_name_start(chars[end]) {
        end += 1;
        while end < chars.len() && is_name_char(chars[end]) {
            end += 1;
        }
        let has_prefix = end + 1 < chars.len()
            && chars[end] == ':'
            && chars[end + 1] != ':'
            && (is_name_start(chars[end + 1]) || chars[end + 1] == '*');
        if has_prefix {
            end += 1;
            if chars[end] == '*' {
                end += 1;
            } else {
                while end < chars.len() && is_name_char(chars[end]) {
                    end += 1;
                }
            }
        }
    }
    (chars[start..end].iter().collect(), end)
}

fn read_number(chars: &[char], start: usize) -> (f64, usize) {
    let mut end = start;
    let mut seen_dot = false;
    while end < chars.len() {
        let c = chars[end];
        if c.is_ascii_digit() {
            end += 1;
        } else if c == '.' && !seen_dot && chars.get(end + 1) != Some(&'.') {
            seen_dot = true;
            end += 1;
        } else {
            break;
        }
    }
    let text: String = chars[start..end].iter().collect();
    (text.parse().unwrap_or(f64::NAN), end)
}
