//! Minimal HOCON reader for the broker configuration.
//!
//! Only enough of HOCON is understood to locate scalar settings such as the
//! dashboard listener bind address: nested objects, dotted keys, `=` / `:`
//! separators, quoted strings with JSON escapes, `"""` multi-line strings,
//! comments and arrays (skipped). Substitutions and includes are not resolved.

use thiserror::Error;

/// Path of the dashboard HTTP listener bind setting.
const DASHBOARD_BIND_PATH: [&str; 4] = ["dashboard", "listeners", "http", "bind"];

/// Errors raised while reading the broker configuration.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unterminated quoted string starting at byte {0}")]
    UnterminatedString(usize),

    #[error("invalid escape sequence '\\{0}' in quoted string")]
    InvalidEscape(String),

    #[error("unbalanced '{0}' in configuration")]
    Unbalanced(char),

    #[error("invalid port '{0}' in dashboard.listeners.http.bind")]
    InvalidPort(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Quoted(String),
    Open,
    Close,
    OpenArray,
    CloseArray,
    Separator,
    End,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ConfigError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        match c {
            '\n' | ',' => tokens.push(Token::End),
            c if c.is_whitespace() => {}
            '#' => {
                while chars.next_if(|&(_, c)| c != '\n').is_some() {}
            }
            '/' if chars.peek().is_some_and(|&(_, c)| c == '/') => {
                while chars.next_if(|&(_, c)| c != '\n').is_some() {}
            }
            '{' => tokens.push(Token::Open),
            '}' => tokens.push(Token::Close),
            '[' => tokens.push(Token::OpenArray),
            ']' => tokens.push(Token::CloseArray),
            '=' | ':' => tokens.push(Token::Separator),
            '"' if input.get(pos..).is_some_and(|rest| rest.starts_with("\"\"\"")) => {
                chars.next();
                chars.next();
                tokens.push(Token::Quoted(read_multiline(&mut chars, pos)?));
            }
            '"' => tokens.push(Token::Quoted(read_quoted(&mut chars, pos)?)),
            c => {
                let mut word = String::from(c);
                while let Some((_, c)) = chars.next_if(|&(_, c)| {
                    !c.is_whitespace() && !matches!(c, '{' | '}' | '[' | ']' | '=' | ':' | ',' | '#' | '"')
                }) {
                    word.push(c);
                }
                tokens.push(Token::Word(word));
            }
        }
    }

    Ok(tokens)
}

type Chars<'a> = std::iter::Peekable<std::str::CharIndices<'a>>;

/// Read a `"..."` string after its opening quote, decoding escapes.
fn read_quoted(chars: &mut Chars<'_>, start: usize) -> Result<String, ConfigError> {
    let mut value = String::new();
    while let Some((_, c)) = chars.next() {
        match c {
            '"' => return Ok(value),
            '\\' => {
                let Some((_, escaped)) = chars.next() else {
                    break;
                };
                match escaped {
                    'n' => value.push('\n'),
                    't' => value.push('\t'),
                    'r' => value.push('\r'),
                    'b' => value.push('\u{8}'),
                    'f' => value.push('\u{c}'),
                    'u' => {
                        let hex: String = (0..4).filter_map(|_| chars.next().map(|(_, c)| c)).collect();
                        match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                            Some(decoded) => value.push(decoded),
                            None => return Err(ConfigError::InvalidEscape(format!("u{hex}"))),
                        }
                    }
                    '"' | '\\' | '/' => value.push(escaped),
                    other => return Err(ConfigError::InvalidEscape(other.to_string())),
                }
            }
            c => value.push(c),
        }
    }
    Err(ConfigError::UnterminatedString(start))
}

/// Read a `"""..."""` string after its opening quotes. No escapes apply, and
/// quotes beyond the closing three belong to the value.
fn read_multiline(chars: &mut Chars<'_>, start: usize) -> Result<String, ConfigError> {
    let mut value = String::new();
    let mut quotes = 0usize;
    while let Some((_, c)) = chars.next() {
        if c == '"' {
            quotes += 1;
            if quotes >= 3 && chars.peek().is_none_or(|&(_, next)| next != '"') {
                value.extend(std::iter::repeat_n('"', quotes - 3));
                return Ok(value);
            }
            continue;
        }
        value.extend(std::iter::repeat_n('"', quotes));
        quotes = 0;
        value.push(c);
    }
    Err(ConfigError::UnterminatedString(start))
}

fn key_segments(token: &Token) -> Option<Vec<String>> {
    match token {
        Token::Word(w) => Some(w.split('.').map(str::to_string).collect()),
        Token::Quoted(q) => Some(vec![q.clone()]),
        _ => None,
    }
}

/// Look up a scalar value by its full path. Later definitions win.
fn lookup(input: &str, path: &[&str]) -> Result<Option<String>, ConfigError> {
    let tokens = tokenize(input)?;
    let mut stack: Vec<Vec<String>> = Vec::new();
    let mut found = None;
    let mut iter = tokens.iter().peekable();

    let is_target = |stack: &[Vec<String>], key: &[String]| {
        let full: Vec<&str> = stack
            .iter()
            .flatten()
            .chain(key.iter())
            .map(String::as_str)
            .collect();
        full == path
    };

    while let Some(token) = iter.next() {
        match token {
            Token::End => {}
            Token::Close => {
                if stack.pop().is_none() {
                    return Err(ConfigError::Unbalanced('}'));
                }
            }
            Token::Separator | Token::Open | Token::OpenArray | Token::CloseArray => {}
            key_token => {
                let Some(key) = key_segments(key_token) else {
                    continue;
                };
                if iter.next_if_eq(&&Token::Separator).is_some() {
                    // `key = value`, `key = { ... }` or `key = [ ... ]`
                    match iter.next() {
                        Some(Token::Open) => stack.push(key),
                        Some(Token::OpenArray) => skip_array(&mut iter)?,
                        Some(Token::Word(v)) | Some(Token::Quoted(v)) => {
                            if is_target(&stack, &key) {
                                found = Some(v.clone());
                            }
                        }
                        _ => {}
                    }
                } else if iter.next_if_eq(&&Token::Open).is_some() {
                    stack.push(key);
                }
            }
        }
    }

    if !stack.is_empty() {
        return Err(ConfigError::Unbalanced('{'));
    }
    Ok(found)
}

fn skip_array<'a, I>(iter: &mut std::iter::Peekable<I>) -> Result<(), ConfigError>
where
    I: Iterator<Item = &'a Token>,
{
    let mut depth = 1usize;
    for token in iter.by_ref() {
        match token {
            Token::OpenArray => depth += 1,
            Token::CloseArray => {
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
            }
            _ => {}
        }
    }
    Err(ConfigError::Unbalanced('['))
}

/// Resolve the dashboard (management API) port from the broker configuration.
///
/// Accepts both a bare port (`18083`) and a `host:port` bind address.
/// Returns `Ok(None)` when the setting is absent.
pub fn dashboard_port(config_data: &str) -> Result<Option<String>, ConfigError> {
    let Some(bind) = lookup(config_data, &DASHBOARD_BIND_PATH)? else {
        return Ok(None);
    };
    let bind = bind.trim().trim_matches(|c: char| c == '\'' || c == '"');
    if bind.is_empty() {
        return Ok(None);
    }

    let port = match bind.rsplit_once(':') {
        Some((_, port)) => port,
        None => bind,
    };
    port.parse::<u16>()
        .map_err(|_| ConfigError::InvalidPort(port.to_string()))?;

    Ok(Some(port.to_string()))
}
