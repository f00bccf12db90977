//! Parameter templates.
//!
//! Rule authors write subject, action and resource parameters as text
//! templates evaluated against the authentication session:
//!
//! ```text
//! rn:tenants:{{.Extra.tenant}}:users:{{.Subject}}
//! {{index .Header "X-Org" 0}}
//! {{- /* whitespace trimmed around this comment */ -}}
//! ```
//!
//! A [`Template`] is parsed once and is immutable afterwards, so a compiled
//! template can be shared between threads and rendered any number of times.
//! Rendering is strict: a missing field, key or index is an error rather than
//! a placeholder.

use serde_json::Value;
use thiserror::Error;

/// Errors raised while compiling or rendering a template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum TemplateError {
    /// An action was opened with `{{` but never closed.
    #[error("unclosed action starting at offset {offset}")]
    UnclosedAction {
        /// Byte offset of the opening delimiter.
        offset: usize,
    },

    /// A comment was opened with `/*` but never closed.
    #[error("unclosed comment starting at offset {offset}")]
    UnclosedComment {
        /// Byte offset of the opening delimiter.
        offset: usize,
    },

    /// An action contained nothing.
    #[error("missing value for action at offset {offset}")]
    EmptyAction {
        /// Byte offset of the opening delimiter.
        offset: usize,
    },

    /// A string literal was not terminated.
    #[error("unterminated quoted string at offset {offset}")]
    UnterminatedString {
        /// Byte offset of the opening delimiter.
        offset: usize,
    },

    /// A field path such as `.Extra..name` was malformed.
    #[error("invalid field path '{field}'")]
    InvalidField {
        /// The offending field path.
        field: String,
    },

    /// An identifier that is not a known function.
    #[error("function '{name}' not defined")]
    UnknownFunction {
        /// The function name.
        name: String,
    },

    /// A token that is not valid at its position.
    #[error("unexpected '{token}' in action")]
    UnexpectedToken {
        /// The offending token.
        token: String,
    },

    /// `index` was called with too few arguments.
    #[error("wrong number of arguments for index: want at least 2, got {got}")]
    IndexArity {
        /// Number of arguments given.
        got: usize,
    },

    /// The rendered data has no such field.
    #[error("map has no entry for field path '{path}'")]
    MissingField {
        /// The field path that could not be resolved.
        path: String,
    },

    /// A field was accessed on a value that is not an object.
    #[error("can't evaluate field path '{path}' on a non-object value")]
    NotAnObject {
        /// The field path being resolved.
        path: String,
    },

    /// `index` found no entry for a key.
    #[error("index of missing key \"{key}\"")]
    MissingKey {
        /// The missing key.
        key: String,
    },

    /// `index` was out of bounds.
    #[error("index out of range: {index} (length {len})")]
    IndexOutOfRange {
        /// The requested position.
        index: i64,
        /// Length of the indexed array.
        len: usize,
    },

    /// `index` was applied to a value of the wrong kind.
    #[error("can't index item of type {kind} with {key}")]
    NotIndexable {
        /// Kind of the indexed value.
        kind: &'static str,
        /// The key that was used.
        key: String,
    },

    /// The action evaluated to null.
    #[error("action '{action}' evaluated to a null value")]
    NullValue {
        /// Source form of the action.
        action: String,
    },
}

/// A compiled template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    nodes: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Action(Expr),
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Field(Vec<String>),
    Literal(Value),
    Index { target: Box<Expr>, keys: Vec<Value> },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Field(Vec<String>),
    Literal(Value),
    Ident(String),
}

/// One scanned `{{ ... }}` block.
struct Action<'a> {
    content: Option<&'a str>,
    trim_right: bool,
    /// Bytes consumed, including the closing delimiter.
    len: usize,
}

impl Template {
    /// Parse template source text.
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut nodes = Vec::new();
        let mut rest = source;
        let mut offset = 0;
        let mut trim_next = false;

        while let Some(open) = rest.find("{{") {
            let after_open = &rest[open + 2..];
            let trim_left = starts_with_trim_marker(after_open);
            push_text(&mut nodes, &rest[..open], trim_next, trim_left);

            let body_start = usize::from(trim_left);
            let action = scan_action(&after_open[body_start..], offset + open)?;
            if let Some(content) = action.content {
                let tokens = tokenize(content, offset + open)?;
                nodes.push(Node::Action(build_expr(tokens, offset + open)?));
            }

            let consumed = open + 2 + body_start + action.len;
            offset += consumed;
            rest = &rest[consumed..];
            trim_next = action.trim_right;
        }
        push_text(&mut nodes, rest, trim_next, false);

        Ok(Self { nodes })
    }

    /// Render the template against `data`.
    pub fn render(&self, data: &Value) -> Result<String, TemplateError> {
        let mut out = String::new();
        for node in &self.nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Action(expr) => {
                    let value = expr.evaluate(data)?;
                    write_value(&mut out, &value, expr)?;
                }
            }
        }
        Ok(out)
    }

    /// Whether the template contains no actions.
    pub fn is_literal(&self) -> bool {
        self.nodes.iter().all(|n| matches!(n, Node::Text(_)))
    }
}

impl Expr {
    fn evaluate(&self, data: &Value) -> Result<Value, TemplateError> {
        match self {
            Self::Field(path) => lookup_field(data, path).cloned(),
            Self::Literal(value) => Ok(value.clone()),
            Self::Index { target, keys } => {
                let mut current = target.evaluate(data)?;
                for key in keys {
                    current = index_value(&current, key)?;
                }
                Ok(current)
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Field(path) => field_path(path),
            Self::Literal(value) => value.to_string(),
            Self::Index { target, keys } => {
                let keys: Vec<String> = keys.iter().map(Value::to_string).collect();
                format!("index {} {}", target.describe(), keys.join(" "))
            }
        }
    }
}

fn starts_with_trim_marker(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next() == Some('-') && chars.next().is_some_and(char::is_whitespace)
}

fn push_text(nodes: &mut Vec<Node>, text: &str, trim_start: bool, trim_end: bool) {
    let mut text = text;
    if trim_start {
        text = text.trim_start();
    }
    if trim_end {
        text = text.trim_end();
    }
    if !text.is_empty() {
        nodes.push(Node::Text(text.to_string()));
    }
}

/// Scan the body of an action up to and including its closing `}}`.
fn scan_action(body: &str, offset: usize) -> Result<Action<'_>, TemplateError> {
    let leading = body.len() - body.trim_start().len();
    if body[leading..].starts_with("/*") {
        let comment = &body[leading + 2..];
        let end = comment
            .find("*/")
            .ok_or(TemplateError::UnclosedComment { offset })?;
        let tail_start = leading + 2 + end + 2;
        let tail = &body[tail_start..];
        let tail_trimmed = tail.trim_start();
        let spaced = tail_trimmed.len() < tail.len();
        let (trim_right, close_at) = if spaced && tail_trimmed.starts_with("-}}") {
            (true, tail.len() - tail_trimmed.len() + 1)
        } else if tail.starts_with("}}") {
            (false, 0)
        } else {
            return Err(TemplateError::UnclosedComment { offset });
        };
        return Ok(Action {
            content: None,
            trim_right,
            len: tail_start + close_at + 2,
        });
    }

    let bytes = body.as_bytes();
    let mut i = 0;
    let mut quote: Option<u8> = None;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(b'"') if b == b'\\' => i += 1,
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'`' => quote = Some(b),
            None if b == b'}' && bytes.get(i + 1) == Some(&b'}') => {
                let mut content = &body[..i];
                let trim_right = content.ends_with('-')
                    && content[..content.len() - 1].ends_with(char::is_whitespace);
                if trim_right {
                    content = &content[..content.len() - 1];
                }
                if content.trim().is_empty() {
                    return Err(TemplateError::EmptyAction { offset });
                }
                return Ok(Action {
                    content: Some(content),
                    trim_right,
                    len: i + 2,
                });
            }
            None => {}
        }
        i += 1;
    }

    match quote {
        Some(_) => Err(TemplateError::UnterminatedString { offset }),
        None => Err(TemplateError::UnclosedAction { offset }),
    }
}

fn tokenize(content: &str, offset: usize) -> Result<Vec<Token>, TemplateError> {
    let mut tokens = Vec::new();
    let mut chars = content.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        if c == '"' {
            chars.next();
            let mut literal = String::new();
            let mut closed = false;
            while let Some((_, c)) = chars.next() {
                match c {
                    '"' => {
                        closed = true;
                        break;
                    }
                    '\\' => match chars.next() {
                        Some((_, 'n')) => literal.push('\n'),
                        Some((_, 't')) => literal.push('\t'),
                        Some((_, 'r')) => literal.push('\r'),
                        Some((_, other)) => literal.push(other),
                        None => break,
                    },
                    other => literal.push(other),
                }
            }
            if !closed {
                return Err(TemplateError::UnterminatedString { offset });
            }
            tokens.push(Token::Literal(Value::String(literal)));
            continue;
        }

        if c == '`' {
            chars.next();
            let rest = &content[start + 1..];
            let end = rest
                .find('`')
                .ok_or(TemplateError::UnterminatedString { offset })?;
            tokens.push(Token::Literal(Value::String(rest[..end].to_string())));
            while chars.peek().is_some_and(|&(i, _)| i <= start + 1 + end) {
                chars.next();
            }
            continue;
        }

        let end = content[start..]
            .find(char::is_whitespace)
            .map_or(content.len(), |e| start + e);
        let word = &content[start..end];
        while chars.peek().is_some_and(|&(i, _)| i < end) {
            chars.next();
        }

        tokens.push(classify_word(word)?);
    }

    Ok(tokens)
}

fn classify_word(word: &str) -> Result<Token, TemplateError> {
    if let Some(path) = word.strip_prefix('.') {
        if path.is_empty() {
            return Ok(Token::Field(Vec::new()));
        }
        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        let valid = segments.iter().all(|s| {
            !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_')
        });
        if !valid {
            return Err(TemplateError::InvalidField {
                field: word.to_string(),
            });
        }
        return Ok(Token::Field(segments));
    }

    let numeric = word.strip_prefix('-').unwrap_or(word);
    if numeric.starts_with(|c: char| c.is_ascii_digit()) {
        return word
            .parse::<i64>()
            .map(|n| Token::Literal(Value::from(n)))
            .map_err(|_| TemplateError::UnexpectedToken {
                token: word.to_string(),
            });
    }

    match word {
        "true" => return Ok(Token::Literal(Value::Bool(true))),
        "false" => return Ok(Token::Literal(Value::Bool(false))),
        _ => {}
    }

    if word.starts_with(|c: char| c.is_alphabetic() || c == '_')
        && word.chars().all(|c| c.is_alphanumeric() || c == '_')
    {
        return Ok(Token::Ident(word.to_string()));
    }

    Err(TemplateError::UnexpectedToken {
        token: word.to_string(),
    })
}

fn build_expr(tokens: Vec<Token>, offset: usize) -> Result<Expr, TemplateError> {
    let mut tokens = tokens.into_iter();
    let head = tokens.next().ok_or(TemplateError::EmptyAction { offset })?;

    let expr = match head {
        Token::Field(path) => Expr::Field(path),
        Token::Literal(value) => Expr::Literal(value),
        Token::Ident(name) if name == "index" => {
            let args: Vec<Token> = tokens.by_ref().collect();
            if args.len() < 2 {
                return Err(TemplateError::IndexArity { got: args.len() });
            }
            let mut args = args.into_iter();
            let target = match args.next() {
                Some(Token::Field(path)) => Expr::Field(path),
                Some(Token::Literal(value)) => Expr::Literal(value),
                Some(Token::Ident(name)) => {
                    return Err(TemplateError::UnexpectedToken { token: name })
                }
                None => return Err(TemplateError::IndexArity { got: 0 }),
            };
            let keys = args
                .map(|arg| match arg {
                    Token::Literal(value) => Ok(value),
                    Token::Field(path) => Err(TemplateError::UnexpectedToken {
                        token: field_path(&path),
                    }),
                    Token::Ident(name) => Err(TemplateError::UnexpectedToken { token: name }),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Expr::Index {
                target: Box::new(target),
                keys,
            }
        }
        Token::Ident(name) => return Err(TemplateError::UnknownFunction { name }),
    };

    if let Some(extra) = tokens.next() {
        let token = match extra {
            Token::Field(path) => field_path(&path),
            Token::Literal(value) => value.to_string(),
            Token::Ident(name) => name,
        };
        return Err(TemplateError::UnexpectedToken { token });
    }

    Ok(expr)
}

fn field_path(path: &[String]) -> String {
    if path.is_empty() {
        ".".to_string()
    } else {
        path.iter().map(|s| format!(".{s}")).collect()
    }
}

fn lookup_field<'a>(data: &'a Value, path: &[String]) -> Result<&'a Value, TemplateError> {
    let mut current = data;
    for (depth, segment) in path.iter().enumerate() {
        let object = current.as_object().ok_or_else(|| TemplateError::NotAnObject {
            path: field_path(&path[..=depth]),
        })?;
        current = object
            .get(segment)
            .ok_or_else(|| TemplateError::MissingField {
                path: field_path(&path[..=depth]),
            })?;
    }
    Ok(current)
}

fn index_value(value: &Value, key: &Value) -> Result<Value, TemplateError> {
    match (value, key) {
        (Value::Object(map), Value::String(k)) => map
            .get(k)
            .cloned()
            .ok_or_else(|| TemplateError::MissingKey { key: k.clone() }),
        (Value::Array(items), Value::Number(n)) => {
            let index = n.as_i64().unwrap_or(-1);
            usize::try_from(index)
                .ok()
                .and_then(|i| items.get(i))
                .cloned()
                .ok_or(TemplateError::IndexOutOfRange {
                    index,
                    len: items.len(),
                })
        }
        (other, key) => Err(TemplateError::NotIndexable {
            kind: kind_of(other),
            key: key.to_string(),
        }),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn write_value(out: &mut String, value: &Value, expr: &Expr) -> Result<(), TemplateError> {
    match value {
        Value::Null => {
            return Err(TemplateError::NullValue {
                action: expr.describe(),
            })
        }
        Value::String(s) => out.push_str(s),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        compound => out.push_str(&compound.to_string()),
    }
    Ok(())
}
