//! Minimal prompt templating.
//!
//! Supported syntax:
//!
//! - `{{ text }}`, `{{ example.summary }}`: insert a value by dotted path.
//! - `{% if examples %} ... {% endif %}`: render the body if the value is non-empty.
//! - `{% for example in examples %} ... {% endfor %}`: render the body once per array item.
//!   Iterating an object yields `{key, value}` items.
//!
//! A newline directly after a `{% ... %}` tag is dropped. Unknown paths render as nothing.

use serde_json::Value;

use crate::engine::FieldValues;
use crate::error::{Result, SieveError};

/// Name under which few-shot examples are exposed to templates.
pub const EXAMPLES_KEY: &str = "examples";

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Var(Vec<String>),
    If {
        cond: Vec<String>,
        body: Vec<Node>,
    },
    For {
        var: String,
        iter: Vec<String>,
        body: Vec<Node>,
    },
}

enum Token<'a> {
    Text(&'a str),
    Var(&'a str),
    Tag(&'a str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = tokenize(source)?;
        let mut pos = 0;
        let nodes = parse_nodes(&tokens, &mut pos, None)?;
        Ok(Self { nodes })
    }

    pub fn render(&self, fields: &FieldValues) -> String {
        let mut ctx = Context {
            root: fields,
            scopes: Vec::new(),
        };
        let mut out = String::new();
        render_nodes(&self.nodes, &mut ctx, &mut out);
        out
    }

    /// Renders with `examples` bound to the given few-shot examples.
    pub fn render_with_examples(&self, fields: &FieldValues, examples: &[FieldValues]) -> String {
        let mut fields = fields.clone();
        fields.insert(
            EXAMPLES_KEY.to_string(),
            Value::Array(examples.iter().cloned().map(Value::Object).collect()),
        );
        self.render(&fields)
    }
}

fn tokenize(source: &str) -> Result<Vec<Token<'_>>> {
    let mut tokens = Vec::new();
    let mut rest = source;

    while !rest.is_empty() {
        let next = [rest.find("{{"), rest.find("{%")].into_iter().flatten().min();
        let Some(pos) = next else {
            tokens.push(Token::Text(rest));
            break;
        };
        if pos > 0 {
            tokens.push(Token::Text(&rest[..pos]));
        }

        let is_var = rest[pos..].starts_with("{{");
        let close = if is_var { "}}" } else { "%}" };
        let body_start = pos + 2;
        let end = rest[body_start..]
            .find(close)
            .map(|i| i + body_start)
            .ok_or_else(|| SieveError::Template(format!("unclosed '{}' at byte {pos}", &rest[pos..body_start])))?;
        let inner = rest[body_start..end].trim();
        rest = &rest[end + 2..];

        if is_var {
            tokens.push(Token::Var(inner));
        } else {
            tokens.push(Token::Tag(inner));
            if let Some(stripped) = rest.strip_prefix('\n') {
                rest = stripped;
            }
        }
    }

    Ok(tokens)
}

fn parse_path(raw: &str) -> Result<Vec<String>> {
    let segments: Vec<String> = raw.split('.').map(|s| s.trim().to_string()).collect();
    let valid = segments
        .iter()
        .all(|s| !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_'));
    if !valid {
        return Err(SieveError::Template(format!("invalid path '{raw}'")));
    }
    Ok(segments)
}

fn parse_nodes(tokens: &[Token<'_>], pos: &mut usize, closing: Option<&str>) -> Result<Vec<Node>> {
    let mut nodes = Vec::new();

    while *pos < tokens.len() {
        let token = &tokens[*pos];
        *pos += 1;

        match token {
            Token::Text(text) => nodes.push(Node::Text(text.to_string())),
            Token::Var(path) => nodes.push(Node::Var(parse_path(path)?)),
            Token::Tag(tag) => {
                let words: Vec<&str> = tag.split_whitespace().collect();
                match words.as_slice() {
                    ["if", path] => {
                        let cond = parse_path(path)?;
                        let body = parse_nodes(tokens, pos, Some("endif"))?;
                        nodes.push(Node::If { cond, body });
                    }
                    ["for", var, "in", path] => {
                        let iter = parse_path(path)?;
                        let body = parse_nodes(tokens, pos, Some("endfor"))?;
                        nodes.push(Node::For {
                            var: var.to_string(),
                            iter,
                            body,
                        });
                    }
                    [end @ ("endif" | "endfor")] => {
                        if closing == Some(*end) {
                            return Ok(nodes);
                        }
                        return Err(SieveError::Template(format!("unexpected '{{% {end} %}}'")));
                    }
                    _ => return Err(SieveError::Template(format!("unknown tag '{{% {tag} %}}'"))),
                }
            }
        }
    }

    match closing {
        Some(end) => Err(SieveError::Template(format!("missing '{{% {end} %}}'"))),
        None => Ok(nodes),
    }
}

struct Context<'a> {
    root: &'a FieldValues,
    scopes: Vec<(String, Value)>,
}

impl Context<'_> {
    fn lookup(&self, path: &[String]) -> Option<&Value> {
        let (head, tail) = path.split_first()?;
        let mut value = self
            .scopes
            .iter()
            .rev()
            .find(|(name, _)| name == head)
            .map(|(_, v)| v)
            .or_else(|| self.root.get(head))?;
        for segment in tail {
            value = value.get(segment)?;
        }
        Some(value)
    }
}

fn render_nodes(nodes: &[Node], ctx: &mut Context<'_>, out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Var(path) => {
                if let Some(value) = ctx.lookup(path) {
                    out.push_str(&display(value));
                }
            }
            Node::If { cond, body } => {
                if ctx.lookup(cond).is_some_and(truthy) {
                    render_nodes(body, ctx, out);
                }
            }
            Node::For { var, iter, body } => {
                let items: Vec<Value> = match ctx.lookup(iter) {
                    Some(Value::Array(items)) => items.clone(),
                    Some(Value::Object(map)) => map
                        .iter()
                        .map(|(k, v)| serde_json::json!({ "key": k, "value": v }))
                        .collect(),
                    _ => Vec::new(),
                };
                for item in items {
                    ctx.scopes.push((var.clone(), item));
                    render_nodes(body, ctx, out);
                    ctx.scopes.pop();
                }
            }
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Array(items) => items.iter().map(display).collect::<Vec<_>>().join(", "),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| format!("{k}: {}", display(v)))
            .collect::<Vec<_>>()
            .join(", "),
    }
}
