use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

/// Malformed template syntax: an unterminated `{{...}}`, or a block tag
/// without its matching close. Terminal per the spec — never retried.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("unterminated '{{{{' starting at byte {0}")]
    UnterminatedTag(usize),
    #[error("'{{{{#{0}}}}}' without matching '{{{{/{0}}}}}'")]
    UnclosedBlock(&'static str),
    #[error("'{{{{/{0}}}}}' without a matching opening tag")]
    UnmatchedClose(&'static str),
}

#[derive(Debug)]
enum Node {
    Text(String),
    Var(String),
    If(String, Vec<Node>),
    Each(String, Vec<Node>),
}

enum Token<'a> {
    Text(&'a str),
    OpenIf(String),
    CloseIf,
    OpenEach(String),
    CloseEach,
    Var(String),
}

fn tokenize(template: &str) -> Result<Vec<Token<'_>>, RenderError> {
    let mut tokens = Vec::new();
    let mut pos = 0;

    while let Some(start) = template[pos..].find("{{") {
        let start = pos + start;
        if start > pos {
            tokens.push(Token::Text(&template[pos..start]));
        }
        let tag_start = start + 2;
        let end = template[tag_start..]
            .find("}}")
            .ok_or(RenderError::UnterminatedTag(start))?;
        let tag_end = tag_start + end;
        let raw = template[tag_start..tag_end].trim();

        if let Some(rest) = raw.strip_prefix("#if ") {
            tokens.push(Token::OpenIf(rest.trim().to_string()));
        } else if raw == "/if" {
            tokens.push(Token::CloseIf);
        } else if let Some(rest) = raw.strip_prefix("#each ") {
            tokens.push(Token::OpenEach(rest.trim().to_string()));
        } else if raw == "/each" {
            tokens.push(Token::CloseEach);
        } else {
            tokens.push(Token::Var(raw.to_string()));
        }

        pos = tag_end + 2;
    }

    if pos < template.len() {
        tokens.push(Token::Text(&template[pos..]));
    }

    Ok(tokens)
}

fn parse(template: &str) -> Result<Vec<Node>, RenderError> {
    let tokens = tokenize(template)?;
    let mut iter = tokens.into_iter().peekable();
    parse_nodes(&mut iter, None)
}

fn parse_nodes<'a, I>(
    tokens: &mut std::iter::Peekable<I>,
    closing: Option<&'static str>,
) -> Result<Vec<Node>, RenderError>
where
    I: Iterator<Item = Token<'a>>,
{
    let mut nodes = Vec::new();

    loop {
        match tokens.next() {
            None => {
                if let Some(tag) = closing {
                    return Err(RenderError::UnclosedBlock(tag));
                }
                return Ok(nodes);
            }
            Some(Token::Text(text)) => nodes.push(Node::Text(text.to_string())),
            Some(Token::Var(path)) => nodes.push(Node::Var(path)),
            Some(Token::OpenIf(cond)) => {
                let body = parse_nodes(tokens, Some("if"))?;
                nodes.push(Node::If(cond, body));
            }
            Some(Token::OpenEach(path)) => {
                let body = parse_nodes(tokens, Some("each"))?;
                nodes.push(Node::Each(path, body));
            }
            Some(Token::CloseIf) => {
                if closing == Some("if") {
                    return Ok(nodes);
                }
                return Err(RenderError::UnmatchedClose("if"));
            }
            Some(Token::CloseEach) => {
                if closing == Some("each") {
                    return Ok(nodes);
                }
                return Err(RenderError::UnmatchedClose("each"));
            }
        }
    }
}

fn lookup<'a>(scope: &'a Value, path: &str) -> Option<&'a Value> {
    if path == "this" {
        return Some(scope);
    }
    let mut current = scope;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn render_nodes(nodes: &[Node], scope: &Value, out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Var(path) => {
                if let Some(value) = lookup(scope, path) {
                    out.push_str(&scalar_to_string(value));
                }
                // missing variable renders as empty string, never raises
            }
            Node::If(cond, body) => {
                let truthy = lookup(scope, cond).map(is_truthy).unwrap_or(false);
                if truthy {
                    render_nodes(body, scope, out);
                }
            }
            Node::Each(path, body) => {
                if let Some(value) = lookup(scope, path) {
                    match value {
                        Value::Array(items) => {
                            for item in items {
                                render_nodes(body, item, out);
                            }
                        }
                        Value::Object(map) => {
                            for item in map.values() {
                                render_nodes(body, item, out);
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

/// Render `template` against `variables`: `{{identifier}}`, `{{a.b}}`
/// attribute access, `{{#if cond}}...{{/if}}`, `{{#each items}}...{{/each}}`
/// over a mapping or sequence value. Missing variables render empty and
/// never raise; malformed syntax raises `RenderError`.
pub fn render(
    template: &str,
    variables: &HashMap<String, serde_json::Value>,
) -> Result<String, RenderError> {
    let nodes = parse(template)?;
    let scope = Value::Object(variables.clone().into_iter().collect());
    let mut out = String::new();
    render_nodes(&nodes, &scope, &mut out);
    Ok(out)
}

/// Strip HTML tags from a rendered body for the push channel, which has no
/// markup renderer on the device side. Tags are removed structurally;
/// entities and text content are left untouched.
pub fn strip_html(body: &str) -> String {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new("<[^>]*>").unwrap())
        .replace_all(body, "")
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn substitutes_simple_variable() {
        let out = render("Hi {{name}}", &vars(&[("name", json!("Ada"))])).unwrap();
        assert_eq!(out, "Hi Ada");
    }

    #[test]
    fn missing_variable_renders_empty_not_error() {
        let out = render("Hi {{name}}!", &vars(&[])).unwrap();
        assert_eq!(out, "Hi !");
    }

    #[test]
    fn attribute_access() {
        let out = render(
            "Hello {{user.name}}",
            &vars(&[("user", json!({"name": "Grace"}))]),
        )
        .unwrap();
        assert_eq!(out, "Hello Grace");
    }

    #[test]
    fn conditional_renders_when_truthy() {
        let out = render(
            "{{#if premium}}VIP{{/if}} user",
            &vars(&[("premium", json!(true))]),
        )
        .unwrap();
        assert_eq!(out, "VIP user");
    }

    #[test]
    fn conditional_skips_when_falsy() {
        let out = render(
            "{{#if premium}}VIP{{/if}} user",
            &vars(&[("premium", json!(false))]),
        )
        .unwrap();
        assert_eq!(out, " user");
    }

    #[test]
    fn each_over_array() {
        let out = render(
            "{{#each items}}[{{this}}]{{/each}}",
            &vars(&[("items", json!(["a", "b", "c"]))]),
        )
        .unwrap();
        assert_eq!(out, "[a][b][c]");
    }

    #[test]
    fn each_over_array_of_objects() {
        let out = render(
            "{{#each items}}{{name}},{{/each}}",
            &vars(&[("items", json!([{"name": "x"}, {"name": "y"}]))]),
        )
        .unwrap();
        assert_eq!(out, "x,y,");
    }

    #[test]
    fn unterminated_tag_is_malformed() {
        let err = render("Hi {{name", &vars(&[])).unwrap_err();
        assert!(matches!(err, RenderError::UnterminatedTag(_)));
    }

    #[test]
    fn unclosed_block_is_malformed() {
        let err = render("{{#if x}}hi", &vars(&[("x", json!(true))])).unwrap_err();
        assert!(matches!(err, RenderError::UnclosedBlock("if")));
    }

    #[test]
    fn strip_html_removes_tags_keeps_text() {
        assert_eq!(strip_html("<p>Hello Ada</p>"), "Hello Ada");
    }

    #[test]
    fn strip_html_handles_nested_and_self_closing_tags() {
        assert_eq!(
            strip_html("<div><b>Hi</b><br/>there</div>"),
            "Hithere"
        );
    }

    #[test]
    fn strip_html_no_tags_is_unchanged() {
        assert_eq!(strip_html("plain text"), "plain text");
    }
}
