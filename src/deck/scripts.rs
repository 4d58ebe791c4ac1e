//! Statement-level view of the deck-wide chart script.
//!
//! Generated decks initialize every chart from one shared `<script>` block.
//! When slides are replaced or dropped, the statements that initialize their
//! canvases have to go with them: a second `new Chart` on a reused canvas is
//! rejected by Chart.js, and a lookup of a missing canvas throws and aborts
//! the rest of the block.
//!
//! The scanner understands quotes, template literals, comments and bracket
//! nesting. It splits on `;` and on line ends where a statement is complete,
//! which is enough for generated chart code; it is not a JavaScript parser.

use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Reference {
    /// A canvas ID inside a string literal or `#selector`.
    Canvas(String),
    /// A binding declared by a removed statement.
    Name(String),
}

impl Reference {
    fn found_in(&self, text: &str) -> bool {
        match self {
            Reference::Canvas(id) => occurs(text, id, |c| matches!(c, '\'' | '"' | '`' | '#'), |c| {
                c.is_alphanumeric() || c == '_' || c == '-'
            }),
            Reference::Name(name) => occurs(
                text,
                name,
                |c| !(is_ident_char(c) || c == '.'),
                is_ident_char,
            ),
        }
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// `needle` occurs with an accepted character before it (or at the start,
/// when start-of-text is accepted) and no continuation character after it.
fn occurs(
    text: &str,
    needle: &str,
    before_ok: impl Fn(char) -> bool,
    continues: impl Fn(char) -> bool,
) -> bool {
    if needle.is_empty() {
        return false;
    }
    text.match_indices(needle).any(|(pos, _)| {
        let before = text[..pos].chars().next_back();
        let after = text[pos + needle.len()..].chars().next();
        before.map_or(before_ok(' '), &before_ok) && !after.is_some_and(&continues)
    })
}

fn mentions_any(text: &str, refs: &[Reference]) -> bool {
    refs.iter().any(|r| r.found_in(text))
}

fn canvas_refs(canvas_ids: &BTreeSet<String>) -> Vec<Reference> {
    canvas_ids.iter().cloned().map(Reference::Canvas).collect()
}

/// Remove every statement that initializes one of `canvas_ids`, plus
/// statements using bindings those statements declared. Wrapper blocks such
/// as a `DOMContentLoaded` handler are pruned inside rather than dropped
/// whole. Returns `scripts` unchanged when nothing references the canvases.
pub fn remove_canvas_statements(scripts: &str, canvas_ids: &BTreeSet<String>) -> String {
    remove_statements(scripts, canvas_ids, &BTreeSet::new())
}

/// [`remove_canvas_statements`], additionally removing the declarations of
/// `bindings` and everything that uses them.
pub fn remove_statements(
    scripts: &str,
    canvas_ids: &BTreeSet<String>,
    bindings: &BTreeSet<String>,
) -> String {
    let mut refs = canvas_refs(canvas_ids);
    refs.extend(bindings.iter().cloned().map(Reference::Name));
    if !mentions_any(scripts, &refs) {
        return scripts.to_string();
    }
    prune(scripts, &refs)
}

/// Whether `scripts` looks up the canvas `id` by string or `#selector`.
pub fn mentions_canvas(scripts: &str, id: &str) -> bool {
    Reference::Canvas(id.to_string()).found_in(scripts)
}

/// Names declared at the top level of both scripts.
pub fn redeclared_bindings(existing: &str, incoming: &str) -> BTreeSet<String> {
    let top_level = |src: &str| -> BTreeSet<String> {
        split_statements(src)
            .into_iter()
            .filter_map(declared_name)
            .collect()
    };
    top_level(existing)
        .intersection(&top_level(incoming))
        .cloned()
        .collect()
}

/// The statements that set up `canvas_ids`, preceded by the declarations
/// they use (data arrays, contexts, helpers), in source order.
pub fn canvas_statements(scripts: &str, canvas_ids: &BTreeSet<String>) -> Vec<String> {
    let refs = canvas_refs(canvas_ids);
    if !mentions_any(scripts, &refs) {
        return Vec::new();
    }

    let mut uses = Vec::new();
    collect_uses(scripts, &refs, &mut uses);

    let mut declarations = Vec::new();
    collect_declarations(scripts, &mut declarations);

    let mut needed: Vec<String> = Vec::new();
    loop {
        let selected: Vec<&String> = needed.iter().chain(uses.iter()).collect();
        let next = declarations.iter().find(|(name, stmt)| {
            !needed.contains(stmt)
                && !uses.contains(stmt)
                && selected
                    .iter()
                    .any(|s| Reference::Name(name.clone()).found_in(s))
        });
        match next {
            Some((_, stmt)) => needed.push(stmt.clone()),
            None => break,
        }
    }
    needed.sort_by_key(|stmt| scripts.find(stmt.as_str()).unwrap_or(usize::MAX));

    needed.into_iter().chain(uses).collect()
}

fn prune(src: &str, refs: &[Reference]) -> String {
    let mut refs = refs.to_vec();
    let mut statements: Vec<String> = split_statements(src)
        .into_iter()
        .map(|s| s.trim().to_string())
        .collect();

    loop {
        let mut declared = Vec::new();
        statements = statements
            .into_iter()
            .filter_map(|stmt| {
                if !mentions_any(&stmt, &refs) {
                    return Some(stmt);
                }
                if let Some(rebuilt) = prune_inside(&stmt, &refs) {
                    return Some(rebuilt);
                }
                if let Some(name) = declared_name(&stmt) {
                    declared.push(Reference::Name(name));
                }
                None
            })
            .collect();

        declared.retain(|r| !refs.contains(r));
        if declared.is_empty() {
            break;
        }
        refs.extend(declared);
    }

    statements.join("\n")
}

/// Prune the first braced body of `stmt`. `None` when the statement must go
/// entirely: the reference is outside the body or nothing is left inside.
fn prune_inside(stmt: &str, refs: &[Reference]) -> Option<String> {
    let (open, close) = find_block(stmt)?;
    let pruned = prune(&stmt[open + 1..close], refs);
    if pruned.is_empty() {
        return None;
    }
    let rebuilt = format!("{}\n{}\n{}", stmt[..=open].trim_end(), pruned, &stmt[close..]);
    (!mentions_any(&rebuilt, refs)).then_some(rebuilt)
}

fn collect_uses(src: &str, refs: &[Reference], out: &mut Vec<String>) {
    for stmt in split_statements(src) {
        if !mentions_any(stmt, refs) {
            continue;
        }
        if let Some((open, close)) = find_block(stmt) {
            let body = &stmt[open + 1..close];
            let outside = format!("{}{}", &stmt[..=open], &stmt[close..]);
            if !mentions_any(&outside, refs) && split_statements(body).len() > 1 {
                collect_uses(body, refs, out);
                continue;
            }
        }
        out.push(stmt.trim().to_string());
    }
}

fn collect_declarations(src: &str, out: &mut Vec<(String, String)>) {
    for stmt in split_statements(src) {
        if let Some(name) = declared_name(stmt) {
            out.push((name, stmt.trim().to_string()));
        } else if let Some((open, close)) = find_block(stmt) {
            collect_declarations(&stmt[open + 1..close], out);
        }
    }
}

/// Name bound by a `function`, `class`, `const`, `let` or `var` statement.
fn declared_name(stmt: &str) -> Option<String> {
    let text = stmt.trim_start();
    let text = text.strip_prefix("async ").map(str::trim_start).unwrap_or(text);
    let rest = ["function", "class", "const", "let", "var"]
        .iter()
        .find_map(|kw| {
            text.strip_prefix(kw)
                .filter(|r| r.starts_with(|c: char| c.is_whitespace() || c == '*'))
        })?;
    let rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '*');
    let name: String = rest.chars().take_while(|&c| is_ident_char(c)).collect();
    (!name.is_empty()).then_some(name)
}

/// Code characters with their byte offsets. Comments are dropped and each
/// string or template literal collapses to its opening quote.
fn code_chars(src: &str) -> Vec<(usize, char)> {
    let mut out = Vec::new();
    let mut chars = src.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                out.push((i, c));
                while let Some((_, d)) = chars.next() {
                    if d == '\\' {
                        chars.next();
                    } else if d == c {
                        break;
                    }
                }
            }
            '/' if matches!(chars.peek(), Some((_, '/'))) => {
                while chars.next_if(|&(_, d)| d != '\n').is_some() {}
            }
            '/' if matches!(chars.peek(), Some((_, '*'))) => {
                chars.next();
                let mut prev = '\0';
                for (_, d) in chars.by_ref() {
                    if prev == '*' && d == '/' {
                        break;
                    }
                    prev = d;
                }
            }
            _ => out.push((i, c)),
        }
    }
    out
}

const CONTINUATIONS: &[&str] = &[
    ".", ",", ")", "]", "?", ":", "&", "|", "+", "-", "*", "/", "=", "(", "[", "`", "else",
    "catch", "finally",
];

fn split_statements<'a>(src: &'a str) -> Vec<&'a str> {
    let mut out = Vec::new();
    let mut push = |s: &'a str| {
        if !s.trim().is_empty() {
            out.push(s);
        }
    };

    let mut start = 0;
    let mut depth = 0usize;
    let mut last: Option<char> = None;
    for (i, c) in code_chars(src) {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            _ => {}
        }
        if depth == 0 && c == ';' {
            push(&src[start..=i]);
            start = i + 1;
            last = None;
            continue;
        }
        if depth == 0 && c == '\n' {
            let complete = last.is_some_and(|l| !"=+-*/%,&|?:!<>(.[".contains(l));
            let rest = src[i..].trim_start();
            if complete && !CONTINUATIONS.iter().any(|t| rest.starts_with(t)) {
                push(&src[start..i]);
                start = i;
                last = None;
            }
            continue;
        }
        if !c.is_whitespace() {
            last = Some(c);
        }
    }
    push(&src[start..]);
    out
}

/// Byte offsets of the first `{` in code and its matching `}`.
fn find_block(stmt: &str) -> Option<(usize, usize)> {
    let mut open = None;
    let mut depth = 0usize;
    for (i, c) in code_chars(stmt) {
        match c {
            '{' => {
                open.get_or_insert(i);
                depth += 1;
            }
            '}' if open.is_some() => {
                depth -= 1;
                if depth == 0 {
                    return open.map(|o| (o, i));
                }
            }
            _ => {}
        }
    }
    None
}
