//! CSS selector subset
//!
//! Supports type, universal, id, class and attribute selectors
//! (`= ^= $= *= ~= |=`, optional ` i` flag), the structural and state
//! pseudo-classes the resolver needs, the four combinators and `,` groups.

use crate::core::{PilotError, Result};
use crate::dom::document::{Document, NodeId};

#[derive(Debug, Clone, PartialEq, Eq)]
enum AttrOp {
    Exists,
    Eq,
    StartsWith,
    EndsWith,
    Contains,
    Includes,
    DashMatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttrCondition {
    name: String,
    op: AttrOp,
    value: String,
    case_insensitive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pseudo {
    FirstChild,
    LastChild,
    NthChild(Nth),
    Checked,
    Disabled,
    Enabled,
    Focus,
    Not(SelectorList),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Nth {
    Exact(usize),
    Odd,
    Even,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrCondition>,
    pseudos: Vec<Pseudo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
    AdjacentSibling,
    GeneralSibling,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Part {
    compound: Compound,
    // Relation to the part on the left
    combinator: Option<Combinator>,
}

/// A parsed, comma-separated selector list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorList {
    groups: Vec<Vec<Part>>,
}

impl SelectorList {
    pub fn parse(selector: &str) -> Result<Self> {
        let invalid = || PilotError::InvalidSelector(selector.to_string());
        let groups = split_top_level(selector, ',').ok_or_else(invalid)?;
        let mut parsed = Vec::with_capacity(groups.len());
        for group in groups {
            parsed.push(parse_chain(&group).ok_or_else(invalid)?);
        }
        Ok(Self { groups: parsed })
    }

    /// Whether `node` matches any group of this list
    pub fn matches(&self, doc: &Document, node: NodeId) -> bool {
        doc.is_element(node) && self.groups.iter().any(|parts| matches_chain(doc, node, parts))
    }
}

fn matches_chain(doc: &Document, node: NodeId, parts: &[Part]) -> bool {
    let Some(last) = parts.last() else {
        return false;
    };
    if !matches_compound(doc, node, &last.compound) {
        return false;
    }
    if parts.len() == 1 {
        return true;
    }
    let rest = &parts[..parts.len() - 1];
    match last.combinator.unwrap_or(Combinator::Descendant) {
        Combinator::Child => doc
            .parent_element(node)
            .is_some_and(|p| matches_chain(doc, p, rest)),
        Combinator::Descendant => doc
            .ancestors(node)
            .into_iter()
            .any(|a| matches_chain(doc, a, rest)),
        Combinator::AdjacentSibling => doc
            .previous_element_sibling(node)
            .is_some_and(|s| matches_chain(doc, s, rest)),
        Combinator::GeneralSibling => {
            let mut cursor = doc.previous_element_sibling(node);
            while let Some(sibling) = cursor {
                if matches_chain(doc, sibling, rest) {
                    return true;
                }
                cursor = doc.previous_element_sibling(sibling);
            }
            false
        }
    }
}

fn matches_compound(doc: &Document, node: NodeId, compound: &Compound) -> bool {
    let Some(element) = doc.element(node) else {
        return false;
    };
    if let Some(tag) = &compound.tag {
        if !element.tag_name.eq_ignore_ascii_case(tag) {
            return false;
        }
    }
    if let Some(id) = &compound.id {
        if element.attr("id") != Some(id.as_str()) {
            return false;
        }
    }
    if compound.classes.iter().any(|c| !element.has_class(c)) {
        return false;
    }
    for cond in &compound.attrs {
        let Some(actual) = element.attr(&cond.name) else {
            return false;
        };
        let (actual, expected) = if cond.case_insensitive {
            (actual.to_lowercase(), cond.value.to_lowercase())
        } else {
            (actual.to_string(), cond.value.clone())
        };
        let ok = match cond.op {
            AttrOp::Exists => true,
            AttrOp::Eq => actual == expected,
            AttrOp::StartsWith => !expected.is_empty() && actual.starts_with(&expected),
            AttrOp::EndsWith => !expected.is_empty() && actual.ends_with(&expected),
            AttrOp::Contains => !expected.is_empty() && actual.contains(&expected),
            AttrOp::Includes => actual.split_ascii_whitespace().any(|w| w == expected),
            AttrOp::DashMatch => actual == expected || actual.starts_with(&format!("{}-", expected)),
        };
        if !ok {
            return false;
        }
    }
    compound.pseudos.iter().all(|pseudo| match pseudo {
        Pseudo::FirstChild => doc.previous_element_sibling(node).is_none(),
        Pseudo::LastChild => doc
            .parent(node)
            .map(|p| doc.element_children(p).last() == Some(&node))
            .unwrap_or(true),
        Pseudo::NthChild(nth) => {
            let position = doc
                .parent(node)
                .and_then(|p| doc.element_children(p).iter().position(|c| *c == node))
                .map(|p| p + 1)
                .unwrap_or(1);
            match nth {
                Nth::Exact(n) => position == *n,
                Nth::Odd => position % 2 == 1,
                Nth::Even => position % 2 == 0,
            }
        }
        Pseudo::Checked => element.state.checked || (element.tag_name == "option" && element.state.selected),
        Pseudo::Disabled => element.is_disabled(),
        Pseudo::Enabled => element.is_form_control() && !element.is_disabled(),
        Pseudo::Focus => doc.focused() == Some(node),
        Pseudo::Not(inner) => !inner.matches(doc, node),
    })
}

/// Split on `sep` outside brackets, parens and quotes
fn split_top_level(input: &str, sep: char) -> Option<Vec<String>> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for ch in input.chars() {
        match (quote, ch) {
            (Some(q), c) if c == q => {
                quote = None;
                current.push(c);
            }
            (Some(_), c) => current.push(c),
            (None, '"' | '\'') => {
                quote = Some(ch);
                current.push(ch);
            }
            (None, '[' | '(') => {
                depth += 1;
                current.push(ch);
            }
            (None, ']' | ')') => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
                current.push(ch);
            }
            (None, c) if c == sep && depth == 0 => {
                let trimmed = current.trim();
                if trimmed.is_empty() {
                    return None;
                }
                out.push(trimmed.to_string());
                current.clear();
            }
            (None, c) => current.push(c),
        }
    }
    if depth != 0 || quote.is_some() {
        return None;
    }
    let trimmed = current.trim();
    if trimmed.is_empty() {
        return None;
    }
    out.push(trimmed.to_string());
    Some(out)
}

/// Split a chain into compound tokens and combinator tokens
fn tokenize(selector: &str) -> Option<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let flush = |current: &mut String, tokens: &mut Vec<String>| {
        if !current.is_empty() {
            tokens.push(std::mem::take(current));
        }
    };
    for ch in selector.chars() {
        if let Some(q) = quote {
            current.push(ch);
            if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' if depth > 0 => {
                quote = Some(ch);
                current.push(ch);
            }
            '[' | '(' => {
                depth += 1;
                current.push(ch);
            }
            ']' | ')' => {
                depth -= 1;
                current.push(ch);
            }
            '>' | '+' | '~' if depth == 0 => {
                flush(&mut current, &mut tokens);
                tokens.push(ch.to_string());
            }
            c if c.is_whitespace() && depth == 0 => flush(&mut current, &mut tokens),
            c => current.push(c),
        }
    }
    if depth != 0 || quote.is_some() {
        return None;
    }
    flush(&mut current, &mut tokens);
    Some(tokens)
}

fn parse_chain(selector: &str) -> Option<Vec<Part>> {
    let mut parts: Vec<Part> = Vec::new();
    let mut pending: Option<Combinator> = None;
    for token in tokenize(selector)? {
        let combinator = match token.as_str() {
            ">" => Some(Combinator::Child),
            "+" => Some(Combinator::AdjacentSibling),
            "~" => Some(Combinator::GeneralSibling),
            _ => None,
        };
        if let Some(combinator) = combinator {
            if pending.is_some() || parts.is_empty() {
                return None;
            }
            pending = Some(combinator);
            continue;
        }
        let compound = parse_compound(&token)?;
        let combinator = if parts.is_empty() {
            None
        } else {
            Some(pending.take().unwrap_or(Combinator::Descendant))
        };
        parts.push(Part {
            compound,
            combinator,
        });
    }
    if parts.is_empty() || pending.is_some() {
        return None;
    }
    Some(parts)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_' || !c.is_ascii()
}

fn take_ident(chars: &[char], start: usize) -> Option<(String, usize)> {
    let mut end = start;
    while end < chars.len() {
        if chars[end] == '\\' && end + 1 < chars.len() {
            end += 2;
            continue;
        }
        if !is_ident_char(chars[end]) {
            break;
        }
        end += 1;
    }
    if end == start {
        return None;
    }
    let raw: String = chars[start..end].iter().collect();
    Some((raw.replace('\\', ""), end))
}

fn parse_compound(token: &str) -> Option<Compound> {
    let chars: Vec<char> = token.chars().collect();
    let mut compound = Compound::default();
    let mut i = 0usize;
    let mut universal = false;
    while i < chars.len() {
        match chars[i] {
            '*' if i == 0 => {
                universal = true;
                i += 1;
            }
            '#' => {
                let (id, next) = take_ident(&chars, i + 1)?;
                if compound.id.replace(id).is_some() {
                    return None;
                }
                i = next;
            }
            '.' => {
                let (class_name, next) = take_ident(&chars, i + 1)?;
                compound.classes.push(class_name);
                i = next;
            }
            '[' => {
                let close = find_close(&chars, i, '[', ']')?;
                let inner: String = chars[i + 1..close].iter().collect();
                compound.attrs.push(parse_attr(&inner)?);
                i = close + 1;
            }
            ':' => {
                let (name, next) = take_ident(&chars, i + 1)?;
                let (arg, next) = if chars.get(next) == Some(&'(') {
                    let close = find_close(&chars, next, '(', ')')?;
                    (
                        Some(chars[next + 1..close].iter().collect::<String>()),
                        close + 1,
                    )
                } else {
                    (None, next)
                };
                compound.pseudos.push(parse_pseudo(&name, arg.as_deref())?);
                i = next;
            }
            _ if i == 0 => {
                let (tag, next) = take_ident(&chars, 0)?;
                compound.tag = Some(tag.to_ascii_lowercase());
                i = next;
            }
            _ => return None,
        }
    }
    let empty = compound.tag.is_none()
        && compound.id.is_none()
        && compound.classes.is_empty()
        && compound.attrs.is_empty()
        && compound.pseudos.is_empty();
    if empty && !universal {
        return None;
    }
    Some(compound)
}

fn find_close(chars: &[char], open_at: usize, open: char, close: char) -> Option<usize> {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for (idx, c) in chars.iter().enumerate().skip(open_at) {
        if let Some(q) = quote {
            if *c == q {
                quote = None;
            }
            continue;
        }
        if *c == '"' || *c == '\'' {
            quote = Some(*c);
        } else if *c == open {
            depth += 1;
        } else if *c == close {
            depth -= 1;
            if depth == 0 {
                return Some(idx);
            }
        }
    }
    None
}

fn parse_attr(inner: &str) -> Option<AttrCondition> {
    let inner = inner.trim();
    let op_at = inner.find(|c| matches!(c, '=' | '^' | '$' | '*' | '~' | '|'));
    let Some(op_at) = op_at else {
        let name = inner.to_ascii_lowercase();
        return (!name.is_empty() && name.chars().all(is_ident_char)).then_some(AttrCondition {
            name,
            op: AttrOp::Exists,
            value: String::new(),
            case_insensitive: false,
        });
    };
    let name = inner[..op_at].trim().to_ascii_lowercase();
    let rest = &inner[op_at..];
    let (op, rest) = match rest.chars().next()? {
        '=' => (AttrOp::Eq, &rest[1..]),
        c => {
            let rest = rest[1..].strip_prefix('=')?;
            let op = match c {
                '^' => AttrOp::StartsWith,
                '$' => AttrOp::EndsWith,
                '*' => AttrOp::Contains,
                '~' => AttrOp::Includes,
                '|' => AttrOp::DashMatch,
                _ => return None,
            };
            (op, rest)
        }
    };
    if name.is_empty() {
        return None;
    }
    let rest = rest.trim();
    let (value, flags) = match rest.chars().next()? {
        q @ ('"' | '\'') => {
            let end = rest[1..].find(q)? + 1;
            (rest[1..end].to_string(), rest[end + 1..].trim())
        }
        _ => match rest.split_once(char::is_whitespace) {
            Some((v, flags)) => (v.to_string(), flags.trim()),
            None => (rest.to_string(), ""),
        },
    };
    let case_insensitive = match flags {
        "" => false,
        "i" | "I" => true,
        _ => return None,
    };
    Some(AttrCondition {
        name,
        op,
        value,
        case_insensitive,
    })
}

fn parse_pseudo(name: &str, arg: Option<&str>) -> Option<Pseudo> {
    let pseudo = match (name.to_ascii_lowercase().as_str(), arg) {
        ("first-child", None) => Pseudo::FirstChild,
        ("last-child", None) => Pseudo::LastChild,
        ("checked", None) => Pseudo::Checked,
        ("disabled", None) => Pseudo::Disabled,
        ("enabled", None) => Pseudo::Enabled,
        ("focus", None) => Pseudo::Focus,
        ("nth-child", Some(arg)) => Pseudo::NthChild(match arg.trim() {
            "odd" => Nth::Odd,
            "even" => Nth::Even,
            n => Nth::Exact(n.parse().ok()?),
        }),
        ("not", Some(arg)) => Pseudo::Not(SelectorList::parse(arg).ok()?),
        _ => return None,
    };
    Some(pseudo)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> (Document, NodeId, NodeId, NodeId) {
        let mut doc = Document::with_body();
        let body = doc.body().unwrap();
        let nav = doc.append_element(body, "nav", &[("class", "menu main")]);
        let first = doc.append_element(nav, "a", &[("href", "/home"), ("data-testid", "home-link")]);
        let second = doc.append_element(
            nav,
            "a",
            &[("href", "/contact"), ("aria-label", "Contact us"), ("class", "cta")],
        );
        (doc, nav, first, second)
    }

    #[test]
    fn test_basic_selectors() {
        let (doc, nav, first, second) = doc();
        assert_eq!(doc.query_selector("nav.menu").unwrap(), Some(nav));
        assert_eq!(doc.query_selector("nav > a.cta").unwrap(), Some(second));
        assert_eq!(doc.query_selector("[data-testid=home-link]").unwrap(), Some(first));
        assert_eq!(
            doc.query_selector("a[aria-label=\"Contact us\"]").unwrap(),
            Some(second)
        );
        assert_eq!(doc.query_selector("a[href^='/con']").unwrap(), Some(second));
        assert_eq!(doc.query_selector("a + a").unwrap(), Some(second));
        assert_eq!(doc.query_selector("a:first-child").unwrap(), Some(first));
        assert_eq!(doc.query_selector("a:not(.cta)").unwrap(), Some(first));
        assert_eq!(doc.query_selector_all("body a").unwrap().len(), 2);
        assert_eq!(doc.query_selector_all("nav, a").unwrap().len(), 3);
    }

    #[test]
    fn test_case_insensitive_attr() {
        let (doc, _, _, second) = doc();
        assert_eq!(
            doc.query_selector("[aria-label='contact US' i]").unwrap(),
            Some(second)
        );
    }

    #[test]
    fn test_malformed_selectors() {
        let (doc, ..) = doc();
        for bad in ["", "a[href", "> a", "a >", "div..x", "a:unknown-pseudo", "a,,b"] {
            assert!(doc.query_selector(bad).is_err(), "expected error for {:?}", bad);
        }
    }
}
