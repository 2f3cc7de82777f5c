//! Path expression to subtree filter translation.
//!
//! Converts a constrained path expression like
//! `/library/book[title="Go Programming"]` into the nested subtree filter
//! the protocol expects:
//!
//! ```text
//! <filter type="subtree">
//!   <library><book><title>Go Programming</title></book></library>
//! </filter>
//! ```
//!
//! The supported grammar is intentionally minimal: `/`-separated element
//! names, each optionally followed by exactly one equality predicate
//! (`[name="value"]` or `[name='value']`). No boolean combinators, no
//! attribute selectors, no functions, no general XPath evaluation. Anything
//! outside that subset is rejected with an explicit validation error —
//! translation failures always fail the owning call, they are never
//! silently replaced by an unfiltered request.

use crate::codec::encode::BodyBuilder;
use crate::error::{NetconfError, Result};

/// One parsed path segment: an element name and at most one equality
/// predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub name: String,
    pub predicate: Option<(String, String)>,
}

/// Translate a path expression into a `<filter type="subtree">` element.
pub fn subtree_filter(path: &str) -> Result<String> {
    let segments = parse_segments(path)?;
    let mut b = BodyBuilder::new();
    b.start_with_attrs("filter", &[("type", "subtree")])?;
    write_segments(&mut b, &segments)?;
    b.end("filter")?;
    Ok(b.finish())
}

/// Translate a path expression into the bare nested element structure
/// without the filter envelope.
pub fn subtree_fragment(path: &str) -> Result<String> {
    let segments = parse_segments(path)?;
    let mut b = BodyBuilder::new();
    write_segments(&mut b, &segments)?;
    Ok(b.finish())
}

fn write_segments(b: &mut BodyBuilder, segments: &[Segment]) -> Result<()> {
    for segment in segments {
        b.start(&segment.name)?;
        if let Some((key, value)) = &segment.predicate {
            b.text_element(key, value)?;
        }
    }
    for segment in segments.iter().rev() {
        b.end(&segment.name)?;
    }
    Ok(())
}

/// Parse a path expression into ordered segments.
pub fn parse_segments(path: &str) -> Result<Vec<Segment>> {
    let rest = path.strip_prefix('/').ok_or_else(|| {
        NetconfError::Validation(format!("path {:?} must start with '/'", path))
    })?;
    if rest.is_empty() {
        return Err(NetconfError::Validation(
            "path must contain at least one element".to_string(),
        ));
    }

    let mut segments = Vec::new();
    let mut cursor = rest;
    while !cursor.is_empty() {
        let (segment, remaining) = parse_one_segment(cursor)?;
        segments.push(segment);
        cursor = remaining;
    }
    Ok(segments)
}

/// Parse a single `name` or `name[key="value"]` segment, returning the
/// remainder after the next separator.
fn parse_one_segment(input: &str) -> Result<(Segment, &str)> {
    let name_end = input
        .find(|c| c == '/' || c == '[')
        .unwrap_or(input.len());
    let name = &input[..name_end];
    validate_element_name(name)?;

    let mut rest = &input[name_end..];
    let mut predicate = None;

    if let Some(after_bracket) = rest.strip_prefix('[') {
        let (key, value, remaining) = parse_predicate(after_bracket)?;
        predicate = Some((key, value));
        rest = remaining;
        if !rest.is_empty() && !rest.starts_with('/') {
            return Err(NetconfError::Validation(format!(
                "unexpected trailing input {:?} after predicate",
                rest
            )));
        }
    }

    if let Some(next) = rest.strip_prefix('/') {
        if next.is_empty() {
            return Err(NetconfError::Validation(
                "path must not end with a trailing '/'".to_string(),
            ));
        }
        rest = next;
    }

    Ok((
        Segment {
            name: name.to_string(),
            predicate,
        },
        rest,
    ))
}

/// Parse `key="value"]` or `key='value']`, returning the remainder after
/// the closing bracket.
fn parse_predicate(input: &str) -> Result<(String, String, &str)> {
    let eq = input.find('=').ok_or_else(|| {
        NetconfError::Validation("predicate must be an equality test".to_string())
    })?;
    let key = &input[..eq];
    validate_element_name(key)?;

    let after_eq = &input[eq + 1..];
    let quote = after_eq.chars().next().ok_or_else(|| {
        NetconfError::Validation("predicate is missing a quoted value".to_string())
    })?;
    if quote != '"' && quote != '\'' {
        return Err(NetconfError::Validation(format!(
            "predicate value must be quoted, found {:?}",
            quote
        )));
    }
    let value_body = &after_eq[1..];
    let close = value_body.find(quote).ok_or_else(|| {
        NetconfError::Validation("predicate value is missing its closing quote".to_string())
    })?;
    let value = &value_body[..close];

    let after_value = &value_body[close + 1..];
    let rest = after_value.strip_prefix(']').ok_or_else(|| {
        NetconfError::Validation("predicate is missing its closing ']'".to_string())
    })?;

    Ok((key.to_string(), value.to_string(), rest))
}

fn validate_element_name(name: &str) -> Result<()> {
    let valid_start = name
        .chars()
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    let valid_rest = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'));
    if !valid_start || !valid_rest {
        return Err(NetconfError::Validation(format!(
            "invalid element name {:?} in path",
            name
        )));
    }
    Ok(())
}
