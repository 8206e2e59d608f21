//! Document walking
//!
//! Parses each `---`-separated part of a YAML stream, rewrites every string
//! scalar (mapping keys included) through a [`StringResolver`] and serializes
//! the result again. Numbers, booleans and nulls are never handed to the
//! resolver, and container shape is preserved.

use crate::error::Result;
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_yaml_ng::value::TaggedValue;
use serde_yaml_ng::{Mapping, Value};
use std::future::Future;

/// Line separating documents in a multi-document stream
pub const DOCUMENT_SEPARATOR: &str = "---";

/// Rewrites a single string scalar
///
/// Implementations return the input unchanged for strings they do not
/// recognise. An `Err` aborts the whole walk.
#[async_trait]
pub trait StringResolver: Send {
    async fn resolve_str(&mut self, value: &str) -> Result<String>;
}

/// Adapts an async closure into a [`StringResolver`]
pub struct FnResolver<F>(pub F);

#[async_trait]
impl<F, Fut> StringResolver for FnResolver<F>
where
    F: FnMut(String) -> Fut + Send,
    Fut: Future<Output = Result<String>> + Send,
{
    async fn resolve_str(&mut self, value: &str) -> Result<String> {
        (self.0)(value.to_string()).await
    }
}

/// Resolve `text` with a closure, see [`resolve`]
pub async fn resolve_with<F, Fut>(text: &str, f: F) -> Result<String>
where
    F: FnMut(String) -> Fut + Send,
    Fut: Future<Output = Result<String>> + Send,
{
    resolve(text, &mut FnResolver(f)).await
}

/// Resolve every document of a multi-document stream
pub async fn resolve<R>(text: &str, resolver: &mut R) -> Result<String>
where
    R: StringResolver + ?Sized,
{
    let mut resolved = Vec::new();
    for part in split_documents(text) {
        let body = resolve_document(&part.body, resolver).await?;
        resolved.push(DocumentPart {
            marker: part.marker,
            body,
        });
    }
    Ok(join_documents(&resolved))
}

/// Resolve a single document. Blank and empty documents come back as given.
pub async fn resolve_document<R>(part: &str, resolver: &mut R) -> Result<String>
where
    R: StringResolver + ?Sized,
{
    if part.trim().is_empty() {
        return Ok(part.to_string());
    }

    let value: Value = serde_yaml_ng::from_str(part)?;
    // A part holding only comments parses to null
    if value.is_null() {
        return Ok(part.to_string());
    }

    let value = walk(value, resolver).await?;
    Ok(serde_yaml_ng::to_string(&value)?)
}

fn walk<'a, R>(value: Value, resolver: &'a mut R) -> BoxFuture<'a, Result<Value>>
where
    R: StringResolver + ?Sized,
{
    async move {
        let value = match value {
            Value::String(s) => Value::String(resolver.resolve_str(&s).await?),
            Value::Sequence(items) => {
                let mut rewritten = Vec::with_capacity(items.len());
                for item in items {
                    rewritten.push(walk(item, &mut *resolver).await?);
                }
                Value::Sequence(rewritten)
            }
            Value::Mapping(mapping) => {
                let mut rewritten = Mapping::with_capacity(mapping.len());
                for (key, value) in mapping {
                    let key = walk(key, &mut *resolver).await?;
                    let value = walk(value, &mut *resolver).await?;
                    rewritten.insert(key, value);
                }
                Value::Mapping(rewritten)
            }
            Value::Tagged(tagged) => {
                let TaggedValue { tag, value } = *tagged;
                let value = walk(value, resolver).await?;
                Value::Tagged(Box::new(TaggedValue { tag, value }))
            }
            other => other,
        };
        Ok(value)
    }
    .boxed()
}

/// One document of a stream and the marker line that opened it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPart {
    /// The `---` line as written, `None` for text before the first marker
    pub marker: Option<String>,
    pub body: String,
}

/// Split on `---` document markers.
///
/// A marker is `---` at the start of a line followed by whitespace or the end
/// of the line. Trailing whitespace and comments stay with the marker; any
/// other content after it (`--- !tag`, `--- {a: 1}`) starts the body.
pub fn split_documents(text: &str) -> Vec<DocumentPart> {
    let mut parts = vec![DocumentPart {
        marker: None,
        body: String::new(),
    }];

    for line in text.split_inclusive('\n') {
        let rest = match line.strip_prefix(DOCUMENT_SEPARATOR) {
            Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => rest,
            _ => {
                if let Some(current) = parts.last_mut() {
                    current.body.push_str(line);
                }
                continue;
            }
        };

        let content = rest.trim();
        let part = if content.is_empty() || content.starts_with('#') {
            DocumentPart {
                marker: Some(line.to_string()),
                body: String::new(),
            }
        } else {
            let newline = if line.ends_with('\n') { "" } else { "\n" };
            DocumentPart {
                marker: Some(format!("{}\n", DOCUMENT_SEPARATOR)),
                body: format!("{}{}", rest.trim_start(), newline),
            }
        };
        parts.push(part);
    }
    parts
}

pub fn join_documents(parts: &[DocumentPart]) -> String {
    let mut text = String::new();
    for part in parts {
        if let Some(marker) = &part.marker {
            text.push_str(marker);
        }
        text.push_str(&part.body);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResolverError;

    async fn upper(text: &str) -> String {
        resolve_with(text, |s: String| async move { Ok(s.to_uppercase()) })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_override_scenario() {
        let text = "key1:\n  key2:\n  - value1\n  - gcr.io/foo/bar:baz\n";
        let resolved = resolve_with(text, |s: String| async move {
            Ok(if s == "gcr.io/foo/bar:baz" {
                "foo@sha256:deadbeef".to_string()
            } else {
                s
            })
        })
        .await
        .unwrap();

        let value: Value = serde_yaml_ng::from_str(&resolved).unwrap();
        let expected: Value =
            serde_yaml_ng::from_str("key1: {key2: [value1, foo@sha256:deadbeef]}").unwrap();
        assert_eq!(value, expected);
    }

    #[tokio::test]
    async fn test_keys_and_nested_values_are_rewritten() {
        let resolved = upper("a:\n  b:\n  - c\n  - d: [e, f]\n").await;
        let value: Value = serde_yaml_ng::from_str(&resolved).unwrap();
        let expected: Value = serde_yaml_ng::from_str("A: {B: [C, {D: [E, F]}]}").unwrap();
        assert_eq!(value, expected);
    }

    #[tokio::test]
    async fn test_non_strings_never_reach_resolver() {
        let text = "count: 3\nratio: 0.5\nenabled: true\nnothing: null\nname: app\n";
        let mut seen = Vec::new();
        let resolved = resolve_with(text, |s: String| {
            seen.push(s.clone());
            async move { Ok(s) }
        })
        .await
        .unwrap();

        seen.sort();
        assert_eq!(seen, ["app", "count", "enabled", "name", "nothing", "ratio"]);
        let value: Value = serde_yaml_ng::from_str(&resolved).unwrap();
        assert_eq!(value["count"].as_i64(), Some(3));
        assert_eq!(value["enabled"], Value::Bool(true));
        assert!(value["nothing"].is_null());
    }

    #[tokio::test]
    async fn test_key_order_preserved() {
        let resolved = upper("zeta: 1\nalpha: 2\nmid: 3\n").await;
        assert_eq!(resolved, "ZETA: 1\nALPHA: 2\nMID: 3\n");
    }

    #[tokio::test]
    async fn test_document_count_preserved() {
        let text = "a: one\n---\nb: two\n---\n\n---\n# only a comment\n";
        let resolved = upper(text).await;
        assert_eq!(split_documents(&resolved).len(), 4);
        assert_eq!(resolved, "A: ONE\n---\nB: TWO\n---\n\n---\n# only a comment\n");
    }

    #[tokio::test]
    async fn test_deeply_nested_document() {
        let mut text = String::from("leaf");
        for _ in 0..64 {
            text = format!("[{}]", text);
        }
        let resolved = upper(&text).await;
        assert!(resolved.contains("LEAF"));
    }

    #[tokio::test]
    async fn test_resolver_error_aborts() {
        let err = resolve_with("image: x\n", |_s: String| async move {
            Err(ResolverError::Registry("unavailable".to_string()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ResolverError::Registry(_)));
    }

    fn bodies(text: &str) -> Vec<String> {
        split_documents(text).into_iter().map(|part| part.body).collect()
    }

    #[test]
    fn test_split_and_join_round_trip() {
        let text = "---\na: 1\n---\nb: 2\n";
        let parts = split_documents(text);
        assert_eq!(bodies(text), ["", "a: 1\n", "b: 2\n"]);
        assert_eq!(join_documents(&parts), text);
    }

    #[test]
    fn test_separator_must_start_a_marker() {
        assert_eq!(split_documents("a: '---'\nb: ----\n----\n  ---\n").len(), 1);
    }

    #[test]
    fn test_marker_with_trailing_whitespace_or_comment() {
        let text = "a: x\n--- \nb: y\n--- # two\r\nc: z\n";
        assert_eq!(bodies(text), ["a: x\n", "b: y\n", "c: z\n"]);
        assert_eq!(join_documents(&split_documents(text)), text);
    }

    #[test]
    fn test_marker_with_inline_content() {
        let parts = split_documents("a: x\n--- !Service\nb: y\n--- {c: z}");
        assert_eq!(parts[1].marker.as_deref(), Some("---\n"));
        assert_eq!(parts[1].body, "!Service\nb: y\n");
        assert_eq!(parts[2].body, "{c: z}\n");
    }

    #[tokio::test]
    async fn test_resolve_keeps_decorated_markers() {
        let resolved = upper("a: one\n--- \nb: two\n--- # second\nc: three\n").await;
        assert_eq!(
            resolved,
            "A: ONE\n--- \nB: TWO\n--- # second\nC: THREE\n"
        );
    }
}
