//! Subject templates and parsed subjects.
//!
//! A subject is a URI naming a resource. Templates embed named placeholders,
//! either `{name}` anywhere or `:name` at the start of a path segment:
//!
//! ```text
//! file:///conus/{date}/{time}/cells/{cell}/{band}/image.jp2
//! file:///latest/:band/conus.png
//! ```
//!
//! Compiling a template yields an anchored regex whose capture groups bind
//! placeholder values positionally, in left-to-right order.

use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;
use serde::Serialize;
use url::Url;

use crate::domain::errors::SubjectError;

/// The subject that matches everything; used by global task templates.
pub const WILDCARD: &str = "*";

/// Characters a placeholder may capture: URL-safe, never a path separator.
const PLACEHOLDER_CAPTURE: &str = r"([A-Za-z0-9_\-.~:@%+,]+)";

/// Placeholder values keyed by placeholder name.
pub type Bindings = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Placeholder(String),
}

/// A compiled subject template.
#[derive(Debug, Clone)]
pub struct SubjectPattern {
    source: String,
    regex: Regex,
    placeholders: Vec<String>,
    tokens: Vec<Token>,
}

impl SubjectPattern {
    /// Compile a templated subject string into a matcher.
    pub fn compile(pattern: &str) -> Result<Self, SubjectError> {
        if pattern.is_empty() {
            return Err(SubjectError::Empty);
        }
        if pattern == WILDCARD {
            return Self::wildcard();
        }

        let tokens = tokenize(pattern)?;
        let mut placeholders: Vec<String> = Vec::new();
        let mut expr = String::from("^");

        for token in &tokens {
            match token {
                Token::Literal(text) => expr.push_str(&regex::escape(text)),
                Token::Placeholder(name) => {
                    if placeholders.contains(name) {
                        return Err(SubjectError::DuplicatePlaceholder {
                            pattern: pattern.to_string(),
                            name: name.clone(),
                        });
                    }
                    placeholders.push(name.clone());
                    expr.push_str(PLACEHOLDER_CAPTURE);
                }
            }
        }
        expr.push('$');

        let regex = Regex::new(&expr).map_err(|e| SubjectError::Regex {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            source: pattern.to_string(),
            regex,
            placeholders,
            tokens,
        })
    }

    /// The always-matching pattern with no placeholders.
    fn wildcard() -> Result<Self, SubjectError> {
        // `(?s)` so a wildcard also accepts subjects spanning lines
        let regex = Regex::new("(?s)^.*$").map_err(|e| SubjectError::Regex {
            pattern: WILDCARD.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            source: WILDCARD.to_string(),
            regex,
            placeholders: Vec::new(),
            tokens: vec![Token::Literal(WILDCARD.to_string())],
        })
    }

    pub fn is_wildcard(&self) -> bool {
        self.source == WILDCARD
    }

    /// The template text this pattern was compiled from.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Placeholder names in capture-group order.
    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    pub fn is_match(&self, subject: &str) -> bool {
        self.regex.is_match(subject)
    }

    /// Bind placeholder values from a concrete subject, if it matches.
    pub fn captures(&self, subject: &str) -> Option<Bindings> {
        let caps = self.regex.captures(subject)?;
        let mut bindings = Bindings::new();
        for (i, name) in self.placeholders.iter().enumerate() {
            let value = caps.get(i + 1)?.as_str().to_string();
            bindings.insert(name.clone(), value);
        }
        Some(bindings)
    }

    /// Substitute bound values for every placeholder.
    ///
    /// Fails if any placeholder has no binding. A trailing slash left behind by
    /// an empty final segment is stripped.
    pub fn render(&self, bindings: &Bindings) -> Result<String, SubjectError> {
        let mut out = String::with_capacity(self.source.len());
        for token in &self.tokens {
            match token {
                Token::Literal(text) => out.push_str(text),
                Token::Placeholder(name) => {
                    let value = bindings.get(name).ok_or_else(|| SubjectError::MissingBinding {
                        pattern: self.source.clone(),
                        name: name.clone(),
                    })?;
                    out.push_str(value);
                }
            }
        }
        if out.ends_with('/') && !self.source.ends_with('/') {
            out.pop();
        }
        Ok(out)
    }
}

impl fmt::Display for SubjectPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl PartialEq for SubjectPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for SubjectPattern {}

fn is_brace_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn is_colon_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn tokenize(pattern: &str) -> Result<Vec<Token>, SubjectError> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    let flush = |literal: &mut String, tokens: &mut Vec<Token>| {
        if !literal.is_empty() {
            tokens.push(Token::Literal(std::mem::take(literal)));
        }
    };

    while i < chars.len() {
        let c = chars[i];

        if c == '{' {
            let close = chars[i + 1..]
                .iter()
                .position(|&ch| ch == '}')
                .ok_or_else(|| SubjectError::UnterminatedPlaceholder(pattern.to_string()))?;
            let name: String = chars[i + 1..i + 1 + close].iter().collect();
            if name.is_empty() || !name.chars().all(is_brace_name_char) {
                return Err(SubjectError::InvalidPlaceholder {
                    pattern: pattern.to_string(),
                    name,
                });
            }
            flush(&mut literal, &mut tokens);
            tokens.push(Token::Placeholder(name));
            i += close + 2;
            continue;
        }

        // `:name` only opens a placeholder at the start of a path segment, so
        // scheme separators and literal times like `04:25:30` stay literal.
        let segment_start = i > 0 && chars[i - 1] == '/';
        let starts_name = chars
            .get(i + 1)
            .is_some_and(|ch| ch.is_ascii_alphabetic() || *ch == '_');
        if c == ':' && segment_start && starts_name {
            let len = chars[i + 1..]
                .iter()
                .take_while(|ch| is_colon_name_char(**ch))
                .count();
            let name: String = chars[i + 1..i + 1 + len].iter().collect();
            flush(&mut literal, &mut tokens);
            tokens.push(Token::Placeholder(name));
            i += len + 1;
            continue;
        }

        literal.push(c);
        i += 1;
    }
    flush(&mut literal, &mut tokens);

    Ok(tokens)
}

/// A concrete subject broken into its URI components.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedSubject {
    pub href: String,
    pub scheme: String,
    pub host: Option<String>,
    pub path: String,
    pub segments: Vec<String>,
}

impl ParsedSubject {
    pub fn parse(subject: &str) -> Result<Self, SubjectError> {
        if subject == WILDCARD {
            return Ok(Self {
                href: WILDCARD.to_string(),
                scheme: WILDCARD.to_string(),
                host: None,
                path: WILDCARD.to_string(),
                segments: Vec::new(),
            });
        }

        let url = Url::parse(subject).map_err(|e| SubjectError::InvalidUri {
            subject: subject.to_string(),
            reason: e.to_string(),
        })?;

        let segments = url
            .path_segments()
            .map(|segs| segs.filter(|s| !s.is_empty()).map(str::to_string).collect())
            .unwrap_or_default();

        Ok(Self {
            href: subject.to_string(),
            scheme: url.scheme().to_string(),
            host: url.host_str().filter(|h| !h.is_empty()).map(str::to_string),
            path: url.path().to_string(),
            segments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings(pairs: &[(&str, &str)]) -> Bindings {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_compile_brace_placeholders() {
        let pattern =
            SubjectPattern::compile("file:///conus/{date}/{time}/cells/{cell}/{band}/image.jp2")
                .unwrap();
        assert_eq!(pattern.placeholders(), ["date", "time", "cell", "band"]);

        let caps = pattern
            .captures("file:///conus/2020-06-25/04:25:30/cells/4-5/3/image.jp2")
            .unwrap();
        assert_eq!(caps["date"], "2020-06-25");
        assert_eq!(caps["time"], "04:25:30");
        assert_eq!(caps["cell"], "4-5");
        assert_eq!(caps["band"], "3");
    }

    #[test]
    fn test_compile_colon_placeholders() {
        let pattern = SubjectPattern::compile("file:///latest/:band/conus.png").unwrap();
        assert_eq!(pattern.placeholders(), ["band"]);
        assert!(pattern.is_match("file:///latest/2/conus.png"));
        assert!(!pattern.is_match("file:///latest/2/fulldisk.png"));
    }

    #[test]
    fn test_scheme_and_literal_colons_are_not_placeholders() {
        let pattern = SubjectPattern::compile("http://host:8080/a/04:25/{x}").unwrap();
        assert_eq!(pattern.placeholders(), ["x"]);
        assert!(pattern.is_match("http://host:8080/a/04:25/y"));
    }

    #[test]
    fn test_literal_metacharacters_are_escaped() {
        let pattern = SubjectPattern::compile("file:///a+b/(c)/{x}.png").unwrap();
        assert!(pattern.is_match("file:///a+b/(c)/1.png"));
        assert!(!pattern.is_match("file:///aab/c/1.png"));
        assert!(!pattern.is_match("file:///a+b/(c)/1xpng"));
    }

    #[test]
    fn test_match_is_anchored() {
        let pattern = SubjectPattern::compile("file:///a/{x}").unwrap();
        assert!(!pattern.is_match("prefix-file:///a/1"));
        assert!(!pattern.is_match("file:///a/1/extra"));
    }

    #[test]
    fn test_placeholder_never_spans_segments() {
        let pattern = SubjectPattern::compile("file:///a/{x}").unwrap();
        assert!(!pattern.is_match("file:///a/1/2"));
    }

    #[test]
    fn test_duplicate_placeholder_rejected() {
        let err = SubjectPattern::compile("file:///{x}/{x}").unwrap_err();
        assert!(matches!(err, SubjectError::DuplicatePlaceholder { .. }));
    }

    #[test]
    fn test_unterminated_placeholder_rejected() {
        let err = SubjectPattern::compile("file:///{x").unwrap_err();
        assert!(matches!(err, SubjectError::UnterminatedPlaceholder(_)));
    }

    #[test]
    fn test_invalid_placeholder_name_rejected() {
        let err = SubjectPattern::compile("file:///{a b}").unwrap_err();
        assert!(matches!(err, SubjectError::InvalidPlaceholder { .. }));
        assert!(SubjectPattern::compile("file:///{}").is_err());
    }

    #[test]
    fn test_wildcard() {
        let pattern = SubjectPattern::compile("*").unwrap();
        assert!(pattern.is_wildcard());
        assert!(pattern.placeholders().is_empty());
        assert!(pattern.is_match("anything://at/all"));
        assert_eq!(pattern.captures("x").unwrap().len(), 0);
    }

    #[test]
    fn test_render() {
        let pattern = SubjectPattern::compile("file:///out/{date}/:band/x.png").unwrap();
        let rendered = pattern
            .render(&bindings(&[("date", "2020-06-25"), ("band", "3"), ("extra", "ignored")]))
            .unwrap();
        assert_eq!(rendered, "file:///out/2020-06-25/3/x.png");
    }

    #[test]
    fn test_render_missing_binding() {
        let pattern = SubjectPattern::compile("file:///out/{x}/{y}").unwrap();
        let err = pattern.render(&bindings(&[("x", "1")])).unwrap_err();
        assert_eq!(
            err,
            SubjectError::MissingBinding {
                pattern: "file:///out/{x}/{y}".to_string(),
                name: "y".to_string(),
            }
        );
    }

    #[test]
    fn test_render_strips_trailing_slash_from_empty_segment() {
        let pattern = SubjectPattern::compile("file:///out/{x}/{y}").unwrap();
        let rendered = pattern.render(&bindings(&[("x", "1"), ("y", "")])).unwrap();
        assert_eq!(rendered, "file:///out/1");

        let trailing = SubjectPattern::compile("file:///out/{x}/").unwrap();
        assert_eq!(trailing.render(&bindings(&[("x", "1")])).unwrap(), "file:///out/1/");
    }

    #[test]
    fn test_parsed_subject() {
        let parsed = ParsedSubject::parse("file:///conus/2020-06-25/cells/4-5/image.png").unwrap();
        assert_eq!(parsed.scheme, "file");
        assert_eq!(parsed.host, None);
        assert_eq!(parsed.path, "/conus/2020-06-25/cells/4-5/image.png");
        assert_eq!(parsed.segments, ["conus", "2020-06-25", "cells", "4-5", "image.png"]);

        let http = ParsedSubject::parse("http://example.org/fire/cell/4-5").unwrap();
        assert_eq!(http.host.as_deref(), Some("example.org"));
        assert_eq!(http.segments.len(), 3);

        assert!(ParsedSubject::parse("not a uri").is_err());
    }
}
