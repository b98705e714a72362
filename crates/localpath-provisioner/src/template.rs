//! Path patterns with claim placeholders.
//!
//! A storage class may carry a `pathPattern` such as
//! `${.PVC.namespace}/${.PVC.labels.team}`. Patterns are parsed into literal
//! and placeholder segments, then evaluated against a [`ClaimMetadata`].

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use tracing::info;

use crate::paths;
use crate::types::Claim;

/// Which part of the claim a placeholder reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
    /// `${.PVC.labels.<key>}`
    Label(String),
    /// `${.PVC.annotations.<key>}`
    Annotation(String),
    /// `${.PVC.<field>}`; `name` and `namespace` are known, others resolve empty.
    Field(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Placeholder(Placeholder),
}

/// A parsed path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    segments: Vec<Segment>,
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{\.PVC\.(.*?)\}").expect("static placeholder regex"))
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Self {
        let mut segments = Vec::new();
        let mut last = 0;
        for caps in placeholder_regex().captures_iter(pattern) {
            let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if whole.start() > last {
                segments.push(Segment::Literal(pattern[last..whole.start()].to_string()));
            }
            segments.push(Segment::Placeholder(classify(inner.as_str())));
            last = whole.end();
        }
        if last < pattern.len() {
            segments.push(Segment::Literal(pattern[last..].to_string()));
        }
        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Evaluates the pattern against `meta`.
    ///
    /// Missing labels or annotations resolve to an empty string and cause the
    /// claim name to be appended as a trailing segment, so unresolved patterns
    /// do not collapse distinct claims onto one directory.
    pub fn resolve(&self, meta: &mut ClaimMetadata) -> String {
        let mut out = String::new();
        let mut missing = false;
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(Placeholder::Label(key)) => {
                    meta.referenced_metadata = true;
                    match meta.labels.get(key) {
                        Some(value) => out.push_str(value),
                        None => missing = true,
                    }
                }
                Segment::Placeholder(Placeholder::Annotation(key)) => {
                    meta.referenced_metadata = true;
                    match meta.annotations.get(key) {
                        Some(value) => out.push_str(value),
                        None => missing = true,
                    }
                }
                Segment::Placeholder(Placeholder::Field(field)) => {
                    out.push_str(meta.field(field));
                }
            }
        }
        meta.placeholder_missing = missing;
        if missing {
            out = paths::join(&out, &meta.name);
        }
        info!("path {}", out);
        out
    }
}

fn classify(inner: &str) -> Placeholder {
    if let Some(key) = inner.strip_prefix("labels.") {
        Placeholder::Label(key.to_string())
    } else if let Some(key) = inner.strip_prefix("annotations.") {
        Placeholder::Annotation(key.to_string())
    } else {
        Placeholder::Field(inner.to_string())
    }
}

/// Claim fields visible to path patterns, plus evaluation flags.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClaimMetadata {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    /// Set when the last evaluation referenced a label or annotation.
    pub referenced_metadata: bool,
    /// Set when the last evaluation hit an absent label or annotation.
    pub placeholder_missing: bool,
}

impl ClaimMetadata {
    pub fn from_claim(claim: &Claim) -> Self {
        Self {
            name: claim.metadata.name.clone(),
            namespace: claim.namespace().to_string(),
            labels: claim.metadata.labels.clone(),
            annotations: claim.metadata.annotations.clone(),
            referenced_metadata: false,
            placeholder_missing: false,
        }
    }

    fn field(&self, field: &str) -> &str {
        match field {
            "name" => &self.name,
            "namespace" => &self.namespace,
            _ => "",
        }
    }
}

/// Parses and evaluates `pattern` in one step.
pub fn resolve(pattern: &str, meta: &mut ClaimMetadata) -> String {
    PathPattern::parse(pattern).resolve(meta)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> ClaimMetadata {
        let mut labels = BTreeMap::new();
        labels.insert("team".to_string(), "ml".to_string());
        let mut annotations = BTreeMap::new();
        annotations.insert("model/name".to_string(), "llama".to_string());
        ClaimMetadata {
            name: "claim-a".to_string(),
            namespace: "ns1".to_string(),
            labels,
            annotations,
            ..ClaimMetadata::default()
        }
    }

    #[test]
    fn test_parse_segments() {
        let pattern = PathPattern::parse("models/${.PVC.labels.team}/${.PVC.name}");
        assert_eq!(
            pattern.segments(),
            &[
                Segment::Literal("models/".to_string()),
                Segment::Placeholder(Placeholder::Label("team".to_string())),
                Segment::Literal("/".to_string()),
                Segment::Placeholder(Placeholder::Field("name".to_string())),
            ]
        );
    }

    #[test]
    fn test_parse_annotation_with_slash_in_key() {
        let pattern = PathPattern::parse("${.PVC.annotations.model/name}");
        assert_eq!(
            pattern.segments(),
            &[Segment::Placeholder(Placeholder::Annotation(
                "model/name".to_string()
            ))]
        );
    }

    #[test]
    fn test_all_present_no_suffix() {
        let mut m = meta();
        let out = resolve("${.PVC.labels.team}/${.PVC.annotations.model/name}", &mut m);
        assert_eq!(out, "ml/llama");
        assert!(m.referenced_metadata);
        assert!(!m.placeholder_missing);
    }

    #[test]
    fn test_missing_label_appends_claim_name() {
        let mut m = meta();
        let out = resolve("cache/${.PVC.labels.absent}", &mut m);
        assert_eq!(out, "cache/claim-a");
        assert!(m.placeholder_missing);
        assert!(m.referenced_metadata);
    }

    #[test]
    fn test_missing_annotation_appends_claim_name() {
        let mut m = meta();
        let out = resolve("${.PVC.annotations.nope}", &mut m);
        assert_eq!(out, "claim-a");
    }

    #[test]
    fn test_fields_never_mark_missing() {
        let mut m = meta();
        let out = resolve("${.PVC.namespace}/${.PVC.name}/${.PVC.uid}", &mut m);
        assert_eq!(out, "ns1/claim-a/");
        assert!(!m.placeholder_missing);
        assert!(!m.referenced_metadata);
    }

    #[test]
    fn test_repeated_placeholder_replaced_everywhere() {
        let mut m = meta();
        let out = resolve("${.PVC.labels.team}-${.PVC.labels.team}", &mut m);
        assert_eq!(out, "ml-ml");
    }

    #[test]
    fn test_plain_pattern_passes_through() {
        let mut m = meta();
        assert_eq!(resolve("fixed/dir", &mut m), "fixed/dir");
        assert!(!m.referenced_metadata);
    }
}
