//! `{name}` placeholder templates for hosts and paths

use crate::error::BuildError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A parsed host or path template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    raw: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(raw: &str) -> Result<Self, BuildError> {
        let malformed = |reason: &str| BuildError::MalformedTemplate {
            template: raw.to_string(),
            reason: reason.to_string(),
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = raw.chars();

        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        match c {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' => return Err(malformed("nested `{`")),
                            _ => name.push(c),
                        }
                    }
                    if !closed {
                        return Err(malformed("unclosed `{`"));
                    }
                    let name = name.trim();
                    if name.is_empty() {
                        return Err(malformed("empty placeholder"));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(name.to_string()));
                }
                '}' => return Err(malformed("unmatched `}`")),
                _ => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// Template with no segments
    pub fn empty() -> Self {
        Self {
            raw: String::new(),
            segments: Vec::new(),
        }
    }

    /// Template made of a single placeholder
    pub fn placeholder(name: &str) -> Self {
        Self {
            raw: format!("{{{name}}}"),
            segments: vec![Segment::Placeholder(name.to_string())],
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.placeholders().any(|p| p == name)
    }

    /// Substitute every placeholder; `Err` names the first one `lookup` could not fill
    pub fn render<F>(&self, mut lookup: F) -> Result<String, String>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut out = String::with_capacity(self.raw.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => match lookup(name) {
                    Some(value) => out.push_str(&value),
                    None => return Err(name.clone()),
                },
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mixed_template() {
        let template = Template::parse("/v2/{name}/manifests/{reference}").unwrap();
        let names: Vec<_> = template.placeholders().collect();
        assert_eq!(names, vec!["name", "reference"]);
        assert!(template.contains("reference"));
        assert_eq!(template.segments().len(), 4);
    }

    #[test]
    fn test_render_reports_missing_placeholder() {
        let template = Template::parse("/v2/{name}/tags").unwrap();
        let rendered = template.render(|n| (n == "name").then(|| "hello".to_string()));
        assert_eq!(rendered.unwrap(), "/v2/hello/tags");

        let missing = template.render(|_| None);
        assert_eq!(missing.unwrap_err(), "name");
    }

    #[test]
    fn test_malformed_templates_are_rejected() {
        for raw in ["/v2/{name", "/v2/{}", "/v2/name}", "/v2/{a{b}}"] {
            assert!(
                matches!(Template::parse(raw), Err(BuildError::MalformedTemplate { .. })),
                "{raw} should be malformed"
            );
        }
    }

    #[test]
    fn test_empty_template() {
        let template = Template::parse("").unwrap();
        assert!(template.is_empty());
        assert_eq!(template.render(|_| None).unwrap(), "");
    }
}
