//! Cache key templates.
//!
//! A template such as `ticket:%s` or `ticket-timeline:%s` is rendered by
//! substituting each `%s` with the next group parameter. Parameters are
//! always public ids, never internal UUIDs.

use std::fmt;

use super::error::CacheError;

const PLACEHOLDER: &str = "%s";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTemplate {
    raw: String,
    placeholders: usize,
}

impl KeyTemplate {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let placeholders = raw.matches(PLACEHOLDER).count();
        Self { raw, placeholders }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn placeholders(&self) -> usize {
        self.placeholders
    }

    /// Leading segment before the first `:`, used as a metric label.
    pub fn stem(&self) -> &str {
        self.raw.split(':').next().unwrap_or(&self.raw)
    }

    pub fn render(&self, params: &[&str]) -> Result<String, CacheError> {
        if params.len() != self.placeholders {
            return Err(CacheError::InvalidKeyParams {
                template: self.raw.clone(),
                expected: self.placeholders,
                got: params.len(),
            });
        }
        let mut rendered = String::with_capacity(
            self.raw.len() + params.iter().map(|param| param.len()).sum::<usize>(),
        );
        let mut rest = self.raw.as_str();
        for param in params {
            // Count was checked above, so every param has a placeholder.
            if let Some(at) = rest.find(PLACEHOLDER) {
                rendered.push_str(&rest[..at]);
                rendered.push_str(param);
                rest = &rest[at + PLACEHOLDER.len()..];
            }
        }
        rendered.push_str(rest);
        Ok(rendered)
    }
}

impl fmt::Display for KeyTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&str> for KeyTemplate {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Companion key that records which score intervals have been seeded.
pub fn coverage_key(key: &str) -> String {
    format!("{key}:seeded")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_parameters_in_order() {
        let template = KeyTemplate::new("ticket-timeline:%s:%s");
        assert_eq!(template.placeholders(), 2);
        assert_eq!(
            template.render(&["acct", "cat"]).expect("render"),
            "ticket-timeline:acct:cat"
        );
    }

    #[test]
    fn static_template_renders_verbatim() {
        let template = KeyTemplate::new("ticket-timeline");
        assert_eq!(template.render(&[]).expect("render"), "ticket-timeline");
        assert_eq!(template.stem(), "ticket-timeline");
    }

    #[test]
    fn parameter_mismatch_is_rejected() {
        let template = KeyTemplate::new("ticket:%s");
        let err = template.render(&[]).unwrap_err();
        assert!(matches!(
            err,
            CacheError::InvalidKeyParams {
                expected: 1,
                got: 0,
                ..
            }
        ));
        assert!(template.render(&["a", "b"]).is_err());
    }

    #[test]
    fn coverage_key_is_namespaced() {
        assert_eq!(coverage_key("ticket-by-date"), "ticket-by-date:seeded");
    }
}
