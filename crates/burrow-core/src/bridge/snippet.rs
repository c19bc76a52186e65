//! Versioned source templates evaluated inside the target.
//!
//! Snippet sources live in `src/snippets/` and are compiled into the crate.
//! Each declares the placeholders it expects; [`SnippetTemplate::render`]
//! refuses to produce source with a placeholder left unfilled or with a
//! substitution the template does not know.

use serde::Deserialize;

use crate::error::{BurrowError, Result};

/// A parameterised snippet of target-side source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnippetTemplate
{
    name: &'static str,
    version: u32,
    source: &'static str,
    parameters: &'static [&'static str],
}

/// Rebuilds native objects from bridge JSON (`__json_object_dump__`).
pub const TO_NATIVE_FROM_JSON: SnippetTemplate = SnippetTemplate::new(
    "to_native_from_json",
    1,
    include_str!("../snippets/to_native_from_json.m"),
    &["__json_object_dump__"],
);

/// Encodes a native object graph as bridge JSON (`__object_address__`).
pub const FROM_NATIVE_TO_JSON: SnippetTemplate = SnippetTemplate::new(
    "from_native_to_json",
    1,
    include_str!("../snippets/from_native_to_json.m"),
    &["__object_address__"],
);

/// Describes one class level; looks the class up by name when the address is 0.
pub const CLASS_DESCRIPTION: SnippetTemplate = SnippetTemplate::new(
    "class_description",
    1,
    include_str!("../snippets/class_description.m"),
    &["__class_address__", "__class_name__"],
);

/// Reports the dynamic class of an object (`__object_address__`).
pub const OBJECT_CLASS: SnippetTemplate = SnippetTemplate::new(
    "object_class",
    1,
    include_str!("../snippets/object_class.m"),
    &["__object_address__"],
);

impl SnippetTemplate
{
    /// Declare a template.
    #[must_use]
    pub const fn new(
        name: &'static str,
        version: u32,
        source: &'static str,
        parameters: &'static [&'static str],
    ) -> Self
    {
        Self { name, version, source, parameters }
    }

    /// Template name.
    #[must_use]
    pub const fn name(&self) -> &'static str
    {
        self.name
    }

    /// Template version; bumped whenever the output format changes.
    #[must_use]
    pub const fn version(&self) -> u32
    {
        self.version
    }

    /// Placeholders the template expects.
    #[must_use]
    pub const fn parameters(&self) -> &'static [&'static str]
    {
        self.parameters
    }

    /// Unrendered source.
    #[must_use]
    pub const fn source(&self) -> &'static str
    {
        self.source
    }

    /// Fill every placeholder.
    ///
    /// Substituted text is not scanned again, so values may safely contain
    /// placeholder-looking text.
    ///
    /// ## Errors
    ///
    /// `InvalidArgument` when a placeholder is missing, supplied twice, unknown,
    /// or absent from the source.
    pub fn render(&self, substitutions: &[(&str, &str)]) -> Result<String>
    {
        for (index, (key, _)) in substitutions.iter().enumerate() {
            if !self.parameters.iter().any(|parameter| parameter == key) {
                return Err(self.error(format!("unknown placeholder {key}")));
            }
            if substitutions[..index].iter().any(|(earlier, _)| earlier == key) {
                return Err(self.error(format!("placeholder {key} supplied twice")));
            }
        }
        for parameter in self.parameters {
            if !substitutions.iter().any(|(key, _)| key == parameter) {
                return Err(self.error(format!("missing value for {parameter}")));
            }
            if !self.source.contains(parameter) {
                return Err(self.error(format!("source never uses {parameter}")));
            }
        }

        let mut rendered = String::with_capacity(self.source.len());
        let mut rest = self.source;
        loop {
            let next = substitutions
                .iter()
                .filter_map(|(key, value)| rest.find(key).map(|at| (at, *key, *value)))
                .min_by_key(|(at, _, _)| *at);
            let Some((at, key, value)) = next else {
                rendered.push_str(rest);
                break;
            };
            rendered.push_str(&rest[..at]);
            rendered.push_str(value);
            rest = &rest[at + key.len()..];
        }
        Ok(rendered)
    }

    fn error(&self, reason: String) -> BurrowError
    {
        BurrowError::InvalidArgument(format!("snippet {} v{}: {reason}", self.name, self.version))
    }
}

/// JSON reply of a snippet: the payload, or an `{"error": ...}` object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SnippetReply<T>
{
    /// The snippet reported a failure.
    Failed
    {
        /// Target-side message.
        error: String,
    },
    /// The snippet's payload.
    Ok(T),
}

impl<T> SnippetReply<T>
{
    /// Turn the reply into a result, building the error with `on_error`.
    ///
    /// ## Errors
    ///
    /// Whatever `on_error` builds from the target's message.
    pub fn into_result<F>(self, on_error: F) -> Result<T>
    where
        F: FnOnce(String) -> BurrowError,
    {
        match self {
            Self::Ok(payload) => Ok(payload),
            Self::Failed { error } => Err(on_error(error)),
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    const GREETING: SnippetTemplate =
        SnippetTemplate::new("greeting", 3, "say(\"__who__\", __count__); // __who__", &["__who__", "__count__"]);

    #[test]
    fn test_render_fills_every_occurrence()
    {
        let rendered = GREETING.render(&[("__count__", "2"), ("__who__", "world")]).unwrap();
        assert_eq!(rendered, "say(\"world\", 2); // world");
    }

    #[test]
    fn test_render_does_not_rescan_values()
    {
        let rendered = GREETING.render(&[("__who__", "__count__"), ("__count__", "1")]).unwrap();
        assert_eq!(rendered, "say(\"__count__\", 1); // __count__");
    }

    #[test]
    fn test_render_validates_placeholders()
    {
        assert!(GREETING.render(&[("__who__", "x")]).is_err());
        assert!(GREETING.render(&[("__who__", "x"), ("__count__", "1"), ("__other__", "y")]).is_err());
        assert!(GREETING.render(&[("__who__", "x"), ("__who__", "y"), ("__count__", "1")]).is_err());

        let broken = SnippetTemplate::new("broken", 1, "nothing here", &["__who__"]);
        assert!(broken.render(&[("__who__", "x")]).is_err());
    }

    #[test]
    fn test_builtin_snippets_declare_their_placeholders()
    {
        for template in [TO_NATIVE_FROM_JSON, FROM_NATIVE_TO_JSON, CLASS_DESCRIPTION, OBJECT_CLASS] {
            for parameter in template.parameters() {
                assert!(template.source().contains(parameter), "{} lacks {parameter}", template.name());
            }
        }
    }

    #[test]
    fn test_snippet_reply()
    {
        let failed: SnippetReply<Vec<u32>> = serde_json::from_str(r#"{"error": "no such class"}"#).unwrap();
        assert!(failed.into_result(BurrowError::Lookup).is_err());
        let ok: SnippetReply<Vec<u32>> = serde_json::from_str("[1, 2]").unwrap();
        assert_eq!(ok.into_result(BurrowError::Lookup).unwrap(), vec![1, 2]);
    }
}
