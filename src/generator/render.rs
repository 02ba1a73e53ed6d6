//! `{{placeholder}}` substitution.
//!
//! Missing values render to a neutral default so no literal token from the
//! template survives into a message. Unknown keys render empty.
//!
//! Whitespace left behind by empty placeholders is tidied in the template
//! text only; supplied values are spliced in afterwards exactly as given.

use std::collections::BTreeMap;

use regex::{Captures, Regex};

/// Neutral value for a known placeholder with no supplied value.
pub fn neutral_default(key: &str) -> &'static str {
    match key {
        "first_name" | "name" => "there",
        "company" => "your company",
        "title" => "your role",
        "location" => "your area",
        "target_type" => "teams like yours",
        "purpose" | "purpose_description" => "working together",
        "original_subject" => "my last note",
        "sender_name" => "The Team",
        _ => "",
    }
}

/// Values available to a template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderContext {
    values: BTreeMap<String, String>,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key`, ignoring blank values so the neutral default applies.
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        let value = value.into();
        if !value.trim().is_empty() {
            self.values.insert(key.to_string(), value.trim().to_string());
        }
        self
    }

    pub fn set_opt(&mut self, key: &str, value: Option<&str>) -> &mut Self {
        if let Some(v) = value {
            self.set(key, v);
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Supplied value or the neutral default.
    pub fn resolve(&self, key: &str) -> &str {
        self.get(key).unwrap_or_else(|| neutral_default(key))
    }
}

/// Stands in for a non-empty value while the template text is tidied.
const SLOT: char = '\u{E000}';

pub struct Renderer {
    placeholder: Regex,
    trailing_space: Regex,
    leading_space: Regex,
    blank_lines: Regex,
    double_space: Regex,
}

impl Renderer {
    pub fn new() -> Self {
        Self {
            placeholder: Regex::new(r"\{\{\s*([a-z_]+)\s*\}\}").unwrap(),
            trailing_space: Regex::new(r"[ \t]+\n").unwrap(),
            leading_space: Regex::new(r"\n[ \t]+").unwrap(),
            blank_lines: Regex::new(r"\n{3,}").unwrap(),
            double_space: Regex::new(r" {2,}").unwrap(),
        }
    }

    /// Substitute every placeholder in `template` and tidy whitespace left
    /// behind by empty optional lines.
    pub fn render(&self, template: &str, ctx: &RenderContext) -> String {
        let template = template.replace(SLOT, "");
        let mut values: Vec<&str> = Vec::new();
        let skeleton = self.placeholder.replace_all(&template, |caps: &Captures| {
            let value = ctx.resolve(&caps[1]);
            if value.is_empty() {
                String::new()
            } else {
                values.push(value);
                SLOT.to_string()
            }
        });

        let text = self.trailing_space.replace_all(&skeleton, "\n");
        let text = self.leading_space.replace_all(&text, "\n");
        let text = self.double_space.replace_all(&text, " ");
        let text = self.blank_lines.replace_all(&text, "\n\n");

        let mut values = values.into_iter();
        let mut out = String::with_capacity(text.len());
        for (i, part) in text.trim().split(SLOT).enumerate() {
            if i > 0 {
                out.push_str(values.next().unwrap_or_default());
            }
            out.push_str(part);
        }
        out
    }

    /// Whether any placeholder is still present.
    pub fn has_placeholders(&self, text: &str) -> bool {
        self.placeholder.is_match(text)
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}
