//! Prompt Loader
//!
//! Resolves every known template once at construction, override directory
//! first and embedded text second, and registers it with Handlebars. The
//! loader is read-only afterwards and can be shared across requests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use eyre::{Context, Result, eyre};
use handlebars::Handlebars;
use serde::Serialize;
use tracing::{debug, info};

use super::embedded;

/// Where a template body came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptSource {
    Override(PathBuf),
    Embedded,
}

/// A resolved prompt template
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub name: String,
    pub source: PromptSource,
    pub body: String,
}

/// Loads and renders prompt templates
pub struct PromptLoader {
    hbs: Handlebars<'static>,
    templates: HashMap<String, PromptTemplate>,
}

impl PromptLoader {
    /// Create a loader, checking `override_dir` for `<name>.pmt` files first
    ///
    /// Fails if an override exists but cannot be read or does not compile.
    pub fn new(override_dir: Option<&Path>) -> Result<Self> {
        debug!(?override_dir, "PromptLoader::new: called");
        let override_dir = override_dir.filter(|d| {
            let exists = d.is_dir();
            debug!(dir = ?d, %exists, "PromptLoader::new: checking override directory");
            exists
        });

        let mut hbs = Handlebars::new();
        hbs.register_escape_fn(handlebars::no_escape);

        let mut templates = HashMap::new();
        for name in embedded::NAMES {
            let template = Self::resolve(name, override_dir)?;
            hbs.register_template_string(name, &template.body)
                .wrap_err_with(|| format!("Failed to compile prompt template {}", name))?;
            if let PromptSource::Override(ref path) = template.source {
                info!("Using prompt override for '{}' from {}", name, path.display());
            }
            templates.insert(name.to_string(), template);
        }

        Ok(Self { hbs, templates })
    }

    /// Create a loader that only uses embedded prompts
    pub fn embedded_only() -> Result<Self> {
        debug!("PromptLoader::embedded_only: called");
        Self::new(None)
    }

    fn resolve(name: &str, override_dir: Option<&Path>) -> Result<PromptTemplate> {
        debug!(%name, "PromptLoader::resolve: called");
        if let Some(dir) = override_dir {
            let path = dir.join(format!("{}.pmt", name));
            if path.exists() {
                debug!(?path, "PromptLoader::resolve: found override");
                let body = std::fs::read_to_string(&path)
                    .map_err(|e| eyre!("Failed to read prompt override {}: {}", path.display(), e))?;
                return Ok(PromptTemplate {
                    name: name.to_string(),
                    source: PromptSource::Override(path),
                    body,
                });
            }
        }

        let body = embedded::get_embedded(name).ok_or_else(|| eyre!("Prompt template not found: {}", name))?;
        Ok(PromptTemplate {
            name: name.to_string(),
            source: PromptSource::Embedded,
            body: body.to_string(),
        })
    }

    /// Look up a template by name
    pub fn get_prompt(&self, name: &str) -> Result<&PromptTemplate> {
        debug!(%name, "PromptLoader::get_prompt: called");
        self.templates
            .get(name)
            .ok_or_else(|| eyre!("Prompt template not found: {}", name))
    }

    /// Render a template with the given context
    pub fn render<T: Serialize>(&self, name: &str, context: &T) -> Result<String> {
        debug!(%name, "PromptLoader::render: called");
        if !self.templates.contains_key(name) {
            return Err(eyre!("Prompt template not found: {}", name));
        }
        self.hbs
            .render(name, context)
            .map_err(|e| eyre!("Failed to render template {}: {}", name, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_embedded_only_registers_all() {
        let loader = PromptLoader::embedded_only().unwrap();
        for name in embedded::NAMES {
            let template = loader.get_prompt(name).unwrap();
            assert_eq!(template.source, PromptSource::Embedded);
        }
        assert!(loader.get_prompt("nonexistent-template").is_err());
    }

    #[test]
    fn test_render_does_not_html_escape() {
        let loader = PromptLoader::embedded_only().unwrap();
        let text = loader
            .render(
                "roadmap-actions",
                &json!({
                    "goal": "Learn <Rust> & \"ship\"",
                    "milestone_label": "Basics",
                    "context": "None",
                    "min_actions": 3,
                    "max_actions": 5
                }),
            )
            .unwrap();
        assert!(text.contains("Learn <Rust> & \"ship\""));
        assert!(text.contains("Milestone: Basics\n"));
        assert!(text.contains("3-5"));
    }

    #[test]
    fn test_chat_prompt_switches_output_mode() {
        let loader = PromptLoader::embedded_only().unwrap();
        let plain = loader
            .render("discovery-chat", &json!({ "greeting_instruction": "DO NOT greet." }))
            .unwrap();
        assert!(plain.contains("Do NOT output JSON"));
        assert!(!plain.contains("Still unclear"));

        let legacy = loader
            .render(
                "discovery-chat",
                &json!({ "embedded_json": true, "missing_fields": "timeline, resources" }),
            )
            .unwrap();
        assert!(legacy.contains("\"response\""));
        assert!(legacy.contains("Still unclear: timeline, resources"));
    }

    #[test]
    fn test_override_directory_wins() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("checkin-analysis.pmt"), "Custom {{who}}").unwrap();

        let loader = PromptLoader::new(Some(temp.path())).unwrap();
        let template = loader.get_prompt("checkin-analysis").unwrap();
        assert!(matches!(template.source, PromptSource::Override(_)));
        assert_eq!(loader.render("checkin-analysis", &json!({ "who": "me" })).unwrap(), "Custom me");
        assert_eq!(loader.get_prompt("discovery-chat").unwrap().source, PromptSource::Embedded);
    }

    #[test]
    fn test_broken_override_fails_construction() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("discovery-chat.pmt"), "{{#if x}}unclosed").unwrap();
        assert!(PromptLoader::new(Some(temp.path())).is_err());
    }

    #[test]
    fn test_missing_override_dir_falls_back() {
        let loader = PromptLoader::new(Some(Path::new("/nonexistent/prompts"))).unwrap();
        assert_eq!(loader.get_prompt("roadmap-planner").unwrap().source, PromptSource::Embedded);
    }
}
