//! Prompt templates for the three analysis call sites
//!
//! Templates are MiniJinja sources compiled once into a shared
//! [`Environment`]. Every render receives a `language` variable naming the
//! language free-text fields should be written in.

use crate::error::Result;
use minijinja::{Environment, Value, context};
use serde::Serialize;

pub const MARKET_CONTEXT: &str = "market_context";
pub const COMPANY_ANALYSIS: &str = "company_analysis";
pub const STOCK_CONSOLIDATION: &str = "stock_consolidation";

const TEMPLATES: [(&str, &str); 3] = [
    (MARKET_CONTEXT, include_str!("templates/market_context.j2")),
    (COMPANY_ANALYSIS, include_str!("templates/company_analysis.j2")),
    (STOCK_CONSOLIDATION, include_str!("templates/stock_consolidation.j2")),
];

/// Named prompt templates plus the response language
#[derive(Debug)]
pub struct PromptRegistry {
    env: Environment<'static>,
    language: String,
}

impl PromptRegistry {
    /// Compile the built-in templates
    pub fn new(language: impl Into<String>) -> Result<Self> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        for (name, source) in TEMPLATES {
            env.add_template(name, source)?;
        }
        Ok(Self {
            env,
            language: language.into(),
        })
    }

    /// Replace or add a template, e.g. to tune wording without a rebuild
    pub fn with_template(mut self, name: &'static str, source: &'static str) -> Result<Self> {
        self.env.add_template(name, source)?;
        Ok(self)
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn render<S: Serialize>(&self, name: &str, vars: S) -> Result<String> {
        let template = self.env.get_template(name)?;
        let rendered = template.render(context! {
            language => self.language,
            ..Value::from_serialize(&vars)
        })?;
        Ok(rendered)
    }
}
