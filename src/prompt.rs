//! Role-tagged prompt templates.
//!
//! Two placeholder syntaxes are supported. [`TemplateFormat::FString`] uses
//! `{name}` with `{{` / `}}` as escapes. [`TemplateFormat::Jinja`] only
//! substitutes `{{ name }}` and leaves single braces untouched. Substituted
//! values are never rescanned, so braces inside them stay literal.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub type TemplateVars = HashMap<String, String>;

pub fn vars_from_pairs(pairs: &[(&str, &str)]) -> TemplateVars {
    pairs.iter().map(|(name, value)| (name.to_string(), value.to_string())).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self { Self { role: Role::System, content: content.into() } }
    pub fn user(content: impl Into<String>) -> Self { Self { role: Role::User, content: content.into() } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TemplateFormat {
    #[default]
    FString,
    Jinja,
}

#[derive(Debug, Clone)]
pub struct MessageTemplate {
    pub role: Role,
    pub template: String,
    pub format: TemplateFormat,
}

impl MessageTemplate {
    pub fn system(template: impl Into<String>) -> Self {
        Self { role: Role::System, template: template.into(), format: TemplateFormat::FString }
    }

    pub fn user(template: impl Into<String>) -> Self {
        Self { role: Role::User, template: template.into(), format: TemplateFormat::FString }
    }

    pub fn jinja(mut self) -> Self {
        self.format = TemplateFormat::Jinja;
        self
    }

    pub fn render(&self, vars: &TemplateVars) -> Result<ChatMessage> {
        let content = render_template(&self.template, vars, self.format)?;
        Ok(ChatMessage { role: self.role, content })
    }
}

/// Ordered message templates rendered against one set of variables.
#[derive(Debug, Clone)]
pub struct ChatPrompt {
    messages: Vec<MessageTemplate>,
}

impl ChatPrompt {
    pub fn new(messages: Vec<MessageTemplate>) -> Self { Self { messages } }

    pub fn messages(&self) -> &[MessageTemplate] { &self.messages }

    pub fn render(&self, vars: &TemplateVars) -> Result<Vec<ChatMessage>> {
        self.messages.iter().map(|m| m.render(vars)).collect()
    }
}

impl TemplateFormat {
    fn delimiters(self) -> (&'static str, &'static str) {
        match self {
            Self::FString => ("{", "}"),
            Self::Jinja => ("{{", "}}"),
        }
    }
}

pub fn render_template(template: &str, vars: &TemplateVars, format: TemplateFormat) -> Result<String> {
    let (open, close) = format.delimiters();
    let mut out = String::with_capacity(template.len() + 32);
    let mut rest = template;

    while let Some(i) = rest.find(['{', '}']) {
        out.push_str(&rest[..i]);
        rest = &rest[i..];
        if format == TemplateFormat::FString {
            if let Some(after) = rest.strip_prefix("{{").or_else(|| rest.strip_prefix("}}")) {
                out.push_str(&rest[..1]);
                rest = after;
                continue;
            }
        }
        let Some(inner) = rest.strip_prefix(open) else {
            if format == TemplateFormat::FString {
                return Err(Error::Template("single } in template".to_string()));
            }
            out.push_str(&rest[..1]);
            rest = &rest[1..];
            continue;
        };
        let end = inner.find(close).ok_or_else(|| Error::Template(format!("unclosed {open} in template")))?;
        let name = inner[..end].trim();
        if name.is_empty() {
            return Err(Error::Template(format!("empty {open}{close} in template")));
        }
        let value = vars.get(name).ok_or_else(|| Error::Template(format!("missing variable {name}")))?;
        out.push_str(value);
        rest = &inner[end + close.len()..];
    }

    out.push_str(rest);
    Ok(out)
}
