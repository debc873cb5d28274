use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use crate::query::render::{placeholders, RenderError};

const EMBEDDED_CATALOG: &str = include_str!("../../catalog/ga4_templates.json");

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read template catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse template catalog: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("template catalog is empty")]
    Empty,

    #[error("duplicate template name in catalog: {0}")]
    Duplicate(String),

    #[error("template '{name}' is invalid: {reason}")]
    Invalid { name: String, reason: String },
}

/// A named SQL skeleton with `{placeholder}` tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryTemplate {
    pub name: String,
    pub description: String,
    pub sql: String,
}

impl QueryTemplate {
    /// Placeholder names the template needs, in order of first use.
    pub fn placeholders(&self) -> Vec<String> {
        placeholders(&self.sql).unwrap_or_default()
    }
}

/// Write-once catalog of query templates, kept in load order.
#[derive(Debug)]
pub struct TemplateLibrary {
    templates: Vec<QueryTemplate>,
    index: HashMap<String, usize>,
}

impl TemplateLibrary {
    /// Loads `path` when given, otherwise the catalog compiled into the binary.
    pub fn load(path: Option<&Path>) -> Result<Self, CatalogError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::embedded(),
        }
    }

    pub fn embedded() -> Result<Self, CatalogError> {
        Self::from_json(EMBEDDED_CATALOG)
    }

    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        info!("Loading template catalog from {}", path.display());
        let json = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let templates: Vec<QueryTemplate> = serde_json::from_str(json)?;
        Self::from_templates(templates)
    }

    pub fn from_templates(templates: Vec<QueryTemplate>) -> Result<Self, CatalogError> {
        if templates.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut index = HashMap::with_capacity(templates.len());
        for (position, template) in templates.iter().enumerate() {
            validate(template)?;
            if index.insert(template.name.clone(), position).is_some() {
                return Err(CatalogError::Duplicate(template.name.clone()));
            }
        }

        debug!("Template catalog holds {} templates", templates.len());
        Ok(Self { templates, index })
    }

    pub fn get(&self, name: &str) -> Option<&QueryTemplate> {
        self.index.get(name).map(|&position| &self.templates[position])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// `(name, description)` pairs in catalog order.
    pub fn list_descriptions(&self) -> Vec<(&str, &str)> {
        self.templates
            .iter()
            .map(|t| (t.name.as_str(), t.description.as_str()))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueryTemplate> {
        self.templates.iter()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

fn validate(template: &QueryTemplate) -> Result<(), CatalogError> {
    let invalid = |reason: String| CatalogError::Invalid {
        name: template.name.clone(),
        reason,
    };

    if template.name.trim().is_empty() {
        return Err(invalid("empty name".to_string()));
    }
    if template.sql.trim().is_empty() {
        return Err(invalid("empty SQL".to_string()));
    }
    placeholders(&template.sql).map_err(|e: RenderError| invalid(e.to_string()))?;
    Ok(())
}
