//! Subject label normalization and secondary category lookup.
//!
//! Both tables are configuration data: they are loaded from JSON or built in
//! code and injected through [`RunnerConfig`](crate::RunnerConfig), never
//! written inline at a call site.

use crate::error::{AutomationError, Result};
use crate::types::WorkItem;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Lowercase and collapse runs of whitespace. Used for every visible-label match.
pub fn normalize_label(label: &str) -> String {
    label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Collapses raw subject labels into the label shown by the subject control.
///
/// e.g. "Biology", "Chemistry" and "Physics" can all map to "Science".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectMap {
    #[serde(default)]
    aliases: BTreeMap<String, String>,
}

impl SubjectMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_alias(mut self, raw: &str, umbrella: &str) -> Self {
        self.aliases
            .insert(normalize_label(raw), umbrella.trim().to_string());
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// The label to look for in the subject control.
    pub fn resolve(&self, raw: &str) -> String {
        self.aliases
            .get(&normalize_label(raw))
            .cloned()
            .unwrap_or_else(|| raw.trim().to_string())
    }
}

/// Category table for one subject, keyed by item parameter values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub subject: String,
    /// Item parameter names, in key order.
    #[serde(default)]
    pub params: Vec<String>,
    /// Lowercased parameter values joined with `/` → category option label.
    pub categories: BTreeMap<String, String>,
}

impl CategoryRule {
    pub fn new(subject: &str, params: &[&str]) -> Self {
        Self {
            subject: subject.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            categories: BTreeMap::new(),
        }
    }

    /// Register the category for one combination of parameter values.
    pub fn with_category(mut self, values: &[&str], label: &str) -> Self {
        self.categories.insert(Self::join(values), label.to_string());
        self
    }

    /// Allowed values for the parameter at `index`, lowercased.
    pub fn allowed_values(&self, index: usize) -> BTreeSet<String> {
        self.categories
            .keys()
            .filter_map(|key| key.split('/').nth(index).map(str::to_string))
            .collect()
    }

    fn join<S: AsRef<str>>(values: &[S]) -> String {
        values
            .iter()
            .map(|v| v.as_ref().trim().to_lowercase())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Category label for an item, or a sub-step failure naming what is missing.
    pub fn category_for(&self, item: &WorkItem) -> Result<String> {
        let mut values = Vec::with_capacity(self.params.len());
        for param in &self.params {
            match item.param(param) {
                Some(v) if !v.trim().is_empty() => values.push(v),
                _ => {
                    return Err(AutomationError::SubstepFailed(format!(
                        "{} has no '{}' parameter for {} category lookup",
                        item.identifier, param, self.subject
                    )))
                }
            }
        }

        let key = Self::join(&values);
        self.categories.get(&key).cloned().ok_or_else(|| {
            AutomationError::SubstepFailed(format!(
                "no {} category for '{}' ({})",
                self.subject, key, item.identifier
            ))
        })
    }
}

/// All category rules, looked up by (normalized) subject.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryMap {
    #[serde(default)]
    rules: Vec<CategoryRule>,
}

impl CategoryMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, rule: CategoryRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn rule_for(&self, subject: &str) -> Option<&CategoryRule> {
        let wanted = normalize_label(subject);
        self.rules
            .iter()
            .find(|rule| normalize_label(&rule.subject) == wanted)
    }

    /// `Ok(None)` when the subject needs no category selection.
    pub fn lookup(&self, subject: &str, item: &WorkItem) -> Result<Option<String>> {
        match self.rule_for(subject) {
            Some(rule) => rule.category_for(item).map(Some),
            None => Ok(None),
        }
    }
}
