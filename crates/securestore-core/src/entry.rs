use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifies one stored credential: `(section, subsection, name)`.
///
/// An absent subsection is distinct from every concrete subsection, so
/// `("auth", None, "password")` and `("auth", Some("x"), "password")` never
/// compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryKey {
    pub section: String,
    pub subsection: Option<String>,
    pub name: String,
}

/// Rejected section/subsection/name combination.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid entry key: {reason}")]
pub struct InvalidKey {
    pub reason: String,
}

impl EntryKey {
    pub fn new(
        section: impl Into<String>,
        subsection: Option<impl Into<String>>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            section: section.into(),
            subsection: subsection.map(Into::into),
            name: name.into(),
        }
    }

    /// Build a key from borrowed parts, the shape every store operation receives.
    pub fn from_parts(section: &str, subsection: Option<&str>, name: &str) -> Self {
        Self {
            section: section.to_string(),
            subsection: subsection.map(str::to_string),
            name: name.to_string(),
        }
    }

    /// Check that the key can be persisted.
    ///
    /// Section names are restricted to ASCII alphanumerics plus `-`, `_` and `.`
    /// because they appear unquoted in section headers. Subsections are quoted
    /// and may hold anything except the empty string.
    pub fn validate(&self) -> Result<(), InvalidKey> {
        validate_section(&self.section)?;
        if let Some(sub) = &self.subsection {
            if sub.is_empty() {
                return Err(InvalidKey {
                    reason: "subsection must not be empty".to_string(),
                });
            }
        }
        if self.name.is_empty() {
            return Err(InvalidKey {
                reason: "name must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

pub fn validate_section(section: &str) -> Result<(), InvalidKey> {
    if section.is_empty() {
        return Err(InvalidKey {
            reason: "section must not be empty".to_string(),
        });
    }
    if let Some(bad) = section
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(InvalidKey {
            reason: format!("section {section:?} contains {bad:?}"),
        });
    }
    Ok(())
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subsection {
            Some(sub) => write!(f, "{}.{}.{}", self.section, sub, self.name),
            None => write!(f, "{}.{}", self.section, self.name),
        }
    }
}

/// A value held under one [`EntryKey`]: a single string or an ordered list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredValue {
    Single(String),
    List(Vec<String>),
}

impl StoredValue {
    /// First value, matching how single-value lookups read multi-valued keys.
    pub fn first(&self) -> Option<&str> {
        match self {
            StoredValue::Single(value) => Some(value),
            StoredValue::List(values) => values.first().map(String::as_str),
        }
    }

    pub fn to_vec(&self) -> Vec<String> {
        match self {
            StoredValue::Single(value) => vec![value.clone()],
            StoredValue::List(values) => values.clone(),
        }
    }

    /// Apply `f` to every element, keeping the single/list shape.
    pub fn try_map<E>(&self, mut f: impl FnMut(&str) -> Result<String, E>) -> Result<Self, E> {
        Ok(match self {
            StoredValue::Single(value) => StoredValue::Single(f(value)?),
            StoredValue::List(values) => StoredValue::List(
                values
                    .iter()
                    .map(|v| f(v))
                    .collect::<Result<Vec<_>, E>>()?,
            ),
        })
    }
}
