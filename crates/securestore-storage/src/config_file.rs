//! File-backed hierarchical config: `section -> [subsection] -> name -> value`.
//!
//! The on-disk syntax is TOML. Each top-level table is one section header,
//! written git-style as `section` or `section "subsection"`:
//!
//! ```toml
//! [auth]
//! password = "aead:v1:..."
//!
//! ['remote "origin"']
//! token = ["aead:v1:...", "aead:v1:..."]
//! ```
//!
//! Strings are single values, arrays of strings are lists (an empty array is a
//! present-but-empty list). Any other TOML type is rejected at load time.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs, io,
    path::{Path, PathBuf},
};

use securestore_core::{
    entry::{validate_section, InvalidKey},
    EntryKey, StoredValue,
};
use thiserror::Error;
use toml::{Table, Value};
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
    #[error(transparent)]
    InvalidKey(#[from] InvalidKey),
    #[error("cannot serialize config: {0}")]
    Serialize(String),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SectionId {
    section: String,
    subsection: Option<String>,
}

impl SectionId {
    fn of(key: &EntryKey) -> Self {
        Self {
            section: key.section.clone(),
            subsection: key.subsection.clone(),
        }
    }

    fn header(&self) -> String {
        match &self.subsection {
            None => self.section.clone(),
            Some(sub) => {
                let escaped = sub.replace('\\', "\\\\").replace('"', "\\\"");
                format!("{} \"{escaped}\"", self.section)
            }
        }
    }

    fn parse_header(header: &str) -> Result<Self, String> {
        let Some((section, rest)) = header.split_once(' ') else {
            validate_section(header).map_err(|e| e.reason)?;
            return Ok(Self {
                section: header.to_string(),
                subsection: None,
            });
        };
        validate_section(section).map_err(|e| e.reason)?;
        let quoted = rest
            .strip_prefix('"')
            .and_then(|r| r.strip_suffix('"'))
            .ok_or_else(|| format!("malformed section header {header:?}"))?;

        let mut subsection = String::with_capacity(quoted.len());
        let mut chars = quoted.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some(escaped @ ('\\' | '"')) => subsection.push(escaped),
                    _ => return Err(format!("bad escape in section header {header:?}")),
                },
                '"' => return Err(format!("unescaped quote in section header {header:?}")),
                other => subsection.push(other),
            }
        }
        if subsection.is_empty() {
            return Err(format!("empty subsection in section header {header:?}"));
        }
        Ok(Self {
            section: section.to_string(),
            subsection: Some(subsection),
        })
    }
}

/// In-memory model of one config file plus its persistence bookkeeping.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    path: PathBuf,
    sections: BTreeMap<SectionId, BTreeMap<String, StoredValue>>,
    /// Serialized form as of the last load or successful save.
    persisted: Vec<u8>,
    /// Raw file bytes as last read or written; `None` when the file was absent.
    on_disk: Option<Vec<u8>>,
}

impl ConfigFile {
    /// Load the file at `path`. A missing file yields an empty config.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let on_disk = read_if_exists(&path)?;
        let sections = match &on_disk {
            Some(bytes) => parse(&path, bytes)?,
            None => BTreeMap::new(),
        };
        let mut config = Self {
            path,
            sections,
            persisted: Vec::new(),
            on_disk,
        };
        config.persisted = config.serialize()?;
        debug!(path = %config.path.display(), sections = config.sections.len(), "loaded config");
        Ok(config)
    }

    /// Re-read the backing file, replacing the in-memory model only on success.
    pub fn reload(&mut self) -> Result<(), ConfigError> {
        *self = Self::load(self.path.clone())?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn raw(&self, key: &EntryKey) -> Option<&StoredValue> {
        self.sections
            .get(&SectionId::of(key))
            .and_then(|names| names.get(&key.name))
    }

    pub fn get(&self, key: &EntryKey) -> Option<&str> {
        self.raw(key).and_then(StoredValue::first)
    }

    pub fn get_list(&self, key: &EntryKey) -> Option<Vec<String>> {
        self.raw(key).map(StoredValue::to_vec)
    }

    pub fn set(&mut self, key: &EntryKey, value: String) -> Result<(), ConfigError> {
        self.insert(key, StoredValue::Single(value))
    }

    pub fn set_list(&mut self, key: &EntryKey, values: Vec<String>) -> Result<(), ConfigError> {
        self.insert(key, StoredValue::List(values))
    }

    /// Remove a key, dropping its section when it becomes empty.
    pub fn unset(&mut self, key: &EntryKey) -> Option<StoredValue> {
        let id = SectionId::of(key);
        let names = self.sections.get_mut(&id)?;
        let removed = names.remove(&key.name);
        if names.is_empty() {
            self.sections.remove(&id);
        }
        removed
    }

    /// Put back a value captured with [`ConfigFile::raw`] (or its absence).
    pub fn restore(&mut self, key: &EntryKey, prior: Option<StoredValue>) {
        match prior {
            Some(value) => {
                self.sections
                    .entry(SectionId::of(key))
                    .or_default()
                    .insert(key.name.clone(), value);
            }
            None => {
                self.unset(key);
            }
        }
    }

    pub fn sections(&self) -> BTreeSet<String> {
        self.sections.keys().map(|id| id.section.clone()).collect()
    }

    pub fn subsections(&self, section: &str) -> BTreeSet<String> {
        self.sections
            .keys()
            .filter(|id| id.section == section)
            .filter_map(|id| id.subsection.clone())
            .collect()
    }

    pub fn names(&self, section: &str, subsection: Option<&str>) -> BTreeSet<String> {
        let id = SectionId {
            section: section.to_string(),
            subsection: subsection.map(str::to_string),
        };
        self.sections
            .get(&id)
            .map(|names| names.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn serialize(&self) -> Result<Vec<u8>, ConfigError> {
        let mut doc = Table::new();
        for (id, names) in &self.sections {
            let mut table = Table::new();
            for (name, value) in names {
                let value = match value {
                    StoredValue::Single(v) => Value::String(v.clone()),
                    StoredValue::List(vs) => {
                        Value::Array(vs.iter().cloned().map(Value::String).collect())
                    }
                };
                table.insert(name.clone(), value);
            }
            doc.insert(id.header(), Value::Table(table));
        }
        toml::to_string(&doc)
            .map(String::into_bytes)
            .map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// True when the in-memory model differs from what was last loaded or saved.
    pub fn is_modified(&self) -> bool {
        self.serialize()
            .map_or(true, |current| current != self.persisted)
    }

    /// Record that `bytes` (a prior [`ConfigFile::serialize`] result) now sit on disk.
    pub fn mark_persisted(&mut self, bytes: Vec<u8>) {
        self.on_disk = Some(bytes.clone());
        self.persisted = bytes;
    }

    /// True when the backing file changed since it was last read or written here.
    pub fn is_outdated(&self) -> Result<bool, ConfigError> {
        Ok(read_if_exists(&self.path)? != self.on_disk)
    }

    fn insert(&mut self, key: &EntryKey, value: StoredValue) -> Result<(), ConfigError> {
        key.validate()?;
        self.sections
            .entry(SectionId::of(key))
            .or_default()
            .insert(key.name.clone(), value);
        Ok(())
    }
}

fn read_if_exists(path: &Path) -> Result<Option<Vec<u8>>, ConfigError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ConfigError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn parse(
    path: &Path,
    bytes: &[u8],
) -> Result<BTreeMap<SectionId, BTreeMap<String, StoredValue>>, ConfigError> {
    let parse_err = |reason: String| ConfigError::Parse {
        path: path.to_path_buf(),
        reason,
    };
    let text = std::str::from_utf8(bytes).map_err(|e| parse_err(e.to_string()))?;
    let doc: Table = toml::from_str(text).map_err(|e| parse_err(e.message().to_string()))?;

    let mut sections = BTreeMap::new();
    for (header, body) in doc {
        let id = SectionId::parse_header(&header).map_err(&parse_err)?;
        let Value::Table(body) = body else {
            return Err(parse_err(format!("top-level key {header:?} is not a section")));
        };
        let mut names = BTreeMap::new();
        for (name, value) in body {
            let stored = match value {
                Value::String(v) => StoredValue::Single(v),
                Value::Array(items) => StoredValue::List(
                    items
                        .into_iter()
                        .map(|item| match item {
                            Value::String(v) => Ok(v),
                            _ => Err(parse_err(format!(
                                "{header}.{name}: list elements must be strings"
                            ))),
                        })
                        .collect::<Result<_, _>>()?,
                ),
                _ => {
                    return Err(parse_err(format!(
                        "{header}.{name}: value must be a string or list of strings"
                    )))
                }
            };
            names.insert(name, stored);
        }
        if !names.is_empty() {
            sections.insert(id, names);
        }
    }
    Ok(sections)
}
