//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the dispatch runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveTime;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One scalar configuration value on a device page.
///
/// Legacy installations store booleans as integer registers, so the numeric
/// accessors stay permissive about that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(value) => Some(*value as f64),
            FieldValue::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(value) => Some(*value),
            FieldValue::Int(value) => Some(*value != 0),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(value) => Some(*value),
            FieldValue::Float(value) => Some(*value as i64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Parse an `"HH:MM"` wall-clock field.
    pub fn as_time(&self) -> Option<NaiveTime> {
        let text = self.as_text()?;
        NaiveTime::parse_from_str(text, "%H:%M").ok()
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_owned())
    }
}

/// Configuration page of one device: field name to scalar value.
pub type FieldPage = IndexMap<String, FieldValue>;

/// Per-device configuration store, keyed by device uid.
///
/// Read-mostly; the scan loop clones pages out every cycle while operator
/// writes come in between cycles.
#[derive(Debug)]
pub struct FieldStore {
    pages: RwLock<IndexMap<String, FieldPage>>,
    path: PathBuf,
    autosave: bool,
}

impl FieldStore {
    /// Load the store from a TOML file, starting empty when the file is absent.
    pub fn load<P: AsRef<Path>>(path: P, autosave: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let pages = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("unable to read field store {}", path.display()))?;
            toml::from_str::<IndexMap<String, FieldPage>>(&contents)
                .with_context(|| format!("failed to parse field store {}", path.display()))?
        } else {
            debug!(store_path = %path.display(), "field store file absent, starting empty");
            IndexMap::new()
        };
        Ok(Self {
            pages: RwLock::new(pages),
            path,
            autosave,
        })
    }

    /// In-memory store for tests and tooling.
    pub fn in_memory() -> Self {
        Self {
            pages: RwLock::new(IndexMap::new()),
            path: PathBuf::new(),
            autosave: false,
        }
    }

    /// Clone out the full page for a device. Unknown devices yield an empty page.
    pub fn page(&self, uid: &str) -> FieldPage {
        self.pages.read().get(uid).cloned().unwrap_or_default()
    }

    /// Read one field.
    pub fn get(&self, uid: &str, field: &str) -> Option<FieldValue> {
        self.pages.read().get(uid)?.get(field).cloned()
    }

    /// Write one field, persisting when autosave is on.
    pub fn set(&self, uid: &str, field: &str, value: FieldValue) -> Result<()> {
        {
            let mut pages = self.pages.write();
            pages
                .entry(uid.to_owned())
                .or_default()
                .insert(field.to_owned(), value);
        }
        if self.autosave {
            self.save()?;
        }
        Ok(())
    }

    /// Merge a batch of field writes into one device page.
    pub fn set_many(&self, uid: &str, fields: &FieldPage) -> Result<()> {
        {
            let mut pages = self.pages.write();
            let page = pages.entry(uid.to_owned()).or_default();
            for (field, value) in fields {
                page.insert(field.clone(), value.clone());
            }
        }
        if self.autosave {
            self.save()?;
        }
        Ok(())
    }

    /// Serialize the store back to its TOML file.
    pub fn save(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Ok(());
        }
        let pages = self.pages.read();
        let contents =
            toml::to_string_pretty(&*pages).context("failed to serialize field store")?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, contents)
            .with_context(|| format!("unable to write field store {}", self.path.display()))?;
        Ok(())
    }

    /// Device uids currently present in the store.
    pub fn device_uids(&self) -> Vec<String> {
        self.pages.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untagged_values_parse_from_toml() {
        let parsed: IndexMap<String, FieldPage> = toml::from_str(
            r#"
            [bess1]
            system_enable = true
            ramp_rate_kw = 2.5
            max_charge_soc = 95
            tou1_start = "01:30"
            "#,
        )
        .unwrap();
        let page = &parsed["bess1"];
        assert_eq!(page["system_enable"].as_bool(), Some(true));
        assert_eq!(page["ramp_rate_kw"].as_f64(), Some(2.5));
        assert_eq!(page["max_charge_soc"].as_f64(), Some(95.0));
        assert_eq!(
            page["tou1_start"].as_time(),
            Some(NaiveTime::from_hms_opt(1, 30, 0).unwrap())
        );
    }

    #[test]
    fn numeric_booleans_read_as_bool() {
        assert_eq!(FieldValue::Int(1).as_bool(), Some(true));
        assert_eq!(FieldValue::Int(0).as_bool(), Some(false));
        assert_eq!(FieldValue::Text("yes".into()).as_bool(), None);
    }

    #[test]
    fn missing_device_yields_empty_page() {
        let store = FieldStore::in_memory();
        assert!(store.page("nope").is_empty());
        assert!(store.get("nope", "anything").is_none());
    }

    #[test]
    fn set_and_save_roundtrip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("fields.toml");
        let store = FieldStore::load(&path, true)?;
        store.set("bess1", "ramp_rate_kw", FieldValue::Float(2.0))?;
        store.set("bess1", "system_enable", FieldValue::Bool(true))?;

        let reloaded = FieldStore::load(&path, false)?;
        assert_eq!(
            reloaded.get("bess1", "ramp_rate_kw"),
            Some(FieldValue::Float(2.0))
        );
        assert_eq!(
            reloaded.get("bess1", "system_enable"),
            Some(FieldValue::Bool(true))
        );
        Ok(())
    }

    #[test]
    fn bad_time_strings_are_none() {
        assert!(FieldValue::Text("25:99".into()).as_time().is_none());
        assert!(FieldValue::Text("midnight".into()).as_time().is_none());
        assert!(FieldValue::Float(1.5).as_time().is_none());
    }
}
