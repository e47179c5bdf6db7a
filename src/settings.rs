use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use crate::merge::ConflictPolicy;

const OUTPUT_ROOT_ENV: &str = "DDT_OUTPUT_ROOT";

/// Processing configuration. Every field has a default so a partial JSON file is enough.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub output_root: PathBuf,
    pub run_folder_name: String,
    pub merged_file_name: String,
    pub module_file_marker: String,
    pub catalog_file_marker: String,
    /// HMI database member; only its user table is merged.
    pub user_database_marker: String,
    pub conflict_policy: ConflictPolicy,
    pub timezone_parameter: String,
    /// Table name -> JSON field of `rti_json_sample` that identifies the channel or record.
    pub table_keys: BTreeMap<String, String>,
    /// IO type -> table holding the samples of that IO type.
    pub io_type_tables: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        let table_keys = [
            ("IOConfig@0", "ioId"),
            ("IOAnalogIn@0", "ioId"),
            ("IOAnalogOut@0", "ioId"),
            ("IODigitalIn@0", "ioId"),
            ("IODigitalOut@0", "ioId"),
            ("VFDConfig@0", "vfdId"),
            ("VFDInfo@0", "vfdId"),
            ("IncidentAll@0", "incidentTidx"),
            ("ParConfig@0", "parNameTidx"),
            ("ParValue@0", "parNameTidx"),
            ("CCUSync@0", "machineId"),
        ];
        let io_type_tables = [
            ("J_IO_ANALOG_INPUT", "IOAnalogIn@0"),
            ("J_IO_ANALOG_OUTPUT", "IOAnalogOut@0"),
            ("J_IO_DIGITAL_INPUT", "IODigitalIn@0"),
            ("J_IO_DIGITAL_OUTPUT", "IODigitalOut@0"),
        ];

        Self {
            output_root: default_output_root(),
            run_folder_name: "data".into(),
            merged_file_name: "merged_db.sqlite".into(),
            module_file_marker: "FB20.DC".into(),
            catalog_file_marker: "textDic".into(),
            user_database_marker: "fbhmi".into(),
            conflict_policy: ConflictPolicy::default(),
            timezone_parameter: "TimeZoneOffset".into(),
            table_keys: table_keys
                .into_iter()
                .map(|(table, key)| (table.to_string(), key.to_string()))
                .collect(),
            io_type_tables: io_type_tables
                .into_iter()
                .map(|(io_type, table)| (io_type.to_string(), table.to_string()))
                .collect(),
        }
    }
}

impl Settings {
    pub fn with_output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.output_root = root.into();
        self
    }

    pub fn table_key(&self, table: &str) -> Option<&str> {
        self.table_keys.get(table).map(String::as_str)
    }
}

/// `<home>/Documents/DDT`, overridable through `DDT_OUTPUT_ROOT`.
fn default_output_root() -> PathBuf {
    if let Some(root) = env::var_os(OUTPUT_ROOT_ENV) {
        return PathBuf::from(root);
    }
    env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .map(|home| PathBuf::from(home).join("Documents").join("DDT"))
        .unwrap_or_else(|| PathBuf::from("DDT"))
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<Arc<Settings>>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            read_settings(&path)?
        } else {
            Settings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(Arc::new(data)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current settings; sessions hold on to the snapshot they started with.
    pub fn settings(&self) -> Arc<Settings> {
        match self.data.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn update(&self, settings: Settings) -> Result<()> {
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.persist(&settings)?;
        *guard = Arc::new(settings);
        Ok(())
    }

    pub fn reload(&self) -> Result<()> {
        let data = read_settings(&self.path)?;
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Arc::new(data);
        Ok(())
    }

    fn persist(&self, data: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create settings directory {}", parent.display())
            })?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

fn read_settings(path: &Path) -> Result<Settings> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings from {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse settings in {}", path.display()))
}
