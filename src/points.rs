//! Static channel definitions and preset graph groups.
//!
//! The catalog is configuration handed to the core: it is never derived from
//! dump data and never mutated by the pipeline.

use std::{collections::BTreeMap, fs, path::Path};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Where a point's samples live in the merged dataset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PointCategory {
    /// Looked up in `IOConfig@0` by `ioName`.
    #[serde(rename_all = "camelCase")]
    Io { io_name: String },
    /// Looked up in `VFDConfig@0` by `vfdName`; the value is `field` of `VFDInfo@0`.
    #[serde(rename_all = "camelCase")]
    Vfd { vfd_name: String, field: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataPoint {
    pub id: String,
    pub display_name: String,
    pub category: PointCategory,
    #[serde(default)]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresetGroup {
    pub id: String,
    pub display_name: String,
    pub points: Vec<String>,
    /// Name of the reference limit drawn on this preset's graph, if any.
    #[serde(default)]
    pub reference_limit: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PointCatalog {
    points: BTreeMap<String, DataPoint>,
    presets: BTreeMap<String, PresetGroup>,
}

#[derive(Deserialize)]
struct CatalogFile {
    points: Vec<DataPoint>,
    #[serde(default)]
    presets: Vec<PresetGroup>,
}

impl PointCatalog {
    pub fn new(points: Vec<DataPoint>, presets: Vec<PresetGroup>) -> Result<Self> {
        let mut catalog = PointCatalog::default();
        for point in points {
            if catalog.points.contains_key(&point.id) {
                bail!("duplicate point id '{}'", point.id);
            }
            catalog.points.insert(point.id.clone(), point);
        }
        for preset in presets {
            if let Some(missing) = preset.points.iter().find(|id| !catalog.points.contains_key(*id)) {
                bail!("preset '{}' references unknown point '{}'", preset.id, missing);
            }
            if catalog.presets.contains_key(&preset.id) {
                bail!("duplicate preset id '{}'", preset.id);
            }
            catalog.presets.insert(preset.id.clone(), preset);
        }
        Ok(catalog)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read point catalog {}", path.display()))?;
        let file: CatalogFile = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse point catalog {}", path.display()))?;
        Self::new(file.points, file.presets)
            .with_context(|| format!("Invalid point catalog {}", path.display()))
    }

    pub fn point(&self, id: &str) -> Option<&DataPoint> {
        self.points.get(id)
    }

    pub fn preset(&self, id: &str) -> Option<&PresetGroup> {
        self.presets.get(id)
    }

    pub fn points(&self) -> impl Iterator<Item = &DataPoint> {
        self.points.values()
    }

    pub fn presets(&self) -> impl Iterator<Item = &PresetGroup> {
        self.presets.values()
    }

    /// Channels shipped with the tool for the FB20 shearer family.
    pub fn builtin() -> Self {
        fn vfd(id: &str, name: &str, vfd_name: &str, field: &str, unit: &str) -> DataPoint {
            DataPoint {
                id: id.into(),
                display_name: name.into(),
                category: PointCategory::Vfd {
                    vfd_name: vfd_name.into(),
                    field: field.into(),
                },
                unit: Some(unit.into()),
            }
        }
        fn io(id: &str, name: &str, io_name: &str, unit: Option<&str>) -> DataPoint {
            DataPoint {
                id: id.into(),
                display_name: name.into(),
                category: PointCategory::Io {
                    io_name: io_name.into(),
                },
                unit: unit.map(Into::into),
            }
        }

        let points = vec![
            vfd("HAULAGE_AMPS", "Haulage Amps", "Haulage", "motorCurrent", "A"),
            vfd("HAULAGE_SPEED", "Haulage Speed", "Haulage", "motorSpeed", "rpm"),
            vfd("LEFT_CUTTER_AMPS", "Left Cutter Amps", "LeftCutter", "motorCurrent", "A"),
            vfd("RIGHT_CUTTER_AMPS", "Right Cutter Amps", "RightCutter", "motorCurrent", "A"),
            vfd("PUMP_AMPS", "Pump Amps", "Pump", "motorCurrent", "A"),
            io("LEFT_ARM_PRESSURE", "Left Ranging Arm Pressure", "LeftRangingArmPressure", Some("bar")),
            io("RIGHT_ARM_PRESSURE", "Right Ranging Arm Pressure", "RightRangingArmPressure", Some("bar")),
            io("JNA_CURRENT", "JNA Current", "JnaCurrent", Some("A")),
            io("WATER_FLOW", "Water Flow", "WaterFlow", Some("l/min")),
            io("EMERGENCY_STOP", "Emergency Stop", "EStopCircuit", None),
        ];
        let presets = vec![
            PresetGroup {
                id: "HAULAGE".into(),
                display_name: "Haulage".into(),
                points: vec!["HAULAGE_AMPS".into(), "HAULAGE_SPEED".into()],
                reference_limit: None,
            },
            PresetGroup {
                id: "CUTTERS".into(),
                display_name: "Cutter Motors".into(),
                points: vec!["LEFT_CUTTER_AMPS".into(), "RIGHT_CUTTER_AMPS".into()],
                reference_limit: Some("cutterAmpLimit".into()),
            },
            PresetGroup {
                id: "JNA".into(),
                display_name: "JNA".into(),
                points: vec!["JNA_CURRENT".into()],
                reference_limit: Some("jnaCurrentLimit".into()),
            },
        ];

        PointCatalog {
            points: points.into_iter().map(|p| (p.id.clone(), p)).collect(),
            presets: presets.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }
}
