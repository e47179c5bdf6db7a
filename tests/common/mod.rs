//! Fixture dumps: SQLite module databases and text dictionaries packed the way
//! the machine writes them (tar inside an LZ4 frame).

#![allow(dead_code)]

use std::{
    fs::{self, File},
    path::{Path, PathBuf},
    sync::Arc,
};

use ddt_lib::{NoProgress, Pipeline, PointCatalog, SessionContext, Settings};
use rusqlite::{params, Connection};
use serde_json::{json, Value};
use tempfile::TempDir;

pub const TIMEZONE_PARAMETER_TIDX: i64 = 77;
const T0: i64 = 1_700_000_000_000_000_000;

/// Nanosecond timestamp `seconds` after the fixture epoch.
pub fn ts(seconds: i64) -> i64 {
    T0 + seconds * 1_000_000_000
}

pub fn sample_table(conn: &Connection, table: &str) {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS \"{table}\" (
            SampleInfo_source_timestamp INTEGER,
            rti_json_sample TEXT
        )"
    ))
    .unwrap();
}

pub fn insert(conn: &Connection, table: &str, at: i64, sample: Value) {
    sample_table(conn, table);
    conn.execute(
        &format!("INSERT INTO \"{table}\" (SampleInfo_source_timestamp, rti_json_sample) VALUES (?1, ?2)"),
        params![at, sample.to_string()],
    )
    .unwrap();
}

/// Drive and IO configuration of the fixture machine, plus its identity.
/// `timezone` is the encoded `TimeZoneOffset` parameter, if any.
pub fn machine_config(conn: &Connection, timezone: Option<i64>) {
    for (id, name, active) in [
        (1, "Haulage", true),
        (2, "LeftCutter", true),
        (3, "RightCutter", true),
        (4, "Pump", false),
    ] {
        insert(
            conn,
            "VFDConfig@0",
            ts(0),
            json!({ "vfdId": id, "vfdName": name, "active": active }),
        );
    }
    for (id, name, io_type, active) in [
        (5, "WaterFlow", "J_IO_ANALOG_INPUT", true),
        (6, "JnaCurrent", "J_IO_ANALOG_INPUT", true),
        (7, "LeftRangingArmPressure", "J_IO_ANALOG_INPUT", false),
        (8, "EStopCircuit", "J_IO_SAFETY_LOOP", true),
    ] {
        insert(
            conn,
            "IOConfig@0",
            ts(0),
            json!({ "ioId": id, "ioName": name, "ioType": io_type, "active": active }),
        );
    }
    if let Some(encoded) = timezone {
        insert(
            conn,
            "ParConfig@0",
            ts(0),
            json!({ "parName": "TimeZoneOffset", "parNameTidx": TIMEZONE_PARAMETER_TIDX }),
        );
        insert(
            conn,
            "ParValue@0",
            ts(0),
            json!({ "parNameTidx": TIMEZONE_PARAMETER_TIDX, "value": { "longValue": encoded } }),
        );
    }
    insert(conn, "CCUSync@0", ts(0), json!({ "machineId": "FB20-0042" }));
}

/// Haulage current (`motorCurrent`) at each `(second, amps)`.
pub fn haulage(conn: &Connection, samples: &[(i64, f64)]) {
    for (second, amps) in samples {
        insert(
            conn,
            "VFDInfo@0",
            ts(*second),
            json!({ "vfdId": 1, "motorCurrent": amps, "motorSpeed": 1450 }),
        );
    }
}

pub fn drive(conn: &Connection, vfd_id: i64, samples: &[(i64, f64)]) {
    for (second, amps) in samples {
        insert(
            conn,
            "VFDInfo@0",
            ts(*second),
            json!({ "vfdId": vfd_id, "motorCurrent": amps }),
        );
    }
}

pub fn analog(conn: &Connection, io_id: i64, samples: &[(i64, f64)]) {
    for (second, value) in samples {
        insert(
            conn,
            "IOAnalogIn@0",
            ts(*second),
            json!({ "ioId": io_id, "value": value }),
        );
    }
}

pub fn incident(conn: &Connection, second: i64, code: Value, help: Option<i64>, args: Value) {
    insert(
        conn,
        "IncidentAll@0",
        ts(second),
        json!({
            "incidentTidx": code,
            "helpTidx": help,
            "type": "J_INCIDENT_ALARM",
            "state": "J_INCIDENT_SET",
            "args": args,
        }),
    );
}

pub fn default_catalog() -> Vec<(i64, &'static str)> {
    vec![
        (1001, "Haulage overload %d A"),
        (1002, "Left cutter motor hot"),
        (1003, "Login by User %d"),
        (1004, "%s tripped"),
        (2001, "&lt;p&gt;Reduce haulage speed&lt;/p&gt;&lt;p&gt;Check the &lt;b&gt;load&lt;/b&gt;&lt;/p&gt;"),
        (3001, "Water pump"),
    ]
}

/// Builds one dump archive from module databases and an optional catalog.
pub struct ArchiveBuilder {
    name: String,
    staging: PathBuf,
    members: Vec<String>,
}

impl ArchiveBuilder {
    pub fn new(work: &Path, name: &str) -> Self {
        let staging = work.join("fixtures").join(name);
        fs::create_dir_all(&staging).unwrap();
        Self {
            name: name.to_string(),
            staging,
            members: Vec::new(),
        }
    }

    pub fn module(mut self, file_name: &str, build: impl FnOnce(&Connection)) -> Self {
        let path = self.staging.join(file_name);
        let conn = Connection::open(&path).unwrap();
        conn.pragma_update(None, "user_version", 3).unwrap();
        build(&conn);
        conn.close().unwrap();
        self.members.push(file_name.to_string());
        self
    }

    pub fn catalog(mut self, entries: &[(i64, &str)]) -> Self {
        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<textDic>\n  <items>\n");
        for (index, text) in entries {
            xml.push_str(&format!(
                "    <item><index>{index}</index><text>{text}</text></item>\n"
            ));
        }
        xml.push_str("  </items>\n</textDic>\n");
        let file_name = "textDic_en.xml";
        fs::write(self.staging.join(file_name), xml).unwrap();
        self.members.push(file_name.to_string());
        self
    }

    pub fn users(self, users: &[(i64, &str)]) -> Self {
        let users: Vec<(i64, String)> = users.iter().map(|(id, login)| (*id, login.to_string())).collect();
        self.module("fbhmi.db", move |conn| {
            conn.execute_batch("CREATE TABLE fb_users (userId INTEGER, loginId TEXT, pin TEXT)")
                .unwrap();
            conn.execute_batch("CREATE TABLE screens (id INTEGER, title TEXT)").unwrap();
            for (id, login) in &users {
                conn.execute(
                    "INSERT INTO fb_users (userId, loginId, pin) VALUES (?1, ?2, '0000')",
                    params![id, login],
                )
                .unwrap();
            }
        })
    }

    /// Writes `<work>/<name>.tar.lz4`: a tar of every member inside an LZ4 frame.
    pub fn write(self) -> PathBuf {
        let archive = self
            .staging
            .parent()
            .and_then(Path::parent)
            .unwrap()
            .join(format!("{}.tar.lz4", self.name));
        let encoder = lz4_flex::frame::FrameEncoder::new(File::create(&archive).unwrap());
        let mut tar = tar::Builder::new(encoder);
        for member in &self.members {
            tar.append_path_with_name(self.staging.join(member), format!("dump/{member}"))
                .unwrap();
        }
        let encoder = tar.into_inner().unwrap();
        encoder.finish().unwrap();
        archive
    }
}

/// Archive with full configuration and haulage samples at `samples`.
pub fn haulage_archive(work: &Path, name: &str, timezone: Option<i64>, samples: &[(i64, f64)]) -> PathBuf {
    let samples = samples.to_vec();
    ArchiveBuilder::new(work, name)
        .module("FB20.DC.ccu.db", |conn| machine_config(conn, timezone))
        .module("FB20.DC.vfd.db", move |conn| haulage(conn, &samples))
        .catalog(&default_catalog())
        .write()
}

pub struct Harness {
    pub work: TempDir,
    pub pipeline: Pipeline,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    pub fn with_settings(settings: Settings) -> Self {
        Self::with(settings, PointCatalog::builtin())
    }

    pub fn with(settings: Settings, points: PointCatalog) -> Self {
        let work = tempfile::tempdir().unwrap();
        let settings = Arc::new(settings.with_output_root(work.path().join("out")));
        let session = SessionContext::create(settings, Arc::new(NoProgress)).unwrap();
        let pipeline = Pipeline::new(Arc::new(session), Arc::new(points));
        Self { work, pipeline }
    }

    pub fn path(&self) -> &Path {
        self.work.path()
    }

    pub fn session(&self) -> &SessionContext {
        self.pipeline.session()
    }
}
