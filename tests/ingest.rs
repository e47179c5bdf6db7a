mod common;

use std::{fs, sync::Arc};

use common::*;
use ddt_lib::{
    BatchMode, ConflictPolicy, DdtError, ExtractionError, NoProgress, Pipeline, PointCatalog,
    SessionContext, Settings, Stage, TimeRange,
};
use rusqlite::Connection;

async fn haulage_values(pipeline: &Pipeline) -> Vec<(i64, f64)> {
    pipeline.resolve_timezone().await.unwrap();
    let outcome = pipeline
        .point_engine()
        .unwrap()
        .query(["HAULAGE_AMPS"], TimeRange::all(), BatchMode::AllOrNothing)
        .await
        .unwrap();
    outcome.series["HAULAGE_AMPS"]
        .samples
        .iter()
        .map(|s| (s.timestamp.as_nanos(), s.value))
        .collect()
}

fn merged_rows(path: &std::path::Path, table: &str) -> i64 {
    let conn = Connection::open(path).unwrap();
    conn.query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| row.get(0))
        .unwrap()
}

#[tokio::test]
async fn overlapping_archives_keep_the_last_contribution() {
    let harness = Harness::new();
    let a = haulage_archive(harness.path(), "a", Some(0), &[(100, 10.0), (200, 20.0), (300, 30.0)]);
    let b = haulage_archive(harness.path(), "b", Some(0), &[(300, 35.0), (400, 40.0)]);

    let dataset = harness.pipeline.ingest(vec![a, b]).await.unwrap();
    assert_eq!(dataset.archives(), ["a.tar.lz4", "b.tar.lz4"]);

    let values = haulage_values(&harness.pipeline).await;
    assert_eq!(
        values,
        vec![(ts(100), 10.0), (ts(200), 20.0), (ts(300), 35.0), (ts(400), 40.0)]
    );
}

#[tokio::test]
async fn same_named_archives_from_different_folders_both_contribute() {
    let harness = Harness::new();
    let first = haulage_archive(&harness.path().join("usb1"), "dump", Some(0), &[(100, 10.0), (200, 20.0)]);
    let second = haulage_archive(&harness.path().join("usb2"), "dump", Some(0), &[(300, 30.0), (400, 40.0)]);

    let dataset = harness.pipeline.ingest(vec![first, second]).await.unwrap();
    assert_eq!(dataset.archives(), ["dump.tar.lz4", "dump.tar.lz4"]);

    let directories: Vec<_> = dataset.sources().iter().map(|s| s.path.parent().unwrap().to_path_buf()).collect();
    assert_ne!(directories.first(), directories.last());

    let values = haulage_values(&harness.pipeline).await;
    assert_eq!(
        values,
        vec![(ts(100), 10.0), (ts(200), 20.0), (ts(300), 30.0), (ts(400), 40.0)]
    );
}

#[tokio::test]
async fn string_channel_ids_resolve_like_numbers() {
    let harness = Harness::new();
    let archive = ArchiveBuilder::new(harness.path(), "strings")
        .module("FB20.DC.ccu.db", |conn| {
            machine_config(conn, Some(0));
            insert(
                conn,
                "VFDConfig@0",
                ts(10),
                serde_json::json!({ "vfdId": "1", "vfdName": "Haulage", "active": true }),
            );
            insert(
                conn,
                "IOConfig@0",
                ts(10),
                serde_json::json!({ "ioId": "5", "ioName": "WaterFlow", "ioType": "J_IO_ANALOG_INPUT", "active": true }),
            );
        })
        .module("FB20.DC.vfd.db", |conn| {
            insert(conn, "VFDInfo@0", ts(100), serde_json::json!({ "vfdId": "1", "motorCurrent": 11.0 }));
            insert(conn, "VFDInfo@0", ts(200), serde_json::json!({ "vfdId": 1, "motorCurrent": 22.0 }));
            insert(conn, "IOAnalogIn@0", ts(150), serde_json::json!({ "ioId": "5", "value": 3.5 }));
        })
        .catalog(&default_catalog())
        .write();

    harness.pipeline.ingest(vec![archive]).await.unwrap();
    assert_eq!(
        haulage_values(&harness.pipeline).await,
        vec![(ts(100), 11.0), (ts(200), 22.0)]
    );

    let outcome = harness
        .pipeline
        .point_engine()
        .unwrap()
        .query(["WATER_FLOW"], TimeRange::all(), BatchMode::AllOrNothing)
        .await
        .unwrap();
    let flow: Vec<f64> = outcome.series["WATER_FLOW"].samples.iter().map(|s| s.value).collect();
    assert_eq!(flow, vec![3.5]);
}

#[tokio::test]
async fn first_contributor_policy_keeps_the_earlier_value() {
    let harness = Harness::with_settings(Settings {
        conflict_policy: ConflictPolicy::FirstContributorWins,
        ..Settings::default()
    });
    let a = haulage_archive(harness.path(), "a", Some(0), &[(100, 10.0), (300, 30.0)]);
    let b = haulage_archive(harness.path(), "b", Some(0), &[(300, 35.0), (400, 40.0)]);

    harness.pipeline.ingest(vec![a, b]).await.unwrap();
    let values = haulage_values(&harness.pipeline).await;
    assert_eq!(values, vec![(ts(100), 10.0), (ts(300), 30.0), (ts(400), 40.0)]);
}

#[tokio::test]
async fn merging_the_same_archive_twice_adds_nothing() {
    let harness = Harness::new();
    let a = haulage_archive(harness.path(), "a", Some(0), &[(100, 10.0), (200, 20.0), (300, 30.0)]);

    let dataset = harness.pipeline.ingest(vec![a.clone(), a]).await.unwrap();
    assert_eq!(dataset.sources().len(), 4);
    assert_eq!(merged_rows(dataset.path(), "VFDInfo@0"), 3);
    assert_eq!(merged_rows(dataset.path(), "VFDConfig@0"), 4);
    assert_eq!(haulage_values(&harness.pipeline).await.len(), 3);
}

#[tokio::test]
async fn sources_are_recorded_in_merge_order() {
    let harness = Harness::new();
    let a = ArchiveBuilder::new(harness.path(), "a")
        .module("FB20.DC.ccu.db", |conn| machine_config(conn, Some(800)))
        .module("FB20.DC.vfd.db", |conn| haulage(conn, &[(10, 1.0), (20, 2.0)]))
        .catalog(&default_catalog())
        .users(&[(3, "jsmith")])
        .write();

    let dataset = harness.pipeline.ingest(vec![a]).await.unwrap();
    let modules: Vec<&str> = dataset.sources().iter().map(|s| s.module_id.as_str()).collect();
    assert_eq!(modules, ["FB20.DC.ccu.db", "FB20.DC.vfd.db", "fbhmi.db"]);
    assert_eq!(dataset.sources()[1].first_timestamp.map(|t| t.as_nanos()), Some(ts(10)));
    assert_eq!(dataset.sources()[1].schema_version, 3);

    // Only the user table of the HMI database is merged.
    let conn = Connection::open(dataset.path()).unwrap();
    let screens: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE name = 'screens'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(screens, 0);
    assert_eq!(merged_rows(dataset.path(), "fb_users"), 1);
}

#[tokio::test]
async fn schema_conflicts_abort_without_a_dataset() {
    let harness = Harness::new();
    let a = haulage_archive(harness.path(), "a", Some(0), &[(100, 10.0)]);
    let b = ArchiveBuilder::new(harness.path(), "b")
        .module("FB20.DC.vfd.db", |conn| {
            conn.execute_batch(
                "CREATE TABLE \"VFDInfo@0\" (
                    SampleInfo_source_timestamp INTEGER,
                    rti_json_sample TEXT,
                    SampleInfo_reception_timestamp INTEGER
                )",
            )
            .unwrap();
        })
        .catalog(&default_catalog())
        .write();

    let err = harness.pipeline.ingest(vec![a, b]).await.unwrap_err();
    match &err {
        DdtError::SchemaConflict { table, module, .. } => {
            assert_eq!(table, "VFDInfo@0");
            assert_eq!(module, "FB20.DC.vfd.db");
        }
        other => panic!("expected a schema conflict, got {other:?}"),
    }
    assert_eq!(err.stage(), Stage::Merge);

    let session = harness.session();
    assert!(!session.merged_path().exists());
    assert!(!session.partial_merged_path().exists());
    assert!(matches!(session.dataset(), Err(DdtError::DatasetNotReady(_))));
}

#[tokio::test]
async fn unsupported_compression_is_reported_per_archive() {
    let harness = Harness::new();
    let gzip = harness.path().join("dump.tar.gz");
    fs::write(&gzip, [0x1F, 0x8B, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00]).unwrap();

    let err = harness.pipeline.ingest(vec![gzip.clone()]).await.unwrap_err();
    match err {
        DdtError::Extraction {
            archive,
            source: ExtractionError::UnsupportedCompression(variant),
        } => {
            assert_eq!(archive, gzip);
            assert_eq!(variant, "gzip");
        }
        other => panic!("expected unsupported compression, got {other:?}"),
    }

    let extracted = harness.session().extraction_dir();
    let leftovers = fs::read_dir(&extracted).map(|dir| dir.count()).unwrap_or(0);
    assert_eq!(leftovers, 0);
    assert!(!harness.session().merged_path().exists());
}

#[tokio::test]
async fn truncated_frames_are_corrupt() {
    let harness = Harness::new();
    let good = haulage_archive(harness.path(), "a", Some(0), &[(100, 10.0)]);
    let bytes = fs::read(&good).unwrap();
    let truncated = harness.path().join("cut.tar.lz4");
    fs::write(&truncated, &bytes[..bytes.len() / 2]).unwrap();

    let err = harness.pipeline.ingest(vec![truncated]).await.unwrap_err();
    assert!(matches!(
        err,
        DdtError::Extraction {
            source: ExtractionError::Corrupt(_),
            ..
        }
    ));
}

#[tokio::test]
async fn archives_need_modules_and_a_catalog() {
    let harness = Harness::new();
    let only_catalog = ArchiveBuilder::new(harness.path(), "texts")
        .catalog(&default_catalog())
        .write();
    let err = harness.pipeline.ingest(vec![only_catalog]).await.unwrap_err();
    assert!(matches!(
        err,
        DdtError::Extraction {
            source: ExtractionError::MissingModules(_),
            ..
        }
    ));

    let no_catalog = ArchiveBuilder::new(harness.path(), "bare")
        .module("FB20.DC.vfd.db", |conn| haulage(conn, &[(1, 1.0)]))
        .write();
    let err = harness.pipeline.ingest(vec![no_catalog]).await.unwrap_err();
    assert!(matches!(
        err,
        DdtError::Extraction {
            source: ExtractionError::MissingCatalog(_),
            ..
        }
    ));
}

#[tokio::test]
async fn disagreeing_catalogs_are_rejected() {
    let harness = Harness::new();
    let a = haulage_archive(harness.path(), "a", Some(0), &[(100, 10.0)]);
    let b = ArchiveBuilder::new(harness.path(), "b")
        .module("FB20.DC.vfd.db", |conn| haulage(conn, &[(200, 20.0)]))
        .catalog(&[(1001, "Haulage overload")])
        .write();

    let err = harness.pipeline.ingest(vec![a, b]).await.unwrap_err();
    assert!(matches!(err, DdtError::CatalogConflict { ref code, .. } if code == "1001"));
}

#[tokio::test]
async fn completed_merge_is_reused_by_a_later_session() {
    let harness = Harness::new();
    let a = haulage_archive(harness.path(), "a", Some(0), &[(100, 10.0), (200, 20.0)]);
    let first = harness.pipeline.ingest(vec![a]).await.unwrap();
    let run_dir = harness.session().run_dir().to_path_buf();
    let created_at = first.created_at();
    drop(first);

    let session = SessionContext::open(
        &run_dir,
        harness.session().settings_handle(),
        Arc::new(NoProgress),
    )
    .unwrap();
    let pipeline = Pipeline::new(Arc::new(session), Arc::new(PointCatalog::builtin()));

    // No archives: anything but reuse would fail extraction.
    let reused = pipeline.ingest(Vec::new()).await.unwrap();
    assert_eq!(reused.created_at(), created_at);
    assert_eq!(reused.sources().len(), 2);
    assert_eq!(haulage_values(&pipeline).await.len(), 2);
}

#[tokio::test]
async fn queries_before_ingest_are_not_ready() {
    let harness = Harness::new();
    assert!(matches!(
        harness.pipeline.point_engine(),
        Err(DdtError::DatasetNotReady(_))
    ));
    assert!(matches!(
        harness.pipeline.incident_log().await,
        Err(DdtError::DatasetNotReady(_))
    ));
    assert!(matches!(
        harness.pipeline.resolve_timezone().await,
        Err(DdtError::DatasetNotReady(_))
    ));
    assert!(harness.pipeline.resume().await.unwrap().is_none());
}

#[tokio::test]
async fn cancelled_ingest_leaves_no_dataset_until_cleared() {
    let harness = Harness::new();
    let a = haulage_archive(harness.path(), "a", Some(0), &[(100, 10.0)]);

    harness.session().cancel();
    let err = harness.pipeline.ingest(vec![a.clone()]).await.unwrap_err();
    assert!(matches!(err, DdtError::Cancelled { stage: Stage::Extract }));
    assert!(!harness.session().merged_path().exists());
    assert!(!harness.session().has_dataset());

    harness.session().clear_outputs().unwrap();
    assert!(!harness.session().is_cancelled());
    harness.pipeline.ingest(vec![a]).await.unwrap();
    assert!(harness.session().has_dataset());
}

#[tokio::test]
async fn clearing_outputs_allows_a_different_run() {
    let harness = Harness::new();
    let a = haulage_archive(harness.path(), "a", Some(0), &[(100, 10.0)]);
    let b = haulage_archive(harness.path(), "b", Some(0), &[(500, 50.0), (600, 60.0)]);

    harness.pipeline.ingest(vec![a]).await.unwrap();
    // Without clearing, the existing dataset wins.
    let same = harness.pipeline.ingest(vec![b.clone()]).await.unwrap();
    assert_eq!(same.archives(), ["a.tar.lz4"]);
    drop(same);

    harness.session().clear_outputs().unwrap();
    assert!(!harness.session().extraction_dir().exists());
    let fresh = harness.pipeline.ingest(vec![b]).await.unwrap();
    assert_eq!(fresh.archives(), ["b.tar.lz4"]);
    assert_eq!(
        haulage_values(&harness.pipeline).await,
        vec![(ts(500), 50.0), (ts(600), 60.0)]
    );
}

#[tokio::test]
async fn re_extraction_is_byte_identical() {
    let harness = Harness::new();
    let a = haulage_archive(harness.path(), "a", Some(0), &[(100, 10.0)]);
    let extractor = ddt_lib::ArchiveExtractor::new(harness.session());

    let first = extractor.extract(0, &a).unwrap();
    let module = first.modules[0].path.clone();
    let before = fs::read(&module).unwrap();

    let second = extractor.extract(0, &a).unwrap();
    assert_eq!(second.directory, first.directory);
    assert_eq!(fs::read(&module).unwrap(), before);
    assert!(second.catalog.is_some());
}
