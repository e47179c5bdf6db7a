//! Archive extraction: LZ4-framed tar dumps into per-archive directories.

mod catalog;
mod module;

pub use catalog::MetadataCatalog;
pub use module::ModuleDatabase;

use std::{
    fs::{self, File},
    io::{BufReader, Read},
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{DdtError, ExtractionError, Result};
use crate::progress::{ProgressSink, Stage, StageProgress};
use crate::session::SessionContext;
use crate::settings::Settings;
use crate::timezone::RawTimestamp;
use crate::{log_debug, log_info, log_warn};

const ENABLE_LOGS: bool = true;

const LZ4_FRAME_MAGIC: [u8; 4] = [0x04, 0x22, 0x4D, 0x18];
const USERS_TABLE: &str = "fb_users";

/// Everything one archive contributed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedArchive {
    pub archive: PathBuf,
    pub directory: PathBuf,
    /// Module databases in file-name order.
    pub modules: Vec<ModuleDatabase>,
    /// HMI database, merged only for its user table.
    pub user_database: Option<ModuleDatabase>,
    #[serde(skip)]
    pub catalog: Option<MetadataCatalog>,
    pub collection_period: Option<(RawTimestamp, RawTimestamp)>,
}

impl ExtractedArchive {
    pub fn name(&self) -> String {
        archive_name(&self.archive)
    }

    /// Module databases followed by the user database, in merge order.
    pub fn merge_sources(&self) -> impl Iterator<Item = &ModuleDatabase> {
        self.modules.iter().chain(self.user_database.iter())
    }
}

/// The extracted archives of a session plus their combined catalog.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub archives: Vec<ExtractedArchive>,
    pub catalog: MetadataCatalog,
}

pub struct ArchiveExtractor {
    settings: Arc<Settings>,
    target: PathBuf,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
}

impl ArchiveExtractor {
    pub fn new(session: &SessionContext) -> Self {
        Self {
            settings: session.settings_handle(),
            target: session.extraction_dir(),
            progress: session.progress_handle(),
            cancel: session.cancellation(),
        }
    }

    /// Extracts every archive in order and combines their catalogs. At least one
    /// archive must carry a catalog; archives disagreeing on a code are rejected.
    pub fn extract_all(&self, archives: &[PathBuf]) -> Result<Extraction> {
        let Some(first) = archives.first() else {
            return Err(DdtError::extraction(
                "(no archives)",
                ExtractionError::MissingModules(self.settings.module_file_marker.clone()),
            ));
        };

        let progress = StageProgress::new(self.progress.as_ref(), Stage::Extract, archives.len());
        let mut extracted = Vec::with_capacity(archives.len());
        let mut catalog = MetadataCatalog::new();
        let mut any_catalog = false;

        for (done, archive) in archives.iter().enumerate() {
            self.check_cancelled()?;
            progress.step(done, format!("Extracting {}", archive_name(archive)));

            let result = self.extract(done, archive)?;
            if let Some(archive_catalog) = result.catalog.clone() {
                catalog.absorb(archive_catalog)?;
                any_catalog = true;
            } else {
                log_warn!("{} carries no metadata catalog", archive.display());
            }
            extracted.push(result);
        }

        if !any_catalog {
            return Err(DdtError::extraction(
                first,
                ExtractionError::MissingCatalog(self.settings.catalog_file_marker.clone()),
            ));
        }

        progress.finish(format!("Extracted {} archive(s)", extracted.len()));
        Ok(Extraction {
            archives: extracted,
            catalog,
        })
    }

    /// Extracts the archive at position `ordinal` of the session into
    /// `<target>/<ordinal>-<archive name>`; the ordinal keeps same-named archives
    /// from different folders apart. The archive is first unpacked into a hidden
    /// staging directory that is removed on any failure, so a half-written
    /// directory is never visible under the final name. Extracting the same
    /// archive at the same position again replaces the previous output.
    pub fn extract(&self, ordinal: usize, archive: &Path) -> Result<ExtractedArchive> {
        let name = archive_name(archive);
        let directory_name = format!("{ordinal:03}-{name}");
        let staging = self.target.join(format!(".{directory_name}.partial"));
        let destination = self.target.join(&directory_name);

        log_info!("Extracting {} into {}", archive.display(), destination.display());

        let wrap = |err: ExtractionError| DdtError::extraction(archive, err);

        if staging.exists() {
            fs::remove_dir_all(&staging).map_err(|e| wrap(e.into()))?;
        }
        fs::create_dir_all(&staging).map_err(|e| wrap(e.into()))?;

        if let Err(err) = self.unpack(archive, &staging) {
            discard(&staging);
            return Err(match err {
                UnpackFailure::Cancelled => DdtError::Cancelled {
                    stage: Stage::Extract,
                },
                UnpackFailure::Extraction(err) => wrap(err),
            });
        }

        let members = match self.classify(&staging) {
            Ok(members) => members,
            Err(err) => {
                discard(&staging);
                return Err(wrap(err));
            }
        };

        if destination.exists() {
            fs::remove_dir_all(&destination).map_err(|e| wrap(e.into()))?;
        }
        fs::rename(&staging, &destination).map_err(|e| wrap(e.into()))?;

        match self.describe(archive, &destination, members) {
            Ok(extracted) => {
                log_info!(
                    "Extracted {} module database(s) from {}",
                    extracted.modules.len(),
                    name
                );
                Ok(extracted)
            }
            Err(err) => {
                discard(&destination);
                Err(err)
            }
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(DdtError::Cancelled {
                stage: Stage::Extract,
            });
        }
        Ok(())
    }

    fn unpack(&self, archive: &Path, staging: &Path) -> std::result::Result<(), UnpackFailure> {
        let mut file = File::open(archive).map_err(ExtractionError::from)?;
        let mut magic = [0u8; 6];
        let read = read_prefix(&mut file, &mut magic).map_err(ExtractionError::from)?;
        sniff_compression(&magic[..read])?;

        let file = File::open(archive).map_err(ExtractionError::from)?;
        let decoder = lz4_flex::frame::FrameDecoder::new(BufReader::new(file));
        let mut tar = tar::Archive::new(decoder);
        let corrupt = |err: std::io::Error| ExtractionError::Corrupt(err.to_string());

        for entry in tar.entries().map_err(corrupt)? {
            if self.cancel.is_cancelled() {
                return Err(UnpackFailure::Cancelled);
            }
            let mut entry = entry.map_err(corrupt)?;
            let path = entry.path().map_err(corrupt)?.into_owned();
            if path
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
            {
                return Err(ExtractionError::UnsafeEntry(path.display().to_string()).into());
            }
            log_debug!("  member {}", path.display());
            entry.unpack_in(staging).map_err(corrupt)?;
        }
        Ok(())
    }

    /// Finds module databases, the catalog and the HMI database among the unpacked
    /// files. Paths are relative to `root`.
    fn classify(&self, root: &Path) -> std::result::Result<Members, ExtractionError> {
        let mut files = Vec::new();
        collect_files(root, root, &mut files)?;
        files.sort();

        let mut members = Members::default();
        for relative in files {
            let Some(file_name) = relative.file_name().map(|n| n.to_string_lossy().into_owned())
            else {
                continue;
            };
            if file_name.contains(&self.settings.module_file_marker) {
                members.modules.push(relative);
            } else if file_name.contains(&self.settings.catalog_file_marker) {
                if members.catalog.is_none() {
                    members.catalog = Some(relative);
                } else {
                    log_warn!("Ignoring additional catalog member {}", relative.display());
                }
            } else if file_name.contains(&self.settings.user_database_marker) {
                members.user_database = Some(relative);
            }
        }

        if members.modules.is_empty() {
            return Err(ExtractionError::MissingModules(
                self.settings.module_file_marker.clone(),
            ));
        }
        Ok(members)
    }

    fn describe(&self, archive: &Path, directory: &Path, members: Members) -> Result<ExtractedArchive> {
        let wrap = |err: ExtractionError| DdtError::extraction(archive, err);

        let catalog = members
            .catalog
            .map(|relative| MetadataCatalog::load(&directory.join(relative)))
            .transpose()
            .map_err(wrap)?;

        let mut modules = Vec::with_capacity(members.modules.len());
        for relative in &members.modules {
            let path = directory.join(relative);
            let module = ModuleDatabase::inspect(&path).map_err(|err| {
                wrap(ExtractionError::Corrupt(format!("{}: {err}", path.display())))
            })?;
            modules.push(module);
        }

        let user_database = match members.user_database {
            Some(relative) => {
                let path = directory.join(relative);
                match ModuleDatabase::inspect(&path) {
                    Ok(module) => Some(module.retain_tables(&[USERS_TABLE])),
                    Err(err) => {
                        log_warn!("Skipping unreadable HMI database {}: {err}", path.display());
                        None
                    }
                }
            }
            None => None,
        };

        let first = modules.iter().filter_map(|m| m.first_timestamp).min();
        let last = modules.iter().filter_map(|m| m.last_timestamp).max();

        Ok(ExtractedArchive {
            archive: archive.to_path_buf(),
            directory: directory.to_path_buf(),
            modules,
            user_database,
            catalog,
            collection_period: first.zip(last),
        })
    }
}

#[derive(Default)]
struct Members {
    modules: Vec<PathBuf>,
    catalog: Option<PathBuf>,
    user_database: Option<PathBuf>,
}

enum UnpackFailure {
    Cancelled,
    Extraction(ExtractionError),
}

impl From<ExtractionError> for UnpackFailure {
    fn from(err: ExtractionError) -> Self {
        UnpackFailure::Extraction(err)
    }
}

fn archive_name(archive: &Path) -> String {
    archive
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string())
}

fn discard(dir: &Path) {
    if let Err(err) = fs::remove_dir_all(dir) {
        log_warn!("Failed to remove {}: {err}", dir.display());
    }
}

fn read_prefix(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

/// Only LZ4 frames are accepted; other well-known containers get a precise error.
fn sniff_compression(prefix: &[u8]) -> std::result::Result<(), ExtractionError> {
    if prefix.starts_with(&LZ4_FRAME_MAGIC) {
        return Ok(());
    }
    let variant = match prefix {
        [0x1F, 0x8B, ..] => "gzip",
        [0x28, 0xB5, 0x2F, 0xFD, ..] => "zstd",
        [0x42, 0x5A, 0x68, ..] => "bzip2",
        [0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00] => "xz",
        [0x02, 0x21, 0x4C, 0x18, ..] => "legacy lz4",
        [0x50, 0x4B, 0x03, 0x04, ..] => "zip",
        _ => {
            return Err(ExtractionError::Corrupt(
                "unrecognised archive header".to_string(),
            ))
        }
    };
    Err(ExtractionError::UnsupportedCompression(variant))
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_files(root, &path, out)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            out.push(relative.to_path_buf());
        }
    }
    Ok(())
}
