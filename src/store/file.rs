//! Directory-backed [`ObjectStore`].
//!
//! # Layout
//!
//! ```text
//! <root>/docs/<hex(content-path)>/
//! ├── versions/00000001.json     ← immutable version payloads
//! ├── statuses.json              ← { "<version id>": "<status>" } overlay
//! ├── branches/<branch-id>.json
//! └── merge-requests/<id>.json
//! ```
//!
//! Version files are written once and never touched again; status changes
//! go to the per-path `statuses.json` overlay, which is replaced in a single
//! atomic rename so a batch lands all-or-nothing.
//!
//! Every write goes to a temp file in the destination directory, is fsynced,
//! then renamed over the target. Appends and head CAS are serialised by one
//! in-process mutex; two processes sharing a root are not coordinated.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{ObjectStore, StoreError};
use crate::error::EntityKind;
use crate::model::branch::{Branch, MergeRequest};
use crate::model::types::{BranchId, ContentPath, MergeRequestId, VersionId};
use crate::model::version::{Version, VersionStatus};

const DOCS_DIR: &str = "docs";
const VERSIONS_DIR: &str = "versions";
const BRANCHES_DIR: &str = "branches";
const MERGE_REQUESTS_DIR: &str = "merge-requests";
const STATUSES_FILE: &str = "statuses.json";

/// JSON documents under a root directory.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open (creating if necessary) a store rooted at `root`.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        let docs = root.join(DOCS_DIR);
        fs::create_dir_all(&docs).map_err(|e| io_err(&docs, e))?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn doc_dir(&self, path: &ContentPath) -> PathBuf {
        self.root.join(DOCS_DIR).join(encode_path(path))
    }

    fn version_file(&self, path: &ContentPath, number: u64) -> PathBuf {
        self.doc_dir(path)
            .join(VERSIONS_DIR)
            .join(format!("{number:08}.json"))
    }

    fn statuses(&self, path: &ContentPath) -> Result<BTreeMap<VersionId, VersionStatus>, StoreError> {
        Ok(read_json(&self.doc_dir(path).join(STATUSES_FILE))?.unwrap_or_default())
    }

    fn version_count(&self, path: &ContentPath) -> Result<u64, StoreError> {
        Ok(json_files(&self.doc_dir(path).join(VERSIONS_DIR))?.len() as u64)
    }

    /// Find the record `<doc>/<sub>/<name>.json` in whichever document has it.
    fn locate(&self, sub: &str, name: &str) -> Result<Option<PathBuf>, StoreError> {
        let docs = self.root.join(DOCS_DIR);
        for doc in subdirs(&docs)? {
            let candidate = doc.join(sub).join(format!("{name}.json"));
            if candidate.is_file() {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }
}

impl ObjectStore for FileStore {
    fn append_version(&self, version: &Version) -> Result<(), StoreError> {
        let _guard = self.lock();
        let expected = self.version_count(&version.path)? + 1;
        if version.number != expected {
            return Err(StoreError::NonDenseVersion {
                path: version.path.clone(),
                expected,
                got: version.number,
            });
        }
        // Status lives in the overlay; the payload keeps its creation status.
        write_json(&self.version_file(&version.path, version.number), version)
    }

    fn load_versions(&self, path: &ContentPath) -> Result<Vec<Version>, StoreError> {
        let statuses = self.statuses(path)?;
        let mut out = Vec::new();
        for file in json_files(&self.doc_dir(path).join(VERSIONS_DIR))? {
            let Some(mut v) = read_json::<Version>(&file)? else {
                continue;
            };
            if let Some(status) = statuses.get(&v.id) {
                v.status = *status;
            }
            out.push(v);
        }
        out.sort_by_key(|v| v.number);
        for (i, v) in out.iter().enumerate() {
            if v.number != i as u64 + 1 {
                return Err(StoreError::Corrupt {
                    location: self.doc_dir(path).display().to_string(),
                    detail: format!("version numbers have a gap before {}", v.number),
                });
            }
        }
        Ok(out)
    }

    fn load_version(
        &self,
        path: &ContentPath,
        id: VersionId,
    ) -> Result<Option<Version>, StoreError> {
        // Ids coincide with dense numbers.
        let Some(mut v) = read_json::<Version>(&self.version_file(path, id.get()))? else {
            return Ok(None);
        };
        if v.id != id {
            return Ok(None);
        }
        if let Some(status) = self.statuses(path)?.get(&id) {
            v.status = *status;
        }
        Ok(Some(v))
    }

    fn set_statuses(
        &self,
        path: &ContentPath,
        updates: &[(VersionId, VersionStatus)],
    ) -> Result<(), StoreError> {
        let _guard = self.lock();
        let count = self.version_count(path)?;
        for (id, _) in updates {
            if id.get() == 0 || id.get() > count {
                return Err(StoreError::Missing {
                    kind: EntityKind::Version,
                    id: id.to_string(),
                });
            }
        }
        let mut statuses = self.statuses(path)?;
        for (id, status) in updates {
            statuses.insert(*id, *status);
        }
        write_json(&self.doc_dir(path).join(STATUSES_FILE), &statuses)
    }

    fn upsert_branch(&self, branch: &Branch) -> Result<(), StoreError> {
        let _guard = self.lock();
        let file = self
            .doc_dir(&branch.path)
            .join(BRANCHES_DIR)
            .join(format!("{}.json", branch.id));
        write_json(&file, branch)
    }

    fn load_branch(&self, id: &BranchId) -> Result<Option<Branch>, StoreError> {
        match self.locate(BRANCHES_DIR, id.as_str())? {
            Some(file) => read_json(&file),
            None => Ok(None),
        }
    }

    fn list_branches(&self, path: &ContentPath) -> Result<Vec<Branch>, StoreError> {
        let mut out: Vec<Branch> = Vec::new();
        for file in json_files(&self.doc_dir(path).join(BRANCHES_DIR))? {
            if let Some(b) = read_json(&file)? {
                out.push(b);
            }
        }
        out.sort_by(|a, b| {
            (a.created_at_ms, a.name.as_str()).cmp(&(b.created_at_ms, b.name.as_str()))
        });
        Ok(out)
    }

    fn compare_and_swap_head(
        &self,
        path: &ContentPath,
        branch: &BranchId,
        expected: VersionId,
        new: VersionId,
    ) -> Result<(), StoreError> {
        let _guard = self.lock();
        let file = self
            .doc_dir(path)
            .join(BRANCHES_DIR)
            .join(format!("{branch}.json"));
        let mut record: Branch = read_json(&file)?.ok_or_else(|| StoreError::Missing {
            kind: EntityKind::Branch,
            id: branch.to_string(),
        })?;
        if record.head != expected {
            return Err(StoreError::CasMismatch {
                branch: branch.clone(),
                expected,
                actual: record.head,
            });
        }
        record.head = new;
        write_json(&file, &record)
    }

    fn put_merge_request(&self, request: &MergeRequest) -> Result<(), StoreError> {
        let _guard = self.lock();
        let file = self
            .doc_dir(&request.path)
            .join(MERGE_REQUESTS_DIR)
            .join(format!("{}.json", request.id));
        write_json(&file, request)
    }

    fn load_merge_request(
        &self,
        id: &MergeRequestId,
    ) -> Result<Option<MergeRequest>, StoreError> {
        match self.locate(MERGE_REQUESTS_DIR, id.as_str())? {
            Some(file) => read_json(&file),
            None => Ok(None),
        }
    }

    fn list_merge_requests(&self, path: &ContentPath) -> Result<Vec<MergeRequest>, StoreError> {
        let mut out: Vec<MergeRequest> = Vec::new();
        for file in json_files(&self.doc_dir(path).join(MERGE_REQUESTS_DIR))? {
            if let Some(r) = read_json(&file)? {
                out.push(r);
            }
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    fn list_paths(&self) -> Result<Vec<ContentPath>, StoreError> {
        let mut out = Vec::new();
        for doc in subdirs(&self.root.join(DOCS_DIR))? {
            let Some(name) = doc.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let path = decode_path(name).ok_or_else(|| StoreError::Corrupt {
                location: doc.display().to_string(),
                detail: "directory name is not a hex-encoded content path".to_owned(),
            })?;
            if !json_files(&doc.join(VERSIONS_DIR))?.is_empty() {
                out.push(path);
            }
        }
        out.sort();
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn io_err(location: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        location: location.display().to_string(),
        source,
    }
}

/// Hex-encode a content path so it is a single safe directory name.
fn encode_path(path: &ContentPath) -> String {
    let mut out = String::with_capacity(path.as_str().len() * 2);
    for b in path.as_str().bytes() {
        let _ = write!(out, "{b:02x}");
    }
    out
}

fn decode_path(name: &str) -> Option<ContentPath> {
    if name.len() % 2 != 0 {
        return None;
    }
    let bytes: Option<Vec<u8>> = (0..name.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(name.get(i..i + 2)?, 16).ok())
        .collect();
    let s = String::from_utf8(bytes?).ok()?;
    ContentPath::new(&s).ok()
}

/// Write `value` as pretty JSON to `path` via temp file + fsync + rename.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| StoreError::Serialize {
        location: path.display().to_string(),
        detail: e.to_string(),
    })?;
    let dir = path.parent().ok_or_else(|| StoreError::Corrupt {
        location: path.display().to_string(),
        detail: "no parent directory".to_owned(),
    })?;
    fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| io_err(dir, e))?;
    tmp.write_all(&json).map_err(|e| io_err(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| io_err(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| io_err(path, e.error))?;
    Ok(())
}

/// Read JSON from `path`; a missing file is `Ok(None)`.
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| StoreError::Serialize {
            location: path.display().to_string(),
            detail: e.to_string(),
        })
}

/// `*.json` files directly inside `dir` (none if `dir` is missing).
fn json_files(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err(dir, e)),
    };
    let mut out = Vec::new();
    for entry in entries {
        let p = entry.map_err(|e| io_err(dir, e))?.path();
        if p.extension().is_some_and(|ext| ext == "json") && p.is_file() {
            out.push(p);
        }
    }
    out.sort();
    Ok(out)
}

fn subdirs(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err(dir, e)),
    };
    let mut out = Vec::new();
    for entry in entries {
        let p = entry.map_err(|e| io_err(dir, e))?.path();
        if p.is_dir() {
            out.push(p);
        }
    }
    out.sort();
    Ok(out)
}
