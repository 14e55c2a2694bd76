//! Per-source document store on the local filesystem.
//!
//! Each source owns one directory under the database root, named by its
//! zero-padded id. The directory holds the discovery index
//! (`documents.json`, a pretty-printed map keyed by href) and the document
//! tree `<kind>/<year>/<number[_suffix]>.html.gz`, derived from each
//! document's URL by the source's path extractors. Stored files are never
//! mutated after download.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;

use crate::models::DocumentIndexEntry;
use crate::sources::{DbReference, SourceError};

const INDEX_FILE: &str = "documents.json";
const DIR_MODE: u32 = 0o700;
const FILE_MODE: u32 = 0o600;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid index {0}: {1}")]
    BadIndex(PathBuf, serde_json::Error),
    #[error(transparent)]
    Source(#[from] SourceError),
}

pub struct FileStore {
    db: &'static DbReference,
    root: PathBuf,
}

impl FileStore {
    pub fn new(db_root: &Path, db: &'static DbReference) -> Self {
        Self {
            db,
            root: db_root.join(format!("{:03}", db.id)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    /// Absolute path a document href maps to.
    pub fn document_path(&self, href: &str) -> Result<PathBuf, StoreError> {
        Ok(self.root.join(self.db.doc_path(href)?.relative()))
    }

    /// Load the discovery index; absent file means an empty index. A file
    /// that exists but fails to parse is surfaced unchanged for the caller
    /// to decide between failing and discarding.
    pub fn load_index(&self) -> Result<BTreeMap<String, DocumentIndexEntry>, StoreError> {
        let path = self.index_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&raw).map_err(|e| StoreError::BadIndex(path, e))
    }

    /// Insert entries whose href is not yet indexed. Returns how many were
    /// new. The index is rewritten atomically unless `dry_run`.
    pub fn upsert(
        &self,
        entries: &[DocumentIndexEntry],
        dry_run: bool,
    ) -> Result<usize, StoreError> {
        let mut index = self.load_index()?;
        let mut inserted = 0;
        for entry in entries {
            if !index.contains_key(&entry.href) {
                index.insert(entry.href.clone(), entry.clone());
                inserted += 1;
            }
        }

        if !dry_run && inserted > 0 {
            self.write_index(&index)?;
        }
        Ok(inserted)
    }

    fn write_index(&self, index: &BTreeMap<String, DocumentIndexEntry>) -> Result<(), StoreError> {
        create_dir_private(&self.root)?;
        let path = self.index_path();
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(index)
            .map_err(|e| StoreError::BadIndex(path.clone(), e))?;
        {
            let mut file = open_private(&tmp)?;
            file.write_all(body.as_bytes())?;
            file.write_all(b"\n")?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Indexed hrefs with no local copy yet, lexicographically ordered.
    pub fn missing_documents(&self) -> Result<Vec<String>, StoreError> {
        self.partition_documents(false)
    }

    /// Indexed hrefs whose document file exists locally.
    pub fn existing_documents(&self) -> Result<Vec<String>, StoreError> {
        self.partition_documents(true)
    }

    fn partition_documents(&self, want_existing: bool) -> Result<Vec<String>, StoreError> {
        let index = self.load_index()?;
        let mut hrefs = Vec::new();
        for href in index.keys() {
            let exists = self.document_path(href)?.is_file();
            if exists == want_existing {
                hrefs.push(href.clone());
            }
        }
        Ok(hrefs)
    }

    /// Store a document body gzip-compressed at its derived path.
    pub fn save_document(&self, href: &str, body: &[u8]) -> Result<PathBuf, StoreError> {
        let path = self.document_path(href)?;
        if let Some(parent) = path.parent() {
            create_dir_private(parent)?;
        }

        let file = open_private(&path)?;
        let mut encoder = GzEncoder::new(file, Compression::best());
        encoder.write_all(body)?;
        encoder.finish()?;
        Ok(path)
    }

    /// Open a stored document; the reader decompresses transparently and
    /// closes the underlying file when dropped.
    pub fn get_document(&self, href: &str) -> Result<impl Read, StoreError> {
        let path = self.document_path(href)?;
        Ok(GzDecoder::new(File::open(path)?))
    }
}

fn create_dir_private(path: &Path) -> std::io::Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(DIR_MODE);
    }
    builder.create(path)
}

fn open_private(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(FILE_MODE);
    }
    options.open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources;

    fn entry(href: &str, title: &str) -> DocumentIndexEntry {
        DocumentIndexEntry {
            href: href.to_string(),
            title: title.to_string(),
            subtitle: String::new(),
        }
    }

    fn store(dir: &Path) -> FileStore {
        FileStore::new(dir, sources::find("Maldonado").unwrap())
    }

    const HREF: &str = "https://www.impo.com.uy/bases/notificaciones-maldonado/488-2025";

    #[test]
    fn test_upsert_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let entries = vec![
            entry(HREF, "Notificación 488/025"),
            entry(
                "https://www.impo.com.uy/bases/notificaciones-maldonado/489-2025",
                "Notificación 489/025",
            ),
        ];

        assert_eq!(store.upsert(&entries, false).unwrap(), 2);
        assert_eq!(store.upsert(&entries, false).unwrap(), 0);

        let index = store.load_index().unwrap();
        assert_eq!(index.len(), 2);
        assert!(index.contains_key(HREF));
    }

    #[test]
    fn test_upsert_dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        assert_eq!(store.upsert(&[entry(HREF, "t")], true).unwrap(), 1);
        assert!(!store.root().join(INDEX_FILE).exists());
    }

    #[test]
    fn test_index_is_pretty_printed() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.upsert(&[entry(HREF, "t")], false).unwrap();

        let raw = fs::read_to_string(store.root().join(INDEX_FILE)).unwrap();
        assert!(raw.contains("\n  \""), "expected 2-space indentation");
    }

    #[test]
    fn test_corrupt_index_surfaces_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        fs::create_dir_all(store.root()).unwrap();
        fs::write(store.root().join(INDEX_FILE), "{not json").unwrap();

        assert!(matches!(
            store.load_index(),
            Err(StoreError::BadIndex(_, _))
        ));
    }

    #[test]
    fn test_save_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let body = "<html><body>Notificación Nº 488/025</body></html>";

        let path = store.save_document(HREF, body.as_bytes()).unwrap();
        assert!(path.ends_with("notificaciones/2025/488.html.gz"));

        let mut read_back = String::new();
        store
            .get_document(HREF)
            .unwrap()
            .read_to_string(&mut read_back)
            .unwrap();
        assert_eq!(read_back, body);
    }

    #[test]
    fn test_missing_and_existing_partition() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let other = "https://www.impo.com.uy/bases/notificaciones-maldonado/489-2025";
        store
            .upsert(&[entry(HREF, "a"), entry(other, "b")], false)
            .unwrap();
        store.save_document(HREF, b"<html></html>").unwrap();

        assert_eq!(store.missing_documents().unwrap(), vec![other.to_string()]);
        assert_eq!(store.existing_documents().unwrap(), vec![HREF.to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn test_private_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let path = store.save_document(HREF, b"x").unwrap();

        let file_mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, FILE_MODE);
        let dir_mode = fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, DIR_MODE);
    }
}
