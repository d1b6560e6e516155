//! On-disk artifact store.
//!
//! Topics are directories under the data root. Each document inside a topic
//! is a manifest plus sibling artifacts sharing the document's hash as file
//! stem:
//!
//! ```text
//! <data_dir>/
//!   physics/
//!     <hash>.json   manifest
//!     <hash>.pdf    original bytes
//!     <hash>.md     summary (optional)
//!   userprompt.json
//! ```
//!
//! There is no index: document counts and listings are computed by scanning
//! the partition on every call. Writes go through a temp file and a rename so
//! readers never see a half-written manifest or summary. Related writes are
//! not transactional; see [`ArtifactStore::move_document`] for how partial
//! failures are reported.

use std::cmp::Ordering;
use std::ffi::OsString;
use std::future::Future;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use tokio::fs;
use tracing::{debug, info, warn};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::error::{Error, Result};
use crate::models::{Document, TopicSummary};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// One of the files making up a stored document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Manifest,
    Binary,
    Summary,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [
        ArtifactKind::Manifest,
        ArtifactKind::Binary,
        ArtifactKind::Summary,
    ];

    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::Manifest => "json",
            ArtifactKind::Binary => "pdf",
            ArtifactKind::Summary => "md",
        }
    }

    fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "json" => Some(ArtifactKind::Manifest),
            "pdf" => Some(ArtifactKind::Binary),
            "md" => Some(ArtifactKind::Summary),
            _ => None,
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactKind::Manifest => write!(f, "manifest"),
            ArtifactKind::Binary => write!(f, "binary"),
            ArtifactKind::Summary => write!(f, "summary"),
        }
    }
}

/// What [`ArtifactStore::delete_document`] found missing while deleting.
///
/// A missing summary is normal and never reported; a missing manifest or
/// binary means the document was already inconsistent on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionReport {
    pub topic: String,
    pub hash: String,
    pub missing: Vec<ArtifactKind>,
}

impl DeletionReport {
    pub fn is_consistent(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Rejects names that are empty or could escape the data root.
pub fn validate_topic_name(name: &str) -> Result<()> {
    let bad = name.trim().is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
        || name.contains('\0')
        || name == ".";
    if bad {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

/// A document hash is exactly 64 lowercase hex characters.
pub fn validate_hash(hash: &str) -> Result<()> {
    let ok = hash.len() == 64
        && hash
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if !ok {
        return Err(Error::InvalidHash(hash.to_string()));
    }
    Ok(())
}

/// Split `<hash>.<ext>` into its parts if the stem is a valid hash.
fn parse_artifact_name(file_name: &str) -> Option<(&str, ArtifactKind)> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    let kind = ArtifactKind::from_extension(ext)?;
    validate_hash(stem).ok()?;
    Some((stem, kind))
}

/// Listing order: year descending (missing year lowest), then title
/// ascending. Titles compare by base letters first, so `Étude` files under
/// E, then by accents; case is ignored. Equal keys keep their incoming order.
fn compare_for_listing(a: &Document, b: &Document) -> Ordering {
    let year_a = a.year.unwrap_or(i32::MIN);
    let year_b = b.year.unwrap_or(i32::MIN);
    year_b
        .cmp(&year_a)
        .then_with(|| title_base_key(&a.title).cmp(&title_base_key(&b.title)))
        .then_with(|| title_accent_key(&a.title).cmp(&title_accent_key(&b.title)))
}

/// Decomposed, lowercased, with combining marks dropped.
fn title_base_key(title: &str) -> String {
    title
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Decomposed and lowercased; unaccented letters sort before accented ones.
fn title_accent_key(title: &str) -> String {
    title.nfd().flat_map(char::to_lowercase).collect()
}

/// Write `data` to `path` via a uniquely named sibling temp file and rename.
pub(crate) async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp: OsString = path.as_os_str().to_owned();
    tmp.push(format!(
        ".{}.{}.tmp",
        std::process::id(),
        TMP_COUNTER.fetch_add(1, AtomicOrdering::Relaxed)
    ));
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, data).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Filesystem-backed store for topics, manifests, binaries, and summaries.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    data_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Create the data root if it does not exist yet.
    pub async fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir).await?;
        Ok(())
    }

    fn topic_dir(&self, topic: &str) -> Result<PathBuf> {
        validate_topic_name(topic)?;
        Ok(self.data_dir.join(topic))
    }

    /// Path of one artifact. Both the topic and the hash are validated first.
    pub fn artifact_path(&self, topic: &str, hash: &str, kind: ArtifactKind) -> Result<PathBuf> {
        validate_hash(hash)?;
        Ok(self
            .topic_dir(topic)?
            .join(format!("{}.{}", hash, kind.extension())))
    }

    pub async fn topic_exists(&self, topic: &str) -> Result<bool> {
        let dir = self.topic_dir(topic)?;
        Ok(is_dir(&dir).await?)
    }

    async fn require_topic(&self, topic: &str) -> Result<PathBuf> {
        let dir = self.topic_dir(topic)?;
        if !is_dir(&dir).await? {
            return Err(Error::TopicNotFound(topic.to_string()));
        }
        Ok(dir)
    }

    // ============ Topics ============

    /// Names of all topic partitions, sorted. Directories whose names would not
    /// pass validation are ignored.
    pub async fn topic_names(&self) -> Result<Vec<String>> {
        let mut entries = match fs::read_dir(&self.data_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if validate_topic_name(&name).is_ok() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// All topic partitions with their current manifest counts, sorted by name.
    pub async fn list_topics(&self) -> Result<Vec<TopicSummary>> {
        let mut topics = Vec::new();
        for name in self.topic_names().await? {
            let document_count = match self.manifest_hashes(&name).await {
                Ok(hashes) => hashes.len(),
                Err(e) => {
                    warn!(topic = %name, "Failed to scan topic: {}", e);
                    0
                }
            };
            topics.push(TopicSummary {
                name,
                document_count,
            });
        }
        Ok(topics)
    }

    /// Create a topic. Idempotent: returns `false` if it already existed.
    pub async fn create_topic(&self, name: &str) -> Result<bool> {
        let dir = self.topic_dir(name)?;
        let existed = is_dir(&dir).await?;
        fs::create_dir_all(&dir).await?;
        if !existed {
            info!(topic = %name, "Created topic");
        }
        Ok(!existed)
    }

    /// Create a topic, failing with `AlreadyExists` if it is already there.
    pub async fn create_topic_strict(&self, name: &str) -> Result<()> {
        let dir = self.topic_dir(name)?;
        fs::create_dir_all(&self.data_dir).await?;
        match fs::create_dir(&dir).await {
            Ok(()) => {
                info!(topic = %name, "Created topic");
                Ok(())
            }
            Err(e) if e.kind() == IoErrorKind::AlreadyExists => {
                Err(Error::AlreadyExists(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a topic that holds no manifests.
    ///
    /// Orphaned binaries, summaries, and temp files left behind by earlier
    /// partial failures are removed with a warning before the directory goes.
    /// Any other entry fails the call with `UnmanagedFiles` before anything is
    /// deleted.
    pub async fn delete_topic(&self, name: &str) -> Result<()> {
        let dir = self.require_topic(name).await?;

        let count = self.manifest_hashes(name).await?.len();
        if count > 0 {
            return Err(Error::NotEmpty {
                topic: name.to_string(),
                count,
            });
        }

        let mut residue = Vec::new();
        let mut unmanaged = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let is_file = entry.file_type().await?.is_file();
            if is_file && (file_name.ends_with(".tmp") || parse_artifact_name(&file_name).is_some()) {
                residue.push((file_name, entry.path()));
            } else {
                unmanaged.push(file_name);
            }
        }
        if !unmanaged.is_empty() {
            unmanaged.sort();
            return Err(Error::UnmanagedFiles {
                topic: name.to_string(),
                entries: unmanaged,
            });
        }

        for (file_name, path) in residue {
            warn!(topic = %name, file = %file_name, "Removing orphaned artifact");
            remove_if_exists(&path).await?;
        }
        fs::remove_dir(&dir).await?;
        info!(topic = %name, "Deleted topic");
        Ok(())
    }

    /// Rename a topic partition. Documents move with it and keep their hashes.
    pub async fn rename_topic(&self, old: &str, new: &str) -> Result<()> {
        let from = self.require_topic(old).await?;
        let to = self.topic_dir(new)?;
        if old == new {
            return Ok(());
        }
        if fs::try_exists(&to).await? {
            return Err(Error::AlreadyExists(new.to_string()));
        }
        fs::rename(&from, &to).await?;
        info!(from = %old, to = %new, "Renamed topic");
        Ok(())
    }

    // ============ Documents ============

    /// Hashes of every manifest in a topic, in directory order.
    pub async fn manifest_hashes(&self, topic: &str) -> Result<Vec<String>> {
        let dir = self.require_topic(topic).await?;
        let mut entries = fs::read_dir(&dir).await?;
        let mut hashes = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some((hash, ArtifactKind::Manifest)) = parse_artifact_name(file_name) {
                hashes.push(hash.to_string());
            }
        }
        Ok(hashes)
    }

    /// All documents in a topic in listing order.
    ///
    /// A manifest that cannot be read or parsed is skipped with a warning so
    /// one damaged file does not hide the rest of the topic.
    pub async fn list_documents(&self, topic: &str) -> Result<Vec<Document>> {
        let hashes = self.manifest_hashes(topic).await?;
        let mut docs = Vec::with_capacity(hashes.len());
        for hash in hashes {
            match self.read_manifest(topic, &hash).await {
                Ok(doc) => docs.push(doc),
                Err(e) => warn!(topic = %topic, hash = %hash, "Skipping unreadable manifest: {}", e),
            }
        }

        // Upload time stands in for insertion order; the second sort is stable.
        docs.sort_by(|a, b| a.upload_date.cmp(&b.upload_date));
        docs.sort_by(compare_for_listing);
        Ok(docs)
    }

    pub async fn has_manifest(&self, topic: &str, hash: &str) -> Result<bool> {
        let path = self.artifact_path(topic, hash, ArtifactKind::Manifest)?;
        Ok(fs::try_exists(&path).await?)
    }

    pub async fn read_manifest(&self, topic: &str, hash: &str) -> Result<Document> {
        let path = self.artifact_path(topic, hash, ArtifactKind::Manifest)?;
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                return Err(Error::DocumentNotFound(hash.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let mut doc: Document = serde_json::from_slice(&raw)?;
        if doc.hash != hash {
            warn!(
                topic = %topic,
                hash = %hash,
                manifest_hash = %doc.hash,
                "Manifest hash disagrees with file name; using file name"
            );
            doc.hash = hash.to_string();
        }
        Ok(doc)
    }

    /// Overwrite the manifest. No merging happens at this layer.
    pub async fn write_manifest(&self, topic: &str, hash: &str, doc: &Document) -> Result<()> {
        self.require_topic(topic).await?;
        let path = self.artifact_path(topic, hash, ArtifactKind::Manifest)?;
        let mut doc = doc.clone();
        doc.hash = hash.to_string();
        let json = serde_json::to_vec_pretty(&doc)?;
        write_atomic(&path, &json).await
    }

    pub async fn write_binary(&self, topic: &str, hash: &str, bytes: &[u8]) -> Result<()> {
        self.require_topic(topic).await?;
        let path = self.artifact_path(topic, hash, ArtifactKind::Binary)?;
        write_atomic(&path, bytes).await
    }

    pub async fn read_binary(&self, topic: &str, hash: &str) -> Result<Vec<u8>> {
        let path = self.artifact_path(topic, hash, ArtifactKind::Binary)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == IoErrorKind::NotFound => Err(Error::Inconsistency(format!(
                "document {} in topic {} has a manifest but no binary",
                hash, topic
            ))),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn remove_binary(&self, topic: &str, hash: &str) -> Result<()> {
        let path = self.artifact_path(topic, hash, ArtifactKind::Binary)?;
        remove_if_exists(&path).await?;
        Ok(())
    }

    /// Replace the summary text for a document.
    pub async fn write_derived_text(&self, topic: &str, hash: &str, text: &str) -> Result<()> {
        self.require_topic(topic).await?;
        let path = self.artifact_path(topic, hash, ArtifactKind::Summary)?;
        write_atomic(&path, text.as_bytes()).await
    }

    pub async fn read_derived_text(&self, topic: &str, hash: &str) -> Result<String> {
        let path = self.artifact_path(topic, hash, ArtifactKind::Summary)?;
        match fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                Err(Error::SummaryNotFound(hash.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn has_derived_text(&self, topic: &str, hash: &str) -> Result<bool> {
        let path = self.artifact_path(topic, hash, ArtifactKind::Summary)?;
        Ok(fs::try_exists(&path).await?)
    }

    /// Remove the summary. Absence is `SummaryNotFound`.
    pub async fn delete_derived_text(&self, topic: &str, hash: &str) -> Result<()> {
        let path = self.artifact_path(topic, hash, ArtifactKind::Summary)?;
        if !remove_if_exists(&path).await? {
            return Err(Error::SummaryNotFound(hash.to_string()));
        }
        Ok(())
    }

    /// Remove manifest, binary, and summary together.
    ///
    /// Every removal is attempted even if an earlier one fails. A missing
    /// manifest or binary is logged and listed in the report; if both are
    /// missing the document did not exist and `DocumentNotFound` is returned.
    pub async fn delete_document(&self, topic: &str, hash: &str) -> Result<DeletionReport> {
        self.require_topic(topic).await?;

        let mut missing = Vec::new();
        let mut first_error = None;
        for kind in ArtifactKind::ALL {
            let path = self.artifact_path(topic, hash, kind)?;
            match remove_if_exists(&path).await {
                Ok(true) => {}
                Ok(false) => {
                    if kind != ArtifactKind::Summary {
                        missing.push(kind);
                    }
                }
                Err(e) => {
                    warn!(topic = %topic, hash = %hash, artifact = %kind, "Failed to delete artifact: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        if missing.contains(&ArtifactKind::Manifest) && missing.contains(&ArtifactKind::Binary) {
            return Err(Error::DocumentNotFound(hash.to_string()));
        }
        if let Some(e) = first_error {
            return Err(e.into());
        }
        for kind in &missing {
            warn!(topic = %topic, hash = %hash, artifact = %kind, "Inconsistent document: artifact was already missing");
        }

        info!(topic = %topic, hash = %hash, "Deleted document");
        Ok(DeletionReport {
            topic: topic.to_string(),
            hash: hash.to_string(),
            missing,
        })
    }

    /// Relocate a document's manifest, binary, and summary to another topic.
    ///
    /// The destination must already exist. Artifacts move in the order
    /// manifest, binary, summary; if a later rename fails the earlier ones are
    /// undone. When the undo also fails the document is left split across two
    /// topics and `Inconsistency` is returned naming both. An orphaned binary or
    /// summary already sitting in the destination is removed with a warning
    /// first.
    pub async fn move_document(&self, hash: &str, from: &str, to: &str) -> Result<()> {
        validate_hash(hash)?;
        self.require_topic(from).await?;
        validate_topic_name(to)?;
        if !self.topic_exists(to).await? {
            return Err(Error::DestinationNotFound(to.to_string()));
        }
        if !self.has_manifest(from, hash).await? {
            return Err(Error::DocumentNotFound(hash.to_string()));
        }
        if from == to {
            return Ok(());
        }
        if self.has_manifest(to, hash).await? {
            return Err(Error::Inconsistency(format!(
                "document {} already has a manifest in topic {}",
                hash, to
            )));
        }

        let plan = self.move_plan(hash, from, to)?;
        for (kind, _, dst) in &plan {
            if *kind != ArtifactKind::Manifest && is_file(dst).await? {
                warn!(topic = %to, hash = %hash, artifact = %kind, "Removing orphaned artifact in destination");
                remove_if_exists(dst).await?;
            }
        }

        relocate(hash, from, to, plan, |src, dst| async move {
            fs::rename(src, dst).await
        })
        .await?;
        info!(hash = %hash, from = %from, to = %to, "Moved document");
        Ok(())
    }

    fn move_plan(
        &self,
        hash: &str,
        from: &str,
        to: &str,
    ) -> Result<Vec<(ArtifactKind, PathBuf, PathBuf)>> {
        ArtifactKind::ALL
            .into_iter()
            .map(|kind| {
                Ok((
                    kind,
                    self.artifact_path(from, hash, kind)?,
                    self.artifact_path(to, hash, kind)?,
                ))
            })
            .collect()
    }
}

/// Apply a move plan in order with `rename`, undoing completed steps in
/// reverse if one fails.
async fn relocate<F, Fut>(
    hash: &str,
    from: &str,
    to: &str,
    plan: Vec<(ArtifactKind, PathBuf, PathBuf)>,
    mut rename: F,
) -> Result<()>
where
    F: FnMut(PathBuf, PathBuf) -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    let mut moved: Vec<(PathBuf, PathBuf)> = Vec::new();
    for (kind, src, dst) in plan {
        match rename(src.clone(), dst.clone()).await {
            Ok(()) => moved.push((src, dst)),
            Err(e) if e.kind() == IoErrorKind::NotFound && kind == ArtifactKind::Summary => {}
            Err(e) if e.kind() == IoErrorKind::NotFound && kind == ArtifactKind::Binary => {
                warn!(topic = %from, hash = %hash, "Moving document whose binary is missing");
            }
            Err(e) => {
                warn!(hash = %hash, from = %from, to = %to, artifact = %kind, "Move failed, rolling back: {}", e);
                return Err(rollback_moves(hash, from, to, moved, e, &mut rename).await);
            }
        }
    }
    Ok(())
}

async fn rollback_moves<F, Fut>(
    hash: &str,
    from: &str,
    to: &str,
    moved: Vec<(PathBuf, PathBuf)>,
    cause: std::io::Error,
    rename: &mut F,
) -> Error
where
    F: FnMut(PathBuf, PathBuf) -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    let mut stranded = Vec::new();
    for (src, dst) in moved.into_iter().rev() {
        if let Err(e) = rename(dst.clone(), src).await {
            warn!(path = %dst.display(), "Rollback failed: {}", e);
            stranded.push(dst.display().to_string());
        }
    }
    if stranded.is_empty() {
        debug!(hash = %hash, "Rolled back partial move");
        Error::Io(cause)
    } else {
        Error::Inconsistency(format!(
            "document {} is split between topics {} and {} after a failed move ({}); stranded: {}",
            hash,
            from,
            to,
            cause,
            stranded.join(", ")
        ))
    }
}

async fn is_dir(path: &Path) -> std::io::Result<bool> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(meta.is_dir()),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

async fn is_file(path: &Path) -> std::io::Result<bool> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(meta.is_file()),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Returns `Ok(false)` if the file was not there.
async fn remove_if_exists(path: &Path) -> std::io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use chrono::{TimeZone, Utc};
    use serde_json::Map;
    use tempfile::TempDir;

    fn h(n: u8) -> String {
        format!("{:064x}", n)
    }

    fn doc(hash: &str, title: &str, year: Option<i32>, uploaded_secs: i64) -> Document {
        Document {
            hash: hash.to_string(),
            title: title.to_string(),
            authors: vec![],
            year,
            tags: vec![],
            source_url: None,
            upload_date: Utc.timestamp_opt(uploaded_secs, 0).unwrap(),
            extra: Map::new(),
        }
    }

    async fn store_with_topic(topic: &str) -> (TempDir, ArtifactStore) {
        let tmp = TempDir::new().unwrap();
        let store = ArtifactStore::new(tmp.path());
        store.create_topic(topic).await.unwrap();
        (tmp, store)
    }

    async fn put(store: &ArtifactStore, topic: &str, d: &Document) {
        store.write_binary(topic, &d.hash, b"%PDF-1.4 test").await.unwrap();
        store.write_manifest(topic, &d.hash, d).await.unwrap();
    }

    #[test]
    fn test_topic_name_validation() {
        for bad in ["", "  ", "a/b", "..", "a..b", "..\\x", "x\\y", "."] {
            assert!(
                matches!(validate_topic_name(bad), Err(Error::InvalidName(_))),
                "{:?} should be rejected",
                bad
            );
        }
        for good in ["physics", "Machine Learning", "2024-papers", ".hidden"] {
            assert!(validate_topic_name(good).is_ok(), "{:?} should be accepted", good);
        }
    }

    #[test]
    fn test_hash_validation() {
        assert!(validate_hash(&h(1)).is_ok());
        assert!(validate_hash("abc").is_err());
        assert!(validate_hash(&h(1).to_uppercase().replace('0', "A")).is_err());
        assert!(validate_hash(&format!("../{}", &h(1)[3..])).is_err());
    }

    #[tokio::test]
    async fn test_create_topic_idempotent_and_strict() {
        let tmp = TempDir::new().unwrap();
        let store = ArtifactStore::new(tmp.path());

        assert!(store.create_topic("math").await.unwrap());
        assert!(!store.create_topic("math").await.unwrap());
        assert!(matches!(
            store.create_topic_strict("math").await,
            Err(Error::AlreadyExists(_))
        ));
        store.create_topic_strict("bio").await.unwrap();

        let topics = store.list_topics().await.unwrap();
        let names: Vec<_> = topics.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["bio", "math"]);
        assert!(matches!(
            store.create_topic("../escape").await,
            Err(Error::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn test_list_topics_counts_manifests_only() {
        let (tmp, store) = store_with_topic("t").await;
        put(&store, "t", &doc(&h(1), "A", Some(2020), 0)).await;
        store.write_binary("t", &h(2), b"orphan").await.unwrap();
        std::fs::write(tmp.path().join("userprompt.json"), "{}").unwrap();

        let topics = store.list_topics().await.unwrap();
        assert_eq!(
            topics,
            vec![TopicSummary {
                name: "t".into(),
                document_count: 1
            }]
        );
    }

    #[tokio::test]
    async fn test_list_topics_on_missing_root_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = ArtifactStore::new(tmp.path().join("nope"));
        assert!(store.list_topics().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_listing_order() {
        let (_tmp, store) = store_with_topic("t").await;
        put(&store, "t", &doc(&h(1), "B", Some(2020), 10)).await;
        put(&store, "t", &doc(&h(2), "A", Some(2019), 20)).await;
        put(&store, "t", &doc(&h(3), "C", Some(2020), 30)).await;

        let titles: Vec<_> = store
            .list_documents("t")
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.title)
            .collect();
        assert_eq!(titles, vec!["B", "C", "A"]);
    }

    #[tokio::test]
    async fn test_listing_missing_year_lowest_and_ties_by_upload() {
        let (_tmp, store) = store_with_topic("t").await;
        put(&store, "t", &doc(&h(1), "zeta", None, 1)).await;
        put(&store, "t", &doc(&h(2), "Same", Some(1999), 50)).await;
        put(&store, "t", &doc(&h(3), "same", Some(1999), 5)).await;
        put(&store, "t", &doc(&h(4), "alpha", Some(1999), 7)).await;

        let hashes: Vec<_> = store
            .list_documents("t")
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.hash)
            .collect();
        assert_eq!(hashes, vec![h(4), h(3), h(2), h(1)]);
    }

    #[tokio::test]
    async fn test_listing_folds_accents_in_titles() {
        let (_tmp, store) = store_with_topic("t").await;
        put(&store, "t", &doc(&h(1), "Zebra", Some(2020), 1)).await;
        put(&store, "t", &doc(&h(2), "Étude", Some(2020), 2)).await;
        put(&store, "t", &doc(&h(3), "Fourier", Some(2020), 3)).await;
        put(&store, "t", &doc(&h(4), "etude", Some(2020), 4)).await;

        let titles: Vec<_> = store
            .list_documents("t")
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.title)
            .collect();
        assert_eq!(titles, vec!["etude", "Étude", "Fourier", "Zebra"]);
    }

    #[tokio::test]
    async fn test_listing_skips_corrupt_manifest() {
        let (tmp, store) = store_with_topic("t").await;
        put(&store, "t", &doc(&h(1), "Good", Some(2020), 0)).await;
        std::fs::write(tmp.path().join("t").join(format!("{}.json", h(2))), "{not json").unwrap();

        let docs = store.list_documents("t").await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].title, "Good");
    }

    #[tokio::test]
    async fn test_list_documents_unknown_topic() {
        let tmp = TempDir::new().unwrap();
        let store = ArtifactStore::new(tmp.path());
        assert!(matches!(
            store.list_documents("ghost").await,
            Err(Error::TopicNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_manifest_overwrite_is_full_replace() {
        let (_tmp, store) = store_with_topic("t").await;
        let mut d = doc(&h(1), "First", Some(2001), 0);
        d.tags = vec!["x".into()];
        put(&store, "t", &d).await;

        let replacement = doc(&h(1), "Second", None, 0);
        store.write_manifest("t", &h(1), &replacement).await.unwrap();

        let back = store.read_manifest("t", &h(1)).await.unwrap();
        assert_eq!(back.title, "Second");
        assert!(back.tags.is_empty());
        assert_eq!(back.year, None);
    }

    #[tokio::test]
    async fn test_read_manifest_prefers_file_name_hash() {
        let (_tmp, store) = store_with_topic("t").await;
        let d = doc(&h(9), "Mismatch", None, 0);
        let path = store.artifact_path("t", &h(1), ArtifactKind::Manifest).unwrap();
        std::fs::write(&path, serde_json::to_vec(&d).unwrap()).unwrap();

        let back = store.read_manifest("t", &h(1)).await.unwrap();
        assert_eq!(back.hash, h(1));
    }

    #[tokio::test]
    async fn test_derived_text_lifecycle() {
        let (_tmp, store) = store_with_topic("t").await;
        put(&store, "t", &doc(&h(1), "A", None, 0)).await;

        assert!(!store.has_derived_text("t", &h(1)).await.unwrap());
        assert!(matches!(
            store.read_derived_text("t", &h(1)).await,
            Err(Error::SummaryNotFound(_))
        ));

        store.write_derived_text("t", &h(1), "first").await.unwrap();
        store.write_derived_text("t", &h(1), "second").await.unwrap();
        assert_eq!(store.read_derived_text("t", &h(1)).await.unwrap(), "second");
        assert!(store.has_derived_text("t", &h(1)).await.unwrap());

        store.delete_derived_text("t", &h(1)).await.unwrap();
        assert!(matches!(
            store.delete_derived_text("t", &h(1)).await,
            Err(Error::SummaryNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_writes_leave_no_temp_files() {
        let (tmp, store) = store_with_topic("t").await;
        put(&store, "t", &doc(&h(1), "A", None, 0)).await;
        store.write_derived_text("t", &h(1), "s").await.unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(tmp.path().join("t"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_delete_document_removes_all_artifacts() {
        let (tmp, store) = store_with_topic("t").await;
        put(&store, "t", &doc(&h(1), "A", None, 0)).await;
        store.write_derived_text("t", &h(1), "summary").await.unwrap();

        let report = store.delete_document("t", &h(1)).await.unwrap();
        assert!(report.is_consistent());
        assert_eq!(std::fs::read_dir(tmp.path().join("t")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_delete_document_reports_missing_binary() {
        let (_tmp, store) = store_with_topic("t").await;
        store
            .write_manifest("t", &h(1), &doc(&h(1), "A", None, 0))
            .await
            .unwrap();

        let report = store.delete_document("t", &h(1)).await.unwrap();
        assert_eq!(report.missing, vec![ArtifactKind::Binary]);
        assert!(!store.has_manifest("t", &h(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_absent_document_is_not_found() {
        let (_tmp, store) = store_with_topic("t").await;
        assert!(matches!(
            store.delete_document("t", &h(1)).await,
            Err(Error::DocumentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_topic_guard() {
        let (tmp, store) = store_with_topic("t").await;
        put(&store, "t", &doc(&h(1), "A", None, 0)).await;

        match store.delete_topic("t").await {
            Err(Error::NotEmpty { count, .. }) => assert_eq!(count, 1),
            other => panic!("expected NotEmpty, got {:?}", other),
        }

        store.delete_document("t", &h(1)).await.unwrap();
        store.write_binary("t", &h(2), b"orphan").await.unwrap();
        store.delete_topic("t").await.unwrap();
        assert!(!tmp.path().join("t").exists());
        assert!(matches!(
            store.delete_topic("t").await,
            Err(Error::TopicNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_topic_refuses_unmanaged_files() {
        let (tmp, store) = store_with_topic("t").await;
        store.write_binary("t", &h(2), b"orphan").await.unwrap();
        std::fs::write(tmp.path().join("t").join(".DS_Store"), "finder").unwrap();

        let err = store.delete_topic("t").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        match err {
            Error::UnmanagedFiles { entries, .. } => assert_eq!(entries, vec![".DS_Store"]),
            other => panic!("expected UnmanagedFiles, got {:?}", other),
        }
        assert!(tmp.path().join("t").join(format!("{}.pdf", h(2))).exists());
        assert!(store.topic_exists("t").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_topic_refuses_non_hash_json() {
        let (tmp, store) = store_with_topic("t").await;
        std::fs::write(tmp.path().join("t").join("notes.json"), "{}").unwrap();

        let err = store.delete_topic("t").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(matches!(err, Error::UnmanagedFiles { ref topic, .. } if topic == "t"));
        assert!(store.topic_exists("t").await.unwrap());

        std::fs::remove_file(tmp.path().join("t").join("notes.json")).unwrap();
        store.delete_topic("t").await.unwrap();
    }

    #[tokio::test]
    async fn test_rename_topic_keeps_documents() {
        let (_tmp, store) = store_with_topic("old").await;
        put(&store, "old", &doc(&h(1), "A", None, 0)).await;
        store.create_topic("taken").await.unwrap();

        assert!(matches!(
            store.rename_topic("old", "taken").await,
            Err(Error::AlreadyExists(_))
        ));
        assert!(matches!(
            store.rename_topic("missing", "x").await,
            Err(Error::TopicNotFound(_))
        ));
        assert!(matches!(
            store.rename_topic("old", "a/b").await,
            Err(Error::InvalidName(_))
        ));

        store.rename_topic("old", "new").await.unwrap();
        assert!(!store.topic_exists("old").await.unwrap());
        assert_eq!(store.read_manifest("new", &h(1)).await.unwrap().hash, h(1));
    }

    #[tokio::test]
    async fn test_move_document_preserves_content() {
        let (_tmp, store) = store_with_topic("a").await;
        store.create_topic("b").await.unwrap();
        put(&store, "a", &doc(&h(1), "Paper", Some(2021), 0)).await;
        store.write_derived_text("a", &h(1), "the summary").await.unwrap();

        let manifest_before = store.read_manifest("a", &h(1)).await.unwrap();
        let binary_before = store.read_binary("a", &h(1)).await.unwrap();

        store.move_document(&h(1), "a", "b").await.unwrap();

        assert!(!store.has_manifest("a", &h(1)).await.unwrap());
        assert!(!store.has_derived_text("a", &h(1)).await.unwrap());
        assert_eq!(store.read_manifest("b", &h(1)).await.unwrap(), manifest_before);
        assert_eq!(store.read_binary("b", &h(1)).await.unwrap(), binary_before);
        assert_eq!(
            store.read_derived_text("b", &h(1)).await.unwrap(),
            "the summary"
        );
    }

    #[tokio::test]
    async fn test_move_never_creates_destination() {
        let (tmp, store) = store_with_topic("a").await;
        put(&store, "a", &doc(&h(1), "Paper", None, 0)).await;

        assert!(matches!(
            store.move_document(&h(1), "a", "nowhere").await,
            Err(Error::DestinationNotFound(_))
        ));
        assert!(!tmp.path().join("nowhere").exists());
        assert!(store.has_manifest("a", &h(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_move_missing_document() {
        let (_tmp, store) = store_with_topic("a").await;
        store.create_topic("b").await.unwrap();
        assert!(matches!(
            store.move_document(&h(1), "a", "b").await,
            Err(Error::DocumentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_move_rolls_back_when_binary_cannot_move() {
        let (tmp, store) = store_with_topic("a").await;
        store.create_topic("b").await.unwrap();
        put(&store, "a", &doc(&h(1), "Paper", None, 0)).await;

        // A directory squatting on the destination binary path makes that rename fail.
        std::fs::create_dir(tmp.path().join("b").join(format!("{}.pdf", h(1)))).unwrap();
        std::fs::write(
            tmp.path().join("b").join(format!("{}.pdf", h(1))).join("x"),
            "x",
        )
        .unwrap();

        let err = store.move_document(&h(1), "a", "b").await.unwrap_err();
        assert!(matches!(err, Error::Io(_)), "got {:?}", err);
        assert!(store.has_manifest("a", &h(1)).await.unwrap());
        assert!(!store.has_manifest("b", &h(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_move_replaces_orphans_in_destination() {
        let (tmp, store) = store_with_topic("a").await;
        store.create_topic("b").await.unwrap();
        put(&store, "a", &doc(&h(1), "Paper", None, 0)).await;
        store.write_derived_text("b", &h(1), "stale").await.unwrap();
        std::fs::write(tmp.path().join("b").join(format!("{}.pdf", h(1))), "stale pdf").unwrap();

        store.move_document(&h(1), "a", "b").await.unwrap();

        assert!(!store.has_derived_text("b", &h(1)).await.unwrap());
        assert_eq!(store.read_binary("b", &h(1)).await.unwrap(), b"%PDF-1.4 test".to_vec());
        assert!(store.has_manifest("b", &h(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_rollback_reports_split_document() {
        let (_tmp, store) = store_with_topic("a").await;
        store.create_topic("b").await.unwrap();
        put(&store, "a", &doc(&h(1), "Paper", None, 0)).await;

        let plan = store.move_plan(&h(1), "a", "b").unwrap();
        let mut calls = 0;
        let result = relocate(&h(1), "a", "b", plan, |src, dst| {
            calls += 1;
            let call = calls;
            async move {
                if call == 1 {
                    fs::rename(src, dst).await
                } else {
                    Err(std::io::Error::new(IoErrorKind::Other, "disk detached"))
                }
            }
        })
        .await;

        match result {
            Err(Error::Inconsistency(msg)) => {
                assert!(msg.contains("split between topics a and b"), "{}", msg);
                assert!(msg.contains(&format!("{}.json", h(1))), "{}", msg);
            }
            other => panic!("expected Inconsistency, got {:?}", other),
        }
        assert!(!store.has_manifest("a", &h(1)).await.unwrap());
        assert!(store.has_manifest("b", &h(1)).await.unwrap());
        assert_eq!(store.read_binary("a", &h(1)).await.unwrap(), b"%PDF-1.4 test".to_vec());
    }
}
