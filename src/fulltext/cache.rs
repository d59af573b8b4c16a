//! Content-addressed store of extracted full text.
//!
//! # Layout
//!
//! ```text
//! <cache_dir>/fulltext/
//!   <sha256 of text>.txt
//!   aliases.json
//! ```
//!
//! Entries are addressed by the SHA-256 of the extracted text. `aliases.json`
//! maps the other ways of reaching an entry (the digest of the downloaded
//! body, the URL it came from, the record's DOI) to that hash. All writes go
//! through a temporary file and a rename, so a crash never leaves a torn file.
//!
//! The in-memory state sits behind a short-lived lock that is never held
//! across file I/O; reads and writes run on the blocking pool. Entry files are
//! written as soon as they are stored, while alias changes accumulate in
//! memory until [`FullTextCache::flush`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::models::ContentHash;

const ALIAS_FILE: &str = "aliases.json";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt alias index: {0}")]
    Index(#[from] serde_json::Error),

    #[error("Cache entry {0} vanished")]
    Missing(ContentHash),

    #[error("Cache worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Another name under which an entry can be found
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Alias {
    /// SHA-256 of the downloaded document body
    Body(ContentHash),
    Url(String),
    Doi(String),
}

impl Alias {
    fn key(&self) -> String {
        match self {
            Alias::Body(hash) => format!("body:{}", hash),
            Alias::Url(url) => format!("url:{}", url.trim()),
            Alias::Doi(doi) => format!("doi:{}", doi.trim().to_lowercase()),
        }
    }
}

/// Text served from the cache, and whether it was already there
#[derive(Debug, Clone, PartialEq)]
pub struct CachedText {
    pub hash: ContentHash,
    pub text: String,
    pub cache_hit: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AliasIndex {
    #[serde(default)]
    aliases: BTreeMap<String, ContentHash>,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: BTreeSet<ContentHash>,
    /// Only populated for the in-memory variant
    texts: HashMap<ContentHash, String>,
    index: AliasIndex,
    /// Alias changes not yet in `aliases.json`
    dirty: bool,
}

/// Full-text cache shared by every fetch worker
#[derive(Debug)]
pub struct FullTextCache {
    dir: Option<PathBuf>,
    state: Mutex<CacheState>,
    inflight: tokio::sync::Mutex<HashMap<ContentHash, Arc<OnceCell<ContentHash>>>>,
    flushing: tokio::sync::Mutex<()>,
}

impl FullTextCache {
    /// Open (creating if needed) the persistent cache under `<cache_dir>/fulltext`
    pub fn open(cache_dir: &Path) -> Result<Self, CacheError> {
        let dir = cache_dir.join("fulltext");
        std::fs::create_dir_all(&dir)?;

        let index = match std::fs::read_to_string(dir.join(ALIAS_FILE)) {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => AliasIndex::default(),
            Err(e) => return Err(e.into()),
        };

        let mut entries = BTreeSet::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "txt") {
                if let Some(hash) = path
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .and_then(ContentHash::parse)
                {
                    entries.insert(hash);
                }
            }
        }
        tracing::debug!(dir = %dir.display(), entries = entries.len(), "full-text cache opened");

        Ok(Self::with_state(
            Some(dir),
            CacheState {
                entries,
                index,
                ..CacheState::default()
            },
        ))
    }

    /// A cache that lives only as long as the process
    pub fn in_memory() -> Self {
        Self::with_state(None, CacheState::default())
    }

    fn with_state(dir: Option<PathBuf>, state: CacheState) -> Self {
        Self {
            dir,
            state: Mutex::new(state),
            inflight: tokio::sync::Mutex::new(HashMap::new()),
            flushing: tokio::sync::Mutex::new(()),
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.dir.is_some()
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn entry_path(dir: &Path, hash: &ContentHash) -> PathBuf {
        dir.join(format!("{}.txt", hash))
    }

    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.state().entries.contains(hash)
    }

    /// Number of stored texts
    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Alias changes are waiting for [`flush`](Self::flush)
    pub fn has_unflushed_aliases(&self) -> bool {
        self.state().dirty
    }

    /// Entry hash reachable through `alias`, if any
    pub fn lookup(&self, alias: &Alias) -> Option<ContentHash> {
        self.state().index.aliases.get(&alias.key()).cloned()
    }

    pub async fn get(&self, hash: &ContentHash) -> Result<Option<String>, CacheError> {
        let path = {
            let state = self.state();
            if !state.entries.contains(hash) {
                return Ok(None);
            }
            match &self.dir {
                None => return Ok(state.texts.get(hash).cloned()),
                Some(dir) => Self::entry_path(dir, hash),
            }
        };
        let read = tokio::task::spawn_blocking(move || std::fs::read_to_string(path)).await?;
        match read {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Text reachable through `alias`
    pub async fn get_by_alias(&self, alias: &Alias) -> Result<Option<CachedText>, CacheError> {
        let Some(hash) = self.lookup(alias) else {
            return Ok(None);
        };
        Ok(self.get(&hash).await?.map(|text| CachedText {
            hash,
            text,
            cache_hit: true,
        }))
    }

    /// Store `text` and register `aliases` for it, returning its hash
    pub async fn put(&self, text: &str, aliases: &[Alias]) -> Result<ContentHash, CacheError> {
        let hash = ContentHash::of_text(text);
        let stored = self.contains(&hash);

        match &self.dir {
            Some(dir) if !stored => {
                let dir = dir.clone();
                let target = Self::entry_path(&dir, &hash);
                let contents = text.as_bytes().to_vec();
                tokio::task::spawn_blocking(move || write_atomic(&dir, &target, &contents))
                    .await??;
                self.state().entries.insert(hash.clone());
            }
            None if !stored => {
                let mut state = self.state();
                state.texts.insert(hash.clone(), text.to_string());
                state.entries.insert(hash.clone());
            }
            _ => {}
        }

        let mut state = self.state();
        self.register(&mut state, &hash, aliases);
        Ok(hash)
    }

    /// Point additional aliases at an existing entry
    pub fn add_aliases(&self, hash: &ContentHash, aliases: &[Alias]) -> Result<(), CacheError> {
        let mut state = self.state();
        if !state.entries.contains(hash) {
            return Err(CacheError::Missing(hash.clone()));
        }
        self.register(&mut state, hash, aliases);
        Ok(())
    }

    fn register(&self, state: &mut CacheState, hash: &ContentHash, aliases: &[Alias]) {
        for alias in aliases {
            let previous = state.index.aliases.insert(alias.key(), hash.clone());
            state.dirty |= previous.as_ref() != Some(hash) && self.dir.is_some();
        }
    }

    /// Write pending alias changes to `aliases.json`
    pub async fn flush(&self) -> Result<(), CacheError> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let _flushing = self.flushing.lock().await;

        let json = {
            let mut state = self.state();
            if !state.dirty {
                return Ok(());
            }
            state.dirty = false;
            serde_json::to_vec_pretty(&state.index)?
        };

        let dir = dir.clone();
        let target = dir.join(ALIAS_FILE);
        let written = tokio::task::spawn_blocking(move || write_atomic(&dir, &target, &json)).await;
        if !matches!(written, Ok(Ok(()))) {
            self.state().dirty = true;
        }
        written??;
        tracing::debug!("full-text alias index flushed");
        Ok(())
    }

    /// Return the text for a downloaded body, extracting it at most once
    ///
    /// Concurrent callers holding the same body digest share one extraction;
    /// the losers wait and then read the stored entry.
    pub async fn get_or_extract<F, Fut, E>(
        &self,
        body: &ContentHash,
        extract: F,
    ) -> Result<CachedText, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
        E: From<CacheError>,
    {
        let alias = Alias::Body(body.clone());
        if let Some(cached) = self.get_by_alias(&alias).await? {
            tracing::debug!(body = %body, "full-text cache hit");
            return Ok(cached);
        }

        let cell = {
            let mut inflight = self.inflight.lock().await;
            inflight
                .entry(body.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let extracted_here = AtomicBool::new(false);
        let flag = &extracted_here;
        let alias = &alias;
        let outcome = cell
            .get_or_try_init(move || async move {
                flag.store(true, Ordering::SeqCst);
                tracing::debug!(body = %body, "full-text cache miss, extracting");
                let text = extract().await?;
                Ok::<_, E>(self.put(&text, std::slice::from_ref(alias)).await?)
            })
            .await
            .cloned();
        self.inflight.lock().await.remove(body);

        let hash = outcome?;
        let text = self
            .get(&hash)
            .await?
            .ok_or_else(|| CacheError::Missing(hash.clone()))?;
        Ok(CachedText {
            hash,
            text,
            cache_hit: !extracted_here.load(Ordering::SeqCst),
        })
    }
}

fn write_atomic(dir: &Path, target: &Path, contents: &[u8]) -> Result<(), CacheError> {
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(contents)?;
    file.flush()?;
    file.persist(target).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_put_get_in_memory() {
        let cache = FullTextCache::in_memory();
        let hash = cache
            .put("body text", &[Alias::Doi("10.1/X".to_string())])
            .await
            .unwrap();

        assert_eq!(hash, ContentHash::of_text("body text"));
        assert!(cache.contains(&hash));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&hash).await.unwrap().as_deref(), Some("body text"));
        // DOI aliases are case-insensitive
        assert_eq!(cache.lookup(&Alias::Doi("10.1/x".to_string())), Some(hash));
        assert!(!cache.is_persistent());
        assert!(!cache.has_unflushed_aliases());
    }

    #[tokio::test]
    async fn test_persistent_cache_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let hash = {
            let cache = FullTextCache::open(dir.path()).unwrap();
            let hash = cache
                .put(
                    "persisted text",
                    &[Alias::Url("https://example.org/paper.pdf".to_string())],
                )
                .await
                .unwrap();
            cache.flush().await.unwrap();
            hash
        };

        assert!(dir
            .path()
            .join("fulltext")
            .join(format!("{}.txt", hash))
            .exists());

        let reopened = FullTextCache::open(dir.path()).unwrap();
        assert_eq!(reopened.len(), 1);
        let cached = reopened
            .get_by_alias(&Alias::Url("https://example.org/paper.pdf".to_string()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached.text, "persisted text");
        assert!(cached.cache_hit);
    }

    #[tokio::test]
    async fn test_alias_index_written_on_flush_only() {
        let dir = tempfile::tempdir().unwrap();
        let alias_file = dir.path().join("fulltext").join(ALIAS_FILE);
        let cache = FullTextCache::open(dir.path()).unwrap();

        let hash = cache
            .put("entry text", &[Alias::Doi("10.1/a".to_string())])
            .await
            .unwrap();
        cache
            .add_aliases(&hash, &[Alias::Url("https://example.org/a".to_string())])
            .unwrap();
        // entry file goes out immediately, the index waits
        assert!(dir.path().join("fulltext").join(format!("{}.txt", hash)).exists());
        assert!(!alias_file.exists());
        assert!(cache.has_unflushed_aliases());

        cache.flush().await.unwrap();
        assert!(!cache.has_unflushed_aliases());
        let index: AliasIndex =
            serde_json::from_str(&std::fs::read_to_string(&alias_file).unwrap()).unwrap();
        assert_eq!(index.aliases.len(), 2);

        // re-registering an unchanged alias leaves nothing to write
        cache
            .add_aliases(&hash, &[Alias::Doi("10.1/A".to_string())])
            .unwrap();
        assert!(!cache.has_unflushed_aliases());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_puts_share_one_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(FullTextCache::open(dir.path()).unwrap());

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move {
                    cache
                        .put("shared text", &[Alias::Url(format!("https://example.org/{}", i))])
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        cache.flush().await.unwrap();

        let reopened = FullTextCache::open(dir.path()).unwrap();
        assert_eq!(reopened.len(), 1);
        for i in 0..8 {
            assert!(reopened
                .lookup(&Alias::Url(format!("https://example.org/{}", i)))
                .is_some());
        }
    }

    #[test]
    fn test_add_aliases_requires_entry() {
        let cache = FullTextCache::in_memory();
        let unknown = ContentHash::of_text("never stored");
        assert!(matches!(
            cache.add_aliases(&unknown, &[Alias::Doi("10.1/a".to_string())]),
            Err(CacheError::Missing(_))
        ));
    }

    #[tokio::test]
    async fn test_get_or_extract_runs_once_per_body() {
        let cache = Arc::new(FullTextCache::in_memory());
        let body = ContentHash::of_bytes(b"%PDF-1.7 same bytes");
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let body = body.clone();
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    cache
                        .get_or_extract(&body, || async {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                            Ok::<_, CacheError>("extracted".to_string())
                        })
                        .await
                })
            })
            .collect();

        let mut hits = 0;
        for task in tasks {
            let cached = task.await.unwrap().unwrap();
            assert_eq!(cached.text, "extracted");
            hits += usize::from(cached.cache_hit);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(hits, 3);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_extraction_is_retried() {
        let cache = FullTextCache::in_memory();
        let body = ContentHash::of_bytes(b"broken");

        let first = cache
            .get_or_extract(&body, || async {
                Err::<String, _>(CacheError::Missing(ContentHash::of_text("x")))
            })
            .await;
        assert!(first.is_err());

        let second = cache
            .get_or_extract(&body, || async { Ok::<_, CacheError>("fixed".to_string()) })
            .await
            .unwrap();
        assert!(!second.cache_hit);
        assert_eq!(cache.len(), 1);
    }
}
