//! Two-tier preprocessing cache.
//!
//! The invariant tier answers by content hash alone, but only for files
//! whose output cannot depend on the caller's macro state (no conditionals,
//! empty read set). Every other file goes through the variant tier, keyed by
//! content hash plus a fingerprint of the incoming variable partition
//! restricted to the macros that entry actually read. A per-hash manifest of
//! observed read sets makes those minimal keys computable on later lookups.
//!
//! Entries persist as one JSON file per cache key under the object
//! directory, written via temp-file + rename. Any store failure silently
//! downgrades the cache to memory-only for the rest of the run.

use crate::analyzer::AnalysisResult;
use crate::content::{ContentHash, FileContent};
use crate::macros::{MacroState, StateFingerprint};
use crate::preprocessor::{preprocess, CacheValue, IncludeResolver};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

#[derive(Default)]
struct CacheInner {
    invariant: HashMap<ContentHash, Arc<CacheValue>>,
    variant: HashMap<(ContentHash, StateFingerprint), Arc<CacheValue>>,
    /// Read sets observed per content hash, oldest first.
    manifests: HashMap<ContentHash, Vec<BTreeSet<String>>>,
    /// Per-key single-flight cells: concurrent requests for the same key
    /// wait on one preprocessor run instead of duplicating it.
    inflight: HashMap<(ContentHash, StateFingerprint), Arc<OnceLock<Arc<CacheValue>>>>,
    hits: u64,
    misses: u64,
}

pub struct PreprocessCache {
    dir: Option<PathBuf>,
    disk_ok: AtomicBool,
    inner: Mutex<CacheInner>,
}

impl PreprocessCache {
    /// `dir` is the object directory for persisted entries; `None` keeps the
    /// cache purely in memory.
    pub fn new(dir: Option<PathBuf>) -> Self {
        if let Some(d) = &dir {
            // Failure here just means we run memory-only.
            let _ = fs::create_dir_all(d);
        }
        Self {
            disk_ok: AtomicBool::new(dir.is_some()),
            dir,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Cache-aware preprocessing. On a hit the stored delta is replayed onto
    /// `state`, which by construction yields the same post-state a fresh run
    /// would have produced.
    pub fn lookup_or_preprocess(
        &self,
        content: &FileContent,
        analysis: &AnalysisResult,
        state: &mut MacroState,
        resolver: &dyn IncludeResolver,
    ) -> Arc<CacheValue> {
        let hash = content.hash;
        let conditional_independent = !analysis.has_conditionals;

        if conditional_independent {
            if let Some(value) = self.invariant_entry(hash) {
                self.inner.lock().hits += 1;
                state.apply_delta(&value.defines_delta);
                return value;
            }
        } else if let Some(value) = self.variant_entry(hash, state) {
            self.inner.lock().hits += 1;
            state.apply_delta(&value.defines_delta);
            return value;
        }

        // Miss. The minimal key cannot be known before the run, so
        // single-flight on the full variable fingerprint: identical states
        // dedupe, and the manifest below makes future lookups minimal.
        let flight_key = (hash, state.full_fingerprint());
        let cell = {
            let mut inner = self.inner.lock();
            inner.misses += 1;
            Arc::clone(
                inner
                    .inflight
                    .entry(flight_key)
                    .or_insert_with(|| Arc::new(OnceLock::new())),
            )
        };

        let value = Arc::clone(cell.get_or_init(|| {
            let mut local = state.snapshot();
            Arc::new(preprocess(content, analysis, &mut local, resolver))
        }));

        self.store(hash, state, conditional_independent, &value);
        self.inner.lock().inflight.remove(&flight_key);
        state.apply_delta(&value.defines_delta);
        value
    }

    pub fn stats(&self) -> (u64, u64) {
        let inner = self.inner.lock();
        (inner.hits, inner.misses)
    }

    fn invariant_entry(&self, hash: ContentHash) -> Option<Arc<CacheValue>> {
        if let Some(value) = self.inner.lock().invariant.get(&hash) {
            return Some(Arc::clone(value));
        }
        let value: CacheValue = self.read_entry(&self.invariant_file(hash))?;
        let value = Arc::new(value);
        self.inner
            .lock()
            .invariant
            .insert(hash, Arc::clone(&value));
        Some(value)
    }

    /// Try every read set this content was ever observed with. A candidate
    /// entry only counts when its stored read set matches the one that
    /// produced the fingerprint, otherwise two states that happen to agree
    /// on a smaller set could alias.
    fn variant_entry(&self, hash: ContentHash, state: &MacroState) -> Option<Arc<CacheValue>> {
        let read_sets = self.manifest_for(hash)?;
        for read_set in &read_sets {
            let fp = state.restricted_fingerprint(read_set.iter().map(|s| s.as_str()));
            let key = (hash, fp);
            if let Some(value) = self.inner.lock().variant.get(&key) {
                if value.read_set == *read_set {
                    return Some(Arc::clone(value));
                }
                continue;
            }
            if let Some(value) = self.read_entry::<CacheValue>(&self.variant_file(hash, fp)) {
                if value.read_set == *read_set {
                    let value = Arc::new(value);
                    self.inner.lock().variant.insert(key, Arc::clone(&value));
                    return Some(value);
                }
            }
        }
        None
    }

    fn manifest_for(&self, hash: ContentHash) -> Option<Vec<BTreeSet<String>>> {
        if let Some(sets) = self.inner.lock().manifests.get(&hash) {
            return Some(sets.clone());
        }
        let sets: Vec<BTreeSet<String>> = self.read_entry(&self.meta_file(hash))?;
        self.inner.lock().manifests.insert(hash, sets.clone());
        Some(sets)
    }

    fn store(
        &self,
        hash: ContentHash,
        input_state: &MacroState,
        conditional_independent: bool,
        value: &Arc<CacheValue>,
    ) {
        let fp = input_state.restricted_fingerprint(value.read_set.iter().map(|s| s.as_str()));
        {
            let mut inner = self.inner.lock();
            if conditional_independent && value.read_set.is_empty() {
                inner.invariant.insert(hash, Arc::clone(value));
            }
            inner.variant.insert((hash, fp), Arc::clone(value));
            let sets = inner.manifests.entry(hash).or_default();
            if !sets.contains(&value.read_set) {
                sets.push(value.read_set.clone());
            }
        }

        if conditional_independent && value.read_set.is_empty() {
            self.write_entry(&self.invariant_file(hash), value.as_ref());
        }
        self.write_entry(&self.variant_file(hash, fp), value.as_ref());
        let sets = self.inner.lock().manifests.get(&hash).cloned();
        if let Some(sets) = sets {
            self.write_entry(&self.meta_file(hash), &sets);
        }
    }

    fn invariant_file(&self, hash: ContentHash) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|d| d.join(format!("{}.inv.json", hash.to_hex())))
    }

    fn variant_file(&self, hash: ContentHash, fp: StateFingerprint) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|d| d.join(format!("{}.{}.json", hash.to_hex(), fp.to_hex())))
    }

    fn meta_file(&self, hash: ContentHash) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|d| d.join(format!("{}.meta.json", hash.to_hex())))
    }

    fn read_entry<T: serde::de::DeserializeOwned>(&self, path: &Option<PathBuf>) -> Option<T> {
        if !self.disk_ok.load(Ordering::Relaxed) {
            return None;
        }
        let path = path.as_ref()?;
        let text = fs::read_to_string(path).ok()?;
        serde_json::from_str(&text).ok()
    }

    /// Atomic persist: temp file in the same directory, then rename. Commit
    /// is per entry, so readers never observe a half-written file.
    fn write_entry<T: serde::Serialize>(&self, path: &Option<PathBuf>, value: &T) {
        if !self.disk_ok.load(Ordering::Relaxed) {
            return;
        }
        let Some(path) = path else { return };
        static TMP_SEQ: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let result = (|| -> std::io::Result<()> {
            let text = serde_json::to_string(value)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
            let tmp = path.with_extension(format!("tmp.{}.{seq}", std::process::id()));
            fs::write(&tmp, text)?;
            fs::rename(&tmp, path)?;
            Ok(())
        })();
        if result.is_err() {
            self.disk_ok.store(false, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze;
    use crate::content::LineIndex;
    use crate::macros::Macro;
    use crate::preprocessor::NullResolver;

    fn fixture(text: &str) -> FileContent {
        let bytes = text.as_bytes().to_vec();
        FileContent {
            path: PathBuf::from("/test/cached.hpp"),
            hash: ContentHash::of_bytes(&bytes),
            lines: LineIndex::build(&bytes),
            bytes,
        }
    }

    #[test]
    fn test_invariant_tier_hit() {
        let cache = PreprocessCache::new(None);
        let content = fixture("#define A 1\nint x;\n");
        let analysis = analyze(&content);

        let mut s1 = MacroState::empty();
        cache.lookup_or_preprocess(&content, &analysis, &mut s1, &NullResolver);
        let mut s2 = MacroState::empty();
        s2.define("NOISE".to_string(), Macro::object("1"));
        cache.lookup_or_preprocess(&content, &analysis, &mut s2, &NullResolver);

        let (hits, misses) = cache.stats();
        assert_eq!((hits, misses), (1, 1));
        assert!(s1.is_defined("A"));
        assert!(s2.is_defined("A"));
    }

    #[test]
    fn test_variant_key_ignores_unrelated_macros() {
        let cache = PreprocessCache::new(None);
        let content = fixture("#ifdef WANTED\nint x;\n#endif\n");
        let analysis = analyze(&content);

        let mut s1 = MacroState::empty();
        s1.define("OTHER".to_string(), Macro::object("1"));
        let v1 = cache.lookup_or_preprocess(&content, &analysis, &mut s1, &NullResolver);

        // Different unrelated state, same WANTED status: must hit.
        let mut s2 = MacroState::empty();
        s2.define("DIFFERENT".to_string(), Macro::object("7"));
        let v2 = cache.lookup_or_preprocess(&content, &analysis, &mut s2, &NullResolver);
        assert_eq!(cache.stats().0, 1);
        assert_eq!(v1.active_lines, v2.active_lines);

        // Flipping the read macro must miss and change the result.
        let mut s3 = MacroState::empty();
        s3.define("WANTED".to_string(), Macro::object("1"));
        let v3 = cache.lookup_or_preprocess(&content, &analysis, &mut s3, &NullResolver);
        assert_eq!(cache.stats(), (1, 2));
        assert_ne!(v1.active_lines, v3.active_lines);
    }

    #[test]
    fn test_hit_replay_preserves_undef() {
        let cache = PreprocessCache::new(None);
        let content = fixture("#undef GONE\n");
        let analysis = analyze(&content);

        let mut cold = MacroState::empty();
        cold.define("GONE".to_string(), Macro::object("1"));
        cache.lookup_or_preprocess(&content, &analysis, &mut cold, &NullResolver);
        assert!(!cold.is_defined("GONE"));

        let mut warm = MacroState::empty();
        warm.define("GONE".to_string(), Macro::object("1"));
        cache.lookup_or_preprocess(&content, &analysis, &mut warm, &NullResolver);
        assert!(
            !warm.is_defined("GONE"),
            "replayed delta must not lose the #undef"
        );
    }

    #[test]
    fn test_disk_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let content = fixture("#ifdef K\nint x;\n#endif\n");
        let analysis = analyze(&content);

        {
            let cache = PreprocessCache::new(Some(dir.path().to_path_buf()));
            let mut state = MacroState::empty();
            cache.lookup_or_preprocess(&content, &analysis, &mut state, &NullResolver);
            assert_eq!(cache.stats(), (0, 1));
        }

        // A fresh cache instance warms itself from the same directory.
        let cache = PreprocessCache::new(Some(dir.path().to_path_buf()));
        let mut state = MacroState::empty();
        cache.lookup_or_preprocess(&content, &analysis, &mut state, &NullResolver);
        assert_eq!(cache.stats(), (1, 0));
    }

    #[test]
    fn test_bad_cache_dir_downgrades_silently() {
        let cache = PreprocessCache::new(Some(PathBuf::from("/nonexistent/no/such/dir")));
        let content = fixture("int x;\n");
        let analysis = analyze(&content);
        let mut state = MacroState::empty();
        let value = cache.lookup_or_preprocess(&content, &analysis, &mut state, &NullResolver);
        assert_eq!(value.active_lines, vec![0]);
    }
}
