//! Lookup: the create-or-refresh state machine
//!
//! A lookup hashes its input, takes the lock hierarchy in order (shared
//! global, shared partition, exclusive item) and then either returns the
//! committed object directory or runs the caller's producer in a fresh one.
//! Two lookups of the same key are serialised by the item lock; lookups of
//! different keys in the same partition run in parallel.

use crate::cache::config::{mkdir_all_race, Cache};
use crate::cache::item::ItemRecord;
use crate::cache::lock::{with_lock, LockMode};
use crate::cache::update::update_under_lock;
use crate::error::{KilnError, KilnResult, ProducerError};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Fills a fresh object directory with the artifact of one computation.
///
/// The cache pre-creates `outdir` empty. On error the directory is left in
/// place for inspection and nothing is committed; the next lookup of the
/// same key re-enters the miss path with a new directory.
pub trait Producer {
    fn produce(&self, outdir: &Path) -> Result<(), ProducerError>;
}

impl<F> Producer for F
where
    F: Fn(&Path) -> Result<(), ProducerError>,
{
    fn produce(&self, outdir: &Path) -> Result<(), ProducerError> {
        self(outdir)
    }
}

/// Lower-case hex SHA-256 of the input, always 64 characters.
pub(crate) fn hash_input(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// 8 hex chars = 32 bits, one name per producer invocation
fn random_object_name() -> String {
    let mut buf = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

impl Cache {
    /// Return the object directory for `input`, producing it first if no
    /// committed object exists.
    ///
    /// `input` must fully describe the computation (source text, toolchain
    /// version, environment); the cache only ever compares hashes.
    pub fn lookup(&self, input: &str, producer: &dyn Producer) -> KilnResult<PathBuf> {
        let hash = hash_input(input);
        let global = self.global_lock();
        let part = self.part_lock(&hash)?;
        let item = self.item_lock(&hash)?;

        let item_dir = item.dir().to_path_buf();
        mkdir_all_race(&item_dir)?;

        let refresh_age = self.refresh_age();

        with_lock(&global.lockfile, LockMode::Shared, || {
            with_lock(&part.lockfile, LockMode::Shared, || {
                update_under_lock(&item.lockfile, &item.datafile, |old, w| {
                    if old.is_empty() {
                        // no commit yet: produce into a fresh sibling
                        let outdir = item_dir.join(random_object_name());
                        fs::create_dir(&outdir).map_err(|e| {
                            KilnError::io(
                                format!("create object dir {}", outdir.display()),
                                e,
                            )
                        })?;
                        debug!("cache miss, producing {}", outdir.display());
                        producer.produce(&outdir).map_err(KilnError::Producer)?;

                        // careful: this write is the commit
                        let record = ItemRecord::new(&outdir);
                        w.commit(&record.to_line())?;
                        Ok(outdir)
                    } else {
                        let mut record =
                            ItemRecord::parse(old).map_err(|reason| KilnError::Corrupt {
                                path: item.datafile.clone(),
                                reason,
                            })?;
                        let outdir = record.objdir().to_path_buf();
                        if record.age() > refresh_age {
                            record.refresh();
                            if let Err(e) = w.commit(&record.to_line()) {
                                // the returned objdir stays valid either way
                                warn!(
                                    "refresh of {} failed: {}",
                                    item.datafile.display(),
                                    e
                                );
                            }
                        }
                        Ok(outdir)
                    }
                })
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn open(dir: &TempDir, max_age: Duration) -> Cache {
        Cache::open_internal(dir.path().join("cache"), max_age).unwrap()
    }

    fn writing_producer(
        marker: &'static str,
        calls: Arc<AtomicUsize>,
    ) -> impl Fn(&Path) -> Result<(), ProducerError> {
        move |outdir: &Path| {
            calls.fetch_add(1, Ordering::SeqCst);
            fs::write(outdir.join(marker), b"abc")?;
            Ok(())
        }
    }

    #[test]
    fn hash_is_hex_sha256() {
        let h = hash_input("bb");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(h, hash_input("bb"));
        assert_ne!(h, hash_input("b2"));
    }

    #[test]
    fn miss_then_hit() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, Duration::from_secs(30));

        let calls = Arc::new(AtomicUsize::new(0));
        let p1 = writing_producer("some-file", calls.clone());
        let first = cache.lookup("bb", &p1).unwrap();
        assert!(first.is_absolute());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(first.join("some-file").is_file());

        // second producer must never run
        let second = cache
            .lookup("bb", &|_outdir: &Path| -> Result<(), ProducerError> {
                panic!("hit must not invoke the producer")
            })
            .unwrap();
        assert_eq!(first, second);

        // a distinct key gets a distinct directory
        let p3 = writing_producer("some-file", calls.clone());
        let third = cache.lookup("b2", &p3).unwrap();
        assert_ne!(third, first);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn producer_failure_leaves_directory_and_no_commit() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, Duration::from_secs(30));

        let err = cache
            .lookup("bb", &|outdir: &Path| -> Result<(), ProducerError> {
                fs::write(outdir.join("partial"), b"x")?;
                Err("toolchain exploded".into())
            })
            .unwrap_err();
        assert!(err.is_producer_error());

        // the partial directory survives for inspection
        let hash = hash_input("bb");
        let item_dir = cache.item_lock(&hash).unwrap().dir().to_path_buf();
        let partials: Vec<_> = fs::read_dir(&item_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .collect();
        assert_eq!(partials.len(), 1);
        // no commit happened
        assert!(!item_dir.join("info").exists() || fs::read_to_string(item_dir.join("info")).unwrap().is_empty());

        // the next lookup re-enters the miss path and succeeds
        let calls = Arc::new(AtomicUsize::new(0));
        let p = writing_producer("some-file", calls.clone());
        let objdir = cache.lookup("bb", &p).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(objdir.join("some-file").is_file());
    }

    #[test]
    fn corrupt_record_fails_loudly_without_deletion() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, Duration::from_secs(30));

        let calls = Arc::new(AtomicUsize::new(0));
        let p = writing_producer("some-file", calls.clone());
        let objdir = cache.lookup("bb", &p).unwrap();

        let hash = hash_input("bb");
        let info = cache.item_lock(&hash).unwrap().datafile;
        fs::write(&info, "not a record at all").unwrap();

        let err = cache
            .lookup("bb", &|_outdir: &Path| -> Result<(), ProducerError> {
                panic!("corrupt entry must not re-run the producer")
            })
            .unwrap_err();
        assert!(matches!(err, KilnError::Corrupt { .. }));
        // data is preserved, nothing was deleted
        assert!(objdir.join("some-file").is_file());
    }

    #[test]
    fn concurrent_same_key_produces_once() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, Duration::from_secs(30));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(thread::spawn(move || {
                let p = move |outdir: &Path| -> Result<(), ProducerError> {
                    calls.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(20));
                    fs::write(outdir.join("some-file"), b"abc")?;
                    Ok(())
                };
                cache.lookup("race-key", &p).unwrap()
            }));
        }
        let dirs: Vec<PathBuf> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(dirs.windows(2).all(|w| w[0] == w[1]));
    }

    /// Find a second key whose hash shares the first byte with `base`, so
    /// both land in the same partition.
    fn colliding_key(base: &str) -> String {
        let base_hash = hash_input(base);
        let prefix = &base_hash[..2];
        for i in 0..100_000u32 {
            let candidate = format!("k{}", i);
            if candidate != base && &hash_input(&candidate)[..2] == prefix {
                return candidate;
            }
        }
        unreachable!("no colliding key found");
    }

    #[test]
    fn distinct_keys_on_one_partition_produce_in_parallel() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, Duration::from_secs(30));

        let key_a = "aa".to_string();
        let key_b = colliding_key(&key_a);
        assert_eq!(&hash_input(&key_a)[..2], &hash_input(&key_b)[..2]);

        let started = Instant::now();
        let mut handles = Vec::new();
        for key in [key_a, key_b] {
            let cache = cache.clone();
            handles.push(thread::spawn(move || {
                let p = |outdir: &Path| -> Result<(), ProducerError> {
                    thread::sleep(Duration::from_millis(150));
                    fs::write(outdir.join("some-file"), b"abc")?;
                    Ok(())
                };
                cache.lookup(&key, &p).unwrap()
            }));
        }
        let dirs: Vec<PathBuf> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let elapsed = started.elapsed();

        assert_ne!(dirs[0], dirs[1]);
        // the partition lock is shared for lookups; serial execution would
        // need at least 300ms
        assert!(
            elapsed < Duration::from_millis(290),
            "producers did not overlap: {:?}",
            elapsed
        );
    }
}
