//! Cache layout and configuration
//!
//! All on-disk paths derive from the cache root and from key hashes:
//!
//! ```text
//! <root>/config.lock  config.json      global lock + persisted settings
//! <root>/trim.lock    trim.txt         trim scheduling
//! <root>/data/<pp>-t/lockfile info     partition lock (trim)
//! <root>/data/<pp>-t/<40-hex>/…        item directory
//! ```
//!
//! The first process to open a root initialises it: `config.json`, README
//! and all 256 partition directories are created under the exclusive global
//! lock. Later opens adopt the persisted `maxAge` regardless of their own
//! argument.

use crate::cache::update::update_under_lock;
use crate::error::{KilnError, KilnResult};
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Minimum max-age accepted by the public constructor
pub const MIN_MAX_AGE: Duration = Duration::from_secs(10);
/// Minimum max-age accepted internally, to keep expiry tests fast
pub(crate) const MIN_MAX_AGE_INTERNAL: Duration = Duration::from_millis(10);
/// Default max-age used by [`Cache::open_default`]
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(10 * 24 * 60 * 60);

const README_TEXT: &str = "cache folder maintained by kiln\n";

/// A lockfile and the data file it guards
#[derive(Debug, Clone)]
pub struct LockPair {
    pub lockfile: PathBuf,
    pub datafile: PathBuf,
}

impl LockPair {
    fn new(dir: &Path, lockfile: &str, datafile: &str) -> Self {
        Self {
            lockfile: dir.join(lockfile),
            datafile: dir.join(datafile),
        }
    }

    /// Directory holding both files
    pub fn dir(&self) -> &Path {
        self.lockfile.parent().unwrap_or(Path::new("/"))
    }
}

/// Handle to an initialised cache root
#[derive(Debug, Clone)]
pub struct Cache {
    dir: PathBuf,
    max_age: Duration,
    pub(crate) re_part: Regex,
    pub(crate) re_item: Regex,
    pub(crate) re_object: Regex,
}

impl Cache {
    /// Open (initialising if needed) the cache at `dir`.
    ///
    /// `max_age` must be at least 10 seconds. If the root was initialised
    /// earlier, the persisted max-age wins over the argument.
    pub fn open(dir: impl Into<PathBuf>, max_age: Duration) -> KilnResult<Self> {
        Self::open_with_floor(dir.into(), max_age, MIN_MAX_AGE)
    }

    /// Open the default per-user cache (`<user-cache-dir>/kiln`, 10 days).
    pub fn open_default() -> KilnResult<Self> {
        let base = dirs::cache_dir()
            .ok_or_else(|| KilnError::bad_config("no user cache directory available"))?;
        Self::open(base.join("kiln"), DEFAULT_MAX_AGE)
    }

    /// Like [`Cache::open`] but allowing max-ages down to 10 ms, so expiry
    /// can be exercised quickly in tests.
    pub(crate) fn open_internal(dir: impl Into<PathBuf>, max_age: Duration) -> KilnResult<Self> {
        Self::open_with_floor(dir.into(), max_age, MIN_MAX_AGE_INTERNAL)
    }

    fn open_with_floor(dir: PathBuf, max_age: Duration, floor: Duration) -> KilnResult<Self> {
        if max_age < floor {
            return Err(KilnError::bad_config(format!(
                "maxAge minimum is {}",
                format_duration(floor)
            )));
        }
        let dir = validate_root(dir)?;

        let mut cache = Self {
            dir,
            max_age,
            re_part: compile_pattern(r"^[a-z0-9]{2}-t$")?,
            re_item: compile_pattern(r"^[a-z0-9]{40}$")?,
            re_object: compile_pattern(r"^[a-z0-9]{8}$")?,
        };

        mkdir_all_race(&cache.dir)?;

        let global = cache.global_lock();
        let data_dir = cache.data_dir();
        let parts: Vec<PathBuf> = (0..=255u8).map(|p| cache.part_dir(p)).collect();
        let root = cache.dir.clone();

        let adopted = update_under_lock(&global.lockfile, &global.datafile, |old, w| {
            if old.is_empty() {
                debug!("initialising cache root {}", root.display());
                ensure_dir(&data_dir)?;
                for part in &parts {
                    ensure_dir(part)?;
                }
                write_readme(&root);
                w.commit(&config_json(max_age)?)?;
                Ok(max_age)
            } else {
                let stored = parse_config_json(old)?;
                if stored < floor {
                    return Err(KilnError::bad_config(format!(
                        "persisted maxAge too short: {}",
                        format_duration(stored)
                    )));
                }
                Ok(stored)
            }
        })?;

        cache.max_age = adopted;
        Ok(cache)
    }

    /// The cache root directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Age beyond which items are eligible for trimming
    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Items older than this are re-stamped on read
    pub(crate) fn refresh_age(&self) -> Duration {
        self.max_age / 10
    }

    pub(crate) fn data_dir(&self) -> PathBuf {
        self.dir.join("data")
    }

    pub(crate) fn part_dir(&self, part: u8) -> PathBuf {
        self.data_dir().join(format!("{:02x}-t", part))
    }

    pub(crate) fn global_lock(&self) -> LockPair {
        LockPair::new(&self.dir, "config.lock", "config.json")
    }

    pub(crate) fn trim_lock(&self) -> LockPair {
        LockPair::new(&self.dir, "trim.lock", "trim.txt")
    }

    pub(crate) fn part_lock(&self, hash: &str) -> KilnResult<LockPair> {
        let part = part_for_hash(hash)?;
        Ok(self.part_lock_at(part))
    }

    pub(crate) fn part_lock_at(&self, part: u8) -> LockPair {
        LockPair::new(&self.part_dir(part), "lockfile", "info")
    }

    /// Item directories use the first 160 bits of the key hash.
    pub(crate) fn item_lock(&self, hash: &str) -> KilnResult<LockPair> {
        let part = part_for_hash(hash)?;
        let dir = self.part_dir(part).join(&hash[..40]);
        Ok(LockPair::new(&dir, "lockfile", "info"))
    }
}

fn compile_pattern(pattern: &str) -> KilnResult<Regex> {
    Regex::new(pattern)
        .map_err(|e| KilnError::Internal(format!("bad safety pattern {:?}: {}", pattern, e)))
}

fn part_for_hash(hash: &str) -> KilnResult<u8> {
    if hash.len() < 40 {
        return Err(KilnError::Internal(format!("short key hash: {:?}", hash)));
    }
    u8::from_str_radix(&hash[..2], 16)
        .map_err(|_| KilnError::Internal(format!("bad key hash prefix: {:?}", &hash[..2])))
}

fn validate_root(dir: PathBuf) -> KilnResult<PathBuf> {
    let s = dir
        .to_str()
        .ok_or_else(|| KilnError::bad_config(format!("cache dir is not utf8: {:?}", dir)))?;
    if s.contains('\0') {
        return Err(KilnError::bad_config(format!(
            "bad characters in cache dir: {:?}",
            s
        )));
    }
    if !dir.is_absolute() {
        return Err(KilnError::bad_config(format!(
            "cache dir is not absolute: {:?}",
            s
        )));
    }
    Ok(dir)
}

/// Create `dir` and any missing ancestors. Safe to run from many processes
/// at once: individual mkdir races are ignored, only the final state counts.
pub(crate) fn mkdir_all_race(dir: &Path) -> KilnResult<()> {
    if !dir.is_absolute() {
        return Err(KilnError::Internal(format!(
            "mkdir of non-absolute path: {:?}",
            dir
        )));
    }
    let mut missing = Vec::new();
    let mut cursor = dir;
    loop {
        match fs::metadata(cursor) {
            Ok(meta) if meta.is_dir() => break,
            Ok(_) => {
                return Err(KilnError::bad_config(format!(
                    "not a directory: {}",
                    cursor.display()
                )))
            }
            Err(_) => {
                missing.push(cursor.to_path_buf());
                match cursor.parent() {
                    Some(parent) if parent != cursor => cursor = parent,
                    _ => break,
                }
            }
        }
    }
    for d in missing.iter().rev() {
        let _ = fs::create_dir(d); // losing the race is fine
    }
    match fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(KilnError::bad_config(format!(
            "not a directory: {}",
            dir.display()
        ))),
        Err(e) => Err(KilnError::io(
            format!("failed to create directory {}", dir.display()),
            e,
        )),
    }
}

/// mkdir that tolerates a concurrent winner
pub(crate) fn ensure_dir(dir: &Path) -> KilnResult<()> {
    match fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(KilnError::bad_config(format!(
            "not a directory: {}",
            dir.display()
        ))),
        Err(_) => match fs::create_dir(dir) {
            Ok(()) => Ok(()),
            Err(e) => match fs::metadata(dir) {
                Ok(meta) if meta.is_dir() => Ok(()),
                _ => Err(KilnError::io(
                    format!("failed to create directory {}", dir.display()),
                    e,
                )),
            },
        },
    }
}

fn write_readme(dir: &Path) {
    // informational only, losing this write is harmless
    let _ = fs::write(dir.join("README"), README_TEXT);
}

fn config_json(max_age: Duration) -> KilnResult<String> {
    let mut m = BTreeMap::new();
    m.insert("#info-maxAge".to_string(), "valid units are h, m, s and ms".to_string());
    m.insert("maxAge".to_string(), format_duration(max_age));
    let body = serde_json::to_string_pretty(&m)?;
    Ok(body + "\n")
}

fn parse_config_json(old: &str) -> KilnResult<Duration> {
    let m: BTreeMap<String, String> = serde_json::from_str(old)?;
    let raw = m
        .get("maxAge")
        .ok_or_else(|| KilnError::bad_config("config.json is missing maxAge"))?;
    parse_duration(raw).map_err(|e| KilnError::bad_config(format!("bad maxAge {:?}: {}", raw, e)))
}

/// Parse a Go-style duration string, e.g. `"24h"`, `"1h30m"`, `"200ms"`.
/// Supported units: `h`, `m`, `s`, `ms`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }
    let bytes = s.as_bytes();
    let mut i = 0;
    let mut total_ms: u64 = 0;
    while i < bytes.len() {
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if start == i {
            return Err(format!("expected a number in duration: {:?}", s));
        }
        let num: u64 = s[start..i]
            .parse()
            .map_err(|_| format!("invalid number in duration: {:?}", s))?;
        if i >= bytes.len() {
            return Err(format!("missing unit in duration: {:?}", s));
        }
        let unit_ms = if bytes[i] == b'm' && i + 1 < bytes.len() && bytes[i + 1] == b's' {
            i += 2;
            1
        } else {
            let c = bytes[i];
            i += 1;
            match c {
                b'h' => 3_600_000,
                b'm' => 60_000,
                b's' => 1_000,
                _ => return Err(format!("unknown duration unit in {:?}", s)),
            }
        };
        total_ms = total_ms.saturating_add(num.saturating_mul(unit_ms));
    }
    Ok(Duration::from_millis(total_ms))
}

/// Format a duration in the same style [`parse_duration`] reads.
/// Sub-millisecond precision is dropped.
pub fn format_duration(d: Duration) -> String {
    let mut ms = d.as_millis() as u64;
    let h = ms / 3_600_000;
    ms %= 3_600_000;
    let m = ms / 60_000;
    ms %= 60_000;
    let s = ms / 1_000;
    ms %= 1_000;

    let mut out = String::new();
    if h > 0 {
        out.push_str(&format!("{}h", h));
    }
    if m > 0 {
        out.push_str(&format!("{}m", m));
    }
    if s > 0 {
        out.push_str(&format!("{}s", s));
    }
    if ms > 0 {
        out.push_str(&format!("{}ms", ms));
    }
    if out.is_empty() {
        out.push_str("0s");
    }
    out
}
