//! Item records
//!
//! One record per cache item, stored in the item's `info` file:
//!
//! ```text
//! <objdir-abspath> <unix-seconds> <unix-nanos>\n
//! ```
//!
//! Content after the first newline is allowed and ignored, which keeps a
//! record readable when a failed shorter rewrite left a stale tail behind.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Parsed contents of an item's `info` file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRecord {
    /// Absolute path of the live object directory
    pub objdir: PathBuf,
    pub unix_secs: i64,
    /// Sub-second part; kept so very short max-ages work in tests
    pub unix_nanos: u32,
}

impl ItemRecord {
    /// New record for `objdir`, stamped with the current wall-clock time
    pub fn new(objdir: impl Into<PathBuf>) -> Self {
        let mut record = Self {
            objdir: objdir.into(),
            unix_secs: 0,
            unix_nanos: 0,
        };
        record.refresh();
        record
    }

    /// Bump the timestamp to now
    pub fn refresh(&mut self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        self.unix_secs = now.as_secs() as i64;
        self.unix_nanos = now.subsec_nanos();
    }

    /// Wall-clock age of the record, absolute value
    pub fn age(&self) -> Duration {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        let then = Duration::new(self.unix_secs.max(0) as u64, self.unix_nanos);
        if now >= then {
            now - then
        } else {
            then - now
        }
    }

    /// Serialize to the single-line wire form, newline-terminated
    pub fn to_line(&self) -> String {
        format!(
            "{} {} {}\n",
            self.objdir.display(),
            self.unix_secs,
            self.unix_nanos
        )
    }

    /// Parse the wire form. Fields after the first newline are ignored.
    pub fn parse(s: &str) -> Result<Self, String> {
        let line = match s.find('\n') {
            Some(k) => &s[..k],
            None => return Err("missing newline".to_string()),
        };
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 3 {
            return Err(format!("expected three fields, got {}", fields.len()));
        }
        let unix_secs: i64 = fields[1]
            .parse()
            .map_err(|e| format!("bad seconds field {:?}: {}", fields[1], e))?;
        let unix_nanos: u32 = fields[2]
            .parse()
            .map_err(|e| format!("bad nanos field {:?}: {}", fields[2], e))?;
        Ok(Self {
            objdir: PathBuf::from(fields[0]),
            unix_secs,
            unix_nanos,
        })
    }

    pub fn objdir(&self) -> &Path {
        &self.objdir
    }
}
