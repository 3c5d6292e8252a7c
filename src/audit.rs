// =============================================================================
// Audit Log — append-only JSONL with size rotation and age compression
// =============================================================================
//
// One JSON object per line, one writer per process (serialized behind a
// mutex). When the active file passes the size limit it is renamed with an
// ISO-8601 suffix; rotations older than the compression age are gzipped.
// Queries read current + rotated (+gz) files transparently, oldest first.
// =============================================================================

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Record categories the pipeline emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditKind {
    Signal,
    Execution,
    Close,
    Error,
}

/// A single audit line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    #[serde(rename = "type")]
    pub kind: AuditKind,
    pub timestamp_ms: i64,
    /// Emitting component, e.g. "detection" or "router".
    pub component: String,
    pub payload: serde_json::Value,
}

impl AuditRecord {
    pub fn new(kind: AuditKind, component: &str, payload: serde_json::Value) -> Self {
        Self {
            kind,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            component: component.to_string(),
            payload,
        }
    }
}

struct Writer {
    file: File,
    bytes_written: u64,
}

/// The append-only log at `<dir>/trades.jsonl` plus its rotations.
pub struct AuditLog {
    dir: PathBuf,
    rotate_bytes: u64,
    compress_after_days: i64,
    writer: Mutex<Option<Writer>>,
}

const ACTIVE_NAME: &str = "trades.jsonl";

impl AuditLog {
    /// Open (or create) the log directory. The active file is opened lazily
    /// on first append.
    pub fn open(dir: impl Into<PathBuf>, rotate_bytes: u64, compress_after_days: i64) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create audit dir {}", dir.display()))?;
        Ok(Self {
            dir,
            rotate_bytes,
            compress_after_days,
            writer: Mutex::new(None),
        })
    }

    fn active_path(&self) -> PathBuf {
        self.dir.join(ACTIVE_NAME)
    }

    /// Append one record. Rotation happens after the write that crossed the
    /// size limit, so no record is ever split across files.
    pub fn append(&self, record: &AuditRecord) -> Result<()> {
        let line = serde_json::to_string(record).context("failed to serialize audit record")?;

        let mut guard = self.writer.lock();
        if guard.is_none() {
            let path = self.active_path();
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("failed to open audit log {}", path.display()))?;
            let bytes_written = file.metadata().map(|m| m.len()).unwrap_or(0);
            *guard = Some(Writer {
                file,
                bytes_written,
            });
        }

        let writer = guard.as_mut().expect("writer opened above");
        writer
            .file
            .write_all(line.as_bytes())
            .context("audit write failed")?;
        writer.file.write_all(b"\n").context("audit write failed")?;
        writer.bytes_written += line.len() as u64 + 1;

        if writer.bytes_written >= self.rotate_bytes {
            let rotated = self.rotated_name();
            *guard = None; // close the active handle before the rename
            std::fs::rename(self.active_path(), &rotated)
                .with_context(|| format!("failed to rotate audit log to {}", rotated.display()))?;
            info!(rotated = %rotated.display(), "audit log rotated");
        }
        Ok(())
    }

    fn rotated_name(&self) -> PathBuf {
        // Colon-free ISO-8601 so the name is valid on every filesystem and
        // still sorts chronologically.
        let stamp = chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S%.3f");
        let base = self.dir.join(format!("trades-{stamp}.jsonl"));
        if !base.exists() {
            return base;
        }
        // Two rotations inside one millisecond: disambiguate with a counter.
        for n in 1.. {
            let candidate = self.dir.join(format!("trades-{stamp}-{n}.jsonl"));
            if !candidate.exists() {
                return candidate;
            }
        }
        unreachable!("counter loop always returns")
    }

    /// Gzip rotations older than `compress_after_days`. Returns how many
    /// files were compressed.
    pub fn compress_old_rotations(&self) -> Result<usize> {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(self.compress_after_days);
        let mut compressed = 0usize;

        for path in self.rotation_paths()? {
            if path.extension().and_then(|e| e.to_str()) == Some("gz") {
                continue;
            }
            let modified: chrono::DateTime<chrono::Utc> = std::fs::metadata(&path)?
                .modified()
                .context("rotation has no mtime")?
                .into();
            if modified >= cutoff {
                continue;
            }

            let gz_path = PathBuf::from(format!("{}.gz", path.display()));
            let input = File::open(&path)?;
            let output = File::create(&gz_path)?;
            let mut encoder = GzEncoder::new(output, Compression::default());
            std::io::copy(&mut BufReader::new(input), &mut encoder)
                .with_context(|| format!("failed to compress {}", path.display()))?;
            encoder.finish().context("gzip finish failed")?;
            std::fs::remove_file(&path)?;
            compressed += 1;
            info!(path = %gz_path.display(), "audit rotation compressed");
        }
        Ok(compressed)
    }

    /// All rotated files (plain and gz), sorted oldest first by name.
    fn rotation_paths(&self) -> Result<Vec<PathBuf>> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("trades-") && n.contains(".jsonl"))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Run `predicate` over every record, rotations first (oldest to
    /// newest), then the active file. Compressed rotations are decoded
    /// transparently; unparseable lines are skipped with a warning.
    pub fn query<F>(&self, predicate: F) -> Result<Vec<AuditRecord>>
    where
        F: Fn(&AuditRecord) -> bool,
    {
        let mut results = Vec::new();

        let mut files = self.rotation_paths()?;
        let active = self.active_path();
        if active.exists() {
            files.push(active);
        }

        for path in files {
            let file =
                File::open(&path).with_context(|| format!("failed to open {}", path.display()))?;
            let reader: Box<dyn Read> =
                if path.extension().and_then(|e| e.to_str()) == Some("gz") {
                    Box::new(GzDecoder::new(file))
                } else {
                    Box::new(file)
                };

            for line in BufReader::new(reader).lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<AuditRecord>(&line) {
                    Ok(record) => {
                        if predicate(&record) {
                            results.push(record);
                        }
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping bad audit line"),
                }
            }
        }
        Ok(results)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(kind: AuditKind, seq: i64) -> AuditRecord {
        AuditRecord {
            kind,
            timestamp_ms: 1_700_000_000_000 + seq,
            component: "detection".into(),
            payload: json!({ "seq": seq }),
        }
    }

    #[test]
    fn append_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(dir.path(), 10 * 1024 * 1024, 30).unwrap();

        log.append(&record(AuditKind::Signal, 1)).unwrap();
        log.append(&record(AuditKind::Execution, 2)).unwrap();
        log.append(&record(AuditKind::Error, 3)).unwrap();

        let signals = log.query(|r| r.kind == AuditKind::Signal).unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].payload["seq"], 1);

        let all = log.query(|_| true).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn rotation_on_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        // Tiny limit so the second append rotates.
        let log = AuditLog::open(dir.path(), 64, 30).unwrap();

        log.append(&record(AuditKind::Signal, 1)).unwrap();
        log.append(&record(AuditKind::Signal, 2)).unwrap();
        log.append(&record(AuditKind::Signal, 3)).unwrap();

        let rotations = log.rotation_paths().unwrap();
        assert!(!rotations.is_empty(), "expected at least one rotation");

        // Concatenated query still sees every record, in append order.
        let all = log.query(|_| true).unwrap();
        assert_eq!(all.len(), 3);
        let seqs: Vec<i64> = all.iter().map(|r| r.payload["seq"].as_i64().unwrap()).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn timestamps_non_decreasing_across_rotations() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(dir.path(), 96, 30).unwrap();
        for seq in 0..10 {
            log.append(&record(AuditKind::Execution, seq)).unwrap();
        }
        let all = log.query(|_| true).unwrap();
        let stamps: Vec<i64> = all.iter().map(|r| r.timestamp_ms).collect();
        let mut sorted = stamps.clone();
        sorted.sort();
        assert_eq!(stamps, sorted);
    }

    #[test]
    fn query_reads_compressed_rotations() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(dir.path(), 10 * 1024 * 1024, 30).unwrap();

        // Write a rotation by hand, then gzip it the way the compactor does.
        let rotated = dir.path().join("trades-2024-01-01T00-00-00.000.jsonl");
        let mut f = File::create(&rotated).unwrap();
        let line = serde_json::to_string(&record(AuditKind::Close, 42)).unwrap();
        writeln!(f, "{line}").unwrap();
        drop(f);

        let gz = PathBuf::from(format!("{}.gz", rotated.display()));
        let mut encoder = GzEncoder::new(File::create(&gz).unwrap(), Compression::default());
        std::io::copy(&mut File::open(&rotated).unwrap(), &mut encoder).unwrap();
        encoder.finish().unwrap();
        std::fs::remove_file(&rotated).unwrap();

        log.append(&record(AuditKind::Close, 43)).unwrap();

        let all = log.query(|r| r.kind == AuditKind::Close).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].payload["seq"], 42);
        assert_eq!(all[1].payload["seq"], 43);
    }

    #[test]
    fn compress_old_rotations_respects_age() {
        let dir = tempfile::tempdir().unwrap();
        // compress_after_days = 0 so anything already on disk qualifies.
        let log = AuditLog::open(dir.path(), 48, 0).unwrap();
        log.append(&record(AuditKind::Signal, 1)).unwrap();
        log.append(&record(AuditKind::Signal, 2)).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        let compressed = log.compress_old_rotations().unwrap();
        assert!(compressed >= 1);

        // Everything still readable.
        let all = log.query(|_| true).unwrap();
        assert_eq!(all.len(), 2);
    }
}
