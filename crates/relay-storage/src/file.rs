//! JSON-lines file backend
//!
//! One `undelivered_<topic>.json` file per topic, one `{"message": ...}`
//! record per line. Files are created on the first append and removed once a
//! replay clears every record.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use relay_types::{Error, Payload, Result, UndeliveredRecord};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::traits::{DrainedRecords, LogMark, UndeliveredLog};

/// File-backed undelivered log
pub struct FileLog {
    /// Directory holding the log files
    dir: PathBuf,
    /// Serializes access to each topic's file
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FileLog {
    /// Open (and create if needed) a log directory
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::persistence("*", format!("{}: {}", dir.display(), e)))?;

        info!(dir = %dir.display(), "Undelivered log directory ready");
        Ok(Self {
            dir,
            locks: DashMap::new(),
        })
    }

    /// Directory holding the log files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the log file for a topic
    pub fn path_for(&self, topic: &str) -> PathBuf {
        self.dir.join(file_name(topic))
    }

    fn lock_for(&self, topic: &str) -> Arc<Mutex<()>> {
        self.locks.entry(topic.to_string()).or_default().clone()
    }
}

/// `undelivered_<topic>.json`, with path-unsafe characters replaced
fn file_name(topic: &str) -> String {
    let safe: String = topic
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("undelivered_{}.json", safe)
}

/// Whole log file, or `None` when the topic has none yet
async fn read_log(path: &Path, topic: &str) -> Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::persistence(topic, e)),
    }
}

/// Decode every well-formed record; broken lines are skipped, and reported
/// when `report` is set.
fn decode_records(topic: &str, bytes: &[u8], report: bool) -> Vec<Payload> {
    let mut payloads = Vec::new();

    for (index, raw) in bytes.split(|b| *b == b'\n').enumerate() {
        let decoded = std::str::from_utf8(raw)
            .map_err(|e| e.to_string())
            .map(str::trim)
            .and_then(|line| {
                if line.is_empty() {
                    Ok(None)
                } else {
                    UndeliveredRecord::from_line(line)
                        .map(Some)
                        .map_err(|e| e.to_string())
                }
            });

        match decoded {
            Ok(Some(record)) => payloads.push(record.message),
            Ok(None) => {}
            Err(reason) if report => {
                let err = Error::ReplayParse {
                    topic: topic.to_string(),
                    line: index + 1,
                    reason,
                };
                warn!(topic = %topic, error = %err, "Skipping undelivered record");
            }
            Err(_) => {}
        }
    }

    payloads
}

#[async_trait]
impl UndeliveredLog for FileLog {
    async fn append(&self, topic: &str, payload: &Payload) -> Result<()> {
        let mut line = UndeliveredRecord::new(payload.clone())
            .to_line()
            .map_err(|e| Error::persistence(topic, e))?;
        line.push('\n');

        let path = self.path_for(topic);
        let lock = self.lock_for(topic);
        let _guard = lock.lock().await;

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| Error::persistence(topic, e))?;

        // A crash mid-write leaves a line without its newline; start a fresh
        // line so the torn fragment cannot swallow this record.
        let len = file
            .metadata()
            .await
            .map_err(|e| Error::persistence(topic, e))?
            .len();
        if len > 0 {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::End(-1))
                .await
                .map_err(|e| Error::persistence(topic, e))?;
            file.read_exact(&mut last)
                .await
                .map_err(|e| Error::persistence(topic, e))?;
            if last[0] != b'\n' {
                warn!(topic = %topic, "Undelivered log ends with a torn record");
                line.insert(0, '\n');
            }
        }

        file.write_all(line.as_bytes())
            .await
            .map_err(|e| Error::persistence(topic, e))?;
        file.flush().await.map_err(|e| Error::persistence(topic, e))?;
        // fsync for durability
        file.sync_all()
            .await
            .map_err(|e| Error::persistence(topic, e))?;

        debug!(topic = %topic, path = %path.display(), "Undelivered message saved");
        Ok(())
    }

    async fn drain(&self, topic: &str) -> Result<DrainedRecords> {
        let path = self.path_for(topic);
        let lock = self.lock_for(topic);
        let _guard = lock.lock().await;

        let Some(bytes) = read_log(&path, topic).await? else {
            return Ok(DrainedRecords::default());
        };

        let payloads = decode_records(topic, &bytes, true);

        debug!(
            topic = %topic,
            count = payloads.len(),
            "Undelivered records read"
        );

        Ok(DrainedRecords {
            payloads,
            mark: LogMark(bytes.len() as u64),
        })
    }

    async fn clear(&self, topic: &str, mark: LogMark) -> Result<()> {
        let path = self.path_for(topic);
        let lock = self.lock_for(topic);
        let _guard = lock.lock().await;

        let Some(bytes) = read_log(&path, topic).await? else {
            return Ok(());
        };

        let cut = (mark.0 as usize).min(bytes.len());
        let rest = &bytes[cut..];

        if rest.iter().all(u8::is_ascii_whitespace) {
            fs::remove_file(&path)
                .await
                .map_err(|e| Error::persistence(topic, e))?;
            info!(topic = %topic, "Undelivered log cleared");
            return Ok(());
        }

        // Records appended after the drain are kept: rewrite them through a
        // temporary file so a crash never leaves a truncated log behind.
        let tmp = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp)
            .await
            .map_err(|e| Error::persistence(topic, e))?;
        file.write_all(rest)
            .await
            .map_err(|e| Error::persistence(topic, e))?;
        file.sync_all()
            .await
            .map_err(|e| Error::persistence(topic, e))?;
        drop(file);

        fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::persistence(topic, e))?;

        info!(
            topic = %topic,
            kept_bytes = rest.len(),
            "Undelivered log cleared, newer records kept"
        );
        Ok(())
    }

    /// True only when at least one record would come back from `drain`
    async fn has_pending(&self, topic: &str) -> Result<bool> {
        let path = self.path_for(topic);
        let lock = self.lock_for(topic);
        let _guard = lock.lock().await;

        Ok(read_log(&path, topic)
            .await?
            .is_some_and(|bytes| !decode_records(topic, &bytes, false).is_empty()))
    }
}
