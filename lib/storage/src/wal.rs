use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Append-only line log. One record per line, flushed and synced on append.
pub struct WriteAheadLog {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl WriteAheadLog {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        truncate_torn_tail(&path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening log {}", path.display()))?;

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and sync it to disk before returning.
    pub fn append(&self, record: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.write_all(record)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        writer.get_ref().sync_data()?;
        Ok(())
    }

    /// Every complete record currently in the log, oldest first.
    pub fn replay(&self) -> Result<Vec<String>> {
        let file = File::open(&self.path)?;
        let mut records = Vec::new();
        for (n, line) in BufReader::new(file).lines().enumerate() {
            match line {
                Ok(line) if line.trim().is_empty() => {}
                Ok(line) => records.push(line),
                Err(e) => {
                    warn!("Stopping replay of {} at line {}: {}", self.path.display(), n + 1, e);
                    break;
                }
            }
        }
        Ok(records)
    }
}

/// Cut an unterminated final record left by a crash mid-append, so the next
/// append starts on a fresh line. Such a record was never acknowledged.
fn truncate_torn_tail(path: &Path) -> Result<()> {
    let mut file = match OpenOptions::new().read(true).write(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("opening log {}", path.display())),
    };
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(());
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(());
    }

    let mut keep = 0u64;
    let mut end = len;
    let mut buf = vec![0u8; 4096];
    while end > 0 {
        let start = end.saturating_sub(buf.len() as u64);
        let chunk = &mut buf[..(end - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(chunk)?;
        if let Some(pos) = chunk.iter().rposition(|b| *b == b'\n') {
            keep = start + pos as u64 + 1;
            break;
        }
        end = start;
    }

    warn!(
        "Truncating torn record at the end of {} ({} bytes)",
        path.display(),
        len - keep
    );
    file.set_len(keep)?;
    file.sync_all()?;
    Ok(())
}
