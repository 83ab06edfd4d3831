use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{error, warn};

use crate::model::Event;

/// Encode one record as `[len][bincode][crc32]`.
fn encode_record(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "WAL record too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read exactly `buf.len()` bytes; `Ok(false)` on a clean or torn end of file.
fn read_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Append-only booking log.
///
/// Each record is `[u32: len][bincode: Event][u32: crc32]`, little-endian, where
/// `len` counts the payload only. A torn or corrupt tail (crash mid-write) is
/// dropped on replay; everything before it is kept.
///
/// Records become part of the log only once `flush_sync` succeeds. A failed
/// append or flush rolls the file back to the last synced length and discards
/// whatever was still buffered.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// File length covering every synced record.
    committed_len: u64,
    /// Records buffered or written since the last sync.
    pending: u64,
    appends_since_compact: u64,
    /// A rollback failed; the file may hold unsynced bytes, so refuse appends.
    poisoned: bool,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let committed_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            committed_len,
            pending: 0,
            appends_since_compact: 0,
            poisoned: false,
        })
    }

    /// Append and fsync one record.
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        if let Err(e) = self.append_buffered(event) {
            self.rollback();
            return Err(e);
        }
        self.flush_sync()
    }

    /// Buffer a record without syncing; durable only after `flush_sync`.
    /// On error the caller must `rollback` before appending again.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other("WAL rollback failed earlier, reopen required"));
        }
        encode_record(&mut self.writer, event)?;
        self.pending += 1;
        Ok(())
    }

    /// Write and fsync everything buffered. Rolls back on failure.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        let synced = self
            .writer
            .flush()
            .and_then(|()| self.writer.get_ref().sync_all())
            .and_then(|()| self.writer.get_ref().metadata());
        match synced {
            Ok(meta) => {
                self.committed_len = meta.len();
                self.appends_since_compact += self.pending;
                self.pending = 0;
                Ok(())
            }
            Err(e) => {
                self.rollback();
                Err(e)
            }
        }
    }

    /// Forget every record since the last successful sync: drop the buffered
    /// bytes and cut the file back to the committed length.
    pub fn rollback(&mut self) {
        let discarded = self.pending;
        self.pending = 0;
        let result = self.writer.get_ref().try_clone().and_then(|file| {
            let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
            // into_parts hands back the file without flushing the stale buffer.
            let (stale_file, _unwritten) = stale.into_parts();
            drop(stale_file);
            self.writer.get_ref().set_len(self.committed_len)
        });
        match result {
            Ok(()) => warn!(path = %self.path.display(), discarded, "WAL write failed, rolled back to last sync"),
            Err(e) => {
                error!(path = %self.path.display(), "WAL rollback failed, refusing further appends: {e}");
                self.poisoned = true;
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Write the compacted log to a sibling temp file and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(path.with_extension("wal.tmp"))?);
        for event in events {
            encode_record(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the temp file over the log and reopen for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(self.path.with_extension("wal.tmp"), &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.committed_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.pending = 0;
        self.appends_since_compact = 0;
        self.poisoned = false;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    /// Every intact record in the log, oldest first. A missing file is an empty log.
    /// Anything after the last intact record is truncated away so later appends
    /// land directly behind good records.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut valid_len = 0u64;

        loop {
            let mut len_buf = [0u8; 4];
            if !read_or_eof(&mut reader, &mut len_buf)? {
                break;
            }
            let len = u32::from_le_bytes(len_buf) as u64;
            // A length running past the end of the file is a torn header.
            if valid_len + 8 + len > file_len {
                break;
            }
            let mut payload = vec![0u8; len as usize];
            let mut crc_buf = [0u8; 4];
            if !read_or_eof(&mut reader, &mut payload)? || !read_or_eof(&mut reader, &mut crc_buf)? {
                break;
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                warn!(path = %path.display(), kept = events.len(), "WAL checksum mismatch");
                break;
            }
            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => {
                    events.push(event);
                    valid_len += 8 + payload.len() as u64;
                }
                Err(e) => {
                    warn!(path = %path.display(), kept = events.len(), "undecodable WAL record: {e}");
                    break;
                }
            }
        }

        if valid_len < file_len {
            warn!(
                path = %path.display(),
                kept = events.len(),
                discarded_bytes = file_len - valid_len,
                "WAL ends in a torn or corrupt record, truncating"
            );
            OpenOptions::new().write(true).open(path)?.set_len(valid_len)?;
        }
        Ok(events)
    }
}
