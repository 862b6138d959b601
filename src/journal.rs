use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Every journal file starts with these bytes.
const MAGIC: &[u8; 4] = b"HBJ1";

/// Encode a single event to `[len][bincode][crc32]` format. Returns the bytes written.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(payload.len() as u64 + 8)
}

/// Read one record. `Ok(None)` means clean end of file or a torn/corrupt tail.
fn decode_event(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut payload = vec![0u8; len];
    if !read_full(reader, &mut payload)? {
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if !read_full(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Ok(Some((event, (len + 8) as u64))),
        Err(_) => Ok(None),
    }
}

/// `read_exact` that reports a short read as `false` instead of an error.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn write_header(writer: &mut impl Write) -> io::Result<()> {
    writer.write_all(MAGIC)
}

/// Append-only event journal.
///
/// Layout: `MAGIC` followed by entries `[u32: len][bincode: Event][u32: crc32]`.
/// `len` is the byte length of the payload. A torn last entry (crash mid-write)
/// fails the length or CRC check and is cut off by [`Journal::recover`].
///
/// A batch that fails to reach disk must be undone with [`Journal::rollback`]
/// before the next append, or later records would sit behind a torn one.
pub struct Journal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
    /// File length after the last successful `flush_sync`.
    committed_len: u64,
    pending_len: u64,
    pending_events: u64,
    /// Set when a rollback could not restore the file; every append fails until restart.
    poisoned: bool,
}

impl Journal {
    /// Replay the journal at `path`, truncate any torn tail, and open it for appending.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let (events, valid_len) = Self::scan(path)?;
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let on_disk = file.metadata()?.len();
        if on_disk > valid_len {
            tracing::warn!(
                path = %path.display(),
                discarded_bytes = on_disk - valid_len,
                "truncating torn journal tail"
            );
            file.set_len(valid_len)?;
        }
        let mut writer = BufWriter::new(file);
        let mut committed_len = valid_len;
        if valid_len == 0 {
            write_header(&mut writer)?;
            writer.flush()?;
            committed_len = MAGIC.len() as u64;
        }
        let journal = Self {
            writer,
            path: path.to_path_buf(),
            appends_since_compact: events.len() as u64,
            committed_len,
            pending_len: 0,
            pending_events: 0,
            poisoned: false,
        };
        Ok((journal, events))
    }

    /// Replay the journal from disk, returning all valid events.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Self::scan(path).map(|(events, _)| events)
    }

    /// Returns the valid events and the byte offset just past the last one.
    fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        if !read_full(&mut reader, &mut magic)? {
            // Empty or torn before the header finished.
            return Ok((Vec::new(), 0));
        }
        if &magic != MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is not a hallbook journal", path.display()),
            ));
        }

        let mut events = Vec::new();
        let mut offset = MAGIC.len() as u64;
        while let Some((event, consumed)) = decode_event(&mut reader)? {
            events.push(event);
            offset += consumed;
        }
        Ok((events, offset))
    }

    /// Append a single event and fsync. Used by tests only;
    /// production code uses `append_buffered` + `flush_sync` for group commit.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer an event without flushing. Call `flush_sync()` after the batch.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other("journal is unusable after a failed rollback"));
        }
        self.pending_len += encode_event(&mut self.writer, event)?;
        self.pending_events += 1;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Flush the BufWriter and fsync the underlying file.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.committed_len += self.pending_len;
        self.pending_len = 0;
        self.pending_events = 0;
        Ok(())
    }

    /// Discard everything written since the last successful `flush_sync`:
    /// buffered bytes are dropped and the file is cut back to its committed length.
    pub fn rollback(&mut self) -> io::Result<()> {
        let result = self.truncate_to_committed();
        if result.is_err() {
            self.poisoned = true;
        }
        self.appends_since_compact = self.appends_since_compact.saturating_sub(self.pending_events);
        self.pending_len = 0;
        self.pending_events = 0;
        result
    }

    fn truncate_to_committed(&mut self) -> io::Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        // `into_parts` hands back unflushed bytes instead of writing them on drop.
        let _ = stale.into_parts();
        let file = self.writer.get_ref();
        file.set_len(self.committed_len)?;
        file.sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    fn snapshot_path(path: &Path) -> PathBuf {
        path.with_extension("journal.tmp")
    }

    /// Write the compacted event set to a temp file next to the journal and fsync it.
    pub fn write_snapshot(path: &Path, events: &[Event]) -> io::Result<()> {
        let file = File::create(Self::snapshot_path(path))?;
        let mut writer = BufWriter::new(file);
        write_header(&mut writer)?;
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the snapshot over the journal and reopen it for appending.
    pub fn swap_snapshot(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        fs::rename(Self::snapshot_path(&self.path), &self.path)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.committed_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        self.pending_len = 0;
        self.pending_events = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_snapshot(&self.path, events)?;
        self.swap_snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Facility, SiteSettings};
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("hallbook_test_journal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn facility_created(name: &str) -> Event {
        Event::FacilityCreated {
            facility: Facility {
                id: Ulid::new(),
                name: name.into(),
                description: None,
                capacity: Some(40),
                hourly_rate: None,
                features: vec![],
            },
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.journal");
        let events = vec![
            facility_created("Studio"),
            Event::SettingsUpdated {
                settings: SiteSettings {
                    site_title: "Riverside".into(),
                    ..SiteSettings::default()
                },
            },
        ];

        {
            let (mut journal, replayed) = Journal::recover(&path).unwrap();
            assert!(replayed.is_empty());
            for e in &events {
                journal.append(e).unwrap();
            }
        }

        assert_eq!(Journal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn recover_truncates_torn_tail() {
        let path = tmp_path("torn_tail.journal");
        let first = facility_created("Hall A");
        let second = facility_created("Hall B");

        {
            let (mut journal, _) = Journal::recover(&path).unwrap();
            journal.append(&first).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[7u8; 6]).unwrap(); // partial length + some bytes
        }

        {
            let (mut journal, replayed) = Journal::recover(&path).unwrap();
            assert_eq!(replayed, vec![first.clone()]);
            journal.append(&second).unwrap();
        }

        // The event written after recovery must be readable, not hidden behind garbage.
        assert_eq!(Journal::replay(&path).unwrap(), vec![first, second]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn rollback_cuts_failed_batch_out() {
        let path = tmp_path("rollback.journal");
        let first = facility_created("Hall A");
        let unsent = facility_created("Never acknowledged");
        let later = facility_created("Hall B");

        let (mut journal, _) = Journal::recover(&path).unwrap();
        journal.append(&first).unwrap();

        // A failed batch: one record still buffered, plus a torn frame that reached disk.
        journal.append_buffered(&unsent).unwrap();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&100u32.to_le_bytes()).unwrap();
            f.write_all(&[0u8; 10]).unwrap();
        }
        journal.rollback().unwrap();
        assert_eq!(journal.appends_since_compact(), 1);

        journal.append(&later).unwrap();
        drop(journal);

        assert_eq!(Journal::replay(&path).unwrap(), vec![first, later]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent.journal");
        assert!(Journal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_stops_at_corrupt_crc() {
        let path = tmp_path("corrupt_crc.journal");
        let good = facility_created("Good");
        {
            let (mut journal, _) = Journal::recover(&path).unwrap();
            journal.append(&good).unwrap();
        }
        {
            let bad = Event::FacilityDeleted { id: Ulid::new() };
            let payload = bincode::serialize(&bad).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        }

        assert_eq!(Journal::replay(&path).unwrap(), vec![good]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn foreign_file_is_rejected() {
        let path = tmp_path("foreign.journal");
        fs::write(&path, b"PGDMP not ours").unwrap();
        let err = Journal::replay(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_replaces_contents() {
        let path = tmp_path("compact.journal");
        let keep = facility_created("Keep");
        {
            let (mut journal, _) = Journal::recover(&path).unwrap();
            for i in 0..5 {
                journal.append(&facility_created(&format!("Old {i}"))).unwrap();
            }
            assert_eq!(journal.appends_since_compact(), 5);
            journal.compact(std::slice::from_ref(&keep)).unwrap();
            assert_eq!(journal.appends_since_compact(), 0);
            journal.append(&Event::FacilityDeleted { id: Ulid::nil() }).unwrap();
        }

        let replayed = Journal::replay(&path).unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0], keep);
        let _ = fs::remove_file(&path);
    }
}
