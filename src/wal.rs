use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Entries larger than this are treated as corruption rather than allocated.
const MAX_ENTRY_LEN: usize = 16 * 1024 * 1024;

fn encode_entry(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "WAL entry too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Fill `buf` completely, or report a clean stop at end of file.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Next intact entry and its framed size, or `None` at end of log or at the
/// first torn/corrupt entry. Everything after a bad entry is ignored.
fn decode_entry(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut word = [0u8; 4];
    if !read_full(reader, &mut word)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(word) as usize;
    if len > MAX_ENTRY_LEN {
        return Ok(None);
    }

    let mut payload = vec![0u8; len];
    if !read_full(reader, &mut payload)? || !read_full(reader, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize::<Event>(&payload)
        .ok()
        .map(|event| (event, len as u64 + 8)))
}

/// Intact events and the byte length of the prefix they occupy.
fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut intact_len = 0;
    while let Some((event, framed)) = decode_entry(&mut reader)? {
        events.push(event);
        intact_len += framed;
    }
    Ok((events, intact_len))
}

/// Append-only event log of one tenant.
///
/// Entry format: `[u32 len][bincode Event][u32 crc32]`, little endian, where
/// `len` counts the payload only. A batch is either fully durable or cut
/// back off the file, so a failed append never resurfaces on replay.
pub struct Wal {
    file: File,
    path: PathBuf,
    /// Length of the file up to the end of the last durable batch.
    committed_len: u64,
    appends_since_compact: u64,
}

impl Wal {
    /// Open the log for appending and return the events it already holds.
    /// A torn or corrupt tail left by a crash is truncated away so later
    /// appends stay reachable.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let (events, intact_len) = scan(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let on_disk = file.metadata()?.len();
        if on_disk > intact_len {
            tracing::warn!(
                "{}: discarding {} bytes of torn or corrupt tail",
                path.display(),
                on_disk - intact_len
            );
            file.set_len(intact_len)?;
            file.sync_all()?;
        }
        let wal = Self {
            file,
            path: path.to_path_buf(),
            committed_len: intact_len,
            appends_since_compact: 0,
        };
        Ok((wal, events))
    }

    /// Write `events` as one batch with a single fsync.
    pub fn append_batch<'a>(&mut self, events: impl IntoIterator<Item = &'a Event>) -> io::Result<()> {
        let mut frames = Vec::new();
        let mut count = 0;
        for event in events {
            encode_entry(&mut frames, event)?;
            count += 1;
        }
        self.commit_with(|file| file.write_all(&frames).map(|()| frames.len() as u64))?;
        self.appends_since_compact += count;
        Ok(())
    }

    /// Run `write` (which reports how many bytes it appended) and fsync. On
    /// any failure the file is cut back to `committed_len`.
    fn commit_with(&mut self, write: impl FnOnce(&mut File) -> io::Result<u64>) -> io::Result<()> {
        let result = write(&mut self.file).and_then(|written| {
            self.file.sync_data()?;
            Ok(written)
        });
        match result {
            Ok(written) => {
                self.committed_len += written;
                Ok(())
            }
            Err(e) => {
                let rolled_back = self
                    .file
                    .set_len(self.committed_len)
                    .and_then(|()| self.file.sync_all());
                if let Err(trunc) = rolled_back {
                    tracing::error!(
                        "{}: could not roll back failed append: {trunc}",
                        self.path.display()
                    );
                }
                Err(e)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replace the log with `events`: write and fsync a sibling temp file,
    /// rename it over the log, then reopen for appending.
    pub fn rewrite(&mut self, events: &[Event]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            for event in events {
                encode_entry(&mut tmp, event)?;
            }
            tmp.flush()?;
            tmp.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.committed_len = self.file.metadata()?.len();
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Every intact event in the log, oldest first. A missing file is an
    /// empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        scan(path).map(|(events, _)| events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::schedule::Slot;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotbook_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn upserted(capacity: i64) -> Event {
        Event::ListingUpserted {
            listing: Listing {
                id: "lst".into(),
                owner_id: "host".into(),
                open_time: "09:00".into(),
                close_time: "12:00".into(),
                slot_capacity: capacity,
            },
        }
    }

    fn committed(user: &str) -> Event {
        Event::ReservationCommitted {
            reservation: Reservation {
                booking_id: Ulid::new(),
                listing_id: "lst".into(),
                date: CalendarDate::parse("2025-06-01").unwrap(),
                slot: Slot::parse("09:00", "10:00").unwrap(),
                guest_count: 2,
                user_id: user.into(),
                user_name: user.into(),
                status: ReservationStatus::Confirmed,
                created_at: 1,
            },
        }
    }

    fn write_all(path: &Path, events: &[Event]) {
        let (mut wal, _) = Wal::open(path).unwrap();
        wal.append_batch(events).unwrap();
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let events = vec![upserted(10), committed("ana"), Event::ListingRemoved { id: "lst".into() }];
        write_all(&path, &events);
        assert_eq!(Wal::replay(&path).unwrap(), events);
    }

    #[test]
    fn replay_stops_at_torn_tail() {
        let path = tmp_path("torn_tail.wal");
        let events = vec![upserted(10), committed("ana")];
        write_all(&path, &events);
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[9u8, 0, 0, 0, 1, 2]).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
    }

    #[test]
    fn replay_missing_file_is_empty() {
        let path = tmp_path("missing.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    fn append_corrupt_entry(path: &Path) {
        let payload = bincode::serialize(&committed("ana")).unwrap();
        let mut f = OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
        f.write_all(&payload).unwrap();
        f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
    }

    #[test]
    fn replay_stops_at_bad_crc() {
        let path = tmp_path("bad_crc.wal");
        write_all(&path, &[upserted(10)]);
        append_corrupt_entry(&path);
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            encode_entry(&mut f, &committed("bob")).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![upserted(10)]);
    }

    #[test]
    fn open_cuts_corrupt_tail_before_appending() {
        let path = tmp_path("cut_tail.wal");
        write_all(&path, &[upserted(10)]);
        append_corrupt_entry(&path);

        let (mut wal, existing) = Wal::open(&path).unwrap();
        assert_eq!(existing, vec![upserted(10)]);
        let bob = committed("bob");
        wal.append_batch([&bob]).unwrap();

        assert_eq!(Wal::replay(&path).unwrap(), vec![upserted(10), bob]);
    }

    #[test]
    fn failed_append_leaves_nothing_behind() {
        let path = tmp_path("failed_append.wal");
        let ana = committed("ana");
        let bob = committed("bob");
        let cleo = committed("cleo");
        let (mut wal, _) = Wal::open(&path).unwrap();
        wal.append_batch([&ana]).unwrap();
        let durable = fs::metadata(&path).unwrap().len();

        // One whole entry and half of the next reach the file before the
        // device gives up.
        let mut frames = Vec::new();
        encode_entry(&mut frames, &bob).unwrap();
        let whole = frames.len();
        encode_entry(&mut frames, &cleo).unwrap();
        let err = wal
            .commit_with(|file| {
                file.write_all(&frames[..whole + 6])?;
                Err(io::Error::other("device full"))
            })
            .unwrap_err();
        assert_eq!(err.to_string(), "device full");
        assert_eq!(fs::metadata(&path).unwrap().len(), durable);

        let dan = committed("dan");
        wal.append_batch([&dan]).unwrap();
        drop(wal);

        assert_eq!(Wal::replay(&path).unwrap(), vec![ana, dan]);
    }

    #[test]
    fn replay_rejects_absurd_length() {
        let path = tmp_path("absurd_len.wal");
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(&u32::MAX.to_le_bytes()).unwrap();
        }
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn rewrite_shrinks_and_accepts_appends() {
        let path = tmp_path("rewrite.wal");
        let mut churn: Vec<Event> = (1..=30).map(upserted).collect();
        churn.push(committed("ana"));
        write_all(&path, &churn);
        let before = fs::metadata(&path).unwrap().len();

        let kept = vec![upserted(30), churn[30].clone()];
        let late = committed("bob");
        {
            let (mut wal, _) = Wal::open(&path).unwrap();
            wal.rewrite(&kept).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
            wal.append_batch([&late]).unwrap();
            assert_eq!(wal.appends_since_compact(), 1);
        }

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "rewritten WAL should be smaller: {after} < {before}");
        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed.len(), 3);
        assert_eq!(replayed[..2], kept[..]);
        assert_eq!(replayed[2], late);
        assert!(!path.with_extension("wal.tmp").exists());
    }
}
