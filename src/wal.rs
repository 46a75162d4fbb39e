use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Event;

/// File magic plus format version, written once at the head of every log.
const HEADER: [u8; 8] = *b"SBWAL\0\0\x01";

/// Append-only journal of committed studio events.
///
/// Layout: an 8-byte header, then records of
/// `[u32 len][bincode Event][u32 crc32]`, little endian, `len` covering the
/// payload only. A torn or corrupt record ends replay; everything before it
/// is kept.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

enum Frame {
    Event(Event),
    End,
    Torn(&'static str),
}

impl Wal {
    /// Open (or create) the log at `path` for appends.
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            writer: open_for_append(path)?,
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one record. Nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        write_frame(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a fresh log holding only `events` beside the live one.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(staging_path(path))?);
        writer.write_all(&HEADER)?;
        for event in events {
            write_frame(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Move the staged compact log over the live one and reopen it.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(staging_path(&self.path), &self.path)?;
        self.writer = open_for_append(&self.path)?;
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Every intact event in append order. A missing or empty file is an
    /// empty log; a file with a foreign header is an error.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);

        let mut header = [0u8; HEADER.len()];
        match fill(&mut reader, &mut header)? {
            Fill::Empty => return Ok(Vec::new()),
            Fill::Partial => {
                warn!("WAL {}: torn header, treating as empty", path.display());
                return Ok(Vec::new());
            }
            Fill::Full if header != HEADER => {
                return Err(io::Error::new(
                    ErrorKind::InvalidData,
                    format!("{} is not a studiobook log", path.display()),
                ));
            }
            Fill::Full => {}
        }

        let mut events = Vec::new();
        loop {
            match read_frame(&mut reader)? {
                Frame::Event(event) => events.push(event),
                Frame::End => break,
                Frame::Torn(why) => {
                    warn!(
                        "WAL {}: {why} after {} events, ignoring tail",
                        path.display(),
                        events.len()
                    );
                    break;
                }
            }
        }
        Ok(events)
    }
}

fn staging_path(path: &Path) -> PathBuf {
    path.with_extension("wal.tmp")
}

/// Append handle; a brand new file gets its header synced first.
fn open_for_append(path: &Path) -> io::Result<BufWriter<File>> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    if file.metadata()?.len() == 0 {
        file.write_all(&HEADER)?;
        file.sync_all()?;
    }
    Ok(BufWriter::new(file))
}

fn write_frame(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(ErrorKind::InvalidData, "event too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())
}

fn read_frame(reader: &mut impl Read) -> io::Result<Frame> {
    let mut len_buf = [0u8; 4];
    match fill(reader, &mut len_buf)? {
        Fill::Empty => return Ok(Frame::End),
        Fill::Partial => return Ok(Frame::Torn("truncated length")),
        Fill::Full => {}
    }

    let mut payload = vec![0u8; u32::from_le_bytes(len_buf) as usize];
    if fill(reader, &mut payload)? != Fill::Full {
        return Ok(Frame::Torn("truncated payload"));
    }
    let mut crc_buf = [0u8; 4];
    if fill(reader, &mut crc_buf)? != Fill::Full {
        return Ok(Frame::Torn("truncated checksum"));
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(Frame::Torn("bad checksum"));
    }
    Ok(match bincode::deserialize(&payload) {
        Ok(event) => Frame::Event(event),
        Err(_) => Frame::Torn("undecodable event"),
    })
}

#[derive(Debug, PartialEq, Eq)]
enum Fill {
    Empty,
    Partial,
    Full,
}

/// Like `read_exact`, but tells a clean EOF apart from a short read.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<Fill> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(match filled {
        0 if !buf.is_empty() => Fill::Empty,
        n if n == buf.len() => Fill::Full,
        _ => Fill::Partial,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("studiobook_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn studio(name: &str) -> Studio {
        Studio {
            id: Ulid::new(),
            name: name.into(),
            location: "Floor 2".into(),
            capacity: 8,
            created_at: 1,
            updated_at: 1,
        }
    }

    fn booked(studio_id: Ulid, at: Ms) -> Session {
        Session {
            id: Ulid::new(),
            client_id: Ulid::new(),
            photographer_id: Ulid::new(),
            studio_id,
            scheduled_at: at,
            package: Package::Wedding,
            status: SessionStatus::Booked,
            notes: None,
            created_at: 1,
            updated_at: 1,
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let room = studio("Room A");
        let events = vec![
            Event::StudioRegistered(room.clone()),
            Event::SessionBooked(booked(room.id, 1_748_772_000_000)),
        ];

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        assert_eq!(Wal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_handles_truncation() {
        let path = tmp_path("truncation.wal");
        let event = Event::StudioRegistered(studio("Room B"));
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        // Torn second record.
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0u8; 6]).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![event]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_stops_at_bad_crc() {
        let path = tmp_path("corrupt_crc.wal");
        let event = Event::SessionDeleted { id: Ulid::new() };
        {
            let payload = bincode::serialize(&event).unwrap();
            let mut f = File::create(&path).unwrap();
            f.write_all(&HEADER).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        }

        assert!(Wal::replay(&path).unwrap().is_empty());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_drops_churn() {
        let path = tmp_path("compact_reduce.wal");
        let room = studio("Room C");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&Event::StudioRegistered(room.clone())).unwrap();
            // Sessions booked and deleted again.
            for day in 0..10 {
                let s = booked(room.id, 1_748_772_000_000 + day * 86_400_000);
                wal.append(&Event::SessionBooked(s.clone())).unwrap();
                wal.append(&Event::SessionDeleted { id: s.id }).unwrap();
            }
        }
        let before = fs::metadata(&path).unwrap().len();

        let compacted = vec![Event::StudioRegistered(room)];
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.compact(&compacted).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
        }

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should be smaller: {after} < {before}");
        assert_eq!(Wal::replay(&path).unwrap(), compacted);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_then_append() {
        let path = tmp_path("compact_append.wal");
        let room = studio("Room D");
        let compacted = vec![Event::StudioRegistered(room.clone())];
        let mut renamed = room.clone();
        renamed.name = "Room D (big)".into();
        let update = Event::StudioUpdated(renamed);

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&compacted[0]).unwrap();
            wal.compact(&compacted).unwrap();
            wal.append(&update).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![compacted[0].clone(), update]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn append_buffered_then_flush_sync() {
        let path = tmp_path("buffered_flush.wal");
        let events: Vec<Event> = (0..5)
            .map(|i| Event::StudioRegistered(studio(&format!("Room {i}"))))
            .collect();

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 5);
            wal.flush_sync().unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn new_log_starts_with_header() {
        let path = tmp_path("header.wal");
        drop(Wal::open(&path).unwrap());
        assert_eq!(fs::read(&path).unwrap(), HEADER.to_vec());
        assert!(Wal::replay(&path).unwrap().is_empty());

        // Reopening an existing log must not write a second header.
        let event = Event::StudioRegistered(studio("Room H"));
        Wal::open(&path).unwrap().append(&event).unwrap();
        assert_eq!(Wal::replay(&path).unwrap(), vec![event]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn foreign_file_is_rejected() {
        let path = tmp_path("foreign.wal");
        fs::write(&path, b"PGDMP\x01\x0e\x00 not ours").unwrap();
        let err = Wal::replay(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn torn_header_reads_as_empty() {
        let path = tmp_path("torn_header.wal");
        fs::write(&path, &HEADER[..3]).unwrap();
        assert!(Wal::replay(&path).unwrap().is_empty());
        let _ = fs::remove_file(&path);
    }
}
