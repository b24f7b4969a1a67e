//! Snapshot codec — serializes the index to a single file so the service
//! can restore without a full MFT rescan on restart (C7).
//!
//! Writes go through a temp file in the same directory followed by a
//! rename, so a crash mid-write never leaves a torn snapshot for the next
//! restore to trip over.

use super::{IndexStore, Record, RecordId};
use crate::error::SnapshotError;
use std::io::{Read, Write};
use std::path::Path;

const FORMAT_VERSION: u32 = 1;
const RECORD_ENCODED_SIZE: usize = 8 + 8 + 4 + 8; // id, parent_id, attributes, name_offset

pub fn write_to_file(index: &IndexStore, path: &Path) -> Result<(), SnapshotError> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&tmp_path)?;
        let mut buf = Vec::new();
        encode(index, &mut buf);
        file.write_all(&buf)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

pub fn read_from_file(path: &Path) -> Result<IndexStore, SnapshotError> {
    let mut file = std::fs::File::open(path)?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    decode(&buf)
}

fn encode(index: &IndexStore, out: &mut Vec<u8>) {
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&index.latest_journal_id.to_le_bytes());
    out.extend_from_slice(&index.latest_usn.to_le_bytes());
    out.extend_from_slice(&index.records_not_in_use_count.to_le_bytes());

    write_section(out, &index.name_buffer);

    let mut record_bytes = Vec::with_capacity(index.records.len() * RECORD_ENCODED_SIZE);
    for record in &index.records {
        record_bytes.extend_from_slice(&record.id.as_u64().to_le_bytes());
        record_bytes.extend_from_slice(&record.parent_id.as_u64().to_le_bytes());
        record_bytes.extend_from_slice(&record.attributes.to_le_bytes());
        record_bytes.extend_from_slice(&(record.name_offset as u64).to_le_bytes());
    }
    write_section(out, &record_bytes);

    let mut lookup_bytes = Vec::with_capacity(index.lookup.len() * 4);
    for &slot in &index.lookup {
        lookup_bytes.extend_from_slice(&slot.to_le_bytes());
    }
    write_section(out, &lookup_bytes);
}

fn write_section(out: &mut Vec<u8>, section: &[u8]) {
    out.extend_from_slice(&(section.len() as u64).to_le_bytes());
    out.extend_from_slice(section);
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], SnapshotError> {
        if self.pos + len > self.buf.len() {
            return Err(SnapshotError::Truncated);
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn take_u32(&mut self) -> Result<u32, SnapshotError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn take_u64(&mut self) -> Result<u64, SnapshotError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn take_i64(&mut self) -> Result<i64, SnapshotError> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn take_section(&mut self) -> Result<&'a [u8], SnapshotError> {
        let len = self.take_u64()? as usize;
        self.take(len)
    }
}

fn decode(buf: &[u8]) -> Result<IndexStore, SnapshotError> {
    let mut cursor = Cursor { buf, pos: 0 };

    let version = cursor.take_u32()?;
    if version != FORMAT_VERSION {
        return Err(SnapshotError::VersionMismatch {
            found: version,
            expected: FORMAT_VERSION,
        });
    }

    let latest_journal_id = cursor.take_u64()?;
    let latest_usn = cursor.take_i64()?;
    let records_not_in_use_count = cursor.take_u32()?;

    let name_buffer = cursor.take_section()?.to_vec();

    let record_bytes = cursor.take_section()?;
    if record_bytes.len() % RECORD_ENCODED_SIZE != 0 {
        return Err(SnapshotError::Truncated);
    }
    let mut records = Vec::with_capacity(record_bytes.len() / RECORD_ENCODED_SIZE);
    for chunk in record_bytes.chunks_exact(RECORD_ENCODED_SIZE) {
        let id = RecordId::from_u64(u64::from_le_bytes(chunk[0..8].try_into().unwrap()));
        let parent_id = RecordId::from_u64(u64::from_le_bytes(chunk[8..16].try_into().unwrap()));
        let attributes = u32::from_le_bytes(chunk[16..20].try_into().unwrap());
        let name_offset = u64::from_le_bytes(chunk[20..28].try_into().unwrap()) as usize;
        records.push(Record {
            id,
            parent_id,
            attributes,
            name_offset,
        });
    }

    let lookup_bytes = cursor.take_section()?;
    if lookup_bytes.len() % 4 != 0 {
        return Err(SnapshotError::Truncated);
    }
    let lookup: Vec<u32> = lookup_bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
        .collect();

    Ok(IndexStore {
        name_buffer,
        records,
        lookup,
        latest_usn,
        latest_journal_id,
        records_not_in_use_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let mut idx = IndexStore::new();
        idx.insert(RecordId::new(1, 0), RecordId::new(1, 0), 0, "root");
        idx.insert(RecordId::new(2, 0), RecordId::new(1, 0), 0, "child.txt");
        idx.latest_usn = 12345;
        idx.latest_journal_id = 999;

        let mut buf = Vec::new();
        encode(&idx, &mut buf);
        let restored = decode(&buf).unwrap();

        assert_eq!(restored.name_buffer(), idx.name_buffer());
        assert_eq!(restored.record_count(), idx.record_count());
        assert_eq!(restored.latest_usn, 12345);
        assert_eq!(restored.latest_journal_id, 999);
        let rec = restored.get_by_id(RecordId::new(2, 0)).unwrap();
        assert_eq!(restored.name_of(rec), "child.txt");
    }

    #[test]
    fn rejects_version_mismatch() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&99u32.to_le_bytes());
        assert!(matches!(
            decode(&buf),
            Err(SnapshotError::VersionMismatch { found: 99, .. })
        ));
    }

    #[test]
    fn write_then_read_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quickfind.db");

        let mut idx = IndexStore::new();
        idx.insert(RecordId::new(1, 0), RecordId::new(1, 0), 0, "root");

        write_to_file(&idx, &path).unwrap();
        let restored = read_from_file(&path).unwrap();
        assert_eq!(restored.record_count(), 1);
    }
}
