//! USN change journal follower: polls for new records and coalesces noisy
//! sequences (temp-file churn, rename storms) before they reach the index
//! (C4).

use crate::error::UsnError;
use crate::index::{IndexStore, RecordId};
use crate::volume::Volume;
use compact_str::CompactString;
use windows::Win32::System::Ioctl::{
    FSCTL_QUERY_USN_JOURNAL, FSCTL_READ_USN_JOURNAL, READ_USN_JOURNAL_DATA_V0,
    USN_JOURNAL_DATA_V0, USN_RECORD_V2, USN_REASON_FILE_CREATE, USN_REASON_FILE_DELETE,
    USN_REASON_RENAME_NEW_NAME,
};

const USN_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone)]
pub struct Change {
    pub usn: i64,
    pub kind: ChangeKind,
    pub id: RecordId,
    pub parent_id: RecordId,
    pub name: CompactString,
    pub attributes: u32,
    pub ignore: bool,
}

pub struct UsnJournal {
    drive_letter: char,
    journal_id: u64,
}

impl UsnJournal {
    /// Query the journal's current identity without reading any records.
    /// Used on cold start to seed `(journal_id, latest_usn)` before the
    /// initial MFT scan, so USN polling naturally picks up anything that
    /// changes during or after that scan.
    pub fn query(drive_letter: char) -> Result<(u64, i64), UsnError> {
        let volume = Volume::open(drive_letter)?;
        let mut data = USN_JOURNAL_DATA_V0::default();
        let out = unsafe {
            std::slice::from_raw_parts_mut(&mut data as *mut _ as *mut u8, std::mem::size_of_val(&data))
        };
        volume
            .ioctl(FSCTL_QUERY_USN_JOURNAL, None, out)
            .map_err(|e| UsnError::QueryJournal(e.code().0))?;

        Ok((data.UsnJournalID, data.NextUsn))
    }

    pub fn open(drive_letter: char, journal_id: u64) -> UsnJournal {
        UsnJournal {
            drive_letter,
            journal_id,
        }
    }

    /// Read every record since `start_usn`, producing a coalesced change
    /// list. Always runs the coalescing pass, even on an empty read, so
    /// callers can treat "no changes" uniformly.
    pub fn read_changes(&self, start_usn: i64) -> Result<Vec<Change>, UsnError> {
        let volume = Volume::open(self.drive_letter)?;

        let request = READ_USN_JOURNAL_DATA_V0 {
            StartUsn: start_usn,
            ReasonMask: USN_REASON_FILE_CREATE | USN_REASON_FILE_DELETE | USN_REASON_RENAME_NEW_NAME,
            ReturnOnlyOnClose: 0,
            Timeout: 1,
            BytesToWaitFor: 4096,
            UsnJournalID: self.journal_id,
        };
        let request_bytes = unsafe {
            std::slice::from_raw_parts(
                &request as *const _ as *const u8,
                std::mem::size_of::<READ_USN_JOURNAL_DATA_V0>(),
            )
        };

        let mut buffer = vec![0u8; USN_BUFFER_SIZE];
        let bytes_returned = volume
            .ioctl(FSCTL_READ_USN_JOURNAL, Some(request_bytes), &mut buffer)
            .map_err(|e| UsnError::ReadJournal(e.code().0))?;

        // The first 8 bytes of the output are the USN the next read should
        // resume from; record parsing starts right after.
        let mut changes = Vec::new();
        if bytes_returned >= 8 {
            let mut pos = 8usize;
            let end = bytes_returned as usize;
            while pos + std::mem::size_of::<USN_RECORD_V2>() <= end {
                let record = unsafe { &*(buffer.as_ptr().add(pos) as *const USN_RECORD_V2) };
                if record.RecordLength == 0 {
                    break;
                }
                if record.MajorVersion == 2 {
                    if let Some(change) = decode_record(&buffer[pos..], record) {
                        changes.push(change);
                    }
                }
                pos += record.RecordLength as usize;
            }
        }

        coalesce(&mut changes);
        Ok(changes)
    }
}

fn decode_record(record_buf: &[u8], record: &USN_RECORD_V2) -> Option<Change> {
    let name_start = record.FileNameOffset as usize;
    let name_end = name_start + record.FileNameLength as usize;
    if name_end > record_buf.len() {
        return None;
    }
    let utf16: Vec<u16> = record_buf[name_start..name_end]
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    let name = CompactString::from(String::from_utf16_lossy(&utf16));

    let kind = if record.Reason & USN_REASON_FILE_DELETE != 0 {
        ChangeKind::Delete
    } else if record.Reason & USN_REASON_FILE_CREATE != 0 {
        ChangeKind::Insert
    } else {
        ChangeKind::Update
    };

    Some(Change {
        usn: record.Usn,
        kind,
        id: RecordId::from_u64(record.FileReferenceNumber),
        parent_id: RecordId::from_u64(record.ParentFileReferenceNumber),
        name,
        attributes: record.FileAttributes,
        ignore: false,
    })
}

/// Quadratic pairwise coalescing sweep: for every pair of changes sharing
/// an id, later entries suppress earlier noise per the rule table below.
/// `i` walks backward from the most recent change, `j` walks forward from
/// the oldest — matching the journal-order semantics the rules depend on.
pub fn coalesce(changes: &mut [Change]) {
    let len = changes.len();
    for i in (0..len).rev() {
        for j in 0..len {
            if i == j {
                continue;
            }
            if changes[i].id != changes[j].id {
                continue;
            }

            match (changes[i].kind, changes[j].kind) {
                (ChangeKind::Delete, ChangeKind::Insert) => {
                    changes[i].ignore = true;
                    changes[j].ignore = true;
                }
                (ChangeKind::Delete, ChangeKind::Update) => {
                    changes[j].ignore = true;
                }
                // Same kind both ways around, so unlike the asymmetric arms
                // above this one fires for both (i, j) and (j, i) of a pair;
                // gate on position so only the chronologically earlier
                // duplicate (the lower index) gets ignored, not both.
                (ChangeKind::Delete, ChangeKind::Delete) if i < j => {
                    changes[i].ignore = true;
                }
                (ChangeKind::Update, ChangeKind::Insert) => {
                    changes[j].ignore = true;
                }
                _ => {}
            }
        }
    }
}

/// Applies a coalesced change list to the index and advances its USN
/// cursor, matching the worker's per-cycle apply step. `latest_usn`
/// advances for every change seen, ignored or not — only the index
/// mutation itself is skipped for ignored entries, so the journal cursor
/// never stalls behind coalesced noise.
pub fn apply_changes(index: &mut IndexStore, changes: &[Change]) {
    for change in changes {
        if change.usn > index.latest_usn {
            index.latest_usn = change.usn;
        }
        if change.ignore {
            continue;
        }
        match change.kind {
            ChangeKind::Insert => index.insert(change.id, change.parent_id, change.attributes, &change.name),
            ChangeKind::Update => index.update(change.id, change.parent_id, change.attributes, &change.name),
            ChangeKind::Delete => index.delete(change.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(usn: i64, kind: ChangeKind, id: u64) -> Change {
        Change {
            usn,
            kind,
            id: RecordId::from_u64(id),
            parent_id: RecordId::from_u64(1),
            name: CompactString::from("x"),
            attributes: 0,
            ignore: false,
        }
    }

    #[test]
    fn delete_then_insert_ignores_both() {
        let mut changes = vec![
            change(1, ChangeKind::Insert, 5),
            change(2, ChangeKind::Delete, 5),
        ];
        // Re-create as the journal would: insert happens first (lower usn),
        // then delete; j walks forward from oldest, i walks backward from
        // newest, so order in the slice is journal order.
        coalesce(&mut changes);
        assert!(changes[0].ignore);
        assert!(changes[1].ignore);
    }

    #[test]
    fn delete_then_update_ignores_update() {
        let mut changes = vec![
            change(1, ChangeKind::Update, 5),
            change(2, ChangeKind::Delete, 5),
        ];
        coalesce(&mut changes);
        assert!(changes[0].ignore);
        assert!(!changes[1].ignore);
    }

    #[test]
    fn unrelated_ids_never_coalesce() {
        let mut changes = vec![
            change(1, ChangeKind::Insert, 5),
            change(2, ChangeKind::Delete, 6),
        ];
        coalesce(&mut changes);
        assert!(!changes[0].ignore);
        assert!(!changes[1].ignore);
    }

    #[test]
    fn update_then_insert_ignores_insert() {
        let mut changes = vec![
            change(1, ChangeKind::Insert, 5),
            change(2, ChangeKind::Update, 5),
        ];
        coalesce(&mut changes);
        assert!(changes[0].ignore);
        assert!(!changes[1].ignore);
    }

    #[test]
    fn apply_changes_advances_usn_even_for_ignored_entries() {
        let mut index = IndexStore::new();
        let mut changes = vec![
            change(10, ChangeKind::Insert, 7),
            change(20, ChangeKind::Delete, 7),
        ];
        coalesce(&mut changes);
        apply_changes(&mut index, &changes);

        assert_eq!(index.latest_usn, 20);
        assert_eq!(index.record_count(), 0);
        assert!(index.get_by_id(RecordId::from_u64(7)).is_none());
    }

    #[test]
    fn apply_changes_keeps_latest_update_after_coalescing() {
        let mut index = IndexStore::new();
        let mut changes = vec![change(1, ChangeKind::Insert, 8), change(2, ChangeKind::Update, 8)];
        changes[1].name = CompactString::from("b");
        coalesce(&mut changes);
        apply_changes(&mut index, &changes);

        let record = index.get_by_id(RecordId::from_u64(8)).unwrap();
        assert_eq!(index.name_of(record), "b");
        assert_eq!(index.record_count(), 1);
    }

    #[test]
    fn duplicate_delete_ignores_only_the_earlier_entry() {
        let mut changes = vec![
            change(1, ChangeKind::Delete, 9),
            change(2, ChangeKind::Delete, 9),
        ];
        coalesce(&mut changes);
        assert!(changes[0].ignore);
        assert!(!changes[1].ignore);
    }

    #[test]
    fn apply_changes_deletes_record_once_after_duplicate_delete_coalescing() {
        let mut index = IndexStore::new();
        index.insert(RecordId::from_u64(9), RecordId::from_u64(1), 0, "dup.tmp");

        let mut changes = vec![
            change(1, ChangeKind::Delete, 9),
            change(2, ChangeKind::Delete, 9),
        ];
        coalesce(&mut changes);
        apply_changes(&mut index, &changes);

        assert!(index.get_by_id(RecordId::from_u64(9)).is_none());
    }
}
