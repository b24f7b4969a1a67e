//! MFT record parsing: fixup, attribute walk, and `$FILE_NAME` extraction,
//! including attribute-list indirection for hard links and fragmented
//! attribute lists.

use crate::error::RecordParseError;
use crate::index::RecordId;
use crate::ntfs::attribute::{AttributeHeader, AttributeType, Namespace, NonResidentHeader, ResidentHeader};
use crate::ntfs::{FILE_RECORD_SIZE, MFT_MAGIC};

const SEQUENCE_STRIDE: usize = 512;

/// A fully decoded record: the file's identity, parent, name, and
/// attribute bits. Produced by [`parse_mft_record`].
#[derive(Debug, Clone)]
pub struct ParsedRecord {
    pub id: RecordId,
    pub parent_id: RecordId,
    pub name: String,
    pub attributes: u32,
}

/// Fetches a raw 1024-byte MFT record given its absolute record number.
/// Implemented by [`crate::ntfs::mft_iterator::MftIterator`] — attribute-list
/// indirection needs to hop to an arbitrary record outside the current
/// streaming position.
pub trait ExternalRecordReader {
    fn read_record_bytes(&mut self, record_number: u64) -> Option<[u8; FILE_RECORD_SIZE]>;
}

/// Apply the update-sequence fixup in place. Returns `false` (and leaves
/// `buf` unmodified from that sub-block onward) on the first sub-block
/// whose stored check word doesn't match — the original record is assumed
/// torn and parsing of it aborts.
fn fixup_record(buf: &mut [u8; FILE_RECORD_SIZE]) -> bool {
    let usa_offset = u16::from_le_bytes([buf[4], buf[5]]) as usize;
    let usa_size = u16::from_le_bytes([buf[6], buf[7]]) as usize;
    if usa_size == 0 || usa_offset + usa_size * 2 > FILE_RECORD_SIZE {
        return false;
    }

    let check = [buf[usa_offset], buf[usa_offset + 1]];

    let mut sub_block = 0usize;
    while (sub_block + 1) * SEQUENCE_STRIDE <= FILE_RECORD_SIZE && sub_block + 1 < usa_size {
        let tail = (sub_block + 1) * SEQUENCE_STRIDE - 2;
        if buf[tail] != check[0] || buf[tail + 1] != check[1] {
            return false;
        }
        let entry_offset = usa_offset + (sub_block + 1) * 2;
        buf[tail] = buf[entry_offset];
        buf[tail + 1] = buf[entry_offset + 1];
        sub_block += 1;
    }

    true
}

struct RecordHeader {
    is_in_use: bool,
    is_directory: bool,
    first_attribute_offset: u16,
    record_number: u64,
    sequence_number: u16,
}

fn parse_header(buf: &[u8; FILE_RECORD_SIZE]) -> Option<RecordHeader> {
    let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    if magic != MFT_MAGIC {
        return None;
    }
    let sequence_number = u16::from_le_bytes([buf[16], buf[17]]);
    let first_attribute_offset = u16::from_le_bytes([buf[20], buf[21]]);
    let flags = u16::from_le_bytes([buf[22], buf[23]]);
    let record_number = u32::from_le_bytes(buf[44..48].try_into().unwrap()) as u64;

    Some(RecordHeader {
        is_in_use: flags & 0x1 != 0,
        is_directory: flags & 0x2 != 0,
        first_attribute_offset,
        record_number,
        sequence_number,
    })
}

/// Decode a resident `$FILE_NAME` attribute's value, given the attribute's
/// start offset within the record buffer.
fn decode_file_name_value(
    record_buf: &[u8],
    value_offset: usize,
) -> Option<(u64, u16, Namespace, String)> {
    if value_offset + 0x42 > record_buf.len() {
        return None;
    }
    let parent_ref = u64::from_le_bytes(record_buf[value_offset..value_offset + 8].try_into().unwrap());
    let parent_record_number = parent_ref & 0x0000_FFFF_FFFF_FFFF;
    let parent_sequence_number = (parent_ref >> 48) as u16;

    let name_len_chars = record_buf[value_offset + 0x40] as usize;
    let namespace = Namespace::from(record_buf[value_offset + 0x41]);

    let name_start = value_offset + 0x42;
    let name_end = name_start + name_len_chars * 2;
    if name_end > record_buf.len() {
        return None;
    }

    let utf16: Vec<u16> = record_buf[name_start..name_end]
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    let name = String::from_utf16_lossy(&utf16);

    Some((parent_record_number, parent_sequence_number, namespace, name))
}

enum AttributeWalkResult {
    Found {
        parent_record_number: u64,
        parent_sequence_number: u16,
        name: String,
    },
    ExternalList {
        target_record_number: u64,
    },
    NotFound,
    NonResident,
}

/// Walk a record's attributes looking for a non-DOS resident `$FILE_NAME`,
/// or a resident `$ATTRIBUTE_LIST` pointing at one in another record.
fn walk_attributes_for_name(record_buf: &[u8], first_attribute_offset: usize) -> AttributeWalkResult {
    let mut offset = first_attribute_offset;

    while offset + 16 <= record_buf.len() {
        let header = match AttributeHeader::parse(&record_buf[offset..]) {
            Some(h) => h,
            None => break,
        };
        if matches!(header.attribute_type, AttributeType::End) || header.attribute_size == 0 {
            break;
        }

        match header.attribute_type {
            AttributeType::FileName => {
                if header.is_non_resident {
                    return AttributeWalkResult::NonResident;
                }
                if let Some(resident) = ResidentHeader::parse(&record_buf[offset..]) {
                    let value_offset = offset + resident.value_offset as usize;
                    if let Some((parent_number, parent_seq, namespace, name)) =
                        decode_file_name_value(record_buf, value_offset)
                    {
                        if !matches!(namespace, Namespace::Dos) {
                            return AttributeWalkResult::Found {
                                parent_record_number: parent_number,
                                parent_sequence_number: parent_seq,
                                name,
                            };
                        }
                    }
                }
            }
            AttributeType::AttributeList => {
                if !header.is_non_resident {
                    if let Some(resident) = ResidentHeader::parse(&record_buf[offset..]) {
                        let list_start = offset + resident.value_offset as usize;
                        let list_end = list_start + resident.value_length as usize;
                        if list_end <= record_buf.len() {
                            if let Some(target) =
                                find_file_name_entry(&record_buf[list_start..list_end])
                            {
                                return AttributeWalkResult::ExternalList {
                                    target_record_number: target,
                                };
                            }
                        }
                    }
                }
            }
            _ => {}
        }

        offset += header.attribute_size as usize;
    }

    AttributeWalkResult::NotFound
}

/// Scan `$ATTRIBUTE_LIST` entries for a `$FILE_NAME` entry whose starting
/// VCN is 0 (the primary record carrying that name) and whose target
/// record differs from the current one.
fn find_file_name_entry(list_buf: &[u8]) -> Option<u64> {
    const FILE_NAME_TYPE: u32 = 0x30;
    let mut offset = 0usize;

    while offset + 26 <= list_buf.len() {
        let attribute_type = u32::from_le_bytes(list_buf[offset..offset + 4].try_into().unwrap());
        let entry_length = u16::from_le_bytes([list_buf[offset + 4], list_buf[offset + 5]]) as usize;
        if entry_length == 0 {
            break;
        }
        let starting_vcn = u64::from_le_bytes(list_buf[offset + 8..offset + 16].try_into().unwrap());
        let record_ref =
            u64::from_le_bytes(list_buf[offset + 16..offset + 24].try_into().unwrap());
        let record_number = record_ref & 0x0000_FFFF_FFFF_FFFF;

        if attribute_type == FILE_NAME_TYPE && starting_vcn == 0 {
            return Some(record_number);
        }

        offset += entry_length;
    }

    None
}

/// Parse a single 1024-byte MFT record, resolving attribute-list
/// indirection via `external` if needed.
pub fn parse_mft_record(
    buf: &[u8; FILE_RECORD_SIZE],
    external: &mut dyn ExternalRecordReader,
) -> Result<ParsedRecord, RecordParseError> {
    let mut buf = *buf;

    let header = parse_header(&buf).ok_or(RecordParseError::NoMagicNumber)?;
    if !header.is_in_use {
        return Err(RecordParseError::NotInUse);
    }
    if !fixup_record(&mut buf) {
        return Err(RecordParseError::FixupMismatch);
    }

    let mut directory_flag = if header.is_directory {
        crate::ntfs::FILE_ATTRIBUTE_DIRECTORY
    } else {
        0
    };

    let result = walk_attributes_for_name(&buf, header.first_attribute_offset as usize);

    let (parent_record_number, parent_sequence_number, name) = match result {
        AttributeWalkResult::Found {
            parent_record_number,
            parent_sequence_number,
            name,
        } => (parent_record_number, parent_sequence_number, name),
        AttributeWalkResult::NonResident => {
            return Err(RecordParseError::NameAttributeNonResident)
        }
        AttributeWalkResult::NotFound => return Err(RecordParseError::NameAttributeMissing),
        AttributeWalkResult::ExternalList {
            target_record_number,
        } => {
            let other_buf = external
                .read_record_bytes(target_record_number)
                .ok_or(RecordParseError::NameAttributeMissing)?;
            let other_header = parse_header(&other_buf).ok_or(RecordParseError::NoMagicNumber)?;
            directory_flag = if other_header.is_directory {
                crate::ntfs::FILE_ATTRIBUTE_DIRECTORY
            } else {
                directory_flag
            };
            match walk_attributes_for_name(&other_buf, other_header.first_attribute_offset as usize) {
                AttributeWalkResult::Found {
                    parent_record_number,
                    parent_sequence_number,
                    name,
                } => (parent_record_number, parent_sequence_number, name),
                AttributeWalkResult::NonResident => {
                    return Err(RecordParseError::NameAttributeNonResident)
                }
                _ => return Err(RecordParseError::NameAttributeMissing),
            }
        }
    };

    Ok(ParsedRecord {
        id: RecordId::new(header.record_number, header.sequence_number),
        parent_id: RecordId::new(parent_record_number, parent_sequence_number),
        name,
        attributes: directory_flag,
    })
}
