//! Streams parsed MFT records in on-disk order by walking the `$MFT`
//! file's own data runs (C3).

use crate::error::{MftError, RecordParseError, VolumeError};
use crate::ntfs::attribute::{AttributeHeader, AttributeType, NonResidentHeader};
use crate::ntfs::boot_sector::{BootSector, BOOT_SECTOR_SIZE};
use crate::ntfs::datarun::decode_data_runs;
use crate::ntfs::record::{parse_mft_record, ExternalRecordReader, ParsedRecord};
use crate::ntfs::FILE_RECORD_SIZE;
use crate::volume::Volume;

const MAX_DATA_RUNS: usize = 128;

/// One resolved data run of the `$MFT`'s `$DATA` attribute, in bytes.
#[derive(Debug, Clone, Copy)]
struct Extent {
    length_bytes: u64,
    absolute_offset_bytes: u64,
}

/// Given the `$MFT`'s own data runs, compute the absolute byte offset of an
/// arbitrary record number. Used both for streaming and for attribute-list
/// indirection, which needs to hop to an out-of-order record.
fn absolute_offset_of_record_number(data_runs: &[Extent], find_number: u64) -> Option<u64> {
    let mut record_sum = 0u64;
    for run in data_runs {
        let records_in_run = run.length_bytes / FILE_RECORD_SIZE as u64;
        if find_number < record_sum + records_in_run {
            let offset_in_run = (find_number - record_sum) * FILE_RECORD_SIZE as u64;
            return Some(run.absolute_offset_bytes + offset_in_run);
        }
        record_sum += records_in_run;
    }
    None
}

pub struct MftIterator {
    volume: Volume,
    data_runs: Vec<Extent>,
    buffer: Vec<u8>,
    current_run: usize,
    offset_in_run: u64,
}

impl MftIterator {
    /// Open `drive_letter`, locate the `$MFT`, and resolve its data runs.
    /// `buffer_size` must be a multiple of [`FILE_RECORD_SIZE`] and controls
    /// how much is re-read from disk per refill.
    pub fn open(drive_letter: char, buffer_size: usize) -> Result<MftIterator, MftError> {
        assert_eq!(buffer_size % FILE_RECORD_SIZE, 0);

        let volume = Volume::open(drive_letter)?;

        let mut boot_buf = [0u8; BOOT_SECTOR_SIZE];
        volume.read_at(&mut boot_buf, 0)?;
        let boot_sector = BootSector::parse(&boot_buf)?;
        let bytes_per_cluster = boot_sector.bytes_per_cluster() as u64;

        let mft_record_offset = boot_sector.mft_start_cluster * bytes_per_cluster;
        let mut mft_record_buf = [0u8; FILE_RECORD_SIZE];
        volume.read_at(&mut mft_record_buf, mft_record_offset)?;

        let data_runs = resolve_data_attribute_runs(&mft_record_buf, bytes_per_cluster)?;

        Ok(MftIterator {
            volume,
            data_runs,
            buffer: vec![0u8; buffer_size],
            current_run: 0,
            offset_in_run: 0,
        })
    }

    /// Advance to the next record, skipping ones that fail to parse.
    /// Returns `None` once every data run has been exhausted.
    pub fn advance(&mut self) -> Option<Result<ParsedRecord, RecordParseError>> {
        if self.current_run >= self.data_runs.len() {
            return None;
        }

        let run = self.data_runs[self.current_run];
        if self.offset_in_run % self.buffer.len() as u64 == 0 {
            let read_offset = run.absolute_offset_bytes + self.offset_in_run;
            let remaining = run.length_bytes - self.offset_in_run;
            let to_read = self.buffer.len().min(remaining as usize);
            self.volume
                .read_at(&mut self.buffer[..to_read], read_offset)
                .ok()?;
        }

        let pos_in_buffer = (self.offset_in_run % self.buffer.len() as u64) as usize;
        let record_buf: [u8; FILE_RECORD_SIZE] = self.buffer
            [pos_in_buffer..pos_in_buffer + FILE_RECORD_SIZE]
            .try_into()
            .expect("buffer sized in FILE_RECORD_SIZE multiples");

        self.offset_in_run += FILE_RECORD_SIZE as u64;
        if self.offset_in_run >= run.length_bytes {
            self.current_run += 1;
            self.offset_in_run = 0;
        }

        let mut external = ScopedExternalReader {
            volume: &self.volume,
            data_runs: &self.data_runs,
        };
        Some(parse_mft_record(&record_buf, &mut external))
    }
}

struct ScopedExternalReader<'a> {
    volume: &'a Volume,
    data_runs: &'a [Extent],
}

impl ExternalRecordReader for ScopedExternalReader<'_> {
    fn read_record_bytes(&mut self, record_number: u64) -> Option<[u8; FILE_RECORD_SIZE]> {
        let offset = absolute_offset_of_record_number(self.data_runs, record_number)?;
        let mut buf = [0u8; FILE_RECORD_SIZE];
        self.volume.read_at(&mut buf, offset).ok()?;
        Some(buf)
    }
}

fn resolve_data_attribute_runs(
    mft_record_buf: &[u8; FILE_RECORD_SIZE],
    bytes_per_cluster: u64,
) -> Result<Vec<Extent>, MftError> {
    let first_attribute_offset = u16::from_le_bytes([mft_record_buf[20], mft_record_buf[21]]) as usize;
    let mut offset = first_attribute_offset;

    while offset + 16 <= FILE_RECORD_SIZE {
        let header = match AttributeHeader::parse(&mft_record_buf[offset..]) {
            Some(h) => h,
            None => break,
        };
        if matches!(header.attribute_type, AttributeType::End) || header.attribute_size == 0 {
            break;
        }

        if matches!(header.attribute_type, AttributeType::Data) {
            if !header.is_non_resident {
                return Err(MftError::DataAttributeResident);
            }
            let non_resident = NonResidentHeader::parse(&mft_record_buf[offset..])
                .ok_or(MftError::DataAttributeResident)?;
            let runs_start = offset + non_resident.data_runs_offset as usize;
            let runs_end = (offset + header.attribute_size as usize).min(FILE_RECORD_SIZE);
            let raw_runs = decode_data_runs(&mft_record_buf[runs_start..runs_end]);

            let mut extents: Vec<Extent> = raw_runs
                .into_iter()
                .map(|(length_clusters, absolute_cluster)| Extent {
                    length_bytes: length_clusters * bytes_per_cluster,
                    absolute_offset_bytes: absolute_cluster * bytes_per_cluster,
                })
                .collect();
            extents.truncate(MAX_DATA_RUNS);
            return Ok(extents);
        }

        offset += header.attribute_size as usize;
    }

    Err(MftError::DataAttributeMissing)
}
