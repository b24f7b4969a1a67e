//! On-disk NTFS structures and the MFT record parser (C2).

pub mod attribute;
pub mod boot_sector;
pub mod datarun;
pub mod mft_iterator;
pub mod record;

pub use attribute::{AttributeType, Namespace};
pub use boot_sector::BootSector;
pub use mft_iterator::MftIterator;
pub use record::{parse_mft_record, ParsedRecord};

pub const FILE_RECORD_SIZE: usize = 1024;
pub const MFT_MAGIC: u32 = 0x454c_4946; // "FILE"
pub const ATTRIBUTE_END: u32 = 0xFFFF_FFFF;

/// Reserved high bit on [`crate::index::Record::attributes`] marking a
/// tombstoned (logically deleted) record. Chosen to not collide with any
/// real `FILE_ATTRIBUTE_*` bit, all of which fit in the low 17 bits.
pub const ATTRIBUTE_NOT_IN_USE: u32 = 1 << 31;

pub const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x1000_0000;
