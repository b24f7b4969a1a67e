//! Raw volume I/O (C1).
//!
//! Opens an NTFS volume by drive letter for shared read and reads exact
//! byte ranges at arbitrary offsets. No buffering or paging policy lives
//! here — callers (the MFT parser, the USN reader) own that.

use crate::error::VolumeError;
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, SetFilePointerEx, FILE_BEGIN, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows::Win32::System::IO::{DeviceIoControl, OVERLAPPED};
use windows::core::PCWSTR;

/// Sector size assumed when callers don't have the boot sector's own value
/// yet (only used before [`Volume::open`] has read it).
pub const DEFAULT_SECTOR_SIZE: u32 = 512;

pub struct Volume {
    handle: HANDLE,
    pub drive_letter: char,
}

// SAFETY: the handle is exclusively owned by this struct and every access
// goes through `&mut self`, so no two threads can issue overlapping I/O on
// the same handle concurrently through this type.
unsafe impl Send for Volume {}

impl Volume {
    /// Open `\\.\X:` for shared read access.
    pub fn open(drive_letter: char) -> Result<Self, VolumeError> {
        let path = format!("\\\\.\\{drive_letter}:");
        let wide: Vec<u16> = path.encode_utf16().chain(std::iter::once(0)).collect();

        let handle = unsafe {
            CreateFileW(
                PCWSTR(wide.as_ptr()),
                windows::Win32::Storage::FileSystem::FILE_GENERIC_READ.0,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                None,
                OPEN_EXISTING,
                windows::Win32::Storage::FileSystem::FILE_FLAGS_AND_ATTRIBUTES(0),
                None,
            )
        }
        .map_err(|e| VolumeError::Open {
            drive_letter,
            code: e.code().0,
        })?;

        Ok(Volume {
            handle,
            drive_letter,
        })
    }

    /// Read exactly `buf.len()` bytes starting at absolute byte offset `from`.
    pub fn read_at(&self, buf: &mut [u8], from: u64) -> Result<(), VolumeError> {
        unsafe {
            SetFilePointerEx(self.handle, from as i64, None, FILE_BEGIN).map_err(|_| {
                VolumeError::Seek {
                    drive_letter: self.drive_letter,
                    offset: from,
                }
            })?;
        }

        let mut bytes_read = 0u32;
        unsafe {
            windows::Win32::Storage::FileSystem::ReadFile(
                self.handle,
                Some(buf),
                Some(&mut bytes_read),
                None,
            )
        }
        .map_err(|e| VolumeError::Io(std::io::Error::from_raw_os_error(e.code().0)))?;

        if bytes_read as usize != buf.len() {
            return Err(VolumeError::ShortRead {
                offset: from,
                expected: buf.len(),
                actual: bytes_read as usize,
            });
        }

        Ok(())
    }

    /// Issue a raw `DeviceIoControl` against the underlying handle — used by
    /// the USN journal reader for `FSCTL_QUERY_USN_JOURNAL` /
    /// `FSCTL_READ_USN_JOURNAL`.
    pub fn ioctl(
        &self,
        control_code: u32,
        input: Option<&[u8]>,
        output: &mut [u8],
    ) -> windows::core::Result<u32> {
        let mut bytes_returned = 0u32;
        unsafe {
            DeviceIoControl(
                self.handle,
                control_code,
                input.map(|b| b.as_ptr() as *const _),
                input.map(|b| b.len() as u32).unwrap_or(0),
                Some(output.as_mut_ptr() as *mut _),
                output.len() as u32,
                Some(&mut bytes_returned),
                None::<*mut OVERLAPPED>,
            )?;
        }
        Ok(bytes_returned)
    }

    pub fn raw_handle(&self) -> HANDLE {
        self.handle
    }
}

impl Drop for Volume {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.handle);
        }
    }
}
