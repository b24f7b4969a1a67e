/// Elevation checks for Windows.
///
/// Opening a volume handle for `\\.\C:` and issuing `FSCTL_QUERY_USN_JOURNAL`
/// / `FSCTL_READ_USN_JOURNAL` against it both require an administrator
/// token; a non-elevated process gets the handle but every ioctl on it
/// fails. Startup checks this up front so the failure shows up as one clear
/// warning instead of a string of per-call errors once the worker loop
/// starts polling.
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::Security::{GetTokenInformation, TokenElevation, TOKEN_ELEVATION, TOKEN_QUERY};
use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

/// Check whether the current process token carries elevation.
pub fn is_elevated() -> bool {
    unsafe {
        let mut token_handle = HANDLE::default();
        let process = GetCurrentProcess();

        if OpenProcessToken(process, TOKEN_QUERY, &mut token_handle).is_err() {
            return false;
        }

        let mut elevation = TOKEN_ELEVATION::default();
        let mut return_length = 0u32;

        let result = GetTokenInformation(
            token_handle,
            TokenElevation,
            Some(&mut elevation as *mut _ as *mut _),
            std::mem::size_of::<TOKEN_ELEVATION>() as u32,
            &mut return_length,
        );

        let _ = CloseHandle(token_handle);

        result.is_ok() && elevation.TokenIsElevated != 0
    }
}
