//! Named-pipe IPC endpoint (C9): pipe construction with an "everyone"
//! read/write ACL, fixed-layout frame encode/decode, and the connection
//! loop that dispatches requests into the query engine.

use super::ServiceContext;
use crate::error::WireError;
use crate::query::{run_query, QueryFlags, QueryParams};
use std::sync::atomic::Ordering;
use tracing::{debug, error, info, warn};
use windows::core::PCWSTR;
use windows::Win32::Foundation::{CloseHandle, ERROR_IO_PENDING, HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::Security::{
    AddAccessAllowedAce, InitializeAcl, InitializeSecurityDescriptor, SetSecurityDescriptorDacl,
    ACL, PSECURITY_DESCRIPTOR, SECURITY_ATTRIBUTES, SECURITY_DESCRIPTOR, SECURITY_DESCRIPTOR_REVISION,
};
use windows::Win32::Storage::FileSystem::{ReadFile, WriteFile, FILE_FLAG_OVERLAPPED};
use windows::Win32::System::Pipes::{
    ConnectNamedPipe, CreateNamedPipeW, DisconnectNamedPipe, PIPE_ACCESS_DUPLEX,
    PIPE_READMODE_MESSAGE, PIPE_REJECT_REMOTE_CLIENTS, PIPE_TYPE_MESSAGE, PIPE_WAIT,
};
use windows::Win32::System::Threading::{CreateEventW, WaitForSingleObject};
use windows::Win32::System::IO::{GetOverlappedResult, OVERLAPPED};

pub const PIPE_NAME: &str = "\\\\.\\pipe\\QuickFind";
const PIPE_BUFFER_SIZE: u32 = 4 * 1024 * 1024;
const MAX_BODY_SIZE: u32 = 1024 * 1024;
const CONNECT_POLL_TIMEOUT_MS: u32 = 250;

const MSG_TYPE_QUERY_REQUEST: u32 = 1;
const MSG_TYPE_QUERY_RESPONSE: u32 = 2;

/// Fixed-layout frame header shared by requests and responses, laid out
/// explicitly rather than derived from a `#[repr(C)]` struct so the wire
/// size can never drift from what's actually read and written.
struct FrameHeader {
    message_type: u32,
    error: u32,
    flags: u32,
    skip_count: u64,
    return_count: u64,
    stop_count: u64,
    body_size: u32,
}

const FRAME_HEADER_SIZE: usize = 4 + 4 + 4 + 8 + 8 + 8 + 4;

pub fn run_connection_loop(ctx: ServiceContext) {
    let pipe = match create_pipe() {
        Ok(pipe) => pipe,
        Err(err) => {
            error!("ipc: failed to create named pipe: {err}");
            return;
        }
    };

    info!("ipc: listening on {PIPE_NAME}");

    while !ctx.is_shutting_down() {
        match connect_with_shutdown_poll(pipe, &ctx) {
            Ok(true) => {}
            Ok(false) => continue, // timed out waiting for a client, recheck shutdown
            Err(err) => {
                warn!("ipc: connect failed: {err}");
                continue;
            }
        }

        if let Err(err) = serve_one_request(pipe, &ctx) {
            debug!("ipc: connection ended: {err}");
        }

        unsafe {
            let _ = DisconnectNamedPipe(pipe);
        }
    }

    unsafe {
        let _ = CloseHandle(pipe);
    }
}

fn serve_one_request(pipe: HANDLE, ctx: &ServiceContext) -> Result<(), String> {
    let mut header_buf = [0u8; FRAME_HEADER_SIZE];
    read_exact(pipe, &mut header_buf)?;
    let header = decode_header(&header_buf);

    if header.message_type != MSG_TYPE_QUERY_REQUEST || header.body_size > MAX_BODY_SIZE {
        write_error_response(pipe, WireError::InvalidRequest)?;
        return Ok(());
    }

    let mut body = vec![0u8; header.body_size as usize];
    read_exact(pipe, &mut body)?;
    let text = String::from_utf8_lossy(&body).into_owned();

    if !ctx.is_initialized() {
        write_error_response(pipe, WireError::DatabaseNotInitialized)?;
        return Ok(());
    }

    let params = QueryParams {
        text,
        flags: QueryFlags::from_bits_truncate(header.flags),
        skip_count: header.skip_count,
        return_count: header.return_count,
        stop_count: header.stop_count,
    };

    let index = ctx.index.read();
    let result = run_query(&params, &index, ctx.config.drive_letter);
    drop(index);

    let response_body = encode_query_response(&result);
    write_frame(pipe, MSG_TYPE_QUERY_RESPONSE, WireError::Ok, &response_body)
}

fn encode_query_response(result: &crate::query::QueryResult) -> Vec<u8> {
    let mut out = Vec::new();
    for item in &result.items {
        out.extend_from_slice(&item.id.as_u64().to_le_bytes());
        out.extend_from_slice(&item.attributes.to_le_bytes());
        let path_bytes = item.path.as_bytes();
        let path_size = (path_bytes.len() + 1) as u32;
        out.extend_from_slice(&path_size.to_le_bytes());
        out.extend_from_slice(path_bytes);
        out.push(0);
    }
    out
}

fn decode_header(buf: &[u8; FRAME_HEADER_SIZE]) -> FrameHeader {
    FrameHeader {
        message_type: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
        error: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
        flags: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
        skip_count: u64::from_le_bytes(buf[12..20].try_into().unwrap()),
        return_count: u64::from_le_bytes(buf[20..28].try_into().unwrap()),
        stop_count: u64::from_le_bytes(buf[28..36].try_into().unwrap()),
        body_size: u32::from_le_bytes(buf[36..40].try_into().unwrap()),
    }
}

fn write_error_response(pipe: HANDLE, error: WireError) -> Result<(), String> {
    write_frame(pipe, MSG_TYPE_QUERY_RESPONSE, error, &[])
}

fn write_frame(pipe: HANDLE, message_type: u32, error: WireError, body: &[u8]) -> Result<(), String> {
    let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + body.len());
    out.extend_from_slice(&message_type.to_le_bytes());
    out.extend_from_slice(&(error as u32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // flags, unused in responses
    out.extend_from_slice(&[0u8; 24]); // skip/return/stop counts, unused in responses
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(body);

    write_all(pipe, &out)
}

fn read_exact(pipe: HANDLE, buf: &mut [u8]) -> Result<(), String> {
    let mut bytes_read = 0u32;
    unsafe { ReadFile(pipe, Some(buf), Some(&mut bytes_read), None) }
        .map_err(|e| format!("pipe read failed: {e}"))?;
    if bytes_read as usize != buf.len() {
        return Err(format!("short read: expected {} got {bytes_read}", buf.len()));
    }
    Ok(())
}

fn write_all(pipe: HANDLE, buf: &[u8]) -> Result<(), String> {
    let mut bytes_written = 0u32;
    unsafe { WriteFile(pipe, Some(buf), Some(&mut bytes_written), None) }
        .map_err(|e| format!("pipe write failed: {e}"))?;
    if bytes_written as usize != buf.len() {
        return Err(format!("short write: expected {} wrote {bytes_written}", buf.len()));
    }
    Ok(())
}

/// Waits for a client with periodic shutdown checks, using overlapped I/O
/// the same way the MFT change monitor waits for directory events: issue
/// the async call, then poll its completion event with a short timeout
/// instead of blocking indefinitely.
fn connect_with_shutdown_poll(pipe: HANDLE, ctx: &ServiceContext) -> Result<bool, String> {
    let event = unsafe { CreateEventW(None, true, false, PCWSTR::null()) }
        .map_err(|e| format!("CreateEventW failed: {e}"))?;

    let mut overlapped = OVERLAPPED::default();
    overlapped.hEvent = event;

    let connect_result = unsafe { ConnectNamedPipe(pipe, Some(&mut overlapped)) };
    if let Err(err) = connect_result {
        if err.code() != ERROR_IO_PENDING.to_hresult() {
            unsafe {
                let _ = CloseHandle(event);
            }
            // A client that connects between CreateNamedPipe and
            // ConnectNamedPipe shows up as ERROR_PIPE_CONNECTED, not a
            // real failure.
            return Ok(true);
        }
    } else {
        unsafe {
            let _ = CloseHandle(event);
        }
        return Ok(true);
    }

    loop {
        if ctx.is_shutting_down() {
            unsafe {
                let _ = CloseHandle(event);
            }
            return Ok(false);
        }

        let wait = unsafe { WaitForSingleObject(event, CONNECT_POLL_TIMEOUT_MS) };
        if wait == WAIT_OBJECT_0 {
            let mut transferred = 0u32;
            let ok = unsafe { GetOverlappedResult(pipe, &overlapped, &mut transferred, false) };
            unsafe {
                let _ = CloseHandle(event);
            }
            return ok.map(|_| true).map_err(|e| e.to_string());
        } else if wait != WAIT_TIMEOUT {
            unsafe {
                let _ = CloseHandle(event);
            }
            return Err("WaitForSingleObject failed on pipe connect".to_owned());
        }
    }
}

fn create_pipe() -> Result<HANDLE, String> {
    let wide_name: Vec<u16> = PIPE_NAME.encode_utf16().chain(std::iter::once(0)).collect();

    let mut sid_buffer = [0u8; 64];
    let mut acl_buffer = [0u8; 4096];
    let mut security_descriptor = SECURITY_DESCRIPTOR::default();

    unsafe {
        InitializeSecurityDescriptor(
            PSECURITY_DESCRIPTOR(&mut security_descriptor as *mut _ as *mut _),
            SECURITY_DESCRIPTOR_REVISION,
        )
        .map_err(|e| format!("InitializeSecurityDescriptor failed: {e}"))?;

        let acl = acl_buffer.as_mut_ptr() as *mut ACL;
        InitializeAcl(acl, acl_buffer.len() as u32, windows::Win32::Security::ACL_REVISION as u32)
            .map_err(|e| format!("InitializeAcl failed: {e}"))?;

        let mut sid_size = sid_buffer.len() as u32;
        windows::Win32::Security::CreateWellKnownSid(
            windows::Win32::Security::WinWorldSid,
            None,
            Some(windows::Win32::Security::PSID(sid_buffer.as_mut_ptr() as *mut _)),
            &mut sid_size,
        )
        .map_err(|e| format!("CreateWellKnownSid failed: {e}"))?;

        let access_mask = 0x001F01FFu32; // FILE_GENERIC_READ | FILE_GENERIC_WRITE | SYNCHRONIZE
        AddAccessAllowedAce(
            acl,
            windows::Win32::Security::ACL_REVISION as u32,
            access_mask,
            windows::Win32::Security::PSID(sid_buffer.as_mut_ptr() as *mut _),
        )
        .map_err(|e| format!("AddAccessAllowedAce failed: {e}"))?;

        SetSecurityDescriptorDacl(
            PSECURITY_DESCRIPTOR(&mut security_descriptor as *mut _ as *mut _),
            true,
            Some(acl),
            false,
        )
        .map_err(|e| format!("SetSecurityDescriptorDacl failed: {e}"))?;

        let security_attributes = SECURITY_ATTRIBUTES {
            nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
            lpSecurityDescriptor: &mut security_descriptor as *mut _ as *mut _,
            bInheritHandle: false.into(),
        };

        let pipe = CreateNamedPipeW(
            PCWSTR(wide_name.as_ptr()),
            PIPE_ACCESS_DUPLEX.0 | FILE_FLAG_OVERLAPPED.0,
            (PIPE_TYPE_MESSAGE.0 | PIPE_READMODE_MESSAGE.0 | PIPE_WAIT.0 | PIPE_REJECT_REMOTE_CLIENTS.0) as u32,
            1,
            PIPE_BUFFER_SIZE,
            PIPE_BUFFER_SIZE,
            0,
            Some(&security_attributes),
        );

        if pipe.is_invalid() {
            return Err("CreateNamedPipeW returned an invalid handle".to_owned());
        }

        Ok(pipe)
    }
}
