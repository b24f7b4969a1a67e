/// Platform-specific functionality — elevation checks.
///
/// Raw volume I/O (see [`crate::volume`]) typically requires the process
/// to run elevated; this lets callers surface a clearer error than the
/// raw `ERROR_ACCESS_DENIED` the volume open would otherwise produce.
pub mod permissions;

pub use permissions::is_elevated;
