//! Query engine: SIMD substring scan with NUL-counting, filter predicates,
//! and parent-chain path reconstruction (C6).

mod scan;

use crate::index::{IndexStore, Record, RecordId};

const MAX_ANCESTOR_DEPTH: usize = 256;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct QueryFlags: u32 {
        const NORMAL            = 0x0;
        const CASE_SENSITIVE    = 0x1;
        const FULLNAME          = 0x2;
        const ONLY_FILES        = 0x4;
        const ONLY_DIRECTORIES  = 0x8;
    }
}

#[derive(Debug, Clone)]
pub struct QueryParams {
    pub text: String,
    pub flags: QueryFlags,
    pub skip_count: u64,
    pub return_count: u64,
    /// Defaults to `skip_count + return_count` when unset (0).
    pub stop_count: u64,
}

#[derive(Debug, Clone)]
pub struct QueryResultItem {
    pub id: RecordId,
    pub attributes: u32,
    pub path: String,
}

#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub items: Vec<QueryResultItem>,
    pub found_count: u64,
}

/// `drive_letter` is needed only to prefix reconstructed paths
/// (`C:\...`); it plays no role in matching.
pub fn run_query(params: &QueryParams, index: &IndexStore, drive_letter: char) -> QueryResult {
    let mut result = QueryResult::default();
    if params.text.is_empty() {
        return result;
    }

    let stop_count = if params.stop_count > 0 {
        params.stop_count
    } else {
        params.skip_count + params.return_count
    };

    let name_buffer = index.name_buffer();
    let needle = params.text.as_bytes();
    let case_sensitive = params.flags.contains(QueryFlags::CASE_SENSITIVE);

    let mut search_start = 0usize;
    // The number of NULs passed since the last match directly gives how
    // many records to advance — this is the core trick: name order equals
    // record order, so no per-record indirection is needed to map a match
    // back to "which record is this".
    let mut record_index = 0usize;

    while result.found_count < stop_count {
        let Some(scan::Match { nul_count_before, .. }) =
            scan::find_next_match(&name_buffer[search_start..], needle, case_sensitive)
        else {
            break;
        };

        record_index += nul_count_before;

        let Some(record) = index.get_by_index(record_index) else {
            break;
        };

        let name_start = record.name_offset;
        let Some(name_end) = name_buffer[name_start..]
            .iter()
            .position(|&b| b == 0)
            .map(|p| name_start + p)
        else {
            break;
        };
        let full_name_len = name_end - name_start;
        search_start = name_end + 1;

        if matches_query_flags(record, params.flags, params.text.len(), full_name_len)
            && is_child_of_root(record, index, MAX_ANCESTOR_DEPTH)
        {
            if result.found_count >= params.skip_count
                && (result.items.len() as u64) < params.return_count
            {
                if let Some(path) = build_path(record, index, drive_letter) {
                    result.items.push(QueryResultItem {
                        id: record.id,
                        attributes: record.attributes,
                        path,
                    });
                }
            }
            result.found_count += 1;
        }

        record_index += 1;
    }

    result
}

fn matches_query_flags(
    record: &Record,
    flags: QueryFlags,
    query_len: usize,
    match_len: usize,
) -> bool {
    if !record.is_in_use() {
        return false;
    }
    if flags.contains(QueryFlags::ONLY_FILES) && record.is_directory() {
        return false;
    }
    if flags.contains(QueryFlags::ONLY_DIRECTORIES) && !record.is_directory() {
        return false;
    }
    if flags.contains(QueryFlags::FULLNAME) && query_len != match_len {
        return false;
    }
    true
}

/// Walk from `record` up to a self-referential root, bounded by `max_depth`.
/// A broken chain or one exceeding the cap is an orphan, not an error.
fn is_child_of_root(record: &Record, index: &IndexStore, max_depth: usize) -> bool {
    let mut current = *record;
    for _ in 0..max_depth {
        if current.id == current.parent_id {
            return true;
        }
        match index.get_by_id(current.parent_id) {
            Some(parent) => current = *parent,
            None => return false,
        }
    }
    false
}

fn build_path(record: &Record, index: &IndexStore, drive_letter: char) -> Option<String> {
    let mut ancestors: Vec<&Record> = Vec::with_capacity(MAX_ANCESTOR_DEPTH);
    let mut current = record;
    ancestors.push(current);

    loop {
        if current.id == current.parent_id {
            break;
        }
        if ancestors.len() >= MAX_ANCESTOR_DEPTH {
            return None;
        }
        current = index.get_by_id(current.parent_id)?;
        ancestors.push(current);
    }

    // The root itself is last in `ancestors` and is skipped — the drive
    // prefix stands in for its conventional "." name.
    let mut path = format!("{drive_letter}:");
    for ancestor in ancestors.iter().rev().skip(1) {
        path.push('\\');
        path.push_str(index.name_of(ancestor));
    }
    Some(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ntfs::FILE_ATTRIBUTE_DIRECTORY;

    fn build_fixture() -> IndexStore {
        let mut idx = IndexStore::new();
        idx.insert(
            RecordId::new(1, 0),
            RecordId::new(1, 0),
            FILE_ATTRIBUTE_DIRECTORY,
            ".",
        );
        idx.insert(RecordId::new(2, 0), RecordId::new(1, 0), 0, "readme.txt");
        idx.insert(
            RecordId::new(3, 0),
            RecordId::new(1, 0),
            FILE_ATTRIBUTE_DIRECTORY,
            "src",
        );
        idx.insert(RecordId::new(4, 0), RecordId::new(3, 0), 0, "main.rs");
        idx
    }

    fn params(text: &str, flags: QueryFlags) -> QueryParams {
        QueryParams {
            text: text.into(),
            flags,
            skip_count: 0,
            return_count: 10,
            stop_count: 0,
        }
    }

    #[test]
    fn finds_single_substring_match() {
        let idx = build_fixture();
        let result = run_query(&params("readme", QueryFlags::NORMAL), &idx, 'C');
        assert_eq!(result.found_count, 1);
        assert_eq!(result.items[0].path, "C:\\readme.txt");
    }

    #[test]
    fn only_files_excludes_directories() {
        let idx = build_fixture();
        let result = run_query(&params("r", QueryFlags::ONLY_FILES), &idx, 'C');
        assert!(result
            .items
            .iter()
            .all(|item| item.attributes & FILE_ATTRIBUTE_DIRECTORY == 0));
    }

    #[test]
    fn deleted_record_not_found() {
        let mut idx = build_fixture();
        idx.delete(RecordId::new(2, 0));
        let result = run_query(&params("readme", QueryFlags::NORMAL), &idx, 'C');
        assert_eq!(result.found_count, 0);
    }

    #[test]
    fn nested_path_is_reconstructed() {
        let idx = build_fixture();
        let result = run_query(&params("main.rs", QueryFlags::FULLNAME), &idx, 'C');
        assert_eq!(result.items[0].path, "C:\\src\\main.rs");
    }

    #[test]
    fn empty_needle_matches_nothing() {
        let idx = build_fixture();
        let result = run_query(&params("", QueryFlags::NORMAL), &idx, 'C');
        assert_eq!(result.found_count, 0);
    }

    #[test]
    fn return_count_zero_still_counts_found() {
        let idx = build_fixture();
        let mut p = params("e", QueryFlags::NORMAL);
        p.return_count = 0;
        p.stop_count = 10;
        let result = run_query(&p, &idx, 'C');
        assert!(result.found_count > 0);
        assert!(result.items.is_empty());
    }

    #[test]
    fn case_insensitive_by_default() {
        let mut idx = IndexStore::new();
        idx.insert(RecordId::new(1, 0), RecordId::new(1, 0), 0, ".");
        idx.insert(RecordId::new(2, 0), RecordId::new(1, 0), 0, "Report.PDF");
        let result = run_query(&params("report", QueryFlags::NORMAL), &idx, 'C');
        assert_eq!(result.found_count, 1);
    }

    #[test]
    fn fullname_requires_exact_length() {
        let idx = build_fixture();
        let result = run_query(&params("main", QueryFlags::FULLNAME), &idx, 'C');
        assert_eq!(result.found_count, 0);
    }
}
