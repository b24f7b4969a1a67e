/// End-to-end index/query/journal integration tests.
///
/// These exercise the real `IndexStore`, `run_query`, `usn::apply_changes`,
/// and snapshot codec together, the way the worker loop and the IPC
/// connection loop actually use them — no mocking of the index internals.
/// Raw volume/MFT/USN OS calls are out of reach in a test binary (they need
/// an elevated process and a real NTFS volume), so these tests build index
/// state directly rather than through `MftIterator`/`UsnJournal`.
use quickfind_core::index::{IndexStore, RecordId};
use quickfind_core::ntfs::FILE_ATTRIBUTE_DIRECTORY;
use quickfind_core::query::{run_query, QueryFlags, QueryParams};
use quickfind_core::usn::{self, Change, ChangeKind};
use tempfile::tempdir;

fn id(n: u64) -> RecordId {
    RecordId::new(n, 0)
}

fn params(text: &str, flags: QueryFlags) -> QueryParams {
    QueryParams {
        text: text.to_owned(),
        flags,
        skip_count: 0,
        return_count: 20,
        stop_count: 0,
    }
}

fn change(usn: i64, kind: ChangeKind, record_id: RecordId, parent_id: RecordId, name: &str, attributes: u32) -> Change {
    Change {
        usn,
        kind,
        id: record_id,
        parent_id,
        name: name.into(),
        attributes,
        ignore: false,
    }
}

#[test]
fn basic_substring_match_reconstructs_full_path() {
    let mut idx = IndexStore::new();
    idx.insert(id(1), id(1), FILE_ATTRIBUTE_DIRECTORY, ".");
    idx.insert(id(10), id(1), 0, "readme.txt");

    let result = run_query(&params("readme", QueryFlags::NORMAL), &idx, 'C');

    assert_eq!(result.found_count, 1);
    assert_eq!(result.items.len(), 1);
    assert_eq!(result.items[0].path, "C:\\readme.txt");
}

#[test]
fn pagination_returns_bounded_page_with_accurate_found_count() {
    let mut idx = IndexStore::new();
    idx.insert(id(1), id(1), FILE_ATTRIBUTE_DIRECTORY, ".");
    for i in 0..100 {
        idx.insert(id(100 + i), id(1), 0, &format!("f{i}"));
    }

    let mut p = params("f4", QueryFlags::NORMAL);
    p.return_count = 5;
    // stop_count defaults to skip_count + return_count, which would cap
    // found_count at the page size too; set it past the total record count
    // to get an accurate total while still only paging back 5 items.
    p.stop_count = 100;
    let result = run_query(&p, &idx, 'C');

    assert_eq!(result.items.len(), 5);
    // f4, f40..f43 (storage order) -> 5 of the 11 names containing "f4".
    assert_eq!(result.found_count, 11);
}

#[test]
fn deleted_record_no_longer_matches() {
    let mut idx = IndexStore::new();
    idx.insert(id(1), id(1), FILE_ATTRIBUTE_DIRECTORY, ".");
    idx.insert(id(5), id(1), 0, "target5.log");
    idx.delete(id(5));

    let result = run_query(&params("target5", QueryFlags::NORMAL), &idx, 'C');
    assert_eq!(result.found_count, 0);
}

#[test]
fn only_files_flag_excludes_directories() {
    let mut idx = IndexStore::new();
    idx.insert(id(1), id(1), FILE_ATTRIBUTE_DIRECTORY, ".");
    idx.insert(id(2), id(1), FILE_ATTRIBUTE_DIRECTORY, "shared_dir");
    idx.insert(id(3), id(1), 0, "shared_file.txt");

    let result = run_query(&params("shared", QueryFlags::ONLY_FILES), &idx, 'C');

    assert_eq!(result.items.len(), 1);
    assert_eq!(result.items[0].path, "C:\\shared_file.txt");
}

#[test]
fn insert_then_delete_in_same_batch_coalesces_to_no_op() {
    let mut idx = IndexStore::new();
    idx.insert(id(1), id(1), FILE_ATTRIBUTE_DIRECTORY, ".");

    let mut changes = vec![
        change(100, ChangeKind::Insert, id(7), id(1), "churn.tmp", 0),
        change(101, ChangeKind::Delete, id(7), id(1), "churn.tmp", 0),
    ];
    usn::coalesce(&mut changes);
    usn::apply_changes(&mut idx, &changes);

    let result = run_query(&params("churn", QueryFlags::NORMAL), &idx, 'C');
    assert_eq!(result.found_count, 0);
    assert_eq!(idx.record_count(), 0);
    assert_eq!(idx.latest_usn, 101);
}

#[test]
fn insert_then_rename_in_same_batch_keeps_renamed_name_only() {
    let mut idx = IndexStore::new();
    idx.insert(id(1), id(1), FILE_ATTRIBUTE_DIRECTORY, ".");

    let mut changes = vec![
        change(200, ChangeKind::Insert, id(8), id(1), "draft.docx", 0),
        change(201, ChangeKind::Update, id(8), id(1), "final.docx", 0),
    ];
    usn::coalesce(&mut changes);
    usn::apply_changes(&mut idx, &changes);

    assert_eq!(run_query(&params("draft", QueryFlags::NORMAL), &idx, 'C').found_count, 0);
    let result = run_query(&params("final", QueryFlags::NORMAL), &idx, 'C');
    assert_eq!(result.found_count, 1);
    assert_eq!(idx.record_count(), 1);
}

#[test]
fn snapshot_round_trip_preserves_query_results_after_restore() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("quickfind.db");

    let mut idx = IndexStore::new();
    idx.insert(id(1), id(1), FILE_ATTRIBUTE_DIRECTORY, ".");
    idx.insert(id(2), id(1), 0, "budget-2026.xlsx");
    idx.latest_usn = 4242;
    idx.latest_journal_id = 7;

    quickfind_core::index::snapshot::write_to_file(&idx, &path).unwrap();
    let restored = quickfind_core::index::snapshot::read_from_file(&path).unwrap();

    let result = run_query(&params("budget", QueryFlags::NORMAL), &restored, 'C');
    assert_eq!(result.found_count, 1);
    assert_eq!(restored.latest_usn, 4242);
    assert_eq!(restored.latest_journal_id, 7);
}

#[test]
fn prune_after_many_deletes_preserves_live_query_results() {
    let mut idx = IndexStore::new();
    idx.insert(id(1), id(1), FILE_ATTRIBUTE_DIRECTORY, ".");
    for i in 0..50 {
        idx.insert(id(100 + i), id(1), 0, &format!("scratch{i}.tmp"));
    }
    for i in 0..40 {
        idx.delete(id(100 + i));
    }
    idx.insert(id(999), id(1), 0, "keepme.txt");

    idx.prune();

    let nul_count = idx.name_buffer().iter().filter(|&&b| b == 0).count();
    assert_eq!(nul_count, idx.record_count());

    let result = run_query(&params("keepme", QueryFlags::NORMAL), &idx, 'C');
    assert_eq!(result.found_count, 1);

    for i in 0..40 {
        assert!(idx.get_by_id(id(100 + i)).is_none());
    }
}
