//! End-to-end editing scenarios through the session surface.

use bined_core::{
    BinaryData, BinaryDataError, ContentData, EditableBinaryData, EditationMode, EditorSession,
    FileHandlingMode, PagedData, SegmentsRepository, SessionConfig,
};
use pretty_assertions::assert_eq;
use std::io::Write;
use tempfile::NamedTempFile;

fn temp_file(content: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content).unwrap();
    file.flush().unwrap();
    file
}

fn session(mode: FileHandlingMode) -> EditorSession {
    EditorSession::new(SessionConfig {
        file_handling_mode: mode,
        ..SessionConfig::default()
    })
}

fn pattern(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i * 31 % 251) as u8).collect()
}

#[test]
fn test_delta_prepend_to_large_file() {
    let original = pattern(10 * 1024 * 1024);
    let file = temp_file(&original);
    let mut repository = SegmentsRepository::new();
    let mut session = session(FileHandlingMode::Delta);

    session.open_document(&mut repository, file.path(), true).unwrap();
    let state = session.get_document_state();
    assert_eq!(state.segment_count, 1);
    assert_eq!(state.memory_usage, 0);

    session.insert(0, &[0xca, 0xfe, 0xba, 0xbe]).unwrap();
    assert_eq!(session.get_document_state().memory_usage, 4);
    session.save_file(&mut repository).unwrap();
    assert!(!session.is_modified());

    let saved = std::fs::read(file.path()).unwrap();
    assert_eq!(saved.len(), original.len() + 4);
    assert_eq!(&saved[..4], &[0xca, 0xfe, 0xba, 0xbe]);
    assert!(saved[4..] == original[..]);

    // After saving the document is again a plain view of the file.
    assert_eq!(session.get_document_state().segment_count, 1);
    assert_eq!(session.get(1024, 8).unwrap(), saved[1024..1032]);
    session.close_data(&mut repository);
    assert_eq!(repository.open_source_count(), 0);
}

#[test]
fn test_paged_overwrite_keeps_length() {
    let mut data = PagedData::from_bytes(b"HELLO");
    data.overwrite(1, b"I").unwrap();
    assert_eq!(data.to_vec(), b"HILLO");
    assert_eq!(data.len(), 5);
}

#[test]
fn test_read_only_document_rejects_mutation() {
    for mode in [FileHandlingMode::Memory, FileHandlingMode::Delta] {
        let file = temp_file(b"read only content");
        let mut repository = SegmentsRepository::new();
        let mut session = session(mode);
        session.open_document(&mut repository, file.path(), false).unwrap();
        assert_eq!(session.editation_mode(), EditationMode::ReadOnly);

        assert!(matches!(session.insert(0, b"x"), Err(BinaryDataError::ReadOnly)));
        assert!(matches!(session.remove(0, 4), Err(BinaryDataError::ReadOnly)));
        assert!(matches!(session.overwrite(0, b"x"), Err(BinaryDataError::ReadOnly)));
        assert!(!session.can_undo());
        assert!(!session.is_modified());
        assert_eq!(session.get(0, 4).unwrap(), b"read");

        session.close_data(&mut repository);
        assert_eq!(std::fs::read(file.path()).unwrap(), b"read only content");
    }
}

#[test]
fn test_read_only_delta_source_cannot_become_editable() {
    let file = temp_file(b"abc");
    let mut repository = SegmentsRepository::new();
    let mut session = session(FileHandlingMode::Delta);
    session.open_document(&mut repository, file.path(), false).unwrap();
    assert!(matches!(
        session.set_editation_mode(EditationMode::Expanding),
        Err(BinaryDataError::ReadOnly)
    ));
    session.close_data(&mut repository);
}

#[test]
fn test_reopen_same_file_editable_after_read_only() {
    let file = temp_file(b"abc");
    let mut repository = SegmentsRepository::new();
    let mut session = session(FileHandlingMode::Delta);
    session.open_document(&mut repository, file.path(), false).unwrap();
    session.open_document(&mut repository, file.path(), true).unwrap();

    assert_eq!(session.editation_mode(), EditationMode::Expanding);
    assert_eq!(repository.open_source_count(), 1);
    session.overwrite(0, b"A").unwrap();
    session.save_file(&mut repository).unwrap();
    assert_eq!(std::fs::read(file.path()).unwrap(), b"Abc");
    session.close_data(&mut repository);
    assert_eq!(repository.open_source_count(), 0);
}

#[test]
fn test_reopen_same_file_read_only_after_editable() {
    let file = temp_file(b"abc");
    let mut repository = SegmentsRepository::new();
    let mut session = session(FileHandlingMode::Delta);
    session.open_document(&mut repository, file.path(), true).unwrap();
    session.open_document(&mut repository, file.path(), false).unwrap();

    let ContentData::Delta(document) = session.data() else {
        panic!("expected delta content");
    };
    assert!(!document.file_source().unwrap().is_writable());
    assert!(matches!(
        session.set_editation_mode(EditationMode::Expanding),
        Err(BinaryDataError::ReadOnly)
    ));
    assert_eq!(session.get(0, 3).unwrap(), b"abc");
    session.close_data(&mut repository);
    assert_eq!(repository.open_source_count(), 0);
}

#[test]
fn test_read_only_open_of_shared_writable_source_stays_read_only() {
    let file = temp_file(b"abc");
    let mut repository = SegmentsRepository::new();
    let mut writer = session(FileHandlingMode::Delta);
    let mut reader = session(FileHandlingMode::Delta);
    writer.open_document(&mut repository, file.path(), true).unwrap();
    reader.open_document(&mut repository, file.path(), false).unwrap();

    assert_eq!(repository.open_source_count(), 1);
    assert!(matches!(
        reader.set_editation_mode(EditationMode::Expanding),
        Err(BinaryDataError::ReadOnly)
    ));
    assert!(matches!(reader.overwrite(0, b"x"), Err(BinaryDataError::ReadOnly)));
    reader.close_data(&mut repository);
    writer.close_data(&mut repository);
    assert_eq!(repository.open_source_count(), 0);
}

#[test]
fn test_switch_unbound_delta_to_memory() {
    let mut repository = SegmentsRepository::new();
    let mut session = session(FileHandlingMode::Delta);
    session.new_document(&mut repository);
    session.insert(0, b"0123456789").unwrap();
    session.remove(2, 3).unwrap();
    session.insert(4, b"abc").unwrap();
    session.overwrite(0, b"ZZ").unwrap();

    let before = session.get(0, session.len()).unwrap();
    assert!(session.is_modified());

    session
        .switch_file_handling_mode(&mut repository, FileHandlingMode::Memory)
        .unwrap();

    let paged = session.data().as_paged().expect("memory content after switch");
    assert_eq!(paged.to_vec(), before);
    assert!(!session.can_undo());
    assert!(!session.can_redo());
    assert_eq!(session.command_position(), 0);
}

#[test]
fn test_switch_unbound_memory_to_delta_and_back() {
    let mut repository = SegmentsRepository::new();
    let mut session = session(FileHandlingMode::Memory);
    let content = pattern(100_000);
    session
        .open_stream(&mut repository, &mut content.as_slice(), true)
        .unwrap();

    session
        .switch_file_handling_mode(&mut repository, FileHandlingMode::Delta)
        .unwrap();
    let document = session.data().as_delta().expect("delta content after switch");
    assert!(document.is_consistent());
    assert!(!document.is_bound());

    session
        .switch_file_handling_mode(&mut repository, FileHandlingMode::Memory)
        .unwrap();
    assert!(session.get(0, session.len()).unwrap() == content);
}

#[test]
fn test_memory_save_as_then_reopen_in_delta() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("image.bin");
    let mut repository = SegmentsRepository::new();
    let mut session = session(FileHandlingMode::Memory);
    session.insert(0, b"first version").unwrap();
    session.save_file_as(&target).unwrap();

    session
        .switch_file_handling_mode(&mut repository, FileHandlingMode::Delta)
        .unwrap();
    assert_eq!(repository.open_source_count(), 1);
    session.overwrite(0, b"FIRST").unwrap();
    session.save_file(&mut repository).unwrap();
    assert_eq!(std::fs::read(&target).unwrap(), b"FIRST version");

    session.close_data(&mut repository);
    assert_eq!(repository.open_source_count(), 0);
}

#[test]
fn test_two_sessions_share_one_source() {
    let file = temp_file(b"shared");
    let mut repository = SegmentsRepository::new();
    let mut first = session(FileHandlingMode::Delta);
    let mut second = session(FileHandlingMode::Delta);
    first.open_document(&mut repository, file.path(), true).unwrap();
    second.open_document(&mut repository, file.path(), true).unwrap();
    assert_eq!(repository.open_source_count(), 1);

    first.overwrite(0, b"S").unwrap();
    assert!(matches!(
        first.save_file(&mut repository),
        Err(BinaryDataError::IllegalState(_))
    ));
    assert!(first.is_modified());

    second.close_data(&mut repository);
    assert_eq!(repository.open_source_count(), 1);
    first.save_file(&mut repository).unwrap();
    assert_eq!(std::fs::read(file.path()).unwrap(), b"Shared");

    first.close_data(&mut repository);
    assert_eq!(repository.open_source_count(), 0);
}

#[test]
fn test_stream_surface() {
    let mut repository = SegmentsRepository::new();
    let mut session = session(FileHandlingMode::Memory);
    session
        .load_from_stream(&mut repository, &mut &b"stream data"[..])
        .unwrap();
    assert_eq!(session.file(), None);
    assert_eq!(session.len(), 11);

    let mut out = Vec::new();
    session.save_to_stream(&mut out).unwrap();
    assert_eq!(out, b"stream data");

    session.dispose(&mut repository);
    assert!(session.is_empty());
}
