use crate::gallery::builder::{rebuild, BuildError};
use crate::gallery::store::EmbeddingStore;
use crate::storage::EnrollmentStorage;

use super::fakes::{
    self, assert_close, embedding_of, write_frame, Faults, BLUE, GREEN, INPUT_SIZE, RED, YELLOW,
};

#[test]
fn test_rebuild_groups_samples_per_identity() {
    let tmp = tempfile::tempdir().unwrap();
    write_frame(&tmp.path().join("alice/1.png"), &[RED]);
    write_frame(&tmp.path().join("alice/2.png"), &[RED]);
    write_frame(&tmp.path().join("bob/1.png"), &[BLUE]);
    write_frame(&tmp.path().join("bob/empty.png"), &[]);

    let (mut pipeline, calls) = fakes::pipeline(false);
    let mut store = EmbeddingStore::new();
    let storage = EnrollmentStorage::new(tmp.path());

    let report = rebuild(&mut pipeline, &mut store, &storage).unwrap().unwrap();

    assert!(store.is_valid());
    assert_eq!(report.identities, 2);
    assert_eq!(report.samples, 3);
    assert_eq!(report.skipped_images, 1);
    assert!(report.empty_identities.is_empty());

    let names: Vec<&str> = store.identities().iter().map(|i| i.name()).collect();
    assert_eq!(names, vec!["alice", "bob"]);

    let alice = store.get("alice").unwrap();
    assert_eq!(alice.samples().len(), 2);
    assert_close(alice.mean(), &embedding_of(RED));

    let bob = store.get("bob").unwrap();
    assert_eq!(bob.samples().len(), 1);
    assert_eq!(bob.mean(), bob.samples()[0].as_slice());

    // one detector call per image, one batch per identity
    assert_eq!(calls.detect(), 4);
    assert_eq!(calls.extract_batch(), 2);
    assert_eq!(calls.extract_one(), 0);
}

#[test]
fn test_valid_store_skips_collaborators() {
    let tmp = tempfile::tempdir().unwrap();
    write_frame(&tmp.path().join("alice/1.png"), &[RED]);

    let (mut pipeline, calls) = fakes::pipeline(false);
    let mut store = EmbeddingStore::new();
    let storage = EnrollmentStorage::new(tmp.path());

    assert!(rebuild(&mut pipeline, &mut store, &storage).unwrap().is_some());
    let after_first = calls.total();

    // new files are ignored until the store is marked stale
    write_frame(&tmp.path().join("bob/1.png"), &[BLUE]);
    assert!(rebuild(&mut pipeline, &mut store, &storage).unwrap().is_none());
    assert_eq!(calls.total(), after_first);
    assert_eq!(store.len(), 1);

    store.mark_stale();
    let report = rebuild(&mut pipeline, &mut store, &storage).unwrap().unwrap();
    assert_eq!(report.identities, 2);
    assert!(store.get("bob").is_some());
    assert_eq!(store.get("alice").unwrap().samples().len(), 1);
}

#[test]
fn test_unreadable_and_foreign_files_skipped() {
    let tmp = tempfile::tempdir().unwrap();
    write_frame(&tmp.path().join("alice/1.png"), &[RED]);
    std::fs::write(tmp.path().join("alice/broken.jpg"), b"not an image").unwrap();
    std::fs::write(tmp.path().join("alice/notes.txt"), b"hello").unwrap();
    std::fs::write(tmp.path().join("stray.png"), b"outside any identity").unwrap();

    let (mut pipeline, calls) = fakes::pipeline(false);
    let mut store = EmbeddingStore::new();
    let storage = EnrollmentStorage::new(tmp.path());

    let report = rebuild(&mut pipeline, &mut store, &storage).unwrap().unwrap();

    assert_eq!(report.identities, 1);
    assert_eq!(report.samples, 1);
    assert_eq!(report.skipped_images, 1);
    // the broken file never reaches the detector
    assert_eq!(calls.detect(), 1);
}

#[test]
fn test_missing_root_is_error() {
    let tmp = tempfile::tempdir().unwrap();
    let (mut pipeline, calls) = fakes::pipeline(false);
    let mut store = EmbeddingStore::new();
    let storage = EnrollmentStorage::new(tmp.path().join("missing"));

    let result = rebuild(&mut pipeline, &mut store, &storage);

    assert!(matches!(result, Err(BuildError::EnrollmentRoot { .. })));
    assert!(!store.is_valid());
    assert_eq!(calls.total(), 0);
}

#[test]
fn test_every_face_of_multi_face_image_enrolled() {
    let tmp = tempfile::tempdir().unwrap();
    write_frame(&tmp.path().join("group/1.png"), &[RED, GREEN]);

    let (mut pipeline, _calls) = fakes::pipeline(false);
    let mut store = EmbeddingStore::new();
    let storage = EnrollmentStorage::new(tmp.path());

    rebuild(&mut pipeline, &mut store, &storage).unwrap();

    let group = store.get("group").unwrap();
    assert_eq!(group.samples().len(), 2);
    assert_close(&group.samples()[0], &embedding_of(RED));
    assert_close(&group.samples()[1], &embedding_of(GREEN));
}

#[test]
fn test_identity_without_faces_left_out() {
    let tmp = tempfile::tempdir().unwrap();
    write_frame(&tmp.path().join("alice/1.png"), &[RED]);
    write_frame(&tmp.path().join("ghost/1.png"), &[]);
    std::fs::create_dir_all(tmp.path().join("nobody")).unwrap();

    let (mut pipeline, _calls) = fakes::pipeline(false);
    let mut store = EmbeddingStore::new();
    let storage = EnrollmentStorage::new(tmp.path());

    let report = rebuild(&mut pipeline, &mut store, &storage).unwrap().unwrap();

    assert_eq!(store.len(), 1);
    assert!(store.get("ghost").is_none());
    assert_eq!(report.empty_identities, vec!["ghost", "nobody"]);
}

#[test]
fn test_landmarks_scaled_into_extractor_input() {
    let tmp = tempfile::tempdir().unwrap();
    write_frame(&tmp.path().join("alice/1.png"), &[RED]);

    let (mut pipeline, calls) = fakes::pipeline(true);
    let mut store = EmbeddingStore::new();
    let storage = EnrollmentStorage::new(tmp.path());

    rebuild(&mut pipeline, &mut store, &storage).unwrap();

    let recorded = calls.landmarks();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].len(), 5);

    let size = INPUT_SIZE as f32;
    for point in &recorded[0] {
        assert!((0.0..=size).contains(&point.x));
        assert!((0.0..=size).contains(&point.y));
    }
    assert!((recorded[0][0].x - 0.3 * size).abs() < 1e-3);
    assert!((recorded[0][0].y - 0.4 * size).abs() < 1e-3);
}

#[test]
fn test_boxes_only_backend_prepares_without_landmarks() {
    let tmp = tempfile::tempdir().unwrap();
    write_frame(&tmp.path().join("alice/1.png"), &[RED, GREEN]);

    let (mut pipeline, calls) = fakes::pipeline(false);
    let mut store = EmbeddingStore::new();
    let storage = EnrollmentStorage::new(tmp.path());

    rebuild(&mut pipeline, &mut store, &storage).unwrap();

    let recorded = calls.landmarks();
    assert_eq!(recorded.len(), 2);
    assert!(recorded.iter().all(|landmarks| landmarks.is_empty()));
}

#[test]
fn test_collaborator_failures_skip_and_continue() {
    let tmp = tempfile::tempdir().unwrap();
    write_frame(&tmp.path().join("alice/1.png"), &[RED]);
    write_frame(&tmp.path().join("alice/2.png"), &[RED]);
    write_frame(&tmp.path().join("bob/1.png"), &[BLUE]);
    write_frame(&tmp.path().join("carol/1.png"), &[GREEN]);
    write_frame(&tmp.path().join("dave/1.png"), &[YELLOW]);
    write_frame(&tmp.path().join(".hidden/1.png"), &[GREEN]);

    let faults = Faults {
        detect_on: Some(BLUE),
        zero_vector_on: Some(YELLOW),
        max_batch: Some(1),
        ..Faults::default()
    };
    let (mut pipeline, calls) = fakes::pipeline_with(false, faults);
    let mut store = EmbeddingStore::new();
    let storage = EnrollmentStorage::new(tmp.path());

    let report = rebuild(&mut pipeline, &mut store, &storage).unwrap().unwrap();

    assert!(store.is_valid());
    let names: Vec<&str> = store.identities().iter().map(|i| i.name()).collect();
    assert_eq!(names, vec!["carol"]);
    assert_close(store.get("carol").unwrap().mean(), &embedding_of(GREEN));

    assert_eq!(report.identities, 1);
    assert_eq!(report.samples, 1);
    // bob's detector failure
    assert_eq!(report.skipped_images, 1);
    // alice's failed batch of two, dave's zero vector
    assert_eq!(report.skipped_faces, 3);
    assert_eq!(report.empty_identities, vec!["alice", "bob", "dave"]);

    assert_eq!(calls.detect(), 5);
}

#[test]
fn test_prepare_failure_skips_only_that_face() {
    let tmp = tempfile::tempdir().unwrap();
    write_frame(&tmp.path().join("group/1.png"), &[RED, GREEN]);

    let faults = Faults {
        prepare_on: Some(RED),
        ..Faults::default()
    };
    let (mut pipeline, _calls) = fakes::pipeline_with(false, faults);
    let mut store = EmbeddingStore::new();
    let storage = EnrollmentStorage::new(tmp.path());

    let report = rebuild(&mut pipeline, &mut store, &storage).unwrap().unwrap();

    assert!(store.is_valid());
    let group = store.get("group").unwrap();
    assert_eq!(group.samples().len(), 1);
    assert_close(&group.samples()[0], &embedding_of(GREEN));
    assert_eq!(report.skipped_faces, 1);
    assert_eq!(report.skipped_images, 0);
}
