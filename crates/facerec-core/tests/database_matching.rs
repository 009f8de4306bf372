use facerec_core::{
    EmbeddingDatabase, Embedding, SquaredEuclideanMatcher, DEFAULT_MATCH_THRESHOLD, EMBEDDING_DIM,
};
use std::io::Write;

fn write_database(lines: &[(&str, Vec<f32>)]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    for (label, values) in lines {
        let floats: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        writeln!(file, "{label} {}", floats.join(" ")).unwrap();
    }
    file.flush().unwrap();
    file
}

#[test]
fn loads_file_and_identifies_faces() {
    let mut bob = vec![0.0; EMBEDDING_DIM];
    bob[0] = 1.0;
    let file = write_database(&[
        ("alice", vec![0.0; EMBEDDING_DIM]),
        ("bob", bob),
        ("carol", vec![0.5; EMBEDDING_DIM]),
    ]);

    let db = EmbeddingDatabase::load(file.path()).unwrap();
    assert_eq!(db.labels().collect::<Vec<_>>(), vec!["alice", "bob", "carol"]);
    assert!(db.entries().iter().all(|e| e.embedding.dim() == EMBEDDING_DIM));

    let matcher = SquaredEuclideanMatcher;

    let known = db
        .identify(&matcher, &Embedding::new(vec![0.0; EMBEDDING_DIM]), DEFAULT_MATCH_THRESHOLD)
        .unwrap();
    assert_eq!(known.identity(), Some("alice"));
    assert_eq!(known.distance, 0.0);

    let stranger = db
        .identify(&matcher, &Embedding::new(vec![0.1; EMBEDDING_DIM]), DEFAULT_MATCH_THRESHOLD)
        .unwrap();
    assert_eq!(stranger.identity(), None);
    assert_eq!(stranger.label.as_deref(), Some("alice"));
    assert!((stranger.distance - 5.12).abs() < 1e-3);

    // A looser threshold accepts the same probe.
    let loose = db
        .identify(&matcher, &Embedding::new(vec![0.1; EMBEDDING_DIM]), 6.0)
        .unwrap();
    assert_eq!(loose.identity(), Some("alice"));
}

#[test]
fn rejects_truncated_embedding_line() {
    let file = write_database(&[
        ("alice", vec![0.0; EMBEDDING_DIM]),
        ("bob", vec![0.0; EMBEDDING_DIM - 1]),
    ]);
    let err = EmbeddingDatabase::load(file.path()).unwrap_err();
    assert!(err.to_string().contains("line 2"), "{err}");
}
