//! Flat-file embedding database.
//!
//! One identity per line: `<label> <f1> <f2> ... <fN>`. The label ends at the
//! first whitespace; everything after it is parsed as floats.

use crate::types::{DatabaseEntry, Embedding, MatchError, MatchResult, Matcher, EMBEDDING_DIM};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("failed to read database {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("line {line}: label {label:?} has no embedding")]
    MissingEmbedding { line: usize, label: String },
    #[error("line {line}: {token:?} is not a number")]
    InvalidFloat { line: usize, token: String },
    #[error("line {line}: {token:?} is not a finite number")]
    NonFinite { line: usize, token: String },
    #[error("line {line}: expected {expected} embedding values, got {actual}")]
    DimensionMismatch {
        line: usize,
        expected: usize,
        actual: usize,
    },
    #[error("database {0} has no entries")]
    Empty(String),
}

/// Labels and embeddings loaded at startup. Immutable for the rest of the run.
#[derive(Debug, Clone)]
pub struct EmbeddingDatabase {
    entries: Vec<DatabaseEntry>,
    dim: usize,
}

impl EmbeddingDatabase {
    /// Load a database of 512-dimensional embeddings.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        Self::load_with_dim(path, EMBEDDING_DIM)
    }

    pub fn load_with_dim(path: impl AsRef<Path>, dim: usize) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| DatabaseError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let db = Self::parse(&contents, dim)?;
        if db.is_empty() {
            return Err(DatabaseError::Empty(path.display().to_string()));
        }

        tracing::info!(path = %path.display(), entries = db.len(), dim, "loaded embedding database");
        Ok(db)
    }

    /// Parse database text. Blank lines are skipped; an empty input yields an
    /// empty database.
    pub fn parse(contents: &str, dim: usize) -> Result<Self, DatabaseError> {
        let mut entries = Vec::new();

        for (i, raw) in contents.lines().enumerate() {
            let line_no = i + 1;
            let line = raw.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }

            let (label, rest) = match line.split_once(char::is_whitespace) {
                Some((label, rest)) if !rest.trim().is_empty() => (label, rest),
                _ => {
                    return Err(DatabaseError::MissingEmbedding {
                        line: line_no,
                        label: line.trim().to_string(),
                    })
                }
            };

            let values = rest
                .split_whitespace()
                .map(|token| match token.parse::<f32>() {
                    Ok(v) if v.is_finite() => Ok(v),
                    Ok(_) => Err(DatabaseError::NonFinite {
                        line: line_no,
                        token: token.to_string(),
                    }),
                    Err(_) => Err(DatabaseError::InvalidFloat {
                        line: line_no,
                        token: token.to_string(),
                    }),
                })
                .collect::<Result<Vec<f32>, _>>()?;

            if values.len() != dim {
                return Err(DatabaseError::DimensionMismatch {
                    line: line_no,
                    expected: dim,
                    actual: values.len(),
                });
            }

            entries.push(DatabaseEntry {
                label: label.to_string(),
                embedding: Embedding::new(values),
            });
        }

        Ok(Self { entries, dim })
    }

    pub fn entries(&self) -> &[DatabaseEntry] {
        &self.entries
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.label.as_str())
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Match a probe against every entry with the given strategy.
    pub fn identify(
        &self,
        matcher: &dyn Matcher,
        probe: &Embedding,
        threshold: f32,
    ) -> Result<MatchResult, MatchError> {
        matcher.compare(probe, &self.entries, threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SquaredEuclideanMatcher;
    use std::io::Write;

    fn line(label: &str, values: &[f32]) -> String {
        let floats: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        format!("{label} {}", floats.join(" "))
    }

    #[test]
    fn test_parse_splits_label_at_first_whitespace() {
        let db = EmbeddingDatabase::parse("alice\t1 2  3\nbob 4 5 6\n", 3).unwrap();
        assert_eq!(db.labels().collect::<Vec<_>>(), vec!["alice", "bob"]);
        assert_eq!(db.entries()[0].embedding.values, vec![1.0, 2.0, 3.0]);
        assert_eq!(db.entries()[1].embedding.values, vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_parse_skips_blank_lines_and_crlf() {
        let db = EmbeddingDatabase::parse("a 1 2\r\n\r\n\nb 3 4\r\n", 2).unwrap();
        assert_eq!(db.len(), 2);
        assert_eq!(db.entries()[1].embedding.values, vec![3.0, 4.0]);
    }

    #[test]
    fn test_short_line_is_rejected() {
        let err = EmbeddingDatabase::parse("a 1 2 3\nb 1 2\n", 3).unwrap_err();
        assert!(matches!(
            err,
            DatabaseError::DimensionMismatch { line: 2, expected: 3, actual: 2 }
        ));
    }

    #[test]
    fn test_label_without_embedding_is_rejected() {
        let err = EmbeddingDatabase::parse("lonely\n", 3).unwrap_err();
        assert!(matches!(err, DatabaseError::MissingEmbedding { line: 1, .. }));

        let err = EmbeddingDatabase::parse("trailing   \n", 3).unwrap_err();
        assert!(matches!(err, DatabaseError::MissingEmbedding { line: 1, .. }));
    }

    #[test]
    fn test_bad_token_is_rejected() {
        let err = EmbeddingDatabase::parse("a 1 x 3\n", 3).unwrap_err();
        match err {
            DatabaseError::InvalidFloat { line, token } => {
                assert_eq!(line, 1);
                assert_eq!(token, "x");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_non_finite_values_are_rejected() {
        for token in ["nan", "NaN", "inf", "-inf", "infinity"] {
            let src = format!("alice 1 1\nbroken {token} 0\n");
            match EmbeddingDatabase::parse(&src, 2).unwrap_err() {
                DatabaseError::NonFinite { line, token: bad } => {
                    assert_eq!(line, 2);
                    assert_eq!(bad, token);
                }
                other => panic!("unexpected error for {token}: {other}"),
            }
        }
    }

    #[test]
    fn test_load_round_trip_512() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let labels = ["carol", "dave", "erin", "frank"];
        for (n, label) in labels.iter().enumerate() {
            let values: Vec<f32> = (0..EMBEDDING_DIM).map(|j| (n * j) as f32 * 1e-3).collect();
            writeln!(file, "{}", line(label, &values)).unwrap();
        }

        let db = EmbeddingDatabase::load(file.path()).unwrap();
        assert_eq!(db.len(), labels.len());
        assert_eq!(db.labels().collect::<Vec<_>>(), labels);
        assert!(db.entries().iter().all(|e| e.embedding.dim() == EMBEDDING_DIM));
        assert_eq!(db.entries()[2].embedding.values[10], 20.0 * 1e-3);
    }

    #[test]
    fn test_load_empty_file_fails() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = EmbeddingDatabase::load(file.path()).unwrap_err();
        assert!(matches!(err, DatabaseError::Empty(_)));
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = EmbeddingDatabase::load("/nonexistent/faces.txt").unwrap_err();
        assert!(matches!(err, DatabaseError::Io { .. }));
    }

    #[test]
    fn test_identify_uses_matcher() {
        let db = EmbeddingDatabase::parse("x 0 0\ny 1 1\n", 2).unwrap();
        let probe = Embedding::new(vec![0.9, 1.0]);
        let result = db.identify(&SquaredEuclideanMatcher, &probe, 0.045).unwrap();
        assert!(result.matched);
        assert_eq!(result.identity(), Some("y"));
    }
}
