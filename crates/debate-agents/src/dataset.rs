//! Problem datasets.
//!
//! A dataset is either a JSON array of problems or a `.jsonl` file with one
//! problem per line. Records use the dataset field names
//! (`problem_statement`, `ground_answer`) or the native ones.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use coordination::debate::Problem;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read dataset {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid problem record in {path} (record {record}): {source}")]
    Parse {
        path: PathBuf,
        record: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("duplicate problem id '{0}'")]
    DuplicateId(String),

    #[error("problem '{0}' has an empty statement")]
    EmptyStatement(String),
}

/// Anything that can produce the problems for a run.
pub trait ProblemSource {
    fn load_problems(&self) -> Result<Vec<Problem>, DatasetError>;
}

/// File-backed dataset with a `skip`/`take` window.
#[derive(Debug, Clone)]
pub struct JsonProblemSource {
    path: PathBuf,
    skip: usize,
    take: Option<usize>,
}

impl JsonProblemSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            skip: 0,
            take: None,
        }
    }

    pub fn window(mut self, skip: usize, take: Option<usize>) -> Self {
        self.skip = skip;
        self.take = take;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_jsonl(&self) -> bool {
        self.path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("jsonl"))
    }

    fn parse(&self, raw: &str) -> Result<Vec<Problem>, DatasetError> {
        let parse_err = |record, source| DatasetError::Parse {
            path: self.path.clone(),
            record,
            source,
        };

        if self.is_jsonl() {
            raw.lines()
                .enumerate()
                .filter(|(_, line)| !line.trim().is_empty())
                .map(|(i, line)| serde_json::from_str(line).map_err(|e| parse_err(i + 1, e)))
                .collect()
        } else {
            serde_json::from_str(raw).map_err(|e| parse_err(0, e))
        }
    }
}

impl ProblemSource for JsonProblemSource {
    fn load_problems(&self) -> Result<Vec<Problem>, DatasetError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|source| DatasetError::Io {
            path: self.path.clone(),
            source,
        })?;
        let problems = self.parse(&raw)?;

        let mut seen = HashSet::new();
        for problem in &problems {
            if !seen.insert(problem.id.as_str()) {
                return Err(DatasetError::DuplicateId(problem.id.clone()));
            }
            if problem.statement.trim().is_empty() {
                return Err(DatasetError::EmptyStatement(problem.id.clone()));
            }
        }

        let total = problems.len();
        let selected: Vec<Problem> = problems
            .into_iter()
            .skip(self.skip)
            .take(self.take.unwrap_or(usize::MAX))
            .collect();
        info!(
            path = %self.path.display(),
            total,
            skip = self.skip,
            selected = selected.len(),
            "dataset loaded"
        );
        Ok(selected)
    }
}

/// Problems held in memory, mostly for tests and embedding.
impl ProblemSource for Vec<Problem> {
    fn load_problems(&self) -> Result<Vec<Problem>, DatasetError> {
        Ok(self.clone())
    }
}
