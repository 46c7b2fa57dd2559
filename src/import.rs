//! ARC-format puzzle import.
//!
//! A puzzle file is `{"train": [{input, output}...], "test": [...]}`.
//! A collection file maps dataset IDs to such puzzles. Train pairs come
//! first; test pairs are held out as test cases and must carry an output.

use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::{Pair, grid_from_value, validate_grid};
use crate::error::{GridbenchError, Result};
use crate::id::puzzle_id_for;
use crate::store::{NewPuzzle, PuzzleInsert, SharedStore, lock_store};

#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Use the dataset ID instead of the content address.
    pub keep_ids: bool,
    pub tags: Vec<String>,
    pub source: String,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            keep_ids: false,
            tags: Vec::new(),
            source: "import".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedImport {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub duplicates: usize,
    pub failed: Vec<FailedImport>,
}

/// Pairs of one ARC puzzle, train first, test pairs marked.
pub fn parse_arc_puzzle(value: &Value) -> std::result::Result<Vec<Pair>, String> {
    let train = value["train"].as_array().map(Vec::as_slice).unwrap_or_default();
    if train.is_empty() {
        return Err("no training pairs".to_string());
    }
    let test = value["test"].as_array().map(Vec::as_slice).unwrap_or_default();

    let mut pairs = Vec::with_capacity(train.len() + test.len());
    for (i, raw) in train.iter().chain(test).enumerate() {
        let is_test = i >= train.len();
        let input = grid_from_value(&raw["input"]).ok_or_else(|| format!("pair {}: input is not a grid", i))?;
        let output = grid_from_value(&raw["output"]).ok_or_else(|| {
            if is_test {
                format!("test pair {}: missing expected output", i - train.len())
            } else {
                format!("pair {}: output is not a grid", i)
            }
        })?;
        validate_grid(&input).map_err(|e| format!("pair {} input: {}", i, e))?;
        validate_grid(&output).map_err(|e| format!("pair {} output: {}", i, e))?;

        let pair = Pair::new(input, output, i as u32);
        pairs.push(if is_test { pair.test_case() } else { pair });
    }
    Ok(pairs)
}

/// Expand files, directories (every `*.json` below them) and glob patterns.
pub fn collect_files(inputs: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        let path = Path::new(input);
        let pattern = if path.is_dir() {
            path.join("**").join("*.json").to_string_lossy().to_string()
        } else if path.is_file() {
            files.push(path.to_path_buf());
            continue;
        } else {
            input.clone()
        };

        let before = files.len();
        let matches = glob::glob(&pattern).map_err(|e| GridbenchError::InvalidPuzzle(format!("{}: {}", input, e)))?;
        files.extend(matches.filter_map(|m| m.ok()).filter(|p| p.is_file()));
        if files.len() == before {
            log::warn!("No puzzle files matched {}", input);
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

/// Import every puzzle found in `files`.
///
/// Bad puzzles are reported and skipped. Only store errors abort the import.
pub fn import_files(store: &SharedStore, files: &[PathBuf], options: &ImportOptions) -> Result<ImportReport> {
    let mut report = ImportReport::default();

    for file in files {
        let stem = file.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
        let value = match fs::read_to_string(file)
            .map_err(|e| e.to_string())
            .and_then(|text| serde_json::from_str::<Value>(&text).map_err(|e| e.to_string()))
        {
            Ok(value) => value,
            Err(reason) => {
                report.failed.push(FailedImport {
                    name: file.display().to_string(),
                    reason,
                });
                continue;
            }
        };

        if value.get("train").is_some() {
            import_one(store, &stem, &value, options, &mut report)?;
        } else if let Some(collection) = value.as_object() {
            for (dataset_id, puzzle) in collection {
                import_one(store, dataset_id, puzzle, options, &mut report)?;
            }
        } else {
            report.failed.push(FailedImport {
                name: file.display().to_string(),
                reason: "not an ARC puzzle or collection".to_string(),
            });
        }
    }

    log::info!(
        "Imported {} puzzles, {} duplicates, {} failed",
        report.imported,
        report.duplicates,
        report.failed.len()
    );
    Ok(report)
}

fn import_one(
    store: &SharedStore,
    dataset_id: &str,
    value: &Value,
    options: &ImportOptions,
    report: &mut ImportReport,
) -> Result<()> {
    let pairs = match parse_arc_puzzle(value) {
        Ok(pairs) => pairs,
        Err(reason) => {
            log::warn!("Skipping {}: {}", dataset_id, reason);
            report.failed.push(FailedImport {
                name: dataset_id.to_string(),
                reason,
            });
            return Ok(());
        }
    };

    let id = if options.keep_ids && !dataset_id.is_empty() {
        dataset_id.to_string()
    } else {
        puzzle_id_for(&pairs)
    };
    let puzzle = NewPuzzle {
        id,
        idea: None,
        source: options.source.clone(),
        tags: options.tags.clone(),
        generation_job_id: None,
        pairs,
        reasoning: String::new(),
        tokens_used: 0,
        time_taken_ms: 0,
    };

    match lock_store(store)?.insert_puzzle(&puzzle)? {
        PuzzleInsert::Created { .. } => report.imported += 1,
        PuzzleInsert::Duplicate => report.duplicates += 1,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::is_content_id;
    use crate::store::{JobStore, shared};
    use serde_json::json;
    use tempfile::TempDir;

    fn puzzle_json(seed: u8) -> Value {
        json!({
            "train": [
                {"input": [[seed, 0]], "output": [[0, seed]]},
                {"input": [[seed, 1]], "output": [[1, seed]]}
            ],
            "test": [{"input": [[seed, 2]], "output": [[2, seed]]}]
        })
    }

    fn write(dir: &Path, name: &str, value: &Value) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, value.to_string()).unwrap();
        path
    }

    #[test]
    fn test_parse_marks_test_pairs() {
        let pairs = parse_arc_puzzle(&puzzle_json(3)).unwrap();
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs.iter().map(|p| p.order).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(!pairs[1].is_test_case);
        assert!(pairs[2].is_test_case);
    }

    #[test]
    fn test_parse_rejects_missing_test_output() {
        let value = json!({
            "train": [{"input": [[1]], "output": [[2]]}],
            "test": [{"input": [[3]]}]
        });
        let err = parse_arc_puzzle(&value).unwrap_err();
        assert!(err.contains("missing expected output"));
    }

    #[test]
    fn test_parse_rejects_empty_train() {
        assert!(parse_arc_puzzle(&json!({"train": [], "test": []})).is_err());
    }

    #[test]
    fn test_import_directory_with_duplicates_and_failures() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a.json", &puzzle_json(1));
        write(temp.path(), "b.json", &puzzle_json(1));
        write(temp.path(), "bad.json", &json!({"train": []}));

        let store = shared(JobStore::open_in_memory().unwrap());
        let files = collect_files(&[temp.path().to_string_lossy().to_string()]).unwrap();
        assert_eq!(files.len(), 3);

        let options = ImportOptions {
            tags: vec!["ARC-AGI 2024".to_string()],
            ..ImportOptions::default()
        };
        let report = import_files(&store, &files, &options).unwrap();
        assert_eq!(report.imported, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].name, "bad");

        let eligible = lock_store(&store).unwrap().eligible_generations(&[]).unwrap();
        assert_eq!(eligible.len(), 1);
        assert!(is_content_id(&eligible[0].puzzle_id));
        assert_eq!(eligible[0].tags, vec!["ARC-AGI 2024".to_string()]);
    }

    #[test]
    fn test_import_collection_keeping_ids() {
        let temp = TempDir::new().unwrap();
        let file = write(
            temp.path(),
            "challenges.json",
            &json!({"007bbfb7": puzzle_json(4), "00d62c1b": puzzle_json(5)}),
        );

        let store = shared(JobStore::open_in_memory().unwrap());
        let options = ImportOptions {
            keep_ids: true,
            source: "arc-2024-training".to_string(),
            ..ImportOptions::default()
        };
        let report = import_files(&store, &[file], &options).unwrap();
        assert_eq!(report.imported, 2);

        let puzzle = lock_store(&store).unwrap().get_puzzle("007bbfb7").unwrap().unwrap();
        assert_eq!(puzzle.source, "arc-2024-training");
    }

    #[test]
    fn test_unreadable_file_is_reported() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("broken.json");
        fs::write(&path, "{not json").unwrap();

        let store = shared(JobStore::open_in_memory().unwrap());
        let report = import_files(&store, &[path], &ImportOptions::default()).unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.imported, 0);
    }
}
