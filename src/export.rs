//! Export sink: one CSV results file per survey, append-only.

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use crate::state::ResponseRow;

const HEADER: [&str; 10] = [
    "User ID",
    "First Name",
    "Last Name",
    "Username",
    "Group ID",
    "Group Name",
    "Survey Date",
    "Survey Name",
    "Question",
    "Answer",
];

/// Requester metadata written alongside every answer row. Identity fields are
/// blank for anonymous surveys.
#[derive(Debug, Clone)]
pub struct Submission {
    pub user_id: String,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub group_id: String,
    pub group_name: String,
    pub date: String,
    pub survey_name: String,
}

/// Survey display name -> file-safe stem. Spaces and path separators become
/// underscores so the mapping stays deterministic and reversible via rename.
pub fn sanitize_name(name: &str) -> String {
    name.replace([' ', '/', '\\'], "_")
}

pub fn results_path(data_dir: &Path, survey_name: &str) -> PathBuf {
    data_dir.join(format!("survey_results_{}.csv", sanitize_name(survey_name)))
}

pub fn results_exist(data_dir: &Path, survey_name: &str) -> bool {
    results_path(data_dir, survey_name).exists()
}

/// Append one row per answered question, creating the file (with a header)
/// on first write.
pub fn append_rows(data_dir: &Path, submission: &Submission, rows: &[ResponseRow]) -> Result<()> {
    fs::create_dir_all(data_dir)
        .with_context(|| format!("creating export directory {}", data_dir.display()))?;
    let path = results_path(data_dir, &submission.survey_name);
    let fresh = !path.exists();

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("opening results file {}", path.display()))?;
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);

    if fresh {
        writer.write_record(HEADER)?;
    }
    for row in rows {
        writer.write_record([
            submission.user_id.as_str(),
            submission.first_name.as_str(),
            submission.last_name.as_str(),
            submission.username.as_str(),
            submission.group_id.as_str(),
            submission.group_name.as_str(),
            submission.date.as_str(),
            submission.survey_name.as_str(),
            row.question.as_str(),
            row.answer.as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Keep the name -> file mapping intact across a survey rename. A survey with
/// no results yet has nothing to move.
pub fn rename_results(data_dir: &Path, old_name: &str, new_name: &str) -> Result<()> {
    let old_path = results_path(data_dir, old_name);
    if old_path.exists() {
        let new_path = results_path(data_dir, new_name);
        fs::rename(&old_path, &new_path).with_context(|| {
            format!("renaming {} to {}", old_path.display(), new_path.display())
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(name: &str) -> Submission {
        Submission {
            user_id: "7".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            username: "ada".into(),
            group_id: "-100123".into(),
            group_name: "Engine Room".into(),
            date: "01.02.2026 10:30".into(),
            survey_name: name.into(),
        }
    }

    fn rows() -> Vec<ResponseRow> {
        vec![
            ResponseRow { question: "Happy?".into(), answer: "Yes".into() },
            ResponseRow { question: "Why?".into(), answer: "Because, reasons".into() },
        ]
    }

    #[test]
    fn sanitizes_spaces_and_separators() {
        assert_eq!(sanitize_name("team poll / v2"), "team_poll___v2");
    }

    #[test]
    fn append_creates_then_extends() {
        let dir = tempfile::tempdir().unwrap();
        let sub = submission("Feedback");
        append_rows(dir.path(), &sub, &rows()).unwrap();
        append_rows(dir.path(), &sub, &rows()[..1]).unwrap();

        let content = fs::read_to_string(results_path(dir.path(), "Feedback")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        // one header + three data rows across both writes
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("User ID,"));
        assert!(lines[1].contains("Happy?"));
        // commas inside answers stay quoted, not split
        assert!(lines[2].contains("\"Because, reasons\""));
    }

    #[test]
    fn rename_moves_exactly_one_file() {
        let dir = tempfile::tempdir().unwrap();
        append_rows(dir.path(), &submission("Old Name"), &rows()).unwrap();

        rename_results(dir.path(), "Old Name", "New Name").unwrap();
        assert!(!results_exist(dir.path(), "Old Name"));
        assert!(results_exist(dir.path(), "New Name"));

        // renaming a survey with no results is a no-op
        rename_results(dir.path(), "Missing", "Whatever").unwrap();
        assert!(!results_exist(dir.path(), "Whatever"));
    }
}
