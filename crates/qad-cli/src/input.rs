//! Question file input and submission CSV output.

use anyhow::{Context, Result, bail};
use qad_core::collab::Classifier;
use qad_core::task::{Question, Task};
use std::fmt::Write as _;
use std::path::Path;

/// Read a JSON array of questions. Every question needs a non-empty `qid`.
pub(crate) fn load_questions(path: &Path) -> Result<Vec<Question>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read input: {}", path.display()))?;
    let questions: Vec<Question> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse input: {}", path.display()))?;
    if let Some(index) = questions.iter().position(|q| q.qid.trim().is_empty()) {
        bail!("Question #{index} in {} has an empty qid", path.display());
    }
    Ok(questions)
}

/// One task per question, in input order.
pub(crate) fn build_tasks(questions: &[Question], classifier: &dyn Classifier) -> Vec<Task> {
    questions
        .iter()
        .map(|question| Task::from_classification(question, classifier.classify(question)))
        .collect()
}

/// Render `qid,answer` rows with a header.
pub(crate) fn render_submission<'a>(rows: impl IntoIterator<Item = (&'a str, char)>) -> String {
    let mut out = String::from("qid,answer\n");
    for (qid, answer) in rows {
        let _ = writeln!(out, "{},{answer}", csv_field(qid));
    }
    out
}

pub(crate) fn write_submission<'a>(
    path: &Path,
    rows: impl IntoIterator<Item = (&'a str, char)>,
) -> Result<()> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output dir: {}", dir.display()))?;
    }
    std::fs::write(path, render_submission(rows))
        .with_context(|| format!("Failed to write submission: {}", path.display()))
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
