//! Offline scoring of predictions against a labelled question set.

use anyhow::{Context, Result};
use qad_core::types::OutputFormat;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

type Answers = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct WrongAnswer {
    pub qid: String,
    pub predicted: String,
    pub correct: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct EvalReport {
    pub total_gt: usize,
    pub matched: usize,
    pub correct: usize,
    pub wrong: usize,
    pub not_found: usize,
    /// Percentage of matched questions answered correctly.
    pub accuracy: f64,
    pub wrong_list: Vec<WrongAnswer>,
}

fn read_json(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn answer_of(entry: &Value, keys: &[&str]) -> Option<String> {
    match entry {
        Value::Object(map) => keys
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map(normalize),
        Value::String(answer) => Some(normalize(answer)),
        _ => None,
    }
}

fn normalize(answer: &str) -> String {
    answer.trim().to_uppercase()
}

fn collect_map(map: &serde_json::Map<String, Value>, keys: &[&str]) -> Answers {
    map.iter()
        .filter_map(|(qid, entry)| {
            let answer = answer_of(entry, keys)?;
            (!answer.is_empty()).then(|| (qid.clone(), answer))
        })
        .collect()
}

fn collect_list(items: &[Value], keys: &[&str]) -> Answers {
    items
        .iter()
        .filter_map(|item| {
            let qid = item.get("qid")?.as_str()?;
            let answer = answer_of(item, keys)?;
            (!qid.is_empty() && !answer.is_empty()).then(|| (qid.to_string(), answer))
        })
        .collect()
}

/// Predictions from a cache snapshot (`{"answers": {qid: entry}}`), a list of
/// `{qid, answer}` records, or a plain `{qid: answer}` map.
pub(crate) fn parse_predictions(value: &Value) -> Answers {
    const KEYS: &[&str] = &["answer", "extracted_answer"];
    match value {
        Value::Object(map) => match map.get("answers") {
            Some(Value::Object(answers)) => collect_map(answers, KEYS),
            _ => collect_map(map, KEYS),
        },
        Value::Array(items) => collect_list(items, KEYS),
        _ => Answers::new(),
    }
}

/// Ground truth from a list of `{qid, answer}` records or a `{qid: answer}` map.
pub(crate) fn parse_ground_truth(value: &Value) -> Answers {
    const KEYS: &[&str] = &["answer"];
    match value {
        Value::Object(map) => collect_map(map, KEYS),
        Value::Array(items) => collect_list(items, KEYS),
        _ => Answers::new(),
    }
}

pub(crate) fn evaluate(predictions: &Answers, ground_truth: &Answers) -> EvalReport {
    let mut report = EvalReport {
        total_gt: ground_truth.len(),
        matched: 0,
        correct: 0,
        wrong: 0,
        not_found: 0,
        accuracy: 0.0,
        wrong_list: Vec::new(),
    };
    for (qid, expected) in ground_truth {
        let Some(predicted) = predictions.get(qid) else {
            report.not_found += 1;
            continue;
        };
        report.matched += 1;
        if predicted == expected {
            report.correct += 1;
        } else {
            report.wrong += 1;
            report.wrong_list.push(WrongAnswer {
                qid: qid.clone(),
                predicted: predicted.clone(),
                correct: expected.clone(),
            });
        }
    }
    if report.matched > 0 {
        report.accuracy = report.correct as f64 / report.matched as f64 * 100.0;
    }
    report
}

/// Handle `qad evaluate`.
pub(crate) fn handle_evaluate(
    pred: &Path,
    gt: &Path,
    output: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let predictions = parse_predictions(&read_json(pred)?);
    let ground_truth = parse_ground_truth(&read_json(gt)?);
    let report = evaluate(&predictions, &ground_truth);

    if let Some(path) = output {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            println!("Predictions loaded:  {}", predictions.len());
            println!("Ground truth:        {}", report.total_gt);
            println!("Matched:             {}", report.matched);
            println!("Correct:             {}", report.correct);
            println!("Wrong:               {}", report.wrong);
            println!("Not found:           {}", report.not_found);
            println!("Accuracy:            {:.2}%", report.accuracy);
            if !report.wrong_list.is_empty() {
                println!();
                println!("Wrong answers:");
                for wrong in &report.wrong_list {
                    println!(
                        "  {}: pred={} | correct={}",
                        wrong.qid, wrong.predicted, wrong.correct
                    );
                }
            }
            if let Some(path) = output {
                println!("Report saved to {}", path.display());
            }
        }
    }
    Ok(())
}
