use anyhow::Result;
use qad_core::task::Question;
use qad_core::types::{Category, OutputFormat, Tier};
use qad_router::QuestionRouter;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::input::load_questions;

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub(crate) struct RoutingSummary {
    pub total: usize,
    pub by_category: BTreeMap<Category, usize>,
    pub by_tier: BTreeMap<Tier, usize>,
    /// Questions with a refusal-style choice usable as the fallback answer.
    pub with_safe_choice: usize,
    /// Safety questions answered with their refusal choice, no model call.
    pub rule_answered: usize,
}

impl RoutingSummary {
    pub(crate) fn from_questions(questions: &[Question], router: &QuestionRouter) -> Self {
        let mut summary = Self::default();
        for question in questions {
            let route = router.route(question);
            summary.total += 1;
            *summary.by_category.entry(route.category).or_default() += 1;
            *summary.by_tier.entry(route.tier).or_default() += 1;
            if route.safe_choice.is_some() {
                summary.with_safe_choice += 1;
            }
            if route.rule_answer().is_some() {
                summary.rule_answered += 1;
            }
        }
        summary
    }
}

/// Handle `qad classify`.
pub(crate) fn handle_classify(input: &Path, format: OutputFormat) -> Result<()> {
    let questions = load_questions(input)?;
    let summary = RoutingSummary::from_questions(&questions, &QuestionRouter::new());

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Text => {
            println!("Questions: {}", summary.total);
            println!("By category:");
            for category in Category::ALL {
                let count = summary.by_category.get(&category).copied().unwrap_or(0);
                println!("  {:<8} {count}", category.as_str());
            }
            println!("By tier:");
            for tier in Tier::ALL {
                let count = summary.by_tier.get(&tier).copied().unwrap_or(0);
                println!("  {:<8} {count}", tier.as_str());
            }
            println!("With refusal choice: {}", summary.with_safe_choice);
            println!("Answered by rule:    {}", summary.rule_answered);
        }
    }
    Ok(())
}
