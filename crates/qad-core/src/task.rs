use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::types::{Category, Tier};

/// Opaque task identifier, stable across runs (the question id).
pub type TaskId = String;

/// One multiple-choice question as read from the input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub qid: String,
    pub question: String,
    #[serde(default)]
    pub choices: Vec<String>,
}

/// System and user text sent to a tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Classifier verdict for one question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: Category,
    pub preferred_tier: Tier,
    pub prompt: Prompt,
    /// Designated "cannot answer" symbol; `'A'` when the question has none.
    pub fallback_answer: char,
    /// Answer decided by rule, with no model call needed.
    pub rule_answer: Option<char>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    InFlight,
    Completed,
    Failed,
}

/// One question-answer unit to resolve.
///
/// `category` and `preferred_tier` are fixed at construction; only `state`
/// moves, and only the dispatcher moves it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: TaskId,
    pub category: Category,
    pub preferred_tier: Tier,
    pub prompt: Prompt,
    pub choice_count: usize,
    pub fallback_answer: char,
    pub rule_answer: Option<char>,
    pub state: TaskState,
}

impl Task {
    pub fn new(
        id: impl Into<TaskId>,
        category: Category,
        preferred_tier: Tier,
        prompt: Prompt,
        choice_count: usize,
    ) -> Self {
        Self {
            id: id.into(),
            category,
            preferred_tier,
            prompt,
            choice_count,
            fallback_answer: 'A',
            rule_answer: None,
            state: TaskState::Pending,
        }
    }

    pub fn with_fallback_answer(mut self, symbol: char) -> Self {
        self.fallback_answer = symbol;
        self
    }

    pub fn with_rule_answer(mut self, symbol: Option<char>) -> Self {
        self.rule_answer = symbol;
        self
    }

    /// Build a pending task from a question and its classification.
    pub fn from_classification(question: &Question, classification: Classification) -> Self {
        Self::new(
            question.qid.clone(),
            classification.category,
            classification.preferred_tier,
            classification.prompt,
            question.choices.len(),
        )
        .with_fallback_answer(classification.fallback_answer)
        .with_rule_answer(classification.rule_answer)
    }
}

/// Closed result of one backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Success(String),
    RateLimited,
    ContentFiltered(String),
    TransientError(String),
}

impl CallOutcome {
    /// The error this outcome represents, if any.
    pub fn as_error(&self, tier: Tier) -> Option<AppError> {
        match self {
            Self::Success(_) => None,
            Self::RateLimited => Some(AppError::RateLimited { tier }),
            Self::ContentFiltered(message) => Some(AppError::ContentFiltered {
                tier,
                message: message.clone(),
            }),
            Self::TransientError(message) => Some(AppError::TransientError {
                tier,
                message: message.clone(),
            }),
        }
    }
}

/// Durable record of one resolved task. Written once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: TaskId,
    pub answer: char,
    pub tier_used: Tier,
    pub category: Category,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub raw_responses: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Why a task ended up Failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub tiers_tried: Vec<Tier>,
    pub attempts: u32,
    pub last_error: String,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tiers: Vec<&str> = self.tiers_tried.iter().map(Tier::as_str).collect();
        write!(
            f,
            "{} attempt(s) on [{}]: {}",
            self.attempts,
            tiers.join(", "),
            self.last_error
        )
    }
}

/// Final per-task outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskResult {
    Resolved(CacheEntry),
    Failed(FailureReason),
}

impl TaskResult {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    pub fn entry(&self) -> Option<&CacheEntry> {
        match self {
            Self::Resolved(entry) => Some(entry),
            Self::Failed(_) => None,
        }
    }
}
