//! Seams between the dispatch engine and its collaborators.

use crate::task::{CallOutcome, Classification, Prompt, Question};
use crate::types::Tier;

/// Assigns category, preferred tier, prompt and safe answer to a question.
pub trait Classifier: Send + Sync {
    fn classify(&self, question: &Question) -> Classification;
}

/// One synchronous call to a tier's endpoint.
///
/// Implementations must map every failure into [`CallOutcome`]; they never
/// panic and never retry on their own.
pub trait InferenceBackend: Send + Sync {
    fn invoke(&self, tier: Tier, prompt: &Prompt) -> CallOutcome;
}

/// Turns raw model text into an answer symbol. Total: always returns a symbol.
pub trait AnswerExtractor: Send + Sync {
    fn extract(&self, raw: &str, choice_count: usize) -> char;
}
