//! Question routing, prompt templates and answer extraction.

pub mod classify;
pub mod extract;
pub mod prompts;

pub use classify::{QuestionRouter, Route};
pub use extract::{PatternExtractor, extract_answer};
pub use prompts::{build_prompt, render_choices};
