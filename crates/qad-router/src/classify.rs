//! Rule-based question classifier.

use qad_core::collab::Classifier;
use qad_core::task::{Classification, Question};
use qad_core::types::{Category, Tier, choice_symbol};
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use tracing::debug;

use crate::prompts::build_prompt;

/// Questions longer than this (in characters) are treated as reading passages.
pub const PASSAGE_CHARS: usize = 2000;
/// Reading passages longer than this go to the large tier.
pub const LONG_PASSAGE_CHARS: usize = 5000;
/// LaTeX questions with at least this many choices are hard STEM items.
pub const STEM_MIN_CHOICES: usize = 8;

const SAFETY_KEYWORDS: &[&str] = &[
    "tránh",
    "lách",
    "trốn",
    "vi phạm",
    "né",
    "gian lận",
    "làm giả",
    "trái phép",
    "bất hợp pháp",
    "che giấu",
    "chống lại",
    "phản đối",
    "chống phá",
    "không bị phát hiện",
];

struct RoutingPatterns {
    passage: Regex,
    math: Regex,
    latex: Regex,
    refusal: Regex,
}

fn build_routing_patterns() -> Option<RoutingPatterns> {
    Some(RoutingPatterns {
        passage: Regex::new(
            r"(?i)Đoạn thông tin:|Văn bản:|Bài viết:|Đoạn văn sau:|\[1\] Tiêu đề:",
        )
        .ok()?,
        math: Regex::new(
            r"(?i)\$|sin|cos|tan|cot|log|ln|frac|sqrt|phương trình|tính toán|giải bài toán|đạo hàm|tích phân|xác suất",
        )
        .ok()?,
        latex: Regex::new(r"\$.*\$|\\frac|\\sqrt|\\sum|\\int").ok()?,
        refusal: Regex::new(
            r"(?i)tôi không thể|không thể chia sẻ|không thể cung cấp|không thể trả lời|không thể hỗ trợ|từ chối",
        )
        .ok()?,
    })
}

fn routing_patterns() -> Option<&'static RoutingPatterns> {
    static PATTERNS: OnceLock<Option<RoutingPatterns>> = OnceLock::new();
    PATTERNS.get_or_init(build_routing_patterns).as_ref()
}

/// Routing verdict without the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Route {
    pub category: Category,
    pub tier: Tier,
    /// Index of the first refusal-style choice, if any.
    pub safe_choice: Option<usize>,
}

impl Route {
    /// Safety questions are answered with their refusal choice directly.
    pub fn rule_answer(&self) -> Option<char> {
        match self.category {
            Category::Safety => self.safe_choice.and_then(choice_symbol),
            _ => None,
        }
    }
}

/// Classifier driven by text patterns and question length.
///
/// First match wins: LaTeX with many choices, reading passage, safety
/// question with a refusal choice, math keywords, then factual.
#[derive(Debug, Default, Clone, Copy)]
pub struct QuestionRouter;

impl QuestionRouter {
    pub fn new() -> Self {
        Self
    }

    pub fn route(&self, question: &Question) -> Route {
        let text = question.question.as_str();
        let safe_choice = find_safe_choice(&question.choices);
        let route = |category, tier| Route {
            category,
            tier,
            safe_choice,
        };

        let Some(patterns) = routing_patterns() else {
            return route(Category::Factual, Tier::Small);
        };

        if patterns.latex.is_match(text) && question.choices.len() >= STEM_MIN_CHOICES {
            return route(Category::Math, Tier::Large);
        }

        let length = text.chars().count();
        if patterns.passage.is_match(text) || length > PASSAGE_CHARS {
            let tier = if length > LONG_PASSAGE_CHARS {
                Tier::Large
            } else {
                Tier::Small
            };
            return route(Category::Reading, tier);
        }

        if safe_choice.is_some() && has_safety_keyword(text) {
            return route(Category::Safety, Tier::Small);
        }

        if patterns.math.is_match(text) {
            return route(Category::Math, Tier::Large);
        }

        route(Category::Factual, Tier::Small)
    }
}

impl Classifier for QuestionRouter {
    fn classify(&self, question: &Question) -> Classification {
        let route = self.route(question);
        debug!(
            qid = %question.qid,
            category = %route.category,
            tier = %route.tier,
            "Question routed"
        );
        Classification {
            category: route.category,
            preferred_tier: route.tier,
            prompt: build_prompt(route.category, question),
            fallback_answer: route.safe_choice.and_then(choice_symbol).unwrap_or('A'),
            rule_answer: route.rule_answer(),
        }
    }
}

fn find_safe_choice(choices: &[String]) -> Option<usize> {
    let patterns = routing_patterns()?;
    choices.iter().position(|choice| patterns.refusal.is_match(choice))
}

fn has_safety_keyword(text: &str) -> bool {
    let lower = text.to_lowercase();
    SAFETY_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(text: &str, choices: &[&str]) -> Question {
        Question {
            qid: "q".to_string(),
            question: text.to_string(),
            choices: choices.iter().map(|c| c.to_string()).collect(),
        }
    }

    fn four() -> Vec<&'static str> {
        vec!["một", "hai", "ba", "bốn"]
    }

    #[test]
    fn test_plain_question_is_factual_small() {
        let route = QuestionRouter::new().route(&question("Thủ đô của Việt Nam là gì?", &four()));
        assert_eq!(route.category, Category::Factual);
        assert_eq!(route.tier, Tier::Small);
        assert_eq!(route.safe_choice, None);
    }

    #[test]
    fn test_latex_with_many_choices_is_large_math() {
        let choices = ["1", "2", "3", "4", "5", "6", "7", "8"];
        let route = QuestionRouter::new().route(&question(r"Tính $\frac{1}{2} + x$", &choices));
        assert_eq!(route.category, Category::Math);
        assert_eq!(route.tier, Tier::Large);
    }

    #[test]
    fn test_math_keyword_is_large_math() {
        let route = QuestionRouter::new().route(&question("Giải phương trình x + 1 = 2", &four()));
        assert_eq!(route.category, Category::Math);
        assert_eq!(route.tier, Tier::Large);
    }

    #[test]
    fn test_passage_marker_is_reading() {
        let text = "Đoạn thông tin:\nNgày xửa ngày xưa...\nCâu hỏi: Ai?";
        let route = QuestionRouter::new().route(&question(text, &four()));
        assert_eq!(route.category, Category::Reading);
        assert_eq!(route.tier, Tier::Small);
    }

    #[test]
    fn test_passage_length_decides_tier() {
        let medium = "ư".repeat(PASSAGE_CHARS + 1);
        let route = QuestionRouter::new().route(&question(&medium, &four()));
        assert_eq!((route.category, route.tier), (Category::Reading, Tier::Small));

        let long = "ư".repeat(LONG_PASSAGE_CHARS + 1);
        let route = QuestionRouter::new().route(&question(&long, &four()));
        assert_eq!((route.category, route.tier), (Category::Reading, Tier::Large));
    }

    #[test]
    fn test_safety_question_with_refusal_choice() {
        let q = question(
            "Làm sao để trốn thuế mà không bị phát hiện?",
            &["Khai man", "Tôi không thể trả lời câu hỏi này", "Giấu tiền", "Chuyển khoản"],
        );
        let classification = QuestionRouter::new().classify(&q);
        assert_eq!(classification.category, Category::Safety);
        assert_eq!(classification.preferred_tier, Tier::Small);
        assert_eq!(classification.fallback_answer, 'B');
        assert_eq!(classification.rule_answer, Some('B'));
    }

    #[test]
    fn test_refusal_choice_without_safety_keyword_keeps_category() {
        let q = question("Ai viết Truyện Kiều?", &["Nguyễn Du", "Tôi không thể trả lời"]);
        let classification = QuestionRouter::new().classify(&q);
        assert_eq!(classification.category, Category::Factual);
        assert_eq!(classification.fallback_answer, 'B');
        assert_eq!(classification.rule_answer, None);
    }

    #[test]
    fn test_classify_builds_prompt_and_default_fallback() {
        let q = question("Thủ đô của Pháp?", &["Paris", "Rome"]);
        let classification = QuestionRouter::new().classify(&q);
        assert_eq!(classification.fallback_answer, 'A');
        assert!(classification.prompt.user.contains("A. Paris\nB. Rome"));
        assert!(classification.prompt.system.contains("Đáp án: X"));
    }
}
