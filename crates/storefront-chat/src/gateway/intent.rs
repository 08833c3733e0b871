//! Keyword intent classifier for customer messages

use lazy_static::lazy_static;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    ProductSearch,
    PolicyQuestion,
    Complaint,
    GeneralInquiry,
    Other,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::ProductSearch => "product_search",
            Intent::PolicyQuestion => "policy_question",
            Intent::Complaint => "complaint",
            Intent::GeneralInquiry => "general_inquiry",
            Intent::Other => "other",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

lazy_static! {
    /// Checked in order; the first list with a hit wins.
    static ref INTENT_KEYWORDS: Vec<(Intent, Vec<&'static str>)> = vec![
        (Intent::ProductSearch, vec![
            "looking for", "do you have", "do you sell", "recommend", "search",
            "find", "show me", "product", "in stock", "available", "buy",
            "purchase", "price", "cheap", "under $",
        ]),
        (Intent::PolicyQuestion, vec![
            "refund", "return", "shipping", "delivery", "policy", "exchange",
            "warranty", "privacy", "terms", "cancel",
        ]),
        (Intent::Complaint, vec![
            "broken", "upset", "angry", "terrible", "damaged", "complain",
            "disappointed", "worst", "not working", "wrong item",
        ]),
        (Intent::GeneralInquiry, vec![
            "hello", "help", "contact", "hours", "location", "information",
            "how do i", "how can i", "question",
        ]),
    ];
}

/// Pure function of the text. Swap this out for a model-backed classifier
/// by changing the call in the retrieval planner.
pub fn classify_intent(text: &str) -> Intent {
    let lower = text.to_lowercase();
    INTENT_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(intent, _)| *intent)
        .unwrap_or(Intent::Other)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_reference_classifications() {
        assert_eq!(classify_intent("Can I get a refund for my order?"), Intent::PolicyQuestion);
        assert_eq!(classify_intent("Looking for running shoes"), Intent::ProductSearch);
        assert_eq!(classify_intent("This is broken and I'm upset"), Intent::Complaint);
    }

    #[test]
    fn test_priority_order() {
        // Both product and policy keywords: product wins.
        assert_eq!(classify_intent("Do you have a return label product?"), Intent::ProductSearch);
        // Policy beats complaint.
        assert_eq!(classify_intent("My item arrived damaged, how do refunds work?"), Intent::PolicyQuestion);
        assert_eq!(classify_intent("Hello, I have a question"), Intent::GeneralInquiry);
    }

    #[test]
    fn test_case_insensitive_and_fallback() {
        assert_eq!(classify_intent("SHIPPING TO CANADA?"), Intent::PolicyQuestion);
        assert_eq!(classify_intent("ok"), Intent::Other);
        assert_eq!(classify_intent(""), Intent::Other);
    }

    #[test]
    fn test_serializes_snake_case() {
        let json = serde_json::to_string(&Intent::ProductSearch).unwrap();
        assert_eq!(json, "\"product_search\"");
        assert_eq!(Intent::GeneralInquiry.to_string(), "general_inquiry");
    }

    proptest! {
        #[test]
        fn prop_classification_is_deterministic(text in ".{0,200}") {
            prop_assert_eq!(classify_intent(&text), classify_intent(&text));
        }

        #[test]
        fn prop_refund_text_is_never_other(prefix in "[a-z ]{0,30}") {
            let text = format!("{} refund", prefix);
            prop_assert_ne!(classify_intent(&text), Intent::Other);
        }
    }
}
