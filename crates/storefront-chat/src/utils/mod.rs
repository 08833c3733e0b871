//! Utilities module - Text processing and search keyword extraction

pub mod text_utils;
pub mod keyword_extractor;

pub use text_utils::TextUtils;
pub use keyword_extractor::KeywordExtractor;
