pub mod faq;
pub mod intent;
pub mod models;
pub mod responder;

pub use faq::{closest_faq, substring_faq, FaqStrategy, FAQS};
pub use intent::{classify_intent, extract_percentage, normalize_message, Intent};
pub use models::*;
pub use responder::format_thousands;
