use once_cell::sync::Lazy;
use regex::Regex;

use crate::faq::{substring_faq, FAQS};

/// Trigger keywords for each rule. Plain substring containment on the
/// normalized message, no word boundaries: "descuentos" matches
/// "descuento". The tables are immutable process-wide configuration.
pub const GREETING_KEYWORDS: &[&str] = &["hola", "buenas", "aló"];
pub const SUBSIDY_KEYWORDS: &[&str] = &[
    "subsidio",
    "ayuda estatal",
    "descuento",
    "rsh",
    "registro social",
    "porcentaje",
    "%",
];
pub const BENEFITS_KEYWORDS: &[&str] = &["beneficio", "ayuda", "solidario", "seguro", "fondo"];
pub const SCHOLARSHIP_KEYWORDS: &[&str] = &["beca", "navidad", "escolar", "aguinaldo"];
pub const OVERCONSUMPTION_KEYWORDS: &[&str] =
    &["cuenta alta", "subió mucho", "muy caro", "robo", "medidor malo"];
pub const BALANCE_KEYWORDS: &[&str] = &["saldo", "deuda", "cuanto debo", "cuenta"];
pub const OUTAGE_KEYWORDS: &[&str] = &[
    "corte",
    "sin agua",
    "no tengo agua",
    "fuga",
    "estado",
    "servicio",
    "hay agua",
];

static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)%?").expect("valid digit regex"));

/// The classified purpose of a message. One variant per rule, in chain
/// order; `Faq` carries the index into [`FAQS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Greeting,
    Subsidy { percent: Option<u64> },
    SocialBenefits,
    Scholarships,
    Overconsumption,
    Balance,
    Outage,
    Faq(usize),
    Unknown,
}

impl Intent {
    pub fn as_tag(self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::Subsidy { .. } => "subsidy",
            Self::SocialBenefits => "social_benefits",
            Self::Scholarships => "scholarships",
            Self::Overconsumption => "overconsumption",
            Self::Balance => "balance",
            Self::Outage => "outage",
            Self::Faq(_) => "faq",
            Self::Unknown => "unknown",
        }
    }
}

/// Lowercases and trims the raw message. Applied exactly once, before
/// any rule evaluation.
pub fn normalize_message(input: &str) -> String {
    input.trim().to_lowercase()
}

/// First run of digits in the message, optionally followed by `%`.
/// A run too long for `u64` clamps to `u64::MAX`, which lands on the
/// over-threshold side of the subsidy rule instead of crashing.
pub fn extract_percentage(message: &str) -> Option<u64> {
    DIGIT_RUN
        .captures(message)
        .and_then(|caps| caps.get(1))
        .map(|digits| digits.as_str().parse::<u64>().unwrap_or(u64::MAX))
}

/// The ordered rule chain. First match wins; the order is significant
/// and must not change — a greeting that also mentions "saldo" is still
/// a greeting, and "cuenta alta" must be seen before "cuenta".
pub fn classify_intent(normalized: &str) -> Intent {
    if contains_any(normalized, GREETING_KEYWORDS) {
        return Intent::Greeting;
    }

    if contains_any(normalized, SUBSIDY_KEYWORDS) {
        return Intent::Subsidy {
            percent: extract_percentage(normalized),
        };
    }

    if contains_any(normalized, BENEFITS_KEYWORDS) {
        return Intent::SocialBenefits;
    }

    if contains_any(normalized, SCHOLARSHIP_KEYWORDS) {
        return Intent::Scholarships;
    }

    if contains_any(normalized, OVERCONSUMPTION_KEYWORDS) {
        return Intent::Overconsumption;
    }

    if contains_any(normalized, BALANCE_KEYWORDS) {
        return Intent::Balance;
    }

    if contains_any(normalized, OUTAGE_KEYWORDS) {
        return Intent::Outage;
    }

    if let Some(index) = substring_faq(normalized) {
        return Intent::Faq(index);
    }

    Intent::Unknown
}

fn contains_any(input: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| input.contains(needle))
}
