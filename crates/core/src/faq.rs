use serde::{Deserialize, Serialize};

/// Static FAQ table, scanned in this order. The order matters: the
/// substring scan returns the first key found in the message.
pub const FAQS: &[(&str, &str)] = &[
    (
        "horario",
        "Nuestro horario de atención es de Lunes a Viernes de 08:30 a 14:00 hrs.",
    ),
    (
        "ubicacion",
        "Estamos ubicados en Calle Principal 123, Graneros.",
    ),
    (
        "telefono",
        "Nuestro fono de emergencias es +569 9999 9999.",
    ),
    (
        "pagar",
        "Puedes pagar tu cuenta presencialmente o mediante transferencia a la cuenta vista del Banco Estado.",
    ),
    (
        "requisitos",
        "Para inscribirte necesitas: Fotocopia de Carnet y Certificado de Dominio Vigente.",
    ),
];

/// Similarity cutoff matching the standalone fuzzy matcher's tuning.
pub const FUZZY_CUTOFF: f64 = 0.6;

/// Whether the router chain consults the fuzzy matcher after the
/// substring scan misses. The production chain never did, so
/// `Substring` is the default; `SubstringThenFuzzy` is opt-in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaqStrategy {
    #[default]
    Substring,
    SubstringThenFuzzy,
}

/// Index of the first FAQ entry whose key appears anywhere in the
/// normalized message.
pub fn substring_faq(normalized: &str) -> Option<usize> {
    FAQS.iter()
        .position(|(key, _)| normalized.contains(key))
}

/// Approximate lookup against the FAQ keys: best normalized-Levenshtein
/// score at or above [`FUZZY_CUTOFF`], or nothing. Standalone utility,
/// not part of the default chain.
pub fn closest_faq(message: &str) -> Option<&'static str> {
    FAQS.iter()
        .map(|(key, answer)| (strsim::normalized_levenshtein(message, key), *answer))
        .filter(|(score, _)| *score >= FUZZY_CUTOFF)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, answer)| answer)
}
