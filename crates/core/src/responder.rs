//! Canned responses and pure reply formatting. Everything here works on
//! already-fetched data and never touches a store; lookup misses are
//! user-facing strings, not errors.

pub const GREETING: &str = "¡Hola! Soy el asistente virtual del APR. Puedo ayudarte con horarios, saldos, reportes de cortes, subsidios y beneficios sociales.";

pub const SUBSIDY_QUALIFIES: &str = "¡Buenas noticias! Con ese porcentaje Ud. CALIFICA. Debe ir a la Municipalidad con su última cuenta pagada.";
pub const SUBSIDY_REJECTED: &str =
    "Lo lamento, la normativa actual solo cubre hasta el 40% de vulnerabilidad.";
pub const SUBSIDY_INFO: &str = "El subsidio de agua potable depende del Estado. Para saber si calificas, necesito saber tu porcentaje del Registro Social de Hogares. ¿Lo tienes?";

pub const SOLIDARITY_FUND: &str = "Como socio tienes acceso al Fondo Solidario: cubre siniestros (incendio), enfermedades graves (cáncer) y ayuda mortuoria. ¡No olvides activarlo!";
pub const SCHOLARSHIPS: &str = "La cooperativa entrega becas escolares anuales y aguinaldos en navidad a los socios que tienen sus cuentas al día.";
pub const OVERCONSUMPTION: &str = "Si su cuenta subió mucho, NO suele ser el medidor. Por favor realice la prueba de la 'llave de paso': cierre todas las llaves y mire si el medidor gira. Si gira, tiene una fuga interna (generalmente en el baño).";

pub const BALANCE_NEEDS_IDENTITY: &str =
    "Para ver tu saldo, necesito que inicies sesión o me digas tu RUT primero.";
pub const ACCOUNT_NOT_FOUND: &str = "No encuentro un usuario con ese RUT.";
pub const NO_PENDING_DEBT: &str = "¡Excelente! No tienes deudas pendientes. 🌟";

pub const ALL_SECTORS_NORMAL: &str =
    "El servicio está operando normalmente en todos los sectores.";

pub const FALLBACK: &str = "Disculpa, no entendí bien tu consulta. Prueba preguntando por 'horario', 'saldo', 'cortes', 'subsidios' o 'beneficios'.";

pub const STORE_UNAVAILABLE: &str = "Lo sentimos, tuvimos un problema consultando la información en este momento. Por favor intenta nuevamente en unos minutos.";

/// Inclusive eligibility cutoff for the state water subsidy: the Registro
/// Social de Hogares percentage must not exceed this value.
pub const SUBSIDY_CUTOFF: u64 = 40;

pub fn subsidy_reply(percent: Option<u64>) -> &'static str {
    match percent {
        Some(value) if value <= SUBSIDY_CUTOFF => SUBSIDY_QUALIFIES,
        Some(_) => SUBSIDY_REJECTED,
        None => SUBSIDY_INFO,
    }
}

pub fn debt_reply(total: i64) -> String {
    format!(
        "Actualmente tienes una deuda total de ${}. ¿Deseas información sobre cómo pagar?",
        format_thousands(total)
    )
}

pub fn sector_outage_reply(sector_name: &str, alert: &str) -> String {
    format!(
        "⚠️ Atención: Tu sector '{}' presenta un corte reportado: {}",
        sector_name, alert
    )
}

pub fn sector_normal_reply(sector_name: &str) -> String {
    format!(
        "Tu sector '{}' está operando con normalidad. Si no tienes agua, por favor revisa tu llave de paso interna.",
        sector_name
    )
}

pub fn outage_list_reply(sector_names: &[String]) -> String {
    format!(
        "Actualmente tenemos cortes programados o emergencias en: {}.",
        sector_names.join(", ")
    )
}

/// Comma thousands grouping, no locale negotiation.
pub fn format_thousands(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    let offset = digits.len() % 3;

    for (index, ch) in digits.chars().enumerate() {
        if index != 0 && (index + 3 - offset) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    if amount < 0 {
        format!("-{}", grouped)
    } else {
        grouped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cutoff_is_inclusive_at_forty() {
        assert_eq!(subsidy_reply(Some(40)), SUBSIDY_QUALIFIES);
        assert_eq!(subsidy_reply(Some(41)), SUBSIDY_REJECTED);
    }

    #[test]
    fn zero_percent_qualifies() {
        assert_eq!(subsidy_reply(Some(0)), SUBSIDY_QUALIFIES);
    }

    #[test]
    fn missing_percent_returns_general_info() {
        assert_eq!(subsidy_reply(None), SUBSIDY_INFO);
    }

    #[test]
    fn groups_thousands_with_commas() {
        assert_eq!(format_thousands(0), "0");
        assert_eq!(format_thousands(500), "500");
        assert_eq!(format_thousands(15000), "15,000");
        assert_eq!(format_thousands(1234567), "1,234,567");
    }

    #[test]
    fn debt_reply_embeds_grouped_total() {
        assert!(debt_reply(15000).contains("$15,000"));
    }

    #[test]
    fn outage_reply_carries_alert_verbatim() {
        let reply = sector_outage_reply("Poblacion San Jose", "Rotura de matriz en Av. Principal");
        assert!(reply.contains("Poblacion San Jose"));
        assert!(reply.contains("Rotura de matriz en Av. Principal"));
    }
}
