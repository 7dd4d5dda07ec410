//! Domain-scope gating (8.b).
//!
//! Classifies a sanitized query into one of the administrative domains
//! this system serves, or rejects it as out-of-scope.

/// The domain a query was classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    /// Administrative procedures, regulations, directives.
    Administrative,
    /// Training, curricula, academic calendars.
    Educational,
    /// Budgets, payments, viáticos, compensation.
    Financial,
    /// Does not match any served domain's vocabulary.
    OutOfScope,
}

const ADMINISTRATIVE_KEYWORDS: &[&str] = &[
    "directiva", "resolucion", "resolución", "procedimiento", "norma", "reglamento", "tramite",
    "trámite", "requisito", "plazo", "expediente", "memorando", "oficio",
];

const EDUCATIONAL_KEYWORDS: &[&str] = &[
    "capacitacion", "capacitación", "curricula", "curriculo", "currículo", "calendario academico",
    "calendario académico", "docente", "estudiante", "matricula", "matrícula", "curso",
];

const FINANCIAL_KEYWORDS: &[&str] = &[
    "viatico", "viático", "presupuesto", "pago", "remuneracion", "remuneración", "compensacion",
    "compensación", "monto", "tarifa", "escala", "bonificacion", "bonificación", "planilla",
];

/// Vocabulary that triggers hard rejection regardless of any incidental
/// overlap with an in-domain vocabulary (8.b).
const OUT_OF_SCOPE_KEYWORDS: &[&str] = &[
    "medicina", "medico", "médico", "salud", "enfermedad", "deporte", "deportes", "futbol",
    "fútbol", "partido", "entretenimiento", "pelicula", "película", "musica", "música",
    "politica", "política", "eleccion", "elección", "elecciones", "religion", "religión",
    "iglesia",
];

/// Classifies `sanitized_query` into a served domain plus a confidence score.
///
/// Confidence is the fraction of the query's words that matched the winning
/// domain's vocabulary, capped at 0.9 (8.b). Out-of-scope classifications
/// always carry confidence 0.0.
#[must_use]
pub fn classify(sanitized_query: &str) -> (Domain, f32) {
    let lower = sanitized_query.to_lowercase();
    let word_count = lower.split_whitespace().count().max(1);

    if OUT_OF_SCOPE_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return (Domain::OutOfScope, 0.0);
    }

    let (domain, keywords): (Domain, &[&str]) = if FINANCIAL_KEYWORDS.iter().any(|k| lower.contains(k)) {
        (Domain::Financial, FINANCIAL_KEYWORDS)
    } else if ADMINISTRATIVE_KEYWORDS.iter().any(|k| lower.contains(k)) {
        (Domain::Administrative, ADMINISTRATIVE_KEYWORDS)
    } else if EDUCATIONAL_KEYWORDS.iter().any(|k| lower.contains(k)) {
        (Domain::Educational, EDUCATIONAL_KEYWORDS)
    } else {
        return (Domain::OutOfScope, 0.0);
    };

    let matched = keywords.iter().filter(|k| lower.contains(*k)).count();
    let confidence = (matched as f32 / word_count as f32).min(0.9);
    (domain, confidence)
}

/// A short, user-facing suggestion for an out-of-scope query.
#[must_use]
pub const fn suggestion_message() -> &'static str {
    "Esta consulta no corresponde a procedimientos administrativos, educativos o financieros de la entidad."
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_financial_queries() {
        assert_eq!(classify("cual es el monto maximo de viaticos").0, Domain::Financial);
    }

    #[test]
    fn classifies_administrative_queries() {
        assert_eq!(classify("que directiva regula el tramite de licencias").0, Domain::Administrative);
    }

    #[test]
    fn classifies_educational_queries() {
        assert_eq!(classify("calendario academico para docentes").0, Domain::Educational);
    }

    #[test]
    fn rejects_out_of_scope_queries() {
        assert_eq!(classify("cual es la capital de francia").0, Domain::OutOfScope);
    }

    #[test]
    fn rejects_explicit_out_of_scope_vocabulary_even_with_in_domain_overlap() {
        let (domain, confidence) = classify("cual es el monto para un partido de futbol");
        assert_eq!(domain, Domain::OutOfScope);
        assert_eq!(confidence, 0.0);
    }

    #[test]
    fn financial_keywords_take_priority_over_administrative() {
        assert_eq!(classify("procedimiento para el pago de viaticos").0, Domain::Financial);
    }

    #[test]
    fn confidence_reflects_keyword_overlap_capped_at_point_nine() {
        let (domain, confidence) = classify("viatico");
        assert_eq!(domain, Domain::Financial);
        assert!(confidence > 0.0 && confidence <= 0.9);
    }
}
