//! PII masking (8.c).
//!
//! Masks Peruvian national-id and tax-id numbers, phone numbers, emails,
//! and capitalized person-name sequences from text before it is returned
//! to a caller or written to the audit log.

use regex::Regex;
use std::sync::LazyLock;

#[allow(clippy::unwrap_used)]
static DNI: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{8}\b").unwrap());

#[allow(clippy::unwrap_used)]
static RUC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{11}\b").unwrap());

#[allow(clippy::unwrap_used)]
static PHONE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{9}\b").unwrap());

#[allow(clippy::unwrap_used)]
static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());

#[allow(clippy::unwrap_used)]
static PERSON_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][a-zá-ú]+(?:\s[A-Z][a-zá-ú]+){1,3}\b").unwrap());

#[allow(clippy::unwrap_used)]
static WINDOWS_PATH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Za-z]:\\[^\s]*").unwrap());

#[allow(clippy::unwrap_used)]
static POSIX_PATH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/[\w.\-]+(?:/[\w.\-]+)+").unwrap());

#[allow(clippy::unwrap_used)]
static TOKEN_LIKE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b[A-Za-z0-9]{32,}\b").unwrap());

/// The safe-field allowlist metadata is projected to on output (8.c).
pub const METADATA_ALLOWLIST: &[&str] = &["title", "date", "type", "category", "pages"];

/// Masks PII patterns in `text`.
///
/// Applied in a fixed order: RUC (11 digits) before DNI (8 digits) to avoid
/// a RUC's leading 8 digits being masked first, then phone, email, person
/// names, filesystem paths, and token-like strings.
#[must_use]
pub fn mask(text: &str) -> String {
    let masked = RUC.replace_all(text, "[RUC]");
    let masked = DNI.replace_all(&masked, "[DNI]");
    let masked = PHONE.replace_all(&masked, "[TELEFONO]");
    let masked = EMAIL.replace_all(&masked, "[EMAIL]");
    let masked = PERSON_NAME.replace_all(&masked, "[NOMBRE]");
    let masked = WINDOWS_PATH.replace_all(&masked, "[RUTA_REMOVIDA]");
    let masked = POSIX_PATH.replace_all(&masked, "[RUTA_REMOVIDA]");
    let masked = TOKEN_LIKE.replace_all(&masked, "[TOKEN_REMOVED]");
    masked.into_owned()
}

/// Projects a chunk's metadata map to the safe-field allowlist, masking
/// every retained value.
#[must_use]
pub fn project_metadata(metadata: &std::collections::BTreeMap<String, String>) -> std::collections::BTreeMap<String, String> {
    metadata
        .iter()
        .filter(|(k, _)| METADATA_ALLOWLIST.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), mask(v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("el dni 45678912 fue registrado", "45678912", "[DNI]"; "dni")]
    #[test_case("ruc 20123456789 de la entidad", "20123456789", "[RUC]"; "ruc")]
    #[test_case("llamar al 987654321 para consultas", "987654321", "[TELEFONO]"; "phone")]
    #[test_case("contactar a jperez@minedu.gob.pe", "jperez@minedu.gob.pe", "[EMAIL]"; "email")]
    fn mask_replaces_each_pii_pattern_with_its_marker(text: &str, pii: &str, marker: &str) {
        let result = mask(text);
        assert!(result.contains(marker));
        assert!(!result.contains(pii));
    }

    #[test]
    fn masks_dni() {
        let result = mask("el dni 45678912 fue registrado");
        assert!(result.contains("[DNI]"));
        assert!(!result.contains("45678912"));
    }

    #[test]
    fn masks_ruc_before_dni_collision() {
        let result = mask("ruc 20123456789 de la entidad");
        assert!(result.contains("[RUC]"));
        assert!(!result.contains("20123456789"));
    }

    #[test]
    fn masks_phone() {
        let result = mask("llamar al 987654321 para consultas");
        assert!(result.contains("[TELEFONO]"));
    }

    #[test]
    fn masks_email() {
        let result = mask("contactar a jperez@minedu.gob.pe");
        assert_eq!(result, "contactar a [EMAIL]");
    }

    #[test]
    fn masks_person_names() {
        let result = mask("firmado por Juan Perez Garcia el lunes");
        assert!(result.contains("[NOMBRE]"));
        assert!(!result.contains("Juan Perez Garcia"));
    }

    #[test]
    fn leaves_plain_administrative_text_untouched() {
        let text = "la escala de viaticos nacionales vigente";
        assert_eq!(mask(text), text);
    }

    #[test]
    fn masks_windows_and_posix_paths() {
        let result = mask(r"archivo en C:\Users\jperez\documento.pdf y /var/data/corpus/chunk.bin");
        assert!(!result.contains(r"C:\Users"));
        assert!(!result.contains("/var/data/corpus"));
        assert!(result.contains("[RUTA_REMOVIDA]"));
    }

    #[test]
    fn masks_token_like_strings() {
        let result = mask("token de sesion abcdefghijklmnopqrstuvwxyz012345 expirado");
        assert!(result.contains("[TOKEN_REMOVED]"));
        assert!(!result.contains("abcdefghijklmnopqrstuvwxyz012345"));
    }

    #[test]
    fn projects_metadata_to_allowlist_and_masks_values() {
        let mut metadata = std::collections::BTreeMap::new();
        metadata.insert("title".to_string(), "Directiva 001".to_string());
        metadata.insert("source_path".to_string(), "/srv/data/raw/file.pdf".to_string());
        metadata.insert("author_email".to_string(), "jperez@minedu.gob.pe".to_string());

        let projected = project_metadata(&metadata);
        assert!(projected.contains_key("title"));
        assert!(!projected.contains_key("source_path"));
        assert!(!projected.contains_key("author_email"));
    }
}
