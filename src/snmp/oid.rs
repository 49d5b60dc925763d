use std::cmp::Ordering;

use snmp2::Oid;

use crate::error::SessionError;

/// Числовые компоненты OID; `None`, если строка не похожа на OID.
fn components(oid: &str) -> Option<Vec<u64>> {
    if !is_valid_oid(oid) {
        return None;
    }
    trim_oid(oid).split('.').map(|p| p.parse().ok()).collect()
}

/// Строит `snmp2::Oid` для запроса к агенту.
pub fn parse_oid(oid: &str) -> Result<Oid<'static>, SessionError> {
    components(oid)
        .and_then(|parts| Oid::from(&parts).ok())
        .ok_or_else(|| SessionError::InvalidOid(oid.to_string()))
}

/// Убирает ведущую точку: `.1.3.6` -> `1.3.6`.
pub fn trim_oid(oid: &str) -> &str {
    oid.trim_start_matches('.')
}

/// Форматирует список OID как `[a b c]` для сообщений об ошибках.
pub fn format_oids(oids: &[String]) -> String {
    format!("[{}]", oids.join(" "))
}

/// Лексикографическое сравнение OID по числовым компонентам.
pub fn compare_oids(a: &str, b: &str) -> Ordering {
    let left = trim_oid(a).split('.').map(|p| p.parse::<u64>().unwrap_or(0));
    let right = trim_oid(b).split('.').map(|p| p.parse::<u64>().unwrap_or(0));
    left.cmp(right)
}

/// Проверяет, что строка состоит только из числовых компонентов через точку.
pub fn is_valid_oid(oid: &str) -> bool {
    let oid = trim_oid(oid);
    !oid.is_empty() && oid.split('.').all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compares_numerically() {
        assert_eq!(compare_oids("1.3.6.1.10", "1.3.6.1.9"), Ordering::Greater);
        assert_eq!(compare_oids(".1.3.6", "1.3.6"), Ordering::Equal);
        assert_eq!(compare_oids("1.3.6", "1.3.6.1"), Ordering::Less);
    }

    #[test]
    fn formats_oid_list() {
        let oids = vec!["1.1".to_string(), "2.2".to_string()];
        assert_eq!(format_oids(&oids), "[1.1 2.2]");
    }

    #[test]
    fn validates_oids() {
        assert!(is_valid_oid("1.3.6.1.2.1.1.3.0"));
        assert!(is_valid_oid(".1.3.6"));
        assert!(!is_valid_oid("1.3..6"));
        assert!(!is_valid_oid("ifDescr"));
    }

    #[test]
    fn builds_request_oid() {
        assert!(parse_oid(".1.3.6.1.2.1.1.5.0").is_ok());
        assert_eq!(
            parse_oid("1.3.x").unwrap_err().to_string(),
            SessionError::InvalidOid("1.3.x".into()).to_string()
        );
        assert!(parse_oid("1.3.99999999999999999999").is_err());
    }
}
