use mongodb::bson::oid::ObjectId;
use regex::Regex;

use super::ApiError;

pub fn validate_username(username: &str) -> bool {
    Regex::new(r"^[A-Za-z0-9_.]{3,30}$")
        .map(|re| re.is_match(username))
        .unwrap_or(false)
}

/// Parses a hex id from a path or body, naming the entity in the error.
pub fn parse_object_id(raw: &str, what: &str) -> Result<ObjectId, ApiError> {
    ObjectId::parse_str(raw).map_err(|_| ApiError::bad_request(format!("Invalid {} ID", what)))
}

/// Documents to skip for a 1-based page; saturates instead of overflowing.
pub fn page_skip(page: i64, limit: i64) -> u64 {
    let skip = (page.max(1) - 1).saturating_mul(limit.max(0));
    u64::try_from(skip).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usernames() {
        assert!(validate_username("kofi_a"));
        assert!(validate_username("j.doe"));
        assert!(!validate_username("ab"));
        assert!(!validate_username("has space"));
        assert!(!validate_username(&"x".repeat(31)));
    }

    #[test]
    fn object_id_errors_name_the_entity() {
        let err = parse_object_id("zzz", "post").unwrap_err();
        assert_eq!(err.message, "Invalid post ID");
        assert!(parse_object_id(&ObjectId::new().to_hex(), "post").is_ok());
    }

    #[test]
    fn page_skip_saturates() {
        assert_eq!(page_skip(1, 20), 0);
        assert_eq!(page_skip(3, 20), 40);
        assert_eq!(page_skip(-5, 20), 0);
        assert_eq!(page_skip(i64::MAX, 100), i64::MAX as u64);
    }
}
