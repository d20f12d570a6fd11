//! Validation helpers for DTOs.

use validator::ValidationError;

const MAX_ID_LEN: usize = 128;

/// Validates a store-assigned session id: 1 to 128 characters, ASCII
/// alphanumerics, `-` or `_` only.
///
/// # Examples
///
/// ```ignore
/// validate_session_id("3f2a9c1e0b7d4e55") // Ok
/// validate_session_id("")                 // Err - empty
/// validate_session_id("../etc")           // Err - forbidden characters
/// ```
pub fn validate_session_id(id: &str) -> Result<(), ValidationError> {
    validate_identifier(id, "session_id", "Session ID")
}

/// Validates a question set selector with the same rules as session ids.
pub fn validate_question_set_id(id: &str) -> Result<(), ValidationError> {
    validate_identifier(id, "question_set_id", "Question set ID")
}

fn validate_identifier(id: &str, code: &'static str, label: &str) -> Result<(), ValidationError> {
    if id.is_empty() || id.len() > MAX_ID_LEN {
        let mut err = ValidationError::new(code);
        err.message = Some(
            format!(
                "{label} must be between 1 and {MAX_ID_LEN} characters (got {})",
                id.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        let mut err = ValidationError::new(code);
        err.message = Some(format!("{label} may only contain letters, digits, '-' and '_'").into());
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_session_id_valid() {
        assert!(validate_session_id("3f2a9c1e0b7d4e55a1b2c3d4e5f60718").is_ok());
        assert!(validate_session_id("room_1-a").is_ok());
    }

    #[test]
    fn test_validate_session_id_invalid_length() {
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id(&"a".repeat(129)).is_err());
    }

    #[test]
    fn test_validate_session_id_invalid_format() {
        assert!(validate_session_id("../etc").is_err());
        assert!(validate_session_id("room 1").is_err());
        assert!(validate_session_id("rooms::abc").is_err());
    }

    #[test]
    fn test_validate_question_set_id() {
        assert!(validate_question_set_id("javascript-basics").is_ok());
        assert!(validate_question_set_id("").is_err());
    }
}
