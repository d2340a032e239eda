//! Validation helpers for DTOs.

use validator::ValidationError;

use crate::config::is_hex_color;

/// Upper bound enforced at the wire level; the configured limit is checked by the service.
pub const NAME_HARD_LIMIT: usize = 64;

/// Validates that a display name has visible characters and stays under the hard limit.
///
/// # Examples
///
/// ```ignore
/// validate_display_name("Alex")   // Ok
/// validate_display_name("   ")    // Err - blank
/// ```
pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        let mut err = ValidationError::new("name_blank");
        err.message = Some("Display name must not be blank".into());
        return Err(err);
    }

    let length = trimmed.chars().count();
    if length > NAME_HARD_LIMIT {
        let mut err = ValidationError::new("name_length");
        err.message = Some(
            format!("Display name must be at most {NAME_HARD_LIMIT} characters (got {length})")
                .into(),
        );
        return Err(err);
    }

    if trimmed.chars().any(char::is_control) {
        let mut err = ValidationError::new("name_format");
        err.message = Some("Display name must not contain control characters".into());
        return Err(err);
    }

    Ok(())
}

/// Validates that an avatar color is `#RRGGBB`.
pub fn validate_avatar_color(color: &str) -> Result<(), ValidationError> {
    if is_hex_color(color) {
        return Ok(());
    }
    let mut err = ValidationError::new("color_format");
    err.message = Some("Avatar color must be formatted as #RRGGBB".into());
    Err(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_display_name_valid() {
        assert!(validate_display_name("Alex").is_ok());
        assert!(validate_display_name("  Zoé ").is_ok());
        assert!(validate_display_name(&"x".repeat(NAME_HARD_LIMIT)).is_ok());
    }

    #[test]
    fn test_validate_display_name_invalid() {
        assert!(validate_display_name("").is_err());
        assert!(validate_display_name(" \t ").is_err());
        assert!(validate_display_name(&"x".repeat(NAME_HARD_LIMIT + 1)).is_err());
        assert!(validate_display_name("Al\u{7}ex").is_err());
    }

    #[test]
    fn test_validate_avatar_color() {
        assert!(validate_avatar_color("#a1B2c3").is_ok());
        assert!(validate_avatar_color("a1b2c3").is_err()); // missing hash
        assert!(validate_avatar_color("#a1b2c").is_err()); // too short
        assert!(validate_avatar_color("#a1b2cg").is_err()); // not hex
    }
}
