//! Validation helpers for client payloads.

use validator::ValidationError;

/// Maximum accepted display-name length.
const MAX_NAME_LENGTH: usize = 32;

/// Validates that a room code is exactly 4 ASCII digits.
///
/// # Examples
///
/// ```ignore
/// validate_room_code("0421") // Ok
/// validate_room_code("421")  // Err - too short
/// validate_room_code("042a") // Err - not a digit
/// ```
pub fn validate_room_code(code: &str) -> Result<(), ValidationError> {
    if code.len() != 4 || !code.chars().all(|c| c.is_ascii_digit()) {
        let mut err = ValidationError::new("room_code_format");
        err.message = Some("Room code must be exactly 4 digits".into());
        return Err(err);
    }
    Ok(())
}

/// Validates that a display name is non-blank and reasonably short.
pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        let mut err = ValidationError::new("name_empty");
        err.message = Some("Display name must not be empty".into());
        return Err(err);
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        let mut err = ValidationError::new("name_too_long");
        err.message =
            Some(format!("Display name must be at most {MAX_NAME_LENGTH} characters").into());
        return Err(err);
    }
    Ok(())
}

/// Validates that an answer selects one of the four options.
pub fn validate_option_index(index: usize) -> Result<(), ValidationError> {
    if index > 3 {
        let mut err = ValidationError::new("option_out_of_range");
        err.message = Some("Answer must select one of the four options".into());
        return Err(err);
    }
    Ok(())
}
