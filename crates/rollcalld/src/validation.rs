//! Form field normalisation.

pub const MAT_NUMBER_MAX_LEN: usize = 64;
pub const NAME_MAX_LEN: usize = 255;
pub const COURSE_CODE_MAX_LEN: usize = 64;

/// Trimmed matriculation number. It doubles as the reference image file
/// stem, so only `[A-Za-z0-9_-]` is allowed.
pub fn mat_number(raw: &str) -> Result<String, &'static str> {
    let value = raw.trim();
    if value.is_empty() {
        return Err("Matriculation number is required.");
    }
    if value.len() > MAT_NUMBER_MAX_LEN {
        return Err("Matriculation number is too long.");
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err("Matriculation number may only contain letters, digits, '-' and '_'.");
    }
    Ok(value.to_string())
}

/// Trimmed, non-empty display name.
pub fn display_name(raw: &str) -> Result<String, &'static str> {
    let value = raw.trim();
    if value.is_empty() {
        return Err("Name is required.");
    }
    if value.chars().count() > NAME_MAX_LEN {
        return Err("Name is too long.");
    }
    Ok(value.to_string())
}

/// Trimmed, non-empty course code.
pub fn course_code(raw: &str) -> Result<String, &'static str> {
    let value = raw.trim();
    if value.is_empty() {
        return Err("Course code is required.");
    }
    if value.chars().count() > COURSE_CODE_MAX_LEN {
        return Err("Course code is too long.");
    }
    Ok(value.to_string())
}
