//! Form input validation

/// Require that every listed `(name, value)` field is non-empty after
/// trimming whitespace.
pub fn validate_required(fields: &[(&str, &str)]) -> Result<(), String> {
    for (name, value) in fields {
        if value.trim().is_empty() {
            return Err(format!("{} is required", name));
        }
    }

    Ok(())
}
