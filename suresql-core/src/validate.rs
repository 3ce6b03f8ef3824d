//! Identifier and credential validation.

use crate::error::SureSqlError;

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// `1..=50` letters, digits, `_`, `.`, `-`.
pub fn validate_username(username: &str) -> Result<(), SureSqlError> {
    if username.is_empty() || username.chars().count() > 50 {
        return Err(SureSqlError::Validation(
            "username must be 1-50 characters".into(),
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
    {
        return Err(SureSqlError::Validation(
            "username contains invalid characters".into(),
        ));
    }
    Ok(())
}

/// `1..=100` of any character.
pub fn validate_password(password: &str) -> Result<(), SureSqlError> {
    if password.is_empty() || password.chars().count() > 100 {
        return Err(SureSqlError::Validation(
            "password must be 1-100 characters".into(),
        ));
    }
    Ok(())
}

/// `1..=50` letters, digits, spaces, `_`, `-`.
pub fn validate_role(role: &str) -> Result<(), SureSqlError> {
    if role.is_empty() || role.chars().count() > 50 {
        return Err(SureSqlError::Validation(
            "role must be 1-50 characters".into(),
        ));
    }
    if !role
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == ' ' || c == '_' || c == '-')
    {
        return Err(SureSqlError::Validation(
            "role contains invalid characters".into(),
        ));
    }
    Ok(())
}

/// `1..=64`, must start with a letter or `_`, continue with letters/digits/`_`.
/// Tables starting with `_` are rejected unless `internal_access` is
/// asserted by the caller.
pub fn validate_table_name(table: &str, internal_access: bool) -> Result<(), SureSqlError> {
    if table.is_empty() || table.chars().count() > 64 {
        return Err(SureSqlError::Validation(
            "table name must be 1-64 characters".into(),
        ));
    }
    let mut chars = table.chars();
    let first = chars.next().expect("non-empty checked above");
    if !is_ident_start(first) {
        return Err(SureSqlError::Validation(
            "table name must start with a letter or underscore".into(),
        ));
    }
    if !chars.all(is_ident_continue) {
        return Err(SureSqlError::Validation(
            "table name contains invalid characters".into(),
        ));
    }
    if first == '_' && !internal_access {
        return Err(SureSqlError::Authorisation(table.to_string()));
    }
    Ok(())
}

/// Validates each non-empty argument and composes all resulting errors into
/// one message.
pub fn validate_user_fields(
    username: &str,
    password: &str,
    role: &str,
) -> Result<(), SureSqlError> {
    let mut problems = Vec::new();

    if !username.is_empty() {
        if let Err(err) = validate_username(username) {
            problems.push(err.to_string());
        }
    }
    if !password.is_empty() {
        if let Err(err) = validate_password(password) {
            problems.push(err.to_string());
        }
    }
    if !role.is_empty() {
        if let Err(err) = validate_role(role) {
            problems.push(err.to_string());
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(SureSqlError::Validation(problems.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_boundary_50_is_ok_51_fails() {
        let ok = "a".repeat(50);
        let bad = "a".repeat(51);
        assert!(validate_username(&ok).is_ok());
        assert!(validate_username(&bad).is_err());
    }

    #[test]
    fn empty_inputs_fail_every_case() {
        assert!(validate_username("").is_err());
        assert!(validate_password("").is_err());
        assert!(validate_role("").is_err());
        assert!(validate_table_name("", true).is_err());
    }

    #[test]
    fn underscore_table_requires_internal_access() {
        assert!(validate_table_name("_users", false).is_err());
        assert!(validate_table_name("_users", true).is_ok());
        match validate_table_name("_users", false) {
            Err(SureSqlError::Authorisation(_)) => {}
            other => panic!("expected Authorisation error, got {other:?}"),
        }
    }

    #[test]
    fn table_name_must_start_with_letter_or_underscore() {
        assert!(validate_table_name("1abc", true).is_err());
        assert!(validate_table_name("orders", true).is_ok());
    }
}
