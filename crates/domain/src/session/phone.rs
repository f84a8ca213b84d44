//! Phone number normalization for OTP login.

use crate::error::{DomainError, DomainResult};

/// Normalizes a phone number to `+<country><subscriber>` form.
///
/// Separators (spaces, dashes, dots, parentheses) are ignored. A number that
/// already starts with `+` or `00` keeps its country code; a bare local
/// number gets `default_country_code`, dropping a single trunk `0` prefix.
///
/// # Errors
///
/// Returns `DomainError::InvalidPhone` if the result is not 8 to 15 digits.
pub fn normalize_phone(raw: &str, default_country_code: &str) -> DomainResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DomainError::InvalidPhone("phone number is required".to_string()));
    }

    let has_plus = trimmed.starts_with('+');
    let mut digits = String::with_capacity(trimmed.len());
    for c in trimmed.chars() {
        match c {
            '0'..='9' => digits.push(c),
            '+' | ' ' | '-' | '.' | '(' | ')' => {}
            other => {
                return Err(DomainError::InvalidPhone(format!(
                    "unexpected character '{other}' in {trimmed}"
                )));
            }
        }
    }

    let international = if has_plus {
        digits
    } else if let Some(rest) = digits.strip_prefix("00") {
        rest.to_string()
    } else {
        let country = default_country_code.trim_start_matches('+');
        let local = digits.strip_prefix('0').unwrap_or(&digits);
        if local.starts_with(country) && local.len() > 10 {
            local.to_string()
        } else {
            format!("{country}{local}")
        }
    };

    if !(8..=15).contains(&international.len()) {
        return Err(DomainError::InvalidPhone(format!(
            "{trimmed} does not look like a phone number"
        )));
    }

    Ok(format!("+{international}"))
}

/// Checks that a one-time code is 4 to 8 digits.
///
/// # Errors
///
/// Returns `DomainError::InvalidOtp` for anything else.
pub fn validate_otp(code: &str) -> DomainResult<&str> {
    let code = code.trim();
    if (4..=8).contains(&code.len()) && code.chars().all(|c| c.is_ascii_digit()) {
        Ok(code)
    } else {
        Err(DomainError::InvalidOtp(
            "the code must be 4 to 8 digits".to_string(),
        ))
    }
}
