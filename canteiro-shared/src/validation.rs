//! Brazilian document and regulation code checks
//!
//! - CPF (individual taxpayer number) with check digits
//! - CNPJ (company taxpayer number) with check digits
//! - NR codes (`NR-6`, `NR-35`, ...) for trainings
//! - CA numbers (PPE approval certificates)
//!
//! The `validate_*` functions plug into `#[validate(custom(function = ...))]` on input
//! structs so failures surface as field-level validation errors.

use std::borrow::Cow;
use validator::ValidationError;

/// Strips formatting characters and returns the digits of a document number
pub fn digits_only(input: &str) -> String {
    input.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn check_digit(digits: &[u32], weights: impl Iterator<Item = u32>) -> u32 {
    let sum: u32 = digits.iter().zip(weights).map(|(d, w)| d * w).sum();
    match sum % 11 {
        0 | 1 => 0,
        rest => 11 - rest,
    }
}

/// Normalizes a CPF to its 11 digits, validating the check digits
///
/// Accepts formatted (`529.982.247-25`) or bare input. Sequences of a single
/// repeated digit pass the arithmetic but are not issued, so they are rejected.
pub fn normalize_cpf(input: &str) -> Option<String> {
    let cpf = digits_only(input);
    if cpf.len() != 11 {
        return None;
    }

    let digits: Vec<u32> = cpf.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.iter().all(|d| *d == digits[0]) {
        return None;
    }

    let first = check_digit(&digits[..9], (2..=10).rev());
    let second = check_digit(&digits[..10], (2..=11).rev());

    if digits[9] == first && digits[10] == second {
        Some(cpf)
    } else {
        None
    }
}

/// Returns true if the input is a valid CPF
pub fn is_valid_cpf(input: &str) -> bool {
    normalize_cpf(input).is_some()
}

/// Normalizes a CNPJ to its 14 digits, validating the check digits
pub fn normalize_cnpj(input: &str) -> Option<String> {
    const FIRST_WEIGHTS: [u32; 12] = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
    const SECOND_WEIGHTS: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];

    let cnpj = digits_only(input);
    if cnpj.len() != 14 {
        return None;
    }

    let digits: Vec<u32> = cnpj.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.iter().all(|d| *d == digits[0]) {
        return None;
    }

    let first = check_digit(&digits[..12], FIRST_WEIGHTS.into_iter());
    let second = check_digit(&digits[..13], SECOND_WEIGHTS.into_iter());

    if digits[12] == first && digits[13] == second {
        Some(cnpj)
    } else {
        None
    }
}

/// Normalizes an NR code (`nr35`, `NR 35`, `NR-35`) to the `NR-35` form
///
/// The regulations are numbered 1 through 38.
pub fn normalize_nr_code(input: &str) -> Option<String> {
    let trimmed = input.trim().to_ascii_uppercase();
    let rest = trimmed.strip_prefix("NR")?;
    let number = rest.trim_start_matches(['-', ' ']);

    if number.is_empty() || number.len() > 2 || !number.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let value: u8 = number.parse().ok()?;
    if (1..=38).contains(&value) {
        Some(format!("NR-{}", value))
    } else {
        None
    }
}

/// Returns true if the CA number has the issued shape (1 to 6 digits)
pub fn is_valid_ca_number(input: &str) -> bool {
    let ca = input.trim();
    !ca.is_empty() && ca.len() <= 6 && ca.chars().all(|c| c.is_ascii_digit())
}

fn field_error(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(Cow::Borrowed(message));
    err
}

pub fn validate_cpf(value: &str) -> Result<(), ValidationError> {
    if is_valid_cpf(value) {
        Ok(())
    } else {
        Err(field_error("cpf", "Invalid CPF"))
    }
}

pub fn validate_cnpj(value: &str) -> Result<(), ValidationError> {
    normalize_cnpj(value)
        .map(|_| ())
        .ok_or_else(|| field_error("cnpj", "Invalid CNPJ"))
}

pub fn validate_nr_code(value: &str) -> Result<(), ValidationError> {
    normalize_nr_code(value)
        .map(|_| ())
        .ok_or_else(|| field_error("nr_code", "NR code must be between NR-1 and NR-38"))
}

pub fn validate_ca_number(value: &str) -> Result<(), ValidationError> {
    if is_valid_ca_number(value) {
        Ok(())
    } else {
        Err(field_error("ca_number", "CA number must have 1 to 6 digits"))
    }
}

/// Rejects strings that are empty after trimming
pub fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(field_error("blank", "Must not be blank"))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_cpf_formatted_and_bare() {
        assert_eq!(normalize_cpf("529.982.247-25"), Some("52998224725".to_string()));
        assert!(is_valid_cpf("52998224725"));
    }

    #[test]
    fn test_invalid_cpf() {
        assert!(!is_valid_cpf("529.982.247-26"));
        assert!(!is_valid_cpf("111.111.111-11"));
        assert!(!is_valid_cpf("1234"));
        assert!(!is_valid_cpf(""));
    }

    #[test]
    fn test_cnpj() {
        assert_eq!(
            normalize_cnpj("11.222.333/0001-81"),
            Some("11222333000181".to_string())
        );
        assert!(normalize_cnpj("11.222.333/0001-82").is_none());
        assert!(normalize_cnpj("00.000.000/0000-00").is_none());
    }

    #[test]
    fn test_nr_code() {
        assert_eq!(normalize_nr_code("nr35"), Some("NR-35".to_string()));
        assert_eq!(normalize_nr_code("NR 10"), Some("NR-10".to_string()));
        assert_eq!(normalize_nr_code("NR-06"), Some("NR-6".to_string()));
        assert!(normalize_nr_code("NR-39").is_none());
        assert!(normalize_nr_code("NR-").is_none());
        assert!(normalize_nr_code("35").is_none());
    }

    #[test]
    fn test_ca_number() {
        assert!(is_valid_ca_number("12345"));
        assert!(!is_valid_ca_number("1234567"));
        assert!(!is_valid_ca_number("12a45"));
        assert!(!is_valid_ca_number(""));
    }

    #[test]
    fn test_field_validators_carry_messages() {
        assert!(validate_cpf("529.982.247-25").is_ok());
        let err = validate_cpf("000.000.000-00").unwrap_err();
        assert_eq!(err.code, "cpf");
        assert_eq!(err.message.as_deref(), Some("Invalid CPF"));

        assert!(validate_nr_code("NR-35").is_ok());
        assert!(validate_ca_number("9999999").is_err());
        assert!(validate_not_blank("  ").is_err());
        assert!(validate_cnpj("11.222.333/0001-81").is_ok());
    }
}
