//! Sign-up form checks

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};

static EMAIL: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").ok());
static FULL_NAME: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^[a-zA-Z\s]{2,}$").ok());

const SPECIAL: &str = "!@#$%^&*()_+-=[]{};':\"\\|,.<>/?";

pub fn is_valid_email(email: &str) -> bool {
    EMAIL.as_ref().is_some_and(|re| re.is_match(email))
}

/// Letters and spaces, at least two characters after trimming
pub fn is_valid_full_name(name: &str) -> bool {
    FULL_NAME.as_ref().is_some_and(|re| re.is_match(name.trim()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PasswordStrength {
    Weak,
    Medium,
    Strong,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordCheck {
    pub strength: PasswordStrength,
    /// 0 to 100
    pub score: u8,
    pub issues: Vec<&'static str>,
}

impl PasswordCheck {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

pub fn check_password(password: &str) -> PasswordCheck {
    let mut issues = Vec::new();
    let mut score: u32 = 0;
    let length = password.chars().count();

    if length < 8 {
        issues.push("At least 8 characters required");
    } else {
        score += 20;
        if length >= 12 {
            score += 10;
        }
    }

    let rules: [(fn(char) -> bool, &'static str); 4] = [
        (|c| c.is_ascii_lowercase(), "Include lowercase letters"),
        (|c| c.is_ascii_uppercase(), "Include uppercase letters"),
        (|c| c.is_ascii_digit(), "Include numbers"),
        (|c| SPECIAL.contains(c), "Include special characters"),
    ];
    for (rule, issue) in rules {
        if password.chars().any(rule) {
            score += 20;
        } else {
            issues.push(issue);
        }
    }

    let strength = match score {
        s if s < 40 => PasswordStrength::Weak,
        s if s < 70 => PasswordStrength::Medium,
        _ => PasswordStrength::Strong,
    };

    PasswordCheck {
        strength,
        score: score.min(100) as u8,
        issues,
    }
}

/// Everything the sign-up form checks before calling the auth service
pub fn validate_sign_up(email: &str, password: &str, full_name: &str) -> Result<()> {
    if !is_valid_email(email) {
        return Err(Error::validation("Please enter a valid email address"));
    }
    if !is_valid_full_name(full_name) {
        return Err(Error::validation(
            "Name must be at least 2 characters and contain only letters",
        ));
    }
    let check = check_password(password);
    if !check.is_valid() {
        return Err(Error::validation(check.issues.join(", ")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_shape() {
        assert!(is_valid_email("ada@example.com"));
        assert!(!is_valid_email("ada@example"));
        assert!(!is_valid_email("ada example@x.com"));
        assert!(!is_valid_email(""));
    }

    #[test]
    fn test_full_name() {
        assert!(is_valid_full_name("  Ada Obi "));
        assert!(!is_valid_full_name("A"));
        assert!(!is_valid_full_name("Ada 2"));
    }

    #[test]
    fn test_password_strength_bands() {
        let weak = check_password("abc");
        assert_eq!(weak.strength, PasswordStrength::Weak);
        assert_eq!(weak.score, 20);
        assert_eq!(weak.issues.len(), 4);

        let medium = check_password("abcdefgh");
        assert_eq!(medium.score, 40);
        assert_eq!(medium.strength, PasswordStrength::Medium);

        let strong = check_password("Abcdefgh1!xyz");
        assert_eq!(strong.score, 100);
        assert_eq!(strong.strength, PasswordStrength::Strong);
        assert!(strong.is_valid());
    }

    #[test]
    fn test_validate_sign_up_reports_first_problem() {
        assert!(validate_sign_up("ada@example.com", "Abcdefg1!", "Ada Obi").is_ok());
        let err = validate_sign_up("nope", "Abcdefg1!", "Ada Obi").unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m.contains("email")));
        let err = validate_sign_up("ada@example.com", "short", "Ada Obi").unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m.contains("8 characters")));
    }
}
