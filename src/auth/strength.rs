//! 密码强度规则
//!
//! 注册 / 创建账户时使用，不参与登录。检查严格按固定顺序执行，
//! 遇到第一条不满足的规则即返回，前端文案依赖这个顺序。

use crate::error::FieldError;
use once_cell::sync::Lazy;
use std::collections::HashSet;

pub const MIN_LENGTH: usize = 8;
pub const MAX_REPEAT: usize = 4;

static COMMON_PASSWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "password",
        "password1",
        "password123",
        "p@ssw0rd",
        "p@ssword1",
        "passw0rd",
        "123456",
        "12345678",
        "123456789",
        "1234567890",
        "qwerty",
        "qwerty123",
        "qwerty123!",
        "abc123",
        "111111",
        "123123",
        "admin",
        "admin123",
        "admin@123",
        "letmein",
        "letmein1!",
        "welcome",
        "welcome1",
        "welcome1!",
        "welcome@123",
        "monkey",
        "dragon",
        "master",
        "iloveyou",
        "sunshine",
        "princess",
        "football",
        "baseball",
        "trustno1",
        "changeme",
        "changeme1!",
    ]
    .into_iter()
    .collect()
});

/// 密码强度失败原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordStrengthError {
    TooShort,
    MissingUppercase,
    MissingLowercase,
    MissingDigit,
    MissingSpecialChar,
    TooCommon,
    RepeatedChars,
}

impl PasswordStrengthError {
    pub fn rule(&self) -> &'static str {
        match self {
            PasswordStrengthError::TooShort => "too_short",
            PasswordStrengthError::MissingUppercase => "missing_uppercase",
            PasswordStrengthError::MissingLowercase => "missing_lowercase",
            PasswordStrengthError::MissingDigit => "missing_digit",
            PasswordStrengthError::MissingSpecialChar => "missing_special_char",
            PasswordStrengthError::TooCommon => "too_common",
            PasswordStrengthError::RepeatedChars => "repeated_chars",
        }
    }

    pub fn message(&self) -> String {
        match self {
            PasswordStrengthError::TooShort => {
                format!("The password must be at least {} characters.", MIN_LENGTH)
            }
            PasswordStrengthError::MissingUppercase => {
                "The password must contain at least one uppercase letter.".to_string()
            }
            PasswordStrengthError::MissingLowercase => {
                "The password must contain at least one lowercase letter.".to_string()
            }
            PasswordStrengthError::MissingDigit => {
                "The password must contain at least one number.".to_string()
            }
            PasswordStrengthError::MissingSpecialChar => {
                "The password must contain at least one special character.".to_string()
            }
            PasswordStrengthError::TooCommon => {
                "This password is too common. Please choose a more secure password.".to_string()
            }
            PasswordStrengthError::RepeatedChars => format!(
                "The password must not contain {} or more repeated characters in a row.",
                MAX_REPEAT
            ),
        }
    }

    pub fn into_field_error(self, field: &str) -> FieldError {
        FieldError::new(field, self.message())
    }
}

impl std::fmt::Display for PasswordStrengthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.rule())
    }
}

impl std::error::Error for PasswordStrengthError {}

/// 按顺序检查密码强度
pub fn check_password_strength(password: &str) -> Result<(), PasswordStrengthError> {
    if password.chars().count() < MIN_LENGTH {
        return Err(PasswordStrengthError::TooShort);
    }

    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(PasswordStrengthError::MissingUppercase);
    }

    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return Err(PasswordStrengthError::MissingLowercase);
    }

    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(PasswordStrengthError::MissingDigit);
    }

    if password.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(PasswordStrengthError::MissingSpecialChar);
    }

    if COMMON_PASSWORDS.contains(password.to_lowercase().as_str()) {
        return Err(PasswordStrengthError::TooCommon);
    }

    if has_repeated_run(password, MAX_REPEAT) {
        return Err(PasswordStrengthError::RepeatedChars);
    }

    Ok(())
}

/// 是否存在同一字符连续出现 `run` 次及以上
fn has_repeated_run(password: &str, run: usize) -> bool {
    let mut prev = None;
    let mut count = 0;

    for c in password.chars() {
        if Some(c) == prev {
            count += 1;
        } else {
            prev = Some(c);
            count = 1;
        }
        if count >= run {
            return true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strong_password_passes() {
        assert_eq!(check_password_strength("Password1!"), Ok(()));
        assert_eq!(check_password_strength("V1deo-Templates"), Ok(()));
    }

    #[test]
    fn test_each_rule_in_order() {
        assert_eq!(check_password_strength("short1!"), Err(PasswordStrengthError::TooShort));
        assert_eq!(
            check_password_strength("password"),
            Err(PasswordStrengthError::MissingUppercase)
        );
        assert_eq!(
            check_password_strength("PASSWORD1!"),
            Err(PasswordStrengthError::MissingLowercase)
        );
        assert_eq!(
            check_password_strength("Password!!"),
            Err(PasswordStrengthError::MissingDigit)
        );
        assert_eq!(
            check_password_strength("Password12"),
            Err(PasswordStrengthError::MissingSpecialChar)
        );
        assert_eq!(check_password_strength("P@ssw0rd"), Err(PasswordStrengthError::TooCommon));
        assert_eq!(
            check_password_strength("Paaaa111!"),
            Err(PasswordStrengthError::RepeatedChars)
        );
    }

    #[test]
    fn test_first_failure_wins() {
        // 同时违反长度和大写，只报长度
        assert_eq!(check_password_strength("abc"), Err(PasswordStrengthError::TooShort));
        // 常用密码表按小写匹配
        assert_eq!(
            check_password_strength("Qwerty123!"),
            Err(PasswordStrengthError::TooCommon)
        );
    }

    #[test]
    fn test_three_repeats_allowed() {
        assert_eq!(check_password_strength("Paaa111x!b"), Ok(()));
    }

    #[test]
    fn test_four_repeats_rejected() {
        assert_eq!(check_password_strength("Paaa1111x!"), Err(PasswordStrengthError::RepeatedChars));
    }

    #[test]
    fn test_non_ascii_counts_as_special() {
        // 与大小写、数字规则一致，只有 ASCII 字母数字不算特殊字符
        assert_eq!(check_password_strength("Passwörd1"), Ok(()));
        assert_eq!(
            check_password_strength("Password1"),
            Err(PasswordStrengthError::MissingSpecialChar)
        );
    }

    #[test]
    fn test_length_counts_characters_not_bytes() {
        // 7 个字符但字节数超过 8
        assert_eq!(check_password_strength("Pä1!ééé"), Err(PasswordStrengthError::TooShort));
    }

    #[test]
    fn test_field_error_carries_message() {
        let err = PasswordStrengthError::TooShort.into_field_error("password");
        assert_eq!(err.field, "password");
        assert_eq!(err.message, "The password must be at least 8 characters.");
    }
}
