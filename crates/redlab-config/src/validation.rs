//! Settings validation module.
//!
//! Provides validation for all settings values, failing fast on invalid
//! configuration rather than at the first cache call.

use crate::RedisSettings;
use std::fmt;

/// Settings validation error variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValidationError {
    /// A required value is empty.
    MissingValue { name: String },
    /// Port number is invalid (must be 1-65535).
    InvalidPort { value: u16 },
    /// TTL must be positive.
    NonPositiveTtl { name: String },
    /// Timeout value must be positive.
    NonPositiveTimeout { name: String },
    /// Pool size must be at least one.
    EmptyPool,
    /// Pool size exceeds maximum allowed.
    PoolSizeTooLarge { value: u32, maximum: u32 },
    /// Credential cannot be written into an ACL rule.
    InvalidCredential { name: String },
    /// Only one of the admin username/password pair is set.
    IncompleteAdminCredentials,
    /// Admin and application users must be distinct.
    DuplicateUser { username: String },
    /// Key namespace contains whitespace.
    InvalidKeyPrefix { value: String },
    /// Connection URL cannot be built.
    InvalidUrl { message: String },
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingValue { name } => write!(f, "Required setting '{}' is empty", name),
            Self::InvalidPort { value } => {
                write!(f, "Invalid port: {} (must be 1-65535)", value)
            }
            Self::NonPositiveTtl { name } => write!(f, "TTL '{}' must be positive", name),
            Self::NonPositiveTimeout { name } => {
                write!(f, "Timeout '{}' must be positive", name)
            }
            Self::EmptyPool => write!(f, "Pool size must be at least 1"),
            Self::PoolSizeTooLarge { value, maximum } => {
                write!(f, "Pool size {} exceeds maximum allowed ({})", value, maximum)
            }
            Self::InvalidCredential { name } => {
                write!(f, "Credential '{}' must not contain whitespace", name)
            }
            Self::IncompleteAdminCredentials => {
                write!(f, "admin_username and admin_password must be set together")
            }
            Self::DuplicateUser { username } => {
                write!(f, "User '{}' is used for more than one role", username)
            }
            Self::InvalidKeyPrefix { value } => {
                write!(f, "Key prefix '{}' must not contain whitespace", value)
            }
            Self::InvalidUrl { message } => write!(f, "Invalid Redis URL: {}", message),
        }
    }
}

impl std::error::Error for ConfigValidationError {}

/// Settings validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Maximum connection pool size.
    const MAX_POOL_SIZE: u32 = 1000;
    /// User name reserved by Redis for the disabled default role.
    const RESERVED_USER: &'static str = "default";

    /// Validates the settings.
    ///
    /// Returns Ok(()) if valid, or Err with all validation errors found.
    pub fn validate(settings: &RedisSettings) -> Result<(), Vec<ConfigValidationError>> {
        let mut errors = Vec::new();

        Self::validate_connection(settings, &mut errors);
        Self::validate_credentials(settings, &mut errors);
        Self::validate_caching(settings, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_connection(settings: &RedisSettings, errors: &mut Vec<ConfigValidationError>) {
        if settings.host.trim().is_empty() {
            errors.push(ConfigValidationError::MissingValue {
                name: "host".to_string(),
            });
        }

        if settings.internal_port == 0 {
            errors.push(ConfigValidationError::InvalidPort {
                value: settings.internal_port,
            });
        }

        if settings.pool_size == 0 {
            errors.push(ConfigValidationError::EmptyPool);
        } else if settings.pool_size > Self::MAX_POOL_SIZE {
            errors.push(ConfigValidationError::PoolSizeTooLarge {
                value: settings.pool_size,
                maximum: Self::MAX_POOL_SIZE,
            });
        }

        if settings.connect_timeout_secs == 0 {
            errors.push(ConfigValidationError::NonPositiveTimeout {
                name: "connect_timeout_secs".to_string(),
            });
        }

        // Only worth building once the parts are individually sane.
        if errors.is_empty() {
            if let Err(e) = settings.connection_url() {
                errors.push(ConfigValidationError::InvalidUrl {
                    message: e.to_string(),
                });
            }
        }
    }

    fn validate_credentials(settings: &RedisSettings, errors: &mut Vec<ConfigValidationError>) {
        Self::check_credential("username", &settings.username, errors);
        Self::check_credential("password", &settings.password, errors);

        match (&settings.admin_username, &settings.admin_password) {
            (Some(user), Some(password)) => {
                Self::check_credential("admin_username", user, errors);
                Self::check_credential("admin_password", password, errors);
                if user == &settings.username {
                    errors.push(ConfigValidationError::DuplicateUser {
                        username: user.clone(),
                    });
                }
                if user == Self::RESERVED_USER {
                    errors.push(ConfigValidationError::DuplicateUser {
                        username: user.clone(),
                    });
                }
            }
            (None, None) => {}
            _ => errors.push(ConfigValidationError::IncompleteAdminCredentials),
        }

        if settings.username == Self::RESERVED_USER {
            errors.push(ConfigValidationError::DuplicateUser {
                username: settings.username.clone(),
            });
        }
    }

    fn check_credential(name: &str, value: &str, errors: &mut Vec<ConfigValidationError>) {
        if value.is_empty() {
            errors.push(ConfigValidationError::MissingValue {
                name: name.to_string(),
            });
        } else if value.chars().any(char::is_whitespace) {
            errors.push(ConfigValidationError::InvalidCredential {
                name: name.to_string(),
            });
        }
    }

    fn validate_caching(settings: &RedisSettings, errors: &mut Vec<ConfigValidationError>) {
        if settings.ttl_fast == 0 {
            errors.push(ConfigValidationError::NonPositiveTtl {
                name: "ttl_fast".to_string(),
            });
        }
        if settings.ttl_slow == 0 {
            errors.push(ConfigValidationError::NonPositiveTtl {
                name: "ttl_slow".to_string(),
            });
        }

        if settings.key_prefix.is_empty() {
            errors.push(ConfigValidationError::MissingValue {
                name: "key_prefix".to_string(),
            });
        } else if settings.key_prefix.chars().any(char::is_whitespace) {
            errors.push(ConfigValidationError::InvalidKeyPrefix {
                value: settings.key_prefix.clone(),
            });
        }
    }
}

/// Formats validation errors for display.
pub fn format_validation_errors(errors: &[ConfigValidationError]) -> String {
    let mut output = String::from("Configuration validation failed:\n");
    for (i, error) in errors.iter().enumerate() {
        output.push_str(&format!("  {}. {}\n", i + 1, error));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_settings() -> RedisSettings {
        let mut settings = RedisSettings::new("app", "app-secret");
        settings.admin_username = Some("admin".to_string());
        settings.admin_password = Some("admin-secret".to_string());
        settings
    }

    fn errors_of(settings: &RedisSettings) -> Vec<ConfigValidationError> {
        ConfigValidator::validate(settings).unwrap_err()
    }

    #[test]
    fn test_valid_settings_pass() {
        assert!(ConfigValidator::validate(&valid_settings()).is_ok());
        assert!(ConfigValidator::validate(&RedisSettings::new("app", "secret")).is_ok());
    }

    #[test]
    fn test_empty_password() {
        let mut settings = valid_settings();
        settings.password = String::new();

        assert!(errors_of(&settings).iter().any(|e| matches!(
            e,
            ConfigValidationError::MissingValue { name } if name == "password"
        )));
    }

    #[test]
    fn test_invalid_port() {
        let mut settings = valid_settings();
        settings.internal_port = 0;

        assert!(errors_of(&settings)
            .contains(&ConfigValidationError::InvalidPort { value: 0 }));
    }

    #[test]
    fn test_zero_ttl() {
        let mut settings = valid_settings();
        settings.ttl_slow = 0;

        assert!(errors_of(&settings).iter().any(|e| matches!(
            e,
            ConfigValidationError::NonPositiveTtl { name } if name == "ttl_slow"
        )));
    }

    #[test]
    fn test_whitespace_in_password() {
        let mut settings = valid_settings();
        settings.password = "two words".to_string();

        assert!(errors_of(&settings).iter().any(|e| matches!(
            e,
            ConfigValidationError::InvalidCredential { name } if name == "password"
        )));
    }

    #[test]
    fn test_incomplete_admin_credentials() {
        let mut settings = valid_settings();
        settings.admin_password = None;

        assert!(errors_of(&settings).contains(&ConfigValidationError::IncompleteAdminCredentials));
    }

    #[test]
    fn test_duplicate_and_reserved_users() {
        let mut settings = valid_settings();
        settings.admin_username = Some("app".to_string());
        assert!(errors_of(&settings).iter().any(|e| matches!(
            e,
            ConfigValidationError::DuplicateUser { .. }
        )));

        let mut settings = valid_settings();
        settings.username = "default".to_string();
        assert!(errors_of(&settings).iter().any(|e| matches!(
            e,
            ConfigValidationError::DuplicateUser { username } if username == "default"
        )));
    }

    #[test]
    fn test_pool_size_bounds() {
        let mut settings = valid_settings();
        settings.pool_size = 0;
        assert!(errors_of(&settings).contains(&ConfigValidationError::EmptyPool));

        settings.pool_size = 5000;
        assert!(errors_of(&settings).iter().any(|e| matches!(
            e,
            ConfigValidationError::PoolSizeTooLarge { .. }
        )));
    }

    #[test]
    fn test_invalid_host() {
        let mut settings = valid_settings();
        settings.host = "bad host".to_string();

        assert!(errors_of(&settings).iter().any(|e| matches!(
            e,
            ConfigValidationError::InvalidUrl { .. }
        )));
    }

    #[test]
    fn test_multiple_errors() {
        let mut settings = valid_settings();
        settings.internal_port = 0;
        settings.ttl_fast = 0;
        settings.key_prefix = "has space".to_string();

        assert!(errors_of(&settings).len() >= 3);
    }

    #[test]
    fn test_format_validation_errors() {
        let errors = vec![
            ConfigValidationError::InvalidPort { value: 0 },
            ConfigValidationError::NonPositiveTtl {
                name: "ttl_fast".to_string(),
            },
        ];

        let output = format_validation_errors(&errors);
        assert!(output.contains("Invalid port"));
        assert!(output.contains("ttl_fast"));
    }
}
