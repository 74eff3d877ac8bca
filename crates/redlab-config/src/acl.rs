//! Access-control file generation.
//!
//! Renders the `users.acl` file the Redis server reads at startup: one
//! line per role, credentials substituted from [`RedisSettings`].

use crate::RedisSettings;
use redlab_core::{CacheError, CacheResult};
use std::fmt;
use std::path::Path;
use tracing::info;

/// Commands the application role may run: connection handshake plus the
/// commands the cache layer issues.
pub const APP_COMMAND_RULES: &str =
    "-@all +@connection +get +mget +set +setex +mset +del +unlink +exists +expire +ttl +scan";

/// Commands the admin role may run.
pub const ADMIN_COMMAND_RULES: &str = "+@all";

/// Key pattern granted to enabled roles.
const ALL_KEYS: &str = "~*";

/// Pub/sub channel pattern granted to enabled roles.
const ALL_CHANNELS: &str = "&*";

/// A single `user` line of the ACL file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AclUser {
    /// `user <name> on ><password> ~* &* <rules>`
    Enabled {
        name: String,
        password: String,
        rules: &'static str,
    },
    /// `user <name> off`
    Disabled { name: String },
}

impl fmt::Display for AclUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enabled {
                name,
                password,
                rules,
            } => write!(
                f,
                "user {} on >{} {} {} {}",
                name, password, ALL_KEYS, ALL_CHANNELS, rules
            ),
            Self::Disabled { name } => write!(f, "user {} off", name),
        }
    }
}

/// The three roles of the ACL file: admin, application, disabled default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclFile {
    users: Vec<AclUser>,
}

impl AclFile {
    /// Builds the ACL roles from the settings.
    ///
    /// Fails when the admin credentials are absent, since the server would
    /// otherwise be left without a user able to manage it.
    pub fn from_settings(settings: &RedisSettings) -> CacheResult<Self> {
        let (admin_user, admin_password) = settings
            .admin_username
            .as_ref()
            .zip(settings.admin_password.as_ref())
            .ok_or_else(|| {
                CacheError::configuration(
                    "admin_username and admin_password are required to render the ACL file",
                )
            })?;

        for (name, value) in [
            ("admin_username", admin_user.as_str()),
            ("admin_password", admin_password.as_str()),
            ("username", settings.username.as_str()),
            ("password", settings.password.as_str()),
        ] {
            if value.is_empty() || value.chars().any(char::is_whitespace) {
                return Err(CacheError::configuration(format!(
                    "'{}' cannot be written into an ACL rule",
                    name
                )));
            }
        }

        Ok(Self {
            users: vec![
                AclUser::Enabled {
                    name: admin_user.clone(),
                    password: admin_password.clone(),
                    rules: ADMIN_COMMAND_RULES,
                },
                AclUser::Enabled {
                    name: settings.username.clone(),
                    password: settings.password.clone(),
                    rules: APP_COMMAND_RULES,
                },
                AclUser::Disabled {
                    name: "default".to_string(),
                },
            ],
        })
    }

    /// Returns the user lines.
    #[must_use]
    pub fn users(&self) -> &[AclUser] {
        &self.users
    }

    /// Renders the file content, newline terminated.
    #[must_use]
    pub fn render(&self) -> String {
        self.users.iter().map(|user| format!("{}\n", user)).collect()
    }

    /// Writes the file to `path`, replacing any previous content.
    pub fn write_to(&self, path: impl AsRef<Path>) -> CacheResult<()> {
        let path = path.as_ref();
        std::fs::write(path, self.render())?;
        info!("ACL file written to {}", path.display());
        Ok(())
    }
}
