//! Cache key derivation.
//!
//! A key is `{namespace}:{function}:{arguments}` where `function` is the
//! module-qualified name of the cached function and `arguments` is the
//! canonical JSON form of the bound call arguments. Canonical means object
//! keys are sorted, so two structs or maps holding the same named values
//! always produce the same key, while tuples and sequences keep their order.

use crate::finite::ensure_finite;
use redlab_core::{CacheError, CacheResult};
use serde::Serialize;
use std::fmt;

/// Default namespace for all cache keys.
pub const DEFAULT_NAMESPACE: &str = "redlab:cache";

/// Module-qualified identity of a cached function.
///
/// Usually built with [`function_id!`](crate::function_id), which prefixes
/// the caller's `module_path!()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(&'static str);

impl FunctionId {
    #[must_use]
    pub const fn new(path: &'static str) -> Self {
        Self(path)
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Builds a [`FunctionId`] from a path relative to the current module.
///
/// ```
/// use redlab_cache::function_id;
///
/// let id = function_id!(UserService::get_user);
/// assert!(id.as_str().ends_with("::UserService::get_user"));
/// ```
#[macro_export]
macro_rules! function_id {
    ($($segment:ident)::+) => {
        $crate::FunctionId::new(concat!(module_path!() $(, "::", stringify!($segment))+))
    };
}

/// A derived cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wraps an explicit key, bypassing derivation.
    #[must_use]
    pub fn raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}

/// Derives keys inside one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBuilder {
    namespace: String,
}

impl Default for KeyBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl KeyBuilder {
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Derives the key for calling `function` with `args`.
    ///
    /// Pass the arguments as a tuple for positional calls or as a struct
    /// for named ones. Receivers (`self`) are never part of `args`.
    pub fn derive<A: Serialize + ?Sized>(&self, function: FunctionId, args: &A) -> CacheResult<CacheKey> {
        let canonical = canonical_args(args)?;
        Ok(CacheKey(format!(
            "{}:{}:{}",
            self.namespace, function, canonical
        )))
    }

    /// Glob pattern matching every key derived for `function`.
    #[must_use]
    pub fn function_pattern(&self, function: FunctionId) -> String {
        format!(
            "{}:{}:*",
            escape_glob(&self.namespace),
            escape_glob(function.as_str())
        )
    }

    /// Glob pattern matching every key in this namespace.
    #[must_use]
    pub fn namespace_pattern(&self) -> String {
        format!("{}:*", escape_glob(&self.namespace))
    }
}

/// Serializes arguments to canonical JSON.
///
/// Going through `serde_json::Value` sorts object keys, which makes
/// `HashMap` arguments and differently-ordered struct definitions stable.
/// Non-finite floats are rejected: JSON would write them all as `null`.
fn canonical_args<A: Serialize + ?Sized>(args: &A) -> CacheResult<String> {
    let key_error = |message: String| CacheError::Serialization {
        format: "json",
        message: format!("cache key arguments: {}", message),
    };

    ensure_finite(args).map_err(|e| key_error(e.to_string()))?;
    serde_json::to_value(args)
        .and_then(|value| serde_json::to_string(&value))
        .map_err(|e| key_error(e.to_string()))
}

/// Escapes Redis glob metacharacters.
fn escape_glob(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
