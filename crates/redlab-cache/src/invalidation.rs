//! Invalidation targets for mutating calls.

use crate::key::{CacheKey, FunctionId, KeyBuilder};
use redlab_core::CacheResult;
use serde::Serialize;
use std::fmt;

type DeriveFn<A> = Box<dyn Fn(&A, &KeyBuilder) -> CacheResult<CacheKey> + Send + Sync>;

enum Target<A> {
    Key(CacheKey),
    Pattern(String),
    AllCallsOf(FunctionId),
    Derived(DeriveFn<A>),
}

/// What to delete after a mutating call with arguments `A` succeeds.
///
/// ```
/// use redlab_cache::{function_id, Invalidation};
///
/// struct UpdateUser {
///     user_id: u64,
///     name: String,
/// }
///
/// // `update_user` makes the cached `get_user((user_id,))` stale.
/// let invalidation = Invalidation::new()
///     .call_of(function_id!(get_user), |args: &UpdateUser| (args.user_id,));
/// assert_eq!(invalidation.len(), 1);
/// ```
pub struct Invalidation<A> {
    targets: Vec<Target<A>>,
}

impl<A> Default for Invalidation<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for Invalidation<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for target in &self.targets {
            match target {
                Target::Key(key) => list.entry(&format_args!("key {}", key)),
                Target::Pattern(pattern) => list.entry(&format_args!("pattern {}", pattern)),
                Target::AllCallsOf(function) => list.entry(&format_args!("all calls of {}", function)),
                Target::Derived(_) => list.entry(&format_args!("derived key")),
            };
        }
        list.finish()
    }
}

impl<A> Invalidation<A> {
    #[must_use]
    pub fn new() -> Self {
        Self { targets: Vec::new() }
    }

    /// Deletes a fixed key.
    #[must_use]
    pub fn key(mut self, key: CacheKey) -> Self {
        self.targets.push(Target::Key(key));
        self
    }

    /// Deletes every key matching a Redis glob pattern.
    #[must_use]
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.targets.push(Target::Pattern(pattern.into()));
        self
    }

    /// Deletes every cached call of `function`, whatever its arguments.
    #[must_use]
    pub fn all_calls_of(mut self, function: FunctionId) -> Self {
        self.targets.push(Target::AllCallsOf(function));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Turns the targets into concrete keys and patterns for one call.
    pub fn resolve(&self, args: &A, keys: &KeyBuilder) -> CacheResult<ResolvedInvalidation> {
        let mut resolved = ResolvedInvalidation::default();
        for target in &self.targets {
            match target {
                Target::Key(key) => resolved.keys.push(key.as_str().to_string()),
                Target::Pattern(pattern) => resolved.patterns.push(pattern.clone()),
                Target::AllCallsOf(function) => resolved.patterns.push(keys.function_pattern(*function)),
                Target::Derived(derive) => resolved.keys.push(derive(args, keys)?.into_string()),
            }
        }
        resolved.keys.dedup();
        Ok(resolved)
    }
}

impl<A: 'static> Invalidation<A> {
    /// Deletes the cached call of `function` whose arguments are projected
    /// from the mutating call's arguments.
    #[must_use]
    pub fn call_of<K, P>(mut self, function: FunctionId, project: P) -> Self
    where
        K: Serialize,
        P: Fn(&A) -> K + Send + Sync + 'static,
    {
        self.targets.push(Target::Derived(Box::new(move |args: &A, keys: &KeyBuilder| {
            keys.derive(function, &project(args))
        })));
        self
    }
}

impl<A: Serialize + 'static> Invalidation<A> {
    /// Deletes the cached call of `function` with the very same arguments.
    #[must_use]
    pub fn same_call_of(mut self, function: FunctionId) -> Self {
        self.targets.push(Target::Derived(Box::new(
            move |args: &A, keys: &KeyBuilder| keys.derive(function, args),
        )));
        self
    }
}

/// Keys and patterns resolved for a single call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedInvalidation {
    pub keys: Vec<String>,
    pub patterns: Vec<String>,
}

impl ResolvedInvalidation {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redlab_core::CacheError;
    use std::collections::HashMap;

    const GET_USER: FunctionId = FunctionId::new("svc::get_user");
    const LIST_USERS: FunctionId = FunctionId::new("svc::list_users");

    #[derive(Serialize)]
    struct UpdateArgs {
        user_id: u64,
        name: String,
    }

    fn update(user_id: u64) -> UpdateArgs {
        UpdateArgs {
            user_id,
            name: "Ada".to_string(),
        }
    }

    #[test]
    fn test_projected_key_matches_cached_key() {
        let keys = KeyBuilder::new("t");
        let inv = Invalidation::new().call_of(GET_USER, |args: &UpdateArgs| (args.user_id,));

        let resolved = inv.resolve(&update(42), &keys).unwrap();
        assert_eq!(
            resolved.keys,
            vec![keys.derive(GET_USER, &(42,)).unwrap().into_string()]
        );
        assert!(resolved.patterns.is_empty());
    }

    #[test]
    fn test_same_call_uses_all_arguments() {
        let keys = KeyBuilder::new("t");
        let inv = Invalidation::<(u64, String)>::new().same_call_of(GET_USER);

        let resolved = inv.resolve(&(7, "x".to_string()), &keys).unwrap();
        assert_eq!(resolved.keys, vec!["t:svc::get_user:[7,\"x\"]".to_string()]);
    }

    #[test]
    fn test_fixed_keys_and_patterns() {
        let keys = KeyBuilder::new("t");
        let inv = Invalidation::<()>::new()
            .key(CacheKey::raw("t:report"))
            .key(CacheKey::raw("t:report"))
            .pattern("t:stats:*")
            .all_calls_of(LIST_USERS);

        let resolved = inv.resolve(&(), &keys).unwrap();
        assert_eq!(resolved.keys, vec!["t:report".to_string()]);
        assert_eq!(
            resolved.patterns,
            vec!["t:stats:*".to_string(), "t:svc::list_users:*".to_string()]
        );
        assert_eq!(inv.len(), 4);
    }

    #[test]
    fn test_underivable_key_is_an_error() {
        let inv = Invalidation::new().call_of(GET_USER, |_: &()| {
            let mut bad = HashMap::new();
            bad.insert((1, 2), 3);
            bad
        });
        let err = inv.resolve(&(), &KeyBuilder::default()).unwrap_err();
        assert!(matches!(err, CacheError::Serialization { .. }));
    }

    #[test]
    fn test_empty_invalidation() {
        let inv = Invalidation::<u64>::default();
        assert!(inv.is_empty());
        assert!(inv.resolve(&1, &KeyBuilder::default()).unwrap().is_empty());
    }

    #[test]
    fn test_debug_lists_targets() {
        let inv = Invalidation::<UpdateArgs>::new()
            .pattern("a:*")
            .call_of(GET_USER, |args: &UpdateArgs| (args.user_id,));
        assert_eq!(format!("{:?}", inv), "[pattern a:*, derived key]");
    }
}
