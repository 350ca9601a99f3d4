//! Deterministic cache keys.
//!
//! A key is built from `(name, value)` parameter pairs. Pairs with empty
//! values are dropped and the rest are sorted by name, so two logically
//! identical parameter sets produce the same key no matter what order they
//! were supplied in. The same key is used for the response cache and the
//! in-flight request table.

use std::collections::BTreeMap;
use std::fmt;

/// Prefix for profile lookups.
const PROFILE_NAMESPACE: &str = "profile";

/// Normalized, order-independent cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Build a key for a profile lookup from parameter pairs.
    ///
    /// ```rust
    /// # use tillit::CacheKey;
    /// let a = CacheKey::from_params([("orderId", "42"), ("phoneHash", "ab")]);
    /// let b = CacheKey::from_params([("phoneHash", "ab"), ("orderId", "42")]);
    /// assert_eq!(a, b);
    /// ```
    pub fn from_params<I, K, V>(params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Self::namespaced(PROFILE_NAMESPACE, params)
    }

    /// Build a key under an explicit namespace.
    pub fn namespaced<I, K, V>(namespace: &str, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let sorted: BTreeMap<String, String> = params
            .into_iter()
            .filter_map(|(k, v)| {
                let v = v.as_ref().trim();
                (!v.is_empty()).then(|| (k.as_ref().trim().to_string(), v.to_string()))
            })
            .collect();

        let mut key = String::from(namespace);
        key.push(':');
        for (i, (k, v)) in sorted.iter().enumerate() {
            if i > 0 {
                key.push('&');
            }
            key.push_str(&escape(k));
            key.push('=');
            key.push_str(&escape(v));
        }
        CacheKey(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
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

// Keep separators unambiguous: a value containing '&' or '=' must not
// collide with a different parameter set.
fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            '&' => out.push_str("%26"),
            '=' => out.push_str("%3D"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_order_independent() {
        let a = CacheKey::from_params([("phoneHash", "p"), ("emailHash", "e"), ("orderId", "1")]);
        let b = CacheKey::from_params([("orderId", "1"), ("phoneHash", "p"), ("emailHash", "e")]);
        assert_eq!(a, b);
    }

    #[test]
    fn empty_values_are_ignored() {
        let a = CacheKey::from_params([("phoneHash", "p"), ("orderId", "")]);
        let b = CacheKey::from_params([("phoneHash", "p")]);
        assert_eq!(a, b);
    }

    #[test]
    fn key_differs_on_value() {
        let a = CacheKey::from_params([("phoneHash", "p1")]);
        let b = CacheKey::from_params([("phoneHash", "p2")]);
        assert_ne!(a, b);
    }

    #[test]
    fn separators_in_values_do_not_collide() {
        let a = CacheKey::from_params([("a", "1&b=2")]);
        let b = CacheKey::from_params([("a", "1"), ("b", "2")]);
        assert_ne!(a, b);
    }

    #[test]
    fn key_renders_with_namespace() {
        let key = CacheKey::from_params([("orderId", "7"), ("checkoutToken", "t")]);
        assert_eq!(key.as_str(), "profile:checkoutToken=t&orderId=7");
    }
}
