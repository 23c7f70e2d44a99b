//! Structured cache keys.
//!
//! Keys are built from a [`ResourceKind`] plus identifier parts and encoded
//! once, on the way into the backend. Nothing ever parses an encoded key back;
//! the store keeps its own encoded-key → id table for each batch.

use std::fmt;

use m2m_core::{ProductType, SceneId};

/// Namespace prefix for every key this crate writes.
const NAMESPACE: &str = "m2m";

/// Kind of value stored under a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// The single cached session token.
    Login,
    /// Scene identifier → entity id.
    IdLookup,
    /// Scene identifier → download URL.
    Download,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::IdLookup => "idLookup",
            Self::Download => "download",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cache key: resource kind, optional qualifier, optional identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    kind: ResourceKind,
    qualifier: Option<String>,
    id: Option<String>,
}

impl CacheKey {
    /// The process-wide session token slot.
    pub fn login() -> Self {
        Self {
            kind: ResourceKind::Login,
            qualifier: None,
            id: None,
        }
    }

    pub fn id_lookup(id: &SceneId) -> Self {
        Self {
            kind: ResourceKind::IdLookup,
            qualifier: None,
            id: Some(id.as_str().to_string()),
        }
    }

    /// Download location for a scene, scoped by product so different
    /// products never share an entry.
    pub fn download(product: &ProductType, id: &SceneId) -> Self {
        Self {
            kind: ResourceKind::Download,
            qualifier: Some(product.as_str().to_string()),
            id: Some(id.as_str().to_string()),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Encode to the backend's string form, e.g. `m2m:download:STANDARD:LC08_...`.
    ///
    /// The identifier is always the last segment; `:` and `%` in the qualifier
    /// are percent-escaped so distinct keys never encode to the same string.
    pub fn encode(&self) -> String {
        let mut out = format!("{}:{}", NAMESPACE, self.kind.as_str());
        if let Some(qualifier) = &self.qualifier {
            out.push(':');
            out.push_str(&qualifier.replace('%', "%25").replace(':', "%3A"));
        }
        if let Some(id) = &self.id {
            out.push(':');
            out.push_str(id);
        }
        out
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_key_encodings() {
        let scene = SceneId::from("LC08_L1TP_044034_20130330_20170310_01_T1");
        assert_eq!(CacheKey::login().encode(), "m2m:login");
        assert_eq!(
            CacheKey::id_lookup(&scene).encode(),
            "m2m:idLookup:LC08_L1TP_044034_20130330_20170310_01_T1"
        );
        assert_eq!(
            CacheKey::download(&ProductType::STANDARD, &scene).encode(),
            "m2m:download:STANDARD:LC08_L1TP_044034_20130330_20170310_01_T1"
        );
    }

    #[test]
    fn test_kinds_do_not_collide() {
        let scene = SceneId::from("X");
        assert_ne!(
            CacheKey::id_lookup(&scene).encode(),
            CacheKey::download(&ProductType::STANDARD, &scene).encode()
        );
    }

    proptest! {
        /// Property: download keys with different (product, id) pairs never
        /// encode to the same string, even when the parts contain separators.
        #[test]
        fn prop_download_encoding_is_injective(
            p1 in "[A-Z:%]{1,6}",
            p2 in "[A-Z:%]{1,6}",
            id1 in "[A-Z0-9_:]{1,12}",
            id2 in "[A-Z0-9_:]{1,12}",
        ) {
            let k1 = CacheKey::download(&ProductType::new(p1), &SceneId::new(id1));
            let k2 = CacheKey::download(&ProductType::new(p2), &SceneId::new(id2));
            if k1 == k2 {
                prop_assert_eq!(k1.encode(), k2.encode());
            } else {
                prop_assert_ne!(k1.encode(), k2.encode());
            }
        }
    }
}
