//! Identifier newtypes shared by every M2M crate.

use serde::{Deserialize, Serialize};
use std::borrow::{Borrow, Cow};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Public scene identifier supplied by callers (e.g. a Landsat Collection ID).
    SceneId
);

string_id!(
    /// Name of a remote dataset (collection) such as `LANDSAT_8_C1`.
    DatasetName
);

string_id!(
    /// The remote system's internal key for a scene.
    EntityId
);

string_id!(
    /// A download location, already rewritten to the internal host.
    DownloadUrl
);

/// Download product requested from the `download` endpoint.
///
/// Codes are trimmed and upper-cased on construction, so `"standard"` and
/// [`ProductType::STANDARD`] are the same product with the same cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ProductType(Cow<'static, str>);

impl ProductType {
    /// Level-1 GeoTIFF bundle.
    pub const STANDARD: ProductType = ProductType(Cow::Borrowed("STANDARD"));

    pub fn new(code: impl AsRef<str>) -> Self {
        let code = code.as_ref().trim().to_ascii_uppercase();
        if code == Self::STANDARD.as_str() {
            Self::STANDARD
        } else {
            Self(Cow::Owned(code))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ProductType {
    fn default() -> Self {
        Self::STANDARD
    }
}

impl From<&str> for ProductType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ProductType {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<ProductType> for String {
    fn from(value: ProductType) -> Self {
        value.0.into_owned()
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// API key returned by `login`.
///
/// `Debug` never prints the key; use [`SessionToken::expose`] to put it on the wire.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_scene_id_borrows_as_str() {
        let mut map = HashMap::new();
        map.insert(SceneId::from("LC08_L1TP_044034_20130330_20170310_01_T1"), 1);
        assert_eq!(map.get("LC08_L1TP_044034_20130330_20170310_01_T1"), Some(&1));
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let id = EntityId::new("LC80440342013089LGN01");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"LC80440342013089LGN01\"");
        let back: EntityId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_product_type_codes() {
        assert_eq!(ProductType::default().as_str(), "STANDARD");
        assert_eq!(ProductType::from("standard"), ProductType::STANDARD);
        assert_eq!(ProductType::from("FR_BUND").as_str(), "FR_BUND");
    }

    #[test]
    fn test_product_type_spellings_compare_equal() {
        let spelled = ProductType::new(" Standard ");
        assert_eq!(spelled, ProductType::STANDARD);

        let mut seen = std::collections::HashSet::new();
        seen.insert(ProductType::STANDARD);
        assert!(!seen.insert(ProductType::from("STANDARD".to_string())));

        let json = serde_json::to_string(&ProductType::STANDARD).unwrap();
        assert_eq!(json, "\"STANDARD\"");
        let back: ProductType = serde_json::from_str("\"standard\"").unwrap();
        assert_eq!(back, ProductType::STANDARD);
    }

    #[test]
    fn test_session_token_debug_is_redacted() {
        let token = SessionToken::new("secret-api-key");
        let shown = format!("{:?}", token);
        assert!(!shown.contains("secret-api-key"));
        assert_eq!(token.expose(), "secret-api-key");
    }
}
