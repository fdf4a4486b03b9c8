//! Resource locations, the `namespace:path` identifiers functions and tags are addressed by.

use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Namespace assumed when an identifier has none.
pub const DEFAULT_NAMESPACE: &str = "minecraft";

/// Malformed resource location.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid resource location '{0}'")]
pub struct InvalidLocation(pub String);

/// A validated `namespace:path` identifier.
///
/// # Examples
///
/// ```
/// use mch::resource::ResourceLocation;
///
/// let location: ResourceLocation = "load".parse().unwrap();
/// assert_eq!(location.to_string(), "minecraft:load");
///
/// let location = ResourceLocation::from_function_path("bench", "deep/loop.mcfunction").unwrap();
/// assert_eq!(location.to_string(), "bench:deep/loop");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceLocation {
    namespace: String,
    path: String,
}

fn valid_namespace(namespace: &str) -> bool {
    !namespace.is_empty()
        && namespace
            .bytes()
            .all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'_' | b'.' | b'-'))
}

fn valid_path(path: &str) -> bool {
    !path.is_empty()
        && path
            .bytes()
            .all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'_' | b'.' | b'-' | b'/'))
}

impl ResourceLocation {
    /// Builds a location from its parts.
    ///
    /// # Errors
    ///
    /// Fails if either part contains characters outside `[a-z0-9_.-]` (plus `/` in the path).
    pub fn new(namespace: &str, path: &str) -> Result<Self, InvalidLocation> {
        if !valid_namespace(namespace) || !valid_path(path) {
            return Err(InvalidLocation(format!("{namespace}:{path}")));
        }
        Ok(Self {
            namespace: namespace.to_string(),
            path: path.to_string(),
        })
    }

    /// Maps a file under `data/<namespace>/functions/` to the function it defines.
    ///
    /// `relative` uses `/` separators and must end in `.mcfunction`.
    #[must_use]
    pub fn from_function_path(namespace: &str, relative: &str) -> Option<Self> {
        Self::new(namespace, relative.strip_suffix(".mcfunction")?).ok()
    }

    /// The part before the colon.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The part after the colon.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Display for ResourceLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.path)
    }
}

impl FromStr for ResourceLocation {
    type Err = InvalidLocation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, path) = s.split_once(':').unwrap_or((DEFAULT_NAMESPACE, s));
        Self::new(namespace, path).map_err(|_| InvalidLocation(s.to_string()))
    }
}

impl TryFrom<String> for ResourceLocation {
    type Error = InvalidLocation;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ResourceLocation> for String {
    fn from(location: ResourceLocation) -> Self {
        location.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_namespace_is_kept() {
        let location: ResourceLocation = "mch:setup.iteration".parse().unwrap();
        assert_eq!(location.namespace(), "mch");
        assert_eq!(location.path(), "setup.iteration");
    }

    #[test]
    fn uppercase_and_spaces_are_rejected() {
        assert!("Bench:x".parse::<ResourceLocation>().is_err());
        assert!("bench:a b".parse::<ResourceLocation>().is_err());
        assert!("bench:".parse::<ResourceLocation>().is_err());
        assert!("a:b:c".parse::<ResourceLocation>().is_err());
    }

    #[test]
    fn only_function_files_map_to_functions() {
        assert_eq!(
            ResourceLocation::from_function_path("ns", "a/b.mcfunction"),
            Some(ResourceLocation::new("ns", "a/b").unwrap())
        );
        assert_eq!(ResourceLocation::from_function_path("ns", "a/b.json"), None);
    }

    #[test]
    fn serializes_as_a_string() {
        let location = ResourceLocation::new("ns", "f").unwrap();
        assert_eq!(serde_json::to_string(&location).unwrap(), r#""ns:f""#);
        assert_eq!(
            serde_json::from_str::<ResourceLocation>(r#""ns:f""#).unwrap(),
            location
        );
    }
}
