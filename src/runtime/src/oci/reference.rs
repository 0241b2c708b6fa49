//! Image and bundle reference parsing.
//!
//! Parses references like `registry.example.com/bundles/myapp:v1` into
//! registry, repository and tag or digest, applying Docker Hub defaults.

use hoist_core::error::{PublishError, Result};

use super::digest::Digest;

/// Default registry when none is specified.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Default tag when neither tag nor digest is specified.
const DEFAULT_TAG: &str = "latest";

/// Repository prefix for single-component Docker Hub names.
const OFFICIAL_REPO_PREFIX: &str = "library/";

const MAX_TAG_LEN: usize = 128;

/// Canonical image reference.
///
/// After parsing, exactly one of `tag` and `digest` is set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Registry host, with optional port (e.g., "ghcr.io", "localhost:5000")
    pub registry: String,
    /// Repository path (e.g., "library/nginx", "bundles/myapp")
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<Digest>,
}

impl ImageReference {
    /// Parse and normalize a reference string.
    ///
    /// - `nginx` → docker.io/library/nginx:latest
    /// - `myuser/app:v1` → docker.io/myuser/app:v1
    /// - `localhost:5000/app` → localhost:5000/app:latest
    /// - `ghcr.io/org/app@sha256:…` → ghcr.io/org/app@sha256:…
    ///
    /// A reference carrying both tag and digest keeps only the digest.
    pub fn parse(reference: &str) -> Result<Self> {
        let raw = reference.trim();
        let invalid = |reason: &str| PublishError::InvalidReference {
            reference: raw.to_string(),
            reason: reason.to_string(),
        };

        if raw.is_empty() {
            return Err(invalid("empty reference"));
        }

        let (name_tag, digest) = match raw.split_once('@') {
            Some((name, digest)) => (name, Some(Digest::parse(digest)?)),
            None => (raw, None),
        };

        // A tag colon must come after the last slash; earlier colons belong to a port.
        let last_slash = name_tag.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match name_tag[last_slash..].find(':') {
            Some(i) => {
                let split = last_slash + i;
                (&name_tag[..split], Some(&name_tag[split + 1..]))
            }
            None => (name_tag, None),
        };

        if let Some(tag) = tag {
            validate_tag(tag).map_err(|reason| invalid(&reason))?;
        }

        let (registry, repository) = split_registry(name);
        validate_registry(registry).map_err(|reason| invalid(&reason))?;
        validate_repository(&repository).map_err(|reason| invalid(&reason))?;

        let tag = match (&digest, tag) {
            (Some(_), _) => None,
            (None, Some(t)) => Some(t.to_string()),
            (None, None) => Some(DEFAULT_TAG.to_string()),
        };

        Ok(ImageReference {
            registry: registry.to_string(),
            repository,
            tag,
            digest,
        })
    }

    /// `registry/repository`, without tag or digest.
    pub fn name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Fully qualified reference string.
    pub fn full_reference(&self) -> String {
        let mut s = self.name();
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(&digest.to_string());
        } else if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        s
    }

    /// Short Docker-style form: Docker Hub registry and `library/` are elided.
    pub fn familiar(&self) -> String {
        let name = if self.registry == DEFAULT_REGISTRY {
            self.repository
                .strip_prefix(OFFICIAL_REPO_PREFIX)
                .unwrap_or(&self.repository)
                .to_string()
        } else {
            self.name()
        };
        match (&self.digest, &self.tag) {
            (Some(d), _) => format!("{}@{}", name, d),
            (None, Some(t)) => format!("{}:{}", name, t),
            (None, None) => name,
        }
    }

    /// Replace any tag with `digest`, producing an immutable reference.
    pub fn pin(&self, digest: &Digest) -> Result<ImageReference> {
        if self.repository.is_empty() || self.registry.is_empty() {
            return Err(PublishError::UnnamedReference(self.full_reference()));
        }
        Ok(ImageReference {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: None,
            digest: Some(digest.clone()),
        })
    }

    pub fn is_pinned(&self) -> bool {
        self.digest.is_some()
    }

    /// Tag or digest string, as used in registry manifest URLs.
    pub fn locator(&self) -> String {
        match (&self.digest, &self.tag) {
            (Some(d), _) => d.to_string(),
            (None, Some(t)) => t.clone(),
            (None, None) => DEFAULT_TAG.to_string(),
        }
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

impl std::str::FromStr for ImageReference {
    type Err = PublishError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Split a name into registry and repository, applying Docker Hub defaults.
fn split_registry(name: &str) -> (&str, String) {
    if let Some((first, rest)) = name.split_once('/') {
        if first.contains('.') || first.contains(':') || first == "localhost" {
            return (first, rest.to_string());
        }
    }
    let repository = if name.contains('/') {
        name.to_string()
    } else {
        format!("{}{}", OFFICIAL_REPO_PREFIX, name)
    };
    (DEFAULT_REGISTRY, repository)
}

fn validate_registry(registry: &str) -> std::result::Result<(), String> {
    let (host, port) = match registry.split_once(':') {
        Some((h, p)) => (h, Some(p)),
        None => (registry, None),
    };
    if host.is_empty()
        || !host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return Err(format!("invalid registry host '{}'", registry));
    }
    if let Some(port) = port {
        if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
            return Err(format!("invalid registry port in '{}'", registry));
        }
    }
    Ok(())
}

fn validate_repository(repository: &str) -> std::result::Result<(), String> {
    if repository.is_empty() || repository == OFFICIAL_REPO_PREFIX {
        return Err("empty repository path".to_string());
    }
    for component in repository.split('/') {
        if component.is_empty() {
            return Err("empty path component".to_string());
        }
        if component.contains(':') {
            return Err("too many colons".to_string());
        }
        let valid_chars = component
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "._-".contains(c));
        let alnum_edges = component
            .chars()
            .next()
            .zip(component.chars().last())
            .is_some_and(|(a, b)| a.is_ascii_alphanumeric() && b.is_ascii_alphanumeric());
        if !valid_chars || !alnum_edges {
            return Err(format!("invalid repository component '{}'", component));
        }
    }
    Ok(())
}

fn validate_tag(tag: &str) -> std::result::Result<(), String> {
    let mut chars = tag.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
    if !first_ok
        || tag.len() > MAX_TAG_LEN
        || !chars.all(|c| c.is_ascii_alphanumeric() || "_.-".contains(c))
    {
        return Err(format!("invalid tag '{}'", tag));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str =
        "sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn digest() -> Digest {
        Digest::parse(DIGEST).unwrap()
    }

    #[test]
    fn test_parse_simple_name() {
        let r = ImageReference::parse("nginx").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "library/nginx");
        assert_eq!(r.tag.as_deref(), Some("latest"));
        assert!(r.digest.is_none());
    }

    #[test]
    fn test_parse_user_repo_with_tag() {
        let r = ImageReference::parse("myuser/myimage:v1.0").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "myuser/myimage");
        assert_eq!(r.tag.as_deref(), Some("v1.0"));
    }

    #[test]
    fn test_parse_custom_registry() {
        let r = ImageReference::parse("registry.example.com/bundles/myapp:v1").unwrap();
        assert_eq!(r.registry, "registry.example.com");
        assert_eq!(r.repository, "bundles/myapp");
        assert_eq!(r.tag.as_deref(), Some("v1"));
    }

    #[test]
    fn test_parse_registry_with_port_no_tag() {
        let r = ImageReference::parse("localhost:5000/myimage").unwrap();
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.repository, "myimage");
        assert_eq!(r.tag.as_deref(), Some("latest"));
    }

    #[test]
    fn test_parse_digest() {
        let r = ImageReference::parse(&format!("ghcr.io/org/app@{}", DIGEST)).unwrap();
        assert_eq!(r.repository, "org/app");
        assert!(r.tag.is_none());
        assert_eq!(r.digest, Some(digest()));
    }

    #[test]
    fn test_parse_tag_and_digest_keeps_digest() {
        let r = ImageReference::parse(&format!("ghcr.io/org/app:v1@{}", DIGEST)).unwrap();
        assert!(r.tag.is_none());
        assert!(r.is_pinned());
    }

    #[test]
    fn test_parse_rejects_multiple_colons() {
        let err = ImageReference::parse("myapp:v1:extra").unwrap_err();
        assert!(matches!(err, PublishError::InvalidReference { .. }));
    }

    #[test]
    fn test_parse_rejects_illegal_characters() {
        assert!(ImageReference::parse("My App:v1").is_err());
        assert!(ImageReference::parse("ghcr.io/Org/app").is_err());
        assert!(ImageReference::parse("app:-bad").is_err());
    }

    #[test]
    fn test_parse_rejects_empty_repository() {
        assert!(ImageReference::parse("ghcr.io/").is_err());
        assert!(ImageReference::parse("ghcr.io//app").is_err());
        assert!(ImageReference::parse("").is_err());
        assert!(ImageReference::parse("   ").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_digest() {
        assert!(ImageReference::parse("nginx@invaliddigest").is_err());
    }

    #[test]
    fn test_familiar_form() {
        let r = ImageReference::parse("myapp:v1").unwrap();
        assert_eq!(r.familiar(), "myapp:v1");
        assert_eq!(r.full_reference(), "docker.io/library/myapp:v1");

        let r = ImageReference::parse("ghcr.io/org/app:v2").unwrap();
        assert_eq!(r.familiar(), "ghcr.io/org/app:v2");
    }

    #[test]
    fn test_pin_strips_tag() {
        let r = ImageReference::parse("myapp:v1").unwrap();
        let pinned = r.pin(&digest()).unwrap();
        assert!(pinned.tag.is_none());
        assert_eq!(pinned.familiar(), format!("myapp@{}", DIGEST));
    }

    #[test]
    fn test_pin_then_parse_round_trip() {
        for raw in ["myapp:v1", "ghcr.io/org/app:2.0", "localhost:5000/a/b/c:x"] {
            let pinned = ImageReference::parse(raw).unwrap().pin(&digest()).unwrap();
            let reparsed = ImageReference::parse(&pinned.familiar()).unwrap();
            assert!(reparsed.tag.is_none(), "{raw}");
            assert_eq!(reparsed.digest, Some(digest()), "{raw}");
            assert_eq!(reparsed, pinned);
        }
    }

    #[test]
    fn test_pin_unnamed_reference() {
        let r = ImageReference {
            registry: "docker.io".to_string(),
            repository: String::new(),
            tag: Some("v1".to_string()),
            digest: None,
        };
        assert!(matches!(
            r.pin(&digest()),
            Err(PublishError::UnnamedReference(_))
        ));
    }

    #[test]
    fn test_pin_bundle_repository() {
        let target = ImageReference::parse("registry.example.com/bundles/myapp:v1").unwrap();
        let moved = target.pin(&digest()).unwrap();
        assert_eq!(
            moved.to_string(),
            format!("registry.example.com/bundles/myapp@{}", DIGEST)
        );
    }

    #[test]
    fn test_locator() {
        let r = ImageReference::parse("nginx:1.25").unwrap();
        assert_eq!(r.locator(), "1.25");
        assert_eq!(r.pin(&digest()).unwrap().locator(), DIGEST);
    }
}
