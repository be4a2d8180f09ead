//! Canonical compute resource URLs.
//!
//! Every compute resource is identified by
//! `https://www.googleapis.com/compute/v1/projects/<P>/(global|regions/<R>|zones/<Z>)/<type>/<name>`.

use std::fmt;
use std::str::FromStr;

use crate::error::{CloudError, InfraError, Result};

/// Prefix shared by every compute resource URL.
pub const COMPUTE_BASE_URL: &str = "https://www.googleapis.com/compute/v1/";

/// Location scope of a compute resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    /// Global resources (networks, firewalls, templates, ...).
    Global,
    /// Regional resources (subnets, routers, addresses, ...).
    Region(String),
    /// Zonal resources (disks, instance group managers, ...).
    Zone(String),
}

impl Scope {
    /// Regional scope, or global when `region` is empty.
    #[must_use]
    pub fn regional_or_global(region: &str) -> Self {
        if region.is_empty() {
            Self::Global
        } else {
            Self::Region(region.to_string())
        }
    }

    /// Key used by in-memory stores for this scope.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Global => "global",
            Self::Region(r) | Self::Zone(r) => r,
        }
    }

    /// Link of the location itself, e.g. `.../projects/p/regions/us-central1`.
    #[must_use]
    pub fn link(&self, project: &str) -> String {
        match self {
            Self::Global => format!("{COMPUTE_BASE_URL}projects/{project}/global"),
            Self::Region(r) => format!("{COMPUTE_BASE_URL}projects/{project}/regions/{r}"),
            Self::Zone(z) => format!("{COMPUTE_BASE_URL}projects/{project}/zones/{z}"),
        }
    }
}

/// A parsed compute resource URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GoogleCloudUrl {
    /// Project id.
    pub project: String,
    /// Location scope.
    pub scope: Scope,
    /// Collection name, e.g. `networks` or `instanceTemplates`.
    pub resource_type: String,
    /// Resource name.
    pub name: String,
}

impl GoogleCloudUrl {
    /// Builds a URL from its parts.
    #[must_use]
    pub fn new(
        project: impl Into<String>,
        scope: Scope,
        resource_type: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            scope,
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }

    /// Builds a global resource URL.
    #[must_use]
    pub fn global(project: &str, resource_type: &str, name: &str) -> Self {
        Self::new(project, Scope::Global, resource_type, name)
    }

    /// Builds a regional resource URL.
    #[must_use]
    pub fn regional(project: &str, region: &str, resource_type: &str, name: &str) -> Self {
        Self::new(project, Scope::Region(region.to_string()), resource_type, name)
    }

    /// Builds a zonal resource URL.
    #[must_use]
    pub fn zonal(project: &str, zone: &str, resource_type: &str, name: &str) -> Self {
        Self::new(project, Scope::Zone(zone.to_string()), resource_type, name)
    }

    /// Parses a URL, rejecting foreign hosts, other API versions and trailing components.
    ///
    /// # Errors
    ///
    /// Returns `CloudError::InvalidUrl` if the string is not a canonical compute URL.
    pub fn parse(url: &str) -> Result<Self> {
        let invalid = |reason: &str| -> InfraError {
            CloudError::InvalidUrl {
                url: url.to_string(),
                reason: reason.to_string(),
            }
            .into()
        };

        let rest = url
            .strip_prefix(COMPUTE_BASE_URL)
            .ok_or_else(|| invalid("unexpected host or API version"))?;

        let tokens: Vec<&str> = rest.split('/').collect();
        if tokens.iter().any(|t| t.is_empty()) {
            return Err(invalid("empty path component"));
        }
        if tokens.len() < 5 || tokens[0] != "projects" {
            return Err(invalid("expected projects/<project>/..."));
        }

        let project = tokens[1];
        let (scope, remainder) = match tokens[2] {
            "global" => (Scope::Global, &tokens[3..]),
            "regions" if tokens.len() >= 6 => (Scope::Region(tokens[3].to_string()), &tokens[4..]),
            "zones" if tokens.len() >= 6 => (Scope::Zone(tokens[3].to_string()), &tokens[4..]),
            _ => return Err(invalid("unknown scope")),
        };

        match remainder {
            [resource_type, name] => Ok(Self::new(project, scope, *resource_type, *name)),
            [] | [_] => Err(invalid("missing resource type or name")),
            _ => Err(invalid("trailing components after name")),
        }
    }
}

impl fmt::Display for GoogleCloudUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{COMPUTE_BASE_URL}projects/{}/", self.project)?;
        match &self.scope {
            Scope::Global => write!(f, "global/")?,
            Scope::Region(r) => write!(f, "regions/{r}/")?,
            Scope::Zone(z) => write!(f, "zones/{z}/")?,
        }
        write!(f, "{}/{}", self.resource_type, self.name)
    }
}

impl FromStr for GoogleCloudUrl {
    type Err = InfraError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Returns the last path component of a link, or the input if it has none.
///
/// Cloud objects refer to each other by link; tasks compare by name.
#[must_use]
pub fn last_component(link: &str) -> &str {
    link.rsplit('/').next().unwrap_or(link)
}

/// Project-relative form of a compute link, e.g. `projects/p/global/images/i`.
///
/// Anything that is not a canonical compute URL is returned unchanged.
#[must_use]
pub fn relative_link(link: &str) -> String {
    match link.strip_prefix(COMPUTE_BASE_URL) {
        Some(rest) if GoogleCloudUrl::parse(link).is_ok() => rest.to_string(),
        _ => link.to_string(),
    }
}

/// Absolute form of a project-relative compute link.
///
/// Links that are already absolute, and bare names, are returned unchanged.
#[must_use]
pub fn absolute_link(link: &str) -> String {
    if link.starts_with("projects/") {
        format!("{COMPUTE_BASE_URL}{link}")
    } else {
        link.to_string()
    }
}

/// Returns the short zone suffix, e.g. `a` for `us-central1-a`.
#[must_use]
pub fn short_zone(zone: &str) -> &str {
    zone.rsplit('-').next().unwrap_or(zone)
}

/// Returns the region part of a zone name, e.g. `us-central1` for `us-central1-a`.
#[must_use]
pub fn zone_to_region(zone: &str) -> &str {
    zone.rsplit_once('-').map_or(zone, |(region, _)| region)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_all_scopes() {
        let urls = [
            "https://www.googleapis.com/compute/v1/projects/p1/global/networks/net",
            "https://www.googleapis.com/compute/v1/projects/p1/regions/us-central1/subnetworks/s1",
            "https://www.googleapis.com/compute/v1/projects/p1/zones/us-central1-a/disks/d-1",
            "https://www.googleapis.com/compute/v1/projects/p1/global/operations/op-123",
        ];
        for url in urls {
            let parsed = GoogleCloudUrl::parse(url).expect("valid url");
            assert_eq!(parsed.to_string(), url);
        }
    }

    #[test]
    fn test_parse_fields() {
        let u = GoogleCloudUrl::parse(
            "https://www.googleapis.com/compute/v1/projects/p/zones/europe-west1-b/instanceGroupManagers/a-nodes",
        )
        .expect("valid url");
        assert_eq!(u.project, "p");
        assert_eq!(u.scope, Scope::Zone("europe-west1-b".into()));
        assert_eq!(u.resource_type, "instanceGroupManagers");
        assert_eq!(u.name, "a-nodes");
    }

    #[test]
    fn test_rejects_bad_urls() {
        let bad = [
            "https://example.com/compute/v1/projects/p/global/networks/n",
            "https://www.googleapis.com/compute/beta/projects/p/global/networks/n",
            "https://www.googleapis.com/compute/v1/projects/p/global/networks/n/extra",
            "https://www.googleapis.com/compute/v1/projects/p/global/networks",
            "https://www.googleapis.com/compute/v1/projects/p/continents/x/networks/n",
            "https://www.googleapis.com/compute/v1/projects//global/networks/n",
        ];
        for url in bad {
            assert!(GoogleCloudUrl::parse(url).is_err(), "{url} should be rejected");
        }
    }

    #[test]
    fn test_relative_and_absolute_links() {
        let full = "https://www.googleapis.com/compute/v1/projects/ubuntu-os-cloud/global/images/ubuntu-2204";
        assert_eq!(relative_link(full), "projects/ubuntu-os-cloud/global/images/ubuntu-2204");
        assert_eq!(absolute_link(&relative_link(full)), full);
        assert_eq!(absolute_link(full), full);
        assert_eq!(relative_link("e2-medium"), "e2-medium");
        assert_eq!(
            relative_link("https://www.googleapis.com/compute/v1/projects/p/global/images/family/f"),
            "https://www.googleapis.com/compute/v1/projects/p/global/images/family/f"
        );
    }

    #[test]
    fn test_zone_helpers() {
        assert_eq!(short_zone("us-central1-a"), "a");
        assert_eq!(zone_to_region("us-central1-a"), "us-central1");
        assert_eq!(last_component("a/b/c"), "c");
        assert_eq!(last_component("plain"), "plain");
    }
}
