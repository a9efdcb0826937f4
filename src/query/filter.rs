use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Facet name carried by versions and proxies rather than by a type.
pub const FACET_IMMUTABLE: &str = "Immutable";

/// Restricts results to document types carrying, or lacking, some facets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetFilter {
    /// Every one of these facets is required
    #[serde(default)]
    pub required: BTreeSet<String>,
    /// None of these facets is allowed
    #[serde(default)]
    pub excluded: BTreeSet<String>,
}

impl FacetFilter {
    /// Lets every type through.
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn require(mut self, facet: impl Into<String>) -> Self {
        self.required.insert(facet.into());
        self
    }

    pub fn exclude(mut self, facet: impl Into<String>) -> Self {
        self.excluded.insert(facet.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.required.is_empty() && self.excluded.is_empty()
    }

    /// True when a type with `facets` passes the filter.
    pub fn accepts(&self, facets: impl Fn(&str) -> bool) -> bool {
        self.required.iter().all(|f| facets(f)) && !self.excluded.iter().any(|f| facets(f))
    }
}

/// Who is asking, for which permissions, and which facets to keep.
///
/// No principals means no security check at all, as for a system user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFilter {
    #[serde(default)]
    pub principals: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub facet_filter: FacetFilter,
}

impl QueryFilter {
    pub fn unrestricted() -> Self {
        Self::default()
    }

    pub fn new(principals: &[&str], permissions: &[&str]) -> Self {
        Self {
            principals: principals.iter().map(|p| p.to_string()).collect(),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
            facet_filter: FacetFilter::allow_all(),
        }
    }

    pub fn with_facet_filter(mut self, facet_filter: FacetFilter) -> Self {
        self.facet_filter = facet_filter;
        self
    }

    pub fn checks_security(&self) -> bool {
        !self.principals.is_empty()
    }
}
