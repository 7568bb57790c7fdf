use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

/// A caller's request for objects.
///
/// Filters are `key:value` strings. Values given for the same key are alternatives; different keys
/// must all match.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    /// Free-text terms. When empty, the query is answered without the search index.
    pub terms: String,
    pub filters: Vec<String>,
    pub offset: usize,
    pub limit: Option<usize>,
    pub order_by: String,
    pub descending: bool,
}

/// The attributes an object can be filtered and ordered on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FilterKey {
    Cluster,
    Namespace,
    Kind,
    Name,
    Status,
    Category,
    ApiGroup,
    ApiVersion,
    Tenant,
}

/// One conjunct of a query's filters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Filter {
    /// Matches objects whose attribute equals any of the values.
    AnyOf { key: FilterKey, values: Vec<String> },

    /// A key that is not supported. It matches nothing.
    Unsupported(String),
}

// === impl Query ===

impl Query {
    pub fn terms(terms: impl Into<String>) -> Self {
        Self {
            terms: terms.into(),
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filters.push(filter.into());
        self
    }

    pub fn has_terms(&self) -> bool {
        !self.terms.trim().is_empty()
    }

    /// Groups the filter strings by key.
    ///
    /// A filter without a `:` separator is treated as an unsupported key.
    pub fn parse_filters(&self) -> Vec<Filter> {
        let mut supported = BTreeMap::<FilterKey, Vec<String>>::new();
        let mut unsupported = Vec::new();
        for filter in &self.filters {
            let Some((key, value)) = filter.split_once(':') else {
                unsupported.push(filter.clone());
                continue;
            };
            match key.trim().parse::<FilterKey>() {
                Ok(key) => supported
                    .entry(key)
                    .or_default()
                    .push(value.trim().to_string()),
                Err(_) => unsupported.push(key.to_string()),
            }
        }

        supported
            .into_iter()
            .map(|(key, values)| Filter::AnyOf { key, values })
            .chain(unsupported.into_iter().map(Filter::Unsupported))
            .collect()
    }

    /// The ordering column. Unsupported or empty names order by name.
    pub fn order_key(&self) -> FilterKey {
        self.order_by.parse().unwrap_or(FilterKey::Name)
    }
}

// === impl FilterKey ===

impl FilterKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cluster => "cluster",
            Self::Namespace => "namespace",
            Self::Kind => "kind",
            Self::Name => "name",
            Self::Status => "status",
            Self::Category => "category",
            Self::ApiGroup => "apiGroup",
            Self::ApiVersion => "apiVersion",
            Self::Tenant => "tenant",
        }
    }

    /// The column holding this attribute in the store and the index.
    pub fn column(&self) -> &'static str {
        match self {
            Self::Cluster => "cluster",
            Self::Namespace => "namespace",
            Self::Kind => "kind",
            Self::Name => "name",
            Self::Status => "status",
            Self::Category => "category",
            Self::ApiGroup => "api_group",
            Self::ApiVersion => "api_version",
            Self::Tenant => "tenant",
        }
    }
}

impl fmt::Display for FilterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cluster" => Ok(Self::Cluster),
            "namespace" => Ok(Self::Namespace),
            "kind" => Ok(Self::Kind),
            "name" => Ok(Self::Name),
            "status" => Ok(Self::Status),
            "category" => Ok(Self::Category),
            "apiGroup" => Ok(Self::ApiGroup),
            "apiVersion" => Ok(Self::ApiVersion),
            "tenant" => Ok(Self::Tenant),
            _ => Err(format!("unsupported filter key: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_filters_by_key() {
        let query = Query::default()
            .with_filter("kind:HelmRelease")
            .with_filter("cluster:a")
            .with_filter("kind:Kustomization")
            .with_filter("color:blue")
            .with_filter("garbage");

        assert_eq!(
            query.parse_filters(),
            vec![
                Filter::AnyOf {
                    key: FilterKey::Cluster,
                    values: vec!["a".to_string()],
                },
                Filter::AnyOf {
                    key: FilterKey::Kind,
                    values: vec!["HelmRelease".to_string(), "Kustomization".to_string()],
                },
                Filter::Unsupported("color".to_string()),
                Filter::Unsupported("garbage".to_string()),
            ]
        );
    }

    #[test]
    fn values_may_contain_separators() {
        let query = Query::default().with_filter("name:a:b");
        assert_eq!(
            query.parse_filters(),
            vec![Filter::AnyOf {
                key: FilterKey::Name,
                values: vec!["a:b".to_string()],
            }]
        );
    }

    #[test]
    fn order_key_defaults_to_name() {
        let mut query = Query::default();
        assert_eq!(query.order_key(), FilterKey::Name);
        query.order_by = "apiGroup".to_string();
        assert_eq!(query.order_key(), FilterKey::ApiGroup);
        query.order_by = "createdAt".to_string();
        assert_eq!(query.order_key(), FilterKey::Name);
    }

    #[test]
    fn blank_terms_are_not_terms() {
        assert!(!Query::terms("  ").has_terms());
        assert!(Query::terms("podinfo").has_terms());
    }
}
