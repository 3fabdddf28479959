use crate::config::ConfigError;
use crate::record::SubOperationRecord;
use crate::strategy::{check_min_size, invalid, ClusterId, ClusteringStrategy};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Configuration for operation-name clustering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NameSimilarityConfig {
    /// Prefix length used when a name has no separator
    pub prefix_length: usize,

    /// Characters that end a name prefix
    pub separators: String,

    /// Regex that must match the whole name; matches form one fixed cluster
    ///
    /// The pattern is anchored at both ends, so `GET` matches only `GET` and
    /// `GET_.*` is needed to cover `GET_VALUE`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    pub min_cluster_size: usize,
}

impl Default for NameSimilarityConfig {
    fn default() -> Self {
        Self {
            prefix_length: 3,
            separators: "_.:- ".to_string(),
            pattern: None,
            min_cluster_size: 2,
        }
    }
}

/// Prefix of an operation name
///
/// The text before the first separator, or the first `prefix_length`
/// characters when there is no separator past position zero.
///
/// # Example
/// ```
/// use racimo::strategy::operation_prefix;
///
/// assert_eq!(operation_prefix("GET_DF_DATA", "_", 3), "GET");
/// assert_eq!(operation_prefix("LOADFILE", "_", 4), "LOAD");
/// ```
pub fn operation_prefix<'a>(name: &'a str, separators: &str, prefix_length: usize) -> &'a str {
    let cut = name
        .char_indices()
        .skip(1)
        .find(|(_, c)| separators.contains(*c))
        .map(|(i, _)| i);

    match cut {
        Some(end) => &name[..end],
        None => match name.char_indices().nth(prefix_length) {
            Some((end, _)) => &name[..end],
            None => name,
        },
    }
}

/// Groups operations sharing a name prefix (or a configured pattern)
#[derive(Debug, Clone)]
pub struct NameSimilarityStrategy {
    prefix_length: usize,
    separators: String,
    pattern: Option<Regex>,
    min_cluster_size: usize,
}

impl NameSimilarityStrategy {
    pub const NAME: &'static str = "name_similarity";

    pub fn new(config: NameSimilarityConfig) -> Result<Self, ConfigError> {
        check_min_size(Self::NAME, "min_cluster_size", config.min_cluster_size)?;
        if config.prefix_length == 0 {
            return Err(invalid(Self::NAME, "prefix_length", "must be >= 1"));
        }
        let pattern = config
            .pattern
            .as_deref()
            .map(|pattern| Regex::new(&format!("^(?:{})$", pattern)))
            .transpose()
            .map_err(|source| ConfigError::InvalidPattern {
                strategy: Self::NAME.to_string(),
                source,
            })?;

        Ok(Self {
            prefix_length: config.prefix_length,
            separators: config.separators,
            pattern,
            min_cluster_size: config.min_cluster_size,
        })
    }

    fn matches_pattern(&self, name: &str) -> bool {
        self.pattern.as_ref().is_some_and(|p| p.is_match(name))
    }

    fn prefix<'a>(&self, name: &'a str) -> &'a str {
        operation_prefix(name, &self.separators, self.prefix_length)
    }
}

impl ClusteringStrategy for NameSimilarityStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn detect(
        &self,
        candidate: &SubOperationRecord,
        siblings: &[SubOperationRecord],
    ) -> Option<ClusterId> {
        if candidate.operation.is_empty() {
            return None;
        }

        if self.matches_pattern(&candidate.operation) {
            let matching = siblings
                .iter()
                .filter(|s| self.matches_pattern(&s.operation))
                .count();
            return (matching >= self.min_cluster_size).then(|| "pattern".to_string());
        }

        let prefix = self.prefix(&candidate.operation);
        let sharing = siblings
            .iter()
            .filter(|s| !self.matches_pattern(&s.operation))
            .filter(|s| self.prefix(&s.operation) == prefix)
            .count();

        (sharing >= self.min_cluster_size).then(|| format!("prefix:{}", prefix))
    }
}
