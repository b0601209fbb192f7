use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{AnalyzerError, Result};
use crate::patterns::PatternList;

/// Paths to the six (plus one supplemental) line-based regex pattern files
/// consumed by the classifier and the structural differ's ignore lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternFilesConfig {
    /// Headers dropped from consideration before diffing
    pub header_ignore: String,
    /// Cookie names dropped from consideration before diffing
    pub cookie_ignore: String,
    /// Query parameter names dropped from consideration before diffing
    pub query_parameter_name_ignore: String,
    /// Query parameter values dropped from consideration before diffing
    /// (supplemental, mirrors the original's value-based ignore list)
    #[serde(default)]
    pub query_parameter_value_ignore: Option<String>,
    /// Variable names never eligible for swapping
    pub variable_name_ignore: String,
    /// Variable names eligible for swapping
    pub variable_name_swappable: String,
    /// Variable values eligible for swapping
    pub variable_value_swappable: String,
}

/// Compiled form of [`PatternFilesConfig`], threaded explicitly through the
/// analyzer instead of living as process-global state.
#[derive(Debug, Clone)]
pub struct Rules {
    pub header_ignore: PatternList,
    pub cookie_ignore: PatternList,
    pub query_parameter_name_ignore: PatternList,
    pub query_parameter_value_ignore: Option<PatternList>,
    pub variable_name_ignore: PatternList,
    pub variable_name_swappable: PatternList,
    pub variable_value_swappable: PatternList,
}

impl Rules {
    pub fn load(files: &PatternFilesConfig) -> Result<Self> {
        Ok(Self {
            header_ignore: PatternList::from_file(&files.header_ignore)?,
            cookie_ignore: PatternList::from_file(&files.cookie_ignore)?,
            query_parameter_name_ignore: PatternList::from_file(
                &files.query_parameter_name_ignore,
            )?,
            query_parameter_value_ignore: files
                .query_parameter_value_ignore
                .as_deref()
                .map(PatternList::from_file)
                .transpose()?,
            variable_name_ignore: PatternList::from_file(&files.variable_name_ignore)?,
            variable_name_swappable: PatternList::from_file(&files.variable_name_swappable)?,
            variable_value_swappable: PatternList::from_file(&files.variable_value_swappable)?,
        })
    }

    /// Build rules directly from in-memory line lists, for tests and for
    /// embedding a default rule set without touching the filesystem.
    pub fn from_lines(
        header_ignore: &[&str],
        cookie_ignore: &[&str],
        query_parameter_name_ignore: &[&str],
        variable_name_ignore: &[&str],
        variable_name_swappable: &[&str],
        variable_value_swappable: &[&str],
    ) -> Result<Self> {
        Ok(Self {
            header_ignore: PatternList::from_lines(header_ignore.iter().copied())?,
            cookie_ignore: PatternList::from_lines(cookie_ignore.iter().copied())?,
            query_parameter_name_ignore: PatternList::from_lines(
                query_parameter_name_ignore.iter().copied(),
            )?,
            query_parameter_value_ignore: None,
            variable_name_ignore: PatternList::from_lines(variable_name_ignore.iter().copied())?,
            variable_name_swappable: PatternList::from_lines(
                variable_name_swappable.iter().copied(),
            )?,
            variable_value_swappable: PatternList::from_lines(
                variable_value_swappable.iter().copied(),
            )?,
        })
    }
}

/// Include/exclude knobs for the enumeration step of the candidate processor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnumerationFilters {
    pub swap_locations_include: Option<HashSet<String>>,
    pub swap_locations_exclude: Option<HashSet<String>>,
    #[serde(default)]
    pub swap_name_include: Vec<String>,
    #[serde(default)]
    pub swap_name_exclude: Vec<String>,
    #[serde(default)]
    pub swap_value_include: Vec<String>,
    #[serde(default)]
    pub swap_value_exclude: Vec<String>,
}

impl EnumerationFilters {
    pub fn name_include(&self) -> Result<Option<PatternList>> {
        optional_pattern_list(&self.swap_name_include)
    }

    pub fn name_exclude(&self) -> Result<Option<PatternList>> {
        optional_pattern_list(&self.swap_name_exclude)
    }

    pub fn value_include(&self) -> Result<Option<PatternList>> {
        optional_pattern_list(&self.swap_value_include)
    }

    pub fn value_exclude(&self) -> Result<Option<PatternList>> {
        optional_pattern_list(&self.swap_value_exclude)
    }
}

fn optional_pattern_list(lines: &[String]) -> Result<Option<PatternList>> {
    if lines.is_empty() {
        return Ok(None);
    }
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    Ok(Some(PatternList::from_lines(refs.iter().copied())?))
}

/// Configuration for the candidate processor (`spec.md` §6 "Configuration")
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Collapse variable occurrences that share the same captured value onto
    /// a single name before enumeration.
    pub unify_variable_names: bool,
    /// Upper bound on the number of randomized variable-subset
    /// configurations returned per candidate, beyond configuration #0.
    pub max_swaps: usize,
    /// Include/exclude filters applied during enumeration
    #[serde(default)]
    pub enumeration: EnumerationFilters,
    /// Seed combined with the candidate id to make enumeration deterministic
    pub seed: u64,
    /// Paths to the pattern files backing [`Rules`]
    pub patterns: PatternFilesConfig,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            unify_variable_names: true,
            max_swaps: 16,
            enumeration: EnumerationFilters::default(),
            seed: 34,
            patterns: PatternFilesConfig {
                header_ignore: "resources/headerignore.txt".to_string(),
                cookie_ignore: "resources/cookieignore.txt".to_string(),
                query_parameter_name_ignore: "resources/queryparameternameignore.txt"
                    .to_string(),
                query_parameter_value_ignore: None,
                variable_name_ignore: "resources/variablenameignore.txt".to_string(),
                variable_name_swappable: "resources/variablenameswappable.txt".to_string(),
                variable_value_swappable: "resources/variablevalueswappable.txt".to_string(),
            },
        }
    }
}

impl AnalyzerConfig {
    /// Load configuration from a TOML file, layered with `SWAP_`-prefixed
    /// environment variable overrides.
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("SWAP").separator("__"))
            .build()
            .map_err(|e| AnalyzerError::Other(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| AnalyzerError::Other(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_swaps == 0 {
            return Err(AnalyzerError::Other(
                "max_swaps must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn load_rules(&self) -> Result<Rules> {
        Rules::load(&self.patterns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = AnalyzerConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.max_swaps, 16);
        assert_eq!(cfg.seed, 34);
        assert!(cfg.unify_variable_names);
    }

    #[test]
    fn zero_max_swaps_is_invalid() {
        let mut cfg = AnalyzerConfig::default();
        cfg.max_swaps = 0;
        assert!(cfg.validate().is_err());
    }
}
