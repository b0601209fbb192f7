//! The candidate processor: turns a pair of captured requests into a set of
//! ready-to-replay swap configurations, or a reason it couldn't.
//!
//! This is the single entry point the rest of the crate exists to support:
//! preflight, diff, classify, unify, template, enumerate, in that order.
//! Each step can downgrade the outcome rather than abort the whole batch —
//! a caller processing thousands of pairs wants a result code per pair, not
//! a `Result::Err` that stops the run.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::classifier::{identity_keywords, should_swap, IdentityFields};
use crate::config::{AnalyzerConfig, EnumerationFilters, Rules};
use crate::error::{AnalyzerError, Result};
use crate::normalize::normalize_name;
use crate::patterns::Mode;
use crate::request::{diff_instances, FieldDiff, RequestInstance};
use crate::swap_request::{SwapRequest, SwapVariableSpec};

/// The result code attached to a processed candidate, mirroring the
/// original implementation's `cpn`/`cpi`/`cpv`/`cpe` vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultCode {
    /// `cpn` — no differing field was classified as a swap variable.
    NoVariables,
    /// `cpi` — variables were classified, but enumeration produced no
    /// usable substitution configuration (e.g. every candidate variable was
    /// filtered out by the configured include/exclude rules).
    InsufficientVariation,
    /// `cpv` — a template and at least one swap configuration were built.
    Valid,
    /// `cpe` — the pair could not be compared or templated at all.
    Errored,
}

impl ResultCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultCode::NoVariables => "cpn",
            ResultCode::InsufficientVariation => "cpi",
            ResultCode::Valid => "cpv",
            ResultCode::Errored => "cpe",
        }
    }
}

/// One bounded substitution plan: which variables get instance two's value,
/// with everything else held at instance one's value. Configuration zero is
/// always "swap everything".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapConfig {
    pub swapped_variables: BTreeSet<String>,
}

impl SwapConfig {
    pub fn substitutions(&self, variables: &[SwapVariableSpec]) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for v in variables {
            let use_second = self.swapped_variables.contains(&v.name);
            let chosen = if use_second { &v.value2 } else { &v.value1 };
            out.insert(v.name.clone(), scalar_to_string(chosen));
        }
        out
    }
}

fn scalar_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The outcome of processing one candidate pair.
pub enum CandidateOutcome {
    NoVariables,
    InsufficientVariation,
    Valid {
        swap_request: SwapRequest,
        variables: Vec<SwapVariableSpec>,
        configs: Vec<SwapConfig>,
    },
    Errored(AnalyzerError),
}

impl CandidateOutcome {
    pub fn result_code(&self) -> ResultCode {
        match self {
            CandidateOutcome::NoVariables => ResultCode::NoVariables,
            CandidateOutcome::InsufficientVariation => ResultCode::InsufficientVariation,
            CandidateOutcome::Valid { .. } => ResultCode::Valid,
            CandidateOutcome::Errored(_) => ResultCode::Errored,
        }
    }
}

/// Cheap checks run before any structural comparison: different HTTP
/// methods, or a pair with nothing in the path to compare, is never worth
/// the cost of a full diff.
fn preflight(a: &RequestInstance, b: &RequestInstance) -> Result<()> {
    if a.method != b.method {
        return Err(AnalyzerError::DiffingOutOfScope(format!(
            "methods differ: {} vs {}",
            a.method, b.method
        )));
    }
    if a.url_path.is_empty() && b.url_path.is_empty() {
        return Err(AnalyzerError::DiffingOutOfScope(
            "both requests target the root path".to_string(),
        ));
    }
    Ok(())
}

fn classify(diffs: Vec<FieldDiff>, identity: &IdentityFields, rules: &Rules) -> Vec<SwapVariableSpec> {
    let keywords = identity_keywords(identity);
    diffs
        .into_iter()
        .filter(|d| should_swap(&d.name, &d.value1, &keywords, rules))
        .map(|d| SwapVariableSpec {
            field_key: d.name.clone(),
            name: normalize_name(&d.name),
            location: d.location,
            value1: d.value1,
            value2: d.value2,
        })
        .collect()
}

/// Collapse variables that share the same captured value1 onto a single
/// name, first-seen wins. Reduces redundant axes of variation before
/// enumeration — e.g. a `user_id` repeated verbatim in both the URL and a
/// body field should move together, not be treated as two independent
/// dimensions. Only `name`, the externally-visible identifier, is unified;
/// `field_key` keeps pointing at each variable's own original location so
/// template construction can still find it.
fn unify_variable_names(variables: Vec<SwapVariableSpec>) -> Vec<SwapVariableSpec> {
    let mut canonical: HashMap<String, String> = HashMap::new();
    variables
        .into_iter()
        .map(|mut v| {
            let key = scalar_to_string(&v.value1);
            let name = canonical.entry(key).or_insert_with(|| v.name.clone()).clone();
            v.name = name;
            v
        })
        .collect()
}

fn passes_enumeration_filters(v: &SwapVariableSpec, filters: &EnumerationFilters) -> Result<bool> {
    if let Some(include) = &filters.swap_locations_include {
        if !include.contains(v.location.as_str()) {
            return Ok(false);
        }
    }
    if let Some(exclude) = &filters.swap_locations_exclude {
        if exclude.contains(v.location.as_str()) {
            return Ok(false);
        }
    }
    if let Some(include) = filters.name_include()? {
        if !include.matches(&v.name, Mode::Search) {
            return Ok(false);
        }
    }
    if let Some(exclude) = filters.name_exclude()? {
        if exclude.matches(&v.name, Mode::Search) {
            return Ok(false);
        }
    }
    let value = scalar_to_string(&v.value1);
    if let Some(include) = filters.value_include()? {
        if !include.matches(&value, Mode::Search) {
            return Ok(false);
        }
    }
    if let Some(exclude) = filters.value_exclude()? {
        if exclude.matches(&value, Mode::Search) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Build up to `max_swaps` substitution configurations: configuration zero
/// always swaps every variable at once, the rest are deterministically
/// random non-empty proper subsets, seeded by `seed + candidate_id` so the
/// same pair always enumerates the same way.
fn enumerate_configs(names: &[String], max_swaps: usize, seed: u64, candidate_id: u64) -> Vec<SwapConfig> {
    let all: BTreeSet<String> = names.iter().cloned().collect();
    let mut configs = vec![SwapConfig {
        swapped_variables: all.clone(),
    }];

    if names.len() < 2 || max_swaps <= 1 {
        return configs;
    }

    let combined_seed = seed.wrapping_add(candidate_id);
    let mut rng = StdRng::seed_from_u64(combined_seed);

    let mut seen: BTreeSet<BTreeSet<String>> = BTreeSet::new();
    seen.insert(all.clone());

    let wanted = max_swaps - 1;
    let max_attempts = wanted.saturating_mul(20).max(50);
    let mut attempts = 0;

    while configs.len() < max_swaps && attempts < max_attempts {
        attempts += 1;
        let size = rng.gen_range(1..names.len());
        let mut shuffled = names.to_vec();
        shuffled.shuffle(&mut rng);
        let subset: BTreeSet<String> = shuffled.into_iter().take(size).collect();

        if seen.insert(subset.clone()) {
            configs.push(SwapConfig {
                swapped_variables: subset,
            });
        }
    }

    configs
}

/// Process one candidate request pair end to end.
pub fn process_candidate(
    base: &RequestInstance,
    other: &RequestInstance,
    identity: &IdentityFields,
    rules: &Rules,
    config: &AnalyzerConfig,
    candidate_id: u64,
) -> CandidateOutcome {
    if let Err(e) = preflight(base, other) {
        return CandidateOutcome::Errored(e);
    }

    let diffs = match diff_instances(base, other, rules) {
        Ok(d) => d,
        Err(e) => return CandidateOutcome::Errored(e),
    };

    let mut variables = classify(diffs, identity, rules);
    if variables.is_empty() {
        return CandidateOutcome::NoVariables;
    }

    if config.unify_variable_names {
        variables = unify_variable_names(variables);
    }

    let mut filtered = Vec::new();
    for v in variables {
        match passes_enumeration_filters(&v, &config.enumeration) {
            Ok(true) => filtered.push(v),
            Ok(false) => {}
            Err(e) => return CandidateOutcome::Errored(e),
        }
    }

    if filtered.is_empty() {
        return CandidateOutcome::InsufficientVariation;
    }

    // Deduplicate unified names while preserving first-seen order for a
    // deterministic enumeration pass.
    let mut seen_names = BTreeSet::new();
    let names: Vec<String> = filtered
        .iter()
        .map(|v| v.name.clone())
        .filter(|n| seen_names.insert(n.clone()))
        .collect();

    let swap_request = match SwapRequest::build(base, &filtered, other) {
        Ok(sr) => sr,
        // a variable that resolves to conflicting values across its
        // locations is recoverable at the batch level: the pair simply
        // didn't carry enough consistent variation to template, not a
        // hard failure.
        Err(AnalyzerError::MultipleValuesForVariable(_)) => {
            return CandidateOutcome::InsufficientVariation
        }
        Err(e) => return CandidateOutcome::Errored(e),
    };

    let configs = enumerate_configs(&names, config.max_swaps, config.seed, candidate_id);

    CandidateOutcome::Valid {
        swap_request,
        variables: filtered,
        configs,
    }
}
