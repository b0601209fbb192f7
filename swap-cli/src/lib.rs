//! Batch driver for the request-pair analyzer.
//!
//! Reads candidate pairs from a JSON Lines file, runs each one through
//! [`swap_analyzer::process_candidate`], and reports a result per line —
//! the same shape a downstream replay worker or a human triage review would
//! consume.

use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use swap_analyzer::{
    process_candidate, AnalyzerConfig, CandidateOutcome, IdentityFields, RequestInstance, Rules,
};

/// One HTTP request exactly as captured, before normalization.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: String,
}

/// One line of the input file: two captured requests from different
/// sessions, plus the identity fields of the session that produced `a`.
#[derive(Debug, Clone, Deserialize)]
pub struct CandidateInput {
    pub candidate_id: u64,
    pub instance_a: RawRequest,
    pub instance_b: RawRequest,
    #[serde(default)]
    pub identity: IdentityFields,
}

/// What came out of processing one candidate, serialized for the report.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateReport {
    pub candidate_id: u64,
    pub result: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable_names: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swap_config_count: Option<usize>,
}

pub fn load_config(path: Option<&str>) -> Result<AnalyzerConfig> {
    let config = match path {
        Some(p) => AnalyzerConfig::from_file(p).with_context(|| format!("loading config from {p}"))?,
        None => AnalyzerConfig::default(),
    };
    config.validate().context("validating configuration")?;
    Ok(config)
}

fn to_instance(id: &str, raw: &RawRequest) -> Result<RequestInstance> {
    RequestInstance::from_request(id, &raw.method, &raw.url, &raw.headers, &raw.body)
        .with_context(|| format!("normalizing request instance '{id}'"))
}

/// Process every candidate in `input_path`, one JSON object per line.
pub fn run_batch(input_path: &Path, config: &AnalyzerConfig, rules: &Rules) -> Result<Vec<CandidateReport>> {
    let file = std::fs::File::open(input_path)
        .with_context(|| format!("opening {}", input_path.display()))?;
    let reader = BufReader::new(file);

    let mut reports = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading line {}", line_no + 1))?;
        if line.trim().is_empty() {
            continue;
        }

        let input: CandidateInput = serde_json::from_str(&line)
            .with_context(|| format!("parsing candidate on line {}", line_no + 1))?;

        reports.push(process_one(&input, config, rules));
    }

    Ok(reports)
}

fn process_one(input: &CandidateInput, config: &AnalyzerConfig, rules: &Rules) -> CandidateReport {
    let a = match to_instance(&format!("{}-a", input.candidate_id), &input.instance_a) {
        Ok(a) => a,
        Err(e) => return errored_report(input.candidate_id, e.to_string()),
    };
    let b = match to_instance(&format!("{}-b", input.candidate_id), &input.instance_b) {
        Ok(b) => b,
        Err(e) => return errored_report(input.candidate_id, e.to_string()),
    };

    let outcome = process_candidate(&a, &b, &input.identity, rules, config, input.candidate_id);

    match outcome {
        CandidateOutcome::NoVariables => CandidateReport {
            candidate_id: input.candidate_id,
            result: "cpn".to_string(),
            error: None,
            template_hash: None,
            variable_names: None,
            swap_config_count: None,
        },
        CandidateOutcome::InsufficientVariation => CandidateReport {
            candidate_id: input.candidate_id,
            result: "cpi".to_string(),
            error: None,
            template_hash: None,
            variable_names: None,
            swap_config_count: None,
        },
        CandidateOutcome::Errored(e) => errored_report(input.candidate_id, e.to_string()),
        CandidateOutcome::Valid {
            swap_request,
            configs,
            ..
        } => {
            let hash = swap_request.hash().ok();
            let names: Vec<String> = swap_request.template.variable_names().into_iter().collect();
            CandidateReport {
                candidate_id: input.candidate_id,
                result: "cpv".to_string(),
                error: None,
                template_hash: hash,
                variable_names: Some(names),
                swap_config_count: Some(configs.len()),
            }
        }
    }
}

fn errored_report(candidate_id: u64, error: String) -> CandidateReport {
    CandidateReport {
        candidate_id,
        result: "cpe".to_string(),
        error: Some(error),
        template_hash: None,
        variable_names: None,
        swap_config_count: None,
    }
}

/// Per-list rule counts, used by the `check-patterns` subcommand to sanity
/// check a configuration before a real run.
#[derive(Debug, Serialize)]
pub struct PatternReport {
    pub header_ignore: usize,
    pub cookie_ignore: usize,
    pub query_parameter_name_ignore: usize,
    pub query_parameter_value_ignore: usize,
    pub variable_name_ignore: usize,
    pub variable_name_swappable: usize,
    pub variable_value_swappable: usize,
}

pub fn check_patterns(rules: &Rules) -> PatternReport {
    PatternReport {
        header_ignore: rules.header_ignore.len(),
        cookie_ignore: rules.cookie_ignore.len(),
        query_parameter_name_ignore: rules.query_parameter_name_ignore.len(),
        query_parameter_value_ignore: rules
            .query_parameter_value_ignore
            .as_ref()
            .map(|p| p.len())
            .unwrap_or(0),
        variable_name_ignore: rules.variable_name_ignore.len(),
        variable_name_swappable: rules.variable_name_swappable.len(),
        variable_value_swappable: rules.variable_value_swappable.len(),
    }
}

pub fn write_reports(reports: &[CandidateReport], out: &mut dyn Write) -> Result<()> {
    for report in reports {
        let line = serde_json::to_string(report)?;
        writeln!(out, "{line}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn batch_reports_one_line_per_candidate() {
        let mut file = tempfile_with_content(
            r#"{"candidate_id":1,"instance_a":{"method":"GET","url":"/api/users/u101"},"instance_b":{"method":"GET","url":"/api/users/u202"}}
"#,
        );
        let config = AnalyzerConfig::default();
        let rules = Rules::from_lines(&[], &[], &[], &[], &["^url_path"], &[]).unwrap();

        let reports = run_batch(file.path(), &config, &rules).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].result, "cpv");

        let _ = file.flush();
    }

    fn tempfile_with_content(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }
}
