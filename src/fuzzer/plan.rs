//! Fuzz plans: what to send and how to judge the answers
//!
//! A plan is a JSON document holding either literal request descriptions or
//! a template with wordlists, plus the match rules and analysis options.
//!
//! ```json
//! {
//!   "template": {"method": "GET", "url": "/users/$id$"},
//!   "wordlists": {"id": ["1", "2", "admin"]},
//!   "iterator": "product",
//!   "match": {"mode": "match", "conditions": {"response-code": {"code": [200]}}},
//!   "analysis": ["response-code", "length-in-bytes"]
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::payloads::PayloadSet;
use super::substitution::IterationMode;
use crate::engine::{AnalysisOption, MatchSpec};
use crate::error::{ConfigError, SubstitutionError};

/// Inline words or a wordlist file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WordlistSource {
    Words(Vec<String>),
    File(PathBuf),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlanRequests {
    Literal {
        requests: Vec<Value>,
    },
    Template {
        template: Value,
        #[serde(default)]
        wordlists: HashMap<String, WordlistSource>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuzzPlan {
    #[serde(flatten)]
    pub requests: PlanRequests,

    #[serde(default)]
    pub iterator: IterationMode,

    #[serde(default, rename = "match", skip_serializing_if = "Option::is_none")]
    pub matcher: Option<MatchSpec>,

    #[serde(default)]
    pub analysis: Vec<AnalysisOption>,

    /// Overrides for the engine section of the configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency_limit: Option<usize>,
}

impl FuzzPlan {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::ParseError(format!("invalid fuzz plan: {}", e)))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Wordlists with files read; relative paths resolve against `base_dir`
    pub fn resolve_wordlists(&self, base_dir: Option<&Path>) -> Result<HashMap<String, Vec<String>>, SubstitutionError> {
        let PlanRequests::Template { wordlists, .. } = &self.requests else {
            return Ok(HashMap::new());
        };
        let mut resolved = HashMap::with_capacity(wordlists.len());
        for (name, source) in wordlists {
            let words = match source {
                WordlistSource::Words(words) => words.clone(),
                WordlistSource::File(path) => {
                    let path = match base_dir {
                        Some(dir) if path.is_relative() => dir.join(path),
                        _ => path.clone(),
                    };
                    PayloadSet::from_file(name, &path)?.payloads
                }
            };
            resolved.insert(name.clone(), words);
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MatchMode;
    use std::io::Write;

    #[test]
    fn test_literal_plan() {
        let plan = FuzzPlan::from_json(
            r#"{
                "requests": [{"method": "GET", "url": "http://a.local/"}],
                "match": ["hide", {"response-code": {"code": 404}}],
                "analysis": ["response-hash"],
                "workers": 2
            }"#,
        )
        .unwrap();
        assert!(matches!(plan.requests, PlanRequests::Literal { ref requests } if requests.len() == 1));
        assert_eq!(plan.matcher.as_ref().map(|m| m.mode), Some(MatchMode::Hide));
        assert_eq!(plan.analysis, vec![AnalysisOption::ResponseHash]);
        assert_eq!(plan.workers, Some(2));
        assert_eq!(plan.iterator, IterationMode::Product);
    }

    #[test]
    fn test_template_plan_with_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut words = std::fs::File::create(dir.path().join("ids.txt")).unwrap();
        writeln!(words, "1\n2\n# skip\n3").unwrap();

        let plan = FuzzPlan::from_json(
            r#"{
                "template": {"method": "GET", "url": "http://a.local/$id$/$v$"},
                "wordlists": {"id": "ids.txt", "$v$": ["x", "y"]},
                "iterator": "zip"
            }"#,
        )
        .unwrap();
        assert_eq!(plan.iterator, IterationMode::Zip);

        let lists = plan.resolve_wordlists(Some(dir.path())).unwrap();
        assert_eq!(lists["id"], vec!["1", "2", "3"]);
        assert_eq!(lists["$v$"], vec!["x", "y"]);
    }

    #[test]
    fn test_invalid_plan() {
        assert!(matches!(FuzzPlan::from_json("{\"workers\": 2}"), Err(ConfigError::ParseError(_))));
        assert!(FuzzPlan::load(Path::new("/nonexistent/plan.json")).is_err());
    }
}
