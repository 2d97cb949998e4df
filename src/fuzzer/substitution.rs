//! Fuzz-point substitution
//!
//! A template is any JSON value whose strings (object keys included) contain
//! `$name$` fuzz points. Each fuzz point gets a wordlist; the expansion walks
//! the wordlists in product or zip order and yields one substituted copy of
//! the template per combination.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::error::SubstitutionError;

/// How wordlists combine into substitution rounds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IterationMode {
    /// Cartesian product, last fuzz point varying fastest
    #[default]
    Product,
    /// Parallel walk that ends with the shortest wordlist
    Zip,
}

impl fmt::Display for IterationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IterationMode::Product => write!(f, "product"),
            IterationMode::Zip => write!(f, "zip"),
        }
    }
}

impl FromStr for IterationMode {
    type Err = SubstitutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "product" => Ok(IterationMode::Product),
            "zip" => Ok(IterationMode::Zip),
            other => Err(SubstitutionError::BadInput(format!("unknown iterator '{}'", other))),
        }
    }
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\w+\$").expect("valid placeholder regex"))
}

fn collect(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.extend(placeholder_regex().find_iter(s).map(|m| m.as_str().to_string())),
        Value::Array(items) => items.iter().for_each(|item| collect(item, out)),
        Value::Object(map) => {
            for (key, item) in map {
                out.extend(placeholder_regex().find_iter(key).map(|m| m.as_str().to_string()));
                collect(item, out);
            }
        }
        _ => {}
    }
}

/// Every fuzz point occurrence in document order, duplicates included
pub fn find_placeholders(template: &Value) -> Vec<String> {
    let mut out = Vec::new();
    collect(template, &mut out);
    out
}

fn substitute_str(s: &str, words: &HashMap<&str, &str>) -> String {
    placeholder_regex()
        .replace_all(s, |caps: &regex::Captures<'_>| {
            let found = &caps[0];
            words.get(found).copied().unwrap_or(found).to_string()
        })
        .into_owned()
}

/// Copy of `template` with each known fuzz point replaced by its word
pub fn substitute(template: &Value, words: &HashMap<&str, &str>) -> Value {
    match template {
        Value::String(s) => Value::String(substitute_str(s, words)),
        Value::Array(items) => Value::Array(items.iter().map(|item| substitute(item, words)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (substitute_str(key, words), substitute(item, words)))
                .collect::<Map<String, Value>>(),
        ),
        other => other.clone(),
    }
}

/// `name`, `$name` or `$name$` all refer to the fuzz point `$name$`
fn normalise_key(key: &str) -> String {
    format!("${}$", key.trim_matches('$'))
}

/// A validated template: fuzz points are unique
#[derive(Debug, Clone)]
pub struct FuzzTemplate {
    template: Value,
    placeholders: Vec<String>,
}

impl FuzzTemplate {
    pub fn new(template: Value) -> Result<Self, SubstitutionError> {
        let placeholders = find_placeholders(&template);
        for (i, p) in placeholders.iter().enumerate() {
            if placeholders[..i].contains(p) {
                return Err(SubstitutionError::BadInput(format!(
                    "fuzz point {} appears more than once",
                    p
                )));
            }
        }
        Ok(Self { template, placeholders })
    }

    /// Fuzz points in order of first appearance
    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }

    pub fn template(&self) -> &Value {
        &self.template
    }

    /// Lazily expand against `wordlists`, which must cover every fuzz point
    /// and nothing else.
    pub fn expand(
        &self,
        wordlists: &HashMap<String, Vec<String>>,
        mode: IterationMode,
    ) -> Result<Expansion, SubstitutionError> {
        if wordlists.len() != self.placeholders.len() {
            return Err(SubstitutionError::BadInput(format!(
                "template has {} fuzz points but {} wordlists were given",
                self.placeholders.len(),
                wordlists.len()
            )));
        }
        let by_point: HashMap<String, &Vec<String>> =
            wordlists.iter().map(|(k, v)| (normalise_key(k), v)).collect();
        let ordered = self
            .placeholders
            .iter()
            .map(|p| {
                by_point
                    .get(p)
                    .map(|list| (*list).clone())
                    .ok_or_else(|| SubstitutionError::BadInput(format!("no wordlist for fuzz point {}", p)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            fuzz_points = self.placeholders.len(),
            iterator = %mode,
            "Expanding fuzz template"
        );
        Ok(Expansion::new(self.clone(), ordered, mode))
    }
}

/// Iterator over substituted templates
pub struct Expansion {
    template: FuzzTemplate,
    wordlists: Vec<Vec<String>>,
    mode: IterationMode,
    cursor: Vec<usize>,
    done: bool,
}

impl Expansion {
    fn new(template: FuzzTemplate, wordlists: Vec<Vec<String>>, mode: IterationMode) -> Self {
        let done = match mode {
            IterationMode::Product => wordlists.iter().any(Vec::is_empty),
            // zip over nothing yields nothing
            IterationMode::Zip => wordlists.is_empty() || wordlists.iter().any(Vec::is_empty),
        };
        Self {
            cursor: vec![0; wordlists.len()],
            template,
            wordlists,
            mode,
            done,
        }
    }

    /// Number of combinations, when it fits in a usize
    pub fn total(&self) -> Option<usize> {
        match self.mode {
            IterationMode::Product => self.wordlists.iter().try_fold(1usize, |acc, l| acc.checked_mul(l.len())),
            IterationMode::Zip => Some(self.wordlists.iter().map(Vec::len).min().unwrap_or(0)),
        }
    }

    fn advance(&mut self) {
        match self.mode {
            IterationMode::Zip => {
                let next = self.cursor.first().copied().unwrap_or(0) + 1;
                self.cursor.iter_mut().for_each(|c| *c = next);
                self.done = self.wordlists.iter().any(|l| next >= l.len());
            }
            IterationMode::Product => {
                for i in (0..self.cursor.len()).rev() {
                    self.cursor[i] += 1;
                    if self.cursor[i] < self.wordlists[i].len() {
                        return;
                    }
                    self.cursor[i] = 0;
                }
                // Every position wrapped (or there were none)
                self.done = true;
            }
        }
    }
}

impl Iterator for Expansion {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        if self.done {
            return None;
        }
        let words: HashMap<&str, &str> = self
            .template
            .placeholders
            .iter()
            .zip(&self.cursor)
            .zip(&self.wordlists)
            .map(|((p, i), list)| (p.as_str(), list[*i].as_str()))
            .collect();
        let item = substitute(&self.template.template, &words);
        self.advance();
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lists(entries: Vec<(&str, Vec<&str>)>) -> HashMap<String, Vec<String>> {
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.into_iter().map(str::to_string).collect()))
            .collect()
    }

    #[test]
    fn test_find_placeholders_in_keys_and_values() {
        let template = json!({
            "url": "/users/$id$",
            "headers": {"X-$hdr$": "v"},
            "json": {"items": ["$item$", 3]}
        });
        assert_eq!(find_placeholders(&template), vec!["$id$", "$hdr$", "$item$"]);
    }

    #[test]
    fn test_product_order() {
        let template = FuzzTemplate::new(json!({"url": "/$a$/$b$"})).unwrap();
        let out: Vec<String> = template
            .expand(&lists(vec![("$a$", vec!["1", "2"]), ("b", vec!["x", "y", "z"])]), IterationMode::Product)
            .unwrap()
            .map(|v| v["url"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(out, vec!["/1/x", "/1/y", "/1/z", "/2/x", "/2/y", "/2/z"]);
    }

    #[test]
    fn test_zip_stops_at_shortest() {
        let template = FuzzTemplate::new(json!({"url": "/$a$", "content": "$b$"})).unwrap();
        let expansion = template
            .expand(&lists(vec![("a", vec!["1", "2", "3"]), ("$b", vec!["x", "y"])]), IterationMode::Zip)
            .unwrap();
        assert_eq!(expansion.total(), Some(2));
        let out: Vec<Value> = expansion.collect();
        assert_eq!(out, vec![json!({"url": "/1", "content": "x"}), json!({"url": "/2", "content": "y"})]);
    }

    #[test]
    fn test_words_do_not_break_json() {
        let template = FuzzTemplate::new(json!({"json": {"name": "$n$"}})).unwrap();
        let out: Vec<Value> = template
            .expand(&lists(vec![("n", vec!["\"quoted\" \\ value"])]), IterationMode::Product)
            .unwrap()
            .collect();
        assert_eq!(out[0]["json"]["name"], "\"quoted\" \\ value");
    }

    #[test]
    fn test_bad_input() {
        assert!(matches!(
            FuzzTemplate::new(json!({"url": "/$a$/$a$"})),
            Err(SubstitutionError::BadInput(_))
        ));

        let template = FuzzTemplate::new(json!({"url": "/$a$"})).unwrap();
        assert!(template.expand(&lists(vec![]), IterationMode::Product).is_err());
        assert!(template
            .expand(&lists(vec![("a", vec!["1"]), ("b", vec!["2"])]), IterationMode::Product)
            .is_err());
        assert!(template.expand(&lists(vec![("c", vec!["1"])]), IterationMode::Product).is_err());
    }

    #[test]
    fn test_no_fuzz_points() {
        let template = FuzzTemplate::new(json!({"url": "/plain"})).unwrap();
        let product: Vec<Value> = template.expand(&lists(vec![]), IterationMode::Product).unwrap().collect();
        assert_eq!(product, vec![json!({"url": "/plain"})]);
        assert_eq!(template.expand(&lists(vec![]), IterationMode::Zip).unwrap().count(), 0);
    }

    #[test]
    fn test_empty_wordlist_yields_nothing() {
        let template = FuzzTemplate::new(json!({"url": "/$a$/$b$"})).unwrap();
        let n = template
            .expand(&lists(vec![("a", vec!["1"]), ("b", vec![])]), IterationMode::Product)
            .unwrap()
            .count();
        assert_eq!(n, 0);
    }

    #[test]
    fn test_iteration_mode_parse() {
        assert_eq!("ZIP".parse::<IterationMode>().unwrap(), IterationMode::Zip);
        assert!("interleave".parse::<IterationMode>().is_err());
    }
}
