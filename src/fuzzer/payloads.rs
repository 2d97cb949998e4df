//! Wordlists feeding fuzz points

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::SubstitutionError;

/// Words for one fuzz point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadSet {
    /// Fuzz point the words belong to
    pub name: String,
    pub payloads: Vec<String>,
}

impl PayloadSet {
    pub fn new(name: &str, payloads: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            payloads,
        }
    }

    /// One word per line; blank lines and `#` comments are skipped
    pub fn from_file(name: &str, path: &Path) -> Result<Self, SubstitutionError> {
        let wordlist_error = |source| SubstitutionError::Wordlist {
            path: path.display().to_string(),
            source,
        };
        let file = File::open(path).map_err(wordlist_error)?;
        let reader = BufReader::new(file);

        let mut payloads = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(wordlist_error)?;
            let word = line.trim_end_matches('\r');
            if word.trim().is_empty() || word.starts_with('#') {
                continue;
            }
            payloads.push(word.to_string());
        }

        tracing::debug!(name, path = %path.display(), words = payloads.len(), "Loaded wordlist");
        Ok(Self::new(name, payloads))
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.payloads.iter()
    }

    /// Keyed the way template expansion expects
    pub fn into_map(sets: impl IntoIterator<Item = PayloadSet>) -> HashMap<String, Vec<String>> {
        sets.into_iter().map(|set| (set.name, set.payloads)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_from_file_skips_blanks_and_comments() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# usernames").unwrap();
        writeln!(file, "admin").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "   ").unwrap();
        writeln!(file, "root\r").unwrap();
        writeln!(file, "  spaced  ").unwrap();

        let set = PayloadSet::from_file("user", file.path()).unwrap();
        assert_eq!(set.payloads, vec!["admin", "root", "  spaced  "]);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_missing_file() {
        let err = PayloadSet::from_file("x", Path::new("/nonexistent/words.txt")).unwrap_err();
        assert!(matches!(err, SubstitutionError::Wordlist { .. }));
    }

    #[test]
    fn test_into_map() {
        let map = PayloadSet::into_map(vec![
            PayloadSet::new("$a$", vec!["1".into()]),
            PayloadSet::new("b", vec![]),
        ]);
        assert_eq!(map.len(), 2);
        assert_eq!(map["$a$"], vec!["1".to_string()]);
    }
}
