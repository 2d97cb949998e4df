//! Random strings from a regular expression
//!
//! Walks the high-level IR produced by `regex-syntax` and emits one random
//! string the pattern can match. Look-around assertions (anchors, word
//! boundaries) emit nothing, so callers re-check candidates against the
//! compiled regex.

use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use regex::{Regex, RegexBuilder};
use regex_syntax::hir::{Class, Hir, HirKind};
use regex_syntax::ParserBuilder;

use crate::error::GeneratorError;

/// Extra repetitions allowed past a repetition's minimum
const REPEAT_SPREAD: u32 = 8;

/// Inline flags a pattern may start with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatternFlags {
    pub case_insensitive: bool,
    pub multi_line: bool,
    pub dot_matches_new_line: bool,
}

/// Split a leading `(?ims)` group off a pattern
pub fn strip_inline_flags(pattern: &str) -> (PatternFlags, &str) {
    let mut flags = PatternFlags::default();
    let Some(rest) = pattern.strip_prefix("(?") else {
        return (flags, pattern);
    };
    let Some(end) = rest.find(')') else {
        return (flags, pattern);
    };
    let group = &rest[..end];
    if group.is_empty() || !group.chars().all(|c| matches!(c, 'i' | 'm' | 's')) {
        return (flags, pattern);
    }
    for c in group.chars() {
        match c {
            'i' => flags.case_insensitive = true,
            'm' => flags.multi_line = true,
            _ => flags.dot_matches_new_line = true,
        }
    }
    (flags, &rest[end + 1..])
}

/// A pattern compiled for both matching and generation
#[derive(Debug, Clone)]
pub struct PatternGenerator {
    source: String,
    regex: Regex,
    hir: Hir,
}

impl PatternGenerator {
    pub fn new(pattern: &str) -> Result<Self, GeneratorError> {
        let (flags, body) = strip_inline_flags(pattern);
        let invalid = |reason: String| GeneratorError::InvalidPattern {
            pattern: pattern.to_string(),
            reason,
        };

        let regex = RegexBuilder::new(body)
            .case_insensitive(flags.case_insensitive)
            .multi_line(flags.multi_line)
            .dot_matches_new_line(flags.dot_matches_new_line)
            .build()
            .map_err(|e| invalid(e.to_string()))?;

        let hir = ParserBuilder::new()
            .case_insensitive(flags.case_insensitive)
            .multi_line(flags.multi_line)
            .dot_matches_new_line(flags.dot_matches_new_line)
            .build()
            .parse(body)
            .map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            source: pattern.to_string(),
            regex,
            hir,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Unanchored search, as used for `pattern` constraints
    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// One random string produced by walking the pattern
    pub fn generate(&self, rng: &mut dyn RngCore) -> String {
        let mut out = String::new();
        emit(&self.hir, rng, &mut out);
        out
    }
}

fn emit(hir: &Hir, rng: &mut dyn RngCore, out: &mut String) {
    match hir.kind() {
        HirKind::Empty | HirKind::Look(_) => {}
        HirKind::Literal(lit) => out.push_str(&String::from_utf8_lossy(&lit.0)),
        HirKind::Class(class) => {
            if let Some(c) = pick_from_class(class, rng) {
                out.push(c);
            }
        }
        HirKind::Repetition(rep) => {
            let max = rep
                .max
                .unwrap_or(rep.min.saturating_add(REPEAT_SPREAD))
                .min(rep.min.saturating_add(REPEAT_SPREAD * 4));
            let count = rng.gen_range(rep.min..=max.max(rep.min));
            for _ in 0..count {
                emit(&rep.sub, rng, out);
            }
        }
        HirKind::Capture(capture) => emit(&capture.sub, rng, out),
        HirKind::Concat(parts) => {
            for part in parts {
                emit(part, rng, out);
            }
        }
        HirKind::Alternation(branches) => {
            if let Some(branch) = branches.choose(rng) {
                emit(branch, rng, out);
            }
        }
    }
}

/// Mostly printable ASCII when the class has any, otherwise anywhere in it
fn pick_from_class(class: &Class, rng: &mut dyn RngCore) -> Option<char> {
    match class {
        Class::Unicode(class) => {
            let ranges = class.ranges();
            let printable: Vec<char> = (0x20u8..0x7f)
                .map(char::from)
                .filter(|c| ranges.iter().any(|r| r.start() <= *c && *c <= r.end()))
                .collect();
            if !printable.is_empty() && rng.gen_bool(0.85) {
                return printable.choose(rng).copied();
            }
            let range = ranges.choose(rng)?;
            let (start, end) = (range.start() as u32, range.end() as u32);
            char::from_u32(rng.gen_range(start..=end)).or(Some(range.start()))
        }
        Class::Bytes(class) => {
            let ascii: Vec<u8> = class
                .ranges()
                .iter()
                .flat_map(|r| r.start()..=r.end())
                .filter(u8::is_ascii)
                .collect();
            ascii.choose(rng).map(|b| char::from(*b))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_strip_inline_flags() {
        let (flags, body) = strip_inline_flags("(?i)^abc$");
        assert!(flags.case_insensitive);
        assert!(!flags.multi_line);
        assert_eq!(body, "^abc$");

        let (flags, body) = strip_inline_flags("(?:ab)+");
        assert_eq!(flags, PatternFlags::default());
        assert_eq!(body, "(?:ab)+");
    }

    #[test]
    fn test_generated_strings_match() {
        let mut rng = StdRng::seed_from_u64(3);
        for pattern in [
            r"^[a-zA-Z]+$",
            r"^\d{3}-\d{2}-\d{4}$",
            r"^(foo|bar)_[0-9a-f]{2,6}$",
            r"^[A-Z][a-z]*(\s[A-Z][a-z]*)?$",
            r"(?i)^user-\w+$",
        ] {
            let generator = PatternGenerator::new(pattern).unwrap();
            for _ in 0..50 {
                let s = generator.generate(&mut rng);
                assert!(generator.is_match(&s), "{} produced {:?}", pattern, s);
            }
        }
    }

    #[test]
    fn test_unsupported_pattern_is_rejected() {
        let err = PatternGenerator::new(r"^(?=abc)").unwrap_err();
        assert!(matches!(err, GeneratorError::InvalidPattern { .. }));
        assert!(PatternGenerator::new("([a-z]").is_err());
    }
}
