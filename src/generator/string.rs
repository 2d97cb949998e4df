//! String strategies: lengths, formats, patterns and enums

use base64::Engine as _;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, SecondsFormat, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, RngCore, SeedableRng};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::{Arc, OnceLock};

use super::regex_gen::PatternGenerator;
use super::strategy::{
    draw_length, filtered, from_fn, length_above, nothing, one_of, sampled_from, BoxedStrategy, DrawError,
};
use super::GenerationMode;
use crate::error::GeneratorError;

/// Default spread of generated lengths past the minimum
const LENGTH_SPREAD: usize = 32;

/// Candidates drawn when checking whether a pattern can be violated at all
const MISMATCH_PROBES: usize = 64;

/// Known `format` values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StringFormat {
    Date,
    DateTime,
    Password,
    Byte,
    Binary,
    Email,
    Uuid,
    Hostname,
    Ipv4,
    Ipv6,
}

impl StringFormat {
    /// `None` (with a debug log) for formats the generator does not know
    pub fn parse(name: &str) -> Option<Self> {
        let format = match name {
            "date" => StringFormat::Date,
            "date-time" => StringFormat::DateTime,
            "password" => StringFormat::Password,
            "byte" => StringFormat::Byte,
            "binary" => StringFormat::Binary,
            "email" => StringFormat::Email,
            "uuid" => StringFormat::Uuid,
            "hostname" => StringFormat::Hostname,
            "ipv4" => StringFormat::Ipv4,
            "ipv6" => StringFormat::Ipv6,
            other => {
                tracing::debug!(format = other, "Ignoring unknown string format");
                return None;
            }
        };
        Some(format)
    }

    /// Formats that accept any text have no wrong-format class
    pub fn can_be_violated(&self) -> bool {
        !matches!(self, StringFormat::Password | StringFormat::Binary)
    }

    pub fn matches(&self, s: &str) -> bool {
        match self {
            StringFormat::Date => {
                date_shape().is_match(s) && NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
            }
            StringFormat::DateTime => DateTime::parse_from_rfc3339(s).is_ok(),
            StringFormat::Password | StringFormat::Binary => true,
            StringFormat::Byte => base64::engine::general_purpose::STANDARD.decode(s).is_ok(),
            StringFormat::Email => email_shape().is_match(s),
            StringFormat::Uuid => uuid_shape().is_match(s),
            StringFormat::Hostname => hostname_shape().is_match(s),
            StringFormat::Ipv4 => s.parse::<Ipv4Addr>().is_ok(),
            StringFormat::Ipv6 => s.parse::<Ipv6Addr>().is_ok(),
        }
    }

    /// One random, well-formed value
    pub fn generate(&self, rng: &mut dyn RngCore) -> String {
        match self {
            StringFormat::Date => random_datetime(rng).format("%Y-%m-%d").to_string(),
            StringFormat::DateTime => random_datetime(rng).to_rfc3339_opts(SecondsFormat::Secs, true),
            StringFormat::Password => {
                let len = rng.gen_range(8..=24);
                random_text(rng, len, TextStyle::Ascii)
            }
            StringFormat::Byte => {
                let mut bytes = vec![0u8; rng.gen_range(0..=48)];
                rng.fill_bytes(&mut bytes);
                base64::engine::general_purpose::STANDARD.encode(bytes)
            }
            StringFormat::Binary => {
                let len = rng.gen_range(0..=48);
                random_text(rng, len, TextStyle::Mixed)
            }
            StringFormat::Email => {
                let local_len = rng.gen_range(1..=12);
                let mut local = random_from(rng, local_len, ALNUM);
                if rng.gen_bool(0.3) {
                    local.push('.');
                    local.push_str(&random_from(rng, 3, ALNUM));
                }
                format!("{}@{}", local, random_hostname(rng, 2))
            }
            StringFormat::Uuid => {
                let mut bytes = [0u8; 16];
                rng.fill_bytes(&mut bytes);
                uuid::Builder::from_random_bytes(bytes).into_uuid().to_string()
            }
            StringFormat::Hostname => random_hostname(rng, 1),
            StringFormat::Ipv4 => Ipv4Addr::from(rng.gen::<u32>()).to_string(),
            StringFormat::Ipv6 => Ipv6Addr::from(rng.gen::<u128>()).to_string(),
        }
    }
}

fn date_shape() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("Invalid regex"))
}

fn email_shape() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9!#$%&'*+/=?^_`{|}~-]+(?:\.[A-Za-z0-9!#$%&'*+/=?^_`{|}~-]+)*@(?:[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?\.)+[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?$")
            .expect("Invalid regex")
    })
}

fn uuid_shape() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
            .expect("Invalid regex")
    })
}

fn hostname_shape() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(([a-zA-Z]|[a-zA-Z][a-zA-Z0-9\-]*[a-zA-Z0-9])\.)*([A-Za-z]|[A-Za-z][A-Za-z0-9\-]*[A-Za-z0-9])$")
            .expect("Invalid regex")
    })
}

const ALNUM: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const SPECIALS: &[char] = &['\0', '\n', '\t', '"', '\'', '\\', '<', '>', '&', '%', '{', '}', '$', ';', '\u{feff}', '\u{202e}'];
const WIDE: &[char] = &['é', 'ß', 'Ж', 'λ', '中', '文', '日', 'ع', '🔥', '😀', '𝕏', '\u{10ffff}'];

fn random_from(rng: &mut dyn RngCore, len: usize, alphabet: &[u8]) -> String {
    (0..len)
        .map(|_| char::from(alphabet[rng.gen_range(0..alphabet.len())]))
        .collect()
}

fn random_hostname(rng: &mut dyn RngCore, min_labels: usize) -> String {
    let labels = rng.gen_range(min_labels..=min_labels + 2);
    (0..labels)
        .map(|_| {
            let len = rng.gen_range(1..=10);
            let mut label = random_from(rng, 1, LETTERS);
            label.push_str(&random_from(rng, len - 1, ALNUM));
            label
        })
        .collect::<Vec<_>>()
        .join(".")
}

fn random_datetime(rng: &mut dyn RngCore) -> DateTime<Utc> {
    let start = Utc.with_ymd_and_hms(1900, 1, 1, 0, 0, 0).single().unwrap_or_default();
    // 1900-01-01 through 2099-12-31
    let offset = rng.gen_range(0..6_311_347_200i64);
    start + ChronoDuration::seconds(offset)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextStyle {
    Ascii,
    /// Printable ASCII with some control, markup and non-BMP characters
    Mixed,
}

/// `len` Unicode scalar values
fn random_text(rng: &mut dyn RngCore, len: usize, style: TextStyle) -> String {
    (0..len)
        .map(|_| {
            let roll = rng.gen_range(0..20u8);
            match style {
                TextStyle::Mixed if roll == 0 => *SPECIALS.choose(rng).unwrap_or(&' '),
                TextStyle::Mixed if roll <= 2 => *WIDE.choose(rng).unwrap_or(&' '),
                _ => char::from(rng.gen_range(0x20u8..0x7f)),
            }
        })
        .collect()
}

/// Constraints on one string value
#[derive(Debug, Clone, Default)]
pub struct StringConstraints {
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub format: Option<StringFormat>,
    /// Regular expression searched anywhere in the value
    pub pattern: Option<String>,
    pub enum_values: Option<Vec<String>>,
}

impl StringConstraints {
    fn length_ok(&self, len: usize) -> bool {
        self.min_length.map_or(true, |m| len >= m) && self.max_length.map_or(true, |m| len <= m)
    }
}

/// Random text with a length drawn from `[min, max]`, close to `min`
fn text_between(min: usize, max: usize, style: TextStyle) -> BoxedStrategy {
    from_fn("text", move |rng| {
        let len = draw_length(rng, min, max, LENGTH_SPREAD);
        Ok(Value::String(random_text(rng, len, style)))
    })
}

pub fn string_strategy(
    c: &StringConstraints,
    mode: GenerationMode,
) -> Result<BoxedStrategy, GeneratorError> {
    let pattern = c
        .pattern
        .as_deref()
        .map(PatternGenerator::new)
        .transpose()?
        .map(Arc::new);

    Ok(match mode {
        GenerationMode::ValidOnly => valid_strings(c, pattern),
        GenerationMode::InvalidOnly => invalid_strings(c, pattern),
        GenerationMode::Both => one_of(vec![
            valid_strings(c, pattern.clone()),
            invalid_strings(c, pattern),
        ]),
    })
}

fn valid_strings(c: &StringConstraints, pattern: Option<Arc<PatternGenerator>>) -> BoxedStrategy {
    if let Some(values) = &c.enum_values {
        return sampled_from(values.iter().cloned().map(Value::String).collect());
    }

    let min = c.min_length.unwrap_or(0);
    let max = c.max_length.unwrap_or(min.saturating_add(LENGTH_SPREAD));
    if min > max {
        return nothing();
    }

    let base = match (&pattern, c.format) {
        (Some(p), _) => {
            let p = p.clone();
            from_fn("pattern", move |rng| {
                let mut s = p.generate(rng);
                // An unanchored pattern still matches once padded
                let len = s.chars().count();
                if len < min {
                    s.push_str(&random_from(rng, min - len, ALNUM));
                }
                Ok(Value::String(s))
            })
        }
        (None, Some(format)) => from_fn("format", move |rng| Ok(Value::String(format.generate(rng)))),
        (None, None) => text_between(min, max, TextStyle::Mixed),
    };

    let c = c.clone();
    filtered(base, move |v| {
        let Some(s) = v.as_str() else { return false };
        c.length_ok(s.chars().count())
            && c.format.map_or(true, |f| f.matches(s))
            && pattern.as_ref().map_or(true, |p| p.is_match(s))
    })
}

fn invalid_strings(c: &StringConstraints, pattern: Option<Arc<PatternGenerator>>) -> BoxedStrategy {
    if let Some(values) = &c.enum_values {
        return not_in_enum(values);
    }

    let mut classes = Vec::new();
    let spread_max = c
        .max_length
        .unwrap_or(c.min_length.unwrap_or(0).saturating_add(LENGTH_SPREAD));

    if let Some(min) = c.min_length.filter(|m| *m > 0) {
        classes.push(text_between(0, min - 1, TextStyle::Mixed));
    }
    match c.max_length.map(|max| (max, length_above(max))) {
        Some((_, Some(above))) => {
            classes.push(text_between(above, above + LENGTH_SPREAD, TextStyle::Mixed));
        }
        Some((max, None)) => tracing::debug!(max_length = max, "maxLength too large to exceed"),
        None => {}
    }
    if let Some(format) = c.format.filter(StringFormat::can_be_violated) {
        classes.push(filtered(
            text_between(0, spread_max, TextStyle::Mixed),
            move |v| v.as_str().is_some_and(|s| !format.matches(s)),
        ));
    }
    if let Some(p) = pattern {
        let candidates = text_between(0, spread_max, TextStyle::Mixed);
        let mut probe = StdRng::seed_from_u64(0);
        let violable = (0..MISMATCH_PROBES).any(|_| {
            candidates
                .draw(&mut probe)
                .ok()
                .and_then(|v| v.as_str().map(|s| !p.is_match(s)))
                .unwrap_or(false)
        });
        if violable {
            classes.push(filtered(candidates, move |v| v.as_str().is_some_and(|s| !p.is_match(s))));
        } else {
            tracing::debug!(pattern = p.source(), "Pattern accepts any text, no mismatch class");
        }
    }

    one_of(classes)
}

/// Strings outside an enum: near misses of its members and plain text
fn not_in_enum(values: &[String]) -> BoxedStrategy {
    let members: Arc<HashSet<String>> = Arc::new(values.iter().cloned().collect());
    let seeds: Vec<String> = values.to_vec();
    let near_miss = from_fn("enum near misses", move |rng| {
        let Some(seed) = seeds.choose(rng) else {
            return Err(DrawError::Exhausted(1));
        };
        let mutated = match rng.gen_range(0..4u8) {
            0 => seed.to_uppercase(),
            1 => format!("{} ", seed),
            2 => seed.chars().skip(1).collect(),
            _ => format!("{}{}", seed, random_text(rng, 1, TextStyle::Mixed)),
        };
        Ok(Value::String(mutated))
    });

    let outside = members.clone();
    one_of(vec![
        filtered(near_miss, move |v| v.as_str().is_some_and(|s| !outside.contains(s))),
        filtered(text_between(0, LENGTH_SPREAD, TextStyle::Mixed), move |v| {
            v.as_str().is_some_and(|s| !members.contains(s))
        }),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draw(c: &StringConstraints, mode: GenerationMode, n: usize) -> Vec<String> {
        string_strategy(c, mode)
            .unwrap()
            .samples(9)
            .take(n)
            .map(|v| v.as_str().unwrap().to_string())
            .collect()
    }

    fn enum_constraints() -> StringConstraints {
        StringConstraints {
            enum_values: Some(vec!["apple".into(), "banana".into(), "cherry".into()]),
            ..Default::default()
        }
    }

    #[test]
    fn test_enum_valid_and_invalid() {
        let c = enum_constraints();
        let valid = draw(&c, GenerationMode::ValidOnly, 50);
        assert_eq!(valid.len(), 50);
        assert!(valid.iter().all(|s| ["apple", "banana", "cherry"].contains(&s.as_str())));

        let invalid = draw(&c, GenerationMode::InvalidOnly, 50);
        assert_eq!(invalid.len(), 50);
        assert!(invalid.iter().all(|s| !["apple", "banana", "cherry"].contains(&s.as_str())));
    }

    #[test]
    fn test_length_and_pattern_valid() {
        let c = StringConstraints {
            min_length: Some(5),
            max_length: Some(10),
            pattern: Some(r"^[a-zA-Z]+$".into()),
            ..Default::default()
        };
        let re = Regex::new(r"^[a-zA-Z]+$").unwrap();
        let valid = draw(&c, GenerationMode::ValidOnly, 40);
        assert_eq!(valid.len(), 40);
        for s in valid {
            assert!((5..=10).contains(&s.chars().count()), "{:?}", s);
            assert!(re.is_match(&s));
        }
    }

    #[test]
    fn test_length_and_pattern_invalid() {
        let c = StringConstraints {
            min_length: Some(5),
            max_length: Some(10),
            pattern: Some(r"^[a-zA-Z]+$".into()),
            ..Default::default()
        };
        let re = Regex::new(r"^[a-zA-Z]+$").unwrap();
        let invalid = draw(&c, GenerationMode::InvalidOnly, 60);
        assert_eq!(invalid.len(), 60);
        for s in invalid {
            let len = s.chars().count();
            assert!(len < 5 || len > 10 || !re.is_match(&s), "{:?}", s);
        }
    }

    #[test]
    fn test_huge_max_length_stays_near_min() {
        let c = StringConstraints {
            min_length: Some(3),
            max_length: Some(2_147_483_647),
            ..Default::default()
        };
        let valid = draw(&c, GenerationMode::ValidOnly, 200);
        assert_eq!(valid.len(), 200);
        assert!(valid.iter().all(|s| (3..=3 + LENGTH_SPREAD).contains(&s.chars().count())));

        // Nothing can be longer than usize::MAX; only the too-short class is left
        let c = StringConstraints {
            min_length: Some(3),
            max_length: Some(usize::MAX),
            ..Default::default()
        };
        let invalid = draw(&c, GenerationMode::InvalidOnly, 50);
        assert_eq!(invalid.len(), 50);
        assert!(invalid.iter().all(|s| s.chars().count() < 3));

        let c = StringConstraints {
            max_length: Some(usize::MAX),
            ..Default::default()
        };
        assert!(string_strategy(&c, GenerationMode::InvalidOnly).unwrap().is_empty());
    }

    #[test]
    fn test_small_max_length_is_hit_exactly() {
        let c = StringConstraints {
            max_length: Some(100),
            ..Default::default()
        };
        let valid = draw(&c, GenerationMode::ValidOnly, 300);
        assert!(valid.iter().any(|s| s.chars().count() == 100));
        assert!(valid.iter().all(|s| s.chars().count() <= 100));
    }

    #[test]
    fn test_formats_generate_and_validate() {
        let mut rng = StdRng::seed_from_u64(1);
        for format in [
            StringFormat::Date,
            StringFormat::DateTime,
            StringFormat::Byte,
            StringFormat::Email,
            StringFormat::Uuid,
            StringFormat::Hostname,
            StringFormat::Ipv4,
            StringFormat::Ipv6,
        ] {
            for _ in 0..20 {
                let s = format.generate(&mut rng);
                assert!(format.matches(&s), "{:?} produced {:?}", format, s);
            }
            assert!(!format.matches("not valid at all!"), "{:?}", format);
        }
    }

    #[test]
    fn test_wrong_format_class() {
        let c = StringConstraints {
            format: Some(StringFormat::Email),
            ..Default::default()
        };
        let invalid = draw(&c, GenerationMode::InvalidOnly, 30);
        assert_eq!(invalid.len(), 30);
        assert!(invalid.iter().all(|s| !StringFormat::Email.matches(s)));

        let valid = draw(&c, GenerationMode::ValidOnly, 30);
        assert!(valid.iter().all(|s| StringFormat::Email.matches(s)));
    }

    #[test]
    fn test_lengths_count_chars() {
        let c = StringConstraints {
            min_length: Some(3),
            max_length: Some(3),
            ..Default::default()
        };
        for s in draw(&c, GenerationMode::ValidOnly, 100) {
            assert_eq!(s.chars().count(), 3);
        }
    }

    #[test]
    fn test_pattern_without_mismatches_has_no_class() {
        let c = StringConstraints {
            pattern: Some(".*".into()),
            ..Default::default()
        };
        assert!(string_strategy(&c, GenerationMode::InvalidOnly).unwrap().is_empty());
    }

    #[test]
    fn test_bad_pattern_fails_at_construction() {
        let c = StringConstraints {
            pattern: Some("([a-z".into()),
            ..Default::default()
        };
        assert!(matches!(
            string_strategy(&c, GenerationMode::ValidOnly),
            Err(GeneratorError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_unknown_format_is_ignored() {
        assert_eq!(StringFormat::parse("uri"), None);
        assert_eq!(StringFormat::parse("date-time"), Some(StringFormat::DateTime));
    }
}
