//! Response matching and analysis
//!
//! A [`ResponseAnalyser`] holds optional match/hide conditions and a list of
//! analysis options. `analyse` rejects responses that fail the conditions and
//! returns the requested metrics for the rest. It is a pure function of the
//! response: no clock reads, no randomness.

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use crate::error::ResponseNotMatched;
use crate::http::Response;

/// What can be measured on a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisOption {
    LengthInWords,
    LengthInChars,
    LengthInBytes,
    LengthInLines,
    ResponseHeader,
    ResponseCode,
    ResponseElapsedTime,
    ValueInResponse,
    SensitiveInfo,
    ResponseHash,
}

impl AnalysisOption {
    pub fn all() -> &'static [AnalysisOption] {
        &[
            AnalysisOption::LengthInWords,
            AnalysisOption::LengthInChars,
            AnalysisOption::LengthInBytes,
            AnalysisOption::LengthInLines,
            AnalysisOption::ResponseHeader,
            AnalysisOption::ResponseCode,
            AnalysisOption::ResponseElapsedTime,
            AnalysisOption::ValueInResponse,
            AnalysisOption::SensitiveInfo,
            AnalysisOption::ResponseHash,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisOption::LengthInWords => "length-in-words",
            AnalysisOption::LengthInChars => "length-in-chars",
            AnalysisOption::LengthInBytes => "length-in-bytes",
            AnalysisOption::LengthInLines => "length-in-lines",
            AnalysisOption::ResponseHeader => "response-header",
            AnalysisOption::ResponseCode => "response-code",
            AnalysisOption::ResponseElapsedTime => "response-elapsed-time",
            AnalysisOption::ValueInResponse => "value-in-response",
            AnalysisOption::SensitiveInfo => "sensitive-info",
            AnalysisOption::ResponseHash => "response-hash",
        }
    }
}

impl FromStr for AnalysisOption {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AnalysisOption::all()
            .iter()
            .copied()
            .find(|o| o.as_str() == s)
            .ok_or_else(|| format!("unknown analysis option '{}'", s))
    }
}

impl fmt::Display for AnalysisOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Keep responses that satisfy every condition
    Match,
    /// Drop responses that satisfy any condition
    Hide,
}

/// Parameters of one condition; which fields apply depends on the option
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionParams {
    /// Status codes (`response-code`)
    #[serde(deserialize_with = "one_or_many")]
    pub code: Vec<u16>,
    /// Inclusive lower bound (lengths, elapsed seconds)
    pub min: Option<f64>,
    /// Inclusive upper bound (lengths, elapsed seconds)
    pub max: Option<f64>,
    /// Required headers; an empty value only checks presence
    pub headers: BTreeMap<String, String>,
    /// Substring (`value-in-response`) or expected hash (`response-hash`)
    pub value: Option<String>,
    /// Sensitive categories, any of which must be found
    pub info: Vec<String>,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(u16),
        Many(Vec<u16>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(code) => vec![code],
        OneOrMany::Many(codes) => codes,
    })
}

/// Match/hide rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MatchSpecRepr")]
pub struct MatchSpec {
    pub mode: MatchMode,
    pub conditions: BTreeMap<AnalysisOption, ConditionParams>,
}

/// Accepts `{"mode": "match", "conditions": {...}}` or `["match", {...}]`
#[derive(Deserialize)]
#[serde(untagged)]
enum MatchSpecRepr {
    Struct {
        mode: MatchMode,
        #[serde(default)]
        conditions: BTreeMap<String, ConditionParams>,
    },
    Pair(MatchMode, BTreeMap<String, ConditionParams>),
}

impl TryFrom<MatchSpecRepr> for MatchSpec {
    type Error = String;

    fn try_from(repr: MatchSpecRepr) -> Result<Self, Self::Error> {
        let (mode, raw) = match repr {
            MatchSpecRepr::Struct { mode, conditions } => (mode, conditions),
            MatchSpecRepr::Pair(mode, conditions) => (mode, conditions),
        };
        let conditions = raw
            .into_iter()
            .map(|(k, v)| k.parse::<AnalysisOption>().map(|o| (o, v)))
            .collect::<Result<_, _>>()?;
        Ok(Self { mode, conditions })
    }
}

impl MatchSpec {
    pub fn new(mode: MatchMode) -> Self {
        Self {
            mode,
            conditions: BTreeMap::new(),
        }
    }

    pub fn with_condition(mut self, option: AnalysisOption, params: ConditionParams) -> Self {
        self.conditions.insert(option, params);
        self
    }
}

/// Categories of sensitive data found in a body
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SensitiveCategory {
    CardNumber16,
    CreditCard,
    Ssn,
    Email,
    InternationalPhone,
    Password,
    ApiKey,
    DateOfBirth,
}

impl SensitiveCategory {
    pub fn all() -> &'static [SensitiveCategory] {
        &[
            SensitiveCategory::CardNumber16,
            SensitiveCategory::CreditCard,
            SensitiveCategory::Ssn,
            SensitiveCategory::Email,
            SensitiveCategory::InternationalPhone,
            SensitiveCategory::Password,
            SensitiveCategory::ApiKey,
            SensitiveCategory::DateOfBirth,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            SensitiveCategory::CardNumber16 => "16 digits credit card numbers",
            SensitiveCategory::CreditCard => "Credit card numbers",
            SensitiveCategory::Ssn => "Social Security Numbers",
            SensitiveCategory::Email => "Email Addresses",
            SensitiveCategory::InternationalPhone => "International phone numbers",
            SensitiveCategory::Password => "Common password patterns",
            SensitiveCategory::ApiKey => "API Keys",
            SensitiveCategory::DateOfBirth => "Date of birth",
        }
    }

    /// Short identifier accepted in `info` conditions next to the name
    pub fn id(&self) -> &'static str {
        match self {
            SensitiveCategory::CardNumber16 => "card-16-digits",
            SensitiveCategory::CreditCard => "credit-card",
            SensitiveCategory::Ssn => "ssn",
            SensitiveCategory::Email => "email",
            SensitiveCategory::InternationalPhone => "phone",
            SensitiveCategory::Password => "password",
            SensitiveCategory::ApiKey => "api-key",
            SensitiveCategory::DateOfBirth => "date-of-birth",
        }
    }

    pub fn matches_label(&self, label: &str) -> bool {
        label.eq_ignore_ascii_case(self.name()) || label.eq_ignore_ascii_case(self.id())
    }

    fn pattern(&self) -> &'static str {
        match self {
            SensitiveCategory::CardNumber16 => r"\b\d{16}\b",
            SensitiveCategory::CreditCard => r"\b\d{4}[ -]?\d{4}[ -]?\d{4}[ -]?\d{4}\b",
            SensitiveCategory::Ssn => r"\b\d{3}[ -]?\d{2}[ -]?\d{4}\b",
            SensitiveCategory::Email => r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Z|a-z]{2,}\b",
            SensitiveCategory::InternationalPhone => {
                r"\+(?:\d{1,4}[ -]?)?(?:\d+\.?)?\d+(?:[ -]?\d+)+\b"
            }
            SensitiveCategory::Password => {
                r"\b(?:password|pass|pwd)[A-Za-z0-9._%+-]*[:=]?[A-Za-z0-9._%+-]+\b"
            }
            SensitiveCategory::ApiKey => r"\b(?:api[-_]?key|access[-_]?token)[:=]?[A-Za-z0-9._%+-]+\b",
            SensitiveCategory::DateOfBirth => r"\b\d{1,2}[ /-]\d{1,2}[ /-]\d{2,4}\b",
        }
    }
}

impl Serialize for SensitiveCategory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

fn sensitive_patterns() -> &'static [(SensitiveCategory, Regex)] {
    static PATTERNS: OnceLock<Vec<(SensitiveCategory, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        SensitiveCategory::all()
            .iter()
            .map(|c| (*c, Regex::new(c.pattern()).expect("Invalid sensitive-info regex")))
            .collect()
    })
}

/// Categories whose pattern occurs in `text`, in table order
pub fn find_sensitive(text: &str) -> Vec<SensitiveCategory> {
    sensitive_patterns()
        .iter()
        .filter(|(_, re)| re.is_match(text))
        .map(|(c, _)| *c)
        .collect()
}

/// One measured metric
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AnalysisValue {
    Count(usize),
    Status(u16),
    Headers(BTreeMap<String, String>),
    Elapsed(#[serde(serialize_with = "as_seconds")] Duration),
    Present(bool),
    Sensitive(Vec<SensitiveCategory>),
    Hash(String),
    /// `value-in-response` requested without a value to look for
    Absent,
}

fn as_seconds<S: Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(elapsed.as_secs_f64())
}

/// Option → value for one accepted response
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AnalysisResult(pub BTreeMap<AnalysisOption, AnalysisValue>);

impl AnalysisResult {
    pub fn get(&self, option: AnalysisOption) -> Option<&AnalysisValue> {
        self.0.get(&option)
    }

    pub fn contains(&self, option: AnalysisOption) -> bool {
        self.0.contains_key(&option)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResponseAnalyser {
    matcher: Option<MatchSpec>,
    options: Vec<AnalysisOption>,
}

impl ResponseAnalyser {
    pub fn new(matcher: Option<MatchSpec>, options: Vec<AnalysisOption>) -> Self {
        let mut seen = Vec::with_capacity(options.len());
        for option in options {
            if !seen.contains(&option) {
                seen.push(option);
            }
        }
        Self {
            matcher,
            options: seen,
        }
    }

    pub fn matcher(&self) -> Option<&MatchSpec> {
        self.matcher.as_ref()
    }

    pub fn options(&self) -> &[AnalysisOption] {
        &self.options
    }

    /// Apply the match/hide conditions, then measure the requested options.
    pub fn analyse(&self, response: &Response) -> Result<AnalysisResult, ResponseNotMatched> {
        let mut result = AnalysisResult::default();

        if let Some(spec) = &self.matcher {
            let keep_when = spec.mode != MatchMode::Hide;
            for (option, params) in &spec.conditions {
                if let Some(satisfied) = condition_satisfied(*option, params, response) {
                    if satisfied != keep_when {
                        return Err(ResponseNotMatched { option: *option });
                    }
                }
                if self.options.contains(option) {
                    result.0.insert(*option, measure(*option, response, params.value.as_deref()));
                }
            }
        }

        for option in &self.options {
            if !result.contains(*option) {
                result.0.insert(*option, measure(*option, response, None));
            }
        }

        Ok(result)
    }

    /// Broader summary of a response for reporting
    pub fn extract_information(&self, response: &Response) -> ResponseInformation {
        ResponseInformation::from_response(response)
    }
}

fn length_metric(option: AnalysisOption, text: &str) -> Option<usize> {
    match option {
        AnalysisOption::LengthInWords => Some(text.split_whitespace().count()),
        AnalysisOption::LengthInChars => Some(text.chars().count()),
        AnalysisOption::LengthInBytes => Some(text.len()),
        AnalysisOption::LengthInLines => Some(count_lines(text)),
        _ => None,
    }
}

fn is_line_break(c: char) -> bool {
    matches!(
        c,
        '\n' | '\r' | '\x0b' | '\x0c' | '\x1c' | '\x1d' | '\x1e' | '\u{85}' | '\u{2028}' | '\u{2029}'
    )
}

/// Lines as universal newlines see them: `\r\n` is one break, and a trailing
/// break does not start another line.
fn count_lines(text: &str) -> usize {
    let mut lines = 0;
    let mut open = false;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if is_line_break(c) {
            if c == '\r' {
                chars.next_if_eq(&'\n');
            }
            lines += 1;
            open = false;
        } else {
            open = true;
        }
    }
    lines + usize::from(open)
}

fn in_range(value: f64, min: Option<f64>, max: Option<f64>) -> bool {
    min.map_or(true, |m| value >= m) && max.map_or(true, |m| value <= m)
}

pub fn response_hash(response: &Response) -> String {
    format!("{:x}", md5::compute(response.reconstruct().as_bytes()))
}

fn measure(option: AnalysisOption, response: &Response, target: Option<&str>) -> AnalysisValue {
    let text = response.body_text();
    if let Some(n) = length_metric(option, &text) {
        return AnalysisValue::Count(n);
    }
    match option {
        AnalysisOption::ResponseCode => AnalysisValue::Status(response.status),
        AnalysisOption::ResponseHeader => AnalysisValue::Headers(
            response
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        AnalysisOption::ResponseElapsedTime => AnalysisValue::Elapsed(response.elapsed),
        AnalysisOption::ValueInResponse => match target {
            Some(value) => AnalysisValue::Present(text.contains(value)),
            None => AnalysisValue::Absent,
        },
        AnalysisOption::SensitiveInfo => AnalysisValue::Sensitive(find_sensitive(&text)),
        AnalysisOption::ResponseHash => AnalysisValue::Hash(response_hash(response)),
        // length options are handled above
        _ => AnalysisValue::Absent,
    }
}

/// `None` when the condition has nothing to check
fn condition_satisfied(
    option: AnalysisOption,
    params: &ConditionParams,
    response: &Response,
) -> Option<bool> {
    let text = response.body_text();
    if let Some(n) = length_metric(option, &text) {
        return Some(in_range(n as f64, params.min, params.max));
    }
    match option {
        AnalysisOption::ResponseCode => Some(params.code.contains(&response.status)),
        AnalysisOption::ResponseElapsedTime => Some(in_range(
            response.elapsed.as_secs_f64(),
            params.min,
            params.max,
        )),
        AnalysisOption::ResponseHeader => Some(params.headers.iter().all(|(name, expected)| {
            match response.header(name) {
                None => false,
                Some(actual) => expected.is_empty() || actual == expected,
            }
        })),
        AnalysisOption::ValueInResponse => Some(
            params
                .value
                .as_deref()
                .map_or(true, |value| text.contains(value)),
        ),
        AnalysisOption::SensitiveInfo => {
            let found = find_sensitive(&text);
            Some(
                params
                    .info
                    .iter()
                    .any(|label| found.iter().any(|c| c.matches_label(label))),
            )
        }
        AnalysisOption::ResponseHash => params
            .value
            .as_deref()
            .map(|expected| expected.eq_ignore_ascii_case(&response_hash(response))),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServerType {
    Apache,
    Nginx,
    #[serde(rename = "IIS")]
    Iis,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    #[serde(rename = "type")]
    pub server_type: ServerType,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuthTechnique {
    #[serde(rename = "Bearer Token")]
    BearerToken,
    #[serde(rename = "Basic Authentication")]
    Basic,
    #[serde(rename = "Session Cookie")]
    SessionCookie,
    #[serde(rename = "None detected")]
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SecurityMeasure {
    #[serde(rename = "HSTS (Strict Transport Security)")]
    Hsts,
    #[serde(rename = "CSP (Content Security Policy)")]
    Csp,
    #[serde(rename = "Content Type Sniffing Protection")]
    NoSniff,
    #[serde(rename = "Clickjacking Protection")]
    FrameOptions,
    #[serde(rename = "XSS Protection")]
    XssProtection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RateLimitInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_time: Option<String>,
}

/// Summary produced by [`ResponseAnalyser::extract_information`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseInformation {
    pub length_in_bytes: usize,
    pub length_in_lines: usize,
    pub length_in_words: usize,
    pub length_in_chars: usize,
    pub sensitive_information: Vec<SensitiveCategory>,
    pub most_common_words: Vec<(String, usize)>,
    pub server_info: Option<ServerInfo>,
    pub authentication: AuthTechnique,
    pub security_measures: Vec<SecurityMeasure>,
    pub rate_limiting: RateLimitInfo,
}

impl ResponseInformation {
    /// Lengths and sensitive data cover the whole response text; word
    /// frequencies only the body.
    pub fn from_response(response: &Response) -> Self {
        let full = response.reconstruct();
        let header = |name: &str| response.header(name).map(str::to_string);

        let server_info = response.header("server").filter(|s| !s.is_empty()).map(|server| {
            static VERSION: OnceLock<Regex> = OnceLock::new();
            let version_re = VERSION.get_or_init(|| Regex::new(r"[\d.]+").expect("Invalid regex"));
            let lower = server.to_lowercase();
            let server_type = if lower.contains("apache") {
                ServerType::Apache
            } else if lower.contains("nginx") {
                ServerType::Nginx
            } else if lower.contains("iis") {
                ServerType::Iis
            } else {
                ServerType::Unknown
            };
            ServerInfo {
                server_type,
                version: version_re.find(&lower).map(|m| m.as_str().to_string()),
            }
        });

        let auth = response.header("authorization").unwrap_or("").to_lowercase();
        let authentication = if auth.starts_with("bearer") {
            AuthTechnique::BearerToken
        } else if auth.starts_with("basic") {
            AuthTechnique::Basic
        } else if response.header("set-cookie").is_some() {
            AuthTechnique::SessionCookie
        } else {
            AuthTechnique::None
        };

        let mut security_measures = Vec::new();
        if response.header("strict-transport-security").is_some() {
            security_measures.push(SecurityMeasure::Hsts);
        }
        if response.header("content-security-policy").is_some() {
            security_measures.push(SecurityMeasure::Csp);
        }
        if response
            .header("x-content-type-options")
            .is_some_and(|v| v.eq_ignore_ascii_case("nosniff"))
        {
            security_measures.push(SecurityMeasure::NoSniff);
        }
        if response
            .header("x-frame-options")
            .map(str::to_lowercase)
            .is_some_and(|v| v == "deny" || v == "sameorigin")
        {
            security_measures.push(SecurityMeasure::FrameOptions);
        }
        if response
            .header("x-xss-protection")
            .is_some_and(|v| v.starts_with('1'))
        {
            security_measures.push(SecurityMeasure::XssProtection);
        }

        Self {
            length_in_bytes: full.len(),
            length_in_lines: count_lines(&full),
            length_in_words: full.split_whitespace().count(),
            length_in_chars: full.chars().count(),
            sensitive_information: find_sensitive(&full),
            most_common_words: most_common_words(&response.body_text(), 5),
            server_info,
            authentication,
            security_measures,
            rate_limiting: RateLimitInfo {
                limit: header("x-ratelimit-limit"),
                remaining: header("x-ratelimit-remaining"),
                reset_time: header("x-ratelimit-reset"),
            },
        }
    }
}

/// Most frequent lowercase words; ties keep first-occurrence order
fn most_common_words(body: &str, n: usize) -> Vec<(String, usize)> {
    static WORD: OnceLock<Regex> = OnceLock::new();
    let word_re = WORD.get_or_init(|| Regex::new(r"\b\w+\b").expect("Invalid regex"));

    let lower = body.to_lowercase();
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (idx, m) in word_re.find_iter(&lower).enumerate() {
        counts.entry(m.as_str()).or_insert((0, idx)).0 += 1;
    }

    let mut words: Vec<(&str, usize, usize)> =
        counts.into_iter().map(|(w, (c, first))| (w, c, first)).collect();
    words.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    words
        .into_iter()
        .take(n)
        .map(|(w, c, _)| (w.to_string(), c))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(status: u16, body: &str) -> Response {
        Response::new(status)
            .with_header("Content-Type", "application/json")
            .with_body(body)
            .with_elapsed(Duration::from_millis(250))
    }

    fn codes(c: &[u16]) -> ConditionParams {
        ConditionParams {
            code: c.to_vec(),
            ..Default::default()
        }
    }

    #[test]
    fn test_no_options_gives_empty_result() {
        let analyser = ResponseAnalyser::default();
        assert!(analyser.analyse(&response(500, "x")).unwrap().is_empty());
    }

    #[test]
    fn test_match_and_hide_on_status() {
        let matcher = MatchSpec::new(MatchMode::Match)
            .with_condition(AnalysisOption::ResponseCode, codes(&[200]));
        let analyser = ResponseAnalyser::new(Some(matcher), vec![]);
        assert!(analyser.analyse(&response(200, "")).is_ok());
        let err = analyser.analyse(&response(404, "")).unwrap_err();
        assert_eq!(err.option, AnalysisOption::ResponseCode);

        let hider = MatchSpec::new(MatchMode::Hide)
            .with_condition(AnalysisOption::ResponseCode, codes(&[404]));
        let analyser = ResponseAnalyser::new(Some(hider), vec![]);
        assert!(analyser.analyse(&response(200, "")).is_ok());
        assert!(analyser.analyse(&response(404, "")).is_err());
    }

    #[test]
    fn test_line_count_breaks() {
        assert_eq!(count_lines(""), 0);
        assert_eq!(count_lines("one"), 1);
        assert_eq!(count_lines("one\n"), 1);
        assert_eq!(count_lines("\n"), 1);
        assert_eq!(count_lines("a\r\nb\rc"), 3);
        assert_eq!(count_lines("a\rb\rc\r"), 3);
        assert_eq!(count_lines("a\x0bb\x0cc\u{2028}d"), 4);

        let analyser = ResponseAnalyser::new(None, vec![AnalysisOption::LengthInLines]);
        let result = analyser.analyse(&response(200, "x\ry\rz")).unwrap();
        assert_eq!(result.get(AnalysisOption::LengthInLines), Some(&AnalysisValue::Count(3)));
    }

    #[test]
    fn test_empty_code_list_never_matches() {
        let matcher = MatchSpec::new(MatchMode::Match)
            .with_condition(AnalysisOption::ResponseCode, codes(&[]));
        let analyser = ResponseAnalyser::new(Some(matcher), vec![]);
        assert!(analyser.analyse(&response(200, "")).is_err());
    }

    #[test]
    fn test_condition_value_kept_when_also_requested() {
        let matcher = MatchSpec::new(MatchMode::Match).with_condition(
            AnalysisOption::LengthInWords,
            ConditionParams {
                min: Some(2.0),
                max: Some(3.0),
                ..Default::default()
            },
        );
        let analyser = ResponseAnalyser::new(
            Some(matcher),
            vec![AnalysisOption::LengthInWords, AnalysisOption::ResponseCode],
        );
        let result = analyser.analyse(&response(201, "two words")).unwrap();
        assert_eq!(result.get(AnalysisOption::LengthInWords), Some(&AnalysisValue::Count(2)));
        assert_eq!(result.get(AnalysisOption::ResponseCode), Some(&AnalysisValue::Status(201)));
        assert!(analyser.analyse(&response(201, "one")).is_err());
    }

    #[test]
    fn test_elapsed_bounds_in_seconds() {
        let matcher = MatchSpec::new(MatchMode::Match).with_condition(
            AnalysisOption::ResponseElapsedTime,
            ConditionParams {
                min: Some(0.2),
                max: Some(0.3),
                ..Default::default()
            },
        );
        let analyser = ResponseAnalyser::new(Some(matcher), vec![]);
        assert!(analyser.analyse(&response(200, "")).is_ok());
        let slow = response(200, "").with_elapsed(Duration::from_secs(1));
        assert!(analyser.analyse(&slow).is_err());
    }

    #[test]
    fn test_header_presence_and_value() {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), String::new());
        let params = ConditionParams {
            headers: headers.clone(),
            ..Default::default()
        };
        let analyser = ResponseAnalyser::new(
            Some(MatchSpec::new(MatchMode::Match).with_condition(AnalysisOption::ResponseHeader, params)),
            vec![],
        );
        assert!(analyser.analyse(&response(200, "")).is_ok());

        headers.insert("CONTENT-TYPE".to_string(), "text/html".to_string());
        headers.remove("content-type");
        let params = ConditionParams {
            headers,
            ..Default::default()
        };
        let analyser = ResponseAnalyser::new(
            Some(MatchSpec::new(MatchMode::Match).with_condition(AnalysisOption::ResponseHeader, params)),
            vec![],
        );
        assert!(analyser.analyse(&response(200, "")).is_err());
    }

    #[test]
    fn test_sensitive_info_detection_and_condition() {
        let body = "contact admin@example.com, card 4111 1111 1111 1111";
        let found = find_sensitive(body);
        assert!(found.contains(&SensitiveCategory::Email));
        assert!(found.contains(&SensitiveCategory::CreditCard));
        assert!(!found.contains(&SensitiveCategory::ApiKey));

        let params = ConditionParams {
            info: vec!["Email Addresses".into()],
            ..Default::default()
        };
        let analyser = ResponseAnalyser::new(
            Some(MatchSpec::new(MatchMode::Hide).with_condition(AnalysisOption::SensitiveInfo, params)),
            vec![AnalysisOption::SensitiveInfo],
        );
        assert!(analyser.analyse(&response(200, body)).is_err());
        let result = analyser.analyse(&response(200, "nothing here")).unwrap();
        assert_eq!(
            result.get(AnalysisOption::SensitiveInfo),
            Some(&AnalysisValue::Sensitive(vec![]))
        );
    }

    #[test]
    fn test_value_in_response() {
        let params = ConditionParams {
            value: Some("token".into()),
            ..Default::default()
        };
        let analyser = ResponseAnalyser::new(
            Some(MatchSpec::new(MatchMode::Match).with_condition(AnalysisOption::ValueInResponse, params)),
            vec![AnalysisOption::ValueInResponse],
        );
        let result = analyser.analyse(&response(200, r#"{"token": "x"}"#)).unwrap();
        assert_eq!(result.get(AnalysisOption::ValueInResponse), Some(&AnalysisValue::Present(true)));
        assert!(analyser.analyse(&response(200, "{}")).is_err());
    }

    #[test]
    fn test_hash_is_stable_and_header_order_independent() {
        let a = Response::new(200).with_header("A", "1").with_header("b", "2").with_body("x");
        let b = Response::new(200).with_header("b", "2").with_header("A", "1").with_body("x");
        assert_eq!(response_hash(&a), response_hash(&b));
        assert_eq!(response_hash(&a).len(), 32);
        assert_ne!(response_hash(&a), response_hash(&a.clone().with_body("y")));
    }

    #[test]
    fn test_analyse_is_idempotent() {
        let analyser = ResponseAnalyser::new(None, AnalysisOption::all().to_vec());
        let resp = response(200, "Hello world\nsecond line password=hunter2");
        let first = analyser.analyse(&resp).unwrap();
        let second = analyser.analyse(&resp).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), AnalysisOption::all().len());
    }

    #[test]
    fn test_match_spec_accepts_both_shapes() {
        let a: MatchSpec = serde_json::from_value(json!({
            "mode": "match",
            "conditions": {"response-code": {"code": 200}}
        }))
        .unwrap();
        let b: MatchSpec =
            serde_json::from_value(json!(["match", {"response-code": {"code": [200]}}])).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.conditions[&AnalysisOption::ResponseCode].code, vec![200]);

        assert!(serde_json::from_value::<MatchSpec>(json!(["match", {"bogus": {}}])).is_err());
    }

    #[test]
    fn test_result_serializes_with_option_names() {
        let analyser = ResponseAnalyser::new(
            None,
            vec![AnalysisOption::ResponseCode, AnalysisOption::ResponseElapsedTime],
        );
        let result = analyser.analyse(&response(200, "")).unwrap();
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value, json!({"response-code": 200, "response-elapsed-time": 0.25}));
    }

    #[test]
    fn test_extract_information() {
        let resp = Response::new(200)
            .with_header("Server", "Apache/2.4.41 (Ubuntu)")
            .with_header("Set-Cookie", "sessionId=xyz789; HttpOnly")
            .with_header("Strict-Transport-Security", "max-age=31536000")
            .with_header("X-Frame-Options", "DENY")
            .with_header("X-XSS-Protection", "1; mode=block")
            .with_header("X-RateLimit-Limit", "100")
            .with_body("Hello world! Hello again! Password is secret. hello");

        let info = ResponseAnalyser::default().extract_information(&resp);
        let server = info.server_info.unwrap();
        assert_eq!(server.server_type, ServerType::Apache);
        assert_eq!(server.version.as_deref(), Some("2.4.41"));
        assert_eq!(info.authentication, AuthTechnique::SessionCookie);
        assert_eq!(
            info.security_measures,
            vec![SecurityMeasure::Hsts, SecurityMeasure::FrameOptions, SecurityMeasure::XssProtection]
        );
        assert_eq!(info.rate_limiting.limit.as_deref(), Some("100"));
        assert_eq!(info.most_common_words[0], ("hello".to_string(), 3));
        assert_eq!(info.most_common_words[1], ("world".to_string(), 1));
    }
}
