//! Parsing engine seam and the built-in heuristic engine.

use crate::doc_type::DocumentType;
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::sync::LazyLock;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b").expect("valid email pattern")
});
static PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+?\d[\d\s().-]{6,}\d").expect("valid phone pattern"));
static LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bhttps?://[^\s<>()]+|\b(?:www\.)?(?:linkedin|github)\.com/[^\s<>()]+")
        .expect("valid link pattern")
});

/// Section headings and the key they are reported under.
const SECTION_HEADINGS: &[(&str, &str)] = &[
    ("summary", "summary"),
    ("profile", "summary"),
    ("objective", "summary"),
    ("experience", "experience"),
    ("work experience", "experience"),
    ("professional experience", "experience"),
    ("employment history", "experience"),
    ("education", "education"),
    ("skills", "skills"),
    ("technical skills", "skills"),
    ("projects", "projects"),
    ("certifications", "certifications"),
    ("languages", "languages"),
];

const KNOWN_SKILLS: &[&str] = &[
    "rust", "python", "java", "javascript", "typescript", "go", "c++", "c#", "sql",
    "postgresql", "docker", "kubernetes", "aws", "azure", "gcp", "react", "node.js",
    "linux", "git", "terraform", "excel", "salesforce",
];

const MIN_PHONE_DIGITS: usize = 9;
const MAX_PHONE_DIGITS: usize = 15;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParsingError {
    #[error("No text to parse")]
    EmptyInput,

    #[error("Parsing engine error: {0}")]
    Engine(String),

    #[error("Parsing engine unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid parsing engine response: {0}")]
    InvalidResponse(String),
}

impl ParsingError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ParsingError::Engine(_) | ParsingError::Unavailable(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParseOutcome {
    pub output: Value,
    pub confidence: f64,
}

#[async_trait]
pub trait Parser: Send + Sync {
    fn engine_name(&self) -> &'static str;

    async fn parse(
        &self,
        text: &str,
        document_type: DocumentType,
    ) -> Result<ParseOutcome, ParsingError>;
}

/// Regex-driven profile extraction, used when no remote engine is configured.
#[derive(Debug, Clone, Default)]
pub struct HeuristicParser;

impl HeuristicParser {
    pub fn new() -> Self {
        Self
    }

    /// Fields a complete document of this type is expected to yield.
    fn expected_fields(document_type: DocumentType) -> &'static [&'static str] {
        match document_type {
            DocumentType::Resume => &["name", "emails", "phones", "skills", "sections"],
            DocumentType::CoverLetter => &["name", "emails", "phones"],
            DocumentType::Generic => &["emails", "phones", "links"],
        }
    }
}

#[async_trait]
impl Parser for HeuristicParser {
    fn engine_name(&self) -> &'static str {
        "heuristic"
    }

    async fn parse(
        &self,
        text: &str,
        document_type: DocumentType,
    ) -> Result<ParseOutcome, ParsingError> {
        if text.trim().is_empty() {
            return Err(ParsingError::EmptyInput);
        }

        let sections = split_sections(text);
        let emails = unique(EMAIL.find_iter(text).map(|m| m.as_str().to_lowercase()));
        let phones = unique(PHONE.find_iter(text).filter_map(|m| normalize_phone(m.as_str())));
        let links = unique(
            LINK.find_iter(text)
                .map(|m| m.as_str().trim_end_matches(['.', ',', ';']).to_string()),
        );
        let skills = extract_skills(text, sections.get("skills").and_then(Value::as_str));
        let name = name_candidate(text);

        let output = json!({
            "documentType": document_type,
            "name": name,
            "emails": emails,
            "phones": phones,
            "links": links,
            "skills": skills,
            "sections": Value::Object(sections),
        });

        let expected = Self::expected_fields(document_type);
        let found = expected
            .iter()
            .filter(|field| match output.get(**field) {
                Some(Value::Null) | None => false,
                Some(Value::Array(items)) => !items.is_empty(),
                Some(Value::Object(map)) => !map.is_empty(),
                Some(_) => true,
            })
            .count();
        let confidence = found as f64 / expected.len() as f64;

        tracing::debug!(
            document_type = %document_type,
            fields_found = found,
            fields_expected = expected.len(),
            confidence,
            "Heuristic parse complete"
        );

        Ok(ParseOutcome { output, confidence })
    }
}

fn unique(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    items.filter(|item| seen.insert(item.clone())).collect()
}

fn normalize_phone(raw: &str) -> Option<String> {
    let digits = raw.chars().filter(char::is_ascii_digit).count();
    if !(MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits) {
        return None;
    }
    let mut phone: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();
    if phone.rfind('+').is_some_and(|i| i > 0) {
        phone.retain(|c| c != '+');
    }
    Some(phone)
}

fn heading_key(line: &str) -> Option<&'static str> {
    let normalized = line.trim().trim_end_matches(':').trim().to_lowercase();
    SECTION_HEADINGS
        .iter()
        .find(|(heading, _)| *heading == normalized)
        .map(|(_, key)| *key)
}

/// Split text into sections keyed by recognised headings.
fn split_sections(text: &str) -> Map<String, Value> {
    let mut sections: Map<String, Value> = Map::new();
    let mut current: Option<&'static str> = None;
    let mut body: Vec<&str> = Vec::new();

    let mut flush = |key: Option<&'static str>, body: &mut Vec<&str>| {
        if let Some(key) = key {
            let content = body.join("\n").trim().to_string();
            if !content.is_empty() && !sections.contains_key(key) {
                sections.insert(key.to_string(), Value::String(content));
            }
        }
        body.clear();
    };

    for line in text.lines() {
        if let Some(key) = heading_key(line) {
            flush(current, &mut body);
            current = Some(key);
        } else if current.is_some() {
            body.push(line);
        }
    }
    flush(current, &mut body);

    sections
}

fn extract_skills(text: &str, skills_section: Option<&str>) -> Vec<String> {
    if let Some(section) = skills_section {
        let listed = unique(
            section
                .split([',', ';', '|', '\n', '•'])
                .map(|s| s.trim().trim_start_matches(['-', '*']).trim().to_string())
                .filter(|s| !s.is_empty() && s.len() <= 50),
        );
        if !listed.is_empty() {
            return listed;
        }
    }

    let lowered = text.to_lowercase();
    let tokens: BTreeSet<&str> = lowered
        .split(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | '|' | '(' | ')' | '/'))
        .map(|t| t.trim_end_matches('.'))
        .filter(|t| !t.is_empty())
        .collect();
    KNOWN_SKILLS
        .iter()
        .filter(|skill| tokens.contains(**skill))
        .map(|skill| skill.to_string())
        .collect()
}

/// First short line near the top that looks like a person's name.
fn name_candidate(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .take(5)
        .find(|line| {
            let words: Vec<&str> = line.split_whitespace().collect();
            (2..=4).contains(&words.len())
                && heading_key(line).is_none()
                && words.iter().all(|w| {
                    w.chars().next().is_some_and(char::is_uppercase)
                        && w.chars().all(|c| c.is_alphabetic() || matches!(c, '-' | '\'' | '.'))
                })
        })
        .map(str::to_string)
}
