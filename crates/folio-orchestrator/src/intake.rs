//! Classifiers that turn a user's reply into a routing decision or a profile
//! update. Everything here is deterministic; an unrecognized reply yields
//! `None` or [`FolioError::MalformedInput`] and the router asks again.

use crate::parser::parse_portfolio;
use folio_core::{FolioError, FolioResult, Profile};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:my name is|my name's|i am|i'm|im|this is|call me|it's|name\s*:)\s+([a-z][a-z'\-]*(?:\s+[a-z][a-z'\-]*)?)",
    )
    .expect("valid name pattern")
});

#[allow(clippy::expect_used)]
static LETTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:option\s+)?(?:\(([ab])\)|([ab])(?:\s*[.,:)!\-]|\s*$|\s+(?:please|thanks|thank\s+you)\b))",
    )
    .expect("valid letter pattern")
});

#[allow(clippy::expect_used)]
static HORIZON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*-?\s*(years?|yrs?|y|months?|mos?)\b")
        .expect("valid horizon pattern")
});

#[allow(clippy::expect_used)]
static LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(risk(?:\s+tolerance)?|(?:time\s+)?horizon|(?:investment\s+)?goals?|holdings|portfolio|cash)\s*[:=]\s*([^;\n]+)",
    )
    .expect("valid label pattern")
});

const GREETINGS: &[&str] = &["hi", "hello", "hey", "yo", "hiya", "howdy", "greetings"];

/// A profile field the router collects one question at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    RiskTolerance,
    TimeHorizon,
    InvestmentGoals,
    Holdings,
}

impl Field {
    pub fn question(&self) -> &'static str {
        match self {
            Field::RiskTolerance => {
                "How would you describe your risk tolerance: Conservative, Moderate or Aggressive?"
            }
            Field::TimeHorizon => "What is your investment time horizon (for example, 10 years)?",
            Field::InvestmentGoals => {
                "What are your investment goals (for example, retirement, a home purchase or education)?"
            }
            Field::Holdings => {
                "Would you like to start from scratch or import your current portfolio? Tell me \
                 how much cash you are starting with, or list your holdings (for example, \
                 '10 VTI @ $200, 5 AAPL')."
            }
        }
    }
}

/// The first field `profile` is missing, in asking order.
pub fn next_missing(profile: &Profile) -> Option<Field> {
    if profile.risk_tolerance.is_none() {
        Some(Field::RiskTolerance)
    } else if profile.time_horizon.is_none() {
        Some(Field::TimeHorizon)
    } else if profile.investment_goals.is_none() {
        Some(Field::InvestmentGoals)
    } else if !profile.current_holdings.as_ref().is_some_and(|h| !h.is_empty()) {
        Some(Field::Holdings)
    } else {
        None
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Pulls a name out of "my name is Ada", "I'm Ada Lovelace" or a bare "ada".
pub fn extract_name(input: &str) -> Option<String> {
    let raw = match NAME_RE.captures(input) {
        Some(caps) => caps.get(1)?.as_str().to_string(),
        None => {
            let trimmed = input.trim().trim_end_matches(['.', '!', ',']);
            let words: Vec<&str> = trimmed.split_whitespace().collect();
            let plausible = (1..=3).contains(&words.len())
                && words
                    .iter()
                    .all(|w| w.chars().all(|c| c.is_alphabetic() || c == '\'' || c == '-'))
                && !words.iter().any(|w| GREETINGS.contains(&w.to_lowercase().as_str()));
            if !plausible {
                return None;
            }
            trimmed.to_string()
        }
    };
    let name = raw
        .split_whitespace()
        .map(title_case)
        .collect::<Vec<_>>()
        .join(" ");
    (!name.is_empty()).then_some(name)
}

/// Which of two offered options a reply picks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    First,
    Second,
}

/// Classifies a reply to an "(A) ... or (B) ..." question.
///
/// A leading letter wins when it stands alone (`"B"`, `"(a) build"`,
/// `"b please"`); a leading article such as `"a review of..."` does not
/// count. Otherwise the reply must contain keywords of exactly one option.
pub fn classify_choice(input: &str, first: &[&str], second: &[&str]) -> Option<Choice> {
    let lower = input.trim().to_lowercase();
    if let Some(caps) = LETTER_RE.captures(&lower) {
        return match caps.get(1).or_else(|| caps.get(2))?.as_str() {
            "a" => Some(Choice::First),
            _ => Some(Choice::Second),
        };
    }
    let picks_first = first.iter().any(|k| lower.contains(k));
    let picks_second = second.iter().any(|k| lower.contains(k));
    match (picks_first, picks_second) {
        (true, false) => Some(Choice::First),
        (false, true) => Some(Choice::Second),
        _ => None,
    }
}

fn words(input: &str) -> Vec<String> {
    input
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn negated(input: &str) -> bool {
    let lower = input.to_lowercase();
    ["not ", "don't", "dont ", "n't ", "no ", "never"]
        .iter()
        .any(|n| lower.contains(n))
        || words(input).first().is_some_and(|w| w == "no")
}

/// Whether feedback on a presented strategy approves it.
pub fn is_approval(input: &str) -> bool {
    if negated(input) {
        return false;
    }
    let lower = input.to_lowercase();
    let phrases = [
        "looks good", "look good", "sounds good", "go with it", "let's do it", "love it",
    ];
    if phrases.iter().any(|p| lower.contains(p)) {
        return true;
    }
    let w = words(input);
    let terms = ["approve", "approved", "accept", "accepted", "lgtm", "perfect"];
    if w.iter().any(|x| terms.contains(&x.as_str())) {
        return true;
    }
    w.len() <= 3 && w.iter().any(|x| ["yes", "ok", "okay", "great", "good", "fine"].contains(&x.as_str()))
}

/// Interprets a yes/no answer.
pub fn yes_no(input: &str) -> Option<bool> {
    let w = words(input);
    let yes = w.iter().any(|x| {
        ["yes", "y", "yeah", "yep", "sure", "please", "ok", "okay", "absolutely", "definitely"]
            .contains(&x.as_str())
    }) || input.to_lowercase().contains("go ahead");
    let no = w
        .iter()
        .any(|x| ["no", "n", "nope", "nah", "skip", "later"].contains(&x.as_str()))
        || input.to_lowercase().contains("not now");
    match (yes, no) {
        (true, false) => Some(true),
        (false, true) => Some(false),
        _ => None,
    }
}

/// Whether the user asks to apply the approved allocation to their holdings
/// (`"update my holdings"`, `"execute the strategy"`).
pub fn wants_execution(input: &str) -> bool {
    let lower = input.to_lowercase();
    [
        "update my holdings",
        "update holdings",
        "update my portfolio",
        "execute",
        "implement the strategy",
        "apply the strategy",
    ]
    .iter()
    .any(|p| lower.contains(p))
}

/// Maps a risk answer onto Conservative, Moderate or Aggressive.
pub fn normalize_risk(input: &str) -> Option<String> {
    let lower = input.to_lowercase();
    let conservative = ["conservative", "low", "cautious", "safe"]
        .iter()
        .any(|k| lower.contains(k));
    let moderate = ["moderate", "balanced", "medium", "middle"]
        .iter()
        .any(|k| lower.contains(k));
    let aggressive = ["aggressive", "high", "growth", "risky"]
        .iter()
        .any(|k| lower.contains(k));
    match (conservative, moderate, aggressive) {
        (true, false, false) => Some("Conservative".into()),
        (false, true, false) => Some("Moderate".into()),
        (false, false, true) => Some("Aggressive".into()),
        _ => None,
    }
}

/// Normalizes "10 years", "18mo", "5-yr" or "long term".
pub fn normalize_horizon(input: &str) -> Option<String> {
    if let Some(caps) = HORIZON_RE.captures(input) {
        let amount = caps.get(1)?.as_str();
        let unit = caps.get(2)?.as_str().to_lowercase();
        let unit = if unit.starts_with('m') { "month" } else { "year" };
        let plural = if amount == "1" { "" } else { "s" };
        return Some(format!("{amount} {unit}{plural}"));
    }
    let lower = input.to_lowercase();
    if lower.contains("short") {
        Some("Short term".into())
    } else if lower.contains("medium") || lower.contains("mid") {
        Some("Medium term".into())
    } else if lower.contains("long") {
        Some("Long term".into())
    } else {
        None
    }
}

/// Parses `input` as the answer to `field`.
pub fn answer_field(field: Field, input: &str) -> FolioResult<Profile> {
    let text = input.trim();
    let mut update = Profile::default();
    match field {
        Field::RiskTolerance => {
            update.risk_tolerance = Some(normalize_risk(text).ok_or_else(|| {
                FolioError::MalformedInput(
                    "Please describe your risk tolerance as Conservative, Moderate or Aggressive."
                        .into(),
                )
            })?);
        }
        Field::TimeHorizon => {
            update.time_horizon = Some(normalize_horizon(text).ok_or_else(|| {
                FolioError::MalformedInput(
                    "Please give your time horizon as a number of years or months, for example '10 years'."
                        .into(),
                )
            })?);
        }
        Field::InvestmentGoals => {
            if text.is_empty() {
                return Err(FolioError::MalformedInput(
                    "Please tell me what you are investing for.".into(),
                ));
            }
            update.investment_goals = Some(text.to_string());
        }
        Field::Holdings => {
            update.current_holdings = Some(parse_portfolio(text)?);
        }
    }
    Ok(update)
}

/// Reads `label: value` clauses such as `risk: moderate; horizon: 10 years`.
///
/// Returns `Ok(None)` when the text carries no labels.
pub fn parse_labeled(input: &str) -> FolioResult<Option<Profile>> {
    let mut update = Profile::default();
    let mut found = false;
    for caps in LABEL_RE.captures_iter(input) {
        let (Some(label), Some(value)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let label = label.as_str().to_lowercase();
        let field = if label.starts_with("risk") {
            Field::RiskTolerance
        } else if label.contains("horizon") {
            Field::TimeHorizon
        } else if label.contains("goal") {
            Field::InvestmentGoals
        } else {
            Field::Holdings
        };
        let value = if label == "cash" {
            format!("{} cash", value.as_str().trim())
        } else {
            value.as_str().to_string()
        };
        update.merge_from(&answer_field(field, &value)?);
        found = true;
    }
    Ok(found.then_some(update))
}
