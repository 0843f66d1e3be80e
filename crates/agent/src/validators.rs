//! Deterministic, no-I/O field validators and keyword classifiers used
//! by [`crate::state_machine`].
//!
//! Grounded verbatim on `original_source/.../validation.py`: sentinel
//! value rejection, phone-as-name rejection, the word-boundary keyword
//! matcher, and the digit-word-to-numeral normalizer.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

fn sentinel_values() -> &'static HashSet<&'static str> {
    static SET: Lazy<HashSet<&'static str>> = Lazy::new(|| {
        [
            "not provided", "n/a", "na", "unknown", "none", "tbd",
            "{{customer_name}}", "{{zip_code}}", "{{service_address}}",
            "auto", "customer_name", "service_address",
        ]
        .into_iter()
        .collect()
    });
    &SET
}

pub static SERVICE_KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "ac", "heat", "furnace", "cooling", "heating", "broken", "noise", "leak", "thermostat",
        "unit", "system", "not working", "appointment", "booking", "schedule", "service",
        "someone to come out", "repair", "maintenance", "hvac", "air conditioning", "compressor",
        "duct", "not cooling", "not heating", "won't turn on", "stopped working",
    ]
    .into_iter()
    .collect()
});

pub static NON_SERVICE_KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "billing", "bill", "charge", "payment", "warranty", "invoice", "vendor", "supplier",
        "selling", "partnership", "parts supplier", "hiring", "job", "apply", "position",
        "employment", "wrong number",
    ]
    .into_iter()
    .collect()
});

pub static FOLLOW_UP_KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "following up", "called before", "waiting for callback", "checking on", "any update",
        "called earlier", "still waiting",
    ]
    .into_iter()
    .collect()
});

pub static MANAGE_BOOKING_KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "my appointment", "reschedule", "cancel my", "cancel the", "change my appointment",
        "move my appointment",
    ]
    .into_iter()
    .collect()
});

pub static SAFETY_KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["gas", "burning", "smoke", "co detector", "carbon monoxide", "sparks", "fire"]
        .into_iter()
        .collect()
});

pub static SAFETY_RETRACTION_KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "never mind", "but don't worry", "actually no", "not the issue", "forget i said",
        "i'm fine", "we're okay", "no emergency", "that's not it", "not really",
    ]
    .into_iter()
    .collect()
});

pub static HIGH_TICKET_POSITIVE: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "new system", "new unit", "new ac", "new furnace", "replacement", "replace", "quote",
        "estimate", "how much for a new", "cost of a new", "upgrade", "whole new", "brand new",
        "installing a new",
    ]
    .into_iter()
    .collect()
});

pub static HIGH_TICKET_NEGATIVE: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "broken", "not working", "stopped working", "won't turn on", "cover", "part", "piece",
        "component", "noise", "leak", "smell", "drip", "tune-up", "check", "maintenance",
        "filter",
    ]
    .into_iter()
    .collect()
});

pub static CALLBACK_REQUEST_KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "call me back", "callback", "just call", "have someone call", "have the owner call",
        "don't want to schedule",
    ]
    .into_iter()
    .collect()
});

/// Whole-word match on a lowercased copy of `text` — substring match
/// is a defect ("no" must not match "noticed", "know", "not").
pub fn match_any_keyword(text: &str, keywords: &HashSet<&'static str>) -> bool {
    let lower = text.to_lowercase();
    keywords.iter().any(|kw| {
        let pattern = format!(r"\b{}\b", regex::escape(kw));
        Regex::new(&pattern).map(|re| re.is_match(&lower)).unwrap_or(false)
    })
}

fn word_to_digit(word: &str) -> Option<&'static str> {
    Some(match word {
        "zero" | "oh" | "o" => "0",
        "one" => "1",
        "two" => "2",
        "three" => "3",
        "four" => "4",
        "five" => "5",
        "six" => "6",
        "seven" => "7",
        "eight" => "8",
        "nine" => "9",
        _ => return None,
    })
}

/// Converts number words and single digits in `text` to a digit
/// string, e.g. "seven eight seven zero one" → "78701".
pub fn words_to_digits(text: &str) -> String {
    static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-zA-Z]+|\d").unwrap());
    let lower = text.to_lowercase();
    let mut digits = String::new();
    for tok in TOKEN_RE.find_iter(&lower) {
        let tok = tok.as_str();
        if let Some(d) = word_to_digit(tok) {
            digits.push_str(d);
        } else if tok.chars().all(|c| c.is_ascii_digit()) {
            digits.push_str(tok);
        }
    }
    digits
}

pub fn validate_zip(value: &str) -> String {
    static ZIP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{5}$").unwrap());
    let cleaned = value.trim();
    if ZIP_RE.is_match(cleaned) {
        cleaned.to_string()
    } else {
        String::new()
    }
}

pub fn validate_name(value: &str) -> String {
    static PHONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\d+\-() ]{7,}$").unwrap());
    let cleaned = value.trim();
    if cleaned.is_empty() {
        return String::new();
    }
    if sentinel_values().contains(cleaned.to_lowercase().as_str()) {
        return String::new();
    }
    if PHONE_RE.is_match(cleaned) {
        return String::new();
    }
    if cleaned.contains("{{") || cleaned.contains("}}") {
        return String::new();
    }
    cleaned.to_string()
}

fn number_word_to_digits(word: &str) -> Option<&'static str> {
    Some(match word {
        "zero" => "0",
        "one" => "1",
        "two" => "2",
        "three" => "3",
        "four" => "4",
        "five" => "5",
        "six" => "6",
        "seven" => "7",
        "eight" => "8",
        "nine" => "9",
        "ten" => "10",
        "eleven" => "11",
        "twelve" => "12",
        "thirteen" => "13",
        "fourteen" => "14",
        "fifteen" => "15",
        "sixteen" => "16",
        "seventeen" => "17",
        "eighteen" => "18",
        "nineteen" => "19",
        "twenty" => "20",
        _ => return None,
    })
}

/// Converts leading word-digits to numerals, stopping at the first
/// non-number word, e.g. "53 Eleven Izzical Road" → "5311 Izzical Road".
pub fn normalize_leading_address_digits(text: &str) -> String {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let mut prefix_digits = String::new();
    let mut i = 0;
    while i < tokens.len() {
        let tok = tokens[i];
        if tok.chars().all(|c| c.is_ascii_digit()) {
            prefix_digits.push_str(tok);
        } else if let Some(d) = number_word_to_digits(&tok.to_lowercase()) {
            prefix_digits.push_str(d);
        } else {
            break;
        }
        i += 1;
    }
    if prefix_digits.is_empty() {
        return text.to_string();
    }
    let mut parts = vec![prefix_digits];
    parts.extend(tokens[i..].iter().map(|s| s.to_string()));
    parts.join(" ")
}

pub fn validate_address(value: &str) -> String {
    static OR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bor\b").unwrap());
    let cleaned = value.trim();
    if cleaned.is_empty() {
        return String::new();
    }
    if sentinel_values().contains(cleaned.to_lowercase().as_str()) {
        return String::new();
    }
    let normalized = normalize_leading_address_digits(cleaned);
    if OR_RE.is_match(&normalized) {
        return String::new();
    }
    if !normalized.chars().any(|c| c.is_ascii_alphabetic()) {
        return String::new();
    }
    if normalized.len() < 5 {
        return String::new();
    }
    normalized
}

pub fn is_service_area(zip_code: &str) -> bool {
    let validated = validate_zip(zip_code);
    !validated.is_empty() && validated.starts_with("787")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerIntent {
    Service,
    NonService,
    FollowUp,
    ManageBooking,
}

/// Classifies caller intent from the first utterance.
pub fn classify_intent(text: &str) -> CallerIntent {
    if match_any_keyword(text, &MANAGE_BOOKING_KEYWORDS) {
        CallerIntent::ManageBooking
    } else if match_any_keyword(text, &FOLLOW_UP_KEYWORDS) {
        CallerIntent::FollowUp
    } else if match_any_keyword(text, &NON_SERVICE_KEYWORDS) {
        CallerIntent::NonService
    } else {
        CallerIntent::Service
    }
}

pub fn detect_safety_emergency(text: &str) -> bool {
    match_any_keyword(text, &SAFETY_KEYWORDS) && !match_any_keyword(text, &SAFETY_RETRACTION_KEYWORDS)
}

pub fn detect_high_ticket(text: &str) -> bool {
    match_any_keyword(text, &HIGH_TICKET_POSITIVE) && !match_any_keyword(text, &HIGH_TICKET_NEGATIVE)
}

pub fn detect_callback_request(text: &str) -> bool {
    match_any_keyword(text, &CALLBACK_REQUEST_KEYWORDS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_word_match_rejects_substrings() {
        let mut set = HashSet::new();
        set.insert("no");
        assert!(!match_any_keyword("I noticed a leak", &set));
        assert!(match_any_keyword("no, we're fine", &set));
    }

    #[test]
    fn words_to_digits_converts_spoken_zip() {
        assert_eq!(words_to_digits("seven eight seven zero one"), "78701");
        assert_eq!(words_to_digits("seven eight seven oh one"), "78701");
    }

    #[test]
    fn validate_zip_requires_exactly_five_digits() {
        assert_eq!(validate_zip("78701"), "78701");
        assert_eq!(validate_zip(" 78701 "), "78701");
        assert_eq!(validate_zip("7870"), "");
        assert_eq!(validate_zip("787011"), "");
    }

    #[test]
    fn validate_name_rejects_sentinels_and_phone_numbers() {
        assert_eq!(validate_name("Jane Doe"), "Jane Doe");
        assert_eq!(validate_name("not provided"), "");
        assert_eq!(validate_name("{{customer_name}}"), "");
        assert_eq!(validate_name("512-555-0100"), "");
    }

    #[test]
    fn validate_address_requires_letters_and_minimum_length() {
        assert_eq!(validate_address("123 Oak St"), "123 Oak St");
        assert_eq!(validate_address("78701"), "");
        assert_eq!(validate_address("Oak"), "");
        assert_eq!(validate_address("123 Oak or 456 Elm"), "");
    }

    #[test]
    fn validate_address_normalizes_leading_word_digits() {
        assert_eq!(validate_address("53 Eleven Izzical Road"), "5311 Izzical Road");
    }

    #[test]
    fn is_service_area_requires_787_prefix() {
        assert!(is_service_area("78701"));
        assert!(!is_service_area("90210"));
        assert!(!is_service_area("invalid"));
    }

    #[test]
    fn detect_safety_emergency_honors_retraction() {
        assert!(detect_safety_emergency("I smell gas in the kitchen"));
        assert!(!detect_safety_emergency("I smell gas but never mind, false alarm"));
    }

    #[test]
    fn detect_high_ticket_requires_positive_without_negative() {
        assert!(detect_high_ticket("looking for a quote on a new system"));
        assert!(!detect_high_ticket("quote but it's just a broken filter"));
    }

    #[test]
    fn classify_intent_prioritizes_manage_booking_over_follow_up() {
        assert_eq!(classify_intent("I need to reschedule my appointment"), CallerIntent::ManageBooking);
        assert_eq!(classify_intent("just checking on my earlier call"), CallerIntent::FollowUp);
        assert_eq!(classify_intent("my billing statement is wrong"), CallerIntent::NonService);
        assert_eq!(classify_intent("my AC stopped working"), CallerIntent::Service);
    }
}
