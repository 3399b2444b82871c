//! Field patterns over visible page text.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use subscout_shared::state_code;

// ---------------------------------------------------------------------------
// Regex patterns (compiled once)
// ---------------------------------------------------------------------------

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("email regex")
});

/// North-American numbers: `(512) 555-0100`, `512.555.0100`, `512-555-0100`.
static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\(?\b\d{3}\)?[-.\s]?\d{3}[-.\s]\d{4}\b").expect("phone regex")
});

/// `City, ST 12345` with a capitalized city of up to four words.
static ADDRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z][A-Za-z.']*(?: [A-Z][A-Za-z.']*){0,3}),\s+([A-Z]{2})\s+\d{5}(?:-\d{4})?\b")
        .expect("address regex")
});

/// `bonding capacity of $5 million`, `bonded up to $5,000,000`, `Bonding: $10M`.
static BOND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\bbond(?:ed|ing)?(?:\s+capacity)?(?:\s+(?:of|is|up\s+to|to)|:)*\s*\$\s?(\d[\d,]*(?:\.\d+)?)\s*(million|mil|mm|m|thousand|k)?\b",
    )
    .expect("bond regex")
});

/// `bonding capacity of five million`.
static BOND_WORDS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\bbond(?:ed|ing)?(?:\s+capacity)?(?:\s+(?:of|is|up\s+to|to)|:)*\s+((?:[a-z]+[\s-])*?[a-z]+)\s+(million|thousand)\b",
    )
    .expect("bond words regex")
});

/// A free-standing amount such as `$5.5M` or `5,000,000`.
static AMOUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d[\d,]*(?:\.\d+)?)\s*(million|mil|mm|m|thousand|k)?\b").expect("amount regex")
});

/// `License #TACLA12345C`, `Lic. No. 12345`.
static LICENSE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?i:license|licence|lic\.?)(?:\s*(?i:no\.?|number|num\.?|#))?\s*[:#]?\s*([A-Z0-9][A-Z0-9-]{3,})\b",
    )
    .expect("license regex")
});

/// Words that lead into a city name without being part of it.
const CITY_LEAD_WORDS: &[&str] = &[
    "Serving", "Located", "Based", "In", "At", "Near", "From", "Office", "Offices", "Headquarters",
    "Headquartered", "Address",
];

/// File extensions that make an `x@y.z` match an asset name, not an address.
const ASSET_SUFFIXES: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp"];

// ---------------------------------------------------------------------------
// Finders
// ---------------------------------------------------------------------------

/// A pattern hit: the normalized value and where it sits in the searched text.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Hit<T> {
    pub value: T,
    pub span: Range<usize>,
}

pub(crate) fn find_email(text: &str) -> Option<Hit<String>> {
    EMAIL_RE
        .find_iter(text)
        .find(|m| {
            let lower = m.as_str().to_ascii_lowercase();
            !ASSET_SUFFIXES.iter().any(|ext| lower.ends_with(ext))
        })
        .map(|m| Hit {
            value: m.as_str().to_string(),
            span: m.range(),
        })
}

pub(crate) fn find_phone(text: &str) -> Option<Hit<String>> {
    PHONE_RE.find(text).map(|m| Hit {
        value: m.as_str().to_string(),
        span: m.range(),
    })
}

/// First `City, ST 12345` whose state is a real state code.
pub(crate) fn find_address(text: &str) -> Option<Hit<(String, String)>> {
    ADDRESS_RE.captures_iter(text).find_map(|caps| {
        let state = state_code(&caps[2])?;
        let city = strip_lead_words(&caps[1]);
        if city.is_empty() {
            return None;
        }
        let whole = caps.get(0)?;
        Some(Hit {
            value: (city.to_string(), state.to_string()),
            span: whole.range(),
        })
    })
}

fn strip_lead_words(city: &str) -> &str {
    let mut rest = city.trim();
    loop {
        let Some((first, tail)) = rest.split_once(' ') else {
            return rest;
        };
        if CITY_LEAD_WORDS.contains(&first) {
            rest = tail.trim_start();
        } else {
            return rest;
        }
    }
}

/// Earliest bonding-capacity statement, numeric or spelled out.
pub(crate) fn find_bond(text: &str) -> Option<Hit<u64>> {
    let numeric = BOND_RE.captures_iter(text).find_map(|caps| {
        let value = amount_from_parts(&caps[1], caps.get(2).map(|m| m.as_str()))?;
        Some(Hit {
            value,
            span: caps.get(0)?.range(),
        })
    });
    let words = BOND_WORDS_RE.captures_iter(text).find_map(|caps| {
        let base = parse_word_number(&caps[1])?;
        let value = base.checked_mul(multiplier(Some(&caps[2])))?;
        Some(Hit {
            value,
            span: caps.get(0)?.range(),
        })
    });

    match (numeric, words) {
        (Some(a), Some(b)) => Some(if a.span.start <= b.span.start { a } else { b }),
        (a, b) => a.or(b),
    }
}

/// First license number containing at least one digit.
pub(crate) fn find_license(text: &str) -> Option<Hit<String>> {
    LICENSE_RE.captures_iter(text).find_map(|caps| {
        let number = caps.get(1)?;
        if !number.as_str().chars().any(|c| c.is_ascii_digit()) {
            return None;
        }
        Some(Hit {
            value: number.as_str().to_string(),
            span: caps.get(0)?.range(),
        })
    })
}

// ---------------------------------------------------------------------------
// Amounts
// ---------------------------------------------------------------------------

/// Normalize a money expression to whole dollars.
///
/// Accepts `5000000`, `$5,000,000`, `$5M`, `5.5 million`, `five million`,
/// `twenty-five million dollars`.
pub fn normalize_amount(raw: &str) -> Option<u64> {
    let lower = raw.trim().to_lowercase();
    if let Some(caps) = AMOUNT_RE.captures(&lower) {
        return amount_from_parts(&caps[1], caps.get(2).map(|m| m.as_str()));
    }

    let cleaned = lower.replace("dollars", " ").replace('$', " ");
    let mut words: Vec<&str> = cleaned
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|w| !w.is_empty())
        .collect();
    let unit = match words.last().copied() {
        Some(u @ ("million" | "thousand")) => {
            words.pop();
            Some(u)
        }
        _ => None,
    };
    parse_word_number(&words.join(" "))?.checked_mul(multiplier(unit))
}

fn amount_from_parts(digits: &str, unit: Option<&str>) -> Option<u64> {
    let value: f64 = digits.replace(',', "").parse().ok()?;
    let dollars = value * multiplier(unit) as f64;
    (dollars.is_finite() && dollars >= 0.0 && dollars < u64::MAX as f64).then(|| dollars.round() as u64)
}

fn multiplier(unit: Option<&str>) -> u64 {
    match unit.map(str::to_ascii_lowercase).as_deref() {
        Some("million" | "mil" | "mm" | "m") => 1_000_000,
        Some("thousand" | "k") => 1_000,
        _ => 1,
    }
}

/// `"twenty five"` → 25, `"a"` → 1, `"one hundred"` → 100.
fn parse_word_number(words: &str) -> Option<u64> {
    let mut total: u64 = 0;
    let mut seen = false;
    for word in words
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|w| !w.is_empty())
    {
        let word = word.to_ascii_lowercase();
        let value = match word.as_str() {
            "and" => continue,
            "a" | "an" | "one" => 1,
            "two" => 2,
            "three" => 3,
            "four" => 4,
            "five" => 5,
            "six" => 6,
            "seven" => 7,
            "eight" => 8,
            "nine" => 9,
            "ten" => 10,
            "eleven" => 11,
            "twelve" => 12,
            "thirteen" => 13,
            "fourteen" => 14,
            "fifteen" => 15,
            "sixteen" => 16,
            "seventeen" => 17,
            "eighteen" => 18,
            "nineteen" => 19,
            "twenty" => 20,
            "thirty" => 30,
            "forty" => 40,
            "fifty" => 50,
            "sixty" => 60,
            "seventy" => 70,
            "eighty" => 80,
            "ninety" => 90,
            "hundred" => {
                total = total.max(1) * 100;
                seen = true;
                continue;
            }
            _ => return None,
        };
        total += value;
        seen = true;
    }
    seen.then_some(total)
}

/// Whether `text` states `value` as a figure, numeric or spelled out.
pub(crate) fn mentions_amount(text: &str, value: u64) -> bool {
    let numeric = AMOUNT_RE
        .captures_iter(text)
        .any(|caps| amount_from_parts(&caps[1], caps.get(2).map(|m| m.as_str())) == Some(value));
    if numeric {
        return true;
    }

    let words: Vec<String> = text
        .split(|c: char| c.is_whitespace() || c == '-')
        .map(|w| w.trim_matches(|c: char| !c.is_ascii_alphabetic()).to_ascii_lowercase())
        .filter(|w| !w.is_empty())
        .collect();
    words.iter().enumerate().any(|(i, word)| {
        let unit = match word.as_str() {
            "million" | "thousand" => Some(word.as_str()),
            _ => return false,
        };
        (i.saturating_sub(6)..i).any(|from| {
            parse_word_number(&words[from..i].join(" "))
                .and_then(|base| base.checked_mul(multiplier(unit)))
                == Some(value)
        })
    })
}

// ---------------------------------------------------------------------------
// Excerpts
// ---------------------------------------------------------------------------

/// Characters of context kept on each side of a hit.
pub(crate) const EXCERPT_RADIUS: usize = 100;

/// A trimmed window of `text` around `span`, cut on char boundaries.
pub(crate) fn excerpt<'a>(text: &'a str, span: &Range<usize>) -> &'a str {
    let mut start = span.start.saturating_sub(EXCERPT_RADIUS);
    while !text.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (span.end + EXCERPT_RADIUS).min(text.len());
    while !text.is_char_boundary(end) {
        end += 1;
    }
    text[start..end].trim()
}
