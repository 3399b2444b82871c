//! Deduplication of partial candidate records into unique candidates.
//!
//! Two partials describe the same company iff their merge keys are equal.
//! The key is the normalized name plus, in order of preference, the website
//! domain, the `city|state` pair, or the host of the evidence URL.

use std::collections::{BTreeMap, HashMap};

use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};
use url::Url;

use subscout_shared::{Candidate, PartialCandidate, Result, ScoutError};

/// Trailing words that do not distinguish one company from another.
const CORPORATE_SUFFIXES: &[&str] = &[
    "inc",
    "llc",
    "ltd",
    "co",
    "corp",
    "corporation",
    "company",
    "lp",
    "llp",
    "pllc",
];

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// `"XYZ Mechanical, Inc."` → `"xyz mechanical"`.
pub fn normalize_name(name: &str) -> String {
    let lowered = name.to_lowercase().replace('&', " and ");
    let cleaned: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();

    let mut words: Vec<&str> = cleaned.split_whitespace().collect();
    while words.len() > 1 && words.last().is_some_and(|w| CORPORATE_SUFFIXES.contains(w)) {
        words.pop();
    }
    words.join(" ")
}

/// `"https://www.XYZMechanical.com/about"` → `"xyzmechanical.com"`.
pub fn normalize_domain(website: &str) -> Option<String> {
    let trimmed = website.trim();
    if trimmed.is_empty() {
        return None;
    }
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    let url = Url::parse(&with_scheme).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    Some(host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
}

/// Canonical merge key, or `None` when the name normalizes to nothing.
pub fn merge_key(partial: &PartialCandidate) -> Option<String> {
    let name = normalize_name(&partial.name);
    if name.is_empty() {
        return None;
    }

    if let Some(domain) = partial.website.as_deref().and_then(normalize_domain) {
        return Some(format!("{name}|domain:{domain}"));
    }

    let city = partial.city.as_deref().map(normalize_name).filter(|c| !c.is_empty());
    let state = partial
        .state
        .as_deref()
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty());
    if let (Some(city), Some(state)) = (city, state) {
        return Some(format!("{name}|loc:{city}|{state}"));
    }

    let host = normalize_domain(&partial.evidence_url).unwrap_or_default();
    Some(format!("{name}|src:{host}"))
}

/// First 16 hex characters of SHA-256 over the merge key.
pub fn candidate_id(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Merge partial records into unique candidates, sorted by id.
///
/// Field values come from the most authoritative source that has one
/// (company site > regulatory > directory > search snippet), ties broken by
/// the most recent fetch. City and state resolve together from one source.
#[instrument(skip_all, fields(partials = partials.len()))]
pub fn merge(partials: Vec<PartialCandidate>) -> Result<Vec<Candidate>> {
    let mut groups: BTreeMap<String, Vec<PartialCandidate>> = BTreeMap::new();
    let mut dropped = 0usize;
    for partial in partials {
        match merge_key(&partial) {
            Some(key) => groups.entry(key).or_default().push(partial),
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        debug!(dropped, "partials without a usable name dropped");
    }

    let mut ids: HashMap<String, String> = HashMap::new();
    let mut candidates = Vec::with_capacity(groups.len());
    for (key, group) in groups {
        let id = candidate_id(&key);
        register_id(&mut ids, &id, &key)?;
        candidates.push(resolve(id, group));
    }
    candidates.sort_by(|a, b| a.id.cmp(&b.id));

    info!(candidates = candidates.len(), "deduplication completed");
    Ok(candidates)
}

fn register_id(ids: &mut HashMap<String, String>, id: &str, key: &str) -> Result<()> {
    match ids.get(id) {
        Some(existing) if existing != key => Err(ScoutError::DeduplicationAmbiguity(format!(
            "keys '{existing}' and '{key}' both map to candidate id {id}"
        ))),
        Some(_) => Ok(()),
        None => {
            ids.insert(id.to_string(), key.to_string());
            Ok(())
        }
    }
}

/// Collapse one key group into a candidate.
fn resolve(id: String, mut group: Vec<PartialCandidate>) -> Candidate {
    group.sort_by(|a, b| {
        b.source_kind
            .cmp(&a.source_kind)
            .then_with(|| b.fetched_at.cmp(&a.fetched_at))
    });

    fn first<T: Clone>(
        group: &[PartialCandidate],
        field: impl Fn(&PartialCandidate) -> &Option<T>,
    ) -> Option<T> {
        group.iter().find_map(|p| field(p).clone())
    }

    let bond_amount = first(&group, |p| &p.bond_amount);
    let (city, state) = group
        .iter()
        .find(|p| p.city.is_some() || p.state.is_some())
        .map(|p| (p.city.clone(), p.state.clone()))
        .unwrap_or_default();

    // Evidence stays with the most authoritative kind; within it, the record
    // that states the resolved bond amount is the strongest excerpt.
    let top_kind = group[0].source_kind;
    let evidence = group
        .iter()
        .take_while(|p| p.source_kind == top_kind)
        .find(|p| bond_amount.is_some() && p.bond_amount == bond_amount)
        .unwrap_or(&group[0]);

    let mut source_urls: Vec<String> = group
        .iter()
        .flat_map(|p| std::iter::once(p.evidence_url.clone()).chain(p.source_urls.iter().cloned()))
        .collect();
    source_urls.sort();
    source_urls.dedup();

    let last_checked = group
        .iter()
        .map(|p| p.fetched_at)
        .max()
        .unwrap_or(evidence.fetched_at);

    Candidate {
        id,
        name: group[0].name.trim().to_string(),
        website: first(&group, |p| &p.website),
        email: first(&group, |p| &p.email),
        phone_number: first(&group, |p| &p.phone_number),
        city,
        state,
        lic_active: None,
        lic_number: first(&group, |p| &p.lic_number),
        bond_amount,
        relevant_project_count: None,
        evidence_url: evidence.evidence_url.clone(),
        evidence_text: evidence.evidence_text.clone(),
        evidence_kind: evidence.source_kind,
        source_urls,
        score: None,
        last_checked,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use subscout_shared::SourceKind;

    use super::*;

    fn partial(name: &str, kind: SourceKind, url: &str, age_mins: i64) -> PartialCandidate {
        PartialCandidate {
            name: name.into(),
            website: None,
            email: None,
            phone_number: None,
            city: None,
            state: None,
            lic_number: None,
            bond_amount: None,
            evidence_url: url.into(),
            evidence_text: format!("{name} evidence"),
            source_kind: kind,
            fetched_at: Utc::now() - Duration::minutes(age_mins),
            source_urls: Vec::new(),
        }
    }

    #[test]
    fn name_normalization() {
        assert_eq!(normalize_name("XYZ Mechanical, Inc."), "xyz mechanical");
        assert_eq!(normalize_name("A&B  Plumbing LLC"), "a and b plumbing");
        assert_eq!(normalize_name("The Company"), "the");
        assert_eq!(normalize_name("Co"), "co");
        assert_eq!(normalize_name("..."), "");
    }

    #[test]
    fn domain_normalization() {
        assert_eq!(
            normalize_domain("https://www.XYZMechanical.com/about").as_deref(),
            Some("xyzmechanical.com")
        );
        assert_eq!(normalize_domain("xyzmechanical.com").as_deref(), Some("xyzmechanical.com"));
        assert_eq!(normalize_domain("  "), None);
    }

    #[test]
    fn key_prefers_domain_then_location_then_source_host() {
        let mut p = partial("XYZ Mechanical", SourceKind::Directory, "https://www.yelp.com/biz/xyz", 0);
        assert_eq!(merge_key(&p).unwrap(), "xyz mechanical|src:yelp.com");

        p.city = Some("Austin".into());
        p.state = Some("TX".into());
        assert_eq!(merge_key(&p).unwrap(), "xyz mechanical|loc:austin|tx");

        p.website = Some("https://xyzmechanical.com/".into());
        assert_eq!(merge_key(&p).unwrap(), "xyz mechanical|domain:xyzmechanical.com");

        assert_eq!(candidate_id("xyz mechanical|domain:xyzmechanical.com").len(), 16);
    }

    #[test]
    fn company_site_phone_wins_over_directory() {
        let mut site = partial(
            "XYZ Mechanical",
            SourceKind::CompanySite,
            "https://xyzmechanical.com/about",
            30,
        );
        site.website = Some("https://xyzmechanical.com/".into());
        site.phone_number = Some("(512) 555-0100".into());

        let mut listing = partial(
            "XYZ Mechanical Inc",
            SourceKind::Directory,
            "https://www.bbb.org/us/tx/austin/profile/xyz",
            0,
        );
        listing.website = Some("http://www.xyzmechanical.com".into());
        listing.phone_number = Some("(512) 555-0199".into());
        listing.email = Some("info@xyzmechanical.com".into());

        let merged = merge(vec![listing, site]).unwrap();
        assert_eq!(merged.len(), 1);
        let c = &merged[0];
        assert_eq!(c.phone_number.as_deref(), Some("(512) 555-0100"));
        // Missing on the site, so the directory fills it.
        assert_eq!(c.email.as_deref(), Some("info@xyzmechanical.com"));
        assert_eq!(c.evidence_url, "https://xyzmechanical.com/about");
        assert_eq!(c.evidence_kind, SourceKind::CompanySite);
        assert_eq!(c.source_urls.len(), 2);
    }

    #[test]
    fn recency_breaks_ties_within_a_source_kind() {
        let mut old = partial("Lone Star Air", SourceKind::Directory, "https://www.yelp.com/biz/lsa", 60);
        old.phone_number = Some("512-555-0001".into());
        let mut new = partial("Lone Star Air", SourceKind::Directory, "https://www.yelp.com/biz/lsa-2", 1);
        new.phone_number = Some("512-555-0002".into());

        let merged = merge(vec![old, new]).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].phone_number.as_deref(), Some("512-555-0002"));
        assert_eq!(merged[0].evidence_url, "https://www.yelp.com/biz/lsa-2");
    }

    #[test]
    fn bond_statement_is_kept_as_evidence() {
        let mut about = partial("XYZ Mechanical", SourceKind::CompanySite, "https://xyzmechanical.com/about", 10);
        about.website = Some("https://xyzmechanical.com/".into());
        about.bond_amount = Some(6_000_000);
        about.evidence_text = "bonding capacity of $6 million".into();
        let mut projects = partial(
            "XYZ Mechanical",
            SourceKind::CompanySite,
            "https://xyzmechanical.com/projects",
            0,
        );
        projects.website = Some("https://xyzmechanical.com/".into());

        let merged = merge(vec![about, projects]).unwrap();
        assert_eq!(merged[0].evidence_text, "bonding capacity of $6 million");
        assert_eq!(merged[0].bond_amount, Some(6_000_000));
    }

    #[test]
    fn different_keys_stay_apart() {
        let mut a = partial("XYZ Mechanical", SourceKind::CompanySite, "https://xyzmechanical.com/", 0);
        a.website = Some("https://xyzmechanical.com/".into());
        let mut b = partial("XYZ Mechanical", SourceKind::CompanySite, "https://xyz-mech.net/", 0);
        b.website = Some("https://xyz-mech.net/".into());
        let suffix_only = partial("LLC", SourceKind::Directory, "https://www.yelp.com/", 0);

        let merged = merge(vec![a, b, suffix_only]).unwrap();
        assert_eq!(merged.len(), 3);
        assert!(merged.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[test]
    fn merge_is_idempotent() {
        let mut site = partial("XYZ Mechanical", SourceKind::CompanySite, "https://xyzmechanical.com/about", 5);
        site.website = Some("https://xyzmechanical.com/".into());
        site.city = Some("Austin".into());
        site.state = Some("TX".into());
        site.bond_amount = Some(6_000_000);
        let mut snippet = partial("XYZ Mechanical", SourceKind::SearchSnippet, "https://xyzmechanical.com/", 0);
        snippet.website = Some("https://xyzmechanical.com/".into());
        let mut only_city = partial("Capital Air", SourceKind::Directory, "https://www.yelp.com/biz/cap", 3);
        only_city.city = Some("Round Rock".into());

        let once = merge(vec![site, snippet, only_city]).unwrap();
        let twice = merge(once.iter().map(PartialCandidate::from).collect()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn colliding_ids_are_an_ambiguity() {
        let mut ids = HashMap::new();
        register_id(&mut ids, "abcd", "a|domain:a.com").unwrap();
        register_id(&mut ids, "abcd", "a|domain:a.com").unwrap();
        let err = register_id(&mut ids, "abcd", "b|domain:b.com").unwrap_err();
        assert!(matches!(err, ScoutError::DeduplicationAmbiguity(_)));
    }
}
