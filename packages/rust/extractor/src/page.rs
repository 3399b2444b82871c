//! Turning one piece of raw evidence into anchored partial candidates.

use scraper::Html;
use url::Url;

use subscout_discovery::classify_source;
use subscout_shared::{PartialCandidate, RawEvidence, SourceKind};

use crate::html::{BusinessEntity, business_entities, mailto, page_name, text_nodes, title_segments};
use crate::patterns::{
    Hit, excerpt, find_address, find_bond, find_email, find_license, find_phone,
};

/// Directory brands that trail search-result titles.
const DIRECTORY_BRANDS: &[&str] = &[
    "yelp",
    "bbb",
    "better business bureau",
    "angi",
    "angie's list",
    "homeadvisor",
    "thumbtack",
    "houzz",
    "yellow pages",
    "yellowpages",
    "buildzoom",
    "manta",
    "mapquest",
    "nextdoor",
    "porch",
    "linkedin",
    "facebook",
];

/// Evidence strength, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Anchor {
    Name,
    Phone,
    Address,
    License,
    Bond,
}

/// Records extracted from one page, plus what the model fallback needs.
#[derive(Debug, Default)]
pub(crate) struct PageDraft {
    pub records: Vec<PartialCandidate>,
    /// Visible text of a single-company page whose record is missing
    /// city, state or bond amount.
    pub model_text: Option<String>,
    /// Strength of the first record's evidence.
    pub anchor: Option<Anchor>,
}

// ---------------------------------------------------------------------------
// Search snippets
// ---------------------------------------------------------------------------

/// One record per snippet, named from the hit title.
pub(crate) fn extract_snippet(raw: &RawEvidence) -> Option<PartialCandidate> {
    let (title, snippet) = raw
        .content
        .split_once('\n')
        .unwrap_or((raw.content.as_str(), ""));
    let name = snippet_name(title)?;

    let evidence = if snippet.trim().is_empty() {
        title.trim()
    } else {
        snippet.trim()
    };
    let mut record = PartialCandidate::anchored(name, raw, evidence);

    record.website = Url::parse(&raw.source_url)
        .ok()
        .filter(|url| classify_source(url) == SourceKind::CompanySite)
        .and_then(|url| url.join("/").ok())
        .map(String::from);
    record.email = find_email(&raw.content).map(|h| h.value);
    record.phone_number = find_phone(&raw.content).map(|h| h.value);
    if let Some(Hit {
        value: (city, state),
        ..
    }) = find_address(&raw.content)
    {
        record.city = Some(city);
        record.state = Some(state);
    }
    record.bond_amount = find_bond(&raw.content).map(|h| h.value);
    record.lic_number = find_license(&raw.content).map(|h| h.value);

    Some(record)
}

/// Company name from a result title, or `None` for listicles and blanks.
fn snippet_name(title: &str) -> Option<String> {
    let mut segments = title_segments(title);
    while segments.len() > 1 && segments.last().is_some_and(|s| is_directory_brand(s)) {
        segments.pop();
    }
    let name = segments.first()?.trim();
    if name.is_empty() || is_directory_brand(name) || is_listing_title(name) {
        return None;
    }
    Some(name.to_string())
}

fn is_directory_brand(segment: &str) -> bool {
    let lower = segment.trim().to_lowercase();
    DIRECTORY_BRANDS
        .iter()
        .any(|b| lower == *b || lower.starts_with(&format!("{b} ")) || lower.starts_with(&format!("{b}.")))
}

/// `Top 10 HVAC Contractors near Austin` describes a list, not a company.
fn is_listing_title(name: &str) -> bool {
    let lower = name.to_lowercase();
    let first = lower.split_whitespace().next().unwrap_or("");
    ["top ", "best ", "the best ", "the top "]
        .iter()
        .any(|p| lower.starts_with(p))
        || lower.contains(" near ")
        || first.chars().all(|c| c.is_ascii_digit())
}

// ---------------------------------------------------------------------------
// Pages
// ---------------------------------------------------------------------------

/// Records from an HTML page. Listings with several business entities yield
/// one record per entity; any other page yields at most one record.
pub(crate) fn extract_page(raw: &RawEvidence) -> PageDraft {
    let doc = Html::parse_document(&raw.content);
    let nodes = text_nodes(&doc);
    let entities = business_entities(&doc);

    let listing = entities.len() > 1 || (raw.kind != SourceKind::CompanySite && !entities.is_empty());
    if listing {
        let records = entities
            .iter()
            .filter_map(|entity| entity_record(raw, &nodes, entity))
            .collect();
        return PageDraft {
            records,
            ..PageDraft::default()
        };
    }

    let Some(name) = page_name(&doc, &entities) else {
        return PageDraft::default();
    };
    let fallback_email = mailto(&doc);
    single_record(raw, &nodes, name, entities.first(), fallback_email)
}

fn entity_record(
    raw: &RawEvidence,
    nodes: &[String],
    entity: &BusinessEntity,
) -> Option<PartialCandidate> {
    let evidence = name_evidence(raw, nodes, &entity.name)?;
    let mut record = PartialCandidate::anchored(entity.name.clone(), raw, evidence);
    record.website = entity
        .url
        .as_deref()
        .and_then(|u| Url::parse(u).ok())
        .filter(|u| classify_source(u) == SourceKind::CompanySite)
        .map(String::from);
    record.phone_number = entity.telephone.clone();
    record.email = entity.email.clone();
    record.city = entity.city.clone();
    record.state = entity.state.clone();
    Some(record)
}

fn single_record(
    raw: &RawEvidence,
    nodes: &[String],
    name: String,
    entity: Option<&BusinessEntity>,
    fallback_email: Option<String>,
) -> PageDraft {
    let mut email = None;
    let mut phone = None;
    let mut address = None;
    let mut bond = None;
    let mut license = None;
    // (anchor, node index, hit span), first hit per kind.
    let mut anchors = Vec::new();

    for (i, node) in nodes.iter().enumerate() {
        if email.is_none() {
            email = find_email(node).map(|h| h.value);
        }
        if phone.is_none() {
            if let Some(hit) = find_phone(node) {
                anchors.push((Anchor::Phone, i, hit.span));
                phone = Some(hit.value);
            }
        }
        if address.is_none() {
            if let Some(hit) = find_address(node) {
                anchors.push((Anchor::Address, i, hit.span));
                address = Some(hit.value);
            }
        }
        if bond.is_none() {
            if let Some(hit) = find_bond(node) {
                anchors.push((Anchor::Bond, i, hit.span));
                bond = Some(hit.value);
            }
        }
        if license.is_none() {
            if let Some(hit) = find_license(node) {
                anchors.push((Anchor::License, i, hit.span));
                license = Some(hit.value);
            }
        }
    }

    anchors.sort_by(|a, b| b.0.cmp(&a.0));
    let strongest = anchors.iter().find_map(|(anchor, i, span)| {
        let cut = excerpt(&nodes[*i], span);
        raw.content.contains(cut).then(|| (cut.to_string(), *anchor))
    });
    let Some((evidence, anchor)) =
        strongest.or_else(|| name_evidence(raw, nodes, &name).map(|e| (e, Anchor::Name)))
    else {
        return PageDraft::default();
    };

    let mut record = PartialCandidate::anchored(name, raw, evidence);
    record.website = match raw.kind {
        SourceKind::CompanySite => Url::parse(&raw.source_url)
            .ok()
            .and_then(|u| u.join("/").ok())
            .map(String::from),
        _ => entity
            .and_then(|e| e.url.as_deref())
            .and_then(|u| Url::parse(u).ok())
            .filter(|u| classify_source(u) == SourceKind::CompanySite)
            .map(String::from),
    };
    record.email = email
        .or(fallback_email)
        .or_else(|| entity.and_then(|e| e.email.clone()));
    record.phone_number = phone.or_else(|| entity.and_then(|e| e.telephone.clone()));
    match address {
        Some((city, state)) => {
            record.city = Some(city);
            record.state = Some(state);
        }
        None => {
            record.city = entity.and_then(|e| e.city.clone());
            record.state = entity.and_then(|e| e.state.clone());
        }
    }
    record.bond_amount = bond;
    record.lic_number = license;

    let needs_model =
        record.city.is_none() || record.state.is_none() || record.bond_amount.is_none();
    let model_text = needs_model.then(|| nodes.join(" "));

    PageDraft {
        records: vec![record],
        model_text,
        anchor: Some(anchor),
    }
}

/// Excerpt around the first text node mentioning `name`, else the bare name
/// when it appears in the raw content.
fn name_evidence(raw: &RawEvidence, nodes: &[String], name: &str) -> Option<String> {
    for node in nodes {
        if let Some(start) = node.find(name) {
            let cut = excerpt(node, &(start..start + name.len()));
            if raw.content.contains(cut) {
                return Some(cut.to_string());
            }
        }
    }
    raw.content.contains(name).then(|| name.to_string())
}
