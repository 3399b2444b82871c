//! URL normalization and host-based source classification.

use url::{Host, Url};

use subscout_shared::SourceKind;

/// Aggregator and directory hosts. Listings there describe companies but are
/// not the companies' own word.
const DIRECTORY_HOSTS: &[&str] = &[
    "yelp.com",
    "bbb.org",
    "angi.com",
    "angieslist.com",
    "homeadvisor.com",
    "thumbtack.com",
    "buildzoom.com",
    "houzz.com",
    "yellowpages.com",
    "manta.com",
    "mapquest.com",
    "nextdoor.com",
    "porch.com",
    "linkedin.com",
    "facebook.com",
];

/// Lower-cased host with any leading `www.` removed.
pub fn host_key(url: &Url) -> Option<String> {
    let host = match url.host()? {
        Host::Domain(d) => d.to_ascii_lowercase(),
        Host::Ipv4(ip) => ip.to_string(),
        Host::Ipv6(ip) => ip.to_string(),
    };
    Some(host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
}

/// Whether `host` belongs to a known directory or aggregator.
pub fn is_directory_host(host: &str) -> bool {
    let host = host.trim_start_matches("www.");
    DIRECTORY_HOSTS
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{d}")))
}

/// Whether `host` belongs to a government body.
pub fn is_regulatory_host(host: &str) -> bool {
    host.ends_with(".gov") || (host.contains(".state.") && host.ends_with(".us"))
}

/// Classify a page by its host alone. Search snippets are tagged by the
/// discovery pass, never here.
pub fn classify_source(url: &Url) -> SourceKind {
    match host_key(url) {
        Some(host) if is_directory_host(&host) => SourceKind::Directory,
        Some(host) if is_regulatory_host(&host) => SourceKind::Regulatory,
        _ => SourceKind::CompanySite,
    }
}

/// Canonical form used to count distinct sources: fragment stripped and a
/// trailing slash trimmed from non-root paths.
pub fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);

    let path = normalized.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        normalized.set_path(path.trim_end_matches('/'));
    }
    normalized.to_string()
}
