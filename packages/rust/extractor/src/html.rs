//! DOM helpers: visible text nodes, page names, and JSON-LD business entities.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use serde_json::{Map, Value};

use subscout_shared::state_code;

static BODY_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("body").expect("body selector"));
static OG_SITE_NAME_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"meta[property="og:site_name"]"#).expect("og:site_name selector")
});
static TITLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("title selector"));
static H1_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").expect("h1 selector"));
static JSON_LD_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"script[type="application/ld+json"]"#).expect("json-ld selector")
});
static MAILTO_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"a[href^="mailto:"]"#).expect("mailto selector"));

/// Separators between a title's name segment and its tagline.
static TITLE_SEP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\|\s*|\s+[-–—]\s+|:\s+").expect("title separator regex"));

/// Elements whose text is never visible content.
const SKIP_TAGS: &[&str] = &["script", "style", "noscript", "template"];

/// schema.org types that describe a company.
const BUSINESS_TYPES: &[&str] = &[
    "LocalBusiness",
    "Organization",
    "Corporation",
    "GeneralContractor",
    "HomeAndConstructionBusiness",
    "HVACBusiness",
    "Electrician",
    "Plumber",
    "RoofingContractor",
    "HousePainter",
    "ProfessionalService",
];

// ---------------------------------------------------------------------------
// Text
// ---------------------------------------------------------------------------

/// Non-blank text nodes of `<body>` in document order, excluding scripts and styles.
pub(crate) fn text_nodes(doc: &Html) -> Vec<String> {
    let Some(body) = doc.select(&BODY_SEL).next() else {
        return Vec::new();
    };

    body.descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let parent = node.parent()?;
            let tag = parent.value().as_element()?.name();
            if SKIP_TAGS.contains(&tag) {
                return None;
            }
            let text: &str = text;
            (!text.trim().is_empty()).then(|| text.to_string())
        })
        .collect()
}

/// Split a title into its name and tagline segments.
pub(crate) fn title_segments(title: &str) -> Vec<&str> {
    TITLE_SEP_RE
        .split(title)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Company name for a single-company page: `og:site_name`, the first JSON-LD
/// entity, the first `<title>` segment, then the first `<h1>`.
pub(crate) fn page_name(doc: &Html, entities: &[BusinessEntity]) -> Option<String> {
    let og = doc
        .select(&OG_SITE_NAME_SEL)
        .filter_map(|el| el.value().attr("content"))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string);
    if og.is_some() {
        return og;
    }

    if let Some(entity) = entities.first() {
        return Some(entity.name.clone());
    }

    let title = doc
        .select(&TITLE_SEL)
        .next()
        .map(|el| el.text().collect::<String>())
        .and_then(|t| title_segments(&t).first().map(|s| s.to_string()));
    if title.is_some() {
        return title;
    }

    doc.select(&H1_SEL)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// First `mailto:` address on the page.
pub(crate) fn mailto(doc: &Html) -> Option<String> {
    doc.select(&MAILTO_SEL)
        .filter_map(|el| el.value().attr("href"))
        .filter_map(|href| href.strip_prefix("mailto:"))
        .map(|addr| addr.split('?').next().unwrap_or(addr).trim().to_string())
        .find(|addr| addr.contains('@'))
}

// ---------------------------------------------------------------------------
// JSON-LD
// ---------------------------------------------------------------------------

/// A company described by structured data on the page.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct BusinessEntity {
    pub name: String,
    pub url: Option<String>,
    pub telephone: Option<String>,
    pub email: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
}

/// Every business entity in the page's JSON-LD blocks. Malformed blocks are skipped.
pub(crate) fn business_entities(doc: &Html) -> Vec<BusinessEntity> {
    let mut out = Vec::new();
    for script in doc.select(&JSON_LD_SEL) {
        let raw: String = script.text().collect();
        let Ok(value) = serde_json::from_str::<Value>(raw.trim()) else {
            continue;
        };
        collect_entities(&value, &mut out);
    }
    out
}

fn collect_entities(value: &Value, out: &mut Vec<BusinessEntity>) {
    match value {
        Value::Array(items) => items.iter().for_each(|v| collect_entities(v, out)),
        Value::Object(map) => {
            for nested in ["@graph", "itemListElement", "item"] {
                if let Some(inner) = map.get(nested) {
                    collect_entities(inner, out);
                }
            }
            if is_business(map.get("@type")) {
                if let Some(entity) = entity_from(map) {
                    out.push(entity);
                }
            }
        }
        _ => {}
    }
}

fn is_business(kind: Option<&Value>) -> bool {
    let matches = |t: &str| {
        BUSINESS_TYPES.contains(&t) || t.ends_with("Contractor") || t.ends_with("Business")
    };
    match kind {
        Some(Value::String(t)) => matches(t),
        Some(Value::Array(ts)) => ts.iter().filter_map(Value::as_str).any(matches),
        _ => false,
    }
}

fn entity_from(map: &Map<String, Value>) -> Option<BusinessEntity> {
    let text = |key: &str| {
        map.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let name = text("name")?;
    let address = match map.get("address") {
        Some(Value::Array(items)) => items.first(),
        other => other,
    }
    .and_then(Value::as_object);
    let address_field = |key: &str| {
        address
            .and_then(|a| a.get(key))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };

    Some(BusinessEntity {
        name,
        url: text("url"),
        telephone: text("telephone"),
        email: text("email").map(|e| e.trim_start_matches("mailto:").to_string()),
        city: address_field("addressLocality").map(str::to_string),
        state: address_field("addressRegion")
            .and_then(state_code)
            .map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_nodes_skip_scripts() {
        let doc = Html::parse_document(
            r#"<html><head><title>T</title></head><body>
                <h1>XYZ Mechanical</h1>
                <script>var x = "hidden";</script>
                <p>Call (512) 555-0100</p>
            </body></html>"#,
        );
        let nodes = text_nodes(&doc);
        assert_eq!(nodes.len(), 2);
        assert!(nodes.iter().all(|n| !n.contains("hidden")));
    }

    #[test]
    fn page_name_prefers_og_site_name() {
        let doc = Html::parse_document(
            r#"<html><head>
                <meta property="og:site_name" content="XYZ Mechanical">
                <title>Home | Something Else</title>
            </head><body><h1>Welcome</h1></body></html>"#,
        );
        assert_eq!(page_name(&doc, &[]).as_deref(), Some("XYZ Mechanical"));
    }

    #[test]
    fn page_name_falls_back_to_title_segment() {
        let doc = Html::parse_document(
            "<html><head><title>XYZ Mechanical - Commercial HVAC in Austin</title></head><body></body></html>",
        );
        assert_eq!(page_name(&doc, &[]).as_deref(), Some("XYZ Mechanical"));

        let doc = Html::parse_document("<html><body><h1> Lone Star Air </h1></body></html>");
        assert_eq!(page_name(&doc, &[]).as_deref(), Some("Lone Star Air"));
    }

    #[test]
    fn title_segments_keep_hyphenated_names() {
        assert_eq!(title_segments("A-1 Plumbing | Austin, TX"), vec!["A-1 Plumbing", "Austin, TX"]);
    }

    #[test]
    fn json_ld_entities_from_item_list() {
        let doc = Html::parse_document(
            r#"<html><head><script type="application/ld+json">
            {
              "@context": "https://schema.org",
              "@type": "ItemList",
              "itemListElement": [
                {"@type": "ListItem", "position": 1, "item": {
                  "@type": "HVACBusiness", "name": "XYZ Mechanical",
                  "telephone": "(512) 555-0100",
                  "address": {"addressLocality": "Austin", "addressRegion": "Texas"}
                }},
                {"@type": "ListItem", "position": 2, "item": {
                  "@type": ["LocalBusiness"], "name": "Capital Air", "url": "https://capitalair.com"
                }},
                {"@type": "ListItem", "position": 3, "item": {"@type": "Person", "name": "Jane"}}
              ]
            }
            </script><script type="application/ld+json">{ not json</script></head><body></body></html>"#,
        );
        let entities = business_entities(&doc);
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].state.as_deref(), Some("TX"));
        assert_eq!(entities[0].city.as_deref(), Some("Austin"));
        assert_eq!(entities[1].url.as_deref(), Some("https://capitalair.com"));
    }

    #[test]
    fn mailto_links() {
        let doc = Html::parse_document(
            r#"<html><body><a href="mailto:bids@xyzmechanical.com?subject=RFQ">Email us</a></body></html>"#,
        );
        assert_eq!(mailto(&doc).as_deref(), Some("bids@xyzmechanical.com"));
    }
}
