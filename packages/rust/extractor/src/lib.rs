//! Field extraction: raw evidence in, anchored partial candidates out.
//!
//! Patterns run first over the page's visible text nodes. A configured
//! [`LanguageModel`] only fills fields the patterns left empty, and only on a
//! record that is already anchored to verbatim page text. Extraction fails
//! soft: malformed content yields zero records.

mod html;
mod model;
mod page;
mod patterns;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use subscout_shared::{PartialCandidate, RawEvidence, Result, SourceKind, state_code};

pub use model::{
    LanguageModel, MAX_MODEL_INPUT_CHARS, ModelFields, OpenRouterModel, parse_model_reply,
    truncate_content,
};
pub use patterns::normalize_amount;

use page::{Anchor, extract_page, extract_snippet};
use patterns::mentions_amount;

/// Longest evidence excerpt accepted from a model, in bytes.
const MAX_MODEL_EVIDENCE: usize = 400;

/// Turns one [`RawEvidence`] into zero or more [`PartialCandidate`]s.
#[async_trait]
pub trait FieldExtractor: Send + Sync {
    async fn extract(&self, raw: &RawEvidence) -> Result<Vec<PartialCandidate>>;
}

// ---------------------------------------------------------------------------
// PageExtractor
// ---------------------------------------------------------------------------

/// Pattern-first extractor with an optional model fallback.
#[derive(Clone, Default)]
pub struct PageExtractor {
    model: Option<Arc<dyn LanguageModel>>,
}

impl PageExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `model` for fields the patterns could not find.
    pub fn with_model(model: Arc<dyn LanguageModel>) -> Self {
        Self { model: Some(model) }
    }
}

#[async_trait]
impl FieldExtractor for PageExtractor {
    #[instrument(skip_all, fields(url = %raw.source_url, kind = raw.kind.as_str()))]
    async fn extract(&self, raw: &RawEvidence) -> Result<Vec<PartialCandidate>> {
        if raw.kind == SourceKind::SearchSnippet {
            return Ok(extract_snippet(raw).into_iter().collect());
        }

        let mut draft = extract_page(raw);

        if let (Some(model), Some(text), Some(record)) =
            (&self.model, draft.model_text.take(), draft.records.first_mut())
        {
            match model.extract_fields(&text, &raw.source_url).await {
                Ok(fields) => {
                    let anchor = draft.anchor.unwrap_or(Anchor::Name);
                    apply_model_fields(record, fields, raw, anchor);
                }
                Err(e) => warn!(model = model.name(), error = %e, "model extraction failed, keeping pattern fields"),
            }
        }

        debug!(records = draft.records.len(), "extraction completed");
        Ok(draft.records)
    }
}

/// Fill missing fields from a model answer. Every accepted value must be
/// anchored in the page: contact details and locations occur verbatim, and
/// a bond amount only counts when the model's excerpt is page text stating
/// that same figure.
fn apply_model_fields(
    record: &mut PartialCandidate,
    fields: ModelFields,
    raw: &RawEvidence,
    anchor: Anchor,
) {
    let in_page = |value: &String| !value.trim().is_empty() && raw.content.contains(value.trim());

    let evidence = fields
        .evidence_text
        .as_ref()
        .filter(|t| in_page(*t) && t.trim().len() <= MAX_MODEL_EVIDENCE)
        .map(|t| t.trim().to_string());

    if record.city.is_none() {
        record.city = fields.city.filter(in_page).map(|c| c.trim().to_string());
    }
    if record.state.is_none() {
        record.state = fields
            .state
            .filter(in_page)
            .as_deref()
            .and_then(state_code)
            .map(str::to_string);
    }

    let mut model_bond = false;
    if record.bond_amount.is_none() {
        if let (Some(amount), Some(text)) = (fields.bond_amount, evidence.as_deref()) {
            if mentions_amount(text, amount) {
                record.bond_amount = Some(amount);
                model_bond = true;
            } else {
                debug!(amount, "model bond amount not stated in its excerpt, dropped");
            }
        }
    }
    if record.email.is_none() {
        record.email = fields.email.filter(in_page).map(|e| e.trim().to_string());
    }
    if record.phone_number.is_none() {
        record.phone_number = fields
            .phone_number
            .filter(in_page)
            .map(|p| p.trim().to_string());
    }

    let stronger = anchor == Anchor::Name || (model_bond && anchor < Anchor::Bond);
    if stronger {
        if let Some(text) = evidence {
            record.evidence_text = text;
        }
    }
}
