//! Deterministic candidate scoring and ranking.

use subscout_shared::{Candidate, Query, ScoringWeights};

/// Combines verified attributes into a 0-100 score using a weights table.
#[derive(Debug, Clone, Default)]
pub struct Scorer {
    weights: ScoringWeights,
}

impl Scorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    /// Score `candidate` against `query`. Pure: same inputs, same score.
    pub fn score(&self, candidate: &Candidate, query: &Query) -> u8 {
        let w = &self.weights;
        let mut total = 0.0_f64;

        total += match candidate.lic_active {
            Some(true) => f64::from(w.license_active),
            None => f64::from(w.license_unknown),
            Some(false) => 0.0,
        };

        total += match candidate.bond_amount {
            Some(bond) if bond >= query.min_bond => f64::from(w.bond_met),
            Some(_) => -f64::from(w.bond_unmet_penalty),
            None => 0.0,
        };

        let cap = w.project_cap.max(1);
        let projects = candidate.relevant_project_count.unwrap_or(0).min(cap);
        total += f64::from(w.projects) * f64::from(projects) / f64::from(cap);

        total += f64::from(w.keyword_match) * keyword_fraction(candidate, query);
        total += f64::from(w.location_match) * location_strength(candidate, query);

        let clamped = total.round().clamp(0.0, 100.0) as u8;
        match candidate.lic_active {
            Some(false) => clamped.min(w.license_inactive_cap.saturating_sub(1)),
            _ => clamped,
        }
    }

    /// Score every candidate, then sort by score descending, project count
    /// descending, and name ascending.
    pub fn rank(&self, candidates: &mut [Candidate], query: &Query) {
        for candidate in candidates.iter_mut() {
            candidate.score = Some(self.score(candidate, query));
        }
        candidates.sort_by(Candidate::rank_cmp);
    }
}

/// Share of query keywords present in the evidence text. A query without
/// keywords has nothing to miss.
fn keyword_fraction(candidate: &Candidate, query: &Query) -> f64 {
    if query.keywords.is_empty() {
        return 1.0;
    }
    let evidence = candidate.evidence_text.to_lowercase();
    let hits = query
        .keywords
        .iter()
        .filter(|k| evidence.contains(k.as_str()))
        .count();
    hits as f64 / query.keywords.len() as f64
}

/// 1.0 for a city match, 0.5 for a state-only match.
fn location_strength(candidate: &Candidate, query: &Query) -> f64 {
    let city = query.city.to_lowercase();
    let city_match = candidate
        .city
        .as_deref()
        .is_some_and(|c| c.trim().eq_ignore_ascii_case(&query.city))
        || candidate.evidence_text.to_lowercase().contains(&city);
    if city_match {
        return 1.0;
    }

    let state_match = candidate
        .state
        .as_deref()
        .is_some_and(|s| s.trim().eq_ignore_ascii_case(&query.state));
    if state_match { 0.5 } else { 0.0 }
}
