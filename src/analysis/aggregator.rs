//! Assessment aggregation and statistics.
//!
//! This module turns a table snapshot into report rows and computes the
//! summary statistics shown in the report.

use crate::engine::{TableState, WriteOrigin};
use crate::models::{RiskCategory, ResolvedSession, SessionRow, SubScores};
use std::collections::HashMap;

/// Build report rows from a table snapshot, riskiest first.
pub fn rows_from_table(table: &TableState, sessions: &[ResolvedSession]) -> Vec<SessionRow> {
    let created: HashMap<_, _> = sessions
        .iter()
        .map(|s| (&s.key, s.session.created_at))
        .collect();

    let mut rows: Vec<SessionRow> = table
        .iter()
        .map(|(key, entry)| SessionRow {
            key: key.clone(),
            created_at: created.get(key).copied(),
            assessment: entry.assessment.clone(),
            live: entry.origin == WriteOrigin::Live,
        })
        .collect();

    sort_rows_by_risk(&mut rows);
    rows
}

/// Sort rows by category, then score, riskiest first.
pub fn sort_rows_by_risk(rows: &mut [SessionRow]) {
    rows.sort_by(|a, b| {
        b.assessment
            .category
            .cmp(&a.assessment.category)
            .then_with(|| {
                b.assessment
                    .score
                    .partial_cmp(&a.assessment.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.key.cmp(&b.key))
    });
}

/// Keep only rows at or above `min` category.
pub fn filter_by_category(rows: &mut Vec<SessionRow>, min: RiskCategory) {
    rows.retain(|row| row.assessment.category >= min);
}

/// Get the top N rows by risk.
pub fn top_sessions(rows: &[SessionRow], n: usize) -> Vec<SessionRow> {
    let mut sorted = rows.to_vec();
    sort_rows_by_risk(&mut sorted);
    sorted.truncate(n);
    sorted
}

/// Mean of each sub-score channel across rows.
pub fn mean_sub_scores(rows: &[SessionRow]) -> SubScores {
    if rows.is_empty() {
        return SubScores::default();
    }

    let n = rows.len() as f64;
    let mut sum = SubScores::default();
    for row in rows {
        let s = &row.assessment.sub_scores;
        sum.touch += s.touch;
        sum.motion += s.motion;
        sum.context += s.context;
        sum.location += s.location;
        sum.time += s.time;
    }

    SubScores {
        touch: sum.touch / n,
        motion: sum.motion / n,
        context: sum.context / n,
        location: sum.location / n,
        time: sum.time / n,
    }
}

/// The channel contributing most to the average risk, if any.
pub fn dominant_channel(mean: &SubScores) -> Option<(&'static str, f64)> {
    mean.labeled()
        .into_iter()
        .filter(|(_, value)| *value > 0.0)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
}
