//! Parameter lookup by index or name.

use crate::display::normalize_token;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamRef {
    Index(usize),
    Name(String),
}

impl From<usize> for ParamRef {
    fn from(index: usize) -> Self {
        ParamRef::Index(index)
    }
}

impl From<&str> for ParamRef {
    fn from(name: &str) -> Self {
        ParamRef::Name(name.to_string())
    }
}

impl From<String> for ParamRef {
    fn from(name: String) -> Self {
        ParamRef::Name(name)
    }
}

impl std::fmt::Display for ParamRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamRef::Index(i) => write!(f, "#{}", i),
            ParamRef::Name(n) => write!(f, "{}", n),
        }
    }
}

/// Outcome of a lookup. Positions index into the name list that was searched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamResolution {
    Found(usize),
    Ambiguous(Vec<usize>),
    NotFound,
}

fn from_hits(hits: Vec<usize>) -> Option<ParamResolution> {
    match hits.len() {
        0 => None,
        1 => Some(ParamResolution::Found(hits[0])),
        _ => Some(ParamResolution::Ambiguous(hits)),
    }
}

/// Resolve a parameter reference against an ordered name list.
///
/// Names are tried in tiers: exact (case-insensitive), exact after token
/// normalization, then token containment. The first tier with any hit decides;
/// more than one hit in that tier is reported as ambiguous.
pub fn resolve_param<S: AsRef<str>>(names: &[S], param_ref: &ParamRef) -> ParamResolution {
    let query = match param_ref {
        ParamRef::Index(i) => {
            return if *i < names.len() {
                ParamResolution::Found(*i)
            } else {
                ParamResolution::NotFound
            };
        }
        ParamRef::Name(q) => q.trim(),
    };
    if query.is_empty() {
        return ParamResolution::NotFound;
    }

    let plain: Vec<&str> = names.iter().map(|n| n.as_ref()).collect();
    let exact: Vec<usize> = plain
        .iter()
        .enumerate()
        .filter(|(_, n)| n.trim().eq_ignore_ascii_case(query))
        .map(|(i, _)| i)
        .collect();
    if let Some(found) = from_hits(exact) {
        return found;
    }

    let query_norm = normalize_token(query);
    if query_norm.is_empty() {
        return ParamResolution::NotFound;
    }
    let normalized: Vec<String> = plain.iter().map(|n| normalize_token(n)).collect();

    let same_token: Vec<usize> = normalized
        .iter()
        .enumerate()
        .filter(|(_, n)| **n == query_norm)
        .map(|(i, _)| i)
        .collect();
    if let Some(found) = from_hits(same_token) {
        return found;
    }

    let containing: Vec<usize> = normalized
        .iter()
        .enumerate()
        .filter(|(_, n)| n.contains(&query_norm))
        .map(|(i, _)| i)
        .collect();
    from_hits(containing).unwrap_or(ParamResolution::NotFound)
}
