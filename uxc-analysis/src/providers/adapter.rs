//! Provider payload adapter
//!
//! Converts a provider's raw JSON payload into the strict internal
//! `Annotation` schema. Anything that does not fit the schema is a
//! `ProviderError::Malformed`, which the orchestrator treats exactly like any
//! other provider failure.
//!
//! # Accepted shape
//! ```json
//! {
//!   "confidence": 0.87,
//!   "annotations": [
//!     { "id": "a1", "feedback": "...", "category": "ux", "severity": "critical",
//!       "coordinates": { "x": 42.0, "y": 10.5 }, "imageIndex": 0,
//!       "researchValidated": false, "researchSources": [] }
//!   ]
//! }
//! ```
//! The payload may arrive wrapped in a Markdown code fence.

use crate::types::{Annotation, Category, Coordinates, ProviderError, ProviderOutput, Severity};
use serde::Deserialize;
use std::collections::HashSet;

/// Raw payload as sent by a provider
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawProviderPayload {
    pub confidence: Option<f64>,
    #[serde(default)]
    pub annotations: Vec<RawAnnotation>,
}

/// Raw annotation; every field is checked before conversion
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAnnotation {
    pub id: Option<String>,
    pub feedback: Option<String>,
    pub category: Option<String>,
    pub severity: Option<String>,
    pub coordinates: Option<RawCoordinates>,
    pub image_index: Option<usize>,
    #[serde(default)]
    pub research_validated: bool,
    #[serde(default)]
    pub research_sources: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawCoordinates {
    pub x: f64,
    pub y: f64,
}

/// Parse and validate a provider response body
pub fn parse_payload(
    provider_id: &str,
    body: &str,
    image_count: usize,
) -> Result<ProviderOutput, ProviderError> {
    let json = strip_code_fence(body);
    let raw: RawProviderPayload = serde_json::from_str(json)
        .map_err(|e| ProviderError::Malformed(format!("invalid JSON payload: {}", e)))?;
    validate_payload(provider_id, raw, image_count)
}

/// Validate a deserialized payload against the internal schema
pub fn validate_payload(
    provider_id: &str,
    raw: RawProviderPayload,
    image_count: usize,
) -> Result<ProviderOutput, ProviderError> {
    let confidence = match raw.confidence {
        Some(c) if c.is_finite() => c.clamp(0.0, 1.0),
        Some(c) => return Err(ProviderError::Malformed(format!("non-finite confidence {}", c))),
        None => return Err(ProviderError::Malformed("missing confidence".to_string())),
    };

    if raw.annotations.is_empty() {
        return Err(ProviderError::Malformed("no annotations".to_string()));
    }

    let mut used_ids = HashSet::new();
    let mut annotations = Vec::with_capacity(raw.annotations.len());

    for (index, item) in raw.annotations.into_iter().enumerate() {
        let position = index + 1;

        let feedback = item
            .feedback
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .ok_or_else(|| {
                ProviderError::Malformed(format!("annotation {} has empty feedback", position))
            })?;

        let category_name = item.category.unwrap_or_default();
        let category = Category::parse(&category_name).ok_or_else(|| {
            ProviderError::Malformed(format!(
                "annotation {} has unknown category '{}'",
                position, category_name
            ))
        })?;

        let severity_name = item.severity.unwrap_or_default();
        let severity = Severity::parse(&severity_name).ok_or_else(|| {
            ProviderError::Malformed(format!(
                "annotation {} has unknown severity '{}'",
                position, severity_name
            ))
        })?;

        let coordinates = match item.coordinates {
            Some(c) if in_percent_range(c.x) && in_percent_range(c.y) => {
                Some(Coordinates { x: c.x, y: c.y })
            }
            Some(c) => {
                return Err(ProviderError::Malformed(format!(
                    "annotation {} coordinates ({}, {}) outside 0-100",
                    position, c.x, c.y
                )))
            }
            None => None,
        };

        if let Some(image_index) = item.image_index {
            if image_index >= image_count {
                return Err(ProviderError::Malformed(format!(
                    "annotation {} references image {} of {}",
                    position, image_index, image_count
                )));
            }
        }

        let id = match item.id.map(|s| s.trim().to_string()) {
            Some(id) if !id.is_empty() && !used_ids.contains(&id) => id,
            _ => format!("{}-{}", provider_id, position),
        };
        used_ids.insert(id.clone());

        let research_sources: Vec<String> = item
            .research_sources
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        annotations.push(Annotation {
            id,
            feedback,
            category,
            severity,
            coordinates,
            image_index: item.image_index,
            research_validated: item.research_validated,
            research_sources,
            provider: provider_id.to_string(),
            corroborated_by: Vec::new(),
            business_impact: None,
        });
    }

    Ok(ProviderOutput {
        annotations,
        confidence,
    })
}

fn in_percent_range(value: f64) -> bool {
    value.is_finite() && (0.0..=100.0).contains(&value)
}

/// Strip a surrounding Markdown code fence (```json ... ```) if present
fn strip_code_fence(body: &str) -> &str {
    let trimmed = body.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        if let Some(inner) = rest.trim_end().strip_suffix("```") {
            return inner.trim();
        }
    }
    trimmed
}
