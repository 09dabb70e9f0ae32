//! Instrument run-report parsing.
//!
//! A report is plain text carrying an embedded JSON tracking block between
//! the `Tracking ID` and `Duty Time` section headings, each underlined with
//! `=` characters. The block is lifted into attribute/value pairs under a
//! configured namespace, enriched with the instrument slot number and the
//! experiment name.

use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, ValetError};
use crate::remote::AttrValue;

const TRACKING_HEADING: &str = "Tracking ID";
const DUTY_HEADING: &str = "Duty Time";

// ---------------------------------------------------------------------------
// Tracking block
// ---------------------------------------------------------------------------

/// The tracking fields every report must carry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TrackingInfo {
    pub device_id: String,
    pub device_type: String,
    pub distribution_version: String,
    pub flow_cell_id: String,
    pub guppy_version: String,
    pub hostname: String,
    pub protocol_group_id: String,
    pub run_id: String,
    pub sample_id: String,
}

impl TrackingInfo {
    /// The experiment name is the protocol group id, surfaced under its own
    /// attribute as well.
    pub fn experiment_name(&self) -> &str {
        &self.protocol_group_id
    }

    /// Derive the instrument slot number from the device id.
    ///
    /// GridION slots are the first digit after the `GA` or `X` prefix.
    /// PromethION 24-slot positions are `<1-3><A-H>` codes mapped to 1–24.
    /// Anything else is an error; a slot is never invented.
    pub fn instrument_slot(&self) -> Result<u32> {
        let device_type = self.device_type.to_ascii_lowercase();
        let slot = match device_type.as_str() {
            "gridion" => gridion_slot(&self.device_id),
            "promethion" => promethion_slot(&self.device_id),
            _ => None,
        };
        slot.ok_or_else(|| ValetError::Report {
            path: Default::default(),
            reason: format!(
                "no slot mapping for {} device {}",
                self.device_type, self.device_id
            ),
        })
    }

    /// Project the tracking block as attribute/value pairs under `namespace`.
    pub fn attributes(&self, namespace: &str) -> Result<Vec<AttrValue>> {
        let ns = |attr: &str| format!("{namespace}:{attr}");
        let slot = self.instrument_slot()?;
        Ok(vec![
            AttrValue::new(ns("device_id"), &self.device_id),
            AttrValue::new(ns("device_type"), &self.device_type),
            AttrValue::new(ns("distribution_version"), &self.distribution_version),
            AttrValue::new(ns("flow_cell_id"), &self.flow_cell_id),
            AttrValue::new(ns("guppy_version"), &self.guppy_version),
            AttrValue::new(ns("hostname"), &self.hostname),
            AttrValue::new(ns("protocol_group_id"), &self.protocol_group_id),
            AttrValue::new(ns("run_id"), &self.run_id),
            AttrValue::new(ns("sample_id"), &self.sample_id),
            AttrValue::new(ns("instrument_slot"), slot.to_string()),
            AttrValue::new(ns("experiment_name"), self.experiment_name()),
        ])
    }
}

fn gridion_slot(device_id: &str) -> Option<u32> {
    let rest = device_id
        .strip_prefix("GA")
        .or_else(|| device_id.strip_prefix('X'))?;
    rest.chars().next().and_then(|c| c.to_digit(10)).filter(|&d| d > 0)
}

/// `<column><row>` position codes for the 24-slot layout: columns 1–3, rows
/// A–H, numbered column-major so `1A` = 1 and `3H` = 24.
fn promethion_slot(device_id: &str) -> Option<u32> {
    let mut chars = device_id.chars();
    let (col, row) = match (chars.next(), chars.next(), chars.next()) {
        (Some(c), Some(r), None) => (c, r),
        _ => return None,
    };
    let col = col.to_digit(10).filter(|d| (1..=3).contains(d))?;
    if !('A'..='H').contains(&row) {
        return None;
    }
    Some((col - 1) * 8 + (row as u32 - 'A' as u32 + 1))
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Slice the text between the two section headings and drop the `=`
/// underline artifacts, leaving the embedded JSON.
pub fn extract_tracking_json(text: &str) -> Result<String> {
    let start = text
        .find(TRACKING_HEADING)
        .ok_or_else(|| missing_section(TRACKING_HEADING))?
        + TRACKING_HEADING.len();
    let end = text[start..]
        .find(DUTY_HEADING)
        .ok_or_else(|| missing_section(DUTY_HEADING))?
        + start;

    let json: String = text[start..end].chars().filter(|&c| c != '=').collect();
    Ok(json.trim().to_string())
}

fn missing_section(heading: &str) -> ValetError {
    ValetError::Report {
        path: Default::default(),
        reason: format!("no {heading} section"),
    }
}

/// Parse a report file into its tracking block.
pub fn parse_report(path: &Path) -> Result<TrackingInfo> {
    let text = std::fs::read_to_string(path).map_err(|e| ValetError::io(path, e))?;
    let json = extract_tracking_json(&text).map_err(|e| ValetError::Report {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&json).map_err(|e| ValetError::Report {
        path: path.to_path_buf(),
        reason: format!("invalid tracking JSON: {e}"),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
