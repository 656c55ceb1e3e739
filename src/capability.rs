//! Capability descriptors: what a single converter says it can do.
//!
//! Descriptors arrive over the negotiation protocol as YAML documents shaped
//! like
//!
//! ```yaml
//! name: pandoc-helper
//! version: "1.2"
//! capabilities:
//!   md:
//!     html:
//!       modes:
//!         normal: { speed: 1, quality: 1 }
//!         fast:   { speed: 1, quality: 1 }
//! ```
//!
//! In-process converters build the same structure with
//! [`CapabilityDescriptor::with_pair`].

use crate::error::NegotiationError;
use crate::format::{Format, QualityMode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Speed/quality figures for one mode. Placeholders today (always `1`);
/// only "both positive" is meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Metric {
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub quality: f64,
}

impl Metric {
    pub const PLACEHOLDER: Metric = Metric {
        speed: 1.0,
        quality: 1.0,
    };

    pub fn is_supported(&self) -> bool {
        self.speed > 0.0 && self.quality > 0.0
    }
}

/// The per-mode metrics advertised for one `(from, to)` pair.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Modes {
    #[serde(default)]
    pub normal: Metric,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fast: Option<Metric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<Metric>,
}

impl Modes {
    pub fn metric(&self, mode: QualityMode) -> Metric {
        match mode {
            QualityMode::Normal => self.normal,
            QualityMode::Fast => self.fast.unwrap_or_default(),
            QualityMode::Quality => self.quality.unwrap_or_default(),
        }
    }

    pub fn supports(&self, mode: QualityMode) -> bool {
        self.metric(mode).is_supported()
    }
}

/// Wrapper matching the `modes:` key of the wire format.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PairCapability {
    #[serde(default)]
    pub modes: Modes,
}

/// Everything a converter can do, as reported during negotiation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    /// Registry id of the converter that produced this descriptor. Not part
    /// of the wire format; filled in by whoever parsed it.
    #[serde(skip)]
    pub converter_id: String,
    /// Human-readable name.
    #[serde(rename = "name")]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// `from -> to -> modes`
    #[serde(default)]
    pub capabilities: BTreeMap<Format, BTreeMap<Format, PairCapability>>,
}

impl CapabilityDescriptor {
    pub fn new(converter_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            converter_id: converter_id.into(),
            display_name: display_name.into(),
            version: None,
            description: None,
            capabilities: BTreeMap::new(),
        }
    }

    /// Add a pair supporting `normal` plus the listed extra modes.
    pub fn with_pair(mut self, from: Format, to: Format, extra: &[QualityMode]) -> Self {
        let mut modes = Modes {
            normal: Metric::PLACEHOLDER,
            ..Modes::default()
        };
        for mode in extra {
            match mode {
                QualityMode::Normal => {}
                QualityMode::Fast => modes.fast = Some(Metric::PLACEHOLDER),
                QualityMode::Quality => modes.quality = Some(Metric::PLACEHOLDER),
            }
        }
        self.capabilities
            .entry(from)
            .or_default()
            .insert(to, PairCapability { modes });
        self
    }

    /// Parse and validate a descriptor body returned by `describe`.
    pub fn parse(converter_id: &str, body: &str) -> Result<Self, NegotiationError> {
        let mut descriptor: CapabilityDescriptor =
            serde_yaml::from_str(body).map_err(|e| NegotiationError::InvalidDescriptor {
                converter: converter_id.to_string(),
                detail: e.to_string(),
            })?;
        descriptor.converter_id = converter_id.to_string();
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Enforce the descriptor invariants: at least one pair, and every pair
    /// listed supports `normal`.
    pub fn validate(&self) -> Result<(), NegotiationError> {
        if self.pair_count() == 0 {
            return Err(NegotiationError::NoCapabilities {
                converter: self.converter_id.clone(),
            });
        }
        for (from, to, pair) in self.pairs() {
            if !pair.modes.normal.is_supported() {
                return Err(NegotiationError::InvalidDescriptor {
                    converter: self.converter_id.clone(),
                    detail: format!("{from} → {to} does not support the mandatory 'normal' mode"),
                });
            }
        }
        Ok(())
    }

    /// Iterate `(from, to, capability)` in sorted order.
    pub fn pairs(&self) -> impl Iterator<Item = (&Format, &Format, &PairCapability)> {
        self.capabilities
            .iter()
            .flat_map(|(from, tos)| tos.iter().map(move |(to, cap)| (from, to, cap)))
    }

    pub fn pair_count(&self) -> usize {
        self.capabilities.values().map(BTreeMap::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(s: &str) -> Format {
        Format::new(s).unwrap()
    }

    const PANDOC: &str = r#"
name: pandoc-helper
version: "3.1"
capabilities:
  md:
    html:
      modes:
        normal: { speed: 1, quality: 1 }
        fast: { speed: 1, quality: 1 }
    PDF:
      modes:
        normal: { speed: 1, quality: 1 }
"#;

    #[test]
    fn parses_wire_format() {
        let d = CapabilityDescriptor::parse("/opt/pandoc.sh", PANDOC).unwrap();
        assert_eq!(d.converter_id, "/opt/pandoc.sh");
        assert_eq!(d.display_name, "pandoc-helper");
        assert_eq!(d.version.as_deref(), Some("3.1"));
        assert_eq!(d.pair_count(), 2);

        let md_html = &d.capabilities[&fmt("md")][&fmt("html")];
        assert!(md_html.modes.supports(QualityMode::Fast));
        assert!(!md_html.modes.supports(QualityMode::Quality));
        // Keys are normalised like any other format token.
        assert!(d.capabilities[&fmt("md")].contains_key(&fmt("pdf")));
    }

    #[test]
    fn missing_normal_is_invalid() {
        let body = r#"
name: broken
capabilities:
  md:
    html:
      modes:
        fast: { speed: 1, quality: 1 }
"#;
        let err = CapabilityDescriptor::parse("broken", body).unwrap_err();
        assert!(matches!(err, NegotiationError::InvalidDescriptor { .. }), "{err}");
    }

    #[test]
    fn zero_metric_is_unsupported() {
        let body = r#"
name: zero
capabilities:
  md:
    html:
      modes:
        normal: { speed: 0, quality: 1 }
"#;
        assert!(CapabilityDescriptor::parse("zero", body).is_err());
    }

    #[test]
    fn empty_capabilities_are_rejected() {
        let err = CapabilityDescriptor::parse("idle", "name: idle\ncapabilities: {}\n").unwrap_err();
        assert!(matches!(err, NegotiationError::NoCapabilities { .. }), "{err}");
    }

    #[test]
    fn garbage_is_invalid() {
        let err = CapabilityDescriptor::parse("noisy", "::: not yaml [").unwrap_err();
        assert!(matches!(err, NegotiationError::InvalidDescriptor { .. }), "{err}");
    }

    #[test]
    fn builder_marks_normal_and_extras() {
        let d = CapabilityDescriptor::new("builtin", "builtin")
            .with_pair(fmt("txt"), fmt("md"), &[QualityMode::Quality]);
        let modes = &d.capabilities[&fmt("txt")][&fmt("md")].modes;
        assert!(modes.supports(QualityMode::Normal));
        assert!(modes.supports(QualityMode::Quality));
        assert!(!modes.supports(QualityMode::Fast));
        assert!(d.validate().is_ok());
    }
}
