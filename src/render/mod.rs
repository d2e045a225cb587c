//! Artifact rendering.
//!
//! The pipeline only needs "record in, bytes out". Callers supply that as a
//! [`Renderer`]: either a closure or the built-in [`PlaceholderTemplate`],
//! which fills `{{ key }}` placeholders in a text template.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use chrono::Datelike;
use regex::Regex;
use thiserror::Error;

use crate::domain::{CanonicalField, CanonicalRecord, ResolvedDate};
use crate::error::{AppError, ErrorKind};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").expect("placeholder pattern is valid")
});

#[derive(Debug, Error)]
#[error("render failed: {0}")]
pub struct RenderError(pub String);

impl From<RenderError> for AppError {
    fn from(err: RenderError) -> Self {
        AppError::new(ErrorKind::Render, err.to_string())
    }
}

/// Everything a renderer may read for one record.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub record: &'a CanonicalRecord,
    pub resolved: Option<&'a ResolvedDate>,
    /// Token used in the filename (`D-M-YYYY` or the sentinel).
    pub date_token: &'a str,
}

impl RenderContext<'_> {
    /// Flat key/value view: source fields, then canonical fields, then date keys.
    pub fn values(&self) -> BTreeMap<String, String> {
        let mut values = self.record.extra.clone();
        for field in CanonicalField::ALL {
            values.insert(field.key().to_string(), self.record.field(field).to_string());
        }
        values.insert("date_token".to_string(), self.date_token.to_string());
        let (iso, long) = match self.resolved {
            Some(r) => (
                r.date.format("%Y-%m-%d").to_string(),
                format!("{} {}", r.date.day(), r.date.format("%B %Y")),
            ),
            None => (String::new(), self.record.date_raw.clone()),
        };
        values.insert("date_iso".to_string(), iso);
        values.insert("date_long".to_string(), long);
        values
    }
}

pub trait Renderer {
    fn render(&self, ctx: &RenderContext<'_>) -> Result<Vec<u8>, RenderError>;
}

impl<F> Renderer for F
where
    F: Fn(&RenderContext<'_>) -> Result<Vec<u8>, RenderError>,
{
    fn render(&self, ctx: &RenderContext<'_>) -> Result<Vec<u8>, RenderError> {
        self(ctx)
    }
}

/// Text template with `{{ key }}` placeholders. Unknown keys fail the record.
#[derive(Debug, Clone)]
pub struct PlaceholderTemplate {
    template: String,
}

impl PlaceholderTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let template = std::fs::read_to_string(path).map_err(|e| {
            AppError::config(format!("Failed to read template '{}': {e}", path.display()))
        })?;
        Ok(Self::new(template))
    }
}

impl Renderer for PlaceholderTemplate {
    fn render(&self, ctx: &RenderContext<'_>) -> Result<Vec<u8>, RenderError> {
        let values = ctx.values();
        let mut out = String::with_capacity(self.template.len());
        let mut last = 0;
        for caps in PLACEHOLDER.captures_iter(&self.template) {
            let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let value = values
                .get(key.as_str())
                .ok_or_else(|| RenderError(format!("unknown placeholder '{}'", key.as_str())))?;
            out.push_str(&self.template[last..whole.start()]);
            out.push_str(value);
            last = whole.end();
        }
        out.push_str(&self.template[last..]);
        Ok(out.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Interpretation;
    use chrono::NaiveDate;

    fn record() -> CanonicalRecord {
        let mut extra = BTreeMap::new();
        extra.insert("site_address".to_string(), "1 High St".to_string());
        CanonicalRecord {
            row_number: 1,
            id: "42".to_string(),
            date_raw: "5/1/26".to_string(),
            name: "J Smith".to_string(),
            job: "42".to_string(),
            extra,
            ..CanonicalRecord::default()
        }
    }

    #[test]
    fn fills_canonical_extra_and_date_keys() {
        let rec = record();
        let resolved = ResolvedDate {
            date: NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
            kind: Interpretation::DayMonthYear,
        };
        let ctx = RenderContext {
            record: &rec,
            resolved: Some(&resolved),
            date_token: "5-1-2026",
        };
        let tpl = PlaceholderTemplate::new(
            "Job {{job}} for {{ name }} at {{site_address}} on {{date_long}} ({{date_iso}})",
        );
        let out = String::from_utf8(tpl.render(&ctx).expect("render")).expect("utf8");
        assert_eq!(out, "Job 42 for J Smith at 1 High St on 5 January 2026 (2026-01-05)");
    }

    #[test]
    fn unknown_placeholder_fails_the_record() {
        let rec = record();
        let ctx = RenderContext {
            record: &rec,
            resolved: None,
            date_token: "0-0-0000",
        };
        let err = PlaceholderTemplate::new("{{ missing }}").render(&ctx).expect_err("unknown key");
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn closures_are_renderers() {
        let rec = record();
        let ctx = RenderContext {
            record: &rec,
            resolved: None,
            date_token: "0-0-0000",
        };
        let renderer =
            |ctx: &RenderContext<'_>| Ok::<_, RenderError>(ctx.record.name.clone().into_bytes());
        assert_eq!(renderer.render(&ctx).expect("render"), b"J Smith");
    }
}
