use std::path::Path;
use std::process::{Command, Stdio};

use html_escape::encode_text;

use crate::record::{EntityKind, Record};
use crate::utils;

const MISSING: &str = "—";

/// One card in the printable document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrintBlock {
    pub heading: String,
    pub lines: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrintSection {
    pub title: String,
    pub blocks: Vec<PrintBlock>,
}

impl PrintSection {
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

fn line(label: &str, value: Option<String>) -> String {
    let value = value
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| MISSING.to_string());
    format!("{label}: {value}")
}

fn block_for(kind: EntityKind, r: &Record) -> PrintBlock {
    let date = Some(r.formatted_timestamp());
    match kind {
        EntityKind::HealthData => {
            let bp = match (r.text("systolicBp"), r.text("diastolicBp")) {
                (Some(s), Some(d)) => Some(format!("{s}/{d} mmHg")),
                _ => None,
            };
            PrintBlock {
                heading: format!("#{}  {}", r.id, r.formatted_timestamp()),
                lines: vec![
                    line("Weight", r.number("weight").map(|w| format!("{} kg", utils::format_number(w)))),
                    line("Height", r.number("height").map(|h| format!("{} cm", utils::format_number(h)))),
                    line("BMI", r.number("bmi").map(|b| utils::format_number(utils::round(b, 1)))),
                    line("Heart rate", r.number("heartRate").map(|h| format!("{} bpm", utils::format_number(h)))),
                    line("Blood pressure", bp),
                    line("Sleep", r.number("sleepHours").map(|s| format!("{} h", utils::format_number(s)))),
                    line("Steps", r.text("steps")),
                ],
            }
        }
        EntityKind::Assessment => PrintBlock {
            heading: format!(
                "#{}  {}",
                r.id,
                r.text("type").unwrap_or_else(|| "Assessment".to_string())
            ),
            lines: vec![
                line("Date", date),
                line("Score", r.text("overallScore")),
                line("Summary", r.text("summary")),
                line("Highlights", r.text("highlights")),
                line("Recommendations", r.text("recommendations")),
            ],
        },
        EntityKind::Medication => PrintBlock {
            heading: format!("#{}  {}", r.id, r.text("symptoms").unwrap_or_default()),
            lines: vec![
                line("Date", date),
                line("Description", r.text("conditionDescription")),
                line("OTC", r.text("otcMedications")),
                line("Usage", r.text("usageInstructions")),
                line("Precautions", r.text("precautions")),
                line("Side Effects", r.text("sideEffects")),
                line("Pharmacies", r.text("recommendedPharmacies")),
                line(
                    "Guidance",
                    r.text("detailedGuidance").map(|g| utils::strip_markdown_headings(&g)),
                ),
            ],
        },
    }
}

/// Projects records into a printable section, optionally restricted to `ids`
/// (kept in collection order).
pub fn build_section(kind: EntityKind, records: &[Record], ids: Option<&[i64]>) -> PrintSection {
    let blocks = records
        .iter()
        .filter(|r| ids.map_or(true, |ids| ids.contains(&r.id)))
        .map(|r| block_for(kind, r))
        .collect();
    PrintSection {
        title: kind.print_title().to_string(),
        blocks,
    }
}

/// Standalone document: inline stylesheet, no external references, prints on load.
pub fn render_document(section: &PrintSection, generated_at: &str) -> String {
    let title = encode_text(&section.title);
    let mut cards = String::new();
    for block in &section.blocks {
        cards.push_str("    <div class=\"card\">\n");
        cards.push_str(&format!(
            "      <div class=\"h\">{}</div>\n",
            encode_text(&block.heading)
        ));
        for l in &block.lines {
            cards.push_str(&format!("      <div class=\"l\">{}</div>\n", encode_text(l)));
        }
        cards.push_str("    </div>\n");
    }

    format!(
        r####"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8"/>
  <title>{title}</title>
  <style>
    body {{ font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, "Helvetica Neue", Arial, sans-serif; padding: 24px; color: #111827; }}
    h1 {{ font-size: 20px; margin-bottom: 4px; }}
    .meta {{ color: #6b7280; font-size: 12px; margin-bottom: 12px; }}
    .card {{ border: 1px solid #e5e7eb; border-radius: 10px; padding: 12px 14px; margin: 10px 0; page-break-inside: avoid; }}
    .h {{ font-weight: 600; margin-bottom: 6px; }}
    .l {{ margin: 2px 0; white-space: pre-wrap; }}
    @media print {{
      body {{ padding: 0; }}
    }}
  </style>
</head>
<body onload="window.print()">
  <h1>{title}</h1>
  <div class="meta">Generated {generated}</div>
{cards}</body>
</html>
"####,
        title = title,
        generated = encode_text(generated_at),
        cards = cards,
    )
}

/// Something that can present a printable document to the user.
pub trait PrintSurface {
    fn open(&self, path: &Path) -> Result<(), String>;
}

/// Hands the document to the platform's default browser. The opener must
/// exit successfully, otherwise the document counts as not shown.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemBrowser;

#[cfg(target_os = "windows")]
fn opener(path: &Path) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.args(["/C", "start", ""]).arg(path);
    cmd
}

#[cfg(target_os = "macos")]
fn opener(path: &Path) -> Command {
    let mut cmd = Command::new("open");
    cmd.arg(path);
    cmd
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn opener(path: &Path) -> Command {
    let mut cmd = Command::new("xdg-open");
    cmd.arg(path);
    cmd
}

impl PrintSurface for SystemBrowser {
    fn open(&self, path: &Path) -> Result<(), String> {
        let mut cmd = opener(path);
        let status = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| format!("failed to launch browser: {e}"))?;
        if status.success() {
            Ok(())
        } else {
            Err(format!("browser opener exited with {status}"))
        }
    }
}

/// Headless surface: never opens anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoSurface;

impl PrintSurface for NoSurface {
    fn open(&self, _path: &Path) -> Result<(), String> {
        Err("no print surface configured".to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SurfaceKind {
    #[default]
    Browser,
    None,
}

impl SurfaceKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "browser" | "system" => Some(Self::Browser),
            "none" | "off" | "headless" => Some(Self::None),
            _ => None,
        }
    }
}
