pub mod print;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use itertools::Itertools;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::record::{EntityKind, Record};
use crate::utils;

pub const CSV_CONTENT_TYPE: &str = "text/csv";
pub const HTML_CONTENT_TYPE: &str = "text/html";

const UTF8_BOM: &str = "\u{feff}";
const MAX_CELL_WIDTH: usize = 40;
pub const EMPTY_PLACEHOLDER: &str = "No records yet.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Print,
}

impl ExportFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "print" | "pdf" | "html" | "htm" => Some(Self::Print),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cell {
    Id,
    Timestamp,
    Field(&'static str),
    BloodPressure,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Column {
    pub header: &'static str,
    pub cell: Cell,
}

const fn col(header: &'static str, cell: Cell) -> Column {
    Column { header, cell }
}

impl Column {
    pub fn render(&self, record: &Record) -> Option<String> {
        match self.cell {
            Cell::Id => Some(record.id.to_string()),
            Cell::Timestamp => record.timestamp.as_ref().map(|t| utils::fmt_date_time(Some(t))),
            Cell::Field(name) => record.text(name),
            Cell::BloodPressure => {
                let sys = record.text("systolicBp")?;
                let dia = record.text("diastolicBp")?;
                Some(format!("{sys}/{dia}"))
            }
        }
    }
}

const HEALTH_DATA_CSV: &[Column] = &[
    col("id", Cell::Id),
    col("recordedAt", Cell::Timestamp),
    col("weight", Cell::Field("weight")),
    col("height", Cell::Field("height")),
    col("heartRate", Cell::Field("heartRate")),
    col("bloodPressure", Cell::BloodPressure),
    col("sleepHours", Cell::Field("sleepHours")),
    col("steps", Cell::Field("steps")),
];

const ASSESSMENT_CSV: &[Column] = &[
    col("id", Cell::Id),
    col("createdAt", Cell::Timestamp),
    col("score", Cell::Field("overallScore")),
    col("type", Cell::Field("type")),
    col("summary", Cell::Field("summary")),
];

const MEDICATION_CSV: &[Column] = &[
    col("ID", Cell::Id),
    col("Datetime", Cell::Timestamp),
    col("Symptoms", Cell::Field("symptoms")),
    col("OTC", Cell::Field("otcMedications")),
    col("Usage", Cell::Field("usageInstructions")),
    col("Precautions", Cell::Field("precautions")),
    col("SideEffects", Cell::Field("sideEffects")),
];

const HEALTH_DATA_TABLE: &[Column] = &[
    col("ID", Cell::Id),
    col("DateTime", Cell::Timestamp),
    col("Weight", Cell::Field("weight")),
    col("Height", Cell::Field("height")),
    col("HR", Cell::Field("heartRate")),
    col("BP", Cell::BloodPressure),
    col("Sleep", Cell::Field("sleepHours")),
    col("Steps", Cell::Field("steps")),
];

const ASSESSMENT_TABLE: &[Column] = &[
    col("ID", Cell::Id),
    col("DateTime", Cell::Timestamp),
    col("Score", Cell::Field("overallScore")),
    col("Type", Cell::Field("type")),
];

const MEDICATION_TABLE: &[Column] = &[
    col("ID", Cell::Id),
    col("Datetime", Cell::Timestamp),
    col("Symptoms", Cell::Field("symptoms")),
];

/// Fixed export projection for a view.
pub fn csv_columns(kind: EntityKind) -> &'static [Column] {
    match kind {
        EntityKind::HealthData => HEALTH_DATA_CSV,
        EntityKind::Assessment => ASSESSMENT_CSV,
        EntityKind::Medication => MEDICATION_CSV,
    }
}

pub fn table_columns(kind: EntityKind) -> &'static [Column] {
    match kind {
        EntityKind::HealthData => HEALTH_DATA_TABLE,
        EntityKind::Assessment => ASSESSMENT_TABLE,
        EntityKind::Medication => MEDICATION_TABLE,
    }
}

pub fn render_csv(columns: &[Column], records: &[Record], bom: bool) -> String {
    let header = columns.iter().map(|c| utils::csv_escape(Some(c.header))).join(",");
    let rows = records.iter().map(|r| {
        columns
            .iter()
            .map(|c| utils::csv_escape(c.render(r).as_deref()))
            .join(",")
    });
    let body = std::iter::once(header).chain(rows).join("\n");
    if bom {
        format!("{UTF8_BOM}{body}")
    } else {
        body
    }
}

fn truncate_cell(value: &str) -> String {
    let compact = utils::collapse_whitespace(value);
    if compact.chars().count() <= MAX_CELL_WIDTH {
        return compact;
    }
    let mut out: String = compact.chars().take(MAX_CELL_WIDTH - 1).collect();
    out.push('…');
    out
}

/// Plain-text table for one page of rows. Selected rows are marked with `*`.
/// An empty page renders a single placeholder row.
pub fn render_table(columns: &[Column], rows: &[Record], selected: &[i64]) -> String {
    let mut grid: Vec<Vec<String>> = Vec::with_capacity(rows.len() + 1);
    let mut header = vec![" ".to_string()];
    header.extend(columns.iter().map(|c| c.header.to_string()));
    grid.push(header);

    for r in rows {
        let mark = if selected.contains(&r.id) { "*" } else { " " };
        let mut line = vec![mark.to_string()];
        line.extend(columns.iter().map(|c| match c.render(r) {
            Some(v) if !v.trim().is_empty() => truncate_cell(&v),
            _ => "-".to_string(),
        }));
        grid.push(line);
    }

    let widths: Vec<usize> = (0..=columns.len())
        .map(|i| {
            grid.iter()
                .map(|line| line[i].chars().count())
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut out = String::new();
    for (n, line) in grid.iter().enumerate() {
        let cells = line
            .iter()
            .zip(widths.iter())
            .skip(1)
            .map(|(cell, w)| format!("{cell:<w$}"))
            .join("  ");
        let rendered = format!("{} {cells}", line[0]);
        out.push_str(rendered.trim_end());
        out.push('\n');
        if n == 0 {
            let rule_len = widths.iter().sum::<usize>() + 2 * widths.len().saturating_sub(1) - 1;
            out.push_str(&"-".repeat(rule_len));
            out.push('\n');
        }
    }
    if rows.is_empty() {
        out.push_str("  ");
        out.push_str(EMPTY_PLACEHOLDER);
        out.push('\n');
    }
    out
}

/// Export artifact written to disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportArtifact {
    pub path: PathBuf,
    pub rows: usize,
    pub content_type: &'static str,
}

pub fn export_stem(kind: EntityKind, unix_millis: i64) -> String {
    format!("{}_{}", kind.export_slug(), unix_millis)
}

/// Writes `contents` to `dir/{stem}.{ext}`. An existing file is never
/// replaced: on a clash `-1`, `-2`, ... is appended to the stem.
pub async fn write_unique(
    dir: &Path,
    stem: &str,
    ext: &str,
    contents: &[u8],
) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let mut attempt = 0usize;
    loop {
        let name = if attempt == 0 {
            format!("{stem}.{ext}")
        } else {
            format!("{stem}-{attempt}.{ext}")
        };
        let path = dir.join(name);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(mut file) => {
                file.write_all(contents).await?;
                file.flush().await?;
                return Ok(path);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e),
        }
    }
}
