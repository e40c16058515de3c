//! Record of every file the run wrote.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::{Mutex, PoisonError};

use console::{Style, style};
use serde::Serialize;

const ANSI_CREATE: Style = Style::new().yellow();
const ANSI_UPDATE: Style = Style::new().green();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportTag {
    Create,
    Update,
}

impl ReportTag {
    fn style(self) -> Style {
        match self {
            ReportTag::Create => ANSI_CREATE,
            ReportTag::Update => ANSI_UPDATE,
        }
    }
}

impl Display for ReportTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ReportTag::Create => "create",
            ReportTag::Update => "update",
        })
    }
}

/// A single write made to the output tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub file: String,
    pub tag: ReportTag,
    /// Size in bytes after the write.
    pub size: u64,
    /// Size in bytes before the write, for updates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<u64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

impl FileReport {
    pub fn create(file: impl Into<String>, size: u64, meta: BTreeMap<String, String>) -> Self {
        Self {
            file: file.into(),
            tag: ReportTag::Create,
            size,
            previous: None,
            meta,
        }
    }

    pub fn update(
        file: impl Into<String>,
        size: u64,
        previous: u64,
        meta: BTreeMap<String, String>,
    ) -> Self {
        Self {
            file: file.into(),
            tag: ReportTag::Update,
            size,
            previous: Some(previous),
            meta,
        }
    }

    /// Bytes saved by this write, negative when the file grew.
    pub fn saved(&self) -> i64 {
        match self.previous {
            Some(previous) => previous as i64 - self.size as i64,
            None => 0,
        }
    }

    /// Styled one line summary for the console.
    pub fn console_line(&self) -> String {
        let size = match self.previous {
            Some(previous) if previous > 0 => {
                let change = (self.size as f64 - previous as f64) / previous as f64 * 100.0;
                format!("{} {:+.1}%", format_size(self.size), change)
            }
            _ => format_size(self.size),
        };

        let mut line = format!(
            "{} {} {}",
            self.tag.style().apply_to(self.tag),
            self.file,
            style(format!("[{size}]")).dim(),
        );
        for (key, value) in &self.meta {
            line.push_str(&format!(" {}", style(format!("{key}: {value}")).dim()));
        }
        line
    }
}

/// Collects reports from every write in the order they happen.
#[derive(Debug, Default)]
pub struct Reporter {
    reports: Mutex<Vec<FileReport>>,
}

impl Reporter {
    pub fn add(&self, report: FileReport) {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(report);
    }

    pub fn reports(&self) -> Vec<FileReport> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn total_saved(&self) -> i64 {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(FileReport::saved)
            .sum()
    }
}

/// Human readable byte count.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "kB", "MB", "GB"];

    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1000.0 && unit < UNITS.len() - 1 {
        size /= 1000.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{bytes}B")
    } else {
        format!("{size:.1}{}", UNITS[unit])
    }
}
