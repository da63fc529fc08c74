use crate::error::{AppError, Result};
use bilibili_api::{DownloadReport, MediaTarget, PartOutcome, ResourceIdentifier};
#[cfg(feature = "colored-output")]
use colored::*;
use serde_json::json;
use std::path::{Path, PathBuf};
use tabled::{Table, Tabled, settings::Style};

pub struct OutputManager {
    colored: bool,
}

#[derive(Tabled)]
struct PartRow {
    #[tabled(rename = "#")]
    index: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "CID")]
    cid: u64,
    #[tabled(rename = "Duration")]
    duration: String,
    #[tabled(rename = "Danmaku")]
    result: String,
}

impl PartRow {
    fn new(target: &MediaTarget, result: String) -> Self {
        Self {
            index: format!("P{}", target.part_index + 1),
            title: target.title.clone(),
            cid: target.cid,
            duration: target.duration_label(),
            result,
        }
    }
}

impl OutputManager {
    pub fn new(colored: bool) -> Self {
        Self { colored }
    }

    /// Part table printed by `info`.
    pub fn format_parts(&self, id: &ResourceIdentifier, targets: &[MediaTarget]) -> String {
        let rows = targets.iter().map(|t| PartRow::new(t, "-".to_string()));
        let mut output = String::new();
        output.push_str(&self.colorize(&format!("{id}:"), &Color::Green, true));
        output.push_str(&format!(" {} part(s)\n", targets.len()));
        output.push_str(&Table::new(rows).with(Style::modern()).to_string());
        output.push('\n');
        output
    }

    pub fn parts_json(&self, id: &ResourceIdentifier, targets: &[MediaTarget]) -> Result<String> {
        let parts: Vec<_> = targets.iter().map(target_json).collect();
        Ok(serde_json::to_string_pretty(&json!({
            "status": "ok",
            "id": id.to_string(),
            "parts": parts,
        }))?)
    }

    /// Summary printed after a download.
    pub fn format_summary(&self, report: &DownloadReport, path: &Path) -> String {
        let rows = report.parts.iter().map(|part| {
            let result = match &part.outcome {
                PartOutcome::Fetched {
                    records,
                    truncated: None,
                } => records.to_string(),
                PartOutcome::Fetched {
                    records,
                    truncated: Some(reason),
                } => format!("{records} ({reason})"),
                PartOutcome::Failed(e) => format!("failed: {e}"),
            };
            PartRow::new(&part.target, result)
        });

        let mut output = String::new();
        output.push_str(&Table::new(rows).with(Style::modern()).to_string());
        output.push('\n');

        let truncated = report
            .parts
            .iter()
            .filter(|p| {
                matches!(
                    p.outcome,
                    PartOutcome::Fetched {
                        truncated: Some(_),
                        ..
                    }
                )
            })
            .count();
        if report.failed_parts() > 0 || truncated > 0 {
            output.push_str(&self.colorize(
                &format!(
                    "Warning: {} part(s) failed, {} part(s) incomplete\n",
                    report.failed_parts(),
                    truncated
                ),
                &Color::Yellow,
                true,
            ));
        }

        output.push_str(&format!(
            "{} {} danmaku ({}) -> {}\n",
            self.colorize("Saved", &Color::Green, true),
            self.colorize(&report.total_records().to_string(), &Color::Cyan, false),
            report.document.format,
            self.colorize(&path.display().to_string(), &Color::Blue, false),
        ));
        output
    }

    pub fn summary_json(&self, report: &DownloadReport, path: &Path) -> Result<String> {
        let parts: Vec<_> = report
            .parts
            .iter()
            .map(|part| {
                let mut value = target_json(&part.target);
                match &part.outcome {
                    PartOutcome::Fetched { records, truncated } => {
                        value["records"] = json!(records);
                        value["warning"] = json!(truncated);
                    }
                    PartOutcome::Failed(e) => {
                        value["error"] = json!(e.to_string());
                    }
                }
                value
            })
            .collect();

        Ok(serde_json::to_string_pretty(&json!({
            "status": "ok",
            "id": report.id.to_string(),
            "format": report.document.format.to_string(),
            "file": path.display().to_string(),
            "records": report.total_records(),
            "generatedAt": report.document.generated_at.to_rfc3339(),
            "parts": parts,
        }))?)
    }

    pub fn format_error(&self, error: &AppError) -> String {
        #[cfg(feature = "colored-output")]
        {
            format!("{} {error}", "Error:".red().bold())
        }
        #[cfg(not(feature = "colored-output"))]
        {
            format!("Error: {error}")
        }
    }

    fn colorize(&self, text: &str, color: &Color, bold: bool) -> String {
        #[cfg(feature = "colored-output")]
        {
            if self.colored {
                let colored_text = match color {
                    Color::Green => text.green(),
                    Color::Yellow => text.yellow(),
                    Color::Blue => text.blue(),
                    Color::Cyan => text.cyan(),
                };
                if bold {
                    colored_text.bold().to_string()
                } else {
                    colored_text.to_string()
                }
            } else {
                text.to_string()
            }
        }

        #[cfg(not(feature = "colored-output"))]
        {
            let _ = (self.colored, color, bold);
            text.to_string()
        }
    }
}

enum Color {
    Green,
    Yellow,
    Blue,
    Cyan,
}

fn target_json(target: &MediaTarget) -> serde_json::Value {
    json!({
        "index": target.part_index + 1,
        "title": target.title,
        "aid": target.aid,
        "cid": target.cid,
        "durationSecs": target.duration_secs,
    })
}

/// Write the export to `<name>.part`, then rename it into place.
pub async fn write_export(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(file_name);
    let tmp = dir.join(format!("{file_name}.part"));
    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, &path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(path)
}
