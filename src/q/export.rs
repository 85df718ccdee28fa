//! Pack export with a reproducible integrity hash.
//!
//! The hash covers the canonical JSON rendering of the (possibly redacted)
//! pack plus the generation timestamp, so identical store state and an
//! identical `generated_at` always produce the same digest, and any
//! change to a single transaction changes it.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::db::BudgetDb;
use crate::error::{AppError, AppResult};
use crate::q::packs::{assemble_pack, Pack};
use crate::util::{atomic_write_str, sanitize_filename};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Pdf,
    Both,
}

impl ExportFormat {
    pub fn parse(value: Option<&str>) -> AppResult<Self> {
        match value.map(|v| v.trim().to_lowercase()).as_deref() {
            None | Some("csv") => Ok(ExportFormat::Csv),
            Some("pdf") => Ok(ExportFormat::Pdf),
            Some("both") => Ok(ExportFormat::Both),
            Some(other) => Err(AppError::Validation(format!(
                "format must be csv, pdf or both (got {other})"
            ))),
        }
    }

    fn wants_csv(&self) -> bool {
        matches!(self, ExportFormat::Csv | ExportFormat::Both)
    }

    fn wants_pdf(&self) -> bool {
        matches!(self, ExportFormat::Pdf | ExportFormat::Both)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportResult {
    pub pack: String,
    pub period: String,
    pub hash: String,
    pub generated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csv_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,
}

/// Canonical JSON: serde_json's default map is BTree-backed, so object
/// keys serialize sorted; compact separators come from `to_string`.
pub fn stable_json<T: Serialize>(value: &T) -> AppResult<String> {
    let tree: serde_json::Value = serde_json::to_value(value)
        .map_err(|e| AppError::Integrity(format!("canonicalize: {e}")))?;
    serde_json::to_string(&tree).map_err(|e| AppError::Integrity(format!("canonicalize: {e}")))
}

/// sha256 over `stable_json || "|" || generated_at`, hex-encoded.
pub fn compute_export_hash(stable: &str, generated_at_iso: &str) -> String {
    let digest = Sha256::digest(format!("{stable}|{generated_at_iso}").as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Blank memo and payee fields throughout the pack. Only those two carry
/// PII; other row fields (income's per-source breakdown included) stay.
fn redact(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                if key == "memo" {
                    *v = serde_json::Value::Null;
                } else if key == "payee" || key == "payee_name" {
                    if v.is_string() {
                        *v = serde_json::Value::String("REDACTED".to_string());
                    }
                } else {
                    redact(v);
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                redact(item);
            }
        }
        _ => {}
    }
}

fn render_csv(pack: &serde_json::Value, hash: &str, generated_at: &str) -> AppResult<String> {
    // Section rows have ragged widths; the writer must not enforce one
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(Vec::new());
    let write = |w: &mut csv::Writer<Vec<u8>>, row: &[String]| -> AppResult<()> {
        w.write_record(row)
            .map_err(|e| AppError::Integrity(format!("csv render: {e}")))
    };

    let as_text = |v: &serde_json::Value| -> String {
        match v {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        }
    };

    write(
        &mut writer,
        &[
            "Pack".into(),
            as_text(&pack["pack"]),
            "Period".into(),
            as_text(&pack["period"]),
        ],
    )?;

    for section in pack["sections"].as_array().into_iter().flatten() {
        write(&mut writer, &[])?;
        write(
            &mut writer,
            &[
                "Section".into(),
                as_text(&section["id"]),
                as_text(&section["title"]),
            ],
        )?;
        for item in section["items"].as_array().into_iter().flatten() {
            let label = item["label"]
                .as_str()
                .or_else(|| item["method"].as_str())
                .unwrap_or("item")
                .to_string();
            for key in ["value_cents", "window_start", "window_end", "method"] {
                if !item[key].is_null() {
                    write(
                        &mut writer,
                        &["Item".into(), label.clone(), key.into(), as_text(&item[key])],
                    )?;
                }
            }
            if let Some(rows) = item["rows"].as_array() {
                let mut headers: Vec<String> = rows
                    .iter()
                    .filter_map(|r| r.as_object())
                    .flat_map(|o| o.keys().cloned())
                    .collect();
                headers.sort();
                headers.dedup();
                if !headers.is_empty() {
                    let mut head_row = vec!["Rows".to_string()];
                    head_row.extend(headers.clone());
                    write(&mut writer, &head_row)?;
                    for row in rows {
                        let mut cells = vec![String::new()];
                        cells.extend(headers.iter().map(|h| as_text(&row[h])));
                        write(&mut writer, &cells)?;
                    }
                }
            }
        }
    }
    write(&mut writer, &[])?;
    write(&mut writer, &["Hash".into(), hash.into()])?;
    write(&mut writer, &["Generated At".into(), generated_at.into()])?;

    let bytes = writer
        .into_inner()
        .map_err(|e| AppError::Integrity(format!("csv render: {e}")))?;
    String::from_utf8(bytes).map_err(|e| AppError::Integrity(format!("csv render: {e}")))
}

fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Minimal templated-HTML "PDF" document with the hash in the footer.
fn render_pdf_html(pack: &serde_json::Value, hash: &str, generated_at: &str) -> String {
    let as_text = |v: &serde_json::Value| -> String {
        match v {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        }
    };

    let mut parts: Vec<String> = Vec::new();
    parts.push(
        "<html><head><meta charset='utf-8'><title>Questionnaire Export</title>\
         <style>body{font-family:Arial,Helvetica,sans-serif;margin:24px}\
         h1{margin:0 0 4px}h2{margin:18px 0 6px}\
         table{border-collapse:collapse;width:100%}\
         th,td{border:1px solid #ddd;padding:6px;text-align:left}\
         .muted{color:#777;font-size:12px}</style></head><body>"
            .to_string(),
    );
    parts.push(format!("<h1>Pack: {}</h1>", escape_html(&as_text(&pack["pack"]))));
    parts.push(format!(
        "<div class='muted'>Period: {}</div>",
        escape_html(&as_text(&pack["period"]))
    ));

    for section in pack["sections"].as_array().into_iter().flatten() {
        let title = section["title"].as_str().unwrap_or("");
        parts.push(format!("<h2>{}</h2>", escape_html(title)));
        for item in section["items"].as_array().into_iter().flatten() {
            let label = item["label"]
                .as_str()
                .or_else(|| item["method"].as_str())
                .unwrap_or("item");
            parts.push(format!("<div><strong>{}</strong></div>", escape_html(label)));
            parts.push("<table><tbody>".to_string());
            for key in ["value_cents", "window_start", "window_end", "method"] {
                if !item[key].is_null() {
                    parts.push(format!(
                        "<tr><th>{}</th><td>{}</td></tr>",
                        escape_html(key),
                        escape_html(&as_text(&item[key]))
                    ));
                }
            }
            parts.push("</tbody></table>".to_string());
        }
    }

    parts.push("<hr>".to_string());
    parts.push(format!("<div class='muted'>Hash: {}</div>", escape_html(hash)));
    parts.push(format!(
        "<div class='muted'>Generated At: {}</div>",
        escape_html(generated_at)
    ));
    parts.push("</body></html>".to_string());
    parts.join("")
}

/// Assemble, hash and write a pack export.
///
/// `generated_at` is injectable so exports are reproducible under test;
/// callers pass the current UTC time in production.
#[allow(clippy::too_many_arguments)]
pub fn export_pack(
    db: &BudgetDb,
    export_dir: &Path,
    pack_name: &str,
    period: Option<&str>,
    format: ExportFormat,
    redact_memos: bool,
    today: NaiveDate,
    generated_at: &str,
) -> AppResult<ExportResult> {
    let pack: Pack = assemble_pack(db, pack_name, period, today)?;
    let mut tree: serde_json::Value = serde_json::to_value(&pack)
        .map_err(|e| AppError::Integrity(format!("pack serialize: {e}")))?;
    if redact_memos {
        redact(&mut tree);
    }

    let stable = stable_json(&tree)?;
    let hash = compute_export_hash(&stable, generated_at);

    std::fs::create_dir_all(export_dir)?;
    let base = format!(
        "{}_{}_{}",
        sanitize_filename(&pack.pack),
        sanitize_filename(generated_at),
        &hash[..8]
    );

    let mut result = ExportResult {
        pack: pack.pack.clone(),
        period: pack.period.clone(),
        hash: hash.clone(),
        generated_at: generated_at.to_string(),
        csv_url: None,
        pdf_url: None,
    };

    if format.wants_csv() {
        let csv_text = render_csv(&tree, &hash, generated_at)?;
        let path: PathBuf = export_dir.join(format!("{base}.csv"));
        atomic_write_str(&path, &csv_text)?;
        result.csv_url = Some(format!("/exports/{base}.csv"));
    }
    if format.wants_pdf() {
        let html = render_pdf_html(&tree, &hash, generated_at);
        let path: PathBuf = export_dir.join(format!("{base}.pdf"));
        atomic_write_str(&path, &html)?;
        result.pdf_url = Some(format!("/exports/{base}.pdf"));
    }

    log::info!("Exported pack {} ({}) as {base}", pack.pack, result.hash);
    Ok(result)
}
