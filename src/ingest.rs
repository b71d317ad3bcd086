//!
//! tabletalk ingestion pipeline
//! ----------------------------
//! Turns an upload batch of (filename, bytes) pairs into materialized tables
//! plus a fresh schema registry snapshot.
//!
//! - Recognized extensions: .csv (comma), .tsv (tab), .xlsx (first sheet),
//!   matched case-insensitively. Anything else, and empty payloads, are
//!   silently skipped so mixed uploads keep working.
//! - Table names derive from the file stem: lower-cased, non-alphanumeric
//!   runs collapsed to a single underscore, trimmed. Same-batch collisions
//!   are last-write-wins.
//! - Parse-failure policy is batch-abort: one bad recognized file fails the
//!   whole upload, nothing is loaded, and the registry keeps its previous
//!   content.
//! - On success the batch fully supersedes the previous one: leftover
//!   tables are dropped from the store, every new table is loaded, and the
//!   registry is replaced wholesale with this batch's descriptors, so store
//!   and registry always describe the same table set.

use std::io::Cursor;

use calamine::{Data, Reader, Xlsx};
use tracing::{debug, info};

use crate::error::{ApiError, ApiResult};
use crate::registry::{SchemaRegistry, TableSchema};
use crate::store::{ColumnKind, TableData, TableStore};

/// Table name used when sanitization of a filename leaves nothing.
pub const FALLBACK_TABLE_NAME: &str = "dataset";

/// One file from an upload batch.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub content: Vec<u8>,
}

/// Derive the table name for a source filename.
///
/// The extension is dropped, the stem is lower-cased, every run of
/// non-alphanumeric characters collapses to one underscore, and leading or
/// trailing underscores are stripped. An empty result falls back to
/// `FALLBACK_TABLE_NAME`.
pub fn derive_table_name(filename: &str) -> String {
    let stem = match filename.rsplit_once('.') {
        Some((stem, _ext)) if !stem.is_empty() => stem,
        _ => filename,
    };
    let mut out = String::with_capacity(stem.len());
    let mut pending_sep = false;
    for ch in stem.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    if out.is_empty() {
        FALLBACK_TABLE_NAME.to_string()
    } else {
        out
    }
}

/// Ingest a whole upload batch: parse every recognized file, load the
/// resulting tables into the store, then atomically replace the registry.
///
/// Returns the batch's schema descriptors in final order. Fails with
/// `ApiError::EmptyBatch` when no files were submitted at all, or
/// `ApiError::Ingestion` when a recognized file cannot be parsed or loaded
/// (batch-abort: the registry is left untouched in that case).
pub fn ingest_batch(
    store: &TableStore,
    registry: &SchemaRegistry,
    files: &[UploadedFile],
) -> ApiResult<Vec<TableSchema>> {
    if files.is_empty() {
        return Err(ApiError::EmptyBatch);
    }

    // Phase 1: parse everything before touching the store, so a bad file
    // aborts the batch without loading anything.
    let mut parsed: Vec<(String, TableData)> = Vec::new();
    for file in files {
        let Some(kind) = recognize(&file.filename) else {
            debug!(target: "tabletalk::ingest", "skipping '{}': unrecognized extension", file.filename);
            continue;
        };
        if file.content.is_empty() {
            debug!(target: "tabletalk::ingest", "skipping '{}': empty content", file.filename);
            continue;
        }
        let name = derive_table_name(&file.filename);
        let table = parse_file(kind, &name, &file.content).map_err(|message| {
            ApiError::Ingestion { file: file.filename.clone(), message }
        })?;
        // Same-batch name collision: later file wins, keeping the earlier
        // file's position in the batch order.
        if let Some(slot) = parsed.iter_mut().find(|(_, t)| t.name == name) {
            *slot = (file.filename.clone(), table);
        } else {
            parsed.push((file.filename.clone(), table));
        }
    }

    // Phase 2: materialize, then publish the new registry in one swap.
    // A batch fully supersedes the previous one, so tables whose names do
    // not recur in this batch are dropped from the store; same-named tables
    // are replaced by `load` itself.
    let keep: std::collections::HashSet<&str> =
        parsed.iter().map(|(_, t)| t.name.as_str()).collect();
    let existing = store.table_names().map_err(|e| ApiError::Ingestion {
        file: "<batch>".to_string(),
        message: e.to_string(),
    })?;
    for name in existing {
        if !keep.contains(name.as_str()) {
            store.drop_table(&name).map_err(|e| ApiError::Ingestion {
                file: "<batch>".to_string(),
                message: e.to_string(),
            })?;
        }
    }
    for (filename, table) in &parsed {
        store.load(table).map_err(|e| ApiError::Ingestion {
            file: filename.clone(),
            message: e.to_string(),
        })?;
    }
    let descriptors: Vec<TableSchema> = parsed
        .iter()
        .map(|(_, t)| TableSchema { name: t.name.clone(), columns: t.columns.clone() })
        .collect();
    registry.replace(descriptors.clone());
    info!(target: "tabletalk::ingest", "ingested batch: {} file(s) in, {} table(s) loaded",
        files.len(), descriptors.len());
    Ok(descriptors)
}

#[derive(Debug, Clone, Copy)]
enum FileKind {
    Csv,
    Tsv,
    Xlsx,
}

fn recognize(filename: &str) -> Option<FileKind> {
    let ext = filename.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase())?;
    match ext.as_str() {
        "csv" => Some(FileKind::Csv),
        "tsv" => Some(FileKind::Tsv),
        "xlsx" => Some(FileKind::Xlsx),
        _ => None,
    }
}

fn parse_file(kind: FileKind, name: &str, content: &[u8]) -> Result<TableData, String> {
    let (columns, rows) = match kind {
        FileKind::Csv => parse_delimited(content, b',')?,
        FileKind::Tsv => parse_delimited(content, b'\t')?,
        FileKind::Xlsx => parse_xlsx(content)?,
    };
    let kinds = infer_kinds(columns.len(), &rows);
    Ok(TableData { name: name.to_string(), columns, kinds, rows })
}

/// Header row defines the columns; every later record is data. Records are
/// padded or truncated to the header width.
fn parse_delimited(content: &[u8], delimiter: u8) -> Result<(Vec<String>, Vec<Vec<Option<String>>>), String> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(content);
    let columns: Vec<String> = rdr
        .headers()
        .map_err(|e| e.to_string())?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if columns.is_empty() {
        return Err("file has no header row".to_string());
    }
    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record.map_err(|e| e.to_string())?;
        let mut row: Vec<Option<String>> = record
            .iter()
            .take(columns.len())
            .map(|cell| {
                let cell = cell.trim();
                if cell.is_empty() { None } else { Some(cell.to_string()) }
            })
            .collect();
        row.resize(columns.len(), None);
        rows.push(row);
    }
    Ok((columns, rows))
}

/// First worksheet of the workbook; first row is the header.
fn parse_xlsx(content: &[u8]) -> Result<(Vec<String>, Vec<Vec<Option<String>>>), String> {
    let mut workbook: Xlsx<_> =
        Xlsx::new(Cursor::new(content.to_vec())).map_err(|e| e.to_string())?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| "workbook has no sheets".to_string())?
        .map_err(|e| e.to_string())?;
    let mut iter = range.rows();
    let header = iter.next().ok_or_else(|| "sheet has no header row".to_string())?;
    let columns: Vec<String> = header
        .iter()
        .map(|cell| cell_to_string(cell).unwrap_or_default().trim().to_string())
        .collect();
    if columns.iter().all(|c| c.is_empty()) {
        return Err("sheet has no header row".to_string());
    }
    let mut rows = Vec::new();
    for sheet_row in iter {
        let mut row: Vec<Option<String>> =
            sheet_row.iter().take(columns.len()).map(cell_to_string).collect();
        row.resize(columns.len(), None);
        rows.push(row);
    }
    Ok((columns, rows))
}

fn cell_to_string(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty => None,
        Data::String(s) => {
            let s = s.trim();
            if s.is_empty() { None } else { Some(s.to_string()) }
        }
        Data::Int(i) => Some(i.to_string()),
        // Whole floats print as integers so inference keeps them INTEGER.
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Some(format!("{}", *f as i64)),
        Data::Float(f) => Some(f.to_string()),
        Data::Bool(b) => Some(b.to_string()),
        Data::DateTime(dt) => Some(dt.as_f64().to_string()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Some(s.clone()),
        Data::Error(_) => None,
    }
}

/// Pick a column affinity from the data: all-integer columns become INTEGER,
/// all-numeric become REAL, everything else TEXT. Empty cells don't vote.
fn infer_kinds(width: usize, rows: &[Vec<Option<String>>]) -> Vec<ColumnKind> {
    (0..width)
        .map(|col| {
            let mut seen = false;
            let mut all_int = true;
            let mut all_real = true;
            for row in rows {
                let Some(Some(cell)) = row.get(col) else { continue };
                seen = true;
                if all_int && cell.parse::<i64>().is_err() {
                    all_int = false;
                }
                if all_real && cell.parse::<f64>().is_err() {
                    all_real = false;
                }
                if !all_int && !all_real {
                    break;
                }
            }
            if !seen {
                ColumnKind::Text
            } else if all_int {
                ColumnKind::Integer
            } else if all_real {
                ColumnKind::Real
            } else {
                ColumnKind::Text
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, body: &str) -> UploadedFile {
        UploadedFile { filename: name.to_string(), content: body.as_bytes().to_vec() }
    }

    #[test]
    fn table_name_derivation() {
        assert_eq!(derive_table_name("Sales Report (2024).csv"), "sales_report_2024");
        assert_eq!(derive_table_name("city.csv"), "city");
        assert_eq!(derive_table_name("UPPER.TSV"), "upper");
        assert_eq!(derive_table_name("archive.2024.csv"), "archive_2024");
        assert_eq!(derive_table_name("___.csv"), FALLBACK_TABLE_NAME);
        assert_eq!(derive_table_name("no_extension"), "no_extension");
    }

    #[test]
    fn csv_batch_populates_store_and_registry() {
        let store = TableStore::in_memory().unwrap();
        let registry = SchemaRegistry::new();
        let schemas = ingest_batch(
            &store,
            &registry,
            &[file("city.csv", "name,population\nOslo,709000\nBergen,285000\n")],
        )
        .unwrap();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0].render(), "city(name, population)");
        let rows = store.query("select name from city order by name").unwrap();
        assert_eq!(rows[0]["name"], "Bergen");
        assert_eq!(registry.render(), "city(name, population)");
    }

    #[test]
    fn tsv_uses_tab_delimiter() {
        let store = TableStore::in_memory().unwrap();
        let registry = SchemaRegistry::new();
        let schemas =
            ingest_batch(&store, &registry, &[file("pets.tsv", "pet\tlegs\ncat\t4\n")]).unwrap();
        assert_eq!(schemas[0].columns, vec!["pet", "legs"]);
        let rows = store.query("select legs from pets").unwrap();
        assert_eq!(rows[0]["legs"], 4);
    }

    #[test]
    fn unrecognized_extension_and_empty_content_are_skipped() {
        let store = TableStore::in_memory().unwrap();
        let registry = SchemaRegistry::new();
        let schemas = ingest_batch(
            &store,
            &registry,
            &[
                file("notes.txt", "not tabular"),
                UploadedFile { filename: "empty.csv".into(), content: Vec::new() },
                file("ok.csv", "a\n1\n"),
            ],
        )
        .unwrap();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0].name, "ok");
    }

    #[test]
    fn same_batch_collision_is_last_write_wins() {
        let store = TableStore::in_memory().unwrap();
        let registry = SchemaRegistry::new();
        let schemas = ingest_batch(
            &store,
            &registry,
            &[
                file("City.csv", "name\nOslo\n"),
                file("city.csv", "name,country\nParis,France\n"),
            ],
        )
        .unwrap();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0].columns, vec!["name", "country"]);
        let rows = store.query("select name from city").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "Paris");
    }

    #[test]
    fn parse_failure_aborts_batch_and_keeps_registry() {
        let store = TableStore::in_memory().unwrap();
        let registry = SchemaRegistry::new();
        ingest_batch(&store, &registry, &[file("old.csv", "a\n1\n")]).unwrap();

        // Xlsx extension with non-xlsx bytes fails to parse.
        let bad = UploadedFile { filename: "broken.xlsx".into(), content: vec![1, 2, 3, 4] };
        let err = ingest_batch(&store, &registry, &[file("fresh.csv", "b\n2\n"), bad]).unwrap_err();
        assert!(matches!(err, ApiError::Ingestion { ref file, .. } if file == "broken.xlsx"));
        // Previous batch still registered, nothing from the failed batch.
        assert_eq!(registry.render(), "old(a)");
    }

    #[test]
    fn new_batch_drops_superseded_tables() {
        let store = TableStore::in_memory().unwrap();
        let registry = SchemaRegistry::new();
        ingest_batch(&store, &registry, &[file("city.csv", "name\nOslo\n")]).unwrap();
        ingest_batch(&store, &registry, &[file("pets.csv", "pet\ncat\n")]).unwrap();
        // Store and registry agree: only the latest batch's table exists.
        assert_eq!(store.table_names().unwrap(), vec!["pets"]);
        assert_eq!(registry.render(), "pets(pet)");
        let err = store.query("select * from city").unwrap_err();
        assert!(err.message.contains("no such table"), "got: {}", err.message);
    }

    #[test]
    fn empty_batch_is_an_error() {
        let store = TableStore::in_memory().unwrap();
        let registry = SchemaRegistry::new();
        assert!(matches!(ingest_batch(&store, &registry, &[]), Err(ApiError::EmptyBatch)));
    }

    #[test]
    fn reupload_is_idempotent() {
        let store = TableStore::in_memory().unwrap();
        let registry = SchemaRegistry::new();
        let batch = [file("city.csv", "name\nOslo\n"), file("sales.csv", "amount\n10\n")];
        ingest_batch(&store, &registry, &batch).unwrap();
        let first = registry.render();
        ingest_batch(&store, &registry, &batch).unwrap();
        assert_eq!(registry.render(), first);
    }

    #[test]
    fn type_inference_by_column() {
        let rows = vec![
            vec![Some("1".to_string()), Some("1.5".to_string()), Some("x".to_string()), None],
            vec![Some("2".to_string()), Some("2".to_string()), Some("3".to_string()), None],
        ];
        let kinds = infer_kinds(4, &rows);
        assert_eq!(kinds[0], ColumnKind::Integer);
        assert_eq!(kinds[1], ColumnKind::Real);
        assert_eq!(kinds[2], ColumnKind::Text);
        assert_eq!(kinds[3], ColumnKind::Text);
    }

    #[test]
    fn ragged_rows_are_padded_and_truncated() {
        let (cols, rows) = parse_delimited(b"a,b\n1\n1,2,3\n", b',').unwrap();
        assert_eq!(cols, vec!["a", "b"]);
        assert_eq!(rows[0], vec![Some("1".to_string()), None]);
        assert_eq!(rows[1], vec![Some("1".to_string()), Some("2".to_string())]);
    }
}
