use calamine::{open_workbook_from_rs, Data, Range, Reader, Xls, Xlsx};
use rayon::prelude::*;
use std::io::Cursor;
use thiserror::Error;

use crate::models::StagingRow;

#[derive(Debug, Error)]
pub enum SpreadsheetError {
    #[error("only .xlsx and .xls files are accepted")]
    UnsupportedExtension,

    #[error("the uploaded file is empty")]
    EmptyFile,

    #[error("cannot read spreadsheet: {0}")]
    Unreadable(String),

    #[error("the workbook has no worksheet")]
    NoSheet,

    #[error("cannot build template: {0}")]
    Template(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkbookKind {
    Xlsx,
    Xls,
}

impl WorkbookKind {
    /// Case-insensitive `.xlsx` / `.xls` check on the uploaded file name.
    pub fn from_filename(filename: &str) -> Result<Self, SpreadsheetError> {
        let lower = filename.trim().to_ascii_lowercase();
        if lower.ends_with(".xlsx") {
            Ok(WorkbookKind::Xlsx)
        } else if lower.ends_with(".xls") {
            Ok(WorkbookKind::Xls)
        } else {
            Err(SpreadsheetError::UnsupportedExtension)
        }
    }
}

/// Data rows of the first worksheet; the first row is the header.
pub fn read_data_rows(kind: WorkbookKind, bytes: Vec<u8>) -> Result<Vec<Vec<Option<String>>>, SpreadsheetError> {
    if bytes.is_empty() {
        return Err(SpreadsheetError::EmptyFile);
    }
    let cursor = Cursor::new(bytes);
    let range = match kind {
        WorkbookKind::Xlsx => {
            let mut workbook: Xlsx<_> = open_workbook_from_rs(cursor)
                .map_err(|e: calamine::XlsxError| SpreadsheetError::Unreadable(e.to_string()))?;
            workbook
                .worksheet_range_at(0)
                .ok_or(SpreadsheetError::NoSheet)?
                .map_err(|e| SpreadsheetError::Unreadable(e.to_string()))?
        }
        WorkbookKind::Xls => {
            let mut workbook: Xls<_> = open_workbook_from_rs(cursor)
                .map_err(|e: calamine::XlsError| SpreadsheetError::Unreadable(e.to_string()))?;
            workbook
                .worksheet_range_at(0)
                .ok_or(SpreadsheetError::NoSheet)?
                .map_err(|e| SpreadsheetError::Unreadable(e.to_string()))?
        }
    };
    Ok(data_rows(&range))
}

fn data_rows(range: &Range<Data>) -> Vec<Vec<Option<String>>> {
    range
        .rows()
        .skip(1)
        .map(|row| row.iter().map(cell_text).collect::<Vec<_>>())
        .filter(|cells| cells.iter().any(Option::is_some))
        .collect()
}

/// Cell as written to the staging table. Whole floats lose their `.0`.
pub fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty => None,
        Data::String(s) if s.is_empty() => None,
        Data::String(s) => Some(s.clone()),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => Some(format!("{}", *f as i64)),
        Data::Float(f) => Some(f.to_string()),
        Data::Int(i) => Some(i.to_string()),
        other => Some(other.to_string()),
    }
}

/// Positional mapping onto the staging columns.
pub fn to_staging_rows(rows: &[Vec<Option<String>>]) -> Vec<StagingRow> {
    rows.par_iter().map(|cells| StagingRow::from_cells(cells)).collect()
}

pub const TEMPLATE_FILENAME: &str = "modele_import_ecritures.csv";

pub const TEMPLATE_HEADER: [&str; 10] = [
    "compte",
    "libelle",
    "montant",
    "date",
    "type_valeur",
    "axe1",
    "axe2",
    "axe3",
    "societe",
    "periode",
];

const TEMPLATE_EXAMPLE: [&str; 10] = [
    "401000",
    "Achat fournitures",
    "1250.50",
    "2024-01-31",
    "REEL",
    "AX1",
    "AX2",
    "AX3",
    "SOC01",
    "202401",
];

/// CSV template for manual imports: header plus one example row.
pub fn import_template() -> Result<Vec<u8>, SpreadsheetError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(TEMPLATE_HEADER)
        .and_then(|_| writer.write_record(TEMPLATE_EXAMPLE))
        .map_err(|e| SpreadsheetError::Template(e.to_string()))?;
    writer
        .into_inner()
        .map_err(|e| SpreadsheetError::Template(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_rows_below_header() {
        let workbook = include_bytes!("../../tests/fixtures/ecritures_une_ligne.xlsx");
        let rows = read_data_rows(WorkbookKind::Xlsx, workbook.to_vec()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].len(), 30);
        assert_eq!(rows[0][0].as_deref(), Some("SOC09"));
        assert_eq!(rows[0][1].as_deref(), Some("2024"));

        let staged = to_staging_rows(&rows);
        assert_eq!(staged[0].values[23].as_deref(), Some("r9c24"));
    }

    #[test]
    fn test_extension_check() {
        assert_eq!(WorkbookKind::from_filename("Import.XLSX").unwrap(), WorkbookKind::Xlsx);
        assert_eq!(WorkbookKind::from_filename("old.xls").unwrap(), WorkbookKind::Xls);
        assert!(WorkbookKind::from_filename("data.csv").is_err());
        assert!(WorkbookKind::from_filename("xlsx").is_err());
    }

    #[test]
    fn test_cell_text() {
        assert_eq!(cell_text(&Data::Empty), None);
        assert_eq!(cell_text(&Data::String(String::new())), None);
        assert_eq!(cell_text(&Data::Float(2024.0)).as_deref(), Some("2024"));
        assert_eq!(cell_text(&Data::Float(12.5)).as_deref(), Some("12.5"));
        assert_eq!(cell_text(&Data::Int(7)).as_deref(), Some("7"));
        assert_eq!(cell_text(&Data::Bool(true)).as_deref(), Some("true"));
        assert_eq!(cell_text(&Data::String("SOC01".into())).as_deref(), Some("SOC01"));
    }

    #[test]
    fn test_header_row_and_blank_rows_are_skipped() {
        let mut range = Range::new((0, 0), (3, 1));
        range.set_value((0, 0), Data::String("Societe".into()));
        range.set_value((0, 1), Data::String("Annee".into()));
        range.set_value((1, 0), Data::String("SOC01".into()));
        range.set_value((1, 1), Data::Float(2024.0));
        range.set_value((3, 0), Data::String("SOC02".into()));

        let rows = data_rows(&range);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec![Some("SOC01".to_string()), Some("2024".to_string())]);
        assert_eq!(rows[1], vec![Some("SOC02".to_string()), None]);
    }

    #[test]
    fn test_extra_columns_are_dropped() {
        let wide: Vec<Option<String>> = (1..=30).map(|n| Some(format!("c{}", n))).collect();
        let rows = to_staging_rows(&[wide]);
        assert_eq!(rows[0].values[23].as_deref(), Some("c24"));
        assert_eq!(rows[0].get("Societe"), Some("c1"));
        assert_eq!(rows[0].get("TypeValeur"), Some("c24"));
    }

    #[test]
    fn test_unreadable_workbook() {
        assert!(matches!(
            read_data_rows(WorkbookKind::Xlsx, b"not a zip".to_vec()),
            Err(SpreadsheetError::Unreadable(_))
        ));
        assert!(matches!(
            read_data_rows(WorkbookKind::Xls, Vec::new()),
            Err(SpreadsheetError::EmptyFile)
        ));
    }

    #[test]
    fn test_template() {
        let bytes = import_template().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("compte,libelle,montant,date,type_valeur,axe1,axe2,axe3,societe,periode")
        );
        assert!(lines.next().unwrap().starts_with("401000,Achat fournitures,1250.50"));
        assert_eq!(lines.next(), None);
    }
}
