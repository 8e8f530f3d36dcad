use super::{Document, DocumentError, DocumentKind, Table};
use calamine::{Reader, Xlsx};
use rust_xlsxwriter::Workbook;
use std::io::{Cursor, Read, Write};

pub const SHEET_NAME: &str = "Sheet1";

/// `.xlsx` workbooks. Reads the first worksheet; writes a single worksheet named `Sheet1`.
#[derive(Debug, Clone, Default)]
pub struct ExcelDocument {
    table: Table,
}

fn excel_error(e: impl std::fmt::Display) -> DocumentError {
    DocumentError::Excel(e.to_string())
}

impl Document for ExcelDocument {
    fn kind(&self) -> DocumentKind {
        DocumentKind::Excel
    }

    fn table(&self) -> &Table {
        &self.table
    }

    fn table_mut(&mut self) -> &mut Table {
        &mut self.table
    }

    fn read_rows(&self, reader: &mut dyn Read) -> Result<Vec<Vec<String>>, DocumentError> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes)).map_err(excel_error)?;
        let Some(first) = workbook.sheet_names().first().cloned() else {
            return Err(DocumentError::Excel("workbook has no sheet".into()));
        };
        let range = workbook.worksheet_range(&first).map_err(excel_error)?;
        Ok(range
            .rows()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect())
            .collect())
    }

    fn write_rows(&self, rows: &[Vec<String>], writer: &mut dyn Write) -> Result<(), DocumentError> {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.set_name(SHEET_NAME).map_err(excel_error)?;
        for (r, row) in rows.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                let (Ok(rn), Ok(cn)) = (u32::try_from(r), u16::try_from(c)) else {
                    return Err(DocumentError::Limit { row: r, column: c });
                };
                sheet
                    .write_string(rn, cn, value)
                    .map_err(|_| DocumentError::Limit { row: r, column: c })?;
            }
        }
        let buffer = workbook.save_to_buffer().map_err(excel_error)?;
        writer.write_all(&buffer)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|r| r.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    #[test]
    fn export_then_import() {
        let mut doc = ExcelDocument::default();
        doc.from_slice(strings(&[&["name", "size"], &["a", "1"], &["b", "2"]]));
        let mut workbook = Vec::new();
        doc.export(&mut workbook).unwrap();

        let mut back = ExcelDocument::default();
        back.import(&mut workbook.as_slice()).unwrap();
        assert_eq!(back.to_slice(), doc.to_slice());
        assert_eq!(back.row_count(), 3);
    }

    #[test]
    fn validate_workbook() {
        let mut doc = ExcelDocument::default();
        doc.from_slice(strings(&[&["code"], &["A1"], &["??"]]));
        let mut workbook = Vec::new();
        doc.export(&mut workbook).unwrap();

        let mut checked = ExcelDocument::default();
        checked
            .validate(
                &mut workbook.as_slice(),
                &|_| Ok(()),
                &|_, r| {
                    if r[0].chars().all(char::is_alphanumeric) {
                        Ok(())
                    } else {
                        Err("code must be alphanumeric".into())
                    }
                },
            )
            .unwrap();
        assert_eq!(checked.header(), ["code", "errorStatus", "errorMessage"]);
        assert_eq!(checked.records()[0], ["A1", "true", ""]);
        assert_eq!(checked.records()[1], ["??", "false", "code must be alphanumeric"]);
    }

    #[test]
    fn garbage_is_not_a_workbook() {
        let mut doc = ExcelDocument::default();
        let err = doc.import(&mut "not a zip".as_bytes()).unwrap_err();
        assert!(matches!(err, DocumentError::Excel(_)));
    }
}
