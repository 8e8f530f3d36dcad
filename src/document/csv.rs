use super::{Document, DocumentError, DocumentKind, Table};
use std::io::{Read, Write};

#[derive(Debug, Clone, Default)]
pub struct CsvDocument {
    table: Table,
}

impl Document for CsvDocument {
    fn kind(&self) -> DocumentKind {
        DocumentKind::Csv
    }

    fn table(&self) -> &Table {
        &self.table
    }

    fn table_mut(&mut self) -> &mut Table {
        &mut self.table
    }

    fn read_rows(&self, reader: &mut dyn Read) -> Result<Vec<Vec<String>>, DocumentError> {
        let mut csv_reader = csv::ReaderBuilder::new().has_headers(false).from_reader(reader);
        let mut rows = Vec::new();
        for record in csv_reader.records() {
            rows.push(record?.iter().map(String::from).collect());
        }
        Ok(rows)
    }

    fn write_rows(&self, rows: &[Vec<String>], writer: &mut dyn Write) -> Result<(), DocumentError> {
        let mut csv_writer = csv::Writer::from_writer(Vec::new());
        for row in rows {
            csv_writer.write_record(row)?;
        }
        let buffer = csv_writer
            .into_inner()
            .map_err(|e| DocumentError::Io(e.into_error()))?;
        writer.write_all(&buffer)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_export_round_trip() {
        let input = "name,size\na,1\n\"b, c\",2\n";
        let mut doc = CsvDocument::default();
        doc.import(&mut input.as_bytes()).unwrap();
        assert_eq!(doc.header(), ["name", "size"]);
        assert_eq!(doc.records()[1], ["b, c", "2"]);

        let mut out = Vec::new();
        doc.export(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), input);

        let mut copy = CsvDocument::default();
        copy.from_slice(doc.to_slice());
        assert_eq!(copy.to_slice(), doc.to_slice());
    }

    #[test]
    fn validate_marks_each_record() {
        let mut doc = CsvDocument::default();
        let header_ok = |h: &[String]| {
            if h.iter().any(|c| c == "email") {
                Ok(())
            } else {
                Err("email column is required".to_string())
            }
        };
        let record_ok = |_: &[String], r: &[String]| {
            if r[0].contains('@') {
                Ok(())
            } else {
                Err(format!("{} is not an email", r[0]))
            }
        };

        doc.validate(&mut "email\na@x.io\nnope\n".as_bytes(), &header_ok, &record_ok)
            .unwrap();
        assert_eq!(doc.header(), ["email", "errorStatus", "errorMessage"]);
        assert_eq!(doc.records()[0], ["a@x.io", "true", ""]);
        assert_eq!(doc.records()[1], ["nope", "false", "nope is not an email"]);

        let err = doc
            .validate(&mut "name\nx\n".as_bytes(), &header_ok, &record_ok)
            .unwrap_err();
        assert_eq!(err.to_string(), "email column is required");
        assert!(doc.header().is_empty());
    }

    #[test]
    fn uneven_rows_fail_to_read() {
        let mut doc = CsvDocument::default();
        let err = doc.import(&mut "a,b\n1\n".as_bytes()).unwrap_err();
        assert!(matches!(err, DocumentError::Csv(_)));
    }
}
