use std::io::Write;

use clap::ValueEnum;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::flatten::Table;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Table,
    Csv,
    Json,
}

/// Strings are printed bare, null and absent cells are blank.
pub fn cell_text(cell: Option<&Value>) -> String {
    match cell {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

pub fn write_table<W: Write>(table: &Table, format: Format, out: &mut W) -> Result<()> {
    match format {
        Format::Table => write_text(table, out),
        Format::Csv => write_csv(table, out),
        Format::Json => write_json_lines(table, out),
    }
}

fn write_text<W: Write>(table: &Table, out: &mut W) -> Result<()> {
    let columns = table.get_columns();
    let cells: Vec<Vec<String>> = table
        .get_rows()
        .iter()
        .map(|row| row.iter().map(|cell| cell_text(cell.as_ref())).collect())
        .collect();

    let mut widths: Vec<usize> = columns.iter().map(|c| c.chars().count()).collect();
    for row in &cells {
        for (idx, text) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(text.chars().count());
        }
    }

    write_padded(out, columns, &widths)?;
    for row in &cells {
        write_padded(out, row, &widths)?;
    }
    Ok(())
}

fn write_padded<W: Write>(out: &mut W, values: &[String], widths: &[usize]) -> Result<()> {
    let line = values
        .iter()
        .zip(widths)
        .map(|(value, width)| format!("{:<width$}", value, width = *width))
        .collect::<Vec<_>>()
        .join("  ");
    writeln!(out, "{}", line.trim_end())?;
    Ok(())
}

fn write_csv<W: Write>(table: &Table, out: &mut W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(table.get_columns())?;
    for row in table.get_rows() {
        writer.write_record(row.iter().map(|cell| cell_text(cell.as_ref())))?;
    }
    writer.flush()?;
    Ok(())
}

fn write_json_lines<W: Write>(table: &Table, out: &mut W) -> Result<()> {
    for row in table.get_rows() {
        let mut object = Map::new();
        for (column, cell) in table.get_columns().iter().zip(row) {
            if let Some(value) = cell {
                object.insert(column.clone(), value.clone());
            }
        }
        serde_json::to_writer(&mut *out, &Value::Object(object))?;
        writeln!(out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flatten::normalize;
    use serde_json::json;

    fn table() -> Table {
        normalize(
            &[
                json!({ "key": "COMPUTER SCIENCE", "doc_count": 12 }),
                json!({ "key": "AREA, STUDIES", "extra": { "n": null } }),
            ],
            None,
        )
    }

    fn render(format: Format) -> String {
        let mut out = Vec::new();
        write_table(&table(), format, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_cell_text() {
        assert_eq!(cell_text(None), "");
        assert_eq!(cell_text(Some(&Value::Null)), "");
        assert_eq!(cell_text(Some(&json!("x"))), "x");
        assert_eq!(cell_text(Some(&json!([1, "a"]))), "[1,\"a\"]");
        assert_eq!(cell_text(Some(&json!(2.5))), "2.5");
    }

    #[test]
    fn test_text_table_is_aligned() {
        assert_eq!(
            render(Format::Table),
            "key               doc_count  extra.n\n\
             COMPUTER SCIENCE  12\n\
             AREA, STUDIES\n"
        );
    }

    #[test]
    fn test_csv_quotes_commas() {
        assert_eq!(
            render(Format::Csv),
            "key,doc_count,extra.n\nCOMPUTER SCIENCE,12,\n\"AREA, STUDIES\",,\n"
        );
    }

    #[test]
    fn test_json_lines_skip_absent_cells() {
        assert_eq!(
            render(Format::Json),
            "{\"key\":\"COMPUTER SCIENCE\",\"doc_count\":12}\n{\"key\":\"AREA, STUDIES\",\"extra.n\":null}\n"
        );
    }

    #[test]
    fn test_empty_table_prints_blank_header() {
        let mut out = Vec::new();
        write_table(&Table::default(), Format::Table, &mut out).unwrap();
        assert_eq!(out, b"\n");
    }
}
