use polars::prelude::*;
use std::path::Path;
use tracing::debug;

use crate::error::{StatsError, StatsResult};
use crate::storage::DatasetStore;

pub mod table;
pub mod workbook;

pub use table::Table;

/// On-disk format, detected from the file extension
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FileFormat {
    Csv,
    Workbook,
    Unknown,
}

impl FileFormat {
    pub fn detect(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        match ext.as_str() {
            "csv" | "txt" => FileFormat::Csv,
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => FileFormat::Workbook,
            _ => FileFormat::Unknown,
        }
    }
}

/// Resolves datasets through the store and parses them into tables.
///
/// Nothing is cached: every call re-reads the file.
pub struct SheetReader {
    store: DatasetStore,
}

impl SheetReader {
    pub fn new(store: DatasetStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &DatasetStore {
        &self.store
    }

    /// Read a dataset, using the first sheet when `sheet_name` is `None`
    pub fn read(&self, dataset_id: &str, sheet_name: Option<&str>) -> StatsResult<Table> {
        let path = self.store.resolve(dataset_id)?;
        crate::timed_operation!(format!("read:{}", dataset_id), { read_path(&path, sheet_name) })
    }

    /// Sheet names of a dataset; delimited files have none
    pub fn sheet_names(&self, dataset_id: &str) -> StatsResult<Vec<String>> {
        let path = self.store.resolve(dataset_id)?;
        match FileFormat::detect(&path) {
            FileFormat::Workbook => workbook::sheet_names(&path),
            FileFormat::Csv => Ok(Vec::new()),
            FileFormat::Unknown => Err(unsupported(&path)),
        }
    }
}

/// Parse a file into a table according to its extension
pub fn read_path(path: &Path, sheet_name: Option<&str>) -> StatsResult<Table> {
    // Separate I/O problems from format problems before any parser runs
    let metadata = std::fs::metadata(path).map_err(|e| StatsError::io(path, e))?;

    match FileFormat::detect(path) {
        FileFormat::Csv => {
            if let Some(sheet) = sheet_name {
                debug!("Ignoring sheet '{}' for delimited file {}", sheet, path.display());
            }
            if metadata.len() == 0 {
                return Ok(Table::empty(None));
            }
            read_csv(path)
        }
        FileFormat::Workbook => {
            if metadata.len() == 0 {
                return match sheet_name {
                    Some(requested) => Err(StatsError::not_found(format!(
                        "sheet '{}' not found; available sheets: []",
                        requested
                    ))),
                    None => Ok(Table::empty(None)),
                };
            }
            workbook::read_sheet(path, sheet_name)
        }
        FileFormat::Unknown => Err(unsupported(path)),
    }
}

fn read_csv(path: &Path) -> StatsResult<Table> {
    let frame = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(1000))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .and_then(|reader| reader.finish())
        .map_err(|e| StatsError::parse(format!("cannot parse CSV {}: {}", path.display(), e)))?;

    debug!("Read CSV {} with shape {:?}", path.display(), frame.shape());
    Ok(Table::new(frame, None))
}

fn unsupported(path: &Path) -> StatsError {
    StatsError::parse(format!(
        "unsupported format for {} (expected .csv, .xlsx, .xlsm, .xlsb, .xls or .ods)",
        path.display()
    ))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use ::zip::write::FileOptions;
    use ::zip::{CompressionMethod, ZipWriter};

    /// One worksheet of a test workbook: sheet name plus rows of cells.
    /// Cells starting with `=` are written as numbers, `#t`/`#f` as booleans.
    pub(crate) type SheetSpec<'a> = (&'a str, Vec<Vec<&'a str>>);

    fn column_letter(idx: usize) -> String {
        let mut n = idx + 1;
        let mut letters = Vec::new();
        while n > 0 {
            let rem = (n - 1) % 26;
            letters.push((b'A' + rem as u8) as char);
            n = (n - 1) / 26;
        }
        letters.iter().rev().collect()
    }

    fn sheet_xml(rows: &[Vec<&str>]) -> String {
        let mut xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
        );
        for (r, row) in rows.iter().enumerate() {
            xml.push_str(&format!(r#"<row r="{}">"#, r + 1));
            for (c, cell) in row.iter().enumerate() {
                let reference = format!("{}{}", column_letter(c), r + 1);
                if cell.is_empty() {
                    continue;
                } else if let Some(number) = cell.strip_prefix('=') {
                    xml.push_str(&format!(r#"<c r="{}"><v>{}</v></c>"#, reference, number));
                } else if *cell == "#t" || *cell == "#f" {
                    let flag = if *cell == "#t" { 1 } else { 0 };
                    xml.push_str(&format!(r#"<c r="{}" t="b"><v>{}</v></c>"#, reference, flag));
                } else {
                    xml.push_str(&format!(
                        r#"<c r="{}" t="inlineStr"><is><t>{}</t></is></c>"#,
                        reference, cell
                    ));
                }
            }
            xml.push_str("</row>");
        }
        xml.push_str("</sheetData></worksheet>");
        xml
    }

    /// Assemble a minimal `.xlsx` package by hand
    pub(crate) fn write_xlsx(path: &Path, sheets: &[SheetSpec<'_>]) {
        let file = std::fs::File::create(path).unwrap();
        let mut writer = ZipWriter::new(file);
        let options = FileOptions::default().compression_method(CompressionMethod::Stored);

        let mut content_types = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>"#,
        );
        let mut workbook = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>"#,
        );
        let mut rels = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
        );

        for (i, (name, _)) in sheets.iter().enumerate() {
            let n = i + 1;
            content_types.push_str(&format!(
                r#"<Override PartName="/xl/worksheets/sheet{}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#,
                n
            ));
            workbook.push_str(&format!(
                r#"<sheet name="{}" sheetId="{}" r:id="rId{}"/>"#,
                name, n, n
            ));
            rels.push_str(&format!(
                r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{}.xml"/>"#,
                n, n
            ));
        }
        content_types.push_str("</Types>");
        workbook.push_str("</sheets></workbook>");
        rels.push_str("</Relationships>");

        let root_rels = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

        let mut parts: Vec<(String, String)> = vec![
            ("[Content_Types].xml".to_string(), content_types),
            ("_rels/.rels".to_string(), root_rels.to_string()),
            ("xl/workbook.xml".to_string(), workbook),
            ("xl/_rels/workbook.xml.rels".to_string(), rels),
        ];
        for (i, (_, rows)) in sheets.iter().enumerate() {
            parts.push((format!("xl/worksheets/sheet{}.xml", i + 1), sheet_xml(rows)));
        }

        for (name, body) in parts {
            writer.start_file(name, options).unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    fn reader_in(dir: &TempDir) -> SheetReader {
        SheetReader::new(DatasetStore::new(&ServerConfig::with_data_dir(dir.path())))
    }

    fn two_sheet_workbook(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("wb_cohort.xlsx");
        write_xlsx(
            &path,
            &[
                (
                    "Patients",
                    vec![
                        vec!["id", "sex", "age", "smoker"],
                        vec!["=1", "F", "=34", "#t"],
                        vec!["=2", "M", "=51.5", "#f"],
                        vec!["=3", "F", "", "#t"],
                    ],
                ),
                ("Visits", vec![vec!["visit"], vec!["=10"], vec!["=11"]]),
            ],
        );
        path
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(FileFormat::detect(Path::new("a_b.CSV")), FileFormat::Csv);
        assert_eq!(FileFormat::detect(Path::new("a.xlsx")), FileFormat::Workbook);
        assert_eq!(FileFormat::detect(Path::new("a.xls")), FileFormat::Workbook);
        assert_eq!(FileFormat::detect(Path::new("a.png")), FileFormat::Unknown);
        assert_eq!(FileFormat::detect(Path::new("abc")), FileFormat::Unknown);
    }

    #[test]
    fn test_read_csv() {
        let dir = TempDir::new().unwrap();
        let reader = reader_in(&dir);
        reader
            .store()
            .store("ds", b"group,value,label\na,1.5,x\nb,,y\na,3,\n", "data.csv")
            .unwrap();

        let table = reader.read("ds", None).unwrap();
        assert_eq!(table.sheet(), None);
        assert_eq!(table.height(), 3);
        assert_eq!(table.column_names(), vec!["group", "value", "label"]);
        assert_eq!(
            table.numeric_values("value").unwrap(),
            vec![Some(1.5), None, Some(3.0)]
        );
        assert_eq!(table.column("label").unwrap().null_count(), 1);
    }

    #[test]
    fn test_csv_ignores_sheet_name() {
        let dir = TempDir::new().unwrap();
        let reader = reader_in(&dir);
        reader.store().store("ds", b"x\n1\n2\n", "data.csv").unwrap();

        let table = reader.read("ds", Some("Sheet1")).unwrap();
        assert_eq!(table.height(), 2);
        assert!(reader.sheet_names("ds").unwrap().is_empty());
    }

    #[test]
    fn test_empty_files_give_empty_tables() {
        let dir = TempDir::new().unwrap();
        let reader = reader_in(&dir);
        reader.store().store("csv", b"", "empty.csv").unwrap();
        reader.store().store("xlsx", b"", "empty.xlsx").unwrap();

        for id in ["csv", "xlsx"] {
            let table = reader.read(id, None).unwrap();
            assert_eq!((table.height(), table.width()), (0, 0), "dataset {}", id);
        }

        let err = reader.read("xlsx", Some("Patients")).unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("available sheets: []"));
    }

    #[test]
    fn test_header_only_csv() {
        let dir = TempDir::new().unwrap();
        let reader = reader_in(&dir);
        reader.store().store("ds", b"a,b\n", "data.csv").unwrap();

        let table = reader.read("ds", None).unwrap();
        assert_eq!(table.height(), 0);
        assert_eq!(table.column_names(), vec!["a", "b"]);
    }

    #[test]
    fn test_workbook_defaults_to_first_sheet() {
        let dir = TempDir::new().unwrap();
        two_sheet_workbook(&dir);
        let reader = reader_in(&dir);

        let table = reader.read("wb", None).unwrap();
        assert_eq!(table.sheet(), Some("Patients"));
        assert_eq!(table.height(), 3);
        assert_eq!(table.column("id").unwrap().dtype(), &DataType::Int64);
        assert_eq!(table.column("age").unwrap().dtype(), &DataType::Float64);
        assert_eq!(table.column("smoker").unwrap().dtype(), &DataType::Boolean);
        assert_eq!(table.column("sex").unwrap().dtype(), &DataType::String);
        assert_eq!(
            table.numeric_values("age").unwrap(),
            vec![Some(34.0), Some(51.5), None]
        );
    }

    #[test]
    fn test_workbook_named_sheet() {
        let dir = TempDir::new().unwrap();
        two_sheet_workbook(&dir);
        let reader = reader_in(&dir);

        let table = reader.read("wb", Some("Visits")).unwrap();
        assert_eq!(table.sheet(), Some("Visits"));
        assert_eq!(table.column_names(), vec!["visit"]);
        assert_eq!(
            reader.sheet_names("wb").unwrap(),
            vec!["Patients".to_string(), "Visits".to_string()]
        );
    }

    #[test]
    fn test_missing_sheet_lists_available() {
        let dir = TempDir::new().unwrap();
        two_sheet_workbook(&dir);
        let reader = reader_in(&dir);

        let err = reader.read("wb", Some("null")).unwrap_err();
        assert!(err.is_not_found());
        let message = err.to_string();
        assert!(message.contains("'null'"));
        assert!(message.contains("Patients, Visits"));
    }

    #[test]
    fn test_corrupt_workbook_is_parse_failure() {
        let dir = TempDir::new().unwrap();
        let reader = reader_in(&dir);
        reader.store().store("bad", b"this is not a zip", "broken.xlsx").unwrap();

        let err = reader.read("bad", None).unwrap_err();
        assert_eq!(err.kind(), "parse_failure");
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = TempDir::new().unwrap();
        let reader = reader_in(&dir);
        reader.store().store("img", b"\x89PNG", "picture.bmp").unwrap();

        let err = reader.read("img", None).unwrap_err();
        assert_eq!(err.kind(), "parse_failure");
        assert!(err.to_string().contains("unsupported format"));
    }

    #[test]
    fn test_missing_dataset() {
        let dir = TempDir::new().unwrap();
        let reader = reader_in(&dir);
        assert!(reader.read("ghost", None).unwrap_err().is_not_found());
    }
}
