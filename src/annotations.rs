//! Column and floor annotation tables.
//!
//! Both files are plain text made of fixed-size records. A column record is
//! three lines (file name, comma-separated column fractions, a "ground" line
//! that is kept verbatim but never interpreted); a floor record is two lines
//! (file name, comma-separated floor fractions). The first blank file-name
//! line, or the end of the stream, ends the table.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use crate::error::{Error, Result};

/// What to do with a record whose numeric line is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyRecordPolicy {
    /// Log and omit the record.
    #[default]
    Skip,
    /// Fail the whole load.
    Reject,
}

/// One column record.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRecord {
    /// Column fractions of the image width, in file order.
    pub positions: Vec<f64>,
    /// Third line of the record, untouched.
    pub ground: Option<String>,
}

/// Parser for the two annotation formats.
#[derive(Debug, Clone, Default)]
pub struct AnnotationStore {
    empty_records: EmptyRecordPolicy,
}

impl AnnotationStore {
    /// Parser that skips empty records.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how records with an empty value line are handled.
    pub fn with_empty_records(mut self, policy: EmptyRecordPolicy) -> Self {
        self.empty_records = policy;
        self
    }

    /// Read the column table at `path`.
    pub fn load_columns(&self, path: &Path) -> Result<HashMap<String, ColumnRecord>> {
        let file = File::open(path)?;
        self.parse_columns(BufReader::new(file), &path.display().to_string())
    }

    /// Read the floor table at `path`.
    pub fn load_floors(&self, path: &Path) -> Result<HashMap<String, Vec<f64>>> {
        let file = File::open(path)?;
        self.parse_floors(BufReader::new(file), &path.display().to_string())
    }

    /// Parse a column table. `source` only names the input in errors.
    pub fn parse_columns<R: BufRead>(
        &self,
        reader: R,
        source: &str,
    ) -> Result<HashMap<String, ColumnRecord>> {
        let mut lines = RecordLines::new(reader);
        let mut table = HashMap::new();

        while let Some(name) = lines.file_name()? {
            let (line_no, values) = lines.next_line()?;
            let (_, ground) = lines.next_line()?;

            let Some(positions) = self.parse_values(&values, source, line_no, &name)? else {
                continue;
            };
            table.insert(
                name,
                ColumnRecord {
                    positions,
                    ground: (!ground.is_empty()).then_some(ground),
                },
            );
        }

        log::debug!("{}: {} column records", source, table.len());
        Ok(table)
    }

    /// Parse a floor table. `source` only names the input in errors.
    pub fn parse_floors<R: BufRead>(
        &self,
        reader: R,
        source: &str,
    ) -> Result<HashMap<String, Vec<f64>>> {
        let mut lines = RecordLines::new(reader);
        let mut table = HashMap::new();

        while let Some(name) = lines.file_name()? {
            let (line_no, values) = lines.next_line()?;
            if let Some(floors) = self.parse_values(&values, source, line_no, &name)? {
                table.insert(name, floors);
            }
        }

        log::debug!("{}: {} floor records", source, table.len());
        Ok(table)
    }

    fn parse_values(
        &self,
        line: &str,
        source: &str,
        line_no: usize,
        name: &str,
    ) -> Result<Option<Vec<f64>>> {
        if line.is_empty() {
            return match self.empty_records {
                EmptyRecordPolicy::Skip => {
                    log::warn!("{}:{}: skipping empty record for '{}'", source, line_no, name);
                    Ok(None)
                }
                EmptyRecordPolicy::Reject => Err(Error::EmptyRecord {
                    path: source.to_string(),
                    line: line_no,
                    file: name.to_string(),
                }),
            };
        }

        line.split(',')
            .map(|field| {
                let field = field.trim();
                field
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| Error::Parse {
                        path: source.to_string(),
                        line: line_no,
                        field: field.to_string(),
                    })
            })
            .collect::<Result<Vec<f64>>>()
            .map(Some)
    }
}

/// Trimmed line reader that treats end of stream as an empty line.
struct RecordLines<R> {
    lines: Lines<R>,
    line_no: usize,
}

impl<R: BufRead> RecordLines<R> {
    fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
        }
    }

    fn next_line(&mut self) -> Result<(usize, String)> {
        self.line_no += 1;
        let line = match self.lines.next() {
            Some(line) => line?.trim().to_string(),
            None => String::new(),
        };
        Ok((self.line_no, line))
    }

    fn file_name(&mut self) -> Result<Option<String>> {
        let (_, name) = self.next_line()?;
        Ok((!name.is_empty()).then_some(name))
    }
}

/// Both annotation tables, looked up by image file name.
#[derive(Debug, Clone, Default)]
pub struct Annotations {
    columns: HashMap<String, ColumnRecord>,
    floors: HashMap<String, Vec<f64>>,
}

impl Annotations {
    /// Bundle two already parsed tables.
    pub fn new(columns: HashMap<String, ColumnRecord>, floors: HashMap<String, Vec<f64>>) -> Self {
        Self { columns, floors }
    }

    /// Load both tables from disk with `store`.
    pub fn load(store: &AnnotationStore, columns: &Path, floors: &Path) -> Result<Self> {
        Ok(Self::new(store.load_columns(columns)?, store.load_floors(floors)?))
    }

    /// Insert one image's annotation, replacing any existing entry.
    pub fn insert(&mut self, file: impl Into<String>, columns: Vec<f64>, floors: Vec<f64>) {
        let file = file.into();
        self.columns.insert(
            file.clone(),
            ColumnRecord {
                positions: columns,
                ground: None,
            },
        );
        self.floors.insert(file, floors);
    }

    /// Column fractions for `file`, in file order.
    pub fn columns(&self, file: &str) -> Result<&[f64]> {
        self.columns
            .get(file)
            .map(|record| record.positions.as_slice())
            .ok_or_else(|| Error::MissingAnnotation {
                file: file.to_string(),
                table: "column",
            })
    }

    /// Full column record for `file`, ground line included.
    pub fn column_record(&self, file: &str) -> Option<&ColumnRecord> {
        self.columns.get(file)
    }

    /// Floor fractions for `file`, checked to hold a roof and a shop value.
    pub fn floors(&self, file: &str) -> Result<&[f64]> {
        let floors = self.floors.get(file).ok_or_else(|| Error::MissingAnnotation {
            file: file.to_string(),
            table: "floor",
        })?;
        if floors.len() < 2 {
            return Err(Error::InvalidAnnotation {
                file: file.to_string(),
                reason: format!("need at least 2 floor values, got {}", floors.len()),
            });
        }
        Ok(floors)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}
