//! The sample table: one row per `(project_id, sample_id)`.
//!
//! The table is read once at plan construction and treated as immutable for
//! the duration of a run. Merged rows are carried here but skipped by the
//! plan builder; their artifacts come from upstream merging logic.

use anyhow::{bail, ensure, Context, Result};
use itertools::Itertools;
use serde::{Deserialize, Deserializer, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

const REQUIRED_HEADERS: [&str; 3] = ["project_id", "sample_id", "species"];

fn parse_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(false),
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(serde::de::Error::custom(format!(
                "expected a boolean, got '{value}'"
            ))),
        },
    }
}

fn parse_optional<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty()))
}

/// One sample row. `map_strategy` overrides the run-wide default strategy
/// when present.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SampleRow {
    pub project_id: String,
    pub sample_id: String,
    pub species: String,
    #[serde(default, deserialize_with = "parse_optional")]
    pub map_strategy: Option<String>,
    #[serde(default, deserialize_with = "parse_flag")]
    pub is_merged: bool,
}

/// All sample rows of a run, in table order.
#[derive(Clone, Debug, Default)]
pub struct SampleTable {
    rows: Vec<SampleRow>,
}

impl SampleTable {
    /// Build a table from rows, rejecting duplicate `(project_id,
    /// sample_id)` pairs.
    pub fn from_rows(rows: Vec<SampleRow>) -> Result<SampleTable> {
        let duplicates = rows
            .iter()
            .map(|row| (&row.project_id, &row.sample_id))
            .duplicates()
            .map(|(project_id, sample_id)| format!("{project_id}/{sample_id}"))
            .join(", ");
        ensure!(
            duplicates.is_empty(),
            "duplicate sample table entries: {duplicates}"
        );
        Ok(SampleTable { rows })
    }

    /// Read the sample table from its CSV form.
    pub fn from_csv(path: &Path) -> Result<SampleTable> {
        let file = File::open(path).with_context(|| path.display().to_string())?;
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(BufReader::new(file));

        let headers = rdr.headers()?.clone();
        for required in REQUIRED_HEADERS {
            if !headers.iter().any(|header| header == required) {
                bail!(
                    "The sample table '{}' must contain a column named '{required}', \
                     but it was not found.",
                    path.display()
                );
            }
        }

        let mut rows = Vec::new();
        for (line, record) in rdr.deserialize::<SampleRow>().enumerate() {
            // line 1 is the header
            rows.push(record.with_context(|| {
                format!("sample table '{}', line {}", path.display(), line + 2)
            })?);
        }
        SampleTable::from_rows(rows)
    }

    pub fn rows(&self) -> &[SampleRow] {
        &self.rows
    }

    pub fn get(&self, project_id: &str, sample_id: &str) -> Option<&SampleRow> {
        self.rows
            .iter()
            .find(|row| row.project_id == project_id && row.sample_id == sample_id)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_from_csv() {
        let file = write_csv(
            "project_id,sample_id,species,map_strategy,is_merged\n\
             visium_01,section_a,mouse,bowtie2:rRNA->STAR:genome:final,False\n\
             visium_01,section_b,mouse,,True\n\
             visium_01,section_c,human, STAR:genome ,\n",
        );
        let table = SampleTable::from_csv(file.path()).unwrap();
        assert_eq!(table.len(), 3);

        let row = table.get("visium_01", "section_a").unwrap();
        assert_eq!(
            row.map_strategy.as_deref(),
            Some("bowtie2:rRNA->STAR:genome:final")
        );
        assert!(!row.is_merged);

        let row = table.get("visium_01", "section_b").unwrap();
        assert_eq!(row.map_strategy, None);
        assert!(row.is_merged);

        // whitespace-trimmed strategy, empty merged flag
        let row = table.get("visium_01", "section_c").unwrap();
        assert_eq!(row.map_strategy.as_deref(), Some("STAR:genome"));
        assert!(!row.is_merged);
    }

    #[test]
    fn test_missing_required_header() {
        let file = write_csv("project_id,sample_id\nvisium_01,section_a\n");
        let err = SampleTable::from_csv(file.path()).unwrap_err();
        assert!(err.to_string().contains("species"), "{err:#}");
    }

    #[test]
    fn test_bad_merged_flag() {
        let file = write_csv(
            "project_id,sample_id,species,is_merged\nvisium_01,section_a,mouse,maybe\n",
        );
        assert!(SampleTable::from_csv(file.path()).is_err());
    }

    #[test]
    fn test_duplicate_sample() {
        let row = SampleRow {
            project_id: "visium_01".to_string(),
            sample_id: "section_a".to_string(),
            species: "mouse".to_string(),
            map_strategy: None,
            is_merged: false,
        };
        let err = SampleTable::from_rows(vec![row.clone(), row]).unwrap_err();
        assert!(
            err.to_string().contains("visium_01/section_a"),
            "{err:#}"
        );
    }
}
