use std::collections::BTreeSet;
use std::path::Path;

use tracing::{error, info, warn};

use crate::domain::BioSampleId;
use crate::error::KiraError;
use crate::pool::{catch_panic, run_bounded};
use crate::runinfo::RunInfoTable;
use crate::store::write_bytes_atomic;

pub const BIOSAMPLE_KEY: &str = "BioSample";
/// Nested attribute blob the BioSample page repeats as a single cell.
pub const DROPPED_COLUMN: &str = "Attributes";

/// Attribute rows scraped for one sample, in page order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleAttributes {
    /// Rows of the structured attribute table.
    pub structured: Vec<(String, String)>,
    /// Key/value rows elsewhere on the page (release date, submitter, ...).
    pub supplementary: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleLookup {
    Found(SampleAttributes),
    NotFound,
}

/// One stateful connection to the metadata service. Sessions are owned by a
/// single worker at a time, hence `&mut self`.
pub trait MetadataSession {
    fn fetch_sample_attributes(&mut self, id: &BioSampleId) -> Result<SampleLookup, KiraError>;
}

/// Opens independent sessions, one per concurrent worker.
pub trait MetadataSessionFactory: Sync {
    type Session: MetadataSession + Send;

    fn open(&self) -> Result<Self::Session, KiraError>;
}

/// Attribute map for one BioSample; `BioSample` is always the first field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleMetadataRecord {
    fields: Vec<(String, String)>,
}

impl SampleMetadataRecord {
    pub fn new(id: &BioSampleId) -> Self {
        Self {
            fields: vec![(BIOSAMPLE_KEY.to_string(), id.as_str().to_string())],
        }
    }

    /// Structured attributes first, supplementary rows second. Later rows win
    /// for repeated keys, except that `BioSample` is never overwritten and
    /// empty values never enter the record.
    pub fn from_attributes(id: &BioSampleId, attributes: SampleAttributes) -> Self {
        let mut record = Self::new(id);
        for (key, value) in attributes
            .structured
            .into_iter()
            .chain(attributes.supplementary)
        {
            record.set(&key, &value);
        }
        record
    }

    pub fn biosample(&self) -> &str {
        &self.fields[0].1
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(key, _)| key.as_str())
    }

    fn set(&mut self, key: &str, value: &str) {
        let key = normalize_key(key);
        let value = value.trim();
        if key.is_empty() || value.is_empty() || key == BIOSAMPLE_KEY {
            return;
        }
        match self.fields.iter_mut().find(|(name, _)| *name == key) {
            Some((_, existing)) => *existing = value.to_string(),
            None => self.fields.push((key, value.to_string())),
        }
    }
}

/// Collapses whitespace runs in an attribute name to `_`.
pub fn normalize_key(key: &str) -> String {
    key.split_whitespace().collect::<Vec<_>>().join("_")
}

pub struct MetadataCollector<'a, F: MetadataSessionFactory> {
    factory: &'a F,
    concurrency: usize,
}

impl<'a, F: MetadataSessionFactory> MetadataCollector<'a, F> {
    pub fn new(factory: &'a F, concurrency: usize) -> Self {
        Self {
            factory,
            concurrency,
        }
    }

    /// Fetches every distinct BioSample of `table`. Samples that are missing
    /// or fail to fetch are logged and left out; the result is sorted by id.
    pub fn collect(&self, table: &RunInfoTable) -> Result<Vec<SampleMetadataRecord>, KiraError> {
        if self.concurrency == 0 {
            return Err(KiraError::InvalidConcurrency(self.concurrency));
        }
        let ids = table.biosample_ids()?;
        if ids.is_empty() {
            info!("no BioSample ids in RunInfo; skipping metadata");
            return Ok(Vec::new());
        }

        let sessions = self.open_sessions(self.concurrency.min(ids.len()))?;
        info!(
            samples = ids.len(),
            workers = sessions.len(),
            "collecting BioSample metadata"
        );

        let outcomes = run_bounded(ids, sessions, |session: &mut F::Session, id| {
            let outcome = catch_panic(|| session.fetch_sample_attributes(&id));
            (id, outcome)
        });

        let mut records = Vec::new();
        for (id, outcome) in outcomes {
            match outcome {
                Ok(SampleLookup::Found(attributes)) => {
                    records.push(SampleMetadataRecord::from_attributes(&id, attributes));
                }
                Ok(SampleLookup::NotFound) => {
                    warn!(biosample = %id, "BioSample page not found");
                }
                Err(err) => {
                    error!(biosample = %id, error = %err, "BioSample metadata fetch failed");
                }
            }
        }
        records.sort_by(|left, right| left.biosample().cmp(right.biosample()));

        if records.is_empty() {
            info!("no BioSample metadata retrieved");
        }
        Ok(records)
    }

    fn open_sessions(&self, count: usize) -> Result<Vec<F::Session>, KiraError> {
        let mut sessions = Vec::with_capacity(count);
        let mut last_error = None;
        for _ in 0..count {
            match self.factory.open() {
                Ok(session) => sessions.push(session),
                Err(err) => {
                    warn!(error = %err, "metadata session failed to open");
                    last_error = Some(err);
                }
            }
        }
        if sessions.is_empty() {
            return Err(last_error.unwrap_or_else(|| {
                KiraError::MetadataSession("no sessions available".to_string())
            }));
        }
        Ok(sessions)
    }
}

/// Column-unioned view of a set of records, ready to be written as TSV.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl MetadataTable {
    pub fn from_records(records: &[SampleMetadataRecord]) -> Self {
        let mut keys = BTreeSet::new();
        for record in records {
            keys.extend(
                record
                    .keys()
                    .filter(|key| *key != BIOSAMPLE_KEY && *key != DROPPED_COLUMN),
            );
        }
        let columns = std::iter::once(BIOSAMPLE_KEY)
            .chain(keys)
            .map(|key| key.to_string())
            .collect::<Vec<_>>();

        let mut ordered = records.iter().collect::<Vec<_>>();
        ordered.sort_by(|left, right| left.biosample().cmp(right.biosample()));
        let rows = ordered
            .into_iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|column| record.get(column).unwrap_or_default().to_string())
                    .collect()
            })
            .collect();

        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn to_tsv(&self) -> Result<Vec<u8>, KiraError> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(Vec::new());
        writer
            .write_record(&self.columns)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        for row in &self.rows {
            writer
                .write_record(row)
                .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        }
        writer
            .into_inner()
            .map_err(|err| KiraError::Filesystem(err.to_string()))
    }

    pub fn write_tsv(&self, path: &Path) -> Result<(), KiraError> {
        write_bytes_atomic(path, &self.to_tsv()?)?;
        info!(path = %path.display(), rows = self.rows.len(), "BioSample metadata written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn biosample_is_first_and_never_overwritten() {
        let id: BioSampleId = "SAMC1".parse().unwrap();
        let record = SampleMetadataRecord::from_attributes(
            &id,
            SampleAttributes {
                structured: pairs(&[("Organism", "E. coli"), ("BioSample", "bogus")]),
                supplementary: pairs(&[("BioSample", "other"), ("Release  date", "2024-01-01")]),
            },
        );
        assert_eq!(record.biosample(), "SAMC1");
        assert_eq!(
            record.keys().collect::<Vec<_>>(),
            vec!["BioSample", "Organism", "Release_date"]
        );
    }

    #[test]
    fn empty_values_are_dropped() {
        let id: BioSampleId = "SAMC1".parse().unwrap();
        let record = SampleMetadataRecord::from_attributes(
            &id,
            SampleAttributes {
                structured: pairs(&[("strain", "  "), ("host", "Homo sapiens"), ("", "x")]),
                supplementary: Vec::new(),
            },
        );
        assert_eq!(record.get("strain"), None);
        assert_eq!(record.get("host"), Some("Homo sapiens"));
        assert_eq!(record.fields().len(), 2);
    }

    #[test]
    fn later_source_wins_for_ordinary_keys() {
        let id: BioSampleId = "SAMC1".parse().unwrap();
        let record = SampleMetadataRecord::from_attributes(
            &id,
            SampleAttributes {
                structured: pairs(&[("Title", "first")]),
                supplementary: pairs(&[("Title", "second")]),
            },
        );
        assert_eq!(record.get("Title"), Some("second"));
    }

    #[test]
    fn normalize_key_collapses_whitespace() {
        assert_eq!(normalize_key("  collection \t date\n"), "collection_date");
    }
}
