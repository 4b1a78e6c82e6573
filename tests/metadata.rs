use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;

use kira_readsets::config::TableSettings;
use kira_readsets::domain::BioSampleId;
use kira_readsets::error::KiraError;
use kira_readsets::metadata::{
    MetadataCollector, MetadataSession, MetadataSessionFactory, MetadataTable, SampleAttributes,
    SampleLookup,
};
use kira_readsets::runinfo::RunInfoTable;

#[derive(Clone)]
enum Page {
    Found(Vec<(&'static str, &'static str)>),
    Missing,
    Broken,
    Panics,
}

#[derive(Default)]
struct MockFactory {
    pages: Arc<BTreeMap<String, Page>>,
    opened: AtomicUsize,
    failing_opens: usize,
    log: Arc<Mutex<Vec<(usize, String)>>>,
}

impl MockFactory {
    fn with_pages(pages: &[(&str, Page)]) -> Self {
        Self {
            pages: Arc::new(
                pages
                    .iter()
                    .map(|(id, page)| (id.to_string(), page.clone()))
                    .collect(),
            ),
            ..Self::default()
        }
    }
}

struct MockSession {
    id: usize,
    pages: Arc<BTreeMap<String, Page>>,
    log: Arc<Mutex<Vec<(usize, String)>>>,
}

impl MetadataSessionFactory for MockFactory {
    type Session = MockSession;

    fn open(&self) -> Result<MockSession, KiraError> {
        let id = self.opened.fetch_add(1, Ordering::SeqCst);
        if id < self.failing_opens {
            return Err(KiraError::MetadataSession("browser crashed".to_string()));
        }
        Ok(MockSession {
            id,
            pages: self.pages.clone(),
            log: self.log.clone(),
        })
    }
}

impl MetadataSession for MockSession {
    fn fetch_sample_attributes(&mut self, id: &BioSampleId) -> Result<SampleLookup, KiraError> {
        self.log
            .lock()
            .unwrap()
            .push((self.id, id.as_str().to_string()));
        match self.pages.get(id.as_str()) {
            Some(Page::Found(rows)) => Ok(SampleLookup::Found(SampleAttributes {
                structured: rows
                    .iter()
                    .map(|(key, value)| (key.to_string(), value.to_string()))
                    .collect(),
                supplementary: Vec::new(),
            })),
            Some(Page::Missing) | None => Ok(SampleLookup::NotFound),
            Some(Page::Broken) => Err(KiraError::MetadataHttp("connection reset".to_string())),
            Some(Page::Panics) => panic!("parser bug on {id}"),
        }
    }
}

fn table(dir: &Path, biosamples: &[&str]) -> RunInfoTable {
    let mut text = String::from("Run,BioSample,Download_path\n");
    for (index, biosample) in biosamples.iter().enumerate() {
        text.push_str(&format!("CRR{index},{biosample},ftp://h/{index}.fq.gz\n"));
    }
    RunInfoTable::from_text(
        &dir.join("RunInfo.csv"),
        &text,
        TableSettings {
            truncate_columns: 3,
            scientific_name_column: 2,
        },
    )
    .unwrap()
}

#[test]
fn merged_table_holds_every_observed_key() {
    let temp = tempfile::tempdir().unwrap();
    let factory = MockFactory::with_pages(&[
        ("SAMC1", Page::Found(vec![("strain", "K-12"), ("host", "Homo sapiens")])),
        ("SAMC2", Page::Found(vec![("collection date", "2021-03"), ("Attributes", "blob")])),
        ("SAMC3", Page::Found(vec![("strain", "O157")])),
    ]);
    let records = MetadataCollector::new(&factory, 2)
        .collect(&table(temp.path(), &["SAMC3", "SAMC1", "SAMC2", "SAMC1"]))
        .unwrap();
    assert_eq!(
        records.iter().map(|record| record.biosample()).collect::<Vec<_>>(),
        vec!["SAMC1", "SAMC2", "SAMC3"]
    );

    let merged = MetadataTable::from_records(&records);
    assert_eq!(
        merged.columns(),
        ["BioSample", "collection_date", "host", "strain"]
    );
    for (record, row) in records.iter().zip(merged.rows()) {
        for (column, cell) in merged.columns().iter().zip(row) {
            assert_eq!(record.get(column).unwrap_or(""), cell.as_str());
        }
    }
    assert_eq!(merged.rows()[1], ["SAMC2", "2021-03", "", ""]);
}

#[test]
fn missing_and_failing_samples_are_omitted() {
    let temp = tempfile::tempdir().unwrap();
    let factory = MockFactory::with_pages(&[
        ("SAMC1", Page::Found(vec![("strain", "K-12")])),
        ("SAMC2", Page::Missing),
        ("SAMC3", Page::Broken),
    ]);
    let records = MetadataCollector::new(&factory, 3)
        .collect(&table(temp.path(), &["SAMC1", "SAMC2", "SAMC3"]))
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].biosample(), "SAMC1");
}

#[test]
fn panicking_session_skips_only_that_sample() {
    let temp = tempfile::tempdir().unwrap();
    let factory = MockFactory::with_pages(&[
        ("SAMC1", Page::Panics),
        ("SAMC2", Page::Found(vec![("strain", "K-12")])),
    ]);
    let records = MetadataCollector::new(&factory, 1)
        .collect(&table(temp.path(), &["SAMC1", "SAMC2"]))
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].biosample(), "SAMC2");
    assert_eq!(factory.log.lock().unwrap().len(), 2);
}

#[test]
fn each_worker_gets_its_own_session() {
    let temp = tempfile::tempdir().unwrap();
    let ids = (0..20).map(|i| format!("SAMC{i:02}")).collect::<Vec<_>>();
    let pages = ids
        .iter()
        .map(|id| (id.as_str(), Page::Found(vec![("strain", "x")])))
        .collect::<Vec<_>>();
    let factory = MockFactory::with_pages(&pages);
    let refs = ids.iter().map(String::as_str).collect::<Vec<_>>();

    let records = MetadataCollector::new(&factory, 4)
        .collect(&table(temp.path(), &refs))
        .unwrap();
    assert_eq!(records.len(), 20);
    assert_eq!(factory.opened.load(Ordering::SeqCst), 4);

    let log = factory.log.lock().unwrap();
    let fetched = log.iter().map(|(_, id)| id.clone()).collect::<BTreeSet<_>>();
    assert_eq!(log.len(), 20);
    assert_eq!(fetched.len(), 20);
    assert!(log.iter().all(|(session, _)| *session < 4));
}

#[test]
fn sessions_never_exceed_sample_count() {
    let temp = tempfile::tempdir().unwrap();
    let factory = MockFactory::with_pages(&[("SAMC1", Page::Found(vec![("strain", "x")]))]);
    MetadataCollector::new(&factory, 8)
        .collect(&table(temp.path(), &["SAMC1"]))
        .unwrap();
    assert_eq!(factory.opened.load(Ordering::SeqCst), 1);
}

#[test]
fn partial_session_failures_are_tolerated() {
    let temp = tempfile::tempdir().unwrap();
    let factory = MockFactory {
        failing_opens: 2,
        ..MockFactory::with_pages(&[
            ("SAMC1", Page::Found(vec![("strain", "a")])),
            ("SAMC2", Page::Found(vec![("strain", "b")])),
            ("SAMC3", Page::Found(vec![("strain", "c")])),
        ])
    };
    let records = MetadataCollector::new(&factory, 3)
        .collect(&table(temp.path(), &["SAMC1", "SAMC2", "SAMC3"]))
        .unwrap();
    assert_eq!(records.len(), 3);
    let log = factory.log.lock().unwrap();
    assert!(log.iter().all(|(session, _)| *session == 2));
}

#[test]
fn no_sessions_fails_the_phase() {
    let temp = tempfile::tempdir().unwrap();
    let factory = MockFactory {
        failing_opens: usize::MAX,
        ..MockFactory::default()
    };
    let result = MetadataCollector::new(&factory, 2).collect(&table(temp.path(), &["SAMC1"]));
    assert_matches!(result, Err(KiraError::MetadataSession(_)));
}

#[test]
fn zero_concurrency_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let factory = MockFactory::default();
    let result = MetadataCollector::new(&factory, 0).collect(&table(temp.path(), &["SAMC1"]));
    assert_matches!(result, Err(KiraError::InvalidConcurrency(0)));
}

#[test]
fn tsv_has_biosample_first_and_no_attributes_column() {
    let temp = tempfile::tempdir().unwrap();
    let factory = MockFactory::with_pages(&[
        ("SAMC1", Page::Found(vec![("strain", "K-12"), ("Attributes", "nested")])),
        ("SAMC2", Page::Found(vec![("geo loc name", "China: Beijing")])),
    ]);
    let records = MetadataCollector::new(&factory, 2)
        .collect(&table(temp.path(), &["SAMC1", "SAMC2"]))
        .unwrap();
    let output = temp.path().join("E_coli_biosample_metadata.tsv");
    MetadataTable::from_records(&records).write_tsv(&output).unwrap();

    let content = fs::read_to_string(&output).unwrap();
    let lines = content.lines().collect::<Vec<_>>();
    assert_eq!(lines[0], "BioSample\tgeo_loc_name\tstrain");
    assert_eq!(lines[1], "SAMC1\t\tK-12");
    assert_eq!(lines[2], "SAMC2\tChina: Beijing\t");
}
