use std::fs;
use std::path::Path;

use assert_matches::assert_matches;

use kira_readsets::domain::ManifestStatus;
use kira_readsets::error::KiraError;
use kira_readsets::manifest::{
    MANIFEST_HEADER, build_manifest, run_manifest, scan, write_species_manifest,
};

fn touch(path: &Path) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, b"@r\nACGT\n+\nIIII\n").unwrap();
}

#[test]
fn scan_stops_at_the_requested_depth() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path();
    fs::create_dir_all(root.join("E_coli").join("SAMC1")).unwrap();
    fs::create_dir_all(root.join("E_coli").join("SAMC2")).unwrap();
    fs::create_dir_all(root.join("K_pneumoniae").join("SAMC3")).unwrap();
    fs::write(root.join("E_coli").join("E_coli_RunInfo.csv"), "Run\n").unwrap();

    let species = scan(root, 1).unwrap();
    assert_eq!(species, vec![root.join("E_coli"), root.join("K_pneumoniae")]);

    let samples = scan(root, 2).unwrap();
    assert_eq!(
        samples,
        vec![
            root.join("E_coli").join("SAMC1"),
            root.join("E_coli").join("SAMC2"),
            root.join("K_pneumoniae").join("SAMC3"),
        ]
    );
    assert!(scan(root, 3).unwrap().is_empty());
}

#[test]
fn orphan_mate_with_long_reads_is_long_only() {
    let temp = tempfile::tempdir().unwrap();
    let sample = temp.path().join("SAMN2");
    touch(&sample.join("sample_R1.fastq.gz"));
    touch(&sample.join("nanopore.fastq.gz"));
    touch(&sample.join("notes.txt"));

    let records = build_manifest(temp.path(), 1).unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.fastq_count, 2);
    assert_eq!(record.status, ManifestStatus::LongOnly);
    assert_eq!(
        record.short_read_1,
        sample.join("sample_R1.fastq.gz").display().to_string()
    );
    assert_eq!(record.short_read_2, "");
    assert_eq!(
        record.long_read_primary,
        sample.join("nanopore.fastq.gz").display().to_string()
    );
}

#[test]
fn orphan_mate_alone_is_unknown() {
    let temp = tempfile::tempdir().unwrap();
    touch(&temp.path().join("SAMN3").join("sample_R1.fastq.gz"));

    let records = build_manifest(temp.path(), 1).unwrap();
    assert_eq!(records[0].status, ManifestStatus::Unknown);
    assert_eq!(records[0].long_read_primary, "");
}

#[test]
fn standalone_manifest_writes_tsv() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().join("reads");
    let paired = root.join("E_coli").join("SAMC1");
    let empty = root.join("E_coli").join("SAMC2");
    touch(&paired.join("CRR1_f1.fq.gz"));
    touch(&paired.join("CRR1_r2.fq.gz"));
    fs::create_dir_all(&empty).unwrap();
    let output = temp.path().join("manifest.tsv");

    let result = run_manifest(&root, &output, 2).unwrap();
    assert_eq!(result.records.len(), 2);
    assert_eq!(result.depth, 2);

    let content = fs::read_to_string(&output).unwrap();
    let lines = content.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], MANIFEST_HEADER.join("\t"));
    assert_eq!(
        lines[0],
        "biosample_path\tfastq_count\tstatus\tshort_read_1\tshort_read_2\tlong_read_primary\tlong_read_extra"
    );
    let first = lines[1].split('\t').collect::<Vec<_>>();
    assert_eq!(first[0], paired.display().to_string());
    assert_eq!(first[1], "2");
    assert_eq!(first[2], "short_only");
    assert_eq!(first[3], paired.join("CRR1_f1.fq.gz").display().to_string());
    assert_eq!(first[4], paired.join("CRR1_r2.fq.gz").display().to_string());
    assert_eq!(first[5], "");
    let second = lines[2].split('\t').collect::<Vec<_>>();
    assert_eq!(second[1], "0");
    assert_eq!(second[2], "unknown");
}

#[test]
fn standalone_manifest_rejects_missing_input() {
    let temp = tempfile::tempdir().unwrap();
    let result = run_manifest(
        &temp.path().join("absent"),
        &temp.path().join("manifest.tsv"),
        2,
    );
    assert_matches!(result, Err(KiraError::Filesystem(_)));
}

#[test]
fn standalone_manifest_needs_sample_directories() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().join("reads");
    fs::create_dir_all(root.join("E_coli")).unwrap();
    let output = temp.path().join("manifest.tsv");

    let result = run_manifest(&root, &output, 2);
    assert_matches!(result, Err(KiraError::NoSampleDirectories { depth: 2, .. }));
    assert!(!output.exists());
}

#[test]
fn species_manifest_without_samples_writes_nothing() {
    let temp = tempfile::tempdir().unwrap();
    let species = temp.path().join("E_coli");
    fs::create_dir_all(&species).unwrap();
    fs::write(species.join("E_coli_RunInfo.csv"), "Run\n").unwrap();
    let output = species.join("E_coli_read_manifest.tsv");

    let records = write_species_manifest(&species, &output).unwrap();
    assert!(records.is_empty());
    assert!(!output.exists());
}
