use assert_matches::assert_matches;

use kira_readsets::domain::{BioSampleId, GenomeName, ManifestStatus, TransportKind, UrlScheme};
use kira_readsets::error::KiraError;

#[test]
fn genome_name_keeps_case_and_collapses_spaces() {
    let name: GenomeName = "Staphylococcus\taureus  subsp. aureus".parse().unwrap();
    assert_eq!(name.as_str(), "Staphylococcus aureus subsp. aureus");
    assert_eq!(name.fs_name(), "Staphylococcus_aureus_subsp._aureus");
    assert_eq!(name.to_string(), name.as_str());
}

#[test]
fn genome_name_rejects_dot_segments() {
    assert_matches!("..".parse::<GenomeName>(), Err(KiraError::InvalidGenomeName(_)));
    assert_matches!("a\\b".parse::<GenomeName>(), Err(KiraError::InvalidGenomeName(_)));
}

#[test]
fn biosample_ids_are_ordered_lexically() {
    let mut ids = ["SAMN2", "SAMC10", "SAMC9"]
        .iter()
        .map(|id| id.parse::<BioSampleId>().unwrap())
        .collect::<Vec<_>>();
    ids.sort();
    assert_eq!(
        ids.iter().map(BioSampleId::as_str).collect::<Vec<_>>(),
        vec!["SAMC10", "SAMC9", "SAMN2"]
    );
}

#[test]
fn unknown_scheme_is_rejected() {
    assert_matches!("s3".parse::<UrlScheme>(), Err(KiraError::InvalidScheme(_)));
    assert_eq!(" FTP ".parse::<UrlScheme>().unwrap(), UrlScheme::Ftp);
    assert_eq!(UrlScheme::Https.to_string(), "https");
}

#[test]
fn enums_use_lowercase_json() {
    assert_eq!(
        serde_json::to_string(&ManifestStatus::ShortOnly).unwrap(),
        "\"short_only\""
    );
    assert_eq!(
        serde_json::from_str::<TransportKind>("\"wget\"").unwrap(),
        TransportKind::Wget
    );
    assert_eq!(
        serde_json::from_str::<Vec<UrlScheme>>(r#"["ftp","http"]"#).unwrap(),
        vec![UrlScheme::Ftp, UrlScheme::Http]
    );
}
