use std::sync::LazyLock;

use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::config::MetadataSettings;
use crate::domain::{BioSampleId, GenomeName};
use crate::error::KiraError;
use crate::metadata::{
    MetadataSession, MetadataSessionFactory, SampleAttributes, SampleLookup, normalize_key,
};

pub const GSA_SEARCH_URL: &str = "https://ngdc.cncb.ac.cn/gsa/search";

static ATTRIBUTE_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<table[^>]*\bid\s*=\s*["']attribute_table["'][^>]*>(.*?)</table>"#)
        .expect("valid attribute table pattern")
});
static DETAIL_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<table[^>]*\bclass\s*=\s*["'][^"']*\btable2-border\b[^"']*["'][^>]*>(.*?)</table>"#)
        .expect("valid detail table pattern")
});
static ROW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<tr\b[^>]*>(.*?)</tr>").expect("valid row pattern"));
static HEADER_CELL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<th\b[^>]*>(.*?)</th>").expect("valid th pattern"));
static DATA_CELL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<td\b[^>]*>(.*?)</td>").expect("valid td pattern"));
static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag pattern"));
static NUMERIC_ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&#(x[0-9a-fA-F]+|[0-9]+);").expect("valid entity pattern"));

/// GSA search for WGS genomic FASTQ runs submitted through NGDC, excluding PCR.
pub fn gsa_search_url(genome: &GenomeName) -> String {
    format!(
        "{GSA_SEARCH_URL}?searchTerm=\
         %28%28%28%22NGDC%22%5Bcenter%5D%29+AND+\
         %22fastq%22%5BfileType%5D+AND+\
         %22WGS%22%5Bstrategy%5D%29+AND+\
         %22GENOMIC%22%5Bsource%5D%29+AND+\
         %22{}%22+NOT+%22PCR%22",
        genome.url_term()
    )
}

pub struct NgdcSessionFactory {
    settings: MetadataSettings,
}

impl NgdcSessionFactory {
    pub fn new(settings: MetadataSettings) -> Self {
        Self { settings }
    }
}

impl MetadataSessionFactory for NgdcSessionFactory {
    type Session = NgdcSession;

    fn open(&self) -> Result<Self::Session, KiraError> {
        NgdcSession::connect(&self.settings)
    }
}

/// Blocking HTTP session against the BioSample browse pages.
pub struct NgdcSession {
    client: Client,
    base_url: String,
}

impl NgdcSession {
    pub fn connect(settings: &MetadataSettings) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-readsets/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::MetadataSession(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .build()
            .map_err(|err| KiraError::MetadataSession(err.to_string()))?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn page_url(&self, id: &BioSampleId) -> String {
        format!("{}/{}", self.base_url, id.as_str())
    }
}

impl MetadataSession for NgdcSession {
    fn fetch_sample_attributes(&mut self, id: &BioSampleId) -> Result<SampleLookup, KiraError> {
        let url = self.page_url(id);
        debug!(biosample = %id, url = %url, "fetching BioSample page");
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| KiraError::MetadataHttp(err.to_string()))?;
        let status = response.status().as_u16();
        if status == 404 {
            return Ok(SampleLookup::NotFound);
        }
        if !response.status().is_success() {
            let message = response
                .text()
                .unwrap_or_else(|_| "BioSample request failed".to_string());
            return Err(KiraError::MetadataStatus { status, message });
        }
        let body = response
            .text()
            .map_err(|err| KiraError::MetadataHttp(err.to_string()))?;
        Ok(parse_biosample_page(&body))
    }
}

/// Extracts the attribute table and the detail rows around it. A page
/// without an attribute table is treated as a missing sample.
pub fn parse_biosample_page(html: &str) -> SampleLookup {
    let Some(attribute_table) = ATTRIBUTE_TABLE.captures(html) else {
        return SampleLookup::NotFound;
    };
    let structured = table_rows(attribute_table.get(1).map_or("", |m| m.as_str()));

    let remainder = ATTRIBUTE_TABLE.replace_all(html, "");
    let supplementary = DETAIL_TABLE
        .captures_iter(&remainder)
        .filter_map(|captures| captures.get(1))
        .flat_map(|body| table_rows(body.as_str()))
        .filter(|(key, _)| normalize_key(key) != "Accession")
        .collect();

    SampleLookup::Found(SampleAttributes {
        structured,
        supplementary,
    })
}

fn table_rows(table_body: &str) -> Vec<(String, String)> {
    ROW.captures_iter(table_body)
        .filter_map(|row| {
            let row = row.get(1)?.as_str();
            let key = HEADER_CELL.captures(row)?.get(1)?.as_str();
            let value = DATA_CELL.captures(row)?.get(1)?.as_str();
            Some((cell_text(key), cell_text(value)))
        })
        .collect()
}

fn cell_text(fragment: &str) -> String {
    let stripped = TAG.replace_all(fragment, " ");
    let decoded = decode_entities(&stripped);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entities(text: &str) -> String {
    let numeric = NUMERIC_ENTITY.replace_all(text, |captures: &regex::Captures<'_>| {
        let code = &captures[1];
        let value = match code.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => code.parse().ok(),
        };
        value
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    });
    numeric
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
<html><body>
<table class="table2 table2-border">
  <tr><th>Accession</th><td>SAMC000001</td></tr>
  <tr><th>Release date</th><td>2023-05-01</td></tr>
  <tr><th>Attributes</th><td>
    <table id="attribute_table" class="table">
      <tr><th>strain</th><td>K-12</td></tr>
      <tr><th>collection  date</th><td><span>2021&#45;03</span></td></tr>
      <tr><th>host</th><td>  </td></tr>
      <tr><td>orphan cell</td></tr>
    </table>
  </td></tr>
  <tr><th>Submitter</th><td>Lab &amp; Co</td></tr>
</table>
</body></html>"#;

    #[test]
    fn search_url_encodes_genome() {
        let genome: GenomeName = "Escherichia coli".parse().unwrap();
        let url = gsa_search_url(&genome);
        assert!(url.starts_with("https://ngdc.cncb.ac.cn/gsa/search?searchTerm=%28%28%28%22NGDC"));
        assert!(url.ends_with("%22Escherichia+coli%22+NOT+%22PCR%22"));
        assert!(!url.contains(' '));
    }

    #[test]
    fn page_without_attribute_table_is_not_found() {
        assert_eq!(
            parse_biosample_page("<html><body>No data</body></html>"),
            SampleLookup::NotFound
        );
    }

    #[test]
    fn attribute_and_detail_rows_are_extracted() {
        let SampleLookup::Found(attributes) = parse_biosample_page(PAGE) else {
            panic!("expected attributes");
        };
        assert_eq!(
            attributes.structured,
            vec![
                ("strain".to_string(), "K-12".to_string()),
                ("collection date".to_string(), "2021-03".to_string()),
                ("host".to_string(), String::new()),
            ]
        );
        assert!(attributes
            .supplementary
            .contains(&("Release date".to_string(), "2023-05-01".to_string())));
        assert!(attributes
            .supplementary
            .contains(&("Submitter".to_string(), "Lab & Co".to_string())));
        assert!(attributes.supplementary.iter().all(|(key, _)| key != "Accession"));
    }
}
