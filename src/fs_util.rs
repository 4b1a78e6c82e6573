use std::fs;
use std::io;
use std::path::Path;

use flate2::read::MultiGzDecoder;

use crate::error::KiraError;

/// Decodes every member of a gzip file to completion, discarding the output.
pub fn validate_gzip(path: &Path) -> Result<(), KiraError> {
    let file = fs::File::open(path)
        .map_err(|err| KiraError::Filesystem(format!("open gzip {}: {err}", path.display())))?;
    let mut decoder = MultiGzDecoder::new(io::BufReader::new(file));
    io::copy(&mut decoder, &mut io::sink())
        .map_err(|_| KiraError::CorruptDownload(path.to_path_buf()))?;
    Ok(())
}

pub fn is_gzip_name(path: &Path) -> bool {
    path.extension()
        .and_then(|value| value.to_str())
        .map(|value| value.eq_ignore_ascii_case("gz"))
        .unwrap_or(false)
}
