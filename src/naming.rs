use std::path::Path;

use url::Url;

use crate::error::TransferError;

/// Returns the trailing path segment of `url_str`.
///
/// URLs without a usable segment (`https://host/`, `https://host/dir/`) get a
/// generated `download_<uuid>` name with no extension.
pub fn filename_from_url(url_str: &str) -> Result<String, TransferError> {
    let url = Url::parse(url_str).map_err(|source| TransferError::InvalidUrl {
        url: url_str.to_string(),
        source,
    })?;

    if let Some(filename) = url.path_segments().and_then(|mut s| s.next_back()) {
        if !filename.is_empty() {
            return Ok(filename.to_string());
        }
    }

    Ok(format!("download_{}", uuid::Uuid::new_v4()))
}

pub fn sanitize_filename(filename: &str) -> String {
    filename.replace(|c: char| !c.is_alphanumeric() && c != '.' && c != '-' && c != '_', "_")
}

/// Splits `name` at its last `.` into base name and extension.
///
/// A leading dot marks a hidden file, not an extension.
pub fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], Some(&name[idx + 1..])),
        _ => (name, None),
    }
}

/// Picks a name for `proposed` that does not exist in `dir` right now.
///
/// Tries `base.ext`, then `base_1.ext`, `base_2.ext` and so on. The check is not
/// atomic with file creation, so two transfers racing on the same name can
/// still collide.
pub fn unique_filename(dir: &Path, proposed: &str) -> String {
    if !dir.join(proposed).exists() {
        return proposed.to_string();
    }

    let (base, extension) = split_extension(proposed);
    let mut counter: u64 = 1;
    loop {
        let candidate = match extension {
            Some(ext) => format!("{}_{}.{}", base, counter, ext),
            None => format!("{}_{}", base, counter),
        };
        if !dir.join(&candidate).exists() {
            return candidate;
        }
        counter += 1;
    }
}
