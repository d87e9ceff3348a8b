use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Check that `path` names an existing table the record reader understands.
pub fn validate_data_file(path: &str) -> Result<PathBuf> {
    let pb = PathBuf::from(path);
    let ext = pb
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase());
    match ext.as_deref() {
        Some("tsv") | Some("csv") | Some("txt") => {}
        _ => anyhow::bail!("Data file must have a .csv, .tsv or .txt extension: {}", path),
    }
    if !pb.is_file() {
        anyhow::bail!("Data file does not exist: {}", path);
    }
    Ok(pb)
}

pub fn validate_json_file(path: &Path) -> Result<()> {
    match path.extension().and_then(|s| s.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => {}
        _ => anyhow::bail!("File must have a .json extension: {}", path.display()),
    }
    if !path.is_file() {
        anyhow::bail!("File does not exist: {}", path.display());
    }
    Ok(())
}

/// Write `text` to `path`, or to stdout when no path is given.
pub fn write_text(path: Option<&Path>, text: &str) -> Result<()> {
    match path {
        Some(p) => std::fs::write(p, text)
            .with_context(|| format!("Failed to write output file: {}", p.display())),
        None => {
            println!("{}", text);
            Ok(())
        }
    }
}
