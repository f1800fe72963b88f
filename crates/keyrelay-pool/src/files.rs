use std::path::{Path, PathBuf};

/// Key files in priority order under `<data_dir>/keys/`. Produced by the
/// external billing-check job; the first existing non-empty file wins.
pub const KEY_FILE_PRIORITY: &[&str] = &[
    "keys_high.txt",
    "keys_medium_high.txt",
    "keys_medium.txt",
    "active_keys.txt",
    "total_keys.txt",
];

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("no key file found under {0}")]
    NoKeyFile(PathBuf),
    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("key pool is not file-backed")]
    NotFileBacked,
}

pub fn keys_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("keys")
}

/// Probe the priority list and return the winning file plus its keys.
pub fn load_keys(data_dir: &Path) -> Result<(PathBuf, Vec<String>), PoolError> {
    let dir = keys_dir(data_dir);
    for name in KEY_FILE_PRIORITY {
        let path = dir.join(name);
        if !path.is_file() {
            continue;
        }
        let content = std::fs::read_to_string(&path).map_err(|source| PoolError::Read {
            path: path.clone(),
            source,
        })?;
        let keys = parse_keys(&content);
        if !keys.is_empty() {
            return Ok((path, keys));
        }
    }
    Err(PoolError::NoKeyFile(dir))
}

/// Bearer strings separated by commas or newlines; `#` lines are comments.
pub fn parse_keys(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .flat_map(|line| line.split(','))
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(String::from)
        .collect()
}
