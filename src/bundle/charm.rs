//! Charm reference handling.
//!
//! A charm reference is either a charm URL (`cs:precise/mediawiki-10`,
//! `precise/mediawiki-10`, `cs:django-4`) or a path to a local charm
//! directory. The planner only needs one fact from a reference: the series
//! it implies, if any.

use std::path::Path;

use serde::Deserialize;

use crate::error::BundleError;

/// Known series names never mistaken for charm names when a URL has a
/// single path element. Matching the URL grammar loosely is fine here: the
/// bundle is assumed verified, and an unrecognized first element simply
/// yields no series.
fn looks_like_series(candidate: &str) -> bool {
    !candidate.is_empty()
        && candidate
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'.')
        && !candidate.contains('-')
}

/// Extracts the series embedded in a charm URL, if any.
///
/// `cs:precise/mediawiki-10` and `precise/mediawiki-10` yield `precise`;
/// `cs:django-4` and `django` yield nothing. Local paths are not URLs and
/// yield nothing.
#[must_use]
pub fn url_series(charm: &str) -> Option<String> {
    let rest = charm.strip_prefix("cs:").unwrap_or(charm);
    let rest = rest.strip_prefix("local:").unwrap_or(rest);
    let (first, _) = rest.split_once('/')?;
    // A leading "~user" element precedes the series in store URLs.
    if first.starts_with('~') {
        let series = rest.splitn(3, '/').nth(1)?;
        return looks_like_series(series).then(|| series.to_string());
    }
    looks_like_series(first).then(|| first.to_string())
}

/// True when the charm reference names a local charm directory.
#[must_use]
pub fn is_local(charm: &str) -> bool {
    !charm.starts_with("cs:") && Path::new(charm).is_dir()
}

/// The subset of a charm `metadata.yaml` the planner reads.
#[derive(Debug, Deserialize)]
struct CharmMetadata {
    #[serde(default)]
    series: Vec<String>,
}

/// Reads the default series of a local charm from its `metadata.yaml`.
///
/// The first entry of the metadata `series` list is the charm's default.
/// A charm directory without metadata, or metadata without a series list,
/// yields `None`.
///
/// # Errors
///
/// Returns [`BundleError::InvalidCharmMetadata`] when the metadata file
/// exists but cannot be read or parsed.
pub fn local_series(charm_dir: &str) -> Result<Option<String>, BundleError> {
    let path = Path::new(charm_dir).join("metadata.yaml");
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path).map_err(|err| {
        BundleError::InvalidCharmMetadata {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    })?;
    let metadata: CharmMetadata =
        serde_yaml::from_str(&content).map_err(|err| {
            BundleError::InvalidCharmMetadata {
                path: path.display().to_string(),
                message: err.to_string(),
            }
        })?;
    Ok(metadata.series.into_iter().next())
}
