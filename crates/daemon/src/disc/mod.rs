//! Optical media types and drive handling.
//!
//! Holds the disc classification shared by the scanner, the queue and the
//! encoder, plus the drive monitor and eject helpers.

pub mod eject;
pub mod monitor;

pub use eject::eject;
pub use monitor::{DiscMonitor, DriveProbe, DriveStatus, IoctlProbe};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Files above this size are assumed to come from a Blu-ray.
pub const BLURAY_SIZE_THRESHOLD: u64 = 8 * 1024 * 1024 * 1024;

/// Kind of optical media a title came from. Drives encoder profile choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscKind {
    /// Standard optical media.
    Dvd,
    /// High-capacity optical media.
    BluRay,
}

impl Default for DiscKind {
    fn default() -> Self {
        Self::Dvd
    }
}

impl std::fmt::Display for DiscKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscKind::Dvd => write!(f, "DVD"),
            DiscKind::BluRay => write!(f, "Blu-ray"),
        }
    }
}

impl DiscKind {
    /// Guess the media kind of an already-ripped file from its size.
    pub fn from_file_size(size_bytes: u64) -> Self {
        if size_bytes > BLURAY_SIZE_THRESHOLD {
            DiscKind::BluRay
        } else {
            DiscKind::Dvd
        }
    }

    /// Parse a user-supplied kind name (`bluray`, `blu-ray`, `br`, `dvd`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "bluray" | "blu-ray" | "br" => Some(DiscKind::BluRay),
            "dvd" => Some(DiscKind::Dvd),
            _ => None,
        }
    }
}

/// A disc that the monitor saw arrive in the drive.
///
/// Name and kind are filled in once the disc has been scanned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedDisc {
    pub device: PathBuf,
    pub name: Option<String>,
    pub kind: Option<DiscKind>,
}

impl DetectedDisc {
    pub fn new(device: PathBuf) -> Self {
        Self {
            device,
            name: None,
            kind: None,
        }
    }
}

/// Turn a disc label into something safe to use as a directory name.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | ' ' => '_',
            other => other,
        })
        .collect();

    let trimmed = replaced.trim_matches(|c| c == '_' || c == '.');
    if trimmed.is_empty() {
        "Unnamed_Disc".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_disc_kind_display() {
        assert_eq!(DiscKind::Dvd.to_string(), "DVD");
        assert_eq!(DiscKind::BluRay.to_string(), "Blu-ray");
    }

    #[test]
    fn test_disc_kind_from_file_size_boundary() {
        assert_eq!(DiscKind::from_file_size(0), DiscKind::Dvd);
        assert_eq!(DiscKind::from_file_size(BLURAY_SIZE_THRESHOLD), DiscKind::Dvd);
        assert_eq!(
            DiscKind::from_file_size(BLURAY_SIZE_THRESHOLD + 1),
            DiscKind::BluRay
        );
    }

    #[test]
    fn test_disc_kind_from_name() {
        assert_eq!(DiscKind::from_name("BluRay"), Some(DiscKind::BluRay));
        assert_eq!(DiscKind::from_name("blu-ray"), Some(DiscKind::BluRay));
        assert_eq!(DiscKind::from_name("br"), Some(DiscKind::BluRay));
        assert_eq!(DiscKind::from_name("DVD"), Some(DiscKind::Dvd));
        assert_eq!(DiscKind::from_name("hd-dvd"), None);
    }

    #[test]
    fn test_disc_kind_serde_names() {
        assert_eq!(serde_json::to_string(&DiscKind::BluRay).unwrap(), "\"blu_ray\"");
        assert_eq!(serde_json::to_string(&DiscKind::Dvd).unwrap(), "\"dvd\"");
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("The Movie: Part 2"), "The_Movie__Part_2");
        assert_eq!(sanitize_filename("a/b\\c*d?e\"f<g>h|i"), "a_b_c_d_e_f_g_h_i");
        assert_eq!(sanitize_filename("..__Disc__.."), "Disc");
        assert_eq!(sanitize_filename(""), "Unnamed_Disc");
        assert_eq!(sanitize_filename(" / "), "Unnamed_Disc");
    }

    proptest! {
        #[test]
        fn prop_disc_kind_size_classification(size: u64) {
            let kind = DiscKind::from_file_size(size);
            prop_assert_eq!(kind == DiscKind::BluRay, size > BLURAY_SIZE_THRESHOLD);
        }

        #[test]
        fn prop_sanitized_name_has_no_separators(name in ".{0,40}") {
            let clean = sanitize_filename(&name);
            prop_assert!(!clean.is_empty());
            prop_assert!(!clean.contains('/'));
            prop_assert!(!clean.contains(' '));
            prop_assert!(!clean.starts_with('_') && !clean.starts_with('.'));
        }
    }
}
