//! MakeMKV integration: robot-mode parsing, title selection and the
//! process client that scans discs and rips titles.

pub mod client;
pub mod parser;
pub mod selector;

pub use client::{find_newest_mkv, MakeMkvClient, RipError, RipUpdate};
pub use parser::{
    calculate_percentage, parse_info, parse_progress, parse_status_message, InfoParser,
    ProgressTriplet, ScanResult, Title,
};
pub use selector::{select_titles, selection_mode, SelectionMode};
