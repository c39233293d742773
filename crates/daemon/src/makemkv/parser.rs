//! Parser for the makemkvcon robot-mode text protocol.
//!
//! Record shapes consumed here:
//! - `CINFO:2,0,"Disc Name"` disc display name
//! - `TINFO:<title>,<attr>,<code>,"value"` per-title attribute
//! - `PRGV:<current>,<total>,<max>` progress triplet
//! - `PRGC:` / `PRGT:` records carrying a quoted status message
//!
//! Anything else is ignored. Malformed records are skipped, never fatal.

use crate::disc::DiscKind;
use std::collections::HashMap;
use std::time::Duration;

/// TINFO attribute ids we care about.
const ATTR_NAME: u32 = 2;
const ATTR_CHAPTERS: u32 = 8;
const ATTR_DURATION: u32 = 9;
const ATTR_SIZE: u32 = 10;

/// One extractable title on a disc.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Title {
    pub id: u32,
    pub name: String,
    pub duration: Duration,
    pub size_bytes: u64,
    pub chapters: u32,
}

/// Disc-level scan output.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScanResult {
    /// Titles in the order the scan first mentioned them.
    pub titles: Vec<Title>,
    pub disc_name: String,
    pub kind: DiscKind,
}

/// A `PRGV` progress record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressTriplet {
    pub current: i64,
    /// Carried for completeness; the percentage only uses `current` and `max`.
    pub total: i64,
    pub max: i64,
}

impl ProgressTriplet {
    pub fn percentage(&self) -> f64 {
        calculate_percentage(self.current, self.max)
    }
}

/// Incremental parser for `info` scan output.
///
/// Lines are fed one at a time as the tool produces them; [`InfoParser::finish`]
/// yields the accumulated [`ScanResult`].
#[derive(Debug, Default)]
pub struct InfoParser {
    disc_name: String,
    kind: Option<DiscKind>,
    titles: Vec<Title>,
    index: HashMap<u32, usize>,
}

impl InfoParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one output line.
    pub fn feed(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        if line.starts_with("CINFO:2,0,\"") {
            if let Some(name) = extract_quoted_value(line) {
                self.disc_name = name.to_string();
            }
        }

        let lower = line.to_lowercase();
        if lower.contains("blu-ray") || lower.contains("bd-rom") {
            self.kind = Some(DiscKind::BluRay);
        } else if lower.contains("dvd") && self.kind.is_none() {
            self.kind = Some(DiscKind::Dvd);
        }

        if let Some(rest) = line.strip_prefix("TINFO:") {
            self.parse_title_info(rest);
        }
    }

    fn parse_title_info(&mut self, rest: &str) {
        let parts: Vec<&str> = rest.splitn(4, ',').collect();
        if parts.len() < 4 {
            return;
        }
        let (Ok(title_id), Ok(attr)) = (parts[0].parse::<u32>(), parts[1].parse::<u32>()) else {
            return;
        };
        let value = extract_quoted_value(parts[3]).unwrap_or_default();

        let idx = *self.index.entry(title_id).or_insert_with(|| {
            self.titles.push(Title {
                id: title_id,
                ..Default::default()
            });
            self.titles.len() - 1
        });
        let title = &mut self.titles[idx];

        match attr {
            ATTR_NAME => title.name = value.to_string(),
            ATTR_DURATION => title.duration = parse_duration(value),
            ATTR_SIZE => title.size_bytes = value.parse().unwrap_or(0),
            ATTR_CHAPTERS => title.chapters = value.parse().unwrap_or(0),
            _ => {}
        }
    }

    /// Finish the scan. Titles with zero duration are dropped.
    pub fn finish(self) -> ScanResult {
        ScanResult {
            titles: self
                .titles
                .into_iter()
                .filter(|t| !t.duration.is_zero())
                .collect(),
            disc_name: self.disc_name,
            kind: self.kind.unwrap_or_default(),
        }
    }
}

/// Parse complete `info` output in one go.
pub fn parse_info(output: &str) -> ScanResult {
    let mut parser = InfoParser::new();
    for line in output.lines() {
        parser.feed(line);
    }
    parser.finish()
}

/// Parse a `PRGV:current,total,max` record.
pub fn parse_progress(line: &str) -> Option<ProgressTriplet> {
    let rest = line.trim().strip_prefix("PRGV:")?;
    let mut parts = rest.split(',');
    let current = parts.next()?.trim().parse().ok()?;
    let total = parts.next()?.trim().parse().ok()?;
    let max = parts.next()?.trim().parse().ok()?;
    Some(ProgressTriplet {
        current,
        total,
        max,
    })
}

/// Percentage of `current` against `max`. A zero `max` yields 0.
pub fn calculate_percentage(current: i64, max: i64) -> f64 {
    if max == 0 {
        return 0.0;
    }
    current as f64 / max as f64 * 100.0
}

/// Extract the quoted text of a `PRGC`/`PRGT` status record.
pub fn parse_status_message(line: &str) -> Option<String> {
    let line = line.trim();
    if !line.starts_with("PRGC:") && !line.starts_with("PRGT:") {
        return None;
    }
    extract_quoted_value(line)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Parse `H:MM:SS`. Anything else is zero.
pub fn parse_duration(s: &str) -> Duration {
    let parts: Vec<&str> = s.trim().split(':').collect();
    if parts.len() != 3 {
        return Duration::ZERO;
    }
    let field = |p: &str| p.parse::<u64>().unwrap_or(0);
    Duration::from_secs(field(parts[0]) * 3600 + field(parts[1]) * 60 + field(parts[2]))
}

/// Text between the first and the last double quote.
pub fn extract_quoted_value(s: &str) -> Option<&str> {
    let start = s.find('"')?;
    let end = s.rfind('"')?;
    (start < end).then(|| &s[start + 1..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const BLURAY_SCAN: &str = r#"MSG:1005,0,1,"MakeMKV v1.17.5 linux(x64-release) started","%1 started","MakeMKV v1.17.5 linux(x64-release)"
DRV:0,2,999,1,"BD-RE HL-DT-ST BD-RE  WH16NS60","SHOW_NAME","/dev/sr0"
PRGT:5018,0,"Scanning CD-ROM devices"
PRGV:0,0,65536
TCOUNT:3
CINFO:1,6209,"Blu-ray disc"
CINFO:2,0,"SHOW_NAME"
TINFO:0,2,0,"Main Feature"
TINFO:0,8,0,"24"
TINFO:0,9,0,"1:58:31"
TINFO:0,10,0,"31.2 GB"
TINFO:1,2,0,"Extras"
TINFO:1,9,0,"0:12:04"
TINFO:1,10,0,"2147483648"
TINFO:2,2,0,"Menu loop"
TINFO:2,9,0,"0:00:00"
"#;

    #[test]
    fn test_parse_bluray_scan() {
        let result = parse_info(BLURAY_SCAN);

        assert_eq!(result.disc_name, "SHOW_NAME");
        assert_eq!(result.kind, DiscKind::BluRay);
        assert_eq!(result.titles.len(), 2);

        let main = &result.titles[0];
        assert_eq!(main.id, 0);
        assert_eq!(main.name, "Main Feature");
        assert_eq!(main.chapters, 24);
        assert_eq!(main.duration, Duration::from_secs(3600 + 58 * 60 + 31));
        // Human-readable size is not a byte count
        assert_eq!(main.size_bytes, 0);

        let extras = &result.titles[1];
        assert_eq!(extras.id, 1);
        assert_eq!(extras.size_bytes, 2_147_483_648);
    }

    #[test]
    fn test_titles_keep_first_appearance_order() {
        let output = "TINFO:5,9,0,\"0:20:00\"\nTINFO:1,9,0,\"0:21:00\"\nTINFO:3,9,0,\"0:22:00\"\nTINFO:5,2,0,\"Five\"\n";
        let ids: Vec<u32> = parse_info(output).titles.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![5, 1, 3]);
    }

    #[test]
    fn test_disc_kind_detection() {
        assert_eq!(parse_info("DRV:0,2,999,1,\"DVD+R-DL\"\n").kind, DiscKind::Dvd);
        assert_eq!(parse_info("CINFO:1,6206,\"BD-ROM\"\n").kind, DiscKind::BluRay);
        assert_eq!(parse_info("nothing interesting\n").kind, DiscKind::Dvd);
        // Blu-ray marker wins over an earlier DVD marker
        assert_eq!(
            parse_info("DRV:0,\"DVD writer\"\nCINFO:1,\"Blu-ray disc\"\n").kind,
            DiscKind::BluRay
        );
    }

    #[test]
    fn test_malformed_records_are_skipped() {
        let output = "TINFO:garbage\nTINFO:x,9,0,\"1:00:00\"\nTINFO:1,y,0,\"1:00:00\"\nTINFO:2,9\nTINFO:4,9,0,\"0:30:00\"\n";
        let result = parse_info(output);
        assert_eq!(result.titles.len(), 1);
        assert_eq!(result.titles[0].id, 4);
    }

    #[test]
    fn test_incremental_feed_matches_bulk_parse() {
        let mut parser = InfoParser::new();
        for line in BLURAY_SCAN.lines() {
            parser.feed(line);
        }
        assert_eq!(parser.finish(), parse_info(BLURAY_SCAN));
    }

    #[test]
    fn test_parse_progress() {
        let p = parse_progress("PRGV:3276,16384,65536").unwrap();
        assert_eq!(p.current, 3276);
        assert_eq!(p.total, 16384);
        assert_eq!(p.max, 65536);
        assert!((p.percentage() - 3276.0 / 65536.0 * 100.0).abs() < 1e-9);

        assert!(parse_progress("PRGV:1,2").is_none());
        assert!(parse_progress("PRGV:a,2,3").is_none());
        assert!(parse_progress("PRGT:1,2,3").is_none());
    }

    #[test]
    fn test_parse_status_message() {
        assert_eq!(
            parse_status_message("PRGC:5017,0,\"Saving to MKV file\""),
            Some("Saving to MKV file".to_string())
        );
        assert_eq!(
            parse_status_message("PRGT:5018,0,\"Scanning CD-ROM devices\""),
            Some("Scanning CD-ROM devices".to_string())
        );
        assert_eq!(parse_status_message("PRGC:5017,0,\"\""), None);
        assert_eq!(parse_status_message("MSG:1,0,\"hello\""), None);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("1:45:32"), Duration::from_secs(6332));
        assert_eq!(parse_duration("0:00:00"), Duration::ZERO);
        assert_eq!(parse_duration("45:32"), Duration::ZERO);
        assert_eq!(parse_duration(""), Duration::ZERO);
    }

    #[test]
    fn test_extract_quoted_value() {
        assert_eq!(extract_quoted_value("a,\"b\""), Some("b"));
        assert_eq!(extract_quoted_value("\"x\",\"y\""), Some("x\",\"y"));
        assert_eq!(extract_quoted_value("\"only"), None);
        assert_eq!(extract_quoted_value("none"), None);
    }

    proptest! {
        #[test]
        fn prop_percentage_is_current_over_max(current in 0i64..1_000_000, total in 0i64..1_000_000, max in 1i64..1_000_000) {
            let line = format!("PRGV:{},{},{}", current, total, max);
            let p = parse_progress(&line).unwrap();
            let expected = current as f64 / max as f64 * 100.0;
            prop_assert!((p.percentage() - expected).abs() < 1e-9);
        }

        #[test]
        fn prop_zero_max_yields_zero(current in 0i64..1_000_000, total in 0i64..1_000_000) {
            prop_assert_eq!(calculate_percentage(current, 0), 0.0);
            let p = ProgressTriplet { current, total, max: 0 };
            prop_assert_eq!(p.percentage(), 0.0);
        }

        #[test]
        fn prop_duration_round_trip(h in 0u64..10, m in 0u64..60, s in 0u64..60) {
            let text = format!("{}:{:02}:{:02}", h, m, s);
            prop_assert_eq!(parse_duration(&text), Duration::from_secs(h * 3600 + m * 60 + s));
        }
    }
}
