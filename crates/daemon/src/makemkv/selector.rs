//! Title selection heuristic.
//!
//! If any title reaches the movie threshold only the longest title is
//! ripped (movie mode). Otherwise every title at or above the episode
//! threshold is ripped in scan order (episode mode).

use super::parser::Title;
use std::time::Duration;

/// Which policy a selection was made under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    Movie,
    Episode,
}

/// Pick the titles to rip.
///
/// An empty result means the operator has to choose titles manually.
pub fn select_titles(titles: &[Title], movie_threshold: Duration, episode_threshold: Duration) -> Vec<Title> {
    match selection_mode(titles, movie_threshold) {
        None => Vec::new(),
        Some(SelectionMode::Movie) => longest_title(titles).into_iter().cloned().collect(),
        Some(SelectionMode::Episode) => titles
            .iter()
            .filter(|t| t.duration >= episode_threshold)
            .cloned()
            .collect(),
    }
}

/// The mode [`select_titles`] would use, or `None` for an empty title list.
pub fn selection_mode(titles: &[Title], movie_threshold: Duration) -> Option<SelectionMode> {
    let longest = longest_title(titles)?;
    if longest.duration >= movie_threshold {
        Some(SelectionMode::Movie)
    } else {
        Some(SelectionMode::Episode)
    }
}

/// First title with the maximum duration.
fn longest_title(titles: &[Title]) -> Option<&Title> {
    titles
        .iter()
        .fold(None, |best: Option<&Title>, t| match best {
            Some(b) if b.duration >= t.duration => Some(b),
            _ => Some(t),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MOVIE: Duration = Duration::from_secs(60 * 60);
    const EPISODE: Duration = Duration::from_secs(18 * 60);

    fn titles_from_minutes(minutes: &[u64]) -> Vec<Title> {
        minutes
            .iter()
            .enumerate()
            .map(|(i, m)| Title {
                id: i as u32,
                name: format!("Title {}", i),
                duration: Duration::from_secs(m * 60),
                ..Default::default()
            })
            .collect()
    }

    fn ids(titles: &[Title]) -> Vec<u32> {
        titles.iter().map(|t| t.id).collect()
    }

    #[test]
    fn test_movie_mode_selects_only_longest() {
        let titles = titles_from_minutes(&[70, 5]);
        assert_eq!(ids(&select_titles(&titles, MOVIE, EPISODE)), vec![0]);
        assert_eq!(selection_mode(&titles, MOVIE), Some(SelectionMode::Movie));
    }

    #[test]
    fn test_episode_mode_filters_short_titles() {
        let titles = titles_from_minutes(&[30, 25, 10]);
        assert_eq!(ids(&select_titles(&titles, MOVIE, EPISODE)), vec![0, 1]);
        assert_eq!(selection_mode(&titles, MOVIE), Some(SelectionMode::Episode));
    }

    #[test]
    fn test_empty_input_selects_nothing() {
        assert!(select_titles(&[], MOVIE, EPISODE).is_empty());
        assert_eq!(selection_mode(&[], MOVIE), None);
    }

    #[test]
    fn test_all_short_titles_need_manual_selection() {
        let titles = titles_from_minutes(&[3, 5, 17]);
        assert!(select_titles(&titles, MOVIE, EPISODE).is_empty());
    }

    #[test]
    fn test_movie_tie_takes_first_maximum() {
        let titles = titles_from_minutes(&[20, 95, 95, 40]);
        assert_eq!(ids(&select_titles(&titles, MOVIE, EPISODE)), vec![1]);
    }

    #[test]
    fn test_thresholds_are_inclusive() {
        let titles = titles_from_minutes(&[60, 18]);
        assert_eq!(ids(&select_titles(&titles, MOVIE, EPISODE)), vec![0]);

        let titles = titles_from_minutes(&[18, 17]);
        assert_eq!(ids(&select_titles(&titles, MOVIE, EPISODE)), vec![0]);
    }

    proptest! {
        #[test]
        fn prop_selection_respects_mode(minutes in proptest::collection::vec(0u64..180, 0..12)) {
            let titles = titles_from_minutes(&minutes);
            let selected = select_titles(&titles, MOVIE, EPISODE);
            let max = minutes.iter().copied().max();

            match max {
                None => prop_assert!(selected.is_empty()),
                Some(m) if m >= 60 => {
                    prop_assert_eq!(selected.len(), 1);
                    let first_max = minutes.iter().position(|&x| x == m).unwrap();
                    prop_assert_eq!(selected[0].id as usize, first_max);
                }
                Some(_) => {
                    let expected: Vec<u32> = minutes
                        .iter()
                        .enumerate()
                        .filter(|(_, &x)| x >= 18)
                        .map(|(i, _)| i as u32)
                        .collect();
                    prop_assert_eq!(ids(&selected), expected);
                }
            }
        }
    }
}
