//! Chapter timeline and loop boundaries
//!
//! Chapters partition the song from the first chapter's start: chapter *i*
//! runs until chapter *i+1* starts, the last one until the song ends.
//! Positions before the first chapter belong to no chapter.

use chorale_common::model::ChapterMarker;
use uuid::Uuid;

/// Sorted chapter list with a cached current index
///
/// The cache keeps the common case (position advancing inside one chapter)
/// O(1) and remembers which chapter playback was in before a tick overshot
/// its end, which is what the loop check needs.
#[derive(Debug, Clone)]
pub struct ChapterTimeline {
    chapters: Vec<ChapterMarker>,
    duration: f64,
    /// - None: not located yet
    /// - Some(i < len): inside chapter i
    /// - Some(len): before the first chapter
    current_index: Option<usize>,
}

impl ChapterTimeline {
    /// Chapters are sorted by start time; equal starts keep their order
    pub fn new(mut chapters: Vec<ChapterMarker>, duration: f64) -> Self {
        chapters.sort_by(|a, b| a.start.total_cmp(&b.start));
        Self {
            chapters,
            duration: duration.max(0.0),
            current_index: None,
        }
    }

    /// `[start, end)` of chapter `index`
    pub fn bounds(&self, index: usize) -> Option<(f64, f64)> {
        let chapter = self.chapters.get(index)?;
        let end = self
            .chapters
            .get(index + 1)
            .map(|next| next.start)
            .unwrap_or(self.duration)
            .max(chapter.start);
        Some((chapter.start, end))
    }

    /// Locate `position` and report whether the chapter changed
    ///
    /// Returns `(crossed, chapter)`; the first call never counts as a crossing.
    pub fn check_boundary(&mut self, position: f64) -> (bool, Option<&ChapterMarker>) {
        if self.chapters.is_empty() {
            self.current_index = Some(0);
            return (false, None);
        }

        if let Some(index) = self.current_index {
            if self.contains(index, position) {
                return (false, self.chapters.get(index));
            }
        }

        let old_index = self.current_index;
        let new_index = self.index_at(position).unwrap_or(self.chapters.len());
        self.current_index = Some(new_index);

        let crossed = matches!(old_index, Some(old) if old != new_index);
        (crossed, self.chapters.get(new_index))
    }

    /// Chapter playback was last located in
    pub fn current(&self) -> Option<&ChapterMarker> {
        self.current_index.and_then(|i| self.chapters.get(i))
    }

    pub fn current_bounds(&self) -> Option<(f64, f64)> {
        self.current_index.and_then(|i| self.bounds(i))
    }

    pub fn find(&self, id: Uuid) -> Option<&ChapterMarker> {
        self.chapters.iter().find(|c| c.id == id)
    }

    /// Loop-back target when `position` has reached the current chapter's end
    ///
    /// Fires `lookahead` seconds early so tick granularity cannot skip the
    /// boundary. Uses the cached chapter, so a tick that overshoots into the
    /// next chapter still loops the one that was playing.
    pub fn loop_target(&self, position: f64, lookahead: f64) -> Option<&ChapterMarker> {
        let index = self.current_index?;
        let (start, end) = self.bounds(index)?;
        let threshold = if end - start > lookahead {
            end - lookahead
        } else {
            end
        };
        if position >= threshold {
            self.chapters.get(index)
        } else {
            None
        }
    }

    fn contains(&self, index: usize, position: f64) -> bool {
        match self.bounds(index) {
            Some((start, end)) => {
                let last = index + 1 == self.chapters.len();
                position >= start && (position < end || (last && position >= end))
            }
            None => false,
        }
    }

    fn index_at(&self, position: f64) -> Option<usize> {
        (0..self.chapters.len()).rev().find(|&i| self.contains(i, position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorale_common::model::ChapterKind;

    fn chapter(title: &str, start: f64) -> ChapterMarker {
        ChapterMarker {
            id: Uuid::new_v4(),
            title: title.to_string(),
            start,
            kind: ChapterKind::Other,
        }
    }

    fn timeline() -> ChapterTimeline {
        ChapterTimeline::new(
            vec![chapter("Verse", 0.0), chapter("Chorus", 30.0), chapter("Bridge", 75.0)],
            120.0,
        )
    }

    #[test]
    fn test_empty_timeline() {
        let mut timeline = ChapterTimeline::new(vec![], 60.0);
        let (crossed, current) = timeline.check_boundary(10.0);
        assert!(!crossed);
        assert!(current.is_none());
        assert!(timeline.loop_target(59.95, 0.1).is_none());
    }

    #[test]
    fn test_bounds_partition_song() {
        let timeline = timeline();
        assert_eq!(timeline.bounds(0), Some((0.0, 30.0)));
        assert_eq!(timeline.bounds(1), Some((30.0, 75.0)));
        assert_eq!(timeline.bounds(2), Some((75.0, 120.0)));
        assert_eq!(timeline.bounds(3), None);
    }

    #[test]
    fn test_boundary_crossings() {
        let mut timeline = timeline();

        let (crossed, current) = timeline.check_boundary(0.0);
        assert!(!crossed);
        assert_eq!(current.unwrap().title, "Verse");

        let (crossed, _) = timeline.check_boundary(29.99);
        assert!(!crossed);

        let (crossed, current) = timeline.check_boundary(30.0);
        assert!(crossed);
        assert_eq!(current.unwrap().title, "Chorus");

        // Backward seek
        let (crossed, current) = timeline.check_boundary(5.0);
        assert!(crossed);
        assert_eq!(current.unwrap().title, "Verse");

        // End of song stays in the last chapter
        let (_, current) = timeline.check_boundary(120.0);
        assert_eq!(current.unwrap().title, "Bridge");
    }

    #[test]
    fn test_position_before_first_chapter() {
        let mut timeline = ChapterTimeline::new(vec![chapter("Intro", 10.0)], 60.0);
        let (_, current) = timeline.check_boundary(3.0);
        assert!(current.is_none());
        let (crossed, current) = timeline.check_boundary(10.0);
        assert!(crossed);
        assert_eq!(current.unwrap().title, "Intro");
    }

    #[test]
    fn test_unsorted_chapters_get_sorted() {
        let mut timeline = ChapterTimeline::new(vec![chapter("B", 40.0), chapter("A", 0.0)], 90.0);
        assert_eq!(timeline.check_boundary(10.0).1.unwrap().title, "A");
        assert_eq!(timeline.check_boundary(50.0).1.unwrap().title, "B");
    }

    #[test]
    fn test_loop_target_uses_lookahead() {
        let mut timeline = timeline();
        timeline.check_boundary(40.0);

        assert!(timeline.loop_target(74.8, 0.1).is_none());
        assert_eq!(timeline.loop_target(74.9, 0.1).unwrap().start, 30.0);
    }

    #[test]
    fn test_overshoot_loops_playing_chapter() {
        let mut timeline = timeline();
        timeline.check_boundary(74.85);

        // Tick jumped past 75; the cached chapter is still the chorus
        let target = timeline.loop_target(75.02, 0.1).unwrap();
        assert_eq!(target.title, "Chorus");
        assert_eq!(target.start, 30.0);
    }
}
