//! Song aggregate model
//!
//! A [`Song`] is loaded once per playback session and replaced wholesale
//! when the listener navigates to another song. Child records (tracks,
//! lyrics, chapters) are rewritten on every edit, so their ids are only
//! meaningful for the lifetime of one stored revision.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::Error;

/// One vocal or instrumental category of a choral arrangement
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VoicePart {
    Soprano,
    Alto,
    Tenor,
    Bass,
    Instrumental,
    /// Full mix of every part
    All,
}

impl VoicePart {
    /// Every voice part, in display order
    pub const ALL: [VoicePart; 6] = [
        VoicePart::Soprano,
        VoicePart::Alto,
        VoicePart::Tenor,
        VoicePart::Bass,
        VoicePart::Instrumental,
        VoicePart::All,
    ];

    /// Lowercase name used in storage, URLs and lyric document markup
    pub fn as_str(&self) -> &'static str {
        match self {
            VoicePart::Soprano => "soprano",
            VoicePart::Alto => "alto",
            VoicePart::Tenor => "tenor",
            VoicePart::Bass => "bass",
            VoicePart::Instrumental => "instrumental",
            VoicePart::All => "all",
        }
    }

    /// Playback mode category this part belongs to
    pub fn category(&self) -> ModeCategory {
        match self {
            VoicePart::Instrumental => ModeCategory::Instrumental,
            VoicePart::All => ModeCategory::AllMix,
            _ => ModeCategory::VoicePart,
        }
    }

    /// True for the four sung parts
    pub fn is_named_part(&self) -> bool {
        self.category() == ModeCategory::VoicePart
    }
}

impl fmt::Display for VoicePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoicePart {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "soprano" => Ok(VoicePart::Soprano),
            "alto" => Ok(VoicePart::Alto),
            "tenor" => Ok(VoicePart::Tenor),
            "bass" => Ok(VoicePart::Bass),
            "instrumental" => Ok(VoicePart::Instrumental),
            "all" => Ok(VoicePart::All),
            other => Err(Error::InvalidInput(format!("unknown voice part: {}", other))),
        }
    }
}

/// Mutually exclusive groups of tracks that may be audible together
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ModeCategory {
    /// Soprano, alto, tenor or bass
    VoicePart,
    /// Accompaniment only
    Instrumental,
    /// Full mix
    AllMix,
}

/// Display tag of a chapter
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChapterKind {
    Verse,
    Chorus,
    Bridge,
    #[default]
    Other,
}

impl ChapterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChapterKind::Verse => "verse",
            ChapterKind::Chorus => "chorus",
            ChapterKind::Bridge => "bridge",
            ChapterKind::Other => "other",
        }
    }

    /// Lenient parse; unknown tags display as `Other`
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "verse" => ChapterKind::Verse,
            "chorus" => ChapterKind::Chorus,
            "bridge" => ChapterKind::Bridge,
            _ => ChapterKind::Other,
        }
    }
}

/// One voice-part recording
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Track {
    pub id: Uuid,
    pub voice_part: VoicePart,
    /// Resource locator (http(s) URL, file:// URL or path under the root folder)
    pub url: String,
}

/// A timed lyric line; active over the half-open interval `[start, end)`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LyricLine {
    pub id: Uuid,
    pub text: String,
    /// Seconds
    pub start: f64,
    /// Seconds
    pub end: f64,
}

/// Named section of a song, usable as a loop unit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChapterMarker {
    pub id: Uuid,
    pub title: String,
    /// Seconds
    pub start: f64,
    #[serde(default)]
    pub kind: ChapterKind,
}

/// Where the rich lyric document comes from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "source", content = "value", rename_all = "lowercase")]
pub enum RichLyricSource {
    /// Document text stored with the song
    Inline(String),
    /// Document fetched on demand
    Url(String),
}

/// Song aggregate as read from storage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Song {
    pub id: Uuid,
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub pdf_url: Option<String>,
    #[serde(default)]
    pub tracks: Vec<Track>,
    #[serde(default)]
    pub lyrics: Vec<LyricLine>,
    #[serde(default)]
    pub chapters: Vec<ChapterMarker>,
    #[serde(default)]
    pub rich_lyrics: Option<RichLyricSource>,
}

impl Song {
    /// Sort lyrics and chapters by start time (stable for equal starts)
    pub fn normalized(mut self) -> Self {
        self.lyrics.sort_by(|a, b| a.start.total_cmp(&b.start));
        self.chapters.sort_by(|a, b| a.start.total_cmp(&b.start));
        self
    }

    pub fn track(&self, id: Uuid) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }
}

/// Summary row for song listings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SongSummary {
    pub id: Uuid,
    pub slug: String,
    pub title: String,
}

/// Write-side track (id assigned on insert)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewTrack {
    pub voice_part: VoicePart,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewLyricLine {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewChapter {
    pub title: String,
    pub start: f64,
    #[serde(default)]
    pub kind: ChapterKind,
}

/// Write-side song aggregate used by create and update
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewSong {
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub pdf_url: Option<String>,
    #[serde(default)]
    pub tracks: Vec<NewTrack>,
    #[serde(default)]
    pub lyrics: Vec<NewLyricLine>,
    #[serde(default)]
    pub chapters: Vec<NewChapter>,
    #[serde(default)]
    pub rich_lyrics: Option<RichLyricSource>,
}

impl NewSong {
    /// Reject aggregates that would break timeline invariants
    pub fn validate(&self) -> crate::Result<()> {
        let slug = self.slug.trim();
        if slug.is_empty() {
            return Err(Error::InvalidInput("slug must not be empty".to_string()));
        }
        if !slug
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::InvalidInput(format!(
                "slug may only contain letters, digits, '-' and '_': {}",
                slug
            )));
        }
        if Uuid::parse_str(slug).is_ok() {
            return Err(Error::InvalidInput("slug must not be a UUID".to_string()));
        }
        if self.title.trim().is_empty() {
            return Err(Error::InvalidInput("title must not be empty".to_string()));
        }
        for line in &self.lyrics {
            if !(line.start.is_finite() && line.end.is_finite()) || line.start < 0.0 || line.end < line.start {
                return Err(Error::InvalidInput(format!(
                    "lyric line '{}' has invalid timing {}..{}",
                    line.text, line.start, line.end
                )));
            }
        }
        for chapter in &self.chapters {
            if !chapter.start.is_finite() || chapter.start < 0.0 {
                return Err(Error::InvalidInput(format!(
                    "chapter '{}' has invalid start {}",
                    chapter.title, chapter.start
                )));
            }
        }
        Ok(())
    }
}
