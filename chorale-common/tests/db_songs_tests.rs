//! Song persistence tests
//!
//! Covers the aggregate read path, replace-all updates (child ids are not
//! stable across edits), slug conflicts and deletes.

use chorale_common::db::{create_song, delete_song, get_song, init_database, list_songs, update_song};
use chorale_common::model::{
    ChapterKind, NewChapter, NewLyricLine, NewSong, NewTrack, RichLyricSource, VoicePart,
};
use chorale_common::Error;
use sqlx::SqlitePool;
use tempfile::TempDir;

async fn setup() -> (TempDir, SqlitePool) {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("chorale.db")).await.unwrap();
    (dir, pool)
}

fn sample_song(slug: &str) -> NewSong {
    NewSong {
        slug: slug.to_string(),
        title: "Ave Verum Corpus".to_string(),
        pdf_url: Some("https://example.org/ave.pdf".to_string()),
        tracks: vec![
            NewTrack { voice_part: VoicePart::Soprano, url: "ave/soprano.mp3".to_string() },
            NewTrack { voice_part: VoicePart::Alto, url: "ave/alto.mp3".to_string() },
            NewTrack { voice_part: VoicePart::Instrumental, url: "ave/piano.mp3".to_string() },
        ],
        lyrics: vec![
            NewLyricLine { text: "natum de Maria".to_string(), start: 5.0, end: 10.0 },
            NewLyricLine { text: "Ave verum corpus".to_string(), start: 0.0, end: 5.0 },
        ],
        chapters: vec![
            NewChapter { title: "Chorus".to_string(), start: 30.0, kind: ChapterKind::Chorus },
            NewChapter { title: "Verse 1".to_string(), start: 0.0, kind: ChapterKind::Verse },
        ],
        rich_lyrics: Some(RichLyricSource::Inline("<p data-time=\"0000\">Ave</p>".to_string())),
    }
}

#[tokio::test]
async fn test_create_and_get_by_slug_and_id() {
    let (_dir, pool) = setup().await;

    let created = create_song(&pool, &sample_song("ave-verum")).await.unwrap();
    assert_eq!(created.tracks.len(), 3);

    let by_slug = get_song(&pool, "ave-verum").await.unwrap();
    let by_id = get_song(&pool, &created.id.to_string()).await.unwrap();
    assert_eq!(by_slug, by_id);

    // Tracks keep submission order; lyrics and chapters come back time-ordered
    let parts: Vec<VoicePart> = by_slug.tracks.iter().map(|t| t.voice_part).collect();
    assert_eq!(parts, vec![VoicePart::Soprano, VoicePart::Alto, VoicePart::Instrumental]);
    assert_eq!(by_slug.lyrics[0].text, "Ave verum corpus");
    assert_eq!(by_slug.chapters[0].title, "Verse 1");
    assert_eq!(by_slug.chapters[1].kind, ChapterKind::Chorus);
    assert!(matches!(by_slug.rich_lyrics, Some(RichLyricSource::Inline(_))));
}

#[tokio::test]
async fn test_get_missing_song_is_not_found() {
    let (_dir, pool) = setup().await;
    let err = get_song(&pool, "nope").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_update_replaces_all_children() {
    let (_dir, pool) = setup().await;
    let created = create_song(&pool, &sample_song("ave-verum")).await.unwrap();
    let old_track_ids: Vec<_> = created.tracks.iter().map(|t| t.id).collect();

    let mut edited = sample_song("ave-verum");
    edited.title = "Ave Verum (Mozart)".to_string();
    edited.tracks.truncate(1);
    edited.chapters.clear();
    edited.rich_lyrics = Some(RichLyricSource::Url("https://example.org/ave.html".to_string()));

    let updated = update_song(&pool, created.id, &edited).await.unwrap();

    assert_eq!(updated.id, created.id);
    assert_eq!(updated.title, "Ave Verum (Mozart)");
    assert_eq!(updated.tracks.len(), 1);
    assert!(updated.chapters.is_empty());
    assert_eq!(updated.lyrics.len(), 2);
    // Children were reinserted, so their ids changed
    assert!(!old_track_ids.contains(&updated.tracks[0].id));
    assert!(matches!(updated.rich_lyrics, Some(RichLyricSource::Url(_))));

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tracks")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 1);
}

#[tokio::test]
async fn test_failed_update_keeps_previous_revision() {
    let (_dir, pool) = setup().await;
    let first = create_song(&pool, &sample_song("ave-verum")).await.unwrap();
    create_song(&pool, &sample_song("jubilate")).await.unwrap();

    // Renaming onto an existing slug fails before children are touched
    let mut edited = sample_song("jubilate");
    edited.tracks.clear();
    let err = update_song(&pool, first.id, &edited).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    let reloaded = get_song(&pool, "ave-verum").await.unwrap();
    assert_eq!(reloaded.tracks.len(), 3);
}

#[tokio::test]
async fn test_duplicate_slug_on_create_is_conflict() {
    let (_dir, pool) = setup().await;
    create_song(&pool, &sample_song("ave-verum")).await.unwrap();
    let err = create_song(&pool, &sample_song("ave-verum")).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
}

#[tokio::test]
async fn test_invalid_song_is_rejected() {
    let (_dir, pool) = setup().await;
    let mut song = sample_song("ave-verum");
    song.title = "  ".to_string();
    let err = create_song(&pool, &song).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert!(list_songs(&pool).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_song_removes_children() {
    let (_dir, pool) = setup().await;
    let created = create_song(&pool, &sample_song("ave-verum")).await.unwrap();

    delete_song(&pool, created.id).await.unwrap();

    assert!(matches!(get_song(&pool, "ave-verum").await, Err(Error::NotFound(_))));
    for table in ["tracks", "lyrics", "chapters"] {
        let rows: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 0, "{} not emptied", table);
    }

    let err = delete_song(&pool, created.id).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_list_songs_ordered_by_title() {
    let (_dir, pool) = setup().await;
    let mut b = sample_song("b-song");
    b.title = "Benedictus".to_string();
    let mut a = sample_song("a-song");
    a.title = "agnus Dei".to_string();
    create_song(&pool, &b).await.unwrap();
    create_song(&pool, &a).await.unwrap();

    let titles: Vec<String> = list_songs(&pool).await.unwrap().into_iter().map(|s| s.title).collect();
    assert_eq!(titles, vec!["agnus Dei".to_string(), "Benedictus".to_string()]);
}
