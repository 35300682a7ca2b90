//! Song aggregate persistence
//!
//! Songs are written as whole aggregates. Updating a song deletes every
//! child row (tracks, lyrics, chapters) and reinserts the submitted children
//! with fresh ids, all inside one transaction: a failure part-way leaves the
//! previous revision untouched.

use crate::model::{
    ChapterKind, ChapterMarker, LyricLine, NewSong, RichLyricSource, Song, SongSummary, Track,
};
use crate::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

/// Load a song by slug or by UUID string
pub async fn get_song(db: &SqlitePool, key: &str) -> Result<Song> {
    let key = key.trim();
    let row = match Uuid::parse_str(key) {
        Ok(id) => {
            sqlx::query(
                "SELECT guid, slug, title, pdf_url, rich_lyrics_text, rich_lyrics_url FROM songs WHERE guid = ?",
            )
            .bind(id.to_string())
            .fetch_optional(db)
            .await?
        }
        Err(_) => {
            sqlx::query(
                "SELECT guid, slug, title, pdf_url, rich_lyrics_text, rich_lyrics_url FROM songs WHERE slug = ?",
            )
            .bind(key)
            .fetch_optional(db)
            .await?
        }
    }
    .ok_or_else(|| Error::NotFound(format!("song '{}'", key)))?;

    let id = parse_guid(&row, "guid")?;
    let rich_text: Option<String> = row.get("rich_lyrics_text");
    let rich_url: Option<String> = row.get("rich_lyrics_url");
    let rich_lyrics = match (rich_text, rich_url) {
        (Some(text), _) => Some(RichLyricSource::Inline(text)),
        (None, Some(url)) => Some(RichLyricSource::Url(url)),
        (None, None) => None,
    };

    let tracks = sqlx::query("SELECT guid, voice_part, url FROM tracks WHERE song_id = ? ORDER BY position")
        .bind(id.to_string())
        .fetch_all(db)
        .await?
        .iter()
        .map(|r| {
            Ok(Track {
                id: parse_guid(r, "guid")?,
                voice_part: r.get::<String, _>("voice_part").parse()?,
                url: r.get("url"),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let lyrics = sqlx::query(
        "SELECT guid, text, start_time, end_time FROM lyrics WHERE song_id = ? ORDER BY start_time, rowid",
    )
    .bind(id.to_string())
    .fetch_all(db)
    .await?
    .iter()
    .map(|r| {
        Ok(LyricLine {
            id: parse_guid(r, "guid")?,
            text: r.get("text"),
            start: r.get("start_time"),
            end: r.get("end_time"),
        })
    })
    .collect::<Result<Vec<_>>>()?;

    let chapters = sqlx::query(
        "SELECT guid, title, start_time, kind FROM chapters WHERE song_id = ? ORDER BY start_time, rowid",
    )
    .bind(id.to_string())
    .fetch_all(db)
    .await?
    .iter()
    .map(|r| {
        Ok(ChapterMarker {
            id: parse_guid(r, "guid")?,
            title: r.get("title"),
            start: r.get("start_time"),
            kind: ChapterKind::parse_lenient(&r.get::<String, _>("kind")),
        })
    })
    .collect::<Result<Vec<_>>>()?;

    Ok(Song {
        id,
        slug: row.get("slug"),
        title: row.get("title"),
        pdf_url: row.get("pdf_url"),
        tracks,
        lyrics,
        chapters,
        rich_lyrics,
    })
}

/// List every song, ordered by title
pub async fn list_songs(db: &SqlitePool) -> Result<Vec<SongSummary>> {
    sqlx::query("SELECT guid, slug, title FROM songs ORDER BY title COLLATE NOCASE, slug")
        .fetch_all(db)
        .await?
        .iter()
        .map(|r| {
            Ok(SongSummary {
                id: parse_guid(r, "guid")?,
                slug: r.get("slug"),
                title: r.get("title"),
            })
        })
        .collect()
}

/// Insert a new song aggregate
pub async fn create_song(db: &SqlitePool, song: &NewSong) -> Result<Song> {
    song.validate()?;
    let id = Uuid::new_v4();
    let (rich_text, rich_url) = rich_columns(song);

    let mut tx = db.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO songs (guid, slug, title, pdf_url, rich_lyrics_text, rich_lyrics_url)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(song.slug.trim())
    .bind(song.title.trim())
    .bind(song.pdf_url.as_deref())
    .bind(rich_text)
    .bind(rich_url)
    .execute(&mut *tx)
    .await
    .map_err(|e| map_conflict(e, &song.slug))?;

    insert_children(&mut tx, id, song).await?;
    tx.commit().await?;

    info!("Created song '{}' ({})", song.slug, id);
    get_song(db, &id.to_string()).await
}

/// Replace a song aggregate: update the song row, drop all children, reinsert
pub async fn update_song(db: &SqlitePool, id: Uuid, song: &NewSong) -> Result<Song> {
    song.validate()?;
    let (rich_text, rich_url) = rich_columns(song);

    let mut tx = db.begin().await?;

    let updated = sqlx::query(
        r#"
        UPDATE songs
        SET slug = ?, title = ?, pdf_url = ?, rich_lyrics_text = ?, rich_lyrics_url = ?,
            updated_at = CURRENT_TIMESTAMP
        WHERE guid = ?
        "#,
    )
    .bind(song.slug.trim())
    .bind(song.title.trim())
    .bind(song.pdf_url.as_deref())
    .bind(rich_text)
    .bind(rich_url)
    .bind(id.to_string())
    .execute(&mut *tx)
    .await
    .map_err(|e| map_conflict(e, &song.slug))?;

    if updated.rows_affected() == 0 {
        return Err(Error::NotFound(format!("song {}", id)));
    }

    delete_children(&mut tx, id).await?;
    insert_children(&mut tx, id, song).await?;
    tx.commit().await?;

    info!("Updated song '{}' ({})", song.slug, id);
    get_song(db, &id.to_string()).await
}

/// Delete a song and all of its children
pub async fn delete_song(db: &SqlitePool, id: Uuid) -> Result<()> {
    let mut tx = db.begin().await?;
    delete_children(&mut tx, id).await?;

    let deleted = sqlx::query("DELETE FROM songs WHERE guid = ?")
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

    if deleted.rows_affected() == 0 {
        return Err(Error::NotFound(format!("song {}", id)));
    }

    tx.commit().await?;
    info!("Deleted song {}", id);
    Ok(())
}

async fn delete_children(conn: &mut SqliteConnection, song_id: Uuid) -> Result<()> {
    for table in ["tracks", "lyrics", "chapters"] {
        let sql = format!("DELETE FROM {} WHERE song_id = ?", table);
        sqlx::query(&sql)
            .bind(song_id.to_string())
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn insert_children(conn: &mut SqliteConnection, song_id: Uuid, song: &NewSong) -> Result<()> {
    for (position, track) in song.tracks.iter().enumerate() {
        sqlx::query("INSERT INTO tracks (guid, song_id, voice_part, url, position) VALUES (?, ?, ?, ?, ?)")
            .bind(Uuid::new_v4().to_string())
            .bind(song_id.to_string())
            .bind(track.voice_part.as_str())
            .bind(track.url.trim())
            .bind(position as i64)
            .execute(&mut *conn)
            .await?;
    }

    for line in &song.lyrics {
        sqlx::query("INSERT INTO lyrics (guid, song_id, text, start_time, end_time) VALUES (?, ?, ?, ?, ?)")
            .bind(Uuid::new_v4().to_string())
            .bind(song_id.to_string())
            .bind(&line.text)
            .bind(line.start)
            .bind(line.end)
            .execute(&mut *conn)
            .await?;
    }

    for chapter in &song.chapters {
        sqlx::query("INSERT INTO chapters (guid, song_id, title, start_time, kind) VALUES (?, ?, ?, ?, ?)")
            .bind(Uuid::new_v4().to_string())
            .bind(song_id.to_string())
            .bind(&chapter.title)
            .bind(chapter.start)
            .bind(chapter.kind.as_str())
            .execute(&mut *conn)
            .await?;
    }

    debug!(
        "Inserted {} tracks, {} lyric lines, {} chapters for song {}",
        song.tracks.len(),
        song.lyrics.len(),
        song.chapters.len(),
        song_id
    );
    Ok(())
}

fn rich_columns(song: &NewSong) -> (Option<String>, Option<String>) {
    match &song.rich_lyrics {
        Some(RichLyricSource::Inline(text)) => (Some(text.clone()), None),
        Some(RichLyricSource::Url(url)) => (None, Some(url.clone())),
        None => (None, None),
    }
}

fn parse_guid(row: &SqliteRow, column: &str) -> Result<Uuid> {
    let raw: String = row.get(column);
    Uuid::parse_str(&raw).map_err(|e| Error::Internal(format!("bad {} '{}': {}", column, raw, e)))
}

fn map_conflict(e: sqlx::Error, slug: &str) -> Error {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_unique_violation() {
            return Error::Conflict(format!("slug '{}' is already in use", slug.trim()));
        }
    }
    Error::Database(e)
}
