use std::str::FromStr;

use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    FromRow, QueryBuilder, Sqlite, SqlitePool,
};
use time::{macros::format_description, Date, OffsetDateTime};

use crate::Error;

pub async fn connect(url: &str) -> Result<SqlitePool, Error> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    sqlx::migrate!().run(&pool).await?;
    Ok(pool)
}

/// One first-time campaign entry with its four stored image paths.
#[derive(Debug, Clone, FromRow)]
pub struct Submission {
    pub id: i64,
    pub game_id: String,
    pub prereg_1: String,
    pub prereg_2: String,
    pub discord_1: String,
    pub discord_2: String,
    pub notes: Option<String>,
    pub created_at: OffsetDateTime,
    pub is_granted: bool,
    pub granted_by: Option<String>,
    pub granted_at: Option<OffsetDateTime>,
}

impl Submission {
    pub fn image_paths(&self) -> [&str; 4] {
        [
            &self.prereg_1,
            &self.prereg_2,
            &self.discord_1,
            &self.discord_2,
        ]
    }

    pub fn created(&self) -> String {
        fmt_stamp(self.created_at)
    }

    pub fn granted(&self) -> String {
        self.granted_at.map(fmt_stamp).unwrap_or_default()
    }

    pub fn reviewer(&self) -> &str {
        self.granted_by.as_deref().unwrap_or("")
    }

    pub fn notes_text(&self) -> &str {
        self.notes.as_deref().unwrap_or("")
    }
}

pub struct NewSubmission<'a> {
    pub game_id: &'a str,
    pub prereg_1: &'a str,
    pub prereg_2: &'a str,
    pub discord_1: &'a str,
    pub discord_2: &'a str,
    pub notes: Option<&'a str>,
}

/// The two per-image proof tables share one row shape; which table a query
/// touches is data, not a second copy of the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofKind {
    Tweet,
    Like,
}

impl ProofKind {
    pub const fn table(self) -> &'static str {
        match self {
            Self::Tweet => "daily_tweets",
            Self::Like => "dc_likes",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Tweet => "Daily tweet",
            Self::Like => "Discord like",
        }
    }
}

/// One uploaded proof image in either per-image table.
#[derive(Debug, Clone, FromRow)]
pub struct ProofShot {
    pub id: i64,
    pub game_id: String,
    pub image_path: String,
    pub notes: Option<String>,
    pub created_at: OffsetDateTime,
    pub is_granted: bool,
    pub granted_by: Option<String>,
    pub granted_at: Option<OffsetDateTime>,
}

impl ProofShot {
    pub fn created(&self) -> String {
        fmt_stamp(self.created_at)
    }

    pub fn granted(&self) -> String {
        self.granted_at.map(fmt_stamp).unwrap_or_default()
    }

    pub fn reviewer(&self) -> &str {
        self.granted_by.as_deref().unwrap_or("")
    }

    pub fn notes_text(&self) -> &str {
        self.notes.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantStatus {
    Granted,
    Pending,
}

/// Shared dashboard filter. Unset fields do not constrain the listing.
#[derive(Debug, Default, Clone)]
pub struct RecordFilter {
    pub game_id: Option<String>,
    pub start: Option<Date>,
    pub end: Option<Date>,
    pub status: Option<GrantStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchTarget {
    Submissions,
    Proofs(ProofKind),
}

impl BatchTarget {
    const fn table(self) -> &'static str {
        match self {
            Self::Submissions => "submissions",
            Self::Proofs(kind) => kind.table(),
        }
    }
}

/// One pending dashboard notice, stored on the GM session and cleared on read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flash {
    pub class: String,
    pub text: String,
}

impl Flash {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            class: "ok".to_owned(),
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            class: "error".to_owned(),
            text: text.into(),
        }
    }
}

pub async fn insert_submission(db: &SqlitePool, new: &NewSubmission<'_>) -> Result<i64, Error> {
    let id = sqlx::query_scalar::<Sqlite, i64>(
        "INSERT INTO submissions (game_id, prereg_1, prereg_2, discord_1, discord_2, notes, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) RETURNING id",
    )
    .bind(new.game_id)
    .bind(new.prereg_1)
    .bind(new.prereg_2)
    .bind(new.discord_1)
    .bind(new.discord_2)
    .bind(new.notes)
    .bind(OffsetDateTime::now_utc().unix_timestamp())
    .fetch_one(db)
    .await?;
    Ok(id)
}

pub async fn insert_proof(
    db: &SqlitePool,
    kind: ProofKind,
    game_id: &str,
    image_path: &str,
    notes: Option<&str>,
) -> Result<i64, Error> {
    let sql = format!(
        "INSERT INTO {} (game_id, image_path, notes, created_at) VALUES (?1, ?2, ?3, ?4) RETURNING id",
        kind.table()
    );
    let id = sqlx::query_scalar::<Sqlite, i64>(&sql)
        .bind(game_id)
        .bind(image_path)
        .bind(notes)
        .bind(OffsetDateTime::now_utc().unix_timestamp())
        .fetch_one(db)
        .await?;
    Ok(id)
}

pub async fn list_submissions(
    db: &SqlitePool,
    filter: &RecordFilter,
) -> Result<Vec<Submission>, Error> {
    let mut builder = QueryBuilder::new("SELECT * FROM submissions WHERE 1=1");
    push_filters(&mut builder, filter);
    builder.push(" ORDER BY created_at DESC, id DESC");
    let rows = builder
        .build_query_as::<Submission>()
        .fetch_all(db)
        .await?;
    Ok(rows)
}

pub async fn list_proofs(
    db: &SqlitePool,
    kind: ProofKind,
    filter: &RecordFilter,
) -> Result<Vec<ProofShot>, Error> {
    let mut builder = QueryBuilder::new(format!("SELECT * FROM {} WHERE 1=1", kind.table()));
    push_filters(&mut builder, filter);
    builder.push(" ORDER BY created_at DESC, id DESC");
    let rows = builder.build_query_as::<ProofShot>().fetch_all(db).await?;
    Ok(rows)
}

fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, filter: &RecordFilter) {
    if let Some(game_id) = &filter.game_id {
        builder.push(" AND game_id LIKE ");
        builder.push_bind(format!("%{game_id}%"));
    }
    if let Some(start) = filter.start {
        builder.push(" AND created_at >= ");
        builder.push_bind(start.midnight().assume_utc().unix_timestamp());
    }
    if let Some(end) = filter.end {
        // Inclusive through the last second of the end day.
        builder.push(" AND created_at <= ");
        builder.push_bind(end.midnight().assume_utc().unix_timestamp() + 86_399);
    }
    if let Some(status) = filter.status {
        builder.push(" AND is_granted = ");
        builder.push_bind(status == GrantStatus::Granted);
    }
}

pub async fn get_submission(db: &SqlitePool, id: i64) -> Result<Option<Submission>, Error> {
    let row = sqlx::query_as::<Sqlite, Submission>("SELECT * FROM submissions WHERE id = ?1")
        .bind(id)
        .fetch_optional(db)
        .await?;
    Ok(row)
}

/// Flip the granted flag and stamp who toggled it and when, both directions.
/// Returns the new state, or `None` for an unknown id.
pub async fn toggle_submission(
    db: &SqlitePool,
    id: i64,
    reviewer: &str,
) -> Result<Option<bool>, Error> {
    let state = sqlx::query_scalar::<Sqlite, bool>(
        "UPDATE submissions SET is_granted = NOT is_granted, granted_by = ?2, granted_at = ?3
         WHERE id = ?1 RETURNING is_granted",
    )
    .bind(id)
    .bind(reviewer)
    .bind(OffsetDateTime::now_utc().unix_timestamp())
    .fetch_optional(db)
    .await?;
    Ok(state)
}

pub async fn toggle_proof(
    db: &SqlitePool,
    kind: ProofKind,
    id: i64,
    reviewer: &str,
) -> Result<Option<bool>, Error> {
    let sql = format!(
        "UPDATE {} SET is_granted = NOT is_granted, granted_by = ?2, granted_at = ?3
         WHERE id = ?1 RETURNING is_granted",
        kind.table()
    );
    let state = sqlx::query_scalar::<Sqlite, bool>(&sql)
        .bind(id)
        .bind(reviewer)
        .bind(OffsetDateTime::now_utc().unix_timestamp())
        .fetch_optional(db)
        .await?;
    Ok(state)
}

/// Grant every still-pending row among `ids`. Rows already granted keep their
/// original reviewer stamp. Returns how many rows changed.
pub async fn batch_grant(
    db: &SqlitePool,
    target: BatchTarget,
    ids: &[i64],
    reviewer: &str,
) -> Result<u64, Error> {
    if ids.is_empty() {
        return Ok(0);
    }
    let mut builder = QueryBuilder::new(format!(
        "UPDATE {} SET is_granted = 1, granted_by = ",
        target.table()
    ));
    builder.push_bind(reviewer);
    builder.push(", granted_at = ");
    builder.push_bind(OffsetDateTime::now_utc().unix_timestamp());
    builder.push(" WHERE is_granted = 0 AND id IN (");
    let mut ids_list = builder.separated(", ");
    for id in ids {
        ids_list.push_bind(*id);
    }
    ids_list.push_unseparated(")");
    let result = builder.build().execute(db).await?;
    Ok(result.rows_affected())
}

/// Delete a submission, handing back the row so callers can clean up its
/// stored files.
pub async fn delete_submission(db: &SqlitePool, id: i64) -> Result<Option<Submission>, Error> {
    let row =
        sqlx::query_as::<Sqlite, Submission>("DELETE FROM submissions WHERE id = ?1 RETURNING *")
            .bind(id)
            .fetch_optional(db)
            .await?;
    Ok(row)
}

pub async fn delete_proof(
    db: &SqlitePool,
    kind: ProofKind,
    id: i64,
) -> Result<Option<ProofShot>, Error> {
    let sql = format!("DELETE FROM {} WHERE id = ?1 RETURNING *", kind.table());
    let row = sqlx::query_as::<Sqlite, ProofShot>(&sql)
        .bind(id)
        .fetch_optional(db)
        .await?;
    Ok(row)
}

pub async fn create_session(db: &SqlitePool, token: &str, username: &str) -> Result<(), Error> {
    sqlx::query("INSERT INTO gm_sessions (token, username, created_at) VALUES (?1, ?2, ?3)")
        .bind(token)
        .bind(username)
        .bind(OffsetDateTime::now_utc().unix_timestamp())
        .execute(db)
        .await?;
    Ok(())
}

pub async fn session_user(db: &SqlitePool, token: &str) -> Result<Option<String>, Error> {
    let username =
        sqlx::query_scalar::<Sqlite, String>("SELECT username FROM gm_sessions WHERE token = ?1")
            .bind(token)
            .fetch_optional(db)
            .await?;
    Ok(username)
}

pub async fn delete_session(db: &SqlitePool, token: &str) -> Result<(), Error> {
    sqlx::query("DELETE FROM gm_sessions WHERE token = ?1")
        .bind(token)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn set_flash(db: &SqlitePool, token: &str, flash: &Flash) -> Result<(), Error> {
    sqlx::query("UPDATE gm_sessions SET flash_kind = ?2, flash_text = ?3 WHERE token = ?1")
        .bind(token)
        .bind(&flash.class)
        .bind(&flash.text)
        .execute(db)
        .await?;
    Ok(())
}

/// Read and clear the session's pending notice in one call.
pub async fn take_flash(db: &SqlitePool, token: &str) -> Result<Option<Flash>, Error> {
    let row = sqlx::query_as::<Sqlite, (Option<String>, Option<String>)>(
        "SELECT flash_kind, flash_text FROM gm_sessions WHERE token = ?1",
    )
    .bind(token)
    .fetch_optional(db)
    .await?;
    let Some((Some(class), Some(text))) = row else {
        return Ok(None);
    };
    sqlx::query("UPDATE gm_sessions SET flash_kind = NULL, flash_text = NULL WHERE token = ?1")
        .bind(token)
        .execute(db)
        .await?;
    Ok(Some(Flash { class, text }))
}

/// Parse a `YYYY-MM-DD` filter input; anything else means "no bound".
pub fn parse_date(raw: &str) -> Option<Date> {
    Date::parse(raw.trim(), format_description!("[year]-[month]-[day]")).ok()
}

fn fmt_stamp(at: OffsetDateTime) -> String {
    at.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]"
    ))
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!().run(&pool).await.unwrap();
        pool
    }

    fn entry(game_id: &str) -> NewSubmission<'_> {
        NewSubmission {
            game_id,
            prereg_1: "prereg/a.jpg",
            prereg_2: "prereg/b.jpg",
            discord_1: "discord/c.jpg",
            discord_2: "discord/d.jpg",
            notes: None,
        }
    }

    #[tokio::test]
    async fn submissions_list_newest_first() {
        let db = pool().await;
        let first = insert_submission(&db, &entry("alpha")).await.unwrap();
        let second = insert_submission(&db, &entry("beta")).await.unwrap();
        let rows = list_submissions(&db, &RecordFilter::default()).await.unwrap();
        assert_eq!(
            rows.iter().map(|row| row.id).collect::<Vec<_>>(),
            vec![second, first]
        );
        assert!(!rows[0].is_granted);
        assert_eq!(rows[0].image_paths()[2], "discord/c.jpg");
    }

    #[tokio::test]
    async fn game_id_filter_matches_substrings() {
        let db = pool().await;
        insert_submission(&db, &entry("alpha-123")).await.unwrap();
        insert_submission(&db, &entry("beta-9")).await.unwrap();
        let filter = RecordFilter {
            game_id: Some("pha-1".to_owned()),
            ..RecordFilter::default()
        };
        let rows = list_submissions(&db, &filter).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].game_id, "alpha-123");
    }

    #[tokio::test]
    async fn status_filter_splits_granted_from_pending() {
        let db = pool().await;
        let granted_id = insert_submission(&db, &entry("alpha")).await.unwrap();
        insert_submission(&db, &entry("beta")).await.unwrap();
        toggle_submission(&db, granted_id, "gm1").await.unwrap();

        let granted = RecordFilter {
            status: Some(GrantStatus::Granted),
            ..RecordFilter::default()
        };
        let pending = RecordFilter {
            status: Some(GrantStatus::Pending),
            ..RecordFilter::default()
        };
        let granted_rows = list_submissions(&db, &granted).await.unwrap();
        let pending_rows = list_submissions(&db, &pending).await.unwrap();
        assert_eq!(granted_rows.len(), 1);
        assert_eq!(granted_rows[0].id, granted_id);
        assert_eq!(pending_rows.len(), 1);
        assert_eq!(pending_rows[0].game_id, "beta");
    }

    #[tokio::test]
    async fn date_bounds_are_inclusive() {
        let db = pool().await;
        insert_submission(&db, &entry("alpha")).await.unwrap();
        let today = OffsetDateTime::now_utc().date();
        let yesterday = today.previous_day().unwrap();

        let covering = RecordFilter {
            start: Some(today),
            end: Some(today),
            ..RecordFilter::default()
        };
        assert_eq!(list_submissions(&db, &covering).await.unwrap().len(), 1);

        let stale = RecordFilter {
            end: Some(yesterday),
            ..RecordFilter::default()
        };
        assert!(list_submissions(&db, &stale).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn toggle_stamps_reviewer_both_directions() {
        let db = pool().await;
        let id = insert_submission(&db, &entry("alpha")).await.unwrap();
        assert_eq!(toggle_submission(&db, id, "gm1").await.unwrap(), Some(true));
        let row = get_submission(&db, id).await.unwrap().unwrap();
        assert!(row.is_granted);
        assert_eq!(row.granted_by.as_deref(), Some("gm1"));
        assert!(row.granted_at.is_some());

        assert_eq!(toggle_submission(&db, id, "gm2").await.unwrap(), Some(false));
        let row = get_submission(&db, id).await.unwrap().unwrap();
        assert!(!row.is_granted);
        assert_eq!(row.granted_by.as_deref(), Some("gm2"));

        assert_eq!(toggle_submission(&db, 9999, "gm1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn batch_grant_skips_already_granted_rows() {
        let db = pool().await;
        let a = insert_submission(&db, &entry("a")).await.unwrap();
        let b = insert_submission(&db, &entry("b")).await.unwrap();
        let c = insert_submission(&db, &entry("c")).await.unwrap();
        toggle_submission(&db, b, "gm1").await.unwrap();

        let changed = batch_grant(&db, BatchTarget::Submissions, &[a, b, c], "gm2")
            .await
            .unwrap();
        assert_eq!(changed, 2);
        for id in [a, b, c] {
            assert!(get_submission(&db, id).await.unwrap().unwrap().is_granted);
        }
        // The row granted beforehand keeps its original reviewer.
        let row = get_submission(&db, b).await.unwrap().unwrap();
        assert_eq!(row.granted_by.as_deref(), Some("gm1"));

        assert_eq!(
            batch_grant(&db, BatchTarget::Submissions, &[], "gm2")
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn proof_tables_stay_independent() {
        let db = pool().await;
        let tweet = insert_proof(&db, ProofKind::Tweet, "alpha", "tweets/t.jpg", Some("day 1"))
            .await
            .unwrap();
        insert_proof(&db, ProofKind::Like, "alpha", "dc_likes/l.jpg", None)
            .await
            .unwrap();

        let tweets = list_proofs(&db, ProofKind::Tweet, &RecordFilter::default())
            .await
            .unwrap();
        let likes = list_proofs(&db, ProofKind::Like, &RecordFilter::default())
            .await
            .unwrap();
        assert_eq!(tweets.len(), 1);
        assert_eq!(tweets[0].notes_text(), "day 1");
        assert_eq!(likes.len(), 1);

        let deleted = delete_proof(&db, ProofKind::Tweet, tweet).await.unwrap();
        assert_eq!(deleted.unwrap().image_path, "tweets/t.jpg");
        assert!(list_proofs(&db, ProofKind::Tweet, &RecordFilter::default())
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            list_proofs(&db, ProofKind::Like, &RecordFilter::default())
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn sessions_and_flash_round_trip() {
        let db = pool().await;
        create_session(&db, "tok", "gm1").await.unwrap();
        assert_eq!(session_user(&db, "tok").await.unwrap().as_deref(), Some("gm1"));
        assert_eq!(session_user(&db, "other").await.unwrap(), None);

        set_flash(&db, "tok", &Flash::ok("saved")).await.unwrap();
        let flash = take_flash(&db, "tok").await.unwrap().unwrap();
        assert_eq!(flash.class, "ok");
        assert_eq!(flash.text, "saved");
        assert_eq!(take_flash(&db, "tok").await.unwrap(), None);

        delete_session(&db, "tok").await.unwrap();
        assert_eq!(session_user(&db, "tok").await.unwrap(), None);
    }

    #[test]
    fn date_parsing_is_strict() {
        assert!(parse_date("2026-08-23").is_some());
        assert!(parse_date(" 2026-08-23 ").is_some());
        assert!(parse_date("23/08/2026").is_none());
        assert!(parse_date("2026-13-01").is_none());
        assert!(parse_date("").is_none());
    }
}
