use askama_axum::Template;
use axum::{
    extract::{Path, Query, RawQuery, State},
    response::Redirect,
    Extension,
};
use axum_extra::extract::{CookieJar, Form};
use serde::Deserialize;

use crate::{
    auth::{self, Gm},
    db::{self, BatchTarget, Flash, GrantStatus, ProofKind, ProofShot, RecordFilter, Submission},
    AppState, Error,
};

/// Dashboard filter inputs as they arrive; blanks mean "unfiltered".
#[derive(Debug, Default, Deserialize)]
pub struct DashboardQuery {
    #[serde(default)]
    q: String,
    #[serde(default)]
    start: String,
    #[serde(default)]
    end: String,
    #[serde(default)]
    status: String,
}

impl DashboardQuery {
    fn filter(&self) -> RecordFilter {
        let q = self.q.trim();
        RecordFilter {
            game_id: (!q.is_empty()).then(|| q.to_owned()),
            start: db::parse_date(&self.start),
            end: db::parse_date(&self.end),
            status: match self.status.as_str() {
                "granted" => Some(GrantStatus::Granted),
                "pending" => Some(GrantStatus::Pending),
                _ => None,
            },
        }
    }
}

#[derive(Template)]
#[template(path = "gm_dashboard.hbs", ext = "html", escape = "html")]
pub struct Dashboard {
    gm: String,
    q: String,
    start: String,
    end: String,
    status: String,
    qs: String,
    has_flash: bool,
    flash_class: String,
    flash_text: String,
    submissions: Vec<Submission>,
    tweets: Vec<ProofShot>,
    likes: Vec<ProofShot>,
}

pub async fn dashboard(
    State(state): State<AppState>,
    Extension(Gm(gm)): Extension<Gm>,
    Query(query): Query<DashboardQuery>,
    RawQuery(raw): RawQuery,
    cookies: CookieJar,
) -> Result<Dashboard, Error> {
    let filter = query.filter();
    let submissions = db::list_submissions(&state.db, &filter).await?;
    let tweets = db::list_proofs(&state.db, ProofKind::Tweet, &filter).await?;
    let likes = db::list_proofs(&state.db, ProofKind::Like, &filter).await?;
    let (has_flash, flash_class, flash_text) = match auth::take_flash(&state, &cookies).await {
        Some(flash) => (true, flash.class, flash.text),
        None => (false, String::new(), String::new()),
    };
    Ok(Dashboard {
        gm,
        q: query.q.trim().to_owned(),
        start: query.start,
        end: query.end,
        status: query.status,
        qs: raw.unwrap_or_default(),
        has_flash,
        flash_class,
        flash_text,
        submissions,
        tweets,
        likes,
    })
}

#[derive(Template)]
#[template(path = "gm_submission.hbs", ext = "html", escape = "html")]
pub struct SubmissionView {
    gm: String,
    submission: Submission,
}

pub async fn view_submission(
    State(state): State<AppState>,
    Extension(Gm(gm)): Extension<Gm>,
    Path(id): Path<i64>,
) -> Result<SubmissionView, Error> {
    let submission = db::get_submission(&state.db, id)
        .await?
        .ok_or(Error::NotFound)?;
    Ok(SubmissionView { gm, submission })
}

pub async fn mark_submission(
    State(state): State<AppState>,
    Extension(Gm(gm)): Extension<Gm>,
    Path(id): Path<i64>,
    RawQuery(raw): RawQuery,
    cookies: CookieJar,
) -> Result<Redirect, Error> {
    let flash = match db::toggle_submission(&state.db, id, &gm).await? {
        Some(true) => Flash::ok(format!("Submission #{id} marked granted.")),
        Some(false) => Flash::ok(format!("Submission #{id} marked pending.")),
        None => Flash::error(format!("Submission #{id} not found.")),
    };
    auth::flash(&state, &cookies, flash).await;
    Ok(back_to_dashboard(raw))
}

pub async fn mark_tweet(
    State(state): State<AppState>,
    Extension(Gm(gm)): Extension<Gm>,
    Path(id): Path<i64>,
    RawQuery(raw): RawQuery,
    cookies: CookieJar,
) -> Result<Redirect, Error> {
    mark_proof(state, gm, ProofKind::Tweet, id, raw, cookies).await
}

pub async fn mark_like(
    State(state): State<AppState>,
    Extension(Gm(gm)): Extension<Gm>,
    Path(id): Path<i64>,
    RawQuery(raw): RawQuery,
    cookies: CookieJar,
) -> Result<Redirect, Error> {
    mark_proof(state, gm, ProofKind::Like, id, raw, cookies).await
}

async fn mark_proof(
    state: AppState,
    gm: String,
    kind: ProofKind,
    id: i64,
    raw: Option<String>,
    cookies: CookieJar,
) -> Result<Redirect, Error> {
    let flash = match db::toggle_proof(&state.db, kind, id, &gm).await? {
        Some(true) => Flash::ok(format!("{} #{id} marked granted.", kind.label())),
        Some(false) => Flash::ok(format!("{} #{id} marked pending.", kind.label())),
        None => Flash::error(format!("{} #{id} not found.", kind.label())),
    };
    auth::flash(&state, &cookies, flash).await;
    Ok(back_to_dashboard(raw))
}

#[derive(Debug, Deserialize)]
pub struct BatchForm {
    table: String,
    #[serde(default)]
    ids: Vec<i64>,
}

pub async fn batch_mark(
    State(state): State<AppState>,
    Extension(Gm(gm)): Extension<Gm>,
    RawQuery(raw): RawQuery,
    cookies: CookieJar,
    Form(form): Form<BatchForm>,
) -> Result<Redirect, Error> {
    let target = match form.table.as_str() {
        "submission" => BatchTarget::Submissions,
        "tweet" => BatchTarget::Proofs(ProofKind::Tweet),
        "like" => BatchTarget::Proofs(ProofKind::Like),
        other => {
            warn!(table = %other, "batch mark against unknown table");
            auth::flash(&state, &cookies, Flash::error("Unknown batch target.")).await;
            return Ok(back_to_dashboard(raw));
        }
    };
    let granted = db::batch_grant(&state.db, target, &form.ids, &gm).await?;
    info!(count = granted, table = %form.table, "batch granted rows");
    auth::flash(
        &state,
        &cookies,
        Flash::ok(format!("Granted {granted} pending item(s).")),
    )
    .await;
    Ok(back_to_dashboard(raw))
}

pub async fn delete_submission(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    RawQuery(raw): RawQuery,
    cookies: CookieJar,
) -> Result<Redirect, Error> {
    let flash = match db::delete_submission(&state.db, id).await? {
        Some(row) => {
            for path in row.image_paths() {
                remove_stored(&state, path).await;
            }
            Flash::ok(format!("Submission #{id} deleted."))
        }
        None => Flash::error(format!("Submission #{id} not found.")),
    };
    auth::flash(&state, &cookies, flash).await;
    Ok(back_to_dashboard(raw))
}

pub async fn delete_tweet(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    RawQuery(raw): RawQuery,
    cookies: CookieJar,
) -> Result<Redirect, Error> {
    delete_proof_row(state, ProofKind::Tweet, id, raw, cookies).await
}

pub async fn delete_like(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    RawQuery(raw): RawQuery,
    cookies: CookieJar,
) -> Result<Redirect, Error> {
    delete_proof_row(state, ProofKind::Like, id, raw, cookies).await
}

async fn delete_proof_row(
    state: AppState,
    kind: ProofKind,
    id: i64,
    raw: Option<String>,
    cookies: CookieJar,
) -> Result<Redirect, Error> {
    let flash = match db::delete_proof(&state.db, kind, id).await? {
        Some(row) => {
            remove_stored(&state, &row.image_path).await;
            Flash::ok(format!("{} #{id} deleted.", kind.label()))
        }
        None => Flash::error(format!("{} #{id} not found.", kind.label())),
    };
    auth::flash(&state, &cookies, flash).await;
    Ok(back_to_dashboard(raw))
}

/// Stored files are advisory state once the row is gone; log and move on.
async fn remove_stored(state: &AppState, path: &str) {
    if let Err(source) = state.images.remove(path).await {
        warn!(%path, %source, "could not remove stored image");
    }
}

fn back_to_dashboard(raw: Option<String>) -> Redirect {
    match raw {
        Some(qs) if !qs.is_empty() => Redirect::to(&format!("/gm?{qs}")),
        _ => Redirect::to("/gm"),
    }
}
