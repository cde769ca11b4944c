use askama_axum::Template;
use axum::{
    extract::{Multipart, State},
    response::{IntoResponse, Response},
};

use crate::{
    db::{self, NewSubmission, ProofKind},
    ingest::{allowed_upload, Bucket, RawUpload},
    AppState, Error,
};

const REQUIRED_IMAGES: [(&str, &str, Bucket); 4] = [
    ("prereg_1", "pre-registration screenshot #1", Bucket::Prereg),
    ("prereg_2", "pre-registration screenshot #2", Bucket::Prereg),
    ("discord_1", "Discord promo screenshot #1", Bucket::Discord),
    ("discord_2", "Discord promo screenshot #2", Bucket::Discord),
];

#[derive(Template)]
#[template(path = "index.hbs", ext = "html", escape = "html")]
pub struct Index {
    error: String,
}

pub async fn index() -> Index {
    Index {
        error: String::new(),
    }
}

#[derive(Template)]
#[template(path = "proofs.hbs", ext = "html", escape = "html")]
pub struct ProofPage {
    title: &'static str,
    blurb: &'static str,
    action: &'static str,
    field: &'static str,
    error: String,
}

impl ProofPage {
    fn new(kind: ProofKind, error: String) -> Self {
        match kind {
            ProofKind::Tweet => Self {
                title: "Daily tweet check-in",
                blurb: "Upload today's tweet screenshots for your game id. \
                        Every image becomes its own entry.",
                action: "/daily_upload",
                field: proof_field(ProofKind::Tweet),
                error,
            },
            ProofKind::Like => Self {
                title: "Discord likes check-in",
                blurb: "Upload screenshots of your Discord likes for your game id. \
                        Every image becomes its own entry.",
                action: "/likes_upload",
                field: proof_field(ProofKind::Like),
                error,
            },
        }
    }
}

pub async fn daily() -> ProofPage {
    ProofPage::new(ProofKind::Tweet, String::new())
}

pub async fn likes() -> ProofPage {
    ProofPage::new(ProofKind::Like, String::new())
}

#[derive(Template)]
#[template(path = "success.hbs", ext = "html", escape = "html")]
pub struct Success {
    heading: &'static str,
    game_id: String,
    count: usize,
}

/// Text fields and file fields of one multipart form, pulled off the wire in
/// order. Files with blank filenames count as "field left empty".
struct UploadForm {
    texts: Vec<(String, String)>,
    files: Vec<(String, RawUpload)>,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> Result<Self, Error> {
        let mut texts = Vec::new();
        let mut files = Vec::new();
        while let Some(field) = multipart.next_field().await? {
            let Some(name) = field.name().map(ToOwned::to_owned) else {
                continue;
            };
            if let Some(filename) = field.file_name().map(ToOwned::to_owned) {
                let content_type = field.content_type().map(ToOwned::to_owned);
                let bytes = field.bytes().await?;
                files.push((
                    name,
                    RawUpload {
                        filename,
                        content_type,
                        bytes,
                    },
                ));
            } else {
                texts.push((name, field.text().await?));
            }
        }
        Ok(Self { texts, files })
    }

    fn text(&self, name: &str) -> &str {
        self.texts
            .iter()
            .find(|(key, _)| key == name)
            .map_or("", |(_, value)| value.trim())
    }

    fn take_files(&mut self, name: &str) -> Vec<RawUpload> {
        let mut taken = Vec::new();
        let mut index = 0;
        while index < self.files.len() {
            if self.files[index].0 == name && !self.files[index].1.filename.trim().is_empty() {
                taken.push(self.files.remove(index).1);
            } else {
                index += 1;
            }
        }
        taken
    }

    fn take_file(&mut self, name: &str) -> Option<RawUpload> {
        self.take_files(name).into_iter().next()
    }
}

pub async fn submit(State(state): State<AppState>, multipart: Multipart) -> Result<Response, Error> {
    let mut form = UploadForm::read(multipart).await?;
    let game_id = form.text("game_id").to_owned();
    if game_id.is_empty() {
        return Ok(index_error("Game ID is required."));
    }

    // Gate everything before staging anything, so a bad file costs no disk.
    let mut pending = Vec::with_capacity(REQUIRED_IMAGES.len());
    for (field, label, bucket) in REQUIRED_IMAGES {
        let Some(upload) = form.take_file(field) else {
            return Ok(index_error(format!("Please attach the {label}.")));
        };
        if !allowed_upload(&upload.filename, upload.content_type.as_deref()) {
            return Ok(index_error(format!("The {label} must be an image file.")));
        }
        pending.push((upload, bucket));
    }

    let mut paths = Vec::with_capacity(pending.len());
    for (upload, bucket) in pending {
        // take_file dropped blank filenames already, so ingest yields a path
        // for every required image.
        if let Some(ingested) = state.images.ingest(upload, bucket).await? {
            paths.push(ingested.into_relative_path());
        }
    }
    let [prereg_1, prereg_2, discord_1, discord_2] = paths.as_slice() else {
        return Ok(index_error("One of the attached files was empty."));
    };

    let notes = form.text("notes");
    let new = NewSubmission {
        game_id: &game_id,
        prereg_1,
        prereg_2,
        discord_1,
        discord_2,
        notes: (!notes.is_empty()).then_some(notes),
    };
    let id = db::insert_submission(&state.db, &new).await?;
    info!(id, game_id = %game_id, "recorded campaign submission");
    Ok(Success {
        heading: "Submission received",
        game_id,
        count: paths.len(),
    }
    .into_response())
}

pub async fn daily_upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, Error> {
    proof_upload(state, ProofKind::Tweet, multipart).await
}

pub async fn likes_upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, Error> {
    proof_upload(state, ProofKind::Like, multipart).await
}

async fn proof_upload(
    state: AppState,
    kind: ProofKind,
    multipart: Multipart,
) -> Result<Response, Error> {
    let mut form = UploadForm::read(multipart).await?;
    let game_id = form.text("game_id").to_owned();
    if game_id.is_empty() {
        return Ok(ProofPage::new(kind, "Game ID is required.".to_owned()).into_response());
    }
    let uploads = form.take_files(proof_field(kind));
    if uploads.is_empty() {
        return Ok(
            ProofPage::new(kind, "Attach at least one screenshot.".to_owned()).into_response(),
        );
    }
    for upload in &uploads {
        if !allowed_upload(&upload.filename, upload.content_type.as_deref()) {
            return Ok(ProofPage::new(
                kind,
                format!("{} is not an image file.", upload.filename),
            )
            .into_response());
        }
    }

    let notes = form.text("notes").to_owned();
    let mut paths = Vec::with_capacity(uploads.len());
    for upload in uploads {
        if let Some(ingested) = state.images.ingest(upload, proof_bucket(kind)).await? {
            paths.push(ingested.into_relative_path());
        }
    }
    for path in &paths {
        db::insert_proof(
            &state.db,
            kind,
            &game_id,
            path,
            (!notes.is_empty()).then_some(notes.as_str()),
        )
        .await?;
    }
    info!(
        count = paths.len(),
        game_id = %game_id,
        table = kind.table(),
        "recorded proof uploads"
    );
    Ok(Success {
        heading: match kind {
            ProofKind::Tweet => "Daily tweets received",
            ProofKind::Like => "Discord likes received",
        },
        game_id,
        count: paths.len(),
    }
    .into_response())
}

const fn proof_field(kind: ProofKind) -> &'static str {
    match kind {
        ProofKind::Tweet => "tweet_images",
        ProofKind::Like => "like_images",
    }
}

const fn proof_bucket(kind: ProofKind) -> Bucket {
    match kind {
        ProofKind::Tweet => Bucket::Tweets,
        ProofKind::Like => Bucket::DcLikes,
    }
}

fn index_error(message: impl Into<String>) -> Response {
    Index {
        error: message.into(),
    }
    .into_response()
}

#[cfg(test)]
mod tests {
    use axum::body::Bytes;

    use super::*;

    fn file(name: &str, filename: &str) -> (String, RawUpload) {
        (
            name.to_owned(),
            RawUpload {
                filename: filename.to_owned(),
                content_type: Some("image/png".to_owned()),
                bytes: Bytes::from_static(b"fake"),
            },
        )
    }

    #[test]
    fn text_lookup_trims_and_defaults() {
        let form = UploadForm {
            texts: vec![("game_id".to_owned(), "  g-42  ".to_owned())],
            files: Vec::new(),
        };
        assert_eq!(form.text("game_id"), "g-42");
        assert_eq!(form.text("notes"), "");
    }

    #[test]
    fn take_files_skips_blank_filenames_and_other_fields() {
        let mut form = UploadForm {
            texts: Vec::new(),
            files: vec![
                file("tweet_images", "a.png"),
                file("tweet_images", "   "),
                file("like_images", "b.png"),
                file("tweet_images", "c.png"),
            ],
        };
        let taken = form.take_files("tweet_images");
        assert_eq!(
            taken.iter().map(|u| u.filename.as_str()).collect::<Vec<_>>(),
            vec!["a.png", "c.png"]
        );
        // The blank entry stays behind, the other field is untouched.
        assert_eq!(form.files.len(), 2);
        assert!(form.take_file("like_images").is_some());
        assert!(form.take_file("like_images").is_none());
    }

    // A required image slot holding only a blank-named file part counts as
    // missing here, before anything reaches the pipeline.
    #[test]
    fn blank_required_file_counts_as_missing() {
        let mut form = UploadForm {
            texts: Vec::new(),
            files: vec![file("prereg_1", "   ")],
        };
        assert!(form.take_file("prereg_1").is_none());
    }
}
