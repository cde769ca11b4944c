use std::{str::FromStr, sync::Arc};

use sqlx::SqlitePool;

use crate::{db, ingest::ImageStore};

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub images: Arc<ImageStore>,
    pub gm_accounts: Arc<[GmAccount]>,
    pub max_content_bytes: usize,
}

/// One staff login. Credentials are plain env-sourced strings compared
/// verbatim; accounts whose password is unset never exist.
pub struct GmAccount {
    pub username: String,
    pub password: String,
}

impl AppState {
    pub async fn new() -> Self {
        let db = db::connect(&var_or("DATABASE_URL", "sqlite://data.db"))
            .await
            .expect("Failed to open the database");
        let images = ImageStore::new(
            var_or("UPLOAD_FOLDER", "uploads"),
            parse_var_or("MAX_IMG_LONG", 1920),
            parse_var_or("JPEG_QUALITY", 85),
        )
        .expect("Failed to prepare the upload folder");
        let max_content_mb: usize = parse_var_or("MAX_CONTENT_MB", 30);
        Self {
            db,
            images: Arc::new(images),
            gm_accounts: gm_accounts().into(),
            max_content_bytes: max_content_mb * 1024 * 1024,
        }
    }
}

fn gm_accounts() -> Vec<GmAccount> {
    let accounts: Vec<GmAccount> = [("ADMIN1", "gm1"), ("ADMIN2", "gm2")]
        .into_iter()
        .filter_map(|(prefix, default_username)| {
            let password = std::env::var(format!("{prefix}_PASSWORD")).ok()?;
            Some(GmAccount {
                username: var_or(&format!("{prefix}_USERNAME"), default_username),
                password,
            })
        })
        .collect();
    assert!(
        !accounts.is_empty(),
        "No GM accounts configured, set ADMIN1_PASSWORD at least"
    );
    accounts
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_owned())
}

fn parse_var_or<T>(name: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(name).map_or(default, |raw| {
        raw.parse()
            .unwrap_or_else(|_| panic!("{name} must be a valid {}", std::any::type_name::<T>()))
    })
}
