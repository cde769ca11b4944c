use askama_axum::Template;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
    Form,
};
use axum_extra::extract::{cookie::Cookie, CookieJar};
use serde::Deserialize;

use crate::{
    db::{self, Flash},
    AppState, Error,
};

pub const SESSION_COOKIE: &str = "gm_token";

/// GM username resolved by the session middleware, available as a request
/// extension to every handler behind it.
#[derive(Debug, Clone)]
pub struct Gm(pub String);

pub async fn middleware(
    State(state): State<AppState>,
    cookies: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = cookies.get(SESSION_COOKIE) else {
        return Redirect::to("/gm/login").into_response();
    };
    match db::session_user(&state.db, token.value()).await {
        Ok(Some(username)) => {
            request.extensions_mut().insert(Gm(username));
            next.run(request).await
        }
        Ok(None) => Redirect::to("/gm/login").into_response(),
        Err(source) => source.into_response(),
    }
}

#[derive(Template)]
#[template(path = "gm_login.hbs", ext = "html", escape = "html")]
pub struct LoginPage {
    error: String,
}

pub async fn login_page() -> LoginPage {
    LoginPage {
        error: String::new(),
    }
}

#[derive(Deserialize)]
pub struct LoginForm {
    username: String,
    password: String,
}

pub async fn login(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> Result<Response, Error> {
    let known = state
        .gm_accounts
        .iter()
        .any(|account| account.username == form.username && account.password == form.password);
    if !known {
        info!(username = %form.username, "rejected GM login");
        return Ok(LoginPage {
            error: "Invalid username or password.".to_owned(),
        }
        .into_response());
    }
    let token = crate::randstring(64);
    db::create_session(&state.db, &token, &form.username).await?;
    info!(username = %form.username, "GM signed in");
    let mut cookie = Cookie::new(SESSION_COOKIE, token);
    cookie.set_path("/");
    cookie.set_http_only(true);
    let jar = CookieJar::new().add(cookie);
    Ok((jar, Redirect::to("/gm")).into_response())
}

pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), Error> {
    if let Some(token) = jar.get(SESSION_COOKIE) {
        db::delete_session(&state.db, token.value()).await?;
        info!("GM signed out");
    }
    let mut removal = Cookie::new(SESSION_COOKIE, "");
    removal.set_path("/");
    Ok((jar.remove(removal), Redirect::to("/gm/login")))
}

/// Store a notice on the caller's session for the next dashboard render.
/// Flash is decoration, so failures are logged and swallowed.
pub async fn flash(state: &AppState, cookies: &CookieJar, flash: Flash) {
    let Some(token) = cookies.get(SESSION_COOKIE) else {
        return;
    };
    if let Err(source) = db::set_flash(&state.db, token.value(), &flash).await {
        warn!(%source, "failed to store flash message");
    }
}

pub async fn take_flash(state: &AppState, cookies: &CookieJar) -> Option<Flash> {
    let token = cookies.get(SESSION_COOKIE)?;
    match db::take_flash(&state.db, token.value()).await {
        Ok(flash) => flash,
        Err(source) => {
            warn!(%source, "failed to take flash message");
            None
        }
    }
}
