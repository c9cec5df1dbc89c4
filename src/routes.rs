use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    response::{Html, IntoResponse, Redirect, Response},
    Form, Json,
};
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::Mutex;
use tower_sessions::Session;
use tracing::debug;
use uuid::Uuid;

use crate::activities::ListMessage;
use crate::client::ClientContext;
use crate::error::AppError;
use crate::models::{ActivityId, User};
use crate::navigation::Route;
use crate::page::compose_home;
use crate::AppState;

/// Key of the browser's client context id inside its cookie session.
pub const CLIENT_ID_KEY: &str = "client_id";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ActivityInput {
    pub title: String,
    pub description: String,
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct CredentialsInput {
    pub email: String,
    pub password: String,
}

async fn client_for(
    state: &AppState,
    session: &Session,
) -> Result<Arc<Mutex<ClientContext>>, AppError> {
    let id = match session.get::<Uuid>(CLIENT_ID_KEY).await? {
        Some(id) => id,
        None => {
            let id = Uuid::new_v4();
            session.insert(CLIENT_ID_KEY, id).await?;
            id
        }
    };
    Ok(state.clients.get_or_start(id).await)
}

fn see_other(route: Route) -> Response {
    Redirect::to(route.path()).into_response()
}

fn render(
    state: &AppState,
    ctx: &mut ClientContext,
    view: Route,
    user: Option<User>,
) -> Result<Response, AppError> {
    let session = ctx.store.current();
    let html = match view {
        Route::Root => {
            state
                .pages
                .home(&session, user.as_ref(), &mut ctx.add_form, &ctx.activities)?
        }
        Route::Login => state.pages.login(&session, &ctx.login_form)?,
        Route::SignUp => state.pages.signup(&session, &mut ctx.signup_form)?,
    };
    Ok(Html(html).into_response())
}

/// Common tail of every form submission. Re-fetching only ever happens on
/// a full load, so an in-place render shows the list from memory.
fn respond(state: &AppState, ctx: &mut ClientContext, view: Route) -> Result<Response, AppError> {
    ctx.sync(Instant::now());
    match ctx.after_submit() {
        Some(route) => Ok(see_other(route)),
        None => {
            let user = ctx.store.user();
            render(state, ctx, view, user)
        }
    }
}

/// Full load of the root view. Re-validates the user and re-fetches the list.
pub async fn home(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Response, AppError> {
    let client = client_for(&state, &session).await?;
    let mut guard = client.lock().await;
    let ctx = &mut *guard;

    ctx.navigator.visit(Route::Root);
    ctx.sync(Instant::now());
    let user = compose_home(ctx.remote.as_ref(), &mut ctx.activities).await;
    ctx.sync(Instant::now());

    if let Some(route) = ctx.navigator.take_pending() {
        return Ok(see_other(route));
    }
    // This load is the re-fetch any earlier submit asked for.
    ctx.refresh.take();
    render(&state, ctx, Route::Root, user)
}

async fn auth_page(state: &AppState, session: &Session, view: Route) -> Result<Response, AppError> {
    let client = client_for(state, session).await?;
    let mut guard = client.lock().await;
    let ctx = &mut *guard;

    ctx.navigator.visit(view);
    ctx.sync(Instant::now());
    if let Some(route) = ctx.navigator.take_pending() {
        return Ok(see_other(route));
    }
    render(state, ctx, view, None)
}

pub async fn login_page(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Response, AppError> {
    auth_page(&state, &session, Route::Login).await
}

pub async fn signup_page(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Response, AppError> {
    auth_page(&state, &session, Route::SignUp).await
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    session: Session,
    Form(input): Form<CredentialsInput>,
) -> Result<Response, AppError> {
    let client = client_for(&state, &session).await?;
    let mut guard = client.lock().await;
    let ctx = &mut *guard;

    ctx.navigator.visit(Route::Login);
    ctx.login_form.set_draft(input.email, input.password);
    if let Err(e) = ctx.login_form.submit(ctx.remote.as_ref(), &ctx.refresh).await {
        debug!(error = %e, "login rejected");
    }
    respond(&state, ctx, Route::Login)
}

pub async fn signup(
    State(state): State<Arc<AppState>>,
    session: Session,
    Form(input): Form<CredentialsInput>,
) -> Result<Response, AppError> {
    let client = client_for(&state, &session).await?;
    let mut guard = client.lock().await;
    let ctx = &mut *guard;

    ctx.navigator.visit(Route::SignUp);
    ctx.signup_form.set_draft(input.email, input.password);
    if let Err(e) = ctx.signup_form.submit(ctx.remote.as_ref()).await {
        debug!(error = %e, "sign up rejected");
    }
    respond(&state, ctx, Route::SignUp)
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Response, AppError> {
    let client = client_for(&state, &session).await?;
    let mut guard = client.lock().await;
    let ctx = &mut *guard;

    // The observer still sees the sign-out when the server call fails.
    if let Err(e) = crate::session::sign_out(ctx.remote.as_ref()).await {
        debug!(error = %e, "logout not confirmed by the server");
    }
    let view = ctx.navigator.current();
    respond(&state, ctx, view)
}

pub async fn add_activity(
    State(state): State<Arc<AppState>>,
    session: Session,
    Form(input): Form<ActivityInput>,
) -> Result<Response, AppError> {
    let client = client_for(&state, &session).await?;
    let mut guard = client.lock().await;
    let ctx = &mut *guard;

    ctx.navigator.visit(Route::Root);
    ctx.add_form.set_draft(input.title, input.description);
    if let Err(e) = ctx
        .add_form
        .submit(ctx.remote.as_ref(), &ctx.store, &ctx.refresh)
        .await
    {
        debug!(error = %e, "activity not added");
    }
    respond(&state, ctx, Route::Root)
}

/// Opens the edit affordance for one card, then shows the root view.
pub async fn edit_activity(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(id): Path<ActivityId>,
) -> Result<Response, AppError> {
    let client = client_for(&state, &session).await?;
    let mut guard = client.lock().await;

    guard.sync(Instant::now());
    guard.activities.reduce(ListMessage::Select(id));
    Ok(see_other(Route::Root))
}

pub async fn update_activity(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(id): Path<ActivityId>,
    Form(input): Form<ActivityInput>,
) -> Result<Response, AppError> {
    let client = client_for(&state, &session).await?;
    let mut guard = client.lock().await;
    let ctx = &mut *guard;

    ctx.navigator.visit(Route::Root);
    ctx.sync(Instant::now());
    let Some(editing) = ctx
        .activities
        .editing_mut()
        .filter(|editing| editing.activity.id == id)
    else {
        return Err(AppError::NotFound);
    };
    editing.form.set_draft(input.title, input.description);

    if let Err(e) = ctx
        .activities
        .submit_edit(ctx.remote.as_ref(), &ctx.store, &ctx.refresh, Instant::now())
        .await
    {
        debug!(id, error = %e, "activity not updated");
    }
    respond(&state, ctx, Route::Root)
}

pub async fn close_edit(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Response, AppError> {
    let client = client_for(&state, &session).await?;
    client.lock().await.activities.reduce(ListMessage::Close);
    Ok(see_other(Route::Root))
}

pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
