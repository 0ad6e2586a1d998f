//! HTTP surface for the HubSpot integration.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Html;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::error;

use leadsync_core::domain::connection::UserId;
use leadsync_core::domain::engagement::{
    ContactUpdate, NoteInput, NoteRecord, NoteUpdate, TaskInput, TaskRecord, TaskUpdate,
};
use leadsync_core::domain::lead::{CompanyInput, ContactInput, SyncResult};
use leadsync_hubspot::types::PropertyOptions;
use leadsync_hubspot::{ConnectionManager, ConnectionStatus, HubSpotError, SyncEngine};

const USER_ID_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct HubSpotState {
    pub connections: Arc<ConnectionManager>,
    pub engine: Arc<SyncEngine>,
}

pub fn router(state: HubSpotState) -> Router {
    Router::new()
        .route("/connect", get(connect))
        .route("/callback", get(callback))
        .route("/disconnect", post(disconnect))
        .route("/status", get(status))
        .route("/sync-lead", post(sync_lead))
        .route("/check-profile", get(check_profile))
        .route("/property-options", get(property_options))
        .route("/update-contact", patch(update_contact))
        .route("/notes", post(create_note).get(list_notes))
        .route("/notes/{note_id}", patch(update_note).delete(delete_note))
        .route("/tasks", post(create_task).get(list_tasks))
        .route("/tasks/{task_id}", patch(update_task).delete(delete_task))
        .with_state(state)
}

#[derive(Serialize)]
struct ApiSuccess<T> {
    success: bool,
    message: &'static str,
    data: T,
}

#[derive(Serialize)]
struct ApiError {
    success: bool,
    message: String,
}

type ErrorResponse = (StatusCode, Json<ApiError>);

fn success<T: Serialize>(message: &'static str, data: T) -> Json<ApiSuccess<T>> {
    Json(ApiSuccess { success: true, message, data })
}

fn error_response(error: HubSpotError) -> ErrorResponse {
    let status = match &error {
        HubSpotError::NotConnected
        | HubSpotError::InvalidState
        | HubSpotError::ExpiredState
        | HubSpotError::MissingContactIdentifier
        | HubSpotError::MissingCompanyIdentifier { .. }
        | HubSpotError::Validation(_) => StatusCode::BAD_REQUEST,
        HubSpotError::Authentication => StatusCode::UNAUTHORIZED,
        HubSpotError::Permission => StatusCode::FORBIDDEN,
        HubSpotError::UserNotFound | HubSpotError::NotFound(_) => StatusCode::NOT_FOUND,
        HubSpotError::Upstream(_) => StatusCode::BAD_GATEWAY,
        HubSpotError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if let HubSpotError::Store(store_error) = &error {
        error!(error = %store_error, "storage failure while serving hubspot request");
        return (
            status,
            Json(ApiError { success: false, message: "internal storage error".to_string() }),
        );
    }

    (status, Json(ApiError { success: false, message: error.to_string() }))
}

fn validation_error(message: &str) -> ErrorResponse {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiError { success: false, message: message.to_string() }),
    )
}

fn authenticated_user(headers: &HeaderMap) -> Result<UserId, ErrorResponse> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| UserId(value.to_string()))
        .ok_or((
            StatusCode::UNAUTHORIZED,
            Json(ApiError {
                success: false,
                message: format!("missing `{USER_ID_HEADER}` header"),
            }),
        ))
}

/// Resolves the authenticated user's access token and stored owner id, the
/// context every CRM operation runs under.
async fn crm_context(
    state: &HubSpotState,
    headers: &HeaderMap,
) -> Result<(String, Option<String>), ErrorResponse> {
    let user_id = authenticated_user(headers)?;
    let token =
        state.connections.valid_access_token(&user_id).await.map_err(error_response)?;
    let owner_id = state.connections.owner_id(&user_id).await.map_err(error_response)?;
    Ok((token, owner_id))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectResponse {
    auth_url: String,
}

async fn connect(
    headers: HeaderMap,
    State(state): State<HubSpotState>,
) -> Result<Json<ApiSuccess<ConnectResponse>>, ErrorResponse> {
    let user_id = authenticated_user(&headers)?;
    let auth_url = state
        .connections
        .issue_authorization_url(&user_id)
        .await
        .map_err(error_response)?;
    Ok(success("HubSpot auth URL generated", ConnectResponse { auth_url }))
}

#[derive(Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

async fn callback(
    State(state): State<HubSpotState>,
    Query(query): Query<CallbackQuery>,
) -> (StatusCode, Html<String>) {
    if let Some(provider_error) = query.error {
        return callback_failure(
            StatusCode::BAD_REQUEST,
            &format!("The provider reported an error: {provider_error}"),
        );
    }

    let (Some(code), Some(oauth_state)) = (query.code, query.state) else {
        return callback_failure(
            StatusCode::BAD_REQUEST,
            "Missing required OAuth parameters.",
        );
    };

    let user_id = match state.connections.validate_state(&oauth_state).await {
        Ok(user_id) => user_id,
        Err(err) => {
            let (status, _) = error_response(err);
            return callback_failure(status, "The sign-in link is invalid or has expired.");
        }
    };

    match state.connections.connect_user(&user_id, &code).await {
        Ok(owner_id) => {
            let owner = owner_id.unwrap_or_else(|| "Standard User".to_string());
            (
                StatusCode::OK,
                Html(format!(
                    "<html><body>\
                     <h1>HubSpot Connected Successfully</h1>\
                     <p>Your owner ID (<b>{owner}</b>) is now linked.</p>\
                     <p>You can close this window.</p>\
                     </body></html>"
                )),
            )
        }
        Err(err) => {
            let (status, Json(body)) = error_response(err);
            callback_failure(status, &body.message)
        }
    }
}

fn callback_failure(status: StatusCode, message: &str) -> (StatusCode, Html<String>) {
    (
        status,
        Html(format!("<html><body><h1>Connection Failed</h1><p>{message}</p></body></html>")),
    )
}

async fn disconnect(
    headers: HeaderMap,
    State(state): State<HubSpotState>,
) -> Result<Json<ApiSuccess<serde_json::Value>>, ErrorResponse> {
    let user_id = authenticated_user(&headers)?;
    state.connections.disconnect_user(&user_id).await.map_err(error_response)?;
    Ok(success("HubSpot connection removed", serde_json::Value::Null))
}

async fn status(
    headers: HeaderMap,
    State(state): State<HubSpotState>,
) -> Result<Json<ApiSuccess<ConnectionStatus>>, ErrorResponse> {
    let user_id = authenticated_user(&headers)?;
    let status = state.connections.connection_status(&user_id).await.map_err(error_response)?;
    Ok(success("HubSpot connection status", status))
}

#[derive(Deserialize)]
struct SyncLeadRequest {
    contact: ContactInput,
    #[serde(default)]
    company: Option<CompanyInput>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncLeadResponse {
    #[serde(flatten)]
    result: SyncResult,
    hubspot_owner_id: Option<String>,
}

async fn sync_lead(
    headers: HeaderMap,
    State(state): State<HubSpotState>,
    Json(payload): Json<SyncLeadRequest>,
) -> Result<Json<ApiSuccess<SyncLeadResponse>>, ErrorResponse> {
    let (token, owner_id) = crm_context(&state, &headers).await?;

    let result = state
        .engine
        .sync_full_lead(&token, &payload.contact, payload.company.as_ref(), owner_id.as_deref())
        .await
        .map_err(error_response)?;

    Ok(success(
        "Lead synced successfully",
        SyncLeadResponse { result, hubspot_owner_id: owner_id },
    ))
}

#[derive(Deserialize)]
struct UsernameQuery {
    username: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProfileCheckResponse {
    exists: bool,
    synced: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    contact_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    synced_at: Option<String>,
}

async fn check_profile(
    headers: HeaderMap,
    State(state): State<HubSpotState>,
    Query(query): Query<UsernameQuery>,
) -> Result<Json<ApiSuccess<ProfileCheckResponse>>, ErrorResponse> {
    let username = query
        .username
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| validation_error("`username` query parameter is required"))?;

    let (token, _) = crm_context(&state, &headers).await?;
    let matched =
        state.engine.find_contact_by_handle(&token, username).await.map_err(error_response)?;

    let response = match matched {
        Some(contact) => {
            let name = [contact.firstname.as_deref(), contact.lastname.as_deref()]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ");
            ProfileCheckResponse {
                exists: true,
                synced: true,
                contact_id: Some(contact.id),
                name: (!name.is_empty()).then_some(name),
                email: contact.email,
                synced_at: contact.last_modified,
            }
        }
        None => ProfileCheckResponse {
            exists: false,
            synced: false,
            contact_id: None,
            name: None,
            email: None,
            synced_at: None,
        },
    };

    Ok(success("Profile check completed", response))
}

async fn property_options(
    headers: HeaderMap,
    State(state): State<HubSpotState>,
) -> Result<Json<ApiSuccess<PropertyOptions>>, ErrorResponse> {
    let (token, _) = crm_context(&state, &headers).await?;
    let options = state.engine.property_options(&token).await.map_err(error_response)?;
    Ok(success("Property options fetched successfully", options))
}

async fn update_contact(
    headers: HeaderMap,
    State(state): State<HubSpotState>,
    Query(query): Query<UsernameQuery>,
    Json(update): Json<ContactUpdate>,
) -> Result<Json<ApiSuccess<serde_json::Value>>, ErrorResponse> {
    let username = query
        .username
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| validation_error("`username` query parameter is required"))?;

    let (token, _) = crm_context(&state, &headers).await?;
    state
        .engine
        .update_contact_by_handle(&token, username, &update)
        .await
        .map_err(error_response)?;

    Ok(success("Contact updated successfully", serde_json::Value::Null))
}

#[derive(Deserialize)]
struct ContactIdQuery {
    #[serde(rename = "contactId")]
    contact_id: Option<String>,
}

impl ContactIdQuery {
    fn required(&self) -> Result<&str, ErrorResponse> {
        self.contact_id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| validation_error("`contactId` query parameter is required"))
    }
}

async fn create_note(
    headers: HeaderMap,
    State(state): State<HubSpotState>,
    Json(input): Json<NoteInput>,
) -> Result<(StatusCode, Json<ApiSuccess<String>>), ErrorResponse> {
    let (token, owner_id) = crm_context(&state, &headers).await?;
    let note_id = state
        .engine
        .create_note(&token, &input, owner_id.as_deref())
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, success("Note created successfully", note_id)))
}

async fn list_notes(
    headers: HeaderMap,
    State(state): State<HubSpotState>,
    Query(query): Query<ContactIdQuery>,
) -> Result<Json<ApiSuccess<Vec<NoteRecord>>>, ErrorResponse> {
    let contact_id = query.required()?.to_string();
    let (token, _) = crm_context(&state, &headers).await?;
    let notes =
        state.engine.notes_for_contact(&token, &contact_id).await.map_err(error_response)?;
    Ok(success("Notes fetched successfully", notes))
}

async fn update_note(
    headers: HeaderMap,
    State(state): State<HubSpotState>,
    Path(note_id): Path<String>,
    Json(update): Json<NoteUpdate>,
) -> Result<Json<ApiSuccess<serde_json::Value>>, ErrorResponse> {
    let (token, _) = crm_context(&state, &headers).await?;
    state.engine.update_note(&token, &note_id, &update).await.map_err(error_response)?;
    Ok(success("Note updated successfully", serde_json::Value::Null))
}

async fn delete_note(
    headers: HeaderMap,
    State(state): State<HubSpotState>,
    Path(note_id): Path<String>,
) -> Result<Json<ApiSuccess<serde_json::Value>>, ErrorResponse> {
    let (token, _) = crm_context(&state, &headers).await?;
    state.engine.delete_note(&token, &note_id).await.map_err(error_response)?;
    Ok(success("Note deleted successfully", serde_json::Value::Null))
}

async fn create_task(
    headers: HeaderMap,
    State(state): State<HubSpotState>,
    Json(input): Json<TaskInput>,
) -> Result<(StatusCode, Json<ApiSuccess<String>>), ErrorResponse> {
    let (token, owner_id) = crm_context(&state, &headers).await?;
    let task_id = state
        .engine
        .create_task(&token, &input, owner_id.as_deref())
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, success("Task created successfully", task_id)))
}

async fn list_tasks(
    headers: HeaderMap,
    State(state): State<HubSpotState>,
    Query(query): Query<ContactIdQuery>,
) -> Result<Json<ApiSuccess<Vec<TaskRecord>>>, ErrorResponse> {
    let contact_id = query.required()?.to_string();
    let (token, _) = crm_context(&state, &headers).await?;
    let tasks =
        state.engine.tasks_for_contact(&token, &contact_id).await.map_err(error_response)?;
    Ok(success("Tasks fetched successfully", tasks))
}

async fn update_task(
    headers: HeaderMap,
    State(state): State<HubSpotState>,
    Path(task_id): Path<String>,
    Json(update): Json<TaskUpdate>,
) -> Result<Json<ApiSuccess<serde_json::Value>>, ErrorResponse> {
    let (token, _) = crm_context(&state, &headers).await?;
    state.engine.update_task(&token, &task_id, &update).await.map_err(error_response)?;
    Ok(success("Task updated successfully", serde_json::Value::Null))
}

async fn delete_task(
    headers: HeaderMap,
    State(state): State<HubSpotState>,
    Path(task_id): Path<String>,
) -> Result<Json<ApiSuccess<serde_json::Value>>, ErrorResponse> {
    let (token, _) = crm_context(&state, &headers).await?;
    state.engine.delete_task(&token, &task_id).await.map_err(error_response)?;
    Ok(success("Task deleted successfully", serde_json::Value::Null))
}
