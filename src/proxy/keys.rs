//! Credential management routes under `/api-key/keys`.

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::server::AppState;
use super::types::ApiResponse;
use crate::admin::ADMIN_KEY_HEADER;
use crate::error::{Error, FieldError};
use crate::registry::ProviderType;
use crate::vault::{ChromiaKeys, CredentialDetail, NewCredential};

/// Owner selector for the query-string routes. `user_token` is accepted too.
#[derive(Debug, Deserialize)]
pub struct OwnerQuery {
    #[serde(alias = "user_token")]
    pub user: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChromiaKeysBody {
    pub private_key: Option<String>,
    pub public_key: Option<String>,
}

impl From<ChromiaKeysBody> for ChromiaKeys {
    fn from(body: ChromiaKeysBody) -> Self {
        ChromiaKeys {
            private_key: body.private_key.map(SecretString::from),
            public_key: body.public_key,
        }
    }
}

/// Body of POST /api-key/keys.
#[derive(Debug, Deserialize)]
pub struct CreateKeyBody {
    #[serde(alias = "user_token")]
    pub user: Option<String>,
    pub api_type: Option<String>,
    pub api_key: Option<String>,
    pub chromia_keys: Option<ChromiaKeysBody>,
}

/// Body of PUT /api-key/keys/:type.
#[derive(Debug, Deserialize)]
pub struct UpdateKeyBody {
    pub api_key: Option<String>,
    pub chromia_keys: Option<ChromiaKeysBody>,
}

#[derive(Debug, Serialize)]
pub struct ChromiaKeysView {
    pub private_key: Option<String>,
    pub public_key: Option<String>,
}

/// A decrypted credential as returned to the caller.
#[derive(Debug, Serialize)]
pub struct CredentialView {
    pub id: String,
    pub user_token: String,
    pub api_type: ProviderType,
    pub api_key: String,
    pub chromia_keys: Option<ChromiaKeysView>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<CredentialDetail> for CredentialView {
    fn from(detail: CredentialDetail) -> Self {
        Self {
            id: detail.id,
            user_token: detail.owner_id,
            api_type: detail.api_type,
            api_key: detail.api_key.expose_secret().to_string(),
            chromia_keys: detail.chromia_keys.map(|keys| ChromiaKeysView {
                private_key: keys.private_key.map(|k| k.expose_secret().to_string()),
                public_key: keys.public_key,
            }),
            created_at: detail.created_at,
            updated_at: detail.updated_at,
        }
    }
}

fn json_rejection(rejection: JsonRejection) -> Error {
    Error::bad_request(rejection.body_text())
}

pub(super) fn query_rejection(rejection: QueryRejection) -> Error {
    Error::bad_request(rejection.body_text())
}

/// Collect a missing-or-blank field into `fields`.
fn required(value: Option<String>, name: &str, fields: &mut Vec<FieldError>) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v,
        Some(_) => {
            fields.push(FieldError::new(name, "must not be empty"));
            String::new()
        }
        None => {
            fields.push(FieldError::new(name, "is required"));
            String::new()
        }
    }
}

fn owner(query: Result<Query<OwnerQuery>, QueryRejection>) -> Result<String, Error> {
    let Query(query) = query.map_err(query_rejection)?;
    let mut fields = Vec::new();
    let user = required(query.user, "user", &mut fields);
    if fields.is_empty() {
        Ok(user)
    } else {
        Err(Error::invalid_fields(fields))
    }
}

/// Handle POST /api-key/keys
pub async fn create_key(
    State(state): State<AppState>,
    body: Result<Json<CreateKeyBody>, JsonRejection>,
) -> Result<impl IntoResponse, Error> {
    let Json(body) = body.map_err(json_rejection)?;

    let mut fields = Vec::new();
    let user = required(body.user, "user", &mut fields);
    let api_type = required(body.api_type, "api_type", &mut fields);
    let api_key = required(body.api_key, "api_key", &mut fields);
    if !fields.is_empty() {
        return Err(Error::invalid_fields(fields));
    }

    let summary = state
        .store
        .create_credential(
            &user,
            &api_type,
            NewCredential {
                api_key: SecretString::from(api_key),
                chromia_keys: body.chromia_keys.map(ChromiaKeys::from),
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::data(summary))))
}

/// Handle GET /api-key/keys
pub async fn list_keys(
    State(state): State<AppState>,
    query: Result<Query<OwnerQuery>, QueryRejection>,
) -> Result<impl IntoResponse, Error> {
    let user = owner(query)?;
    let keys = state.store.list_credentials(&user).await?;
    let views: Vec<CredentialView> = keys.into_iter().map(CredentialView::from).collect();
    Ok(Json(ApiResponse::data(views)))
}

/// Handle GET /api-key/keys/:type
pub async fn get_key(
    State(state): State<AppState>,
    Path(api_type): Path<String>,
    query: Result<Query<OwnerQuery>, QueryRejection>,
) -> Result<impl IntoResponse, Error> {
    let user = owner(query)?;
    let detail = state.store.get_credential(&user, &api_type).await?;
    Ok(Json(ApiResponse::data(CredentialView::from(detail))))
}

/// Handle PUT /api-key/keys/:type
pub async fn update_key(
    State(state): State<AppState>,
    Path(api_type): Path<String>,
    query: Result<Query<OwnerQuery>, QueryRejection>,
    body: Result<Json<UpdateKeyBody>, JsonRejection>,
) -> Result<impl IntoResponse, Error> {
    let user = owner(query)?;
    let Json(body) = body.map_err(json_rejection)?;

    let mut fields = Vec::new();
    let api_key = required(body.api_key, "api_key", &mut fields);
    if !fields.is_empty() {
        return Err(Error::invalid_fields(fields));
    }

    state
        .store
        .update_credential(
            &user,
            &api_type,
            NewCredential {
                api_key: SecretString::from(api_key),
                chromia_keys: body.chromia_keys.map(ChromiaKeys::from),
            },
        )
        .await?;

    Ok(Json(ApiResponse::<()>::message("API key updated successfully")))
}

/// Handle DELETE /api-key/keys/:type (admin only)
pub async fn delete_key(
    State(state): State<AppState>,
    Path(api_type): Path<String>,
    headers: HeaderMap,
    query: Result<Query<OwnerQuery>, QueryRejection>,
) -> Result<impl IntoResponse, Error> {
    let presented = headers.get(ADMIN_KEY_HEADER).and_then(|v| v.to_str().ok());
    let is_admin = state.admin.is_admin(presented);
    if !is_admin {
        return Err(Error::Forbidden);
    }
    let user = owner(query)?;

    state
        .store
        .deactivate_credential(&user, &api_type, is_admin)
        .await?;

    Ok(Json(ApiResponse::<()>::message("API key deleted successfully")))
}
