use axum::{
    extract::rejection::BytesRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use data_model::IdParseError;
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    #[serde(skip)]
    status_code: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status_code: StatusCode, message: &str) -> Self {
        Self {
            status_code,
            message: message.to_string(),
        }
    }

    pub fn internal_error(e: anyhow::Error) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string().as_str())
    }

    pub fn internal_error_str(e: &str) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, e)
    }

    pub fn not_found(message: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!("API Error: {} - {}", self.status_code, self.message);
        (self.status_code, self.message).into_response()
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::bad_request(&e.to_string())
    }
}

impl From<IdParseError> for ApiError {
    fn from(e: IdParseError) -> Self {
        Self::bad_request(&e.to_string())
    }
}

impl From<base64::DecodeError> for ApiError {
    fn from(e: base64::DecodeError) -> Self {
        Self::bad_request(&format!("failed to decode image data: {}", e))
    }
}

impl From<BytesRejection> for ApiError {
    fn from(e: BytesRejection) -> Self {
        Self::bad_request(&format!("failed to read request body: {}", e.body_text()))
    }
}

impl From<document_store::Error> for ApiError {
    fn from(e: document_store::Error) -> Self {
        match e {
            document_store::Error::NotFound { .. } => Self::not_found(&e.to_string()),
            document_store::Error::StoreFailure { source } => Self::internal_error(source),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateUser {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
}

impl From<CreateUser> for data_model::User {
    fn from(user: CreateUser) -> Self {
        data_model::User::new(&user.username, &user.email)
    }
}

/// A user as returned by the API. Empty fields are left out.
#[derive(Debug, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct User {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
}

impl From<data_model::User> for User {
    fn from(user: data_model::User) -> Self {
        Self {
            id: user.id.map(|id| id.to_hex()).unwrap_or_default(),
            username: user.username,
            email: user.email,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UploadImageParams {
    /// File name the image is stored under.
    #[serde(default)]
    pub name: String,
    /// MIME type served back on download.
    #[serde(default)]
    pub mime_type: String,
}

#[derive(Debug, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ImageVersionsParams {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ImageFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub length: u64,
    pub sha256: String,
    pub created_at: u64,
}

impl From<data_model::ImageFile> for ImageFile {
    fn from(file: data_model::ImageFile) -> Self {
        Self {
            id: file.id.map(|id| id.to_hex()).unwrap_or_default(),
            name: file.filename,
            mime_type: file.mime_type,
            length: file.length,
            sha256: file.sha256,
            created_at: file.upload_date,
        }
    }
}

#[cfg(test)]
mod tests {
    use data_model::ObjectId;

    use super::*;

    #[test]
    fn test_user_json_omits_empty_fields() {
        let mut user = data_model::User::new("alice", "");
        user.id = Some(ObjectId::parse_str("64b7f0c2a1b2c3d4e5f60718").unwrap());
        let json = serde_json::to_string(&User::from(user)).unwrap();
        assert_eq!(json, r#"{"id":"64b7f0c2a1b2c3d4e5f60718","username":"alice"}"#);
    }

    #[test]
    fn test_store_errors_map_to_status_codes() {
        let not_found = document_store::Error::NotFound {
            collection: "users".to_string(),
            id: ObjectId::new(),
        };
        assert_eq!(ApiError::from(not_found).into_response().status(), StatusCode::NOT_FOUND);

        let failure = document_store::Error::from(anyhow::anyhow!("disk full"));
        assert_eq!(
            ApiError::from(failure).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );

        let bad_id = ObjectId::parse_str("nope").unwrap_err();
        assert_eq!(ApiError::from(bad_id).into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_create_user_defaults_missing_fields() {
        let user: CreateUser = serde_json::from_str(r#"{"email":"a@x.com"}"#).unwrap();
        assert_eq!(user.username, "");
        assert_eq!(user.email, "a@x.com");
    }
}
