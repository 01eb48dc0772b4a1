use axum::{
    body::{Body, Bytes},
    extract::{rejection::BytesRejection, Path, State},
    http::header,
    response::Response,
    Json,
};
use data_model::ObjectId;
use document_store::Cursor;
use futures::Stream;
use tracing::info;

use super::RouteState;
use crate::http_objects::{ApiError, CreateUser, User};

/// Create a user
#[utoipa::path(
    post,
    path = "/users",
    tag = "users",
    request_body = CreateUser,
    responses(
        (status = 200, description = "Hex id of the new user", body = String, content_type = "text/plain"),
        (status = BAD_REQUEST, description = "Malformed JSON body"),
        (status = INTERNAL_SERVER_ERROR, description = "Internal Server Error")
    ),
)]
pub async fn create_user(
    State(state): State<RouteState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<String, ApiError> {
    // Decoded by hand so every malformed payload is a 400.
    let request: CreateUser = serde_json::from_slice(&body?)?;
    let id = state.users.insert(request.into())?;
    info!(%id, "created user");
    Ok(id.to_hex())
}

/// Delete a user
#[utoipa::path(
    delete,
    path = "/users/{id}",
    tag = "users",
    params(("id" = String, Path, description = "Hex id of the user")),
    responses(
        (status = 200, description = "User deleted"),
        (status = BAD_REQUEST, description = "Malformed id"),
        (status = NOT_FOUND, description = "User not found"),
        (status = INTERNAL_SERVER_ERROR, description = "Internal Server Error")
    ),
)]
pub async fn delete_user(
    Path(id): Path<String>,
    State(state): State<RouteState>,
) -> Result<&'static str, ApiError> {
    let id = ObjectId::parse_str(&id)?;
    state.users.delete_by_id(&id)?;
    info!(%id, "deleted user");
    Ok("User deleted successfully")
}

/// `all` is routed to the list endpoint, so it never reaches `delete_user`.
/// It is still not a valid id.
pub async fn delete_user_all() -> ApiError {
    ApiError::bad_request("invalid user id: all")
}

/// Get a user
#[utoipa::path(
    get,
    path = "/users/{id}",
    tag = "users",
    params(("id" = String, Path, description = "Hex id of the user")),
    responses(
        (status = 200, description = "User", body = User),
        (status = BAD_REQUEST, description = "Malformed id"),
        (status = NOT_FOUND, description = "User not found"),
        (status = INTERNAL_SERVER_ERROR, description = "Internal Server Error")
    ),
)]
pub async fn get_user(
    Path(id): Path<String>,
    State(state): State<RouteState>,
) -> Result<Json<User>, ApiError> {
    let id = ObjectId::parse_str(&id)?;
    let user = state.users.find_by_id(&id)?;
    Ok(Json(user.into()))
}

/// List all users
///
/// The array is streamed as the collection is scanned.
#[utoipa::path(
    get,
    path = "/users/all",
    tag = "users",
    responses(
        (status = 200, description = "All users", body = Vec<User>),
        (status = INTERNAL_SERVER_ERROR, description = "Internal Server Error")
    ),
)]
pub async fn list_users(State(state): State<RouteState>) -> Result<Response<Body>, ApiError> {
    let mut cursor = state.users.list_all();
    // Failures before the first byte is written still get a proper status.
    let first_batch = cursor.next_batch()?;

    Response::builder()
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from_stream(json_array(first_batch, cursor)))
        .map_err(|e| ApiError::internal_error_str(&e.to_string()))
}

// A failure after streaming started ends the body with an error, which aborts
// the response instead of leaving a truncated but well-formed array.
fn json_array(
    first_batch: Option<Vec<data_model::User>>,
    mut cursor: Cursor<data_model::User>,
) -> impl Stream<Item = Result<Bytes, document_store::Error>> + Send + 'static {
    async_stream::try_stream! {
        yield Bytes::from_static(b"[");
        let mut needs_separator = false;
        let mut batch = first_batch;
        while let Some(users) = batch {
            yield encode_users(users, &mut needs_separator)?;
            batch = cursor.next_batch()?;
        }
        yield Bytes::from_static(b"]");
    }
}

fn encode_users(
    users: Vec<data_model::User>,
    needs_separator: &mut bool,
) -> Result<Bytes, document_store::Error> {
    let mut buf = Vec::new();
    for user in users {
        if *needs_separator {
            buf.push(b',');
        }
        serde_json::to_writer(&mut buf, &User::from(user)).map_err(anyhow::Error::from)?;
        *needs_separator = true;
    }
    Ok(buf.into())
}
