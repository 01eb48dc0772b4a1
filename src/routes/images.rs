use axum::{
    body::{Body, Bytes},
    extract::{rejection::BytesRejection, Path, Query, State},
    http::{header, HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use base64::prelude::*;
use data_model::ObjectId;
use futures::{stream, Stream};

use super::RouteState;
use crate::http_objects::{ApiError, ImageFile, ImageVersionsParams, UploadImageParams};

pub const IMAGE_ID_HEADER: &str = "x-image-id";

// Matches the chunk size large-object stores conventionally use.
const UPLOAD_CHUNK_SIZE: usize = 255 * 1024;

/// Upload an image
///
/// The body is the base64 encoded image. The id of the stored image is
/// returned in the `Location` and `x-image-id` headers.
#[utoipa::path(
    post,
    path = "/image",
    tag = "images",
    params(UploadImageParams),
    request_body(content = String, content_type = "text/plain", description = "Base64 encoded image bytes"),
    responses(
        (status = 200, description = "Image uploaded"),
        (status = BAD_REQUEST, description = "Unreadable body or invalid base64"),
        (status = INTERNAL_SERVER_ERROR, description = "Internal Server Error")
    ),
)]
pub async fn upload_image(
    State(state): State<RouteState>,
    Query(params): Query<UploadImageParams>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    let body = body?;
    // Clients commonly wrap base64 output or end it with a newline.
    let encoded: Vec<u8> = body
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    let data = Bytes::from(BASE64_STANDARD.decode(&encoded)?);

    let id = state
        .images
        .upload(&params.name, chunked(data), &params.mime_type)
        .await?;

    Ok((
        [
            (header::LOCATION, format!("/image/{}", id)),
            (HeaderName::from_static(IMAGE_ID_HEADER), id.to_hex()),
        ],
        "Image uploaded successfully",
    )
        .into_response())
}

fn chunked(data: Bytes) -> impl Stream<Item = anyhow::Result<Bytes>> + Send + Unpin {
    let chunks: Vec<anyhow::Result<Bytes>> = (0..data.len())
        .step_by(UPLOAD_CHUNK_SIZE)
        .map(|start| Ok(data.slice(start..(start + UPLOAD_CHUNK_SIZE).min(data.len()))))
        .collect();
    stream::iter(chunks)
}

/// Download an image
#[utoipa::path(
    get,
    path = "/image/{id}",
    tag = "images",
    params(("id" = String, Path, description = "Hex id returned by the upload")),
    responses(
        (status = 200, description = "Raw image bytes"),
        (status = BAD_REQUEST, description = "Malformed id"),
        (status = NOT_FOUND, description = "Image not found"),
        (status = INTERNAL_SERVER_ERROR, description = "Internal Server Error")
    ),
)]
pub async fn download_image(
    Path(id): Path<String>,
    State(state): State<RouteState>,
) -> Result<Response<Body>, ApiError> {
    let id = ObjectId::parse_str(&id)?;
    let (file, storage_reader) = state.images.open_download_stream(&id).await?;

    let content_type = HeaderValue::from_str(&file.mime_type)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or(HeaderValue::from_static("application/octet-stream"));
    Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, file.length.to_string())
        .body(Body::from_stream(storage_reader))
        .map_err(|e| ApiError::internal_error_str(&e.to_string()))
}

/// List stored versions of an image name
#[utoipa::path(
    get,
    path = "/images",
    tag = "images",
    params(ImageVersionsParams),
    responses(
        (status = 200, description = "Stored versions, oldest first", body = Vec<ImageFile>),
        (status = INTERNAL_SERVER_ERROR, description = "Internal Server Error")
    ),
)]
pub async fn list_image_versions(
    State(state): State<RouteState>,
    Query(params): Query<ImageVersionsParams>,
) -> Result<Json<Vec<ImageFile>>, ApiError> {
    let files = state.images.find_by_name(&params.name)?;
    Ok(Json(files.into_iter().map(ImageFile::from).collect()))
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;

    use super::*;

    #[tokio::test]
    async fn test_chunked_splits_and_preserves_bytes() {
        let data = Bytes::from(vec![7u8; UPLOAD_CHUNK_SIZE * 2 + 10]);
        let chunks: Vec<Bytes> = chunked(data.clone()).try_collect().await.unwrap();
        assert_eq!(
            chunks.iter().map(|c| c.len()).collect::<Vec<_>>(),
            vec![UPLOAD_CHUNK_SIZE, UPLOAD_CHUNK_SIZE, 10]
        );
        assert_eq!(chunks.concat(), data.to_vec());

        let empty: Vec<Bytes> = chunked(Bytes::new()).try_collect().await.unwrap();
        assert!(empty.is_empty());
    }
}
