use axum::{
    extract::{DefaultBodyLimit, MatchedPath, Request},
    http::{header, Method},
    routing::{get, post},
    Router,
};
use blob_store::Bucket;
use data_model::User;
use document_store::Collection;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::http_objects::{self, ApiError, CreateUser, ImageFile};

mod images;
mod users;

#[derive(OpenApi)]
#[openapi(
        paths(
            users::create_user,
            users::list_users,
            users::get_user,
            users::delete_user,
            images::upload_image,
            images::download_image,
            images::list_image_versions,
        ),
        components(
            schemas(
                ApiError,
                CreateUser,
                http_objects::User,
                ImageFile,
            )
        ),
        tags(
            (name = "users", description = "User records"),
            (name = "images", description = "Image uploads"),
        )
    )]
struct ApiDoc;

#[derive(Clone)]
pub struct RouteState {
    pub users: Collection<User>,
    pub images: Bucket,
}

pub fn create_routes(route_state: RouteState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::HEAD,
            Method::POST,
            Method::PUT,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .merge(SwaggerUi::new("/docs/swagger").url("/docs/openapi.json", ApiDoc::openapi()))
        .route("/", get(index))
        .route("/users", post(users::create_user))
        .route(
            "/users/all",
            get(users::list_users).delete(users::delete_user_all),
        )
        .route(
            "/users/{id}",
            get(users::get_user).delete(users::delete_user),
        )
        .route("/image", post(images::upload_image))
        .route("/image/{id}", get(images::download_image))
        .route("/images", get(images::list_image_versions))
        .with_state(route_state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request| {
                    let method = req.method();
                    let uri = req.uri();

                    let matched_path = req
                        .extensions()
                        .get::<MatchedPath>()
                        .map(|matched_path| matched_path.as_str());

                    tracing::debug_span!("request", %method, %uri, matched_path)
                })
                .on_failure(()),
        )
        .layer(cors)
        .layer(DefaultBodyLimit::max(usize::MAX))
}

async fn index() -> &'static str {
    "User Store Server"
}
