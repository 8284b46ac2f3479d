use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::handler;
use crate::state::ServerState;

/// Wire every endpoint to its handler.
pub fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/", get(handler::discovery))
        .route("/camli/upload", post(handler::upload))
        .route("/camli/stat", post(handler::stat))
        .route("/camli/enumerate-blobs", get(handler::enumerate))
        .route("/camli/remove", post(handler::remove))
        .route("/camli/search/recent", get(handler::search_recent))
        .route("/camli/search/claims", get(handler::search_claims))
        .route("/camli/search/describe", get(handler::search_describe))
        .route(
            "/camli/search/permanodeattr",
            get(handler::search_permanode_attr),
        )
        .route("/camli/search/files", get(handler::search_files))
        .route(
            "/camli/search/query",
            get(handler::search_query_get).post(handler::search_query_post),
        )
        .route("/camli/sig/sign", post(handler::sig_sign))
        .route("/camli/sig/verify", post(handler::sig_verify))
        .route("/camli/sig/discovery", get(handler::sig_discovery))
        .route("/camli/:blobref", get(handler::get_blob))
        .with_state(state)
}
