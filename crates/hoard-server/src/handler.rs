use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use chrono::{DateTime, Utc};
use hoard_schema::{sign, CamliType, SchemaBlob, StoreFetcher};
use hoard_search::SearchQuery;
use hoard_types::{BlobRef, CancelToken, SizedBlobRef};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::{ServerError, ServerResult};
use crate::state::ServerState;

type AppState = State<Arc<ServerState>>;

fn require_auth(state: &ServerState, headers: &HeaderMap) -> ServerResult<()> {
    if state.config.auth.allows(headers) {
        Ok(())
    } else {
        Err(ServerError::Unauthorized)
    }
}

// ---------------------------------------------------------------------------
// Blob surface
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct GetBlobParams {
    pub via: Option<String>,
}

pub async fn get_blob(
    State(state): AppState,
    Path(blobref): Path<String>,
    Query(params): Query<GetBlobParams>,
    headers: HeaderMap,
) -> ServerResult<Response> {
    let br = BlobRef::parse(&blobref)?;
    if !state.config.auth.allows(&headers) {
        let shared = match &params.via {
            Some(via) => share_allows(&state, &br, via)?,
            None => false,
        };
        if !shared {
            return Err(ServerError::Unauthorized);
        }
    }
    let data = hoard_store::fetch_bytes(state.store.as_ref(), &br)?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        data,
    )
        .into_response())
}

/// Resolve a `?via=<ref>,<ref>…` share chain: the chain must start at a
/// haveref share blob and each hop must be referenced by the blob before
/// it, ending at the requested target.
fn share_allows(state: &ServerState, target: &BlobRef, via: &str) -> ServerResult<bool> {
    let refs: Vec<BlobRef> = via
        .split(',')
        .map(BlobRef::parse)
        .collect::<Result<_, _>>()?;
    let Some(share_ref) = refs.first() else {
        return Ok(false);
    };
    let Ok(share_bytes) = hoard_store::fetch_bytes(state.store.as_ref(), share_ref) else {
        return Ok(false);
    };
    let Ok(share) = SchemaBlob::parse(share_ref, &share_bytes) else {
        return Ok(false);
    };
    if share.camli_type() != CamliType::Share || share.share_auth_type() != Some("haveref") {
        return Ok(false);
    }
    let Some(share_target) = share.share_target() else {
        return Ok(false);
    };
    if !share.share_transitive() {
        return Ok(refs.len() == 1 && share_target == *target);
    }
    let mut current = share_target;
    for next in refs[1..].iter().chain(std::iter::once(target)) {
        if *next == current {
            continue;
        }
        let Ok(bytes) = hoard_store::fetch_bytes(state.store.as_ref(), &current) else {
            return Ok(false);
        };
        if !String::from_utf8_lossy(&bytes).contains(&next.to_string()) {
            debug!(share = %share_ref, hop = %next, "share chain hop not referenced");
            return Ok(false);
        }
        current = next.clone();
    }
    Ok(current == *target)
}

pub async fn upload(
    State(state): AppState,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ServerResult<Json<serde_json::Value>> {
    require_auth(&state, &headers)?;
    let mut received: Vec<SizedBlobRef> = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("bad multipart body: {e}")))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        let br = BlobRef::parse(&name)?;
        let data = field
            .bytes()
            .await
            .map_err(|e| ServerError::BadRequest(format!("bad multipart part: {e}")))?;
        if data.len() as u64 > state.config.max_upload_size {
            return Err(ServerError::BadRequest(format!(
                "blob exceeds max upload size of {}",
                state.config.max_upload_size
            )));
        }
        let sb = state
            .store
            .receive(&br, &mut std::io::Cursor::new(&data[..]))?;
        // Notify the index; its own errors don't fail the upload.
        if let Err(e) = state.index.receive_blob(&br, &mut std::io::Cursor::new(&data[..])) {
            tracing::warn!(blob = %br, "index notify failed: {e}");
        }
        received.push(sb);
    }
    Ok(Json(json!({ "received": received })))
}

pub async fn stat(
    State(state): AppState,
    headers: HeaderMap,
    Form(fields): Form<Vec<(String, String)>>,
) -> ServerResult<Json<serde_json::Value>> {
    require_auth(&state, &headers)?;
    let refs = blob_fields(&fields)?;
    let stat = state.store.stat(&refs)?;
    Ok(Json(json!({
        "stat": stat,
        "canLongPoll": false,
        "maxUploadSize": state.config.max_upload_size,
    })))
}

#[derive(Deserialize)]
pub struct EnumerateParams {
    #[serde(default)]
    pub after: String,
    pub limit: Option<usize>,
}

pub async fn enumerate(
    State(state): AppState,
    headers: HeaderMap,
    Query(params): Query<EnumerateParams>,
) -> ServerResult<Json<serde_json::Value>> {
    require_auth(&state, &headers)?;
    let limit = params.limit.unwrap_or(1000).min(10000);
    let mut blobs = Vec::with_capacity(limit.min(1024));
    for item in state.store.enumerate(&params.after, CancelToken::new())? {
        blobs.push(item?);
        if blobs.len() == limit {
            break;
        }
    }
    let continue_after = (blobs.len() == limit)
        .then(|| blobs.last().map(|sb: &SizedBlobRef| sb.blob_ref.to_string()))
        .flatten();
    Ok(Json(json!({
        "blobs": blobs,
        "continueAfter": continue_after,
    })))
}

pub async fn remove(
    State(state): AppState,
    headers: HeaderMap,
    Form(fields): Form<Vec<(String, String)>>,
) -> ServerResult<Json<serde_json::Value>> {
    require_auth(&state, &headers)?;
    if !state.store.can_remove() {
        return Err(ServerError::Forbidden("backend is not deletable".into()));
    }
    let refs = blob_fields(&fields)?;
    state.store.remove(&refs)?;
    Ok(Json(json!({ "removed": refs })))
}

/// Decode `blob1=<ref>&blob2=<ref>…` form fields.
fn blob_fields(fields: &[(String, String)]) -> ServerResult<Vec<BlobRef>> {
    let mut refs = Vec::new();
    for (name, value) in fields {
        if name.starts_with("blob") {
            refs.push(BlobRef::parse(value)?);
        }
    }
    Ok(refs)
}

// ---------------------------------------------------------------------------
// Search surface
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct RecentParams {
    pub limit: Option<usize>,
    pub before: Option<DateTime<Utc>>,
}

pub async fn search_recent(
    State(state): AppState,
    headers: HeaderMap,
    Query(params): Query<RecentParams>,
) -> ServerResult<Json<serde_json::Value>> {
    require_auth(&state, &headers)?;
    let response = state
        .search
        .recent(params.limit.unwrap_or(0), params.before)?;
    Ok(Json(serde_json::to_value(response).expect("serializable")))
}

#[derive(Deserialize)]
pub struct ClaimsParams {
    pub permanode: String,
}

pub async fn search_claims(
    State(state): AppState,
    headers: HeaderMap,
    Query(params): Query<ClaimsParams>,
) -> ServerResult<Json<serde_json::Value>> {
    require_auth(&state, &headers)?;
    let pn = BlobRef::parse(&params.permanode)?;
    let response = state.search.claims(&pn)?;
    Ok(Json(serde_json::to_value(response).expect("serializable")))
}

#[derive(Deserialize)]
pub struct DescribeParams {
    pub blobref: String,
    pub depth: Option<usize>,
}

pub async fn search_describe(
    State(state): AppState,
    headers: HeaderMap,
    Query(params): Query<DescribeParams>,
) -> ServerResult<Json<serde_json::Value>> {
    require_auth(&state, &headers)?;
    let br = BlobRef::parse(&params.blobref)?;
    let response = state.search.describe(&br, params.depth.unwrap_or(4))?;
    Ok(Json(serde_json::to_value(response).expect("serializable")))
}

#[derive(Deserialize)]
pub struct PermanodeAttrParams {
    pub attr: String,
    #[serde(default)]
    pub value: String,
    pub max: Option<usize>,
}

pub async fn search_permanode_attr(
    State(state): AppState,
    headers: HeaderMap,
    Query(params): Query<PermanodeAttrParams>,
) -> ServerResult<Json<serde_json::Value>> {
    require_auth(&state, &headers)?;
    let found =
        state
            .search
            .permanodes_with_attr(&params.attr, &params.value, params.max.unwrap_or(0))?;
    Ok(Json(json!({ "withAttr": found })))
}

#[derive(Deserialize)]
pub struct FilesParams {
    pub wholedigest: String,
}

pub async fn search_files(
    State(state): AppState,
    headers: HeaderMap,
    Query(params): Query<FilesParams>,
) -> ServerResult<Json<serde_json::Value>> {
    require_auth(&state, &headers)?;
    let whole = BlobRef::parse(&params.wholedigest)?;
    let response = state.search.files_by_whole_ref(&whole)?;
    Ok(Json(serde_json::to_value(response).expect("serializable")))
}

#[derive(Deserialize)]
pub struct QueryGetParams {
    #[serde(default)]
    pub q: String,
    pub limit: Option<usize>,
}

pub async fn search_query_get(
    State(state): AppState,
    headers: HeaderMap,
    Query(params): Query<QueryGetParams>,
) -> ServerResult<Json<serde_json::Value>> {
    require_auth(&state, &headers)?;
    let query = SearchQuery {
        expression: Some(params.q),
        limit: params.limit.unwrap_or(0),
        ..Default::default()
    };
    let response = state.search.query(&query)?;
    Ok(Json(serde_json::to_value(response).expect("serializable")))
}

pub async fn search_query_post(
    State(state): AppState,
    headers: HeaderMap,
    Json(query): Json<SearchQuery>,
) -> ServerResult<Json<serde_json::Value>> {
    require_auth(&state, &headers)?;
    let response = state.search.query(&query)?;
    Ok(Json(serde_json::to_value(response).expect("serializable")))
}

// ---------------------------------------------------------------------------
// Signing surface
// ---------------------------------------------------------------------------

pub async fn sig_sign(
    State(state): AppState,
    headers: HeaderMap,
    Form(fields): Form<Vec<(String, String)>>,
) -> ServerResult<Response> {
    require_auth(&state, &headers)?;
    let Some(signer) = &state.signer else {
        return Err(ServerError::Forbidden("server has no signing key".into()));
    };
    let unsigned = fields
        .iter()
        .find(|(k, _)| k == "json")
        .map(|(_, v)| v.clone())
        .ok_or_else(|| ServerError::BadRequest("missing json field".into()))?;
    let unsigned = if unsigned.contains("\"camliSigner\"") {
        unsigned
    } else {
        let body = unsigned
            .trim_end()
            .strip_suffix('}')
            .ok_or_else(|| ServerError::BadRequest("json is not an object".into()))?;
        format!("{body},\"camliSigner\":\"{}\"}}", signer.public_key_ref())
    };
    let signed = signer.sign_json(&unsigned)?;
    Ok(([(header::CONTENT_TYPE, "text/plain")], signed).into_response())
}

pub async fn sig_verify(
    State(state): AppState,
    headers: HeaderMap,
    Form(fields): Form<Vec<(String, String)>>,
) -> ServerResult<Json<serde_json::Value>> {
    require_auth(&state, &headers)?;
    let signed = fields
        .iter()
        .find(|(k, _)| k == "sjson")
        .map(|(_, v)| v.clone())
        .ok_or_else(|| ServerError::BadRequest("missing sjson field".into()))?;
    let fetcher = StoreFetcher(state.store.as_ref());
    match sign::verify(signed.as_bytes(), &fetcher) {
        Ok(vs) => Ok(Json(json!({
            "signatureValid": true,
            "verifiedData": {
                "camliSigner": vs.signer,
                "signerKeyId": vs.key_id,
            },
        }))),
        Err(e) => Ok(Json(json!({
            "signatureValid": false,
            "errorMessage": e.to_string(),
        }))),
    }
}

pub async fn sig_discovery(
    State(state): AppState,
    headers: HeaderMap,
) -> ServerResult<Json<serde_json::Value>> {
    require_auth(&state, &headers)?;
    let public_key_ref = state
        .signer
        .as_ref()
        .map(|s| s.public_key_ref().to_string());
    Ok(Json(json!({
        "publicKeyBlobRef": public_key_ref,
        "signHandler": "/camli/sig/sign",
        "verifyHandler": "/camli/sig/verify",
    })))
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

pub async fn discovery(State(state): AppState, headers: HeaderMap) -> ServerResult<Response> {
    let wants_config = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/x-camli-configuration"));
    if !wants_config {
        return Ok((StatusCode::OK, "hoard blob server").into_response());
    }
    require_auth(&state, &headers)?;
    let generation = state.store.generation().ok();
    Ok(Json(json!({
        "blobRoot": "/camli/",
        "searchRoot": "/camli/search/",
        "ownerName": state.config.owner_name,
        "publicKeyBlobRef": state.signer.as_ref().map(|s| s.public_key_ref().to_string()),
        "storageGeneration": generation.as_ref().map(|g| g.random.clone()),
        "storageInitTime": generation.as_ref().map(|g| g.init_time.to_rfc3339()),
        "syncHandlers": state.sync_handlers,
        "thumbVersion": hoard_search::THUMB_VERSION,
    }))
    .into_response())
}
