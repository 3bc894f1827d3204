/// Lookup Service (C4): the read-only JSON HTTP surface over the Binding Store.
///
/// The original service exposes this as a Connect-RPC/protobuf contract
/// (`bingov1.LookupService`). That framework sits outside this crate's
/// scope — only the request/response shapes and the `Bingo-Version` response
/// header are part of the contract this module honors, expressed as plain
/// axum JSON handlers (this repo's stack is axum throughout, not tonic).
use crate::context::AppContext;
use crate::error::{BingoError, BingoResult};
use crate::metrics;
use crate::store::CachedEntry;
use axum::extract::State;
use axum::http::{HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

static BINGO_VERSION_HEADER: HeaderName = HeaderName::from_static("bingo-version");
const BINGO_VERSION: &str = "v1";

#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    #[serde(rename = "handleOrDid")]
    pub handle_or_did: String,
}

#[derive(Debug, Deserialize)]
pub struct BulkLookupRequest {
    #[serde(rename = "handlesOrDids")]
    pub handles_or_dids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct LookupResponse {
    pub handle: String,
    pub did: String,
    #[serde(rename = "isValid")]
    pub is_valid: bool,
    #[serde(rename = "lastCheckedTime")]
    pub last_checked_time: u64,
}

impl From<CachedEntry> for LookupResponse {
    fn from(entry: CachedEntry) -> Self {
        Self {
            handle: entry.handle,
            did: entry.did,
            is_valid: entry.valid,
            last_checked_time: entry.checked,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BulkLookupResponse {
    pub responses: Vec<LookupResponse>,
}

fn is_did(handle_or_did: &str) -> bool {
    handle_or_did.starts_with("did:")
}

fn with_bingo_version(response: impl IntoResponse) -> Response {
    let mut response = response.into_response();
    response
        .headers_mut()
        .insert(BINGO_VERSION_HEADER.clone(), HeaderValue::from_static(BINGO_VERSION));
    response
}

pub async fn lookup(
    State(ctx): State<AppContext>,
    axum::extract::Query(query): axum::extract::Query<LookupQuery>,
) -> Response {
    match ctx.store.lookup(&query.handle_or_did).await {
        Ok(entry) => {
            metrics::record_lookup("hit");
            with_bingo_version(Json(LookupResponse::from(entry)))
        }
        Err(e) => {
            metrics::record_lookup(if e.is_not_found() { "miss" } else { "error" });
            with_bingo_version(e)
        }
    }
}

pub async fn bulk_lookup(
    State(ctx): State<AppContext>,
    Json(request): Json<BulkLookupRequest>,
) -> Response {
    match bulk_lookup_inner(&ctx, request).await {
        Ok(response) => {
            metrics::record_lookup("bulk_ok");
            with_bingo_version(Json(response))
        }
        Err(e) => {
            metrics::record_lookup("bulk_error");
            with_bingo_version(e)
        }
    }
}

async fn bulk_lookup_inner(ctx: &AppContext, request: BulkLookupRequest) -> BingoResult<BulkLookupResponse> {
    if request.handles_or_dids.is_empty() {
        return Err(BingoError::InvalidArgument("handlesOrDids must not be empty".to_string()));
    }

    let mut dids = Vec::new();
    let mut handles = Vec::new();
    for item in request.handles_or_dids {
        if is_did(&item) {
            dids.push(item);
        } else {
            handles.push(item);
        }
    }

    let mut responses = Vec::new();
    if !dids.is_empty() {
        responses.extend(ctx.store.bulk_lookup_by_did(&dids).await?.into_iter().map(LookupResponse::from));
    }
    if !handles.is_empty() {
        responses.extend(ctx.store.bulk_lookup_by_handle(&handles).await?.into_iter().map(LookupResponse::from));
    }

    Ok(BulkLookupResponse { responses })
}
