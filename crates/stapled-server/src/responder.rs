//! HTTP OCSP responder front-end
//!
//! RFC 6960 appendix A surface: requests arrive base64-encoded in the GET
//! path or raw in a POST body, responses go back as
//! `application/ocsp-response`. `GET /` is a cacheable health probe for
//! load balancers.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use stapled_ocsp::{OcspRequest, MALFORMED_REQUEST_RESPONSE, UNAUTHORIZED_RESPONSE};
use tracing::{info, warn};

use crate::cache::EntryCache;
use crate::stable::Failer;

const OCSP_CONTENT_TYPE: &str = "application/ocsp-response";
/// Health-probe cache lifetime: 12 hours.
const HEALTH_MAX_AGE: &str = "max-age=43200";

pub struct Responder {
    cache: Arc<EntryCache>,
    upstream_responders: Vec<String>,
    dont_die_on_stale: bool,
    failer: Arc<dyn Failer>,
}

impl Responder {
    pub fn new(
        cache: Arc<EntryCache>,
        upstream_responders: Vec<String>,
        dont_die_on_stale: bool,
        failer: Arc<dyn Failer>,
    ) -> Arc<Self> {
        Arc::new(Responder {
            cache,
            upstream_responders,
            dont_die_on_stale,
            failer,
        })
    }

    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/", get(health).post(respond_post))
            .route("/*request", get(respond_get))
            .with_state(Arc::clone(self))
    }

    async fn respond(&self, der: &[u8]) -> Response {
        let request = match OcspRequest::parse(der) {
            Ok(request) => request,
            Err(e) => {
                info!("[responder] Rejecting unparsable request: {}", e);
                return ocsp_body(StatusCode::BAD_REQUEST, MALFORMED_REQUEST_RESPONSE.to_vec());
            }
        };

        if let Some((response, stale)) = self.cache.lookup_response(&request) {
            if stale && !self.dont_die_on_stale {
                // a stale staple can break TLS handshakes downstream;
                // refusing (and by default stopping) beats serving it
                self.failer
                    .fail("[responder] Would serve stale response; refusing");
                return ocsp_body(StatusCode::OK, UNAUTHORIZED_RESPONSE.to_vec());
            }
            return ocsp_body(StatusCode::OK, response);
        }

        if self.upstream_responders.is_empty() {
            return ocsp_body(StatusCode::OK, UNAUTHORIZED_RESPONSE.to_vec());
        }
        match self
            .cache
            .add_from_request(&request, &self.upstream_responders)
            .await
        {
            Ok(response) => ocsp_body(StatusCode::OK, response),
            Err(e) => {
                warn!("[responder] Failed to create entry from request: {}", e);
                ocsp_body(StatusCode::OK, UNAUTHORIZED_RESPONSE.to_vec())
            }
        }
    }
}

async fn health() -> Response {
    (
        StatusCode::OK,
        [(header::CACHE_CONTROL, HeaderValue::from_static(HEALTH_MAX_AGE))],
    )
        .into_response()
}

async fn respond_get(State(responder): State<Arc<Responder>>, Path(request): Path<String>) -> Response {
    // the router already percent-decoded the path; that turns '+' into a
    // space, so put the pluses back before base64 decoding
    let restored = request.replace(' ', "+");
    let der = match BASE64.decode(restored.as_bytes()) {
        Ok(der) => der,
        Err(e) => {
            info!("[responder] Rejecting undecodable GET request: {}", e);
            return ocsp_body(StatusCode::BAD_REQUEST, MALFORMED_REQUEST_RESPONSE.to_vec());
        }
    };
    responder.respond(&der).await
}

async fn respond_post(State(responder): State<Arc<Responder>>, body: Bytes) -> Response {
    responder.respond(&body).await
}

fn ocsp_body(status: StatusCode, body: Vec<u8>) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, HeaderValue::from_static(OCSP_CONTENT_TYPE))],
        body,
    )
        .into_response()
}
