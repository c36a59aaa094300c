use http::header::{self, HeaderValue};
use http::{Method, Request, StatusCode};
use hyper::client::HttpConnector;
use hyper::Body;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::de::DeserializeOwned;
use std::str::FromStr;
use std::time::Duration;

const CONSUL_INDEX_HEADER: &str = "X-Consul-Index";
const CONSUL_TOKEN_HEADER: &str = "X-Consul-Token";

// Consul may hold a blocking query for up to wait/16 past the requested wait.
const DEADLINE_SLACK: Duration = Duration::from_secs(10);

const QUERY_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'&')
    .add(b'+')
    .add(b'=')
    .add(b'?');

const PATH_SEGMENT_ENCODE_SET: &AsciiSet = &QUERY_ENCODE_SET
    .add(b'/')
    .add(b'%')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Escapes `segment` for use as a single path segment.
pub(crate) fn path_segment(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT_ENCODE_SET).to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("failed to build request: {0}")]
    Http(#[from] http::Error),

    #[error("http transport error: {0}")]
    Hyper(#[from] hyper::Error),

    #[error("blocking query not answered within {0:?}")]
    Timeout(Duration),

    #[error("consul responded {status}: {body}")]
    Response {
        status: StatusCode,
        meta: QueryMeta,
        body: String,
    },

    #[error("failed to decode response: {0}")]
    Json(#[from] serde_json::Error),
}

/// Options of a read against the catalog.
///
/// A non-zero `wait_index` together with `wait_time` turns the read into a
/// blocking query that returns once the resource index moves past
/// `wait_index` or the wait elapses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOption {
    pub wait_index: u64,
    pub wait_time: Option<Duration>,
    pub dc: Option<String>,
    pub tag: Option<String>,
    pub allow_stale: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryMeta {
    pub last_index: u64,
}

fn parse_query_meta<T>(resp: &http::Response<T>) -> QueryMeta {
    let last_index = resp
        .headers()
        .get(CONSUL_INDEX_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| u64::from_str(s).ok())
        .unwrap_or(0);
    QueryMeta { last_index }
}

fn format_wait(wait: Duration) -> String {
    format!("{}ms", wait.as_millis().max(1))
}

struct ClientRequest<'a> {
    method: Method,
    path: &'a str,
    params: Vec<(&'a str, String)>,
}

#[derive(Debug, Clone)]
pub struct Client {
    base: String,
    token: Option<String>,
    hc: hyper::Client<HttpConnector>,
}

impl Client {
    pub fn new(base: String, token: Option<String>) -> Client {
        let mut base = base;
        if !base.contains("://") {
            base.insert_str(0, "http://");
        }
        if !base.ends_with('/') {
            base.push('/');
        }
        Client {
            base,
            token,
            hc: hyper::Client::builder().build_http(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn build_uri(&self, path: &str, params: &[(&str, String)]) -> String {
        let mut u = String::with_capacity(self.base.len() + path.len() + params.len() * 16);
        u.push_str(&self.base);
        u.push_str(path.trim_start_matches('/'));
        for (i, (key, value)) in params.iter().enumerate() {
            u.push(if i == 0 { '?' } else { '&' });
            u.push_str(key);
            if !value.is_empty() {
                u.push('=');
                u.extend(utf8_percent_encode(value, QUERY_ENCODE_SET));
            }
        }
        u
    }

    fn build_request(&self, req: ClientRequest) -> Result<Request<Body>, QueryError> {
        let uri = self.build_uri(req.path, &req.params);
        let mut builder = Request::builder()
            .method(req.method)
            .uri(uri)
            .header(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(ref t) = self.token {
            builder = builder.header(CONSUL_TOKEN_HEADER, t.as_str());
        }
        Ok(builder.body(Body::empty())?)
    }

    async fn send(
        &self,
        req: ClientRequest<'_>,
    ) -> Result<(StatusCode, QueryMeta, Vec<u8>), QueryError> {
        let request = self.build_request(req)?;
        let resp = self.hc.request(request).await?;
        let status = resp.status();
        let meta = parse_query_meta(&resp);
        let chunk = hyper::body::to_bytes(resp.into_body()).await?;
        Ok((status, meta, chunk.to_vec()))
    }

    pub(crate) async fn query<T: DeserializeOwned>(
        &self,
        path: &str,
        params: Vec<(&str, String)>,
        qo: Option<&QueryOption>,
    ) -> Result<(QueryMeta, T), QueryError> {
        let mut params = params;
        let mut deadline = None;
        if let Some(qo) = qo {
            if let Some(ref v) = qo.dc {
                params.push(("dc", v.clone()));
            }
            if let Some(ref v) = qo.tag {
                params.push(("tag", v.clone()));
            }
            if qo.allow_stale {
                params.push(("stale", String::new()));
            }
            if qo.wait_index != 0 {
                params.push(("index", qo.wait_index.to_string()));
            }
            if let Some(wait) = qo.wait_time {
                params.push(("wait", format_wait(wait)));
                deadline = Some(wait + wait / 16 + DEADLINE_SLACK);
            }
        }

        let request = ClientRequest {
            method: Method::GET,
            path,
            params,
        };
        let (status, meta, chunk) = match deadline {
            Some(limit) => tokio::time::timeout(limit, self.send(request))
                .await
                .map_err(|_| QueryError::Timeout(limit))??,
            None => self.send(request).await?,
        };

        if !status.is_success() {
            return Err(QueryError::Response {
                status,
                meta,
                body: String::from_utf8_lossy(&chunk).into_owned(),
            });
        }
        Ok((meta, serde_json::from_slice(&chunk)?))
    }
}
