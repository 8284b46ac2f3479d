use std::sync::Arc;
use std::time::Duration;

use hoard_types::{BlobRef, SizedBlobRef};
use serde::Deserialize;
use tokio::sync::Semaphore;

use crate::error::{ClientError, ClientResult};
use crate::havecache::HaveCache;

/// Default cap on in-flight HTTP requests.
pub const MAX_PARALLEL_HTTP: usize = 5;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Client-side credentials, mirroring the server's `CAMLI_AUTH` modes.
#[derive(Clone, Debug, Default)]
pub enum ClientAuth {
    #[default]
    None,
    UserPass {
        user: String,
        pass: String,
    },
    Token(String),
}

impl ClientAuth {
    /// Parse the `CAMLI_AUTH` syntax.
    pub fn parse(s: &str) -> Option<Self> {
        if s.is_empty() || s == "none" {
            return Some(ClientAuth::None);
        }
        if let Some(rest) = s.strip_prefix("userpass:") {
            let (user, pass) = rest.split_once(':')?;
            return Some(ClientAuth::UserPass {
                user: user.to_string(),
                pass: pass.to_string(),
            });
        }
        s.strip_prefix("token:").map(|t| ClientAuth::Token(t.into()))
    }

    fn apply(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            ClientAuth::None => req,
            ClientAuth::UserPass { user, pass } => req.basic_auth(user, Some(pass)),
            ClientAuth::Token(t) => req.bearer_auth(t),
        }
    }
}

/// HTTP client for one hoard server.
///
/// Cheap to clone; clones share the connection pool, the upload gate, and
/// the have-cache.
#[derive(Clone)]
pub struct HoardClient {
    http: reqwest::Client,
    base: String,
    auth: ClientAuth,
    pub(crate) gate: Arc<Semaphore>,
    pub(crate) have_cache: Option<Arc<HaveCache>>,
}

#[derive(Deserialize)]
struct StatResponse {
    stat: Vec<SizedBlobRef>,
}

#[derive(Deserialize)]
pub struct EnumeratePage {
    pub blobs: Vec<SizedBlobRef>,
    #[serde(rename = "continueAfter")]
    pub continue_after: Option<String>,
}

impl HoardClient {
    pub fn new(server: impl Into<String>, auth: ClientAuth) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base: server.into().trim_end_matches('/').to_string(),
            auth,
            gate: Arc::new(Semaphore::new(MAX_PARALLEL_HTTP)),
            have_cache: None,
        })
    }

    /// Attach a have-cache (keyed by the server generation).
    pub fn with_have_cache(mut self, cache: HaveCache) -> Self {
        self.have_cache = Some(Arc::new(cache));
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base)
    }

    async fn check(response: reqwest::Response) -> ClientResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ClientError::Status {
            status: status.as_u16(),
            body,
        })
    }

    /// Server discovery document.
    pub async fn discovery(&self) -> ClientResult<serde_json::Value> {
        let _permit = self.gate.acquire().await.expect("gate closed");
        let response = self
            .auth
            .apply(self.http.get(self.url("")))
            .header(reqwest::header::ACCEPT, "text/x-camli-configuration")
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// The server's storage generation id, for have-cache keys.
    pub async fn storage_generation(&self) -> ClientResult<String> {
        let discovery = self.discovery().await?;
        discovery
            .get("storageGeneration")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ClientError::BadResponse("no storageGeneration".into()))
    }

    /// Which of `refs` the server has.
    pub async fn stat(&self, refs: &[BlobRef]) -> ClientResult<Vec<SizedBlobRef>> {
        if refs.is_empty() {
            return Ok(Vec::new());
        }
        let _permit = self.gate.acquire().await.expect("gate closed");
        let form: Vec<(String, String)> = refs
            .iter()
            .enumerate()
            .map(|(i, br)| (format!("blob{}", i + 1), br.to_string()))
            .collect();
        let response = self
            .auth
            .apply(self.http.post(self.url("camli/stat")))
            .form(&form)
            .send()
            .await?;
        let parsed: StatResponse = Self::check(response).await?.json().await?;
        Ok(parsed.stat)
    }

    /// Raw multipart upload of already-hashed blobs. Most callers want
    /// [`put_blob`](crate::uploader) instead.
    pub async fn upload(&self, blobs: &[(BlobRef, Vec<u8>)]) -> ClientResult<Vec<SizedBlobRef>> {
        let _permit = self.gate.acquire().await.expect("gate closed");
        let mut form = reqwest::multipart::Form::new();
        for (br, data) in blobs {
            form = form.part(
                br.to_string(),
                reqwest::multipart::Part::bytes(data.clone()).file_name(br.to_string()),
            );
        }
        let response = self
            .auth
            .apply(self.http.post(self.url("camli/upload")))
            .multipart(form)
            .send()
            .await?;
        #[derive(Deserialize)]
        struct UploadResponse {
            received: Vec<SizedBlobRef>,
        }
        let parsed: UploadResponse = Self::check(response).await?.json().await?;
        Ok(parsed.received)
    }

    /// Fetch a blob's bytes.
    pub async fn fetch(&self, br: &BlobRef) -> ClientResult<Vec<u8>> {
        let _permit = self.gate.acquire().await.expect("gate closed");
        let response = self
            .auth
            .apply(self.http.get(self.url(&format!("camli/{br}"))))
            .send()
            .await?;
        let data = Self::check(response).await?.bytes().await?.to_vec();
        if !br.verify(&data) {
            return Err(ClientError::BadResponse(format!(
                "server returned bytes not matching {br}"
            )));
        }
        Ok(data)
    }

    /// One page of the server's sorted enumeration.
    pub async fn enumerate(&self, after: &str, limit: usize) -> ClientResult<EnumeratePage> {
        let _permit = self.gate.acquire().await.expect("gate closed");
        let limit = limit.to_string();
        let response = self
            .auth
            .apply(self.http.get(self.url("camli/enumerate-blobs")))
            .query(&[("after", after), ("limit", limit.as_str())])
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Reassemble a file's contents from its `file` schema tree, nested
    /// `bytes` blobs included.
    pub async fn download_file(&self, root: &BlobRef) -> ClientResult<Vec<u8>> {
        use hoard_schema::{CamliType, PartRef, SchemaBlob};

        let root_bytes = self.fetch(root).await?;
        let sb = SchemaBlob::parse(root, &root_bytes)?;
        if !matches!(sb.camli_type(), CamliType::File | CamliType::Bytes) {
            return Err(ClientError::BadResponse(format!(
                "{root} is a {}, not a file",
                sb.camli_type()
            )));
        }
        let mut out = Vec::new();
        let mut work = sb.parts()?;
        while !work.is_empty() {
            let part = work.remove(0);
            match part.part_ref {
                PartRef::Blob(br) => {
                    let chunk = self.fetch(&br).await?;
                    if chunk.len() as u64 != part.size {
                        return Err(ClientError::BadResponse(format!(
                            "chunk {br} is {} bytes, schema says {}",
                            chunk.len(),
                            part.size
                        )));
                    }
                    out.extend(chunk);
                }
                PartRef::Bytes(br) => {
                    let nested_bytes = self.fetch(&br).await?;
                    let nested = SchemaBlob::parse(&br, &nested_bytes)?;
                    for (i, p) in nested.parts()?.into_iter().enumerate() {
                        work.insert(i, p);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Run a search expression.
    pub async fn search(&self, expression: &str) -> ClientResult<serde_json::Value> {
        let _permit = self.gate.acquire().await.expect("gate closed");
        let response = self
            .auth
            .apply(self.http.get(self.url("camli/search/query")))
            .query(&[("q", expression)])
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Describe a blob to `depth`.
    pub async fn describe(&self, br: &BlobRef, depth: usize) -> ClientResult<serde_json::Value> {
        let _permit = self.gate.acquire().await.expect("gate closed");
        let response = self
            .auth
            .apply(self.http.get(self.url("camli/search/describe")))
            .query(&[("blobref", &br.to_string()), ("depth", &depth.to_string())])
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }
}
