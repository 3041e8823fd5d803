//! Persistent store on the local file system.
//!
//! # Layout
//!
//! ```text
//! {root}/
//! ├── <base64url(store name)>/
//! │   ├── .created              # RFC 3339 creation time, orders `keys`
//! │   └── <sha256(key)>.entry   # JSON metadata line, '\n', raw body
//! └── .staging-<uuid>/          # transient, used by put_all
//! ```
//!
//! Every entry is written to a temporary file and renamed into place, so a
//! reader sees either the previous entry or the new one.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{CacheEntry, CacheStorage};
use crate::error::{Error, Result};
use crate::request::{Request, RequestKey, Response, ResponseType};

const CREATED_FILE: &str = ".created";
const ENTRY_EXTENSION: &str = "entry";
const STAGING_PREFIX: &str = ".staging-";

/// On-disk metadata written before the body.
#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    key: RequestKey,
    vary_headers: Vec<(String, String)>,
    status: u16,
    /// Header values are base64 so non-UTF-8 bytes survive.
    headers: Vec<(String, String)>,
    kind: ResponseType,
    redirected: bool,
    url: Option<String>,
    stored_at: DateTime<Utc>,
    body_len: u64,
    body_sha256: String,
}

/// [`CacheStorage`] persisted under a root directory.
#[derive(Debug, Clone)]
pub struct DiskCacheStorage {
    root: PathBuf,
}

impl DiskCacheStorage {
    /// Creates a storage rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn store_dir(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() {
            return Err(Error::Store("store name must not be empty".to_string()));
        }
        Ok(self.root.join(URL_SAFE_NO_PAD.encode(name.as_bytes())))
    }

    async fn created_at(dir: &Path) -> DateTime<Utc> {
        tokio::fs::read_to_string(dir.join(CREATED_FILE))
            .await
            .ok()
            .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
            .map_or(DateTime::<Utc>::MIN_UTC, |t| t.with_timezone(&Utc))
    }

    async fn ensure_store(&self, name: &str) -> Result<PathBuf> {
        let dir = self.store_dir(name)?;
        tokio::fs::create_dir_all(&dir).await?;
        let marker = dir.join(CREATED_FILE);
        // The marker only ever appears complete; two racing opens may both
        // write it, leaving one of two near-identical timestamps.
        if !tokio::fs::try_exists(&marker).await? {
            write_atomic(&marker, Utc::now().to_rfc3339().as_bytes()).await?;
        }
        Ok(dir)
    }

    async fn store_exists(&self, name: &str) -> Result<bool> {
        match tokio::fs::metadata(self.store_dir(name)?).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn existing_store(&self, name: &str) -> Result<PathBuf> {
        if self.store_exists(name).await? {
            self.store_dir(name)
        } else {
            Err(Error::StoreNotFound(name.to_string()))
        }
    }

    /// Moves staged entry files into the store directory.
    async fn commit_staged(&self, name: &str, staging: &Path, files: &[String]) -> Result<()> {
        let dir = self.ensure_store(name).await?;
        for file in files {
            tokio::fs::rename(staging.join(file), dir.join(file)).await?;
        }
        Ok(())
    }
}

/// Returns the entry file name for a key.
fn entry_file_name(key: &RequestKey) -> String {
    let digest = Sha256::digest(key.to_string().as_bytes());
    format!("{digest:x}.{ENTRY_EXTENSION}")
}

/// Writes `contents` to a sibling temp file and renames it over `path`.
async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
    tokio::fs::write(&tmp, contents).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

fn encode_entry(entry: &CacheEntry) -> Result<Vec<u8>> {
    let response = &entry.response;
    let meta = EntryMeta {
        key: entry.key.clone(),
        vary_headers: entry.vary_headers.clone(),
        status: response.status.as_u16(),
        headers: response
            .headers
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), BASE64.encode(value.as_bytes())))
            .collect(),
        kind: response.kind,
        redirected: response.redirected,
        url: response.url.as_ref().map(ToString::to_string),
        stored_at: entry.stored_at,
        body_len: response.body.len() as u64,
        body_sha256: format!("{:x}", Sha256::digest(&response.body)),
    };
    let mut out = serde_json::to_vec(&meta)?;
    out.push(b'\n');
    out.extend_from_slice(&response.body);
    Ok(out)
}

fn decode_entry(raw: &[u8]) -> Result<CacheEntry> {
    let split = raw
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| Error::Store("entry has no metadata line".to_string()))?;
    let meta: EntryMeta = serde_json::from_slice(&raw[..split])?;
    let body = Bytes::copy_from_slice(&raw[split + 1..]);

    if body.len() as u64 != meta.body_len
        || format!("{:x}", Sha256::digest(&body)) != meta.body_sha256
    {
        return Err(Error::Store(format!("body mismatch for {}", meta.key)));
    }

    let status = StatusCode::from_u16(meta.status)
        .map_err(|e| Error::Store(format!("status {}: {e}", meta.status)))?;

    let mut headers = HeaderMap::new();
    for (name, value) in &meta.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::Store(format!("header name {name}: {e}")))?;
        let bytes = BASE64
            .decode(value)
            .map_err(|e| Error::Store(format!("header {name}: {e}")))?;
        let value = HeaderValue::from_bytes(&bytes)
            .map_err(|e| Error::Store(format!("header {name}: {e}")))?;
        headers.append(name, value);
    }

    let url = meta
        .url
        .as_deref()
        .map(Url::parse)
        .transpose()
        .map_err(|e| Error::Store(format!("url: {e}")))?;

    Ok(CacheEntry {
        key: meta.key,
        vary_headers: meta.vary_headers,
        response: Response {
            status,
            headers,
            body,
            kind: meta.kind,
            redirected: meta.redirected,
            url,
        },
        stored_at: meta.stored_at,
    })
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        self.ensure_store(name).await.map(|_| ())
    }

    async fn has(&self, name: &str) -> Result<bool> {
        self.store_exists(name).await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut read_dir = match tokio::fs::read_dir(&self.root).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut stores = Vec::new();
        while let Some(dirent) = read_dir.next_entry().await? {
            let file_name = dirent.file_name();
            let Some(encoded) = file_name.to_str() else {
                continue;
            };
            if encoded.starts_with('.') || !dirent.file_type().await?.is_dir() {
                continue;
            }
            let Some(name) = URL_SAFE_NO_PAD
                .decode(encoded)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
            else {
                log::debug!("Ignoring foreign directory in store root: {encoded}");
                continue;
            };
            stores.push((Self::created_at(&dirent.path()).await, name));
        }

        stores.sort();
        Ok(stores.into_iter().map(|(_, name)| name).collect())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        match tokio::fs::remove_dir_all(self.store_dir(name)?).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn match_request(&self, name: &str, request: &Request) -> Result<Option<Response>> {
        let dir = self.existing_store(name).await?;
        let raw = match tokio::fs::read(dir.join(entry_file_name(&request.key()))).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let entry = decode_entry(&raw)?;
        Ok(entry.matches(request).then_some(entry.response))
    }

    async fn put(&self, name: &str, entry: CacheEntry) -> Result<()> {
        let dir = self.ensure_store(name).await?;
        let encoded = encode_entry(&entry)?;
        write_atomic(&dir.join(entry_file_name(&entry.key)), &encoded).await
    }

    async fn put_all(&self, name: &str, entries: Vec<CacheEntry>) -> Result<()> {
        let staging = self
            .root
            .join(format!("{STAGING_PREFIX}{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&staging).await?;

        let staged = stage_entries(&staging, &entries).await;
        let result = match staged {
            Ok(files) => self.commit_staged(name, &staging, &files).await,
            Err(e) => Err(e),
        };
        let _ = tokio::fs::remove_dir_all(&staging).await;
        result
    }

    async fn entries(&self, name: &str) -> Result<Vec<CacheEntry>> {
        let dir = self.existing_store(name).await?;
        let mut read_dir = tokio::fs::read_dir(&dir).await?;
        let mut entries = Vec::new();
        while let Some(dirent) = read_dir.next_entry().await? {
            let path = dirent.path();
            if path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION) {
                entries.push(decode_entry(&tokio::fs::read(&path).await?)?);
            }
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}

/// Encodes every entry into `staging`, returning the file names written.
async fn stage_entries(staging: &Path, entries: &[CacheEntry]) -> Result<Vec<String>> {
    let mut files = Vec::with_capacity(entries.len());
    for entry in entries {
        let file = entry_file_name(&entry.key);
        tokio::fs::write(staging.join(&file), encode_entry(entry)?).await?;
        files.push(file);
    }
    Ok(files)
}
