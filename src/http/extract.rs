//! Request-side plumbing: caller identity, paging queries and multipart
//! uploads spooled to temp files.

use std::collections::HashMap;

use anyhow::Context;
use axum::{
    extract::{
        FromRequestParts,
        multipart::{Field, Multipart, MultipartError},
    },
    http::{HeaderMap, header, request::Parts},
};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use super::{ApiError, AppState};
use crate::blob::UploadedFile;
use crate::error::ServiceError;
use crate::identity::Viewer;
use crate::ids::ObjectId;
use crate::models::TagsInput;
use crate::pagination::PageRequest;

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

/// The caller on read routes. A missing, expired or forged token reads as an
/// anonymous caller.
#[derive(Debug, Clone)]
pub struct Caller(pub Viewer);

/// The caller on mutation routes. Anything but a valid access token for an
/// existing user is rejected with 401.
#[derive(Debug, Clone)]
pub struct Authenticated(pub Viewer);

impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(token) = access_token(&parts.headers) else {
            return Ok(Self(Viewer::anonymous()));
        };
        match state.platform.accounts.authenticate(&token).await {
            Ok(user) => Ok(Self(Viewer::user(user))),
            Err(ServiceError::Unauthenticated(_)) => Ok(Self(Viewer::anonymous())),
            Err(err) => Err(err.into()),
        }
    }
}

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = access_token(&parts.headers)
            .ok_or_else(|| ServiceError::unauthenticated("unauthorized request"))?;
        let user = state.platform.accounts.authenticate(&token).await?;
        Ok(Self(Viewer::user(user)))
    }
}

/// Cookie first, then `Authorization: Bearer`.
fn access_token(headers: &HeaderMap) -> Option<String> {
    cookie(headers, ACCESS_COOKIE).or_else(|| bearer(headers))
}

pub(super) fn cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_string())
}

pub(super) fn parse_id(raw: &str, what: &str) -> Result<ObjectId, ApiError> {
    Ok(ObjectId::parse(raw, what)?)
}

/// Paging values arrive as loose strings; anything unparsable falls back to
/// the defaults.
#[derive(Debug, Default, Deserialize)]
pub(super) struct PageQuery {
    page: Option<String>,
    limit: Option<String>,
}

impl PageQuery {
    pub(super) fn request(&self) -> PageRequest {
        page_request(self.page.as_deref(), self.limit.as_deref())
    }
}

pub(super) fn page_request(page: Option<&str>, limit: Option<&str>) -> PageRequest {
    PageRequest::from_optional(number(page), number(limit))
}

pub(super) fn number(raw: Option<&str>) -> Option<i64> {
    raw?.trim().parse().ok()
}

/// A multipart body with its text fields in memory and its files spooled to
/// temp files. Files nobody takes are removed when the form is dropped.
#[derive(Debug, Default)]
pub(super) struct UploadForm {
    fields: HashMap<String, Vec<String>>,
    files: HashMap<String, UploadedFile>,
}

impl UploadForm {
    pub(super) async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await.map_err(malformed)? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            if field.file_name().is_some() {
                let upload = spool(field).await?;
                // Browsers send an empty part for an untouched file input.
                if upload.size() > 0 {
                    form.files.insert(name, upload);
                }
            } else {
                let text = field.text().await.map_err(malformed)?;
                form.fields.entry(name).or_default().push(text);
            }
        }
        Ok(form)
    }

    pub(super) fn text(&self, name: &str) -> Option<String> {
        self.fields.get(name)?.first().cloned()
    }

    pub(super) fn flag(&self, name: &str) -> Option<bool> {
        match self.text(name)?.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "on" => Some(true),
            "false" | "0" | "off" => Some(false),
            _ => None,
        }
    }

    /// Accepts repeated `tags` parts, a JSON array or a delimited string.
    pub(super) fn tags(&self) -> Option<TagsInput> {
        let values = self
            .fields
            .get("tags")
            .or_else(|| self.fields.get("tags[]"))?;
        match values.as_slice() {
            [] => None,
            [single] => Some(
                serde_json::from_str::<Vec<String>>(single)
                    .map(TagsInput::List)
                    .unwrap_or_else(|_| TagsInput::Delimited(single.clone())),
            ),
            many => Some(TagsInput::List(many.to_vec())),
        }
    }

    pub(super) fn take_file(&mut self, name: &str) -> Option<UploadedFile> {
        self.files.remove(name)
    }
}

async fn spool(mut field: Field<'_>) -> Result<UploadedFile, ApiError> {
    let file_name = field.file_name().map(str::to_string);
    let content_type = field.content_type().map(str::to_string);
    let path = tempfile::NamedTempFile::new()
        .context("creating upload temp file")
        .map_err(ServiceError::Persistence)?
        .into_temp_path();
    let mut out = tokio::fs::File::create(&path)
        .await
        .with_context(|| format!("opening {}", path.display()))
        .map_err(ServiceError::Persistence)?;

    let mut size = 0u64;
    while let Some(chunk) = field.chunk().await.map_err(malformed)? {
        out.write_all(&chunk)
            .await
            .context("writing upload chunk")
            .map_err(ServiceError::Persistence)?;
        size += chunk.len() as u64;
    }
    out.flush()
        .await
        .context("flushing upload")
        .map_err(ServiceError::Persistence)?;
    Ok(UploadedFile::new(path, file_name, content_type, size))
}

fn malformed(err: MultipartError) -> ApiError {
    ApiError {
        status: err.status(),
        message: err.body_text(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn cookies_are_found_among_others() {
        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("theme=dark"));
        headers.append(
            header::COOKIE,
            HeaderValue::from_static("session=1; accessToken=abc.def ; x=y"),
        );
        assert_eq!(cookie(&headers, ACCESS_COOKIE).as_deref(), Some("abc.def"));
        assert_eq!(cookie(&headers, REFRESH_COOKIE), None);
    }

    #[test]
    fn cookie_wins_over_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(access_token(&headers).as_deref(), Some("from-header"));

        headers.insert(header::COOKIE, HeaderValue::from_static("accessToken=from-cookie"));
        assert_eq!(access_token(&headers).as_deref(), Some("from-cookie"));

        let mut blank = HeaderMap::new();
        blank.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        blank.insert(header::COOKIE, HeaderValue::from_static("accessToken="));
        assert_eq!(access_token(&blank), None);
    }

    #[test]
    fn paging_values_fall_back_to_defaults() {
        let request = page_request(Some("3"), Some(" 20 "));
        assert_eq!((request.page(), request.limit()), (3, 20));
        assert_eq!(page_request(Some("abc"), None), PageRequest::default());
        assert_eq!(page_request(Some("-4"), Some("0")).page(), 1);
    }

    #[test]
    fn tags_accept_every_shape() {
        let mut form = UploadForm::default();
        assert!(form.tags().is_none());

        form.fields.insert("tags".into(), vec!["rust, axum".into()]);
        assert!(matches!(form.tags(), Some(TagsInput::Delimited(text)) if text == "rust, axum"));

        form.fields.insert("tags".into(), vec![r#"["rust","axum"]"#.into()]);
        assert!(matches!(form.tags(), Some(TagsInput::List(list)) if list.len() == 2));

        form.fields.insert("tags".into(), vec!["rust".into(), "axum".into(), "sql".into()]);
        assert!(matches!(form.tags(), Some(TagsInput::List(list)) if list.len() == 3));
    }

    #[test]
    fn flags_parse_form_booleans() {
        let mut form = UploadForm::default();
        form.fields.insert("isPublished".into(), vec!["TRUE".into()]);
        assert_eq!(form.flag("isPublished"), Some(true));
        form.fields.insert("isPublished".into(), vec!["0".into()]);
        assert_eq!(form.flag("isPublished"), Some(false));
        form.fields.insert("isPublished".into(), vec!["maybe".into()]);
        assert_eq!(form.flag("isPublished"), None);
    }
}
