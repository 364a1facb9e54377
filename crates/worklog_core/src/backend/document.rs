//! Blocking client for a Firestore-compatible REST document store.
//!
//! # Responsibility
//! - Build document URLs for one project and database.
//! - Map typed field values to and from the REST wire shape.
//! - Expose list/get/create/update/delete/query over named collections.
//!
//! # Invariants
//! - Document IDs are the record IDs; the document `name` ends in `/{id}`.
//! - Missing documents surface as `None`/`false`, never as errors.

use crate::model::profile::ConnectionProfile;
use crate::model::secret::Secret;
use log::{debug, info};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const LIST_PAGE_SIZE: u32 = 300;

#[derive(Debug)]
pub enum DocumentError {
    Http(reqwest::Error),
    Status { status: u16, body: String },
    AlreadyExists(String),
    Credentials { path: PathBuf, reason: String },
    InvalidProfile(String),
    Decode(String),
}

impl Display for DocumentError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http(err) => write!(f, "document store request failed: {err}"),
            Self::Status { status, body } => {
                write!(f, "document store answered {status}: {body}")
            }
            Self::AlreadyExists(name) => write!(f, "document `{name}` already exists"),
            Self::Credentials { path, reason } => {
                write!(f, "credentials file `{}`: {reason}", path.display())
            }
            Self::InvalidProfile(message) => write!(f, "invalid document store profile: {message}"),
            Self::Decode(message) => write!(f, "unexpected document payload: {message}"),
        }
    }
}

impl Error for DocumentError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Http(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for DocumentError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value)
    }
}

pub type DocumentResult<T> = Result<T, DocumentError>;

/// One typed field value in the REST wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldValue {
    NullValue(()),
    BooleanValue(bool),
    /// 64-bit integers travel as decimal strings.
    IntegerValue(String),
    DoubleValue(f64),
    StringValue(String),
    TimestampValue(String),
}

impl FieldValue {
    pub fn string(value: impl Into<String>) -> Self {
        Self::StringValue(value.into())
    }

    pub fn optional_string(value: Option<&str>) -> Self {
        value.map_or(Self::NullValue(()), Self::string)
    }

    pub fn integer(value: i64) -> Self {
        Self::IntegerValue(value.to_string())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::StringValue(value) | Self::TimestampValue(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::IntegerValue(value) => value.parse().ok(),
            Self::DoubleValue(value) if value.fract() == 0.0 => Some(*value as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::DoubleValue(value) => Some(*value),
            Self::IntegerValue(value) => value.parse().ok(),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::NullValue(()))
    }
}

pub type Fields = BTreeMap<String, FieldValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub fields: Fields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<String>,
}

impl Document {
    /// Last path segment of `name`.
    pub fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or_default()
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    documents: Vec<Document>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    #[serde(default)]
    document: Option<Document>,
}

/// Comparison operators supported by `run_query`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Equal,
    GreaterOrEqual,
    LessOrEqual,
}

impl FilterOp {
    fn wire(self) -> &'static str {
        match self {
            Self::Equal => "EQUAL",
            Self::GreaterOrEqual => "GREATER_THAN_OR_EQUAL",
            Self::LessOrEqual => "LESS_THAN_OR_EQUAL",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub field: String,
    pub op: FilterOp,
    pub value: FieldValue,
}

impl FieldFilter {
    pub fn new(field: impl Into<String>, op: FilterOp, value: FieldValue) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }

    fn to_wire(&self) -> serde_json::Value {
        json!({
            "fieldFilter": {
                "field": { "fieldPath": self.field },
                "op": self.op.wire(),
                "value": self.value,
            }
        })
    }
}

#[derive(Debug)]
pub struct DocumentClient {
    http: Client,
    documents_url: String,
    project_id: String,
    bearer: Option<Secret>,
}

impl DocumentClient {
    /// Builds a client for `profile`; performs no network I/O.
    pub fn connect(profile: &ConnectionProfile, timeout: Duration) -> DocumentResult<Self> {
        let project_id = required(profile.project_id.as_deref(), "project_id")?;
        let endpoint = required(profile.endpoint.as_deref(), "endpoint")?;
        let bearer = match profile.credentials_path.as_ref() {
            Some(path) => Some(Secret::new(read_bearer_token(path)?)),
            None => None,
        };
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        let documents_url = format!(
            "{}/v1/projects/{project_id}/databases/(default)/documents",
            endpoint.trim_end_matches('/')
        );
        debug!(
            "event=document_client module=backend status=ok project={project_id} authenticated={}",
            bearer.is_some()
        );
        Ok(Self {
            http,
            documents_url,
            project_id: project_id.to_string(),
            bearer,
        })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Lists one document of `collection` to confirm the store answers.
    pub fn ping(&self, collection: &str) -> DocumentResult<()> {
        self.list_page(collection, 1, None).map(|_| ())
    }

    /// Every document in `collection`, following page tokens.
    pub fn list(&self, collection: &str) -> DocumentResult<Vec<Document>> {
        let mut documents = Vec::new();
        let mut page_token = None;
        loop {
            let page = self.list_page(collection, LIST_PAGE_SIZE, page_token.as_deref())?;
            documents.extend(page.documents);
            match page.next_page_token.filter(|token| !token.is_empty()) {
                Some(token) => page_token = Some(token),
                None => return Ok(documents),
            }
        }
    }

    pub fn get(&self, collection: &str, id: &str) -> DocumentResult<Option<Document>> {
        let response = self.send(self.http.get(self.document_url(collection, id)))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(decode(ok_or_status(response)?)?))
    }

    /// Creates `collection/id`; fails with `AlreadyExists` when taken.
    pub fn create(&self, collection: &str, id: &str, fields: Fields) -> DocumentResult<Document> {
        let request = self
            .http
            .post(self.collection_url(collection))
            .query(&[("documentId", id)])
            .json(&json!({ "fields": fields }));
        let response = self.send(request)?;
        if response.status() == StatusCode::CONFLICT {
            return Err(DocumentError::AlreadyExists(format!("{collection}/{id}")));
        }
        decode(ok_or_status(response)?)
    }

    /// Replaces the fields of an existing document. Returns `false` if absent.
    pub fn update(&self, collection: &str, id: &str, fields: Fields) -> DocumentResult<bool> {
        let request = self
            .http
            .patch(self.document_url(collection, id))
            .query(&[("currentDocument.exists", "true")])
            .json(&json!({ "fields": fields }));
        let response = self.send(request)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        ok_or_status(response)?;
        Ok(true)
    }

    /// Deletes an existing document. Returns `false` if absent.
    pub fn delete(&self, collection: &str, id: &str) -> DocumentResult<bool> {
        let request = self
            .http
            .delete(self.document_url(collection, id))
            .query(&[("currentDocument.exists", "true")]);
        let response = self.send(request)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        ok_or_status(response)?;
        Ok(true)
    }

    /// Structured query with all `filters` ANDed, optionally ordered by a field.
    pub fn run_query(
        &self,
        collection: &str,
        filters: &[FieldFilter],
        order_by: Option<&str>,
    ) -> DocumentResult<Vec<Document>> {
        let mut query = json!({ "from": [{ "collectionId": collection }] });
        match filters {
            [] => {}
            [single] => query["where"] = single.to_wire(),
            many => {
                query["where"] = json!({
                    "compositeFilter": {
                        "op": "AND",
                        "filters": many.iter().map(FieldFilter::to_wire).collect::<Vec<_>>(),
                    }
                });
            }
        }
        if let Some(field) = order_by {
            query["orderBy"] = json!([{ "field": { "fieldPath": field }, "direction": "ASCENDING" }]);
        }

        let url = format!("{}:runQuery", self.documents_url);
        let request = self.http.post(url).json(&json!({ "structuredQuery": query }));
        let results: Vec<QueryResult> = decode(ok_or_status(self.send(request)?)?)?;
        Ok(results.into_iter().filter_map(|result| result.document).collect())
    }

    fn list_page(
        &self,
        collection: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> DocumentResult<ListResponse> {
        let mut request = self
            .http
            .get(self.collection_url(collection))
            .query(&[("pageSize", page_size.to_string())]);
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }
        decode(ok_or_status(self.send(request)?)?)
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/{collection}", self.documents_url)
    }

    fn document_url(&self, collection: &str, id: &str) -> String {
        format!("{}/{collection}/{id}", self.documents_url)
    }

    fn send(&self, request: RequestBuilder) -> DocumentResult<Response> {
        let request = match self.bearer.as_ref() {
            Some(token) => request.bearer_auth(token.expose()),
            None => request,
        };
        Ok(request.send()?)
    }
}

impl Drop for DocumentClient {
    fn drop(&mut self) {
        info!(
            "event=document_client_close module=backend status=ok project={}",
            self.project_id
        );
    }
}

fn required<'a>(value: Option<&'a str>, field: &str) -> DocumentResult<&'a str> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| DocumentError::InvalidProfile(format!("missing `{field}`")))
}

fn ok_or_status(response: Response) -> DocumentResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(DocumentError::Status {
        status: status.as_u16(),
        body: body.chars().take(200).collect(),
    })
}

fn decode<T: for<'de> Deserialize<'de>>(response: Response) -> DocumentResult<T> {
    let body = response.text()?;
    if body.trim().is_empty() {
        return serde_json::from_str("{}").map_err(|err| DocumentError::Decode(err.to_string()));
    }
    serde_json::from_str(&body).map_err(|err| DocumentError::Decode(err.to_string()))
}

/// Reads a bearer token: either the raw file content or `access_token` of a
/// JSON object.
fn read_bearer_token(path: &Path) -> DocumentResult<String> {
    let raw = fs::read_to_string(path).map_err(|err| DocumentError::Credentials {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;
    let trimmed = raw.trim();
    let token = if trimmed.starts_with('{') {
        serde_json::from_str::<serde_json::Value>(trimmed)
            .ok()
            .and_then(|value| value.get("access_token")?.as_str().map(str::to_string))
            .ok_or_else(|| DocumentError::Credentials {
                path: path.to_path_buf(),
                reason: "JSON credentials lack a string `access_token`".to_string(),
            })?
    } else {
        trimmed.to_string()
    };
    if token.is_empty() {
        return Err(DocumentError::Credentials {
            path: path.to_path_buf(),
            reason: "file is empty".to_string(),
        });
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::{Document, FieldValue, Fields};

    #[test]
    fn field_values_use_rest_wire_names() {
        let mut fields = Fields::new();
        fields.insert("hours".to_string(), FieldValue::integer(8));
        fields.insert("note".to_string(), FieldValue::optional_string(None));
        let json = serde_json::to_string(&fields).unwrap();
        assert_eq!(json, r#"{"hours":{"integerValue":"8"},"note":{"nullValue":null}}"#);
    }

    #[test]
    fn document_id_is_last_name_segment() {
        let document: Document = serde_json::from_str(
            r#"{"name":"projects/p/databases/(default)/documents/employees/abc","fields":{"name":{"stringValue":"Ada"}}}"#,
        )
        .unwrap();
        assert_eq!(document.id(), "abc");
        assert_eq!(document.field("name").and_then(FieldValue::as_str), Some("Ada"));
    }
}
