use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Which file namespace a call targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Public,
    Private,
}

impl Network {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileListQuery {
    #[serde(default)]
    pub network: Network,
    pub name: Option<String>,
    pub cid: Option<String>,
    pub mime_type: Option<String>,
    pub limit: Option<u32>,
    pub page_token: Option<String>,
}

impl FileListQuery {
    pub(crate) fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        push_opt(&mut out, "name", self.name.as_deref());
        push_opt(&mut out, "cid", self.cid.as_deref());
        push_opt(&mut out, "mimeType", self.mime_type.as_deref());
        if let Some(limit) = self.limit {
            out.push(("limit", limit.to_string()));
        }
        push_opt(&mut out, "pageToken", self.page_token.as_deref());
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRef {
    #[serde(default)]
    pub network: Network,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFileRequest {
    #[serde(default)]
    pub network: Network,
    pub id: String,
    pub name: Option<String>,
    pub keyvalues: Option<Map<String, Value>>,
}

impl UpdateFileRequest {
    pub(crate) fn body(&self) -> Value {
        let mut body = Map::new();
        if let Some(name) = &self.name {
            body.insert("name".to_string(), Value::String(name.clone()));
        }
        if let Some(kv) = &self.keyvalues {
            body.insert("keyvalues".to_string(), Value::Object(kv.clone()));
        }
        Value::Object(body)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupListQuery {
    #[serde(default)]
    pub network: Network,
    pub name: Option<String>,
    pub is_public: Option<bool>,
    pub limit: Option<u32>,
    pub page_token: Option<String>,
}

impl GroupListQuery {
    pub(crate) fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        push_opt(&mut out, "name", self.name.as_deref());
        if let Some(p) = self.is_public {
            out.push(("isPublic", p.to_string()));
        }
        if let Some(limit) = self.limit {
            out.push(("limit", limit.to_string()));
        }
        push_opt(&mut out, "pageToken", self.page_token.as_deref());
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequest {
    #[serde(default)]
    pub network: Network,
    pub name: String,
    pub is_public: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateGroupRequest {
    #[serde(default)]
    pub network: Network,
    pub id: String,
    pub name: Option<String>,
    pub is_public: Option<bool>,
}

/// Group body shared by create and update; upstream uses snake_case here.
pub(crate) fn group_body(name: Option<&str>, is_public: Option<bool>) -> Value {
    let mut body = Map::new();
    if let Some(name) = name {
        body.insert("name".to_string(), Value::String(name.to_string()));
    }
    if let Some(p) = is_public {
        body.insert("is_public".to_string(), Value::Bool(p));
    }
    Value::Object(body)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMembership {
    #[serde(default)]
    pub network: Network,
    pub group_id: String,
    pub file_id: String,
}

fn default_link_expiry_secs() -> u64 {
    600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateLinkRequest {
    pub cid: String,
    #[serde(default = "default_link_expiry_secs")]
    pub expires: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayFetchRequest {
    pub cid: String,
    #[serde(default)]
    pub network: Network,
}

/// Content fetched through the gateway, truncated to a fixed cap. `size` is
/// the declared length when the gateway sent one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayContent {
    pub cid: String,
    pub content_type: Option<String>,
    pub size: u64,
    pub truncated: bool,
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    pub limit: Option<u32>,
    pub page_token: Option<String>,
}

impl PageQuery {
    pub(crate) fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        if let Some(limit) = self.limit {
            out.push(("limit", limit.to_string()));
        }
        push_opt(&mut out, "pageToken", self.page_token.as_deref());
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentInstructionRequest {
    pub name: String,
    pub description: Option<String>,
    /// Passed through untouched; the upstream owns the schema.
    pub payment_requirements: Vec<Value>,
}

impl CreatePaymentInstructionRequest {
    pub(crate) fn body(&self) -> Value {
        let mut body = Map::new();
        body.insert("name".to_string(), Value::String(self.name.clone()));
        if let Some(d) = &self.description {
            body.insert("description".to_string(), Value::String(d.clone()));
        }
        body.insert(
            "payment_requirements".to_string(),
            Value::Array(self.payment_requirements.clone()),
        );
        Value::Object(body)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureRef {
    #[serde(default)]
    pub network: Network,
    pub cid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddSignatureRequest {
    #[serde(default)]
    pub network: Network,
    pub cid: String,
    pub signature: String,
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorQuery {
    pub group_id: String,
    pub text: String,
}

fn push_opt(out: &mut Vec<(&'static str, String)>, key: &'static str, v: Option<&str>) {
    if let Some(v) = v.filter(|s| !s.is_empty()) {
        out.push((key, v.to_string()));
    }
}
