use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use jsonschema::Validator;
use pinata_api::{
    AddSignatureRequest, CreateGroupRequest, CreatePaymentInstructionRequest, FileListQuery,
    FileRef, GatewayFetchRequest, GroupListQuery, GroupMembership, PageQuery, PinataClient,
    PinataClientError, PrivateLinkRequest, SignatureRef, UpdateFileRequest, UpdateGroupRequest,
    VectorQuery,
};
use pinata_mcp::{
    CallToolParams, CallToolResult, ListToolsParams, ListToolsResult, McpHandler, Tool,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ToolKind {
    TestAuthentication,
    SearchFiles,
    GetFileById,
    UpdateFile,
    DeleteFile,
    ListGroups,
    CreateGroup,
    GetGroup,
    UpdateGroup,
    DeleteGroup,
    AddFileToGroup,
    RemoveFileFromGroup,
    CreatePrivateDownloadLink,
    FetchFromGateway,
    ListPaymentInstructions,
    CreatePaymentInstruction,
    DeletePaymentInstruction,
    AddSignature,
    GetSignature,
    DeleteSignature,
    VectorizeFile,
    QueryVectors,
}

struct ToolRuntime {
    def: Tool,
    validator: Validator,
    kind: ToolKind,
}

#[derive(Debug, Error)]
enum ToolError {
    #[error("unknown tool: {0}")]
    Unknown(String),
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error(transparent)]
    Upstream(#[from] PinataClientError),
    #[error("encode result: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Tool registry and dispatcher backed by the pinning service client.
///
/// `call_tool` never fails at the protocol level; every failure becomes an
/// `isError` result.
#[derive(Clone)]
pub struct PinataTools {
    client: PinataClient,
    tools: Arc<HashMap<&'static str, ToolRuntime>>,
}

impl PinataTools {
    pub fn new(client: PinataClient) -> anyhow::Result<Self> {
        let mut tools = HashMap::new();
        for (kind, name, description, input_schema) in tool_defs() {
            let validator = jsonschema::validator_for(&input_schema)
                .map_err(|e| anyhow::anyhow!(e.to_string()))
                .with_context(|| format!("compile input schema for {name}"))?;
            tools.insert(
                name,
                ToolRuntime {
                    def: Tool {
                        name: name.to_string(),
                        description: Some(description.to_string()),
                        input_schema,
                    },
                    validator,
                    kind,
                },
            );
        }
        Ok(Self {
            client,
            tools: Arc::new(tools),
        })
    }

    pub fn tool_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.tools.keys().copied().collect();
        names.sort_unstable();
        names
    }

    async fn dispatch(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        let rt = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::Unknown(name.to_string()))?;
        validate_args(&rt.validator, &args)?;

        let c = &self.client;
        let out = match rt.kind {
            ToolKind::TestAuthentication => c.test_authentication().await?,
            ToolKind::SearchFiles => c.list_files(&parse::<FileListQuery>(args)?).await?,
            ToolKind::GetFileById => c.get_file(&parse::<FileRef>(args)?).await?,
            ToolKind::UpdateFile => c.update_file(&parse::<UpdateFileRequest>(args)?).await?,
            ToolKind::DeleteFile => c.delete_file(&parse::<FileRef>(args)?).await?,
            ToolKind::ListGroups => c.list_groups(&parse::<GroupListQuery>(args)?).await?,
            ToolKind::CreateGroup => c.create_group(&parse::<CreateGroupRequest>(args)?).await?,
            ToolKind::GetGroup => c.get_group(&parse::<FileRef>(args)?).await?,
            ToolKind::UpdateGroup => c.update_group(&parse::<UpdateGroupRequest>(args)?).await?,
            ToolKind::DeleteGroup => c.delete_group(&parse::<FileRef>(args)?).await?,
            ToolKind::AddFileToGroup => {
                c.add_file_to_group(&parse::<GroupMembership>(args)?)
                    .await?
            }
            ToolKind::RemoveFileFromGroup => {
                c.remove_file_from_group(&parse::<GroupMembership>(args)?)
                    .await?
            }
            ToolKind::CreatePrivateDownloadLink => {
                c.create_private_download_link(&parse::<PrivateLinkRequest>(args)?)
                    .await?
            }
            ToolKind::FetchFromGateway => {
                let content = c
                    .fetch_from_gateway(&parse::<GatewayFetchRequest>(args)?)
                    .await?;
                serde_json::to_value(content)?
            }
            ToolKind::ListPaymentInstructions => {
                c.list_payment_instructions(&parse::<PageQuery>(args)?)
                    .await?
            }
            ToolKind::CreatePaymentInstruction => {
                c.create_payment_instruction(&parse::<CreatePaymentInstructionRequest>(args)?)
                    .await?
            }
            ToolKind::DeletePaymentInstruction => {
                let id = string_arg(&args, "id")?;
                c.delete_payment_instruction(&id).await?
            }
            ToolKind::AddSignature => c.add_signature(&parse::<AddSignatureRequest>(args)?).await?,
            ToolKind::GetSignature => c.get_signature(&parse::<SignatureRef>(args)?).await?,
            ToolKind::DeleteSignature => c.delete_signature(&parse::<SignatureRef>(args)?).await?,
            ToolKind::VectorizeFile => {
                let file_id = string_arg(&args, "fileId")?;
                c.vectorize_file(&file_id).await?
            }
            ToolKind::QueryVectors => c.query_vectors(&parse::<VectorQuery>(args)?).await?,
        };
        Ok(out)
    }
}

#[async_trait]
impl McpHandler for PinataTools {
    async fn list_tools(&self, _params: ListToolsParams) -> anyhow::Result<ListToolsResult> {
        let tools = self
            .tool_names()
            .into_iter()
            .filter_map(|n| self.tools.get(n).map(|rt| rt.def.clone()))
            .collect();
        Ok(ListToolsResult {
            tools,
            next_cursor: None,
        })
    }

    async fn call_tool(&self, params: CallToolParams) -> anyhow::Result<CallToolResult> {
        let args = match params.arguments {
            None | Some(Value::Null) => Value::Object(Default::default()),
            Some(v) => v,
        };
        match self.dispatch(&params.name, args).await {
            Ok(v) => {
                debug!(tool = %params.name, "tool call succeeded");
                Ok(CallToolResult::json(v))
            }
            Err(e) => {
                warn!(tool = %params.name, error = %e, "tool call failed");
                Ok(CallToolResult::error(format!("Error: {e}")))
            }
        }
    }
}

fn validate_args(validator: &Validator, args: &Value) -> Result<(), ToolError> {
    if validator.is_valid(args) {
        return Ok(());
    }
    let msg = validator
        .iter_errors(args)
        .take(5)
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    Err(ToolError::InvalidArgs(msg))
}

fn parse<T: DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArgs(e.to_string()))
}

fn string_arg(args: &Value, key: &str) -> Result<String, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ToolError::InvalidArgs(format!("{key} is required")))
}

fn network_prop() -> Value {
    serde_json::json!({
        "type": "string",
        "enum": ["public", "private"],
        "default": "public"
    })
}

fn object_schema(properties: Value, required: &[&str]) -> Value {
    let mut props = properties;
    if let Some(map) = props.as_object_mut()
        && map.contains_key("network")
    {
        map.insert("network".to_string(), network_prop());
    }
    serde_json::json!({
        "type": "object",
        "properties": props,
        "required": required,
        "additionalProperties": false
    })
}

fn id_schema(id_key: &str) -> Value {
    let mut props = serde_json::Map::new();
    props.insert("network".to_string(), Value::Null);
    props.insert(
        id_key.to_string(),
        serde_json::json!({"type": "string", "minLength": 1}),
    );
    object_schema(Value::Object(props), &[id_key])
}

fn tool_defs() -> Vec<(ToolKind, &'static str, &'static str, Value)> {
    let string = || serde_json::json!({"type": "string"});
    let required_string = || serde_json::json!({"type": "string", "minLength": 1});
    let limit = || serde_json::json!({"type": "integer", "minimum": 1, "maximum": 1000});

    vec![
        (
            ToolKind::TestAuthentication,
            "testAuthentication",
            "Check that the configured API credential is accepted.",
            object_schema(serde_json::json!({}), &[]),
        ),
        (
            ToolKind::SearchFiles,
            "searchFiles",
            "Search files by name, CID or MIME type.",
            object_schema(
                serde_json::json!({
                    "network": null,
                    "name": string(),
                    "cid": string(),
                    "mimeType": string(),
                    "limit": limit(),
                    "pageToken": string()
                }),
                &[],
            ),
        ),
        (
            ToolKind::GetFileById,
            "getFileById",
            "Get a file's metadata by its ID.",
            id_schema("id"),
        ),
        (
            ToolKind::UpdateFile,
            "updateFile",
            "Rename a file or replace its key-value metadata.",
            object_schema(
                serde_json::json!({
                    "network": null,
                    "id": required_string(),
                    "name": string(),
                    "keyvalues": {"type": "object", "additionalProperties": {"type": "string"}}
                }),
                &["id"],
            ),
        ),
        (
            ToolKind::DeleteFile,
            "deleteFile",
            "Delete a file by its ID.",
            id_schema("id"),
        ),
        (
            ToolKind::ListGroups,
            "listGroups",
            "List groups, optionally filtered by name or visibility.",
            object_schema(
                serde_json::json!({
                    "network": null,
                    "name": string(),
                    "isPublic": {"type": "boolean"},
                    "limit": limit(),
                    "pageToken": string()
                }),
                &[],
            ),
        ),
        (
            ToolKind::CreateGroup,
            "createGroup",
            "Create a group.",
            object_schema(
                serde_json::json!({
                    "network": null,
                    "name": required_string(),
                    "isPublic": {"type": "boolean"}
                }),
                &["name"],
            ),
        ),
        (
            ToolKind::GetGroup,
            "getGroup",
            "Get a group by its ID.",
            id_schema("id"),
        ),
        (
            ToolKind::UpdateGroup,
            "updateGroup",
            "Rename a group or change its visibility.",
            object_schema(
                serde_json::json!({
                    "network": null,
                    "id": required_string(),
                    "name": string(),
                    "isPublic": {"type": "boolean"}
                }),
                &["id"],
            ),
        ),
        (
            ToolKind::DeleteGroup,
            "deleteGroup",
            "Delete a group by its ID.",
            id_schema("id"),
        ),
        (
            ToolKind::AddFileToGroup,
            "addFileToGroup",
            "Add a file to a group.",
            object_schema(
                serde_json::json!({
                    "network": null,
                    "groupId": required_string(),
                    "fileId": required_string()
                }),
                &["groupId", "fileId"],
            ),
        ),
        (
            ToolKind::RemoveFileFromGroup,
            "removeFileFromGroup",
            "Remove a file from a group.",
            object_schema(
                serde_json::json!({
                    "network": null,
                    "groupId": required_string(),
                    "fileId": required_string()
                }),
                &["groupId", "fileId"],
            ),
        ),
        (
            ToolKind::CreatePrivateDownloadLink,
            "createPrivateDownloadLink",
            "Create a time-limited download link for a private file.",
            object_schema(
                serde_json::json!({
                    "cid": required_string(),
                    "expires": {"type": "integer", "minimum": 1, "default": 600}
                }),
                &["cid"],
            ),
        ),
        (
            ToolKind::FetchFromGateway,
            "fetchFromGateway",
            "Fetch content by CID through the configured gateway.",
            object_schema(
                serde_json::json!({
                    "network": null,
                    "cid": required_string()
                }),
                &["cid"],
            ),
        ),
        (
            ToolKind::ListPaymentInstructions,
            "listPaymentInstructions",
            "List x402 payment instructions.",
            object_schema(
                serde_json::json!({
                    "limit": limit(),
                    "pageToken": string()
                }),
                &[],
            ),
        ),
        (
            ToolKind::CreatePaymentInstruction,
            "createPaymentInstruction",
            "Create an x402 payment instruction.",
            object_schema(
                serde_json::json!({
                    "name": required_string(),
                    "description": string(),
                    "paymentRequirements": {
                        "type": "array",
                        "minItems": 1,
                        "items": {"type": "object"}
                    }
                }),
                &["name", "paymentRequirements"],
            ),
        ),
        (
            ToolKind::DeletePaymentInstruction,
            "deletePaymentInstruction",
            "Delete an x402 payment instruction.",
            object_schema(serde_json::json!({"id": required_string()}), &["id"]),
        ),
        (
            ToolKind::AddSignature,
            "addSignature",
            "Attach an EIP-712 signature to a CID.",
            object_schema(
                serde_json::json!({
                    "network": null,
                    "cid": required_string(),
                    "signature": required_string(),
                    "address": required_string()
                }),
                &["cid", "signature", "address"],
            ),
        ),
        (
            ToolKind::GetSignature,
            "getSignature",
            "Get the signature attached to a CID.",
            id_schema("cid"),
        ),
        (
            ToolKind::DeleteSignature,
            "deleteSignature",
            "Remove the signature attached to a CID.",
            id_schema("cid"),
        ),
        (
            ToolKind::VectorizeFile,
            "vectorizeFile",
            "Generate vector embeddings for a file.",
            object_schema(serde_json::json!({"fileId": required_string()}), &["fileId"]),
        ),
        (
            ToolKind::QueryVectors,
            "queryVectors",
            "Query a group's vector index with text.",
            object_schema(
                serde_json::json!({
                    "groupId": required_string(),
                    "text": required_string()
                }),
                &["groupId", "text"],
            ),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pinata_api::PinataClientOptions;

    fn tools_without_jwt() -> PinataTools {
        let opts = PinataClientOptions::new(None).expect("options");
        PinataTools::new(PinataClient::new(opts).expect("client")).expect("tools")
    }

    async fn call(tools: &PinataTools, name: &str, args: Value) -> CallToolResult {
        tools
            .call_tool(CallToolParams {
                name: name.to_string(),
                arguments: Some(args),
            })
            .await
            .expect("call_tool never errors")
    }

    #[tokio::test]
    async fn registry_lists_every_tool_with_object_schemas() {
        let tools = tools_without_jwt();
        let listed = tools
            .list_tools(ListToolsParams::default())
            .await
            .expect("list");
        assert_eq!(listed.tools.len(), 22);
        for t in &listed.tools {
            assert_eq!(t.input_schema["type"], "object", "{}", t.name);
        }
        let names: Vec<_> = listed.tools.iter().map(|t| t.name.as_str()).collect();
        assert!(names.contains(&"searchFiles"));
        assert!(names.contains(&"queryVectors"));
    }

    #[tokio::test]
    async fn unknown_tool_is_an_in_band_error() {
        let res = call(&tools_without_jwt(), "nope", serde_json::json!({})).await;
        assert!(res.is_error);
        assert!(res.text().contains("unknown tool"));
    }

    #[tokio::test]
    async fn schema_violations_are_reported_before_any_call() {
        let tools = tools_without_jwt();
        let res = call(&tools, "getFileById", serde_json::json!({})).await;
        assert!(res.is_error);
        assert!(res.text().contains("invalid arguments"), "{}", res.text());

        let res = call(
            &tools,
            "searchFiles",
            serde_json::json!({"network": "somewhere"}),
        )
        .await;
        assert!(res.is_error);
    }

    #[tokio::test]
    async fn missing_credential_fails_in_band() {
        let res = call(
            &tools_without_jwt(),
            "getFileById",
            serde_json::json!({"id": "abc"}),
        )
        .await;
        assert!(res.is_error);
        assert!(res.text().contains("PINATA_JWT"), "{}", res.text());
    }

    #[tokio::test]
    async fn missing_arguments_are_treated_as_empty_object() {
        let tools = tools_without_jwt();
        let res = tools
            .call_tool(CallToolParams {
                name: "testAuthentication".to_string(),
                arguments: None,
            })
            .await
            .expect("call");
        // Passes validation; fails only on the missing credential.
        assert!(res.text().contains("PINATA_JWT"), "{}", res.text());
    }
}
