//! Fixed model catalog exposed to the router.

use serde_json::Value;

use crate::config::{CatalogSettings, Credentials, DeploymentParams, RoutingEntry};

/// Builds the ordered routing catalog from caller credentials.
///
/// `gpt-4o` and `claude-3-5-sonnet` each get a managed-cloud entry followed by a
/// direct-provider entry, so the router can fail over between them. Missing
/// credentials become empty strings (`"{}"` for the service-account JSON); nothing is
/// validated here.
///
/// # Examples
///
/// ```
/// use llm_relay::catalog::build_model_list;
/// use llm_relay::config::{CatalogSettings, Credentials};
///
/// let creds: Credentials = serde_json::from_str(r#"{"openai": "sk-x"}"#).unwrap();
/// let entries = build_model_list(&creds, &CatalogSettings::default());
/// assert_eq!(entries[0].model_name, "gpt4");
/// assert_eq!(entries[0].params.model, "gpt-4");
/// assert_eq!(entries[0].params.api_key.as_deref(), Some("sk-x"));
/// ```
pub fn build_model_list(creds: &Credentials, settings: &CatalogSettings) -> Vec<RoutingEntry> {
    let openai = creds.string("openai");
    let openai_entry = |alias: &str, model: &str| entry(alias, model, &openai);

    // 既接受 JSON 对象 也接受已序列化的 JSON 文本
    let service_account = match creds.json("google_service_account_creds") {
        Value::String(text) => text,
        other => other.to_string(),
    };

    vec![
        openai_entry("gpt4", "gpt-4"),
        openai_entry("o1", "o1"),
        openai_entry("o1-preview", "o1-preview"),
        openai_entry("o1-mini", "o1-mini"),
        RoutingEntry {
            model_name: "gpt-4o".to_string(),
            params: DeploymentParams {
                model: "azure/gpt-4o".to_string(),
                api_key: Some(creds.string("azure")),
                api_base: Some(creds.string("azure_endpoint")),
                api_version: Some(settings.azure_api_version.clone()),
                ..Default::default()
            },
        },
        openai_entry("gpt-4o", "gpt-4o"),
        RoutingEntry {
            model_name: "claude-3-5-sonnet".to_string(),
            params: DeploymentParams {
                model: "vertex_ai/claude-3-5-sonnet-v2@20241022".to_string(),
                vertex_credentials: Some(service_account),
                vertex_project: settings.vertex_project.clone(),
                vertex_location: Some(settings.vertex_location.clone()),
                ..Default::default()
            },
        },
        entry(
            "claude-3-5-sonnet",
            "claude-3-5-sonnet-20240620",
            &creds.string("anthropic"),
        ),
    ]
}

fn entry(alias: &str, model: &str, api_key: &str) -> RoutingEntry {
    RoutingEntry {
        model_name: alias.to_string(),
        params: DeploymentParams {
            model: model.to_string(),
            api_key: Some(api_key.to_string()),
            ..Default::default()
        },
    }
}
