use crate::types::{CapabilityDescriptor, ChatRequest, ProviderType, ResponseFormat, TokenEstimator};

/// Why a deployment cannot serve a request, or `None` when it can.
pub(crate) fn rejection_reason(
    capabilities: &CapabilityDescriptor,
    provider_type: ProviderType,
    request: &ChatRequest,
) -> Option<String> {
    if let Some(window) = capabilities.context_window {
        let estimate = TokenEstimator::new(provider_type).estimate_request(request);
        if estimate.total() > window {
            return Some(format!(
                "estimated {} prompt tokens exceed context window of {window}",
                estimate.total()
            ));
        }
    }

    if !request.tools.is_empty() && !capabilities.supports_tools {
        return Some("tool calls are not supported".to_string());
    }

    if needs_structured_output(request) && !capabilities.supports_structured_output {
        return Some("structured output is not supported".to_string());
    }

    None
}

fn needs_structured_output(request: &ChatRequest) -> bool {
    match &request.response_format {
        None | Some(ResponseFormat::Text) => false,
        Some(format) => !format.is_empty(),
    }
}
