use std::time::Duration;

use designqa_contracts::errors::AnalysisFailure;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};

use crate::config::GatewayConfig;
use crate::gateway::{
    error_chain_text, report_response_schema, truncate_text, AnalysisRequest, AnalysisService,
    ServiceReply,
};

const TEMPERATURE: f64 = 0.2;

pub struct GeminiService {
    api_base: String,
    api_key: Option<String>,
    timeout: Duration,
    http: HttpClient,
}

impl GeminiService {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
            timeout: config.request_timeout,
            http: HttpClient::new(),
        }
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn post(&self, endpoint: &str, api_key: &str, payload: &Value) -> Result<HttpResponse, AnalysisFailure> {
        self.http
            .post(endpoint)
            .query(&[("key", api_key)])
            .timeout(self.timeout)
            .json(payload)
            .send()
            .map_err(|err| {
                let err = anyhow::Error::new(err).context(format!("Gemini request failed ({endpoint})"));
                AnalysisFailure::Transport(error_chain_text(&err, 400))
            })
    }
}

/// Design first, then live, each behind a label, then the instruction.
pub(crate) fn build_payload(request: &AnalysisRequest) -> Value {
    let parts = vec![
        json!({ "text": "DESIGN mockup:" }),
        request.design.inline_data(),
        json!({ "text": "LIVE screenshot:" }),
        request.live.inline_data(),
        json!({ "text": request.instruction }),
    ];

    let mut generation_config = Map::new();
    generation_config.insert(
        "responseMimeType".to_string(),
        Value::String("application/json".to_string()),
    );
    generation_config.insert("responseSchema".to_string(), report_response_schema());
    generation_config.insert("temperature".to_string(), json!(TEMPERATURE));
    generation_config.insert("candidateCount".to_string(), json!(1));
    if let Some(max_tokens) = request.max_output_tokens {
        generation_config.insert("maxOutputTokens".to_string(), json!(max_tokens));
    }

    json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": Value::Object(generation_config),
    })
}

fn response_json_or_error(response: HttpResponse) -> Result<Value, AnalysisFailure> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .map_err(|err| AnalysisFailure::Transport(format!("Gemini response body read failed: {err}")))?;
    if !status.is_success() {
        return Err(AnalysisFailure::Service(format!(
            "Gemini request failed ({code}): {}",
            truncate_text(&body, 512)
        )));
    }
    serde_json::from_str(&body).map_err(|err| {
        AnalysisFailure::Service(format!("Gemini returned invalid JSON payload: {err}"))
    })
}

/// Pulls the report text out of a `generateContent` envelope.
pub(crate) fn extract_reply(envelope: &Value) -> Result<ServiceReply, AnalysisFailure> {
    let mut diagnostics = Map::new();
    if let Some(version) = envelope.get("modelVersion") {
        diagnostics.insert("model_version".to_string(), version.clone());
    }
    if let Some(usage) = envelope.get("usageMetadata") {
        diagnostics.insert("usage".to_string(), usage.clone());
    }

    if let Some(reason) = envelope
        .get("promptFeedback")
        .and_then(|feedback| feedback.get("blockReason"))
        .and_then(Value::as_str)
    {
        return Err(AnalysisFailure::Service(format!(
            "Gemini blocked the prompt ({reason})"
        )));
    }

    let candidate = envelope
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .ok_or_else(|| AnalysisFailure::Service("Gemini returned no candidates".to_string()))?;
    if let Some(reason) = candidate.get("finishReason") {
        diagnostics.insert("finish_reason".to_string(), reason.clone());
    }

    let text = candidate
        .get("content")
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();
    if text.trim().is_empty() {
        let reason = candidate
            .get("finishReason")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        return Err(AnalysisFailure::Service(format!(
            "Gemini returned no text (finish reason {reason})"
        )));
    }

    Ok(ServiceReply { text, diagnostics })
}

impl AnalysisService for GeminiService {
    fn name(&self) -> &str {
        "gemini"
    }

    fn analyze(&self, request: &AnalysisRequest) -> Result<ServiceReply, AnalysisFailure> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(AnalysisFailure::Request(
                "GEMINI_API_KEY or GOOGLE_API_KEY not set".to_string(),
            ));
        };
        let endpoint = self.endpoint_for_model(&request.model);
        let payload = build_payload(request);
        let response = self.post(&endpoint, api_key, &payload)?;
        let envelope = response_json_or_error(response)?;
        extract_reply(&envelope)
    }
}

#[cfg(test)]
mod tests {
    use designqa_contracts::errors::AnalysisFailure;
    use serde_json::{json, Value};

    use super::{build_payload, extract_reply, GeminiService};
    use crate::config::{GatewayConfig, TransportLimits};
    use crate::gateway::{AnalysisRequest, AnalysisService, DESIGN_QA_INSTRUCTION};
    use crate::intake::tests::png_asset;
    use crate::transport::prepare_for_transport;

    fn request() -> anyhow::Result<AnalysisRequest> {
        let limits = TransportLimits::default();
        let design = png_asset(12, 8, [255, 255, 255, 255]);
        let live = png_asset(12, 8, [0, 0, 0, 255]);
        Ok(AnalysisRequest {
            model: "gemini-2.5-flash".to_string(),
            instruction: DESIGN_QA_INSTRUCTION,
            design: prepare_for_transport(&design, &limits)?,
            live: prepare_for_transport(&live, &limits)?,
            max_output_tokens: Some(4096),
        })
    }

    #[test]
    fn payload_orders_design_before_live() -> anyhow::Result<()> {
        let request = request()?;
        let payload = build_payload(&request);
        let parts = payload["contents"][0]["parts"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        assert_eq!(parts.len(), 5);
        assert_eq!(parts[0]["text"], Value::String("DESIGN mockup:".to_string()));
        assert_eq!(
            parts[1]["inlineData"]["data"],
            Value::String(request.design.base64())
        );
        assert_eq!(parts[2]["text"], Value::String("LIVE screenshot:".to_string()));
        assert_eq!(
            parts[3]["inlineData"]["data"],
            Value::String(request.live.base64())
        );
        assert_eq!(
            parts[4]["text"],
            Value::String(DESIGN_QA_INSTRUCTION.to_string())
        );

        let config = &payload["generationConfig"];
        assert_eq!(
            config["responseMimeType"],
            Value::String("application/json".to_string())
        );
        assert_eq!(config["maxOutputTokens"], json!(4096));
        assert_eq!(config["candidateCount"], json!(1));
        assert!(config["responseSchema"].is_object());
        Ok(())
    }

    #[test]
    fn endpoint_accepts_bare_and_prefixed_model_names() {
        let service = GeminiService::new(&GatewayConfig::default());
        assert_eq!(
            service.endpoint_for_model("gemini-2.5-flash"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
        );
        assert_eq!(
            service.endpoint_for_model(" models/gemini-2.5-pro "),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-pro:generateContent"
        );
    }

    #[test]
    fn missing_key_fails_before_any_request() -> anyhow::Result<()> {
        let service = GeminiService::new(&GatewayConfig::default());
        assert!(matches!(
            service.analyze(&request()?),
            Err(AnalysisFailure::Request(_))
        ));
        Ok(())
    }

    #[test]
    fn extract_reply_joins_text_parts_and_keeps_diagnostics() -> anyhow::Result<()> {
        let envelope = json!({
            "candidates": [{
                "content": {"parts": [{"text": "{\"score\": "}, {"text": "90}"}]},
                "finishReason": "STOP"
            }],
            "modelVersion": "gemini-2.5-flash-001",
            "usageMetadata": {"totalTokenCount": 812}
        });
        let reply = extract_reply(&envelope).map_err(anyhow::Error::from)?;
        assert_eq!(reply.text, "{\"score\": 90}");
        assert_eq!(
            reply.diagnostics.get("finish_reason"),
            Some(&Value::String("STOP".to_string()))
        );
        assert_eq!(reply.diagnostics["usage"]["totalTokenCount"], json!(812));
        Ok(())
    }

    #[test]
    fn blocked_or_empty_envelopes_are_service_failures() {
        let blocked = json!({"promptFeedback": {"blockReason": "SAFETY"}});
        assert!(matches!(
            extract_reply(&blocked),
            Err(AnalysisFailure::Service(message)) if message.contains("SAFETY")
        ));

        assert!(matches!(
            extract_reply(&json!({"candidates": []})),
            Err(AnalysisFailure::Service(_))
        ));

        let empty = json!({"candidates": [{"content": {"parts": []}, "finishReason": "MAX_TOKENS"}]});
        assert!(matches!(
            extract_reply(&empty),
            Err(AnalysisFailure::Service(message)) if message.contains("MAX_TOKENS")
        ));
    }
}
