use std::collections::BTreeMap;
use std::time::Instant;

use designqa_contracts::errors::AnalysisFailure;
use designqa_contracts::models::ModelSpec;
use designqa_contracts::report::{parse_report_text, Report};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::config::{GatewayConfig, TransportLimits};
use crate::dryrun::DryrunService;
use crate::gemini::GeminiService;
use crate::intake::ImageAsset;
use crate::transport::{prepare_for_transport, TransportImage};

/// Fixed instruction sent with every analysis request.
pub const DESIGN_QA_INSTRUCTION: &str = "You are a meticulous design QA engineer. \
The first image is the DESIGN mockup (the intended result). The second image is a LIVE \
screenshot of the implementation. Compare them and list every visual discrepancy: layout, \
spacing, alignment, typography, color, imagery, missing or extra elements. \
Respond with JSON only, matching this schema: \
{\"score\": number from 0 to 100 (100 means pixel-perfect), \
\"generalIssues\": [string] for findings not tied to one place, \
\"specificIssues\": [{\"description\": string, \"anchor\": {\"x\": number, \"y\": number, \
\"width\": number, \"height\": number}}] for findings at a specific region}. \
Anchor values are fractions between 0 and 1 of the LIVE screenshot's width and height, \
measured from its top-left corner.";

/// Structured-output schema handed to services that support one.
pub fn report_response_schema() -> Value {
    let number = json!({ "type": "NUMBER" });
    json!({
        "type": "OBJECT",
        "properties": {
            "score": number,
            "generalIssues": { "type": "ARRAY", "items": { "type": "STRING" } },
            "specificIssues": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "description": { "type": "STRING" },
                        "anchor": {
                            "type": "OBJECT",
                            "properties": {
                                "x": number,
                                "y": number,
                                "width": number,
                                "height": number,
                            },
                            "required": ["x", "y", "width", "height"],
                        },
                    },
                    "required": ["description", "anchor"],
                },
            },
        },
        "required": ["score", "generalIssues", "specificIssues"],
    })
}

#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub model: String,
    pub instruction: &'static str,
    pub design: TransportImage,
    pub live: TransportImage,
    pub max_output_tokens: Option<u64>,
}

/// Raw reply from a service. `text` is untrusted until parsed.
#[derive(Debug, Clone)]
pub struct ServiceReply {
    pub text: String,
    pub diagnostics: Map<String, Value>,
}

pub trait AnalysisService: Send + Sync {
    fn name(&self) -> &str;
    fn analyze(&self, request: &AnalysisRequest) -> Result<ServiceReply, AnalysisFailure>;
}

#[derive(Default)]
pub struct AnalysisServiceRegistry {
    services: BTreeMap<String, Box<dyn AnalysisService>>,
}

impl AnalysisServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<S: AnalysisService + 'static>(&mut self, service: S) {
        self.services
            .insert(service.name().to_string(), Box::new(service));
    }

    pub fn get(&self, name: &str) -> Option<&dyn AnalysisService> {
        self.services.get(name).map(|service| service.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }
}

pub fn default_service_registry(config: &GatewayConfig) -> AnalysisServiceRegistry {
    let mut registry = AnalysisServiceRegistry::new();
    registry.register(DryrunService);
    registry.register(GeminiService::new(config));
    registry
}

/// Boundary between the session and the remote analysis service: prepares
/// the images, makes one call, and accepts the reply only if it parses as a
/// complete report. No retries, no caching.
pub struct AnalysisGateway {
    services: AnalysisServiceRegistry,
    model: ModelSpec,
    limits: TransportLimits,
}

impl AnalysisGateway {
    pub fn new(services: AnalysisServiceRegistry, model: ModelSpec, limits: TransportLimits) -> Self {
        Self {
            services,
            model,
            limits,
        }
    }

    pub fn from_config(config: &GatewayConfig, model: ModelSpec) -> Self {
        Self::new(default_service_registry(config), model, config.limits)
    }

    pub fn model(&self) -> &ModelSpec {
        &self.model
    }

    pub fn analyze(&self, design: &ImageAsset, live: &ImageAsset) -> Result<Report, AnalysisFailure> {
        let service = self.services.get(&self.model.service).ok_or_else(|| {
            AnalysisFailure::Request(format!(
                "no analysis service '{}' for model '{}'",
                self.model.service, self.model.name
            ))
        })?;
        let request = AnalysisRequest {
            model: self.model.name.clone(),
            instruction: DESIGN_QA_INSTRUCTION,
            design: self.prepare(design)?,
            live: self.prepare(live)?,
            max_output_tokens: self.model.max_output_tokens,
        };

        let started = Instant::now();
        let reply = service.analyze(&request).inspect_err(|failure| {
            warn!(
                service = service.name(),
                model = %request.model,
                kind = failure.kind(),
                error = %failure,
                "analysis call failed"
            );
        })?;
        let diagnostics = Value::Object(reply.diagnostics.clone());
        debug!(
            service = service.name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            diagnostics = %diagnostics,
            "analysis reply received"
        );

        let report = parse_report_text(&reply.text).map_err(|err| {
            warn!(
                service = service.name(),
                model = %request.model,
                error = %err,
                reply = %truncate_text(&reply.text, 512),
                "analysis reply rejected"
            );
            AnalysisFailure::Malformed(err)
        })?;
        info!(
            service = service.name(),
            score = report.score.value(),
            general = report.general_issues.len(),
            specific = report.specific_issues.len(),
            "analysis report accepted"
        );
        Ok(report)
    }

    fn prepare(&self, asset: &ImageAsset) -> Result<TransportImage, AnalysisFailure> {
        let prepared = prepare_for_transport(asset, &self.limits)
            .map_err(|err| AnalysisFailure::Request(error_chain_text(&err, 400)))?;
        if prepared.downscaled {
            debug!(
                name = asset.name(),
                from = ?(asset.width(), asset.height()),
                to = ?(prepared.width, prepared.height),
                "image downscaled for transport"
            );
        }
        Ok(prepared)
    }
}

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts.last().map(|existing| existing == trimmed).unwrap_or(false) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use designqa_contracts::errors::{AnalysisFailure, MalformedResponse};
    use designqa_contracts::models::{ModelSpec, DESIGN_QA_CAPABILITY};
    use serde_json::{json, Map, Value};

    use super::{
        error_chain_text, report_response_schema, AnalysisGateway, AnalysisRequest,
        AnalysisService, AnalysisServiceRegistry, ServiceReply, DESIGN_QA_INSTRUCTION,
    };
    use crate::config::{GatewayConfig, TransportLimits};
    use crate::intake::tests::png_asset;

    /// Replays queued replies and records what it was asked.
    #[derive(Clone, Default)]
    pub(crate) struct ScriptedService {
        replies: Arc<Mutex<Vec<Result<String, AnalysisFailure>>>>,
        pub(crate) calls: Arc<AtomicUsize>,
        pub(crate) last_request: Arc<Mutex<Option<AnalysisRequest>>>,
    }

    impl ScriptedService {
        pub(crate) fn replying(replies: Vec<Result<String, AnalysisFailure>>) -> Self {
            let service = Self::default();
            if let Ok(mut queue) = service.replies.lock() {
                *queue = replies.into_iter().rev().collect();
            }
            service
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl AnalysisService for ScriptedService {
        fn name(&self) -> &str {
            "scripted"
        }

        fn analyze(&self, request: &AnalysisRequest) -> Result<ServiceReply, AnalysisFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut last) = self.last_request.lock() {
                *last = Some(request.clone());
            }
            let next = self
                .replies
                .lock()
                .ok()
                .and_then(|mut queue| queue.pop())
                .unwrap_or_else(|| Err(AnalysisFailure::Service("no scripted reply".to_string())));
            next.map(|text| ServiceReply {
                text,
                diagnostics: Map::new(),
            })
        }
    }

    pub(crate) fn scripted_gateway(service: ScriptedService) -> AnalysisGateway {
        let mut registry = AnalysisServiceRegistry::new();
        registry.register(service);
        AnalysisGateway::new(
            registry,
            ModelSpec {
                name: "scripted-qa".to_string(),
                service: "scripted".to_string(),
                capabilities: vec![DESIGN_QA_CAPABILITY.to_string()],
                max_output_tokens: Some(1024),
            },
            TransportLimits::default(),
        )
    }

    pub(crate) fn sample_reply() -> String {
        json!({
            "score": 87,
            "generalIssues": ["Header spacing differs"],
            "specificIssues": [{
                "description": "Button color mismatch",
                "anchor": {"x": 0.1, "y": 0.2, "width": 0.15, "height": 0.05}
            }]
        })
        .to_string()
    }

    #[test]
    fn gateway_sends_both_images_and_instruction() -> anyhow::Result<()> {
        let service = ScriptedService::replying(vec![Ok(sample_reply())]);
        let gateway = scripted_gateway(service.clone());
        let design = png_asset(30, 20, [255, 0, 0, 255]);
        let live = png_asset(30, 20, [0, 255, 0, 255]);

        let report = gateway.analyze(&design, &live)?;
        assert_eq!(report.score.value(), 87.0);
        assert_eq!(service.call_count(), 1);

        let request = service
            .last_request
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or_else(|| anyhow::anyhow!("request not recorded"))?;
        assert_eq!(request.model, "scripted-qa");
        assert_eq!(request.instruction, DESIGN_QA_INSTRUCTION);
        assert_eq!(request.design.bytes, design.bytes());
        assert_eq!(request.live.bytes, live.bytes());
        assert_eq!(request.max_output_tokens, Some(1024));
        Ok(())
    }

    #[test]
    fn out_of_range_reply_becomes_malformed_failure() {
        let reply = sample_reply().replace("87", "150");
        let gateway = scripted_gateway(ScriptedService::replying(vec![Ok(reply)]));
        let design = png_asset(8, 8, [0, 0, 0, 255]);
        let live = png_asset(8, 8, [9, 9, 9, 255]);
        assert_eq!(
            gateway.analyze(&design, &live),
            Err(AnalysisFailure::Malformed(
                MalformedResponse::ScoreOutOfRange(150.0)
            ))
        );
    }

    #[test]
    fn service_failures_pass_through_without_retry() {
        let service = ScriptedService::replying(vec![
            Err(AnalysisFailure::Transport("connection reset".to_string())),
            Ok(sample_reply()),
        ]);
        let gateway = scripted_gateway(service.clone());
        let design = png_asset(8, 8, [0, 0, 0, 255]);
        let live = png_asset(8, 8, [9, 9, 9, 255]);
        assert!(matches!(
            gateway.analyze(&design, &live),
            Err(AnalysisFailure::Transport(_))
        ));
        assert_eq!(service.call_count(), 1);
    }

    #[test]
    fn unknown_service_is_a_request_failure() {
        let gateway = AnalysisGateway::new(
            AnalysisServiceRegistry::new(),
            ModelSpec {
                name: "ghost".to_string(),
                service: "nowhere".to_string(),
                capabilities: Vec::new(),
                max_output_tokens: None,
            },
            TransportLimits::default(),
        );
        let asset = png_asset(4, 4, [0, 0, 0, 255]);
        assert!(matches!(
            gateway.analyze(&asset, &asset),
            Err(AnalysisFailure::Request(_))
        ));
    }

    #[test]
    fn default_registry_has_gemini_and_dryrun() {
        let gateway_registry = super::default_service_registry(&GatewayConfig::default());
        assert_eq!(gateway_registry.names(), vec!["dryrun", "gemini"]);
    }

    #[test]
    fn response_schema_requires_all_report_fields() {
        let schema = report_response_schema();
        assert_eq!(
            schema["required"],
            json!(["score", "generalIssues", "specificIssues"])
        );
        assert_eq!(
            schema["properties"]["specificIssues"]["items"]["properties"]["anchor"]["required"],
            json!(["x", "y", "width", "height"])
        );
        assert_eq!(schema["properties"]["score"]["type"], Value::String("NUMBER".to_string()));
    }

    #[test]
    fn error_chain_text_preserves_nested_contexts() {
        let err = anyhow::anyhow!("socket closed")
            .context("Gemini request failed (https://example.test)")
            .context("analysis call failed");
        let rendered = error_chain_text(&err, 400);
        assert!(rendered.contains("analysis call failed"));
        assert!(rendered.contains("Gemini request failed"));
        assert!(rendered.contains("socket closed"));
        assert!(error_chain_text(&err, 10).ends_with('…'));
    }
}
