use designqa_contracts::errors::AnalysisFailure;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::gateway::{AnalysisRequest, AnalysisService, ServiceReply};

/// Offline service that answers with a report derived from the image bytes.
/// Same inputs always give the same report; identical images score 100.
pub struct DryrunService;

impl AnalysisService for DryrunService {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn analyze(&self, request: &AnalysisRequest) -> Result<ServiceReply, AnalysisFailure> {
        let mut diagnostics = Map::new();
        diagnostics.insert("service".to_string(), Value::String("dryrun".to_string()));

        if request.design.bytes == request.live.bytes {
            let text = json!({
                "score": 100,
                "generalIssues": [],
                "specificIssues": [],
            })
            .to_string();
            return Ok(ServiceReply { text, diagnostics });
        }

        let mut hasher = Sha256::new();
        hasher.update(&request.design.bytes);
        hasher.update(&request.live.bytes);
        let digest = hasher.finalize();
        let byte = |index: usize| f64::from(digest[index]);

        let score = 55.0 + byte(0) % 40.0;
        let x = (byte(1) % 60.0) / 100.0;
        let y = (byte(2) % 60.0) / 100.0;
        let width = (10.0 + byte(3) % 30.0) / 100.0;
        let height = (5.0 + byte(4) % 20.0) / 100.0;
        diagnostics.insert("digest".to_string(), Value::String(hex::encode(digest)));

        let text = json!({
            "score": score,
            "generalIssues": [format!(
                "Live screenshot ({}x{}) differs from the design ({}x{}).",
                request.live.width, request.live.height, request.design.width, request.design.height
            )],
            "specificIssues": [{
                "description": "Region differs from the design.",
                "anchor": {"x": x, "y": y, "width": width, "height": height},
            }],
        })
        .to_string();
        Ok(ServiceReply { text, diagnostics })
    }
}

#[cfg(test)]
mod tests {
    use designqa_contracts::models::{ModelRegistry, DESIGN_QA_CAPABILITY};

    use crate::config::TransportLimits;
    use crate::gateway::{AnalysisGateway, AnalysisServiceRegistry};
    use crate::intake::tests::png_asset;

    use super::DryrunService;

    fn dryrun_gateway() -> anyhow::Result<AnalysisGateway> {
        let mut registry = AnalysisServiceRegistry::new();
        registry.register(DryrunService);
        let model = ModelRegistry::new(None)
            .ensure("dryrun-qa-1", DESIGN_QA_CAPABILITY)
            .ok_or_else(|| anyhow::anyhow!("dryrun model missing"))?;
        Ok(AnalysisGateway::new(registry, model, TransportLimits::default()))
    }

    #[test]
    fn identical_images_score_perfectly() -> anyhow::Result<()> {
        let gateway = dryrun_gateway()?;
        let asset = png_asset(16, 16, [40, 40, 40, 255]);
        let report = gateway.analyze(&asset, &asset.clone())?;
        assert_eq!(report.score.value(), 100.0);
        assert_eq!(report.issue_count(), 0);
        Ok(())
    }

    #[test]
    fn differing_images_give_a_stable_report_inside_the_image() -> anyhow::Result<()> {
        let gateway = dryrun_gateway()?;
        let design = png_asset(16, 16, [40, 40, 40, 255]);
        let live = png_asset(16, 16, [200, 40, 40, 255]);

        let first = gateway.analyze(&design, &live)?;
        let second = gateway.analyze(&design, &live)?;
        assert_eq!(first, second);

        let score = first.score.value();
        assert!((55.0..95.0).contains(&score));
        assert_eq!(first.general_issues.len(), 1);
        assert_eq!(first.specific_issues.len(), 1);
        let anchor = first.specific_issues[0].anchor;
        assert!(anchor.x() + anchor.width() < 1.0);
        assert!(anchor.y() + anchor.height() < 1.0);
        Ok(())
    }
}
