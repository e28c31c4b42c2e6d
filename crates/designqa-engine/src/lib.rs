pub mod config;
pub mod dryrun;
pub mod editor;
pub mod gateway;
pub mod gemini;
pub mod intake;
pub mod render;
pub mod session;
pub mod transport;

pub use config::{GatewayConfig, TransportLimits};
pub use editor::{ReportEdit, ReportEditor};
pub use gateway::{
    default_service_registry, AnalysisGateway, AnalysisRequest, AnalysisService,
    AnalysisServiceRegistry, ServiceReply,
};
pub use intake::{ImageAsset, ImageUpload};
pub use render::{render_overlay, render_text, save_overlay, OverlayStyle};
pub use session::{AnalysisTicket, Completeness, Completion, Session, SessionPhase};
