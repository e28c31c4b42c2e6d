mod registry;
mod selectors;

pub use registry::{ModelRegistry, ModelSpec, DESIGN_QA_CAPABILITY};
pub use selectors::{ModelSelection, ModelSelector, SelectionError};
