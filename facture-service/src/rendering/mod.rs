//! Invoice documents: model, template and the external PDF engine.

pub mod engine;
pub mod executor;
pub mod renderer;
pub mod template;

pub use engine::{ChromiumEngine, EngineError, PageOptions, RenderEngine};
pub use renderer::DocumentRenderer;
pub use template::{DocType, DocumentModel, HtmlTemplate, TemplateGenerator};
