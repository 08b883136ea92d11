//! HTML to PDF rendering engine seam.

use crate::rendering::executor::{CommandError, CommandExecutor};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine cannot run at all; every later render would fail too.
    #[error("render engine unavailable: {0}")]
    Unavailable(String),

    #[error("content not ready after {0} seconds")]
    Timeout(u64),

    #[error("render failed: {0}")]
    Failed(String),
}

impl From<CommandError> for EngineError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::NotFound(program) => {
                EngineError::Unavailable(format!("{} is not installed", program))
            }
            CommandError::TimedOut(secs) => EngineError::Timeout(secs),
            CommandError::Failed(stderr) => EngineError::Failed(stderr),
            CommandError::Io(e) => EngineError::Failed(e.to_string()),
        }
    }
}

/// Fixed page geometry for every document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageOptions {
    pub width_mm: u32,
    pub height_mm: u32,
    pub margin_mm: u32,
}

impl PageOptions {
    pub fn a4() -> Self {
        Self {
            width_mm: 210,
            height_mm: 297,
            margin_mm: 12,
        }
    }

    pub fn page_rule(&self) -> String {
        format!(
            "@page {{ size: {}mm {}mm; margin: {}mm; }}",
            self.width_mm, self.height_mm, self.margin_mm
        )
    }
}

impl Default for PageOptions {
    fn default() -> Self {
        Self::a4()
    }
}

#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Render one document. Each call runs in its own isolated context.
    async fn render_html_to_pdf(
        &self,
        html: &str,
        css: &str,
        page: &PageOptions,
    ) -> Result<Vec<u8>, EngineError>;
}

/// Headless Chromium driven through its `--print-to-pdf` mode. Every render
/// gets a private working directory and browser profile that is removed
/// afterwards.
#[derive(Clone)]
pub struct ChromiumEngine {
    binary: String,
    executor: CommandExecutor,
    temp_dir: PathBuf,
}

impl ChromiumEngine {
    pub fn new(binary: impl Into<String>, timeout: Duration, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            executor: CommandExecutor::new(timeout),
            temp_dir: temp_dir.into(),
        }
    }

    /// Check the binary can be started at all.
    pub async fn probe(&self) -> Result<(), EngineError> {
        self.executor
            .execute(&self.binary, &["--version".to_string()], None)
            .await
            .map(|_| ())
            .map_err(|e| match EngineError::from(e) {
                EngineError::Failed(msg) => EngineError::Unavailable(msg),
                other => other,
            })
    }

    async fn render_in(
        &self,
        workspace: &std::path::Path,
        document: String,
    ) -> Result<Vec<u8>, EngineError> {
        let html_path = workspace.join("document.html");
        let pdf_path = workspace.join("document.pdf");
        let profile_dir = workspace.join("profile");

        tokio::fs::write(&html_path, document)
            .await
            .map_err(|e| EngineError::Failed(format!("Failed to write document: {}", e)))?;

        let args = vec![
            "--headless".to_string(),
            "--disable-gpu".to_string(),
            "--no-sandbox".to_string(),
            "--no-pdf-header-footer".to_string(),
            "--run-all-compositor-stages-before-draw".to_string(),
            format!("--user-data-dir={}", profile_dir.display()),
            format!("--print-to-pdf={}", pdf_path.display()),
            format!("file://{}", html_path.display()),
        ];

        self.executor
            .execute(&self.binary, &args, Some(workspace))
            .await?;

        tokio::fs::read(&pdf_path)
            .await
            .map_err(|e| EngineError::Failed(format!("No PDF produced: {}", e)))
    }
}

#[async_trait]
impl RenderEngine for ChromiumEngine {
    async fn render_html_to_pdf(
        &self,
        html: &str,
        css: &str,
        page: &PageOptions,
    ) -> Result<Vec<u8>, EngineError> {
        let workspace = self.temp_dir.join(format!("facture-render-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&workspace)
            .await
            .map_err(|e| EngineError::Unavailable(format!("Cannot create workspace: {}", e)))?;

        let document = format!(
            "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><style>{}\n{}</style></head><body>{}</body></html>",
            page.page_rule(),
            css,
            html
        );

        let result = self.render_in(&workspace, document).await;

        if let Err(e) = tokio::fs::remove_dir_all(&workspace).await {
            tracing::warn!(workspace = ?workspace, error = %e, "Failed to remove render workspace");
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_a4_page_rule() {
        assert_eq!(
            PageOptions::a4().page_rule(),
            "@page { size: 210mm 297mm; margin: 12mm; }"
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let engine = ChromiumEngine::new(
            "definitely-not-a-browser-4242",
            Duration::from_secs(5),
            std::env::temp_dir(),
        );
        let err = engine
            .render_html_to_pdf("<p>x</p>", "", &PageOptions::a4())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Unavailable(_)));
    }
}
