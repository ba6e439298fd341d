use serde::{Deserialize, Serialize};

mod logger;
pub use logger::ProgressLogger;

/// Coarse phase of a research run, reported through [`ProgressEvent::Status`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Searching,
    Scraping,
    Generating,
}

/// One ordered notification about pipeline advancement.
///
/// Serialized as `{"event": "<name>", "data": {...}}` so the web client can
/// dispatch on the event name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ProgressEvent {
    Status {
        stage: Stage,
        message: String,
    },
    QueriesGenerated {
        queries: Vec<String>,
    },
    UrlFound {
        url: String,
        title: String,
        query: String,
    },
    ScrapeProgress {
        url: String,
        success: bool,
        chars: usize,
        elapsed_ms: f64,
        completed: usize,
        total: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Complete {
        report_id: String,
        elapsed_ms: f64,
        urls_found: usize,
        pages_scraped: usize,
        pages_failed: usize,
    },
    Error {
        message: String,
    },
}

impl ProgressEvent {
    pub fn status(stage: Stage, message: impl Into<String>) -> Self {
        ProgressEvent::Status {
            stage,
            message: message.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProgressEvent::Status { .. } => "status",
            ProgressEvent::QueriesGenerated { .. } => "queries_generated",
            ProgressEvent::UrlFound { .. } => "url_found",
            ProgressEvent::ScrapeProgress { .. } => "scrape_progress",
            ProgressEvent::Complete { .. } => "complete",
            ProgressEvent::Error { .. } => "error",
        }
    }

    /// `complete` and `error` end a job's event stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Complete { .. } | ProgressEvent::Error { .. }
        )
    }

    /// The variant payload without the `event` envelope.
    pub fn data(&self) -> serde_json::Result<serde_json::Value> {
        let mut value = serde_json::to_value(self)?;
        Ok(value
            .get_mut("data")
            .map(serde_json::Value::take)
            .unwrap_or(serde_json::Value::Null))
    }
}

/// Receiver of pipeline progress. Implementations must return quickly: the
/// pipeline calls this inline and does not expect it to wait on anything.
pub trait Callback: Send + Sync {
    fn on_event(&self, event: &ProgressEvent);
}

impl<F> Callback for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_event(&self, event: &ProgressEvent) {
        self(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_envelope() -> crate::Result<()> {
        let event = ProgressEvent::UrlFound {
            url: "https://example.com".to_string(),
            title: "Example".to_string(),
            query: "examples".to_string(),
        };

        let json = serde_json::to_value(&event)?;
        assert_eq!(json["event"], "url_found");
        assert_eq!(json["data"]["url"], "https://example.com");

        let data = event.data()?;
        assert_eq!(data["title"], "Example");
        assert!(data.get("event").is_none());

        let back: ProgressEvent = serde_json::from_value(json)?;
        assert_eq!(back, event);
        Ok(())
    }

    #[test]
    fn test_terminal_events() {
        assert!(
            ProgressEvent::Error {
                message: "boom".to_string()
            }
            .is_terminal()
        );
        assert!(!ProgressEvent::status(Stage::Searching, "searching").is_terminal());
        assert_eq!(
            ProgressEvent::status(Stage::Generating, "x").name(),
            "status"
        );
    }

    #[test]
    fn test_scrape_progress_omits_missing_error() -> crate::Result<()> {
        let event = ProgressEvent::ScrapeProgress {
            url: "https://a.org".to_string(),
            success: true,
            chars: 10,
            elapsed_ms: 1.5,
            completed: 1,
            total: 2,
            error: None,
        };
        let data = event.data()?;
        assert!(data.get("error").is_none());
        assert_eq!(data["completed"], 1);
        Ok(())
    }
}
