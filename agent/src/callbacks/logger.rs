use crate::callbacks::{Callback, ProgressEvent};
use std::io::Write;
use std::sync::Mutex;

/// Writes a one-line human readable trace of every progress event.
pub struct ProgressLogger<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> ProgressLogger<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        match self.writer.into_inner() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn line(event: &ProgressEvent) -> String {
        match event {
            ProgressEvent::Status { message, .. } => format!("» {}", message),
            ProgressEvent::QueriesGenerated { queries } => {
                let mut s = format!("» generated {} queries", queries.len());
                for (i, q) in queries.iter().enumerate() {
                    s.push_str(&format!("\n    {}. {}", i + 1, q));
                }
                s
            }
            ProgressEvent::UrlFound { url, .. } => format!("  + {}", url),
            ProgressEvent::ScrapeProgress {
                url,
                success,
                chars,
                elapsed_ms,
                completed,
                total,
                error,
            } => {
                if *success {
                    format!(
                        "  [{}/{}] ok   {} ({} chars, {:.0} ms)",
                        completed, total, url, chars, elapsed_ms
                    )
                } else {
                    format!(
                        "  [{}/{}] fail {} ({})",
                        completed,
                        total,
                        url,
                        error.as_deref().unwrap_or("empty content")
                    )
                }
            }
            ProgressEvent::Complete { report_id, .. } => format!("» complete: {}", report_id),
            ProgressEvent::Error { message } => format!("» error: {}", message),
        }
    }
}

impl<W: Write + Send> Callback for ProgressLogger<W> {
    fn on_event(&self, event: &ProgressEvent) {
        tracing::debug!(event = event.name(), "pipeline progress");

        let mut writer = match self.writer.lock() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Err(e) = writeln!(writer, "{}", Self::line(event)).and_then(|_| writer.flush()) {
            tracing::warn!(error = %e, "failed to write progress line");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ProgressLogger;
    use crate::callbacks::{Callback, ProgressEvent, Stage};

    #[test]
    fn test_progress_logger() {
        let logger = ProgressLogger::new(Vec::new());

        logger.on_event(&ProgressEvent::status(Stage::Searching, "Generating search queries..."));
        logger.on_event(&ProgressEvent::QueriesGenerated {
            queries: vec!["a b c".to_string(), "d e f".to_string()],
        });
        logger.on_event(&ProgressEvent::ScrapeProgress {
            url: "https://x.io".to_string(),
            success: false,
            chars: 0,
            elapsed_ms: 0.0,
            completed: 1,
            total: 3,
            error: Some("HTTP 404".to_string()),
        });

        let out = String::from_utf8(logger.into_inner()).unwrap();
        assert_eq!(
            out,
            "» Generating search queries...\n\
             » generated 2 queries\n    1. a b c\n    2. d e f\n\
             \x20 [1/3] fail https://x.io (HTTP 404)\n"
        );
    }
}
