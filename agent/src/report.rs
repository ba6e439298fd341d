use crate::pipeline::ResearchOutcome;
use regex::Regex;
use std::sync::LazyLock;

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));

static JS_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[([^\]]*)\]\(javascript:[^)]*\)").expect("valid regex")
});

/// Strip HTML tags and `javascript:` links from scraped text before it is
/// embedded in a report that a browser will render.
pub fn sanitize_markdown(text: &str) -> String {
    let text = TAG.replace_all(text, "");
    JS_LINK.replace_all(&text, "$1").into_owned()
}

fn with_thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Assemble the markdown report for a finished research run.
pub fn render(outcome: &ResearchOutcome) -> String {
    let mut sections: Vec<String> = Vec::new();

    sections.push(format!("# Research Report: {}\n", outcome.topic));
    sections.push(format!(
        "> Auto-generated by the Local Research Agent\n\
         > URLs searched: {} | Scraped: {} | Failed: {} | Time: {:.0} ms\n",
        outcome.urls.len(),
        outcome.scraped.len(),
        outcome.errors.len(),
        outcome.elapsed_ms
    ));
    sections.push("---\n".to_string());

    if !outcome.scraped.is_empty() {
        sections.push("## Table of Contents\n".to_string());
        for (i, url) in outcome.scraped.keys().enumerate() {
            sections.push(format!("{}. [{}](#source-{})", i + 1, url, i + 1));
        }
        sections.push("\n---\n".to_string());
    }

    for (i, (url, content)) in outcome.scraped.iter().enumerate() {
        sections.push(format!("## <a id=\"source-{}\"></a>Source {}\n", i + 1, i + 1));
        sections.push(format!("**URL:** {}\n", sanitize_markdown(url)));
        sections.push(format!(
            "**Length:** {} characters\n",
            with_thousands(content.chars().count())
        ));
        sections.push(sanitize_markdown(content.trim()));
        sections.push("\n\n---\n".to_string());
    }

    if !outcome.errors.is_empty() {
        sections.push("## Failed URLs\n".to_string());
        for (url, err) in &outcome.errors {
            sections.push(format!(
                "- **{}**: {}",
                sanitize_markdown(url),
                sanitize_markdown(err)
            ));
        }
        sections.push("\n".to_string());
    }

    sections.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_markdown() {
        assert_eq!(
            sanitize_markdown("<script>x</script>ok [click](javascript:alert(1)) [a](https://a.b)"),
            "xok click) [a](https://a.b)"
        );
        assert_eq!(sanitize_markdown("[Go](JavaScript:void)"), "Go");
    }

    #[test]
    fn test_with_thousands() {
        assert_eq!(with_thousands(0), "0");
        assert_eq!(with_thousands(999), "999");
        assert_eq!(with_thousands(1000), "1,000");
        assert_eq!(with_thousands(1234567), "1,234,567");
    }

    #[test]
    fn test_render() {
        let mut outcome = ResearchOutcome {
            topic: "tidal energy".to_string(),
            urls: vec!["https://a.org".to_string(), "https://b.org".to_string()],
            elapsed_ms: 1234.4,
            ..Default::default()
        };
        outcome
            .scraped
            .insert("https://a.org".to_string(), "  Tidal <b>power</b> is steady.  ".to_string());
        outcome
            .errors
            .insert("https://b.org".to_string(), "HTTP 404 for https://b.org".to_string());

        let md = render(&outcome);

        assert!(md.starts_with("# Research Report: tidal energy\n"));
        assert!(md.contains("> URLs searched: 2 | Scraped: 1 | Failed: 1 | Time: 1234 ms"));
        assert!(md.contains("1. [https://a.org](#source-1)"));
        assert!(md.contains("## <a id=\"source-1\"></a>Source 1"));
        assert!(md.contains("**Length:** 33 characters"));
        assert!(md.contains("\nTidal power is steady.\n"));
        assert!(md.contains("## Failed URLs\n\n- **https://b.org**: HTTP 404 for https://b.org"));
    }

    #[test]
    fn test_render_without_results() {
        let md = render(&ResearchOutcome {
            topic: "empty".to_string(),
            ..Default::default()
        });
        assert!(!md.contains("Table of Contents"));
        assert!(!md.contains("Failed URLs"));
    }
}
