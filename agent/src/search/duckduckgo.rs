use crate::Result;
use crate::html;
use crate::search::{SafeSearch, SearchEngine, SearchHit, TimeLimit};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Url;
use std::sync::LazyLock;

const ENDPOINT: &str = "https://html.duckduckgo.com/html/";

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

/// Web search through DuckDuckGo's JavaScript-free HTML endpoint.
pub struct DuckDuckGo {
    client: reqwest::Client,
    region: String,
    safesearch: SafeSearch,
    timelimit: Option<TimeLimit>,
}

impl DuckDuckGo {
    pub fn new(
        region: String,
        safesearch: SafeSearch,
        timelimit: Option<TimeLimit>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(20))
            .build()?;

        Ok(Self {
            client,
            region,
            safesearch,
            timelimit,
        })
    }
}

#[async_trait]
impl SearchEngine for DuckDuckGo {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        let mut form = vec![
            ("q", query.to_string()),
            ("kl", self.region.clone()),
            ("kp", self.safesearch.code().to_string()),
        ];
        if let Some(limit) = self.timelimit {
            form.push(("df", limit.code().to_string()));
        }

        let page = self
            .client
            .post(ENDPOINT)
            .form(&form)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        Ok(parse_results(&page, max_results))
    }
}

static ANCHOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<a\b([^>]*)>(.*?)</a\s*>").expect("valid regex"));

static HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bhref\s*=\s*"([^"]*)""#).expect("valid regex"));

/// Resolve a result link to the page it points at. DuckDuckGo wraps most
/// links in a `/l/?uddg=<target>` redirect.
fn resolve_link(href: &str) -> Option<String> {
    let href = html::decode_entities(href);
    let absolute = if href.starts_with("//") {
        format!("https:{}", href)
    } else if href.starts_with('/') {
        format!("https://duckduckgo.com{}", href)
    } else {
        href
    };

    let url = Url::parse(&absolute).ok()?;
    let target = if is_duckduckgo(&url) {
        let (_, uddg) = url.query_pairs().find(|(k, _)| k == "uddg")?;
        Url::parse(&uddg).ok()?
    } else {
        url
    };

    let web = matches!(target.scheme(), "http" | "https");
    if web && target.host_str().is_some() && !is_duckduckgo(&target) {
        Some(target.to_string())
    } else {
        None
    }
}

fn is_duckduckgo(url: &Url) -> bool {
    url.host_str()
        .is_some_and(|host| host.ends_with("duckduckgo.com"))
}

/// Extract result links (`result__a`) and their snippets (`result__snippet`).
pub fn parse_results(page: &str, max_results: usize) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = Vec::new();

    for caps in ANCHOR.captures_iter(page) {
        let attrs = &caps[1];

        if attrs.contains("result__snippet") {
            if let Some(last) = hits.last_mut() {
                if last.snippet.is_empty() {
                    last.snippet = html::inline_text(&caps[2]);
                }
            }
            continue;
        }

        if !attrs.contains("result__a") {
            continue;
        }
        if hits.len() >= max_results {
            break;
        }

        let Some(url) = HREF.captures(attrs).and_then(|h| resolve_link(&h[1])) else {
            continue;
        };

        hits.push(SearchHit {
            title: html::inline_text(&caps[2]),
            url,
            snippet: String::new(),
        });
    }

    hits
}
