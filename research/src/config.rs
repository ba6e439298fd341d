use crate::runner::RunnerConfig;
use agent::scrape::FetcherConfig;
use agent::search::{SafeSearch, SearcherConfig, TimeLimit};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Process configuration, loaded from environment variables (and `.env`).
///
/// | Env Var                      | Default                      |
/// |------------------------------|------------------------------|
/// | `OLLAMA_HOST`                | `http://localhost:11434`     |
/// | `OLLAMA_MODEL`               | `llama3.1:8b-instruct-q8_0`  |
/// | `OLLAMA_TIMEOUT`             | `60` (seconds)               |
/// | `SEARCH_NUM_QUERIES`         | `3`                          |
/// | `SEARCH_RESULTS_PER_QUERY`   | `3`                          |
/// | `SEARCH_REGION`              | `wt-wt`                      |
/// | `SEARCH_SAFESEARCH`          | `moderate`                   |
/// | `SEARCH_TIMELIMIT`           | unset                        |
/// | `MAX_CONCURRENT_SEARCHES`    | `3`                          |
/// | `SCRAPER_REQUEST_TIMEOUT`    | `15000` (ms)                 |
/// | `SCRAPER_MAX_RETRIES`        | `2`                          |
/// | `SCRAPER_SEMAPHORE_LIMIT`    | `6`                          |
/// | `SCRAPER_MIN_WORDS`          | `30`                         |
/// | `WEB_HOST`                   | `0.0.0.0`                    |
/// | `WEB_PORT`                   | `8000`                       |
/// | `REPORTS_DIR`                | `reports`                    |
/// | `RUNNER_MAX_JOBS`            | `20`                         |
/// | `RUNNER_MAX_PENDING`         | `8`                          |
/// | `RUNNER_SUBSCRIBER_CAPACITY` | `256`                        |
///
/// `VERBOSE` is handled by the CLI's `--verbose` flag.
#[derive(Clone, Debug)]
pub struct ResearchConfig {
    pub ollama_host: String,
    pub ollama_model: String,
    pub ollama_timeout: Duration,
    pub search: SearcherConfig,
    pub fetcher: FetcherConfig,
    pub web_host: String,
    pub web_port: u16,
    pub reports_dir: PathBuf,
    pub runner: RunnerConfig,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            ollama_host: "http://localhost:11434".to_string(),
            ollama_model: "llama3.1:8b-instruct-q8_0".to_string(),
            ollama_timeout: Duration::from_secs(60),
            search: SearcherConfig::default(),
            fetcher: FetcherConfig::default(),
            web_host: "0.0.0.0".to_string(),
            web_port: 8000,
            reports_dir: PathBuf::from("reports"),
            runner: RunnerConfig::default(),
        }
    }
}

/// Reads typed values out of a key lookup, keeping the default (with a
/// warning) for anything that does not parse.
struct Vars<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn string(&self, key: &str, default: String) -> String {
        match (self.lookup)(key) {
            Some(v) if !v.trim().is_empty() => v.trim().to_string(),
            _ => default,
        }
    }

    fn parse<T>(&self, key: &str, default: T) -> T
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let Some(raw) = (self.lookup)(key) else {
            return default;
        };
        let raw = raw.trim();
        if raw.is_empty() {
            return default;
        }
        match raw.parse() {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(key, value = raw, error = %e, "ignoring invalid setting");
                default
            }
        }
    }

    /// Like [`Vars::parse`], but zero also falls back to the default.
    fn positive(&self, key: &str, default: usize) -> usize {
        match self.parse(key, default) {
            0 => {
                tracing::warn!(key, "setting must be at least 1, using the default");
                default
            }
            v => v,
        }
    }
}

impl ResearchConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let vars = Vars { lookup };
        let defaults = Self::default();

        let timelimit = (vars.lookup)("SEARCH_TIMELIMIT")
            .filter(|v| !v.trim().is_empty())
            .and_then(|v| match TimeLimit::from_str(v.trim()) {
                Ok(t) => Some(t),
                Err(e) => {
                    tracing::warn!(
                        key = "SEARCH_TIMELIMIT",
                        error = %e,
                        "ignoring invalid setting"
                    );
                    None
                }
            });

        let search = SearcherConfig {
            num_queries: vars.parse("SEARCH_NUM_QUERIES", defaults.search.num_queries),
            results_per_query: vars.parse(
                "SEARCH_RESULTS_PER_QUERY",
                defaults.search.results_per_query,
            ),
            region: vars.string("SEARCH_REGION", defaults.search.region),
            safesearch: vars.parse::<SafeSearch>("SEARCH_SAFESEARCH", defaults.search.safesearch),
            timelimit,
            max_concurrent_searches: vars.parse(
                "MAX_CONCURRENT_SEARCHES",
                defaults.search.max_concurrent_searches,
            ),
            ..defaults.search
        };

        let fetcher = FetcherConfig {
            request_timeout: Duration::from_millis(vars.parse(
                "SCRAPER_REQUEST_TIMEOUT",
                defaults.fetcher.request_timeout.as_millis() as u64,
            )),
            max_retries: vars.parse("SCRAPER_MAX_RETRIES", defaults.fetcher.max_retries),
            concurrency: vars.parse("SCRAPER_SEMAPHORE_LIMIT", defaults.fetcher.concurrency),
            min_words: vars.parse("SCRAPER_MIN_WORDS", defaults.fetcher.min_words),
            ..defaults.fetcher
        };

        let runner = RunnerConfig {
            max_jobs: vars.positive("RUNNER_MAX_JOBS", defaults.runner.max_jobs),
            max_pending: vars.positive("RUNNER_MAX_PENDING", defaults.runner.max_pending),
            subscriber_capacity: vars.positive(
                "RUNNER_SUBSCRIBER_CAPACITY",
                defaults.runner.subscriber_capacity,
            ),
        };

        Self {
            ollama_host: vars.string("OLLAMA_HOST", defaults.ollama_host),
            ollama_model: vars.string("OLLAMA_MODEL", defaults.ollama_model),
            ollama_timeout: Duration::from_secs(
                vars.parse("OLLAMA_TIMEOUT", defaults.ollama_timeout.as_secs()),
            ),
            search,
            fetcher,
            web_host: vars.string("WEB_HOST", defaults.web_host),
            web_port: vars.parse("WEB_PORT", defaults.web_port),
            reports_dir: PathBuf::from(
                vars.string("REPORTS_DIR", defaults.reports_dir.display().to_string()),
            ),
            runner,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> ResearchConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ResearchConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[]);
        assert_eq!(cfg.ollama_host, "http://localhost:11434");
        assert_eq!(cfg.ollama_model, "llama3.1:8b-instruct-q8_0");
        assert_eq!(cfg.ollama_timeout, Duration::from_secs(60));
        assert_eq!(cfg.search.num_queries, 3);
        assert_eq!(cfg.search.safesearch, SafeSearch::Moderate);
        assert_eq!(cfg.search.timelimit, None);
        assert_eq!(cfg.fetcher.request_timeout, Duration::from_millis(15_000));
        assert_eq!(cfg.web_port, 8000);
        assert_eq!(cfg.reports_dir, PathBuf::from("reports"));
        assert_eq!(cfg.runner.max_jobs, 20);
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("OLLAMA_HOST", "http://gpu-box:11434"),
            ("SEARCH_NUM_QUERIES", "5"),
            ("SEARCH_SAFESEARCH", "off"),
            ("SEARCH_TIMELIMIT", "w"),
            ("SCRAPER_REQUEST_TIMEOUT", "2500"),
            ("WEB_PORT", "9000"),
            ("RUNNER_MAX_PENDING", "2"),
        ]);
        assert_eq!(cfg.ollama_host, "http://gpu-box:11434");
        assert_eq!(cfg.search.num_queries, 5);
        assert_eq!(cfg.search.safesearch, SafeSearch::Off);
        assert_eq!(cfg.search.timelimit, Some(TimeLimit::Week));
        assert_eq!(cfg.fetcher.request_timeout, Duration::from_millis(2500));
        assert_eq!(cfg.web_port, 9000);
        assert_eq!(cfg.runner.max_pending, 2);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let cfg = config(&[
            ("SEARCH_NUM_QUERIES", "many"),
            ("WEB_PORT", "99999"),
            ("SEARCH_TIMELIMIT", "decade"),
            ("OLLAMA_MODEL", "   "),
        ]);
        assert_eq!(cfg.search.num_queries, 3);
        assert_eq!(cfg.web_port, 8000);
        assert_eq!(cfg.search.timelimit, None);
        assert_eq!(cfg.ollama_model, "llama3.1:8b-instruct-q8_0");
    }

    #[test]
    fn test_zero_runner_limits_fall_back() {
        let cfg = config(&[
            ("RUNNER_MAX_JOBS", "0"),
            ("RUNNER_MAX_PENDING", "0"),
            ("RUNNER_SUBSCRIBER_CAPACITY", "0"),
        ]);
        assert_eq!(cfg.runner.max_jobs, 20);
        assert_eq!(cfg.runner.max_pending, 8);
        assert_eq!(cfg.runner.subscriber_capacity, 256);
    }
}
