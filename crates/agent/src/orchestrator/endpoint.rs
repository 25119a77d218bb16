use std::collections::BTreeSet;

use globaliq_core::errors::ApplicationError;
use reqwest::Url;

/// Hosts the orchestrator may dispatch to. Anything else is rejected before any I/O.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostAllowList {
    hosts: BTreeSet<String>,
}

impl HostAllowList {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let hosts = hosts
            .into_iter()
            .map(|host| normalize_host(host.as_ref()))
            .filter(|host| !host.is_empty())
            .collect();
        Self { hosts }
    }

    pub fn validate(&self, raw_url: &str) -> Result<Url, ApplicationError> {
        let url = Url::parse(raw_url).map_err(|error| {
            ApplicationError::Validation(format!("endpoint `{raw_url}` is not a valid URL: {error}"))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ApplicationError::Validation(format!(
                "endpoint `{raw_url}` uses unsupported scheme `{}`",
                url.scheme()
            )));
        }
        let host = url.host_str().map(normalize_host).unwrap_or_default();
        if !self.hosts.contains(&host) {
            return Err(ApplicationError::Validation(format!(
                "endpoint host `{host}` is not allow-listed"
            )));
        }
        Ok(url)
    }

    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.hosts.iter().map(String::as_str)
    }
}

fn normalize_host(host: &str) -> String {
    host.trim().trim_start_matches('[').trim_end_matches(']').to_ascii_lowercase()
}
