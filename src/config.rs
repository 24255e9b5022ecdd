// src/config.rs

use crate::fetch::{DatasetSpec, FetchSettings, RetryPolicy};
use crate::process::{ColumnPolicy, DatasetParser};
use crate::seed;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use url::Url;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub cache: CacheConfig,
    pub fetch: FetchConfig,
    pub parse: ParseConfig,
    pub datasets: Vec<DatasetConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub dir: PathBuf,
    /// Versioned key prefix; bump it when the record shape changes.
    pub prefix: String,
    pub max_age_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".cache/ligascraper"),
            prefix: "liga_v1".to_string(),
            max_age_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    /// Per attempt.
    pub timeout_secs: u64,
    /// Whole refresh, retries and backoff included.
    pub budget_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 12,
            budget_secs: 12,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParseConfig {
    pub column_policy: ColumnPolicy,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetConfig {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub numeric: Vec<String>,
    #[serde(default)]
    pub fallback_csv: Option<String>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("loading config {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(text).context("parsing YAML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for dataset in &self.datasets {
            if dataset.id.trim().is_empty() {
                bail!("dataset with url `{}` has an empty id", dataset.url);
            }
            if !seen.insert(dataset.id.as_str()) {
                bail!("dataset id `{}` appears more than once", dataset.id);
            }
            Url::parse(&dataset.url)
                .with_context(|| format!("dataset `{}` has invalid url `{}`", dataset.id, dataset.url))?;
        }
        if self.fetch.timeout_secs == 0 {
            bail!("fetch.timeout_secs must be positive");
        }
        if self.fetch.budget_secs == 0 {
            bail!("fetch.budget_secs must be positive");
        }
        Ok(())
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            timeout: Duration::from_secs(self.fetch.timeout_secs),
            budget: Duration::from_secs(self.fetch.budget_secs),
            max_age: Duration::from_secs(self.cache.max_age_secs),
            retry: self.fetch.retry,
        }
    }

    pub fn parser(&self) -> DatasetParser {
        DatasetParser::new(self.parse.column_policy)
    }

    /// One [`DatasetSpec`] per configured dataset. The fallback comes from
    /// `fallback_csv`, else the built-in seed, else nothing.
    pub fn dataset_specs(&self, parser: &DatasetParser) -> Vec<DatasetSpec> {
        self.datasets
            .iter()
            .map(|d| {
                let numeric: HashSet<String> = if d.numeric.is_empty() {
                    seed::default_numeric(&d.id)
                        .iter()
                        .map(|h| h.to_string())
                        .collect()
                } else {
                    d.numeric.iter().cloned().collect()
                };
                let fallback = match &d.fallback_csv {
                    Some(csv) => parser.parse(csv, &numeric),
                    None => seed::seed_dataset(&d.id, parser, &numeric),
                };
                DatasetSpec {
                    id: d.id.clone(),
                    url: d.url.clone(),
                    numeric,
                    fallback,
                }
            })
            .collect()
    }
}
