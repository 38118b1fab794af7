// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Engine configuration loaded from TOML.
//!
//! Lookup order: an explicit path, then `$TOPN_CONFIG`, then `./topn.toml`.
//! Without any file the built-in defaults apply. The first successfully
//! loaded configuration is cached for the process lifetime.

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::exec::operators::topn::{DEFAULT_EMIT_PAGE_BYTE_SIZE_HINT, DEFAULT_MAX_PAGE_ROWS};

pub const CONFIG_ENV: &str = "TOPN_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "topn.toml";

static CONFIG: OnceLock<TopNEngineConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static TopNEngineConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let cfg = TopNEngineConfig::load_from_file(path.as_ref())?;
    Ok(CONFIG.get_or_init(|| cfg))
}

pub fn init_from_env_or_default() -> Result<&'static TopNEngineConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let cfg = match config_path_from_env_or_default()? {
        Some(path) => TopNEngineConfig::load_from_file(&path)?,
        None => TopNEngineConfig::default(),
    };
    Ok(CONFIG.get_or_init(|| cfg))
}

pub fn config() -> Result<&'static TopNEngineConfig> {
    init_from_env_or_default()
}

fn config_path_from_env_or_default() -> Result<Option<PathBuf>> {
    if let Ok(p) = std::env::var(CONFIG_ENV)
        && !p.trim().is_empty()
    {
        let path = PathBuf::from(p.trim());
        if !path.exists() {
            return Err(anyhow!(
                "${} points at a missing file: {}",
                CONFIG_ENV,
                path.display()
            ));
        }
        return Ok(Some(path));
    }
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    Ok(local.exists().then_some(local))
}

#[derive(Clone, Debug, Deserialize)]
pub struct TopNEngineConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression.
    /// If set, this takes precedence over `log_level`.
    /// Example: "topn_engine=debug,warn"
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub topn: TopNSection,

    #[serde(default)]
    pub workload: WorkloadSection,
}

impl TopNEngineConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        Self::from_toml_str(&s).with_context(|| format!("parse toml: {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: TopNEngineConfig = toml::from_str(s)?;
        cfg.topn.validate()?;
        Ok(cfg)
    }

    /// Filter directive handed to the logging subscriber.
    pub fn effective_log_filter(&self) -> &str {
        self.log_filter
            .as_deref()
            .filter(|f| !f.trim().is_empty())
            .unwrap_or(&self.log_level)
    }
}

impl Default for TopNEngineConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            topn: TopNSection::default(),
            workload: WorkloadSection::default(),
        }
    }
}

/// Operator-wide sizing defaults.
#[derive(Clone, Debug, Deserialize)]
pub struct TopNSection {
    #[serde(default = "default_emit_page_byte_size_hint")]
    pub emit_page_byte_size_hint: usize,
    #[serde(default = "default_max_page_rows")]
    pub max_page_rows: usize,
    /// Limit of the root memory tracker; unlimited when absent.
    #[serde(default)]
    pub memory_limit_bytes: Option<i64>,
}

fn default_emit_page_byte_size_hint() -> usize {
    DEFAULT_EMIT_PAGE_BYTE_SIZE_HINT
}

fn default_max_page_rows() -> usize {
    DEFAULT_MAX_PAGE_ROWS
}

impl TopNSection {
    fn validate(&self) -> Result<()> {
        if self.emit_page_byte_size_hint == 0 {
            return Err(anyhow!("topn.emit_page_byte_size_hint must be positive"));
        }
        if self.max_page_rows == 0 {
            return Err(anyhow!("topn.max_page_rows must be positive"));
        }
        if let Some(limit) = self.memory_limit_bytes
            && limit <= 0
        {
            return Err(anyhow!(
                "topn.memory_limit_bytes must be positive, got {limit}"
            ));
        }
        Ok(())
    }
}

impl Default for TopNSection {
    fn default() -> Self {
        Self {
            emit_page_byte_size_hint: default_emit_page_byte_size_hint(),
            max_page_rows: default_max_page_rows(),
            memory_limit_bytes: None,
        }
    }
}

/// Synthetic workload run by the `topn-engine` binary.
#[derive(Clone, Debug, Deserialize)]
pub struct WorkloadSection {
    #[serde(default = "default_rows")]
    pub rows: usize,
    #[serde(default = "default_top_count")]
    pub top_count: i64,
    #[serde(default = "default_page_rows")]
    pub page_rows: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_rows() -> usize {
    10_000
}
fn default_top_count() -> i64 {
    4096
}
fn default_page_rows() -> usize {
    1024
}
fn default_seed() -> u64 {
    42
}

impl Default for WorkloadSection {
    fn default() -> Self {
        Self {
            rows: default_rows(),
            top_count: default_top_count(),
            page_rows: default_page_rows(),
            seed: default_seed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = TopNEngineConfig::from_toml_str("").expect("parse");
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.effective_log_filter(), "info");
        assert_eq!(cfg.topn.emit_page_byte_size_hint, 1 << 20);
        assert_eq!(cfg.topn.max_page_rows, 4096);
        assert_eq!(cfg.topn.memory_limit_bytes, None);
        assert_eq!(cfg.workload.rows, 10_000);
        assert_eq!(cfg.workload.top_count, 4096);
    }

    #[test]
    fn log_filter_overrides_level() {
        let cfg = TopNEngineConfig::from_toml_str(
            r#"
log_level = "warn"
log_filter = "topn_engine=debug"

[topn]
max_page_rows = 128
memory_limit_bytes = 1048576
"#,
        )
        .expect("parse");
        assert_eq!(cfg.effective_log_filter(), "topn_engine=debug");
        assert_eq!(cfg.topn.max_page_rows, 128);
        assert_eq!(cfg.topn.memory_limit_bytes, Some(1 << 20));
    }

    #[test]
    fn invalid_sizing_is_rejected() {
        let err = TopNEngineConfig::from_toml_str("[topn]\nmax_page_rows = 0\n")
            .expect_err("zero rows");
        assert!(err.to_string().contains("max_page_rows"), "err={err}");
        assert!(TopNEngineConfig::from_toml_str("[topn]\nmemory_limit_bytes = -5\n").is_err());
    }
}
