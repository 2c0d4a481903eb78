//! 🔧 App Configuration: the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." -- every developer at 3am 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.
//!
//! 🧠 No globals. The region, the offset, the thresholds, the collection names:
//! all of it is read once here and handed to constructors explicitly.

use anyhow::{Context, Result, ensure};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

use crate::aggregator::DecrementDay;
use crate::backends::{CommonStoreConfig, FileAggregateStoreConfig, FileReportHistoryConfig};
use crate::bucket_key::DayClock;

/// 📦 The AppConfig: one struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub transaction: TransactionConfig,
    #[serde(default)]
    pub rebuild: RebuildConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// 🪣 where the buckets live
    pub aggregate_store: AggregateStoreConfig,
    /// 📜 where the raw reports live
    pub report_history: ReportHistoryConfig,
}

/// 🩺 How reports turn into bucket deltas.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AggregationConfig {
    /// ⏰ The reference time zone, as minutes east of UTC. Chosen once, for everyone.
    pub utc_offset_minutes: i32,
    /// 🎯 Scores strictly below this are suspicious: stored for audit, never counted.
    pub trust_threshold: f64,
    /// 📅 Which day the vacated state is decremented on. See [`DecrementDay`].
    pub decrement_day: DecrementDay,
    pub trusted_collection: String,
    pub suspicious_collection: String,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 0,
            trust_threshold: 0.7,
            decrement_day: DecrementDay::Report,
            trusted_collection: "reports".to_string(),
            suspicious_collection: "reports_suspicious".to_string(),
        }
    }
}

impl AggregationConfig {
    pub fn clock(&self) -> Result<DayClock> {
        DayClock::new(self.utc_offset_minutes)
    }
}

/// 🔁 The transaction runner's retry budget.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct TransactionConfig {
    /// total attempts, first one included
    pub max_attempts: u32,
    /// ⏱️ first backoff in ms, doubled per attempt. 0 means retry immediately.
    pub backoff_base_ms: u64,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        // 🎯 5 attempts: the same budget document-database SDKs ship with
        Self { max_attempts: 5, backoff_base_ms: 10 }
    }
}

/// 🏗️ Knobs for the full rebuild.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct RebuildConfig {
    /// 📦 bucket writes per committed batch (clamped to the store's own limit)
    pub chunk_size: usize,
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self { chunk_size: 500 }
    }
}

/// 🧵 How the ingest pipeline is staffed.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// 📬 bounded channel capacity per ingest worker
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// 🧵 number of ingest workers; sessions are pinned to one worker each
    #[serde(default = "default_ingest_parallelism")]
    pub ingest_parallelism: usize,
    /// 📊 draw the rebuild progress bar
    #[serde(default = "default_show_progress")]
    pub show_progress: bool,
}

fn default_queue_capacity() -> usize {
    10
}

fn default_ingest_parallelism() -> usize {
    1
}

fn default_show_progress() -> bool {
    true
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            ingest_parallelism: default_ingest_parallelism(),
            show_progress: default_show_progress(),
        }
    }
}

/// 🎭 Which aggregate store to stand up.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub enum AggregateStoreConfig {
    InMemory(CommonStoreConfig),
    File(FileAggregateStoreConfig),
}

/// 🎭 Which report history to stand up.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub enum ReportHistoryConfig {
    InMemory,
    File(FileReportHistoryConfig),
}

impl AppConfig {
    /// ✅ Catch the nonsense at startup rather than 40,000 reports into a rebuild.
    pub fn validate(&self) -> Result<()> {
        self.aggregation.clock().context("💀 aggregation.utc_offset_minutes is out of range")?;
        let threshold = self.aggregation.trust_threshold;
        ensure!(
            (0.0..=1.0).contains(&threshold),
            "💀 aggregation.trust_threshold must be within [0, 1], got {threshold}. Scores are probabilities, not vibes."
        );
        ensure!(self.rebuild.chunk_size > 0, "💀 rebuild.chunk_size of 0 would commit zero buckets forever.");
        ensure!(self.transaction.max_attempts > 0, "💀 transaction.max_attempts of 0 means never even trying.");
        ensure!(self.runtime.ingest_parallelism > 0, "💀 runtime.ingest_parallelism of 0 leaves nobody to do the work.");
        ensure!(self.runtime.queue_capacity > 0, "💀 runtime.queue_capacity must be at least 1.");
        ensure!(
            self.aggregation.trusted_collection != self.aggregation.suspicious_collection,
            "💀 trusted and suspicious reports must not share a collection, or the quarantine is decorative."
        );
        Ok(())
    }
}

/// 🚀 Load the config: env vars (DGX_*) as the base layer, the TOML file on top.
///
/// 📐 No file → env vars only. File → env + TOML merged, TOML wins on conflicts.
/// The result is validated before anyone gets to use it.
pub fn load_config(config_file_name: Option<&Path>) -> Result<AppConfig> {
    info!("🔧 Loading configuration: {:#?}", config_file_name.unwrap_or(Path::new("")));

    let config = Figment::new().merge(Env::prefixed("DGX_"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (DGX_*). \
             The file exists in our hearts, but apparently not in a shape serde recognizes.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (DGX_*). \
                 No file was provided, so this one's all on the environment. Classic."
            .to_string(),
    };

    let app_config: AppConfig = config.extract().context(context_msg)?;
    app_config.validate()?;
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_test_config(dir: &tempfile::TempDir, contents: &str) -> std::path::PathBuf {
        // 🧪 a real file, because Figment wants TOML from disk, like it's method acting
        let path = dir.path().join("dgx.toml");
        fs::write(&path, contents).expect("💀 Failed to write test config. The filesystem said 'new phone who dis'.");
        path
    }

    #[test]
    fn the_one_where_every_section_shows_up_and_is_heard() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_test_config(
            &dir,
            r#"
            report_history = "InMemory"

            [aggregation]
            utc_offset_minutes = 120
            trust_threshold = 0.5
            decrement_day = "prior"
            trusted_collection = "individual_report_v2"
            suspicious_collection = "individual_report_v2_suspicious"

            [transaction]
            max_attempts = 9
            backoff_base_ms = 0

            [rebuild]
            chunk_size = 250

            [runtime]
            queue_capacity = 8
            ingest_parallelism = 3
            show_progress = false

            [aggregate_store.File]
            snapshot_path = "buckets.ndjson"
            max_writes_per_batch = 400
            "#,
        );

        let app_config = load_config(Some(path.as_path()))?;
        assert_eq!(app_config.aggregation.utc_offset_minutes, 120);
        assert_eq!(app_config.aggregation.decrement_day, DecrementDay::Prior);
        assert_eq!(app_config.aggregation.trusted_collection, "individual_report_v2");
        assert_eq!(app_config.transaction, TransactionConfig { max_attempts: 9, backoff_base_ms: 0 });
        assert_eq!(app_config.rebuild.chunk_size, 250);
        assert_eq!(app_config.runtime.ingest_parallelism, 3);
        assert!(!app_config.runtime.show_progress);
        assert_eq!(app_config.report_history, ReportHistoryConfig::InMemory);
        match app_config.aggregate_store {
            AggregateStoreConfig::File(file_config) => {
                assert_eq!(file_config.common_config.max_writes_per_batch, 400);
            }
            honestly_who_knows => panic!(
                "💀 Expected a File store config, but serde took us to {honestly_who_knows:?}. Plot twist energy."
            ),
        }
        Ok(())
    }

    #[test]
    fn the_one_where_defaults_show_up_uninvited_but_helpful() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_test_config(
            &dir,
            r#"
            report_history = "InMemory"

            [aggregate_store.InMemory]
            "#,
        );

        let app_config: AppConfig = Figment::new().merge(Toml::file(path.as_path())).extract()?;
        assert_eq!(app_config.aggregation, AggregationConfig::default());
        assert_eq!(app_config.aggregation.trust_threshold, 0.7);
        assert_eq!(app_config.transaction.max_attempts, 5);
        assert_eq!(app_config.rebuild.chunk_size, 500);
        assert_eq!(app_config.runtime.queue_capacity, 10);
        assert_eq!(app_config.runtime.ingest_parallelism, 1);
        assert_eq!(app_config.aggregate_store, AggregateStoreConfig::InMemory(CommonStoreConfig { max_writes_per_batch: 500 }));
        Ok(())
    }

    #[test]
    fn the_one_where_the_runtime_section_staffs_the_floor() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_test_config(
            &dir,
            r#"
            report_history = "InMemory"

            [runtime]
            queue_capacity = 12
            ingest_parallelism = 4

            [aggregate_store.InMemory]
            "#,
        );

        let app_config = load_config(Some(path.as_path()))?;
        assert_eq!(app_config.runtime.queue_capacity, 12);
        assert_eq!(app_config.runtime.ingest_parallelism, 4);
        Ok(())
    }

    #[test]
    fn the_one_where_validation_bounces_the_nonsense() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut settings = toml::Table::new();
        settings.insert("report_history".into(), toml::Value::String("InMemory".into()));
        let mut store = toml::Table::new();
        store.insert("InMemory".into(), toml::Value::Table(toml::Table::new()));
        settings.insert("aggregate_store".into(), toml::Value::Table(store));
        let mut aggregation = toml::Table::new();
        aggregation.insert("trust_threshold".into(), toml::Value::Float(1.5));
        settings.insert("aggregation".into(), toml::Value::Table(aggregation));

        let path = write_test_config(&dir, &toml::to_string(&settings)?);
        let err = load_config(Some(path.as_path())).expect_err("a threshold of 1.5 is not a probability");
        assert!(err.to_string().contains("trust_threshold"));
        Ok(())
    }

    #[test]
    fn the_one_where_the_offset_has_to_be_on_this_planet() {
        let config = AppConfig {
            aggregation: AggregationConfig { utc_offset_minutes: 25 * 60, ..AggregationConfig::default() },
            transaction: TransactionConfig::default(),
            rebuild: RebuildConfig::default(),
            runtime: RuntimeConfig::default(),
            aggregate_store: AggregateStoreConfig::InMemory(CommonStoreConfig::default()),
            report_history: ReportHistoryConfig::InMemory,
        };
        assert!(config.validate().is_err());
    }
}
