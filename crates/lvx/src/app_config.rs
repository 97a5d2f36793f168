//! 🔧 App Configuration — the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." — every developer at 3am 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
// 🚀 tracing::info — because println! in production is a cry for help.
use tracing::info;

/// 📦 The AppConfig: one struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
///
/// 🎯 Contains everything the shipper needs to know about itself,
/// which is more self-awareness than most apps achieve in their lifetime.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// 🏷️ Who is this? Ends up in the default file name and the index family.
    /// The one field with no default, because "unknown-service" helps nobody.
    pub service_name: String,

    /// 📂 Where the local log file goes. None → `./{service_name}.log`, lowercased,
    /// current directory, no surprises.
    #[serde(default)]
    pub log_path: Option<String>,

    /// 🚫 Set to skip the file sink entirely. Some containers are read-only
    /// and they're very proud of it.
    #[serde(default)]
    pub no_file: bool,

    /// 🖥️ Pretty lines on stdout for the humans. Default yes — we like humans.
    #[serde(default = "default_true")]
    pub to_console: bool,

    /// 📡 The remote backend. None → purely local operation, which is a valid
    /// lifestyle and not a failure mode.
    #[serde(default)]
    pub backend: Option<BackendConfig>,

    /// 🙈 Dot-paths to scrub before any sink sees the record.
    /// `"req.headers.authorization"` has no business in a log file. Or anywhere.
    #[serde(default)]
    pub redact_fields: Vec<String>,

    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// 📅 Index rotation granularity: how much calendar goes in the index name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    /// `logs.2023`
    Yearly,
    /// `logs.2023-03`
    Monthly,
    /// `logs.2023-03-01` — the classic
    Daily,
}

/// 📡 Everything about the remote indexing backend.
#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,

    /// 🏷️ The index family name. Rotation suffixes get appended to this.
    #[serde(default = "default_index_base")]
    pub index_base_name: String,

    /// 📅 None → one static index, no time partitioning. Retro, but supported.
    #[serde(default)]
    pub rotation: Option<Rotation>,

    /// 📦 Records per bulk request. Bigger = fewer round trips, chunkier failures.
    #[serde(default = "default_bulk_size")]
    pub bulk_size: usize,

    /// 🌊 The byte watermark: when staged bytes cross this line, we flush early
    /// regardless of the record count. Memory is finite. Allegedly.
    #[serde(default = "default_high_water_bytes")]
    pub high_water_bytes: usize,

    /// 🗓️ How long day-partitioned indices get to live. Humantime strings
    /// welcome: "3weeks", "21d", "504h" — all the same three weeks.
    #[serde(default = "default_retention_window", with = "humantime_serde")]
    pub retention_window: Duration,
}

/// ⚙️ The plumbing knobs: queue sizes, timers, the stuff nobody touches
/// until the day everybody touches it.
#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    /// 📦 Per-sink queue depth. Small on purpose — a deep queue doesn't fix a
    /// slow sink, it just delays the conversation about the slow sink.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// ⏰ How often idle sinks get nudged to flush.
    #[serde(default = "default_flush_interval", with = "humantime_serde")]
    pub flush_interval: Duration,

    /// ⏳ How long shutdown waits for sinks to drain before going full guillotine.
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// 👀 How often the file-deletion watcher checks whether the log file
    /// still believes in itself.
    #[serde(default = "default_watch_poll_interval", with = "humantime_serde")]
    pub watch_poll_interval: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            flush_interval: default_flush_interval(),
            shutdown_timeout: default_shutdown_timeout(),
            watch_poll_interval: default_watch_poll_interval(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_index_base() -> String {
    "logs".to_string()
}

fn default_bulk_size() -> usize {
    500
}

fn default_high_water_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_retention_window() -> Duration {
    // three weeks — long enough to debug last sprint, short enough to afford the disks
    Duration::from_secs(3 * 7 * 24 * 3600)
}

fn default_queue_capacity() -> usize {
    64
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_watch_poll_interval() -> Duration {
    Duration::from_secs(2)
}

/// 🚀 Load the config — from a file, from env vars, or from the sheer power of hoping.
///
/// 🔧 Merges environment variables (LVX_*) with an optional TOML file.
/// No `.only(...)` restriction — ALL LVX_ vars are fair game.
/// We don't gatekeep env vars here. This is a safe space. 🦆
///
/// 📐 DESIGN NOTE (no cap, this is tribal knowledge):
///   - If `config_file_name` is None  → env vars only. No file. No assumptions.
///   - If `config_file_name` is Some  → env vars + TOML file, merged. TOML wins on conflicts.
///   Ancient proverb: "He who defaults to config.toml uninvited, deploys to production alone."
///
/// 💀 Returns an error if config is unparseable. Which it will be. Check the error
/// message though — it's contextual, informative, and written with love. Or despair.
/// Hard to tell at 3am.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    // 🏗️ Start with env vars as the base layer — like a good sourdough starter.
    // ALL LVX_* vars accepted. No ID required. No velvet rope. Everyone's invited.
    let config = Figment::new().merge(Env::prefixed("LVX_"));

    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    // 💬 Build a context message that will actually TELL you what went wrong.
    // None of that "error: error" energy. This isn't a Kafka novel. (The author, not the queue.)
    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (LVX_*). \
             The file exists in our hearts, but apparently not on disk.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (LVX_*). \
                 No file was provided — this one's all on the environment. Classic."
            .to_string(),
    };

    config.extract().context(context_msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn write_test_config(contents: &str) -> std::path::PathBuf {
        let timestamp_of_questionable_life_choices = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("💀 Clock went backwards. Time is a flat bug report.")
            .as_nanos();
        let temp_path = std::env::temp_dir().join(format!(
            "lvx_app_config_{timestamp_of_questionable_life_choices}.toml"
        ));

        // 🧪 We write a real file here because Figment wants TOML from disk, like it's method acting.
        fs::write(&temp_path, contents)
            .expect("💀 Failed to write test config. The filesystem said 'new phone who dis'.");
        temp_path
    }

    #[test]
    fn the_one_where_a_full_config_parses_front_to_back() {
        let config_path = write_test_config(
            r#"
            service_name = "checkout"
            log_path = "/var/log/checkout.log"
            redact_fields = ["req.headers.authorization"]

            [backend]
            host = "es.internal"
            port = 9200
            index_base_name = "checkout-logs"
            rotation = "daily"
            bulk_size = 200
            retention_window = "2weeks"

            [runtime]
            queue_capacity = 16
            flush_interval = "1s"
            "#,
        );

        let app_config = load_config(Some(config_path.as_path()))
            .expect("💀 Full config should parse. The schema drift goblin does not get this win.");

        assert_eq!(app_config.service_name, "checkout");
        assert_eq!(app_config.log_path.as_deref(), Some("/var/log/checkout.log"));
        assert_eq!(app_config.redact_fields, vec!["req.headers.authorization"]);
        let backend = app_config.backend.expect("backend block was right there");
        assert_eq!(backend.host, "es.internal");
        assert_eq!(backend.rotation, Some(Rotation::Daily));
        assert_eq!(backend.bulk_size, 200);
        assert_eq!(backend.retention_window, Duration::from_secs(2 * 7 * 24 * 3600));
        assert_eq!(app_config.runtime.queue_capacity, 16);
        assert_eq!(app_config.runtime.flush_interval, Duration::from_secs(1));

        fs::remove_file(config_path)
            .expect("💀 Failed to remove test config. Even the trash has trust issues.");
    }

    #[test]
    fn the_one_where_defaults_show_up_uninvited_but_helpful() {
        let config_path = write_test_config(
            r#"
            service_name = "minimal"
            "#,
        );

        let app_config: AppConfig = Figment::new()
            .merge(Toml::file(config_path.as_path()))
            .extract()
            .expect("💀 Default config should exist. Serde left us on read otherwise.");

        assert!(!app_config.no_file);
        assert!(app_config.to_console);
        assert!(app_config.backend.is_none());
        assert!(app_config.redact_fields.is_empty());
        assert_eq!(app_config.runtime.queue_capacity, 64);
        assert_eq!(app_config.runtime.flush_interval, Duration::from_secs(5));
        assert_eq!(app_config.runtime.shutdown_timeout, Duration::from_secs(10));

        fs::remove_file(config_path)
            .expect("💀 Failed to remove test config. The janitor quit mid-scene.");
    }

    #[test]
    fn the_one_where_backend_defaults_fill_in_behind_host_and_port() {
        let config_path = write_test_config(
            r#"
            service_name = "svc"

            [backend]
            host = "localhost"
            port = 9200
            "#,
        );

        let app_config = load_config(Some(config_path.as_path()))
            .expect("💀 Backend with only host+port should parse. Defaults exist for a reason.");

        let backend = app_config.backend.expect("backend block was right there");
        assert_eq!(backend.index_base_name, "logs");
        assert_eq!(backend.rotation, None);
        assert_eq!(backend.bulk_size, 500);
        assert_eq!(backend.high_water_bytes, 10 * 1024 * 1024);
        assert_eq!(backend.retention_window, Duration::from_secs(3 * 7 * 24 * 3600));

        fs::remove_file(config_path)
            .expect("💀 Failed to remove test config. The janitor quit mid-scene.");
    }

    #[test]
    fn the_one_where_a_nameless_service_is_rejected_at_the_door() {
        let config_path = write_test_config(
            r#"
            to_console = false
            "#,
        );

        // 💀 service_name is the one non-negotiable. Anonymous logs help nobody.
        let result: Result<AppConfig, _> = Figment::new()
            .merge(Toml::file(config_path.as_path()))
            .extract();
        assert!(result.is_err());

        fs::remove_file(config_path)
            .expect("💀 Failed to remove test config. The janitor quit mid-scene.");
    }

    #[test]
    fn the_one_where_rotation_speaks_lowercase() {
        for (raw, expected) in [
            ("yearly", Rotation::Yearly),
            ("monthly", Rotation::Monthly),
            ("daily", Rotation::Daily),
        ] {
            let parsed: Rotation = serde_json::from_value(serde_json::json!(raw))
                .expect("💀 lowercase rotation names should deserialize");
            assert_eq!(parsed, expected);
        }
    }
}
