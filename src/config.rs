use std::env;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use log::{debug, warn};

use crate::error::{Result, VdkError};

const ENV_PREFIX: &str = "VDKSTREAM_";
const CONFIG_PATHS: [&str; 2] = ["./vdkstream.toml", "./config.toml"];

/// Tunables shared by the scheduler, the demuxers and the decrypt pipeline.
///
/// Durations are seconds unless the field name ends in `_ms`.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub max_buffer_length: f64,
    pub max_max_buffer_length: f64,
    /// Bytes.
    pub max_buffer_size: f64,
    pub max_buffer_hole: f64,
    pub max_seek_hole: f64,
    pub low_buffer_watchdog_period: f64,
    pub high_buffer_watchdog_period: f64,
    pub nudge_offset: f64,
    pub nudge_max_retry: u32,
    pub max_frag_lookup_tolerance: f64,
    pub live_sync_duration_count: f64,
    pub live_max_latency_duration_count: f64,
    pub live_sync_duration: Option<f64>,
    pub live_max_latency_duration: Option<f64>,
    pub frag_loading_timeout_ms: f64,
    pub frag_loading_max_retry: u32,
    pub frag_loading_retry_delay_ms: f64,
    pub frag_loading_loop_threshold: u32,
    pub start_level: Option<usize>,
    /// Negative means "not configured".
    pub start_position: f64,
    pub start_frag_prefetch: bool,
    pub auto_start_load: bool,
    pub enable_worker: bool,
    pub enable_software_aes: bool,
    pub enable_mp2t_passthrough: bool,
    pub recovery_point_keyframes: bool,
    pub default_audio_codec: Option<String>,
    pub tick_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_buffer_length: 30.0,
            max_max_buffer_length: 600.0,
            max_buffer_size: 60.0 * 1000.0 * 1000.0,
            max_buffer_hole: 0.5,
            max_seek_hole: 2.0,
            low_buffer_watchdog_period: 0.5,
            high_buffer_watchdog_period: 3.0,
            nudge_offset: 0.1,
            nudge_max_retry: 3,
            max_frag_lookup_tolerance: 0.2,
            live_sync_duration_count: 3.0,
            live_max_latency_duration_count: f64::INFINITY,
            live_sync_duration: None,
            live_max_latency_duration: None,
            frag_loading_timeout_ms: 20000.0,
            frag_loading_max_retry: 6,
            frag_loading_retry_delay_ms: 1000.0,
            frag_loading_loop_threshold: 3,
            start_level: None,
            start_position: -1.0,
            start_frag_prefetch: false,
            auto_start_load: true,
            enable_worker: true,
            enable_software_aes: true,
            enable_mp2t_passthrough: false,
            recovery_point_keyframes: true,
            default_audio_codec: None,
            tick_interval_ms: 100,
        }
    }
}

macro_rules! config_keys {
    ($mac:ident) => {
        $mac!(
            max_buffer_length,
            max_max_buffer_length,
            max_buffer_size,
            max_buffer_hole,
            max_seek_hole,
            low_buffer_watchdog_period,
            high_buffer_watchdog_period,
            nudge_offset,
            nudge_max_retry,
            max_frag_lookup_tolerance,
            live_sync_duration_count,
            live_max_latency_duration_count,
            live_sync_duration,
            live_max_latency_duration,
            frag_loading_timeout_ms,
            frag_loading_max_retry,
            frag_loading_retry_delay_ms,
            frag_loading_loop_threshold,
            start_level,
            start_position,
            start_frag_prefetch,
            auto_start_load,
            enable_worker,
            enable_software_aes,
            enable_mp2t_passthrough,
            recovery_point_keyframes,
            default_audio_codec,
            tick_interval_ms
        )
    };
}

/// Every configuration key, in declaration order.
pub const CONFIG_KEYS: &[&str] = {
    macro_rules! names {
        ($($key:ident),*) => { &[$(stringify!($key)),*] };
    }
    config_keys!(names)
};

/// Conversion between a config field and its `key = value` text form.
trait ConfigValue: Sized {
    fn parse_value(raw: &str) -> Option<Self>;
    fn format_value(&self) -> String;
}

impl ConfigValue for f64 {
    fn parse_value(raw: &str) -> Option<Self> {
        match raw {
            "inf" | "infinity" => Some(f64::INFINITY),
            _ => raw.parse().ok(),
        }
    }

    fn format_value(&self) -> String {
        if self.is_infinite() {
            "inf".to_string()
        } else {
            self.to_string()
        }
    }
}

impl ConfigValue for u32 {
    fn parse_value(raw: &str) -> Option<Self> {
        raw.parse().ok()
    }

    fn format_value(&self) -> String {
        self.to_string()
    }
}

impl ConfigValue for u64 {
    fn parse_value(raw: &str) -> Option<Self> {
        raw.parse().ok()
    }

    fn format_value(&self) -> String {
        self.to_string()
    }
}

impl ConfigValue for usize {
    fn parse_value(raw: &str) -> Option<Self> {
        raw.parse().ok()
    }

    fn format_value(&self) -> String {
        self.to_string()
    }
}

impl ConfigValue for bool {
    fn parse_value(raw: &str) -> Option<Self> {
        match raw {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        }
    }

    fn format_value(&self) -> String {
        self.to_string()
    }
}

impl ConfigValue for String {
    fn parse_value(raw: &str) -> Option<Self> {
        Some(raw.to_string())
    }

    fn format_value(&self) -> String {
        format!("\"{}\"", self)
    }
}

impl<T: ConfigValue> ConfigValue for Option<T> {
    fn parse_value(raw: &str) -> Option<Self> {
        if raw.is_empty() || raw == "none" {
            return Some(None);
        }
        T::parse_value(raw).map(Some)
    }

    fn format_value(&self) -> String {
        match self {
            Some(value) => value.format_value(),
            None => "none".to_string(),
        }
    }
}

impl Config {
    /// Builds the configuration from defaults, environment variables and the
    /// first config file found in the working directory.
    ///
    /// Environment variables are named `VDKSTREAM_<KEY>` (upper case). File
    /// values override environment values.
    pub fn load() -> Self {
        let mut config = Config::default();

        for key in CONFIG_KEYS {
            let var = format!("{}{}", ENV_PREFIX, key.to_uppercase());
            if let Ok(value) = env::var(&var) {
                if let Err(e) = config.set(key, &value) {
                    warn!("ignoring {}: {}", var, e);
                }
            }
        }

        for path in &CONFIG_PATHS {
            if let Ok(mut file) = File::open(path) {
                let mut content = String::new();
                if file.read_to_string(&mut content).is_ok() {
                    config.apply_str(&content);
                    debug!("loaded configuration from {}", path);
                    break;
                }
            }
        }

        config
    }

    /// Parses `key = value` lines on top of the defaults.
    pub fn from_config_str(content: &str) -> Self {
        let mut config = Config::default();
        config.apply_str(content);
        config
    }

    /// Serializes every key as a `key = value` line, readable by
    /// [`Config::from_config_str`].
    pub fn to_config_string(&self) -> String {
        macro_rules! lines {
            ($($key:ident),*) => {{
                let mut out = String::new();
                $(
                    out.push_str(stringify!($key));
                    out.push_str(" = ");
                    out.push_str(&ConfigValue::format_value(&self.$key));
                    out.push('\n');
                )*
                out
            }};
        }
        config_keys!(lines)
    }

    /// Sets one field from its text form.
    pub fn set(&mut self, key: &str, raw: &str) -> Result<()> {
        let raw = raw.trim().trim_matches('"').trim_matches('\'');
        macro_rules! assign {
            ($($field:ident),*) => {
                match key {
                    $(
                        stringify!($field) => {
                            self.$field = ConfigValue::parse_value(raw).ok_or_else(|| {
                                VdkError::Config(format!("invalid value {:?} for {}", raw, key))
                            })?;
                            Ok(())
                        }
                    )*
                    _ => Err(VdkError::Config(format!("unknown key {}", key))),
                }
            };
        }
        config_keys!(assign)
    }

    fn apply_str(&mut self, content: &str) {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            if !CONFIG_KEYS.contains(&key) {
                debug!("skipping unknown config key {}", key);
                continue;
            }
            if let Err(e) = self.set(key, value) {
                warn!("{}", e);
            }
        }
    }
}

/// Annotated `key = value` listing of every key at its default value.
pub const CONFIG_TEMPLATE: &str = include_str!("config.template.toml");

/// Writes [`CONFIG_TEMPLATE`] to `path` unless the file already exists.
pub fn create_default_config_template<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    if !path.as_ref().exists() {
        std::fs::write(path, CONFIG_TEMPLATE)?;
    }
    Ok(())
}
