use std::time::Duration;

use crate::aggregator::AggregatorConfig;

/// Tunables read once at startup.
///
/// Every numeric key falls back to its default when absent, empty or
/// unparseable, and is raised to its minimum when set too low:
///
/// - `EMBEDDING_BATCH_SIZE` (default 15, minimum 5)
/// - `MAX_JOBS_TO_INDEX` (default 25, minimum 10)
/// - `EMBEDDING_BATCH_DELAY` seconds (default 0.5, minimum 0)
/// - `RAPIDAPI_MAX_REQUESTS_PER_MINUTE` (default 3, minimum 1)
/// - `JOB_CACHE_TTL_HOURS` (default 168, minimum 1)
/// - `FALLBACK_FILL_RATIO` (default 0.5, minimum 0)
/// - `PREFER_FALLBACK_ONLY` (`true`/`1`/`yes`, default false)
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub embedding_batch_size: usize,
    pub max_jobs_to_index: usize,
    pub embedding_batch_delay: f64,
    pub max_requests_per_minute: u32,
    pub cache_ttl_hours: u32,
    pub fallback_fill_ratio: f64,
    pub prefer_fallback_only: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            embedding_batch_size: 15,
            max_jobs_to_index: 25,
            embedding_batch_delay: 0.5,
            max_requests_per_minute: 3,
            cache_ttl_hours: 168,
            fallback_fill_ratio: 0.5,
            prefer_fallback_only: false,
        }
    }
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let settings = Self {
            embedding_batch_size: coerce_positive_int(
                get("EMBEDDING_BATCH_SIZE").as_deref(),
                defaults.embedding_batch_size as u64,
                5,
            ) as usize,
            max_jobs_to_index: coerce_positive_int(
                get("MAX_JOBS_TO_INDEX").as_deref(),
                defaults.max_jobs_to_index as u64,
                10,
            ) as usize,
            embedding_batch_delay: coerce_positive_float(
                get("EMBEDDING_BATCH_DELAY").as_deref(),
                defaults.embedding_batch_delay,
                0.0,
            ),
            max_requests_per_minute: coerce_positive_int(
                get("RAPIDAPI_MAX_REQUESTS_PER_MINUTE").as_deref(),
                u64::from(defaults.max_requests_per_minute),
                1,
            )
            .min(u64::from(u32::MAX)) as u32,
            cache_ttl_hours: coerce_positive_int(
                get("JOB_CACHE_TTL_HOURS").as_deref(),
                u64::from(defaults.cache_ttl_hours),
                1,
            )
            .min(u64::from(u32::MAX)) as u32,
            fallback_fill_ratio: coerce_positive_float(
                get("FALLBACK_FILL_RATIO").as_deref(),
                defaults.fallback_fill_ratio,
                0.0,
            ),
            prefer_fallback_only: get("PREFER_FALLBACK_ONLY")
                .as_deref()
                .map_or(defaults.prefer_fallback_only, parse_flag),
        };
        tracing::debug!(?settings, "Loaded settings");
        settings
    }

    pub fn embedding_batch_delay(&self) -> Duration {
        Duration::from_secs_f64(self.embedding_batch_delay)
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            prefer_fallback_only: self.prefer_fallback_only,
            fallback_fill_ratio: self.fallback_fill_ratio,
        }
    }
}

/// Parse a whole number, raising it to `minimum`.
///
/// Missing or unparseable values (including fractions such as `"12.7"`)
/// give `default` as is. Negative values are raised to the minimum.
pub fn coerce_positive_int(value: Option<&str>, default: u64, minimum: u64) -> u64 {
    let Some(parsed) = value.and_then(|raw| raw.trim().parse::<i128>().ok()) else {
        return default;
    };
    u64::try_from(parsed.max(0)).unwrap_or(u64::MAX).max(minimum)
}

/// Float counterpart of [`coerce_positive_int`]. Non-finite values count
/// as unparseable.
pub fn coerce_positive_float(value: Option<&str>, default: f64, minimum: f64) -> f64 {
    value
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .map_or(default, |v| v.max(minimum))
}

/// `true`, `1` and `yes` (any case) are true; anything else is false.
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes"
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings_from(pairs: &[(&str, &str)]) -> Settings {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(settings_from(&[]), Settings::default());
    }

    #[test]
    fn values_are_read() {
        let settings = settings_from(&[
            ("EMBEDDING_BATCH_SIZE", "20"),
            ("MAX_JOBS_TO_INDEX", "40"),
            ("EMBEDDING_BATCH_DELAY", "1.5"),
            ("RAPIDAPI_MAX_REQUESTS_PER_MINUTE", "10"),
            ("JOB_CACHE_TTL_HOURS", "24"),
            ("FALLBACK_FILL_RATIO", "0.8"),
            ("PREFER_FALLBACK_ONLY", "Yes"),
        ]);

        assert_eq!(settings.embedding_batch_size, 20);
        assert_eq!(settings.max_jobs_to_index, 40);
        assert_eq!(settings.embedding_batch_delay(), Duration::from_millis(1500));
        assert_eq!(settings.max_requests_per_minute, 10);
        assert_eq!(settings.cache_ttl_hours, 24);
        assert!(settings.prefer_fallback_only);
        assert_eq!(
            settings.aggregator_config(),
            AggregatorConfig {
                prefer_fallback_only: true,
                fallback_fill_ratio: 0.8,
            }
        );
    }

    #[test]
    fn values_below_minimum_are_raised() {
        let settings = settings_from(&[
            ("EMBEDDING_BATCH_SIZE", "2"),
            ("MAX_JOBS_TO_INDEX", "0"),
            ("EMBEDDING_BATCH_DELAY", "-3"),
            ("RAPIDAPI_MAX_REQUESTS_PER_MINUTE", "-1"),
            ("JOB_CACHE_TTL_HOURS", "0"),
        ]);

        assert_eq!(settings.embedding_batch_size, 5);
        assert_eq!(settings.max_jobs_to_index, 10);
        assert_eq!(settings.embedding_batch_delay, 0.0);
        assert_eq!(settings.max_requests_per_minute, 1);
        assert_eq!(settings.cache_ttl_hours, 1);
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        let settings = settings_from(&[
            ("EMBEDDING_BATCH_SIZE", "lots"),
            ("EMBEDDING_BATCH_DELAY", "soon"),
            ("RAPIDAPI_MAX_REQUESTS_PER_MINUTE", "   "),
            ("PREFER_FALLBACK_ONLY", "sure"),
        ]);
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn fractions_and_missing_values_give_the_default() {
        assert_eq!(coerce_positive_int(Some("12.9"), 15, 5), 15);
        assert_eq!(coerce_positive_int(Some(" 7 "), 15, 5), 7);
        assert_eq!(coerce_positive_int(None, 3, 5), 3);
        assert_eq!(coerce_positive_int(Some("-40"), 15, 5), 5);
        assert_eq!(coerce_positive_float(None, 0.25, 0.5), 0.25);
        assert_eq!(coerce_positive_float(Some("inf"), 0.5, 0.0), 0.5);
    }

    #[test]
    fn fractional_integer_setting_falls_back() {
        let settings = settings_from(&[("EMBEDDING_BATCH_SIZE", "12.9")]);
        assert_eq!(settings.embedding_batch_size, 15);
    }

    #[test]
    fn flags() {
        assert!(parse_flag("TRUE"));
        assert!(parse_flag("1"));
        assert!(parse_flag(" yes "));
        assert!(!parse_flag("no"));
        assert!(!parse_flag("0"));
    }
}
