use anyhow::{anyhow, Result};

use super::AppConfig;

pub(crate) fn parse_env_bool(value: String) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub(crate) fn parse_csv_list(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(str::trim)
        .map(|value| value.trim_matches('"').trim_matches('\''))
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
        .collect()
}

pub(crate) fn validate_thresholds(config: &AppConfig) -> Result<()> {
    let classification = &config.classification;
    if !(0.0..=1.0).contains(&classification.medium_confidence)
        || !(0.0..=1.0).contains(&classification.high_confidence)
        || !(0.0..=1.0).contains(&classification.early_exit)
    {
        return Err(anyhow!(
            "classification thresholds must lie in [0, 1]: medium={} high={} early_exit={}",
            classification.medium_confidence,
            classification.high_confidence,
            classification.early_exit,
        ));
    }
    if classification.medium_confidence >= classification.high_confidence {
        return Err(anyhow!(
            "classification.medium_confidence ({}) must be below high_confidence ({})",
            classification.medium_confidence,
            classification.high_confidence,
        ));
    }

    let dedup = &config.dedup;
    if dedup.time_window_seconds <= 0.0 {
        return Err(anyhow!(
            "dedup.time_window_seconds must be positive, got {}",
            dedup.time_window_seconds
        ));
    }
    if dedup.usd_threshold < 0.0 || dedup.percentage_threshold < 0.0 {
        return Err(anyhow!(
            "dedup tolerances must be non-negative: usd={} pct={}",
            dedup.usd_threshold,
            dedup.percentage_threshold,
        ));
    }
    if dedup.safeguard_usd <= 0.0 {
        return Err(anyhow!(
            "dedup.safeguard_usd must be positive, got {}",
            dedup.safeguard_usd
        ));
    }

    Ok(())
}
