use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{GolError, GolResult};

/// Endpoints and run parameters for both processes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GolConfig {
    /// Where the worker listens for `Worker.*` calls
    pub worker_addr: String,
    /// Where the controller listens for `Controller.ReportTurn`
    pub controller_addr: String,
    pub width: usize,
    pub height: usize,
    pub turns: u32,
    pub threads: usize,
    pub poll_interval_ms: u64,
    pub images_dir: String,
    pub out_dir: String,
}

impl Default for GolConfig {
    fn default() -> Self {
        GolConfig {
            worker_addr: "127.0.0.1:8030".to_string(),
            controller_addr: "127.0.0.1:8888".to_string(),
            width: 16,
            height: 16,
            turns: 100,
            threads: 8,
            poll_interval_ms: 2000,
            images_dir: "images".to_string(),
            out_dir: "out".to_string(),
        }
    }
}

impl GolConfig {
    /// Defaults overridden by any `GOL_*` variables present in the environment.
    pub fn from_env() -> GolResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> GolResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = GolConfig::default();
        if let Some(v) = lookup("GOL_WORKER_ADDR") {
            cfg.worker_addr = v;
        }
        if let Some(v) = lookup("GOL_CONTROLLER_ADDR") {
            cfg.controller_addr = v;
        }
        if let Some(v) = lookup("GOL_IMAGES_DIR") {
            cfg.images_dir = v;
        }
        if let Some(v) = lookup("GOL_OUT_DIR") {
            cfg.out_dir = v;
        }
        parse_into(&lookup, "GOL_WIDTH", &mut cfg.width)?;
        parse_into(&lookup, "GOL_HEIGHT", &mut cfg.height)?;
        parse_into(&lookup, "GOL_TURNS", &mut cfg.turns)?;
        parse_into(&lookup, "GOL_THREADS", &mut cfg.threads)?;
        parse_into(&lookup, "GOL_POLL_INTERVAL_MS", &mut cfg.poll_interval_ms)?;
        Ok(cfg)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn parse_into<F, T>(lookup: &F, key: &str, slot: &mut T) -> GolResult<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|_| GolError::Config(format!("{} is not a valid number: {:?}", key, raw)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let cfg = GolConfig::from_lookup(|_| None).unwrap();
        assert_eq!(cfg.worker_addr, "127.0.0.1:8030");
        assert_eq!(cfg.turns, 100);
        assert_eq!(cfg.poll_interval(), Duration::from_secs(2));
        assert_eq!((cfg.width, cfg.height), (16, 16));
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = GolConfig::from_lookup(lookup_from(&[
            ("GOL_WIDTH", "64"),
            ("GOL_HEIGHT", "32"),
            ("GOL_THREADS", " 4 "),
            ("GOL_CONTROLLER_ADDR", "10.0.0.2:9000"),
        ]))
        .unwrap();
        assert_eq!((cfg.width, cfg.height), (64, 32));
        assert_eq!(cfg.threads, 4);
        assert_eq!(cfg.controller_addr, "10.0.0.2:9000");
    }

    #[test]
    fn bad_number_is_a_config_error() {
        let err = GolConfig::from_lookup(lookup_from(&[("GOL_TURNS", "many")])).unwrap_err();
        assert!(matches!(err, GolError::Config(_)));
    }
}
