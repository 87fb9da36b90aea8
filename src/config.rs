// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : splitledger — async group-expense ledger & debt settlement engine
Module  : config.rs
Version : 0.1.0
Author  : Kukuh Tripamungkas Wicaksono (Kukuh TW)
Email   : kukuhtw@gmail.com
WhatsApp: https://wa.me/628129893706
LinkedIn: https://id.linkedin.com/in/kukuhtw
License : MIT (see LICENSE)

Summary : Keeps shared-expense ledgers per group, nets member balances,
          simplifies debts into a minimal list of payments, caches plans
          with safe degradation, verifies payment callbacks, exposes
          Prometheus metrics, and journals ledger events as JSONL.

(c) 2025 Kukuh TW. All rights reserved where applicable.
=============================================================================
*/
use std::env;
use std::time::Duration;

use clap::Parser;
use dotenvy::dotenv;

use crate::cache::CacheCfg;
use crate::money::{parse_amount, Amount, SETTLE_EPSILON};
use crate::simplify::SimplifyCfg;

/// Backend behind the balance cache
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheMode {
    Memory,
    Off,
}

impl CacheMode {
    pub fn parse_one(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" | "on" => Some(CacheMode::Memory),
            "off" | "none" | "null" => Some(CacheMode::Off),
            _ => None,
        }
    }

    pub fn from_env(key: &str, default_mode: CacheMode) -> CacheMode {
        env::var(key).ok().and_then(|s| Self::parse_one(&s)).unwrap_or(default_mode)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheMode::Memory => "memory",
            CacheMode::Off => "off",
        }
    }
}

/// CLI flags; each one overrides the matching ENV key.
#[derive(Parser, Debug, Default, Clone)]
#[command(name = "splitledger", version, about = "Group expense ledger & settlement engine")]
pub struct Cli {
    /// METRICS_PORT
    #[arg(long)]
    pub metrics_port: Option<u16>,
    /// HTTP_PORT
    #[arg(long)]
    pub http_port: Option<u16>,
    /// RECORD_FILE
    #[arg(long)]
    pub record_file: Option<String>,
    /// Skip replaying RECORD_FILE at startup
    #[arg(long)]
    pub no_replay: bool,
    /// CACHE_MODE (memory|off)
    #[arg(long)]
    pub cache_mode: Option<String>,
    /// CACHE_TTL_SECS
    #[arg(long)]
    pub cache_ttl_secs: Option<u64>,
    /// SETTLE_EPSILON
    #[arg(long)]
    pub epsilon: Option<String>,
    /// Disable the mock mutation feed
    #[arg(long)]
    pub no_mock: bool,
}

#[derive(Clone, Debug)]
pub struct MockCfg {
    pub enabled: bool,
    pub groups: usize,
    pub members: usize,
    pub interval: Duration,
}

#[derive(Clone, Debug)]
pub struct Args {
    // servers
    pub metrics_port: u16,
    pub http_port: u16,

    // journal
    pub record_file: Option<String>,
    pub replay_on_start: bool,

    // cache
    pub cache_mode: CacheMode,
    pub cache: CacheCfg,
    pub cache_sweep: Duration,

    // engine
    pub simplify: SimplifyCfg,

    // payment callbacks
    pub payment_secret: Option<String>,

    pub mock: MockCfg,
}

pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key).ok().and_then(|s| parse_bool(&s)).unwrap_or(default)
}

/// Only strictly positive tolerances are accepted.
fn epsilon_from(s: Option<&str>) -> Option<Amount> {
    s.and_then(parse_amount).filter(|e| *e > Amount::ZERO)
}

pub fn load() -> Args {
    // .env first so RECORD_FILE, PAYMENT_SECRET, etc. are visible
    let _ = dotenv();
    resolve(Cli::parse())
}

/// ENV (with defaults) overlaid by CLI flags.
pub fn resolve(cli: Cli) -> Args {
    // ===== Servers =====
    let metrics_port = cli.metrics_port.unwrap_or_else(|| env_parse("METRICS_PORT", 9898));
    let http_port = cli.http_port.unwrap_or_else(|| env_parse("HTTP_PORT", 8080));

    // ===== Journal =====
    let record_file = cli
        .record_file
        .or_else(|| env::var("RECORD_FILE").ok())
        .filter(|p| !p.trim().is_empty());
    let replay_on_start = !cli.no_replay && record_file.is_some() && env_bool("REPLAY_ON_START", true);

    // ===== Cache =====
    let cache_mode = cli
        .cache_mode
        .as_deref()
        .and_then(CacheMode::parse_one)
        .unwrap_or_else(|| CacheMode::from_env("CACHE_MODE", CacheMode::Memory));
    let defaults = CacheCfg::default();
    let cache = CacheCfg {
        ttl: Duration::from_secs(
            cli.cache_ttl_secs
                .unwrap_or_else(|| env_parse("CACHE_TTL_SECS", defaults.ttl.as_secs())),
        ),
        op_timeout: Duration::from_millis(env_parse(
            "CACHE_OP_TIMEOUT_MS",
            defaults.op_timeout.as_millis() as u64,
        )),
    };
    let cache_sweep = Duration::from_secs(env_parse("CACHE_SWEEP_SECS", 30u64).max(1));

    // ===== Engine =====
    let epsilon = epsilon_from(cli.epsilon.as_deref())
        .or_else(|| epsilon_from(env::var("SETTLE_EPSILON").ok().as_deref()))
        .unwrap_or(SETTLE_EPSILON);

    // ===== Payment =====
    let payment_secret = env::var("PAYMENT_SECRET").ok().filter(|s| !s.is_empty());

    // ===== Mock feed =====
    // MOCK_FEED=false disables it; MOCK_GROUPS / MOCK_MEMBERS size the demo
    let mock = MockCfg {
        enabled: !cli.no_mock && env_bool("MOCK_FEED", true),
        groups: env_parse("MOCK_GROUPS", 2usize),
        members: env_parse("MOCK_MEMBERS", 4usize).max(2),
        interval: Duration::from_millis(env_parse("MOCK_INTERVAL_MS", 500u64).max(1)),
    };

    Args {
        metrics_port,
        http_port,
        record_file,
        replay_on_start,
        cache_mode,
        cache,
        cache_sweep,
        simplify: SimplifyCfg::new(epsilon).unwrap_or_default(),
        payment_secret,
        mock,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn cache_mode_parses_aliases() {
        assert_eq!(CacheMode::parse_one(" Memory "), Some(CacheMode::Memory));
        assert_eq!(CacheMode::parse_one("off"), Some(CacheMode::Off));
        assert_eq!(CacheMode::parse_one("redis"), None);
        assert_eq!(CacheMode::Off.as_str(), "off");
    }

    #[test]
    fn bool_values() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn epsilon_must_be_positive() {
        assert_eq!(epsilon_from(Some("0.05")), Some(dec!(0.05)));
        assert_eq!(epsilon_from(Some("0")), None);
        assert_eq!(epsilon_from(Some("-1")), None);
        assert_eq!(epsilon_from(None), None);
    }

    #[test]
    fn cli_flags_override() {
        let cli = Cli::try_parse_from([
            "splitledger",
            "--http-port",
            "18080",
            "--metrics-port",
            "19898",
            "--cache-mode",
            "off",
            "--cache-ttl-secs",
            "7",
            "--epsilon",
            "0.5",
            "--no-mock",
        ])
        .unwrap();
        let args = resolve(cli);
        assert_eq!(args.http_port, 18080);
        assert_eq!(args.metrics_port, 19898);
        assert_eq!(args.cache_mode, CacheMode::Off);
        assert_eq!(args.cache.ttl, Duration::from_secs(7));
        assert_eq!(args.simplify.epsilon(), dec!(0.5));
        assert!(!args.mock.enabled);
    }
}
