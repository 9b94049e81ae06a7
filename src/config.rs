//! `CIVI_*` environment lookups shared by the per-module configuration structs.
//!
//! Unset keys fall back to their defaults silently. Set but unparsable values
//! also fall back, with a warning naming the key.

use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Non-blank value of `key`.
pub(crate) fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: Display,
{
    parse_or_warn(key, env_opt(key).as_deref(), default)
}

pub(crate) fn env_flag(key: &str, default: bool) -> bool {
    match env_opt(key).map(|value| value.trim().to_ascii_lowercase()).as_deref() {
        None => default,
        Some("1" | "true" | "yes" | "on") => true,
        Some("0" | "false" | "no" | "off") => false,
        Some(other) => {
            log::warn!("ignoring {}='{}', expected a boolean; using {}", key, other, default);
            default
        }
    }
}

pub(crate) fn env_millis(key: &str, default_millis: u64) -> Duration {
    Duration::from_millis(env_parse(key, default_millis))
}

/// Path in `key` with a leading `~/` expanded against `$HOME`.
pub(crate) fn env_path(key: &str, default: &str) -> PathBuf {
    expand_home(env_opt(key).as_deref().unwrap_or(default))
}

fn parse_or_warn<T>(key: &str, raw: Option<&str>, default: T) -> T
where
    T: FromStr,
    T::Err: Display,
{
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse() {
        Ok(value) => value,
        Err(err) => {
            log::warn!("ignoring {}='{}': {}", key, raw, err);
            default
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), env::var("HOME")) {
        (Some(rest), Ok(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}
