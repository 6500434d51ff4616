use anyhow::Context;
use std::path::PathBuf;
use std::str::FromStr;

use crate::vector::{Compression, Metric};

/// Environment-like source of raw settings, keyed by variable name.
pub trait Lookup {
    fn get(&self, key: &str) -> Option<String>;
}

impl<F> Lookup for F
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        self(key)
    }
}

pub struct ProcessEnv;

impl Lookup for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

pub fn resolve_usize(src: &dyn Lookup, env: &str, default: usize) -> anyhow::Result<usize> {
    resolve_parsed(src, env, default)
}

pub fn resolve_u64(src: &dyn Lookup, env: &str, default: u64) -> anyhow::Result<u64> {
    resolve_parsed(src, env, default)
}

/// Like [`resolve_usize`] but rejects zero.
pub fn resolve_positive(src: &dyn Lookup, env: &str, default: usize) -> anyhow::Result<usize> {
    let value = resolve_usize(src, env, default)?;
    if value == 0 {
        anyhow::bail!("{env} must be at least 1");
    }
    Ok(value)
}

pub fn resolve_path(src: &dyn Lookup, env: &str) -> Option<PathBuf> {
    non_empty(src, env).map(PathBuf::from)
}

pub fn resolve_metric(src: &dyn Lookup, env: &str, default: Metric) -> anyhow::Result<Metric> {
    match non_empty(src, env) {
        Some(raw) => Metric::parse(&raw).with_context(|| {
            format!("{env}=`{raw}` is not a metric (l2|inner_product|cosine)")
        }),
        None => Ok(default),
    }
}

pub fn resolve_compression(
    src: &dyn Lookup,
    env: &str,
    default: Compression,
) -> anyhow::Result<Compression> {
    match non_empty(src, env) {
        Some(raw) => Compression::parse(&raw).with_context(|| {
            format!("{env}=`{raw}` is not a compression mode (none|residual_q8)")
        }),
        None => Ok(default),
    }
}

// Helpers

fn non_empty(src: &dyn Lookup, env: &str) -> Option<String> {
    src.get(env)
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

fn resolve_parsed<T>(src: &dyn Lookup, env: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match non_empty(src, env) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("{env}=`{raw}` is not a valid number")),
        None => Ok(default),
    }
}
