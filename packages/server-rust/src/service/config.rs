use std::str::FromStr;

/// Configuration for the dispatch bus, its background worker, and the
/// notification handlers.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Panic instead of returning `HandlerNotFound` when an operation type has
    /// no handler. Turn on in development to make wiring bugs impossible to miss.
    pub strict_handlers: bool,
    /// Capacity of the background worker's task queue.
    pub worker_queue_capacity: usize,
    /// Interval between worker tick callbacks in milliseconds.
    pub worker_tick_interval_ms: u64,
    /// Days a read notification stays in the active list after its last update.
    pub notification_window_days: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            strict_handlers: false,
            worker_queue_capacity: 256,
            worker_tick_interval_ms: 60_000,
            notification_window_days: 30,
        }
    }
}

impl BusConfig {
    /// Defaults overlaid with `TENANTBUS_*` environment variables.
    ///
    /// Unparseable values are ignored with a warning.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        overlay(&lookup, "TENANTBUS_STRICT_HANDLERS", &mut config.strict_handlers);
        overlay(
            &lookup,
            "TENANTBUS_WORKER_QUEUE_CAPACITY",
            &mut config.worker_queue_capacity,
        );
        overlay(
            &lookup,
            "TENANTBUS_WORKER_TICK_INTERVAL_MS",
            &mut config.worker_tick_interval_ms,
        );
        overlay(
            &lookup,
            "TENANTBUS_NOTIFICATION_WINDOW_DAYS",
            &mut config.notification_window_days,
        );
        config
    }
}

fn overlay<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = raw.as_str(), "ignoring unparseable setting"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults() {
        let config = BusConfig::default();
        assert!(!config.strict_handlers);
        assert_eq!(config.worker_queue_capacity, 256);
        assert_eq!(config.notification_window_days, 30);
    }

    #[test]
    fn overlay_parses_and_skips_garbage() {
        let vars: HashMap<&str, &str> = [
            ("TENANTBUS_STRICT_HANDLERS", "true"),
            ("TENANTBUS_WORKER_QUEUE_CAPACITY", "not-a-number"),
            ("TENANTBUS_NOTIFICATION_WINDOW_DAYS", " 7 "),
        ]
        .into_iter()
        .collect();
        let config = BusConfig::from_lookup(|k| vars.get(k).map(ToString::to_string));
        assert!(config.strict_handlers);
        assert_eq!(config.worker_queue_capacity, 256);
        assert_eq!(config.notification_window_days, 7);
    }
}
