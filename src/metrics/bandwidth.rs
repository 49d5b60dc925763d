//! Скорость изменения использования полосы между двумя циклами опроса.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tracing::debug;

pub const BANDWIDTH_IN_RATE_SUFFIX: &str = "ifBandwidthInUsage.rate";
pub const BANDWIDTH_OUT_RATE_SUFFIX: &str = "ifBandwidthOutUsage.rate";

#[derive(Debug, Clone, Copy, PartialEq)]
struct Observation {
    value: f64,
    ts: f64,
}

/// Последние наблюдения по ключу `ip_interface_metric`.
///
/// Без `ttl` записи живут до конца процесса.
#[derive(Debug, Default)]
pub struct BandwidthState {
    entries: Mutex<HashMap<String, Observation>>,
    ttl: Option<Duration>,
}

impl BandwidthState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Записи, не обновлявшиеся дольше `ttl`, удаляются.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: Some(ttl),
        }
    }

    pub fn is_bandwidth_metric(name: &str) -> bool {
        name.ends_with(BANDWIDTH_IN_RATE_SUFFIX) || name.ends_with(BANDWIDTH_OUT_RATE_SUFFIX)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Возвращает скорость для нового наблюдения `value` в момент `ts` (секунды).
    ///
    /// `None` означает первое наблюдение по ключу: скорость еще не определена.
    pub fn calculate(&self, tags: &[String], name: &str, value: f64, ts: f64) -> Option<f64> {
        let key = state_key(tags, name);
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(ttl) = self.ttl {
            let deadline = ts - ttl.as_secs_f64();
            entries.retain(|_, observation| observation.ts >= deadline);
        }

        let previous = entries.insert(key.clone(), Observation { value, ts });
        rate_since(previous, &key, value, ts)
    }

    /// Как `calculate`, но не сохраняет наблюдение.
    pub fn peek(&self, tags: &[String], name: &str, value: f64, ts: f64) -> Option<f64> {
        let key = state_key(tags, name);
        let previous = self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .copied();
        rate_since(previous, &key, value, ts)
    }
}

fn rate_since(previous: Option<Observation>, key: &str, value: f64, ts: f64) -> Option<f64> {
    if value == 0.0 {
        return Some(0.0);
    }

    let previous = match previous {
        Some(p) => p,
        None => {
            debug!(key = %key, "first bandwidth observation, rate is undefined");
            return None;
        }
    };

    let elapsed = ts - previous.ts;
    if elapsed <= 0.0 {
        return Some(0.0);
    }
    Some(((value - previous.value) / elapsed).max(0.0))
}

fn state_key(tags: &[String], name: &str) -> String {
    let mut ip = "";
    let mut interface = "";
    for tag in tags {
        if let Some(v) = tag.strip_prefix("ip:") {
            ip = v;
        } else if let Some(v) = tag.strip_prefix("interface:") {
            interface = v;
        }
    }
    format!("{}_{}_{}", ip, interface, name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags() -> Vec<String> {
        vec!["ip:10.0.0.1".into(), "interface:eth0".into()]
    }

    #[test]
    fn rate_between_two_observations() {
        let state = BandwidthState::new();
        let name = "ifBandwidthInUsage.rate";
        assert_eq!(state.calculate(&tags(), name, 1000.0, 1.0), None);
        assert_eq!(state.calculate(&tags(), name, 10000.0, 5.0), Some(2250.0));
    }

    #[test]
    fn negative_rate_is_clamped() {
        let state = BandwidthState::new();
        let name = "ifBandwidthOutUsage.rate";
        state.calculate(&tags(), name, 5000.0, 1.0);
        assert_eq!(state.calculate(&tags(), name, 100.0, 2.0), Some(0.0));
    }

    #[test]
    fn zero_value_is_emitted_and_recorded() {
        let state = BandwidthState::new();
        let name = "ifBandwidthInUsage.rate";
        assert_eq!(state.calculate(&tags(), name, 0.0, 1.0), Some(0.0));
        assert_eq!(state.calculate(&tags(), name, 30.0, 4.0), Some(10.0));
    }

    #[test]
    fn keys_are_per_interface() {
        let state = BandwidthState::new();
        let name = "ifBandwidthInUsage.rate";
        state.calculate(&tags(), name, 10.0, 1.0);
        let other = vec!["ip:10.0.0.1".to_string(), "interface:eth1".to_string()];
        assert_eq!(state.calculate(&other, name, 20.0, 2.0), None);
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn stale_entries_expire_with_ttl() {
        let state = BandwidthState::with_ttl(Duration::from_secs(60));
        let name = "ifBandwidthInUsage.rate";
        state.calculate(&tags(), name, 10.0, 0.0);
        let other = vec!["ip:10.0.0.2".to_string()];
        state.calculate(&other, name, 10.0, 100.0);
        assert_eq!(state.len(), 1);
        assert_eq!(state.calculate(&tags(), name, 20.0, 110.0), None);
    }

    #[test]
    fn peek_leaves_baseline_untouched() {
        let state = BandwidthState::new();
        let name = "ifBandwidthInUsage.rate";
        assert_eq!(state.peek(&tags(), name, 1000.0, 1.0), None);
        assert!(state.is_empty());

        state.calculate(&tags(), name, 1000.0, 1.0);
        assert_eq!(state.peek(&tags(), name, 3000.0, 3.0), Some(1000.0));
        assert_eq!(state.calculate(&tags(), name, 5000.0, 5.0), Some(1000.0));
    }

    #[test]
    fn recognises_bandwidth_metric_names() {
        assert!(BandwidthState::is_bandwidth_metric("ifBandwidthInUsage.rate"));
        assert!(!BandwidthState::is_bandwidth_metric("ifBandwidthInUsage"));
    }
}
