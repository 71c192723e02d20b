//! Layered configuration.
//!
//! Every option is optional. A device-level value wins, else the
//! manager-level value, else a hard default (disabled for filters, `false`
//! for switches). `DeviceConfig::merge` does the layering once so nothing
//! downstream has to.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::policy::{
    DefaultReconnectPersistFilter, DefaultReconnectRequestFilter, DefaultTimeoutRequestFilter,
    ReconnectPersistFilter, ReconnectRequestFilter, TimeoutRequestEvent, TimeoutRequestFilter,
};

/// Heartbeat of the update loop when nothing else is configured.
pub const DEFAULT_UPDATE_RATE: Duration = Duration::from_millis(20);

#[derive(Clone, Default)]
pub struct DeviceConfig {
    pub timeout_filter: Option<Arc<dyn TimeoutRequestFilter>>,
    pub reconnect_request_short_term: Option<Arc<dyn ReconnectRequestFilter>>,
    pub reconnect_request_long_term: Option<Arc<dyn ReconnectRequestFilter>>,
    pub reconnect_persist_short_term: Option<Arc<dyn ReconnectPersistFilter>>,
    pub reconnect_persist_long_term: Option<Arc<dyn ReconnectPersistFilter>>,
    /// Enable configured notifications once authentication is done.
    pub auto_enable_notifications: Option<bool>,
    /// Save the last disconnect's intent so it survives restarts.
    pub manage_last_disconnect_on_disk: Option<bool>,
}

impl DeviceConfig {
    /// Every option filled with the stock behavior.
    pub fn defaults() -> Self {
        Self {
            timeout_filter: Some(Arc::new(DefaultTimeoutRequestFilter::default())),
            reconnect_request_short_term: Some(Arc::new(DefaultReconnectRequestFilter::short_term())),
            reconnect_request_long_term: Some(Arc::new(DefaultReconnectRequestFilter::long_term())),
            reconnect_persist_short_term: Some(Arc::new(DefaultReconnectPersistFilter::short_term())),
            reconnect_persist_long_term: Some(Arc::new(DefaultReconnectPersistFilter::long_term())),
            auto_enable_notifications: Some(true),
            manage_last_disconnect_on_disk: Some(true),
        }
    }

    /// Every option unset, so everything is inherited.
    pub fn nulled() -> Self {
        Self::default()
    }

    pub fn merge(device: &DeviceConfig, manager: &DeviceConfig) -> ResolvedConfig {
        ResolvedConfig {
            timeout_filter: device.timeout_filter.clone().or_else(|| manager.timeout_filter.clone()),
            reconnect_request_short_term: device
                .reconnect_request_short_term
                .clone()
                .or_else(|| manager.reconnect_request_short_term.clone()),
            reconnect_request_long_term: device
                .reconnect_request_long_term
                .clone()
                .or_else(|| manager.reconnect_request_long_term.clone()),
            reconnect_persist_short_term: device
                .reconnect_persist_short_term
                .clone()
                .or_else(|| manager.reconnect_persist_short_term.clone()),
            reconnect_persist_long_term: device
                .reconnect_persist_long_term
                .clone()
                .or_else(|| manager.reconnect_persist_long_term.clone()),
            auto_enable_notifications: device
                .auto_enable_notifications
                .or(manager.auto_enable_notifications)
                .unwrap_or(false),
            manage_last_disconnect_on_disk: device
                .manage_last_disconnect_on_disk
                .or(manager.manage_last_disconnect_on_disk)
                .unwrap_or(false),
        }
    }
}

impl fmt::Debug for DeviceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceConfig")
            .field("timeout_filter", &self.timeout_filter.is_some())
            .field("reconnect_request_short_term", &self.reconnect_request_short_term.is_some())
            .field("reconnect_request_long_term", &self.reconnect_request_long_term.is_some())
            .field("reconnect_persist_short_term", &self.reconnect_persist_short_term.is_some())
            .field("reconnect_persist_long_term", &self.reconnect_persist_long_term.is_some())
            .field("auto_enable_notifications", &self.auto_enable_notifications)
            .field("manage_last_disconnect_on_disk", &self.manage_last_disconnect_on_disk)
            .finish()
    }
}

/// Result of [`DeviceConfig::merge`]. A `None` filter means "disabled".
#[derive(Clone, Default)]
pub struct ResolvedConfig {
    pub timeout_filter: Option<Arc<dyn TimeoutRequestFilter>>,
    pub reconnect_request_short_term: Option<Arc<dyn ReconnectRequestFilter>>,
    pub reconnect_request_long_term: Option<Arc<dyn ReconnectRequestFilter>>,
    pub reconnect_persist_short_term: Option<Arc<dyn ReconnectPersistFilter>>,
    pub reconnect_persist_long_term: Option<Arc<dyn ReconnectPersistFilter>>,
    pub auto_enable_notifications: bool,
    pub manage_last_disconnect_on_disk: bool,
}

impl ResolvedConfig {
    /// `None` when no filter is configured or the filter disables the timeout.
    pub fn timeout_for(&self, event: &TimeoutRequestEvent) -> Option<Duration> {
        self.timeout_filter
            .as_ref()
            .and_then(|filter| filter.on_event(event).timeout())
    }
}

/// Timeout lookup for a task: device filter, else manager filter, else none.
pub fn resolve_timeout(
    event: &TimeoutRequestEvent,
    device: Option<&DeviceConfig>,
    manager: &DeviceConfig,
) -> Option<Duration> {
    let filter = device
        .and_then(|d| d.timeout_filter.as_ref())
        .or(manager.timeout_filter.as_ref())?;
    filter.on_event(event).timeout()
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Fallback for every device.
    pub device: DeviceConfig,
    pub update_rate: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::defaults(),
            update_rate: DEFAULT_UPDATE_RATE,
        }
    }
}

/// Serializable subset of [`ManagerConfig`].
///
/// Filters cannot be serialized, so the file only tunes the stock ones.
/// Absent fields keep the stock value. A `task_timeout_ms` of `0` disables
/// task timeouts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub update_rate_ms: Option<u64>,
    pub auto_enable_notifications: Option<bool>,
    pub manage_last_disconnect_on_disk: Option<bool>,
    pub short_term_reconnect_rate_ms: Option<u64>,
    pub long_term_reconnect_rate_ms: Option<u64>,
    pub short_term_timeout_ms: Option<u64>,
    pub task_timeout_ms: Option<u64>,
}

impl ConfigFile {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn into_manager_config(self) -> ManagerConfig {
        let mut config = ManagerConfig::default();
        let device = &mut config.device;

        if let Some(ms) = self.update_rate_ms {
            config.update_rate = Duration::from_millis(ms);
        }
        if self.auto_enable_notifications.is_some() {
            device.auto_enable_notifications = self.auto_enable_notifications;
        }
        if self.manage_last_disconnect_on_disk.is_some() {
            device.manage_last_disconnect_on_disk = self.manage_last_disconnect_on_disk;
        }
        if let Some(ms) = self.short_term_reconnect_rate_ms {
            device.reconnect_request_short_term = Some(Arc::new(
                DefaultReconnectRequestFilter::new(Duration::from_millis(ms)),
            ));
        }
        if let Some(ms) = self.long_term_reconnect_rate_ms {
            device.reconnect_request_long_term = Some(Arc::new(
                DefaultReconnectRequestFilter::new(Duration::from_millis(ms)),
            ));
        }
        if let Some(ms) = self.short_term_timeout_ms {
            device.reconnect_persist_short_term = Some(Arc::new(
                DefaultReconnectPersistFilter::new(Some(Duration::from_millis(ms))),
            ));
        }
        match self.task_timeout_ms {
            Some(0) => device.timeout_filter = None,
            Some(ms) => {
                device.timeout_filter = Some(Arc::new(DefaultTimeoutRequestFilter::new(
                    Duration::from_millis(ms),
                )));
            }
            None => {}
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EntityId, ManagerId, TaskKind};
    use crate::policy::{TimeoutPlease, TimeoutRequestFilter};

    struct Fixed(TimeoutPlease);

    impl TimeoutRequestFilter for Fixed {
        fn on_event(&self, _event: &TimeoutRequestEvent) -> TimeoutPlease {
            self.0
        }
    }

    fn event() -> TimeoutRequestEvent {
        TimeoutRequestEvent::new(ManagerId::generate(), Some(EntityId::generate()), TaskKind::Read)
    }

    #[test]
    fn device_value_wins() {
        let mut device = DeviceConfig::nulled();
        device.auto_enable_notifications = Some(false);
        let resolved = DeviceConfig::merge(&device, &DeviceConfig::defaults());
        assert!(!resolved.auto_enable_notifications);
        assert!(resolved.manage_last_disconnect_on_disk);
    }

    #[test]
    fn nothing_set_anywhere_is_disabled() {
        let resolved = DeviceConfig::merge(&DeviceConfig::nulled(), &DeviceConfig::nulled());
        assert!(resolved.timeout_filter.is_none());
        assert!(resolved.reconnect_request_short_term.is_none());
        assert!(!resolved.auto_enable_notifications);
        assert_eq!(resolved.timeout_for(&event()), None);
    }

    #[test]
    fn timeout_lookup_order() {
        let manager = DeviceConfig::defaults();
        assert_eq!(
            resolve_timeout(&event(), None, &manager),
            Some(Duration::from_millis(12_500))
        );

        let mut device = DeviceConfig::nulled();
        device.timeout_filter = Some(Arc::new(Fixed(TimeoutPlease::SetTimeoutFor(
            Duration::from_secs(2),
        ))));
        assert_eq!(
            resolve_timeout(&event(), Some(&device), &manager),
            Some(Duration::from_secs(2))
        );

        device.timeout_filter = Some(Arc::new(Fixed(TimeoutPlease::DoNotUseTimeout)));
        assert_eq!(resolve_timeout(&event(), Some(&device), &manager), None);
        assert_eq!(resolve_timeout(&event(), None, &DeviceConfig::nulled()), None);
    }

    #[test]
    fn config_file_tunes_stock_filters() {
        let file = ConfigFile::from_json(
            r#"{ "update_rate_ms": 50, "task_timeout_ms": 3000, "auto_enable_notifications": false }"#,
        )
        .unwrap();
        let config = file.into_manager_config();

        assert_eq!(config.update_rate, Duration::from_millis(50));
        let resolved = DeviceConfig::merge(&DeviceConfig::nulled(), &config.device);
        assert_eq!(resolved.timeout_for(&event()), Some(Duration::from_secs(3)));
        assert!(!resolved.auto_enable_notifications);
        assert!(resolved.reconnect_request_long_term.is_some());
    }

    #[test]
    fn zero_task_timeout_disables_timeouts() {
        let config = ConfigFile {
            task_timeout_ms: Some(0),
            ..ConfigFile::default()
        }
        .into_manager_config();
        assert!(config.device.timeout_filter.is_none());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(ConfigFile::from_json(r#"{ "bogus": 1 }"#).is_err());
    }
}
