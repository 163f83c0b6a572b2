//! 渠道插件与注册表。
//!
//! 每种渠道类型（email/slack/pagerduty/webhook）提供一个 [`ChannelPlugin`]
//! 工厂；渠道行把目的地和凭据存在 `config_json` 里，投递时由注册表校验
//! 并实例化出 [`NotificationChannel`]。

use crate::error::{NotifyError, Result};
use crate::utils::redact_sensitive_json;
use crate::NotificationChannel;
use serde_json::Value;
use std::collections::HashMap;

pub trait ChannelPlugin: Send + Sync {
    /// 插件类型名，如 `"email"`、`"pagerduty"`
    fn name(&self) -> &str;

    /// 校验 JSON 配置是否符合该插件的 schema
    fn validate_config(&self, config: &Value) -> Result<()>;

    /// 由已校验的配置构造渠道实例；`instance_id` 是渠道行的数据库 ID
    fn create_channel(&self, instance_id: &str, config: &Value) -> Result<Box<dyn NotificationChannel>>;

    /// 返回脱敏后的配置副本（密码等替换为 `"***"`），用于日志和 API 响应
    fn redact_config(&self, config: &Value) -> Value {
        redact_sensitive_json(config)
    }
}

/// 按类型名索引的插件注册表。
///
/// # Examples
///
/// ```
/// use llmscope_notify::plugin::ChannelRegistry;
///
/// let registry = ChannelRegistry::default();
/// assert!(registry.has_plugin("email"));
/// assert!(registry.has_plugin("slack"));
/// assert!(registry.has_plugin("pagerduty"));
/// assert!(registry.has_plugin("webhook"));
/// assert!(!registry.has_plugin("nonexistent"));
/// ```
pub struct ChannelRegistry {
    plugins: HashMap<String, Box<dyn ChannelPlugin>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            plugins: HashMap::new(),
        }
    }

    pub fn register(&mut self, plugin: Box<dyn ChannelPlugin>) {
        self.plugins.insert(plugin.name().to_string(), plugin);
    }

    /// 校验配置并构造渠道实例，类型未注册时报 `UnknownChannelType`。
    pub fn create_channel(
        &self,
        type_name: &str,
        instance_id: &str,
        config: &Value,
    ) -> Result<Box<dyn NotificationChannel>> {
        match self.plugins.get(type_name) {
            Some(plugin) => {
                plugin.validate_config(config)?;
                plugin.create_channel(instance_id, config)
            }
            None => Err(NotifyError::UnknownChannelType(type_name.to_string())),
        }
    }

    pub fn get_plugin(&self, type_name: &str) -> Option<&dyn ChannelPlugin> {
        self.plugins.get(type_name).map(|p| p.as_ref())
    }

    pub fn has_plugin(&self, type_name: &str) -> bool {
        self.plugins.contains_key(type_name)
    }

    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(crate::channels::email::EmailPlugin));
        registry.register(Box::new(crate::channels::slack::SlackPlugin));
        registry.register(Box::new(crate::channels::pagerduty::PagerDutyPlugin));
        registry.register(Box::new(crate::channels::webhook::WebhookPlugin));
        registry
    }
}
