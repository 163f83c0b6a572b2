/// 通知子系统错误类型。
///
/// # Examples
///
/// ```rust
/// use llmscope_notify::error::NotifyError;
///
/// let err = NotifyError::InvalidConfig("missing smtp_host".to_string());
/// assert!(err.to_string().contains("smtp_host"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// 渠道配置缺少必填字段或取值非法
    #[error("Notify: invalid channel configuration: {0}")]
    InvalidConfig(String),

    /// 插件注册表中没有该渠道类型
    #[error("Notify: unknown channel type '{0}'")]
    UnknownChannelType(String),

    /// 对外部通知端点的 HTTP 请求失败
    #[error("Notify: HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// SMTP 传输层错误
    #[error("Notify: SMTP error: {0}")]
    Smtp(String),

    /// JSON 编解码失败（如 config_json 解析）
    #[error("Notify: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// 投递队列已满，任务被拒绝
    #[error("Notify: delivery queue is full")]
    QueueFull,

    /// 投递 worker 已停机，不再接收任务
    #[error("Notify: delivery queue is closed")]
    QueueClosed,

    /// 其余未归类错误
    #[error("Notify: {0}")]
    Other(String),
}

/// Convenience `Result` alias for notification operations.
pub type Result<T> = std::result::Result<T, NotifyError>;
