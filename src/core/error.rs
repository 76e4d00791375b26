//! 流水线错误类型
//!
//! 每个阶段的失败都在调用点被捕获并转为日志条目，不会向上中断同一轮中的其他平台。

use thiserror::Error;

use crate::core::state::LogLevel;

/// 流水线各阶段可能出现的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// 热点抓取失败（网络、解析）
    #[error("热点源不可用: {0}")]
    SourceUnavailable(String),

    /// 文案生成失败（缺少 API Key 或上游错误）
    #[error("文案生成不可用: {0}")]
    GenerationUnavailable(String),

    /// 发布器缺少必要凭据，未发起任何网络请求
    #[error("配置不完整: {0}")]
    ConfigIncomplete(String),

    /// Token 端点拒绝了应用凭据
    #[error("平台鉴权失败: {0}")]
    UpstreamAuthError(String),

    /// 平台拒绝了格式正确的请求
    #[error("平台返回错误: {0}")]
    UpstreamError(String),

    /// 本地没有已保存的 Cookies
    #[error("未登录，请先完成扫码登录")]
    NotAuthenticated,

    /// Cookies 已被平台拒绝（登录态标记未出现）
    #[error("登录已失效，请重新扫码登录")]
    SessionExpired,

    #[error("浏览器错误: {0}")]
    Browser(String),

    #[error("存储错误: {0}")]
    Storage(String),

    #[error("Cron 表达式无效: {0}")]
    InvalidSchedule(String),

    /// 已有一个登录窗口在等待扫码
    #[error("登录流程正在进行中")]
    AcquisitionInProgress,
}

impl PipelineError {
    /// 该错误写入运行日志时使用的级别
    pub fn level(&self) -> LogLevel {
        match self {
            PipelineError::ConfigIncomplete(_) => LogLevel::Warning,
            _ => LogLevel::Error,
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_incomplete_is_warning() {
        assert_eq!(
            PipelineError::ConfigIncomplete("wechat".into()).level(),
            LogLevel::Warning
        );
        assert_eq!(PipelineError::SessionExpired.level(), LogLevel::Error);
        assert_eq!(
            PipelineError::UpstreamError("46003".into()).level(),
            LogLevel::Error
        );
    }
}
