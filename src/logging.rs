/// 日志上下文
///
/// 每个组件实例持有自己的上下文，通过 `target` 区分日志来源，
/// 组件内部不依赖任何全局 logger 状态。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogContext {
    /// `log` 宏使用的 target
    pub target: String,
}

impl LogContext {
    /// 创建新的日志上下文
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }

    /// 派生子上下文，例如 `shastra::extractor` -> `shastra::extractor::ocr`
    pub fn child(&self, name: &str) -> Self {
        Self::new(format!("{}::{}", self.target, name))
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Default for LogContext {
    fn default() -> Self {
        Self::new("shastra")
    }
}

/// 初始化二进制程序的日志输出
///
/// `RUST_LOG` 优先；否则按 verbosity 选择级别（0=info, 1=debug, 2+=trace）。
/// 重复调用是安全的。
pub fn init(verbosity: u8) {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_level),
    )
    .format_timestamp_secs()
    .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_context() {
        let ctx = LogContext::new("shastra::extractor");
        assert_eq!(ctx.child("ocr").target(), "shastra::extractor::ocr");
    }

    #[test]
    fn test_default_context() {
        assert_eq!(LogContext::default().target(), "shastra");
    }

    #[test]
    fn test_init_twice_is_safe() {
        init(0);
        init(2);
    }
}
