//! 日志初始化
//!
//! 基于 `tracing-subscriber` 安装全局日志订阅者，`RUST_LOG` 优先于配置中的级别。

use crate::config::{LogFormat, LoggingConfig};
use anyhow::{Context, Result};
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// 构建日志过滤器
///
/// 优先级：`RUST_LOG` > 命令行级别 > 配置文件级别。
pub fn build_filter(config: &LoggingConfig, override_level: Option<&str>) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let level = override_level.unwrap_or(&config.level);
    EnvFilter::try_new(level).with_context(|| format!("Invalid log level: {}", level))
}

/// 按配置构建日志订阅者，输出写入 `make_writer`
///
/// `json` 格式每个事件输出一行JSON对象，供采集端按行解析。
pub fn build_subscriber<W>(
    config: &LoggingConfig,
    override_level: Option<&str>,
    make_writer: W,
) -> Result<Box<dyn Subscriber + Send + Sync>>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = build_filter(config, override_level)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer);

    let subscriber: Box<dyn Subscriber + Send + Sync> = match config.format {
        LogFormat::Pretty => Box::new(builder.pretty().finish()),
        LogFormat::Json => Box::new(builder.json().with_ansi(false).finish()),
    };
    Ok(subscriber)
}

/// 初始化全局日志，只能调用一次
pub fn init_logging(config: &LoggingConfig, override_level: Option<&str>) -> Result<()> {
    build_subscriber(config, override_level, std::io::stdout)?
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialise logging: {}", e))?;

    tracing::debug!("Logging initialised with format {:?}", config.format);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    /// 收集日志输出的内存写入端
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn capture(format: LogFormat) -> String {
        let config = LoggingConfig {
            level: "info".to_string(),
            format,
        };
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = build_subscriber(&config, None, move || writer.clone()).unwrap();

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(department = "ent", "Published view");
            tracing::debug!("filtered out");
        });
        captured.text()
    }

    #[test]
    fn test_json_format_emits_one_object_per_event() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let output = capture(LogFormat::Json);
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 1);

        let event: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(event["level"], "INFO");
        assert_eq!(event["fields"]["message"], "Published view");
        assert_eq!(event["fields"]["department"], "ent");
    }

    #[test]
    fn test_pretty_format_is_not_json() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let output = capture(LogFormat::Pretty);
        assert!(output.contains("Published view"));
        assert!(serde_json::from_str::<serde_json::Value>(output.lines().next().unwrap()).is_err());
    }

    #[test]
    fn test_override_level_wins_over_config() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = LoggingConfig::default();
        let filter = build_filter(&config, Some("queue_workflow=trace")).unwrap();
        assert!(filter.to_string().contains("queue_workflow=trace"));
    }

    #[test]
    fn test_invalid_level_is_rejected() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = LoggingConfig {
            level: "queue=[".to_string(),
            ..Default::default()
        };
        assert!(build_filter(&config, None).is_err());
    }
}
