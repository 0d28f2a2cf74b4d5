//! 可观测性：tracing 订阅器初始化
//!
//! 日志一律写 stderr：对话进程的 stdout 留给 REPL，工具服务进程的 stdout 承载协议。

use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LogFormat;

fn env_filter() -> EnvFilter {
    // 默认 info，可通过 RUST_LOG 覆盖
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn build_subscriber<W>(format: LogFormat, writer: W, filter: EnvFilter) -> Box<dyn Subscriber + Send + Sync>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => Box::new(registry.with(fmt::layer().with_writer(writer))),
        LogFormat::Json => Box::new(registry.with(fmt::layer().json().with_writer(writer))),
    }
}

/// 对话进程：格式由 [app].log_format 决定
pub fn init(format: LogFormat) {
    if let Err(e) = build_subscriber(format, std::io::stderr, env_filter()).try_init() {
        eprintln!("tracing already initialized: {e}");
    }
}

/// 工具服务进程
pub fn init_stderr() {
    let _ = tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(std::io::stderr).with_ansi(false))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_logs_go_to_configured_writer() {
        let buf = SharedBuf(Arc::new(Mutex::new(Vec::new())));
        let sink = buf.clone();
        let subscriber = build_subscriber(LogFormat::Json, move || sink.clone(), EnvFilter::new("info"));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(thread_id = "t1", "turn started");
            tracing::debug!("filtered out");
        });

        let out = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let line: serde_json::Value = serde_json::from_str(out.trim()).unwrap();
        assert_eq!(line["fields"]["message"], "turn started");
        assert_eq!(line["fields"]["thread_id"], "t1");
    }
}
