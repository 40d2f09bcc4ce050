//! Logging setup
//!
//! Console plus rolling file output via `tracing`. Both layers pass through a
//! redaction writer that masks credential values (`API_*` env keys and the
//! `X-Api-*` headers) before any byte reaches a sink.

use std::io::{self, Write};
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(API_APP_KEY|API_ACCESS_KEY|API_RESOURCE_ID|X-Api-App-Key|X-Api-Access-Key|X-Api-Resource-Id)\s*[:=]\s*([^\s,;]+)",
    )
    .expect("secret pattern is valid")
});

/// Replace credential values following known keys with `<REDACTED>`.
pub fn redact(text: &str) -> String {
    SECRET_PATTERN.replace_all(text, "$1=<REDACTED>").into_owned()
}

/// `Write` adapter that redacts each formatted record before forwarding it.
pub struct RedactingWriter<W> {
    inner: W,
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let text = String::from_utf8_lossy(buf);
        self.inner.write_all(redact(&text).as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// `MakeWriter` wrapper applying [`RedactingWriter`] to any underlying sink.
#[derive(Clone)]
pub struct Redacting<M>(pub M);

impl<'a, M: MakeWriter<'a>> MakeWriter<'a> for Redacting<M> {
    type Writer = RedactingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter {
            inner: self.0.make_writer(),
        }
    }
}

/// Initialize console + rolling file logging.
///
/// The returned guard must be kept alive for the duration of the process;
/// dropping it stops the background file writer.
pub fn init(log_dir: &Path) -> anyhow::Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::daily(log_dir, "voicebridge.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            std::env::var("LOG_LEVEL").map(|level| EnvFilter::new(level.to_lowercase()))
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Redacting(io::stdout))
                .compact(),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Redacting(non_blocking))
                .with_ansi(false)
                .compact(),
        )
        .try_init()
        .ok();

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_env_style() {
        let line = "loaded API_APP_KEY=abc123 and API_ACCESS_KEY=deadbeef";
        let redacted = redact(line);
        assert_eq!(
            redacted,
            "loaded API_APP_KEY=<REDACTED> and API_ACCESS_KEY=<REDACTED>"
        );
    }

    #[test]
    fn test_redact_header_style() {
        let line = "dialing with X-Api-App-Key: tenant-key, X-Api-Resource-Id: volc.service_type.10053";
        let redacted = redact(line);
        assert!(!redacted.contains("tenant-key"));
        assert!(!redacted.contains("volc.service_type.10053"));
        assert_eq!(redacted.matches("<REDACTED>").count(), 2);
    }

    #[test]
    fn test_redact_is_case_insensitive() {
        assert!(!redact("api_access_key=s3cret").contains("s3cret"));
    }

    #[test]
    fn test_redact_leaves_ordinary_text() {
        let line = "session 3 started, 12 sentences";
        assert_eq!(redact(line), line);
    }

    #[test]
    fn test_init_creates_log_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs");
        let _guard = init(&path).unwrap();
        assert!(path.is_dir());
    }

    #[test]
    fn test_redacting_writer_masks_bytes() {
        let mut sink: Vec<u8> = Vec::new();
        {
            let mut writer = RedactingWriter { inner: &mut sink };
            writer
                .write_all(b"header X-Api-Access-Key=topsecret sent")
                .unwrap();
        }
        let written = String::from_utf8(sink).unwrap();
        assert!(!written.contains("topsecret"));
        assert!(written.contains("<REDACTED>"));
    }
}
