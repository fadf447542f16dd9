use anyhow::{Context, Result};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// How log lines look on stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsoleStyle {
    /// Colored, no timestamps, for an interactive terminal
    #[default]
    Terminal,
    /// No colors, with timestamps, next to JSON on stdout
    Plain,
}

impl ConsoleStyle {
    pub fn for_json_output(json: bool) -> Self {
        if json { Self::Plain } else { Self::Terminal }
    }

    fn layer(self) -> BoxedLayer {
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false);
        match self {
            Self::Terminal => layer.without_time().boxed(),
            Self::Plain => layer.with_ansi(false).boxed(),
        }
    }
}

fn file_layer(path: &Path) -> Result<(BoxedLayer, WorkerGuard)> {
    let file = File::create(path).with_context(|| format!("Failed to create log file at: {:?}", path))?;
    let (writer, guard) = tracing_appender::non_blocking(file);
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .boxed();
    Ok((layer, guard))
}

/// Install the global subscriber: stderr in the given style, plus the log file
/// when one is given. The returned guard flushes the file on drop.
pub fn setup_logging(
    log_file_path: Option<PathBuf>,
    verbosity: &Verbosity<InfoLevel>,
    style: ConsoleStyle,
) -> Result<Option<WorkerGuard>> {
    let mut layers = vec![style.layer()];
    let guard = match &log_file_path {
        Some(path) => {
            let (layer, guard) = file_layer(path)?;
            layers.push(layer);
            Some(guard)
        }
        None => None,
    };

    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();

    tracing_subscriber::registry().with(layers).with(filter).init();

    if let Some(path) = log_file_path {
        info!(path = %path.display(), "logging to file");
    }
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_output_gets_plain_console() {
        assert_eq!(ConsoleStyle::for_json_output(true), ConsoleStyle::Plain);
        assert_eq!(ConsoleStyle::for_json_output(false), ConsoleStyle::Terminal);
    }

    #[test]
    fn unwritable_log_file_is_an_error() {
        let err = file_layer(Path::new("/nonexistent-dir/pwrmon.log")).err();
        assert!(err.is_some());
    }
}
