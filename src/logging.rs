use cfg_if::cfg_if;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter};

/// Used when `RUST_LOG` is unset
const DEFAULT_FILTER: &str = "info,odyssey_stage=debug";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

cfg_if! {
    if #[cfg(target_arch = "wasm32")] {
        /// Install the global subscriber. Later calls are no-ops, so every stage
        /// instance on a page may call this.
        pub fn init() {
            let wasm_layer = tracing_wasm::WASMLayer::new(tracing_wasm::WASMLayerConfig::default());

            if tracing_subscriber::registry()
                .with(env_filter())
                .with(wasm_layer)
                .try_init()
                .is_err()
            {
                return;
            }

            // Panics with stacktrace
            #[cfg(feature = "console_error_panic_hook")]
            console_error_panic_hook::set_once();
        }
    } else {
        use once_cell::sync::OnceCell;
        use std::panic::PanicHookInfo;
        use std::path::{Path, PathBuf};
        use tracing_appender::non_blocking::WorkerGuard;
        use tracing::Subscriber;
        use tracing_subscriber::fmt::{self, MakeWriter};
        use tracing_subscriber::registry::LookupSpan;
        use tracing_subscriber::Layer;

        /// Log file used when `STAGE_LOG_FILE` is unset
        const DEFAULT_LOG_FILE: &str = "logs/stage.log";

        static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

        fn compact_layer<S, W>(writer: W, ansi: bool) -> impl Layer<S>
        where
            S: Subscriber + for<'a> LookupSpan<'a>,
            W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
        {
            fmt::layer()
                .with_writer(writer)
                .with_ansi(ansi)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .compact()
        }

        /// Split `STAGE_LOG_FILE` into the rolling directory and the file name prefix
        fn log_location() -> (PathBuf, PathBuf) {
            let path = PathBuf::from(std::env::var("STAGE_LOG_FILE").unwrap_or_else(|_| DEFAULT_LOG_FILE.into()));
            let directory = match path.parent() {
                Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
                _ => PathBuf::from("."),
            };
            let file_name = path.file_name().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("stage.log"));
            (directory, file_name)
        }

        fn log_panic(info: &PanicHookInfo<'_>) {
            let payload = info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| info.payload().downcast_ref::<String>().map(String::as_str))
                .unwrap_or("<non-string panic>");
            let location = info
                .location()
                .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
                .unwrap_or_else(|| "<unknown>".into());
            let backtrace = std::backtrace::Backtrace::force_capture();
            tracing::error!(%location, "panic: {payload}\nBacktrace:\n{backtrace}");
        }

        /// Install stderr and rolling-file logging. Later calls are no-ops.
        pub fn init() {
            if FILE_GUARD.get().is_some() {
                return;
            }

            let (directory, file_name) = log_location();
            let appender = tracing_appender::rolling::daily(Path::new(&directory), Path::new(&file_name));
            let (file_writer, guard) = tracing_appender::non_blocking(appender);

            let installed = tracing_subscriber::registry()
                .with(env_filter())
                .with(compact_layer(std::io::stderr, true))
                .with(compact_layer(file_writer, false))
                .try_init();
            if installed.is_err() {
                // someone else owns the global subscriber (a test harness, an embedding app)
                return;
            }
            let _ = FILE_GUARD.set(guard);
            std::panic::set_hook(Box::new(log_panic));
        }
    }
}
