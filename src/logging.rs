//! Structured logging setup for the binary.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Binary crate name; `main` logs under this target.
const BIN_TARGET: &str = "avatar";

/// Default filter when `RUST_LOG` is unset. Covers the library and the binary.
pub fn default_filter(verbose: bool) -> String {
    let level = if verbose { "debug" } else { "info" };
    format!("avatar_forge={level},{BIN_TARGET}={level}")
}

/// Install a stderr `fmt` subscriber filtered by `RUST_LOG`.
///
/// Calling it twice is harmless; the second call is ignored.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing::{Event, Subscriber};
    use tracing_subscriber::Layer;
    use tracing_subscriber::layer::Context;

    #[derive(Clone, Default)]
    struct Counter(Arc<AtomicUsize>);

    impl<S: Subscriber> Layer<S> for Counter {
        fn on_event(&self, _event: &Event<'_>, _ctx: Context<'_, S>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn verbose_raises_level() {
        assert_eq!(default_filter(false), "avatar_forge=info,avatar=info");
        assert_eq!(default_filter(true), "avatar_forge=debug,avatar=debug");
    }

    #[test]
    fn default_filter_lets_binary_errors_through() {
        let counter = Counter::default();
        let subscriber = tracing_subscriber::registry()
            .with(EnvFilter::new(default_filter(false)))
            .with(counter.clone());

        tracing::subscriber::with_default(subscriber, || {
            tracing::error!(target: "avatar", "run failed");
            tracing::info!(target: "avatar_forge::session", "submitted");
            tracing::debug!(target: "avatar", "hidden at info");
            tracing::error!(target: "hyper", "unrelated crate");
        });
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn init_is_idempotent() {
        init(false);
        init(true);
    }
}
