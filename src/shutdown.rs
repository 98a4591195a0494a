//! External interrupt handling
//!
//! Signal handlers are registered eagerly by [`ShutdownListener::install`], so a
//! signal that lands while agents are still being launched is buffered and
//! observed at the next check instead of killing the harness outright.

use futures::Stream;
use tracing::info;

use crate::error::Result;

/// Which external signal ended the wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT / Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "interrupt"),
            ShutdownSignal::Terminate => write!(f, "terminate"),
        }
    }
}

/// OS signal streams for SIGINT and SIGTERM
pub struct ShutdownListener {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl ShutdownListener {
    /// Register handlers now; must be called inside a tokio runtime
    pub fn install() -> Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            Ok(Self {
                interrupt: signal(SignalKind::interrupt())?,
                terminate: signal(SignalKind::terminate())?,
            })
        }

        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    /// Wait for the next SIGINT or SIGTERM
    pub async fn recv(&mut self) -> ShutdownSignal {
        #[cfg(unix)]
        {
            let signal = tokio::select! {
                _ = self.interrupt.recv() => ShutdownSignal::Interrupt,
                _ = self.terminate.recv() => ShutdownSignal::Terminate,
            };
            info!("Received {}", signal);
            signal
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received Ctrl+C");
            ShutdownSignal::Interrupt
        }
    }

    /// Every signal from now on, in arrival order.
    ///
    /// The first one ends the run's wait; later ones arrive during teardown.
    pub fn into_stream(self) -> impl Stream<Item = ShutdownSignal> {
        futures::stream::unfold(self, |mut listener| async move {
            let signal = listener.recv().await;
            Some((signal, listener))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_signal_display() {
        assert_eq!(ShutdownSignal::Interrupt.to_string(), "interrupt");
        assert_eq!(ShutdownSignal::Terminate.to_string(), "terminate");
    }

    #[tokio::test]
    async fn test_install_inside_runtime() {
        assert!(ShutdownListener::install().is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stream_yields_repeated_signals() {
        use futures::StreamExt;
        use nix::sys::signal::{raise, Signal};
        use std::time::Duration;

        let signals = ShutdownListener::install().unwrap().into_stream();
        tokio::pin!(signals);

        for _ in 0..2 {
            raise(Signal::SIGINT).unwrap();
            let signal = tokio::time::timeout(Duration::from_secs(5), signals.next())
                .await
                .unwrap();
            assert_eq!(signal, Some(ShutdownSignal::Interrupt));
        }
    }
}
