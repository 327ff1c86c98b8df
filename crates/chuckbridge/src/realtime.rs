//! Realtime rendering on a dedicated driver thread.
//!
//! [`Bridge::start_realtime`] moves the bridge onto a thread that renders
//! fixed-size blocks paced to the sample rate and hands them to an
//! [`AudioSink`]. While it runs, the caller only holds a [`RealtimeSession`],
//! which exposes the thread-safe [`ControlHandle`] and nothing else, so
//! compile/remove/replace/clear cannot be reached until the bridge is handed
//! back by [`RealtimeSession::stop`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};

use crate::bridge::Bridge;
use crate::control::ControlHandle;
use crate::engine::Engine;
use crate::error::{BridgeError, Result};
use crate::render::RunOptions;

/// Destination for rendered blocks.
pub trait AudioSink: Send + 'static {
    /// Consume one interleaved block of `channels` channels.
    fn write(&mut self, block: &[f32], channels: usize);
}

impl<F> AudioSink for F
where
    F: FnMut(&[f32], usize) + Send + 'static,
{
    fn write(&mut self, block: &[f32], channels: usize) {
        self(block, channels)
    }
}

/// Sink that drops every block.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl AudioSink for NullSink {
    fn write(&mut self, _block: &[f32], _channels: usize) {}
}

/// Failure to start realtime rendering. The bridge is handed back untouched.
pub struct StartRealtimeError<E: Engine> {
    pub error: BridgeError,
    pub bridge: Bridge<E>,
}

impl<E: Engine> fmt::Debug for StartRealtimeError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartRealtimeError")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<E: Engine> fmt::Display for StartRealtimeError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Could not start realtime rendering: {}", self.error)
    }
}

impl<E: Engine> std::error::Error for StartRealtimeError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl<E: Engine> Bridge<E> {
    /// Hand the bridge to a driver thread rendering `block_frames` per block.
    pub fn start_realtime<S: AudioSink>(
        self,
        mut sink: S,
        block_frames: usize,
    ) -> std::result::Result<RealtimeSession<E>, StartRealtimeError<E>> {
        let layout = match self.ready() {
            Ok(layout) => layout,
            Err(error) => return Err(StartRealtimeError { error, bridge: self }),
        };
        if block_frames == 0 {
            let error = BridgeError::InvalidArgument("block size must be at least 1 frame".into());
            return Err(StartRealtimeError {
                error,
                bridge: self,
            });
        }

        let rate = f64::from(self.sample_rate().max(1));
        let period = Duration::from_secs_f64(block_frames as f64 / rate);
        let control = self.control();
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let blocks = Arc::new(AtomicU64::new(0));
        let counter = blocks.clone();

        log::info!(
            "Starting realtime rendering: {} frames per block at {} Hz",
            block_frames,
            self.sample_rate()
        );

        let mut bridge = self;
        let thread = thread::spawn(move || {
            let started = Instant::now();
            loop {
                match bridge.run(block_frames, RunOptions::new().reuse()) {
                    Ok(block) => sink.write(&block, layout.output),
                    Err(e) => {
                        log::error!("Realtime render failed: {}", e);
                        break;
                    }
                }
                let rendered = counter.fetch_add(1, Ordering::Relaxed) + 1;
                let deadline = started + period.mul_f64(rendered as f64);
                match stop_rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }
            log::info!(
                "Realtime rendering stopped after {} blocks",
                counter.load(Ordering::Relaxed)
            );
            bridge
        });

        Ok(RealtimeSession {
            control,
            stop_tx,
            blocks,
            thread: Some(thread),
        })
    }
}

/// A bridge being driven by the realtime thread.
pub struct RealtimeSession<E: Engine> {
    control: ControlHandle<E::Messenger>,
    stop_tx: Sender<()>,
    blocks: Arc<AtomicU64>,
    thread: Option<JoinHandle<Bridge<E>>>,
}

impl<E: Engine> RealtimeSession<E> {
    /// Globals and events, usable while rendering continues.
    pub fn control(&self) -> &ControlHandle<E::Messenger> {
        &self.control
    }

    pub fn blocks_rendered(&self) -> u64 {
        self.blocks.load(Ordering::Relaxed)
    }

    /// Whether the driver thread is still rendering.
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop rendering and take the bridge back.
    pub fn stop(mut self) -> Result<Bridge<E>> {
        let _ = self.stop_tx.try_send(());
        let handle = self.thread.take().ok_or(BridgeError::DriverPanicked)?;
        handle.join().map_err(|_| BridgeError::DriverPanicked)
    }
}

impl<E: Engine> Drop for RealtimeSession<E> {
    fn drop(&mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = self.stop_tx.try_send(());
            let _ = handle.join();
        }
    }
}

impl<E: Engine> fmt::Debug for RealtimeSession<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeSession")
            .field("blocks_rendered", &self.blocks_rendered())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
