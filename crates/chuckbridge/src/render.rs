//! Block rendering and buffer ownership.
//!
//! Every render call picks its output buffer by priority:
//!
//! 1. A caller-supplied buffer, used in place. No allocation, no ownership
//!    transfer.
//! 2. With `reuse`, the single internally owned [`ReusableBuffer`]. It is kept
//!    while the request's frame and channel counts match its tag, and replaced
//!    wholesale otherwise.
//! 3. A fresh buffer owned by the returned [`RenderOutput`].
//!
//! The input buffer follows the same order and falls back to silence.
//!
//! Render calls are not reentrant; the `&mut` receivers make that structural.

use std::ops::{Deref, DerefMut};

use crate::engine::Engine;
use crate::error::{BridgeError, Result};

/// Channel counts the engine was initialized with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLayout {
    pub input: usize,
    pub output: usize,
}

impl ChannelLayout {
    pub fn new(input: usize, output: usize) -> Self {
        Self { input, output }
    }

    /// Interleaved output samples needed for `frames` frames.
    pub fn output_len(&self, frames: usize) -> Result<usize> {
        frames
            .checked_mul(self.output)
            .ok_or_else(|| BridgeError::InvalidArgument(format!("{frames} frames is too many")))
    }

    /// Interleaved input samples needed for `frames` frames.
    pub fn input_len(&self, frames: usize) -> Result<usize> {
        frames
            .checked_mul(self.input)
            .ok_or_else(|| BridgeError::InvalidArgument(format!("{frames} frames is too many")))
    }
}

/// Buffer selection for one render call.
#[derive(Debug, Default)]
pub struct RunOptions<'a> {
    output: Option<&'a mut [f32]>,
    input: Option<&'a [f32]>,
    reuse: bool,
}

impl<'a> RunOptions<'a> {
    /// Fresh output, silent input.
    pub fn new() -> Self {
        Self::default()
    }

    /// Render into a caller buffer of exactly `frames * output_channels` samples.
    pub fn output(mut self, buffer: &'a mut [f32]) -> Self {
        self.output = Some(buffer);
        self
    }

    /// Feed a caller buffer of exactly `frames * input_channels` samples.
    pub fn input(mut self, buffer: &'a [f32]) -> Self {
        self.input = Some(buffer);
        self
    }

    /// Use the internally owned buffers for whatever the caller did not supply.
    pub fn reuse(mut self) -> Self {
        self.reuse = true;
        self
    }
}

/// Rendered audio, tagged with where its storage lives.
#[derive(Debug)]
pub enum RenderOutput<'a> {
    /// The caller's own buffer, filled in place.
    Caller(&'a mut [f32]),
    /// The render loop's reusable buffer. Valid until the next render call.
    Reused(&'a mut [f32]),
    /// A buffer allocated for this call only.
    Fresh(Vec<f32>),
}

impl RenderOutput<'_> {
    /// Copy or move the samples into an owned vector.
    pub fn into_vec(self) -> Vec<f32> {
        match self {
            RenderOutput::Caller(buf) | RenderOutput::Reused(buf) => buf.to_vec(),
            RenderOutput::Fresh(buf) => buf,
        }
    }

    pub fn is_reused(&self) -> bool {
        matches!(self, RenderOutput::Reused(_))
    }
}

impl Deref for RenderOutput<'_> {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        match self {
            RenderOutput::Caller(buf) | RenderOutput::Reused(buf) => buf,
            RenderOutput::Fresh(buf) => buf,
        }
    }
}

impl DerefMut for RenderOutput<'_> {
    fn deref_mut(&mut self) -> &mut [f32] {
        match self {
            RenderOutput::Caller(buf) | RenderOutput::Reused(buf) => buf,
            RenderOutput::Fresh(buf) => buf,
        }
    }
}

/// An output/input buffer pair tagged with the request shape it was sized for.
#[derive(Debug)]
struct ReusableBuffer {
    frames: usize,
    layout: ChannelLayout,
    output: Vec<f32>,
    input: Vec<f32>,
}

impl ReusableBuffer {
    fn allocate(frames: usize, layout: ChannelLayout, output_len: usize, input_len: usize) -> Self {
        Self {
            frames,
            layout,
            output: vec![0.0; output_len],
            input: vec![0.0; input_len],
        }
    }

    fn fits(&self, frames: usize, layout: ChannelLayout) -> bool {
        self.frames == frames && self.layout == layout
    }

    /// Return the buffer in `slot`, replacing it unless its tag matches.
    ///
    /// The replacement is allocated before the old pair is dropped.
    fn ensure(
        slot: &mut Option<ReusableBuffer>,
        frames: usize,
        layout: ChannelLayout,
    ) -> Result<&mut ReusableBuffer> {
        if !slot.as_ref().is_some_and(|b| b.fits(frames, layout)) {
            let fresh = Self::allocate(
                frames,
                layout,
                layout.output_len(frames)?,
                layout.input_len(frames)?,
            );
            log::trace!(
                "Allocated render buffers for {} frames ({} in / {} out)",
                frames,
                layout.input,
                layout.output
            );
            *slot = Some(fresh);
        }
        Ok(slot.get_or_insert_with(|| Self::allocate(frames, layout, 0, 0)))
    }
}

/// Drives the engine forward in blocks.
#[derive(Debug, Default)]
pub struct RenderLoop {
    reuse: Option<ReusableBuffer>,
    /// Discard buffers for `advance`, kept apart from the reuse pair.
    scratch: Option<ReusableBuffer>,
    frames_rendered: u64,
    reallocations: u64,
}

impl RenderLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total frames pushed through the engine by this loop.
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// How many times the reuse pair has been (re)allocated.
    pub fn reuse_reallocations(&self) -> u64 {
        self.reallocations
    }

    /// `(frames, output_channels)` the reuse pair is currently sized for.
    pub fn reuse_tag(&self) -> Option<(usize, usize)> {
        self.reuse.as_ref().map(|b| (b.frames, b.layout.output))
    }

    /// Render `frames` frames and return the output.
    pub fn run<'a, E: Engine + ?Sized>(
        &'a mut self,
        engine: &mut E,
        layout: ChannelLayout,
        frames: usize,
        options: RunOptions<'a>,
    ) -> Result<RenderOutput<'a>> {
        let RunOptions {
            output,
            input,
            reuse,
        } = options;
        let output_len = layout.output_len(frames)?;
        let input_len = layout.input_len(frames)?;

        if let Some(buf) = output.as_deref() {
            if buf.len() != output_len {
                return Err(BridgeError::InvalidArgument(format!(
                    "output buffer holds {} samples, {} frames x {} channels needs {}",
                    buf.len(),
                    frames,
                    layout.output,
                    output_len
                )));
            }
        }
        if let Some(buf) = input {
            if buf.len() != input_len {
                return Err(BridgeError::InvalidArgument(format!(
                    "input buffer holds {} samples, {} frames x {} channels needs {}",
                    buf.len(),
                    frames,
                    layout.input,
                    input_len
                )));
            }
        }

        self.frames_rendered += frames as u64;
        let needs_slot = reuse && (output.is_none() || input.is_none());
        let slot = if needs_slot {
            let stale = !self.reuse.as_ref().is_some_and(|b| b.fits(frames, layout));
            if stale {
                self.reallocations += 1;
            }
            Some(ReusableBuffer::ensure(&mut self.reuse, frames, layout)?)
        } else {
            None
        };
        let (slot_output, slot_input) = match slot {
            Some(ReusableBuffer { output, input, .. }) => (Some(output), Some(&*input)),
            None => (None, None),
        };

        let silence;
        let input: &[f32] = match (input, slot_input) {
            (Some(buf), _) => buf,
            (None, Some(buf)) => buf,
            (None, None) => {
                silence = vec![0.0; input_len];
                &silence
            }
        };

        match (output, slot_output) {
            (Some(buf), _) => {
                engine.run(input, buf, frames);
                Ok(RenderOutput::Caller(buf))
            }
            (None, Some(buf)) => {
                engine.run(input, buf, frames);
                Ok(RenderOutput::Reused(buf.as_mut_slice()))
            }
            (None, None) => {
                let mut buf = vec![0.0; output_len];
                engine.run(input, &mut buf, frames);
                Ok(RenderOutput::Fresh(buf))
            }
        }
    }

    /// Render `frames` frames and discard the output.
    ///
    /// Has the same time-advance and callback effects as [`run`](Self::run).
    pub fn advance<E: Engine + ?Sized>(
        &mut self,
        engine: &mut E,
        layout: ChannelLayout,
        frames: usize,
    ) -> Result<()> {
        let scratch = ReusableBuffer::ensure(&mut self.scratch, frames, layout)?;
        let ReusableBuffer { output, input, .. } = scratch;
        engine.run(input, output, frames);
        self.frames_rendered += frames as u64;
        Ok(())
    }
}
