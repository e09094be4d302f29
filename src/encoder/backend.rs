//! Codec backend seam.
//!
//! The drain loop and pipeline talk to the codec only through
//! [`EncoderBackend`], so the whole recording path can be exercised with a
//! scripted backend in tests while production uses openh264.

use crate::error::CamrecResult;

/// Output format captured from the codec once it has seen real input.
#[derive(Debug, Clone)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    /// Sequence parameter set, without start code.
    pub sps: Vec<u8>,
    /// Picture parameter set, without start code.
    pub pps: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SampleFlags {
    /// Buffer carries codec configuration (SPS/PPS), not frame data.
    pub codec_config: bool,
    pub key_frame: bool,
}

/// One encoded output buffer, Annex-B payload.
#[derive(Debug, Clone)]
pub struct EncodedSample {
    pub data: Vec<u8>,
    /// Producer-assigned presentation time in microseconds.
    pub pts_micros: u64,
    pub flags: SampleFlags,
}

/// Result of one zero-timeout poll of the codec output queue.
#[derive(Debug)]
pub enum PollOutput {
    /// No output ready.
    TryAgain,
    /// The codec announced its output format. Expected exactly once, before
    /// the first frame buffer.
    FormatChanged(VideoFormat),
    Buffer(EncodedSample),
    /// The codec flushed its last buffer. Terminal.
    EndOfStream,
}

/// Raw frame handed to the codec input.
pub struct InputFrame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub pts_micros: u64,
}

pub enum InputMessage {
    Frame(InputFrame),
    /// No more frames will follow; the backend flushes and emits
    /// `PollOutput::EndOfStream`.
    EndOfStream,
}

pub trait EncoderBackend: Send + Sync {
    /// Starts the codec. Input submitted before `start` is queued.
    fn start(&self) -> CamrecResult<()>;

    /// Channel feeding the codec input. Cloneable; the compositor's encoder
    /// surface holds one end.
    fn input(&self) -> flume::Sender<InputMessage>;

    /// Polls the output queue without blocking.
    fn try_dequeue(&self) -> PollOutput;

    /// Tells the codec no further input is coming.
    fn signal_end_of_stream(&self) {
        let _ = self.input().send(InputMessage::EndOfStream);
    }

    /// Releases codec resources. Called after the drain loop has exited.
    fn stop(&self);
}
