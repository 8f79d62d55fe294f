//! Decode and re-encode pipeline for one track.
//!
//! Each step runs four sub-steps, downstream first so buffers are freed
//! before new work is pushed in:
//!
//! 1. encoder output -> muxer
//! 2. decoder output -> frame slot
//! 3. frame slot -> encoder input
//! 4. demuxer -> decoder input
//!
//! Each sub-step moves at most one sample and treats `Starved` / `NotReady`
//! as "nothing to do right now".

use std::sync::Arc;

use super::{TrackState, TrackTranscoder, TrackWiring, check_output_mime, not_set_up};
use crate::TranscodeError;
use crate::channel::{FrameSlot, PumpIn, PumpOut, SampleChannel, TrackReader};
use crate::media::{Sample, SampleFlags, TrackFormat, TrackKind};
use crate::muxer::SharedMuxer;
use crate::service::{CodecError, MediaBackend};

/// Hand-off rules between a track's decoder and encoder.
pub trait FrameBridge: Send {
    const KIND: TrackKind;

    /// Checks the raw format announced by the decoder against the target.
    ///
    /// # Errors
    ///
    /// - `TranscodeError::UnsupportedAudioConversion` - Decoded audio would need resampling or re-channeling
    fn on_decoder_format(
        &mut self,
        decoded: &TrackFormat,
        target: &TrackFormat,
    ) -> Result<(), TranscodeError>;

    /// Turns a decoded frame into encoder input. Raw frames carry no flags.
    fn convert(&mut self, frame: Sample) -> Sample {
        Sample::new(frame.data, frame.pts_us, SampleFlags::NONE)
    }
}

/// Decoded frames go to the encoder unchanged; scaling happens inside the
/// encoder's input surface.
#[derive(Debug, Default)]
pub struct VideoBridge;

impl FrameBridge for VideoBridge {
    const KIND: TrackKind = TrackKind::Video;

    fn on_decoder_format(
        &mut self,
        decoded: &TrackFormat,
        target: &TrackFormat,
    ) -> Result<(), TranscodeError> {
        tracing::debug!("video decoder emits {decoded}, encoder targets {target}");
        Ok(())
    }
}

/// PCM goes to the encoder unchanged, so rate and layout must already match.
#[derive(Debug, Default)]
pub struct AudioBridge;

impl FrameBridge for AudioBridge {
    const KIND: TrackKind = TrackKind::Audio;

    fn on_decoder_format(
        &mut self,
        decoded: &TrackFormat,
        target: &TrackFormat,
    ) -> Result<(), TranscodeError> {
        let (Some(decoded), Some(target)) = (decoded.audio_params(), target.audio_params()) else {
            return Err(TranscodeError::UnsupportedAudioConversion {
                reason: "decoder did not announce an audio format".to_string(),
            });
        };
        if decoded.sample_rate != target.sample_rate {
            return Err(TranscodeError::UnsupportedAudioConversion {
                reason: format!(
                    "decoded audio is {} Hz, encoder expects {} Hz",
                    decoded.sample_rate, target.sample_rate
                ),
            });
        }
        if decoded.channel_count != target.channel_count {
            return Err(TranscodeError::UnsupportedAudioConversion {
                reason: format!(
                    "decoded audio has {} channels, encoder expects {}",
                    decoded.channel_count, target.channel_count
                ),
            });
        }
        Ok(())
    }
}

pub type VideoTrack = ReencodeTrack<VideoBridge>;
pub type AudioTrack = ReencodeTrack<AudioBridge>;

pub struct ReencodeTrack<B: FrameBridge> {
    state: TrackState,
    backend: Arc<dyn MediaBackend>,
    wiring: TrackWiring,
    target: TrackFormat,
    bridge: B,
    decoder: Option<SampleChannel>,
    encoder: Option<SampleChannel>,
    slot: FrameSlot,
    decoder_format_known: bool,
    output_registered: bool,
    written_pts_us: i64,
    released: bool,
}

impl<B: FrameBridge> ReencodeTrack<B> {
    pub fn new(
        wiring: TrackWiring,
        target: TrackFormat,
        backend: Arc<dyn MediaBackend>,
        bridge: B,
    ) -> Self {
        Self {
            state: TrackState::Uninitialized,
            backend,
            wiring,
            target,
            bridge,
            decoder: None,
            encoder: None,
            slot: FrameSlot::default(),
            decoder_format_known: false,
            output_registered: false,
            written_pts_us: 0,
            released: false,
        }
    }

    fn muxer(&self) -> &SharedMuxer {
        &self.wiring.muxer
    }

    fn channels(&mut self) -> Result<(&mut SampleChannel, &mut SampleChannel), TranscodeError> {
        match (self.decoder.as_mut(), self.encoder.as_mut()) {
            (Some(decoder), Some(encoder)) => Ok((decoder, encoder)),
            _ => Err(not_set_up(B::KIND)),
        }
    }

    fn drain_encoder(&mut self) -> Result<bool, TranscodeError> {
        let kind = B::KIND;
        let (_, encoder) = self.channels()?;
        match encoder.pump_out()? {
            PumpOut::NotReady => Ok(false),
            PumpOut::FormatChanged(format) => {
                if self.output_registered {
                    return Err(TranscodeError::Codec(CodecError::IllegalState {
                        reason: format!("{kind} encoder output format changed twice"),
                    }));
                }
                check_output_mime(kind, &format)?;
                self.muxer().lock().register_track_format(kind, format)?;
                self.output_registered = true;
                Ok(true)
            }
            PumpOut::Produced(sample) => {
                if !self.output_registered {
                    return Err(TranscodeError::Codec(CodecError::IllegalState {
                        reason: format!("{kind} encoder produced output before its format"),
                    }));
                }
                self.written_pts_us = self.written_pts_us.max(sample.pts_us);
                self.muxer().lock().write_sample(kind, sample)?;
                Ok(true)
            }
            PumpOut::SinkEos => {
                let eos = Sample::end_of_stream(self.written_pts_us);
                self.muxer().lock().write_sample(kind, eos)?;
                self.state.advance(kind, TrackState::Finished);
                Ok(true)
            }
        }
    }

    fn drain_decoder(&mut self) -> Result<bool, TranscodeError> {
        if !self.slot.is_empty() {
            return Ok(false);
        }
        let kind = B::KIND;
        let (decoder, _) = self.channels()?;
        if decoder.is_output_done() {
            return Ok(false);
        }
        match decoder.pump_out()? {
            PumpOut::NotReady => Ok(false),
            PumpOut::FormatChanged(decoded) => {
                self.bridge.on_decoder_format(&decoded, &self.target)?;
                self.decoder_format_known = true;
                Ok(true)
            }
            PumpOut::Produced(frame) => {
                // Frames of unknown layout could bypass the bridge's conversion check
                if !self.decoder_format_known {
                    return Err(TranscodeError::Codec(CodecError::IllegalState {
                        reason: format!("{kind} decoder produced output before its format"),
                    }));
                }
                let frame = self.bridge.convert(frame);
                self.slot.put(frame)?;
                Ok(true)
            }
            PumpOut::SinkEos => {
                self.slot.close();
                Ok(true)
            }
        }
    }

    fn feed_encoder(&mut self) -> Result<bool, TranscodeError> {
        let Some(encoder) = self.encoder.as_mut() else {
            return Err(not_set_up(B::KIND));
        };
        if encoder.is_input_done() {
            return Ok(false);
        }
        let outcome = encoder.pump_in(&mut self.slot)?;
        Ok(matches!(outcome, PumpIn::Fed | PumpIn::SourceEos))
    }

    fn feed_decoder(&mut self) -> Result<bool, TranscodeError> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Err(not_set_up(B::KIND));
        };
        if decoder.is_input_done() {
            return Ok(false);
        }
        let reader: &mut TrackReader = &mut self.wiring.reader;
        let outcome = decoder.pump_in(reader)?;
        Ok(matches!(outcome, PumpIn::Fed | PumpIn::SourceEos))
    }
}

impl<B: FrameBridge> TrackTranscoder for ReencodeTrack<B> {
    fn kind(&self) -> TrackKind {
        B::KIND
    }

    fn state(&self) -> TrackState {
        self.state
    }

    fn setup(&mut self) -> Result<(), TranscodeError> {
        if self.state != TrackState::Uninitialized {
            return Ok(());
        }
        let kind = B::KIND;
        check_output_mime(kind, &self.target)?;

        let timeout = self.wiring.dequeue_timeout;
        let decoder = self.backend.create_decoder(&self.wiring.input)?;
        self.decoder = Some(SampleChannel::new(decoder, timeout));
        let encoder = self.backend.create_encoder(&self.target)?;
        let encoder = self.encoder.insert(SampleChannel::new(encoder, timeout));

        // Only the configured encoder knows what it will really emit
        if let Some(actual) = encoder.output_format() {
            check_output_mime(kind, &actual)?;
        }

        tracing::debug!(
            "{kind} track configured: {} -> {}",
            self.wiring.input,
            self.target
        );
        self.state.advance(kind, TrackState::Initialized);
        Ok(())
    }

    fn step_pipeline(&mut self) -> Result<bool, TranscodeError> {
        match self.state {
            TrackState::Finished => return Ok(false),
            TrackState::Uninitialized => return Err(not_set_up(B::KIND)),
            TrackState::Initialized => {
                let (decoder, encoder) = self.channels()?;
                decoder.start()?;
                encoder.start()?;
                self.state.advance(B::KIND, TrackState::Running);
            }
            TrackState::Running => {}
        }

        let mut progressed = self.drain_encoder()?;
        if self.state == TrackState::Finished {
            return Ok(true);
        }
        progressed |= self.drain_decoder()?;
        progressed |= self.feed_encoder()?;
        progressed |= self.feed_decoder()?;
        Ok(progressed)
    }

    fn written_pts_us(&self) -> i64 {
        self.written_pts_us
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        for channel in [self.decoder.as_mut(), self.encoder.as_mut()]
            .into_iter()
            .flatten()
        {
            channel.release();
        }
        tracing::debug!("{} track released in state {:?}", B::KIND, self.state);
    }
}

impl<B: FrameBridge> Drop for ReencodeTrack<B> {
    fn drop(&mut self) {
        self.release();
    }
}
