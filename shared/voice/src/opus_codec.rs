use crate::error::{VoiceError, VoiceResult};
use crate::pcm::{CHANNELS, DEFAULT_BITRATE, SAMPLE_RATE};

/// Thin wrapper over an Opus encoder/decoder pair at the voice plane's fixed
/// rate (48kHz mono). One `OpusCodec` is owned per direction per peer.
pub struct OpusCodec {
    enc: opus::Encoder,
    dec: opus::Decoder,
}

impl OpusCodec {
    pub fn new() -> VoiceResult<Self> {
        let ch = if CHANNELS == 2 { opus::Channels::Stereo } else { opus::Channels::Mono };
        let mut enc = opus::Encoder::new(SAMPLE_RATE, ch, opus::Application::Voip)
            .map_err(|e| VoiceError::Internal(format!("opus encoder: {e}")))?;
        enc.set_bitrate(opus::Bitrate::Bits(DEFAULT_BITRATE as i32))
            .map_err(|e| VoiceError::Internal(format!("opus bitrate: {e}")))?;
        let dec = opus::Decoder::new(SAMPLE_RATE, ch)
            .map_err(|e| VoiceError::Internal(format!("opus decoder: {e}")))?;
        Ok(Self { enc, dec })
    }

    pub fn encode(&mut self, pcm: &[i16], out: &mut [u8]) -> VoiceResult<usize> {
        self.enc
            .encode(pcm, out)
            .map_err(|e| VoiceError::Internal(format!("opus encode: {e}")))
    }

    pub fn decode(&mut self, data: &[u8], pcm_out: &mut [i16]) -> VoiceResult<usize> {
        self.dec
            .decode(data, pcm_out, false)
            .map_err(|e| VoiceError::Internal(format!("opus decode: {e}")))
    }

    /// Decode with forward error concealment: passing an empty `data` slice
    /// asks Opus to synthesize a concealment frame for a lost packet.
    pub fn decode_lost(&mut self, pcm_out: &mut [i16]) -> VoiceResult<usize> {
        self.dec
            .decode(&[], pcm_out, false)
            .map_err(|e| VoiceError::Internal(format!("opus plc: {e}")))
    }
}
