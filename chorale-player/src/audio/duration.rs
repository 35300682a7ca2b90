//! Track duration measurement using symphonia

use std::fs::File;
use std::path::Path;

use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

use crate::playback::loader::LoadFailure;

/// Duration in seconds of the audio file at `path`
///
/// Uses the container's frame count when it has one, otherwise decodes the
/// stream and counts frames. Blocking; run it off the async executor.
pub fn measure_duration(path: &Path) -> Result<f64, LoadFailure> {
    let file = File::open(path).map_err(|e| LoadFailure::Io(format!("{}: {}", path.display(), e)))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let detected = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| LoadFailure::Decode(format!("unrecognized format: {}", e)))?;
    let mut format = detected.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| LoadFailure::Decode("no audio track found".to_string()))?;
    let track_id = track.id;
    let params = track.codec_params.clone();

    if let (Some(frames), Some(rate)) = (params.n_frames, params.sample_rate) {
        if rate > 0 && frames > 0 {
            return Ok(frames as f64 / rate as f64);
        }
    }
    if let (Some(frames), Some(time_base)) = (params.n_frames, params.time_base) {
        let time = time_base.calc_time(frames);
        if frames > 0 {
            return Ok(time.seconds as f64 + time.frac);
        }
    }

    debug!("No frame count in container header, decoding {}", path.display());

    let mut decoder = symphonia::default::get_codecs()
        .make(&params, &DecoderOptions::default())
        .map_err(|e| LoadFailure::Decode(format!("unsupported codec: {}", e)))?;

    let mut frames: u64 = 0;
    let mut rate = params.sample_rate;
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(LoadFailure::Decode(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }
        match decoder.decode(&packet) {
            Ok(decoded) => {
                frames += decoded.frames() as u64;
                rate = rate.or(Some(decoded.spec().rate));
            }
            // Corrupt packet; skip it like a player would
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(LoadFailure::Decode(e.to_string())),
        }
    }

    match rate {
        Some(rate) if rate > 0 && frames > 0 => Ok(frames as f64 / rate as f64),
        _ => Err(LoadFailure::Decode("no audio frames decoded".to_string())),
    }
}
