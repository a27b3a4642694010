use std::io::Cursor;
use std::path::{Path, PathBuf};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::AsrError;

/// Size of the canonical RIFF/WAVE header that precedes PCM data.
pub const WAV_HEADER_LEN: usize = 44;
/// Sample rate expected by the remote recognizer.
pub const TARGET_SAMPLE_RATE: u32 = 16000;

/// Container/codec detected from leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    WebM,
    Mp3,
    Ogg,
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::WebM => "webm",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Ogg => "ogg",
        }
    }
}

/// Detect the audio container from its first bytes, defaulting to WAV.
pub fn sniff_format(data: &[u8]) -> AudioFormat {
    if data.len() < 12 {
        return AudioFormat::Wav;
    }

    if data[..4] == [0x1A, 0x45, 0xDF, 0xA3] {
        return AudioFormat::WebM;
    }

    if &data[..4] == b"RIFF" && &data[8..12] == b"WAVE" {
        return AudioFormat::Wav;
    }

    if &data[..3] == b"ID3" || (data[0] == 0xFF && data[1] & 0xE0 == 0xE0) {
        return AudioFormat::Mp3;
    }

    if &data[..4] == b"OggS" {
        return AudioFormat::Ogg;
    }

    AudioFormat::Wav
}

/// Strip the 44-byte WAV header; non-RIFF bytes are returned unchanged.
pub fn pcm_payload(wav: &[u8]) -> &[u8] {
    if wav.len() > WAV_HEADER_LEN && &wav[..4] == b"RIFF" {
        &wav[WAV_HEADER_LEN..]
    } else {
        wav
    }
}

/// Audio ready for recognition: WAV bytes plus the path they live at.
///
/// When the input had to be converted, the converted file is removed on drop.
pub struct PreparedAudio {
    pub path: PathBuf,
    pub source_format: AudioFormat,
    pub wav: Vec<u8>,
    converted: bool,
}

impl PreparedAudio {
    /// Read `path`, converting to 16kHz mono WAV if it is not already WAV.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, AsrError> {
        let path = path.as_ref();
        info!("Preparing audio file: {}", path.display());

        let data = tokio::fs::read(path).await?;
        let source_format = sniff_format(&data);
        info!("Detected audio format: {:?}", source_format);

        if source_format == AudioFormat::Wav {
            check_wav_spec(&data);
            return Ok(Self {
                path: path.to_path_buf(),
                source_format,
                wav: data,
                converted: false,
            });
        }

        let converted_path = convert_to_wav(path, source_format).await?;
        let wav = tokio::fs::read(&converted_path).await?;
        check_wav_spec(&wav);

        Ok(Self {
            path: converted_path,
            source_format,
            wav,
            converted: true,
        })
    }

    /// Raw 16-bit PCM for the streaming channel.
    pub fn pcm(&self) -> &[u8] {
        pcm_payload(&self.wav)
    }
}

impl Drop for PreparedAudio {
    fn drop(&mut self) {
        if self.converted {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!("Failed to remove converted audio {}: {}", self.path.display(), e);
            }
        }
    }
}

fn check_wav_spec(data: &[u8]) {
    match hound::WavReader::new(Cursor::new(data)) {
        Ok(reader) => {
            let spec = reader.spec();
            if spec.sample_rate != TARGET_SAMPLE_RATE
                || spec.channels != 1
                || spec.bits_per_sample != 16
            {
                warn!(
                    "WAV is {}Hz/{}-bit/{}ch, recognizer expects {}Hz/16-bit/mono",
                    spec.sample_rate, spec.bits_per_sample, spec.channels, TARGET_SAMPLE_RATE
                );
            }
        }
        Err(e) => warn!("Could not inspect WAV header: {}", e),
    }
}

/// Convert any supported input to a 16kHz mono WAV next to the input file.
///
/// Tries ffmpeg, then afconvert (macOS), then an in-process decode.
pub async fn convert_to_wav(input: &Path, format: AudioFormat) -> Result<PathBuf, AsrError> {
    let mut output = input.as_os_str().to_owned();
    output.push(".converted.wav");
    let output = PathBuf::from(output);

    info!("Converting {:?} audio to WAV: {}", format, output.display());

    let ffmpeg = Command::new("ffmpeg")
        .arg("-i")
        .arg(input)
        .args(["-ar", "16000", "-ac", "1", "-y"])
        .arg(&output)
        .output()
        .await;
    match ffmpeg {
        Ok(out) if out.status.success() => return Ok(output),
        Ok(out) => warn!("ffmpeg conversion failed with {}", out.status),
        Err(e) => warn!("ffmpeg unavailable: {}", e),
    }

    let afconvert = Command::new("afconvert")
        .args(["-f", "WAVE", "-d", "LEI16@16000"])
        .arg(input)
        .arg(&output)
        .output()
        .await;
    match afconvert {
        Ok(out) if out.status.success() => return Ok(output),
        Ok(out) => warn!("afconvert conversion failed with {}", out.status),
        Err(e) => warn!("afconvert unavailable: {}", e),
    }

    let input_owned = input.to_path_buf();
    let output_owned = output.clone();
    tokio::task::spawn_blocking(move || decode_to_wav(&input_owned, format, &output_owned))
        .await
        .map_err(|e| AsrError::Conversion(format!("decode task failed: {e}")))??;

    Ok(output)
}

/// Decode with symphonia, downmix to mono, resample to 16kHz and write WAV.
fn decode_to_wav(input: &Path, format: AudioFormat, output: &Path) -> Result<(), AsrError> {
    let file = std::fs::File::open(input)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    hint.with_extension(format.extension());

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| AsrError::Conversion(format!("unsupported audio: {e}")))?;
    let mut reader = probed.format;

    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| AsrError::Conversion("no decodable audio track".to_string()))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(TARGET_SAMPLE_RATE);
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(1);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AsrError::Conversion(format!("no decoder: {e}")))?;

    let mut interleaved: Vec<i16> = Vec::new();
    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(e) => return Err(AsrError::Conversion(format!("read packet: {e}"))),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("Skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => return Err(AsrError::Conversion(format!("decode: {e}"))),
        };

        let spec = *decoded.spec();
        sample_rate = spec.rate;
        channels = spec.channels.count() as u16;
        let mut buf = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
        buf.copy_interleaved_ref(decoded);
        interleaved.extend_from_slice(buf.samples());
    }

    let mono = to_mono(&interleaved, channels);
    let resampled = resample(&mono, sample_rate, TARGET_SAMPLE_RATE);
    write_wav(output, &resampled)
}

/// Downmix interleaved samples to mono by averaging channels.
pub fn to_mono(samples: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }

    samples
        .chunks_exact(channels as usize)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32).clamp(i16::MIN as i32, i16::MAX as i32) as i16
        })
        .collect()
}

/// Resample mono audio: integer ratios average each block of input samples,
/// everything else is linearly interpolated.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 {
        return samples.to_vec();
    }

    if from_rate > to_rate && from_rate % to_rate == 0 {
        let ratio = (from_rate / to_rate) as usize;
        // Box filter: averaging the block damps content above the new
        // Nyquist rate that plain sample dropping would fold back in.
        return samples
            .chunks(ratio)
            .map(|block| {
                let sum: i32 = block.iter().map(|&s| s as i32).sum();
                (sum / block.len() as i32) as i16
            })
            .collect();
    }

    let out_len = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let step = from_rate as f64 / to_rate as f64;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = pos as usize;
            let frac = pos - idx as f64;
            let a = samples[idx.min(samples.len() - 1)] as f64;
            let b = samples[(idx + 1).min(samples.len() - 1)] as f64;
            (a + (b - a) * frac).round() as i16
        })
        .collect()
}

fn write_wav(path: &Path, samples: &[i16]) -> Result<(), AsrError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: TARGET_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| AsrError::Conversion(format!("create WAV: {e}")))?;
    for &sample in samples {
        writer
            .write_sample(sample)
            .map_err(|e| AsrError::Conversion(format!("write WAV: {e}")))?;
    }
    writer
        .finalize()
        .map_err(|e| AsrError::Conversion(format!("finalize WAV: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(samples: &[i16]) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: TARGET_SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn sniffs_known_signatures() {
        let mut webm = vec![0x1A, 0x45, 0xDF, 0xA3];
        webm.resize(16, 0);
        assert_eq!(sniff_format(&webm), AudioFormat::WebM);

        assert_eq!(sniff_format(&wav_bytes(&[0; 8])), AudioFormat::Wav);

        let mut id3 = b"ID3".to_vec();
        id3.resize(16, 0);
        assert_eq!(sniff_format(&id3), AudioFormat::Mp3);

        let mut mpeg = vec![0xFF, 0xFB];
        mpeg.resize(16, 0);
        assert_eq!(sniff_format(&mpeg), AudioFormat::Mp3);

        let mut ogg = b"OggS".to_vec();
        ogg.resize(16, 0);
        assert_eq!(sniff_format(&ogg), AudioFormat::Ogg);
    }

    #[test]
    fn unknown_or_short_input_defaults_to_wav() {
        assert_eq!(sniff_format(b"abc"), AudioFormat::Wav);
        assert_eq!(sniff_format(&[0u8; 32]), AudioFormat::Wav);
    }

    #[test]
    fn pcm_payload_strips_wav_header() {
        let wav = wav_bytes(&[1, 2, 3]);
        let pcm = pcm_payload(&wav);
        assert_eq!(pcm.len(), 6);
        assert_eq!(pcm, &[1, 0, 2, 0, 3, 0]);

        let raw = [9u8; 100];
        assert_eq!(pcm_payload(&raw), &raw[..]);
    }

    #[test]
    fn stereo_downmix_averages_channels() {
        let mono = to_mono(&[100, 300, -200, -400, i16::MAX, i16::MAX], 2);
        assert_eq!(mono, vec![200, -300, i16::MAX]);
    }

    #[test]
    fn resample_decimates_integer_ratios() {
        let samples: Vec<i16> = (0..48).collect();
        let out = resample(&samples, 48000, 16000);
        assert_eq!(out, (1..48).step_by(3).collect::<Vec<i16>>());
    }

    #[test]
    fn decimation_cancels_tones_above_the_new_nyquist() {
        // 16 kHz square wave sampled at 32 kHz, taken down to 16 kHz.
        let tone: Vec<i16> = (0..64).map(|i| if i % 2 == 0 { 8000 } else { -8000 }).collect();
        assert!(resample(&tone, 32000, 16000).iter().all(|&s| s == 0));

        let level = vec![1234i16; 64];
        assert_eq!(resample(&level, 32000, 16000), vec![1234i16; 32]);
    }

    #[test]
    fn resample_interpolates_other_ratios() {
        let samples = vec![0i16; 44100];
        let out = resample(&samples, 44100, 16000);
        assert_eq!(out.len(), 16000);
    }

    #[tokio::test]
    async fn load_keeps_wav_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.wav");
        std::fs::write(&path, wav_bytes(&[5; 10])).unwrap();

        let audio = PreparedAudio::load(&path).await.unwrap();
        assert_eq!(audio.source_format, AudioFormat::Wav);
        assert_eq!(audio.path, path);
        assert_eq!(audio.pcm().len(), 20);
        drop(audio);
        assert!(path.exists(), "original input must not be removed");
    }
}
