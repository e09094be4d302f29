//! MP4 container writing.
//!
//! The track is bound lazily: the writer opens the file up front, but the
//! AVC track is only added once the drain loop has captured the codec's
//! output format (SPS/PPS). The track timescale is microseconds so rebased
//! sample timestamps map into the container unchanged.

use std::fs::File;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use mp4::{
    AvcConfig, MediaConfig, Mp4Config, Mp4Sample, Mp4Writer, TrackConfig, TrackType,
};

use crate::encoder::backend::VideoFormat;
use crate::error::{CamrecError, CamrecResult};
use crate::h264;

/// Track timescale: one tick per microsecond.
const TRACK_TIMESCALE: u32 = 1_000_000;

pub struct Mp4Muxer {
    output_path: PathBuf,
    writer: Option<Mp4Writer<File>>,
    track_id: Option<u32>,
    samples_written: u64,
}

impl Mp4Muxer {
    pub fn new(output_path: &Path) -> Self {
        Self {
            output_path: output_path.to_path_buf(),
            writer: None,
            track_id: None,
            samples_written: 0,
        }
    }

    pub fn is_started(&self) -> bool {
        self.track_id.is_some()
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /// Opens the file and binds the video track from the captured format.
    pub fn start(&mut self, format: &VideoFormat) -> CamrecResult<()> {
        if self.track_id.is_some() {
            log::warn!("[MUX] start called twice, ignoring");
            return Ok(());
        }
        let file = File::create(&self.output_path)?;
        let config = Mp4Config {
            major_brand: str::parse("isom")
                .map_err(|_| CamrecError::Other("bad brand".to_string()))?,
            minor_version: 512,
            compatible_brands: vec![
                str::parse("isom").map_err(|_| CamrecError::Other("bad brand".to_string()))?,
                str::parse("iso2").map_err(|_| CamrecError::Other("bad brand".to_string()))?,
                str::parse("avc1").map_err(|_| CamrecError::Other("bad brand".to_string()))?,
                str::parse("mp41").map_err(|_| CamrecError::Other("bad brand".to_string()))?,
            ],
            timescale: 1000,
        };
        let mut writer = Mp4Writer::write_start(file, &config)?;
        writer.add_track(&TrackConfig {
            track_type: TrackType::Video,
            timescale: TRACK_TIMESCALE,
            language: "und".to_string(),
            media_conf: MediaConfig::AvcConfig(AvcConfig {
                width: format.width as u16,
                height: format.height as u16,
                seq_param_set: format.sps.clone(),
                pic_param_set: format.pps.clone(),
            }),
        })?;
        self.writer = Some(writer);
        self.track_id = Some(1);
        log::info!(
            "[MUX] container started: {} ({}x{})",
            self.output_path.display(),
            format.width,
            format.height
        );
        Ok(())
    }

    /// Writes one Annex-B sample (converted to AVCC) at the given rebased
    /// timestamp.
    pub fn write_sample(
        &mut self,
        annex_b: &[u8],
        pts_micros: u64,
        duration_micros: u32,
        is_sync: bool,
    ) -> CamrecResult<()> {
        let track_id = self
            .track_id
            .ok_or_else(|| CamrecError::Other("mux sample before container start".to_string()))?;
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| CamrecError::Other("mux sample after finalize".to_string()))?;
        let avcc = h264::annex_b_to_avcc(annex_b);
        if avcc.is_empty() {
            log::warn!("[MUX] skipping sample with no frame payload");
            return Ok(());
        }
        writer.write_sample(
            track_id,
            &Mp4Sample {
                start_time: pts_micros,
                duration: duration_micros,
                rendering_offset: 0,
                is_sync,
                bytes: Bytes::from(avcc),
            },
        )?;
        self.samples_written += 1;
        Ok(())
    }

    /// Writes the container trailer. A muxer that never started (no samples
    /// arrived) finalizes to nothing and reports an error so the caller can
    /// surface the empty recording.
    pub fn finalize(&mut self) -> CamrecResult<()> {
        match self.writer.take() {
            Some(mut writer) => {
                writer
                    .write_end()
                    .map_err(|e| CamrecError::Finalization(e.to_string()))?;
                log::info!(
                    "[MUX] finalized {} with {} samples",
                    self.output_path.display(),
                    self.samples_written
                );
                Ok(())
            }
            None => Err(CamrecError::Finalization(
                "no samples were written".to_string(),
            )),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    // Minimal but structurally valid parameter sets (baseline profile).
    pub(crate) fn test_format() -> VideoFormat {
        VideoFormat {
            width: 120,
            height: 160,
            sps: vec![
                0x67, 0x42, 0xc0, 0x0c, 0xda, 0x0f, 0x0a, 0x69, 0xa8, 0x08, 0x08, 0x0a, 0x00,
                0x00, 0x03, 0x00, 0x02, 0x00, 0x00, 0x03, 0x00, 0x79, 0x08,
            ],
            pps: vec![0x68, 0xce, 0x3c, 0x80],
        }
    }

    fn sample_annex_b() -> Vec<u8> {
        let mut data = vec![0, 0, 0, 1];
        data.extend_from_slice(&[0x65, 0x88, 0x84, 0x00, 0x10]);
        data
    }

    #[test]
    fn test_write_before_start_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut muxer = Mp4Muxer::new(&dir.path().join("out.mp4"));
        assert!(muxer
            .write_sample(&sample_annex_b(), 0, 33_333, true)
            .is_err());
    }

    #[test]
    fn test_finalize_without_start_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut muxer = Mp4Muxer::new(&dir.path().join("out.mp4"));
        assert!(matches!(
            muxer.finalize(),
            Err(CamrecError::Finalization(_))
        ));
    }

    #[test]
    fn test_start_write_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mp4");
        let mut muxer = Mp4Muxer::new(&path);
        muxer.start(&test_format()).unwrap();
        assert!(muxer.is_started());

        for i in 0..5u64 {
            muxer
                .write_sample(&sample_annex_b(), i * 33_333, 33_333, i == 0)
                .unwrap();
        }
        assert_eq!(muxer.samples_written(), 5);
        muxer.finalize().unwrap();

        let metadata = std::fs::metadata(&path).unwrap();
        assert!(metadata.len() > 0);
    }

    #[test]
    fn test_double_start_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut muxer = Mp4Muxer::new(&dir.path().join("out.mp4"));
        muxer.start(&test_format()).unwrap();
        muxer.start(&test_format()).unwrap();
        muxer
            .write_sample(&sample_annex_b(), 0, 33_333, true)
            .unwrap();
        muxer.finalize().unwrap();
    }
}
