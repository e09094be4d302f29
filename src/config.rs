//! Recording configuration and shader sources.

use serde::{Deserialize, Serialize};

/// Hard cap on the output file size in bytes, minus a safety margin the
/// encoder needs to close the container under the cap.
pub const VIDEO_MAX_SIZE: u64 = 950_000;
pub const VIDEO_SIZE_COMPLEMENT: u64 = 5_000;

/// Recordings shorter than this are discarded by callers.
pub const MIN_REQUIRED_RECORDING_TIME_MILLIS: u64 = 1000;

pub const DEFAULT_PREVIEW_WIDTH: u32 = 360;
pub const DEFAULT_PREVIEW_HEIGHT: u32 = 480;

// qqVGA portrait, 3:4
pub const DEFAULT_RECORDING_WIDTH: u32 = 120;
pub const DEFAULT_RECORDING_HEIGHT: u32 = 160;

pub const DEFAULT_VIDEO_BITRATE: u32 = 500_000;
pub const DEFAULT_VIDEO_FRAME_RATE: u32 = 30;

/// Parameters for a recording session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    pub recording_width: u32,
    pub recording_height: u32,
    pub preview_width: u32,
    pub preview_height: u32,
    pub bitrate: u32,
    pub frame_rate: u32,
    /// Seconds between forced keyframes.
    pub i_frame_interval_secs: u32,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            recording_width: DEFAULT_RECORDING_WIDTH,
            recording_height: DEFAULT_RECORDING_HEIGHT,
            preview_width: DEFAULT_PREVIEW_WIDTH,
            preview_height: DEFAULT_PREVIEW_HEIGHT,
            bitrate: DEFAULT_VIDEO_BITRATE,
            frame_rate: DEFAULT_VIDEO_FRAME_RATE,
            i_frame_interval_secs: 1,
        }
    }
}

impl RecorderConfig {
    /// Nominal duration of one frame in microseconds.
    pub fn frame_duration_micros(&self) -> u64 {
        1_000_000 / self.frame_rate.max(1) as u64
    }
}

/// Fullscreen quad as a triangle strip: bottom-left, bottom-right, top-left,
/// top-right. Covers the whole viewport; texture coordinates are derived from
/// position in the vertex stage.
pub const FULLSCREEN_QUAD: [f32; 8] = [
    -1.0, -1.0, //
    1.0, -1.0, //
    -1.0, 1.0, //
    1.0, 1.0, //
];

/// Shared vertex stage: emits the quad and maps clip-space position into
/// [0,1] texture coordinates, transformed by the source texture matrix. The
/// y axis is negated in the derivation (clip space is y-up, texture space
/// y-down), so a passthrough draw preserves orientation. The matrix carries
/// the producer's orientation transform and, for bottom-up destinations, a
/// pre-multiplied vertical flip.
pub const TRANSFORM_VERTEX_SHADER: &str = r#"
struct Uniforms {
    tex_matrix: mat4x4<f32>,
};

@group(0) @binding(0) var<uniform> uniforms: Uniforms;
@group(0) @binding(1) var s_texture: texture_2d<f32>;
@group(0) @binding(2) var s_sampler: sampler;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) tex_coord: vec2<f32>,
};

@vertex
fn vs_main(@location(0) position: vec2<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.position = vec4<f32>(position, 0.0, 1.0);
    let u = (position.x + 1.0) / 2.0;
    let v = 1.0 - (position.y + 1.0) / 2.0;
    out.tex_coord = (uniforms.tex_matrix * vec4<f32>(u, v, 0.0, 1.0)).xy;
    return out;
}
"#;

/// Copies the source texture unmodified.
pub const PASSTHROUGH_FRAGMENT_SHADER: &str = r#"
@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(s_texture, s_sampler, in.tex_coord);
}
"#;

/// Horizontal mirror for front-facing cameras.
pub const MIRROR_FRAGMENT_SHADER: &str = r#"
@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let flipped = vec2<f32>(1.0 - in.tex_coord.x, in.tex_coord.y);
    return textureSample(s_texture, s_sampler, flipped);
}
"#;

/// Vignette: darkens radially from the center.
pub const VIGNETTE_FRAGMENT_SHADER: &str = r#"
@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let x = in.tex_coord.x * 2.0 - 1.0;
    let y = in.tex_coord.y * 2.0 - 1.0;
    let color = textureSample(s_texture, s_sampler, in.tex_coord);
    let r = sqrt(x * x + y * y);
    return color * (1.0 - r);
}
"#;

/// Column-major vertical flip: `y' = 1 - y` in texture space.
pub const FLIP_MATRIX: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, -1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 1.0, 0.0, 1.0, //
];

/// Column-major identity texture transform.
pub const IDENTITY_MATRIX: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0, //
];

/// Multiplies two column-major 4x4 matrices (`a * b`).
pub fn mat4_multiply(a: &[f32; 16], b: &[f32; 16]) -> [f32; 16] {
    let mut out = [0.0f32; 16];
    for col in 0..4 {
        for row in 0..4 {
            let mut sum = 0.0;
            for k in 0..4 {
                sum += a[k * 4 + row] * b[col * 4 + k];
            }
            out[col * 4 + row] = sum;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RecorderConfig::default();
        assert_eq!(config.recording_width, 120);
        assert_eq!(config.recording_height, 160);
        assert_eq!(config.frame_rate, 30);
        assert_eq!(config.frame_duration_micros(), 33_333);
    }

    #[test]
    fn test_identity_multiply() {
        let m = [
            2.0, 0.0, 0.0, 0.0, //
            0.0, 3.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.5, 0.25, 0.0, 1.0, //
        ];
        assert_eq!(mat4_multiply(&IDENTITY_MATRIX, &m), m);
        assert_eq!(mat4_multiply(&m, &IDENTITY_MATRIX), m);
    }

    #[test]
    fn test_flip_matrix_maps_texture_space() {
        // (x, y, 0, 1) -> (x, 1 - y, 0, 1)
        let v = [0.25f32, 0.75, 0.0, 1.0];
        let m = FLIP_MATRIX;
        let mut out = [0.0f32; 4];
        for row in 0..4 {
            out[row] = (0..4).map(|k| m[k * 4 + row] * v[k]).sum();
        }
        assert_eq!(out, [0.25, 0.25, 0.0, 1.0]);
    }

    #[test]
    fn test_config_serde_round_trip() {
        let config = RecorderConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: RecorderConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.bitrate, config.bitrate);
        assert_eq!(back.preview_width, config.preview_width);
    }
}
