//! Aspect-correct letterbox math for the preview pass.

/// Viewport rectangle in target pixels, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
        }
    }

    pub fn aspect(&self) -> f32 {
        self.width / self.height
    }
}

/// Largest centered viewport inside `preview_w x preview_h` with the
/// recording's aspect ratio: bars appear top/bottom when the preview is
/// wider than the recording, left/right when it is taller.
pub fn letterbox(preview_w: u32, preview_h: u32, recording_w: u32, recording_h: u32) -> Viewport {
    if preview_w == 0 || preview_h == 0 || recording_w == 0 || recording_h == 0 {
        log::debug!("[RENDER] degenerate letterbox inputs, using full viewport");
        return Viewport::full(preview_w, preview_h);
    }
    let preview_ratio = preview_w as f32 / preview_h as f32;
    let recording_ratio = recording_w as f32 / recording_h as f32;

    if preview_ratio < recording_ratio {
        let width = preview_w as f32;
        let height = width / recording_ratio;
        Viewport {
            x: 0.0,
            y: (preview_h as f32 - height) / 2.0,
            width,
            height,
        }
    } else {
        let height = preview_h as f32;
        let width = height * recording_ratio;
        Viewport {
            x: (preview_w as f32 - width) / 2.0,
            y: 0.0,
            width,
            height,
        }
    }
}
