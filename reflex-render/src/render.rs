use crate::scene::Scene;
use anyhow::{Context, Result, ensure};
use bytemuck::cast_slice;
use reflex_core::{ArrowDirection, Shape};
use reflex_timing::{Clock, HighPrecisionClock};
use std::collections::HashMap;
use std::time::Duration;
use tiny_skia::{
    Color, FillRule, Paint, PathBuilder, Pixmap, PremultipliedColorU8, Rect, Transform,
};

/// Opaque black, as one premultiplied RGBA pixel in memory order.
const CLEAR_PIXEL: u32 = u32::from_le_bytes([0, 0, 0, 255]);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameStats {
    pub clear: Duration,
    pub draw: Duration,
    pub copy: Duration,
    pub total: Duration,
    pub drawn: usize,
    pub dirty_count: usize,
}

/// Rasterizes `shape` into its own transparent pixmap, centred in its extent.
pub fn rasterize(shape: &Shape) -> Result<Pixmap> {
    let (width, height) = shape.extent();
    let mut pixmap = Pixmap::new(width.max(1), height.max(1))
        .with_context(|| format!("cannot allocate {width}x{height} pixmap"))?;
    let [r, g, b, a] = shape.color();
    let mut paint = Paint::default();
    paint.anti_alias = false;
    paint.set_color(Color::from_rgba8(r, g, b, a));

    match shape {
        Shape::Circle { radius, .. } => {
            let mut pb = PathBuilder::new();
            pb.push_circle(*radius, *radius, *radius);
            let path = pb.finish().context("degenerate circle")?;
            pixmap.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
        }
        Shape::Rectangle { width, height, .. } => {
            let rect = Rect::from_xywh(0.0, 0.0, *width, *height).context("degenerate rectangle")?;
            pixmap.fill_rect(rect, &paint, Transform::identity(), None);
        }
        Shape::Arrow {
            direction, size, ..
        } => {
            let mut pb = PathBuilder::new();
            let (cx, cy) = (*size, *size);
            let s = *size;
            let (tip, a, b) = match direction {
                ArrowDirection::Right => ((cx + s, cy), (cx, cy - s), (cx, cy + s)),
                ArrowDirection::Left => ((cx - s, cy), (cx, cy - s), (cx, cy + s)),
                ArrowDirection::Up => ((cx, cy - s), (cx - s, cy), (cx + s, cy)),
                ArrowDirection::Down => ((cx, cy + s), (cx - s, cy), (cx + s, cy)),
            };
            pb.move_to(tip.0, tip.1);
            pb.line_to(a.0, a.1);
            pb.line_to(b.0, b.1);
            pb.close();
            let path = pb.finish().context("degenerate arrow")?;
            pixmap.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
        }
        Shape::Fixation { size, .. } => {
            let thickness = (size / 20.0).max(2.0);
            let mid = (size - thickness) * 0.5;
            for bar in [
                Rect::from_xywh(0.0, mid, *size, thickness),
                Rect::from_xywh(mid, 0.0, thickness, *size),
            ] {
                let bar = bar.context("degenerate fixation cross")?;
                pixmap.fill_rect(bar, &paint, Transform::identity(), None);
            }
        }
    }
    Ok(pixmap)
}

/// Offscreen canvas that redraws only what changed since the last frame.
pub struct SkiaRenderer {
    width: u32,
    height: u32,
    canvas: Pixmap,
    shapes: HashMap<usize, (Shape, Pixmap)>,
    dirty_regions: Vec<Rect>,
    clear_buffer: Vec<u32>,
    first_frame: bool,
    last_revision: Option<u64>,
    clock: HighPrecisionClock,
}

impl SkiaRenderer {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let mut canvas = Pixmap::new(width, height)
            .with_context(|| format!("cannot allocate {width}x{height} canvas"))?;
        canvas.fill(Color::from_rgba8(0, 0, 0, 255));
        Ok(Self {
            width,
            height,
            canvas,
            shapes: HashMap::new(),
            dirty_regions: Vec::with_capacity(16),
            clear_buffer: vec![CLEAR_PIXEL; (width * height) as usize],
            first_frame: true,
            last_revision: None,
            clock: HighPrecisionClock::new(),
        })
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn canvas(&self) -> &Pixmap {
        &self.canvas
    }

    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        let mut canvas = Pixmap::new(width, height)
            .with_context(|| format!("cannot allocate {width}x{height} canvas"))?;
        canvas.fill(Color::from_rgba8(0, 0, 0, 255));
        self.canvas = canvas;
        self.width = width;
        self.height = height;
        self.clear_buffer = vec![CLEAR_PIXEL; (width * height) as usize];
        self.dirty_regions.clear();
        self.first_frame = true;
        Ok(())
    }

    /// Draws the visible items of `scene` into `frame_buffer` (RGBA, one row
    /// per canvas row). Frames where the scene did not change are skipped.
    pub fn render_frame(&mut self, scene: &Scene, frame_buffer: &mut [u8]) -> Result<FrameStats> {
        let expected = (self.width * self.height * 4) as usize;
        ensure!(
            frame_buffer.len() == expected,
            "frame buffer holds {} bytes, canvas needs {expected}",
            frame_buffer.len()
        );
        let started = self.clock.now();

        if self.first_frame {
            self.first_frame = false;
            self.canvas.fill(Color::from_rgba8(0, 0, 0, 255));
            frame_buffer.copy_from_slice(cast_slice(&self.clear_buffer));
            self.dirty_regions.clear();
        } else if self.last_revision == Some(scene.revision()) {
            return Ok(FrameStats::default());
        }
        self.last_revision = Some(scene.revision());

        let old_dirty = std::mem::take(&mut self.dirty_regions);
        let t = self.clock.now();
        self.clear_dirty(&old_dirty);
        let clear = self.clock.elapsed(t);

        let t = self.clock.now();
        let visible = scene.visible();
        for (index, shape, pos) in &visible {
            let stale = self.shapes.get(index).is_none_or(|(cached, _)| cached != shape);
            if stale {
                self.shapes.insert(*index, (shape.clone(), rasterize(shape)?));
            }
            if let Some((_, pixmap)) = self.shapes.get(index) {
                if let Some(rect) = blit(&mut self.canvas, pixmap, *pos) {
                    self.dirty_regions.push(rect);
                }
            }
        }
        let draw = self.clock.elapsed(t);

        let mut present = old_dirty;
        present.extend_from_slice(&self.dirty_regions);
        coalesce_dirty(&mut present);
        let t = self.clock.now();
        for rect in &present {
            self.copy_dirty_region(*rect, frame_buffer);
        }
        let copy = self.clock.elapsed(t);

        Ok(FrameStats {
            clear,
            draw,
            copy,
            total: self.clock.elapsed(started),
            drawn: visible.len(),
            dirty_count: self.dirty_regions.len(),
        })
    }

    fn pixel_bounds(&self, rect: &Rect) -> Option<(usize, usize, usize, usize)> {
        let x0 = rect.x().floor().max(0.0).min(self.width as f32) as usize;
        let y0 = rect.y().floor().max(0.0).min(self.height as f32) as usize;
        let x1 = (rect.x() + rect.width()).ceil().min(self.width as f32) as usize;
        let y1 = (rect.y() + rect.height()).ceil().min(self.height as f32) as usize;
        (x1 > x0 && y1 > y0).then_some((x0, y0, x1, y1))
    }

    fn clear_dirty(&mut self, dirty: &[Rect]) {
        let stride = self.width as usize * 4;
        let clear: &[u8] = cast_slice(&self.clear_buffer);
        for rect in dirty {
            let Some((x0, y0, x1, y1)) = self.pixel_bounds(rect) else {
                continue;
            };
            let row_len = (x1 - x0) * 4;
            let canvas = self.canvas.data_mut();
            for y in y0..y1 {
                let off = y * stride + x0 * 4;
                canvas[off..off + row_len].copy_from_slice(&clear[off..off + row_len]);
            }
        }
    }

    fn copy_dirty_region(&self, dirty: Rect, frame_buffer: &mut [u8]) {
        let Some((x0, y0, x1, y1)) = self.pixel_bounds(&dirty) else {
            return;
        };
        let bytes = (x1 - x0) * 4;
        let row_bytes = self.width as usize * 4;
        let canvas = self.canvas.data();
        for row in y0..y1 {
            let off = row * row_bytes + x0 * 4;
            frame_buffer[off..off + bytes].copy_from_slice(&canvas[off..off + bytes]);
        }
    }
}

fn coalesce_dirty(rects: &mut Vec<Rect>) {
    rects.sort_by(|a, b| a.y().total_cmp(&b.y()).then(a.x().total_cmp(&b.x())));
    let mut out: Vec<Rect> = Vec::with_capacity(rects.len());
    for r in rects.drain(..) {
        if let Some(last) = out.last_mut() {
            let same_row =
                (r.y() - last.y()).abs() < 1.0 && (r.height() - last.height()).abs() < 1.0;
            let touching = r.x() <= last.x() + last.width() + 1.0;
            if same_row && touching {
                let nx = last.x().min(r.x());
                let nx2 = (last.x() + last.width()).max(r.x() + r.width());
                if let Some(merged) = Rect::from_xywh(nx, last.y(), nx2 - nx, last.height()) {
                    *last = merged;
                    continue;
                }
            }
        }
        out.push(r);
    }
    *rects = out;
}

/// Composites `src` centred on `pos` over `canvas` and returns the touched
/// area, or `None` when it falls entirely off-canvas.
fn blit(canvas: &mut Pixmap, src: &Pixmap, pos: (f32, f32)) -> Option<Rect> {
    let (w, h) = (src.width() as i32, src.height() as i32);
    let (cw, ch) = (canvas.width() as i32, canvas.height() as i32);
    let x0 = (pos.0 - w as f32 * 0.5).floor() as i32;
    let y0 = (pos.1 - h as f32 * 0.5).floor() as i32;

    let dst_x = x0.max(0);
    let dst_y = y0.max(0);
    let copy_w = (x0 + w).min(cw) - dst_x;
    let copy_h = (y0 + h).min(ch) - dst_y;
    if copy_w <= 0 || copy_h <= 0 {
        return None;
    }
    let (src_x, src_y) = ((dst_x - x0) as usize, (dst_y - y0) as usize);
    let (dst_x, dst_y) = (dst_x as usize, dst_y as usize);
    let (copy_w, copy_h) = (copy_w as usize, copy_h as usize);
    let (src_stride, dst_stride) = (w as usize, cw as usize);

    let src_px = src.pixels();
    let dst_px = canvas.pixels_mut();
    let opaque = (0..copy_h).all(|row| {
        let start = (src_y + row) * src_stride + src_x;
        src_px[start..start + copy_w].iter().all(|p| p.alpha() == 255)
    });

    for row in 0..copy_h {
        let s = (src_y + row) * src_stride + src_x;
        let d = (dst_y + row) * dst_stride + dst_x;
        let (src_row, dst_row) = (&src_px[s..s + copy_w], &mut dst_px[d..d + copy_w]);
        if opaque {
            dst_row.copy_from_slice(src_row);
            continue;
        }
        for (dst, src) in dst_row.iter_mut().zip(src_row) {
            *dst = over(*src, *dst);
        }
    }
    Rect::from_xywh(dst_x as f32, dst_y as f32, copy_w as f32, copy_h as f32)
}

/// Porter-Duff source-over in premultiplied space.
fn over(src: PremultipliedColorU8, dst: PremultipliedColorU8) -> PremultipliedColorU8 {
    let inv = 255 - src.alpha() as u32;
    let mix = |s: u8, d: u8| (s as u32 + (d as u32 * inv + 127) / 255).min(255) as u8;
    PremultipliedColorU8::from_rgba(
        mix(src.red(), dst.red()),
        mix(src.green(), dst.green()),
        mix(src.blue(), dst.blue()),
        mix(src.alpha(), dst.alpha()),
    )
    .unwrap_or(dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflex_core::VisualHandle;

    const W: u32 = 64;
    const H: u32 = 48;

    fn pixel(buf: &[u8], x: u32, y: u32) -> [u8; 4] {
        let i = ((y * W + x) * 4) as usize;
        [buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]
    }

    #[test]
    fn rasterized_shapes_fill_their_extent() {
        let rect = rasterize(&Shape::Rectangle {
            width: 10.0,
            height: 6.0,
            color: [0, 255, 0, 255],
        })
        .unwrap();
        assert_eq!((rect.width(), rect.height()), (10, 6));
        assert!(rect.pixels().iter().all(|p| p.alpha() == 255));

        let cross = rasterize(&Shape::Fixation {
            size: 40.0,
            color: [255; 4],
        })
        .unwrap();
        assert_eq!(cross.pixel(20, 0).map(|p| p.alpha()), Some(255));
        assert_eq!(cross.pixel(0, 0).map(|p| p.alpha()), Some(0));
    }

    #[test]
    fn shown_shape_reaches_frame_buffer_and_hiding_clears_it() {
        let scene = Scene::new();
        let mut handle = scene.add(
            Shape::Rectangle {
                width: 8.0,
                height: 8.0,
                color: [255, 0, 0, 255],
            },
            (32.0, 24.0),
        );
        let mut renderer = SkiaRenderer::new(W, H).unwrap();
        let mut fb = vec![0u8; (W * H * 4) as usize];

        renderer.render_frame(&scene, &mut fb).unwrap();
        assert_eq!(pixel(&fb, 32, 24), [0, 0, 0, 255]);

        handle.show();
        let stats = renderer.render_frame(&scene, &mut fb).unwrap();
        assert_eq!(stats.drawn, 1);
        assert_eq!(pixel(&fb, 32, 24), [255, 0, 0, 255]);
        assert_eq!(pixel(&fb, 2, 2), [0, 0, 0, 255]);

        handle.hide();
        renderer.render_frame(&scene, &mut fb).unwrap();
        assert_eq!(pixel(&fb, 32, 24), [0, 0, 0, 255]);
    }

    #[test]
    fn shapes_partly_off_canvas_are_clipped() {
        let scene = Scene::new();
        let mut handle = scene.add(
            Shape::Circle {
                radius: 10.0,
                color: [0, 0, 255, 255],
            },
            (0.0, 0.0),
        );
        handle.show();
        let mut renderer = SkiaRenderer::new(W, H).unwrap();
        let mut fb = vec![0u8; (W * H * 4) as usize];
        renderer.render_frame(&scene, &mut fb).unwrap();
        assert_eq!(pixel(&fb, 1, 1)[2], 255);
    }

    #[test]
    fn wrong_buffer_size_is_an_error() {
        let mut renderer = SkiaRenderer::new(W, H).unwrap();
        let mut fb = vec![0u8; 16];
        assert!(renderer.render_frame(&Scene::new(), &mut fb).is_err());
    }

    #[test]
    fn adjacent_dirty_rects_merge() {
        let mut rects = vec![
            Rect::from_xywh(10.0, 0.0, 5.0, 5.0).unwrap(),
            Rect::from_xywh(0.0, 0.0, 10.0, 5.0).unwrap(),
            Rect::from_xywh(0.0, 20.0, 4.0, 4.0).unwrap(),
        ];
        coalesce_dirty(&mut rects);
        assert_eq!(rects.len(), 2);
        assert_eq!(rects[0].width(), 15.0);
    }
}
