use crate::ink::model::{Color, Rect, Stroke};
use crate::ink::viewport::ViewportTransformer;

const PAGE_NUMBER_PADDING: f32 = 20.0;
const PAGE_NUMBER_TEXT_SIZE: f32 = 40.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextAlign {
    Left,
    Right,
}

/// Lockable 2D canvas in view coordinates.
pub trait RenderSurface {
    fn size(&self) -> (f32, f32);
    /// Starts a frame. `dirty` limits drawing to a sub-rectangle; `None` is
    /// the full surface. Returns `false` when the surface is not ready.
    fn lock(&mut self, dirty: Option<Rect>) -> bool;
    fn fill_rect(&mut self, rect: Rect, color: Color);
    fn draw_polyline(&mut self, points: &[(f32, f32)], color: Color, width: f32);
    fn draw_text(&mut self, text: &str, x: f32, y: f32, size: f32, align: TextAlign, color: Color);
    fn unlock_and_present(&mut self);
}

/// Paints the strokes of one note that fall inside the visible window.
pub struct StrokeRenderer;

impl StrokeRenderer {
    /// Returns how many strokes were painted. `clip` is in page space.
    pub fn draw(
        surface: &mut dyn RenderSurface,
        viewport: &ViewportTransformer,
        strokes: &[Stroke],
        clip: Option<Rect>,
    ) -> usize {
        let zoom = viewport.zoom_scale();
        let mut painted = 0;
        let mut mapped = Vec::new();
        for stroke in strokes {
            if !viewport.is_rect_visible(&stroke.bounds) {
                continue;
            }
            if clip.is_some_and(|clip| !clip.intersects(&stroke.bounds)) {
                continue;
            }
            mapped.clear();
            mapped.extend(stroke.points.iter().map(|p| viewport.page_to_view(p.x, p.y)));
            if mapped.is_empty() {
                continue;
            }
            surface.draw_polyline(&mapped, stroke.color, stroke.width * zoom);
            painted += 1;
        }
        painted
    }
}

/// Paints page gaps and page numbers.
pub struct PageRenderer;

impl PageRenderer {
    pub fn draw(surface: &mut dyn RenderSurface, viewport: &ViewportTransformer) {
        let pagination = viewport.pagination();
        if !pagination.is_enabled() {
            return;
        }
        let visible = viewport.visible_page_rect();
        for zone in pagination.exclusion_zones_in_viewport(visible.top, visible.height()) {
            surface.fill_rect(viewport.page_rect_to_view(&zone), Color::LIGHT_BLUE);
        }

        let zoom = viewport.zoom_scale();
        let first = pagination.page_index_for_y(visible.top);
        let last = pagination.page_index_for_y(visible.bottom);
        for index in first..=last {
            let (right, top) = viewport.page_to_view(pagination.page_width(), pagination.page_top_y(index));
            let label = format!("Page {}", pagination.page_number(index));
            surface.draw_text(
                &label,
                right - PAGE_NUMBER_PADDING * zoom,
                top + (PAGE_NUMBER_PADDING + PAGE_NUMBER_TEXT_SIZE) * zoom,
                PAGE_NUMBER_TEXT_SIZE * zoom,
                TextAlign::Right,
                Color::GRAY,
            );
        }
    }
}

/// Draws one frame. `dirty` is the page-space area to repaint, `None` for
/// the whole surface. Returns `false` when the surface was not ready and the
/// frame was skipped.
pub fn render_frame(
    surface: &mut dyn RenderSurface,
    viewport: &ViewportTransformer,
    strokes: &[Stroke],
    dirty: Option<Rect>,
) -> bool {
    let view_dirty = dirty.map(|rect| viewport.page_rect_to_view(&rect));
    if !surface.lock(view_dirty) {
        tracing::debug!("render surface not ready, skipping frame");
        return false;
    }
    let (width, height) = surface.size();
    let background = view_dirty.unwrap_or(Rect::new(0.0, 0.0, width, height));
    surface.fill_rect(background, Color::WHITE);
    PageRenderer::draw(surface, viewport);
    let painted = StrokeRenderer::draw(surface, viewport, strokes, dirty);
    surface.unlock_and_present();
    tracing::trace!(painted, total = strokes.len(), partial = dirty.is_some(), "frame rendered");
    true
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    Lock(Option<Rect>),
    FillRect(Rect, Color),
    Polyline {
        points: Vec<(f32, f32)>,
        color: Color,
        width: f32,
    },
    Text {
        text: String,
        x: f32,
        y: f32,
        size: f32,
        align: TextAlign,
    },
    Present,
}

/// In-memory surface that records every draw call.
#[derive(Debug, Clone)]
pub struct RecordingSurface {
    width: f32,
    height: f32,
    ready: bool,
    commands: Vec<DrawCommand>,
}

impl RecordingSurface {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            ready: true,
            commands: Vec::new(),
        }
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<DrawCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn polyline_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, DrawCommand::Polyline { .. }))
            .count()
    }

    pub fn texts(&self) -> Vec<&str> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                DrawCommand::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl RenderSurface for RecordingSurface {
    fn size(&self) -> (f32, f32) {
        (self.width, self.height)
    }

    fn lock(&mut self, dirty: Option<Rect>) -> bool {
        if !self.ready {
            return false;
        }
        self.commands.push(DrawCommand::Lock(dirty));
        true
    }

    fn fill_rect(&mut self, rect: Rect, color: Color) {
        self.commands.push(DrawCommand::FillRect(rect, color));
    }

    fn draw_polyline(&mut self, points: &[(f32, f32)], color: Color, width: f32) {
        self.commands.push(DrawCommand::Polyline {
            points: points.to_vec(),
            color,
            width,
        });
    }

    fn draw_text(&mut self, text: &str, x: f32, y: f32, size: f32, align: TextAlign, _color: Color) {
        self.commands.push(DrawCommand::Text {
            text: text.to_string(),
            x,
            y,
            size,
            align,
        });
    }

    fn unlock_and_present(&mut self) {
        self.commands.push(DrawCommand::Present);
    }
}
