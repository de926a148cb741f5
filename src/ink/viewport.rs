use crate::ink::model::Rect;
use crate::ink::pagination::{PaperSize, Pagination};
use crate::settings::InkSettings;

/// Distance from the document bottom at which an unpaginated document grows.
pub const BOTTOM_PADDING: f32 = 200.0;

const ZOOM_EPSILON: f32 = 0.001;

/// Maps between page space and view space and tracks what is visible.
///
/// `view = (page - scroll) * zoom`. Scroll offsets are in page units.
#[derive(Debug, Clone)]
pub struct ViewportTransformer {
    surface_width: f32,
    surface_height: f32,
    scroll_x: f32,
    scroll_y: f32,
    zoom: f32,
    min_zoom: f32,
    max_zoom: f32,
    document_height: f32,
    pagination: Pagination,
    extra_exclusions: Vec<Rect>,
}

impl ViewportTransformer {
    pub fn new(surface_width: f32, surface_height: f32) -> Self {
        Self::from_settings(surface_width, surface_height, &InkSettings::default())
    }

    pub fn from_settings(surface_width: f32, surface_height: f32, settings: &InkSettings) -> Self {
        let mut pagination = Pagination::new(surface_width, settings.paper_size, settings.exclusion_gap);
        pagination.set_enabled(settings.pagination_enabled);
        let mut viewport = Self {
            surface_width: surface_width.max(1.0),
            surface_height: surface_height.max(1.0),
            scroll_x: 0.0,
            scroll_y: 0.0,
            zoom: 1.0,
            min_zoom: settings.min_zoom.min(settings.max_zoom),
            max_zoom: settings.max_zoom.max(settings.min_zoom),
            document_height: 0.0,
            pagination,
            extra_exclusions: Vec::new(),
        };
        viewport.zoom = viewport.zoom.clamp(viewport.min_zoom, viewport.max_zoom);
        viewport.update_document_height(viewport.surface_height);
        viewport
    }

    pub fn scroll_x(&self) -> f32 {
        self.scroll_x
    }

    pub fn scroll_y(&self) -> f32 {
        self.scroll_y
    }

    pub fn zoom_scale(&self) -> f32 {
        self.zoom
    }

    pub fn surface_width(&self) -> f32 {
        self.surface_width
    }

    pub fn surface_height(&self) -> f32 {
        self.surface_height
    }

    pub fn document_height(&self) -> f32 {
        self.document_height
    }

    pub fn pagination(&self) -> &Pagination {
        &self.pagination
    }

    pub fn is_at_top(&self) -> bool {
        self.scroll_y <= 0.0
    }

    /// Scrolls by a view-space delta. Returns `false` when nothing moved.
    pub fn scroll(&mut self, dx: f32, dy: f32) -> bool {
        let next_y = self.scroll_y + dy / self.zoom;
        if next_y < 0.0 {
            if self.scroll_y > 0.0 {
                self.scroll_y = 0.0;
                return true;
            }
            return false;
        }
        let dx = if self.zoom > 1.0 { dx / self.zoom } else { 0.0 };
        let next_x = self.clamp_scroll_x(self.scroll_x + dx);
        let moved = next_x != self.scroll_x || next_y != self.scroll_y;
        self.extend_document_for(next_y);
        self.scroll_x = next_x;
        self.scroll_y = next_y;
        moved
    }

    /// Multiplies the zoom by `factor`, keeping the view point
    /// `(focus_x, focus_y)` over the same page point.
    pub fn zoom(&mut self, factor: f32, focus_x: f32, focus_y: f32) -> bool {
        if !factor.is_finite() || factor <= 0.0 {
            return false;
        }
        let target = (self.zoom * factor).clamp(self.min_zoom, self.max_zoom);
        if (target - self.zoom).abs() <= ZOOM_EPSILON {
            return false;
        }
        let (page_x, page_y) = self.view_to_page(focus_x, focus_y);
        self.zoom = target;
        self.scroll_x = self.clamp_scroll_x(page_x - focus_x / self.zoom);
        self.scroll_y = (page_y - focus_y / self.zoom).max(0.0);
        true
    }

    pub fn reset_zoom(&mut self) {
        self.zoom = 1.0_f32.clamp(self.min_zoom, self.max_zoom);
        self.scroll_x = self.clamp_scroll_x(0.0);
    }

    pub fn zoom_percentage(&self) -> String {
        format!("{}%", (self.zoom * 100.0).round() as i32)
    }

    /// Scrolls so that page y-position `y` sits in the middle of the view.
    pub fn scroll_to(&mut self, y: f32) {
        let visible_height = self.surface_height / self.zoom;
        let max_scroll = (self.document_height - visible_height).max(0.0);
        self.scroll_y = (y - visible_height / 2.0).clamp(0.0, max_scroll);
    }

    pub fn page_to_view(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.scroll_x) * self.zoom, (y - self.scroll_y) * self.zoom)
    }

    pub fn view_to_page(&self, x: f32, y: f32) -> (f32, f32) {
        (x / self.zoom + self.scroll_x, y / self.zoom + self.scroll_y)
    }

    pub fn page_rect_to_view(&self, rect: &Rect) -> Rect {
        let (left, top) = self.page_to_view(rect.left, rect.top);
        let (right, bottom) = self.page_to_view(rect.right, rect.bottom);
        Rect::new(left, top, right, bottom)
    }

    /// The page-space window currently on screen.
    pub fn visible_page_rect(&self) -> Rect {
        Rect::new(
            self.scroll_x,
            self.scroll_y,
            self.scroll_x + self.surface_width / self.zoom,
            self.scroll_y + self.surface_height / self.zoom,
        )
    }

    pub fn is_rect_visible(&self, rect: &Rect) -> bool {
        self.visible_page_rect().intersects(rect)
    }

    pub fn update_document_height(&mut self, height: f32) {
        self.document_height = height.max(self.surface_height);
        self.pagination.set_document_height(self.document_height);
    }

    pub fn set_surface_size(&mut self, width: f32, height: f32) {
        self.surface_width = width.max(1.0);
        self.surface_height = height.max(1.0);
        self.pagination.set_page_width(self.surface_width);
        self.scroll_x = self.clamp_scroll_x(self.scroll_x);
        self.update_document_height(self.document_height);
    }

    pub fn set_paper_size(&mut self, paper: PaperSize) {
        self.pagination.set_paper_size(paper);
    }

    pub fn set_pagination_enabled(&mut self, enabled: bool) {
        self.pagination.set_enabled(enabled);
        if enabled {
            let first_page = self.pagination.exclusion_zone_bottom_y(0);
            self.update_document_height(self.document_height.max(first_page));
        }
    }

    /// Regions besides the page gaps where input is never accepted.
    pub fn set_extra_exclusions(&mut self, zones: Vec<Rect>) {
        self.extra_exclusions = zones;
    }

    /// Page-space exclusion zones overlapping the visible window.
    pub fn exclusion_zones_in_viewport(&self) -> Vec<Rect> {
        let visible = self.visible_page_rect();
        let mut zones = self
            .pagination
            .exclusion_zones_in_viewport(visible.top, visible.height());
        zones.extend(
            self.extra_exclusions
                .iter()
                .filter(|zone| zone.intersects(&visible))
                .copied(),
        );
        zones
    }

    pub fn is_point_excluded(&self, x: f32, y: f32) -> bool {
        self.pagination.is_in_exclusion_zone(y)
            || self.extra_exclusions.iter().any(|zone| zone.contains(x, y))
    }

    fn clamp_scroll_x(&self, x: f32) -> f32 {
        if self.zoom <= 1.0 {
            return 0.0;
        }
        let max = (self.surface_width - self.surface_width / self.zoom).max(0.0);
        x.clamp(0.0, max)
    }

    /// Grows the document as the view approaches its bottom: one page at a
    /// time when paginated, by a fixed padding otherwise.
    fn extend_document_for(&mut self, scroll_y: f32) {
        let view_bottom = scroll_y + self.surface_height / self.zoom;
        if view_bottom <= self.document_height - BOTTOM_PADDING {
            return;
        }
        let grown = if self.pagination.is_enabled() {
            let index = self.pagination.page_index_for_y(view_bottom);
            self.pagination.page_bottom_y(index + 1)
        } else {
            view_bottom + BOTTOM_PADDING
        };
        if grown > self.document_height {
            tracing::debug!(from = self.document_height, to = grown, "document extended");
            self.update_document_height(grown);
        }
    }
}
