use crate::ink::model::{Rect, Stroke};
use serde::{Deserialize, Serialize};

pub const DEFAULT_EXCLUSION_GAP: f32 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaperSize {
    #[default]
    Letter,
    A4,
}

impl PaperSize {
    pub fn height_to_width_ratio(self) -> f32 {
        match self {
            Self::Letter => 11.0 / 8.5,
            Self::A4 => 297.0 / 210.0,
        }
    }
}

/// Splits page space into fixed-height pages separated by exclusion gaps.
///
/// Page `i` spans `[i * unit, i * unit + page_height)` where
/// `unit = page_height + gap`; the gap below each page is an exclusion zone.
#[derive(Debug, Clone, PartialEq)]
pub struct Pagination {
    enabled: bool,
    paper: PaperSize,
    page_width: f32,
    page_height: f32,
    gap: f32,
    document_height: f32,
}

impl Pagination {
    pub fn new(page_width: f32, paper: PaperSize, gap: f32) -> Self {
        let mut pagination = Self {
            enabled: true,
            paper,
            page_width: 0.0,
            page_height: 0.0,
            gap: gap.max(0.0),
            document_height: 0.0,
        };
        pagination.set_page_width(page_width);
        pagination.document_height = pagination.page_height;
        pagination
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn paper_size(&self) -> PaperSize {
        self.paper
    }

    pub fn set_paper_size(&mut self, paper: PaperSize) {
        self.paper = paper;
        self.set_page_width(self.page_width);
    }

    pub fn set_page_width(&mut self, page_width: f32) {
        self.page_width = page_width.max(0.0);
        self.page_height = self.page_width * self.paper.height_to_width_ratio();
    }

    pub fn page_width(&self) -> f32 {
        self.page_width
    }

    pub fn page_height(&self) -> f32 {
        self.page_height
    }

    pub fn gap(&self) -> f32 {
        self.gap
    }

    /// Vertical distance from one page top to the next.
    pub fn page_unit(&self) -> f32 {
        self.page_height + self.gap
    }

    pub fn document_height(&self) -> f32 {
        self.document_height
    }

    pub fn set_document_height(&mut self, height: f32) {
        self.document_height = height.max(0.0);
    }

    pub fn page_index_for_y(&self, y: f32) -> usize {
        let unit = self.page_unit();
        if !self.enabled || y < 0.0 || unit <= 0.0 {
            return 0;
        }
        (y / unit).floor() as usize
    }

    pub fn page_top_y(&self, index: usize) -> f32 {
        if !self.enabled {
            return 0.0;
        }
        index as f32 * self.page_unit()
    }

    pub fn page_bottom_y(&self, index: usize) -> f32 {
        self.page_top_y(index) + self.page_height
    }

    pub fn exclusion_zone_top_y(&self, index: usize) -> f32 {
        self.page_bottom_y(index)
    }

    pub fn exclusion_zone_bottom_y(&self, index: usize) -> f32 {
        self.exclusion_zone_top_y(index) + self.gap
    }

    /// 1-based number shown for a page index.
    pub fn page_number(&self, index: usize) -> usize {
        index + 1
    }

    pub fn is_in_exclusion_zone(&self, y: f32) -> bool {
        if !self.enabled || self.gap <= 0.0 {
            return false;
        }
        let index = self.page_index_for_y(y);
        y >= self.exclusion_zone_top_y(index) && y < self.exclusion_zone_bottom_y(index)
    }

    /// Gap rectangles overlapping `[top, top + height]`, full page width.
    pub fn exclusion_zones_in_viewport(&self, top: f32, height: f32) -> Vec<Rect> {
        if !self.enabled || self.gap <= 0.0 || self.page_unit() <= 0.0 {
            return Vec::new();
        }
        let bottom = top + height;
        if !top.is_finite() || !bottom.is_finite() {
            return Vec::new();
        }
        let mut zones = Vec::new();
        let mut index = self.page_index_for_y(top);
        loop {
            let zone_top = self.exclusion_zone_top_y(index);
            if zone_top > bottom {
                break;
            }
            let zone_bottom = self.exclusion_zone_bottom_y(index);
            if zone_bottom >= top {
                zones.push(Rect::new(0.0, zone_top, self.page_width, zone_bottom));
            }
            index += 1;
        }
        zones
    }

    pub fn max_page_index(&self) -> usize {
        let unit = self.page_unit();
        if !self.enabled || unit <= 0.0 {
            return 0;
        }
        (self.document_height / unit) as usize
    }

    pub fn total_page_count(&self) -> usize {
        if !self.enabled {
            return 1;
        }
        self.max_page_index() + 1
    }

    /// Y position where a page inserted before `page_number` (1-based) begins,
    /// or `None` when the page number is outside the document.
    pub fn insertion_y(&self, page_number: usize) -> Option<f32> {
        if !self.enabled || page_number == 0 {
            return None;
        }
        let index = page_number - 1;
        (index <= self.max_page_index()).then(|| self.page_top_y(index))
    }

    /// Strokes whose vertical centre falls on the given page.
    pub fn strokes_on_page<'a>(&self, strokes: &'a [Stroke], index: usize) -> Vec<&'a Stroke> {
        if !self.enabled {
            return strokes.iter().collect();
        }
        let top = self.page_top_y(index);
        let bottom = self.page_bottom_y(index);
        strokes
            .iter()
            .filter(|stroke| {
                let centre = stroke.bounds.center_y();
                centre >= top && centre <= bottom
            })
            .collect()
    }
}
