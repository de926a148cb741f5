use crate::ink::model::{Color, PenKind, Rect, Stroke, StrokePoint};
use crate::ink::viewport::ViewportTransformer;
use chrono::Utc;

/// Points closer than this (squared, page units) to the previous point are dropped.
const MIN_POINT_DIST_SQ: f32 = 0.25;

/// One digitizer sample in view coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPoint {
    pub x: f32,
    pub y: f32,
    pub pressure: f32,
    pub size: f32,
    pub tilt_x: i32,
    pub tilt_y: i32,
    pub timestamp_ms: i64,
}

impl RawPoint {
    pub fn at(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            pressure: 1.0,
            size: 1.0,
            tilt_x: 0,
            tilt_y: 0,
            timestamp_ms: Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PenStyle {
    pub pen: PenKind,
    pub color: Color,
    pub width: f32,
}

impl Default for PenStyle {
    fn default() -> Self {
        Self {
            pen: PenKind::default(),
            color: Color::BLACK,
            width: 3.0,
        }
    }
}

/// Accumulates one pen gesture into a page-space stroke.
#[derive(Debug, Clone)]
pub struct StrokeBuilder {
    note_id: String,
    style: PenStyle,
    created_scroll_y: f32,
    points: Vec<StrokePoint>,
}

impl StrokeBuilder {
    pub fn new(note_id: impl Into<String>, style: PenStyle, created_scroll_y: f32) -> Self {
        Self {
            note_id: note_id.into(),
            style,
            created_scroll_y,
            points: Vec::new(),
        }
    }

    /// Converts and appends a view-space point. Returns `false` if the point
    /// was dropped (inside an exclusion zone or too close to the last one).
    pub fn push(&mut self, viewport: &ViewportTransformer, raw: RawPoint) -> bool {
        let (x, y) = viewport.view_to_page(raw.x, raw.y);
        if viewport.is_point_excluded(x, y) {
            return false;
        }
        if !should_append_point(self.points.last(), x, y) {
            return false;
        }
        self.points.push(StrokePoint {
            x,
            y,
            pressure: raw.pressure,
            size: raw.size,
            tilt_x: raw.tilt_x,
            tilt_y: raw.tilt_y,
            timestamp_ms: raw.timestamp_ms,
            sequence: self.points.len() as u32,
        });
        true
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The finished stroke, or `None` when no point was accepted.
    pub fn finish(self) -> Option<Stroke> {
        let bounds = Rect::bounding(self.points.iter().map(|p| (p.x, p.y)))?.inflate(self.style.width);
        let now = Utc::now();
        Some(Stroke {
            id: uuid::Uuid::new_v4().to_string(),
            note_id: self.note_id,
            pen: self.style.pen,
            color: self.style.color,
            width: self.style.width,
            bounds,
            created_at: now,
            updated_at: now,
            created_scroll_y: self.created_scroll_y,
            points: self.points,
        })
    }
}

fn should_append_point(last: Option<&StrokePoint>, x: f32, y: f32) -> bool {
    let Some(last) = last else {
        return true;
    };
    let dx = x - last.x;
    let dy = y - last.y;
    dx * dx + dy * dy >= MIN_POINT_DIST_SQ
}

/// Events delivered by the raw digitizer session.
#[derive(Debug, Clone, PartialEq)]
pub enum DigitizerEvent {
    BeginStroke,
    StrokeMove(RawPoint),
    StrokeList(Vec<RawPoint>),
    EndStroke,
    BeginErase,
    EraseMove(RawPoint),
    EraseList(Vec<RawPoint>),
    EndErase,
}

/// Vendor pen session. Rects passed to `set_exclusion_zones` are in view space.
pub trait DigitizerDriver: Send {
    fn open(&mut self) -> anyhow::Result<()>;
    fn close(&mut self);
    fn set_enabled(&mut self, enabled: bool);
    fn set_exclusion_zones(&mut self, zones: &[Rect]);
}

/// What the coordinator should do in response to a digitizer event.
#[derive(Debug, Clone, PartialEq)]
pub enum InputAction {
    DrawingStarted,
    CommitStroke(Stroke),
    /// The gesture ended without any accepted point.
    StrokeAbandoned,
    Erase {
        note_id: String,
        path: Vec<(f32, f32)>,
    },
}

enum Gesture {
    Idle,
    Drawing(StrokeBuilder),
    Erasing(Vec<(f32, f32)>),
}

/// Turns raw digitizer events into stroke and erase commits for the open note.
pub struct InputRouter {
    driver: Box<dyn DigitizerDriver>,
    note_id: Option<String>,
    style: PenStyle,
    gesture: Gesture,
    is_open: bool,
}

impl InputRouter {
    pub fn new(driver: Box<dyn DigitizerDriver>) -> Self {
        Self {
            driver,
            note_id: None,
            style: PenStyle::default(),
            gesture: Gesture::Idle,
            is_open: false,
        }
    }

    pub fn open(&mut self, note_id: impl Into<String>, viewport: &ViewportTransformer) -> anyhow::Result<()> {
        if !self.is_open {
            self.driver.open()?;
            self.is_open = true;
        }
        self.note_id = Some(note_id.into());
        self.gesture = Gesture::Idle;
        self.sync_exclusions(viewport);
        self.driver.set_enabled(true);
        Ok(())
    }

    pub fn close(&mut self) {
        if self.is_open {
            self.driver.set_enabled(false);
            self.driver.close();
            self.is_open = false;
        }
        self.note_id = None;
        self.gesture = Gesture::Idle;
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if self.is_open {
            self.driver.set_enabled(enabled);
        }
    }

    pub fn set_style(&mut self, style: PenStyle) {
        self.style = style;
    }

    pub fn note_id(&self) -> Option<&str> {
        self.note_id.as_deref()
    }

    /// Pushes the visible exclusion zones to the driver, in view space.
    /// Call after every scroll, zoom or pagination change.
    pub fn sync_exclusions(&mut self, viewport: &ViewportTransformer) {
        if !self.is_open {
            return;
        }
        let zones: Vec<Rect> = viewport
            .exclusion_zones_in_viewport()
            .iter()
            .map(|zone| viewport.page_rect_to_view(zone))
            .collect();
        self.driver.set_exclusion_zones(&zones);
    }

    pub fn handle(&mut self, event: DigitizerEvent, viewport: &ViewportTransformer) -> Option<InputAction> {
        let note_id = self.note_id.clone()?;
        match event {
            DigitizerEvent::BeginStroke => {
                self.gesture = Gesture::Drawing(StrokeBuilder::new(note_id, self.style, viewport.scroll_y()));
                Some(InputAction::DrawingStarted)
            }
            DigitizerEvent::StrokeMove(point) => {
                if let Gesture::Drawing(builder) = &mut self.gesture {
                    builder.push(viewport, point);
                }
                None
            }
            DigitizerEvent::StrokeList(points) => {
                // The list carries the whole gesture and supersedes earlier moves.
                let mut builder = StrokeBuilder::new(note_id, self.style, viewport.scroll_y());
                for point in points {
                    builder.push(viewport, point);
                }
                self.gesture = Gesture::Drawing(builder);
                None
            }
            DigitizerEvent::EndStroke => match std::mem::replace(&mut self.gesture, Gesture::Idle) {
                Gesture::Drawing(builder) => Some(
                    builder
                        .finish()
                        .map(InputAction::CommitStroke)
                        .unwrap_or(InputAction::StrokeAbandoned),
                ),
                _ => None,
            },
            DigitizerEvent::BeginErase => {
                self.gesture = Gesture::Erasing(Vec::new());
                None
            }
            DigitizerEvent::EraseMove(point) => {
                if let Gesture::Erasing(path) = &mut self.gesture {
                    path.push(viewport.view_to_page(point.x, point.y));
                }
                None
            }
            DigitizerEvent::EraseList(points) => {
                self.gesture = Gesture::Erasing(
                    points
                        .iter()
                        .map(|p| viewport.view_to_page(p.x, p.y))
                        .collect(),
                );
                None
            }
            DigitizerEvent::EndErase => match std::mem::replace(&mut self.gesture, Gesture::Idle) {
                Gesture::Erasing(path) if !path.is_empty() => Some(InputAction::Erase { note_id, path }),
                _ => None,
            },
        }
    }
}

impl Drop for InputRouter {
    fn drop(&mut self) {
        self.close();
    }
}
