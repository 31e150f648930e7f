//! Pointer DragDrop Utilities
//!
//! Renderer-agnostic drag tracking fed with raw pointer coordinates.
//! Uses movement threshold to distinguish click from drag.

/// Movement threshold in pixels to start dragging
pub const DRAG_THRESHOLD_PX: f64 = 5.0;

/// Pointer position in viewport pixels
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Offset from `origin` to `self`
    pub fn delta_from(self, origin: Point) -> (f64, f64) {
        (self.x - origin.x, self.y - origin.y)
    }
}

/// Result of releasing the pointer
#[derive(Clone, Debug, PartialEq)]
pub enum DropOutcome<K> {
    /// Nothing was pressed
    Idle,
    /// Released before moving past the threshold
    Click(K),
    /// Drag released over a valid target, with the total offset
    Dropped { key: K, dx: f64, dy: f64 },
    /// Drag released outside any valid target
    Cancelled(K),
}

/// Drag state for one pointer
#[derive(Clone, Debug)]
pub struct DndState<K> {
    /// Pressed key (mousedown but maybe not yet dragging)
    pending: Option<K>,
    dragging: bool,
    /// Start position for movement detection
    start: Point,
    last: Point,
    threshold: f64,
}

impl<K: Clone> Default for DndState<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Clone> DndState<K> {
    pub fn new() -> Self {
        Self::with_threshold(DRAG_THRESHOLD_PX)
    }

    pub fn with_threshold(threshold: f64) -> Self {
        Self {
            pending: None,
            dragging: false,
            start: Point::default(),
            last: Point::default(),
            threshold,
        }
    }

    /// Record a pending drag with its start position
    pub fn press(&mut self, key: K, at: Point) {
        self.pending = Some(key);
        self.dragging = false;
        self.start = at;
        self.last = at;
    }

    /// Track movement; starts dragging once moved past the threshold.
    /// Returns the offset from the press position while dragging.
    pub fn motion(&mut self, at: Point) -> Option<(f64, f64)> {
        self.pending.as_ref()?;
        self.last = at;

        let (dx, dy) = at.delta_from(self.start);
        if !self.dragging && (dx.abs() > self.threshold || dy.abs() > self.threshold) {
            self.dragging = true;
        }
        self.dragging.then_some((dx, dy))
    }

    /// End the gesture. A drag only commits when released over a valid target.
    pub fn release(&mut self, at: Point, over_valid_target: bool) -> DropOutcome<K> {
        let Some(key) = self.pending.take() else {
            return DropOutcome::Idle;
        };
        let was_dragging = self.dragging;
        self.dragging = false;
        self.last = at;

        if !was_dragging {
            return DropOutcome::Click(key);
        }

        if over_valid_target {
            let (dx, dy) = at.delta_from(self.start);
            DropOutcome::Dropped { key, dx, dy }
        } else {
            DropOutcome::Cancelled(key)
        }
    }

    /// Abort whatever is pending, returning the key that was pressed
    pub fn cancel(&mut self) -> Option<K> {
        let key = self.pending.take();
        self.dragging = false;
        key
    }

    pub fn pending(&self) -> Option<&K> {
        self.pending.as_ref()
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    pub fn start(&self) -> Point {
        self.start
    }

    pub fn last(&self) -> Point {
        self.last
    }
}
