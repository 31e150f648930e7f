//! Print Export
//!
//! Builds a static, print-ready description of the chart from a snapshot.
//! Layout and drawing belong to whoever renders the document.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::aggregate;
use crate::domain::{DomainError, DomainResult, MarkerKind};
use crate::interaction::VisibleWindow;
use crate::store::PlanningState;
use crate::time;
use crate::tree;

/// Attachment key of the logo printed in the title block
pub const LOGO_ATTACHMENT: &str = "logo";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PaperSize {
    #[default]
    A4,
    A3,
    A2,
}

impl PaperSize {
    /// Portrait width and height in millimetres
    pub fn dimensions_mm(&self) -> (u32, u32) {
        match self {
            PaperSize::A4 => (210, 297),
            PaperSize::A3 => (297, 420),
            PaperSize::A2 => (420, 594),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Portrait,
    #[default]
    Landscape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeMode {
    /// First to last scheduled day
    #[default]
    Full,
    /// The window currently on screen
    Visible,
    Custom,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportOptions {
    pub paper: PaperSize,
    pub orientation: Orientation,
    pub range: RangeMode,
    pub custom_start: Option<NaiveDate>,
    pub custom_end: Option<NaiveDate>,
    /// Required for `RangeMode::Visible`
    pub visible: Option<VisibleWindow>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintBar {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub progress: u8,
    pub color: String,
    /// The bar continues before the printed range
    pub clipped_start: bool,
    /// The bar continues after the printed range
    pub clipped_end: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintRow {
    pub group_id: String,
    pub title: String,
    pub depth: usize,
    pub is_lot: bool,
    pub bar: Option<PrintBar>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintMarker {
    pub date: NaiveDate,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: MarkerKind,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintDocument {
    pub title: String,
    pub paper: PaperSize,
    pub orientation: Orientation,
    pub width_mm: u32,
    pub height_mm: u32,
    pub range_start: NaiveDate,
    pub range_end: NaiveDate,
    pub day_count: i64,
    pub rows: Vec<PrintRow>,
    pub markers: Vec<PrintMarker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
}

/// Resolve the printed date range (inclusive days)
fn resolve_range(state: &PlanningState, options: &ExportOptions) -> DomainResult<(NaiveDate, NaiveDate)> {
    let (start, end) = match options.range {
        RangeMode::Full => {
            let (start, end) = aggregate::schedule_extent(state)
                .ok_or_else(|| DomainError::InvalidInput("nothing is scheduled".into()))?;
            (time::ms_to_date(start), time::ms_to_date(end))
        }
        RangeMode::Visible => {
            let window = options
                .visible
                .ok_or_else(|| DomainError::InvalidInput("visible range requested without a window".into()))?;
            // The window end is exclusive
            (time::ms_to_date(window.start), time::ms_to_date(window.end - 1))
        }
        RangeMode::Custom => match (options.custom_start, options.custom_end) {
            (Some(start), Some(end)) => (start, end),
            _ => return Err(DomainError::InvalidInput("custom range needs a start and an end".into())),
        },
    };
    if end < start {
        return Err(DomainError::InvalidInput(format!("range ends {} before it starts {}", end, start)));
    }
    Ok((start, end))
}

/// Print representation of the visible rows of `state`
pub fn build_print_document(state: &PlanningState, options: &ExportOptions) -> DomainResult<PrintDocument> {
    let (range_start, range_end) = resolve_range(state, options)?;
    let (from, to) = time::day_span(range_start, range_end);

    let rows = tree::flatten_groups(&state.groups, &state.collapsed)
        .into_iter()
        .map(|(group, depth)| {
            let item = if group.is_lot() {
                state.header_of(&group.id)
            } else {
                group.task_id().and_then(|id| state.task_item(id))
            };
            let bar = item.filter(|i| i.end_time >= from && i.start_time <= to).map(|i| PrintBar {
                start: time::ms_to_date(i.start_time.max(from)),
                end: time::ms_to_date(i.end_time.min(to)),
                progress: if group.is_lot() { aggregate::lot_progress(state, &group.id) } else { i.progress },
                color: i.lot_color.clone(),
                clipped_start: i.start_time < from,
                clipped_end: i.end_time > to,
            });
            PrintRow {
                is_lot: group.is_lot(),
                group_id: group.id,
                title: group.title,
                depth,
                bar,
            }
        })
        .collect();

    let markers = state
        .markers
        .iter()
        .filter(|m| (from..=to).contains(&m.date))
        .map(|m| PrintMarker {
            date: time::ms_to_date(m.date),
            title: m.title.clone(),
            kind: m.kind,
            color: m.color.clone(),
        })
        .collect();

    let (short, long) = options.paper.dimensions_mm();
    let (width_mm, height_mm) = match options.orientation {
        Orientation::Portrait => (short, long),
        Orientation::Landscape => (long, short),
    };

    Ok(PrintDocument {
        title: options.title.clone().unwrap_or_else(|| "Planning".to_string()),
        paper: options.paper,
        orientation: options.orientation,
        width_mm,
        height_mm,
        range_start,
        range_end,
        day_count: (range_end - range_start).num_days() + 1,
        rows,
        markers,
        logo: state.attachments.get(LOGO_ATTACHMENT).cloned(),
    })
}
