//! Layout interface for `layoutView` and default placement of new objects
//!
//! Real auto-layout lives outside this crate and plugs in through
//! [`LayoutEngine`]. [`GridLayout`] is what ships by default.

use crate::model::{Bounds, ViewObject, VisualId, DEFAULT_HEIGHT, DEFAULT_WIDTH};
use thiserror::Error;

/// Default gap between objects, in pixels
pub const DEFAULT_SPACING: i32 = 40;

/// Margin between the top-left of the view and the first object
const MARGIN: i32 = 20;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("unsupported layout algorithm '{0}'")]
    UnsupportedAlgorithm(String),
}

/// Positions diagram objects
pub trait LayoutEngine: Send + Sync {
    /// New bounds for `objects`, all top-level objects of one view.
    /// Objects missing from the returned list keep their bounds.
    fn arrange(
        &self,
        algorithm: &str,
        objects: &[&ViewObject],
        spacing: i32,
    ) -> Result<Vec<(VisualId, Bounds)>, LayoutError>;

    /// Position for a new object when the caller gave none. `siblings` is
    /// the number of objects already sharing its parent.
    fn next_position(&self, siblings: usize) -> (i32, i32) {
        let columns = 5;
        let col = (siblings % columns) as i32;
        let row = (siblings / columns) as i32;
        (
            MARGIN + col * (DEFAULT_WIDTH + MARGIN),
            MARGIN + row * (DEFAULT_HEIGHT + MARGIN),
        )
    }
}

/// Row-major grid, ordered by the objects' current position
#[derive(Debug, Clone)]
pub struct GridLayout {
    columns: usize,
}

impl GridLayout {
    pub fn new(columns: usize) -> Self {
        Self {
            columns: columns.max(1),
        }
    }
}

impl Default for GridLayout {
    fn default() -> Self {
        Self::new(4)
    }
}

impl LayoutEngine for GridLayout {
    fn arrange(
        &self,
        algorithm: &str,
        objects: &[&ViewObject],
        spacing: i32,
    ) -> Result<Vec<(VisualId, Bounds)>, LayoutError> {
        if algorithm != "grid" {
            return Err(LayoutError::UnsupportedAlgorithm(algorithm.to_string()));
        }

        let mut ordered: Vec<&ViewObject> = objects.to_vec();
        ordered.sort_by(|a, b| {
            (a.bounds.y, a.bounds.x, a.id.as_str()).cmp(&(b.bounds.y, b.bounds.x, b.id.as_str()))
        });

        let cell_w = ordered.iter().map(|o| o.bounds.width).max().unwrap_or(DEFAULT_WIDTH);
        let cell_h = ordered.iter().map(|o| o.bounds.height).max().unwrap_or(DEFAULT_HEIGHT);

        Ok(ordered
            .iter()
            .enumerate()
            .map(|(i, obj)| {
                let col = (i % self.columns) as i32;
                let row = (i / self.columns) as i32;
                let bounds = Bounds::new(
                    MARGIN + col * (cell_w + spacing),
                    MARGIN + row * (cell_h + spacing),
                    obj.bounds.width,
                    obj.bounds.height,
                );
                (obj.id.clone(), bounds)
            })
            .collect())
    }
}
