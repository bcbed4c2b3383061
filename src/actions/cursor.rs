//! Cursor affordance shown before element-bound effects
//!
//! The executor awaits the affordance before touching the document, so an
//! observer sees the pointer arrive before the state changes.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::core::Point;

/// Visual pointer indication
#[async_trait]
pub trait CursorAffordance: Send + Sync {
    /// Move the indicator to a client-space point
    async fn move_to(&self, point: Point);

    /// Play the click ripple at the current position
    async fn click_effect(&self);

    /// Short name for logs
    fn name(&self) -> &str;
}

/// Logs pointer movement and takes a fixed animation time
#[derive(Debug)]
pub struct VirtualCursor {
    animation: Duration,
    position: Mutex<Point>,
}

impl VirtualCursor {
    pub fn new(animation: Duration) -> Self {
        Self {
            animation,
            position: Mutex::new(Point::default()),
        }
    }

    pub fn position(&self) -> Point {
        *self.position.lock()
    }
}

#[async_trait]
impl CursorAffordance for VirtualCursor {
    async fn move_to(&self, point: Point) {
        let from = std::mem::replace(&mut *self.position.lock(), point);
        debug!(from_x = from.x, from_y = from.y, to_x = point.x, to_y = point.y, "cursor move");
        tokio::time::sleep(self.animation).await;
    }

    async fn click_effect(&self) {
        let at = self.position();
        debug!(x = at.x, y = at.y, "cursor click");
        tokio::time::sleep(self.animation / 2).await;
    }

    fn name(&self) -> &str {
        "virtual"
    }
}
