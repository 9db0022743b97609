//! Tracing helpers for mesh operations.
//!
//! Operations open a span and log their duration on completion. Set
//! `RUST_LOG=forge_mesh=debug` to see per-step detail, or
//! `RUST_LOG=forge_mesh::timing=info` for timings only.

use std::time::Instant;
use tracing::{Span, debug, info};

use crate::Mesh;

/// A performance timer that logs duration on drop.
///
/// ```rust,ignore
/// use forge_mesh::tracing_ext::OperationTimer;
///
/// fn expensive_operation() {
///     let _timer = OperationTimer::new("expensive_operation");
///     // ... do work ...
/// } // Timer logs duration when dropped
/// ```
pub struct OperationTimer {
    name: &'static str,
    start: Instant,
    span: Span,
}

impl OperationTimer {
    /// Create a new operation timer.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!("mesh_operation", operation = name);
        debug!(target: "forge_mesh::timing", operation = name, "Starting operation");
        Self {
            name,
            start: Instant::now(),
            span,
        }
    }

    /// Create a timer that also records the input size on its span.
    pub fn with_mesh(name: &'static str, mesh: &Mesh) -> Self {
        let span = tracing::info_span!(
            "mesh_operation",
            operation = name,
            faces = mesh.face_count(),
            vertices = mesh.vertex_count()
        );
        debug!(
            target: "forge_mesh::timing",
            operation = name,
            faces = mesh.face_count(),
            vertices = mesh.vertex_count(),
            "Starting operation"
        );
        Self {
            name,
            start: Instant::now(),
            span,
        }
    }

    /// Get the elapsed time.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Get the span for this timer.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        let _entered = self.span.enter();
        info!(
            target: "forge_mesh::timing",
            operation = self.name,
            elapsed_ms = format!("{:.2}", self.elapsed_ms()),
            "Operation completed"
        );
    }
}

/// Log mesh statistics at debug level.
pub fn log_mesh_stats(mesh: &Mesh, context: &str) {
    let (min, max) = mesh.bounds().unwrap_or_default();
    let extent = max - min;
    debug!(
        context,
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        has_uvs = mesh.has_uvs(),
        has_texture = mesh.texture.is_some(),
        extent_x = format!("{:.4}", extent.x),
        extent_y = format!("{:.4}", extent.y),
        extent_z = format!("{:.4}", extent.z),
        "Mesh statistics"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_elapsed_is_monotonic() {
        let timer = OperationTimer::new("test_op");
        let first = timer.elapsed_ms();
        let second = timer.elapsed_ms();
        assert!(second >= first);
        assert!(first >= 0.0);
    }

    #[test]
    fn test_log_empty_mesh_stats() {
        let mesh = Mesh::new();
        let _timer = OperationTimer::with_mesh("empty", &mesh);
        log_mesh_stats(&mesh, "empty");
    }
}
