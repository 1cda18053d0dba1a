//! Vertex file loading and saving.
//!
//! Vertex files are JSON, in meters with Y up. Accepted layouts:
//!
//! - `[[x, y, z], ...]`
//! - `[[[x, y, z], ...]]` (a leading batch dimension of one)
//! - `{"verts": [[x, y, z], ...]}` (also `"vertices"`)

use std::path::Path;

use nalgebra::Point3;
use serde_json::Value;

use crate::error::{MeasureError, MeasureResult};
use crate::tracing_ext::{log_io_operation, log_vertex_stats};
use crate::types::VertexSet;

/// Load a vertex set from a JSON file.
pub fn load_vertices(path: impl AsRef<Path>) -> MeasureResult<VertexSet> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| {
        log_io_operation("load_vertices", path, false);
        MeasureError::io_read(path, e)
    })?;
    let value: Value =
        serde_json::from_str(&text).map_err(|e| MeasureError::parse_error(path, e.to_string()))?;
    let verts = vertices_from_json(&value).map_err(|e| match e {
        MeasureError::InvalidVertexData { row, details } => {
            MeasureError::parse_error(path, format!("row {}: {}", row, details))
        }
        other => other,
    })?;
    log_io_operation("load_vertices", path, true);
    log_vertex_stats(&verts, path);
    Ok(verts)
}

/// Save a vertex set as `{"verts": [[x, y, z], ...]}`.
pub fn save_vertices(verts: &VertexSet, path: impl AsRef<Path>) -> MeasureResult<()> {
    let path = path.as_ref();
    let body = serde_json::json!({ "verts": verts.to_rows() });
    let text = serde_json::to_string(&body)
        .map_err(|e| MeasureError::parse_error(path, e.to_string()))?;
    std::fs::write(path, text).map_err(|e| MeasureError::io_write(path, e))?;
    log_io_operation("save_vertices", path, true);
    Ok(())
}

/// Interpret a parsed JSON document as a vertex set.
pub fn vertices_from_json(value: &Value) -> MeasureResult<VertexSet> {
    let rows = match value {
        Value::Object(map) => map
            .get("verts")
            .or_else(|| map.get("vertices"))
            .ok_or_else(|| MeasureError::invalid_vertex(0, "object has no \"verts\" array"))?,
        other => other,
    };
    let rows = rows
        .as_array()
        .ok_or_else(|| MeasureError::invalid_vertex(0, "expected an array of rows"))?;

    // Unwrap a [1, N, 3] batch.
    let rows = match rows.as_slice() {
        [Value::Array(inner)] if inner.first().is_some_and(Value::is_array) => inner,
        _ => rows,
    };

    let mut verts = VertexSet::new();
    for (i, row) in rows.iter().enumerate() {
        let coords = row
            .as_array()
            .ok_or_else(|| MeasureError::invalid_vertex(i, "row is not an array"))?;
        if coords.len() != 3 {
            return Err(MeasureError::invalid_vertex(
                i,
                format!("expected 3 components, found {}", coords.len()),
            ));
        }
        let mut xyz = [0.0f32; 3];
        for (slot, c) in xyz.iter_mut().zip(coords) {
            *slot = c
                .as_f64()
                .ok_or_else(|| MeasureError::invalid_vertex(i, "component is not a number"))?
                as f32;
        }
        verts.push(Point3::new(xyz[0], xyz[1], xyz[2]));
    }
    Ok(verts)
}
