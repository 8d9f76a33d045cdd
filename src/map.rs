//! Leaflet HTML map of sampled sensor rows colored by cluster

use std::fs;
use std::path::Path;

use anyhow::Context;
use ndarray::Array1;
use polars::prelude::DataFrame;
use serde::Serialize;
use tracing::info;

use crate::data::numeric_column;
use crate::model::sample_indices;

pub const LATITUDE_COLUMN: &str = "LATITUDE";
pub const LONGITUDE_COLUMN: &str = "LONGITUDE";

/// CSS color names matching the chart palette order
pub const MARKER_COLORS: [&str; 8] = [
    "red", "blue", "green", "orange", "purple", "brown", "pink", "gray",
];

const DEFAULT_ZOOM: u8 = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapMarker {
    pub lat: f64,
    pub lon: f64,
    pub cluster: usize,
    pub color: &'static str,
}

pub fn marker_color(cluster: usize) -> &'static str {
    MARKER_COLORS[cluster % MARKER_COLORS.len()]
}

/// True when the table carries both coordinate columns
pub fn has_coordinates(df: &DataFrame) -> bool {
    df.column(LATITUDE_COLUMN).is_ok() && df.column(LONGITUDE_COLUMN).is_ok()
}

/// Build markers for a seeded sample of at most `cap` rows
///
/// Rows whose coordinates are not finite are skipped.
pub fn build_markers(
    df: &DataFrame,
    labels: &Array1<usize>,
    cap: usize,
    seed: u64,
) -> crate::Result<Vec<MapMarker>> {
    if labels.len() != df.height() {
        anyhow::bail!(
            "Label count ({}) does not match row count ({})",
            labels.len(),
            df.height()
        );
    }
    let latitudes = numeric_column(df, LATITUDE_COLUMN)?;
    let longitudes = numeric_column(df, LONGITUDE_COLUMN)?;

    let markers = sample_indices(df.height(), cap, seed)
        .into_iter()
        .filter(|&row| latitudes[row].is_finite() && longitudes[row].is_finite())
        .map(|row| MapMarker {
            lat: latitudes[row],
            lon: longitudes[row],
            cluster: labels[row],
            color: marker_color(labels[row]),
        })
        .collect();
    Ok(markers)
}

const MAP_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8" />
<title>Traffic Clusters</title>
<meta name="viewport" content="width=device-width, initial-scale=1.0" />
<link rel="stylesheet" href="https://unpkg.com/leaflet@1.9.4/dist/leaflet.css" />
<script src="https://unpkg.com/leaflet@1.9.4/dist/leaflet.js"></script>
<style>html, body, #map { height: 100%; margin: 0; }</style>
</head>
<body>
<div id="map"></div>
<script>
var map = L.map('map').setView([{{CENTER_LAT}}, {{CENTER_LON}}], {{ZOOM}});
L.tileLayer('https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png', {
  maxZoom: 19,
  attribution: '&copy; OpenStreetMap contributors'
}).addTo(map);
var markers = {{MARKERS}};
markers.forEach(function (m) {
  L.circleMarker([m.lat, m.lon], {
    radius: 8,
    color: 'black',
    weight: 1,
    fillColor: m.color,
    fillOpacity: 0.7
  }).bindPopup('Cluster: ' + m.cluster).addTo(map);
});
</script>
</body>
</html>
"#;

/// Render a standalone HTML document centered on the mean marker coordinate
pub fn render_map_html(markers: &[MapMarker]) -> crate::Result<String> {
    if markers.is_empty() {
        anyhow::bail!("No markers with valid coordinates to place on the map");
    }
    let count = markers.len() as f64;
    let center_lat = markers.iter().map(|m| m.lat).sum::<f64>() / count;
    let center_lon = markers.iter().map(|m| m.lon).sum::<f64>() / count;
    let payload = serde_json::to_string(markers)?;

    Ok(MAP_TEMPLATE
        .replace("{{CENTER_LAT}}", &center_lat.to_string())
        .replace("{{CENTER_LON}}", &center_lon.to_string())
        .replace("{{ZOOM}}", &DEFAULT_ZOOM.to_string())
        .replace("{{MARKERS}}", &payload))
}

/// Sample rows, render the map and write it to `output_path`
pub fn write_traffic_map(
    df: &DataFrame,
    labels: &Array1<usize>,
    cap: usize,
    seed: u64,
    output_path: &Path,
) -> crate::Result<usize> {
    let markers = build_markers(df, labels, cap, seed)?;
    let html = render_map_html(&markers)?;
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(output_path, html)
        .with_context(|| format!("Failed to write map to {}", output_path.display()))?;
    info!(path = %output_path.display(), markers = markers.len(), "Traffic map saved");
    Ok(markers.len())
}
