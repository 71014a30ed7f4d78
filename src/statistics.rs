//! # Session statistics plots
//!
//! Only built with the `statistics` feature.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::path::Path;
use std::time::Duration;

use plotters::prelude::*;

use crate::error::*;

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Draw the per-cycle render latency of a tuning session as a PNG line chart.
pub fn plot_latency<P: AsRef<Path>>(path: P, history: &[Duration]) -> Result<()> {
    let path = path.as_ref();
    let fail = |e: String| Error::export(path, e);

    let millis: Vec<(usize, f32)> = history
        .iter()
        .enumerate()
        .map(|(i, d)| (i, d.as_secs_f32() * 1000.0))
        .collect();
    let max_ms = millis.iter().map(|(_, ms)| *ms).fold(1.0f32, f32::max) * 1.1;

    let root = BitMapBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| fail(e.to_string()))?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Render latency", ("sans-serif", 20).into_font())
        .margin(5)
        .x_label_area_size(30)
        .y_label_area_size(40)
        .build_cartesian_2d(0..millis.len().max(1), 0f32..max_ms)
        .map_err(|e| fail(e.to_string()))?;

    chart
        .configure_mesh()
        .x_desc("Frame")
        .y_desc("Latency (ms)")
        .draw()
        .map_err(|e| fail(e.to_string()))?;

    chart
        .draw_series(LineSeries::new(millis, &RED))
        .map_err(|e| fail(e.to_string()))?
        .label("Cycle latency")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &RED));

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()
        .map_err(|e| fail(e.to_string()))?;

    root.present().map_err(|e| fail(e.to_string()))?;

    log::info!("Latency plot written to {}", path.display());
    Ok(())
}
