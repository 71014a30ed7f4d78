//! # Interactive parameter tuner
//!
//! The tuner is a state machine stepping through
//!
//! ```text
//! Idle -> Rendering -> ParameterChanged -> Rendering
//!                   -> CaptureRequested -> Exporting -> Terminated
//!                   -> Cancelled -> Terminated
//! ```
//!
//! Each `Rendering` step pulls one frame, runs it through the pipeline and shows the result,
//! then blocks on the frontend for at most one tick. All session state is held in a
//! [`TunerState`] owned by the [`Tuner`], so independent sessions never share anything.
//!
//! The frame source and the frontend are released when the tuner is dropped, which covers
//! normal termination, fatal errors and failed start up alike.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use image::RgbImage;

use crate::disparity::DisparityMap;
use crate::error::*;
use crate::frame::FrameSource;
use crate::frontend::{Frontend, TunerEvent};
use crate::mask::ValidityMask;
use crate::pipeline::{ExportConfig, ExportSummary, ProcessedFrame, StereoPipeline};
use crate::settings::MatcherSettings;
use crate::visualize::{concat_horizontal, concat_vertical, visualize_with};

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Default per-pixel standard deviation above which smoothed disparities are discarded.
pub const DEFAULT_ACCEPTED_DEVIATION: f32 = 10.0;

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Rendering,
    ParameterChanged,
    CaptureRequested,
    Exporting,
    Cancelled,
    Terminated
}

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Options of a tuning session.
#[derive(Debug, Clone)]
pub struct TunerConfig {
    /// Number of cycles averaged into the frame rate estimate.
    pub latency_window: usize,
    /// Number of disparity maps averaged into the smoothed view. 1 disables smoothing.
    pub smoothing_window: usize,
    pub accepted_deviation: f32,
    /// Show the rectified left and right images either side of the disparity.
    pub show_sources: bool,
    /// Longest time the tuner waits for an event between cycles.
    pub tick: Duration,
    pub export: ExportConfig,
    /// Where the final parameters are saved on termination.
    pub settings_out: Option<PathBuf>,
    /// Where the latency history chart is drawn on termination.
    #[cfg(feature = "statistics")]
    pub latency_plot: Option<PathBuf>
}

/// Sliding frame rate estimate over the last few render cycles.
#[derive(Debug, Clone)]
pub struct LatencyTracker {
    window: usize,
    recent: VecDeque<Duration>,
    history: Vec<Duration>
}

/// Running mean of the last few disparity maps.
#[derive(Debug, Clone)]
pub struct DisparitySmoother {
    window: usize,
    accepted_deviation: f32,
    maps: VecDeque<DisparityMap>
}

/// The parameter values of every rendered cycle, starting with the session defaults.
#[derive(Debug, Clone, Default)]
pub struct SettingsHistory {
    entries: Vec<MatcherSettings>
}

/// Mutable state of one tuning session.
#[derive(Debug)]
pub struct TunerState {
    phase: Phase,
    pending: Option<TunerEvent>,
    current: Option<ProcessedFrame>,
    smoothed: Option<(DisparityMap, ValidityMask)>,
    display: Option<RgbImage>,
    latency: LatencyTracker,
    smoother: DisparitySmoother,
    history: SettingsHistory,
    selected: usize,
    shortest_dimension: Option<u32>,
    frames_rendered: usize,
    starved_polls: usize,
    rejected_changes: usize,
    export: Option<Result<ExportSummary>>
}

/// Outcome of a finished session.
#[derive(Debug)]
pub struct TuningReport {
    /// Final value of every tunable parameter.
    pub parameters: Vec<(String, i32)>,
    pub frames_rendered: usize,
    pub fps: Option<f32>,
    /// Present if a capture was requested.
    pub export: Option<Result<ExportSummary>>,
    /// Present if a settings output path was configured.
    pub settings: Option<Result<PathBuf>>,
    pub history: SettingsHistory
}

pub struct Tuner {
    pipeline: StereoPipeline,
    source: Box<dyn FrameSource>,
    frontend: Box<dyn Frontend>,
    config: TunerConfig,
    state: TunerState,
    released: bool
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            latency_window: 1,
            smoothing_window: 1,
            accepted_deviation: DEFAULT_ACCEPTED_DEVIATION,
            show_sources: false,
            tick: Duration::from_millis(30),
            export: ExportConfig::default(),
            settings_out: None,
            #[cfg(feature = "statistics")]
            latency_plot: None
        }
    }
}

impl TunerConfig {
    pub fn with_latency_window(mut self, window: usize) -> Self {
        self.latency_window = window;
        self
    }

    pub fn with_smoothing(mut self, window: usize, accepted_deviation: f32) -> Self {
        self.smoothing_window = window;
        self.accepted_deviation = accepted_deviation;
        self
    }

    pub fn with_show_sources(mut self, show: bool) -> Self {
        self.show_sources = show;
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn with_export(mut self, export: ExportConfig) -> Self {
        self.export = export;
        self
    }

    pub fn with_settings_out(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings_out = Some(path.into());
        self
    }

    #[cfg(feature = "statistics")]
    pub fn with_latency_plot(mut self, path: impl Into<PathBuf>) -> Self {
        self.latency_plot = Some(path.into());
        self
    }

    fn validate(&self) -> Result<()> {
        if self.latency_window == 0 {
            return Err(Error::invalid_parameter("latency_window", "must be at least 1"));
        }
        if self.smoothing_window == 0 {
            return Err(Error::invalid_parameter("smoothing_window", "must be at least 1"));
        }
        if !(self.accepted_deviation.is_finite() && self.accepted_deviation > 0.0) {
            return Err(Error::invalid_parameter(
                "accepted_deviation",
                format!("{} is not a positive deviation", self.accepted_deviation)
            ));
        }
        Ok(())
    }
}

impl LatencyTracker {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            recent: VecDeque::with_capacity(window.max(1)),
            history: Vec::new()
        }
    }

    pub fn record(&mut self, latency: Duration) {
        if self.recent.len() == self.window {
            self.recent.pop_front();
        }
        self.recent.push_back(latency);
        self.history.push(latency);
    }

    /// Mean latency over the window.
    pub fn smoothed(&self) -> Option<Duration> {
        if self.recent.is_empty() {
            return None;
        }
        Some(self.recent.iter().sum::<Duration>() / self.recent.len() as u32)
    }

    /// Frames per second implied by the smoothed latency.
    pub fn fps(&self) -> Option<f32> {
        self.smoothed()
            .map(|d| d.as_secs_f32())
            .filter(|s| *s > 0.0)
            .map(|s| 1.0 / s)
    }

    /// Every recorded latency, oldest first.
    pub fn history(&self) -> &[Duration] {
        &self.history
    }
}

impl DisparitySmoother {
    pub fn new(window: usize, accepted_deviation: f32) -> Self {
        Self {
            window: window.max(1),
            accepted_deviation,
            maps: VecDeque::new()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.window > 1
    }

    pub fn clear(&mut self) {
        self.maps.clear();
    }

    /// Add a map and return the smoothed map with its validity.
    ///
    /// Returns `None` while smoothing is disabled. Maps of a different size or search range
    /// restart the window.
    pub fn push(&mut self, map: &DisparityMap) -> Option<(DisparityMap, ValidityMask)> {
        if !self.is_enabled() {
            return None;
        }

        let compatible = self.maps.front().map_or(true, |first| {
            (first.width(), first.height(), first.min_disparity(), first.num_disparities())
                == (map.width(), map.height(), map.min_disparity(), map.num_disparities())
        });
        if !compatible {
            self.maps.clear();
        }
        if self.maps.len() == self.window {
            self.maps.pop_front();
        }
        self.maps.push_back(map.clone());

        self.smooth()
    }

    fn smooth(&self) -> Option<(DisparityMap, ValidityMask)> {
        let first = self.maps.front()?;
        let (width, height) = (first.width(), first.height());
        let invalid = first.invalid_value();
        let n = self.maps.len() as f32;

        let mut mask = ValidityMask::filled(width, height, true);
        for map in &self.maps {
            mask.intersect(&ValidityMask::display(map));
        }

        let mut values = vec![invalid; width * height];
        for (i, value) in values.iter_mut().enumerate() {
            let (x, y) = (i % width, i / width);
            if !mask.get(x, y) {
                continue;
            }

            let mean = self.maps.iter().map(|m| m.values()[i]).sum::<f32>() / n;
            let variance = self.maps.iter().map(|m| (m.values()[i] - mean).powi(2)).sum::<f32>() / n;

            if variance.sqrt() < self.accepted_deviation {
                *value = mean;
            } else {
                mask.set(x, y, false);
            }
        }

        let map = DisparityMap::from_vec(
            width,
            height,
            first.min_disparity(),
            first.num_disparities(),
            values
        )
        .ok()?;

        Some((map, mask))
    }
}

impl SettingsHistory {
    pub fn record(&mut self, settings: MatcherSettings) {
        self.entries.push(settings);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[MatcherSettings] {
        &self.entries
    }

    /// Values chosen for a parameter with how often each was rendered, most frequent first.
    ///
    /// The first entry holds the session defaults and is not counted.
    pub fn report(&self, name: &str) -> Vec<(i32, usize)> {
        let mut counts: BTreeMap<i32, usize> = BTreeMap::new();
        for value in self.entries.iter().skip(1).filter_map(|s| s.get(name)) {
            *counts.entry(value).or_default() += 1;
        }

        let mut table: Vec<(i32, usize)> = counts.into_iter().collect();
        table.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        table
    }
}

impl TunerState {
    fn new(config: &TunerConfig) -> Self {
        Self {
            phase: Phase::Idle,
            pending: None,
            current: None,
            smoothed: None,
            display: None,
            latency: LatencyTracker::new(config.latency_window),
            smoother: DisparitySmoother::new(config.smoothing_window, config.accepted_deviation),
            history: SettingsHistory::default(),
            selected: 0,
            shortest_dimension: None,
            frames_rendered: 0,
            starved_polls: 0,
            rejected_changes: 0,
            export: None
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The last rendered frame.
    pub fn current(&self) -> Option<&ProcessedFrame> {
        self.current.as_ref()
    }

    /// The smoothed disparity of the last rendered frame, if smoothing is enabled.
    pub fn smoothed(&self) -> Option<&(DisparityMap, ValidityMask)> {
        self.smoothed.as_ref()
    }

    /// The last image given to the frontend.
    pub fn display(&self) -> Option<&RgbImage> {
        self.display.as_ref()
    }

    pub fn latency(&self) -> &LatencyTracker {
        &self.latency
    }

    pub fn history(&self) -> &SettingsHistory {
        &self.history
    }

    /// Index of the parameter stepped by `Step` events.
    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn frames_rendered(&self) -> usize {
        self.frames_rendered
    }

    pub fn starved_polls(&self) -> usize {
        self.starved_polls
    }

    pub fn rejected_changes(&self) -> usize {
        self.rejected_changes
    }

    pub fn export(&self) -> Option<&Result<ExportSummary>> {
        self.export.as_ref()
    }
}

impl Tuner {
    /// Start a session. Configuration problems are reported here, before anything is rendered,
    /// and release the source and frontend.
    pub fn new(
        pipeline: StereoPipeline,
        source: Box<dyn FrameSource>,
        frontend: Box<dyn Frontend>,
        config: TunerConfig
    ) -> Result<Self> {
        let state = TunerState::new(&config);
        let mut tuner = Self {
            pipeline,
            source,
            frontend,
            config,
            state,
            released: false
        };

        tuner.config.validate()?;
        for spec in tuner.pipeline.matcher().parameters() {
            if let Some(maximum) = spec.maximum {
                spec.check(spec.value, maximum)?;
            }
        }

        let defaults = MatcherSettings::from_matcher(tuner.pipeline.matcher());
        tuner.state.history.record(defaults);

        log::info!("Tuning session started on {}", tuner.source.device());
        Ok(tuner)
    }

    pub fn state(&self) -> &TunerState {
        &self.state
    }

    pub fn pipeline(&self) -> &StereoPipeline {
        &self.pipeline
    }

    /// Take one transition of the state machine and return the new phase.
    ///
    /// Errors are fatal to the session. Stepping a terminated tuner does nothing.
    pub fn step(&mut self) -> Result<Phase> {
        let next = match self.state.phase {
            Phase::Idle => Phase::Rendering,
            Phase::Rendering => self.render()?,
            Phase::ParameterChanged => {
                if let Some(event) = self.state.pending.take() {
                    self.apply(event);
                }
                Phase::Rendering
            }
            Phase::CaptureRequested => Phase::Exporting,
            Phase::Exporting => {
                let result = self.export();
                if let Err(e) = &result {
                    log::error!("Capture failed: {}", e);
                }
                self.state.export = Some(result);
                Phase::Terminated
            }
            Phase::Cancelled => {
                log::info!("Tuning session cancelled");
                Phase::Terminated
            }
            Phase::Terminated => Phase::Terminated
        };

        self.state.phase = next;
        Ok(next)
    }

    /// Step until the session terminates, then report and persist the final parameters.
    pub fn run(mut self) -> Result<TuningReport> {
        while self.step()? != Phase::Terminated {}
        Ok(self.finish())
    }

    fn render(&mut self) -> Result<Phase> {
        let started = Instant::now();

        let frame = match self.source.get_frame_pair()? {
            Some(frame) => frame,
            None => {
                self.state.starved_polls += 1;
                log::trace!("No frame ready from {}", self.source.device());
                return self.wait();
            }
        };

        let processed = self.pipeline.process(&frame)?;
        let (width, height) = processed.pair.dimensions();
        self.state.shortest_dimension = Some(width.min(height));

        self.state.smoothed = self.state.smoother.push(&processed.disparity);
        let mut display = processed.color.clone();
        if let Some((map, mask)) = &self.state.smoothed {
            let smoothed = visualize_with(map, map.min_disparity(), map.num_disparities(), mask)?;
            display = concat_vertical(&[&display, &smoothed]);
        }
        if self.config.show_sources {
            display = concat_horizontal(&[&processed.pair.left, &display, &processed.pair.right]);
        }

        self.frontend.show(&display)?;
        self.state.display = Some(display);
        self.state.current = Some(processed);

        self.state.latency.record(started.elapsed());
        self.state.frames_rendered += 1;
        self.state
            .history
            .record(MatcherSettings::from_matcher(self.pipeline.matcher()));

        log::debug!(
            "Rendered frame {} in {:?} ({:.1} fps)",
            self.state.frames_rendered,
            started.elapsed(),
            self.state.latency.fps().unwrap_or(0.0)
        );

        self.wait()
    }

    /// The only suspension point: block on the frontend for up to one tick.
    fn wait(&mut self) -> Result<Phase> {
        let phase = match self.frontend.wait_event(self.config.tick)? {
            None => Phase::Rendering,
            Some(TunerEvent::CaptureRequested) => Phase::CaptureRequested,
            Some(TunerEvent::Cancelled) => Phase::Cancelled,
            Some(event) => {
                self.state.pending = Some(event);
                Phase::ParameterChanged
            }
        };
        Ok(phase)
    }

    /// Apply a parameter event. Rejected changes leave the matcher untouched.
    fn apply(&mut self, event: TunerEvent) {
        let specs = self.pipeline.matcher().parameters();
        if specs.is_empty() {
            return;
        }
        let shortest = self.state.shortest_dimension.unwrap_or(i32::MAX as u32);

        let (name, value) = match event {
            TunerEvent::SelectNext => {
                self.state.selected = (self.state.selected + 1) % specs.len();
                let spec = &specs[self.state.selected];
                log::info!("Selected {} = {}", spec.name, spec.value);
                return;
            }
            TunerEvent::Step(direction) => {
                let spec = &specs[self.state.selected % specs.len()];
                match spec.step(direction, spec.resolved_maximum(shortest)) {
                    Some(value) => (spec.name.to_string(), value),
                    None => {
                        log::debug!("{} is already at its limit", spec.name);
                        return;
                    }
                }
            }
            TunerEvent::ParameterChanged { name, value } => (name, value),
            TunerEvent::CaptureRequested | TunerEvent::Cancelled => return
        };

        let checked = specs
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| Error::invalid_parameter(name.as_str(), "no such parameter"))
            .and_then(|s| s.check(value, s.resolved_maximum(shortest)))
            .and_then(|_| self.pipeline.matcher_mut().set_parameter(&name, value));

        match checked {
            Ok(()) => {
                log::info!("Set {} = {}", name, value);
                self.state.smoother.clear();
            }
            Err(e) => {
                log::warn!("Ignoring parameter change: {}", e);
                self.state.rejected_changes += 1;
            }
        }
    }

    fn export(&self) -> Result<ExportSummary> {
        let current = self.state.current.as_ref().ok_or_else(|| {
            Error::export(
                self.config.export.point_cloud.clone().unwrap_or_default(),
                "no frame has been rendered yet"
            )
        })?;
        self.pipeline
            .export(&current.pair, &current.disparity, &self.config.export)
    }

    fn finish(&mut self) -> TuningReport {
        let final_settings = MatcherSettings::from_matcher(self.pipeline.matcher());
        let parameters: Vec<(String, i32)> = self
            .pipeline
            .matcher()
            .parameters()
            .into_iter()
            .map(|p| (p.name.to_string(), p.value))
            .collect();

        for (name, value) in &parameters {
            log::info!("{} = {}", name, value);
        }

        let settings = self.config.settings_out.clone().map(|path| {
            final_settings.save(&path).map(|_| path)
        });
        if let Some(Err(e)) = &settings {
            log::error!("{}", e);
        }

        #[cfg(feature = "statistics")]
        {
            if let Some(path) = &self.config.latency_plot {
                if let Err(e) = crate::statistics::plot_latency(path, self.state.latency.history()) {
                    log::warn!("{}", e);
                }
            }
        }

        TuningReport {
            parameters,
            frames_rendered: self.state.frames_rendered,
            fps: self.state.latency.fps(),
            export: self.state.export.take(),
            settings,
            history: std::mem::take(&mut self.state.history)
        }
    }

    fn release(&mut self) {
        if !self.released {
            self.source.release();
            self.frontend.release();
            self.released = true;
            log::debug!("Released {} and the frontend", self.source.device());
        }
    }
}

impl Drop for Tuner {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Display for TuningReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Rendered {} frames", self.frames_rendered)?;
        for (name, value) in &self.parameters {
            write!(f, "{:>20} = {:<6}", name, value)?;
            let table = self.history.report(name);
            if table.len() > 1 {
                let chosen: Vec<String> = table.iter().map(|(v, n)| format!("{}x{}", v, n)).collect();
                write!(f, " (rendered with {})", chosen.join(", "))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn latency_window_averages_recent_cycles() {
        let mut latency = LatencyTracker::new(2);
        assert_eq!(latency.fps(), None);

        latency.record(Duration::from_millis(100));
        latency.record(Duration::from_millis(300));
        latency.record(Duration::from_millis(100));
        assert_eq!(latency.smoothed(), Some(Duration::from_millis(200)));
        assert_relative_eq!(latency.fps().unwrap(), 5.0, epsilon = 1e-4);
        assert_eq!(latency.history().len(), 3);
    }

    #[test]
    fn smoothing_disabled_for_single_window() {
        let mut smoother = DisparitySmoother::new(1, 10.0);
        let map = DisparityMap::from_vec(1, 1, 0, 16, vec![3.0]).unwrap();
        assert!(smoother.push(&map).is_none());
    }

    #[test]
    fn smoothing_masks_unstable_pixels() {
        let mut smoother = DisparitySmoother::new(2, 5.0);
        // Pixel 0 is stable, pixel 1 jumps, pixel 2 is missing in one map
        let a = DisparityMap::from_vec(3, 1, 0, 64, vec![10.0, 10.0, 20.0]).unwrap();
        let b = DisparityMap::from_vec(3, 1, 0, 64, vec![12.0, 40.0, -1.0]).unwrap();
        smoother.push(&a);
        let (map, mask) = smoother.push(&b).unwrap();

        assert!(mask.get(0, 0));
        assert_relative_eq!(map.get(0, 0), 11.0);
        assert!(!mask.get(1, 0));
        assert!(!mask.get(2, 0));
        assert_eq!(map.get(2, 0), map.invalid_value());
    }

    #[test]
    fn smoothing_restarts_on_new_range() {
        let mut smoother = DisparitySmoother::new(3, 5.0);
        smoother.push(&DisparityMap::from_vec(1, 1, 0, 16, vec![4.0]).unwrap());
        let (map, _) = smoother
            .push(&DisparityMap::from_vec(1, 1, 0, 32, vec![8.0]).unwrap())
            .unwrap();
        assert_relative_eq!(map.get(0, 0), 8.0);
    }

    #[test]
    fn history_report_skips_defaults() {
        let mut history = SettingsHistory::default();
        for value in [15, 21, 21, 9, 21, 9, 15] {
            let mut settings = MatcherSettings::default();
            settings.insert("block_size", value);
            history.record(settings);
        }
        assert_eq!(history.report("block_size"), vec![(21, 3), (9, 2), (15, 1)]);
        assert!(history.report("p1").is_empty());
    }

    #[test]
    fn invalid_config_is_rejected() {
        assert!(TunerConfig::default().with_latency_window(0).validate().is_err());
        assert!(TunerConfig::default().with_smoothing(3, f32::NAN).validate().is_err());
        assert!(TunerConfig::default().validate().is_ok());
    }
}
