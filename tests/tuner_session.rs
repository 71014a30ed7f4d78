//! Drive complete tuning sessions with scripted frame sources and frontends.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use cv_stereo_cloud::block_matching::{BlockMatcher, Params};
use cv_stereo_cloud::frame::{FrameSource, PairFolder, StereoFrame};
use cv_stereo_cloud::frontend::{Frontend, TunerEvent};
use cv_stereo_cloud::pipeline::{ExportConfig, StereoPipeline};
use cv_stereo_cloud::point_cloud::PointCloud;
use cv_stereo_cloud::settings::MatcherSettings;
use cv_stereo_cloud::test_utils::{pinhole_calibration, shifted_frame};
use cv_stereo_cloud::tuner::{Phase, Tuner, TunerConfig};
use cv_stereo_cloud::{Error, Result};
use image::RgbImage;

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

const WIDTH: u32 = 48;
const HEIGHT: u32 = 16;
const SHIFT: u32 = 4;

// -----------------------------------------------------------------------------------------------
// SCRIPTED COLLABORATORS
// -----------------------------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum Poll {
    Frame,
    Starve,
    Disconnect
}

/// Follows its script, then serves frames forever.
struct ScriptedSource {
    script: VecDeque<Poll>,
    released: Rc<Cell<bool>>
}

impl FrameSource for ScriptedSource {
    fn device(&self) -> &str {
        "scripted"
    }

    fn get_frame_pair(&mut self) -> Result<Option<StereoFrame>> {
        match self.script.pop_front().unwrap_or(Poll::Frame) {
            Poll::Frame => Ok(Some(shifted_frame(WIDTH, HEIGHT, SHIFT))),
            Poll::Starve => Ok(None),
            Poll::Disconnect => Err(Error::Capture {
                device: "scripted".into(),
                reason: "unplugged".into()
            })
        }
    }

    fn release(&mut self) {
        self.released.set(true);
    }
}

/// Replays its events, one per wait, then cancels.
struct ScriptedFrontend {
    events: VecDeque<Option<TunerEvent>>,
    shown: Rc<RefCell<Vec<(u32, u32)>>>,
    released: Rc<Cell<bool>>
}

impl Frontend for ScriptedFrontend {
    fn show(&mut self, image: &RgbImage) -> Result<()> {
        self.shown.borrow_mut().push(image.dimensions());
        Ok(())
    }

    fn wait_event(&mut self, _timeout: Duration) -> Result<Option<TunerEvent>> {
        Ok(self.events.pop_front().unwrap_or(Some(TunerEvent::Cancelled)))
    }

    fn release(&mut self) {
        self.released.set(true);
    }
}

struct Session {
    source_released: Rc<Cell<bool>>,
    frontend_released: Rc<Cell<bool>>,
    shown: Rc<RefCell<Vec<(u32, u32)>>>
}

impl Session {
    fn released(&self) -> bool {
        self.source_released.get() && self.frontend_released.get()
    }
}

fn pipeline() -> StereoPipeline {
    let matcher = BlockMatcher::new(Params {
        num_disparities: 16,
        block_size: 7,
        texture_threshold: 0,
        ..Params::default()
    });
    StereoPipeline::new(pinhole_calibration(WIDTH, HEIGHT), Box::new(matcher)).unwrap()
}

fn set(name: &str, value: i32) -> Option<TunerEvent> {
    Some(TunerEvent::ParameterChanged { name: name.into(), value })
}

fn start(
    pipeline: StereoPipeline,
    polls: Vec<Poll>,
    events: Vec<Option<TunerEvent>>,
    config: TunerConfig
) -> (Result<Tuner>, Session) {
    let session = Session {
        source_released: Rc::new(Cell::new(false)),
        frontend_released: Rc::new(Cell::new(false)),
        shown: Rc::new(RefCell::new(Vec::new()))
    };
    let source = ScriptedSource {
        script: polls.into(),
        released: session.source_released.clone()
    };
    let frontend = ScriptedFrontend {
        events: events.into(),
        shown: session.shown.clone(),
        released: session.frontend_released.clone()
    };

    let tuner = Tuner::new(pipeline, Box::new(source), Box::new(frontend), config);
    (tuner, session)
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[test]
fn capture_exports_the_current_frame() {
    let dir = tempfile::tempdir().unwrap();
    let cloud_path = dir.path().join("cloud.ply");
    let config = TunerConfig::default().with_export(ExportConfig {
        point_cloud: Some(cloud_path.clone()),
        ..ExportConfig::default()
    });

    let events = vec![None, set("block_size", 9), None, Some(TunerEvent::CaptureRequested)];
    let (tuner, session) = start(pipeline(), vec![], events, config);
    let report = tuner.unwrap().run().unwrap();

    assert_eq!(report.frames_rendered, 4);
    assert!(report.parameters.contains(&("block_size".to_string(), 9)));

    let summary = report.export.unwrap().unwrap();
    assert!(summary.points > 0);
    assert_eq!(summary.pixels, (WIDTH * HEIGHT) as usize);
    assert_eq!(PointCloud::read_ply(&cloud_path).unwrap().len(), summary.points);

    assert!(session.released());
}

#[test]
fn capture_before_any_frame_still_terminates() {
    let (tuner, session) = start(
        pipeline(),
        vec![Poll::Starve],
        vec![Some(TunerEvent::CaptureRequested)],
        TunerConfig::default()
    );
    let report = tuner.unwrap().run().unwrap();

    assert_eq!(report.frames_rendered, 0);
    assert!(matches!(report.export, Some(Err(Error::Export { .. }))));
    assert!(session.released());
}

#[test]
fn cancel_reports_and_persists_parameters() {
    let dir = tempfile::tempdir().unwrap();
    let settings_path = dir.path().join("settings.toml");
    let config = TunerConfig::default().with_settings_out(&settings_path);

    let (tuner, session) = start(pipeline(), vec![], vec![set("uniqueness_ratio", 40)], config);
    let report = tuner.unwrap().run().unwrap();

    assert!(report.export.is_none());
    assert_eq!(report.parameters.len(), 6);
    assert_eq!(report.settings.unwrap().unwrap(), settings_path);

    let saved = MatcherSettings::load(&settings_path).unwrap();
    assert_eq!(saved.get("uniqueness_ratio"), Some(40));
    assert_eq!(saved.get("block_size"), Some(7));
    assert!(session.released());
}

#[test]
fn rejected_changes_keep_previous_values() {
    let events = vec![set("block_size", 8), set("num_disparities", 17), set("focus", 3), set("block_size", 999)];
    let (tuner, _session) = start(pipeline(), vec![], events, TunerConfig::default());
    let mut tuner = tuner.unwrap();

    while tuner.step().unwrap() != Phase::Terminated {}

    assert_eq!(tuner.state().rejected_changes(), 4);
    assert_eq!(tuner.pipeline().matcher().parameter("block_size"), Some(7));
    assert_eq!(tuner.pipeline().matcher().parameter("num_disparities"), Some(16));
    // Every rejected change is followed by another render
    assert_eq!(tuner.state().frames_rendered(), 5);
}

#[test]
fn keys_step_the_selected_parameter() {
    let events = vec![
        Some(TunerEvent::SelectNext),
        Some(TunerEvent::Step(1)),
        Some(TunerEvent::SelectNext),
        Some(TunerEvent::Step(-1)),
    ];
    let (tuner, _session) = start(pipeline(), vec![], events, TunerConfig::default());
    let mut tuner = tuner.unwrap();

    while tuner.step().unwrap() != Phase::Terminated {}

    let matcher = tuner.pipeline().matcher();
    assert_eq!(matcher.parameter("num_disparities"), Some(32));
    assert_eq!(matcher.parameter("block_size"), Some(5));
    assert_eq!(tuner.state().selected(), 2);
}

#[test]
fn starvation_keeps_polling() {
    let (tuner, session) = start(
        pipeline(),
        vec![Poll::Starve, Poll::Starve, Poll::Frame],
        vec![None, None, Some(TunerEvent::Cancelled)],
        TunerConfig::default()
    );
    let mut tuner = tuner.unwrap();

    assert_eq!(tuner.state().phase(), Phase::Idle);
    while tuner.step().unwrap() != Phase::Terminated {}

    assert_eq!(tuner.state().starved_polls(), 2);
    assert_eq!(tuner.state().frames_rendered(), 1);
    assert_eq!(session.shown.borrow().len(), 1);
    assert!(tuner.state().latency().fps().is_some());
}

#[test]
fn disconnection_is_fatal_and_releases() {
    let (tuner, session) = start(
        pipeline(),
        vec![Poll::Frame, Poll::Disconnect],
        vec![None],
        TunerConfig::default()
    );
    let err = tuner.unwrap().run().unwrap_err();

    assert!(matches!(err, Error::Capture { .. }));
    assert!(session.released());
}

#[test]
fn bad_config_fails_before_rendering_and_releases() {
    let config = TunerConfig::default().with_latency_window(0);
    let (tuner, session) = start(pipeline(), vec![], vec![], config);

    assert!(matches!(tuner.err(), Some(Error::InvalidParameter { .. })));
    assert!(session.shown.borrow().is_empty());
    assert!(session.released());
}

#[test]
fn calibration_size_mismatch_is_fatal() {
    let calibration = pinhole_calibration(WIDTH, HEIGHT).with_image_size(WIDTH * 2, HEIGHT * 2);
    let matcher = BlockMatcher::new(Params { num_disparities: 16, block_size: 7, ..Params::default() });
    let pipeline = StereoPipeline::new(calibration, Box::new(matcher)).unwrap();

    let (tuner, session) = start(pipeline, vec![], vec![], TunerConfig::default());
    let err = tuner.unwrap().run().unwrap_err();

    assert!(matches!(err, Error::Calibration { .. }));
    assert!(session.released());
}

#[test]
fn display_stacks_smoothed_view_and_sources() {
    let config = TunerConfig::default()
        .with_smoothing(2, 10.0)
        .with_show_sources(true);
    let (tuner, session) = start(pipeline(), vec![], vec![None, Some(TunerEvent::Cancelled)], config);
    let mut tuner = tuner.unwrap();

    while tuner.step().unwrap() != Phase::Terminated {}

    assert_eq!(*session.shown.borrow(), vec![(WIDTH * 3, HEIGHT * 2); 2]);

    // A static scene is stable, so the smoothed map keeps what the live map found
    let (_, mask) = tuner.state().smoothed().unwrap();
    let live = cv_stereo_cloud::mask::ValidityMask::display(&tuner.state().current().unwrap().disparity);
    assert_eq!(mask, &live);
}

#[test]
fn history_counts_rendered_values() {
    let events = vec![set("block_size", 9), None, Some(TunerEvent::Cancelled)];
    let (tuner, _session) = start(pipeline(), vec![], events, TunerConfig::default());
    let report = tuner.unwrap().run().unwrap();

    assert_eq!(report.history.len(), 4);
    assert_eq!(report.history.report("block_size"), vec![(9, 2), (7, 1)]);
    assert!(report.to_string().contains("block_size"));
}

#[test]
fn looping_folder_feeds_a_long_session() {
    let dir = tempfile::tempdir().unwrap();
    let frame = shifted_frame(WIDTH, HEIGHT, SHIFT);
    frame.left.save(dir.path().join("left_000.png")).unwrap();
    frame.right.save(dir.path().join("right_000.png")).unwrap();

    let source = PairFolder::open(dir.path()).unwrap().looping(true);
    let released = Rc::new(Cell::new(false));
    let frontend = ScriptedFrontend {
        events: vec![None; 5].into(),
        shown: Rc::new(RefCell::new(Vec::new())),
        released: released.clone()
    };

    let tuner = Tuner::new(pipeline(), Box::new(source), Box::new(frontend), TunerConfig::default());
    let report = tuner.unwrap().run().unwrap();

    assert_eq!(report.frames_rendered, 6);
    assert!(report.export.is_none());
    assert!(released.get());
}
