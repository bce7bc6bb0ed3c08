mod common;

use common::{
    bank, bank_with, empty, settings, target, Event, RecordingOutput, ScriptedSource, Step,
    Timeline,
};
use fieldguard::control::{
    Backoff, ControlLoop, DegradedReason, FatalReason, LoopSettings, LoopState, ShutdownReason, StopSignal,
};
use fieldguard::error::SourceFault;
use fieldguard::policy::{OverlapMode, TriggerPolicy};
use std::thread;
use std::time::{Duration, Instant};

fn policy(overlap: OverlapMode) -> TriggerPolicy {
    TriggerPolicy::new(["bear", "wolf", "dog"], 0.5, overlap)
}

fn control(
    source: ScriptedSource,
    timeline: &Timeline,
    failing: Option<(&str, bool)>,
    settings: LoopSettings,
    overlap: OverlapMode,
    stop: &StopSignal,
) -> ControlLoop<ScriptedSource> {
    ControlLoop::new(
        source,
        bank(timeline, failing),
        policy(overlap),
        settings,
        stop.clone(),
    )
}

fn stopped_by_request() -> Vec<LoopState> {
    vec![
        LoopState::ShuttingDown(ShutdownReason::StopRequested),
        LoopState::Stopped,
    ]
}

#[test]
fn transient_faults_then_target_activates_without_leaving_running() {
    let timeline = Timeline::default();
    let stop = StopSignal::new();
    let mut steps: Vec<Step> = (0..5)
        .map(|_| Step::Fault(SourceFault::FrameUnavailable))
        .collect();
    steps.push(target("bear", 0.9));
    let source = ScriptedSource::new(steps, &stop, &timeline);
    let mut control = control(
        source,
        &timeline,
        None,
        settings(Duration::from_secs(60)),
        OverlapMode::Ignore,
        &stop,
    );

    let outcome = control.run();

    assert!(outcome.is_clean());
    assert_eq!(outcome.stats.frames, 1);
    assert_eq!(outcome.stats.activations, 1);
    assert_eq!(
        control.history(),
        &[
            LoopState::Starting,
            LoopState::Running,
            LoopState::ShuttingDown(ShutdownReason::StopRequested),
            LoopState::Stopped,
        ]
    );

    // engaged right after the sixth pull, before the seventh
    let engaged = timeline
        .position(&Event::Write {
            channel: "strobe".into(),
            active: true,
        })
        .unwrap();
    assert!(timeline.position(&Event::Pull(6)).unwrap() < engaged);
    assert!(engaged < timeline.position(&Event::Pull(7)).unwrap());
}

#[test]
fn detections_at_or_below_threshold_or_off_target_do_nothing() {
    let timeline = Timeline::default();
    let stop = StopSignal::new();
    let source = ScriptedSource::new(
        vec![
            target("bear", 0.5),
            target("person", 0.99),
            Step::Frame(vec![("car", 0.9), ("wolf", 0.3)]),
        ],
        &stop,
        &timeline,
    );
    let mut control = control(
        source,
        &timeline,
        None,
        settings(Duration::from_secs(60)),
        OverlapMode::Ignore,
        &stop,
    );

    let outcome = control.run();

    assert_eq!(outcome.stats.frames, 3);
    assert_eq!(outcome.stats.activations, 0);
    assert_eq!(timeline.engages(), 0);
}

#[test]
fn disconnect_is_reacquired_on_third_retry() {
    let timeline = Timeline::default();
    let stop = StopSignal::new();
    let source = ScriptedSource::new(
        vec![
            empty(),
            Step::Fault(SourceFault::Disconnected("usb unplugged".into())),
            empty(),
        ],
        &stop,
        &timeline,
    )
    .with_reopens(vec![
        Err(SourceFault::Disconnected("no device".into())),
        Err(SourceFault::Disconnected("no device".into())),
        Ok(()),
    ]);
    let mut control = control(
        source,
        &timeline,
        None,
        settings(Duration::from_secs(60)),
        OverlapMode::Ignore,
        &stop,
    );

    let outcome = control.run();

    assert!(outcome.is_clean());
    assert_eq!(outcome.stats.reacquisitions, 1);
    assert_eq!(control.source().reopen_calls(), 3);
    assert_eq!(
        control.history(),
        &[
            LoopState::Starting,
            LoopState::Running,
            LoopState::Degraded(DegradedReason::SourceLost(SourceFault::Disconnected(
                "usb unplugged".into()
            ))),
            LoopState::Running,
            LoopState::ShuttingDown(ShutdownReason::StopRequested),
            LoopState::Stopped,
        ]
    );
    assert_eq!(timeline.engages(), 0);
}

#[test]
fn persistent_transient_faults_degrade_the_loop() {
    let timeline = Timeline::default();
    let stop = StopSignal::new();
    let source = ScriptedSource::new(
        vec![
            Step::Fault(SourceFault::FrameUnavailable),
            Step::Fault(SourceFault::InferenceFailure("nan output".into())),
            Step::Fault(SourceFault::FrameUnavailable),
            empty(),
        ],
        &stop,
        &timeline,
    );
    let mut settings = settings(Duration::from_secs(60));
    settings.max_consecutive_failures = 3;
    let mut control = control(
        source,
        &timeline,
        None,
        settings,
        OverlapMode::Ignore,
        &stop,
    );

    let outcome = control.run();

    assert!(outcome.is_clean());
    assert_eq!(control.source().reopen_calls(), 1);
    assert_eq!(
        control.history()[2],
        LoopState::Degraded(DegradedReason::PersistentFaults {
            count: 3,
            last: SourceFault::FrameUnavailable,
        })
    );
    assert_eq!(control.history()[3], LoopState::Running);
}

#[test]
fn exhausted_reacquisition_is_fatal_and_releases() {
    let timeline = Timeline::default();
    let stop = StopSignal::new();
    let gone = || -> Result<(), SourceFault> { Err(SourceFault::Disconnected("still gone".into())) };
    let source = ScriptedSource::new(
        vec![
            target("wolf", 0.8),
            Step::Fault(SourceFault::Stalled(Duration::from_secs(2))),
        ],
        &stop,
        &timeline,
    )
    .with_reopens((0..5).map(|_| gone()).collect());
    let mut control = control(
        source,
        &timeline,
        None,
        settings(Duration::from_secs(60)),
        OverlapMode::Ignore,
        &stop,
    );

    let outcome = control.run();

    let expected = ShutdownReason::Fatal(FatalReason::ReacquisitionExhausted {
        attempts: 5,
        last: SourceFault::Disconnected("still gone".into()),
    });
    assert_eq!(outcome.reason, expected);
    assert!(outcome.release.is_ok());
    assert_eq!(control.source().reopen_calls(), 5);
    assert!(!control.bank().is_engaged());
    assert_eq!(timeline.levels("fence"), vec![false, true, false]);
    assert_eq!(
        control.history()[control.history().len() - 2..],
        [LoopState::ShuttingDown(expected), LoopState::Stopped]
    );
}

#[test]
fn hardware_fault_on_engage_shuts_down() {
    let timeline = Timeline::default();
    let stop = StopSignal::new();
    let source = ScriptedSource::new(vec![target("dog", 0.9), empty()], &stop, &timeline);
    let mut control = control(
        source,
        &timeline,
        Some(("fence", true)),
        settings(Duration::from_secs(60)),
        OverlapMode::Ignore,
        &stop,
    );

    let outcome = control.run();

    match &outcome.reason {
        ShutdownReason::Fatal(FatalReason::Hardware(fault)) => assert_eq!(fault.channel, "fence"),
        other => panic!("unexpected shutdown reason: {:?}", other),
    }
    assert!(outcome.release.is_ok());
    assert_eq!(outcome.stats.activations, 0);
    assert_eq!(control.source().pulls(), 1);
    assert_eq!(
        control.history(),
        &[
            LoopState::Starting,
            LoopState::Running,
            LoopState::ShuttingDown(outcome.reason.clone()),
            LoopState::Stopped,
        ]
    );

    // a release round follows the failed write
    let events = timeline.events();
    let failed = events
        .iter()
        .position(|e| matches!(e, Event::WriteFailed { .. }))
        .unwrap();
    assert!(events[failed..].contains(&Event::Write {
        channel: "strobe".into(),
        active: false,
    }));
    assert_eq!(timeline.levels("strobe").last(), Some(&false));
    assert!(events.contains(&Event::Close));
}

#[test]
fn stop_during_active_window_releases_immediately() {
    let timeline = Timeline::default();
    let stop = StopSignal::new();
    let source = ScriptedSource::new(vec![target("wolf", 0.95)], &stop, &timeline).endless();
    let mut control = control(
        source,
        &timeline,
        None,
        settings(Duration::from_secs(60)),
        OverlapMode::Ignore,
        &stop,
    );

    let remote = stop.clone();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        remote.request();
    });

    let started = Instant::now();
    let outcome = control.run();
    stopper.join().unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(outcome.is_clean());
    assert!(!control.bank().is_engaged());
    for channel in common::CHANNELS {
        assert_eq!(timeline.levels(channel), vec![false, true, false]);
    }
    assert_eq!(
        control.history()[control.history().len() - 2..],
        stopped_by_request()[..]
    );

    let events = timeline.events();
    assert_eq!(events.last(), Some(&Event::Close));
}

#[test]
fn target_after_elapsed_window_starts_fresh_activation() {
    let timeline = Timeline::default();
    let stop = StopSignal::new();
    let source = ScriptedSource::new(
        vec![
            target("bear", 0.9),
            target("bear", 0.9),
            Step::Pause(Duration::from_millis(300)),
            target("bear", 0.9),
        ],
        &stop,
        &timeline,
    );
    let mut control = control(
        source,
        &timeline,
        None,
        settings(Duration::from_millis(100)),
        OverlapMode::Ignore,
        &stop,
    );

    let outcome = control.run();

    // startup release, engage, timer release, engage, shutdown release
    assert_eq!(
        timeline.levels("alarm"),
        vec![false, true, false, true, false]
    );
    assert_eq!(outcome.stats.activations, 2);
}

#[test]
fn extend_mode_pushes_the_deadline_out() {
    let timeline = Timeline::default();
    let stop = StopSignal::new();
    let script = || {
        vec![
            target("bear", 0.9),
            Step::Pause(Duration::from_millis(200)),
            target("bear", 0.9),
            Step::Pause(Duration::from_millis(200)),
        ]
    };
    let source = ScriptedSource::new(script(), &stop, &timeline);
    let mut extending = control(
        source,
        &timeline,
        None,
        settings(Duration::from_millis(300)),
        OverlapMode::Extend,
        &stop,
    );

    let outcome = extending.run();

    // still engaged when the script ends at ~400ms, so no timer release
    assert_eq!(timeline.levels("strobe"), vec![false, true, false]);
    assert_eq!(outcome.stats.activations, 1);

    let timeline = Timeline::default();
    let stop = StopSignal::new();
    let source = ScriptedSource::new(script(), &stop, &timeline);
    let mut ignoring = control(
        source,
        &timeline,
        None,
        settings(Duration::from_millis(300)),
        OverlapMode::Ignore,
        &stop,
    );

    ignoring.run();

    assert_eq!(timeline.levels("strobe"), vec![false, true, false, false]);
}

#[test]
fn startup_failure_is_fatal_without_pulling() {
    let timeline = Timeline::default();
    let stop = StopSignal::new();
    let source = ScriptedSource::new(vec![target("bear", 0.9)], &stop, &timeline)
        .failing_open(SourceFault::Disconnected("no camera".into()));
    let mut control = control(
        source,
        &timeline,
        None,
        settings(Duration::from_secs(60)),
        OverlapMode::Ignore,
        &stop,
    );

    let outcome = control.run();

    let expected = ShutdownReason::Fatal(FatalReason::StartupFailed(SourceFault::Disconnected(
        "no camera".into(),
    )));
    assert_eq!(outcome.reason, expected);
    assert_eq!(control.source().pulls(), 0);
    assert_eq!(
        control.history(),
        &[
            LoopState::Starting,
            LoopState::ShuttingDown(expected),
            LoopState::Stopped,
        ]
    );
    assert_eq!(timeline.levels("strobe"), vec![false, false]);
}

#[test]
fn failed_release_is_retried_and_reported() {
    let timeline = Timeline::default();
    let stop = StopSignal::new();
    let source = ScriptedSource::new(vec![empty()], &stop, &timeline);
    let mut control = control(
        source,
        &timeline,
        Some(("alarm", false)),
        settings(Duration::from_secs(60)),
        OverlapMode::Ignore,
        &stop,
    );

    let outcome = control.run();

    // the startup release fails first, then three attempts at shutdown
    assert!(matches!(
        outcome.reason,
        ShutdownReason::Fatal(FatalReason::Hardware(_))
    ));
    let release = outcome.release.as_ref().unwrap_err();
    assert_eq!(release.channel, "alarm");
    assert_eq!(timeline.failed_writes("alarm", false), 4);
    assert!(!outcome.is_clean());
    assert!(!timeline.events().contains(&Event::Open));
}

#[test]
fn run_is_single_shot() {
    let timeline = Timeline::default();
    let stop = StopSignal::new();
    let source = ScriptedSource::new(vec![target("bear", 0.9)], &stop, &timeline)
        .failing_open(SourceFault::Disconnected("no camera".into()));
    let mut control = control(
        source,
        &timeline,
        None,
        settings(Duration::from_secs(60)),
        OverlapMode::Ignore,
        &stop,
    );

    let first = control.run();
    let events = timeline.events();
    let history = control.history().to_vec();
    let again = control.run();

    assert!(matches!(
        again.reason,
        ShutdownReason::Fatal(FatalReason::StartupFailed(_))
    ));
    assert_eq!(again.reason, first.reason);
    assert_eq!(*control.state(), LoopState::Stopped);
    // a stopped loop leaves the bank and the source alone
    assert_eq!(timeline.events(), events);
    assert_eq!(control.history(), &history[..]);
}

#[test]
fn pending_release_fault_blocks_new_activation() {
    let timeline = Timeline::default();
    let stop = StopSignal::new();
    let source = ScriptedSource::new(
        vec![
            target("bear", 0.9),
            Step::Late(Duration::from_millis(100), vec![("bear", 0.9)]),
        ],
        &stop,
        &timeline,
    );
    let bank = bank_with(vec![
        RecordingOutput::new("strobe", &timeline),
        RecordingOutput::new("alarm", &timeline),
        RecordingOutput::new("fence", &timeline).stuck_once_engaged(),
    ]);
    let mut control = ControlLoop::new(
        source,
        bank,
        policy(OverlapMode::Ignore),
        settings(Duration::from_millis(20)),
        stop.clone(),
    );

    let outcome = control.run();

    match &outcome.reason {
        ShutdownReason::Fatal(FatalReason::Hardware(fault)) => assert_eq!(fault.channel, "fence"),
        other => panic!("unexpected shutdown reason: {:?}", other),
    }
    assert_eq!(outcome.stats.activations, 1);
    assert!(outcome.release.is_err());
    // the timer's failed release is never followed by a second engage
    for channel in common::CHANNELS {
        let engages = timeline.levels(channel).iter().filter(|a| **a).count();
        assert_eq!(engages, 1, "{} engaged more than once", channel);
    }
}

#[test]
fn stop_during_reacquisition_backoff_shuts_down_promptly() {
    let timeline = Timeline::default();
    let stop = StopSignal::new();
    let source = ScriptedSource::new(
        vec![Step::Fault(SourceFault::Disconnected("cable cut".into()))],
        &stop,
        &timeline,
    )
    .with_reopens(vec![Err(SourceFault::Disconnected("no device".into()))]);
    let mut settings = settings(Duration::from_secs(60));
    settings.reacquire = Backoff {
        initial: Duration::from_secs(10),
        max: Duration::from_secs(10),
        max_attempts: 3,
    };
    let mut control = control(
        source,
        &timeline,
        None,
        settings,
        OverlapMode::Ignore,
        &stop,
    );

    let remote = stop.clone();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        remote.request();
    });

    let started = Instant::now();
    let outcome = control.run();
    stopper.join().unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(outcome.is_clean());
    assert_eq!(control.source().reopen_calls(), 0);
    assert_eq!(
        control.history(),
        &[
            LoopState::Starting,
            LoopState::Running,
            LoopState::Degraded(DegradedReason::SourceLost(SourceFault::Disconnected(
                "cable cut".into()
            ))),
            LoopState::ShuttingDown(ShutdownReason::StopRequested),
            LoopState::Stopped,
        ]
    );
    assert_eq!(timeline.events().last(), Some(&Event::Close));
}
