//! End-to-end tests of the voice pipeline
//!
//! These drive the real worker thread with fake engines and a fake output,
//! so they need neither Piper nor an audio device.

mod common;

use common::{fake_output, next_event, wait_settled, wav_files, FakeConverter, FakeSynthesizer};
use marie_voice::speech::length_scale_for;
use marie_voice::{CharacterDatabase, PipelineEvent, VoiceError, VoicePipeline};
use std::sync::Arc;
use std::time::Duration;

const CHARACTERS: &str = r#"
default_character = "robo"

[characters.robo]
display_name = "Robo"
model_reference = "robo.onnx"

[characters.robo.emotions]
default = { speed = 1.0 }
happy = { speed = 1.2, pitch_shift = 2 }

[characters.echo]
display_name = "Echo"
model_reference = "echo.onnx"
speaker_id = 3

[characters.echo.conversion]
model_reference = "echo.pth"
pitch_shift = -1

[characters.echo.emotions]
default = { speed = 1.0 }
happy = { speed = 1.1, pitch_shift = 3 }
"#;

fn custom_store() -> Arc<CharacterDatabase> {
    Arc::new(CharacterDatabase::from_toml_str(CHARACTERS, "/models", "/rvc").unwrap())
}

/// Test that utterances are spoken in the order they were queued
#[test]
fn test_utterances_play_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let synth = FakeSynthesizer::new(Duration::from_millis(40));
    let (output, log) = fake_output(&synth);

    let pipeline = VoicePipeline::builder(dir.path())
        .synthesizer(Arc::new(synth.clone()))
        .sink_factory(output)
        .pause(Duration::ZERO)
        .build("tachyon")
        .unwrap();
    let events = pipeline.event_receiver();

    let texts = ["One.", "Two.", "Three.", "Four.", "Five."];
    for text in texts {
        assert!(pipeline.speak(text).is_some());
    }

    let seen = wait_settled(&events, texts.len());
    let finished = seen
        .iter()
        .filter(|e| matches!(e, PipelineEvent::Finished { .. }))
        .count();
    assert_eq!(finished, texts.len());
    assert_eq!(log.lock().played, texts);

    pipeline.shutdown();
}

/// Test that clips never overlap and the speaking flag tracks playback
#[test]
fn test_no_overlap_and_speaking_flag() {
    let dir = tempfile::tempdir().unwrap();
    let synth = FakeSynthesizer::new(Duration::from_millis(300));
    let (output, log) = fake_output(&synth);

    let pipeline = VoicePipeline::builder(dir.path())
        .synthesizer(Arc::new(synth.clone()))
        .sink_factory(output)
        .pause(Duration::from_millis(300))
        .build("miku")
        .unwrap();
    let events = pipeline.event_receiver();

    assert!(!pipeline.is_speaking());
    pipeline.speak("[excited] Great job!");
    pipeline.speak("[sad] I am sorry.");

    // First utterance plays while the flag is set
    match next_event(&events) {
        PipelineEvent::Started { text, voice, .. } => {
            assert_eq!(text, "Great job!");
            assert_eq!(voice, "Hatsune Miku");
        }
        other => panic!("expected Started, got {:?}", other),
    }
    std::thread::sleep(Duration::from_millis(100));
    assert!(pipeline.is_speaking());

    // The flag drops in the gap between utterances
    assert!(matches!(next_event(&events), PipelineEvent::Finished { .. }));
    assert!(!pipeline.is_speaking());

    match next_event(&events) {
        PipelineEvent::Started { text, .. } => assert_eq!(text, "I am sorry."),
        other => panic!("expected Started, got {:?}", other),
    }
    std::thread::sleep(Duration::from_millis(100));
    assert!(pipeline.is_speaking());

    assert!(matches!(next_event(&events), PipelineEvent::Finished { .. }));
    assert!(!pipeline.is_speaking());

    // Excited then sad prosody, in that order
    let calls = synth.calls();
    assert_eq!(calls.len(), 2);
    assert!((calls[0].length_scale - length_scale_for(1.10)).abs() < 1e-4);
    assert!((calls[1].length_scale - length_scale_for(0.80)).abs() < 1e-4);

    assert_eq!(log.lock().played, vec!["Great job!", "I am sorry."]);
    assert_eq!(log.lock().overlaps, 0);

    pipeline.shutdown();
}

/// Test that stop() discards everything pending and interrupts playback
#[test]
fn test_stop_cancels_everything() {
    let dir = tempfile::tempdir().unwrap();
    let synth = FakeSynthesizer::new(Duration::from_secs(5)).with_delay(Duration::from_millis(20));
    let (output, log) = fake_output(&synth);

    let pipeline = VoicePipeline::builder(dir.path())
        .synthesizer(Arc::new(synth.clone()))
        .sink_factory(output)
        .pause(Duration::ZERO)
        .build("tachyon")
        .unwrap();
    let events = pipeline.event_receiver();

    let ids: Vec<_> = (0..5)
        .map(|i| pipeline.speak(format!("Sentence {}.", i)).unwrap())
        .collect();

    assert!(matches!(next_event(&events), PipelineEvent::Started { .. }));
    pipeline.stop();

    let seen = wait_settled(&events, ids.len());
    for id in &ids {
        assert!(
            seen.contains(&PipelineEvent::Cancelled { id: *id }),
            "utterance {} was not cancelled",
            id
        );
    }
    assert!(!seen
        .iter()
        .any(|e| matches!(e, PipelineEvent::Finished { .. })));
    assert!(!pipeline.is_speaking());
    assert_eq!(pipeline.pending(), 0);
    assert_eq!(log.lock().played, vec!["Sentence 0."]);
    assert_eq!(log.lock().halts, 1);
    assert_eq!(synth.calls().len(), 1);

    // The pipeline keeps working after a stop
    let after = pipeline.speak("Still here.").unwrap();
    match next_event(&events) {
        PipelineEvent::Started { id, text, .. } => {
            assert_eq!(id, after);
            assert_eq!(text, "Still here.");
        }
        other => panic!("expected Started, got {:?}", other),
    }
    pipeline.stop();
    assert_eq!(next_event(&events), PipelineEvent::Cancelled { id: after });
    assert_eq!(pipeline.stats().cancelled, 6);

    pipeline.shutdown();
}

/// Test that utterances queued behind a slow synthesis are never synthesized
#[test]
fn test_stop_during_synthesis_skips_queued_work() {
    let dir = tempfile::tempdir().unwrap();
    let synth = FakeSynthesizer::new(Duration::from_millis(50)).with_delay(Duration::from_millis(400));
    let (output, log) = fake_output(&synth);

    let pipeline = VoicePipeline::builder(dir.path())
        .synthesizer(Arc::new(synth.clone()))
        .sink_factory(output)
        .pause(Duration::ZERO)
        .build("tachyon")
        .unwrap();
    let events = pipeline.event_receiver();

    let first = pipeline.speak("Slow to render.").unwrap();
    // Let the worker pick up the first utterance and enter synthesis
    std::thread::sleep(Duration::from_millis(100));
    let queued: Vec<_> = (0..4)
        .map(|i| pipeline.speak(format!("Queued {}.", i)).unwrap())
        .collect();
    assert_eq!(pipeline.pending(), 4);

    pipeline.stop();
    let seen = wait_settled(&events, 5);

    assert!(seen.contains(&PipelineEvent::Cancelled { id: first }));
    for id in &queued {
        assert!(seen.contains(&PipelineEvent::Cancelled { id: *id }));
    }
    assert!(!seen
        .iter()
        .any(|e| matches!(e, PipelineEvent::Started { .. })));

    let calls = synth.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].text, "Slow to render.");
    assert!(log.lock().played.is_empty());

    pipeline.shutdown();
}

/// Test that no output device yields Skipped without a Started event
#[test]
fn test_missing_output_device_only_skips() {
    let dir = tempfile::tempdir().unwrap();
    let synth = FakeSynthesizer::new(Duration::from_millis(20));

    let pipeline = VoicePipeline::builder(dir.path())
        .synthesizer(Arc::new(synth.clone()))
        .sink_factory(Box::new(|| {
            Err(VoiceError::AudioDeviceError("no speakers attached".into()))
        }))
        .build("tachyon")
        .unwrap();
    let events = pipeline.event_receiver();

    let id = pipeline.speak("Hello.").unwrap();
    let seen = wait_settled(&events, 1);

    assert_eq!(seen.len(), 1);
    assert!(matches!(&seen[0], PipelineEvent::Skipped { id: skipped, .. } if *skipped == id));
    assert_eq!(synth.calls().len(), 1);
    assert!(!pipeline.is_speaking());

    pipeline.shutdown();
}

/// Test that the cache directory never holds more files than slots
#[test]
fn test_cache_stays_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let synth = FakeSynthesizer::new(Duration::from_millis(10));
    let (output, _log) = fake_output(&synth);

    let pipeline = VoicePipeline::builder(dir.path())
        .synthesizer(Arc::new(synth.clone()))
        .sink_factory(output)
        .cache_slots(20)
        .pause(Duration::ZERO)
        .build("tachyon")
        .unwrap();
    let events = pipeline.event_receiver();

    for i in 0..25 {
        pipeline.speak(format!("Line {}.", i));
    }
    wait_settled(&events, 25);

    assert_eq!(synth.calls().len(), 25);
    assert!(wav_files(dir.path()) <= 20);
    assert_eq!(pipeline.stats().completed, 25);

    pipeline.shutdown();
}

/// Test that an unknown character falls back to the default voice
#[test]
fn test_unknown_voice_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let synth = FakeSynthesizer::new(Duration::from_millis(20));
    let (output, _log) = fake_output(&synth);

    let pipeline = VoicePipeline::builder(dir.path())
        .synthesizer(Arc::new(synth.clone()))
        .sink_factory(output)
        .profile_store(custom_store())
        .build("echo")
        .unwrap();
    let events = pipeline.event_receiver();

    assert_eq!(pipeline.current_voice().id, "echo");
    pipeline.set_voice("nobody");
    assert_eq!(pipeline.current_voice().id, "robo");

    pipeline.speak("[happy] Hello there.");
    match next_event(&events) {
        PipelineEvent::Started { voice, text, .. } => {
            assert_eq!(voice, "Robo");
            assert_eq!(text, "Hello there.");
        }
        other => panic!("expected Started, got {:?}", other),
    }
    wait_settled(&events, 1);

    let calls = synth.calls();
    assert!((calls[0].length_scale - 1.0 / 1.2).abs() < 1e-4);
    assert_eq!(calls[0].speaker_id, 0);

    pipeline.shutdown();
}

/// Test that conversion gets the combined pitch and its output is played
#[test]
fn test_conversion_uses_combined_pitch() {
    let dir = tempfile::tempdir().unwrap();
    let synth = FakeSynthesizer::new(Duration::from_millis(20));
    let (output, log) = fake_output(&synth);
    let converter = FakeConverter::default();

    let pipeline = VoicePipeline::builder(dir.path())
        .synthesizer(Arc::new(synth.clone()))
        .converter(Arc::new(converter.clone()))
        .sink_factory(output)
        .profile_store(custom_store())
        .build("echo")
        .unwrap();
    let events = pipeline.event_receiver();

    pipeline.speak("[happy] Converted.");
    let seen = wait_settled(&events, 1);
    assert!(matches!(seen.last(), Some(PipelineEvent::Finished { .. })));

    // Profile base -1 plus emotion +3
    assert_eq!(*converter.pitches.lock(), vec![2]);
    assert_eq!(synth.calls()[0].speaker_id, 3);
    assert_eq!(log.lock().played, vec!["Converted."]);
    assert_eq!(wav_files(dir.path()), 1);

    pipeline.shutdown();
}

/// Test that a failing conversion falls back to the unconverted audio
#[test]
fn test_conversion_failure_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let synth = FakeSynthesizer::new(Duration::from_millis(20));
    let (output, log) = fake_output(&synth);

    let pipeline = VoicePipeline::builder(dir.path())
        .synthesizer(Arc::new(synth.clone()))
        .converter(Arc::new(FakeConverter::failing()))
        .sink_factory(output)
        .profile_store(custom_store())
        .build("echo")
        .unwrap();
    let events = pipeline.event_receiver();

    pipeline.speak("Raw voice.");
    let seen = wait_settled(&events, 1);
    assert!(matches!(seen.last(), Some(PipelineEvent::Finished { .. })));
    assert_eq!(log.lock().played, vec!["Raw voice."]);
    assert_eq!(pipeline.stats().conversion_fallbacks, 1);

    pipeline.shutdown();
}

/// Test that a conversion failing midway leaves no extra file in the cache
#[test]
fn test_partial_conversion_output_is_removed() {
    let dir = tempfile::tempdir().unwrap();
    let synth = FakeSynthesizer::new(Duration::from_millis(20));
    let (output, log) = fake_output(&synth);

    let pipeline = VoicePipeline::builder(dir.path())
        .synthesizer(Arc::new(synth.clone()))
        .converter(Arc::new(FakeConverter::failing_midway()))
        .sink_factory(output)
        .profile_store(custom_store())
        .pause(Duration::ZERO)
        .build("echo")
        .unwrap();
    let events = pipeline.event_receiver();

    pipeline.speak("First.");
    pipeline.speak("Second.");
    let seen = wait_settled(&events, 2);

    assert_eq!(
        seen.iter()
            .filter(|e| matches!(e, PipelineEvent::Finished { .. }))
            .count(),
        2
    );
    assert_eq!(log.lock().played, vec!["First.", "Second."]);
    assert_eq!(wav_files(dir.path()), 2);
    assert_eq!(pipeline.stats().conversion_fallbacks, 2);

    pipeline.shutdown();
}

/// Test that a synthesis failure skips only that utterance
#[test]
fn test_synthesis_failure_skips_utterance() {
    let dir = tempfile::tempdir().unwrap();
    let synth = FakeSynthesizer::new(Duration::from_millis(20)).failing_on("BOOM");
    let (output, log) = fake_output(&synth);

    let pipeline = VoicePipeline::builder(dir.path())
        .synthesizer(Arc::new(synth.clone()))
        .sink_factory(output)
        .pause(Duration::ZERO)
        .build("tachyon")
        .unwrap();
    let events = pipeline.event_receiver();

    pipeline.speak("Before.");
    let broken = pipeline.speak("BOOM").unwrap();
    pipeline.speak("After.");

    let seen = wait_settled(&events, 3);
    assert!(seen
        .iter()
        .any(|e| matches!(e, PipelineEvent::Skipped { id, .. } if *id == broken)));
    assert_eq!(log.lock().played, vec!["Before.", "After."]);
    assert_eq!(pipeline.stats().failed, 1);

    pipeline.shutdown();
}

/// Test that text reduced to nothing by tag removal is skipped
#[test]
fn test_tag_only_text_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let synth = FakeSynthesizer::new(Duration::from_millis(20));
    let (output, log) = fake_output(&synth);

    let pipeline = VoicePipeline::builder(dir.path())
        .synthesizer(Arc::new(synth.clone()))
        .sink_factory(output)
        .build("tachyon")
        .unwrap();
    let events = pipeline.event_receiver();

    assert!(pipeline.speak("   ").is_none());
    pipeline.speak("[happy]");

    let seen = wait_settled(&events, 1);
    assert!(matches!(seen.last(), Some(PipelineEvent::Skipped { .. })));
    assert!(synth.calls().is_empty());
    assert!(log.lock().played.is_empty());

    pipeline.shutdown();
}

/// Test that progress callbacks receive mouth openness while playing
#[test]
fn test_progress_callback_receives_openness() {
    let dir = tempfile::tempdir().unwrap();
    let synth = FakeSynthesizer::new(Duration::from_millis(200));
    let (output, _log) = fake_output(&synth);

    let pipeline = VoicePipeline::builder(dir.path())
        .synthesizer(Arc::new(synth.clone()))
        .sink_factory(output)
        .tick_rate(50)
        .build("tachyon")
        .unwrap();
    let events = pipeline.event_receiver();

    let values = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Arc::clone(&values);
    pipeline.enqueue(
        "Watch my lips.",
        Some(Box::new(move |openness| sink.lock().push(openness))),
    );
    wait_settled(&events, 1);

    let values = values.lock();
    assert!(!values.is_empty());
    assert!(values.iter().all(|v| (0.3..=1.0).contains(v)));

    pipeline.shutdown();
}
