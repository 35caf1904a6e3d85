//! End-to-end engine scenarios
//!
//! Exercises the full chain (pipeline -> combiner -> output task -> sink)
//! against an in-memory sink, at the byte level.

use std::time::{Duration, Instant};

use undertone::audio::ring_buffer::PcmRingBuffer;
use undertone::audio::sink::{MockSink, MockSinkHandle};
use undertone::audio::volume::scale_factor;
use undertone::audio::AudioStreamInfo;
use undertone::events::TaskEvent;
use undertone::output::OutputTask;
use undertone::pipeline::{Combiner, MemorySource, PcmSource, StreamPipeline};
use undertone::{EngineConfig, Player, PlayerState, TransportCommand};

fn mono16() -> AudioStreamInfo {
    AudioStreamInfo::new(16_000, 16, 1)
}

fn test_config() -> EngineConfig {
    EngineConfig {
        read_timeout_ms: 5,
        write_timeout_ms: 10,
        idle_timeout_ms: 150,
        poll_interval_ms: 10,
        ..EngineConfig::default()
    }
}

fn wait_until(mut done: impl FnMut() -> bool, timeout: Duration, what: &str) {
    let deadline = Instant::now() + timeout;
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn samples_of(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect()
}

/// One second of 16 kHz mono sine PCM, produced through hound and read
/// back, so the pipeline input is real WAV-borne audio.
fn one_second_wav_pcm() -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for n in 0..16_000u32 {
            let t = n as f32 / 16_000.0;
            let sample = (t * 440.0 * std::f32::consts::TAU).sin();
            writer.write_sample((sample * 0.4 * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    cursor.set_position(0);
    let mut reader = hound::WavReader::new(cursor).unwrap();
    reader
        .samples::<i16>()
        .map(|s| s.unwrap())
        .flat_map(|s| s.to_le_bytes())
        .collect()
}

fn collect_output_events(task: &OutputTask, timeout: Duration) -> Vec<TaskEvent> {
    let deadline = Instant::now() + timeout;
    let mut events = Vec::new();
    while Instant::now() < deadline {
        if let Some(event) = task.read_event() {
            let stopped = matches!(event, TaskEvent::Stopped);
            events.push(event);
            if stopped {
                return events;
            }
        } else {
            std::thread::sleep(Duration::from_millis(2));
        }
    }
    panic!("output task never stopped; saw {:?}", events);
}

/// Scenario A: a 1-second media buffer at volume 1.0 flows through the
/// whole engine byte-for-byte, and the output task walks its full
/// lifecycle, ending in a starvation-driven auto-stop.
#[test]
fn full_buffer_reaches_the_sink_byte_for_byte() {
    let config = test_config();
    let pcm = one_second_wav_pcm();
    assert_eq!(pcm.len(), 32_000);

    let (output_producer, output_consumer) =
        PcmRingBuffer::with_capacity(config.output_buffer_bytes);
    let (combiner, media_input, _announcement_input) =
        Combiner::start(output_producer, &config).unwrap();

    let source = MemorySource::new(mono16(), pcm.clone());
    let pipeline = StreamPipeline::start(Box::new(source), media_input, "media", &config).unwrap();

    // Let the rings pre-fill so the drain loop starts with data on hand
    std::thread::sleep(Duration::from_millis(50));

    let sink = MockSink::new();
    let sink_handle = sink.handle();
    let task = OutputTask::start(Box::new(sink), output_consumer, mono16(), &config).unwrap();

    let events = collect_output_events(&task, Duration::from_secs(5));

    assert!(matches!(events[0], TaskEvent::Starting));
    assert!(matches!(events[1], TaskEvent::Started));
    assert!(matches!(events[2], TaskEvent::Running));
    let n = events.len();
    assert!(matches!(events[n - 3], TaskEvent::Idle));
    assert!(matches!(events[n - 2], TaskEvent::Stopping));
    assert!(matches!(events[n - 1], TaskEvent::Stopped));
    assert!(!events.iter().any(|e| matches!(e, TaskEvent::Warning(_))));

    assert_eq!(sink_handle.written(), pcm);

    task.join().unwrap();
    pipeline.into_input().unwrap();
    combiner.stop().unwrap();
    combiner.join().unwrap();
}

/// Scenario B: with the combiner inputs driven directly, media samples
/// observed at the sink while ducked carry exactly the duck gain, the
/// announcement passes at unity, and restoring the ratio to 1.0 makes the
/// media path byte-exact again.
#[test]
fn ducking_overlap_is_sample_exact_at_the_sink() {
    // Long idle timeout: this test paces the writes by hand
    let config = EngineConfig {
        idle_timeout_ms: 5_000,
        ..test_config()
    };
    let (output_producer, output_consumer) =
        PcmRingBuffer::with_capacity(config.output_buffer_bytes);
    let (combiner, mut media, mut announcement) =
        Combiner::start(output_producer, &config).unwrap();

    let sink = MockSink::new();
    let sink_handle = sink.handle();
    let task = OutputTask::start(Box::new(sink), output_consumer, mono16(), &config).unwrap();

    let write_all = |input: &mut undertone::pipeline::CombinerInput, samples: &[i16]| {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let mut sent = 0;
        while sent < bytes.len() {
            sent += input.write(&bytes[sent..], Duration::from_millis(100));
        }
    };
    let drained = |expected: usize| {
        let handle = sink_handle.clone();
        wait_until(
            move || handle.written_len() >= expected,
            Duration::from_secs(3),
            "sink to drain",
        );
    };

    // Undamped media
    let loud: Vec<i16> = vec![12_000; 400];
    write_all(&mut media, &loud);
    drained(800);

    // Ducked media
    media.set_duck(0.3);
    let factor = scale_factor(0.3);
    write_all(&mut media, &loud);
    drained(1600);

    // Announcement at unity while media stays ducked
    let voice: Vec<i16> = vec![-8_000; 400];
    write_all(&mut announcement, &voice);
    drained(2400);

    // Duck ratio restored to unity
    media.set_duck(1.0);
    write_all(&mut media, &loud);
    drained(3200);

    let samples = samples_of(&sink_handle.written());
    let ducked = ((12_000i32 * factor as i32) >> 15) as i16;
    assert_eq!(&samples[..400], &vec![12_000i16; 400][..]);
    assert_eq!(&samples[400..800], &vec![ducked; 400][..]);
    assert_eq!(&samples[800..1200], &vec![-8_000i16; 400][..]);
    assert_eq!(&samples[1200..1600], &vec![12_000i16; 400][..]);

    task.stop().unwrap();
    collect_output_events(&task, Duration::from_secs(3));
    task.join().unwrap();
    combiner.stop().unwrap();
    combiner.join().unwrap();
}

/// Scenario C: a ring holding 1000 of its 1024 bytes accepts only the 24
/// bytes that fit, and a subsequent large read returns exactly the 1024
/// buffered bytes in order.
#[test]
fn ring_buffer_short_write_and_ordered_drain() {
    let (mut producer, mut consumer) = PcmRingBuffer::with_capacity(1024);

    let first: Vec<u8> = (0..1000u32).map(|i| (i % 199) as u8).collect();
    assert_eq!(producer.write(&first, Duration::from_millis(100)), 1000);

    let second = [0xEE; 100];
    assert_eq!(producer.write(&second, Duration::from_millis(100)), 24);

    let mut out = vec![0u8; 1124];
    let n = consumer.read(&mut out, Duration::from_millis(100));
    assert_eq!(n, 1024);
    assert_eq!(&out[..1000], &first[..]);
    assert!(out[1000..1024].iter().all(|&b| b == 0xEE));
}

/// Source that sleeps between small chunks so the stream behaves like a
/// real-time producer instead of draining instantly.
struct PacedConstantSource {
    info: AudioStreamInfo,
    value: i16,
    remaining: usize,
    delay: Duration,
}

impl PacedConstantSource {
    fn new(value: i16, samples: usize) -> Self {
        Self {
            info: mono16(),
            value,
            remaining: samples,
            delay: Duration::from_millis(5),
        }
    }
}

impl PcmSource for PacedConstantSource {
    fn stream_info(&self) -> AudioStreamInfo {
        self.info
    }

    fn read(&mut self, buf: &mut [u8]) -> undertone::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }
        std::thread::sleep(self.delay);
        let samples = (buf.len() / 2).min(256).min(self.remaining);
        for chunk in buf[..samples * 2].chunks_exact_mut(2) {
            chunk.copy_from_slice(&self.value.to_le_bytes());
        }
        self.remaining -= samples;
        Ok(samples * 2)
    }
}

/// Orchestrated ducking: while an announcement interrupts playing media,
/// media samples reaching the sink carry the duck gain exactly once
/// (never compounded), and full volume returns after the announcement.
#[tokio::test]
async fn announcement_ducks_media_exactly_once_and_restores() {
    let config = test_config();
    let ducking = config.ducking_ratio;
    let media_value = 16_000i16;
    let voice_value = -12_000i16;

    let sink = MockSink::new();
    let sink_handle: MockSinkHandle = sink.handle();
    let player = Player::spawn(Box::new(sink), config).unwrap();
    let mut status = player.status();

    // ~2.5 s of paced media
    let media = PacedConstantSource::new(media_value, 40_000);
    player.play(Box::new(media), false).await.unwrap();
    wait_player_state(&mut status, PlayerState::Playing).await;

    // ~0.5 s announcement partway through
    tokio::time::sleep(Duration::from_millis(200)).await;
    let announcement = PacedConstantSource::new(voice_value, 8_000);
    player.play(Box::new(announcement), true).await.unwrap();
    wait_player_state(&mut status, PlayerState::Announcing).await;
    wait_player_state(&mut status, PlayerState::Playing).await;

    // Let media run on at restored volume, then stop
    tokio::time::sleep(Duration::from_millis(300)).await;
    player.transport(TransportCommand::Stop).await.unwrap();
    wait_player_state(&mut status, PlayerState::Idle).await;
    player.shutdown().await.unwrap();

    let factor = scale_factor(ducking);
    let ducked = ((media_value as i32 * factor as i32) >> 15) as i16;
    let double_ducked = ((ducked as i32 * factor as i32) >> 15) as i16;

    let samples = samples_of(&sink_handle.written());
    assert!(!samples.is_empty());
    for sample in &samples {
        assert!(
            *sample == media_value || *sample == ducked || *sample == voice_value,
            "unexpected sample {} at the sink (double-ducked would be {})",
            sample,
            double_ducked,
        );
    }
    // The overlap actually happened, in both gains
    assert!(samples.contains(&ducked), "no ducked media reached the sink");
    assert!(samples.contains(&voice_value), "no announcement reached the sink");
    // After the announcement, media returned to full volume
    let last_media = samples.iter().rposition(|&s| s == media_value).unwrap();
    let last_ducked = samples.iter().rposition(|&s| s == ducked).unwrap();
    assert!(last_media > last_ducked, "media volume was never restored");
}

async fn wait_player_state(
    status: &mut tokio::sync::watch::Receiver<undertone::PlayerStatus>,
    want: PlayerState,
) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if status.borrow_and_update().state == want {
                return;
            }
            status.changed().await.expect("status channel closed");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("player never reached {:?}", want));
}
