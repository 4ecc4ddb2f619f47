//! End-to-end pipeline tests with in-memory sink, microphone and transport

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use audio_link::audio::{MicrophoneSource, PlaybackSink, PlaybackState};
use audio_link::codec::Codec;
use audio_link::error::{AudioError, TransportError};
use audio_link::network::{OtaTrigger, Transport};
use audio_link::{AppConfig, Collaborators, Pipeline};

#[derive(Default)]
struct FakeTransport {
    connected: AtomicBool,
    sent: Mutex<Vec<Bytes>>,
}

impl FakeTransport {
    fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }

    fn sent_of_type(&self, tag: u8) -> Vec<Bytes> {
        self.sent().into_iter().filter(|f| f.first() == Some(&tag)).collect()
    }

    fn clear(&self) {
        self.sent.lock().clear();
    }
}

impl Transport for FakeTransport {
    fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
    }

    fn send_binary(&self, frame: Bytes) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.sent.lock().push(frame);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

struct CaptureSink {
    written: Arc<Mutex<Vec<u8>>>,
}

impl PlaybackSink for CaptureSink {
    fn write(&mut self, bytes: &[u8], _timeout: Duration) -> Result<usize, AudioError> {
        self.written.lock().extend_from_slice(bytes);
        Ok(bytes.len())
    }
}

struct RampMicrophone;

impl MicrophoneSource for RampMicrophone {
    fn read(&mut self, buf: &mut [i16]) -> Result<usize, AudioError> {
        thread::sleep(Duration::from_millis(2));
        for (i, sample) in buf.iter_mut().enumerate() {
            *sample = (i as i16 + 1) * 500;
        }
        Ok(buf.len())
    }
}

#[derive(Default)]
struct RecordingOta {
    urls: Mutex<Vec<String>>,
}

impl OtaTrigger for RecordingOta {
    fn start_update(&self, url: &str) {
        self.urls.lock().push(url.to_string());
    }
}

/// 8 kHz mono PCM16, 10 ms start latency (160 bytes)
fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.audio.codec = Codec::Pcm16;
    config.audio.sample_rate = 8000;
    config.audio.stereo_output = false;
    config.audio.start_latency_ms = 10;
    config.audio.stall_timeout_ms = 50;
    config.audio.poll_interval_ms = 5;
    config.audio.buffer_count = 8;
    config.audio.buffer_size = 256;
    config.mic.chunk_samples = 4;
    config
}

struct Harness {
    pipeline: Arc<Pipeline>,
    transport: Arc<FakeTransport>,
    written: Arc<Mutex<Vec<u8>>>,
}

fn start(config: AppConfig, mic: bool) -> Harness {
    let transport = Arc::new(FakeTransport::default());
    let written = Arc::new(Mutex::new(Vec::new()));
    let sink = CaptureSink {
        written: written.clone(),
    };
    let mut collaborators = Collaborators::new(transport.clone(), Box::new(sink));
    if mic {
        collaborators = collaborators.with_microphone(Box::new(RampMicrophone));
    }
    let pipeline = Pipeline::start(config, collaborators).unwrap();
    Harness {
        pipeline,
        transport,
        written,
    }
}

fn connect(h: &Harness) {
    h.transport.connected.store(true, Ordering::Release);
    h.pipeline.on_connected();
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn audio_frame(samples: &[i16]) -> Vec<u8> {
    let mut raw = vec![0x02];
    for sample in samples {
        raw.extend_from_slice(&sample.to_le_bytes());
    }
    raw
}

#[test]
fn test_connect_announces_version() {
    let h = start(test_config(), false);
    connect(&h);

    let control = h.transport.sent_of_type(0x04);
    assert_eq!(control.len(), 1);
    assert_eq!(&control[0][1..], b"HW_v2.0,FW_v2.0.1");
    assert!(h.pipeline.context().liveness.is_connected());
}

#[test]
fn test_ping_is_answered() {
    let h = start(test_config(), false);
    connect(&h);
    h.transport.clear();

    h.pipeline.route(&[0x05]);
    assert_eq!(h.transport.sent(), vec![Bytes::from_static(&[0x06])]);
    assert!(h.pipeline.context().liveness.last_ping_at().is_some());
}

#[test]
fn test_audio_reaches_sink_in_order() {
    let h = start(test_config(), false);
    connect(&h);

    let samples: Vec<i16> = (0..400).map(|i| (i * 37 - 7000) as i16).collect();
    for chunk in samples.chunks(100) {
        h.pipeline.route(&audio_frame(chunk));
    }

    let expected: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    assert!(wait_until(Duration::from_secs(2), || h.written.lock().len() >= expected.len()));
    assert_eq!(*h.written.lock(), expected);

    // Once drained and idle for the stall timeout, playback reports underrun
    assert!(wait_until(Duration::from_secs(2), || {
        h.pipeline.playback_state() == PlaybackState::Underrun
    }));
    assert!(!h.pipeline.is_playing());

    let stats = h.pipeline.stats();
    assert_eq!(stats.sink.bytes_written, expected.len() as u64);
    assert!(stats.pool.acquire_timeouts == 0);
}

#[test]
fn test_below_threshold_does_not_play() {
    let h = start(test_config(), false);
    connect(&h);

    // 50 samples = 100 bytes, threshold is 160
    h.pipeline.route(&audio_frame(&[1000; 50]));
    thread::sleep(Duration::from_millis(100));

    assert_eq!(h.pipeline.playback_state(), PlaybackState::Buffering);
    assert!(h.written.lock().is_empty());
    assert_eq!(h.pipeline.context().jitter.used_bytes(), 100);
}

#[test]
fn test_disconnect_discards_buffered_audio() {
    let h = start(test_config(), false);
    connect(&h);

    h.pipeline.route(&audio_frame(&[1000; 50]));
    assert_eq!(h.pipeline.context().jitter.used_bytes(), 100);

    h.transport.connected.store(false, Ordering::Release);
    h.pipeline.on_disconnected();
    assert_eq!(h.pipeline.context().jitter.used_bytes(), 0);
    assert!(!h.pipeline.context().liveness.is_connected());
}

#[test]
fn test_rfid_events_and_replay_on_connect() {
    let h = start(test_config(), false);
    connect(&h);
    h.transport.clear();

    h.pipeline.send_rfid_event(Some(&[0xDE, 0xAD, 0xBE, 0xEF])).unwrap();
    assert_eq!(
        h.transport.sent_of_type(0x03),
        vec![Bytes::from_static(&[0x03, 0xDE, 0xAD, 0xBE, 0xEF])]
    );

    // Too long: rejected, previous tag still remembered
    assert!(h.pipeline.send_rfid_event(Some(&[0u8; 11])).is_err());

    // Reconnect: version first, then the current tag
    h.transport.clear();
    h.pipeline.on_disconnected();
    connect(&h);
    let sent = h.transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0][0], 0x04);
    assert_eq!(&sent[1][..], &[0x03, 0xDE, 0xAD, 0xBE, 0xEF]);

    // Removal is sent bare and forgets the tag
    h.transport.clear();
    h.pipeline.send_rfid_event(None).unwrap();
    assert_eq!(h.transport.sent(), vec![Bytes::from_static(&[0x03])]);

    h.transport.clear();
    connect(&h);
    assert!(h.transport.sent_of_type(0x03).is_empty());
}

#[test]
fn test_ota_command_reaches_trigger() {
    let transport = Arc::new(FakeTransport::default());
    let ota = Arc::new(RecordingOta::default());
    let sink = CaptureSink {
        written: Arc::new(Mutex::new(Vec::new())),
    };
    let collaborators =
        Collaborators::new(transport.clone(), Box::new(sink)).with_ota(ota.clone());
    let pipeline = Pipeline::start(test_config(), collaborators).unwrap();

    let mut raw = vec![0x04];
    raw.extend_from_slice(b"OTA=https://updates.example.com/fw.bin");
    pipeline.route(&raw);

    assert_eq!(
        *ota.urls.lock(),
        vec!["https://updates.example.com/fw.bin".to_string()]
    );
}

#[test]
fn test_microphone_streams_only_while_connected() {
    let h = start(test_config(), true);
    thread::sleep(Duration::from_millis(50));
    assert!(h.transport.sent().is_empty());

    connect(&h);
    assert!(wait_until(Duration::from_secs(2), || {
        h.transport.sent_of_type(0x02).len() >= 3
    }));
    for frame in h.transport.sent_of_type(0x02) {
        assert_eq!(frame.len(), 5);
    }
}

#[test]
fn test_microphone_muted_while_playing() {
    let mut config = test_config();
    // Long stall timeout keeps the state machine in Playing
    config.audio.stall_timeout_ms = 60_000;
    let h = start(config, true);
    connect(&h);

    h.pipeline.route(&audio_frame(&[1000; 200]));
    assert!(wait_until(Duration::from_secs(2), || h.pipeline.is_playing()));

    h.transport.clear();
    assert!(wait_until(Duration::from_secs(2), || {
        h.transport.sent_of_type(0x02).len() >= 3
    }));
    // The first frame may have been gated just before playback started
    let frames = h.transport.sent_of_type(0x02);
    assert!(frames
        .iter()
        .skip(1)
        .all(|frame| frame[1..].iter().all(|&b| b == 0xFF)));
}

#[test]
fn test_shutdown_is_prompt() {
    let h = start(test_config(), true);
    connect(&h);

    let started = Instant::now();
    h.pipeline.shutdown();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(h.pipeline.context().shutdown.is_requested());
}

#[test]
fn test_invalid_config_is_rejected() {
    let mut config = test_config();
    config.audio.jitter_capacity = 16;
    let transport = Arc::new(FakeTransport::default());
    let sink = CaptureSink {
        written: Arc::new(Mutex::new(Vec::new())),
    };
    assert!(Pipeline::start(config, Collaborators::new(transport, Box::new(sink))).is_err());
}

#[test]
fn test_new_session_starts_from_fresh_adpcm_state() {
    let mut config = test_config();
    // 10 ms at 8 kHz = 80 samples = 40 ADPCM bytes
    config.audio.codec = Codec::ImaAdpcm;
    let h = start(config, false);
    connect(&h);

    // Reset frame: predictor 20000, index 0, 80 zero codes
    let mut first = vec![0x02];
    first.extend_from_slice(&20_000i16.to_le_bytes());
    first.push(0);
    first.extend_from_slice(&[0u8; 40]);
    h.pipeline.route(&first);
    assert!(wait_until(Duration::from_secs(2), || h.written.lock().len() >= 160));
    assert_eq!(&h.written.lock()[..2], &20_000i16.to_le_bytes());

    h.transport.connected.store(false, Ordering::Release);
    h.pipeline.on_disconnected();
    connect(&h);

    // Continuation frame: carried state must not survive the reconnect
    let mut second = vec![0x02, 0x00, 0x00, 0xFF];
    second.extend_from_slice(&[0u8; 40]);
    h.pipeline.route(&second);
    assert!(wait_until(Duration::from_secs(2), || h.written.lock().len() >= 320));

    let written = h.written.lock();
    assert_eq!(&written[160..162], &0i16.to_le_bytes());
    assert!(written[160..320].iter().all(|&b| b == 0));
}

/// Accepts nothing, as if the hardware stopped consuming
struct StalledSink;

impl PlaybackSink for StalledSink {
    fn write(&mut self, _bytes: &[u8], _timeout: Duration) -> Result<usize, AudioError> {
        thread::sleep(Duration::from_millis(1));
        Ok(0)
    }
}

#[test]
fn test_pool_wait_bounded_by_poll_interval_when_sink_stalls() {
    let mut config = test_config();
    config.audio.sink_write_timeout_ms = 1000;
    let transport = Arc::new(FakeTransport::default());
    let pipeline = Pipeline::start(
        config,
        Collaborators::new(transport.clone(), Box::new(StalledSink)),
    )
    .unwrap();
    transport.connected.store(true, Ordering::Release);
    pipeline.on_connected();

    // 12 buffers' worth of audio for an 8-buffer pool
    for _ in 0..12 {
        pipeline.route(&audio_frame(&[1000; 100]));
    }

    // Pool exhaustion shows up within a few poll intervals, not a sink timeout
    assert!(wait_until(Duration::from_millis(400), || {
        pipeline.stats().pool.acquire_timeouts > 0
    }));
}
