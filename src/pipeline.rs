//! Pipeline orchestration
//!
//! [`Pipeline::start`] builds the shared structures, spawns one thread per
//! real-time role and exposes the lifecycle API the transport and the
//! rest of the device call into.
//!
//! | Thread           | Role                                               |
//! |------------------|----------------------------------------------------|
//! | `audio-decode`   | state machine, jitter → decode → buffer pool       |
//! | `audio-sink`     | buffer pool → hardware sink                        |
//! | `liveness`       | ping timeout → reconnect                           |
//! | `mic-encode`     | microphone → µ-law frames → transport              |
//! | `jitter-monitor` | periodic fill-level log                            |
//!
//! The network receive path runs on the transport's own thread and only
//! calls [`Pipeline::route`].

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::audio::{
    AlwaysActive, BufferPool, JitterBuffer, JitterBufferStats, MicrophoneSource, OutboundEncoder,
    PlaybackConsumer, PlaybackSink, PlaybackState, PlaybackStateMachine, PoolStats,
    PresenceSignal, SharedPlaybackState, SinkHealth, SinkWriter, Volume, VolumeInput,
};
use crate::audio::playback::SinkStats;
use crate::codec::AudioDecoder;
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::network::{
    FrameHandler, FrameRouter, LivenessState, LivenessWatchdog, LogOnlyOta, OtaTrigger,
    RouteOutcome, RouterStats, Transport,
};
use crate::protocol::Frame;
use crate::shutdown::ShutdownSignal;

/// External collaborators the pipeline drives
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub sink: Box<dyn PlaybackSink>,
    pub microphone: Option<Box<dyn MicrophoneSource>>,
    pub ota: Arc<dyn OtaTrigger>,
    pub volume: Arc<dyn VolumeInput>,
    pub presence: Arc<dyn PresenceSignal>,
}

impl Collaborators {
    /// Transport and sink are required; everything else has a default
    /// (no microphone, log-only OTA, full volume, always active).
    pub fn new(transport: Arc<dyn Transport>, sink: Box<dyn PlaybackSink>) -> Self {
        Self {
            transport,
            sink,
            microphone: None,
            ota: Arc::new(LogOnlyOta),
            volume: Arc::new(Volume::default()),
            presence: Arc::new(AlwaysActive),
        }
    }

    pub fn with_microphone(mut self, microphone: Box<dyn MicrophoneSource>) -> Self {
        self.microphone = Some(microphone);
        self
    }

    pub fn with_ota(mut self, ota: Arc<dyn OtaTrigger>) -> Self {
        self.ota = ota;
        self
    }

    pub fn with_volume(mut self, volume: Arc<dyn VolumeInput>) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_presence(mut self, presence: Arc<dyn PresenceSignal>) -> Self {
        self.presence = presence;
        self
    }
}

/// State shared between the pipeline threads.
///
/// Only the jitter buffer and the buffer pool carry data across threads;
/// the rest are single-writer flags and timestamps.
pub struct PipelineContext {
    pub config: AppConfig,
    pub jitter: Arc<JitterBuffer>,
    pub pool: Arc<BufferPool>,
    pub playback: Arc<SharedPlaybackState>,
    pub sink_health: Arc<SinkHealth>,
    pub liveness: Arc<LivenessState>,
    /// Transport session generation, bumped on every disconnect
    pub session: Arc<AtomicU64>,
    pub transport: Arc<dyn Transport>,
    pub volume: Arc<dyn VolumeInput>,
    pub shutdown: Arc<ShutdownSignal>,
}

/// Snapshot of all pipeline counters
#[derive(Debug, Clone)]
pub struct PipelineStats {
    pub playback: PlaybackState,
    pub jitter: JitterBufferStats,
    pub pool: PoolStats,
    pub sink: SinkStats,
    pub router: RouterStats,
}

pub struct Pipeline {
    ctx: PipelineContext,
    router: FrameRouter,
    /// UID of the tag currently on the reader
    last_uid: Mutex<Option<Vec<u8>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Pipeline {
    /// Validate `config`, build the shared structures and start all
    /// pipeline threads.
    pub fn start(config: AppConfig, collaborators: Collaborators) -> Result<Arc<Self>> {
        config.validate()?;
        let Collaborators {
            transport,
            sink,
            microphone,
            ota,
            volume,
            presence,
        } = collaborators;

        let audio = &config.audio;
        let ctx = PipelineContext {
            jitter: Arc::new(JitterBuffer::new(audio.jitter_capacity, audio.max_evictions)),
            pool: Arc::new(BufferPool::new(audio.buffer_count, audio.buffer_size)),
            playback: Arc::new(SharedPlaybackState::new()),
            sink_health: Arc::new(SinkHealth::new()),
            liveness: Arc::new(LivenessState::new()),
            session: Arc::new(AtomicU64::new(0)),
            transport,
            volume,
            shutdown: Arc::new(ShutdownSignal::new()),
            config: config.clone(),
        };
        let router = FrameRouter::new(
            ctx.jitter.clone(),
            ctx.liveness.clone(),
            ctx.transport.clone(),
            ota,
            audio.send_wait(),
        );

        let pipeline = Arc::new(Self {
            ctx,
            router,
            last_uid: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
        });

        if let Err(e) = pipeline.spawn_workers(sink, microphone, presence) {
            pipeline.shutdown();
            return Err(e);
        }

        tracing::info!(
            "Pipeline started: codec={:?}, {} Hz, start threshold {} bytes",
            config.audio.codec,
            config.audio.sample_rate,
            config.audio.start_threshold_bytes()
        );
        Ok(pipeline)
    }

    fn spawn_workers(
        &self,
        sink: Box<dyn PlaybackSink>,
        microphone: Option<Box<dyn MicrophoneSource>>,
        presence: Arc<dyn PresenceSignal>,
    ) -> Result<()> {
        let ctx = &self.ctx;
        let config = &ctx.config;

        let consumer = PlaybackConsumer::new(
            ctx.jitter.clone(),
            ctx.pool.clone(),
            ctx.sink_health.clone(),
            ctx.volume.clone(),
            PlaybackStateMachine::new(
                config.audio.start_threshold_bytes(),
                config.audio.stall_timeout(),
                ctx.playback.clone(),
            ),
            AudioDecoder::new(config.audio.codec, config.audio.stereo_output),
            ctx.session.clone(),
            config.audio.poll_interval(),
            config.audio.poll_interval(),
        );
        let shutdown = ctx.shutdown.clone();
        self.spawn_worker("audio-decode", move || consumer.run(&shutdown))?;

        let writer = SinkWriter::new(
            ctx.pool.clone(),
            ctx.sink_health.clone(),
            sink,
            config.audio.sink_write_timeout(),
            config.audio.poll_interval(),
        );
        let shutdown = ctx.shutdown.clone();
        self.spawn_worker("audio-sink", move || writer.run(&shutdown))?;

        let watchdog = LivenessWatchdog::new(
            ctx.liveness.clone(),
            config.liveness.ping_timeout(),
            config.liveness.grace(),
        );
        let transport = ctx.transport.clone();
        let check_interval = config.liveness.check_interval();
        let reconnect_delay = config.transport.reconnect_delay();
        let shutdown = ctx.shutdown.clone();
        self.spawn_worker("liveness", move || {
            watchdog.run(transport, check_interval, reconnect_delay, &shutdown)
        })?;

        match microphone {
            Some(mic) if config.mic.enabled => {
                let encoder = OutboundEncoder::new(
                    mic,
                    config.mic.chunk_samples,
                    ctx.transport.clone(),
                    ctx.liveness.clone(),
                    ctx.playback.clone(),
                    presence,
                    config.audio.poll_interval(),
                );
                let shutdown = ctx.shutdown.clone();
                self.spawn_worker("mic-encode", move || encoder.run(&shutdown))?;
            }
            Some(_) => tracing::info!("Microphone disabled by configuration"),
            None => tracing::debug!("No microphone attached"),
        }

        let jitter = ctx.jitter.clone();
        let interval = config.audio.monitor_interval();
        let shutdown = ctx.shutdown.clone();
        self.spawn_worker("jitter-monitor", move || {
            while !shutdown.wait(interval) {
                let stats = jitter.stats();
                tracing::info!(
                    "[Jitter] used={}, free={} (of {}), evicted={}, rejected={}",
                    stats.used,
                    stats.free(),
                    stats.capacity,
                    stats.evicted_chunks,
                    stats.rejected
                );
            }
        })?;

        Ok(())
    }

    fn spawn_worker<F>(&self, name: &str, body: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(body)
            .map_err(Error::Io)?;
        self.workers.lock().push(handle);
        Ok(())
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Feed one inbound frame
    pub fn route(&self, raw: &[u8]) -> RouteOutcome {
        self.router.route(raw)
    }

    /// Fresh transport connection: restart liveness timing, announce the
    /// device version and re-announce the tag on the reader.
    pub fn on_connected(&self) {
        self.ctx.liveness.mark_connected(Instant::now());
        tracing::info!("Peer connected");

        let device = &self.ctx.config.device;
        let version = Frame::version(&device.hardware_version, &device.software_version);
        if let Err(e) = self.ctx.transport.send_binary(version.encode()) {
            tracing::warn!("Failed to send version announcement: {}", e);
        }

        let uid = self.last_uid.lock().clone();
        if let Some(uid) = uid {
            tracing::info!("Re-sending current RFID tag after connect");
            if let Err(e) = self.send_rfid_frame(Some(&uid)) {
                tracing::warn!("Failed to re-send RFID tag: {}", e);
            }
        }
    }

    /// Transport lost: stale audio from the dead session is discarded and
    /// the next session starts from fresh decoder state.
    pub fn on_disconnected(&self) {
        self.ctx.liveness.mark_disconnected();
        self.ctx.session.fetch_add(1, Ordering::AcqRel);
        let stale = self.ctx.jitter.used_bytes();
        self.ctx.jitter.clear();
        tracing::warn!("Peer disconnected, discarded {} buffered audio bytes", stale);
    }

    pub fn is_playing(&self) -> bool {
        self.ctx.playback.is_playing()
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.ctx.playback.get()
    }

    /// Report a tag placed on (`Some(uid)`) or removed from (`None`) the
    /// reader. The tag is remembered and re-sent after every reconnect.
    pub fn send_rfid_event(&self, uid: Option<&[u8]>) -> Result<()> {
        let frame = Frame::rfid(uid).map_err(|e| {
            tracing::warn!("RFID event not sent: {}", e);
            e
        })?;
        *self.last_uid.lock() = uid.map(<[u8]>::to_vec);

        self.ctx.transport.send_binary(frame.encode()).map_err(|e| {
            tracing::warn!("RFID event not sent: {}", e);
            Error::from(e)
        })
    }

    fn send_rfid_frame(&self, uid: Option<&[u8]>) -> Result<()> {
        let frame = Frame::rfid(uid)?;
        self.ctx.transport.send_binary(frame.encode())?;
        Ok(())
    }

    /// Ask every pipeline thread to stop; returns immediately.
    pub fn request_shutdown(&self) {
        self.ctx.shutdown.request();
    }

    /// Stop and wait for every pipeline thread to exit.
    pub fn shutdown(&self) {
        self.request_shutdown();
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        if workers.is_empty() {
            return;
        }
        for handle in workers {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                tracing::error!("Pipeline thread {} panicked", name);
            }
        }
        tracing::info!("Pipeline stopped");
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            playback: self.playback_state(),
            jitter: self.ctx.jitter.stats(),
            pool: self.ctx.pool.stats(),
            sink: self.ctx.sink_health.stats(),
            router: self.router.stats(),
        }
    }
}

impl FrameHandler for Pipeline {
    fn on_frame(&self, raw: &[u8]) {
        self.route(raw);
    }

    fn on_connected(&self) {
        Pipeline::on_connected(self);
    }

    fn on_disconnected(&self) {
        Pipeline::on_disconnected(self);
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
