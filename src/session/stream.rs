//! The stream session
//!
//! Three contexts call in:
//!
//! - the control surface: `start_send`, `start_receive`, `stop`, `set_gain`
//! - the audio callback: `process_input` (sender) or `process_output`
//!   (receiver), once per device period; never blocks or allocates
//! - the network receive path: `handle_datagram`, once per datagram
//!
//! The active link (transport plus, for receivers, ring and gate) lives
//! behind a `RwLock`. The audio callback only ever `try_read`s it and emits
//! silence if the control surface is mid-swap. `stop` stores `Idle` and takes
//! the link out before closing the transport, so no callback sees a
//! half-torn-down link.

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use uuid::Uuid;

use crate::audio::buffer::{create_shared_buffer, SharedRingBuffer};
use crate::audio::gain::{self, GainControl};
use crate::audio::gate::{ReadinessEdge, ReadinessGate};
use crate::codec::{FrameDecoder, FrameEncoder};
use crate::config::StreamConfig;
use crate::constants::EVENT_CHANNEL_CAPACITY;
use crate::error::{AudioError, Error, NetworkError, SessionError};
use crate::network::{Connector, DatagramHandler, Transport};
use crate::session::state::{AtomicSessionState, SessionEvent, SessionState};

/// Per-session scratch owned by the audio callback on the sending side.
/// Device periods are gathered into whole frames, one per channel.
struct SendScratch {
    encoder: FrameEncoder,
    pending: Vec<Vec<f32>>,
    filled: usize,
    frame: Vec<f32>,
}

/// One popped frame per channel, played out across device periods
struct PlayScratch {
    held: Vec<Vec<f32>>,
    position: usize,
}

struct SendLink {
    transport: Box<dyn Transport>,
    scratch: Mutex<SendScratch>,
}

struct ReceiveLink {
    transport: Box<dyn Transport>,
    buffer: SharedRingBuffer,
    gate: ReadinessGate,
    decoder: FrameDecoder,
    /// Decode target; holding it keeps the ring single-producer
    decoded: Mutex<Vec<f32>>,
    playout: Mutex<PlayScratch>,
}

enum Link {
    Send(SendLink),
    Receive(ReceiveLink),
}

impl Link {
    fn transport(&self) -> &dyn Transport {
        match self {
            Link::Send(link) => link.transport.as_ref(),
            Link::Receive(link) => link.transport.as_ref(),
        }
    }
}

#[derive(Default)]
struct Counters {
    frames_sent: AtomicU64,
    send_errors: AtomicU64,
    frames_received: AtomicU64,
    malformed_datagrams: AtomicU64,
    frames_played: AtomicU64,
    underruns: AtomicU64,
    dropped_events: AtomicU64,
}

impl Counters {
    fn reset(&self) {
        for counter in [
            &self.frames_sent,
            &self.send_errors,
            &self.frames_received,
            &self.malformed_datagrams,
            &self.frames_played,
            &self.underruns,
            &self.dropped_events,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy)]
struct SessionInfo {
    id: Uuid,
    started_at: DateTime<Utc>,
}

/// Snapshot of session counters
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub session_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub state: SessionState,
    pub gain_percent: f32,
    pub frames_sent: u64,
    pub send_errors: u64,
    pub frames_received: u64,
    pub malformed_datagrams: u64,
    pub frames_played: u64,
    pub overwritten_frames: u64,
    pub underruns: u64,
    pub backlog: usize,
    pub dropped_events: u64,
}

struct Shared {
    config: StreamConfig,
    connector: Arc<dyn Connector>,
    state: AtomicSessionState,
    gain: GainControl,
    link: RwLock<Option<Link>>,
    /// Serializes control commands
    control: Mutex<Option<SessionInfo>>,
    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,
    counters: Counters,
}

/// Handle to one streaming session. Clones share the session.
#[derive(Clone)]
pub struct StreamSession {
    shared: Arc<Shared>,
}

impl StreamSession {
    pub fn new(config: StreamConfig, connector: Arc<dyn Connector>) -> Self {
        let (events_tx, events_rx) = bounded(EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                config,
                connector,
                state: AtomicSessionState::new(SessionState::Idle),
                gain: GainControl::default(),
                link: RwLock::new(None),
                control: Mutex::new(None),
                events_tx,
                events_rx,
                counters: Counters::default(),
            }),
        }
    }

    // ---- control surface ------------------------------------------------

    /// Connect to `host:port` and start sending.
    ///
    /// On failure the session is back in `Idle` and a
    /// [`SessionEvent::ConnectionFailed`] is published. No retry.
    pub fn start_send(&self, host: &str, port: u16) -> crate::Result<()> {
        let shared = &self.shared;
        let mut info = shared.control.lock();

        shared.begin("start_send", SessionState::Connecting)?;
        tracing::info!("Connecting to {}:{}", host, port);

        let transport = match shared.connector.connect(host, port) {
            Ok(transport) => transport,
            Err(e) => return Err(shared.connection_failed(SessionState::Connecting, e)),
        };

        let describe = transport.describe();
        let frame_len = shared.config.frame_size;
        let channels = shared.config.channels.max(1) as usize;
        *shared.link.write() = Some(Link::Send(SendLink {
            transport,
            scratch: Mutex::new(SendScratch {
                encoder: FrameEncoder::new(shared.config.address.clone(), frame_len),
                pending: vec![vec![0.0; frame_len]; channels],
                filled: 0,
                frame: vec![0.0; frame_len],
            }),
        }));
        *info = Some(shared.new_info());
        shared.transition(SessionState::Connecting, SessionState::Sending);

        tracing::info!("Sending to {}", describe);
        Ok(())
    }

    /// Listen on `port` and start buffering incoming frames.
    pub fn start_receive(&self, port: u16) -> crate::Result<()> {
        let shared = &self.shared;
        let mut info = shared.control.lock();

        let current = shared.state.load();
        if current != SessionState::Idle {
            return Err(SessionError::InvalidState {
                command: "start_receive",
                state: current,
            }
            .into());
        }

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let handler: DatagramHandler = Arc::new(move |datagram: &[u8]| {
            if let Some(shared) = weak.upgrade() {
                shared.handle_datagram(datagram);
            }
        });

        let transport = match shared.connector.listen(port, handler) {
            Ok(transport) => transport,
            Err(e) => return Err(shared.connection_failed(SessionState::Idle, e)),
        };

        let config = &shared.config;
        let buffer = create_shared_buffer(config.ring_capacity, config.frame_size);
        let gate = ReadinessGate::new(buffer.clone(), config.ready_threshold);
        let describe = transport.describe();
        let channels = config.channels.max(1) as usize;
        *shared.link.write() = Some(Link::Receive(ReceiveLink {
            transport,
            buffer,
            gate,
            decoder: FrameDecoder::new(config.address.clone(), config.frame_size),
            decoded: Mutex::new(vec![0.0; config.frame_size]),
            playout: Mutex::new(PlayScratch {
                held: vec![vec![0.0; config.frame_size]; channels],
                position: config.frame_size,
            }),
        }));
        *info = Some(shared.new_info());
        shared.transition(SessionState::Idle, SessionState::AwaitingConnection);

        tracing::info!(
            "Listening on {} (ready above {} frames)",
            describe,
            config.ready_threshold
        );
        Ok(())
    }

    /// Tear the session down to `Idle`. Safe to call from any thread while
    /// the audio and network paths are running; a no-op when already idle.
    pub fn stop(&self) {
        let mut info = self.shared.control.lock();
        self.shared.teardown();
        if info.take().is_some() {
            tracing::info!("Session stopped");
        }
    }

    /// Set the gain in percent, clamped to [0, 100].
    pub fn set_gain(&self, percent: f32) {
        self.shared.gain.set_percent(percent);
    }

    pub fn gain(&self) -> f32 {
        self.shared.gain.percent()
    }

    /// Report an audio device failure. Fatal: the session returns to `Idle`
    /// and a [`SessionEvent::DeviceFailed`] is published.
    pub fn report_device_error(&self, error: &AudioError) {
        let shared = &self.shared;
        let mut info = shared.control.lock();
        if shared.state.load() == SessionState::Idle {
            return;
        }

        tracing::error!("Audio device failed: {}", error);
        shared.teardown();
        info.take();
        shared.publish(SessionEvent::DeviceFailed {
            message: error.to_string(),
        });
    }

    // ---- queries ---------------------------------------------------------

    pub fn state(&self) -> SessionState {
        self.shared.state.load()
    }

    /// Subscribe to session events. Receivers share one queue.
    pub fn events(&self) -> Receiver<SessionEvent> {
        self.shared.events_rx.clone()
    }

    pub fn config(&self) -> &StreamConfig {
        &self.shared.config
    }

    /// Receive-side backlog, 0 when not receiving
    pub fn backlog(&self) -> usize {
        match self.shared.link.read().as_ref() {
            Some(Link::Receive(link)) => link.buffer.backlog(),
            _ => 0,
        }
    }

    /// True while a transport is held
    pub fn has_transport(&self) -> bool {
        self.shared.link.read().is_some()
    }

    pub fn stats(&self) -> SessionStats {
        let shared = &self.shared;
        let info = *shared.control.lock();
        let counters = &shared.counters;
        let (overwritten_frames, backlog) = match shared.link.read().as_ref() {
            Some(Link::Receive(link)) => (link.buffer.overwritten_count(), link.buffer.backlog()),
            _ => (0, 0),
        };

        SessionStats {
            session_id: info.map(|i| i.id),
            started_at: info.map(|i| i.started_at),
            state: shared.state.load(),
            gain_percent: shared.gain.percent(),
            frames_sent: counters.frames_sent.load(Ordering::Relaxed),
            send_errors: counters.send_errors.load(Ordering::Relaxed),
            frames_received: counters.frames_received.load(Ordering::Relaxed),
            malformed_datagrams: counters.malformed_datagrams.load(Ordering::Relaxed),
            frames_played: counters.frames_played.load(Ordering::Relaxed),
            overwritten_frames,
            underruns: counters.underruns.load(Ordering::Relaxed),
            backlog,
            dropped_events: counters.dropped_events.load(Ordering::Relaxed),
        }
    }

    // ---- audio context ---------------------------------------------------

    /// Sender audio callback, one slice per input channel.
    ///
    /// Samples are gathered until every channel holds a whole frame, so the
    /// device period need not match the frame size. Each complete round is
    /// scaled, encoded and sent as one datagram per channel, in channel
    /// order. Channels beyond the configured count are ignored.
    pub fn process_input<S: AsRef<[f32]>>(&self, channels: &[S]) {
        let shared = &self.shared;
        let Some(guard) = shared.link.try_read() else {
            return;
        };
        let Some(Link::Send(link)) = guard.as_ref() else {
            return;
        };
        if shared.state.load() != SessionState::Sending {
            return;
        }
        let Some(mut scratch) = link.scratch.try_lock() else {
            return;
        };

        let percent = shared.gain.percent();
        let frame_len = shared.config.frame_size;
        let SendScratch {
            encoder,
            pending,
            filled,
            frame,
        } = &mut *scratch;

        let active = channels.len().min(pending.len());
        let period = channels[..active]
            .iter()
            .map(|channel| channel.as_ref().len())
            .max()
            .unwrap_or(0);

        let mut offset = 0;
        while offset < period {
            let take = (frame_len - *filled).min(period - offset);
            for (channel, slot) in channels[..active].iter().zip(pending.iter_mut()) {
                let src = channel.as_ref();
                let dst = &mut slot[*filled..*filled + take];
                let end = (offset + take).min(src.len());
                let copied = end.saturating_sub(offset);
                if copied > 0 {
                    dst[..copied].copy_from_slice(&src[offset..end]);
                }
                dst[copied..].fill(0.0);
            }
            *filled += take;
            offset += take;

            if *filled == frame_len {
                for slot in &pending[..active] {
                    gain::apply_into(slot, frame.as_mut_slice(), percent);
                    match link.transport.send(encoder.encode(frame.as_slice())) {
                        Ok(()) => Counters::bump(&shared.counters.frames_sent),
                        Err(_) => Counters::bump(&shared.counters.send_errors),
                    }
                }
                *filled = 0;
            }
        }
    }

    /// Receiver audio callback, one slice per output channel.
    ///
    /// Each round pops one frame per channel and plays it out over as many
    /// device periods as it takes. Anything that cannot be serviced,
    /// including everything while buffering, is zero-filled.
    pub fn process_output<S: AsMut<[f32]>>(&self, channels: &mut [S]) {
        let shared = &self.shared;
        let Some(guard) = shared.link.try_read() else {
            silence(channels);
            return;
        };
        let Some(Link::Receive(link)) = guard.as_ref() else {
            silence(channels);
            return;
        };
        let Some(mut playout) = link.playout.try_lock() else {
            silence(channels);
            return;
        };

        shared.reconcile(&link.gate);

        let percent = shared.gain.percent();
        let frame_len = shared.config.frame_size;
        let PlayScratch { held, position } = &mut *playout;

        let active = channels.len().min(held.len());
        silence(&mut channels[active..]);
        let period = channels[..active]
            .iter_mut()
            .map(|channel| channel.as_mut().len())
            .max()
            .unwrap_or(0);

        let mut offset = 0;
        while offset < period {
            if *position == frame_len {
                if !shared.refill(link, &mut held[..active]) {
                    for channel in channels[..active].iter_mut() {
                        if let Some(rest) = channel.as_mut().get_mut(offset..) {
                            rest.fill(0.0);
                        }
                    }
                    return;
                }
                *position = 0;
            }

            let take = (frame_len - *position).min(period - offset);
            for (channel, frame) in channels[..active].iter_mut().zip(held.iter()) {
                let dst = channel.as_mut();
                let end = (offset + take).min(dst.len());
                if end > offset {
                    let src = &frame[*position..*position + (end - offset)];
                    gain::apply_into(src, &mut dst[offset..end], percent);
                }
            }
            *position += take;
            offset += take;
        }
    }

    // ---- network context -------------------------------------------------

    /// Receive path for one datagram. Normally invoked by the transport
    /// registered in [`Self::start_receive`].
    pub fn handle_datagram(&self, datagram: &[u8]) {
        self.shared.handle_datagram(datagram);
    }
}

fn silence<S: AsMut<[f32]>>(channels: &mut [S]) {
    for channel in channels.iter_mut() {
        channel.as_mut().fill(0.0);
    }
}

impl Shared {
    fn new_info(&self) -> SessionInfo {
        self.counters.reset();
        SessionInfo {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
        }
    }

    /// Leave `Idle` for `to`, or reject the command.
    fn begin(&self, command: &'static str, to: SessionState) -> Result<(), SessionError> {
        if self.transition(SessionState::Idle, to) {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                command,
                state: self.state.load(),
            })
        }
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        let moved = self.state.transition(from, to);
        if moved {
            self.publish(SessionEvent::StateChanged { from, to });
        }
        moved
    }

    fn publish(&self, event: SessionEvent) {
        if self.events_tx.try_send(event).is_err() {
            Counters::bump(&self.counters.dropped_events);
        }
    }

    fn connection_failed(&self, from: SessionState, error: NetworkError) -> Error {
        tracing::warn!("Connection failed: {}", error);
        if from != SessionState::Idle {
            self.transition(from, SessionState::Idle);
        }
        self.publish(SessionEvent::ConnectionFailed {
            message: error.to_string(),
        });
        error.into()
    }

    /// Detach the link, then release it. Caller holds the control lock.
    fn teardown(&self) {
        let previous = self.state.swap(SessionState::Idle);
        let link = self.link.write().take();

        if let Some(link) = link {
            tracing::debug!("Closing {}", link.transport().describe());
            link.transport().close();
        }

        if previous != SessionState::Idle {
            self.publish(SessionEvent::StateChanged {
                from: previous,
                to: SessionState::Idle,
            });
        }
    }

    /// Bring a receiving state in line with the gate. Covers the window where
    /// a network-side `BecameReady` and an audio-side `BecameNotReady` land in
    /// the opposite order to their state updates.
    fn reconcile(&self, gate: &ReadinessGate) {
        let current = self.state.load();
        if !current.is_receiving_role() {
            return;
        }
        let wanted = if gate.is_ready() {
            SessionState::Receiving
        } else {
            SessionState::AwaitingConnection
        };
        if current != wanted {
            self.transition(current, wanted);
        }
    }

    /// Pop the next frame for each channel into `held`. Pops nothing and
    /// returns false unless the session is receiving.
    fn refill(&self, link: &ReceiveLink, held: &mut [Vec<f32>]) -> bool {
        if self.state.load() != SessionState::Receiving {
            return false;
        }

        for frame in held.iter_mut() {
            if link.buffer.pop_into(frame) {
                Counters::bump(&self.counters.frames_played);
            } else {
                frame.fill(0.0);
            }

            if let Some(ReadinessEdge::BecameNotReady) = link.gate.on_popped() {
                Counters::bump(&self.counters.underruns);
                self.transition(SessionState::Receiving, SessionState::AwaitingConnection);
            }
        }
        true
    }

    fn handle_datagram(&self, datagram: &[u8]) {
        let guard = self.link.read();
        let Some(Link::Receive(link)) = guard.as_ref() else {
            return;
        };
        if !self.state.load().is_receiving_role() {
            return;
        }

        let mut decoded = link.decoded.lock();
        if let Err(e) = link.decoder.decode_into(datagram, decoded.as_mut_slice()) {
            Counters::bump(&self.counters.malformed_datagrams);
            tracing::debug!("Dropping datagram ({} bytes): {}", datagram.len(), e);
            return;
        }

        link.buffer.push(decoded.as_slice());
        Counters::bump(&self.counters.frames_received);

        if let Some(ReadinessEdge::BecameReady) = link.gate.on_pushed() {
            self.transition(SessionState::AwaitingConnection, SessionState::Receiving);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::LoopbackNetwork;

    const FRAME: usize = 8;
    const PORT: u16 = 4000;

    fn config() -> StreamConfig {
        StreamConfig {
            frame_size: FRAME,
            ring_capacity: 16,
            ready_threshold: 3,
            ..StreamConfig::default()
        }
    }

    fn session(network: &LoopbackNetwork) -> StreamSession {
        StreamSession::new(config(), Arc::new(network.clone()))
    }

    fn datagram(value: f32) -> Vec<u8> {
        FrameEncoder::new("/audiostream", FRAME)
            .encode(&[value; FRAME])
            .to_vec()
    }

    fn drain_events(session: &StreamSession) -> Vec<SessionEvent> {
        session.events().try_iter().collect()
    }

    fn changed(from: SessionState, to: SessionState) -> SessionEvent {
        SessionEvent::StateChanged { from, to }
    }

    fn pull(session: &StreamSession) -> Vec<f32> {
        let mut out = vec![1.0; FRAME];
        session.process_output(&mut [out.as_mut_slice()]);
        out
    }

    #[test]
    fn test_connect_failure_returns_to_idle() {
        let network = LoopbackNetwork::new();
        let sender = session(&network);

        let err = sender.start_send("10.255.255.1", 9).unwrap_err();
        assert!(matches!(err, Error::Network(NetworkError::ConnectionFailed(_))));
        assert_eq!(sender.state(), SessionState::Idle);
        assert!(!sender.has_transport());

        let events = drain_events(&sender);
        assert_eq!(events[0], changed(SessionState::Idle, SessionState::Connecting));
        assert_eq!(events[1], changed(SessionState::Connecting, SessionState::Idle));
        assert!(matches!(events[2], SessionEvent::ConnectionFailed { .. }));
    }

    #[test]
    fn test_listen_failure_stays_idle() {
        let network = LoopbackNetwork::new();
        let first = session(&network);
        let second = session(&network);

        first.start_receive(PORT).unwrap();
        assert!(second.start_receive(PORT).is_err());
        assert_eq!(second.state(), SessionState::Idle);
        assert!(matches!(
            drain_events(&second).as_slice(),
            [SessionEvent::ConnectionFailed { .. }]
        ));
    }

    #[test]
    fn test_receive_lifecycle() {
        let network = LoopbackNetwork::new();
        let receiver = session(&network);

        receiver.start_receive(PORT).unwrap();
        assert_eq!(receiver.state(), SessionState::AwaitingConnection);

        for i in 0..3 {
            receiver.handle_datagram(&datagram(i as f32));
            assert_eq!(receiver.state(), SessionState::AwaitingConnection);
        }
        // Still buffering: output is silent and nothing is consumed.
        assert_eq!(pull(&receiver), vec![0.0; FRAME]);
        assert_eq!(receiver.backlog(), 3);

        receiver.handle_datagram(&datagram(3.0));
        assert_eq!(receiver.state(), SessionState::Receiving);

        for i in 0..4 {
            assert_eq!(pull(&receiver), vec![i as f32; FRAME]);
        }
        assert_eq!(receiver.state(), SessionState::AwaitingConnection);
        assert_eq!(receiver.stats().underruns, 1);

        receiver.stop();
        assert_eq!(receiver.state(), SessionState::Idle);
        assert!(!receiver.has_transport());
        assert!(!network.is_listening(PORT));

        assert_eq!(
            drain_events(&receiver),
            vec![
                changed(SessionState::Idle, SessionState::AwaitingConnection),
                changed(SessionState::AwaitingConnection, SessionState::Receiving),
                changed(SessionState::Receiving, SessionState::AwaitingConnection),
                changed(SessionState::AwaitingConnection, SessionState::Idle),
            ]
        );
    }

    #[test]
    fn test_rebuffer_after_drain() {
        let network = LoopbackNetwork::new();
        let receiver = session(&network);
        receiver.start_receive(PORT).unwrap();

        for _ in 0..4 {
            receiver.handle_datagram(&datagram(0.5));
        }
        for _ in 0..4 {
            pull(&receiver);
        }
        assert_eq!(receiver.state(), SessionState::AwaitingConnection);

        // Two frames are not enough to resume.
        receiver.handle_datagram(&datagram(0.5));
        receiver.handle_datagram(&datagram(0.5));
        assert_eq!(pull(&receiver), vec![0.0; FRAME]);
        assert_eq!(receiver.backlog(), 2);

        receiver.handle_datagram(&datagram(0.5));
        receiver.handle_datagram(&datagram(0.5));
        assert_eq!(receiver.state(), SessionState::Receiving);
        assert_eq!(pull(&receiver), vec![0.5; FRAME]);
    }

    #[test]
    fn test_malformed_datagrams_are_dropped() {
        let network = LoopbackNetwork::new();
        let receiver = session(&network);
        receiver.start_receive(PORT).unwrap();

        let oversized = FrameEncoder::new("/audiostream", FRAME * 2)
            .encode(&[1.0; FRAME * 2])
            .to_vec();
        receiver.handle_datagram(&oversized);
        receiver.handle_datagram(b"garbage");

        assert_eq!(receiver.backlog(), 0);
        assert_eq!(receiver.state(), SessionState::AwaitingConnection);
        let stats = receiver.stats();
        assert_eq!(stats.malformed_datagrams, 2);
        assert_eq!(stats.frames_received, 0);
    }

    #[test]
    fn test_commands_rejected_outside_idle() {
        let network = LoopbackNetwork::new();
        let receiver = session(&network);
        receiver.start_receive(PORT).unwrap();

        assert!(matches!(
            receiver.start_send("127.0.0.1", PORT),
            Err(Error::Session(SessionError::InvalidState { .. }))
        ));
        assert!(matches!(
            receiver.start_receive(PORT + 1),
            Err(Error::Session(SessionError::InvalidState { .. }))
        ));
        assert_eq!(receiver.state(), SessionState::AwaitingConnection);
    }

    #[test]
    fn test_stop_from_every_state() {
        let network = LoopbackNetwork::new();
        let receiver = session(&network);
        let sender = session(&network);

        receiver.stop();
        assert_eq!(receiver.state(), SessionState::Idle);

        receiver.start_receive(PORT).unwrap();
        sender.start_send("127.0.0.1", PORT).unwrap();
        assert_eq!(sender.state(), SessionState::Sending);

        sender.stop();
        assert_eq!(sender.state(), SessionState::Idle);
        assert!(!sender.has_transport());

        for _ in 0..4 {
            receiver.handle_datagram(&datagram(1.0));
        }
        assert_eq!(receiver.state(), SessionState::Receiving);
        receiver.stop();
        assert_eq!(receiver.state(), SessionState::Idle);
        assert_eq!(receiver.backlog(), 0);

        // Audio and network callbacks after stop are harmless.
        assert_eq!(pull(&receiver), vec![0.0; FRAME]);
        receiver.handle_datagram(&datagram(1.0));
        let block = [1.0f32; FRAME];
        sender.process_input(&[&block[..]]);
        assert_eq!(sender.stats().frames_sent, 0);
    }

    #[test]
    fn test_device_error_is_fatal() {
        let network = LoopbackNetwork::new();
        let receiver = session(&network);
        receiver.start_receive(PORT).unwrap();
        drain_events(&receiver);

        receiver.report_device_error(&AudioError::DeviceUnavailable("unplugged".into()));
        assert_eq!(receiver.state(), SessionState::Idle);
        assert!(!network.is_listening(PORT));

        let events = drain_events(&receiver);
        assert_eq!(
            events[0],
            changed(SessionState::AwaitingConnection, SessionState::Idle)
        );
        assert!(matches!(events[1], SessionEvent::DeviceFailed { .. }));

        // A new explicit command recovers.
        receiver.start_receive(PORT).unwrap();
        assert_eq!(receiver.state(), SessionState::AwaitingConnection);
    }

    #[test]
    fn test_partial_frame_waits_for_next_period() {
        let network = LoopbackNetwork::new();
        let receiver = session(&network);
        let sender = session(&network);
        receiver.start_receive(PORT).unwrap();
        sender.start_send("127.0.0.1", PORT).unwrap();

        // 2.5 frames -> 2 datagrams, half a frame held back
        let block: Vec<f32> = vec![0.25; FRAME * 2 + FRAME / 2];
        sender.process_input(&[block.as_slice()]);
        assert_eq!(sender.stats().frames_sent, 2);
        assert_eq!(receiver.backlog(), 2);

        let rest: Vec<f32> = vec![0.25; FRAME / 2];
        sender.process_input(&[rest.as_slice()]);
        assert_eq!(sender.stats().frames_sent, 3);
        assert_eq!(receiver.stats().frames_received, 3);
    }

    #[test]
    fn test_short_periods_fill_whole_frames() {
        let network = LoopbackNetwork::new();
        let receiver = session(&network);
        let sender = session(&network);
        receiver.start_receive(PORT).unwrap();
        sender.start_send("127.0.0.1", PORT).unwrap();

        let source: Vec<f32> = (1..=40).map(|i| i as f32).collect();
        for period in source.chunks(FRAME / 2) {
            sender.process_input(&[period]);
        }
        assert_eq!(sender.stats().frames_sent, 5);
        assert_eq!(receiver.backlog(), 5);

        let mut played = Vec::new();
        for _ in 0..10 {
            let mut out = vec![0.0f32; FRAME / 2];
            receiver.process_output(&mut [out.as_mut_slice()]);
            played.extend(out);
        }
        assert_eq!(played, source);
        assert_eq!(receiver.stats().frames_played, 5);
    }

    #[test]
    fn test_channels_stay_paired_across_period_sizes() {
        let network = LoopbackNetwork::new();
        let receiver = session(&network);
        let sender = session(&network);
        receiver.start_receive(PORT).unwrap();
        sender.start_send("127.0.0.1", PORT).unwrap();

        let left = vec![1.0f32; FRAME * 2];
        let right = vec![2.0f32; FRAME * 2];
        sender.process_input(&[left.as_slice(), right.as_slice()]);
        assert_eq!(receiver.backlog(), 4);

        for _ in 0..4 {
            let mut out_left = vec![0.0f32; FRAME / 2];
            let mut out_right = vec![0.0f32; FRAME / 2];
            receiver.process_output(&mut [out_left.as_mut_slice(), out_right.as_mut_slice()]);
            assert_eq!(out_left, vec![1.0; FRAME / 2]);
            assert_eq!(out_right, vec![2.0; FRAME / 2]);
        }
    }

    #[test]
    fn test_rejected_datagram_leaves_decoded_frames_intact() {
        let network = LoopbackNetwork::new();
        let receiver = session(&network);
        receiver.start_receive(PORT).unwrap();

        receiver.handle_datagram(&datagram(1.0));
        receiver.handle_datagram(&datagram(2.0)[..24]);
        for _ in 0..3 {
            receiver.handle_datagram(&datagram(3.0));
        }

        assert_eq!(receiver.stats().malformed_datagrams, 1);
        assert_eq!(pull(&receiver), vec![1.0; FRAME]);
        assert_eq!(pull(&receiver), vec![3.0; FRAME]);
    }

    #[test]
    fn test_reconcile_recovers_from_crossed_edges() {
        let network = LoopbackNetwork::new();
        let receiver = session(&network);
        receiver.start_receive(PORT).unwrap();
        for _ in 0..4 {
            receiver.handle_datagram(&datagram(1.0));
        }
        assert_eq!(receiver.state(), SessionState::Receiving);

        // Audio side drains the ring and takes the edge, but has not applied
        // its transition yet.
        {
            let guard = receiver.shared.link.read();
            let Some(Link::Receive(link)) = guard.as_ref() else {
                panic!("no receive link");
            };
            while link.buffer.pop().is_some() {}
            assert_eq!(link.gate.on_popped(), Some(ReadinessEdge::BecameNotReady));
        }

        // Network side refills past the threshold while the state still
        // reads Receiving, so its transition is a no-op.
        for _ in 0..4 {
            receiver.handle_datagram(&datagram(2.0));
        }
        assert_eq!(receiver.state(), SessionState::Receiving);

        // The audio side's transition lands late.
        assert!(receiver
            .shared
            .transition(SessionState::Receiving, SessionState::AwaitingConnection));

        // The next callback lines the state up with the gate again.
        assert_eq!(pull(&receiver), vec![2.0; FRAME]);
        assert_eq!(receiver.state(), SessionState::Receiving);
    }

    fn is_legal(from: SessionState, to: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (from, to),
            (Idle, Connecting)
                | (Connecting, Sending)
                | (Connecting, Idle)
                | (Sending, Idle)
                | (Idle, AwaitingConnection)
                | (AwaitingConnection, Receiving)
                | (Receiving, AwaitingConnection)
                | (AwaitingConnection, Idle)
                | (Receiving, Idle)
        )
    }

    #[test]
    fn test_stop_and_restart_during_callbacks() {
        use std::sync::atomic::AtomicBool;
        use std::thread;
        use std::time::Duration;

        let network = LoopbackNetwork::new();
        let receiver = session(&network);
        receiver.start_receive(PORT).unwrap();

        let running = Arc::new(AtomicBool::new(true));
        let collecting = Arc::new(AtomicBool::new(true));

        let collector = {
            let events = receiver.events();
            let collecting = collecting.clone();
            thread::spawn(move || {
                let mut seen = Vec::new();
                loop {
                    match events.recv_timeout(Duration::from_millis(20)) {
                        Ok(event) => seen.push(event),
                        Err(_) if !collecting.load(Ordering::Acquire) => break,
                        Err(_) => {}
                    }
                }
                seen
            })
        };

        let producer = {
            let receiver = receiver.clone();
            let running = running.clone();
            thread::spawn(move || {
                let frame = datagram(0.5);
                while running.load(Ordering::Acquire) {
                    receiver.handle_datagram(&frame);
                }
            })
        };

        let consumer = {
            let receiver = receiver.clone();
            let running = running.clone();
            thread::spawn(move || {
                let mut out = vec![0.0f32; FRAME];
                while running.load(Ordering::Acquire) {
                    receiver.process_output(&mut [out.as_mut_slice()]);
                    assert!(out.iter().all(|&s| s == 0.0 || s == 0.5));
                }
            })
        };

        for _ in 0..200 {
            thread::sleep(Duration::from_micros(200));
            receiver.stop();
            assert_eq!(receiver.state(), SessionState::Idle);
            assert_eq!(receiver.backlog(), 0);
            receiver.start_receive(PORT).unwrap();
        }

        running.store(false, Ordering::Release);
        producer.join().unwrap();
        consumer.join().unwrap();

        receiver.stop();
        assert_eq!(receiver.state(), SessionState::Idle);
        assert_eq!(receiver.backlog(), 0);
        assert!(!receiver.has_transport());
        assert!(!network.is_listening(PORT));

        collecting.store(false, Ordering::Release);
        for event in collector.join().unwrap() {
            if let SessionEvent::StateChanged { from, to } = event {
                assert!(is_legal(from, to), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_gain_applied_on_playback() {
        let network = LoopbackNetwork::new();
        let receiver = session(&network);
        receiver.start_receive(PORT).unwrap();
        receiver.set_gain(25.0);

        for _ in 0..4 {
            receiver.handle_datagram(&datagram(0.8));
        }
        let out = pull(&receiver);
        assert!(out.iter().all(|s| (s - 0.2).abs() < 1e-6));
    }

    #[test]
    fn test_multichannel_output_pops_per_channel() {
        let network = LoopbackNetwork::new();
        let receiver = session(&network);
        receiver.start_receive(PORT).unwrap();
        for i in 0..6 {
            receiver.handle_datagram(&datagram(i as f32));
        }

        let mut left = vec![9.0; FRAME];
        let mut right = vec![9.0; FRAME];
        receiver.process_output(&mut [left.as_mut_slice(), right.as_mut_slice()]);
        assert_eq!(left, vec![0.0; FRAME]);
        assert_eq!(right, vec![1.0; FRAME]);
        assert_eq!(receiver.backlog(), 4);
    }

    #[test]
    fn test_stats_identify_session() {
        let network = LoopbackNetwork::new();
        let receiver = session(&network);
        assert!(receiver.stats().session_id.is_none());

        receiver.start_receive(PORT).unwrap();
        let first = receiver.stats().session_id.unwrap();
        receiver.stop();
        receiver.start_receive(PORT).unwrap();
        assert_ne!(receiver.stats().session_id.unwrap(), first);
    }
}
