//! Sender and receiver sessions wired together over the in-process network

use std::sync::Arc;

use lan_audio_link::config::StreamConfig;
use lan_audio_link::network::LoopbackNetwork;
use lan_audio_link::{SessionEvent, SessionState, StreamSession};

const FRAME: usize = 32;
const PORT: u16 = 1234;
const THRESHOLD: usize = 3;

fn config() -> StreamConfig {
    StreamConfig {
        frame_size: FRAME,
        ring_capacity: 16,
        ready_threshold: THRESHOLD,
        ..StreamConfig::default()
    }
}

fn source_frame(index: usize) -> Vec<f32> {
    (0..FRAME)
        .map(|i| ((index * FRAME + i) as f32 / 10.0).sin() * 0.8)
        .collect()
}

fn pull(session: &StreamSession) -> Vec<f32> {
    let mut out = vec![1.0f32; FRAME];
    session.process_output(&mut [out.as_mut_slice()]);
    out
}

fn pair(network: &LoopbackNetwork) -> (StreamSession, StreamSession) {
    let receiver = StreamSession::new(config(), Arc::new(network.clone()));
    let sender = StreamSession::new(config(), Arc::new(network.clone()));
    receiver.start_receive(PORT).unwrap();
    sender.start_send("127.0.0.1", PORT).unwrap();
    (sender, receiver)
}

#[test]
fn test_stream_plays_scaled_audio_after_buffering() {
    let network = LoopbackNetwork::new();
    let (sender, receiver) = pair(&network);
    sender.set_gain(50.0);

    for index in 0..THRESHOLD {
        sender.process_input(&[source_frame(index).as_slice()]);
        assert_eq!(receiver.state(), SessionState::AwaitingConnection);
        assert!(pull(&receiver).iter().all(|&s| s == 0.0));
    }
    assert_eq!(receiver.backlog(), THRESHOLD);

    for index in THRESHOLD..10 {
        sender.process_input(&[source_frame(index).as_slice()]);
    }
    assert_eq!(receiver.state(), SessionState::Receiving);
    assert_eq!(receiver.backlog(), 10);

    for index in 0..10 {
        let expected = source_frame(index);
        let played = pull(&receiver);
        for (got, want) in played.iter().zip(&expected) {
            assert!((got - want * 0.5).abs() < 1e-6, "frame {}: {} vs {}", index, got, want);
        }
    }

    // Draining the last frame drops back to buffering
    assert_eq!(receiver.state(), SessionState::AwaitingConnection);
    assert!(pull(&receiver).iter().all(|&s| s == 0.0));

    let sent = sender.stats();
    let received = receiver.stats();
    assert_eq!(sent.frames_sent, 10);
    assert_eq!(received.frames_received, 10);
    assert_eq!(received.frames_played, 10);
    assert_eq!(received.underruns, 1);
    assert_eq!(received.malformed_datagrams, 0);
    assert_eq!(network.delivered(), 10);
}

#[test]
fn test_overflow_keeps_newest_frames() {
    let network = LoopbackNetwork::new();
    let (sender, receiver) = pair(&network);

    for index in 0..20 {
        sender.process_input(&[source_frame(index).as_slice()]);
    }
    assert_eq!(receiver.backlog(), 16);
    assert_eq!(receiver.stats().overwritten_frames, 4);

    let first = pull(&receiver);
    for (got, want) in first.iter().zip(&source_frame(4)) {
        assert!((got - want).abs() < 1e-6);
    }
}

#[test]
fn test_connect_without_listener_returns_to_idle() {
    let network = LoopbackNetwork::new();
    let sender = StreamSession::new(config(), Arc::new(network));

    assert!(sender.start_send("192.0.2.1", PORT).is_err());
    assert_eq!(sender.state(), SessionState::Idle);
    assert!(!sender.has_transport());

    let events: Vec<SessionEvent> = sender.events().try_iter().collect();
    assert_eq!(events.len(), 3);
    assert_eq!(
        events[0],
        SessionEvent::StateChanged {
            from: SessionState::Idle,
            to: SessionState::Connecting
        }
    );
    assert_eq!(
        events[1],
        SessionEvent::StateChanged {
            from: SessionState::Connecting,
            to: SessionState::Idle
        }
    );
    assert!(matches!(events[2], SessionEvent::ConnectionFailed { .. }));
}

#[test]
fn test_every_transition_is_legal() {
    let network = LoopbackNetwork::new();
    let (sender, receiver) = pair(&network);

    for index in 0..6 {
        sender.process_input(&[source_frame(index).as_slice()]);
        pull(&receiver);
        pull(&receiver);
    }
    for index in 0..8 {
        sender.process_input(&[source_frame(index).as_slice()]);
    }
    for _ in 0..10 {
        pull(&receiver);
    }
    sender.stop();
    receiver.stop();

    let legal = |from: SessionState, to: SessionState| {
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
    };

    for session in [&sender, &receiver] {
        let mut current = SessionState::Idle;
        for event in session.events().try_iter() {
            if let SessionEvent::StateChanged { from, to } = event {
                assert_eq!(from, current);
                assert!(legal(from, to), "{} -> {}", from, to);
                current = to;
            }
        }
        assert_eq!(current, SessionState::Idle);
    }
}

#[test]
fn test_sender_stop_leaves_receiver_buffering() {
    let network = LoopbackNetwork::new();
    let (sender, receiver) = pair(&network);

    sender.process_input(&[source_frame(0).as_slice()]);
    sender.stop();
    assert_eq!(sender.state(), SessionState::Idle);

    sender.process_input(&[source_frame(1).as_slice()]);
    assert_eq!(network.delivered(), 1);
    assert_eq!(receiver.state(), SessionState::AwaitingConnection);
    assert_eq!(receiver.backlog(), 1);

    receiver.stop();
    assert!(!network.is_listening(PORT));
    assert_eq!(receiver.backlog(), 0);
}
