//! Integration tests for the framed parent/child pipe
use std::path::Path;
use std::sync::mpsc;
use std::time::Duration;

use framehost::ipc::{encode_frame, Frame, FrameDecoder, MessageType};
use framehost::PipeChannel;
use rand::Rng;

const TIMEOUT: Duration = Duration::from_secs(30);

fn sh(script: &str) -> Vec<String> {
    vec!["-c".to_string(), script.to_string()]
}

#[derive(Debug, PartialEq)]
enum Event {
    Frame(Frame),
    Closed(i32, bool),
}

fn spawn_sh(script: &str) -> (PipeChannel, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel();
    let close_tx = tx.clone();
    let pipe = PipeChannel::spawn(
        Path::new("/bin/sh"),
        &sh(script),
        false,
        Box::new(move |kind, payload| {
            tx.send(Event::Frame(Frame::new(kind, payload))).ok();
        }),
        Box::new(move |status, error| {
            close_tx.send(Event::Closed(status, !error.is_empty())).ok();
        }),
    )
    .unwrap();
    (pipe, rx)
}

mod echo {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_random_payloads_round_trip_through_child() {
        let mut rng = rand::thread_rng();
        let mut sizes = vec![0usize, 1, 7, 8, 4096, 65_537, 1 << 20];
        sizes.extend((0..8).map(|_| rng.gen_range(0..(1 << 20))));

        let sent: Vec<Frame> = sizes
            .iter()
            .map(|&size| {
                let mut payload = vec![0u8; size];
                rng.fill(&mut payload[..]);
                Frame::new(rng.gen_range(0..3), payload)
            })
            .collect();

        let (pipe, rx) = spawn_sh("cat <&3 >&3");
        for frame in &sent {
            pipe.send_message(frame.kind, &frame.payload);
        }
        for expected in &sent {
            match rx.recv_timeout(TIMEOUT).unwrap() {
                Event::Frame(frame) => {
                    assert_eq!(frame.kind, expected.kind);
                    assert_eq!(frame.payload.len(), expected.payload.len());
                    assert!(frame.payload == expected.payload);
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert!(!pipe.is_closed());
    }

    #[test]
    fn test_send_after_close_is_ignored() {
        let (pipe, rx) = spawn_sh("exit 0");
        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), Event::Closed(0, false));
        assert!(pipe.is_closed());
        pipe.send_message(MessageType::Message.as_u32(), b"{}");
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }
}

mod child_exit {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_close_follows_every_message_exactly_once() {
        let frame = |byte: &str| format!(r"printf '\001\000\000\000\001\000\000\000{}' >&3;", byte);
        let script = format!("{} {} {} exit 1", frame("a"), frame("b"), frame("c"));
        let (pipe, rx) = spawn_sh(&script);

        let mut events = Vec::new();
        loop {
            let event = rx.recv_timeout(TIMEOUT).unwrap();
            let done = matches!(event, Event::Closed(..));
            events.push(event);
            if done {
                break;
            }
        }
        let log = MessageType::Log.as_u32();
        assert_eq!(
            events,
            vec![
                Event::Frame(Frame::new(log, "a")),
                Event::Frame(Frame::new(log, "b")),
                Event::Frame(Frame::new(log, "c")),
                Event::Closed(1, true),
            ]
        );

        drop(pipe);
        // The callback channel is gone with the pipe; nothing else arrived.
        assert!(matches!(
            rx.recv_timeout(Duration::from_millis(100)),
            Err(mpsc::RecvTimeoutError::Disconnected)
        ));
    }

    #[test]
    fn test_killed_child_reports_signal() {
        let (_pipe, rx) = spawn_sh("kill -9 $$");
        match rx.recv_timeout(TIMEOUT).unwrap() {
            Event::Closed(status, has_error) => {
                assert_eq!(status, 0);
                assert!(has_error);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}

mod decoding {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_any_chunking_yields_the_same_frames() {
        let mut rng = rand::thread_rng();
        let frames: Vec<Frame> = (0..20)
            .map(|i| {
                let mut payload = vec![0u8; rng.gen_range(0..300)];
                rng.fill(&mut payload[..]);
                Frame::new(i, payload)
            })
            .collect();
        let mut stream = Vec::new();
        for frame in &frames {
            encode_frame(frame.kind, &frame.payload, &mut stream).unwrap();
        }

        for _ in 0..50 {
            let mut decoder = FrameDecoder::new();
            let mut decoded = Vec::new();
            let mut rest = &stream[..];
            while !rest.is_empty() {
                let cut = rng.gen_range(1..=rest.len().min(64));
                decoder.push(&rest[..cut], |frame| decoded.push(frame));
                rest = &rest[cut..];
            }
            assert!(!decoder.has_partial());
            assert_eq!(decoded, frames);
        }
    }
}
