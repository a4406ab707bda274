//! Ping/pong over the worker control channel.
//!
//! The parent writes one byte; the child answers every byte it reads with
//! `pong`. The responder runs on its own thread so a busy request loop
//! does not delay the reply.

use std::io::{ErrorKind, Read, Write};
use std::os::unix::net::UnixStream;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

pub const PING: u8 = 1;
pub const PONG: &[u8; 4] = b"pong";

pub fn spawn_responder(stream: UnixStream) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("heartbeat".to_string())
        .spawn(move || respond(stream))
}

/// Answers pings until the parent closes its end.
pub fn respond(mut stream: UnixStream) {
    let mut buf = [0u8; 1];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(_) => {
                if stream.write_all(PONG).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    debug!("Heartbeat channel closed");
}

/// True when `pong` comes back within `timeout`.
pub fn ping(stream: &mut UnixStream, timeout: Duration) -> bool {
    if stream.set_read_timeout(Some(timeout)).is_err() {
        return false;
    }
    if stream.write_all(&[PING]).is_err() {
        return false;
    }
    let mut reply = [0u8; 4];
    match stream.read_exact(&mut reply) {
        Ok(()) => &reply == PONG,
        Err(e) => {
            debug!("Heartbeat failed: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_ping_pong() {
        let (mut parent, child) = UnixStream::pair().unwrap();
        let handle = spawn_responder(child).unwrap();
        assert!(ping(&mut parent, Duration::from_secs(1)));
        assert!(ping(&mut parent, Duration::from_secs(1)));
        drop(parent);
        handle.join().unwrap();
    }

    #[test]
    fn test_silent_peer_times_out() {
        let (mut parent, _child) = UnixStream::pair().unwrap();
        let start = Instant::now();
        assert!(!ping(&mut parent, Duration::from_millis(100)));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_closed_peer_fails() {
        let (mut parent, child) = UnixStream::pair().unwrap();
        drop(child);
        assert!(!ping(&mut parent, Duration::from_millis(100)));
    }
}
