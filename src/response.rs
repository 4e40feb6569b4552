//! Reply collection over a transport that has no framing.
//!
//! The peer gives no length prefix and no guaranteed terminator, so a reply is
//! considered complete once any sentinel substring shows up in the accumulated
//! text, or once the deadline passes.

use crate::transport::{Result, SerialLink};

use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Result of waiting for one reply.
///
/// * `Complete` - a sentinel was seen; holds the trimmed text.
/// * `Empty` - not a single byte arrived within the window.
/// * `Timeout` - bytes arrived but no sentinel did; holds the trimmed partial text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    Complete(String),
    Empty,
    Timeout(String),
}

impl ResponseOutcome {
    /// Text received, if any. Empty for `Empty`.
    pub fn text(&self) -> &str {
        match self {
            ResponseOutcome::Complete(text) | ResponseOutcome::Timeout(text) => text,
            ResponseOutcome::Empty => "",
        }
    }

    /// Whether the peer said anything at all
    pub fn has_reply(&self) -> bool {
        !self.text().is_empty()
    }
}

/// Sentinels used for line-oriented and AT-style replies.
pub const DEFAULT_SENTINELS: &[&str] = &["\n", "OK"];

#[derive(Debug, Clone)]
pub struct CollectSettings {
    pub deadline: Duration,
    pub sentinels: Vec<String>,
    pub poll_interval: Duration,
}

impl CollectSettings {
    pub fn new(deadline: Duration) -> Self {
        CollectSettings {
            deadline,
            sentinels: DEFAULT_SENTINELS.iter().map(|s| s.to_string()).collect(),
            poll_interval: Duration::from_millis(50),
        }
    }

    /// Wait out the whole window, no early stop
    pub fn without_sentinels(mut self) -> Self {
        self.sentinels.clear();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl Default for CollectSettings {
    fn default() -> Self {
        CollectSettings::new(Duration::from_secs(2))
    }
}

/// Decode bytes as UTF-8, silently dropping anything malformed.
pub fn decode_permissive(bytes: &[u8]) -> String {
    bytes.utf8_chunks().map(|chunk| chunk.valid()).collect()
}

fn contains_sentinel(buffer: &str, sentinels: &[String]) -> bool {
    sentinels.iter().any(|s| !s.is_empty() && buffer.contains(s.as_str()))
}

/// Upper bound on what `discard_pending` reads, in case the peer never goes quiet.
const DISCARD_LIMIT: usize = 4096;

/// Drain whatever already sits in the receive buffer and return it decoded.
pub fn discard_pending<L: SerialLink + ?Sized>(link: &mut L) -> Result<String> {
    let mut stale = Vec::new();
    while stale.len() < DISCARD_LIMIT && link.bytes_available()? > 0 {
        stale.extend(link.read_available()?);
    }
    Ok(decode_permissive(&stale))
}

/// Poll `link` until a sentinel appears in the accumulated text or the deadline passes.
///
/// Consumes whatever it reads from the receive buffer. Returns no later than
/// `deadline` plus one read.
pub fn collect<L: SerialLink + ?Sized>(link: &mut L, settings: &CollectSettings) -> Result<ResponseOutcome> {
    let start = Instant::now();
    let mut buffer = String::new();
    let mut received = 0usize;

    loop {
        if link.bytes_available()? > 0 {
            let chunk = link.read_available()?;
            received += chunk.len();
            let text = decode_permissive(&chunk);
            trace!("read {} bytes: {:?}", chunk.len(), text);
            buffer.push_str(&text);
            if contains_sentinel(&buffer, &settings.sentinels) {
                let reply = buffer.trim().to_owned();
                debug!("reply complete after {:?}: {:?}", start.elapsed(), reply);
                return Ok(ResponseOutcome::Complete(reply));
            }
        }

        let elapsed = start.elapsed();
        if elapsed >= settings.deadline {
            break;
        }
        std::thread::sleep(settings.poll_interval.min(settings.deadline - elapsed));
    }

    let outcome = if received == 0 {
        ResponseOutcome::Empty
    } else {
        ResponseOutcome::Timeout(buffer.trim().to_owned())
    };
    debug!("no sentinel within {:?}: {:?}", settings.deadline, outcome);
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedSerial;

    fn settings(deadline_ms: u64) -> CollectSettings {
        CollectSettings::new(Duration::from_millis(deadline_ms)).with_poll_interval(Duration::from_millis(10))
    }

    #[test]
    fn silent_link_is_empty_and_respects_deadline() {
        let mut link = ScriptedSerial::new();
        let settings = settings(150);
        let start = Instant::now();
        let outcome = collect(&mut link, &settings).unwrap();
        let elapsed = start.elapsed();

        assert_eq!(outcome, ResponseOutcome::Empty);
        assert!(!outcome.has_reply());
        assert!(elapsed >= settings.deadline);
        assert!(elapsed < settings.deadline + settings.poll_interval + Duration::from_millis(200));
    }

    #[test]
    fn sentinel_stops_before_deadline() {
        let mut link = ScriptedSerial::new().reply_after(Duration::from_millis(30), b"HELLO_ACK\n");
        let start = Instant::now();
        let outcome = collect(&mut link, &settings(2000)).unwrap();

        assert_eq!(outcome, ResponseOutcome::Complete("HELLO_ACK".into()));
        assert!(start.elapsed() < Duration::from_millis(1000));
    }

    #[test]
    fn ok_is_a_sentinel_without_newline() {
        let mut link = ScriptedSerial::new().reply_after(Duration::ZERO, b"OK+NAME:HC-06");
        let outcome = collect(&mut link, &settings(1000)).unwrap();
        assert_eq!(outcome, ResponseOutcome::Complete("OK+NAME:HC-06".into()));
    }

    #[test]
    fn chunks_accumulate_until_sentinel() {
        let mut link = ScriptedSerial::new()
            .reply_after(Duration::ZERO, b"HELLO")
            .reply_after(Duration::from_millis(40), b"_ACK\r\n")
            .reply_after(Duration::from_millis(400), b"late\n");
        let outcome = collect(&mut link, &settings(1000)).unwrap();

        assert_eq!(outcome, ResponseOutcome::Complete("HELLO_ACK".into()));
        // the late chunk stays in the receive buffer
        assert_eq!(link.unread_len(), 5);
    }

    #[test]
    fn partial_text_without_sentinel_times_out() {
        let mut link = ScriptedSerial::new().reply_after(Duration::ZERO, b"  HC-0");
        let settings = settings(100);
        let start = Instant::now();
        let outcome = collect(&mut link, &settings).unwrap();
        let elapsed = start.elapsed();

        assert_eq!(outcome, ResponseOutcome::Timeout("HC-0".into()));
        assert!(outcome.has_reply());
        assert!(elapsed >= settings.deadline);
        assert!(elapsed < settings.deadline + settings.poll_interval + Duration::from_millis(200));
    }

    #[test]
    fn discard_pending_drops_only_what_has_arrived() {
        let mut link = ScriptedSerial::new()
            .reply_after(Duration::ZERO, b"Buzzer ")
            .reply_after(Duration::ZERO, b"idle\n")
            .reply_after(Duration::from_millis(400), b"OK\n");

        assert_eq!(discard_pending(&mut link).unwrap(), "Buzzer idle\n");
        assert_eq!(discard_pending(&mut link).unwrap(), "");
        assert_eq!(link.unread_len(), 3);
    }

    #[test]
    fn malformed_bytes_are_dropped() {
        let mut link = ScriptedSerial::new().reply_after(Duration::ZERO, b"BE\xffEP\xc3\n");
        let outcome = collect(&mut link, &settings(500)).unwrap();
        assert_eq!(outcome, ResponseOutcome::Complete("BEEP".into()));
    }

    #[test]
    fn no_sentinels_waits_whole_window() {
        let mut link = ScriptedSerial::new().reply_after(Duration::ZERO, b"boot\n");
        let settings = settings(100).without_sentinels();
        let start = Instant::now();
        let outcome = collect(&mut link, &settings).unwrap();
        assert!(start.elapsed() >= settings.deadline);
        assert_eq!(outcome, ResponseOutcome::Timeout("boot".into()));
    }

    #[test]
    fn closed_link_is_an_error() {
        let mut link = ScriptedSerial::new();
        link.close();
        assert!(matches!(
            collect(&mut link, &settings(100)),
            Err(crate::transport::TransportError::NotConnected)
        ));
    }

    #[test]
    fn decode_keeps_valid_utf8() {
        assert_eq!(decode_permissive("héllo".as_bytes()), "héllo");
        assert_eq!(decode_permissive(&[0x80, b'a', 0xfe]), "a");
    }
}
