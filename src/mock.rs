//! Scripted transports for tests.

use crate::transport::{
    BleCentral, BleLink, Result, ScanEntry, SerialConnector, SerialLink, SerialSettings, TransportError,
};

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Serial link replaying timed byte chunks.
///
/// Chunks queued with `reply_after` are due relative to creation; chunks queued
/// with `on_write` are due relative to the matching write.
pub struct ScriptedSerial {
    pending: Vec<(Instant, Vec<u8>)>,
    replies: VecDeque<Option<(Duration, Vec<u8>)>>,
    writes: Rc<RefCell<Vec<String>>>,
    closed: Rc<Cell<bool>>,
    fail_writes: bool,
}

impl ScriptedSerial {
    pub fn new() -> Self {
        ScriptedSerial {
            pending: Vec::new(),
            replies: VecDeque::new(),
            writes: Rc::new(RefCell::new(Vec::new())),
            closed: Rc::new(Cell::new(false)),
            fail_writes: false,
        }
    }

    pub fn reply_after(mut self, delay: Duration, bytes: &[u8]) -> Self {
        self.pending.push((Instant::now() + delay, bytes.to_vec()));
        self
    }

    /// Answer the next write with `bytes` after `delay`
    pub fn on_write(mut self, delay: Duration, bytes: &[u8]) -> Self {
        self.replies.push_back(Some((delay, bytes.to_vec())));
        self
    }

    /// Leave the next write unanswered
    pub fn silent_on_write(mut self) -> Self {
        self.replies.push_back(None);
        self
    }

    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn write_log(&self) -> Rc<RefCell<Vec<String>>> {
        self.writes.clone()
    }

    pub fn closed_flag(&self) -> Rc<Cell<bool>> {
        self.closed.clone()
    }

    /// Bytes scheduled but not yet read, due or not
    pub fn unread_len(&self) -> usize {
        self.pending.iter().map(|(_, bytes)| bytes.len()).sum()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.get() {
            Err(TransportError::NotConnected)
        } else {
            Ok(())
        }
    }
}

impl SerialLink for ScriptedSerial {
    fn is_open(&self) -> bool {
        !self.closed.get()
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure_open()?;
        if self.fail_writes {
            return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "device unplugged").into());
        }
        self.writes.borrow_mut().push(String::from_utf8_lossy(bytes).into_owned());
        if let Some(Some((delay, reply))) = self.replies.pop_front() {
            self.pending.push((Instant::now() + delay, reply));
        }
        Ok(())
    }

    fn bytes_available(&mut self) -> Result<usize> {
        self.ensure_open()?;
        let now = Instant::now();
        Ok(self.pending.iter().filter(|(due, _)| *due <= now).map(|(_, bytes)| bytes.len()).sum())
    }

    fn read_available(&mut self) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let now = Instant::now();
        let mut out = Vec::new();
        self.pending.sort_by_key(|(due, _)| *due);
        self.pending.retain(|(due, bytes)| {
            if *due <= now {
                out.extend_from_slice(bytes);
                false
            } else {
                true
            }
        });
        Ok(out)
    }

    fn close(&mut self) {
        self.closed.set(true);
    }
}

/// Hands out one prepared link, or refuses to open.
pub struct ScriptedConnector {
    link: RefCell<Option<ScriptedSerial>>,
    opened: Cell<usize>,
}

impl ScriptedConnector {
    pub fn with_link(link: ScriptedSerial) -> Self {
        ScriptedConnector {
            link: RefCell::new(Some(link)),
            opened: Cell::new(0),
        }
    }

    pub fn unavailable() -> Self {
        ScriptedConnector {
            link: RefCell::new(None),
            opened: Cell::new(0),
        }
    }

    pub fn open_count(&self) -> usize {
        self.opened.get()
    }
}

impl SerialConnector for ScriptedConnector {
    type Link = ScriptedSerial;

    fn open(&self, settings: &SerialSettings) -> Result<Self::Link> {
        let link = self.link.borrow_mut().take().ok_or_else(|| TransportError::Open {
            target: settings.port.clone(),
            reason: "no such device".into(),
        })?;
        self.opened.set(self.opened.get() + 1);
        Ok(link)
    }
}

/// Characteristic write seen by a `MockBleLink`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BleWrite {
    pub char: uuid::Uuid,
    pub text: String,
}

#[derive(Clone, Default)]
pub struct BleLog {
    pub writes: Rc<RefCell<Vec<BleWrite>>>,
    pub connects: Rc<RefCell<Vec<String>>>,
    pub disconnects: Rc<Cell<usize>>,
}

pub struct MockCentral {
    pub entries: Vec<ScanEntry>,
    pub refuse_connect: bool,
    pub log: BleLog,
}

impl MockCentral {
    pub fn new(entries: Vec<ScanEntry>) -> Self {
        MockCentral {
            entries,
            refuse_connect: false,
            log: BleLog::default(),
        }
    }
}

impl BleCentral for MockCentral {
    type Link = MockBleLink;

    async fn discover(&self, duration: Duration) -> Result<Vec<ScanEntry>> {
        tokio::time::sleep(duration).await;
        Ok(self.entries.clone())
    }

    async fn connect(&self, address: &str) -> Result<Self::Link> {
        self.log.connects.borrow_mut().push(address.to_owned());
        if self.refuse_connect {
            return Err(TransportError::ConnectFailed {
                address: address.to_owned(),
                reason: "peripheral did not answer".into(),
            });
        }
        Ok(MockBleLink {
            connected: Cell::new(true),
            log: self.log.clone(),
        })
    }
}

pub struct MockBleLink {
    pub connected: Cell<bool>,
    log: BleLog,
}

impl BleLink for MockBleLink {
    async fn is_connected(&self) -> bool {
        self.connected.get()
    }

    async fn write_characteristic(&self, char: uuid::Uuid, bytes: &[u8]) -> Result<()> {
        if !self.connected.get() {
            return Err(TransportError::NotConnected);
        }
        self.log.writes.borrow_mut().push(BleWrite {
            char,
            text: String::from_utf8_lossy(bytes).into_owned(),
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.set(false);
        self.log.disconnects.set(self.log.disconnects.get() + 1);
        Ok(())
    }
}
