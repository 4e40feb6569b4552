//! Step-by-step fault localization for the serial Bluetooth bridge.
//!
//! The procedure is a small decision tree. Each step sends one command over the
//! session's serial link, classifies the reply, and follows the successor for
//! that verdict until a leaf is reached. Reply timeouts are ordinary verdicts;
//! transport errors end the run at the `TransportFault` leaf.

use crate::exchange::{Command, send_confirmed};
use crate::response::{CollectSettings, ResponseOutcome, collect, discard_pending};
use crate::transport::{Result, SerialConnector, SerialLink, SerialSettings};

use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Fragments of the names the bridge module reports for `AT+NAME?`.
pub const MODULE_IDENTIFIERS: &[&str] = &["HC-06", "Space-Man"];

pub const CHECK_CABLE: &str = "\
Cannot proceed - Arduino not connected

Troubleshooting:
  - Check if Arduino is connected to computer
  - Verify the board shows up on this port: arduino-cli board list
  - Try a different USB cable";

pub const WIRING_CHECKLIST: &str = "\
HC-06 module not responding to AT commands

Possible issues:
  - HC-06 KEY/EN pin not connected to 5V (yellow wire)
  - HC-06 TX/RX wires swapped
  - HC-06 module not powered (check red and black wires)
  - HC-06 module faulty

Wiring Checklist:
  [ ] HC-06 VCC (pin) -> Arduino 5V (red wire)
  [ ] HC-06 GND (pin) -> Arduino GND (black wire)
  [ ] HC-06 TX (pin) -> Arduino Pin 10 (blue wire)
  [ ] HC-06 RX (pin) -> Arduino Pin 11 (green wire)
  [ ] HC-06 KEY/EN (pin) -> Arduino 5V (yellow wire) - CRITICAL

  Double-check all connections against HC-06 module labels";

pub const PAIRING_GUIDE: &str = "\
HC-06 hardware connection appears working

Bluetooth Discovery Test:
  1. Check Android Bluetooth settings
  2. Look for devices (may show as 'HC-06', 'Space-Man-Buzzer', etc.)
  3. Pair with PIN: 1234
  4. Use Bluetooth Serial Terminal app to send 'HELLO'";

pub const UNEXPECTED_REPLY: &str = "\
HC-06 responded but with unexpected output

The module is wired and powered, but did not report a known name.
If pairing fails, re-check the module type and its baud rate, then:
  1. Look for the module in Android Bluetooth settings
  2. Pair with PIN: 1234
  3. Use Bluetooth Serial Terminal app to send 'HELLO'";

pub const TRANSPORT_FAULT: &str = "\
The serial link failed during the diagnostic

Troubleshooting:
  - Reconnect the USB cable
  - Close any serial monitor or IDE holding the port
  - Run the diagnostic again";

/// Classification of one step's reply.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Verdict {
    Pass,
    /// A reply arrived but it is not the expected one
    Unrecognized,
    Fail,
}

/// Terminal nodes of the decision tree.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Leaf {
    CheckCable,
    ModuleResponding,
    UnexpectedReply,
    WiringChecklist,
    TransportFault,
}

impl Leaf {
    pub fn passed(self) -> bool {
        matches!(self, Leaf::ModuleResponding | Leaf::UnexpectedReply)
    }

    pub fn remediation(self) -> &'static str {
        match self {
            Leaf::CheckCable => CHECK_CABLE,
            Leaf::ModuleResponding => PAIRING_GUIDE,
            Leaf::UnexpectedReply => UNEXPECTED_REPLY,
            Leaf::WiringChecklist => WIRING_CHECKLIST,
            Leaf::TransportFault => TRANSPORT_FAULT,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Next {
    Step(usize),
    Leaf(Leaf),
}

pub struct DiagnosticStep {
    pub name: &'static str,
    pub command: Command,
    /// Wait before sending
    pub settle: Duration,
    pub window: CollectSettings,
    pub classify: fn(&ResponseOutcome) -> Verdict,
    pub on_pass: Next,
    pub on_unrecognized: Next,
    pub on_fail: Next,
}

impl DiagnosticStep {
    fn next(&self, verdict: Verdict) -> Next {
        match verdict {
            Verdict::Pass => self.on_pass,
            Verdict::Unrecognized => self.on_unrecognized,
            Verdict::Fail => self.on_fail,
        }
    }
}

/// Any reply proves the sketch is running; silence is only a warning.
fn classify_hello(outcome: &ResponseOutcome) -> Verdict {
    if outcome.has_reply() { Verdict::Pass } else { Verdict::Fail }
}

fn classify_at_name(outcome: &ResponseOutcome) -> Verdict {
    if !outcome.has_reply() {
        return Verdict::Fail;
    }
    let reply = outcome.text().to_ascii_uppercase();
    if MODULE_IDENTIFIERS.iter().any(|id| reply.contains(&id.to_ascii_uppercase())) {
        Verdict::Pass
    } else {
        Verdict::Unrecognized
    }
}

#[derive(Debug, Clone)]
pub struct DiagnosticTimings {
    /// Time for the board to reboot after the port opens
    pub boot_wait: Duration,
    /// Window for unsolicited startup text
    pub startup_window: Duration,
    /// Reply window for each step
    pub reply_window: Duration,
    /// Pause before the AT query
    pub at_settle: Duration,
    pub poll_interval: Duration,
}

impl Default for DiagnosticTimings {
    fn default() -> Self {
        DiagnosticTimings {
            boot_wait: Duration::from_secs(2),
            startup_window: Duration::from_secs(3),
            reply_window: Duration::from_millis(2500),
            at_settle: Duration::from_secs(1),
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// One step as it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub name: &'static str,
    pub command: Command,
    pub outcome: ResponseOutcome,
    pub verdict: Verdict,
}

#[derive(Debug, Clone)]
pub struct DiagnosticReport {
    pub leaf: Leaf,
    pub port: String,
    pub startup: Vec<String>,
    pub steps: Vec<StepRecord>,
    /// Transport error that ended the run, if any
    pub error: Option<String>,
}

impl DiagnosticReport {
    pub fn exit_code(&self) -> i32 {
        if self.leaf.passed() { 0 } else { 1 }
    }
}

impl fmt::Display for DiagnosticReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "HC-06 Bluetooth Module Diagnostic")?;
        writeln!(f, "{}", "=".repeat(40))?;
        if self.leaf == Leaf::CheckCable {
            writeln!(f, "[FAIL] could not open {}", self.port)?;
        } else {
            writeln!(f, "[ OK ] Arduino connected on {}", self.port)?;
        }
        if !self.startup.is_empty() {
            writeln!(f, "Arduino startup output:")?;
            for line in &self.startup {
                writeln!(f, "  {}", line)?;
            }
        }
        for step in &self.steps {
            let mark = match step.verdict {
                Verdict::Pass => "[ OK ]",
                Verdict::Unrecognized => "[WARN]",
                Verdict::Fail => "[FAIL]",
            };
            match &step.outcome {
                ResponseOutcome::Empty => writeln!(f, "{} {}: sent {}, no response", mark, step.name, step.command)?,
                outcome => writeln!(f, "{} {}: sent {}, got {:?}", mark, step.name, step.command, outcome.text())?,
            }
        }
        if let Some(error) = &self.error {
            writeln!(f, "error: {}", error)?;
        }
        writeln!(f)?;
        write!(f, "{}", self.leaf.remediation())
    }
}

/// An open serial link plus what has been observed on it.
///
/// Owns the link for the whole run; dropping the session releases the port.
pub struct DiagnosticSession<L: SerialLink> {
    link: L,
    records: Vec<StepRecord>,
}

impl<L: SerialLink> DiagnosticSession<L> {
    pub fn open<C: SerialConnector<Link = L>>(connector: &C, settings: &SerialSettings) -> Result<Self> {
        let link = connector.open(settings)?;
        Ok(DiagnosticSession {
            link,
            records: Vec::new(),
        })
    }

    /// Best-effort capture of boot messages; failures are ignored.
    pub fn read_startup(&mut self, timings: &DiagnosticTimings) -> Vec<String> {
        std::thread::sleep(timings.boot_wait);
        let window = CollectSettings::new(timings.startup_window)
            .without_sentinels()
            .with_poll_interval(timings.poll_interval);
        match collect(&mut self.link, &window) {
            Ok(outcome) => outcome
                .text()
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_owned)
                .collect(),
            Err(e) => {
                warn!("could not read startup output: {}", e);
                Vec::new()
            }
        }
    }

    pub fn run_step(&mut self, step: &DiagnosticStep) -> Result<Verdict> {
        std::thread::sleep(step.settle);
        // late replies and status lines from earlier steps must not pass for this step's reply
        let stale = discard_pending(&mut self.link)?;
        if !stale.is_empty() {
            debug!("step `{}`: discarded stale input {:?}", step.name, stale);
        }
        info!("step `{}`: sending {}", step.name, step.command);
        let outcome = send_confirmed(&mut self.link, step.command, &step.window)?;
        let verdict = (step.classify)(&outcome);
        info!("step `{}`: {:?}", step.name, verdict);
        self.records.push(StepRecord {
            name: step.name,
            command: step.command,
            outcome,
            verdict,
        });
        Ok(verdict)
    }

    pub fn close(mut self) -> Vec<StepRecord> {
        self.link.close();
        self.records
    }
}

pub struct DiagnosticProcedure {
    steps: Vec<DiagnosticStep>,
    timings: DiagnosticTimings,
}

impl DiagnosticProcedure {
    /// Basic connection (`HELLO`), then the bridge module (`AT+NAME?`).
    pub fn standard(timings: DiagnosticTimings) -> Self {
        let window = CollectSettings::new(timings.reply_window).with_poll_interval(timings.poll_interval);
        let steps = vec![
            DiagnosticStep {
                name: "USB serial connection",
                command: Command::Hello,
                settle: Duration::ZERO,
                window: window.clone(),
                classify: classify_hello,
                on_pass: Next::Step(1),
                on_unrecognized: Next::Step(1),
                on_fail: Next::Step(1),
            },
            DiagnosticStep {
                name: "HC-06 AT command",
                command: Command::AtNameQuery,
                settle: timings.at_settle,
                window,
                classify: classify_at_name,
                on_pass: Next::Leaf(Leaf::ModuleResponding),
                on_unrecognized: Next::Leaf(Leaf::UnexpectedReply),
                on_fail: Next::Leaf(Leaf::WiringChecklist),
            },
        ];
        DiagnosticProcedure { steps, timings }
    }

    pub fn run<C: SerialConnector>(&self, connector: &C, settings: &SerialSettings) -> DiagnosticReport {
        let mut report = DiagnosticReport {
            leaf: Leaf::CheckCable,
            port: settings.port.clone(),
            startup: Vec::new(),
            steps: Vec::new(),
            error: None,
        };

        let mut session = match DiagnosticSession::open(connector, settings) {
            Ok(session) => session,
            Err(e) => {
                warn!("basic connection failed: {}", e);
                report.error = Some(e.to_string());
                return report;
            }
        };
        report.startup = session.read_startup(&self.timings);

        let mut node = Next::Step(0);
        let leaf = loop {
            match node {
                Next::Leaf(leaf) => break leaf,
                Next::Step(index) => {
                    let step = &self.steps[index];
                    match session.run_step(step) {
                        Ok(verdict) => node = step.next(verdict),
                        Err(e) => {
                            warn!("step `{}` aborted: {}", step.name, e);
                            report.error = Some(format!("{}: {}", step.name, e));
                            break Leaf::TransportFault;
                        }
                    }
                }
            }
        };

        report.leaf = leaf;
        report.steps = session.close();
        info!("diagnostic finished at {:?}", leaf);
        report
    }
}
