//! Plaintext exchanges that ask a server to switch the connection over to TLS.
//!
//! Every supported protocol is described by a [`Script`]: a fixed, ordered
//! list of reads and writes. Running a script threads a [`Negotiation`] value
//! through the steps so the progress made so far is always explicit.

use std::io::{self, Read, Write};

use crate::error::{self, Error, Result};
use crate::target::Scheme;

/// Longest reply line we are willing to buffer.
const MAX_LINE: usize = 4096;

/// Tag used for the IMAP `STARTTLS` command.
pub const IMAP_TAG: &str = "a001";

/// A single step of a STARTTLS script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Read the banner the server sends when the connection opens.
    Greeting,
    /// Send a command.
    Send(&'static str),
    /// Read the reply to the command sent last.
    Reply,
}

/// Rules for recognising where a reply ends and whether it was positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    Smtp,
    Imap,
    Pop3,
}

/// The plaintext exchange for one protocol.
#[derive(Debug)]
pub struct Script {
    protocol: &'static str,
    dialect: Dialect,
    steps: &'static [Step],
}

static SMTP: Script = Script {
    protocol: "smtp",
    dialect: Dialect::Smtp,
    steps: &[
        Step::Greeting,
        Step::Send("EHLO localhost\r\n"),
        Step::Reply,
        Step::Send("STARTTLS\r\n"),
        Step::Reply,
    ],
};

static IMAP: Script = Script {
    protocol: "imap",
    dialect: Dialect::Imap,
    steps: &[Step::Greeting, Step::Send("a001 STARTTLS\r\n"), Step::Reply],
};

static POP3: Script = Script {
    protocol: "pop3",
    dialect: Dialect::Pop3,
    steps: &[Step::Greeting, Step::Send("STLS\r\n"), Step::Reply],
};

impl Script {
    /// Looks up the script for `scheme`.
    ///
    /// Returns `None` for schemes that begin with the TLS handshake straight away.
    pub fn for_scheme(scheme: &Scheme) -> Option<&'static Self> {
        match scheme {
            Scheme::Smtp => Some(&SMTP),
            Scheme::Imap => Some(&IMAP),
            Scheme::Pop3 => Some(&POP3),
            Scheme::Https | Scheme::Tls | Scheme::Other(_) => None,
        }
    }

    /// Protocol name used in logs and errors.
    pub fn protocol(&self) -> &'static str {
        self.protocol
    }

    /// The steps, in execution order.
    pub fn steps(&self) -> &'static [Step] {
        self.steps
    }

    /// Runs the script to completion over `stream`.
    ///
    /// On success the next bytes on the stream belong to the TLS handshake.
    /// Nothing is retried: the first failed step ends the negotiation.
    pub fn run<S: Read + Write>(&'static self, stream: &mut S) -> Result<Negotiation> {
        log::debug!("starting {} STARTTLS negotiation", self.protocol);
        self.steps
            .iter()
            .try_fold(Negotiation::new(self), |state, step| state.advance(stream, *step))
    }
}

/// One line of the plaintext conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exchange {
    /// A command we wrote, including its line ending.
    Sent(String),
    /// A reply line from the server, without its line ending.
    Received(String),
}

/// Progress through a [`Script`].
#[derive(Debug)]
pub struct Negotiation {
    script: &'static Script,
    completed: usize,
    transcript: Vec<Exchange>,
}

impl Negotiation {
    fn new(script: &'static Script) -> Self {
        Self {
            script,
            completed: 0,
            transcript: Vec::new(),
        }
    }

    /// Number of script steps executed so far.
    pub fn completed(&self) -> usize {
        self.completed
    }

    /// True once every step of the script has run.
    pub fn is_complete(&self) -> bool {
        self.completed == self.script.steps.len()
    }

    /// Everything sent and received, in order.
    pub fn transcript(&self) -> &[Exchange] {
        &self.transcript
    }

    fn advance<S: Read + Write>(mut self, stream: &mut S, step: Step) -> Result<Self> {
        match step {
            Step::Send(command) => {
                stream
                    .write_all(command.as_bytes())
                    .and_then(|()| stream.flush())
                    .map_err(|e| self.io_error("sending command", &e))?;
                log::debug!("{} -> {}", self.script.protocol, command.trim_end());
                self.transcript.push(Exchange::Sent(command.to_owned()));
            }
            Step::Greeting | Step::Reply => {
                let lines = self.read_reply(stream, step)?;
                self.check_reply(step, &lines)?;
                self.transcript
                    .extend(lines.into_iter().map(Exchange::Received));
            }
        }
        self.completed += 1;
        Ok(self)
    }

    fn read_reply<S: Read>(&self, stream: &mut S, step: Step) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        loop {
            let line = read_line(stream).map_err(|e| self.io_error("reading reply", &e))?;
            log::debug!("{} <- {}", self.script.protocol, line);
            let last = match (self.script.dialect, step) {
                // `250-` continues a multi-line reply, `250 ` ends it.
                (Dialect::Smtp, _) => line.as_bytes().get(3) != Some(&b'-'),
                // Untagged data may precede the tagged completion.
                (Dialect::Imap, Step::Reply) => is_tagged(&line),
                (Dialect::Imap, _) | (Dialect::Pop3, _) => true,
            };
            lines.push(line);
            if last {
                return Ok(lines);
            }
        }
    }

    fn check_reply(&self, step: Step, lines: &[String]) -> Result<()> {
        let last = lines.last().map(String::as_str).unwrap_or_default();
        let accepted = match self.script.dialect {
            // 220 both opens the session and agrees to STARTTLS.
            Dialect::Smtp if step == Step::Greeting || self.hands_over_to_tls() => {
                last.starts_with("220")
            }
            Dialect::Smtp => last.starts_with('2'),
            Dialect::Imap => match step {
                Step::Greeting => {
                    let upper = last.to_ascii_uppercase();
                    upper.starts_with("* OK") || upper.starts_with("* PREAUTH")
                }
                _ => last
                    .get(IMAP_TAG.len() + 1..)
                    .map_or(false, |status| status.to_ascii_uppercase().starts_with("OK")),
            },
            Dialect::Pop3 => last.starts_with("+OK"),
        };

        if accepted {
            Ok(())
        } else {
            Err(Error::negotiation(
                self.script.protocol,
                format!("server rejected step {}: {last}", self.completed + 1),
            ))
        }
    }

    /// True while running the last step, after which the server expects TLS.
    fn hands_over_to_tls(&self) -> bool {
        self.completed + 1 == self.script.steps.len()
    }

    fn io_error(&self, doing: &str, err: &io::Error) -> Error {
        let reason = if error::is_timeout(err) {
            "timed out".to_owned()
        } else if err.kind() == io::ErrorKind::UnexpectedEof {
            "connection closed by server".to_owned()
        } else {
            err.to_string()
        };
        Error::negotiation(
            self.script.protocol,
            format!("{doing} at step {}: {reason}", self.completed + 1),
        )
    }
}

fn is_tagged(line: &str) -> bool {
    line.get(..IMAP_TAG.len())
        .map_or(false, |tag| tag.eq_ignore_ascii_case(IMAP_TAG))
        && line.as_bytes().get(IMAP_TAG.len()) == Some(&b' ')
}

/// Reads one `\n`-terminated line a byte at a time.
///
/// Reading byte-wise guarantees none of the server's TLS handshake bytes are
/// pulled off the socket along with the final reply.
fn read_line<R: Read>(stream: &mut R) -> io::Result<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match stream.read(&mut byte) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(_) => {
                if byte[0] == b'\n' {
                    break;
                }
                if line.len() == MAX_LINE {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "reply line too long",
                    ));
                }
                line.push(byte[0]);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}
