//! STARTTLS scripts run against an in-memory server.

use std::io::{self, Cursor, Read, Write};

use crate::error::Error;
use crate::negotiate::{Exchange, Script, Step};
use crate::target::Scheme;

/// The first bytes of a TLS record, standing in for the server's handshake.
const TLS_BYTES: &[u8] = &[0x16, 0x03, 0x01, 0x00, 0x2a];

/// Plays back canned server bytes and records what the client writes.
struct MockServer {
    input: Cursor<Vec<u8>>,
    written: Vec<u8>,
    /// How many input bytes had been consumed at each write.
    consumed_at_write: Vec<u64>,
    fail_reads_with: Option<io::ErrorKind>,
}

impl MockServer {
    fn new(server_bytes: &[u8]) -> Self {
        Self {
            input: Cursor::new(server_bytes.to_vec()),
            written: Vec::new(),
            consumed_at_write: Vec::new(),
            fail_reads_with: None,
        }
    }

    fn failing(kind: io::ErrorKind) -> Self {
        Self {
            fail_reads_with: Some(kind),
            ..Self::new(b"")
        }
    }

    fn written(&self) -> &str {
        std::str::from_utf8(&self.written).unwrap()
    }

    fn unread(&self) -> &[u8] {
        &self.input.get_ref()[self.input.position() as usize..]
    }
}

impl Read for MockServer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.fail_reads_with {
            Some(kind) => Err(kind.into()),
            None => self.input.read(buf),
        }
    }
}

impl Write for MockServer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.consumed_at_write.push(self.input.position());
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn script(scheme: Scheme) -> &'static Script {
    Script::for_scheme(&scheme).unwrap()
}

fn with_tls_bytes(plaintext: &str) -> Vec<u8> {
    let mut bytes = plaintext.as_bytes().to_vec();
    bytes.extend_from_slice(TLS_BYTES);
    bytes
}

#[test]
fn direct_tls_schemes_have_no_script() {
    for scheme in [
        Scheme::Https,
        Scheme::Tls,
        Scheme::Other("ldaps".to_owned()),
    ] {
        assert!(Script::for_scheme(&scheme).is_none(), "{scheme}");
    }
}

#[test]
fn scripts_are_fixed_per_protocol() {
    assert_eq!(
        script(Scheme::Smtp).steps(),
        &[
            Step::Greeting,
            Step::Send("EHLO localhost\r\n"),
            Step::Reply,
            Step::Send("STARTTLS\r\n"),
            Step::Reply,
        ]
    );
    assert_eq!(
        script(Scheme::Imap).steps(),
        &[Step::Greeting, Step::Send("a001 STARTTLS\r\n"), Step::Reply]
    );
    assert_eq!(
        script(Scheme::Pop3).steps(),
        &[Step::Greeting, Step::Send("STLS\r\n"), Step::Reply]
    );
}

#[test]
fn pop3_sends_stls_once_after_the_greeting() {
    let greeting = "+OK POP3 server ready\r\n";
    let mut server = MockServer::new(&with_tls_bytes(&format!("{greeting}+OK Begin TLS\r\n")));

    let negotiation = script(Scheme::Pop3).run(&mut server).unwrap();

    assert!(negotiation.is_complete());
    assert_eq!(server.written(), "STLS\r\n");
    assert_eq!(server.consumed_at_write, vec![greeting.len() as u64]);
    // Nothing belonging to the TLS handshake was consumed.
    assert_eq!(server.unread(), TLS_BYTES);
}

#[test]
fn smtp_reads_multiline_ehlo_reply() {
    let greeting = "220 mail.example.com ESMTP\r\n";
    let ehlo_reply = "250-mail.example.com\r\n250-PIPELINING\r\n250-SIZE 10240000\r\n250 STARTTLS\r\n";
    let mut server = MockServer::new(&with_tls_bytes(&format!(
        "{greeting}{ehlo_reply}220 2.0.0 Ready to start TLS\r\n"
    )));

    let negotiation = script(Scheme::Smtp).run(&mut server).unwrap();

    assert!(negotiation.is_complete());
    assert_eq!(server.written(), "EHLO localhost\r\nSTARTTLS\r\n");
    assert_eq!(
        server.consumed_at_write,
        vec![
            greeting.len() as u64,
            (greeting.len() + ehlo_reply.len()) as u64
        ]
    );
    assert_eq!(server.unread(), TLS_BYTES);
    assert_eq!(
        negotiation.transcript().last(),
        Some(&Exchange::Received("220 2.0.0 Ready to start TLS".to_owned()))
    );
}

#[test]
fn imap_skips_untagged_lines_before_tagged_ok() {
    let mut server = MockServer::new(&with_tls_bytes(
        "* OK [CAPABILITY IMAP4rev1 STARTTLS] ready\r\n\
         * CAPABILITY IMAP4rev1 STARTTLS\r\n\
         a001 OK Begin TLS negotiation now\r\n",
    ));

    let negotiation = script(Scheme::Imap).run(&mut server).unwrap();

    assert!(negotiation.is_complete());
    assert_eq!(server.written(), "a001 STARTTLS\r\n");
    assert_eq!(server.unread(), TLS_BYTES);
    assert_eq!(
        negotiation.transcript(),
        &[
            Exchange::Received("* OK [CAPABILITY IMAP4rev1 STARTTLS] ready".to_owned()),
            Exchange::Sent("a001 STARTTLS\r\n".to_owned()),
            Exchange::Received("* CAPABILITY IMAP4rev1 STARTTLS".to_owned()),
            Exchange::Received("a001 OK Begin TLS negotiation now".to_owned()),
        ]
    );
}

#[test]
fn bare_newlines_are_accepted() {
    let mut server = MockServer::new(b"+OK hi\n+OK go\n");
    assert!(script(Scheme::Pop3).run(&mut server).is_ok());
}

fn expect_negotiation_error(scheme: Scheme, server: &mut MockServer, reason_contains: &str) {
    match script(scheme).run(server) {
        Err(Error::Negotiation { reason, .. }) => assert!(
            reason.contains(reason_contains),
            "{reason:?} does not mention {reason_contains:?}"
        ),
        other => panic!("expected a negotiation error, got {other:?}"),
    }
}

#[test]
fn pop3_err_reply_is_rejected() {
    let mut server = MockServer::new(b"+OK ready\r\n-ERR STLS not supported\r\n");
    expect_negotiation_error(Scheme::Pop3, &mut server, "-ERR STLS not supported");
}

#[test]
fn smtp_starttls_refusal_is_rejected() {
    let mut server = MockServer::new(
        b"220 ready\r\n250 mail.example.com\r\n454 4.7.0 TLS not available\r\n",
    );
    expect_negotiation_error(Scheme::Smtp, &mut server, "454");
    assert_eq!(server.written(), "EHLO localhost\r\nSTARTTLS\r\n");
}

#[test]
fn smtp_starttls_needs_220_not_any_success() {
    let mut server = MockServer::new(&with_tls_bytes(
        "220 hi\r\n250 ok\r\n250 not starting tls\r\n",
    ));
    expect_negotiation_error(Scheme::Smtp, &mut server, "step 5: 250 not starting tls");
}

#[test]
fn smtp_unavailable_greeting_stops_before_ehlo() {
    let mut server = MockServer::new(b"554 no service\r\n");
    expect_negotiation_error(Scheme::Smtp, &mut server, "step 1");
    assert_eq!(server.written(), "");
}

#[test]
fn imap_tagged_bad_is_rejected() {
    let mut server = MockServer::new(b"* OK ready\r\na001 BAD unknown command\r\n");
    expect_negotiation_error(Scheme::Imap, &mut server, "a001 BAD");
}

#[test]
fn imap_bye_greeting_is_rejected() {
    let mut server = MockServer::new(b"* BYE too many connections\r\n");
    expect_negotiation_error(Scheme::Imap, &mut server, "BYE");
    assert_eq!(server.written(), "");
}

#[test]
fn short_read_is_a_negotiation_error() {
    // Greeting cut off before its line ending.
    let mut server = MockServer::new(b"+OK rea");
    expect_negotiation_error(Scheme::Pop3, &mut server, "connection closed by server");
}

#[test]
fn connection_closed_after_command_is_a_negotiation_error() {
    let mut server = MockServer::new(b"220 ready\r\n");
    expect_negotiation_error(Scheme::Smtp, &mut server, "step 3");
}

#[test]
fn timeout_is_a_negotiation_error() {
    let mut server = MockServer::failing(io::ErrorKind::WouldBlock);
    expect_negotiation_error(Scheme::Imap, &mut server, "timed out");
}

#[test]
fn reset_is_a_negotiation_error() {
    let mut server = MockServer::failing(io::ErrorKind::ConnectionReset);
    match script(Scheme::Pop3).run(&mut server) {
        Err(Error::Negotiation { protocol, .. }) => assert_eq!(protocol, "pop3"),
        other => panic!("expected a negotiation error, got {other:?}"),
    }
}

#[test]
fn overlong_reply_line_is_rejected() {
    let mut bytes = b"+OK ".to_vec();
    bytes.extend(std::iter::repeat(b'x').take(10_000));
    bytes.extend_from_slice(b"\r\n");
    let mut server = MockServer::new(&bytes);
    expect_negotiation_error(Scheme::Pop3, &mut server, "too long");
}
