//! Echo protocol: writes back every byte it reads.

use std::io::{ErrorKind, Read, Write};

use netpool_core::{CancellationToken, Channel, Protocol};
use tracing::trace;

const BUFFER_SIZE: usize = 4096;

/// Stateless, so a single instance is shared by every worker.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoProtocol;

impl Protocol for EchoProtocol {
    fn communicate(&self, channel: &mut dyn Channel, token: &dyn CancellationToken) {
        let mut buf = [0u8; BUFFER_SIZE];
        let mut echoed = 0usize;

        while token.can_continue() {
            let n = match channel.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    trace!("echo read ended: {e}");
                    break;
                }
            };
            if let Err(e) = channel.write_all(&buf[..n]).and_then(|()| channel.flush()) {
                trace!("echo write failed: {e}");
                break;
            }
            echoed += n;
        }

        trace!(bytes = echoed, "echo session finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Token(bool);

    impl CancellationToken for Token {
        fn can_continue(&self) -> bool {
            self.0
        }
    }

    /// Reads from `input`, collects writes into `output`.
    struct Loopback {
        input: std::io::Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for Loopback {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Loopback {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_echo_returns_input_until_eof() {
        // Arrange
        let payload = vec![7u8; BUFFER_SIZE * 2 + 10];
        let mut channel = Loopback {
            input: std::io::Cursor::new(payload.clone()),
            output: Vec::new(),
        };

        // Act
        EchoProtocol.communicate(&mut channel, &Token(true));

        // Assert
        assert_eq!(channel.output, payload);
    }

    #[test]
    fn test_echo_stops_when_cancelled() {
        let mut channel = Loopback {
            input: std::io::Cursor::new(b"ignored".to_vec()),
            output: Vec::new(),
        };

        EchoProtocol.communicate(&mut channel, &Token(false));

        assert!(channel.output.is_empty());
    }

    #[test]
    fn test_echo_is_not_forked() {
        assert!(EchoProtocol.fork().is_none());
        assert!(EchoProtocol.busy_response().is_none());
    }
}
