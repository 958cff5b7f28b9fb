//! Interactive terminal client.
//!
//! Sends the display name, then relays stdin lines to the server as
//! `<name>: <line>` and prints every line the server sends.

use crate::message::{trim_line_ending, Envelope};
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

const LEAVE: &str = "/leave";

/// Why the client stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// The user typed `/leave` or closed stdin.
    Left,
    /// The server closed the connection.
    ServerClosed,
}

/// Connect to `host:port` and chat on stdin/stdout.
pub async fn run(host: &str, port: u16, name: Option<String>) -> io::Result<Exit> {
    let mut input = BufReader::new(tokio::io::stdin());
    let mut output = tokio::io::stdout();

    output
        .write_all(format!("Type '{LEAVE}' to exit the chat.\n").as_bytes())
        .await?;

    let name = match name {
        Some(name) => name,
        None => {
            output
                .write_all(b"Enter your display name for the chat:\n")
                .await?;
            output.flush().await?;
            let mut line = String::new();
            if input.read_line(&mut line).await? == 0 {
                return Ok(Exit::Left);
            }
            trim_line_ending(&line).to_string()
        }
    };

    let stream = TcpStream::connect((host, port)).await?;
    debug!(host, port, name = %name, "Connected");
    let (reader, writer) = stream.into_split();

    relay(&name, input, output, reader, writer).await
}

/// Pump lines between the user and the server until either side ends.
pub async fn relay<I, O, R, W>(
    name: &str,
    input: I,
    mut output: O,
    server_read: R,
    mut server_write: W,
) -> io::Result<Exit>
where
    I: AsyncBufRead + Unpin,
    O: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut typed = input.lines();
    let mut incoming = BufReader::new(server_read).lines();

    send_line(&mut server_write, name).await?;

    let exit = loop {
        tokio::select! {
            line = incoming.next_line() => match line? {
                Some(line) => {
                    output.write_all(line.as_bytes()).await?;
                    output.write_all(b"\n").await?;
                    output.flush().await?;
                }
                None => break Exit::ServerClosed,
            },
            line = typed.next_line() => {
                let body = line?.unwrap_or_else(|| LEAVE.to_string());
                let envelope = Envelope {
                    sender: Some(name.to_string()),
                    body,
                };
                send_line(&mut server_write, &envelope.to_string()).await?;
                if envelope.body == LEAVE {
                    break Exit::Left;
                }
            }
        }
    };

    server_write.shutdown().await?;
    Ok(exit)
}

async fn send_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_relay_prefixes_and_leaves() {
        let input: &[u8] = b"hello\n/who\n/leave\nnever sent\n";
        let server_write = tokio_test::io::Builder::new()
            .write(b"alice\n")
            .write(b"alice: hello\n")
            .write(b"alice: /who\n")
            .write(b"alice: /leave\n")
            .build();
        let mut output = Vec::new();

        let exit = relay("alice", input, &mut output, Pending, server_write)
            .await
            .unwrap();

        assert_eq!(exit, Exit::Left);
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn test_relay_prints_server_lines() {
        let (client, server) = tokio::io::duplex(1024);
        let (server_read, server_write) = tokio::io::split(client);
        let (mut remote_read, mut remote_write) = tokio::io::split(server);

        let remote = tokio::spawn(async move {
            let mut lines = BufReader::new(&mut remote_read).lines();
            assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("bob"));
            remote_write
                .write_all(b"[SERVER] Welcome\nalice: hi bob\n")
                .await
                .unwrap();
            remote_write.shutdown().await.unwrap();
        });

        let mut output = Vec::new();
        let exit = relay("bob", Pending, &mut output, server_read, server_write)
            .await
            .unwrap();
        remote.await.unwrap();

        assert_eq!(exit, Exit::ServerClosed);
        assert_eq!(output, b"[SERVER] Welcome\nalice: hi bob\n");
    }

    #[tokio::test]
    async fn test_stdin_eof_sends_leave() {
        let input: &[u8] = b"";
        let server_write = tokio_test::io::Builder::new()
            .write(b"carol\n")
            .write(b"carol: /leave\n")
            .build();
        let mut output = Vec::new();

        let exit = relay("carol", input, &mut output, Pending, server_write)
            .await
            .unwrap();

        assert_eq!(exit, Exit::Left);
    }

    /// A reader that never produces data.
    struct Pending;

    impl AsyncRead for Pending {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            std::task::Poll::Pending
        }
    }

    impl AsyncBufRead for Pending {
        fn poll_fill_buf(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<io::Result<&[u8]>> {
            std::task::Poll::Pending
        }

        fn consume(self: std::pin::Pin<&mut Self>, _amt: usize) {}
    }
}
