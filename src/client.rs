//! Client side of the session protocol.
//!
//! After a successful salute a [`Session`] runs two loops over one
//! connection:
//!
//! - the send loop, driven by the caller, which turns user input into
//!   requests and writes them;
//! - the receive loop, a background task that reads responses and
//!   acknowledges every `ok` one.
//!
//! The loops share only the connection's [`Liveness`] flag (and a lock that
//! serializes whole-line writes). Whichever loop sees a failure first closes
//! the flag; both check it before each unit of work.

use crate::codec;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::interpreter;
use crate::liveness::Liveness;
use crate::model::{Request, RequestKind};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Connection settings plus the name this client registers under.
pub struct Client {
    config: ClientConfig,
    name: String,
}

impl Client {
    pub fn new(config: ClientConfig, name: impl Into<String>) -> Self {
        Self {
            config,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dial the server, retrying a fixed number of times with a fixed delay.
    pub async fn dial_with_retries(&self) -> Result<TcpStream, ClientError> {
        let attempts = self.config.max_retries;
        let mut last_error = None;

        for attempt in 1..=attempts {
            info!(
                server = %self.config.server,
                attempts_left = attempts - attempt + 1,
                "Connecting"
            );

            match TcpStream::connect(&self.config.server).await {
                Ok(stream) => {
                    info!("Connection established");
                    return Ok(stream);
                }
                Err(e) => {
                    warn!(error = %e, "Connection attempt failed");
                    last_error = Some(e);
                    if attempt < attempts {
                        debug!(
                            retry_in_ms = self.config.retry_delay.as_millis() as u64,
                            "Retrying"
                        );
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }

        Err(ClientError::ConnectionUnavailable {
            address: self.config.server.clone(),
            attempts,
            source: last_error.unwrap_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "no connection attempts configured",
                )
            }),
        })
    }

    /// Dial and register. The returned session is active.
    pub async fn connect(&self) -> Result<Session<OwnedWriteHalf>, ClientError> {
        let stream = self.dial_with_retries().await?;
        let (reader, writer) = stream.into_split();
        Session::establish(self.name.clone(), BufReader::new(reader), writer).await
    }
}

/// Why [`Session::send_loop`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendLoopExit {
    /// The user said bye; the disconnect handshake was performed.
    Bye,
    /// User input ended; the session was disconnected.
    InputClosed,
    /// The connection was already closed, usually by the receive loop.
    ConnectionLost,
}

/// An active, registered connection.
pub struct Session<W> {
    name: String,
    writer: Arc<Mutex<W>>,
    liveness: Arc<Liveness>,
    receiver: Option<JoinHandle<Result<(), ClientError>>>,
}

impl<W> Session<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Send the salute, wait for exactly one reply, and start receiving.
    ///
    /// Any status other than `ok` shuts the connection down and fails with
    /// [`ClientError::RegistrationRejected`].
    pub async fn establish<R>(
        name: String,
        mut reader: R,
        mut writer: W,
    ) -> Result<Self, ClientError>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let liveness = Liveness::new();

        let salute = codec::encode_request(&Request::new(name.clone(), RequestKind::Salute))?;
        writer.write_all(&codec::frame(&salute)).await?;
        writer.flush().await?;

        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            liveness.close();
            return Err(ClientError::Closed);
        }

        let response = codec::decode_response(codec::trim_line(&line))?;
        if !response.is_ok() {
            liveness.close();
            let _ = writer.shutdown().await;
            return Err(ClientError::RegistrationRejected {
                status: response.status,
                reason: response.content,
            });
        }

        info!(client = %name, content = %response.content, "Registered");
        liveness.mark_alive();
        Ok(Self::start(name, reader, writer, liveness))
    }

    /// Wrap an already registered connection and spawn its receive loop.
    pub fn start<R>(name: String, reader: R, writer: W, liveness: Arc<Liveness>) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let writer = Arc::new(Mutex::new(writer));
        let receiver = tokio::spawn(
            receive_loop(name.clone(), reader, Arc::clone(&writer), Arc::clone(&liveness))
                .instrument(info_span!("receiver", client = %name)),
        );

        Session {
            name,
            writer,
            liveness,
            receiver: Some(receiver),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_alive(&self) -> bool {
        self.liveness.is_alive()
    }

    /// Whether the receive loop has stopped.
    pub fn receiver_finished(&self) -> bool {
        self.receiver.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Send one request. Returns `false`, without writing, once the
    /// connection is closed.
    pub async fn send(&self, kind: RequestKind) -> Result<bool, ClientError> {
        if !self.liveness.is_alive() {
            return Ok(false);
        }

        let request = Request::new(self.name.clone(), kind);
        if let Err(e) = write_request(&self.writer, &request).await {
            self.liveness.close();
            return Err(e);
        }
        Ok(true)
    }

    /// Send bye and close the write side. A no-op if already closed.
    pub async fn disconnect(&mut self) -> Result<(), ClientError> {
        // Claim the close first so the receive loop treats the coming EOF as expected
        if !self.liveness.close() {
            return Ok(());
        }

        write_request(&self.writer, &Request::new(self.name.clone(), RequestKind::Bye)).await?;
        self.writer.lock().await.shutdown().await?;
        info!("Connection closed");
        Ok(())
    }

    /// Read user lines, interpret them, and send the results until bye,
    /// end of input, or connection loss.
    ///
    /// Lines that fail to parse are reported locally and never sent.
    pub async fn send_loop<I>(&mut self, input: I) -> Result<SendLoopExit, ClientError>
    where
        I: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();

        while self.liveness.is_alive() {
            let Some(line) = lines.next_line().await? else {
                self.disconnect().await?;
                return Ok(SendLoopExit::InputClosed);
            };

            let kind = match interpreter::parse_request(&line) {
                Ok(kind) => kind,
                Err(e) => {
                    warn!(error = %e, input = %line, "Invalid request");
                    continue;
                }
            };

            if kind == RequestKind::Bye {
                self.disconnect().await?;
                return Ok(SendLoopExit::Bye);
            }

            if !self.send(kind).await? {
                break;
            }
        }

        Ok(SendLoopExit::ConnectionLost)
    }

    /// Wait for the receive loop to finish and surface its outcome.
    pub async fn join(&mut self) -> Result<(), ClientError> {
        match self.receiver.take() {
            Some(handle) => handle.await?,
            None => Ok(()),
        }
    }
}

impl<W> Drop for Session<W> {
    fn drop(&mut self) {
        if let Some(handle) = self.receiver.take() {
            handle.abort();
        }
    }
}

async fn write_request<W>(writer: &Mutex<W>, request: &Request) -> Result<(), ClientError>
where
    W: AsyncWrite + Unpin,
{
    let line = codec::encode_request(request)?;
    debug!(request = %line, "Sending request");

    let mut writer = writer.lock().await;
    writer.write_all(&codec::frame(&line)).await?;
    writer.flush().await?;
    Ok(())
}

/// Read responses until the connection closes, acknowledging `ok` ones.
///
/// A read or ack failure closes `liveness`; the error is returned only by
/// the caller that actually performed the close.
pub async fn receive_loop<R, W>(
    name: String,
    mut reader: R,
    writer: Arc<Mutex<W>>,
    liveness: Arc<Liveness>,
) -> Result<(), ClientError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = String::new();

    while liveness.is_alive() {
        line.clear();
        debug!("Waiting for responses");

        let read = reader.read_line(&mut line).await;
        if !liveness.is_alive() {
            break;
        }

        match read {
            Ok(0) => return fail(&liveness, ClientError::Closed),
            Ok(_) => {}
            Err(e) => return fail(&liveness, e.into()),
        }

        let response = match codec::decode_response(codec::trim_line(&line)) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable response");
                continue;
            }
        };

        info!(status = %response.status, content = %response.content, "Received response");

        if response.is_ok() {
            let ack = Request::new(name.clone(), RequestKind::Ack(response));
            if let Err(e) = write_request(&writer, &ack).await {
                return fail(&liveness, e);
            }
        }
    }

    Ok(())
}

fn fail(liveness: &Liveness, err: ClientError) -> Result<(), ClientError> {
    if liveness.close() {
        error!(error = %err, "Connection lost");
        Err(err)
    } else {
        // Someone else closed the connection first
        Ok(())
    }
}
