//! TCP server for the session protocol.
//!
//! Accepts connections, runs one task per connection, and funnels every
//! handler error into a single error channel drained by one long-lived task.

use crate::codec;
use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::error::{DecodeError, ServerError};
use crate::model::{RequestKind, Response};
use crate::registry::ClientRegistry;
use crate::solver::{ProblemSet, Solver};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

/// Initial line buffer capacity
const LINE_CAPACITY: usize = 1024;

/// Receives errors reported by connection handlers.
pub trait ErrorHandler: Send + Sync + 'static {
    fn handle(&self, error: ServerError);
}

impl<F> ErrorHandler for F
where
    F: Fn(ServerError) + Send + Sync + 'static,
{
    fn handle(&self, error: ServerError) {
        self(error)
    }
}

/// Default error handler: log and move on.
pub struct LogErrors;

impl ErrorHandler for LogErrors {
    fn handle(&self, error: ServerError) {
        warn!(error = %error, "Error encountered");
    }
}

/// Server instance
pub struct Server {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
    connection_limit: Option<Arc<Semaphore>>,
}

impl Server {
    /// Create a server backed by the built-in problem set.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_solver(config, Arc::new(ProblemSet::new()))
    }

    pub fn with_solver(config: ServerConfig, solver: Arc<dyn Solver>) -> Self {
        let dispatcher = Dispatcher::new(ClientRegistry::new(), solver, config.max_array_len);
        let connection_limit =
            (config.max_connections > 0).then(|| Arc::new(Semaphore::new(config.max_connections)));

        Server {
            config,
            dispatcher: Arc::new(dispatcher),
            connection_limit,
        }
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        self.dispatcher.registry()
    }

    /// Bind the configured address and serve until accepting becomes impossible.
    pub async fn run(
        &self,
        errors: Arc<dyn ErrorHandler>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.config.listen).await?;
        self.serve(listener, errors).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(
        &self,
        listener: TcpListener,
        handler: Arc<dyn ErrorHandler>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let span = info_span!("server", name = %self.config.name);
        self.accept_loop(listener, handler).instrument(span).await
    }

    async fn accept_loop(
        &self,
        listener: TcpListener,
        handler: Arc<dyn ErrorHandler>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!(address = %listener.local_addr()?, "Server listening");

        let (errors, error_rx) = mpsc::unbounded_channel();
        tokio::spawn(drain_errors(error_rx, handler).in_current_span());

        loop {
            // Only bounded when max_connections is set
            let permit = match &self.connection_limit {
                Some(limit) => Some(Arc::clone(limit).acquire_owned().await?),
                None => None,
            };

            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "New connection");

                    let dispatcher = Arc::clone(&self.dispatcher);
                    let errors = errors.clone();

                    tokio::spawn(
                        async move {
                            let (reader, writer) = stream.into_split();
                            let reader = BufReader::new(reader);
                            if let Err(e) =
                                handle_connection(reader, writer, peer, dispatcher, errors.clone())
                                    .await
                            {
                                let _ = errors.send(e);
                            }
                            drop(permit);
                        }
                        .instrument(info_span!("connection", %peer)),
                    );
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

/// Hand each reported error to `handler` on its own task.
async fn drain_errors(mut errors: UnboundedReceiver<ServerError>, handler: Arc<dyn ErrorHandler>) {
    while let Some(error) = errors.recv().await {
        let handler = Arc::clone(&handler);
        tokio::spawn(async move { handler.handle(error) }.in_current_span());
    }
}

/// Serve one connection until a successful bye, EOF, or an I/O failure.
///
/// Malformed lines are reported to `errors` and skipped. Every name
/// registered on this connection and not yet said goodbye is released when
/// it ends.
pub async fn handle_connection<R, W>(
    reader: R,
    writer: W,
    peer: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    errors: UnboundedSender<ServerError>,
) -> Result<(), ServerError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut registered = HashSet::new();
    let result = serve_requests(reader, writer, peer, &dispatcher, &errors, &mut registered).await;

    for name in registered {
        debug!(%peer, client = %name, "Releasing registration");
        dispatcher.registry().delete(&name);
    }
    result
}

async fn serve_requests<R, W>(
    mut reader: R,
    mut writer: W,
    peer: SocketAddr,
    dispatcher: &Dispatcher,
    errors: &UnboundedSender<ServerError>,
    registered: &mut HashSet<String>,
) -> Result<(), ServerError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::with_capacity(LINE_CAPACITY);

    loop {
        buf.clear();

        let n = reader
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|source| ServerError::Io { peer, source })?;
        if n == 0 {
            trace!("Connection closed by client");
            return Err(ServerError::ConnectionClosed { peer });
        }

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line,
            Err(e) => {
                let source = DecodeError::MalformedPayload(e.to_string());
                let _ = errors.send(ServerError::Decode { peer, source });
                continue;
            }
        };

        let request = match codec::decode_request(codec::trim_line(line)) {
            Ok(request) => request,
            Err(e @ (DecodeError::UnknownRequestType(_) | DecodeError::UnknownVerb(_))) => {
                warn!(error = %e, "Unsupported request");
                send(&mut writer, peer, &Response::bad_request(e.to_string())).await?;
                continue;
            }
            Err(source) => {
                let _ = errors.send(ServerError::Decode { peer, source });
                continue;
            }
        };

        trace!(client = %request.sender, kind = request.kind.type_name(), "Processing request");

        if !matches!(request.kind, RequestKind::Salute | RequestKind::Ack(_)) {
            debug!("Received client request");
            send(&mut writer, peer, &Response::log("server has received the request")).await?;
            debug!("Processing client request");
            send(&mut writer, peer, &Response::log("server is processing the request")).await?;
        }

        let Some(response) = dispatcher.handle(&request) else {
            continue;
        };

        match request.kind {
            RequestKind::Salute if response.is_ok() => {
                registered.insert(request.sender);
            }
            RequestKind::Bye if response.is_ok() => {
                registered.remove(&request.sender);
                return Ok(());
            }
            _ => {}
        }

        send(&mut writer, peer, &response).await?;
    }
}

async fn send<W: AsyncWrite + Unpin>(
    writer: &mut W,
    peer: SocketAddr,
    response: &Response,
) -> Result<(), ServerError> {
    let line =
        codec::encode_response(response).map_err(|source| ServerError::Encode { peer, source })?;
    writer
        .write_all(&codec::frame(&line))
        .await
        .map_err(|source| ServerError::Io { peer, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Command, Request, Scalar, Status};
    use tokio::io::{split, DuplexStream, Lines, ReadHalf, WriteHalf};
    use tokio::task::JoinHandle;

    type Peer = (Lines<BufReader<ReadHalf<DuplexStream>>>, WriteHalf<DuplexStream>);

    fn peer() -> SocketAddr {
        "127.0.0.1:9".parse().unwrap()
    }

    fn dispatcher() -> Arc<Dispatcher> {
        Arc::new(Dispatcher::new(
            ClientRegistry::new(),
            Arc::new(ProblemSet::new()),
            5,
        ))
    }

    fn spawn_handler(
        dispatcher: Arc<Dispatcher>,
    ) -> (Peer, JoinHandle<Result<(), ServerError>>, UnboundedReceiver<ServerError>) {
        let (client, server) = tokio::io::duplex(4096);
        let (server_read, server_write) = split(server);
        let (client_read, client_write) = split(client);
        let (errors, error_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(handle_connection(
            BufReader::new(server_read),
            server_write,
            peer(),
            dispatcher,
            errors,
        ));

        ((BufReader::new(client_read).lines(), client_write), task, error_rx)
    }

    async fn send_request(writer: &mut WriteHalf<DuplexStream>, request: &Request) {
        let line = codec::encode_request(request).unwrap();
        writer.write_all(&codec::frame(&line)).await.unwrap();
    }

    async fn next_response(lines: &mut Lines<BufReader<ReadHalf<DuplexStream>>>) -> Response {
        let line = lines.next_line().await.unwrap().unwrap();
        codec::decode_response(&line).unwrap()
    }

    #[tokio::test]
    async fn test_salute_then_command() {
        let d = dispatcher();
        let ((mut lines, mut writer), _task, _errors) = spawn_handler(Arc::clone(&d));

        send_request(&mut writer, &Request::new("ana", RequestKind::Salute)).await;
        assert_eq!(next_response(&mut lines).await, Response::ok("registration successful"));
        assert!(d.registry().exists("ana"));

        let solve = RequestKind::Command(Command::Solve {
            problem: "8".to_string(),
            array: [23, 17, 15, 3, 18]
                .iter()
                .map(|v| Scalar::Number((*v as i64).into()))
                .collect(),
        });
        send_request(&mut writer, &Request::new("ana", solve)).await;

        assert_eq!(next_response(&mut lines).await.status, Status::Log);
        assert_eq!(next_response(&mut lines).await.status, Status::Log);
        assert_eq!(next_response(&mut lines).await, Response::ok("5"));
    }

    #[tokio::test]
    async fn test_bye_ends_connection() {
        let d = dispatcher();
        let ((mut lines, mut writer), task, mut errors) = spawn_handler(Arc::clone(&d));

        send_request(&mut writer, &Request::new("ana", RequestKind::Salute)).await;
        next_response(&mut lines).await;

        send_request(&mut writer, &Request::new("ana", RequestKind::Bye)).await;
        assert_eq!(next_response(&mut lines).await.status, Status::Log);
        assert_eq!(next_response(&mut lines).await.status, Status::Log);

        assert!(task.await.unwrap().is_ok());
        assert!(!d.registry().exists("ana"));
        // No response follows the log notifications
        assert!(lines.next_line().await.unwrap().is_none());
        assert!(errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_line_is_skipped() {
        let d = dispatcher();
        let ((mut lines, mut writer), _task, mut errors) = spawn_handler(d);

        writer.write_all(b"{not json}\n").await.unwrap();
        send_request(&mut writer, &Request::new("ana", RequestKind::Salute)).await;

        assert!(next_response(&mut lines).await.is_ok());
        assert!(matches!(
            errors.recv().await,
            Some(ServerError::Decode {
                source: DecodeError::MalformedPayload(_),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_unknown_type_is_bad_request() {
        let ((mut lines, mut writer), _task, _errors) = spawn_handler(dispatcher());

        writer
            .write_all(b"{\"requestType\":\"shout\",\"sender\":\"ana\",\"content\":\"\"}\n")
            .await
            .unwrap();
        let response = next_response(&mut lines).await;
        assert_eq!(response.status, Status::BadRequest);
        assert_eq!(response.content, "invalid request type shout");
    }

    #[tokio::test]
    async fn test_eof_releases_registration() {
        let d = dispatcher();
        let ((mut lines, mut writer), task, _errors) = spawn_handler(Arc::clone(&d));

        send_request(&mut writer, &Request::new("ana", RequestKind::Salute)).await;
        next_response(&mut lines).await;
        assert!(d.registry().exists("ana"));

        writer.shutdown().await.unwrap();

        assert!(matches!(
            task.await.unwrap(),
            Err(ServerError::ConnectionClosed { .. })
        ));
        assert!(!d.registry().exists("ana"));
    }

    #[tokio::test]
    async fn test_eof_releases_every_name_on_connection() {
        let d = dispatcher();
        let ((mut lines, mut writer), task, _errors) = spawn_handler(Arc::clone(&d));

        send_request(&mut writer, &Request::new("ana", RequestKind::Salute)).await;
        assert!(next_response(&mut lines).await.is_ok());
        send_request(&mut writer, &Request::new("bob", RequestKind::Salute)).await;
        assert!(next_response(&mut lines).await.is_ok());
        assert_eq!(d.registry().size(), 2);

        writer.shutdown().await.unwrap();

        let _ = task.await.unwrap();
        assert_eq!(d.registry().size(), 0);
    }

    #[tokio::test]
    async fn test_bye_releases_remaining_names() {
        let d = dispatcher();
        let ((mut lines, mut writer), task, _errors) = spawn_handler(Arc::clone(&d));

        send_request(&mut writer, &Request::new("ana", RequestKind::Salute)).await;
        next_response(&mut lines).await;
        send_request(&mut writer, &Request::new("bob", RequestKind::Salute)).await;
        next_response(&mut lines).await;

        send_request(&mut writer, &Request::new("bob", RequestKind::Bye)).await;
        assert!(task.await.unwrap().is_ok());
        assert!(d.registry().keys().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_skipped() {
        let d = dispatcher();
        let ((mut lines, mut writer), task, mut errors) = spawn_handler(Arc::clone(&d));

        send_request(&mut writer, &Request::new("ana", RequestKind::Salute)).await;
        next_response(&mut lines).await;

        writer.write_all(b"\xff\xfe garbage\n").await.unwrap();
        let list = RequestKind::Command(Command::List {
            entity: "clients".to_string(),
        });
        send_request(&mut writer, &Request::new("ana", list)).await;

        assert_eq!(next_response(&mut lines).await.status, Status::Log);
        assert_eq!(next_response(&mut lines).await.status, Status::Log);
        assert_eq!(
            next_response(&mut lines).await,
            Response::ok("registered clients: ana")
        );
        assert!(matches!(
            errors.recv().await,
            Some(ServerError::Decode {
                source: DecodeError::MalformedPayload(_),
                ..
            })
        ));
        assert!(!task.is_finished());
        assert!(d.registry().exists("ana"));
    }

    #[tokio::test]
    async fn test_duplicate_salute_keeps_original_registration() {
        let d = dispatcher();
        let ((mut lines_a, mut writer_a), _task_a, _e1) = spawn_handler(Arc::clone(&d));
        let ((mut lines_b, mut writer_b), task_b, _e2) = spawn_handler(Arc::clone(&d));

        send_request(&mut writer_a, &Request::new("ana", RequestKind::Salute)).await;
        assert_eq!(next_response(&mut lines_a).await.status, Status::Ok);

        send_request(&mut writer_b, &Request::new("ana", RequestKind::Salute)).await;
        assert_eq!(
            next_response(&mut lines_b).await.status,
            Status::AlreadyRegistered
        );

        // The rejected connection going away must not unregister the winner
        writer_b.shutdown().await.unwrap();
        let _ = task_b.await;
        assert!(d.registry().exists("ana"));
    }

    #[tokio::test]
    async fn test_write_failure_is_fatal() {
        let d = dispatcher();
        d.registry().add("ana");

        let line = codec::encode_request(&Request::new(
            "ana",
            RequestKind::Command(Command::List {
                entity: "clients".to_string(),
            }),
        ))
        .unwrap();
        let reader = tokio_test::io::Builder::new()
            .read(&codec::frame(&line))
            .build();
        let writer = tokio_test::io::Builder::new()
            .write_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
            .build();
        let (errors, _rx) = mpsc::unbounded_channel();

        let result = handle_connection(BufReader::new(reader), writer, peer(), d, errors).await;
        assert!(matches!(result, Err(ServerError::Io { .. })));
    }

    #[tokio::test]
    async fn test_serve_reports_errors() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let server = Arc::new(Server::new(ServerConfig::default()));
        let handler: Arc<dyn ErrorHandler> = Arc::new(move |e: ServerError| {
            let _ = tx.send(e.to_string());
        });
        tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.serve(listener, handler).await }
        });

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"garbage\n").await.unwrap();
        drop(stream);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        let reported = [first, second];
        assert!(reported.iter().any(|e| e.contains("malformed payload")));
        assert!(reported.iter().any(|e| e.contains("closed without bye")));
    }
}
