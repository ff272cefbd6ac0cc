//! Request dispatch against the client registry and the solver.

use crate::model::{Command, Request, RequestKind, Response, Status};
use crate::registry::ClientRegistry;
use crate::solver::Solver;
use std::sync::Arc;
use tracing::{debug, info};

/// Entity accepted by `list`.
const CLIENTS: &str = "clients";

/// Turns decoded requests into responses.
pub struct Dispatcher {
    registry: Arc<ClientRegistry>,
    solver: Arc<dyn Solver>,
    max_array_len: usize,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ClientRegistry>,
        solver: Arc<dyn Solver>,
        max_array_len: usize,
    ) -> Self {
        Self {
            registry,
            solver,
            max_array_len,
        }
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Compute the response to `request`. Acks produce none.
    pub fn handle(&self, request: &Request) -> Option<Response> {
        let sender = request.sender.as_str();

        let response = match &request.kind {
            RequestKind::Salute => self.salute(sender),
            RequestKind::Bye => {
                self.registry.delete(sender);
                info!(client = sender, "Client disconnected");
                Response::ok("connection stopped")
            }
            RequestKind::Command(command) => self.dispatch(sender, command),
            RequestKind::Ack(response) => {
                info!(
                    client = sender,
                    status = %response.status,
                    content = %response.content,
                    "Client acknowledged"
                );
                return None;
            }
        };

        debug!(
            client = sender,
            status = %response.status,
            content = %response.content,
            "Sending response"
        );
        Some(response)
    }

    fn salute(&self, sender: &str) -> Response {
        if !self.registry.try_add(sender) {
            return Response::new(Status::AlreadyRegistered, "client already registered");
        }
        info!(client = sender, "Client connected");
        Response::ok("registration successful")
    }

    /// Run a command for `sender`, who must be registered.
    pub fn dispatch(&self, sender: &str, command: &Command) -> Response {
        if !self.registry.exists(sender) {
            return Response::new(Status::Unregistered, "client not registered");
        }

        match command {
            Command::List { entity } if entity == CLIENTS => {
                let clients = self.registry.keys().join(",");
                Response::ok(format!("registered clients: {}", clients))
            }
            Command::List { .. } => Response::bad_request("invalid list entity"),
            Command::Solve { array, .. } if array.len() > self.max_array_len => {
                Response::bad_request(format!("array length should be leq {}", self.max_array_len))
            }
            Command::Solve { problem, array } => match self.solver.solve(problem, array) {
                Ok(answer) => Response::ok(answer),
                Err(e) => Response::new(Status::Error, e.to_string()),
            },
        }
    }
}
