//! Service handling: the `SSH_MSG_SERVICE_REQUEST` flow and the routing of
//! decoded packets to the active service.

use std::sync::Arc;

use crate::{sync::Event, Buffer, Error, Result};

/// An SSH service multiplexed over the transport, `ssh-userauth` being the
/// usual first one.
pub trait Service: Send {
    /// The service identifier sent in `SSH_MSG_SERVICE_REQUEST`.
    fn name(&self) -> &'static str;

    /// Handle one decoded packet routed to this service.
    ///
    /// `message` is the message number, `payload` is positioned right
    /// after it.
    fn handle(&mut self, message: u8, payload: Buffer) -> Result<()>;

    /// Observe a terminal transport failure; the service is never called
    /// again afterwards.
    fn notify_error(&mut self, _error: &Error) {}
}

struct Pending {
    service: Box<dyn Service>,
    accepted: Arc<Event>,
}

/// Tracks the request in flight and the service packets are routed to.
#[derive(Default)]
pub(crate) struct Dispatcher {
    active: Option<Box<dyn Service>>,
    pending: Option<Pending>,
}

impl Dispatcher {
    /// Stage a service request; the returned event completes once the peer
    /// accepts it.
    pub fn begin(&mut self, service: Box<dyn Service>) -> Result<(&'static str, Arc<Event>)> {
        if self.pending.is_some() {
            return Err(Error::Protocol("a service request is already in flight"));
        }

        let name = service.name();
        let accepted = Arc::new(Event::new());

        self.pending = Some(Pending {
            service,
            accepted: accepted.clone(),
        });

        Ok((name, accepted))
    }

    /// Promote the pending service, provided the peer echoed the name we
    /// asked for.
    pub fn accept(&mut self, name: &[u8]) -> Result<()> {
        let pending = self
            .pending
            .take()
            .ok_or(Error::Protocol("SERVICE_ACCEPT without a request in flight"))?;

        if pending.service.name().as_bytes() != name {
            self.pending = Some(pending);

            return Err(Error::Protocol("peer accepted a service we did not request"));
        }

        self.active = Some(pending.service);
        pending.accepted.fire();

        Ok(())
    }

    /// Whether a service was accepted and receives the traffic.
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Hand one packet to the active service.
    pub fn deliver(&mut self, message: u8, payload: Buffer) -> Result<()> {
        match &mut self.active {
            Some(service) => service.handle(message, payload),
            None => Err(Error::UnexpectedMessage),
        }
    }

    /// Propagate a terminal failure to the pending and active services.
    pub fn fail(&mut self, cause: &Arc<Error>) {
        if let Some(mut pending) = self.pending.take() {
            pending.accepted.fail(cause.clone());
            pending.service.notify_error(cause);
        }

        if let Some(service) = &mut self.active {
            service.notify_error(cause);
        }
    }
}
