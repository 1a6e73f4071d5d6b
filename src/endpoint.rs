use tokio::sync::mpsc;

/// role an endpoint holds inside the one session it may be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Client,
}

impl Role {
    pub fn is_host(self) -> bool {
        matches!(self, Role::Host)
    }
}

/// signal carried over an endpoint's outbound channel.
#[derive(Debug)]
pub enum Signal {
    Body(String),
    Close,
}

/// receiving half, owned by the connection's poll loop.
pub type Rx = mpsc::Receiver<Signal>;

/// default capacity of an endpoint's outbound queue.
///
/// exceeding this is treated as a slow consumer and the endpoint is closed
/// (see the transport listener's backpressure policy).
pub const SEND_QUEUE_CAPACITY: usize = 256;

/// why an enqueue attempt failed — the caller's cue to treat this endpoint
/// as dead either way, but `Full` is also the `slow_consumer` wire error kind
/// (see [`crate::error::ErrorKind::SlowConsumer`]), worth telling apart from
/// a receiver that's simply already gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// the outbound queue is at `SEND_QUEUE_CAPACITY`: a slow consumer.
    Full,
    /// the connection's poll loop already exited.
    Closed,
}

/// sending half, cloned into the registry as the endpoint's send handle.
///
/// the registry never touches the socket directly, only this handle —
/// the transport listener is the sole owner of the live connection.
#[derive(Clone)]
pub struct Tx(mpsc::Sender<Signal>);

impl Tx {
    pub fn new_pair() -> (Self, Rx) {
        let (tx, rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        (Self(tx), rx)
    }

    /// enqueue a message body, returning an error if the queue is full or
    /// the receiver has gone away — both are the caller's cue to treat this
    /// endpoint as dead.
    pub fn send(&self, body: String) -> Result<(), SendError> {
        self.0.try_send(Signal::Body(body)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// request that the connection close itself.
    pub fn close(&self) {
        let _ = self.0.try_send(Signal::Close);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_distinguishes_full_from_closed() {
        let (tx, mut rx) = Tx::new_pair();
        for i in 0..SEND_QUEUE_CAPACITY {
            tx.send(format!("msg-{i}")).unwrap();
        }
        assert_eq!(tx.send("overflow".to_string()), Err(SendError::Full));

        rx.close();
        assert_eq!(tx.send("after-close".to_string()), Err(SendError::Closed));
    }
}
