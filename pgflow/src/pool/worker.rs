//! The pool's background task: a single `Future` driving connect/acquire/
//! release/healthcheck/close as one cooperative state machine, so the whole
//! pool needs no lock (§A3).
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use std::time::Duration;

use tokio::sync::{
    mpsc::{self, UnboundedReceiver, UnboundedSender},
    oneshot,
};
use tokio::time::{Instant, Sleep, sleep};

use super::PoolConfig;
use crate::connection::Connection;
use crate::error::Result;

pub struct WorkerHandle {
    send: UnboundedSender<WorkerMessage>,
    state: State,
}

enum State {
    Idle,
    Recv(AcquireRecv),
}

impl WorkerHandle {
    pub fn new(config: PoolConfig) -> (Self, WorkerFuture) {
        let (send, recv) = mpsc::unbounded_channel();
        let interval = config.healthcheck_interval;
        (
            Self { send, state: State::Idle },
            WorkerFuture {
                config,
                actives: 0,
                conns: VecDeque::new(),
                sleep: Box::pin(sleep(interval)),
                recv,
                queue: VecDeque::with_capacity(1),
                connecting: None,
                healthcheck: None,
                closing: None,
            },
        )
    }

    pub fn poll_acquire(&mut self, cx: &mut Context) -> Poll<Result<Connection>> {
        loop {
            match &mut self.state {
                State::Idle => {
                    let (tx, rx) = oneshot::channel();
                    self.send.send(WorkerMessage::Acquire(tx)).expect("pool worker task closed");
                    self.state = State::Recv(rx);
                }
                State::Recv(recv) => {
                    let pin = Pin::new(recv);
                    let result = ready!(oneshot::Receiver::poll(pin, cx)).expect("pool worker task closed");
                    self.state = State::Idle;
                    return Poll::Ready(result);
                }
            }
        }
    }

    pub fn release(&self, conn: Connection) {
        let _ = self.send.send(WorkerMessage::Release(conn));
    }
}

impl Clone for WorkerHandle {
    fn clone(&self) -> Self {
        Self { send: self.send.clone(), state: State::Idle }
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WorkerHandle")
    }
}

struct Idle {
    healthc_at: Instant,
    conn: Connection,
}

impl Idle {
    fn new(conn: Connection, instant: Instant) -> Self {
        Self { healthc_at: instant, conn }
    }

    fn should_healthcheck(&self, interval: Duration) -> bool {
        self.healthc_at.elapsed() > interval
    }

    fn poll_healthcheck(&mut self, cx: &mut Context) -> Poll<Result<()>> {
        self.conn.poll_ready(cx)
    }

    fn poll_shutdown(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        self.conn.poll_shutdown(cx)
    }
}

type AcquireSend = oneshot::Sender<Result<Connection>>;
type AcquireRecv = oneshot::Receiver<Result<Connection>>;

enum WorkerMessage {
    Acquire(AcquireSend),
    Release(Connection),
}

pub struct WorkerFuture {
    config: PoolConfig,

    actives: usize,
    /// Front is the most recently returned/connected connection: LRU
    /// eviction order for health checks, MRU order for reuse.
    conns: VecDeque<Idle>,
    queue: VecDeque<AcquireSend>,

    sleep: Pin<Box<Sleep>>,
    recv: UnboundedReceiver<WorkerMessage>,

    connecting: Option<ConnectFuture>,
    healthcheck: Option<Idle>,
    closing: Option<Idle>,
}

type ConnectFuture = Pin<Box<dyn Future<Output = Result<Connection>> + Send + 'static>>;

fn reset_sleep_time(conns: &VecDeque<Idle>, interval: Duration, sleep: Pin<&mut Sleep>) {
    let least_time = conns.iter().fold(interval, |acc, n| (interval.saturating_sub(n.healthc_at.elapsed())).min(acc));
    sleep.reset(Instant::now() + least_time);
}

/// Hands a freshly available connection straight to a waiting acquirer if
/// there is one, otherwise parks it in the idle queue.
fn new_connection(mut conn: Connection, queue: &mut VecDeque<AcquireSend>, conns: &mut VecDeque<Idle>, instant: Instant, is_fresh: bool) {
    while let Some(send) = queue.pop_front() {
        match send.send(Ok(conn)) {
            Err(Ok(returned)) => {
                conn = returned;
                continue;
            }
            _ => return,
        }
    }

    if is_fresh {
        conns.push_front(Idle::new(conn, instant));
    } else {
        conns.push_back(Idle::new(conn, instant));
    }
}

impl Future for WorkerFuture {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        let WorkerFuture { config, actives, sleep, conns, recv, queue, connecting, healthcheck, closing } =
            self.as_mut().get_mut();

        while let Poll::Ready(msg) = recv.poll_recv(cx) {
            let Some(msg) = msg else {
                // every `Pool`/`PoolConnection` handle has been dropped
                return Poll::Ready(());
            };

            match msg {
                WorkerMessage::Acquire(send) => match conns.pop_front() {
                    Some(idle) => {
                        let hc = idle.healthc_at;
                        if let Err(Ok(conn)) = send.send(Ok(idle.conn)) {
                            conns.push_front(Idle::new(conn, hc));
                        }
                    }
                    None => {
                        queue.push_back(send);
                        if connecting.is_none() && *actives < config.max_conn {
                            *connecting = Some(Box::pin(Connection::connect_with(config.conn.clone())));
                        }
                    }
                },
                WorkerMessage::Release(mut conn) => {
                    if healthcheck.is_none() {
                        match conn.poll_ready(cx) {
                            Poll::Ready(Ok(())) => new_connection(conn, queue, conns, Instant::now(), true),
                            Poll::Ready(Err(_err)) => {
                                #[cfg(feature = "log")]
                                log::warn!("pooled connection failed its release healthcheck: {_err}");
                                if closing.is_some() {
                                    drop(conn);
                                } else {
                                    *closing = Some(Idle::new(conn, Instant::now()));
                                    *actives = actives.saturating_sub(1);
                                }
                            }
                            Poll::Pending => *healthcheck = Some(Idle::new(conn, Instant::now())),
                        }
                    } else {
                        new_connection(conn, queue, conns, Instant::now(), false);
                    }
                }
            }
        }

        if let Some(Poll::Ready(result)) = connecting.as_mut().map(|f| f.as_mut().poll(cx)) {
            connecting.take();
            match result {
                Ok(conn) => {
                    *actives += 1;
                    new_connection(conn, queue, conns, Instant::now(), true);
                }
                Err(_err) => {
                    #[cfg(feature = "log")]
                    log::error!("pool failed to open a connection: {_err}");
                    if let Some(send) = queue.pop_front() {
                        let _ = send.send(Err(_err));
                    }
                }
            }
        }

        if let Some(Poll::Ready(result)) = healthcheck.as_mut().map(|idle| idle.poll_healthcheck(cx)) {
            let idle = healthcheck.take().unwrap();
            match result {
                Ok(()) => new_connection(idle.conn, queue, conns, Instant::now(), true),
                Err(_err) => {
                    #[cfg(feature = "log")]
                    log::warn!("pooled connection failed healthcheck: {_err}");
                    if closing.is_some() {
                        drop(idle);
                    } else {
                        *actives = actives.saturating_sub(1);
                        *closing = Some(idle);
                    }
                }
            }
            reset_sleep_time(conns, config.healthcheck_interval, sleep.as_mut());
        }

        if let Some(Poll::Ready(_result)) = closing.as_mut().map(|idle| idle.poll_shutdown(cx)) {
            closing.take();
        }

        if let Poll::Ready(()) = sleep.as_mut().poll(cx) {
            if healthcheck.is_none() {
                if let Some(i) = conns.iter().rposition(|idle| idle.should_healthcheck(config.healthcheck_interval)) {
                    let mut idle = conns.swap_remove_back(i).unwrap();
                    reset_sleep_time(conns, config.healthcheck_interval, sleep.as_mut());
                    match idle.poll_healthcheck(cx) {
                        Poll::Ready(Ok(())) => new_connection(idle.conn, queue, conns, Instant::now(), true),
                        Poll::Ready(Err(_err)) => {
                            #[cfg(feature = "log")]
                            log::warn!("pooled connection failed its periodic healthcheck: {_err}");
                            *actives = actives.saturating_sub(1);
                            if closing.is_none() {
                                *closing = Some(idle);
                            }
                        }
                        Poll::Pending => *healthcheck = Some(idle),
                    }
                } else {
                    reset_sleep_time(conns, config.healthcheck_interval, sleep.as_mut());
                }
            }
        }

        while let Some(send) = queue.pop_front() {
            match conns.pop_front() {
                Some(idle) => {
                    let hc = idle.healthc_at;
                    if let Err(Ok(conn)) = send.send(Ok(idle.conn)) {
                        conns.push_front(Idle::new(conn, hc));
                    }
                }
                None => {
                    queue.push_front(send);
                    if connecting.is_none() && *actives < config.max_conn {
                        *connecting = Some(Box::pin(Connection::connect_with(config.conn.clone())));
                    }
                    break;
                }
            }
        }

        Poll::Pending
    }
}
