//! Outbound HTTP/1.1 transfers.
//!
//! [`HttpSource`] multiplexes plain-HTTP requests over non-blocking sockets.
//! Submitted requests wait in a queue until a concurrency slot frees up, then
//! every I/O-phase poll advances each active transfer by as many connect,
//! send and receive steps as the sockets allow without blocking. The result
//! (a [`Response`] or an [`HttpError`]) is handed to the request's callback;
//! transfer failures never propagate out of the loop, only callback errors
//! do.
//!
//! Each request uses its own connection and asks the server to close it.
//! TLS is not supported.

mod codec;
mod transfer;
mod types;

pub use types::{DEFAULT_REQUEST_TIMEOUT, HttpError, HttpRequest, Method, Response, Url, Version};

use crate::error::{CallbackResult, Error, Result};
use crate::runtime::source::WorkSource;
use crate::time::TimeSource;
use crate::tracing_compat::{debug, trace};
use crate::types::{IdAllocator, TransferId};
use hashbrown::HashMap;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;
use transfer::{Progress, Transfer};

/// Default number of transfers in flight at once.
pub const DEFAULT_MAX_CONCURRENT: usize = 16;

type ResponseCallback = Box<dyn FnOnce(std::result::Result<Response, HttpError>) -> CallbackResult>;

struct Queued {
    id: TransferId,
    request: HttpRequest,
    callback: ResponseCallback,
}

struct Active {
    transfer: Transfer,
    callback: ResponseCallback,
}

type Completion = (TransferId, ResponseCallback, std::result::Result<Response, HttpError>);

#[derive(Default)]
struct Registry {
    ids: IdAllocator,
    queued: VecDeque<Queued>,
    active: HashMap<TransferId, Active>,
    order: Vec<TransferId>,
    cancelled: VecDeque<(TransferId, ResponseCallback)>,
}

impl Registry {
    fn take_active(&mut self, id: TransferId) -> Option<Active> {
        let active = self.active.remove(&id)?;
        self.order.retain(|live| *live != id);
        Some(active)
    }
}

/// Work source running HTTP transfers.
pub struct HttpSource {
    clock: Arc<dyn TimeSource>,
    max_concurrent: usize,
    registry: RefCell<Registry>,
}

impl HttpSource {
    /// Creates a source whose timeouts use `clock`, normally the loop's.
    #[must_use]
    pub fn new(clock: Arc<dyn TimeSource>) -> Self {
        Self::with_max_concurrent(clock, DEFAULT_MAX_CONCURRENT)
    }

    /// Creates a source with at most `max_concurrent` transfers in flight
    /// (at least one).
    #[must_use]
    pub fn with_max_concurrent(clock: Arc<dyn TimeSource>, max_concurrent: usize) -> Self {
        Self {
            clock,
            max_concurrent: max_concurrent.max(1),
            registry: RefCell::new(Registry::default()),
        }
    }

    /// Queues a request. The callback runs exactly once, with the response
    /// or the reason the transfer failed, unless the source is cleared.
    pub fn submit<F>(&self, request: HttpRequest, callback: F) -> TransferId
    where
        F: FnOnce(std::result::Result<Response, HttpError>) -> CallbackResult + 'static,
    {
        let mut registry = self.registry.borrow_mut();
        let id = TransferId::from_raw(registry.ids.next());
        trace!(transfer = %id, method = %request.method, host = %request.url.host, "http request queued");
        registry.queued.push_back(Queued {
            id,
            request,
            callback: Box::new(callback),
        });
        id
    }

    /// Cancels a queued or active transfer. Its callback receives
    /// [`HttpError::Cancelled`] on the next poll. Returns false for unknown
    /// or finished transfers.
    pub fn cancel(&self, id: TransferId) -> bool {
        let mut registry = self.registry.borrow_mut();
        let callback = if let Some(position) = registry.queued.iter().position(|q| q.id == id) {
            registry.queued.remove(position).map(|queued| queued.callback)
        } else {
            registry.take_active(id).map(|active| active.callback)
        };
        let Some(callback) = callback else {
            return false;
        };
        debug!(transfer = %id, "http transfer cancelled");
        registry.cancelled.push_back((id, callback));
        true
    }

    /// Requests waiting for a concurrency slot.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.registry.borrow().queued.len()
    }

    /// Transfers in flight.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.registry.borrow().active.len()
    }

    /// Concurrency limit.
    #[must_use]
    pub const fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    fn promote(&self, completions: &mut Vec<Completion>) -> bool {
        let now = self.clock.now();
        let mut registry = self.registry.borrow_mut();
        let mut started = false;
        while registry.active.len() < self.max_concurrent {
            let Some(Queued {
                id,
                request,
                callback,
            }) = registry.queued.pop_front()
            else {
                break;
            };
            started = true;
            match Transfer::start(&request, now) {
                Ok(transfer) => {
                    trace!(transfer = %id, "http transfer started");
                    registry.order.push(id);
                    registry.active.insert(id, Active { transfer, callback });
                }
                Err(err) => completions.push((id, callback, Err(err))),
            }
        }
        started
    }

    fn advance(&self, completions: &mut Vec<Completion>) -> bool {
        let now = self.clock.now();
        let mut registry = self.registry.borrow_mut();
        let mut advanced = false;
        for id in registry.order.clone() {
            let Some(active) = registry.active.get_mut(&id) else {
                continue;
            };
            match active.transfer.step(now) {
                Progress::Idle => {}
                Progress::Advanced => advanced = true,
                Progress::Done(outcome) => {
                    if let Some(active) = registry.take_active(id) {
                        completions.push((id, active.callback, outcome));
                    }
                }
            }
        }
        advanced
    }
}

impl WorkSource for HttpSource {
    fn name(&self) -> &'static str {
        "http"
    }

    fn has_work(&self) -> bool {
        let registry = self.registry.borrow();
        !registry.queued.is_empty() || !registry.active.is_empty() || !registry.cancelled.is_empty()
    }

    fn has_ready_work(&self) -> bool {
        let registry = self.registry.borrow();
        !registry.cancelled.is_empty()
            || (!registry.queued.is_empty() && registry.active.len() < self.max_concurrent)
    }

    /// Delivers cancellations, starts queued requests while slots are free,
    /// then advances every active transfer. Callbacks run after all
    /// transfers were advanced; the first callback failure is returned once
    /// every callback has run.
    fn poll(&self) -> Result<bool> {
        let mut completions: Vec<Completion> = {
            let mut registry = self.registry.borrow_mut();
            registry
                .cancelled
                .drain(..)
                .map(|(id, callback)| (id, callback, Err(HttpError::Cancelled)))
                .collect()
        };
        let started = self.promote(&mut completions);
        let advanced = self.advance(&mut completions);
        let worked = started || advanced || !completions.is_empty();

        let mut first_error = None;
        for (id, callback, outcome) in completions {
            trace!(transfer = %id, ok = outcome.is_ok(), "http transfer finished");
            if let Err(source) = callback(outcome) {
                first_error.get_or_insert_with(|| Error::source_callback("http", source));
            }
        }
        first_error.map_or(Ok(worked), Err)
    }

    fn clear(&self) {
        let dropped = {
            let mut registry = self.registry.borrow_mut();
            registry.order.clear();
            (
                std::mem::take(&mut registry.queued),
                std::mem::take(&mut registry.active),
                std::mem::take(&mut registry.cancelled),
            )
        };
        drop(dropped);
    }
}

impl std::fmt::Debug for HttpSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.borrow();
        f.debug_struct("HttpSource")
            .field("queued", &registry.queued.len())
            .field("active", &registry.active.len())
            .field("max_concurrent", &self.max_concurrent)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{VirtualClock, WallClock};
    use std::cell::Cell;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::rc::Rc;
    use std::time::Duration;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    /// Serves `reply` to each of `count` connections.
    fn serve(reply: &'static [u8], count: usize) -> (String, std::thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/path", listener.local_addr().unwrap());
        let handle = std::thread::spawn(move || {
            for _ in 0..count {
                let (mut stream, _) = listener.accept().unwrap();
                let mut seen = Vec::new();
                let mut buf = [0u8; 1024];
                while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = stream.read(&mut buf).unwrap();
                    if n == 0 {
                        break;
                    }
                    seen.extend_from_slice(&buf[..n]);
                }
                stream.write_all(reply).unwrap();
            }
        });
        (url, handle)
    }

    fn drive(source: &HttpSource, mut done: impl FnMut() -> bool) {
        for _ in 0..5_000 {
            source.poll().unwrap();
            if done() {
                return;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("transfer did not finish");
    }

    #[test]
    fn get_round_trip() {
        init_test("get_round_trip");
        let (url, server) = serve(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi", 1);
        let source = HttpSource::new(Arc::new(WallClock::new()));
        let body = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&body);
        source.submit(HttpRequest::get(&url).unwrap(), move |result| {
            *slot.borrow_mut() = Some(result.map(|response| response.body));
            Ok(())
        });
        assert!(source.has_ready_work());
        drive(&source, || body.borrow().is_some());
        let received = body.borrow_mut().take().unwrap().unwrap();
        crate::assert_with_log!(received == b"hi", "body", "hi", received);
        assert!(!source.has_work());
        server.join().unwrap();
        crate::test_complete!("get_round_trip");
    }

    #[test]
    fn concurrency_limit_queues_the_rest() {
        init_test("concurrency_limit_queues_the_rest");
        let (url, server) = serve(b"HTTP/1.1 204 No Content\r\n\r\n", 3);
        let source = HttpSource::with_max_concurrent(Arc::new(WallClock::new()), 1);
        let finished = Rc::new(Cell::new(0));
        for _ in 0..3 {
            let finished = Rc::clone(&finished);
            source.submit(HttpRequest::get(&url).unwrap(), move |result| {
                assert_eq!(result.unwrap().status, 204);
                finished.set(finished.get() + 1);
                Ok(())
            });
        }
        assert_eq!(source.pending_count(), 3);
        source.poll().unwrap();
        assert!(source.active_count() <= 1);
        drive(&source, || finished.get() == 3);
        server.join().unwrap();
        crate::test_complete!("concurrency_limit_queues_the_rest");
    }

    #[test]
    fn cancel_delivers_cancelled_on_next_poll() {
        init_test("cancel_delivers_cancelled_on_next_poll");
        let source = HttpSource::new(Arc::new(VirtualClock::new()));
        let outcome = Rc::new(Cell::new(None));
        let slot = Rc::clone(&outcome);
        let id = source.submit(HttpRequest::get("http://127.0.0.1:9/").unwrap(), move |r| {
            slot.set(Some(matches!(r, Err(HttpError::Cancelled))));
            Ok(())
        });
        assert!(source.cancel(id));
        assert!(!source.cancel(id));
        assert_eq!(outcome.get(), None);
        assert!(source.poll().unwrap());
        assert_eq!(outcome.get(), Some(true));
        assert!(!source.has_work());
        crate::test_complete!("cancel_delivers_cancelled_on_next_poll");
    }

    #[test]
    fn request_times_out_on_loop_clock() {
        init_test("request_times_out_on_loop_clock");
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        let clock = Arc::new(VirtualClock::new());
        let source = HttpSource::new(clock.clone());
        let timed_out = Rc::new(Cell::new(false));
        let flag = Rc::clone(&timed_out);
        let request = HttpRequest::get(&url).unwrap().with_timeout(Duration::from_secs(1));
        source.submit(request, move |result| {
            flag.set(matches!(result, Err(HttpError::Timeout(_))));
            Ok(())
        });
        source.poll().unwrap();
        assert_eq!(source.active_count(), 1);
        clock.advance(Duration::from_secs(2));
        source.poll().unwrap();
        assert!(timed_out.get());
        drop(listener);
        crate::test_complete!("request_times_out_on_loop_clock");
    }

    #[test]
    fn refused_connection_reports_error() {
        init_test("refused_connection_reports_error");
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let source = HttpSource::new(Arc::new(WallClock::new()));
        let failed = Rc::new(Cell::new(false));
        let flag = Rc::clone(&failed);
        let url = format!("http://127.0.0.1:{port}/");
        source.submit(HttpRequest::get(&url).unwrap(), move |result| {
            flag.set(matches!(result, Err(HttpError::Connect(_) | HttpError::Io(_))));
            Ok(())
        });
        drive(&source, || !source.has_work());
        assert!(failed.get());
        crate::test_complete!("refused_connection_reports_error");
    }
}
