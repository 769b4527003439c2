#![allow(missing_docs)]

//! Work sources driven by a real loop: files, descriptor streams, HTTP and
//! signals, each registered the way an application would register them.

mod common;

use common::{Trace, virtual_loop};
use phaseloop::fs::{FileOp, FileOpOptions, FileOutput, FileSource, WatchEvent, WatchOptions};
use phaseloop::{EventLoop, SourcePhase};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

#[test]
fn file_operations_chain_through_callbacks() {
    common::init_test_logging();
    phaseloop::test_phase!("file_operations_chain_through_callbacks");
    let dir = tempfile::tempdir().unwrap();
    let (event_loop, _clock) = virtual_loop();
    let files = Rc::new(FileSource::new(event_loop.clock()));
    event_loop.add_source(SourcePhase::Io, Rc::clone(&files));

    let path = dir.path().join("nested/notes.txt");
    let read_back = Rc::new(RefCell::new(None));
    let chained = Rc::clone(&files);
    let sink = Rc::clone(&read_back);
    let read_path = path.clone();
    files.submit_with(
        FileOp::write(&path, "first line\n"),
        FileOpOptions::default().with_create_dirs(),
        move |result| {
            assert_eq!(result?, FileOutput::Written(11));
            let reader = Rc::clone(&chained);
            chained.submit(FileOp::append(&read_path, "second line\n"), move |result| {
                result?;
                reader.submit(FileOp::read(&read_path), move |result| {
                    *sink.borrow_mut() = result?.into_bytes();
                    Ok(())
                });
                Ok(())
            });
            Ok(())
        },
    );
    event_loop.run().unwrap();

    let contents = read_back.borrow_mut().take().expect("read completed");
    assert_eq!(contents, b"first line\nsecond line\n");
    assert_eq!(files.pending_operations(), 0);
    phaseloop::test_complete!("file_operations_chain_through_callbacks");
}

#[test]
fn streaming_copy_moves_one_chunk_per_cycle() {
    common::init_test_logging();
    phaseloop::test_phase!("streaming_copy_moves_one_chunk_per_cycle");
    let dir = tempfile::tempdir().unwrap();
    let from = dir.path().join("big.bin");
    let to = dir.path().join("copy.bin");
    let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(&from, &payload).unwrap();

    let (event_loop, _clock) = virtual_loop();
    let files = Rc::new(FileSource::new(event_loop.clock()));
    event_loop.add_source(SourcePhase::Io, Rc::clone(&files));
    let copied = Rc::new(Cell::new(None));
    let sink = Rc::clone(&copied);
    files.submit_with(
        FileOp::copy(&from, &to),
        FileOpOptions::streaming().with_chunk_size(1024),
        move |result| {
            if let FileOutput::Written(n) = result? {
                sink.set(Some(n));
            }
            Ok(())
        },
    );
    event_loop.run().unwrap();

    assert_eq!(copied.get(), Some(10_000));
    assert!(event_loop.iteration_count() >= 10, "one chunk per I/O phase");
    assert_eq!(std::fs::read(&to).unwrap(), payload);
    phaseloop::test_complete!("streaming_copy_moves_one_chunk_per_cycle");
}

#[test]
fn file_errors_reach_the_callback_not_the_loop() {
    common::init_test_logging();
    phaseloop::test_phase!("file_errors_reach_the_callback_not_the_loop");
    let dir = tempfile::tempdir().unwrap();
    let (event_loop, _clock) = virtual_loop();
    let files = Rc::new(FileSource::new(event_loop.clock()));
    event_loop.add_source(SourcePhase::Io, Rc::clone(&files));

    let kind = Rc::new(Cell::new(None));
    let sink = Rc::clone(&kind);
    files.submit(FileOp::read(dir.path().join("missing")), move |result| {
        sink.set(result.err().map(|err| err.kind()));
        Ok(())
    });
    event_loop.run().unwrap();
    assert_eq!(kind.get(), Some(std::io::ErrorKind::NotFound));

    files.submit(FileOp::Exists(dir.path().to_path_buf()), |_| Err("callback refused".into()));
    let err = event_loop.run().unwrap_err();
    assert!(matches!(
        err,
        phaseloop::Error::SourceCallback { source_name: "file", .. }
    ));
    phaseloop::test_complete!("file_errors_reach_the_callback_not_the_loop");
}

#[test]
fn path_watcher_reports_lifecycle_of_a_file() {
    common::init_test_logging();
    phaseloop::test_phase!("path_watcher_reports_lifecycle_of_a_file");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("watched.txt");
    let (event_loop, clock) = virtual_loop();
    let files = Rc::new(FileSource::new(event_loop.clock()));
    event_loop.add_source(SourcePhase::Io, Rc::clone(&files));

    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    let watcher = files.add_watcher(&path, WatchOptions::every(Duration::from_millis(50)), move |event, _| {
        sink.borrow_mut().push(event);
        Ok(())
    });

    let step = |action: &dyn Fn()| {
        action();
        clock.advance(Duration::from_millis(60));
        event_loop.run_once().unwrap();
    };
    step(&|| std::fs::write(&path, b"a").unwrap());
    step(&|| std::fs::write(&path, b"abc").unwrap());
    step(&|| std::fs::remove_file(&path).unwrap());

    assert_eq!(
        *events.borrow(),
        [WatchEvent::Created, WatchEvent::Modified, WatchEvent::Deleted]
    );
    assert!(files.remove_watcher(watcher));
    assert!(!event_loop.has_work());
    phaseloop::test_complete!("path_watcher_reports_lifecycle_of_a_file");
}

#[cfg(unix)]
mod streams {
    use super::*;
    use phaseloop::io::StreamSource;
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;

    #[test]
    fn write_watcher_fires_once_and_read_watcher_persists() {
        common::init_test_logging();
        phaseloop::test_phase!("write_watcher_fires_once_and_read_watcher_persists");
        let event_loop = EventLoop::new();
        let streams = Rc::new(StreamSource::new().unwrap());
        event_loop.add_source(SourcePhase::Io, Rc::clone(&streams));

        let (left, right) = UnixStream::pair().unwrap();
        left.set_nonblocking(true).unwrap();
        right.set_nonblocking(true).unwrap();
        let (left, right) = (Rc::new(left), Rc::new(right));
        let trace = Trace::new();

        let writer = Rc::clone(&left);
        let t = trace.clone();
        streams
            .add_write_watcher(Rc::clone(&left), move || {
                t.push("writable");
                (&*writer).write_all(b"ping")?;
                Ok(())
            })
            .unwrap();

        let received = Rc::new(RefCell::new(Vec::new()));
        let reader = Rc::clone(&right);
        let source = Rc::clone(&streams);
        let sink = Rc::clone(&received);
        let t = trace.clone();
        let id = Rc::new(Cell::new(None));
        let own_id = Rc::clone(&id);
        let read_id = streams
            .add_read_watcher(Rc::clone(&right), move || {
                t.push("readable");
                let mut buf = [0u8; 16];
                let n = (&*reader).read(&mut buf)?;
                sink.borrow_mut().extend_from_slice(&buf[..n]);
                if sink.borrow().len() >= 4 {
                    if let Some(id) = own_id.get() {
                        source.remove_watcher(id);
                    }
                }
                Ok(())
            })
            .unwrap();
        id.set(Some(read_id));
        assert_eq!(streams.watcher_count(), 2);

        event_loop.run().unwrap();

        assert_eq!(*received.borrow(), b"ping");
        assert_eq!(trace.snapshot().iter().filter(|e| *e == "writable").count(), 1);
        assert_eq!(streams.watcher_count(), 0);
        assert_eq!(streams.registered_fds(), 0);
        phaseloop::test_complete!("write_watcher_fires_once_and_read_watcher_persists");
    }
}

#[cfg(not(target_arch = "wasm32"))]
mod http {
    use super::*;
    use phaseloop::http::{HttpError, HttpRequest, HttpSource, Response};
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Serves `count` connections, answering each with the request line
    /// echoed back in the body.
    fn echo_server(count: usize) -> (u16, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            for stream in listener.incoming().take(count) {
                let stream = stream.unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut request_line = String::new();
                reader.read_line(&mut request_line).unwrap();
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).unwrap() == 0 || line == "\r\n" {
                        break;
                    }
                }
                let body = request_line.trim_end();
                let mut stream = stream;
                write!(
                    stream,
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nX-Echo: yes\r\n\r\n{}",
                    body.len(),
                    body
                )
                .unwrap();
            }
        });
        (port, handle)
    }

    #[test]
    fn concurrent_requests_complete_within_the_limit() {
        common::init_test_logging();
        phaseloop::test_phase!("concurrent_requests_complete_within_the_limit");
        let (port, server) = echo_server(3);
        let event_loop = EventLoop::new();
        let http = Rc::new(HttpSource::with_max_concurrent(event_loop.clock(), 2));
        event_loop.add_source(SourcePhase::Io, Rc::clone(&http));

        let responses: Rc<RefCell<Vec<Response>>> = Rc::default();
        for path in ["/a", "/b", "/c"] {
            let sink = Rc::clone(&responses);
            let request = HttpRequest::get(&format!("http://127.0.0.1:{port}{path}"))
                .unwrap()
                .with_timeout(Duration::from_secs(10));
            http.submit(request, move |result| {
                sink.borrow_mut().push(result?);
                Ok(())
            });
        }
        assert_eq!(http.pending_count(), 3);
        event_loop.run_once().unwrap();
        assert!(http.active_count() <= 2);

        event_loop.run().unwrap();
        server.join().unwrap();

        let mut bodies: Vec<String> = responses
            .borrow()
            .iter()
            .map(|response| {
                assert!(response.is_success());
                assert_eq!(response.header("x-echo"), Some("yes"));
                String::from_utf8(response.body.clone()).unwrap()
            })
            .collect();
        bodies.sort();
        assert_eq!(
            bodies,
            ["GET /a HTTP/1.1", "GET /b HTTP/1.1", "GET /c HTTP/1.1"]
        );
        phaseloop::test_complete!("concurrent_requests_complete_within_the_limit");
    }

    #[test]
    fn cancelled_request_reports_cancelled() {
        common::init_test_logging();
        phaseloop::test_phase!("cancelled_request_reports_cancelled");
        let event_loop = EventLoop::new();
        let http = Rc::new(HttpSource::new(event_loop.clock()));
        event_loop.add_source(SourcePhase::Io, Rc::clone(&http));

        let outcome = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&outcome);
        let id = http.submit(HttpRequest::get("http://127.0.0.1:9/").unwrap(), move |result| {
            *sink.borrow_mut() = Some(result.map(|response| response.status));
            Ok(())
        });
        assert!(http.cancel(id));
        assert!(!http.cancel(id));
        event_loop.run().unwrap();

        let outcome = outcome.borrow_mut().take().expect("callback ran");
        assert!(matches!(outcome, Err(HttpError::Cancelled)));
        phaseloop::test_complete!("cancelled_request_reports_cancelled");
    }
}

#[cfg(unix)]
#[test]
fn signal_listener_runs_in_the_signal_phase() {
    use phaseloop::signal::{SignalKind, SignalSource};

    common::init_test_logging();
    phaseloop::test_phase!("signal_listener_runs_in_the_signal_phase");
    let event_loop = EventLoop::new();
    let signals = Rc::new(SignalSource::new());
    event_loop.add_source(SourcePhase::Signal, Rc::clone(&signals));
    let trace = Trace::new();

    let t = trace.clone();
    let source = Rc::clone(&signals);
    let listener = Rc::new(Cell::new(None));
    let own = Rc::clone(&listener);
    let id = signals
        .add_listener(SignalKind::User1, move |kind| {
            t.push(format!("signal:{kind}"));
            if let Some(id) = own.get() {
                source.remove_listener(id);
            }
            Ok(())
        })
        .unwrap();
    listener.set(Some(id));
    event_loop.schedule_tick(trace.recorder("tick"));

    signal_hook::low_level::raise(libc::SIGUSR1).unwrap();
    event_loop.run().unwrap();

    assert_eq!(trace.take(), ["signal:SIGUSR1", "tick"]);
    assert!(!signals.has_listeners());
    phaseloop::test_complete!("signal_listener_runs_in_the_signal_phase");
}

#[test]
fn default_loop_provides_lazily_registered_sources() {
    common::init_test_logging();
    phaseloop::test_phase!("default_loop_provides_lazily_registered_sources");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("global.txt");
    phaseloop::global::reset_default();

    let done = Rc::new(Cell::new(false));
    let flag = Rc::clone(&done);
    phaseloop::global::default_loop()
        .files()
        .submit(FileOp::write(&path, "hi"), move |result| {
            result?;
            flag.set(true);
            Ok(())
        });
    phaseloop::global::run().unwrap();

    assert!(done.get());
    assert_eq!(std::fs::read(&path).unwrap(), b"hi");
    assert!(phaseloop::global::reset_default());
    phaseloop::test_complete!("default_loop_provides_lazily_registered_sources");
}
