//! A scripted stand-in for `droverd` listening on a Unix socket.
//!
//! Each accepted connection has its request line recorded and receives the
//! next batch of canned reply lines before being closed.

use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};

const ACCEPT_DEADLINE: Duration = Duration::from_secs(2);

pub(crate) struct FakeDaemon {
    requests: Arc<Mutex<Vec<String>>>,
    handle: Option<thread::JoinHandle<Result<()>>>,
}

impl FakeDaemon {
    /// Binds `path` and serves one connection per entry in `connections`.
    pub(crate) fn spawn(path: &Path, connections: Vec<Vec<String>>) -> Result<Self> {
        let listener = UnixListener::bind(path).context("bind fake daemon")?;
        listener
            .set_nonblocking(true)
            .context("fake daemon nonblocking")?;
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);
        let handle = thread::spawn(move || serve(&listener, connections, &recorded));
        Ok(Self {
            requests,
            handle: Some(handle),
        })
    }

    /// Waits for the serving thread and returns every recorded request.
    pub(crate) fn take_requests(&mut self) -> Result<Vec<String>> {
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| anyhow!("fake daemon thread panicked"))?
                .context("fake daemon failed")?;
        }
        let requests = self
            .requests
            .lock()
            .map_err(|error| anyhow!("lock requests: {error}"))?;
        Ok(requests.clone())
    }
}

impl Drop for FakeDaemon {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn serve(
    listener: &UnixListener,
    connections: Vec<Vec<String>>,
    requests: &Arc<Mutex<Vec<String>>>,
) -> Result<()> {
    for replies in connections {
        let Some(stream) = accept(listener)? else {
            // The client gave up before connecting; finish quietly.
            return Ok(());
        };
        stream
            .set_nonblocking(false)
            .context("blocking client stream")?;
        record_request(&stream, requests)?;
        write_lines(stream, &replies).context("write replies")?;
    }
    Ok(())
}

fn accept(listener: &UnixListener) -> Result<Option<UnixStream>> {
    let deadline = Instant::now() + ACCEPT_DEADLINE;
    loop {
        match listener.accept() {
            Ok((stream, _)) => return Ok(Some(stream)),
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Ok(None);
                }
                thread::sleep(Duration::from_millis(10));
            }
            Err(error) => return Err(error).context("accept connection"),
        }
    }
}

fn record_request(stream: &UnixStream, requests: &Arc<Mutex<Vec<String>>>) -> Result<()> {
    let mut line = String::new();
    let mut reader = BufReader::new(stream.try_clone().context("clone stream")?);
    if reader.read_line(&mut line).context("read request")? == 0 {
        return Ok(());
    }
    requests
        .lock()
        .map_err(|error| anyhow!("lock requests: {error}"))?
        .push(line);
    Ok(())
}

fn write_lines(mut stream: UnixStream, lines: &[String]) -> io::Result<()> {
    for line in lines {
        stream.write_all(line.as_bytes())?;
        stream.write_all(b"\n")?;
    }
    stream.flush()
}
