//! Detached input feeding for owned sources
//!
//! A read blocked inside a caller's source cannot be interrupted. For sources
//! the supervisor owns outright, a detached feeder thread does the blocking
//! reads and hands chunks over a bounded channel to a [`FeedReader`]. The
//! stdin pump reads from the `FeedReader`, which never blocks for longer than
//! its poll interval. Once the child is gone the supervisor drops the reader
//! and stops waiting; the feeder exits after its current read returns.

use std::io::{self, Read};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use log::{debug, trace};

/// Chunks buffered between the feeder and the pump
const FEED_DEPTH: usize = 4;

type Chunk = io::Result<Vec<u8>>;

/// Start a detached thread reading `source` in `buffer_size` chunks.
///
/// The thread ends at EOF, on a read error (forwarded as the last chunk), or
/// as soon as the returned reader has been dropped.
pub fn spawn_feeder<R>(source: R, buffer_size: usize, poll: Duration) -> io::Result<FeedReader>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = bounded(FEED_DEPTH);
    let feeder = thread::Builder::new()
        .name("feed-stdin".to_string())
        .spawn(move || feed(source, buffer_size.max(1), tx))?;
    // Never joined; the thread may sit in a read that outlives the call.
    drop(feeder);
    Ok(FeedReader::new(rx, poll))
}

fn feed<R: Read>(mut source: R, buffer_size: usize, tx: Sender<Chunk>) {
    let mut buf = vec![0u8; buffer_size];
    loop {
        let chunk = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => Err(e),
        };
        let failed = chunk.is_err();
        if tx.send(chunk).is_err() {
            debug!("stdin feeder abandoned by its reader");
            return;
        }
        if failed {
            break;
        }
    }
    trace!("stdin feeder reached end of input");
}

/// Receiving end of a feeder thread.
///
/// `read` returns `ErrorKind::Interrupted` when no chunk arrived within the
/// poll interval, which sends a [`Pump`](super::Pump) back around its loop to
/// check its stop token.
#[derive(Debug)]
pub struct FeedReader {
    rx: Receiver<Chunk>,
    poll: Duration,
    pending: Vec<u8>,
    offset: usize,
}

impl FeedReader {
    fn new(rx: Receiver<Chunk>, poll: Duration) -> Self {
        Self {
            rx,
            poll,
            pending: Vec::new(),
            offset: 0,
        }
    }

    fn copy_pending(&mut self, buf: &mut [u8]) -> usize {
        let available = &self.pending[self.offset..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.offset += n;
        n
    }
}

impl Read for FeedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.offset < self.pending.len() {
            return Ok(self.copy_pending(buf));
        }

        match self.rx.recv_timeout(self.poll) {
            Ok(Ok(chunk)) => {
                self.pending = chunk;
                self.offset = 0;
                Ok(self.copy_pending(buf))
            }
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Err(io::Error::new(
                io::ErrorKind::Interrupted,
                "no input within poll interval",
            )),
            Err(RecvTimeoutError::Disconnected) => Ok(0),
        }
    }
}
