//! TCP transport for the work exchange.
//!
//! Each render rank holds one connection to the coordinator and announces
//! itself with a hello frame. The coordinator runs one reader thread per
//! connection that forwards decoded requests into a single channel, so
//! `recv_request` sees requests from every rank in arrival order.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use super::transport::{CoordinatorLink, NodeLink};
use super::wire::{Frame, WorkRange, FRAME_BYTES};
use crate::error::ClusterError;

fn read_frame(stream: &mut TcpStream, timeout: Option<Duration>) -> Result<Frame, ClusterError> {
    let mut bytes = [0u8; FRAME_BYTES];
    stream.read_exact(&mut bytes).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
            ClusterError::Disconnected
        }
        ErrorKind::WouldBlock | ErrorKind::TimedOut => match timeout {
            Some(timeout) => ClusterError::Timeout(timeout),
            None => ClusterError::Io(e),
        },
        _ => ClusterError::Io(e),
    })?;
    Ok(Frame::from_bytes(bytes))
}

fn write_frame(stream: &mut TcpStream, frame: Frame) -> Result<(), ClusterError> {
    stream.write_all(&frame.to_bytes())?;
    Ok(())
}

/// Render-rank end of a TCP connection.
pub struct TcpNodeLink {
    stream: Mutex<TcpStream>,
    timeout: Option<Duration>,
}

impl TcpNodeLink {
    /// Connect to the coordinator at `addr` and announce `rank`.
    pub fn connect(
        addr: impl ToSocketAddrs,
        rank: usize,
        timeout: Option<Duration>,
    ) -> Result<Self, ClusterError> {
        let mut stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(timeout)?;
        write_frame(&mut stream, Frame::hello(rank)?)?;
        log::debug!("Rank {} connected to coordinator {:?}", rank, stream.peer_addr().ok());
        Ok(Self {
            stream: Mutex::new(stream),
            timeout,
        })
    }
}

impl NodeLink for TcpNodeLink {
    fn request_work(&self, rank: usize) -> Result<WorkRange, ClusterError> {
        let mut stream = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        write_frame(&mut stream, Frame::request(rank)?)?;
        read_frame(&mut stream, self.timeout)?.into_reply()
    }
}

/// Coordinator end: one accepted connection per render rank.
pub struct TcpCoordinatorLink {
    requests: Receiver<Result<usize, ClusterError>>,
    writers: Vec<Mutex<TcpStream>>,
}

impl TcpCoordinatorLink {
    /// Accept exactly `num_nodes` connections, each announcing a distinct rank.
    pub fn accept(listener: &TcpListener, num_nodes: usize) -> Result<Self, ClusterError> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut slots: Vec<Option<TcpStream>> = (0..num_nodes).map(|_| None).collect();

        for _ in 0..num_nodes {
            let (mut stream, peer) = listener.accept()?;
            stream.set_nodelay(true)?;
            let rank = read_frame(&mut stream, None)?.into_hello()?;
            match slots.get(rank) {
                Some(None) => {}
                Some(Some(_)) => {
                    return Err(ClusterError::Protocol(format!("rank {rank} connected twice")))
                }
                None => {
                    return Err(ClusterError::Protocol(format!(
                        "rank {rank} out of range for {num_nodes} nodes"
                    )))
                }
            }
            log::debug!("Accepted rank {} from {}", rank, peer);

            spawn_reader(stream.try_clone()?, rank, tx.clone());
            slots[rank] = Some(stream);
        }

        let writers = slots
            .into_iter()
            .map(|slot| slot.map(Mutex::new))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| ClusterError::Protocol("missing rank connection".into()))?;
        Ok(Self {
            requests: rx,
            writers,
        })
    }
}

fn spawn_reader(mut stream: TcpStream, rank: usize, tx: Sender<Result<usize, ClusterError>>) {
    thread::spawn(move || loop {
        let request = read_frame(&mut stream, None).and_then(|frame| {
            let requester = frame.into_request()?;
            if requester == rank {
                Ok(requester)
            } else {
                Err(ClusterError::Protocol(format!(
                    "rank {rank} sent a request as rank {requester}"
                )))
            }
        });
        let failed = request.is_err();
        if tx.send(request).is_err() || failed {
            break;
        }
    });
}

impl CoordinatorLink for TcpCoordinatorLink {
    fn poll_request(&self, timeout: Duration) -> Result<Option<usize>, ClusterError> {
        match self.requests.recv_timeout(timeout) {
            Ok(request) => request.map(Some),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(ClusterError::Disconnected),
        }
    }

    fn reply(&self, rank: usize, range: WorkRange) -> Result<(), ClusterError> {
        let writer = self
            .writers
            .get(rank)
            .ok_or_else(|| ClusterError::Protocol(format!("unknown rank {rank}")))?;
        let mut stream = writer.lock().unwrap_or_else(PoisonError::into_inner);
        write_frame(&mut stream, Frame::reply(range)?)
    }
}

impl Drop for TcpCoordinatorLink {
    fn drop(&mut self) {
        // Closing the sockets also ends the reader threads
        for writer in &mut self.writers {
            let stream = writer.get_mut().unwrap_or_else(PoisonError::into_inner);
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                log::debug!("Closing coordinator connection: {}", e);
            }
        }
    }
}
