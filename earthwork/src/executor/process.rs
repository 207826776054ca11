//! Worker process dispatch.
//!
//! Each chunk of a batch goes to a fresh `program worker` child. The
//! request is written to the child's stdin as one JSON line; replies
//! are read back line by line from its stdout. Children inherit
//! stderr, so their logs reach the parent's terminal.

use super::{batch_ranges, Dispatched, Dispatcher, WorkerReply, WorkerRequest};
use crate::EarthworkError;
use crossbeam_channel::{RecvTimeoutError, Sender};
use log::{debug, warn};
use std::{
    io::{BufRead, BufReader, Write},
    path::PathBuf,
    process::{Child, ChildStdout, Command, Stdio},
    thread,
    time::{Duration, Instant},
};

pub struct ProcessPool {
    program: PathBuf,
    workers: usize,
}

enum Event {
    Reply(WorkerReply),
    Closed(usize),
}

impl ProcessPool {
    pub fn new(program: PathBuf, workers: usize) -> Self {
        Self { program, workers }
    }

    fn spawn(&self, request: &WorkerRequest) -> Result<Child, EarthworkError> {
        let mut child = Command::new(&self.program)
            .arg("worker")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                EarthworkError::Worker(format!("cannot spawn {:?}: {e}", self.program))
            })?;
        let written = child
            .stdin
            .take()
            .ok_or_else(|| EarthworkError::Worker("worker stdin unavailable".into()))
            .and_then(|mut stdin| {
                serde_json::to_writer(&mut stdin, request)?;
                stdin.write_all(b"\n")?;
                stdin.flush()?;
                Ok(())
            });
        if let Err(e) = written {
            kill(&mut child);
            return Err(e);
        }
        Ok(child)
    }
}

impl Dispatcher for ProcessPool {
    fn name(&self) -> &str {
        "process"
    }

    fn dispatch(
        &self,
        request: &WorkerRequest,
        timeout: Option<Duration>,
    ) -> Result<Dispatched, EarthworkError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut children: Vec<Child> = Vec::new();

        for (id, (start, end)) in batch_ranges(request.units.len(), self.workers)
            .into_iter()
            .enumerate()
        {
            let chunk = request.with_units(request.units[start..end].to_vec());
            let spawned = self.spawn(&chunk).and_then(|mut child| {
                let stdout = child
                    .stdout
                    .take()
                    .ok_or_else(|| EarthworkError::Worker("worker stdout unavailable".into()));
                match stdout {
                    Ok(stdout) => Ok((child, stdout)),
                    Err(e) => {
                        kill(&mut child);
                        Err(e)
                    }
                }
            });
            match spawned {
                Ok((child, stdout)) => {
                    let tx = tx.clone();
                    thread::spawn(move || read_replies(id, stdout, &tx));
                    children.push(child);
                }
                Err(e) => {
                    children.iter_mut().for_each(kill);
                    return Err(e);
                }
            }
        }
        drop(tx);
        debug!("spawned {} workers", children.len());

        let mut dispatched = Dispatched::default();
        let mut open = children.len();
        while open > 0 {
            let event = match deadline {
                Some(deadline) => rx.recv_deadline(deadline),
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match event {
                Ok(Event::Reply(reply)) => dispatched.replies.push(reply),
                Ok(Event::Closed(id)) => {
                    debug!("worker {id} closed its output");
                    open -= 1;
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!("killing {} workers after timeout", children.len());
                    children.iter_mut().for_each(kill);
                    dispatched.timed_out = true;
                    return Ok(dispatched);
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        for (id, child) in children.iter_mut().enumerate() {
            match child.wait() {
                Ok(status) if !status.success() => warn!("worker {id} exited with {status}"),
                Ok(_) => (),
                Err(e) => warn!("cannot wait for worker {id}: {e}"),
            }
        }
        Ok(dispatched)
    }
}

fn read_replies(id: usize, stdout: ChildStdout, tx: &Sender<Event>) {
    for line in BufReader::new(stdout).lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("worker {id} output unreadable: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<WorkerReply>(&line) {
            Ok(reply) => {
                if tx.send(Event::Reply(reply)).is_err() {
                    return;
                }
            }
            Err(e) => warn!("worker {id} sent malformed reply: {e}"),
        }
    }
    let _ = tx.send(Event::Closed(id));
}

fn kill(child: &mut Child) {
    if let Err(e) = child.kill() {
        debug!("kill failed: {e}");
    }
    let _ = child.wait();
}
