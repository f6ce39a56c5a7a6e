use anyhow::{Context, Result};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

/// Raw bidirectional byte stream to one device console.
///
/// `recv` returns the number of bytes read, `Ok(0)` at end of stream, and an
/// `io::ErrorKind::TimedOut` error when nothing arrived within `timeout`.
pub trait Transport: Send {
    fn send(&mut self, data: &[u8]) -> io::Result<()>;
    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;
}

/* -------------------- spawned process -------------------- */

/// Console reached through a child process (typically `ssh -tt`).
///
/// stdout and stderr are pumped by two reader threads into one channel so
/// reads can be bounded by a timeout.
pub struct ProcessTransport {
    child: Child,
    stdin: ChildStdin,
    rx: Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
}

impl ProcessTransport {
    pub fn spawn(program: &str, args: &[String]) -> Result<Self> {
        tracing::info!(program, ?args, "spawning console process");
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn {program}"))?;

        let stdin = child.stdin.take().context("child stdin not captured")?;
        let stdout = child.stdout.take().context("child stdout not captured")?;
        let stderr = child.stderr.take().context("child stderr not captured")?;

        let (tx, rx) = mpsc::channel();
        pump(stdout, tx.clone());
        pump(stderr, tx);

        Ok(Self {
            child,
            stdin,
            rx,
            pending: VecDeque::new(),
        })
    }

    /// Run `cmd` through `bash -c`.
    pub fn shell(cmd: &str) -> Result<Self> {
        Self::spawn("bash", &["-c".to_string(), cmd.to_string()])
    }
}

fn pump<R: Read + Send + 'static>(mut src: R, tx: Sender<Vec<u8>>) {
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match src.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    });
}

impl Transport for ProcessTransport {
    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.stdin.write_all(data)?;
        self.stdin.flush()
    }

    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv_timeout(timeout) {
                Ok(chunk) => self.pending.extend(chunk),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "console read timed out"));
                }
                // both reader threads finished: the child closed its output
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        for (dst, src) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

impl Drop for ProcessTransport {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/* -------------------- serial console -------------------- */

pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    pub fn open(dev: &str, baud: u32) -> Result<Self> {
        let port = serialport::new(dev, baud)
            .timeout(Duration::from_millis(100))
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open()
            .map_err(|e| anyhow::anyhow!("open {}: {}", dev, e))?;
        tracing::info!(dev, baud, "opened serial console");
        Ok(Self { port })
    }
}

impl Transport for SerialTransport {
    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data)?;
        self.port.flush()
    }

    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        self.port.set_timeout(timeout).map_err(io::Error::from)?;
        match self.port.read(buf) {
            // a serial line never reaches end of stream; zero bytes means nothing arrived
            Ok(0) => Err(io::Error::new(io::ErrorKind::TimedOut, "serial read timed out")),
            other => other,
        }
    }
}
