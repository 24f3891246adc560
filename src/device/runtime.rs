use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time;
use tracing::{debug, error, info, trace, warn};

use crate::device::Firewall;
use crate::network::{Frame, FrameQueue, FrameType, Hac, PortId, LOOPBACK};
use crate::service::{Shutdown, SimConfig, SimError, SimResult};

/// Tunables for the three device loops, carried explicitly so devices can be
/// driven in tests without the global config.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub ip: String,
    pub port_base: u16,
    pub accept_timeout: Duration,
    pub connect_timeout: Duration,
    pub poll_interval: Duration,
    pub max_frame_size: usize,
    pub corrupt_probability: f64,
}

impl RuntimeSettings {
    pub fn from_config(config: &SimConfig) -> RuntimeSettings {
        RuntimeSettings {
            ip: config.network.ip.clone(),
            port_base: config.network.port_base,
            accept_timeout: Duration::from_millis(config.network.accept_timeout_ms),
            connect_timeout: Duration::from_millis(config.network.connect_timeout_ms),
            poll_interval: Duration::from_millis(config.network.poll_interval_ms),
            max_frame_size: config.network.max_frame_size,
            corrupt_probability: config.fault.corrupt_probability,
        }
    }

    fn tcp_addr(&self, port: PortId) -> String {
        format!("{}:{}", self.ip, self.port_base + port.0)
    }
}

/// Device-specific half of the processor loop. Exactly two variants exist:
/// the switch's learning forwarder and the node's reliable-delivery engine.
pub trait DeviceLogic: Send + 'static {
    /// Runs once per processor cycle, before the inbound queue is polled.
    fn tick(&mut self, outbound: &FrameQueue) -> SimResult<()> {
        let _ = outbound;
        Ok(())
    }

    /// Consumes one inbound entry, possibly enqueueing outbound frames.
    fn process(&mut self, ingress: PortId, frame: Frame, outbound: &FrameQueue) -> SimResult<()>;
}

impl DeviceLogic for Box<dyn DeviceLogic> {
    fn tick(&mut self, outbound: &FrameQueue) -> SimResult<()> {
        (**self).tick(outbound)
    }

    fn process(&mut self, ingress: PortId, frame: Frame, outbound: &FrameQueue) -> SimResult<()> {
        (**self).process(ingress, frame, outbound)
    }
}

/// Generic per-device execution model: one TCP listener per input port and
/// three concurrently scheduled loops.
///
/// The inbound queue is produced by the receiver and consumed by the
/// processor; the outbound queue is produced by the processor and consumed by
/// the sender. Those two hand-offs are the only state shared between the
/// loops of one device.
pub struct DeviceRuntime {
    name: String,
    ports_in: Vec<PortId>,
    ports_out: Vec<PortId>,
    firewall: Option<Arc<Firewall>>,
    inbound: Arc<FrameQueue>,
    outbound: Arc<FrameQueue>,
    settings: RuntimeSettings,
}

impl DeviceRuntime {
    pub fn new(
        name: impl Into<String>,
        ports_in: Vec<PortId>,
        ports_out: Vec<PortId>,
        firewall: Option<Arc<Firewall>>,
        settings: RuntimeSettings,
    ) -> DeviceRuntime {
        DeviceRuntime {
            name: name.into(),
            ports_in,
            ports_out,
            firewall,
            inbound: Arc::new(FrameQueue::new()),
            outbound: Arc::new(FrameQueue::new()),
            settings,
        }
    }

    /// Outbound queue handle, for seeding frames before the loops start
    /// (initial node traffic, firewall rule announcements).
    pub fn outbound(&self) -> Arc<FrameQueue> {
        self.outbound.clone()
    }

    pub fn inbound(&self) -> Arc<FrameQueue> {
        self.inbound.clone()
    }

    /// Binds every input port, then spawns the receiver, sender and processor
    /// loops. Returns once the listeners are live; the loops run until the
    /// shutdown signal, each dropping its completion sender on exit.
    pub async fn start<L: DeviceLogic>(
        self,
        logic: L,
        notify_shutdown: &broadcast::Sender<()>,
        shutdown_complete_tx: &mpsc::Sender<()>,
    ) -> SimResult<()> {
        let mut listeners = Vec::with_capacity(self.ports_in.len());
        for port in &self.ports_in {
            let addr = self.settings.tcp_addr(*port);
            let listener = TcpListener::bind(&addr)
                .await
                .map_err(|e| SimError::PortsInUse(format!("{}: {}", addr, e)))?;
            listeners.push((*port, listener));
        }
        info!(
            "device {} listening on {} input port(s)",
            self.name,
            listeners.len()
        );

        let receiver = ReceiverLoop {
            name: self.name.clone(),
            listeners,
            inbound: self.inbound.clone(),
            firewall: self.firewall.clone(),
            settings: self.settings.clone(),
        };
        let sender = SenderLoop {
            name: self.name.clone(),
            ports_out: self.ports_out.clone(),
            inbound: self.inbound.clone(),
            outbound: self.outbound.clone(),
            firewall: self.firewall.clone(),
            settings: self.settings.clone(),
        };
        let processor = ProcessorLoop {
            name: self.name.clone(),
            logic,
            inbound: self.inbound.clone(),
            outbound: self.outbound.clone(),
            poll_interval: self.settings.poll_interval,
        };

        spawn_loop("receiver", receiver.name.clone(), notify_shutdown, shutdown_complete_tx, |shutdown| {
            receiver.run(shutdown)
        });
        spawn_loop("sender", sender.name.clone(), notify_shutdown, shutdown_complete_tx, |shutdown| {
            sender.run(shutdown)
        });
        spawn_loop("processor", processor.name.clone(), notify_shutdown, shutdown_complete_tx, |shutdown| {
            processor.run(shutdown)
        });

        Ok(())
    }
}

fn spawn_loop<F, Fut>(
    role: &'static str,
    device: String,
    notify_shutdown: &broadcast::Sender<()>,
    shutdown_complete_tx: &mpsc::Sender<()>,
    run: F,
) where
    F: FnOnce(Shutdown) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = SimResult<()>> + Send,
{
    let shutdown = Shutdown::new(notify_shutdown.subscribe());
    let complete = shutdown_complete_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = run(shutdown).await {
            error!("device {} {} loop aborted: {}", device, role, e);
        } else {
            debug!("device {} {} loop exited", device, role);
        }
        drop(complete);
    });
}

/// Polls each bound input port with a bounded accept wait; one connection
/// carries exactly one encoded frame.
struct ReceiverLoop {
    name: String,
    listeners: Vec<(PortId, TcpListener)>,
    inbound: Arc<FrameQueue>,
    firewall: Option<Arc<Firewall>>,
    settings: RuntimeSettings,
}

impl ReceiverLoop {
    async fn run(self, mut shutdown: Shutdown) -> SimResult<()> {
        while !shutdown.is_shutdown() {
            for (port, listener) in &self.listeners {
                let accepted = tokio::select! {
                    res = time::timeout(self.settings.accept_timeout, listener.accept()) => res,
                    _ = shutdown.recv() => return Ok(()),
                };
                let stream = match accepted {
                    Ok(Ok((stream, _))) => stream,
                    Ok(Err(e)) => {
                        warn!("device {}: accept failed on port {}: {}", self.name, port, e);
                        continue;
                    }
                    // bounded wait elapsed with no connection, move on
                    Err(_) => continue,
                };
                if let Err(e) = self.receive_one(*port, stream).await {
                    warn!("device {}: dropping inbound frame: {}", self.name, e);
                }
            }
        }
        Ok(())
    }

    async fn receive_one(&self, port: PortId, mut stream: TcpStream) -> SimResult<()> {
        let mut buf = Vec::with_capacity(256);
        let mut limited = (&mut stream).take(self.settings.max_frame_size as u64);
        limited.read_to_end(&mut buf).await?;
        if buf.is_empty() {
            return Ok(());
        }

        let frame = Frame::decode(&buf)?;
        if frame.frame_type == FrameType::FirewallRule {
            // rule frames are consumed here, never queued
            if let Some(firewall) = &self.firewall {
                let addr: Hac = frame.payload.parse()?;
                firewall.absorb_local(addr);
                info!("device {} absorbed firewall rule for {}", self.name, addr);
            } else {
                debug!("device {} ignores firewall rule frame", self.name);
            }
        } else if !frame.crc_ok {
            warn!(
                "device {}: checksum failure on frame {} -> {}, nack sent",
                self.name, frame.src, frame.dest
            );
            // self-delivered so the processor treats it as a rejected send
            self.inbound.push(LOOPBACK, frame.reply(FrameType::CrcNack));
        } else {
            trace!(
                "device {} delivered '{}' via port {}",
                self.name,
                frame.payload,
                port
            );
            self.inbound.push(port, frame);
        }
        Ok(())
    }
}

/// Drains the outbound queue onto the wire, applying firewall policy before
/// transmission and retrying transport failures indefinitely.
struct SenderLoop {
    name: String,
    ports_out: Vec<PortId>,
    inbound: Arc<FrameQueue>,
    outbound: Arc<FrameQueue>,
    firewall: Option<Arc<Firewall>>,
    settings: RuntimeSettings,
}

impl SenderLoop {
    async fn run(self, mut shutdown: Shutdown) -> SimResult<()> {
        while !shutdown.is_shutdown() {
            let (port, frame) = match self.outbound.pop() {
                Some(entry) => entry,
                None => {
                    tokio::select! {
                        _ = time::sleep(self.settings.poll_interval) => {}
                        _ = shutdown.recv() => return Ok(()),
                    }
                    continue;
                }
            };

            // rule announcements bypass the policy they configure
            if frame.frame_type != FrameType::FirewallRule {
                if let Some(firewall) = &self.firewall {
                    if firewall.is_blocked(&frame) {
                        warn!(
                            "device {}: firewall blocked frame {} -> {}",
                            self.name, frame.src, frame.dest
                        );
                        self.inbound
                            .push(LOOPBACK, frame.reply(FrameType::FirewallNack));
                        continue;
                    }
                }
            }

            if !self.ports_out.contains(&port) {
                return Err(SimError::UnattachedPort(port.to_string()));
            }

            match self.transmit(port, &frame).await {
                Ok(()) => {
                    debug!(
                        "{} sends '{}' to {} via port {}",
                        frame.src, frame.payload, frame.dest, port
                    );
                }
                Err(e) => {
                    // the system's only retry mechanism: re-enqueue unchanged
                    debug!(
                        "device {}: frame to {} via port {} is delayed: {}",
                        self.name, frame.dest, port, e
                    );
                    self.outbound.push(port, frame);
                    tokio::select! {
                        _ = time::sleep(self.settings.poll_interval) => {}
                        _ = shutdown.recv() => return Ok(()),
                    }
                }
            }
        }
        Ok(())
    }

    async fn transmit(&self, port: PortId, frame: &Frame) -> std::io::Result<()> {
        let addr = self.settings.tcp_addr(port);
        let mut stream = time::timeout(self.settings.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| std::io::Error::new(ErrorKind::TimedOut, "connect timed out"))??;
        stream
            .write_all(&frame.encode(self.settings.corrupt_probability))
            .await?;
        stream.shutdown().await?;
        Ok(())
    }
}

/// Runs the device-specific logic over the inbound queue; a fatal error from
/// the logic terminates this device's processing entirely.
struct ProcessorLoop<L> {
    name: String,
    logic: L,
    inbound: Arc<FrameQueue>,
    outbound: Arc<FrameQueue>,
    poll_interval: Duration,
}

impl<L: DeviceLogic> ProcessorLoop<L> {
    async fn run(mut self, mut shutdown: Shutdown) -> SimResult<()> {
        while !shutdown.is_shutdown() {
            self.logic.tick(&self.outbound)?;
            match self.inbound.pop() {
                Some((port, frame)) => {
                    self.logic.process(port, frame, &self.outbound)?;
                }
                None => {
                    tokio::select! {
                        _ = time::sleep(self.poll_interval) => {}
                        _ = shutdown.recv() => return Ok(()),
                    }
                }
            }
        }
        Ok(())
    }
}
