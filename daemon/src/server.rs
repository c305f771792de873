//! RPC surface: the `input.Input` service wrapping the manager, plus the
//! server entry point with hotplug rescans and graceful shutdown.

use ::async_stream::stream;
use ::futures::Stream;
use ::log::{debug, info, warn};
use ::std::net::SocketAddr;
use ::std::os::unix::io::AsRawFd;
use ::std::pin::Pin;
use ::std::sync::Arc;
use ::std::time::Duration;
use ::tokio::sync::mpsc;
use ::tonic::{Request, Response, Status};

use ::proto::input as pb;
use ::proto::input::input_server::{Input, InputServer};

use crate::bus::Publisher;
use crate::event::{DeviceBus, DeviceType};
use crate::manager::{self, InputManager};
use crate::wire;

pub struct InputService {
    manager: Arc<InputManager>,
    cancel: Arc<Publisher<()>>,
    keepalive: Duration,
}

impl InputService {
    pub fn new(manager: Arc<InputManager>, keepalive: Duration) -> InputService {
        InputService { manager, cancel: Arc::new(Publisher::new()), keepalive }
    }

    /// Handle for ending every active stream, detached from the service
    /// (which the tonic server takes by value).
    pub fn canceller(&self) -> Canceller {
        Canceller(self.cancel.clone())
    }

    /// Signals every active stream handler to finish cleanly.
    pub fn cancel_requests(&self) {
        self.cancel.emit(&());
    }
}

#[derive(Clone)]
pub struct Canceller(Arc<Publisher<()>>);

impl Canceller {
    pub fn cancel_requests(&self) {
        self.0.emit(&());
    }
}

#[tonic::async_trait]
impl Input for InputService {
    async fn ping(&self, _request: Request<()>) -> Result<Response<()>, Status> {
        Ok(Response::new(()))
    }

    async fn devices(
        &self,
        _request: Request<()>,
    ) -> Result<Response<pb::InputDevices>, Status> {
        let devices =
            self.manager.get_open_devices().iter().map(wire::to_wire_device).collect();
        Ok(Response::new(pb::InputDevices { devices }))
    }

    type ListenForInputEventsStream =
        Pin<Box<dyn Stream<Item = Result<pb::InputEvent, Status>> + Send>>;

    async fn listen_for_input_events(
        &self,
        _request: Request<()>,
    ) -> Result<Response<Self::ListenForInputEventsStream>, Status> {
        debug!("stream handler subscribing");
        let manager = self.manager.clone();
        let mut events = manager.subscribe();
        let mut cancel = self.cancel.subscribe();
        // keepalive 0 disables the ticker for practical purposes.
        let period = if self.keepalive.is_zero() {
            Duration::from_secs(86_400)
        } else {
            self.keepalive
        };

        let stream = stream! {
            let start = ::tokio::time::Instant::now() + period;
            let mut tick = ::tokio::time::interval_at(start, period);
            loop {
                ::tokio::select! {
                    event = events.recv() => match event {
                        Some(event) => yield Ok(wire::to_wire_event(&event)),
                        None => break,
                    },
                    _ = cancel.recv() => break,
                    _ = tick.tick() => yield Ok(wire::keep_alive()),
                }
            }
            debug!("stream handler unsubscribing");
            manager.unsubscribe(events);
        };
        Ok(Response::new(Box::pin(stream)))
    }
}

pub(crate) async fn run(cfg: ::config::Config, opts: super::ServerOpts) -> ::anyhow::Result<()> {
    let alias = cfg.server.device_name.clone();
    let types = manager::parse_device_types(&cfg.server.device_types)?;
    let bus = manager::parse_device_bus(&cfg.server.device_bus)?;

    let manager = InputManager::new(cfg.server.exclusive);
    let opened = manager.open_devices(&alias, types, bus)?;
    info!("opened {} input devices", opened.len());
    for device in &opened {
        info!("  {} {:?} ({})", device.name, device.device_type, device.path.display());
    }

    spawn_hotplug_rescan(manager.clone(), alias, types, bus);

    let service =
        InputService::new(manager.clone(), Duration::from_secs(cfg.server.keepalive_secs));
    let canceller = service.canceller();
    let addr: SocketAddr = opts.bind.unwrap_or(cfg.server.bind);
    info!("serving input events on {}", addr);

    ::tonic::transport::Server::builder()
        .add_service(InputServer::new(service))
        .serve_with_shutdown(addr, async move {
            let _ = ::tokio::signal::ctrl_c().await;
            info!("shutting down");
            canceller.cancel_requests();
        })
        .await?;

    manager.close();
    Ok(())
}

/// Re-runs discovery whenever udev reports an added input device, so
/// hotplugged devices join live streams. Discovery failures degrade to a
/// warning; the next add event retries.
fn spawn_hotplug_rescan(
    manager: Arc<InputManager>,
    alias: String,
    types: DeviceType,
    bus: DeviceBus,
) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    ::std::thread::spawn(move || hotplug_monitor(tx));
    ::tokio::spawn(async move {
        while rx.recv().await.is_some() {
            match manager.open_devices(&alias, types, bus) {
                Ok(new) => {
                    for device in &new {
                        info!("hotplug: opened {} ({})", device.name, device.path.display());
                    }
                }
                Err(err) => warn!("hotplug rescan failed: {}", err),
            }
        }
    });
}

/// Blocks on the udev monitor socket in a plain thread (udev types are not
/// Send) and emits one unit per device-add event.
fn hotplug_monitor(rescans: mpsc::UnboundedSender<()>) {
    let socket = ::udev::MonitorBuilder::new()
        .and_then(|builder| builder.match_subsystem("input"))
        .and_then(|builder| builder.listen());
    let socket = match socket {
        Ok(socket) => socket,
        Err(err) => {
            warn!("udev monitor unavailable, hotplug rescans disabled: {}", err);
            return;
        }
    };

    let fd = socket.as_raw_fd();
    loop {
        let mut fds = [::libc::pollfd { fd, events: ::libc::POLLIN, revents: 0 }];
        let ready = unsafe { ::libc::poll(fds.as_mut_ptr(), 1, -1) };
        if ready < 0 {
            let err = ::std::io::Error::last_os_error();
            if err.kind() == ::std::io::ErrorKind::Interrupted {
                continue;
            }
            warn!("udev monitor poll failed: {}", err);
            return;
        }
        for event in socket.iter() {
            if event.event_type() == ::udev::EventType::Add && rescans.send(()).is_err() {
                return;
            }
        }
    }
}
