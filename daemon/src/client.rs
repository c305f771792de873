//! RPC client: dials an input service, re-materialises wire events into
//! local event objects and forwards them to a caller-supplied channel.

use ::anyhow::{Context, Result};
use ::log::info;
use ::std::net::SocketAddr;
use ::std::time::Duration;
use ::tokio::sync::{mpsc, oneshot};
use ::tonic::transport::{Channel, Endpoint};
use ::tonic::{Code, Request, Status};

use ::proto::input as pb;

use crate::error::Error;
use crate::event::{DeviceType, EventKind, InputEvent};
use crate::manager::DeviceInfo;
use crate::wire;

pub struct InputClient {
    inner: pb::input_client::InputClient<Channel>,
    timeout: Duration,
}

impl InputClient {
    /// Dials `addr`. `connect_timeout` bounds connection establishment;
    /// `call_timeout` applies to unary calls, zero meaning none.
    pub async fn connect(
        addr: SocketAddr,
        connect_timeout: Duration,
        call_timeout: Duration,
    ) -> Result<InputClient, Error> {
        let endpoint =
            Endpoint::from_shared(format!("http://{}", addr)).map_err(|_| Error::BadParameter)?;
        let channel = ::tokio::time::timeout(connect_timeout, endpoint.connect())
            .await
            .map_err(|_| Error::DeadlineExceeded)?
            .map_err(|err| {
                Error::Io(::std::io::Error::new(::std::io::ErrorKind::ConnectionRefused, err))
            })?;
        Ok(InputClient { inner: pb::input_client::InputClient::new(channel), timeout: call_timeout })
    }

    fn request<T>(&self, message: T) -> Request<T> {
        let mut request = Request::new(message);
        if !self.timeout.is_zero() {
            request.set_timeout(self.timeout);
        }
        request
    }

    /// Trivially verifies connectivity.
    pub async fn ping(&mut self) -> Result<(), Status> {
        self.inner.ping(self.request(())).await?;
        Ok(())
    }

    /// Snapshot of the devices open on the remote service, as stubs.
    pub async fn devices(&mut self) -> Result<Vec<DeviceInfo>, Status> {
        let reply = self.inner.devices(self.request(())).await?.into_inner();
        Ok(reply.devices.iter().map(wire::from_wire_device).collect())
    }

    /// Streams events into `out` until the server ends the stream or `done`
    /// fires. Keep-alive events never reach `out`; a cancelled stream is a
    /// clean return, not an error.
    pub async fn listen_for_input_events(
        &mut self,
        mut done: oneshot::Receiver<()>,
        out: mpsc::Sender<InputEvent>,
    ) -> Result<(), Status> {
        let mut stream =
            self.inner.listen_for_input_events(Request::new(())).await?.into_inner();
        loop {
            ::tokio::select! {
                message = stream.message() => match message {
                    Ok(Some(message)) => {
                        if wire::is_keep_alive(&message) {
                            continue;
                        }
                        if out.send(wire::from_wire_event(&message)).await.is_err() {
                            // The receiver is gone; stop listening.
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(status) if status.code() == Code::Cancelled => break,
                    Err(status) => return Err(status),
                },
                // Dropping the stream cancels the call server-side.
                _ = &mut done => break,
            }
        }
        Ok(())
    }
}

pub(crate) async fn run(cfg: ::config::Config, opts: super::ClientOpts) -> Result<()> {
    let addr = opts
        .addr
        .or(cfg.client.addr)
        .context("no server address given; use --addr or the config file")?;
    let connect_timeout = Duration::from_millis(cfg.client.connect_timeout_ms);
    let call_timeout = Duration::from_millis(cfg.client.call_timeout_ms);

    let mut client = InputClient::connect(addr, connect_timeout, call_timeout).await?;
    client.ping().await?;
    let devices = client.devices().await?;
    info!("connected to {}; {} devices open", addr, devices.len());
    for device in &devices {
        info!("  {} {:?} {:?}", device.name, device.device_type, device.bus);
    }

    let (events_tx, mut events) = mpsc::channel(64);
    let (done_tx, done_rx) = oneshot::channel();
    let listener =
        ::tokio::spawn(async move { client.listen_for_input_events(done_rx, events_tx).await });

    let mut printed_header = false;
    loop {
        ::tokio::select! {
            event = events.recv() => match event {
                Some(event) => print_event(&event, &mut printed_header),
                None => break,
            },
            _ = ::tokio::signal::ctrl_c() => break,
        }
    }
    let _ = done_tx.send(());
    listener.await??;
    Ok(())
}

pub(crate) fn print_event(event: &InputEvent, printed_header: &mut bool) {
    if !*printed_header {
        println!("{:<25} {:<28} {:<15} {:<15}", "DEVICE", "KEY/POSITION", "EVENT", "STATE");
        println!(
            "{:<25} {:<28} {:<15} {:<15}",
            "-".repeat(25),
            "-".repeat(28),
            "-".repeat(15),
            "-".repeat(15)
        );
        *printed_header = true;
    }
    println!(
        "{:<25} {:<28} {:<15} {:<15}",
        device_column(event),
        key_position_column(event),
        event_column(event),
        state_column(event)
    );
}

fn device_column(event: &InputEvent) -> String {
    let names: Vec<&str> = [
        (DeviceType::KEYBOARD, "keyboard"),
        (DeviceType::MOUSE, "mouse"),
        (DeviceType::TOUCHSCREEN, "touchscreen"),
        (DeviceType::JOYSTICK, "joystick"),
        (DeviceType::REMOTE, "remote"),
    ]
    .iter()
    .filter(|(flag, _)| event.device_type.contains(*flag))
    .map(|(_, name)| *name)
    .collect();
    if names.is_empty() {
        "unknown".to_owned()
    } else {
        names.join("+")
    }
}

fn key_position_column(event: &InputEvent) -> String {
    match event.kind {
        EventKind::RelPosition => format!("{} => {}", event.relative, event.position),
        EventKind::AbsPosition | EventKind::TouchPosition => event.position.to_string(),
        EventKind::TouchPress | EventKind::TouchRelease => {
            format!("slot {} {}", event.slot, event.position)
        }
        _ => format!("{:?}", event.key_code),
    }
}

fn event_column(event: &InputEvent) -> String {
    format!("{:?}", event.kind).to_uppercase()
}

fn state_column(event: &InputEvent) -> String {
    if !event.device_type.contains(DeviceType::KEYBOARD) {
        return "N/A".to_owned();
    }
    if event.key_state.is_empty() {
        "-".to_owned()
    } else {
        format!("{:?}", event.key_state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::InputManager;
    use crate::server::InputService;
    use ::proto::input::input_server::InputServer;

    async fn serve() -> (SocketAddr, std::sync::Arc<InputManager>) {
        let manager = InputManager::new(false);
        let service = InputService::new(manager.clone(), Duration::from_millis(50));
        let listener = ::tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let incoming = ::tokio_stream::wrappers::TcpListenerStream::new(listener);
        ::tokio::spawn(async move {
            ::tonic::transport::Server::builder()
                .add_service(InputServer::new(service))
                .serve_with_incoming(incoming)
                .await
                .unwrap();
        });
        (addr, manager)
    }

    #[tokio::test]
    async fn ping_and_devices_over_the_wire() {
        let (addr, _manager) = serve().await;
        let mut client =
            InputClient::connect(addr, Duration::from_secs(1), Duration::from_secs(1))
                .await
                .unwrap();
        client.ping().await.unwrap();
        assert!(client.devices().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stream_cancel_via_done_is_clean_and_keep_alives_are_suppressed() {
        let (addr, _manager) = serve().await;
        let mut client = InputClient::connect(addr, Duration::from_secs(1), Duration::ZERO)
            .await
            .unwrap();

        let (events_tx, mut events) = mpsc::channel(8);
        let (done_tx, done_rx) = oneshot::channel();
        let listener = ::tokio::spawn(async move {
            client.listen_for_input_events(done_rx, events_tx).await
        });

        // The 50 ms keep-alive ticker has fired several times by now, but
        // none of those events may surface.
        ::tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(events.try_recv().is_err());

        done_tx.send(()).unwrap();
        listener.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn connect_to_unreachable_address_times_out() {
        // RFC 5737 TEST-NET address; nothing routes there.
        let addr: SocketAddr = "192.0.2.1:50051".parse().unwrap();
        let err = InputClient::connect(addr, Duration::from_millis(100), Duration::ZERO)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::DeadlineExceeded | Error::Io(_)));
    }
}
