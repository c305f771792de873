//! Local tester: opens devices directly and prints their events without
//! going through the RPC service.

use ::anyhow::Result;

use crate::manager::{self, InputManager};

pub(crate) async fn run(cfg: ::config::Config, opts: super::WatchOpts) -> Result<()> {
    let alias = opts.name.unwrap_or_else(|| cfg.server.device_name.clone());
    let types = manager::parse_device_types(&cfg.server.device_types)?;
    let bus = manager::parse_device_bus(&cfg.server.device_bus)?;

    let manager = InputManager::new(cfg.server.exclusive);
    let devices = manager.open_devices(&alias, types, bus)?;
    println!("{:<16} {:<40} {:<12}", "TYPE", "NAME", "BUS");
    for device in &devices {
        println!(
            "{:<16} {:<40} {:<12}",
            format!("{:?}", device.device_type),
            device.name,
            format!("{:?}", device.bus)
        );
    }

    let mut events = manager.subscribe();
    println!("watching for events, press CTRL+C to end");
    let mut printed_header = false;
    loop {
        ::tokio::select! {
            event = events.recv() => match event {
                Some(event) => crate::client::print_event(&event, &mut printed_header),
                None => break,
            },
            _ = ::tokio::signal::ctrl_c() => break,
        }
    }
    manager.unsubscribe(events);
    manager.close();
    Ok(())
}
