use crate::codec;
use crate::error::ShellError;
use crate::transport::{known_uuids, DeviceDescriptor, GattService, Notification};

use ansi_term::Colour::{Cyan, Green, Purple, Red, Yellow};
use ansi_term::Colour;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub color: bool,
}

impl Palette {
    pub fn plain() -> Self {
        Palette { color: false }
    }

    pub fn colored() -> Self {
        Palette { color: true }
    }

    fn paint(&self, colour: Colour, text: &str) -> String {
        if self.color {
            colour.paint(text).to_string()
        } else {
            text.to_owned()
        }
    }

    pub fn info(&self, text: &str) -> String {
        self.paint(Cyan, text)
    }

    pub fn success(&self, text: &str) -> String {
        self.paint(Green, text)
    }

    pub fn error(&self, text: &str) -> String {
        self.paint(Red, text)
    }

    pub fn highlight(&self, text: &str) -> String {
        self.paint(Yellow, text)
    }

    pub fn tag(&self, text: &str) -> String {
        self.paint(Purple, text)
    }

    pub fn prompt(&self, text: &str) -> String {
        self.paint(Green, text)
    }
}

fn describe(device: &DeviceDescriptor, palette: Palette) -> String {
    let mut label = format!(
        "{}  {}",
        palette.highlight(&device.address),
        device.name.as_deref().unwrap_or("Unknown")
    );
    if let Some(rssi) = device.rssi {
        label.push_str(&format!("  ({rssi} dBm)"));
    }
    if !device.services.is_empty() {
        let advertised = device
            .services
            .iter()
            .map(|uuid| known_uuids::name_of(uuid).map_or_else(|| uuid.to_string(), str::to_owned))
            .collect::<Vec<_>>()
            .join(", ");
        label.push_str(&format!("  [{advertised}]"));
    }
    label
}

/// `address  name` without colour, for the start-up picker
pub fn device_label(device: &DeviceDescriptor) -> String {
    describe(device, Palette::plain())
}

pub fn scan_results(devices: &[DeviceDescriptor], palette: Palette) -> String {
    if devices.is_empty() {
        return palette.info("No devices found.");
    }
    devices
        .iter()
        .enumerate()
        .map(|(index, device)| format!("[{index}] {}", describe(device, palette)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn labelled(uuid: &Uuid) -> String {
    match known_uuids::name_of(uuid) {
        Some(name) => format!("{uuid} {name}"),
        None => uuid.to_string(),
    }
}

pub fn service_tree(services: &[GattService], palette: Palette) -> String {
    let mut lines = Vec::new();
    for svc in services {
        lines.push(format!("{} {}", palette.tag("[Service]"), labelled(&svc.uuid)));
        for chr in &svc.characteristics {
            let caps = chr
                .capabilities
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(format!("  └─ {} {} ({caps})", palette.tag("[Char]"), labelled(&chr.uuid)));
        }
    }
    if lines.is_empty() {
        lines.push(palette.info("No services discovered."));
    }
    lines.join("\n")
}

pub fn read_result(uuid: &Uuid, value: &[u8]) -> String {
    format!("Read {uuid}: {}", codec::encode(value))
}

pub fn write_result(uuid: &Uuid, value: &[u8]) -> String {
    format!("Wrote {} to {uuid}", codec::encode(value))
}

pub fn notification(ntf: &Notification, timestamp: Option<&str>, palette: Palette) -> String {
    let line = format!("[Notification] {}: {}", ntf.uuid, codec::encode(&ntf.value));
    match timestamp {
        Some(ts) => format!("{ts} {}", palette.highlight(&line)),
        None => palette.highlight(&line),
    }
}

pub fn error(err: &ShellError, palette: Palette) -> String {
    palette.error(&format!("Error: {}: {err}", err.kind()))
}
