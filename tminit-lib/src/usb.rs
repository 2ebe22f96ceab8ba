//! [`Transport`] backed by `nusb`.

use crate::error::TmError;
use crate::ids::{self, INTERFACE};
use crate::session::DeviceIdentity;
use crate::transport::{Completion, PendingTransfer, TransferSlot, TransferStatus, Transport};
use crate::wire::{ControlRequest, Direction, Recipient, RequestKind};
use nusb::transfer::{ControlIn, ControlOut, ControlType, TransferError};
use nusb::{DeviceInfo, Interface};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info};

/// List every attached device this crate can switch.
pub fn find_devices() -> Result<Vec<DeviceInfo>, TmError> {
    Ok(nusb::list_devices()?
        .filter(|d| ids::is_supported(d.vendor_id(), d.product_id()))
        .collect())
}

pub struct UsbTransport {
    interface: Interface,
}

impl UsbTransport {
    /// Open the device, claim the handshake interface and read its endpoints.
    pub fn open(device_info: &DeviceInfo) -> Result<(Self, DeviceIdentity), TmError> {
        info!(
            "Opening {:04x}:{:04x} on bus {} addr {}",
            device_info.vendor_id(),
            device_info.product_id(),
            device_info.bus_number(),
            device_info.device_address()
        );
        let device = device_info.open()?;

        let endpoints = {
            let config = device
                .active_configuration()
                .map_err(|e| TmError::Configuration(e.to_string()))?;
            let group = config
                .interfaces()
                .find(|g| g.interface_number() == INTERFACE)
                .ok_or_else(|| TmError::Configuration(format!("no interface {INTERFACE}")))?;
            group
                .alt_settings()
                .next()
                .map(|alt| alt.endpoints().map(|ep| ep.address()).collect::<Vec<_>>())
                .unwrap_or_default()
        };
        debug!(endpoints = hex::encode(&endpoints), "Interface {} endpoints", INTERFACE);

        let interface = device.detach_and_claim_interface(INTERFACE)?;
        info!("Interface claimed successfully.");

        let identity = DeviceIdentity {
            vendor_id: device_info.vendor_id(),
            product_id: device_info.product_id(),
            endpoints,
        };
        Ok((Self { interface }, identity))
    }
}

fn control_type(kind: RequestKind) -> Result<ControlType, TmError> {
    match kind {
        RequestKind::Standard => Ok(ControlType::Standard),
        RequestKind::Class => Ok(ControlType::Class),
        RequestKind::Vendor => Ok(ControlType::Vendor),
        RequestKind::Reserved(k) => Err(TmError::Rejected(format!("reserved request type {k}"))),
    }
}

fn recipient(recipient: Recipient) -> Result<nusb::transfer::Recipient, TmError> {
    match recipient {
        Recipient::Device => Ok(nusb::transfer::Recipient::Device),
        Recipient::Interface => Ok(nusb::transfer::Recipient::Interface),
        Recipient::Endpoint => Ok(nusb::transfer::Recipient::Endpoint),
        Recipient::Other => Ok(nusb::transfer::Recipient::Other),
        Recipient::Reserved(r) => Err(TmError::Rejected(format!("reserved recipient {r}"))),
    }
}

// nusb folds EPROTO into `Fault` together with EILSEQ, ETIME and other bus
// errors, so all of them read as `Protocol` and are tolerated on the switch.
fn status_of(result: Result<(), TransferError>) -> TransferStatus {
    match result {
        Ok(()) => TransferStatus::Complete,
        Err(TransferError::Cancelled) => TransferStatus::Cancelled,
        Err(TransferError::Stall) => TransferStatus::Stall,
        Err(TransferError::Disconnected) => TransferStatus::Disconnected,
        Err(TransferError::Fault) => TransferStatus::Protocol,
        Err(_) => TransferStatus::Fault,
    }
}

async fn control_in(interface: Interface, control: ControlIn, mut buffer: Vec<u8>, mut slot: TransferSlot) {
    tokio::select! {
        completion = interface.control_in(control) => {
            let actual_length = completion.data.len().min(buffer.len());
            buffer[..actual_length].copy_from_slice(&completion.data[..actual_length]);
            slot.complete(Completion::new(status_of(completion.status), buffer, actual_length));
        }
        _ = slot.cancelled() => slot.complete(Completion::cancelled(buffer)),
    }
}

async fn control_out(
    interface: Interface,
    request: ControlRequest,
    control_type: ControlType,
    recipient: nusb::transfer::Recipient,
    buffer: Vec<u8>,
    mut slot: TransferSlot,
) {
    let transfer = interface.control_out(ControlOut {
        control_type,
        recipient,
        request: request.request,
        value: request.value,
        index: request.index,
        data: &buffer,
    });
    let status = tokio::select! {
        completion = transfer => status_of(completion.status),
        _ = slot.cancelled() => TransferStatus::Cancelled,
    };
    let sent = if status.is_ok() { buffer.len() } else { 0 };
    slot.complete(Completion::new(status, buffer, sent));
}

impl Transport for UsbTransport {
    fn submit_control(&self, request: ControlRequest, buffer: Vec<u8>) -> Result<PendingTransfer, TmError> {
        let runtime = Handle::try_current().map_err(|e| TmError::Rejected(e.to_string()))?;
        let control_type = control_type(request.kind)?;
        let recipient = recipient(request.recipient)?;
        let interface = self.interface.clone();
        let (pending, slot) = PendingTransfer::channel();

        match request.direction {
            Direction::DeviceToHost => {
                let control = ControlIn {
                    control_type,
                    recipient,
                    request: request.request,
                    value: request.value,
                    index: request.index,
                    length: request.length,
                };
                runtime.spawn(control_in(interface, control, buffer, slot));
            }
            Direction::HostToDevice => {
                runtime.spawn(control_out(interface, request, control_type, recipient, buffer, slot));
            }
        }
        Ok(pending)
    }

    async fn send_interrupt(&self, endpoint: u8, packet: &[u8], timeout: Duration) -> Result<(), TransferStatus> {
        let transfer = self.interface.interrupt_out(endpoint, packet.to_vec());
        match tokio::time::timeout(timeout, transfer).await {
            Ok(completion) => match status_of(completion.status) {
                TransferStatus::Complete => Ok(()),
                status => Err(status),
            },
            Err(_) => Err(TransferStatus::TimedOut),
        }
    }
}
