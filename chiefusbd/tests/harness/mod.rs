//! Scripted collaborators for driving the full driver: a mock bus driver
//! that answers URBs, a power framework that loops device power requests
//! back into the stack, and a recording object namespace.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::smallvec;

use chiefusbd::kernel::{
    DeviceCapabilities, DevicePowerState, Error, FileObject, Irp, IrpKind, LowerDevice, Mdl,
    ObjectNamespace, PnpMinor, PowerFramework, PowerMinor, PowerType, Result, Status,
    SystemPowerState,
};
use chiefusbd::usb::urb::{
    IOCTL_INTERNAL_USB_GET_PORT_STATUS, IOCTL_INTERNAL_USB_RESET_PORT,
    IOCTL_INTERNAL_USB_SUBMIT_URB,
};
use chiefusbd::usb::{
    DescriptorKind, EndpointTy, InterfaceInfo, PipeHandle, PipeInfo, PortStatus, TransferFlags,
    Urb,
};
use chiefusbd::{ChiefDevice, Driver};

/// Everything the mock bus observed, for assertions.
#[derive(Clone, Debug, PartialEq)]
pub enum BusEvent {
    Pnp(&'static str),
    Power(&'static str),
    SystemControl,
    PortStatusRead,
    PortReset,
    GetDescriptor(DescriptorKind),
    SelectConfiguration {
        alternate_setting: u8,
        pipe_count: usize,
        request_length: usize,
    },
    ClearConfiguration,
    VendorRequest {
        request: u8,
        value: u16,
        index: u16,
        receive: bool,
    },
    BulkTransfer {
        pipe: PipeHandle,
        length: usize,
        direction_in: bool,
    },
    ResetPipe(PipeHandle),
    AbortPipe(PipeHandle),
}

pub struct PendingTransfer {
    pub irp: Arc<Irp>,
    pub urb: Arc<Mutex<Urb>>,
    pub pipe: PipeHandle,
}

struct BusState {
    capabilities: DeviceCapabilities,
    device_descriptor: Vec<u8>,
    config_block: Vec<u8>,
    interfaces: BTreeMap<u8, InterfaceInfo>,
    port_status: PortStatus,
    vendor_response: Vec<u8>,
    vendor_out: Vec<(u8, u16, u16, Vec<u8>)>,
    fail_vendor: bool,
    fail_bulk: Option<Status>,
    fail_abort: bool,
    fail_device_desc: bool,
    async_bulk: bool,
    cancel_on_abort: bool,
    start_status: Status,
    query_status: Status,
    pending: Vec<PendingTransfer>,
    events: Vec<BusEvent>,
}

pub struct MockBus {
    state: Mutex<BusState>,
}

pub fn pipe_handle(index: usize) -> PipeHandle {
    PipeHandle(0x100 + index as u64)
}

fn default_capabilities() -> DeviceCapabilities {
    let mut capabilities = DeviceCapabilities::default();
    capabilities.device_state[SystemPowerState::Working as usize] = DevicePowerState::D0;
    capabilities.device_state[SystemPowerState::Sleeping1 as usize] = DevicePowerState::D1;
    capabilities.device_state[SystemPowerState::Sleeping2 as usize] = DevicePowerState::D2;
    capabilities.device_state[SystemPowerState::Sleeping3 as usize] = DevicePowerState::D3;
    capabilities.device_state[SystemPowerState::Hibernate as usize] = DevicePowerState::D3;
    capabilities.device_state[SystemPowerState::Shutdown as usize] = DevicePowerState::D3;
    capabilities
}

fn default_device_descriptor() -> Vec<u8> {
    vec![
        18, 1, // length, kind
        0x00, 0x02, // bcdUSB 2.0
        0xff, 0x00, 0x00, // class, sub class, protocol
        64, // max packet size
        0x5c, 0x1a, // vendor
        0x01, 0x20, // product
        0x00, 0x01, // release
        0, 0, 0, // string indices
        1, // configurations
    ]
}

fn endpoint_bytes(address: u8, attributes: u8) -> [u8; 7] {
    [7, 5, address, attributes, 0x00, 0x02, 0]
}

fn interface_bytes(number: u8, alternate: u8, endpoints: u8) -> [u8; 9] {
    [9, 4, number, alternate, endpoints, 0xff, 0, 0, 0]
}

/// Interface 0 with two alternate settings: alt 0 has three bulk pipes
/// (pipe 2 is bulk-in), alt 1 has two.
fn default_config_block() -> Vec<u8> {
    let mut raw = vec![9u8, 2, 0, 0, 1, 1, 0, 0x80, 50];
    raw.extend_from_slice(&interface_bytes(0, 0, 3));
    raw.extend_from_slice(&endpoint_bytes(0x01, 2));
    raw.extend_from_slice(&endpoint_bytes(0x81, 2));
    raw.extend_from_slice(&endpoint_bytes(0x82, 2));
    // Class-specific descriptor the driver has to walk over; also pushes the
    // block past the 64-byte fetch probe.
    raw.extend_from_slice(&[9, 0x21, 0x10, 0x01, 0, 1, 0x22, 0x3f, 0]);
    raw.extend_from_slice(&interface_bytes(0, 1, 2));
    raw.extend_from_slice(&endpoint_bytes(0x01, 2));
    raw.extend_from_slice(&endpoint_bytes(0x81, 2));
    let total = raw.len() as u16;
    raw[2..4].copy_from_slice(&total.to_le_bytes());
    raw
}

fn default_interfaces() -> BTreeMap<u8, InterfaceInfo> {
    let pipe = |index: usize, address: u8| PipeInfo {
        handle: pipe_handle(index),
        ty: EndpointTy::Bulk,
        address,
        max_packet_size: 512,
        interval: 0,
    };

    let mut interfaces = BTreeMap::new();
    interfaces.insert(
        0,
        InterfaceInfo {
            number: 0,
            alternate_setting: 0,
            class: 0xff,
            pipes: smallvec![pipe(0, 0x01), pipe(1, 0x81), pipe(2, 0x82)],
        },
    );
    interfaces.insert(
        1,
        InterfaceInfo {
            number: 0,
            alternate_setting: 1,
            class: 0xff,
            pipes: smallvec![pipe(0, 0x01), pipe(1, 0x81)],
        },
    );
    interfaces
}

impl MockBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BusState {
                capabilities: default_capabilities(),
                device_descriptor: default_device_descriptor(),
                config_block: default_config_block(),
                interfaces: default_interfaces(),
                port_status: PortStatus::ENABLED | PortStatus::CONNECTED,
                vendor_response: Vec::new(),
                vendor_out: Vec::new(),
                fail_vendor: false,
                fail_bulk: None,
                fail_abort: false,
                fail_device_desc: false,
                async_bulk: false,
                cancel_on_abort: true,
                start_status: Status::SUCCESS,
                query_status: Status::SUCCESS,
                pending: Vec::new(),
                events: Vec::new(),
            }),
        })
    }

    pub fn set_async_bulk(&self, pend: bool) {
        self.state.lock().async_bulk = pend;
    }

    pub fn set_fail_bulk(&self, status: Option<Status>) {
        self.state.lock().fail_bulk = status;
    }

    pub fn set_fail_vendor(&self, fail: bool) {
        self.state.lock().fail_vendor = fail;
    }

    pub fn set_fail_abort(&self, fail: bool) {
        self.state.lock().fail_abort = fail;
    }

    pub fn set_fail_device_desc(&self, fail: bool) {
        self.state.lock().fail_device_desc = fail;
    }

    /// When false, an abort leaves pended transfers in flight, modelling a
    /// bus driver that cancels them from another thread later.
    pub fn set_cancel_on_abort(&self, cancel: bool) {
        self.state.lock().cancel_on_abort = cancel;
    }

    pub fn set_vendor_response(&self, response: Vec<u8>) {
        self.state.lock().vendor_response = response;
    }

    pub fn set_port_status(&self, port: PortStatus) {
        self.state.lock().port_status = port;
    }

    pub fn set_query_status(&self, status: Status) {
        self.state.lock().query_status = status;
    }

    pub fn set_start_status(&self, status: Status) {
        self.state.lock().start_status = status;
    }

    pub fn events(&self) -> Vec<BusEvent> {
        self.state.lock().events.clone()
    }

    pub fn vendor_out(&self) -> Vec<(u8, u16, u16, Vec<u8>)> {
        self.state.lock().vendor_out.clone()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Finish the oldest pended transfer with `data` and `status`, the way
    /// the real bus driver would from its interrupt path.
    pub fn complete_next_transfer(&self, data: &[u8], status: Status) {
        let transfer = {
            let mut state = self.state.lock();
            assert!(!state.pending.is_empty(), "no pended transfer to complete");
            state.pending.remove(0)
        };

        {
            let mut urb = transfer.urb.lock();
            if let Urb::BulkOrInterruptTransfer {
                mdl,
                transfer_length,
                ..
            } = &mut *urb
            {
                *transfer_length = match mdl {
                    Some(mdl) => mdl.fill(data),
                    None => 0,
                };
            }
        }

        transfer.irp.complete(status);
    }

    fn handle_urb(&self, irp: &Arc<Irp>) -> Status {
        let urb = irp.urb().expect("submit-urb request carries a urb");
        let mut pend = None;

        let status = {
            let mut state = self.state.lock();
            let mut guard = urb.lock();
            match &mut *guard {
                Urb::GetDescriptor {
                    kind,
                    buffer,
                    transferred,
                    ..
                } => {
                    state.events.push(BusEvent::GetDescriptor(*kind));
                    if *kind == DescriptorKind::Device && state.fail_device_desc {
                        Status::UNSUCCESSFUL
                    } else {
                        let source = match kind {
                            DescriptorKind::Device => state.device_descriptor.clone(),
                            DescriptorKind::Configuration => state.config_block.clone(),
                            _ => Vec::new(),
                        };
                        let n = source.len().min(buffer.len());
                        buffer[..n].copy_from_slice(&source[..n]);
                        *transferred = n;
                        Status::SUCCESS
                    }
                }
                Urb::SelectConfiguration {
                    request: Some(request),
                    request_length,
                    interface,
                } => {
                    state.events.push(BusEvent::SelectConfiguration {
                        alternate_setting: request.alternate_setting,
                        pipe_count: request.pipe_count,
                        request_length: *request_length,
                    });
                    *interface = state.interfaces.get(&request.alternate_setting).cloned();
                    Status::SUCCESS
                }
                Urb::SelectConfiguration { request: None, .. } => {
                    state.events.push(BusEvent::ClearConfiguration);
                    Status::SUCCESS
                }
                Urb::ControlVendorRequest {
                    request,
                    value,
                    index,
                    flags,
                    buffer,
                    transferred,
                    ..
                } => {
                    let receive = flags.contains(TransferFlags::DIRECTION_IN);
                    state.events.push(BusEvent::VendorRequest {
                        request: *request,
                        value: *value,
                        index: *index,
                        receive,
                    });
                    if state.fail_vendor {
                        Status::UNSUCCESSFUL
                    } else if receive {
                        let response = state.vendor_response.clone();
                        let n = response.len().min(buffer.len());
                        buffer[..n].copy_from_slice(&response[..n]);
                        *transferred = n;
                        Status::SUCCESS
                    } else {
                        let payload = (*request, *value, *index, buffer.clone());
                        state.vendor_out.push(payload);
                        *transferred = buffer.len();
                        Status::SUCCESS
                    }
                }
                Urb::BulkOrInterruptTransfer {
                    pipe,
                    flags,
                    mdl,
                    transfer_length,
                } => {
                    state.events.push(BusEvent::BulkTransfer {
                        pipe: *pipe,
                        length: *transfer_length,
                        direction_in: flags.contains(TransferFlags::DIRECTION_IN),
                    });
                    if let Some(status) = state.fail_bulk {
                        *transfer_length = 0;
                        status
                    } else if state.async_bulk {
                        pend = Some(*pipe);
                        Status::PENDING
                    } else {
                        // Deterministic pattern for synchronous completions.
                        if flags.contains(TransferFlags::DIRECTION_IN) {
                            if let Some(mdl) = mdl {
                                let pattern: Vec<u8> = (0..*transfer_length)
                                    .map(|i| (i % 251) as u8)
                                    .collect();
                                mdl.fill(&pattern);
                            }
                        }
                        Status::SUCCESS
                    }
                }
                Urb::ResetPipe { pipe } => {
                    state.events.push(BusEvent::ResetPipe(*pipe));
                    Status::SUCCESS
                }
                Urb::AbortPipe { pipe } => {
                    state.events.push(BusEvent::AbortPipe(*pipe));
                    if state.fail_abort {
                        Status::UNSUCCESSFUL
                    } else {
                        Status::SUCCESS
                    }
                }
            }
        };

        if let Some(pipe) = pend {
            irp.mark_pending();
            self.state.lock().pending.push(PendingTransfer {
                irp: Arc::clone(irp),
                urb,
                pipe,
            });
            return Status::PENDING;
        }

        // Aborting a pipe cancels everything pended on it before the abort
        // request itself completes.
        if status.is_success() && self.state.lock().cancel_on_abort {
            self.cancel_aborted(&urb);
        }

        irp.complete(status);
        status
    }

    fn cancel_aborted(&self, urb: &Arc<Mutex<Urb>>) {
        if let Urb::AbortPipe { pipe } = &*urb.lock() {
            let cancelled: Vec<PendingTransfer> = {
                let mut state = self.state.lock();
                let (hit, keep) = state
                    .pending
                    .drain(..)
                    .partition(|transfer| transfer.pipe == *pipe);
                state.pending = keep;
                hit
            };
            for transfer in cancelled {
                if let Urb::BulkOrInterruptTransfer {
                    transfer_length, ..
                } = &mut *transfer.urb.lock()
                {
                    *transfer_length = 0;
                }
                transfer.irp.complete(Status::CANCELLED);
            }
        }
    }
}

impl LowerDevice for MockBus {
    fn call(&self, irp: Arc<Irp>) -> Status {
        let kind = irp.kind().clone();
        match kind {
            IrpKind::Pnp(minor) => {
                let status = {
                    let mut state = self.state.lock();
                    state.events.push(BusEvent::Pnp(pnp_name(&minor)));
                    match &minor {
                        PnpMinor::StartDevice => state.start_status,
                        PnpMinor::QueryCapabilities(table) => {
                            *table.lock() = state.capabilities.clone();
                            Status::SUCCESS
                        }
                        PnpMinor::QueryStopDevice | PnpMinor::QueryRemoveDevice => {
                            state.query_status
                        }
                        _ => Status::SUCCESS,
                    }
                };
                irp.complete(status);
                status
            }
            IrpKind::Power(minor) => {
                self.state.lock().events.push(BusEvent::Power(power_name(&minor)));
                irp.complete(Status::SUCCESS);
                Status::SUCCESS
            }
            IrpKind::SystemControl => {
                self.state.lock().events.push(BusEvent::SystemControl);
                irp.complete(Status::SUCCESS);
                Status::SUCCESS
            }
            IrpKind::InternalDeviceControl { code } => match code {
                IOCTL_INTERNAL_USB_SUBMIT_URB => self.handle_urb(&irp),
                IOCTL_INTERNAL_USB_GET_PORT_STATUS => {
                    let bits = {
                        let mut state = self.state.lock();
                        state.events.push(BusEvent::PortStatusRead);
                        state.port_status.bits()
                    };
                    irp.set_information(bits as usize);
                    irp.complete(Status::SUCCESS);
                    Status::SUCCESS
                }
                IOCTL_INTERNAL_USB_RESET_PORT => {
                    self.state.lock().events.push(BusEvent::PortReset);
                    irp.complete(Status::SUCCESS);
                    Status::SUCCESS
                }
                _ => {
                    irp.complete(Status::INVALID_PARAMETER);
                    Status::INVALID_PARAMETER
                }
            },
            _ => {
                irp.complete(Status::SUCCESS);
                Status::SUCCESS
            }
        }
    }
}

fn pnp_name(minor: &PnpMinor) -> &'static str {
    match minor {
        PnpMinor::StartDevice => "start",
        PnpMinor::QueryRemoveDevice => "query-remove",
        PnpMinor::RemoveDevice => "remove",
        PnpMinor::CancelRemoveDevice => "cancel-remove",
        PnpMinor::StopDevice => "stop",
        PnpMinor::QueryStopDevice => "query-stop",
        PnpMinor::CancelStopDevice => "cancel-stop",
        PnpMinor::QueryCapabilities(_) => "query-capabilities",
        PnpMinor::SurpriseRemoval => "surprise-removal",
        PnpMinor::Other(_) => "other",
    }
}

fn power_name(minor: &PowerMinor) -> &'static str {
    match minor {
        PowerMinor::WaitWake => "wait-wake",
        PowerMinor::PowerSequence => "power-sequence",
        PowerMinor::SetPower(PowerType::System(_)) => "set-power-system",
        PowerMinor::SetPower(PowerType::Device(_)) => "set-power-device",
        PowerMinor::QueryPower(_) => "query-power",
    }
}

/// Power framework that loops requested device power transitions straight
/// back into the device stack.
pub struct MockPowerFramework {
    device: Mutex<Option<Weak<ChiefDevice>>>,
    start_next_calls: Mutex<usize>,
    requests: Mutex<Vec<DevicePowerState>>,
    fail_requests: Mutex<bool>,
}

impl MockPowerFramework {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            device: Mutex::new(None),
            start_next_calls: Mutex::new(0),
            requests: Mutex::new(Vec::new()),
            fail_requests: Mutex::new(false),
        })
    }

    pub fn attach_device(&self, device: &Arc<ChiefDevice>) {
        *self.device.lock() = Some(Arc::downgrade(device));
    }

    pub fn start_next_calls(&self) -> usize {
        *self.start_next_calls.lock()
    }

    pub fn requests(&self) -> Vec<DevicePowerState> {
        self.requests.lock().clone()
    }

    pub fn set_fail_requests(&self, fail: bool) {
        *self.fail_requests.lock() = fail;
    }
}

impl PowerFramework for MockPowerFramework {
    fn start_next_power_irp(&self, _irp: &Arc<Irp>) {
        *self.start_next_calls.lock() += 1;
    }

    fn request_power_irp(
        &self,
        state: DevicePowerState,
        on_complete: Box<dyn FnOnce(Status) + Send>,
    ) -> Result<()> {
        if *self.fail_requests.lock() {
            return Err(Error::new(Status::INSUFFICIENT_RESOURCES));
        }
        self.requests.lock().push(state);

        let device = self.device.lock().clone().and_then(|weak| weak.upgrade());
        let status = match device {
            Some(device) => {
                let irp = Irp::power(PowerMinor::SetPower(PowerType::Device(state)));
                let status = device.dispatch(irp);
                if status == Status::PENDING {
                    Status::SUCCESS
                } else {
                    status
                }
            }
            None => Status::SUCCESS,
        };
        on_complete(status);
        Ok(())
    }
}

/// Object namespace that records what exists.
pub struct MockNamespace {
    devices: Mutex<BTreeSet<String>>,
    links: Mutex<BTreeMap<String, String>>,
}

impl MockNamespace {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            devices: Mutex::new(BTreeSet::new()),
            links: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn has_device(&self, name: &str) -> bool {
        self.devices.lock().contains(name)
    }

    pub fn has_link(&self, link: &str) -> bool {
        self.links.lock().contains_key(link)
    }
}

impl ObjectNamespace for MockNamespace {
    fn create_device(&self, name: &str) -> Result<()> {
        self.devices.lock().insert(name.to_owned());
        Ok(())
    }

    fn delete_device(&self, name: &str) {
        self.devices.lock().remove(name);
    }

    fn create_symbolic_link(&self, link: &str, target: &str) -> Result<()> {
        self.links.lock().insert(link.to_owned(), target.to_owned());
        Ok(())
    }

    fn delete_symbolic_link(&self, link: &str) {
        self.links.lock().remove(link);
    }
}

pub struct Rig {
    pub bus: Arc<MockBus>,
    pub power: Arc<MockPowerFramework>,
    pub namespace: Arc<MockNamespace>,
    pub device: Arc<ChiefDevice>,
}

/// A device that has been added but not started.
pub fn rig() -> Rig {
    let bus = MockBus::new();
    let power = MockPowerFramework::new();
    let namespace = MockNamespace::new();

    let driver = Driver::new(
        Arc::clone(&namespace) as Arc<dyn ObjectNamespace>,
        Arc::clone(&power) as Arc<dyn PowerFramework>,
    );
    let device = driver
        .add_device(Arc::clone(&bus) as Arc<dyn LowerDevice>)
        .expect("add-device");
    power.attach_device(&device);

    Rig {
        bus,
        power,
        namespace,
        device,
    }
}

/// A device that has been added and successfully started.
pub fn started_rig() -> Rig {
    let rig = rig();
    let status = rig.device.dispatch(Irp::pnp(PnpMinor::StartDevice));
    assert_eq!(status, Status::SUCCESS);
    assert!(rig.device.configured());
    rig
}

impl Rig {
    /// Open a handle on the device; `path` is the part after the device
    /// name.
    pub fn open(&self, path: &str) -> (Status, Arc<FileObject>) {
        let (irp, file) = Irp::create(path);
        let status = self.device.dispatch(irp);
        (status, file)
    }

    pub fn close(&self, file: Arc<FileObject>) -> Status {
        self.device.dispatch(Irp::close(file))
    }

    pub fn read(&self, file: &Arc<FileObject>, length: usize) -> Arc<Irp> {
        let irp = Irp::read(Arc::clone(file), Mdl::new(length));
        self.device.dispatch(Arc::clone(&irp));
        irp
    }

    pub fn write(&self, file: &Arc<FileObject>, data: Vec<u8>) -> Arc<Irp> {
        let irp = Irp::write(Arc::clone(file), Mdl::from_vec(data));
        self.device.dispatch(Arc::clone(&irp));
        irp
    }

    pub fn ioctl(&self, file: &Arc<FileObject>, code: u32, input: Vec<u8>) -> Arc<Irp> {
        let irp = Irp::device_control(Arc::clone(file), code, input);
        self.device.dispatch(Arc::clone(&irp));
        irp
    }
}

/// Vendor payload as user mode builds it: header plus inline data.
pub fn vendor_payload(request: u16, value: u16, index: u16, data: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(8 + data.len());
    payload.extend_from_slice(&request.to_le_bytes());
    payload.extend_from_slice(&value.to_le_bytes());
    payload.extend_from_slice(&index.to_le_bytes());
    payload.extend_from_slice(&(data.len() as u16).to_le_bytes());
    payload.extend_from_slice(data);
    payload
}
