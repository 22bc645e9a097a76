use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use super::caps::{DeviceCapabilities, DevicePowerState, SystemPowerState};
use super::event::Event;
use super::mdl::Mdl;
use super::status::Status;
use crate::usb::urb::{OpenPipe, Urb};

/// PnP minor codes dispatched by the driver. `QueryCapabilities` carries the
/// caller-owned capabilities block the bus fills in.
#[derive(Clone, Debug)]
pub enum PnpMinor {
    StartDevice,
    QueryRemoveDevice,
    RemoveDevice,
    CancelRemoveDevice,
    StopDevice,
    QueryStopDevice,
    CancelStopDevice,
    QueryCapabilities(Arc<Mutex<DeviceCapabilities>>),
    SurpriseRemoval,
    Other(u8),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerType {
    System(SystemPowerState),
    Device(DevicePowerState),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerMinor {
    WaitWake,
    PowerSequence,
    SetPower(PowerType),
    QueryPower(PowerType),
}

/// The request description at the driver's stack location.
#[derive(Clone, Debug)]
pub enum IrpKind {
    Create { path: String },
    Close,
    Read,
    Write,
    DeviceControl { code: u32 },
    InternalDeviceControl { code: u32 },
    SystemControl,
    Pnp(PnpMinor),
    Power(PowerMinor),
}

/// What a completion routine tells the completion path to do next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Completion {
    /// Keep completing: the request finishes toward its originator.
    Continue,
    /// The routine took ownership of the request; stop here so it is not
    /// completed twice.
    MoreProcessingRequired,
}

pub type CompletionRoutine = Box<dyn FnOnce(&Arc<Irp>) -> Completion + Send>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IoStatus {
    pub status: Status,
    pub information: usize,
}

/// Per-open state hung off the file handle: the claimed pipe, or nothing for
/// the control file.
pub struct FileObject {
    pipe: Mutex<Option<OpenPipe>>,
}

impl FileObject {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pipe: Mutex::new(None),
        })
    }

    pub fn bind_pipe(&self, pipe: OpenPipe) {
        *self.pipe.lock() = Some(pipe);
    }

    pub fn pipe(&self) -> Option<OpenPipe> {
        self.pipe.lock().clone()
    }

    pub fn take_pipe(&self) -> Option<OpenPipe> {
        self.pipe.lock().take()
    }
}

/// An in-flight request. Shared between the dispatcher, the lower driver and
/// completion routines, so all of its mutable state is interior.
///
/// The completion contract mirrors the stack it models: whoever finishes the
/// request calls [`Irp::complete`]; a completion routine installed by the
/// level above runs first and may claim the request with
/// [`Completion::MoreProcessingRequired`], in which case that level finishes
/// it later with [`Irp::complete_request`].
pub struct Irp {
    kind: IrpKind,
    file: Option<Arc<FileObject>>,
    mdl: Option<Mdl>,
    system_buffer: Mutex<Vec<u8>>,
    urb: Mutex<Option<Arc<Mutex<Urb>>>>,
    io_status: Mutex<IoStatus>,
    pending: AtomicBool,
    pending_returned: AtomicBool,
    completion: Mutex<Option<CompletionRoutine>>,
    completed: Event,
}

impl Irp {
    fn build(kind: IrpKind, file: Option<Arc<FileObject>>, mdl: Option<Mdl>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            file,
            mdl,
            system_buffer: Mutex::new(Vec::new()),
            urb: Mutex::new(None),
            io_status: Mutex::new(IoStatus {
                status: Status::SUCCESS,
                information: 0,
            }),
            pending: AtomicBool::new(false),
            pending_returned: AtomicBool::new(false),
            completion: Mutex::new(None),
            completed: Event::new(),
        })
    }

    pub fn create(path: &str) -> (Arc<Self>, Arc<FileObject>) {
        let file = FileObject::new();
        let irp = Self::build(
            IrpKind::Create {
                path: path.to_owned(),
            },
            Some(Arc::clone(&file)),
            None,
        );
        (irp, file)
    }

    pub fn close(file: Arc<FileObject>) -> Arc<Self> {
        Self::build(IrpKind::Close, Some(file), None)
    }

    pub fn read(file: Arc<FileObject>, mdl: Mdl) -> Arc<Self> {
        Self::build(IrpKind::Read, Some(file), Some(mdl))
    }

    pub fn write(file: Arc<FileObject>, mdl: Mdl) -> Arc<Self> {
        Self::build(IrpKind::Write, Some(file), Some(mdl))
    }

    /// Buffered device control: `input` seeds the system buffer, which is
    /// also where the output is written back.
    pub fn device_control(file: Arc<FileObject>, code: u32, input: Vec<u8>) -> Arc<Self> {
        let irp = Self::build(IrpKind::DeviceControl { code }, Some(file), None);
        *irp.system_buffer.lock() = input;
        irp
    }

    pub fn internal_device_control(code: u32) -> Arc<Self> {
        Self::build(IrpKind::InternalDeviceControl { code }, None, None)
    }

    pub fn system_control() -> Arc<Self> {
        Self::build(IrpKind::SystemControl, None, None)
    }

    pub fn pnp(minor: PnpMinor) -> Arc<Self> {
        Self::build(IrpKind::Pnp(minor), None, None)
    }

    pub fn power(minor: PowerMinor) -> Arc<Self> {
        Self::build(IrpKind::Power(minor), None, None)
    }

    pub fn kind(&self) -> &IrpKind {
        &self.kind
    }

    pub fn file(&self) -> Option<&Arc<FileObject>> {
        self.file.as_ref()
    }

    pub fn mdl(&self) -> Option<&Mdl> {
        self.mdl.as_ref()
    }

    pub fn system_buffer(&self) -> MutexGuard<'_, Vec<u8>> {
        self.system_buffer.lock()
    }

    /// Stash a request block in the argument slot for the bus driver.
    pub fn attach_urb(&self, urb: Arc<Mutex<Urb>>) {
        *self.urb.lock() = Some(urb);
    }

    pub fn urb(&self) -> Option<Arc<Mutex<Urb>>> {
        self.urb.lock().clone()
    }

    pub fn io_status(&self) -> IoStatus {
        *self.io_status.lock()
    }

    pub fn set_io_status(&self, status: Status, information: usize) {
        *self.io_status.lock() = IoStatus {
            status,
            information,
        };
    }

    pub fn set_information(&self, information: usize) {
        self.io_status.lock().information = information;
    }

    /// Mark the request pending. A driver that defers completion marks the
    /// request before returning `PENDING`.
    pub fn mark_pending(&self) {
        self.pending.store(true, Ordering::SeqCst);
    }

    pub fn pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// True inside a completion routine when a lower level returned pending
    /// for this request. The routine propagates it with `mark_pending`.
    pub fn pending_returned(&self) -> bool {
        self.pending_returned.load(Ordering::SeqCst)
    }

    pub fn set_completion(&self, routine: CompletionRoutine) {
        *self.completion.lock() = Some(routine);
    }

    /// Complete the request from below: record the status, hand the request
    /// to the installed completion routine, and unless the routine claims it,
    /// release the originator.
    pub fn complete(self: &Arc<Self>, status: Status) {
        self.io_status.lock().status = status;
        self.pending_returned
            .store(self.pending.load(Ordering::SeqCst), Ordering::SeqCst);
        let routine = self.completion.lock().take();
        if let Some(routine) = routine {
            if routine(self) == Completion::MoreProcessingRequired {
                return;
            }
        }
        self.completed.set();
    }

    /// Finish the request at this level: no routine runs, the originator is
    /// released with the given result.
    pub fn complete_request(&self, status: Status, information: usize) {
        self.set_io_status(status, information);
        self.completed.set();
    }

    pub fn is_completed(&self) -> bool {
        self.completed.is_set()
    }

    pub fn wait(&self) {
        self.completed.wait();
    }

    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.completed.wait_timeout(timeout)
    }
}
